//! Layered field extraction from fiction pages.
//!
//! Every field is read by a [`Chain`]: an ordered list of [`Strategy`] values
//! tried one after another until one yields a value. Strategies are small and
//! independent so a broken one can be replaced without touching callers.

use std::sync::LazyLock;

use regex_lite::Regex;
use scraper::{Html, Selector};

use crate::formats::ScrapedBook;

/// A fetched page: raw markup plus its parsed document.
pub struct Page {
    raw: String,
    document: Html,
}

impl Page {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let document = Html::parse_document(&raw);
        Self { raw, document }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    /// Visible text of the whole document with whitespace collapsed.
    pub fn rendered_text(&self) -> String {
        collapse_ws(&self.document.root_element().text().collect::<Vec<_>>().join(" "))
    }

    /// Collapsed text of every element matching `css`, in document order.
    pub fn select_texts(&self, css: &str) -> Vec<String> {
        let Some(selector) = parse_selector(css) else {
            return Vec::new();
        };
        self.document
            .select(&selector)
            .map(|el| collapse_ws(&el.text().collect::<String>()))
            .collect()
    }

    pub fn select_attr(&self, css: &str, attr: &str) -> Option<String> {
        let selector = parse_selector(css)?;
        self.document
            .select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_owned)
    }

    /// Every JSON-LD block on the page. Top-level arrays and `@graph` members
    /// are flattened so callers see one object per entry.
    pub fn json_ld(&self) -> Vec<serde_json::Value> {
        let Some(selector) = parse_selector(r#"script[type="application/ld+json"]"#) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for script in self.document.select(&selector) {
            let body = script.text().collect::<String>();
            let value: serde_json::Value = match serde_json::from_str(body.trim()) {
                Ok(value) => value,
                Err(err) => {
                    tracing::debug!(?err, "skipping unparsable json-ld block");
                    continue;
                }
            };
            flatten_json_ld(value, &mut out);
        }
        out
    }
}

fn flatten_json_ld(value: serde_json::Value, out: &mut Vec<serde_json::Value>) {
    match value {
        serde_json::Value::Array(items) => {
            for item in items {
                flatten_json_ld(item, out);
            }
        }
        serde_json::Value::Object(mut obj) => {
            if let Some(graph) = obj.remove("@graph") {
                flatten_json_ld(graph, out);
            }
            if !obj.is_empty() {
                out.push(serde_json::Value::Object(obj));
            }
        }
        _ => {}
    }
}

pub(crate) fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(err) => {
            tracing::debug!(css, ?err, "invalid css selector");
            None
        }
    }
}

pub(crate) fn collapse_ws(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One way of locating a field. Yields `None` when the page does not have it.
pub trait Strategy<T>: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, page: &Page) -> Option<T>;
}

/// Ordered fallback over strategies; the first value found wins.
pub struct Chain<T> {
    field: &'static str,
    strategies: Vec<Box<dyn Strategy<T>>>,
}

impl<T> Chain<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            strategies: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl Strategy<T> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn extract(&self, page: &Page) -> Option<T> {
        for strategy in &self.strategies {
            if let Some(value) = strategy.extract(page) {
                tracing::trace!(field = self.field, strategy = strategy.name(), "field found");
                return Some(value);
            }
        }
        tracing::debug!(field = self.field, "no strategy found field");
        None
    }
}

type TextParser<T> = fn(&str) -> Option<T>;
type JsonParser<T> = fn(&serde_json::Value) -> Option<T>;

/// Reads the `content` attribute of the first matching `<meta>` tag.
pub struct MetaContent<T> {
    name: String,
    css: String,
    parse: TextParser<T>,
}

impl<T> MetaContent<T> {
    pub fn property(property: &str, parse: TextParser<T>) -> Self {
        Self {
            name: format!("meta[{property}]"),
            css: format!(r#"meta[property="{property}"]"#),
            parse,
        }
    }

    pub fn named(name: &str, parse: TextParser<T>) -> Self {
        Self {
            name: format!("meta[name={name}]"),
            css: format!(r#"meta[name="{name}"]"#),
            parse,
        }
    }
}

impl<T> Strategy<T> for MetaContent<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, page: &Page) -> Option<T> {
        page.select_attr(&self.css, "content")
            .and_then(|content| (self.parse)(&content))
    }
}

/// Looks up a JSON pointer (e.g. `/aggregateRating/ratingValue`) in each
/// JSON-LD block of the page.
pub struct JsonLdField<T> {
    name: String,
    pointer: &'static str,
    parse: JsonParser<T>,
}

impl<T> JsonLdField<T> {
    pub fn new(pointer: &'static str, parse: JsonParser<T>) -> Self {
        Self {
            name: format!("json-ld{pointer}"),
            pointer,
            parse,
        }
    }
}

impl<T> Strategy<T> for JsonLdField<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, page: &Page) -> Option<T> {
        page.json_ld()
            .iter()
            .filter_map(|block| block.pointer(self.pointer))
            .find_map(self.parse)
    }
}

/// First capture group of a regex run over the raw markup.
pub struct RawPattern<T> {
    name: &'static str,
    regex: &'static LazyLock<Regex>,
    parse: TextParser<T>,
}

impl<T> RawPattern<T> {
    pub fn new(name: &'static str, regex: &'static LazyLock<Regex>, parse: TextParser<T>) -> Self {
        Self { name, regex, parse }
    }
}

impl<T> Strategy<T> for RawPattern<T> {
    fn name(&self) -> &str {
        self.name
    }

    fn extract(&self, page: &Page) -> Option<T> {
        first_capture(self.regex, page.raw()).and_then(|m| (self.parse)(&m))
    }
}

/// Text of elements matching a CSS selector, optionally narrowed by a regex
/// whose first capture group is parsed. Elements are tried in document order.
pub struct ElementText<T> {
    name: String,
    css: &'static str,
    regex: Option<&'static LazyLock<Regex>>,
    parse: TextParser<T>,
}

impl<T> ElementText<T> {
    pub fn new(css: &'static str, parse: TextParser<T>) -> Self {
        Self {
            name: css.to_owned(),
            css,
            regex: None,
            parse,
        }
    }

    pub fn matching(css: &'static str, regex: &'static LazyLock<Regex>, parse: TextParser<T>) -> Self {
        Self {
            name: format!("{css} =~ {}", regex.as_str()),
            css,
            regex: Some(regex),
            parse,
        }
    }
}

impl<T> Strategy<T> for ElementText<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, page: &Page) -> Option<T> {
        page.select_texts(self.css).iter().find_map(|text| match self.regex {
            Some(regex) => first_capture(regex, text).and_then(|m| (self.parse)(&m)),
            None => (self.parse)(text),
        })
    }
}

/// First capture group of a regex run over the page's visible text.
pub struct RenderedPattern<T> {
    name: String,
    regex: &'static LazyLock<Regex>,
    parse: TextParser<T>,
}

impl<T> RenderedPattern<T> {
    pub fn new(regex: &'static LazyLock<Regex>, parse: TextParser<T>) -> Self {
        Self {
            name: format!("text =~ {}", regex.as_str()),
            regex,
            parse,
        }
    }
}

impl<T> Strategy<T> for RenderedPattern<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, page: &Page) -> Option<T> {
        first_capture(self.regex, &page.rendered_text()).and_then(|m| (self.parse)(&m))
    }
}

fn first_capture(regex: &Regex, haystack: &str) -> Option<String> {
    regex
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Platform ratings live on a 1 to 5 scale; anything else is a mis-read.
pub const RATING_RANGE: std::ops::RangeInclusive<f64> = 1.0..=5.0;

pub fn parse_rating(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| RATING_RANGE.contains(value))
}

fn json_rating(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| RATING_RANGE.contains(v)),
        serde_json::Value::String(s) => parse_rating(s),
        _ => None,
    }
}

/// Parses counts like `1,234,567`; any non-digit is ignored.
pub fn parse_count(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn json_count(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        serde_json::Value::String(s) => parse_count(s),
        _ => None,
    }
}

fn parse_name(text: &str) -> Option<String> {
    let text = collapse_ws(text);
    (!text.is_empty()).then_some(text)
}

fn json_name(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => parse_name(s),
        serde_json::Value::Object(obj) => obj.get("name").and_then(json_name),
        serde_json::Value::Array(items) => items.iter().find_map(json_name),
        _ => None,
    }
}

fn parse_synopsis(text: &str) -> Option<String> {
    parse_name(text).map(|s| truncate_chars(&s, SYNOPSIS_MAX_CHARS))
}

pub const SYNOPSIS_MAX_CHARS: usize = 1000;

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_owned(),
        None => text.to_owned(),
    }
}

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        pub(crate) static $name: LazyLock<Regex> =
            LazyLock::new(|| Regex::new($re).expect(concat!("valid regex: ", stringify!($name))));
    };
}

pattern!(RAW_RATING, r#"books:rating:value"\s+content="(\d+\.\d+)""#);
pattern!(RATING_DECIMAL, r"(\d\.\d{1,2})");
pattern!(WORDS, r"(?i)([\d,]+)\s*words?\b");
pattern!(VIEWS, r"(?i)([\d,]+)\s*(?:total\s+)?views?\b");
pattern!(FOLLOWERS, r"(?i)([\d,]+)\s*followers?\b");
pattern!(PAGES, r"(?i)([\d,]+)\s*pages?\b");
pattern!(CHAPTERS, r"(?i)([\d,]+)\s*chapters?\b");

const TAG_LINKS: &str = r#"a.fiction-tag, a[href*="/tags/"], a[href*="tagsAdd="]"#;

/// Status labels in the order they are looked for.
pub const STATUS_LABELS: &[&str] = &["COMPLETED", "ONGOING", "HIATUS", "STUB"];

/// Field chains for a fiction detail page.
pub struct DetailExtractors {
    pub rating: Chain<f64>,
    pub author: Chain<String>,
    pub title: Chain<String>,
    pub cover: Chain<String>,
    pub synopsis: Chain<String>,
    pub words: Chain<u64>,
    pub views: Chain<u64>,
    pub followers: Chain<u64>,
    pub pages: Chain<u64>,
    pub chapters: Chain<u64>,
}

impl Default for DetailExtractors {
    fn default() -> Self {
        Self {
            rating: rating_chain(),
            author: Chain::new("author")
                .then(ElementText::new(r#"a[href*="/profile/"]"#, parse_name))
                .then(JsonLdField::new("/author", json_name))
                .then(MetaContent::property("books:author", parse_name)),
            title: Chain::new("title")
                .then(ElementText::new("h1.font-white", parse_name))
                .then(ElementText::new("h1", parse_name))
                .then(MetaContent::property("og:title", parse_name)),
            cover: Chain::new("cover")
                .then(ImageSource("img.img-responsive"))
                .then(MetaContent::property("og:image", parse_name)),
            synopsis: Chain::new("synopsis")
                .then(ElementText::new(".fiction-description", parse_synopsis))
                .then(MetaContent::property("og:description", parse_synopsis))
                .then(MetaContent::named("description", parse_synopsis)),
            words: Chain::new("words")
                .then(ElementText::matching(".fiction-stats", &WORDS, parse_count))
                .then(JsonLdField::new("/wordCount", json_count))
                .then(RenderedPattern::new(&WORDS, parse_count)),
            views: stat_chain("views", &VIEWS),
            followers: stat_chain("followers", &FOLLOWERS),
            pages: stat_chain("pages", &PAGES),
            chapters: stat_chain("chapters", &CHAPTERS),
        }
    }
}

/// Canonical rating order: metadata tag, JSON-LD, raw markup, rating-styled element.
pub fn rating_chain() -> Chain<f64> {
    Chain::new("rating")
        .then(MetaContent::property("books:rating:value", parse_rating))
        .then(JsonLdField::new("/aggregateRating/ratingValue", json_rating))
        .then(RawPattern::new("raw books:rating:value", &RAW_RATING, parse_rating))
        .then(ElementText::matching(r#"[class*="rating"]"#, &RATING_DECIMAL, parse_rating))
}

fn stat_chain(field: &'static str, regex: &'static LazyLock<Regex>) -> Chain<u64> {
    Chain::new(field)
        .then(ElementText::matching(".fiction-stats", regex, parse_count))
        .then(RenderedPattern::new(regex, parse_count))
}

struct ImageSource(&'static str);

impl Strategy<String> for ImageSource {
    fn name(&self) -> &str {
        self.0
    }

    fn extract(&self, page: &Page) -> Option<String> {
        page.select_attr(self.0, "src")
    }
}

/// First status label present in `text`.
pub fn status_label(text: &str) -> Option<&'static str> {
    STATUS_LABELS.iter().copied().find(|label| text.contains(label))
}

/// Tag link texts, de-duplicated, at most `limit`, skipping `excluded` labels.
pub fn tag_texts(texts: impl IntoIterator<Item = String>, excluded: &[&str], limit: usize) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for text in texts {
        if tags.len() >= limit {
            break;
        }
        if text.is_empty()
            || excluded.iter().any(|label| label.eq_ignore_ascii_case(&text))
            || tags.contains(&text)
        {
            continue;
        }
        tags.push(text);
    }
    tags
}

impl DetailExtractors {
    pub fn rating(&self, page: &Page) -> Option<f64> {
        self.rating.extract(page)
    }

    /// Everything a detail page offers, for a book at `url`.
    pub fn book(&self, page: &Page, url: &str) -> ScrapedBook {
        let tags = tag_texts(page.select_texts(TAG_LINKS), STATUS_LABELS, 10);
        ScrapedBook {
            title: self.title.extract(page).unwrap_or_default(),
            author: self.author.extract(page),
            url: url.to_owned(),
            cover_url: self.cover.extract(page),
            platform_rating: self.rating.extract(page),
            status: status_label(&page.rendered_text()).map(str::to_owned),
            chapters: self.chapters.extract(page),
            pages: self.pages.extract(page),
            words: self.words.extract(page),
            views: self.views.extract(page),
            followers: self.followers.extract(page),
            synopsis: self.synopsis.extract(page),
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        calls: Arc<AtomicUsize>,
        value: Option<f64>,
    }

    impl Strategy<f64> for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn extract(&self, _page: &Page) -> Option<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value
        }
    }

    fn counting(value: Option<f64>) -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Counting {
                calls: Arc::clone(&calls),
                value,
            },
            calls,
        )
    }

    #[test]
    fn chain_stops_at_first_success() {
        let (first, first_calls) = counting(Some(4.5));
        let (second, second_calls) = counting(Some(3.0));
        let (third, third_calls) = counting(Some(2.0));
        let chain = Chain::new("rating").then(first).then(second).then(third);

        assert_eq!(chain.extract(&Page::parse("<html></html>")), Some(4.5));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(third_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn chain_falls_through_misses_in_order() {
        let (first, first_calls) = counting(None);
        let (second, second_calls) = counting(None);
        let (third, third_calls) = counting(Some(2.5));
        let chain = Chain::new("rating").then(first).then(second).then(third);

        assert_eq!(chain.extract(&Page::parse("")), Some(2.5));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third_calls.load(Ordering::SeqCst), 1);

        let (only, _) = counting(None);
        assert_eq!(Chain::new("rating").then(only).extract(&Page::parse("")), None);
    }

    #[test]
    fn rating_prefers_meta_tag() {
        let page = Page::parse(
            r#"<html><head>
<meta property="books:rating:value" content="4.71">
<script type="application/ld+json">{"aggregateRating":{"ratingValue":3.2}}</script>
</head><body></body></html>"#,
        );
        assert_eq!(rating_chain().extract(&page), Some(4.71));
    }

    #[test]
    fn rating_falls_back_to_json_ld() {
        let page = Page::parse(
            r#"<html><head>
<script type="application/ld+json">{"@context":"https://schema.org","@graph":[{"@type":"Book","aggregateRating":{"ratingValue":"4.25"}}]}</script>
</head><body></body></html>"#,
        );
        assert_eq!(rating_chain().extract(&page), Some(4.25));
    }

    #[test]
    fn rating_falls_back_to_rating_class_and_rejects_out_of_range() {
        let page = Page::parse(
            r#"<html><body>
<span class="star-rating">Score 9.50</span>
<span class="overall-rating">4.38 (1,200 ratings)</span>
</body></html>"#,
        );
        assert_eq!(rating_chain().extract(&page), Some(4.38));

        let nothing = Page::parse(r#"<html><body><span class="rating">n/a</span></body></html>"#);
        assert_eq!(rating_chain().extract(&nothing), None);
    }

    #[test]
    fn rating_chain_order_is_stable() {
        assert_eq!(
            rating_chain().strategy_names(),
            vec![
                "meta[books:rating:value]",
                "json-ld/aggregateRating/ratingValue",
                "raw books:rating:value",
                r#"[class*="rating"] =~ (\d\.\d{1,2})"#,
            ]
        );
    }

    #[test]
    fn detail_page_fields() {
        let page = Page::parse(
            r#"<!doctype html><html><head>
<meta property="og:image" content="https://cdn.example/og.jpg">
<meta property="books:rating:value" content="4.8">
</head><body>
<h1 class="font-white">Mother of Learning</h1>
<h4>by <a href="/profile/12345">nobody103</a></h4>
<span class="label">COMPLETED</span>
<a href="/fictions/search?tagsAdd=time_loop">Time Loop</a>
<a href="/fictions/search?tagsAdd=magic">Magic</a>
<a href="/fictions/search?tagsAdd=magic">Magic</a>
<div class="fiction-description"><p>Zorian is a   teenage mage.</p></div>
<div class="fiction-stats">
  <li>Total Views :</li><li>12,345,678 Views</li>
  <li>Followers :</li><li>45,678 Followers</li>
  <li>1,800 Pages</li>
  <li>108 Chapters</li>
  <li>740,000 Words</li>
</div>
</body></html>"#,
        );
        let book = DetailExtractors::default().book(&page, "https://www.royalroad.com/fiction/21220");

        assert_eq!(book.title, "Mother of Learning");
        assert_eq!(book.author.as_deref(), Some("nobody103"));
        assert_eq!(book.cover_url.as_deref(), Some("https://cdn.example/og.jpg"));
        assert_eq!(book.platform_rating, Some(4.8));
        assert_eq!(book.status.as_deref(), Some("COMPLETED"));
        assert_eq!(book.views, Some(12_345_678));
        assert_eq!(book.followers, Some(45_678));
        assert_eq!(book.pages, Some(1_800));
        assert_eq!(book.chapters, Some(108));
        assert_eq!(book.words, Some(740_000));
        assert_eq!(book.synopsis.as_deref(), Some("Zorian is a teenage mage."));
        assert_eq!(book.tags, vec!["Time Loop", "Magic"]);
    }

    #[test]
    fn author_falls_back_to_json_ld() {
        let page = Page::parse(
            r#"<html><head><script type="application/ld+json">[{"@type":"Book","author":{"@type":"Person","name":"Alexander Wales"}}]</script></head></html>"#,
        );
        let extractors = DetailExtractors::default();
        assert_eq!(extractors.author.extract(&page).as_deref(), Some("Alexander Wales"));
    }

    #[test]
    fn counts_ignore_separators() {
        assert_eq!(parse_count("1,234,567"), Some(1_234_567));
        assert_eq!(parse_count("none"), None);
        assert_eq!(parse_rating("4.5"), Some(4.5));
        assert_eq!(parse_rating("0.5"), None);
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }
}
