//! Ranked listing pages (`/fictions/best-rated?page=N`).

use std::collections::HashSet;
use std::sync::LazyLock;

use regex_lite::Regex;
use scraper::{ElementRef, Html};
use url::Url;

use crate::extract::{
    CHAPTERS, FOLLOWERS, PAGES, RATING_DECIMAL, SYNOPSIS_MAX_CHARS, VIEWS, WORDS, collapse_ws,
    parse_count, parse_rating, parse_selector, status_label, tag_texts, truncate_chars,
};
use crate::formats::ScrapedBook;

/// Labels that show up as links in a card but are not genre tags.
pub const EXCLUDED_TAGS: &[&str] = &[
    "COMPLETED",
    "ONGOING",
    "HIATUS",
    "STUB",
    "STUBBED",
    "Original",
    "Fan Fiction",
];

const MAX_TAGS: usize = 10;
const MIN_SYNOPSIS_CHARS: usize = 50;

static FICTION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/fiction/(\d+)").expect("valid fiction id regex"));

// Links to a fiction's landing page; chapter links have extra path segments.
static FICTION_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="(?:https?://[^"/]+)?/fiction/(\d+)(?:/[^"/?#]*)?/?""#)
        .expect("valid fiction href regex")
});

pub fn fiction_id(url: &str) -> Option<u64> {
    FICTION_ID
        .captures(url)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Distinct fiction ids in the order the page links them.
pub fn fiction_order(html: &str) -> Vec<u64> {
    let mut seen = HashSet::new();
    FICTION_HREF
        .captures_iter(html)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u64>().ok())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Book entries of a listing page in document order, one per fiction.
pub fn parse_listing(html: &str, base: &Url) -> Vec<ScrapedBook> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut books = Vec::new();
    for entry in entry_elements(&document) {
        let Some(book) = parse_entry(entry, base) else {
            continue;
        };
        let key = fiction_id(&book.url).map_or_else(|| book.url.clone(), |id| id.to_string());
        if !seen.insert(key) {
            tracing::debug!(url = %book.url, "duplicate listing entry");
            continue;
        }
        books.push(book);
    }
    books
}

/// Whether a listing entry counts as finished (completed or stubbed).
pub fn is_finished(book: &ScrapedBook) -> bool {
    matches!(book.status.as_deref(), Some("COMPLETED" | "STUB"))
}

fn entry_elements(document: &Html) -> Vec<ElementRef<'_>> {
    for css in ["div.fiction-card", "div.fiction-list-item"] {
        let Some(selector) = parse_selector(css) else {
            continue;
        };
        let found: Vec<_> = document.select(&selector).collect();
        if !found.is_empty() {
            return found;
        }
    }

    let (Some(div), Some(h2), Some(link)) = (
        parse_selector("div"),
        parse_selector("h2"),
        parse_selector(r#"h2 a[href*="/fiction/"]"#),
    ) else {
        return Vec::new();
    };
    let candidates: Vec<ElementRef<'_>> = document
        .select(&div)
        .filter(|el| el.select(&h2).count() == 1 && el.select(&link).next().is_some())
        .collect();
    let ids: HashSet<_> = candidates.iter().map(|el| el.id()).collect();
    candidates
        .into_iter()
        .filter(|el| !el.ancestors().any(|ancestor| ids.contains(&ancestor.id())))
        .collect()
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_ws(&el.text().collect::<Vec<_>>().join(" "))
}

fn first_count(regex: &Regex, text: &str) -> Option<u64> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_count(m.as_str()))
}

fn parse_entry(entry: ElementRef<'_>, base: &Url) -> Option<ScrapedBook> {
    let title_link = ["h2 a[href*=\"/fiction/\"]", "h2 a"]
        .into_iter()
        .filter_map(parse_selector)
        .find_map(|selector| entry.select(&selector).next())?;
    let href = title_link.value().attr("href")?;
    let url = base.join(href.trim()).ok()?;
    let title = element_text(title_link);
    if title.is_empty() {
        return None;
    }

    let text = element_text(entry);

    let cover_url = parse_selector("img").and_then(|img| {
        entry
            .select(&img)
            .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
            .find_map(|src| base.join(src.trim()).ok())
            .map(String::from)
    });

    let tags = parse_selector(r#"a.fiction-tag, a[href*="/tags/"], a[href*="tagsAdd="]"#)
        .map(|selector| {
            tag_texts(
                entry.select(&selector).map(element_text),
                EXCLUDED_TAGS,
                MAX_TAGS,
            )
        })
        .unwrap_or_default();

    let synopsis = parse_selector("p").and_then(|p| {
        entry
            .select(&p)
            .map(element_text)
            .find(|para| para.chars().count() > MIN_SYNOPSIS_CHARS)
            .map(|para| truncate_chars(&para, SYNOPSIS_MAX_CHARS))
    });

    Some(ScrapedBook {
        title,
        author: None,
        url: url.into(),
        cover_url,
        platform_rating: entry_rating(entry),
        status: status_label(&text).map(str::to_owned),
        chapters: first_count(&CHAPTERS, &text),
        pages: first_count(&PAGES, &text),
        words: first_count(&WORDS, &text),
        views: first_count(&VIEWS, &text),
        followers: first_count(&FOLLOWERS, &text),
        synopsis,
        tags,
    })
}

// Star widgets carry the score in `title` or `aria-label`.
fn entry_rating(entry: ElementRef<'_>) -> Option<f64> {
    let selector = parse_selector(r#"[class*="star"], [class*="rating"], [aria-label*="Rating"]"#)?;
    entry.select(&selector).find_map(|el| {
        ["title", "aria-label"]
            .into_iter()
            .filter_map(|attr| el.value().attr(attr))
            .find_map(rating_in)
    })
}

fn rating_in(text: &str) -> Option<f64> {
    RATING_DECIMAL
        .captures(text)
        .and_then(|caps| parse_rating(caps.get(1)?.as_str()))
}
