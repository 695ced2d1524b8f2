use std::path::PathBuf;

use anyhow::Context as _;
use url::Url;

use crate::cli::BookArgs;
use crate::extract::{DetailExtractors, Page, collapse_ws, parse_selector};
use crate::fetch::{PageSource, site_url};
use crate::formats::{SCRAPED_COLUMNS, ScrapedBook};
use crate::sheet::Sheet;

const SEARCH_RESULTS_CHECKED: usize = 10;

pub async fn run(args: BookArgs) -> anyhow::Result<()> {
    let out = PathBuf::from(&args.out);
    let fetcher = args.fetch.fetcher()?;

    let url = match (&args.url, &args.title) {
        (Some(url), _) => url.clone(),
        (None, Some(title)) => find_by_title(&fetcher, &args.fetch.base_url, title)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no search result matches title {title:?}"))?,
        (None, None) => anyhow::bail!("either --url or --title is required"),
    };

    let book = scrape_book(&fetcher, &url).await?;
    tracing::info!(
        title = %book.title,
        author = ?book.author,
        rating = ?book.platform_rating,
        words = ?book.words,
        "scraped book"
    );

    let sheet = Sheet::from_scraped(std::slice::from_ref(&book)).select_columns(SCRAPED_COLUMNS);
    crate::sheet::write_sheet(&out, &sheet)
        .with_context(|| format!("write spreadsheet: {}", out.display()))?;
    tracing::info!(path = %out.display(), "wrote spreadsheet");
    Ok(())
}

pub async fn scrape_book<S>(source: &S, url: &str) -> anyhow::Result<ScrapedBook>
where
    S: PageSource + ?Sized,
{
    let html = source.fetch(url).await.context("fetch fiction page")?;
    Ok(book_from_html(html, url))
}

fn book_from_html(html: String, url: &str) -> ScrapedBook {
    let page = Page::parse(html);
    DetailExtractors::default().book(&page, url)
}

/// Runs the site search for `title` and returns the first result whose link
/// text contains it (case-insensitively).
pub async fn find_by_title<S>(source: &S, base_url: &str, title: &str) -> anyhow::Result<Option<String>>
where
    S: PageSource + ?Sized,
{
    let mut url = site_url(base_url, "fictions/search")?;
    url.query_pairs_mut().append_pair("title", title);

    let html = source.fetch(url.as_str()).await.context("fetch search results")?;
    let found = match_search_result(&html, &url, title);
    match &found {
        Some(hit) => tracing::info!(url = %hit, "search matched"),
        None => tracing::warn!(title, "no search result matched"),
    }
    Ok(found)
}

fn match_search_result(html: &str, page_url: &Url, title: &str) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    let selector = parse_selector(r#"a[href*="/fiction/"]"#)?;
    let wanted = title.trim().to_lowercase();

    let results: Vec<(String, Url)> = document
        .select(&selector)
        .filter_map(|link| {
            let text = collapse_ws(&link.text().collect::<String>());
            let href = page_url.join(link.value().attr("href")?.trim()).ok()?;
            (!text.is_empty()).then_some((text, href))
        })
        .take(SEARCH_RESULTS_CHECKED)
        .collect();

    let hit = results
        .iter()
        .find(|(text, _)| text.to_lowercase().contains(&wanted))
        .map(|(_, url)| url.to_string());
    if hit.is_none() {
        for (text, url) in results.iter().take(5) {
            tracing::info!(%text, %url, "search candidate");
        }
    }
    hit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_picks_first_title_match() -> anyhow::Result<()> {
        let page = Url::parse("https://www.royalroad.com/fictions/search?title=worth")?;
        let html = r#"<div>
<h2><a href="/fiction/1111/worthless">Worthless</a></h2>
<h2><a href="/fiction/25137/worth-the-candle">Worth the Candle</a></h2>
<a href="/fiction/25137/worth-the-candle/chapter/1">Chapter 1</a>
</div>"#;

        assert_eq!(
            match_search_result(html, &page, "worth the candle").as_deref(),
            Some("https://www.royalroad.com/fiction/25137/worth-the-candle")
        );
        assert_eq!(match_search_result(html, &page, "Mother of Learning"), None);
        Ok(())
    }

    #[test]
    fn detail_html_becomes_a_row() {
        let book = book_from_html(
            r#"<h1>Worth the Candle</h1><a href="/profile/1">Alexander Wales</a>"#.to_owned(),
            "https://www.royalroad.com/fiction/25137",
        );
        assert_eq!(book.title, "Worth the Candle");
        assert_eq!(book.author.as_deref(), Some("Alexander Wales"));
        assert_eq!(book.url, "https://www.royalroad.com/fiction/25137");
    }
}
