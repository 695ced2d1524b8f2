//! Best-rated listing scrape and spreadsheet re-ordering.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli::{RankingArgs, RerankArgs};
use crate::extract::{DetailExtractors, Page};
use crate::fetch::{Pacing, PageSource, site_url};
use crate::formats::{SCRAPED_COLUMNS, ScrapedBook};
use crate::listing::{fiction_id, fiction_order, is_finished, parse_listing};
use crate::sheet::Sheet;

fn listing_path(page: u32) -> String {
    format!("fictions/best-rated?page={page}")
}

#[derive(Debug, Clone, Copy)]
pub struct RankingOptions {
    pub target: usize,
    pub max_pages: u32,
    pub completed_only: bool,
    pub details: bool,
    pub pacing: Pacing,
}

pub async fn run(args: RankingArgs) -> anyhow::Result<()> {
    let out = PathBuf::from(&args.out);
    let fetcher = args.fetch.fetcher()?;
    let options = RankingOptions {
        target: args.target,
        max_pages: args.max_pages,
        completed_only: args.completed_only,
        details: !args.skip_details,
        pacing: args.fetch.pacing(),
    };

    let books = collect_ranking(&fetcher, &args.fetch.base_url, options).await?;
    if books.is_empty() {
        anyhow::bail!("no books found on the best-rated listing");
    }

    let sheet = Sheet::from_scraped(&books).select_columns(SCRAPED_COLUMNS);
    crate::sheet::write_sheet(&out, &sheet)
        .with_context(|| format!("write spreadsheet: {}", out.display()))?;
    tracing::info!(path = %out.display(), books = books.len(), "wrote ranking");
    Ok(())
}

/// Walks listing pages in rank order until `target` books are collected.
pub async fn collect_ranking<S>(
    source: &S,
    base_url: &str,
    options: RankingOptions,
) -> anyhow::Result<Vec<ScrapedBook>>
where
    S: PageSource + ?Sized,
{
    let extractors = DetailExtractors::default();
    let mut books: Vec<ScrapedBook> = Vec::new();
    let mut seen = HashSet::new();

    for page in 1..=options.max_pages {
        if books.len() >= options.target {
            break;
        }
        let url = site_url(base_url, &listing_path(page))?;
        let html = match source.fetch(url.as_str()).await {
            Ok(html) => html,
            Err(err) => {
                tracing::warn!(page, %err, "listing page failed; skipping");
                continue;
            }
        };
        let entries = parse_listing(&html, &url);
        tracing::info!(page, entries = entries.len(), "read listing page");
        if entries.is_empty() {
            break;
        }

        for mut book in entries {
            if books.len() >= options.target {
                break;
            }
            if options.completed_only && !is_finished(&book) {
                continue;
            }
            let key = fiction_id(&book.url).map_or_else(|| book.url.clone(), |id| id.to_string());
            if !seen.insert(key) {
                continue;
            }

            if options.details {
                options.pacing.pause().await;
                match source.fetch(&book.url).await {
                    Ok(html) => fill_from_detail(&extractors, &mut book, html),
                    Err(err) => tracing::warn!(url = %book.url, %err, "detail page failed"),
                }
            }
            tracing::info!(
                rank = books.len() + 1,
                title = %book.title,
                rating = ?book.platform_rating,
                "collected"
            );
            books.push(book);
        }

        if page < options.max_pages && books.len() < options.target {
            options.pacing.pause().await;
        }
    }

    Ok(books)
}

/// Detail values win where the detail page has them; listing values stay otherwise.
fn fill_from_detail(extractors: &DetailExtractors, book: &mut ScrapedBook, html: String) {
    let page = Page::parse(html);
    let detail = extractors.book(&page, &book.url);

    if book.title.is_empty() {
        book.title = detail.title;
    }
    book.author = detail.author.or(book.author.take());
    book.platform_rating = detail.platform_rating.or(book.platform_rating);
    book.words = detail.words.or(book.words);
    book.cover_url = book.cover_url.take().or(detail.cover_url);
    book.status = book.status.take().or(detail.status);
    book.chapters = book.chapters.or(detail.chapters);
    book.pages = book.pages.or(detail.pages);
    book.views = book.views.or(detail.views);
    book.followers = book.followers.or(detail.followers);
    book.synopsis = book.synopsis.take().or(detail.synopsis);
    if book.tags.is_empty() {
        book.tags = detail.tags;
    }
}

pub async fn rerank(args: RerankArgs) -> anyhow::Result<()> {
    let sheet_path = PathBuf::from(&args.sheet);
    let out = args
        .out
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| sheet_path.clone());

    let mut sheet = crate::sheet::read_sheet(&sheet_path, 0)
        .with_context(|| format!("read spreadsheet: {}", sheet_path.display()))?;
    sheet
        .column("url")
        .ok_or_else(|| anyhow::anyhow!("spreadsheet has no `url` column"))?;

    let fetcher = args.fetch.fetcher()?;
    let pacing = args.fetch.pacing();
    let ranks = fetch_order(&fetcher, &args.fetch.base_url, args.pages, pacing).await?;

    if args.refresh_ratings {
        let urls = crate::ratings::pending_urls(&sheet, false)?;
        let ratings = crate::ratings::fetch_ratings(&fetcher, urls, 1, pacing).await;
        let applied = crate::ratings::apply_ratings(&mut sheet, &ratings)?;
        tracing::info!(applied, "refreshed ratings");
    }

    let matched = sort_by_rank(&mut sheet, &ranks);
    tracing::info!(
        matched,
        unranked = sheet.len() - matched,
        "sorted by best-rated order"
    );

    let sheet = rerank_output(sheet, args.refresh_ratings);
    crate::sheet::write_sheet(&out, &sheet)
        .with_context(|| format!("write spreadsheet: {}", out.display()))?;
    tracing::info!(path = %out.display(), columns = sheet.headers.len(), "wrote spreadsheet");
    Ok(())
}

/// A plain reorder writes every column the sheet came with. A rating refresh
/// writes the scraped column layout, like the `ratings` job.
fn rerank_output(sheet: Sheet, refreshed: bool) -> Sheet {
    if refreshed {
        sheet.select_columns(SCRAPED_COLUMNS)
    } else {
        sheet
    }
}

/// Fiction id to 1-based rank across the first `pages` listing pages.
/// A page that fails is skipped; later pages still count from where the
/// order left off.
pub async fn fetch_order<S>(
    source: &S,
    base_url: &str,
    pages: u32,
    pacing: Pacing,
) -> anyhow::Result<HashMap<u64, usize>>
where
    S: PageSource + ?Sized,
{
    let mut ranks: HashMap<u64, usize> = HashMap::new();
    for page in 1..=pages {
        let url = site_url(base_url, &listing_path(page))?;
        match source.fetch(url.as_str()).await {
            Ok(html) => {
                let mut added = 0;
                for id in fiction_order(&html) {
                    let next = ranks.len() + 1;
                    if let std::collections::hash_map::Entry::Vacant(slot) = ranks.entry(id) {
                        slot.insert(next);
                        added += 1;
                    }
                }
                tracing::info!(page, added, total = ranks.len(), "read listing order");
            }
            Err(err) => tracing::warn!(page, %err, "listing page failed; skipping"),
        }
        if page < pages {
            pacing.pause().await;
        }
    }
    Ok(ranks)
}

/// Stable sort of rows by rank; rows without a rank go last in their
/// original order. Returns how many rows had a rank.
pub fn sort_by_rank(sheet: &mut Sheet, ranks: &HashMap<u64, usize>) -> usize {
    let keys: Vec<Option<usize>> = (0..sheet.len())
        .map(|row| {
            sheet
                .text(row, &["url"])
                .and_then(|url| fiction_id(&url))
                .and_then(|id| ranks.get(&id).copied())
        })
        .collect();
    let matched = keys.iter().filter(|k| k.is_some()).count();

    let mut rows: Vec<_> = keys.into_iter().zip(std::mem::take(&mut sheet.rows)).collect();
    rows.sort_by_key(|(rank, _)| (rank.is_none(), rank.unwrap_or(usize::MAX)));
    sheet.rows = rows.into_iter().map(|(_, row)| row).collect();
    matched
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::fetch::FetchError;
    use crate::sheet::Cell;

    struct StubSite {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl StubSite {
        fn new(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, body)| ((*url).to_owned(), (*body).to_owned()))
                    .collect(),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageSource for StubSite {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requested.lock().expect("lock").push(url.to_owned());
            self.pages.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_owned(),
                status: 404,
            })
        }
    }

    fn card(id: u64, title: &str, status: &str) -> String {
        format!(
            r#"<div class="fiction-list-item"><h2><a href="/fiction/{id}/slug">{title}</a></h2><span>{status}</span></div>"#
        )
    }

    const BASE: &str = "https://rr.test";

    #[tokio::test]
    async fn collects_across_pages_until_target() -> anyhow::Result<()> {
        let page1 = format!("{}{}", card(1, "One", "ONGOING"), card(2, "Two", "COMPLETED"));
        let page2 = format!("{}{}", card(2, "Two", "COMPLETED"), card(3, "Three", "STUB"));
        let detail = r#"<h4><a href="/profile/9">Someone</a></h4><meta property="books:rating:value" content="4.9">"#;
        let site = StubSite::new(&[
            ("https://rr.test/fictions/best-rated?page=1", page1.as_str()),
            ("https://rr.test/fictions/best-rated?page=2", page2.as_str()),
            ("https://rr.test/fiction/2/slug", detail),
        ]);

        let books = collect_ranking(
            &site,
            BASE,
            RankingOptions {
                target: 2,
                max_pages: 5,
                completed_only: true,
                details: true,
                pacing: Pacing::NONE,
            },
        )
        .await?;

        let titles: Vec<_> = books.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Two", "Three"]);
        assert_eq!(books[0].author.as_deref(), Some("Someone"));
        assert_eq!(books[0].platform_rating, Some(4.9));
        assert_eq!(books[1].author, None);

        let requested = site.requested.lock().expect("lock").clone();
        assert!(!requested.iter().any(|u| u.ends_with("page=3")));
        assert!(!requested.iter().any(|u| u.contains("/fiction/1/")));
        Ok(())
    }

    #[tokio::test]
    async fn order_ranks_are_one_based_across_pages() -> anyhow::Result<()> {
        let site = StubSite::new(&[
            (
                "https://rr.test/fictions/best-rated?page=1",
                r#"<a href="/fiction/30/a">a</a><a href="/fiction/10/b">b</a>"#,
            ),
            (
                "https://rr.test/fictions/best-rated?page=3",
                r#"<a href="/fiction/10/b">b</a><a href="/fiction/20/c">c</a>"#,
            ),
        ]);

        let ranks = fetch_order(&site, BASE, 3, Pacing::NONE).await?;
        assert_eq!(ranks, HashMap::from([(30, 1), (10, 2), (20, 3)]));
        Ok(())
    }

    #[test]
    fn unranked_rows_sort_last() {
        let mut sheet = Sheet::new(["title", "url"]);
        for (title, url) in [
            ("x", "https://rr.test/fiction/99/x"),
            ("b", "https://rr.test/fiction/10/b"),
            ("y", ""),
            ("a", "https://rr.test/fiction/30/a"),
        ] {
            sheet.push_row(vec![Cell::text(title), Cell::text(url)]);
        }
        let ranks = HashMap::from([(30, 1), (10, 2)]);

        assert_eq!(sort_by_rank(&mut sheet, &ranks), 2);
        let titles: Vec<_> = (0..sheet.len())
            .filter_map(|row| sheet.text(row, &["title"]))
            .collect();
        assert_eq!(titles, vec!["a", "b", "x", "y"]);
    }

    #[test]
    fn plain_rerank_keeps_every_column() {
        let mut sheet = Sheet::new(["id", "title", "url", "EditorNoteEN"]);
        sheet.push_row(vec![
            Cell::text("mother-of-learning"),
            Cell::text("Mother of Learning"),
            Cell::text("https://rr.test/fiction/21220"),
            Cell::text("Time loop done right."),
        ]);

        let kept = rerank_output(sheet.clone(), false);
        assert_eq!(kept.headers, sheet.headers);
        assert_eq!(kept.text(0, &["EditorNoteEN"]).as_deref(), Some("Time loop done right."));

        let refreshed = rerank_output(sheet, true);
        assert!(refreshed.column("id").is_none());
        assert!(refreshed.column("EditorNoteEN").is_none());
        assert_eq!(refreshed.text(0, &["title"]).as_deref(), Some("Mother of Learning"));
    }
}
