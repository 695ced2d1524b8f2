use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::Context as _;
use futures::StreamExt as _;

use crate::cli::RatingsArgs;
use crate::extract::{Chain, Page, rating_chain};
use crate::fetch::{Pacing, PageSource};
use crate::formats::SCRAPED_COLUMNS;
use crate::sheet::{Cell, Sheet};

pub const RATING_COLUMN: &str = "platformRating";

pub async fn run(args: RatingsArgs) -> anyhow::Result<()> {
    let sheet_path = PathBuf::from(&args.sheet);
    let out_path = args
        .out
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(|| sheet_path.clone());

    let mut sheet = crate::sheet::read_sheet(&sheet_path, 0)
        .with_context(|| format!("read spreadsheet: {}", sheet_path.display()))?;
    let urls = pending_urls(&sheet, args.only_missing)?;
    tracing::info!(
        rows = sheet.len(),
        pending = urls.len(),
        only_missing = args.only_missing,
        "fetching ratings"
    );

    let fetcher = args.fetch.fetcher()?;
    let ratings = fetch_ratings(&fetcher, urls, args.concurrency, args.fetch.pacing()).await;
    let applied = apply_ratings(&mut sheet, &ratings)?;

    let rated = (0..sheet.len())
        .filter(|&row| !sheet.cell(row, &[RATING_COLUMN]).is_empty())
        .count();
    tracing::info!(
        applied,
        rated,
        missing = sheet.len() - rated,
        "ratings updated"
    );

    crate::sheet::write_sheet(&out_path, &sheet.select_columns(SCRAPED_COLUMNS))
        .with_context(|| format!("write spreadsheet: {}", out_path.display()))?;
    tracing::info!(path = %out_path.display(), "wrote spreadsheet");
    Ok(())
}

/// Distinct row URLs to fetch, in row order.
pub fn pending_urls(sheet: &Sheet, only_missing: bool) -> anyhow::Result<Vec<String>> {
    sheet
        .column("url")
        .ok_or_else(|| anyhow::anyhow!("spreadsheet has no `url` column"))?;

    let mut seen = HashSet::new();
    Ok((0..sheet.len())
        .filter(|&row| !only_missing || sheet.cell(row, &[RATING_COLUMN]).is_empty())
        .filter_map(|row| sheet.text(row, &["url"]))
        .filter(|url| seen.insert(url.clone()))
        .collect())
}

/// Fetches every URL with at most `concurrency` requests in flight. Each page
/// ends up in the map, with `None` when it failed or had no rating.
pub async fn fetch_ratings<S>(
    source: &S,
    urls: Vec<String>,
    concurrency: usize,
    pacing: Pacing,
) -> HashMap<String, Option<f64>>
where
    S: PageSource + ?Sized,
{
    let chain = rating_chain();
    let total = urls.len();
    let mut results = HashMap::with_capacity(total);
    let (mut found, mut not_found, mut failed) = (0usize, 0usize, 0usize);

    let mut pages = futures::stream::iter(urls.into_iter().map(|url| async move {
        let body = source.fetch(&url).await;
        (url, body)
    }))
    .buffer_unordered(concurrency.max(1));

    while let Some((url, body)) = pages.next().await {
        let rating = match body {
            Ok(body) => {
                let rating = rating_from_html(&chain, body);
                if rating.is_some() {
                    found += 1;
                } else {
                    not_found += 1;
                }
                rating
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(%url, %err, "rating fetch failed");
                None
            }
        };
        tracing::info!(
            done = results.len() + 1,
            total,
            %url,
            rating = ?rating,
            "rating"
        );
        results.insert(url, rating);
        pacing.pause().await;
    }

    tracing::info!(found, not_found, failed, "rating fetch finished");
    results
}

fn rating_from_html(chain: &Chain<f64>, body: String) -> Option<f64> {
    let page = Page::parse(body);
    chain.extract(&page)
}

/// Writes fetched ratings into the rating column. Rows whose page produced
/// nothing keep what they had.
pub fn apply_ratings(
    sheet: &mut Sheet,
    ratings: &HashMap<String, Option<f64>>,
) -> anyhow::Result<usize> {
    sheet
        .column("url")
        .ok_or_else(|| anyhow::anyhow!("spreadsheet has no `url` column"))?;
    let rating_col = sheet.ensure_column(RATING_COLUMN);

    let mut applied = 0;
    for row in 0..sheet.len() {
        let Some(url) = sheet.text(row, &["url"]) else {
            continue;
        };
        if let Some(Some(rating)) = ratings.get(&url) {
            sheet.set(row, rating_col, Cell::Number(*rating));
            applied += 1;
        }
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::fetch::FetchError;

    struct StubSite {
        pages: HashMap<String, Result<String, u16>>,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageSource for StubSite {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requested
                .lock()
                .expect("requested lock")
                .push(url.to_owned());
            match self.pages.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(FetchError::Status {
                    url: url.to_owned(),
                    status: *status,
                }),
                None => Err(FetchError::Status {
                    url: url.to_owned(),
                    status: 404,
                }),
            }
        }
    }

    fn sheet() -> Sheet {
        let mut sheet = Sheet::new(["title", "url", "platformRating"]);
        sheet.push_row(vec![Cell::text("A"), Cell::text("https://rr.test/fiction/1"), Cell::Empty]);
        sheet.push_row(vec![Cell::text("B"), Cell::text("https://rr.test/fiction/2"), Cell::Number(4.1)]);
        sheet.push_row(vec![Cell::text("C"), Cell::text("https://rr.test/fiction/3"), Cell::Empty]);
        sheet.push_row(vec![Cell::text("A again"), Cell::text("https://rr.test/fiction/1"), Cell::Empty]);
        sheet
    }

    #[test]
    fn pending_urls_are_distinct_and_respect_only_missing() -> anyhow::Result<()> {
        let sheet = sheet();
        assert_eq!(pending_urls(&sheet, false)?.len(), 3);
        assert_eq!(
            pending_urls(&sheet, true)?,
            vec!["https://rr.test/fiction/1", "https://rr.test/fiction/3"]
        );
        assert!(pending_urls(&Sheet::new(["title"]), false).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() -> anyhow::Result<()> {
        let site = StubSite {
            pages: HashMap::from([
                (
                    "https://rr.test/fiction/1".to_owned(),
                    Ok(r#"<meta property="books:rating:value" content="4.55">"#.to_owned()),
                ),
                ("https://rr.test/fiction/2".to_owned(), Err(503)),
                ("https://rr.test/fiction/3".to_owned(), Ok("<p>no rating</p>".to_owned())),
            ]),
            requested: Mutex::new(Vec::new()),
        };

        let mut sheet = sheet();
        let urls = pending_urls(&sheet, false)?;
        let ratings = fetch_ratings(&site, urls, 3, Pacing::NONE).await;

        assert_eq!(ratings.len(), 3);
        assert_eq!(ratings["https://rr.test/fiction/1"], Some(4.55));
        assert_eq!(ratings["https://rr.test/fiction/2"], None);
        assert_eq!(ratings["https://rr.test/fiction/3"], None);
        assert_eq!(site.requested.lock().expect("requested lock").len(), 3);

        assert_eq!(apply_ratings(&mut sheet, &ratings)?, 2);
        assert_eq!(sheet.cell(0, &[RATING_COLUMN]).as_f64(), Some(4.55));
        assert_eq!(sheet.cell(1, &[RATING_COLUMN]).as_f64(), Some(4.1));
        assert!(sheet.cell(2, &[RATING_COLUMN]).is_empty());
        assert_eq!(sheet.cell(3, &[RATING_COLUMN]).as_f64(), Some(4.55));
        Ok(())
    }
}
