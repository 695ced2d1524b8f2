//! Spreadsheet rows to catalog records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::cli::ConvertArgs;
use crate::formats::Book;
use crate::mapping::{MappingTables, derive_id, parse_links};
use crate::sheet::Sheet;

const ID: &[&str] = &["id"];
const TITLE: &[&str] = &["title", "name"];
const AUTHOR: &[&str] = &["author"];
const SYNOPSIS: &[&str] = &["synopsis", "description"];
const URL: &[&str] = &["url", "link", "links"];
const PLATFORM: &[&str] = &["platform"];
const STATUS: &[&str] = &["status"];
const TAGS: &[&str] = &["tags", "sonar_tags", "themes"];
const CURATOR_NOTE: &[&str] = &["curator_note_en", "EditorNoteEN", "curatorNote", "curator_note"];
const CURATOR_NOTE_CN: &[&str] = &["curator_note_cn", "EditorNoteCN", "curatorNoteCN"];
const COVER: &[&str] = &["cover_url", "coverUrl", "coverImage", "cover"];
const RATING: &[&str] = &["platformRating", "Rating", "rating"];
const WORDS: &[&str] = &["words", "wordCount", "word_count"];
const CHAPTERS: &[&str] = &["chapters", "chapterCount", "chapter_count"];
const PAGES: &[&str] = &["pages"];
const VIEWS: &[&str] = &["views"];
const FOLLOWERS: &[&str] = &["followers"];

pub fn run(args: ConvertArgs) -> anyhow::Result<()> {
    let input = PathBuf::from(&args.input);
    let out = PathBuf::from(&args.out);

    let tables = MappingTables::load(args.mapping.as_deref().map(Path::new))
        .context("load mapping tables")?;
    let sheet = crate::sheet::read_sheet(&input, args.skip_rows)
        .with_context(|| format!("read spreadsheet: {}", input.display()))?;
    let incoming = books_from_sheet(&sheet, &tables);
    tracing::info!(rows = sheet.len(), books = incoming.len(), "converted spreadsheet rows");

    let existing = crate::catalog::load_catalog(&out).context("load existing catalog")?;
    let (merged, stats) = crate::merge::merge_catalog(existing, incoming);
    tracing::info!(
        inserted = stats.inserted,
        updated = stats.updated,
        carried_over = stats.carried_over,
        total = stats.total,
        "merged catalog"
    );
    log_summary(&merged);

    if args.dry_run {
        tracing::info!(path = %out.display(), "dry run; catalog not written");
        return Ok(());
    }

    if let Some(dir) = args.backup_dir.as_deref() {
        crate::catalog::backup_file(&out, Path::new(dir)).context("back up catalog")?;
    }
    crate::catalog::save_catalog(&out, &merged).context("save catalog")?;
    tracing::info!(path = %out.display(), books = merged.len(), "wrote catalog");
    Ok(())
}

/// Every row that has an id or a title becomes a record.
pub fn books_from_sheet(sheet: &Sheet, tables: &MappingTables) -> Vec<Book> {
    (0..sheet.len())
        .filter_map(|row| {
            let book = book_from_row(sheet, row, tables);
            if book.is_none() {
                tracing::debug!(row, "skipping row without id or title");
            }
            book
        })
        .collect()
}

pub fn book_from_row(sheet: &Sheet, row: usize, tables: &MappingTables) -> Option<Book> {
    let title = sheet.text(row, TITLE).unwrap_or_default();
    let raw_id = sheet.text(row, ID).unwrap_or_else(|| title.clone());
    let id = derive_id(&raw_id);
    if id.is_empty() {
        return None;
    }

    let platform = sheet
        .text(row, PLATFORM)
        .map(|label| tables.map_platform(&label));
    let links = sheet
        .text(row, URL)
        .map(|cell| parse_links(&cell, platform))
        .unwrap_or_default();

    let mut extra = serde_json::Map::new();
    if let Some(note) = sheet.text(row, CURATOR_NOTE_CN) {
        extra.insert("curatorNoteCN".to_owned(), serde_json::Value::String(note));
    }

    Some(Book {
        id,
        title,
        author: sheet.text(row, AUTHOR).unwrap_or_default(),
        synopsis: sheet.text(row, SYNOPSIS).unwrap_or_default(),
        themes: sheet
            .text(row, TAGS)
            .map(|tags| tables.map_themes(&tags))
            .unwrap_or_default(),
        links,
        status: tables.map_status(&sheet.text(row, STATUS).unwrap_or_default()),
        cover_image: sheet.text(row, COVER),
        curator_note: sheet.text(row, CURATOR_NOTE),
        platform_rating: sheet
            .cell(row, RATING)
            .as_f64()
            .filter(|r| crate::extract::RATING_RANGE.contains(r)),
        views: sheet.cell(row, VIEWS).as_u64(),
        followers: sheet.cell(row, FOLLOWERS).as_u64(),
        pages: sheet.cell(row, PAGES).as_u64(),
        chapter_count: sheet.cell(row, CHAPTERS).as_u64(),
        word_count: sheet.cell(row, WORDS).as_u64(),
        extra,
        ..Book::default()
    })
}

fn log_summary(books: &[Book]) {
    let mut platforms: BTreeMap<&str, usize> = BTreeMap::new();
    let mut statuses: BTreeMap<&str, usize> = BTreeMap::new();
    let mut themes: BTreeMap<&str, usize> = BTreeMap::new();
    for book in books {
        if let Some(link) = book.links.iter().find(|l| l.is_canonical).or(book.links.first()) {
            *platforms.entry(link.platform.slug()).or_default() += 1;
        }
        *statuses.entry(book.status.slug()).or_default() += 1;
        for theme in &book.themes {
            *themes.entry(theme.as_str()).or_default() += 1;
        }
    }

    let mut top_themes: Vec<_> = themes.into_iter().collect();
    top_themes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    top_themes.truncate(10);

    tracing::info!(?platforms, ?statuses, ?top_themes, "catalog summary");
}
