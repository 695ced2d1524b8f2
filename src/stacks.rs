//! Curated stacks: a `Stacks` worksheet merged into the stacks file.

use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::cli::StacksArgs;
use crate::formats::{Platform, Stack, StackEntry};
use crate::sheet::Sheet;

const ID: &[&str] = &["id"];
const TITLE: &[&str] = &["title"];
const SUBTITLE: &[&str] = &["subtitle", "description"];
const CURATOR: &[&str] = &["curator", "curatorId"];
const BOOK_IDS: &[&str] = &["bookIds", "book_ids", "books"];
const HIGHLIGHTS: &[&str] = &["highlights", "themes"];
const CURATOR_NOTE: &[&str] = &["curatorNote", "curator_note", "curator_note_en", "EditorNoteEN"];
const CURATOR_NOTE_CN: &[&str] = &["curatorNoteCN", "curator_note_cn", "EditorNoteCN"];

pub const DEFAULT_COVER_GRADIENT: &str = "from-blue-50/80 via-blue-50/40 to-slate-50";

pub fn run(args: StacksArgs) -> anyhow::Result<()> {
    let input = PathBuf::from(&args.input);
    let out = PathBuf::from(&args.out);

    let sheet = crate::sheet::read_named_sheet(&input, &args.sheet, args.skip_rows)
        .with_context(|| format!("read spreadsheet: {}", input.display()))?;
    let today = chrono::Utc::now().date_naive().to_string();
    let incoming = stacks_from_sheet(&sheet, &today);
    tracing::info!(rows = sheet.len(), stacks = incoming.len(), "read stacks sheet");

    let mut file = crate::catalog::load_stacks(&out).context("load existing stacks")?;
    let existing = std::mem::take(&mut file.stacks);
    let existing_count = existing.len();
    let (merged, stats) = crate::merge::merge_stacks(existing, incoming);
    tracing::info!(
        existing = existing_count,
        inserted = stats.inserted,
        updated = stats.updated,
        kept = stats.kept,
        dropped = stats.dropped,
        total = stats.total,
        "merged stacks"
    );
    file.stacks = merged;

    if args.dry_run {
        tracing::info!(path = %out.display(), "dry run; stacks not written");
        return Ok(());
    }

    if let Some(dir) = args.backup_dir.as_deref() {
        crate::catalog::backup_file(&out, Path::new(dir)).context("back up stacks")?;
    }
    crate::catalog::save_stacks(&out, &file)?;
    tracing::info!(path = %out.display(), stacks = file.stacks.len(), "wrote stacks");
    Ok(())
}

/// Every row with both an id and a title becomes a stack dated `today`.
pub fn stacks_from_sheet(sheet: &Sheet, today: &str) -> Vec<Stack> {
    (0..sheet.len())
        .filter_map(|row| {
            let stack = stack_from_row(sheet, row, today);
            if stack.is_none() {
                tracing::debug!(row, "skipping stack row without id or title");
            }
            stack
        })
        .collect()
}

/// Named columns win. A sheet whose header lacks a name falls back to the
/// column's position in the stacks layout (id, title, subtitle, curator,
/// book ids, highlights, note, Chinese note).
fn field(sheet: &Sheet, row: usize, names: &[&str], position: usize) -> Option<String> {
    match sheet.column_any(names) {
        Some(_) => sheet.text(row, names),
        None => sheet.get(row, position).as_text(),
    }
}

pub fn stack_from_row(sheet: &Sheet, row: usize, today: &str) -> Option<Stack> {
    let id = field(sheet, row, ID, 0)?;
    let title = field(sheet, row, TITLE, 1)?;
    let curator = field(sheet, row, CURATOR, 3).unwrap_or_default();

    let entries = split_list(&field(sheet, row, BOOK_IDS, 4).unwrap_or_default())
        .into_iter()
        .zip(1..)
        .map(|(novel_id, order)| StackEntry {
            novel_id,
            added_at: today.to_owned(),
            order,
            ..StackEntry::default()
        })
        .collect();

    Some(Stack {
        cover_title: cover_title(&title),
        curator_id: curator_id(&curator),
        description: field(sheet, row, SUBTITLE, 2).unwrap_or_default(),
        curator_note: field(sheet, row, CURATOR_NOTE, 6).unwrap_or_default(),
        curator_note_cn: field(sheet, row, CURATOR_NOTE_CN, 7).unwrap_or_default(),
        entries,
        themes: split_list(&field(sheet, row, HIGHLIGHTS, 5).unwrap_or_default()),
        platforms: vec![
            Platform::RoyalRoad,
            Platform::Spacebattles,
            Platform::SufficientVelocity,
        ],
        cover_gradient: DEFAULT_COVER_GRADIENT.to_owned(),
        created_at: today.to_owned(),
        updated_at: today.to_owned(),
        is_editor_pick: true,
        is_featured: true,
        id,
        title,
        ..Stack::default()
    })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// The first two words longer than three characters, one per line.
pub fn cover_title(title: &str) -> String {
    title
        .split(' ')
        .filter(|word| word.chars().count() > 3)
        .take(2)
        .collect::<Vec<_>>()
        .join("\n")
}

/// `Forum Delver` -> `forumdelver`.
pub fn curator_id(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Counter;
    use crate::sheet::Cell;

    fn stacks_sheet() -> Sheet {
        let mut sheet = Sheet::new([
            "id",
            "title",
            "subtitle",
            "curator",
            "bookIds",
            "highlights",
            "curatorNote",
            "curatorNoteCN",
        ]);
        sheet.push_row(vec![
            Cell::text("loops"),
            Cell::text("The Best Time Loop Stories"),
            Cell::text("Again and again"),
            Cell::text("Zorian"),
            Cell::text("mother-of-learning, the-perfect-run,,"),
            Cell::text("time-loop, progression"),
            Cell::text("Start here."),
            Cell::text("从这里开始。"),
        ]);
        sheet.push_row(vec![Cell::text("untitled")]);
        sheet.push_row(vec![Cell::Empty, Cell::text("No Id")]);
        sheet
    }

    #[test]
    fn rows_become_stacks_with_ordered_entries() {
        let stacks = stacks_from_sheet(&stacks_sheet(), "2026-10-16");
        assert_eq!(stacks.len(), 1);

        let loops = &stacks[0];
        assert_eq!(loops.id, "loops");
        assert_eq!(loops.cover_title, "Best\nTime");
        assert_eq!(loops.description, "Again and again");
        assert_eq!(loops.curator_id, "zorian");
        assert_eq!(loops.curator_note_cn, "从这里开始。");
        assert_eq!(loops.themes, vec!["time-loop", "progression"]);
        assert_eq!(loops.saved_count, Counter::from(0));
        assert!(loops.is_editor_pick && loops.is_featured);

        let entries: Vec<_> = loops
            .entries
            .iter()
            .map(|e| (e.novel_id.as_str(), e.order, e.added_at.as_str()))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("mother-of-learning", 1, "2026-10-16"),
                ("the-perfect-run", 2, "2026-10-16"),
            ]
        );
    }

    #[test]
    fn unnamed_columns_fall_back_to_layout_positions() {
        let mut sheet = Sheet::new(["id", "title", "subtitle", "curator", "bookIds", "highlights", "", ""]);
        sheet.push_row(vec![
            Cell::text("forums"),
            Cell::text("Forum Quests"),
            Cell::Empty,
            Cell::text("Forum Delver"),
            Cell::text("a"),
            Cell::Empty,
            Cell::text("English note"),
            Cell::text("中文"),
        ]);

        let stack = stack_from_row(&sheet, 0, "2026-10-16").expect("stack");
        assert_eq!(stack.curator_note, "English note");
        assert_eq!(stack.curator_note_cn, "中文");
        assert_eq!(stack.curator_id, "forumdelver");
        assert_eq!(stack.cover_title, "Forum\nQuests");
    }

    #[test]
    fn stacks_serialize_in_the_web_shape() -> anyhow::Result<()> {
        let stacks = stacks_from_sheet(&stacks_sheet(), "2026-10-16");
        let json = serde_json::to_value(&stacks[0])?;
        assert_eq!(json["curatorNoteCN"], "从这里开始。");
        assert_eq!(
            json["platforms"],
            serde_json::json!(["royal-road", "spacebattles", "sufficient-velocity"])
        );
        assert_eq!(json["entries"][0]["novelId"], "mother-of-learning");
        assert_eq!(json["entries"][0]["curatorNote"], "");
        assert_eq!(json["coverGradient"], DEFAULT_COVER_GRADIENT);
        assert_eq!(json["isEditorPick"], true);
        Ok(())
    }
}
