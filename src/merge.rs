//! Non-destructive reconciliation of new records against a saved catalog.

use std::collections::{BTreeMap, HashSet};

use crate::formats::{Book, Counter, Stack};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// New ids added to the catalog.
    pub inserted: usize,
    /// Existing ids that were matched by an incoming record.
    pub updated: usize,
    /// Existing ids no incoming record mentioned.
    pub carried_over: usize,
    pub total: usize,
}

/// Merges `incoming` into `existing`, keyed by id. The result is sorted by id.
///
/// A new id is inserted as-is. A known id keeps everything it has, except that
/// optional fields take the incoming value when one is supplied and required
/// fields are filled only where the saved record has nothing.
pub fn merge_catalog(existing: Vec<Book>, incoming: Vec<Book>) -> (Vec<Book>, MergeStats) {
    let mut by_id: BTreeMap<String, Book> = BTreeMap::new();
    for book in existing {
        if let Some(previous) = by_id.get_mut(&book.id) {
            tracing::warn!(id = %book.id, "duplicate id in saved catalog; merging");
            merge_book(previous, book);
        } else {
            by_id.insert(book.id.clone(), book);
        }
    }

    let mut stats = MergeStats::default();
    let mut inserted = HashSet::new();
    let mut updated = HashSet::new();
    for book in incoming {
        if book.id.trim().is_empty() {
            tracing::warn!(title = %book.title, "skipping record without id");
            continue;
        }
        match by_id.get_mut(&book.id) {
            Some(current) => {
                if !inserted.contains(&book.id) && updated.insert(book.id.clone()) {
                    stats.updated += 1;
                }
                merge_book(current, book);
            }
            None => {
                stats.inserted += 1;
                inserted.insert(book.id.clone());
                by_id.insert(book.id.clone(), book);
            }
        }
    }

    stats.total = by_id.len();
    stats.carried_over = stats.total - stats.inserted - stats.updated;
    (by_id.into_values().collect(), stats)
}

/// Applies `incoming` onto `current` without losing anything `current` has.
/// Returns whether any field changed.
pub fn merge_book(current: &mut Book, incoming: Book) -> bool {
    let before = current.clone();

    fill_text(&mut current.title, incoming.title);
    fill_text(&mut current.author, incoming.author);
    fill_text(&mut current.synopsis, incoming.synopsis);
    if current.themes.is_empty() {
        current.themes = incoming.themes;
    }
    if current.links.is_empty() {
        current.links = incoming.links;
    }

    take_text(&mut current.cover_image, incoming.cover_image);
    take_text(&mut current.curator_note, incoming.curator_note);
    take(&mut current.platform_rating, incoming.platform_rating);
    take(&mut current.views, incoming.views);
    take(&mut current.followers, incoming.followers);
    take(&mut current.pages, incoming.pages);
    take(&mut current.chapter_count, incoming.chapter_count);
    take(&mut current.word_count, incoming.word_count);

    for (key, value) in incoming.extra {
        if !is_blank(&value) {
            current.extra.insert(key, value);
        }
    }

    *current != before
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackMergeStats {
    pub inserted: usize,
    pub updated: usize,
    /// Saved stacks missing from the sheet that stay because someone saved them.
    pub kept: usize,
    /// Saved stacks missing from the sheet with no saves.
    pub dropped: usize,
    pub total: usize,
}

/// Merges stacks read from a sheet into the saved stacks.
///
/// Sheet stacks come first, in sheet order. A stack the file already has keeps
/// its counters, its `createdAt`, the `addedAt` of entries it already listed,
/// and any keys the sheet does not produce. Saved stacks the sheet no longer
/// lists follow in their saved order, but only when `savedCount` is above zero.
pub fn merge_stacks(existing: Vec<Stack>, incoming: Vec<Stack>) -> (Vec<Stack>, StackMergeStats) {
    let mut saved: Vec<Option<Stack>> = existing.into_iter().map(Some).collect();
    let mut stats = StackMergeStats::default();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(incoming.len());

    for stack in incoming {
        if !seen.insert(stack.id.clone()) {
            tracing::warn!(id = %stack.id, "duplicate stack id in sheet; keeping the first");
            continue;
        }
        let previous = saved
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|s| s.id == stack.id))
            .and_then(Option::take);
        match previous {
            Some(previous) => {
                stats.updated += 1;
                merged.push(merge_stack(previous, stack));
            }
            None => {
                stats.inserted += 1;
                merged.push(stack);
            }
        }
    }

    for stack in saved.into_iter().flatten() {
        if seen.contains(&stack.id) {
            continue;
        }
        if stack.saved_count.get() > 0 {
            tracing::warn!(id = %stack.id, title = %stack.title, "stack not in sheet; kept because it has saves");
            stats.kept += 1;
            merged.push(stack);
        } else {
            tracing::info!(id = %stack.id, "stack not in sheet; dropped");
            stats.dropped += 1;
        }
    }

    stats.total = merged.len();
    (merged, stats)
}

fn merge_stack(previous: Stack, mut stack: Stack) -> Stack {
    stack.saved_count = Counter::from(previous.saved_count.get());
    stack.view_count = Counter::from(previous.view_count.get());
    if !previous.created_at.trim().is_empty() {
        stack.created_at = previous.created_at.clone();
    }
    for entry in &mut stack.entries {
        let Some(old) = previous.entries.iter().find(|e| e.novel_id == entry.novel_id) else {
            continue;
        };
        if !old.added_at.trim().is_empty() {
            entry.added_at = old.added_at.clone();
        }
        fill_text(&mut entry.curator_note, old.curator_note.clone());
        for (key, value) in &old.extra {
            entry.extra.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    for (key, value) in &previous.extra {
        stack.extra.entry(key.clone()).or_insert_with(|| value.clone());
    }

    // Unchanged content keeps the saved `updatedAt`.
    let mut unchanged = stack.clone();
    unchanged.updated_at = previous.updated_at.clone();
    if unchanged == previous {
        return previous;
    }
    stack
}

fn fill_text(slot: &mut String, value: String) {
    if slot.trim().is_empty() && !value.trim().is_empty() {
        *slot = value;
    }
}

fn take_text(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        *slot = Some(value);
    }
}

fn take<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn is_blank(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{BookLink, Counter, Platform, Status};

    fn book(id: &str) -> Book {
        Book {
            id: id.to_owned(),
            ..Book::default()
        }
    }

    #[test]
    fn supplied_optional_field_is_added_and_others_kept() {
        let existing = Book {
            title: "Foo".to_owned(),
            curator_note: Some("great".to_owned()),
            ..book("foo")
        };
        let incoming = Book {
            cover_image: Some("x.png".to_owned()),
            ..book("foo")
        };

        let (merged, stats) = merge_catalog(vec![existing], vec![incoming]);
        assert_eq!(
            merged,
            vec![Book {
                title: "Foo".to_owned(),
                curator_note: Some("great".to_owned()),
                cover_image: Some("x.png".to_owned()),
                ..book("foo")
            }]
        );
        assert_eq!(stats.updated, 1);
        assert_eq!(stats.inserted, 0);
    }

    #[test]
    fn merge_never_drops_existing_values() {
        let existing = Book {
            title: "Worth the Candle".to_owned(),
            author: "Alexander Wales".to_owned(),
            themes: vec!["rational".to_owned()],
            status: Status::Completed,
            stack_count: Counter::from(7),
            platform_rating: Some(4.6),
            cover_image: Some("old.png".to_owned()),
            ..book("worth-the-candle")
        };
        let mut extra = serde_json::Map::new();
        extra.insert("coverGradient".to_owned(), serde_json::Value::from(""));
        let incoming = Book {
            title: "WtC".to_owned(),
            themes: vec!["litrpg".to_owned()],
            cover_image: Some("  ".to_owned()),
            platform_rating: None,
            extra,
            ..book("worth-the-candle")
        };

        let (merged, _) = merge_catalog(vec![existing.clone()], vec![incoming]);
        assert_eq!(merged, vec![existing]);
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = vec![
            Book {
                title: "B".to_owned(),
                ..book("b")
            },
            book("a"),
        ];
        let incoming = vec![
            Book {
                platform_rating: Some(4.2),
                links: vec![BookLink {
                    platform: Platform::RoyalRoad,
                    url: "https://www.royalroad.com/fiction/1".to_owned(),
                    is_canonical: true,
                }],
                ..book("a")
            },
            Book {
                title: "C".to_owned(),
                ..book("c")
            },
        ];

        let (once, _) = merge_catalog(existing, incoming.clone());
        let (twice, stats) = merge_catalog(once.clone(), incoming);
        assert_eq!(once, twice);
        assert_eq!(stats.inserted, 0);
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.carried_over, 1);
    }

    #[test]
    fn output_is_sorted_and_untouched_records_carry_over() {
        let existing = vec![book("zeta"), book("alpha")];
        let incoming = vec![book("mid"), book("beta")];

        let (merged, stats) = merge_catalog(existing, incoming);
        let ids: Vec<_> = merged.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta", "mid", "zeta"]);
        assert_eq!(
            stats,
            MergeStats {
                inserted: 2,
                updated: 0,
                carried_over: 2,
                total: 4,
            }
        );
    }

    #[test]
    fn merge_book_reports_changes() {
        let mut current = book("x");
        assert!(!merge_book(&mut current, book("x")));
        assert!(merge_book(
            &mut current,
            Book {
                views: Some(10),
                ..book("x")
            }
        ));
        assert_eq!(current.views, Some(10));
    }

    fn stack(id: &str, saved: u64) -> Stack {
        Stack {
            id: id.to_owned(),
            title: id.to_uppercase(),
            saved_count: Counter::from(saved),
            created_at: "2026-10-16".to_owned(),
            updated_at: "2026-10-16".to_owned(),
            ..Stack::default()
        }
    }

    fn entry(novel_id: &str, added_at: &str) -> crate::formats::StackEntry {
        crate::formats::StackEntry {
            novel_id: novel_id.to_owned(),
            added_at: added_at.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn stacks_follow_sheet_order_and_keep_saved_counters() {
        let mut saved_loops = stack("loops", 5);
        saved_loops.view_count = Counter::from(40);
        saved_loops.created_at = "2025-01-02".to_owned();
        saved_loops.entries = vec![entry("mother-of-learning", "2025-01-02")];
        saved_loops
            .extra
            .insert("accent".to_owned(), serde_json::json!("teal"));
        let existing = vec![saved_loops, stack("retired", 3), stack("unloved", 0)];

        let mut sheet_loops = stack("loops", 0);
        sheet_loops.entries = vec![
            entry("mother-of-learning", "2026-10-16"),
            entry("the-perfect-run", "2026-10-16"),
        ];
        let incoming = vec![stack("fresh", 0), sheet_loops];

        let (merged, stats) = merge_stacks(existing, incoming);
        let ids: Vec<_> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "loops", "retired"]);
        assert_eq!(
            stats,
            StackMergeStats {
                inserted: 1,
                updated: 1,
                kept: 1,
                dropped: 1,
                total: 3,
            }
        );

        let loops = &merged[1];
        assert_eq!(loops.saved_count, Counter::from(5));
        assert_eq!(loops.view_count, Counter::from(40));
        assert_eq!(loops.created_at, "2025-01-02");
        assert_eq!(loops.entries[0].added_at, "2025-01-02");
        assert_eq!(loops.entries[1].added_at, "2026-10-16");
        assert_eq!(loops.extra.get("accent"), Some(&serde_json::json!("teal")));
    }

    #[test]
    fn unchanged_stack_keeps_its_saved_updated_at() {
        let mut saved = stack("loops", 2);
        saved.updated_at = "2025-06-01".to_owned();
        let incoming = stack("loops", 0);

        let (merged, _) = merge_stacks(vec![saved.clone()], vec![incoming.clone()]);
        assert_eq!(merged, vec![saved.clone()]);

        let retitled = Stack {
            title: "Time Loops".to_owned(),
            ..incoming
        };
        let (merged, _) = merge_stacks(vec![saved], vec![retitled]);
        assert_eq!(merged[0].updated_at, "2026-10-16");
        assert_eq!(merged[0].title, "Time Loops");
    }

    #[test]
    fn null_saved_counters_become_zero_and_drop_unlisted_stacks() {
        let mut saved = stack("loops", 0);
        saved.saved_count = Counter::NULL;
        let (merged, stats) = merge_stacks(vec![saved.clone()], vec![stack("loops", 0)]);
        assert_eq!(merged[0].saved_count, Counter::from(0));
        assert_eq!(stats.updated, 1);

        let (merged, stats) = merge_stacks(vec![saved], Vec::new());
        assert!(merged.is_empty());
        assert_eq!(stats.dropped, 1);
    }
}
