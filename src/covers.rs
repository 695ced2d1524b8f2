//! Catalog ids to local cover image files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::cli::CoversArgs;
use crate::formats::Book;
use crate::mapping::derive_id;
use crate::merge::merge_book;

pub fn run(args: CoversArgs) -> anyhow::Result<()> {
    let sheet_path = PathBuf::from(&args.sheet);
    let out = PathBuf::from(&args.out);

    let sheet = crate::sheet::read_sheet(&sheet_path, 0)
        .with_context(|| format!("read spreadsheet: {}", sheet_path.display()))?;
    let images = list_images(Path::new(&args.images), &args.extension)?;
    tracing::info!(rows = sheet.len(), images = images.len(), "matching covers");

    let mut mapping: BTreeMap<String, Option<String>> = BTreeMap::new();
    for row in 0..sheet.len() {
        let title = sheet.text(row, &["title"]).unwrap_or_default();
        let id = derive_id(&sheet.text(row, &["id"]).unwrap_or_else(|| title.clone()));
        if id.is_empty() {
            continue;
        }
        let matched = match_cover(&id, &title, &images, &args.extension);
        match &matched {
            Some(file) => tracing::debug!(%id, %file, "cover matched"),
            None => tracing::warn!(%id, %title, "no cover matched"),
        }
        mapping.insert(id, matched.map(|file| format!("{}{file}", args.prefix)));
    }

    let with_cover = mapping.values().filter(|v| v.is_some()).count();
    crate::catalog::save_json(&out, &mapping)
        .with_context(|| format!("write cover mapping: {}", out.display()))?;
    tracing::info!(
        path = %out.display(),
        total = mapping.len(),
        with_cover,
        without_cover = mapping.len() - with_cover,
        "wrote cover mapping"
    );

    if let Some(catalog) = args.apply_to.as_deref() {
        let catalog = Path::new(catalog);
        let mut books = crate::catalog::load_catalog(catalog).context("load catalog")?;
        let updated = apply_covers(&mut books, &mapping);
        crate::catalog::save_catalog(catalog, &books).context("save catalog")?;
        tracing::info!(
            path = %catalog.display(),
            updated,
            with_cover = books.iter().filter(|b| b.cover_image.is_some()).count(),
            total = books.len(),
            "applied covers to catalog"
        );
    }
    Ok(())
}

/// Sets `coverImage` on every catalog record whose id has a matched file.
/// Records without a match keep what they had. Returns how many changed.
pub fn apply_covers(books: &mut [Book], mapping: &BTreeMap<String, Option<String>>) -> usize {
    let mut updated = 0;
    for book in books.iter_mut() {
        let Some(Some(cover)) = mapping.get(&book.id) else {
            continue;
        };
        let cover_only = Book {
            id: book.id.clone(),
            cover_image: Some(cover.clone()),
            ..Book::default()
        };
        if merge_book(book, cover_only) {
            tracing::debug!(id = %book.id, %cover, "cover updated");
            updated += 1;
        }
    }
    updated
}

/// File names in `dir` with the given extension, sorted.
pub fn list_images(dir: &Path, extension: &str) -> anyhow::Result<Vec<String>> {
    let mut images = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read image dir: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let has_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !has_ext {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            images.push(name.to_owned());
        }
    }
    images.sort();
    Ok(images)
}

/// Picks an image for a book: exact `<id>.<ext>`, then a name that contains
/// or is contained in the id (ignoring series numbers like `-2-`), then a name
/// that contains the title's first word when that word is longer than three
/// characters.
pub fn match_cover(id: &str, title: &str, images: &[String], extension: &str) -> Option<String> {
    let exact = format!("{id}.{extension}");
    if let Some(hit) = images.iter().find(|img| img.eq_ignore_ascii_case(&exact)) {
        return Some(hit.clone());
    }

    let stem = |img: &str| {
        let lower = img.to_lowercase();
        lower
            .strip_suffix(&format!(".{}", extension.to_lowercase()))
            .map(str::to_owned)
            .unwrap_or(lower)
    };

    let fuzzy = images.iter().find(|img| {
        let name = stem(img.as_str());
        let without_numbers = ["-1-", "-2-", "-3-"]
            .iter()
            .fold(name.clone(), |acc, n| acc.replace(n, "-"));
        name.contains(id) || without_numbers == id || id.contains(name.as_str())
    });
    if let Some(hit) = fuzzy {
        return Some(hit.clone());
    }

    let first_word = title.split_whitespace().next()?.to_lowercase();
    if first_word.chars().count() <= 3 {
        return None;
    }
    images
        .iter()
        .find(|img| stem(img.as_str()).contains(&first_word))
        .cloned()
}
