use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;

use crate::formats::{Book, StacksFile};

/// Reads a saved catalog. A missing file is an empty catalog.
pub fn load_catalog(path: &Path) -> anyhow::Result<Vec<Book>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "catalog not found; starting empty");
            return Ok(Vec::new());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read catalog: {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    let books: Vec<Book> =
        serde_json::from_str(&raw).with_context(|| format!("parse catalog: {}", path.display()))?;
    tracing::debug!(path = %path.display(), books = books.len(), "loaded catalog");
    Ok(books)
}

/// Writes the catalog as a pretty-printed JSON array, replacing `path` atomically.
pub fn save_catalog(path: &Path, books: &[Book]) -> anyhow::Result<()> {
    save_json(path, books).context("save catalog")?;
    tracing::debug!(path = %path.display(), books = books.len(), "saved catalog");
    Ok(())
}

/// Reads a saved stacks file. A missing or empty file has no stacks.
pub fn load_stacks(path: &Path) -> anyhow::Result<StacksFile> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "stacks file not found; starting empty");
            return Ok(StacksFile::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read stacks: {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(StacksFile::default());
    }

    let file: StacksFile =
        serde_json::from_str(&raw).with_context(|| format!("parse stacks: {}", path.display()))?;
    tracing::debug!(path = %path.display(), stacks = file.stacks.len(), "loaded stacks");
    Ok(file)
}

pub fn save_stacks(path: &Path, file: &StacksFile) -> anyhow::Result<()> {
    save_json(path, file).context("save stacks")?;
    tracing::debug!(path = %path.display(), stacks = file.stacks.len(), "saved stacks");
    Ok(())
}

/// Pretty-printed JSON with a trailing newline, replacing `path` atomically.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut json = serde_json::to_vec_pretty(value).context("serialize json")?;
    json.push(b'\n');

    replace_file(path, "json", |tmp_path| {
        let mut file = std::fs::File::create(tmp_path)
            .with_context(|| format!("create tmp file: {}", tmp_path.display()))?;
        file.write_all(&json)
            .with_context(|| format!("write tmp file: {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync tmp file: {}", tmp_path.display()))
    })
}

/// Runs `write` against a temp file next to `path`, then renames it over
/// `path`. The temp file is removed when either step fails.
pub(crate) fn replace_file<F>(path: &Path, extension: &str, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&Path) -> anyhow::Result<()>,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension(format!(
        "tmp.{}.{extension}",
        uuid::Uuid::new_v4().simple()
    ));
    let result = write(&tmp_path).and_then(|()| {
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("rename tmp to final: {}", path.display()))
    });
    if result.is_err()
        && let Err(err) = std::fs::remove_file(&tmp_path)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %tmp_path.display(), %err, "could not remove tmp file");
    }
    result
}

/// Copies the file at `path` into `dir` under a timestamped name. Returns the
/// backup path, or `None` when there is nothing to back up.
pub fn backup_file(path: &Path, dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create backup dir: {}", dir.display()))?;

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("catalog");
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let backup = dir.join(format!("{stem}.{stamp}.json"));
    std::fs::copy(path, &backup)
        .with_context(|| format!("back up {} to {}", path.display(), backup.display()))?;

    tracing::info!(backup = %backup.display(), "backed up previous file");
    Ok(Some(backup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::Status;

    #[test]
    fn missing_catalog_loads_empty() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        assert!(load_catalog(&temp.path().join("books.json"))?.is_empty());
        Ok(())
    }

    #[test]
    fn stacks_file_keeps_unknown_keys_and_null_counters() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("stacks.json");
        assert!(load_stacks(&path)?.stacks.is_empty());

        std::fs::write(
            &path,
            r#"{"version": 2, "stacks": [{"id": "loops", "title": "Loops", "savedCount": null, "viewCount": "1,024", "accent": "teal"}]}"#,
        )?;
        let file = load_stacks(&path)?;
        assert_eq!(file.extra.get("version"), Some(&serde_json::json!(2)));
        let stack = &file.stacks[0];
        assert!(stack.saved_count.is_null());
        assert_eq!(stack.view_count.get(), 1_024);

        save_stacks(&path, &file)?;
        let saved: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert_eq!(saved["version"], 2);
        assert_eq!(saved["stacks"][0]["savedCount"], serde_json::Value::Null);
        assert_eq!(saved["stacks"][0]["accent"], "teal");
        assert_eq!(load_stacks(&path)?, file);
        Ok(())
    }

    #[test]
    fn save_keeps_non_ascii_and_unknown_keys() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("data").join("books.json");
        std::fs::create_dir_all(temp.path().join("data"))?;
        std::fs::write(
            &path,
            r#"[{"id":"b","title":"乙","curatorNoteCN":"很好看","status":"dead"},{"id":"a","title":"Á"}]"#,
        )?;

        let books = load_catalog(&path)?;
        assert_eq!(books[0].status, Status::Dropped);
        save_catalog(&path, &books)?;

        let written = std::fs::read_to_string(&path)?;
        assert!(written.contains("\"title\": \"乙\""));
        assert!(written.contains("\"curatorNoteCN\": \"很好看\""));
        assert!(written.starts_with("[\n  {"));

        assert!(tmp_files(&temp.path().join("data"))?.is_empty());
        Ok(())
    }

    fn tmp_files(dir: &Path) -> anyhow::Result<Vec<String>> {
        Ok(std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".tmp."))
            .collect())
    }

    #[test]
    fn failed_save_removes_tmp_file() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("books.json");
        std::fs::create_dir_all(path.join("occupied"))?;

        let err = save_catalog(&path, &[]).expect_err("rename onto a directory fails");
        assert!(format!("{err:#}").contains("rename tmp to final"));
        assert!(tmp_files(temp.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn backup_copies_existing_catalog() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("books.json");
        let backups = temp.path().join("backups");
        assert_eq!(backup_file(&path, &backups)?, None);

        std::fs::write(&path, "[]")?;
        let backup = backup_file(&path, &backups)?.expect("backup written");
        assert_eq!(std::fs::read_to_string(backup)?, "[]");
        Ok(())
    }
}
