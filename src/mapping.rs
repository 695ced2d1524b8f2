//! Free-text labels to the catalog's closed vocabularies.

use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::formats::{BookLink, Platform, Status};

/// Lookup tables used by the mapper. Built once per run and passed by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingTables {
    /// Spreadsheet platform label -> platform.
    pub platforms: Vec<(String, Platform)>,
    /// Spreadsheet status label -> status.
    pub statuses: Vec<(String, Status)>,
    /// Keyword (lowercase) -> theme slug. Order decides output order within a tag.
    pub themes: Vec<(String, String)>,
}

impl Default for MappingTables {
    fn default() -> Self {
        let platforms = [
            ("SB", Platform::Spacebattles),
            ("SV", Platform::SufficientVelocity),
            ("Author Site", Platform::PersonalSite),
            ("FFN", Platform::PersonalSite),
            ("AO3", Platform::Ao3),
            ("RR", Platform::RoyalRoad),
        ];
        let statuses = [
            ("COMPLETED", Status::Completed),
            ("ONGOING", Status::Ongoing),
            ("HIATUS", Status::Hiatus),
            ("DEAD", Status::Dropped),
        ];
        let themes = [
            ("time loop", "time-loop"),
            ("timeloop", "time-loop"),
            ("progression", "progression"),
            ("litrpg", "litrpg"),
            ("rational", "rational"),
            ("kingdom building", "kingdom-building"),
            ("kingdom-builder", "kingdom-building"),
            ("dungeon", "dungeon-core"),
            ("dungeon core", "dungeon-core"),
            ("slice of life", "slice-of-life"),
            ("sci-fi", "sci-fi"),
            ("scifi", "sci-fi"),
            ("cultivation", "cultivation"),
            ("isekai", "isekai"),
            ("portal fantasy", "portal-fantasy"),
            ("base building", "base-building"),
            ("base-builder", "base-building"),
            ("completed", "completed"),
        ];

        Self {
            platforms: platforms
                .into_iter()
                .map(|(label, platform)| (label.to_owned(), platform))
                .collect(),
            statuses: statuses
                .into_iter()
                .map(|(label, status)| (label.to_owned(), status))
                .collect(),
            themes: themes
                .into_iter()
                .map(|(keyword, theme)| (keyword.to_owned(), theme.to_owned()))
                .collect(),
        }
    }
}

impl MappingTables {
    /// Built-in tables, or tables read from a JSON file when `path` is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read mapping tables: {}", path.display()))?;
        let mut tables: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse mapping tables: {}", path.display()))?;
        for (keyword, _) in &mut tables.themes {
            *keyword = keyword.trim().to_lowercase();
        }
        tables.themes.retain(|(keyword, _)| !keyword.is_empty());
        tracing::debug!(
            path = %path.display(),
            platforms = tables.platforms.len(),
            statuses = tables.statuses.len(),
            themes = tables.themes.len(),
            "loaded mapping tables"
        );
        Ok(tables)
    }

    pub fn map_platform(&self, label: &str) -> Platform {
        let label = label.trim();
        self.platforms
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(label))
            .map(|(_, platform)| platform.clone())
            .unwrap_or_default()
    }

    pub fn map_status(&self, label: &str) -> Status {
        let label = label.trim();
        self.statuses
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(label))
            .map(|(_, status)| *status)
            .unwrap_or_default()
    }

    /// Splits a comma-separated tag string and maps every tag onto the theme
    /// vocabulary. A tag matches a keyword when either one contains the other,
    /// so `Loop` finds `time loop`. Themes come out in first-seen order without
    /// duplicates.
    pub fn map_themes(&self, tags: &str) -> Vec<String> {
        let mut themes: Vec<String> = Vec::new();
        for tag in tags.split(',') {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() {
                continue;
            }
            for (keyword, theme) in &self.themes {
                let matched = tag.contains(keyword.as_str()) || keyword.contains(tag.as_str());
                if matched && !themes.contains(theme) {
                    themes.push(theme.clone());
                }
            }
        }
        themes
    }
}

/// Catalog identifier for a title or external id: lowercase, spaces to hyphens.
pub fn derive_id(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "-")
}

pub fn platform_from_url(url: &str) -> Platform {
    let host = url::Url::parse(url.trim())
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_else(|| url.to_ascii_lowercase());

    if host.contains("spacebattles") {
        Platform::Spacebattles
    } else if host.contains("sufficientvelocity") {
        Platform::SufficientVelocity
    } else if host.contains("royalroad") {
        Platform::RoyalRoad
    } else if host.contains("scribblehub") {
        Platform::ScribbleHub
    } else if host.contains("archiveofourown") {
        Platform::Ao3
    } else if host.contains("fanfiction.net") {
        Platform::Other("ffn".to_owned())
    } else if host.contains("amazon") {
        Platform::Other("amazon".to_owned())
    } else {
        Platform::PersonalSite
    }
}

/// Builds the link list from a URL cell that may hold several `|`-separated URLs.
///
/// The first link is canonical. It takes `platform` when the row named one;
/// every other link gets its platform from the URL host.
pub fn parse_links(url_cell: &str, platform: Option<Platform>) -> Vec<BookLink> {
    let mut links = Vec::new();
    for url in url_cell.split('|').map(str::trim).filter(|u| !u.is_empty()) {
        let is_canonical = links.is_empty();
        let platform = match &platform {
            Some(platform) if is_canonical => platform.clone(),
            _ => platform_from_url(url),
        };
        links.push(BookLink {
            platform,
            url: url.to_owned(),
            is_canonical,
        });
    }
    links
}
