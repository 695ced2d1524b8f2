use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Platform {
    RoyalRoad,
    Spacebattles,
    SufficientVelocity,
    ScribbleHub,
    Ao3,
    #[default]
    PersonalSite,
    /// Any other slug (`ffn`, `amazon`, ...), written back exactly as read.
    Other(String),
}

impl Platform {
    pub const KNOWN: [Platform; 6] = [
        Platform::RoyalRoad,
        Platform::Spacebattles,
        Platform::SufficientVelocity,
        Platform::ScribbleHub,
        Platform::Ao3,
        Platform::PersonalSite,
    ];

    pub fn slug(&self) -> &str {
        match self {
            Platform::RoyalRoad => "royal-road",
            Platform::Spacebattles => "spacebattles",
            Platform::SufficientVelocity => "sufficient-velocity",
            Platform::ScribbleHub => "scribble-hub",
            Platform::Ao3 => "ao3",
            Platform::PersonalSite => "personal-site",
            Platform::Other(slug) => slug,
        }
    }

    pub fn from_slug(slug: &str) -> Self {
        Self::KNOWN
            .into_iter()
            .find(|platform| platform.slug() == slug)
            .unwrap_or_else(|| Platform::Other(slug.to_owned()))
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.slug())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let platform = Self::from_slug(&raw);
        if let Platform::Other(slug) = &platform {
            tracing::debug!(platform = %slug, "unknown platform slug; keeping it as is");
        }
        Ok(platform)
    }
}

/// A catalog counter (`stackCount`, `savedCount`, ...). Integers, floats,
/// numeric strings and `null` are all accepted; a `null` is written back as
/// `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter(Option<u64>);

impl Counter {
    pub const NULL: Counter = Counter(None);

    pub fn get(self) -> u64 {
        self.0.unwrap_or(0)
    }

    pub fn is_null(self) -> bool {
        self.0.is_none()
    }
}

impl Default for Counter {
    fn default() -> Self {
        Counter(Some(0))
    }
}

impl From<u64> for Counter {
    fn from(value: u64) -> Self {
        Counter(Some(value))
    }
}

impl Serialize for Counter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(value) => serializer.serialize_u64(value),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Counter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let count = match &value {
            serde_json::Value::Null => return Ok(Counter::NULL),
            serde_json::Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
                .unwrap_or(0),
            serde_json::Value::String(s) => crate::extract::parse_count(s).unwrap_or(0),
            other => {
                tracing::debug!(value = %other, "unreadable counter; using 0");
                0
            }
        };
        Ok(Counter(Some(count)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Ongoing,
    Completed,
    Hiatus,
    Dropped,
}

impl Status {
    pub fn slug(self) -> &'static str {
        match self {
            Status::Ongoing => "ongoing",
            Status::Completed => "completed",
            Status::Hiatus => "hiatus",
            Status::Dropped => "dropped",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug.trim().to_ascii_lowercase().as_str() {
            "ongoing" => Some(Status::Ongoing),
            "completed" => Some(Status::Completed),
            "hiatus" => Some(Status::Hiatus),
            // Older catalogs were written with `dead`.
            "dropped" | "dead" => Some(Status::Dropped),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_slug(&raw).unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookLink {
    pub platform: Platform,
    pub url: String,
    #[serde(default)]
    pub is_canonical: bool,
}

/// One catalog entry, serialized in the shape the web project reads.
///
/// Keys this type does not know about are kept in `extra` so a catalog can be
/// rewritten without losing hand-edited fields.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub synopsis: String,
    pub themes: Vec<String>,
    pub links: Vec<BookLink>,
    pub status: Status,
    pub stack_count: Counter,
    pub saved_count: Counter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curator_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A curated reading list, as stored in the stacks file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stack {
    pub id: String,
    pub title: String,
    pub cover_title: String,
    pub description: String,
    pub curator_id: String,
    pub curator_note: String,
    #[serde(rename = "curatorNoteCN")]
    pub curator_note_cn: String,
    pub entries: Vec<StackEntry>,
    pub themes: Vec<String>,
    pub platforms: Vec<Platform>,
    pub cover_gradient: String,
    pub created_at: String,
    pub updated_at: String,
    pub saved_count: Counter,
    pub view_count: Counter,
    pub is_editor_pick: bool,
    pub is_featured: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackEntry {
    pub novel_id: String,
    pub curator_note: String,
    pub added_at: String,
    pub order: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Top-level shape of the stacks file: `{ "stacks": [...] }`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StacksFile {
    pub stacks: Vec<Stack>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A row of a scraped-books spreadsheet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScrapedBook {
    pub title: String,
    pub author: Option<String>,
    pub url: String,
    pub cover_url: Option<String>,
    pub platform_rating: Option<f64>,
    pub status: Option<String>,
    pub chapters: Option<u64>,
    pub pages: Option<u64>,
    pub words: Option<u64>,
    pub views: Option<u64>,
    pub followers: Option<u64>,
    pub synopsis: Option<String>,
    pub tags: Vec<String>,
}

/// Column order of every scraped-books spreadsheet this tool writes.
pub const SCRAPED_COLUMNS: &[&str] = &[
    "title",
    "author",
    "url",
    "coverUrl",
    "platformRating",
    "status",
    "chapters",
    "pages",
    "words",
    "views",
    "followers",
    "synopsis",
    "tags",
    "notes",
];
