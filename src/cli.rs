use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert a book spreadsheet into the JSON catalog, merging with what is saved.
    Convert(ConvertArgs),
    /// Fetch the platform rating of every book in a spreadsheet.
    Ratings(RatingsArgs),
    /// Scrape the best-rated listing (and detail pages) into a spreadsheet.
    Ranking(RankingArgs),
    /// Sort a spreadsheet by the current best-rated order.
    Rerank(RerankArgs),
    /// Scrape a single book by URL or title into a one-row spreadsheet.
    Book(BookArgs),
    /// Map catalog ids to local cover image files.
    Covers(CoversArgs),
    /// Merge the curated stacks worksheet into the stacks JSON file.
    Stacks(StacksArgs),
}

/// Network settings shared by every scraping subcommand.
#[derive(Debug, Clone, Args)]
pub struct FetchArgs {
    /// Site root that listing, search and fiction paths are joined onto.
    #[arg(long, default_value = crate::fetch::DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Attempts per page before giving up on it.
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,

    /// How the delay between attempts grows.
    #[arg(long, value_enum, default_value_t = BackoffKind::Linear)]
    pub backoff: BackoffKind,

    /// Backoff step: linear waits step * attempt, exponential waits
    /// step * 2^(attempt - 1).
    #[arg(long, default_value_t = 10_000)]
    pub retry_step_ms: u64,

    /// Lower bound of the random pause after each request.
    #[arg(long, default_value_t = 2_000)]
    pub pace_min_ms: u64,

    /// Upper bound of the random pause after each request.
    #[arg(long, default_value_t = 4_000)]
    pub pace_max_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffKind {
    Linear,
    Exponential,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Input spreadsheet (.xlsx / .xls / .ods); the first worksheet is read.
    #[arg(long)]
    pub input: String,

    /// Catalog JSON file to merge into and rewrite.
    #[arg(long, default_value = "data/books.json")]
    pub out: String,

    /// Description rows to skip after the header row.
    #[arg(long, default_value_t = 0)]
    pub skip_rows: usize,

    /// JSON file with platform / status / theme tables (default: built-in tables).
    #[arg(long)]
    pub mapping: Option<String>,

    /// Copy the previous catalog here (timestamped) before rewriting it.
    #[arg(long)]
    pub backup_dir: Option<String>,

    /// Report what would change without writing the catalog.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct RatingsArgs {
    /// Spreadsheet with a `url` column.
    #[arg(long)]
    pub sheet: String,

    /// Output spreadsheet (default: overwrite `--sheet`).
    #[arg(long)]
    pub out: Option<String>,

    /// Only fetch rows whose `platformRating` is empty.
    #[arg(long)]
    pub only_missing: bool,

    /// Maximum pages fetched at once.
    #[arg(long, default_value_t = 3)]
    pub concurrency: usize,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct RankingArgs {
    /// Output spreadsheet.
    #[arg(long, default_value = "rr_best_rated.xlsx")]
    pub out: String,

    /// Number of books to collect.
    #[arg(long, default_value_t = 50)]
    pub target: usize,

    /// Maximum listing pages to read.
    #[arg(long, default_value_t = 10)]
    pub max_pages: u32,

    /// Keep only completed (or stubbed) books.
    #[arg(long)]
    pub completed_only: bool,

    /// Do not visit detail pages (no author, word count or detail rating).
    #[arg(long)]
    pub skip_details: bool,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct RerankArgs {
    /// Spreadsheet with a `url` column.
    #[arg(long)]
    pub sheet: String,

    /// Output spreadsheet (default: overwrite `--sheet`).
    #[arg(long)]
    pub out: Option<String>,

    /// Listing pages to read for the order.
    #[arg(long, default_value_t = 8)]
    pub pages: u32,

    /// Also refetch `platformRating` for every row.
    #[arg(long)]
    pub refresh_ratings: bool,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct BookArgs {
    /// Fiction page URL.
    #[arg(long, required_unless_present = "title", conflicts_with = "title")]
    pub url: Option<String>,

    /// Title to look up with the site search.
    #[arg(long)]
    pub title: Option<String>,

    /// Output spreadsheet.
    #[arg(long, default_value = "book.xlsx")]
    pub out: String,

    #[command(flatten)]
    pub fetch: FetchArgs,
}

#[derive(Debug, Args)]
pub struct CoversArgs {
    /// Spreadsheet with `id` / `title` columns.
    #[arg(long)]
    pub sheet: String,

    /// Directory holding cover images.
    #[arg(long)]
    pub images: String,

    /// Output JSON mapping of id to cover path.
    #[arg(long, default_value = "data/image_mapping.json")]
    pub out: String,

    /// Path prefix written in front of each matched file name.
    #[arg(long, default_value = "/covers/")]
    pub prefix: String,

    /// Image file extension to consider.
    #[arg(long, default_value = "png")]
    pub extension: String,

    /// Also write matched covers into this catalog's `coverImage` fields.
    #[arg(long)]
    pub apply_to: Option<String>,
}

#[derive(Debug, Args)]
pub struct StacksArgs {
    /// Workbook holding the stacks worksheet.
    #[arg(long)]
    pub input: String,

    /// Worksheet name.
    #[arg(long, default_value = "Stacks")]
    pub sheet: String,

    /// Stacks JSON file to merge into and rewrite.
    #[arg(long, default_value = "data/stacks.json")]
    pub out: String,

    /// Description rows to skip after the header row.
    #[arg(long, default_value_t = 1)]
    pub skip_rows: usize,

    /// Copy the previous stacks file here (timestamped) before rewriting it.
    #[arg(long)]
    pub backup_dir: Option<String>,

    /// Report what would change without writing the stacks file.
    #[arg(long)]
    pub dry_run: bool,
}
