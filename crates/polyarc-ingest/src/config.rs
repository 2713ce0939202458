//! Crawl configuration
//!
//! One `CrawlConfig` value is built at process start (environment, then CLI
//! overrides) and passed by reference into every component. Components never
//! read the environment themselves.

use polyarc_common::{EntityKind, PartitionKey};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, Result};
use crate::fetch::retry::BackoffPolicy;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default upstream API base URL.
pub const DEFAULT_BASE_URL: &str = "https://gamma-api.polymarket.com";

/// Default page size requested per call.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Default safety cap on pages fetched per entity per run.
pub const DEFAULT_MAX_PAGES: usize = 200;

/// Default retry budget per page request.
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 45;

/// Default backoff base in milliseconds (doubled each attempt).
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default backoff ceiling in seconds.
pub const DEFAULT_BACKOFF_CAP_SECS: u64 = 60;

/// Default maximum random jitter added to a backoff delay, in milliseconds.
pub const DEFAULT_BACKOFF_JITTER_MS: u64 = 1000;

/// Default base delay between pages in seconds.
pub const DEFAULT_PAGE_DELAY_SECS: f64 = 0.25;

/// Default maximum random jitter added to the inter-page delay, in milliseconds.
pub const DEFAULT_PAGE_JITTER_MS: u64 = 200;

/// Freshness ordering field.
pub const DEFAULT_ORDER_PRIMARY: &str = crate::normalize::FRESHNESS_ORDER;

/// Stable identifier ordering used when the freshness order is rejected.
pub const DEFAULT_ORDER_FALLBACK: &str = "id";

/// Default archive root directory.
pub const DEFAULT_OUT_ROOT: &str = "by_created";

/// Default directory the file checkpoint backend resolves keys against.
pub const DEFAULT_STATE_DIR: &str = ".";

/// Default checkpoint document key.
pub const DEFAULT_CHECKPOINT_PATH: &str = ".state/polymarket_checkpoint.json";

/// Default run-state document key.
pub const DEFAULT_RUN_STATE_PATH: &str = ".state/polymarket_scheduler.json";

/// Default fan-out target list key.
pub const DEFAULT_TARGETS_PATH: &str = ".state/polymarket_targets.json";

/// Default GitHub API endpoint.
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Default GitHub organisation owning the orchestrator and dataset repos.
pub const DEFAULT_GITHUB_ORG: &str = "statground";

/// Default repository prefix for yearly datasets (and the orchestrator repo).
pub const DEFAULT_REPO_PREFIX: &str = "Statground_Data_Polymarket";

/// Default branch for checkpoint writes and dataset pushes.
pub const DEFAULT_BRANCH: &str = "main";

/// Default ClickHouse database.
pub const DEFAULT_CLICKHOUSE_DATABASE: &str = "statground_polymarket";

/// Default working directory for dataset fan-out.
pub const DEFAULT_FANOUT_DIR: &str = ".tmp_fanout";

/// Default name of the counts file written into each dataset.
pub const DEFAULT_COUNTS_FILE_NAME: &str = "POLYMARKET_COUNTS.json";

/// Which partitions a run is allowed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptancePolicy {
    /// Dated records of one year only
    Year(i32),
    /// Undated records only
    UndatedOnly,
    /// Everything
    #[default]
    All,
}

impl AcceptancePolicy {
    pub fn accepts(&self, partition: &PartitionKey) -> bool {
        match self {
            AcceptancePolicy::All => true,
            AcceptancePolicy::UndatedOnly => partition.is_undated(),
            AcceptancePolicy::Year(year) => partition.year() == Some(*year),
        }
    }

    /// Build from the `TARGET_MODE` / `TARGET_YEAR` pair
    pub fn from_mode(mode: Option<&str>, year: Option<&str>) -> Result<Self> {
        let year = year.map(str::trim).filter(|y| !y.is_empty());
        let parse_year = |y: &str| {
            y.parse::<i32>()
                .map_err(|_| IngestError::config(format!("TARGET_YEAR '{}' is not a year", y)))
        };

        match mode.map(|m| m.trim().to_lowercase()).as_deref() {
            None | Some("") => match year {
                Some(y) => Ok(AcceptancePolicy::Year(parse_year(y)?)),
                None => Ok(AcceptancePolicy::All),
            },
            Some("all") => Ok(AcceptancePolicy::All),
            Some("null_only") | Some("undated") => Ok(AcceptancePolicy::UndatedOnly),
            Some("year") => match year {
                Some(y) => Ok(AcceptancePolicy::Year(parse_year(y)?)),
                None => Err(IngestError::config("TARGET_MODE=year requires TARGET_YEAR")),
            },
            Some(other) => Err(IngestError::config(format!(
                "TARGET_MODE '{}' is not one of year, null_only, all",
                other
            ))),
        }
    }
}

impl std::fmt::Display for AcceptancePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcceptancePolicy::Year(year) => write!(f, "year:{:04}", year),
            AcceptancePolicy::UndatedOnly => f.write_str("undated"),
            AcceptancePolicy::All => f.write_str("all"),
        }
    }
}

impl FromStr for AcceptancePolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("year", year)) => Self::from_mode(Some("year"), Some(year)),
            _ => Self::from_mode(Some(s), None),
        }
    }
}

/// Upstream API settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub user_agent: String,
    /// Bearer credential supplied out of band
    pub api_token: Option<String>,
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn endpoint(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), kind.as_str())
    }
}

/// Pagination settings
#[derive(Debug, Clone)]
pub struct PagingConfig {
    pub page_limit: usize,
    /// Safety cap on pages per entity per run
    pub max_pages: usize,
    /// Order probed first. The checkpoint boundary only applies while paging
    /// in `updatedAt` order; any other order crawls to end of data or the cap.
    pub order_primary: String,
    pub order_fallback: String,
    pub page_delay: Duration,
    pub page_jitter: Duration,
}

/// Remote table store (ClickHouse HTTP interface)
#[derive(Debug, Clone)]
pub struct TableStoreConfig {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub raw_table: String,
    pub event_table: String,
    pub market_table: String,
    pub series_table: String,
}

impl TableStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: DEFAULT_CLICKHOUSE_DATABASE.to_string(),
            user: "default".to_string(),
            password: String::new(),
            raw_table: "polymarket_raw".to_string(),
            event_table: "polymarket_event".to_string(),
            market_table: "polymarket_market".to_string(),
            series_table: "polymarket_series".to_string(),
        }
    }
}

/// Archive destinations
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Filesystem partition root; also the fan-out staging area
    pub out_root: PathBuf,
    pub table_store: Option<TableStoreConfig>,
}

/// Where checkpoint and run-state documents live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateBackendKind {
    #[default]
    File,
    Github,
}

impl FromStr for StateBackendKind {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" | "local" => Ok(StateBackendKind::File),
            "github" => Ok(StateBackendKind::Github),
            other => Err(IngestError::config(format!(
                "CHECKPOINT_BACKEND '{}' is not one of file, github",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub backend: StateBackendKind,
    pub state_dir: PathBuf,
    pub checkpoint_path: String,
    pub run_state_path: String,
    pub targets_path: String,
}

/// GitHub account used by the contents backend and the git publisher
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub org: String,
    pub orchestrator_repo: String,
    pub branch: String,
}

/// How freshly written partitions are propagated after the crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanoutMode {
    #[default]
    None,
    /// Push into yearly git repositories
    Git,
    /// Mirror into yearly directories under the work dir
    Mirror,
}

impl FromStr for FanoutMode {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "off" => Ok(FanoutMode::None),
            "git" => Ok(FanoutMode::Git),
            "mirror" | "local" => Ok(FanoutMode::Mirror),
            other => Err(IngestError::config(format!(
                "FANOUT '{}' is not one of none, git, mirror",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FanoutConfig {
    pub mode: FanoutMode,
    pub repo_prefix: String,
    pub work_dir: PathBuf,
    pub counts_file_name: String,
}

/// Complete crawl configuration
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub api: ApiConfig,
    pub paging: PagingConfig,
    pub backoff: BackoffPolicy,
    pub acceptance: AcceptancePolicy,
    pub entities: Vec<EntityKind>,
    pub archive: ArchiveConfig,
    pub state: StateConfig,
    pub github: GithubConfig,
    pub fanout: FanoutConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
                user_agent: default_user_agent(),
                api_token: None,
                request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            },
            paging: PagingConfig {
                page_limit: DEFAULT_PAGE_LIMIT,
                max_pages: DEFAULT_MAX_PAGES,
                order_primary: DEFAULT_ORDER_PRIMARY.to_string(),
                order_fallback: DEFAULT_ORDER_FALLBACK.to_string(),
                page_delay: Duration::from_secs_f64(DEFAULT_PAGE_DELAY_SECS),
                page_jitter: Duration::from_millis(DEFAULT_PAGE_JITTER_MS),
            },
            backoff: BackoffPolicy {
                max_attempts: DEFAULT_MAX_RETRIES,
                base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
                cap: Duration::from_secs(DEFAULT_BACKOFF_CAP_SECS),
                jitter: Duration::from_millis(DEFAULT_BACKOFF_JITTER_MS),
            },
            acceptance: AcceptancePolicy::All,
            entities: EntityKind::ALL.to_vec(),
            archive: ArchiveConfig {
                out_root: PathBuf::from(DEFAULT_OUT_ROOT),
                table_store: None,
            },
            state: StateConfig {
                backend: StateBackendKind::File,
                state_dir: PathBuf::from(DEFAULT_STATE_DIR),
                checkpoint_path: DEFAULT_CHECKPOINT_PATH.to_string(),
                run_state_path: DEFAULT_RUN_STATE_PATH.to_string(),
                targets_path: DEFAULT_TARGETS_PATH.to_string(),
            },
            github: GithubConfig {
                api_url: DEFAULT_GITHUB_API.to_string(),
                token: None,
                org: DEFAULT_GITHUB_ORG.to_string(),
                orchestrator_repo: DEFAULT_REPO_PREFIX.to_string(),
                branch: DEFAULT_BRANCH.to_string(),
            },
            fanout: FanoutConfig {
                mode: FanoutMode::None,
                repo_prefix: DEFAULT_REPO_PREFIX.to_string(),
                work_dir: PathBuf::from(DEFAULT_FANOUT_DIR),
                counts_file_name: DEFAULT_COUNTS_FILE_NAME.to_string(),
            },
        }
    }
}

fn default_user_agent() -> String {
    format!("polyarc/{}", env!("CARGO_PKG_VERSION"))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

/// Fractional seconds; negative values clamp to zero
fn env_secs(key: &str, default: f64) -> Result<Duration> {
    let secs = env_parse(key, default).max(0.0);
    Duration::try_from_secs_f64(secs)
        .map_err(|e| IngestError::config(format!("{} = {}: {}", key, secs, e)))
}

impl CrawlConfig {
    /// Load configuration from `.env` and environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let entities = match env_opt("ENTITIES") {
            Some(list) => parse_entities(&list)?,
            None => defaults.entities.clone(),
        };

        let acceptance = AcceptancePolicy::from_mode(
            env_opt("TARGET_MODE").as_deref(),
            env_opt("TARGET_YEAR").as_deref(),
        )?;

        let table_store = env_opt("CLICKHOUSE_URL").map(|url| {
            let mut table = TableStoreConfig::new(url);
            table.database = env_opt("CLICKHOUSE_DATABASE").unwrap_or(table.database);
            table.user = env_opt("CLICKHOUSE_USER").unwrap_or(table.user);
            table.password = std::env::var("CLICKHOUSE_PASSWORD").unwrap_or_default();
            table.raw_table = env_opt("RAW_TABLE").unwrap_or(table.raw_table);
            table.event_table = env_opt("EVENT_TABLE").unwrap_or(table.event_table);
            table.market_table = env_opt("MARKET_TABLE").unwrap_or(table.market_table);
            table.series_table = env_opt("SERIES_TABLE").unwrap_or(table.series_table);
            table
        });

        let repo_prefix = env_opt("REPO_PREFIX").unwrap_or(defaults.fanout.repo_prefix);

        let config = Self {
            api: ApiConfig {
                base_url: env_opt("POLY_BASE").unwrap_or(defaults.api.base_url),
                user_agent: env_opt("USER_AGENT").unwrap_or(defaults.api.user_agent),
                api_token: env_opt("POLY_API_TOKEN"),
                request_timeout: Duration::from_secs(env_parse(
                    "REQUEST_TIMEOUT",
                    DEFAULT_REQUEST_TIMEOUT_SECS,
                )),
            },
            paging: PagingConfig {
                page_limit: env_parse("PAGE_LIMIT", DEFAULT_PAGE_LIMIT),
                max_pages: env_parse("MAX_PAGES", DEFAULT_MAX_PAGES),
                order_primary: env_opt("ORDER_PRIMARY").unwrap_or(defaults.paging.order_primary),
                order_fallback: env_opt("ORDER_FALLBACK")
                    .unwrap_or(defaults.paging.order_fallback),
                page_delay: env_secs("BASE_SLEEP", DEFAULT_PAGE_DELAY_SECS)?,
                page_jitter: Duration::from_millis(env_parse(
                    "SLEEP_JITTER_MS",
                    DEFAULT_PAGE_JITTER_MS,
                )),
            },
            backoff: BackoffPolicy {
                max_attempts: env_parse("MAX_RETRIES", DEFAULT_MAX_RETRIES),
                base: Duration::from_millis(env_parse("BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS)),
                cap: Duration::from_secs(env_parse("BACKOFF_CAP_SECS", DEFAULT_BACKOFF_CAP_SECS)),
                jitter: Duration::from_millis(env_parse(
                    "BACKOFF_JITTER_MS",
                    DEFAULT_BACKOFF_JITTER_MS,
                )),
            },
            acceptance,
            entities,
            archive: ArchiveConfig {
                out_root: env_opt("OUT_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.archive.out_root),
                table_store,
            },
            state: StateConfig {
                backend: match env_opt("CHECKPOINT_BACKEND") {
                    Some(backend) => backend.parse()?,
                    None => StateBackendKind::File,
                },
                state_dir: env_opt("STATE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.state.state_dir),
                checkpoint_path: env_opt("CHECKPOINT_PATH")
                    .unwrap_or(defaults.state.checkpoint_path),
                run_state_path: env_opt("SCHED_STATE_PATH")
                    .unwrap_or(defaults.state.run_state_path),
                targets_path: env_opt("TARGETS_PATH").unwrap_or(defaults.state.targets_path),
            },
            github: GithubConfig {
                api_url: env_opt("GITHUB_API").unwrap_or(defaults.github.api_url),
                token: env_opt("GH_TOKEN")
                    .or_else(|| env_opt("GH_PAT"))
                    .or_else(|| env_opt("GITHUB_TOKEN")),
                org: env_opt("ORG").unwrap_or(defaults.github.org),
                orchestrator_repo: env_opt("ORCHESTRATOR_REPO")
                    .unwrap_or_else(|| repo_prefix.clone()),
                branch: env_opt("DEFAULT_BRANCH").unwrap_or(defaults.github.branch),
            },
            fanout: FanoutConfig {
                mode: match env_opt("FANOUT") {
                    Some(mode) => mode.parse()?,
                    None => FanoutMode::None,
                },
                repo_prefix,
                work_dir: env_opt("FANOUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.fanout.work_dir),
                counts_file_name: env_opt("COUNTS_FILE_NAME")
                    .unwrap_or(defaults.fanout.counts_file_name),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.paging.page_limit == 0 {
            return Err(IngestError::config("PAGE_LIMIT must be greater than 0"));
        }
        if self.paging.max_pages == 0 {
            return Err(IngestError::config("MAX_PAGES must be greater than 0"));
        }
        if self.backoff.max_attempts == 0 {
            return Err(IngestError::config("MAX_RETRIES must be greater than 0"));
        }
        if self.paging.order_primary.trim().is_empty() || self.paging.order_fallback.trim().is_empty()
        {
            return Err(IngestError::config("ordering fields cannot be empty"));
        }
        if self.entities.is_empty() {
            return Err(IngestError::config("at least one entity must be crawled"));
        }
        reqwest::Url::parse(&self.api.base_url).map_err(|e| {
            IngestError::config(format!("POLY_BASE '{}' is not a URL: {}", self.api.base_url, e))
        })?;

        if self.state.backend == StateBackendKind::Github && self.github.token.is_none() {
            return Err(IngestError::config(
                "CHECKPOINT_BACKEND=github requires GH_TOKEN (or GH_PAT / GITHUB_TOKEN)",
            ));
        }
        if self.fanout.mode == FanoutMode::Git && self.github.token.is_none() {
            return Err(IngestError::config("FANOUT=git requires GH_TOKEN (or GH_PAT)"));
        }

        Ok(())
    }

    pub fn with_entities(mut self, entities: Vec<EntityKind>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_acceptance(mut self, acceptance: AcceptancePolicy) -> Self {
        self.acceptance = acceptance;
        self
    }

    pub fn with_out_root(mut self, out_root: impl Into<PathBuf>) -> Self {
        self.archive.out_root = out_root.into();
        self
    }

    /// Remove every delay so tests and dry runs do not sleep
    pub fn without_delays(mut self) -> Self {
        self.paging.page_delay = Duration::ZERO;
        self.paging.page_jitter = Duration::ZERO;
        self.backoff.base = Duration::from_millis(1);
        self.backoff.jitter = Duration::ZERO;
        self
    }
}

/// Parse a comma separated entity list (`events,markets`)
pub fn parse_entities(list: &str) -> Result<Vec<EntityKind>> {
    let mut entities = Vec::new();
    for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let kind: EntityKind = name.parse()?;
        if !entities.contains(&kind) {
            entities.push(kind);
        }
    }
    Ok(entities)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: &[&str] = &[
        "PAGE_LIMIT",
        "MAX_PAGES",
        "TARGET_MODE",
        "TARGET_YEAR",
        "ENTITIES",
        "CHECKPOINT_BACKEND",
        "GH_TOKEN",
        "GH_PAT",
        "GITHUB_TOKEN",
        "FANOUT",
        "CLICKHOUSE_URL",
        "BASE_SLEEP",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CrawlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.paging.page_limit, 100);
        assert_eq!(config.paging.max_pages, 200);
        assert_eq!(config.backoff.max_attempts, 6);
        assert_eq!(config.entities, EntityKind::ALL.to_vec());
        assert_eq!(config.api.endpoint(EntityKind::Series), "https://gamma-api.polymarket.com/series");
    }

    #[test]
    fn test_acceptance_policy_modes() {
        let march = PartitionKey::Month { year: 2025, month: 3 };
        let undated = PartitionKey::Undated;

        let year = AcceptancePolicy::from_mode(Some("year"), Some("2025")).unwrap();
        assert!(year.accepts(&march));
        assert!(!year.accepts(&undated));
        assert!(!AcceptancePolicy::Year(2024).accepts(&march));

        let null_only = AcceptancePolicy::from_mode(Some("null_only"), None).unwrap();
        assert!(null_only.accepts(&undated));
        assert!(!null_only.accepts(&march));

        assert!(AcceptancePolicy::All.accepts(&undated));
        assert!(AcceptancePolicy::from_mode(Some("year"), None).is_err());
        assert!(AcceptancePolicy::from_mode(Some("decade"), None).is_err());
    }

    #[test]
    fn test_acceptance_policy_round_trips_display() {
        for policy in [AcceptancePolicy::Year(2026), AcceptancePolicy::UndatedOnly, AcceptancePolicy::All] {
            assert_eq!(policy.to_string().parse::<AcceptancePolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_validate_rejects_zero_page_limit() {
        let mut config = CrawlConfig::default();
        config.paging.page_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_github_backend_requires_token() {
        let mut config = CrawlConfig::default();
        config.state.backend = StateBackendKind::Github;
        assert!(matches!(config.validate(), Err(IngestError::Config(_))));
        config.github.token = Some("ghp_test".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("PAGE_LIMIT", "50");
        std::env::set_var("MAX_PAGES", "3");
        std::env::set_var("TARGET_YEAR", "2024");
        std::env::set_var("ENTITIES", "markets, events,markets");
        std::env::set_var("CLICKHOUSE_URL", "http://localhost:8123");

        let config = CrawlConfig::from_env().unwrap();
        assert_eq!(config.paging.page_limit, 50);
        assert_eq!(config.paging.max_pages, 3);
        assert_eq!(config.acceptance, AcceptancePolicy::Year(2024));
        assert_eq!(config.entities, vec![EntityKind::Markets, EntityKind::Events]);
        let table = config.archive.table_store.unwrap();
        assert_eq!(table.url, "http://localhost:8123");
        assert_eq!(table.database, DEFAULT_CLICKHOUSE_DATABASE);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_page_delay() {
        clear_env();
        std::env::set_var("BASE_SLEEP", "-2");
        assert_eq!(CrawlConfig::from_env().unwrap().paging.page_delay, Duration::ZERO);

        std::env::set_var("BASE_SLEEP", "0.25");
        assert_eq!(
            CrawlConfig::from_env().unwrap().paging.page_delay,
            Duration::from_millis(250)
        );

        for bad in ["inf", "1e30"] {
            std::env::set_var("BASE_SLEEP", bad);
            assert!(matches!(CrawlConfig::from_env(), Err(IngestError::Config(_))));
        }
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_unknown_mode() {
        clear_env();
        std::env::set_var("TARGET_MODE", "sometimes");
        assert!(CrawlConfig::from_env().is_err());
        clear_env();
    }
}
