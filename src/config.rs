use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_DATA_DIR: &str = "./catalog_data";
pub const DEFAULT_DATABASE: &str = "app";
pub const DEFAULT_COLLECTION: &str = "products";
pub const DEFAULT_USERS_FILE: &str = "./catalog_data/users.json";
pub const DEFAULT_REFERENCE_RETAILER: &str = "vexio";

pub const LISTING_BATCH_SIZE: usize = 10;
pub const DEFAULT_SCRAPE_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_GRACE_SECS: u64 = 60;
pub const MAX_UPSERT_CONCUR: usize = 4;
pub const PHASE_ATTEMPTS: u32 = 2;

pub const USER_AGENT: &str = concat!("catalog_sync/", env!("CARGO_PKG_VERSION"));
pub const HTTP_TIMEOUT_SECONDS: u64 = 35;
pub const HTTP_CONNECT_TIMEOUT: u64 = 20;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_DELAY_BASE_SECS: f32 = 1.5;
pub const PAGE_DELAY_MILLIS: u64 = 1000;

pub const RUN_DATE_FORMAT: &str = "%Y_%m_%d";
pub const HISTORY_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M";

pub const LISTING_LOG_EXT: &str = "jsonl";
pub const CHECKPOINT_PREFIX: &str = "dying_gasp_";
pub const DEFAULT_PLAN_FILE_SUFFIX: &str = "_tree.txt";

pub static FORBIDDEN_CHARS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f\x7f]"#).expect("valid regex"));
pub static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Leading number in strings like `"1.299,99 lei"` or `"459.90"`.
pub static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d.,\s]*").expect("valid regex"));

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetailerConfig {
    pub id: String,
    /// Program launched for this retailer's crawl; defaults to this binary's `crawl` subcommand.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Traversal plan, one path per line.
    #[serde(default)]
    pub plan_file: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl RetailerConfig {
    pub fn new<S: Into<String>>(id: S) -> Self {
        RetailerConfig {
            id: id.into(),
            command: None,
            args: Vec::new(),
            plan_file: None,
            output_dir: None,
        }
    }

    pub fn output_dir(&self, data_dir: &Path) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("listings").join(&self.id))
    }

    pub fn plan_file(&self, data_dir: &Path) -> PathBuf {
        self.plan_file.clone().unwrap_or_else(|| {
            self.output_dir(data_dir)
                .join(format!("{}{}", self.id, DEFAULT_PLAN_FILE_SUFFIX))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub database: String,
    pub collection: String,
    pub reference_retailer: String,
    pub users_file: PathBuf,
    pub scrape_secs: u64,
    pub grace_secs: u64,
    pub retailers: Vec<RetailerConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            reference_retailer: DEFAULT_REFERENCE_RETAILER.to_string(),
            users_file: PathBuf::from(DEFAULT_USERS_FILE),
            scrape_secs: DEFAULT_SCRAPE_SECS,
            grace_secs: DEFAULT_GRACE_SECS,
            retailers: vec![RetailerConfig::new("vexio"), RetailerConfig::new("evomag")],
        }
    }
}

impl PipelineConfig {
    /// Reads the JSON config at `path`; a missing file yields the defaults.
    pub async fn load(path: Option<&Path>) -> AppResult<Self> {
        let Some(path) = path else {
            return Ok(PipelineConfig::default());
        };

        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            log(
                LogLevel::Warning,
                &format!(
                    "Config file '{}' not found, using built-in defaults.",
                    path.display()
                ),
            );
            return Ok(PipelineConfig::default());
        }

        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::ConfigError(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        let cfg: PipelineConfig = serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("Malformed config '{}': {}", path.display(), e))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.reference_retailer.trim().is_empty() {
            return Err(AppError::ConfigError(
                "referenceRetailer must not be empty".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        let mut output_dirs = std::collections::HashMap::new();
        for retailer in &self.retailers {
            if retailer.id.trim().is_empty() {
                return Err(AppError::ConfigError("retailer id must not be empty".into()));
            }
            if !seen.insert(retailer.id.as_str()) {
                return Err(AppError::ConfigError(format!(
                    "retailer '{}' configured twice",
                    retailer.id
                )));
            }
            // checkpoints are named by date only, so each retailer needs its own directory
            if let Some(other) =
                output_dirs.insert(retailer.output_dir(&self.data_dir), retailer.id.as_str())
            {
                return Err(AppError::ConfigError(format!(
                    "retailers '{}' and '{}' share an output directory",
                    other, retailer.id
                )));
            }
        }
        Ok(())
    }

    pub fn retailer(&self, id: &str) -> Option<&RetailerConfig> {
        self.retailers.iter().find(|r| r.id == id)
    }
}
