use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Consolidates retailer listings into a price-tracked, category-standardized catalog.",
    long_about = None,
    arg_required_else_help = true
)]
pub struct CliArgs {
    #[arg(
        long,
        global = true,
        value_name = "FILE_PATH",
        help = "Pipeline config (JSON); built-in defaults when omitted"
    )]
    config: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "DIR_PATH",
        help = "Override the data directory from the config"
    )]
    data_dir: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "RETAILER",
        help = "Override the reference retailer for category standardization"
    )]
    reference: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scrape, ingest, upsert, standardize and notify in one go
    Run {
        #[arg(long, help = "Skip launching crawl processes; consolidate existing files")]
        skip_scrape: bool,
        #[arg(long, value_name = "YYYY_MM_DD", help = "Run date of the listing files")]
        date: Option<String>,
    },
    /// Launch every retailer's crawl process for the configured interval
    Scrape,
    /// Crawl one retailer's traversal plan (launched by `scrape`)
    Crawl {
        #[arg(long, value_name = "RETAILER")]
        retailer: String,
        #[arg(long, value_name = "URL", help = "Base URL for relative plan paths")]
        base_url: Option<String>,
    },
    /// Upsert listing files into the catalog
    Ingest {
        #[arg(long, value_name = "YYYY_MM_DD", help = "Run date of the retailer listing logs")]
        date: Option<String>,
        #[arg(value_name = "FILE", help = "Additional listing files to ingest")]
        files: Vec<PathBuf>,
    },
    /// Run the four category-standardization phases
    Standardize {
        #[arg(long, value_name = "FILE", help = "Also export the standardized view as JSON")]
        export_view: Option<PathBuf>,
    },
    /// Compute price drops for users' saved products
    Notify {
        #[arg(long, value_name = "FILE", help = "Output file (default: <data_dir>/price_drops_<date>.json)")]
        out: Option<PathBuf>,
    },
    /// Print standardization coverage of the catalog
    Report {
        #[arg(long, value_name = "FILE", help = "Also write the report as JSON")]
        out: Option<PathBuf>,
    },
}

impl CliArgs {
    pub fn get_config_path(&self) -> Option<PathBuf> {
        self.config.as_deref().map(PathBuf::from)
    }

    /// Loads the config file and applies command-line overrides.
    pub async fn load_config(&self) -> AppResult<PipelineConfig> {
        let config_path = self.get_config_path();
        let mut cfg = PipelineConfig::load(config_path.as_deref()).await?;

        if let Some(dir) = &self.data_dir {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(reference) = &self.reference {
            let reference = reference.trim();
            if reference.is_empty() {
                return Err(AppError::Argument(
                    "--reference must not be empty".into(),
                ));
            }
            cfg.reference_retailer = reference.to_string();
        }
        cfg.validate()?;

        log(
            LogLevel::Info,
            &format!(
                "Reference retailer: {} | Retailers: {}",
                cfg.reference_retailer,
                cfg.retailers
                    .iter()
                    .map(|r| r.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        );
        Ok(cfg)
    }
}
