use crate::api::JsonPageSource;
use crate::config::{PipelineConfig, RetailerConfig};
use crate::core::crawler::{self, CrawlOutcome, CrawlWorker};
use crate::core::notify::{self, UserNotification};
use crate::core::orchestrator::{self, CrawlCommand, ProcessStatus};
use crate::core::standardizer::{self, CategoryStandardizer, StandardizationReport};
use crate::core::stats::{self, PhaseStats, RunStats};
use crate::core::upsert::{self, UpsertReport};
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log, LogLevel};
use crate::model::Listing;
use crate::store::{CatalogStore, FileCatalogStore, StoreLocation};
use crate::utils;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub skip_scrape: bool,
    pub run_date: Option<String>,
}

pub fn open_store_blocking(cfg: &PipelineConfig) -> AppResult<FileCatalogStore> {
    let location = StoreLocation::new(cfg.database.clone(), cfg.collection.clone());
    FileCatalogStore::open(&cfg.data_dir, &location)
}

pub async fn open_store(cfg: &PipelineConfig) -> AppResult<Arc<dyn CatalogStore>> {
    let cfg = cfg.clone();
    let store = utils::run_blocking(move || open_store_blocking(&cfg)).await?;
    log(
        LogLevel::Info,
        &format!("Catalog store: {}", store.path().display()),
    );
    Ok(Arc::new(store))
}

/// The command line used to launch one retailer's crawl process.
pub fn crawl_command(
    retailer: &RetailerConfig,
    config_path: Option<&Path>,
) -> AppResult<CrawlCommand> {
    if let Some(program) = &retailer.command {
        return Ok(CrawlCommand {
            retailer: retailer.id.clone(),
            program: program.clone(),
            args: retailer.args.clone(),
        });
    }

    let exe = std::env::current_exe().map_err(|e| {
        AppError::process(&retailer.id, format!("cannot locate own executable: {}", e))
    })?;
    let mut args = vec![
        "crawl".to_string(),
        "--retailer".to_string(),
        retailer.id.clone(),
    ];
    if let Some(path) = config_path {
        args.push("--config".to_string());
        args.push(path.display().to_string());
    }
    args.extend(retailer.args.iter().cloned());
    Ok(CrawlCommand {
        retailer: retailer.id.clone(),
        program: exe.display().to_string(),
        args,
    })
}

/// Launches every retailer's crawl and supervises it for the configured interval.
pub async fn scrape(
    cfg: &PipelineConfig,
    config_path: Option<&Path>,
    phase_stats: &mut PhaseStats,
) -> AppResult<()> {
    phase_stats.set_total(cfg.retailers.len());
    let mut commands = Vec::with_capacity(cfg.retailers.len());
    for retailer in &cfg.retailers {
        match crawl_command(retailer, config_path) {
            Ok(cmd) => commands.push(cmd),
            Err(e) => {
                log(LogLevel::Error, &e.to_string());
                phase_stats.add_fail();
            }
        }
    }

    log(
        LogLevel::Info,
        &format!(
            "Scraping {} retailer(s) for {}s (grace {}s)",
            commands.len(),
            cfg.scrape_secs,
            cfg.grace_secs
        ),
    );
    let outcomes = orchestrator::scrape_for_interval(
        &commands,
        Duration::from_secs(cfg.scrape_secs),
        Duration::from_secs(cfg.grace_secs),
    )
    .await;

    for outcome in outcomes {
        match outcome.status {
            ProcessStatus::StillRunning => phase_stats.add_skip(),
            ref status if status.is_failure() => phase_stats.add_fail(),
            _ => phase_stats.add_ok(),
        }
    }
    Ok(())
}

/// Single-retailer crawl worker; this is what `scrape` launches per retailer.
pub async fn crawl(
    cfg: &PipelineConfig,
    retailer_id: &str,
    base_url: Option<String>,
    run_date: &str,
) -> AppResult<CrawlOutcome> {
    let retailer = cfg
        .retailer(retailer_id)
        .cloned()
        .unwrap_or_else(|| RetailerConfig::new(retailer_id));
    let source = JsonPageSource::new(retailer.id.clone(), base_url)?;
    let shutdown = crawler::shutdown_on_ctrl_c();
    CrawlWorker::new(&retailer, &cfg.data_dir, run_date, source, shutdown)
        .run()
        .await
}

/// Reads each retailer's listing log for `run_date`, plus any extra files given.
pub async fn ingest(
    cfg: &PipelineConfig,
    run_date: &str,
    extra_files: &[PathBuf],
    phase_stats: &mut PhaseStats,
) -> Vec<(String, Vec<Listing>)> {
    let mut sources: Vec<(String, PathBuf)> = cfg
        .retailers
        .iter()
        .map(|r| {
            (
                r.id.clone(),
                io::listing_log_path(&r.output_dir(&cfg.data_dir), &r.id, run_date),
            )
        })
        .collect();
    sources.extend(
        extra_files
            .iter()
            .map(|p| (p.display().to_string(), p.clone())),
    );
    phase_stats.set_total(sources.len());

    let mut batches = Vec::new();
    for (label, path) in sources {
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            log(
                LogLevel::Warning,
                &format!("[{}] No listing file at {}", label, path.display()),
            );
            phase_stats.add_skip();
            continue;
        }
        match io::read_listing_file(&path).await {
            Ok((listings, file_stats)) => {
                log(
                    LogLevel::Info,
                    &format!(
                        "[{}] {}: {} listing(s), {} malformed",
                        label,
                        path.display(),
                        file_stats.read,
                        file_stats.malformed
                    ),
                );
                if listings.is_empty() {
                    phase_stats.add_skip();
                } else {
                    phase_stats.add_ok();
                    batches.push((label, listings));
                }
            }
            Err(e) => {
                log(
                    LogLevel::Error,
                    &format!("[{}] Cannot read {}: {}", label, path.display(), e),
                );
                phase_stats.add_fail();
            }
        }
    }
    batches
}

pub async fn upsert(
    store: Arc<dyn CatalogStore>,
    batches: Vec<(String, Vec<Listing>)>,
    phase_stats: &mut PhaseStats,
) -> AppResult<UpsertReport> {
    let n = batches.len();
    phase_stats.set_total(n);
    if n == 0 {
        log(LogLevel::Warning, "No listings to upsert.");
        return Ok(UpsertReport::default());
    }
    let report = upsert::upsert_batches(store, batches, Local::now()).await?;
    phase_stats.ok += n;
    log(
        LogLevel::Info,
        &format!(
            "Upsert totals: {} inserted, {} updated, {} rejected",
            report.inserted, report.updated, report.rejected
        ),
    );
    Ok(report)
}

pub async fn standardize(
    store: Arc<dyn CatalogStore>,
    reference_retailer: String,
) -> AppResult<StandardizationReport> {
    utils::run_blocking(move || CategoryStandardizer::new(store.as_ref(), reference_retailer).run())
        .await
}

pub async fn report(
    store: Arc<dyn CatalogStore>,
    reference_retailer: String,
) -> AppResult<StandardizationReport> {
    utils::run_blocking(move || {
        CategoryStandardizer::new(store.as_ref(), reference_retailer).report()
    })
    .await
}

pub async fn export_standardized_view(
    store: Arc<dyn CatalogStore>,
    out_file: PathBuf,
) -> AppResult<usize> {
    let view = utils::run_blocking(move || standardizer::standardized_view(store.as_ref())).await?;
    let n = view.len();
    io::save_json(out_file.clone(), view, "standardized view".to_string()).await?;
    log(
        LogLevel::Success,
        &format!("Exported {} product(s) to {}", n, out_file.display()),
    );
    Ok(n)
}

pub fn notifications_path(cfg: &PipelineConfig, run_date: &str) -> PathBuf {
    cfg.data_dir
        .join(format!("price_drops_{}.json", io::clean_filename(run_date)))
}

pub async fn notify(
    store: Arc<dyn CatalogStore>,
    users_file: &Path,
    out_file: PathBuf,
) -> AppResult<Vec<UserNotification>> {
    let users = notify::load_users(users_file).await?;
    let found = utils::run_blocking(move || notify::find_price_drops(store.as_ref(), &users)).await?;
    let drops: usize = found.iter().map(|n| n.drops.len()).sum();
    log(
        LogLevel::Info,
        &format!("{} price drop(s) for {} user(s)", drops, found.len()),
    );
    io::save_json(out_file, found.clone(), "price drops".to_string()).await?;
    Ok(found)
}

/// Full cycle: scrape, ingest today's files, upsert, standardize, notify.
pub async fn run(cfg: PipelineConfig, opts: RunOptions) -> AppResult<i32> {
    let overall_start_time = Instant::now();
    let run_date = opts.run_date.clone().unwrap_or_else(utils::today);
    let retailer_ids: Vec<String> = cfg.retailers.iter().map(|r| r.id.clone()).collect();

    log(
        LogLevel::Step,
        &format!(
            "Starting catalog sync for {} retailer(s), run date {}",
            retailer_ids.len(),
            run_date
        ),
    );
    log(
        LogLevel::Info,
        &format!("Data Directory: {}", cfg.data_dir.display()),
    );

    let mut run_stats = stats::initialize_stats();

    let phase_start = Instant::now();
    log(LogLevel::Step, "--- Phase 1: Scrape ---");
    if opts.skip_scrape {
        log(LogLevel::Info, "Scrape skipped on request.");
    } else {
        scrape(
            &cfg,
            opts.config_path.as_deref(),
            stats::phase(&mut run_stats, stats::PHASE_CRAWL),
        )
        .await?;
    }
    log_phase_completion(stats::PHASE_CRAWL, &run_stats, phase_start.elapsed());

    let phase_start = Instant::now();
    log(LogLevel::Step, "--- Phase 2: Ingest Listing Files ---");
    let batches = ingest(
        &cfg,
        &run_date,
        &[],
        stats::phase(&mut run_stats, stats::PHASE_INGEST),
    )
    .await;
    log_phase_completion(stats::PHASE_INGEST, &run_stats, phase_start.elapsed());

    let store = open_store(&cfg).await?;

    let phase_start = Instant::now();
    log(LogLevel::Step, "--- Phase 3: Upsert ---");
    upsert(
        Arc::clone(&store),
        batches,
        stats::phase(&mut run_stats, stats::PHASE_UPSERT),
    )
    .await?;
    log_phase_completion(stats::PHASE_UPSERT, &run_stats, phase_start.elapsed());

    let phase_start = Instant::now();
    log(LogLevel::Step, "--- Phase 4: Standardize Categories ---");
    {
        let phase_stats = stats::phase(&mut run_stats, stats::PHASE_STANDARDIZE);
        phase_stats.set_total(1);
        match standardize(Arc::clone(&store), cfg.reference_retailer.clone()).await {
            Ok(_) => phase_stats.add_ok(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log(LogLevel::Error, &format!("Standardization failed: {}", e));
                phase_stats.add_fail();
            }
        }
    }
    log_phase_completion(stats::PHASE_STANDARDIZE, &run_stats, phase_start.elapsed());

    let phase_start = Instant::now();
    log(LogLevel::Step, "--- Phase 5: Price-Drop Notifications ---");
    {
        let phase_stats = stats::phase(&mut run_stats, stats::PHASE_NOTIFY);
        phase_stats.set_total(1);
        let out_file = notifications_path(&cfg, &run_date);
        match notify(Arc::clone(&store), &cfg.users_file, out_file).await {
            Ok(found) if found.is_empty() => phase_stats.add_skip(),
            Ok(_) => phase_stats.add_ok(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                log(LogLevel::Error, &format!("Notification pass failed: {}", e));
                phase_stats.add_fail();
            }
        }
    }
    log_phase_completion(stats::PHASE_NOTIFY, &run_stats, phase_start.elapsed());

    stats::print_summary(&run_stats, &retailer_ids, overall_start_time.elapsed());
    Ok(stats::determine_exit_code(&run_stats))
}

fn log_phase_completion(phase: &str, run_stats: &RunStats, elapsed: Duration) {
    let Some(stats) = run_stats.get(phase) else {
        return;
    };
    let level = if stats.fail > 0 {
        LogLevel::Warning
    } else {
        LogLevel::Success
    };
    log(
        level,
        &format!(
            "--- {} Phase complete ({} OK, {} Skip/Empty, {} Fail / {} Total) | Elapsed: {:?} ---",
            phase, stats.ok, stats.skip_or_empty, stats.fail, stats.total_tasks, elapsed
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Listing;
    use crate::store::Filter;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: dir.to_path_buf(),
            users_file: dir.join("users.json"),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn default_crawl_command_reinvokes_this_binary() {
        let r = RetailerConfig::new("evomag");
        let cmd = crawl_command(&r, Some(Path::new("/etc/cs.json"))).unwrap();
        assert_eq!(
            cmd.args,
            vec!["crawl", "--retailer", "evomag", "--config", "/etc/cs.json"]
        );

        let mut custom = RetailerConfig::new("altex");
        custom.command = Some("python3".into());
        custom.args = vec!["altex.py".into()];
        let cmd = crawl_command(&custom, None).unwrap();
        assert_eq!(cmd.program, "python3");
        assert_eq!(cmd.args, vec!["altex.py"]);
    }

    #[tokio::test]
    async fn run_without_scrape_consolidates_todays_files() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(dir.path());
        let date = "2025_03_02";

        let vexio = &cfg.retailers[0];
        let evomag = &cfg.retailers[1];
        io::append_listings(
            &io::listing_log_path(&vexio.output_dir(dir.path()), "vexio", date),
            &[
                Listing::new("A1", "vexio", "Telefoane", 1000.0),
                Listing::new("A2", "vexio", "Telefoane", 900.0),
            ],
        )
        .await
        .unwrap();
        io::append_listings(
            &io::listing_log_path(&evomag.output_dir(dir.path()), "evomag", date),
            &[
                Listing::new("A1", "evomag", "Smartphone", 990.0),
                Listing::new("Z9", "evomag", "Smartphone", 50.0),
            ],
        )
        .await
        .unwrap();
        std::fs::write(
            &cfg.users_file,
            r#"[{"email":"ana@example.com","savedProducts":[]}]"#,
        )
        .unwrap();

        let code = run(
            cfg.clone(),
            RunOptions {
                config_path: None,
                skip_scrape: true,
                run_date: Some(date.to_string()),
            },
        )
        .await
        .unwrap();
        assert_eq!(code, 0);

        let store = open_store_blocking(&cfg).unwrap();
        assert_eq!(store.count(&Filter::all()).unwrap(), 4);
        let z9 = store
            .find(&Filter::all().product_code("Z9"))
            .unwrap()
            .remove(0);
        // no reference match of its own, but its group votes for Telefoane
        assert_eq!(z9.standardized_category.as_deref(), Some("Telefoane"));
        assert!(!z9.category_inferred && !z9.category_unmatched);
        assert!(notifications_path(&cfg, date).exists());
    }

    #[tokio::test]
    async fn missing_listing_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let cfg = config_in(dir.path());
        let mut phase_stats = PhaseStats::default();
        let batches = ingest(&cfg, "2025_03_02", &[], &mut phase_stats).await;
        assert!(batches.is_empty());
        assert_eq!(phase_stats.skip_or_empty, 2);
        assert_eq!(phase_stats.fail, 0);
    }
}
