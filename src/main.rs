use catalog_sync::cli::{CliArgs, Command};
use catalog_sync::core::processor::{self, RunOptions};
use catalog_sync::core::stats::{self, PhaseStats};
use catalog_sync::error::{AppError, AppResult};
use catalog_sync::logging::{log, setup_logging, LogLevel};
use catalog_sync::{io, utils};
use chrono::Local;
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use tokio::runtime::Builder;

fn main() -> ExitCode {
    setup_logging();

    let cli_args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if !e.use_stderr() => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            log(LogLevel::Error, &format!("CLI Argument Error: {}", e));
            let _ = CliArgs::command().print_help();
            return ExitCode::from(2);
        }
    };

    let runtime = match Builder::new_multi_thread()
        .enable_all()
        .thread_name("catalog-worker")
        .worker_threads(num_cpus::get())
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log(
                LogLevel::Error,
                &format!("FATAL: Failed to build Tokio runtime: {}", e),
            );
            return ExitCode::FAILURE;
        }
    };

    let main_result: AppResult<i32> = runtime.block_on(dispatch(cli_args));

    match main_result {
        Ok(exit_code) => ExitCode::from(exit_code as u8),
        Err(e) => {
            if !matches!(e, AppError::Argument(_)) {
                log(LogLevel::Error, &format!("FATAL UNEXPECTED ERROR: {:?}", e));
            } else {
                log(LogLevel::Error, &e.to_string());
            }
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: CliArgs) -> AppResult<i32> {
    let cfg = args.load_config().await?;
    let config_path = args.get_config_path();

    match args.command {
        Command::Run { skip_scrape, date } => {
            processor::run(
                cfg,
                RunOptions {
                    config_path,
                    skip_scrape,
                    run_date: date,
                },
            )
            .await
        }
        Command::Scrape => {
            let mut phase_stats = PhaseStats::default();
            processor::scrape(&cfg, config_path.as_deref(), &mut phase_stats).await?;
            Ok(if phase_stats.fail > 0 { 1 } else { 0 })
        }
        Command::Crawl { retailer, base_url } => {
            let outcome =
                processor::crawl(&cfg, &retailer, base_url, &utils::today()).await?;
            Ok(if outcome.paths_failed > 0 && outcome.paths_completed == 0 {
                1
            } else {
                0
            })
        }
        Command::Ingest { date, files } => {
            let run_date = date.unwrap_or_else(utils::today);
            let mut run_stats = stats::initialize_stats();
            let batches = processor::ingest(
                &cfg,
                &run_date,
                &files,
                stats::phase(&mut run_stats, stats::PHASE_INGEST),
            )
            .await;
            let store = processor::open_store(&cfg).await?;
            processor::upsert(
                store,
                batches,
                stats::phase(&mut run_stats, stats::PHASE_UPSERT),
            )
            .await?;
            Ok(stats::determine_exit_code(&run_stats))
        }
        Command::Standardize { export_view } => {
            let store = processor::open_store(&cfg).await?;
            processor::standardize(store.clone(), cfg.reference_retailer.clone()).await?;
            if let Some(out) = export_view {
                processor::export_standardized_view(store, out).await?;
            }
            Ok(0)
        }
        Command::Notify { out } => {
            let store = processor::open_store(&cfg).await?;
            let out = out.unwrap_or_else(|| {
                processor::notifications_path(&cfg, &utils::run_date(&Local::now()))
            });
            processor::notify(store, &cfg.users_file, out).await?;
            Ok(0)
        }
        Command::Report { out } => {
            let store = processor::open_store(&cfg).await?;
            let report = processor::report(store, cfg.reference_retailer.clone()).await?;
            report.log_summary();
            if let Some(out) = out {
                io::save_json(out, report, "standardization report".to_string()).await?;
            }
            Ok(0)
        }
    }
}
