use crate::api::PageSource;
use crate::config::{self, RetailerConfig};
use crate::core::checkpoint::{CheckpointManager, Traversal};
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log_for, LogLevel};
use crate::model::Listing;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub paths_completed: usize,
    pub paths_failed: usize,
    pub pages: usize,
    pub listings_written: usize,
    pub interrupted: bool,
    pub checkpoint: Option<PathBuf>,
}

enum PathStatus {
    Done,
    Interrupted,
    Failed(AppError),
}

/// Single-retailer crawl over a traversal plan, appending listings to today's listing log.
pub struct CrawlWorker<S: PageSource> {
    retailer: String,
    source: S,
    checkpoints: CheckpointManager,
    listing_log: PathBuf,
    page_delay: Duration,
    shutdown: watch::Receiver<bool>,
}

/// Flips to `true` on the first SIGINT.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
            // keep the channel open so receivers see the flag, not a closed sender
            tx.closed().await;
        }
    });
    rx
}

impl<S: PageSource> CrawlWorker<S> {
    pub fn new(
        retailer: &RetailerConfig,
        data_dir: &Path,
        run_date: &str,
        source: S,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let out_dir = retailer.output_dir(data_dir);
        CrawlWorker {
            retailer: retailer.id.clone(),
            source,
            checkpoints: CheckpointManager::new(
                retailer.id.clone(),
                &out_dir,
                &retailer.plan_file(data_dir),
                run_date,
            ),
            listing_log: io::listing_log_path(&out_dir, &retailer.id, run_date),
            page_delay: Duration::from_millis(config::PAGE_DELAY_MILLIS),
            shutdown,
        }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn listing_log(&self) -> &Path {
        &self.listing_log
    }

    /// Runs until the plan is exhausted, a shutdown is requested, or listings can no longer be
    /// persisted. Anything short of completion leaves a checkpoint behind.
    pub async fn run(mut self) -> AppResult<CrawlOutcome> {
        let mut traversal = self.checkpoints.open().await?;
        let mut outcome = CrawlOutcome::default();

        let result = self.traverse(&mut traversal, &mut outcome).await;

        match result {
            Ok(()) if !outcome.interrupted => {
                self.checkpoints.complete().await?;
                log_for(
                    LogLevel::Success,
                    &self.retailer,
                    &format!(
                        "Crawl finished: {} path(s), {} failed, {} page(s), {} listing(s)",
                        outcome.paths_completed,
                        outcome.paths_failed,
                        outcome.pages,
                        outcome.listings_written
                    ),
                );
                Ok(outcome)
            }
            Ok(()) => {
                outcome.checkpoint = Some(self.checkpoints.write_checkpoint(&traversal).await?);
                log_for(
                    LogLevel::Warning,
                    &self.retailer,
                    &format!(
                        "Crawl interrupted after {} path(s), {} listing(s) saved",
                        outcome.paths_completed, outcome.listings_written
                    ),
                );
                Ok(outcome)
            }
            Err(e) => {
                if let Err(ce) = self.checkpoints.write_checkpoint(&traversal).await {
                    log_for(
                        LogLevel::Error,
                        &self.retailer,
                        &format!("Checkpoint could not be written: {}", ce),
                    );
                }
                Err(e)
            }
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn traverse(
        &mut self,
        traversal: &mut Traversal,
        outcome: &mut CrawlOutcome,
    ) -> AppResult<()> {
        loop {
            if self.is_shutdown() {
                outcome.interrupted = true;
                return Ok(());
            }
            let Some(path) = traversal.next_path() else {
                return Ok(());
            };

            // a hard kill resumes from the start of this path
            if let Err(e) = self.checkpoints.write_checkpoint(traversal).await {
                log_for(
                    LogLevel::Warning,
                    &self.retailer,
                    &format!("Progress checkpoint failed: {}", e),
                );
            }

            match self.crawl_path(traversal, &path, outcome).await? {
                PathStatus::Done => {
                    outcome.paths_completed += 1;
                    traversal.finish_current();
                }
                PathStatus::Interrupted => {
                    outcome.interrupted = true;
                    return Ok(());
                }
                PathStatus::Failed(e) => {
                    log_for(
                        LogLevel::Error,
                        &self.retailer,
                        &format!("Path abandoned: {} ({})", path, e),
                    );
                    outcome.paths_failed += 1;
                    traversal.finish_current();
                }
            }
        }
    }

    async fn crawl_path(
        &mut self,
        traversal: &mut Traversal,
        path: &str,
        outcome: &mut CrawlOutcome,
    ) -> AppResult<PathStatus> {
        let mut current = path.to_string();
        let mut pending: Vec<Listing> = Vec::with_capacity(config::LISTING_BATCH_SIZE);

        loop {
            if self.is_shutdown() {
                self.flush(&mut pending, outcome).await?;
                return Ok(PathStatus::Interrupted);
            }

            let page = match self.source.fetch_page(&current).await {
                Ok(page) => page,
                Err(e) => {
                    self.flush(&mut pending, outcome).await?;
                    return Ok(PathStatus::Failed(e));
                }
            };
            outcome.pages += 1;

            for mut listing in page.listings {
                listing.retailer = self.retailer.clone();
                if listing.category.trim().is_empty() {
                    listing.category = page.category.clone();
                }
                pending.push(listing);
                if pending.len() >= config::LISTING_BATCH_SIZE {
                    self.flush(&mut pending, outcome).await?;
                }
            }

            match page.next {
                Some(next) => {
                    traversal.advance_in_flight(next.clone());
                    current = next;
                    self.pause().await;
                }
                None => {
                    self.flush(&mut pending, outcome).await?;
                    return Ok(PathStatus::Done);
                }
            }
        }
    }

    async fn flush(&self, pending: &mut Vec<Listing>, outcome: &mut CrawlOutcome) -> AppResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let written = io::append_listings(&self.listing_log, pending)
            .await
            .map_err(|e| {
                log_for(
                    LogLevel::Error,
                    &self.retailer,
                    &format!("Cannot append to {}: {}", self.listing_log.display(), e),
                );
                e
            })?;
        outcome.listings_written += written;
        pending.clear();
        Ok(())
    }

    async fn pause(&mut self) {
        if self.page_delay.is_zero() {
            return;
        }
        let delay = self.page_delay;
        tokio::select! {
            _ = sleep(delay) => {}
            changed = self.shutdown.changed() => {
                if changed.is_err() {
                    sleep(delay).await;
                }
            }
        }
    }
}
