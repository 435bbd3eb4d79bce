//! Crash-resumable traversal of a retailer's category tree.
//!
//! A traversal plan is a text file with one path per line. While a crawl runs, the
//! [`Traversal`] cursor counts the plan lines consumed and remembers the path in flight. On any
//! termination other than completion the [`CheckpointManager`] writes
//! `dying_gasp_<date>.txt`: the in-flight path first, then every plan line not yet consumed.
//! When that file exists for today it replaces the plan as the traversal source.

use crate::config;
use crate::error::{AppError, AppResult};
use crate::io;
use crate::logging::{log_for, LogLevel};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalSource {
    pub path: PathBuf,
    pub resumed: bool,
}

/// Cursor over a loaded plan. Lines are consumed strictly in order.
#[derive(Debug, Clone)]
pub struct Traversal {
    source: TraversalSource,
    lines: Vec<String>,
    consumed: usize,
    in_flight: Option<String>,
}

impl Traversal {
    pub fn from_lines(source: TraversalSource, lines: Vec<String>) -> Self {
        Traversal {
            source,
            lines,
            consumed: 0,
            in_flight: None,
        }
    }

    pub fn source(&self) -> &TraversalSource {
        &self.source
    }

    /// Next non-blank path; it becomes the in-flight path. Blank lines are consumed silently.
    pub fn next_path(&mut self) -> Option<String> {
        while self.consumed < self.lines.len() {
            let line = self.lines[self.consumed].trim().to_string();
            self.consumed += 1;
            if !line.is_empty() {
                self.in_flight = Some(line.clone());
                return Some(line);
            }
        }
        None
    }

    /// Moves the in-flight marker within the current path (e.g. to the next listing page).
    pub fn advance_in_flight<S: Into<String>>(&mut self, path: S) {
        self.in_flight = Some(path.into());
    }

    /// The current path is done; nothing is in flight until the next one starts.
    pub fn finish_current(&mut self) {
        self.in_flight = None;
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn is_exhausted(&self) -> bool {
        self.lines[self.consumed..]
            .iter()
            .all(|l| l.trim().is_empty())
    }

    fn snapshot_remaining(&self) -> Vec<String> {
        self.lines[self.consumed..].to_vec()
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    retailer: String,
    dir: PathBuf,
    plan_path: PathBuf,
    run_date: String,
}

impl CheckpointManager {
    pub fn new<S: Into<String>>(retailer: S, dir: &Path, plan_path: &Path, run_date: &str) -> Self {
        CheckpointManager {
            retailer: retailer.into(),
            dir: dir.to_path_buf(),
            plan_path: plan_path.to_path_buf(),
            run_date: run_date.to_string(),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{}.txt", config::CHECKPOINT_PREFIX, self.run_date))
    }

    /// Today's checkpoint if one exists, otherwise the full plan.
    pub async fn resolve_source(&self) -> TraversalSource {
        let checkpoint = self.checkpoint_path();
        if fs::try_exists(&checkpoint).await.unwrap_or(false) {
            log_for(
                LogLevel::Warning,
                &self.retailer,
                &format!(
                    "Checkpoint detected, resuming from last known path ({})",
                    checkpoint.display()
                ),
            );
            TraversalSource {
                path: checkpoint,
                resumed: true,
            }
        } else {
            log_for(
                LogLevel::Info,
                &self.retailer,
                &format!(
                    "No checkpoint, starting from plan {}",
                    self.plan_path.display()
                ),
            );
            TraversalSource {
                path: self.plan_path.clone(),
                resumed: false,
            }
        }
    }

    pub async fn open(&self) -> AppResult<Traversal> {
        let source = self.resolve_source().await;
        let content = fs::read_to_string(&source.path).await.map_err(|e| {
            AppError::Checkpoint(format!(
                "cannot read traversal source '{}': {}",
                source.path.display(),
                e
            ))
        })?;
        let lines = content.lines().map(str::to_string).collect();
        Ok(Traversal::from_lines(source, lines))
    }

    /// Re-reads the plan and skips exactly `consumed` lines to find what is left.
    ///
    /// If the file no longer agrees with what was loaded (it was replaced mid-run), the loaded
    /// copy is used instead so the offset cannot silently point into a different plan.
    async fn remaining_lines(&self, traversal: &Traversal) -> Vec<String> {
        let consumed = traversal.consumed();
        // a resumed source is our own checkpoint, which progress writes have since replaced
        if traversal.source().resumed {
            return traversal.snapshot_remaining();
        }
        match fs::read_to_string(&traversal.source().path).await {
            Ok(content) => {
                let current: Vec<&str> = content.lines().collect();
                let agrees = current.len() >= consumed
                    && current[..consumed]
                        .iter()
                        .zip(&traversal.lines[..consumed])
                        .all(|(a, b)| a == b);
                if agrees {
                    return current[consumed..].iter().map(|s| s.to_string()).collect();
                }
                log_for(
                    LogLevel::Warning,
                    &self.retailer,
                    &format!(
                        "Traversal source '{}' changed during the run; checkpointing from the loaded plan",
                        traversal.source().path.display()
                    ),
                );
            }
            Err(e) => {
                log_for(
                    LogLevel::Warning,
                    &self.retailer,
                    &format!(
                        "Cannot re-read '{}' ({}); checkpointing from the loaded plan",
                        traversal.source().path.display(),
                        e
                    ),
                );
            }
        }
        traversal.snapshot_remaining()
    }

    /// Writes the checkpoint atomically: temp file first, then rename over today's checkpoint.
    pub async fn write_checkpoint(&self, traversal: &Traversal) -> AppResult<PathBuf> {
        let mut body = String::new();
        if let Some(path) = traversal.in_flight() {
            body.push_str(path);
            body.push('\n');
        }
        for line in self.remaining_lines(traversal).await {
            let line = line.trim();
            if !line.is_empty() {
                body.push_str(line);
                body.push('\n');
            }
        }

        let path = self.checkpoint_path();
        io::write_atomic(&path, body.as_bytes())
            .await
            .map_err(|e| AppError::Checkpoint(format!("{} ({})", e, path.display())))?;
        log_for(
            LogLevel::Warning,
            &self.retailer,
            &format!(
                "Checkpoint written to {} (in flight: {})",
                path.display(),
                traversal.in_flight().unwrap_or("-")
            ),
        );
        Ok(path)
    }

    /// Normal completion: drop today's checkpoint so the next run starts from the full plan.
    pub async fn complete(&self) -> AppResult<()> {
        let path = self.checkpoint_path();
        match fs::remove_file(&path).await {
            Ok(()) => {
                log_for(
                    LogLevel::Info,
                    &self.retailer,
                    &format!("Traversal complete, removed {}", path.display()),
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Checkpoint(format!(
                "cannot remove '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}
