//! Supervises one crawl process per retailer for a bounded wall-clock interval.
//!
//! Children are never force-killed: once the scrape interval is over they get a SIGINT and a
//! grace period to flush their listings and checkpoints. Anything still alive after that is
//! reported and left alone.

use crate::error::{AppError, AppResult};
use crate::logging::{log, log_for, LogLevel};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlCommand {
    pub retailer: String,
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Finished inside the scrape interval.
    Exited(Option<i32>),
    /// Stopped after the interrupt signal.
    Interrupted(Option<i32>),
    /// Ignored the interrupt past the grace period.
    StillRunning,
    FailedToStart(String),
}

impl ProcessStatus {
    pub fn is_failure(&self) -> bool {
        match self {
            ProcessStatus::Exited(code) | ProcessStatus::Interrupted(code) => {
                !matches!(code, Some(0))
            }
            ProcessStatus::StillRunning | ProcessStatus::FailedToStart(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub retailer: String,
    pub status: ProcessStatus,
}

struct Running {
    retailer: String,
    pid: Option<u32>,
    waiter: JoinHandle<std::io::Result<ExitStatus>>,
}

fn exit_code(res: Result<std::io::Result<ExitStatus>, tokio::task::JoinError>) -> Option<i32> {
    match res {
        Ok(Ok(status)) => status.code(),
        _ => None,
    }
}

fn spawn(cmd: &CrawlCommand) -> AppResult<Running> {
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .kill_on_drop(false)
        .spawn()
        .map_err(|e| AppError::process(&cmd.retailer, format!("spawn '{}': {}", cmd.program, e)))?;
    let pid = child.id();
    let waiter = tokio::spawn(async move { child.wait().await });
    Ok(Running {
        retailer: cmd.retailer.clone(),
        pid,
        waiter,
    })
}

#[cfg(unix)]
async fn send_interrupt(retailer: &str, pid: u32) {
    let sent = Command::new("kill")
        .arg("-INT")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .status()
        .await;
    match sent {
        Ok(status) if status.success() => {}
        Ok(status) => log_for(
            LogLevel::Warning,
            retailer,
            &format!("SIGINT to pid {} not delivered ({})", pid, status),
        ),
        Err(e) => log_for(
            LogLevel::Warning,
            retailer,
            &format!("Cannot signal pid {}: {}", pid, e),
        ),
    }
}

#[cfg(not(unix))]
async fn send_interrupt(retailer: &str, pid: u32) {
    log_for(
        LogLevel::Warning,
        retailer,
        &format!("Graceful interrupt unsupported on this platform (pid {})", pid),
    );
}

/// Starts every crawl, lets them run for `run_for`, interrupts survivors and waits `grace`.
pub async fn scrape_for_interval(
    commands: &[CrawlCommand],
    run_for: Duration,
    grace: Duration,
) -> Vec<ProcessOutcome> {
    let mut outcomes = Vec::with_capacity(commands.len());
    let mut running = Vec::with_capacity(commands.len());

    for cmd in commands {
        match spawn(cmd) {
            Ok(r) => {
                log_for(
                    LogLevel::Info,
                    &cmd.retailer,
                    &format!("Crawl started (pid {})", r.pid.map_or("?".into(), |p| p.to_string())),
                );
                running.push(r);
            }
            Err(e) => {
                log(LogLevel::Error, &e.to_string());
                outcomes.push(ProcessOutcome {
                    retailer: cmd.retailer.clone(),
                    status: ProcessStatus::FailedToStart(e.to_string()),
                });
            }
        }
    }

    let deadline = Instant::now() + run_for;
    let mut survivors = Vec::new();
    for mut r in running {
        match timeout_at(deadline, &mut r.waiter).await {
            Ok(res) => {
                let code = exit_code(res);
                log_for(
                    LogLevel::Info,
                    &r.retailer,
                    &format!("Crawl exited within the interval (code {:?})", code),
                );
                outcomes.push(ProcessOutcome {
                    retailer: r.retailer,
                    status: ProcessStatus::Exited(code),
                });
            }
            Err(_) => survivors.push(r),
        }
    }

    if survivors.is_empty() {
        return outcomes;
    }

    log(
        LogLevel::Step,
        &format!(
            "Scrape interval over, interrupting {} crawl(s)",
            survivors.len()
        ),
    );
    for r in &survivors {
        if let Some(pid) = r.pid {
            send_interrupt(&r.retailer, pid).await;
        }
    }

    let grace_deadline = Instant::now() + grace;
    for mut r in survivors {
        match timeout_at(grace_deadline, &mut r.waiter).await {
            Ok(res) => {
                let code = exit_code(res);
                log_for(
                    LogLevel::Info,
                    &r.retailer,
                    &format!("Crawl stopped after interrupt (code {:?})", code),
                );
                outcomes.push(ProcessOutcome {
                    retailer: r.retailer,
                    status: ProcessStatus::Interrupted(code),
                });
            }
            Err(_) => {
                log_for(
                    LogLevel::Warning,
                    &r.retailer,
                    &format!(
                        "Crawl (pid {:?}) still running after the grace period; leaving it",
                        r.pid
                    ),
                );
                outcomes.push(ProcessOutcome {
                    retailer: r.retailer,
                    status: ProcessStatus::StillRunning,
                });
            }
        }
    }
    outcomes
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(retailer: &str, script: &str) -> CrawlCommand {
        CrawlCommand {
            retailer: retailer.to_string(),
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    fn status_of<'a>(outcomes: &'a [ProcessOutcome], retailer: &str) -> &'a ProcessStatus {
        &outcomes
            .iter()
            .find(|o| o.retailer == retailer)
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn quick_crawls_exit_inside_the_interval() {
        let outcomes = scrape_for_interval(
            &[sh("a", "exit 0"), sh("b", "exit 3")],
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(status_of(&outcomes, "a"), &ProcessStatus::Exited(Some(0)));
        assert_eq!(status_of(&outcomes, "b"), &ProcessStatus::Exited(Some(3)));
        assert!(status_of(&outcomes, "b").is_failure());
    }

    #[tokio::test]
    async fn long_crawl_is_interrupted_gracefully() {
        let script = "trap 'exit 0' INT; while :; do sleep 0.05; done";
        let outcomes = scrape_for_interval(
            &[sh("slow", script)],
            Duration::from_millis(300),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(
            status_of(&outcomes, "slow"),
            &ProcessStatus::Interrupted(Some(0))
        );
    }

    #[tokio::test]
    async fn spawn_failure_does_not_stop_the_others() {
        let missing = CrawlCommand {
            retailer: "ghost".into(),
            program: "/nonexistent/crawler-binary".into(),
            args: Vec::new(),
        };
        let outcomes = scrape_for_interval(
            &[missing, sh("ok", "exit 0")],
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(
            status_of(&outcomes, "ghost"),
            ProcessStatus::FailedToStart(_)
        ));
        assert_eq!(status_of(&outcomes, "ok"), &ProcessStatus::Exited(Some(0)));
    }
}
