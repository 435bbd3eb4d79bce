use crate::logging::{log, LogLevel};
use std::collections::BTreeMap;
use std::time::Duration;

pub const PHASE_CRAWL: &str = "Crawl";
pub const PHASE_INGEST: &str = "Ingest Files";
pub const PHASE_UPSERT: &str = "Upsert";
pub const PHASE_STANDARDIZE: &str = "Standardize";
pub const PHASE_NOTIFY: &str = "Notify";

const PHASE_ORDER: [&str; 5] = [
    PHASE_CRAWL,
    PHASE_INGEST,
    PHASE_UPSERT,
    PHASE_STANDARDIZE,
    PHASE_NOTIFY,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub ok: usize,
    pub fail: usize,
    pub skip_or_empty: usize,
    pub total_tasks: usize,
}

impl PhaseStats {
    pub fn add_ok(&mut self) {
        self.ok += 1;
    }
    pub fn add_fail(&mut self) {
        self.fail += 1;
    }
    pub fn add_skip(&mut self) {
        self.skip_or_empty += 1;
    }
    pub fn set_total(&mut self, total: usize) {
        self.total_tasks = total;
    }
    pub fn get_processed(&self) -> usize {
        self.ok + self.fail + self.skip_or_empty
    }
}

pub type RunStats = BTreeMap<String, PhaseStats>;

pub fn initialize_stats() -> RunStats {
    PHASE_ORDER
        .iter()
        .map(|p| (p.to_string(), PhaseStats::default()))
        .collect()
}

pub fn phase<'a>(stats: &'a mut RunStats, name: &str) -> &'a mut PhaseStats {
    stats.entry(name.to_string()).or_default()
}

pub fn print_summary(stats: &RunStats, retailers: &[String], duration: Duration) {
    let sep = "=".repeat(60);
    let title = format!("Run Summary ({} Retailers)", retailers.len());
    println!("\n{}\n{:^60}\n{}", sep, title, sep);
    if !retailers.is_empty() {
        println!("Retailers:         {}", retailers.join(", "));
    }
    println!("Total Run Time:    {:.3?}", duration);
    println!("{}", "-".repeat(60));

    println!(
        "{:<17} {:<8} {:<12} {:<8} {:<8}",
        "Phase", "OK", "Skip/Empty", "Fail", "Total"
    );
    println!("{}", "-".repeat(60));

    for &name in &PHASE_ORDER {
        if let Some(s) = stats.get(name) {
            println!(
                "{:<17} {:<8} {:<12} {:<8} {:<8}",
                name, s.ok, s.skip_or_empty, s.fail, s.total_tasks
            );
        }
    }
    println!("{}", sep);

    log_overall_status(stats);

    let end_ts_str = chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string();
    log(
        LogLevel::Step,
        &format!("--- Run Finished at {} ---", end_ts_str),
    );
}

fn total_failures(stats: &RunStats) -> usize {
    stats.values().map(|s| s.fail).sum()
}

fn log_overall_status(stats: &RunStats) {
    let failures = total_failures(stats);
    if failures > 0 {
        let failed_phases: Vec<&str> = PHASE_ORDER
            .iter()
            .copied()
            .filter(|p| stats.get(*p).map_or(false, |s| s.fail > 0))
            .collect();
        log(
            LogLevel::Error,
            &format!(
                "Run completed with {} failed task(s) in: {}. Check logs.",
                failures,
                failed_phases.join(", ")
            ),
        );
    } else {
        log(LogLevel::Success, "Run completed successfully.");
    }
}

pub fn determine_exit_code(stats: &RunStats) -> i32 {
    if total_failures(stats) > 0 {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_failure_sets_exit_code() {
        let mut stats = initialize_stats();
        phase(&mut stats, PHASE_UPSERT).add_ok();
        phase(&mut stats, PHASE_CRAWL).add_skip();
        assert_eq!(determine_exit_code(&stats), 0);

        phase(&mut stats, PHASE_INGEST).add_fail();
        assert_eq!(determine_exit_code(&stats), 1);
        assert_eq!(stats[PHASE_INGEST].get_processed(), 1);
    }
}
