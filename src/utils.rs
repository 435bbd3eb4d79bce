use crate::config;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Local, TimeZone};
use tokio::task;

pub async fn run_blocking<F, T>(func: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(func).await {
        Ok(Ok(res)) => Ok(res),
        Ok(Err(e)) => Err(e),
        Err(e) => Err(AppError::from(e)),
    }
}

pub async fn run_cpu_intensive<F, T>(func: F) -> AppResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match task::spawn_blocking(func).await {
        Ok(res) => Ok(res),
        Err(e) => Err(AppError::from(e)),
    }
}

/// `YYYY_MM_DD`, the key for per-day listing logs and checkpoints.
pub fn run_date<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(config::RUN_DATE_FORMAT).to_string()
}

/// Minute-granularity stamp used for price-history points.
pub fn history_timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(config::HISTORY_TIMESTAMP_FORMAT).to_string()
}

pub fn today() -> String {
    run_date(&Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn formats_match_scraper_output_files() {
        let at = Utc.with_ymd_and_hms(2025, 3, 2, 14, 5, 59).unwrap();
        assert_eq!(run_date(&at), "2025_03_02");
        assert_eq!(history_timestamp(&at), "2025_03_02_14_05");
    }
}
