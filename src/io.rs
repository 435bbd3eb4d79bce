use crate::config;
use crate::error::{AppError, AppResult};
use crate::logging::{log, LogLevel};
use crate::model::Listing;
use crate::utils;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

pub fn clean_filename<S: AsRef<str>>(name: S) -> String {
    let name_ref = name.as_ref().trim();
    if name_ref.is_empty() {
        return "invalid_empty_name".to_string();
    }

    let cleaned = config::FORBIDDEN_CHARS_RE.replace_all(name_ref, "_");
    let cleaned = config::WHITESPACE_RE.replace_all(&cleaned, "_");
    let cleaned = cleaned.trim_matches('_').to_lowercase();

    if cleaned.is_empty() {
        "invalid_or_empty_name".to_string()
    } else {
        cleaned
    }
}

pub(crate) fn map_io_error(error: std::io::Error, path: &Path) -> AppError {
    AppError::Io(format!("I/O error at path '{}': {}", path.display(), error))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `data` to `<path>.tmp`, syncs it, then renames over `path`.
pub fn write_atomic_blocking(path: &Path, data: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| map_io_error(e, parent))?;
    }
    let tmp = temp_sibling(path);
    {
        let mut file = std::fs::File::create(&tmp).map_err(|e| map_io_error(e, &tmp))?;
        file.write_all(data).map_err(|e| map_io_error(e, &tmp))?;
        file.sync_all().map_err(|e| map_io_error(e, &tmp))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        map_io_error(e, path)
    })
}

pub async fn write_atomic(path: &Path, data: &[u8]) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| map_io_error(e, parent))?;
    }
    let tmp = temp_sibling(path);
    {
        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| map_io_error(e, &tmp))?;
        file.write_all(data)
            .await
            .map_err(|e| map_io_error(e, &tmp))?;
        file.sync_all().await.map_err(|e| map_io_error(e, &tmp))?;
    }
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(map_io_error(e, path));
    }
    Ok(())
}

pub async fn save_json<T>(fpath: PathBuf, data: T, log_ctx: String) -> AppResult<()>
where
    T: Serialize + Send + Sync + 'static,
{
    let bytes =
        utils::run_blocking(move || serde_json::to_vec_pretty(&data).map_err(AppError::from))
            .await
            .map_err(|e| {
                log(
                    LogLevel::Error,
                    &format!(
                        "Save JSON ({}) FAIL - Serialize/Task Error: {}. File: '{}'",
                        log_ctx,
                        e,
                        fpath.display()
                    ),
                );
                e
            })?;

    write_atomic(&fpath, &bytes).await.map_err(|e| {
        log(
            LogLevel::Error,
            &format!(
                "Save JSON ({}) FAIL - Write Error: {}. File: '{}'",
                log_ctx,
                e,
                fpath.display()
            ),
        );
        e
    })
}

pub fn listing_log_path(output_dir: &Path, retailer: &str, run_date: &str) -> PathBuf {
    output_dir.join(format!(
        "{}_{}.{}",
        clean_filename(retailer),
        run_date,
        config::LISTING_LOG_EXT
    ))
}

/// Appends one batch as JSON lines and syncs it; earlier batches are never rewritten.
pub async fn append_listings(path: &Path, batch: &[Listing]) -> AppResult<usize> {
    if batch.is_empty() {
        return Ok(0);
    }
    let mut buf = Vec::with_capacity(batch.len() * 256);
    for listing in batch {
        serde_json::to_writer(&mut buf, listing)?;
        buf.push(b'\n');
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| map_io_error(e, parent))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| map_io_error(e, path))?;
    file.write_all(&buf)
        .await
        .map_err(|e| map_io_error(e, path))?;
    file.sync_data().await.map_err(|e| map_io_error(e, path))?;
    Ok(batch.len())
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingFileStats {
    pub read: usize,
    pub malformed: usize,
}

/// Decodes a listing file: JSON lines, or the legacy single array / single object layout.
pub fn parse_listing_file(content: &str) -> (Vec<Listing>, ListingFileStats) {
    let mut stats = ListingFileStats::default();
    let trimmed = content.trim_start();

    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            Ok(values) => {
                let listings = decode_values(values, &mut stats);
                return (listings, stats);
            }
            Err(e) => {
                log(
                    LogLevel::Warning,
                    &format!("Listing array could not be parsed: {}", e),
                );
                stats.malformed += 1;
                return (Vec::new(), stats);
            }
        }
    }

    if trimmed.starts_with('{') {
        if let Ok(single) = serde_json::from_str::<Listing>(trimmed) {
            stats.read += 1;
            return (vec![single], stats);
        }
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut listings = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Listing>(line) {
            Ok(listing) => {
                stats.read += 1;
                listings.push(listing);
            }
            // A torn final line is what an interrupted append leaves behind.
            Err(_) if idx + 1 == lines.len() && !content.ends_with('\n') => {
                log(
                    LogLevel::Warning,
                    "Ignoring incomplete trailing listing line.",
                );
            }
            Err(e) => {
                stats.malformed += 1;
                log(
                    LogLevel::Warning,
                    &format!("Skipping malformed listing on line {}: {}", idx + 1, e),
                );
            }
        }
    }
    (listings, stats)
}

fn decode_values(values: Vec<serde_json::Value>, stats: &mut ListingFileStats) -> Vec<Listing> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(idx, v)| match serde_json::from_value::<Listing>(v) {
            Ok(l) => {
                stats.read += 1;
                Some(l)
            }
            Err(e) => {
                stats.malformed += 1;
                log(
                    LogLevel::Warning,
                    &format!("Skipping malformed listing #{}: {}", idx, e),
                );
                None
            }
        })
        .collect()
}

pub async fn read_listing_file(path: &Path) -> AppResult<(Vec<Listing>, ListingFileStats)> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| map_io_error(e, path))?;
    utils::run_cpu_intensive(move || parse_listing_file(&content)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn cleans_retailer_names_for_paths() {
        assert_eq!(clean_filename(" Evo Mag "), "evo_mag");
        assert_eq!(clean_filename("a/b"), "a_b");
        assert_eq!(clean_filename("   "), "invalid_empty_name");
    }

    #[tokio::test]
    async fn appended_batches_accumulate() {
        let dir = TempDir::new().unwrap();
        let path = listing_log_path(dir.path(), "vexio", "2025_03_02");

        append_listings(&path, &[Listing::new("A1", "vexio", "Phones", 10.0)])
            .await
            .unwrap();
        append_listings(
            &path,
            &[
                Listing::new("A2", "vexio", "Phones", 11.0),
                Listing::new("A3", "vexio", "Phones", 12.0),
            ],
        )
        .await
        .unwrap();

        let (listings, stats) = read_listing_file(&path).await.unwrap();
        assert_eq!(stats.read, 3);
        let codes: Vec<&str> = listings.iter().map(|l| l.product_code.as_str()).collect();
        assert_eq!(codes, vec!["A1", "A2", "A3"]);
    }

    #[test]
    fn torn_trailing_line_is_ignored() {
        let content = "{\"product_code\":\"A1\",\"online_mag\":\"x\",\"price\":1}\n{\"product_code\":\"A2\",\"onl";
        let (listings, stats) = parse_listing_file(content);
        assert_eq!(listings.len(), 1);
        assert_eq!(stats.malformed, 0);
    }

    #[test]
    fn legacy_array_files_are_accepted() {
        let content = r#"[
            {"product_code":"A1","online_mag":"x","price":1},
            {"product_code":"A2","online_mag":"x"}
        ]"#;
        let (listings, stats) = parse_listing_file(content);
        assert_eq!(listings.len(), 1);
        assert_eq!(stats.malformed, 1);
    }

    #[tokio::test]
    async fn atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("out.json");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert!(!dir.path().join("nested").join("out.json.tmp").exists());
    }
}
