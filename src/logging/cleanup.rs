use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::sleep;

use super::config::LogConfig;

/// Background task that periodically cleans up old logs
///
/// Runs every hour and performs:
/// - Compression of rotated logs older than a day
/// - Deletion of archives older than the retention period
/// - Enforcement of the total disk space limit
pub async fn cleanup_task(log_dir: PathBuf, config: LogConfig) {
    loop {
        sleep(Duration::from_secs(3600)).await;

        if let Err(e) = perform_cleanup(&log_dir, &config) {
            tracing::error!(
                error = %e,
                log_dir = %log_dir.display(),
                "Log cleanup failed"
            );
        }
    }
}

/// Perform a single cleanup cycle
fn perform_cleanup(log_dir: &Path, config: &LogConfig) -> io::Result<()> {
    let archives_dir = log_dir.join("archives");
    fs::create_dir_all(&archives_dir)?;

    if config.compression_enabled {
        compress_old_logs(&archives_dir)?;
    }
    delete_old_logs(&archives_dir, config.retention_days)?;
    enforce_disk_limit(&archives_dir, config.max_total_size_mb)?;

    Ok(())
}

/// Compress uncompressed `.log` archives older than one day
fn compress_old_logs(archives_dir: &Path) -> io::Result<()> {
    let cutoff = SystemTime::now() - Duration::from_secs(86_400);

    for entry in fs::read_dir(archives_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().and_then(|s| s.to_str()) != Some("log") {
            continue;
        }
        if entry.metadata()?.modified()? >= cutoff {
            continue;
        }

        match compress_file(&path) {
            Ok(compressed) => {
                tracing::info!(
                    original = %path.display(),
                    compressed = %compressed.display(),
                    "Log file compressed"
                );
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to delete original log after compression");
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to compress log file");
            }
        }
    }

    Ok(())
}

/// Compress a single log file using gzip
fn compress_file(path: &Path) -> io::Result<PathBuf> {
    let compressed_path = path.with_extension("log.gz");

    let mut input = Vec::new();
    File::open(path)?.read_to_end(&mut input)?;

    let output = File::create(&compressed_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;

    Ok(compressed_path)
}

/// Delete archived files older than the retention period
fn delete_old_logs(archives_dir: &Path, retention_days: u32) -> io::Result<()> {
    let cutoff = SystemTime::now() - Duration::from_secs(u64::from(retention_days) * 86_400);
    let mut deleted = 0usize;

    for entry in fs::read_dir(archives_dir)? {
        let entry = entry?;
        if entry.metadata()?.modified()? < cutoff {
            match fs::remove_file(entry.path()) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to delete old log file");
                }
            }
        }
    }

    if deleted > 0 {
        tracing::info!(deleted_files = deleted, "Retention cleanup completed");
    }

    Ok(())
}

/// Enforce the total archive size limit by deleting oldest files first
fn enforce_disk_limit(archives_dir: &Path, max_size_mb: u64) -> io::Result<()> {
    let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    let mut total_size = 0u64;

    for entry in fs::read_dir(archives_dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            total_size += metadata.len();
            files.push((entry.path(), metadata.modified()?, metadata.len()));
        }
    }

    let max_size_bytes = max_size_mb * 1024 * 1024;
    if total_size <= max_size_bytes {
        return Ok(());
    }

    tracing::warn!(
        total_size_mb = total_size / (1024 * 1024),
        max_size_mb = max_size_mb,
        "Log directory exceeds size limit, deleting oldest files"
    );

    files.sort_by_key(|(_, modified, _)| *modified);

    for (path, _, size) in files {
        if total_size <= max_size_bytes {
            break;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                total_size -= size;
                tracing::info!(path = %path.display(), size_bytes = size, "Deleted old log to enforce disk limit");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete log file");
            }
        }
    }

    Ok(())
}
