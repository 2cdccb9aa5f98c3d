use chrono::Local;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::constants::PROBE_TIMEOUT_SECS;
use crate::config::PathService;
use crate::error::{ApiError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    pub cpu_percent: f64,
    pub ram_used_gb: f64,
    pub ram_total_gb: f64,
    pub ram_percent: f64,
    pub gpu: Option<GpuStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GpuStats {
    pub name: String,
    pub memory_used_gb: f64,
    pub memory_total_gb: Option<f64>,
    pub memory_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderEntry {
    pub id: &'static str,
    pub label: &'static str,
    pub path: PathBuf,
}

/// Probe the accelerator in a subprocess so a broken driver can never take
/// the service down; the probe is capped at 3 seconds
pub async fn device_probe() -> String {
    let probe = tokio::time::timeout(
        Duration::from_secs(PROBE_TIMEOUT_SECS),
        tokio::process::Command::new("nvidia-smi")
            .arg("--list-gpus")
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .output(),
    )
    .await;

    match probe {
        Ok(Ok(output)) if output.status.success() && !output.stdout.is_empty() => {
            "CUDA (NVIDIA)".to_string()
        }
        _ => {
            if cfg!(target_os = "macos") {
                "Metal (Apple Silicon)".to_string()
            } else {
                "CPU".to_string()
            }
        }
    }
}

/// GPU memory stats via nvidia-smi, same timeout discipline as the probe
pub async fn gpu_stats() -> Option<GpuStats> {
    let output = tokio::time::timeout(
        Duration::from_secs(PROBE_TIMEOUT_SECS),
        tokio::process::Command::new("nvidia-smi")
            .args([
                "--query-gpu=name,memory.used,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout);
    let first = line.lines().next()?;
    let mut parts = first.split(',').map(str::trim);
    let name = parts.next()?.to_string();
    let used_mb: f64 = parts.next()?.parse().ok()?;
    let total_mb: f64 = parts.next()?.parse().ok()?;

    Some(GpuStats {
        name,
        memory_used_gb: round1(used_mb / 1024.0),
        memory_total_gb: Some(round1(total_mb / 1024.0)),
        memory_percent: (total_mb > 0.0).then(|| round1(used_mb / total_mb * 100.0)),
    })
}

/// CPU/RAM snapshot; blocking because sysinfo samples over a short window
pub fn resource_stats() -> ResourceStats {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    // Two samples separated by the minimum interval give a real usage figure
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let gb = 1024.0 * 1024.0 * 1024.0;
    let used = sys.used_memory() as f64 / gb;
    let total = sys.total_memory() as f64 / gb;

    ResourceStats {
        cpu_percent: round1(f64::from(sys.global_cpu_usage())),
        ram_used_gb: round1(used),
        ram_total_gb: round1(total),
        ram_percent: if total > 0.0 {
            round1(used / total * 100.0)
        } else {
            0.0
        },
        gpu: None,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// The labelled runtime folders surfaced in Settings
pub fn folders(paths: &PathService) -> Vec<FolderEntry> {
    let mut entries = Vec::new();
    if let Some(home) = dirs::home_dir() {
        entries.push(FolderEntry {
            id: "user_home",
            label: "User Home",
            path: home,
        });
    }
    entries.extend([
        FolderEntry {
            id: "runtime_home",
            label: "Mimika User Folder",
            path: paths.runtime_home().to_path_buf(),
        },
        FolderEntry {
            id: "runtime_data",
            label: "Mimika Data Folder",
            path: paths.data_dir().to_path_buf(),
        },
        FolderEntry {
            id: "output",
            label: "Generated Audio Folder",
            path: paths.outputs_dir(),
        },
        FolderEntry {
            id: "logs",
            label: "Log Folder",
            path: paths.log_dir().to_path_buf(),
        },
        FolderEntry {
            id: "default_voices",
            label: "Default Voices",
            path: paths.sample_voices_dir(),
        },
        FolderEntry {
            id: "user_cloner_voices",
            label: "Your Voice Clones",
            path: paths.user_voices_dir(),
        },
    ]);
    entries
}

/// Known log files ordered oldest to newest by mtime
fn collect_log_sources(log_dir: &Path) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Ok(entries) = std::fs::read_dir(log_dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            // Daily rotation produces backend_api.log.YYYY-MM-DD and
            // access.log.YYYY-MM-DD; compressed archives are skipped
            if (name.starts_with("backend_api.log") || name.starts_with("access.log"))
                && !name.ends_with(".gz")
                && path.is_file()
            {
                candidates.push(path);
            }
        }
    }

    let legacy = PathBuf::from("/tmp/mimikastudio-backend.log");
    if legacy.is_file() {
        candidates.push(legacy);
    }

    candidates.sort_by_key(|p| {
        std::fs::metadata(p)
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });
    candidates
}

/// Merge tail lines across every known log file, labelled by source
///
/// The cap is clamped to 50..=5000 per call.
pub fn read_log_tail(log_dir: &Path, max_lines: usize) -> (Vec<String>, Vec<String>) {
    let limit = max_lines.clamp(50, 5000);
    let mut merged: VecDeque<String> = VecDeque::with_capacity(limit);
    let mut sources = Vec::new();

    for source in collect_log_sources(log_dir) {
        let label = source
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("log")
            .to_string();
        sources.push(source.display().to_string());

        let Ok(content) = std::fs::read_to_string(&source) else {
            continue;
        };
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if merged.len() == limit {
                merged.pop_front();
            }
            merged.push_back(format!("[{}] {}", label, line));
        }
    }

    (merged.into_iter().collect(), sources)
}

/// Render the merged log tail as a downloadable text file
pub fn export_log_text(log_dir: &Path, max_lines: usize) -> Result<(String, Vec<u8>)> {
    let (lines, sources) = read_log_tail(log_dir, max_lines);
    if lines.is_empty() {
        return Err(ApiError::NotFound("No system logs available".to_string()));
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let mut body = String::new();
    body.push_str("MimikaStudio System Logs\n");
    body.push_str(&format!("Generated: {}\n", Local::now().to_rfc3339()));
    if !sources.is_empty() {
        body.push_str("Sources:\n");
        for source in &sources {
            body.push_str(&format!("- {}\n", source));
        }
    }
    body.push('\n');
    body.push_str(&lines.join("\n"));
    body.push('\n');

    Ok((
        format!("mimika_system_logs_{}.log", timestamp),
        body.into_bytes(),
    ))
}

/// Bundle every log file into an in-memory zip
///
/// Built and served from memory, so nothing temporary can outlive the
/// response. `not_found` when there is nothing to bundle.
pub fn build_diagnostics_zip(log_dir: &Path) -> Result<(String, Vec<u8>)> {
    use zip::write::SimpleFileOptions;

    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut archive = zip::ZipWriter::new(&mut cursor);
    let options = SimpleFileOptions::default();
    let mut file_count = 0usize;

    archive
        .start_file("metadata.txt", options)
        .map_err(|e| ApiError::Internal(format!("zip write failed: {}", e)))?;
    archive.write_all(
        format!(
            "MimikaStudio Diagnostics Bundle\nGenerated: {}\nVersion: {}\n",
            Local::now().to_rfc3339(),
            env!("CARGO_PKG_VERSION"),
        )
        .as_bytes(),
    )?;

    let mut stack = vec![(log_dir.to_path_buf(), String::from("logs"))];
    while let Some((dir, prefix)) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        paths.sort();
        for path in paths {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if path.is_dir() {
                stack.push((path.clone(), format!("{}/{}", prefix, name)));
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else {
                continue;
            };
            archive
                .start_file(format!("{}/{}", prefix, name), options)
                .map_err(|e| ApiError::Internal(format!("zip write failed: {}", e)))?;
            archive.write_all(&bytes)?;
            file_count += 1;
        }
    }

    if file_count == 0 {
        return Err(ApiError::NotFound(
            "No diagnostic logs found to export".to_string(),
        ));
    }

    archive
        .finish()
        .map_err(|e| ApiError::Internal(format!("zip finalize failed: {}", e)))?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    Ok((
        format!("mimika_diagnostics_{}.zip", timestamp),
        cursor.into_inner(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resource_stats_sane() {
        let stats = resource_stats();
        assert!(stats.cpu_percent >= 0.0);
        assert!(stats.ram_total_gb > 0.0);
        assert!(stats.ram_used_gb <= stats.ram_total_gb + 0.1);
        assert!(stats.ram_percent >= 0.0 && stats.ram_percent <= 100.0);
    }

    #[tokio::test]
    async fn test_device_probe_never_panics() {
        // With or without a GPU this must complete inside the timeout
        let device = device_probe().await;
        assert!(!device.is_empty());
    }

    #[test]
    fn test_log_tail_merges_with_labels() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("backend_api.log.2026-08-01"),
            "line one\nline two\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("access.log.2026-08-01"), "access line\n").unwrap();

        let (lines, sources) = read_log_tail(temp.path(), 500);
        assert_eq!(sources.len(), 2);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().any(|l| l.starts_with("[backend_api.log")));
        assert!(lines.iter().any(|l| l.starts_with("[access.log")));
    }

    #[test]
    fn test_log_tail_cap_clamped() {
        let temp = TempDir::new().unwrap();
        let big: String = (0..200).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(temp.path().join("backend_api.log"), big).unwrap();

        // Requested 1 clamps up to 50
        let (lines, _) = read_log_tail(temp.path(), 1);
        assert_eq!(lines.len(), 50);
        // Tail keeps the newest lines
        assert!(lines.last().unwrap().contains("line 199"));
    }

    #[test]
    fn test_diagnostics_zip_requires_logs() {
        let temp = TempDir::new().unwrap();
        let err = build_diagnostics_zip(temp.path()).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn test_diagnostics_zip_bundles_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("backend_api.log"), "hello\n").unwrap();

        let (name, bytes) = build_diagnostics_zip(temp.path()).unwrap();
        assert!(name.starts_with("mimika_diagnostics_"));
        assert!(name.ends_with(".zip"));
        // Zip local-file signature
        assert_eq!(&bytes[..4], b"PK\x03\x04");
    }

    #[test]
    fn test_export_log_text() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("backend_api.log"), "entry\n").unwrap();

        let (name, bytes) = export_log_text(temp.path(), 100).unwrap();
        assert!(name.ends_with(".log"));
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("entry"));
        assert!(text.contains("Sources:"));
    }
}
