pub mod constants;
pub mod paths;

pub use paths::PathService;

use std::env;
use std::path::PathBuf;

/// Read an environment variable as a trimmed path, treating empty as unset
pub fn env_path(name: &str) -> Option<PathBuf> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(expand_user(trimmed))
}

/// Read an environment variable as an integer, falling back on parse failure
pub fn env_int(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Expand a leading `~` into the user's home directory
pub fn expand_user(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(raw)
}
