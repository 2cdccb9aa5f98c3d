use std::env;

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level filter for console output
    pub console_log_level: String,

    /// Log level filter for file output (default: "debug")
    pub file_log_level: String,

    /// Maximum log file size in MB before rotation (default: 50)
    pub max_size_mb: u64,

    /// Log retention in days (default: 30)
    pub retention_days: u32,

    /// Maximum total log directory size in MB (default: 1000)
    pub max_total_size_mb: u64,

    /// Enable log compression (default: true)
    pub compression_enabled: bool,

    /// Enable background cleanup task (default: true)
    pub enable_cleanup: bool,

    /// Slow request threshold in milliseconds (default: 5000)
    pub slow_request_threshold_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_log_level: "info".to_string(),
            file_log_level: "debug".to_string(),
            max_size_mb: 50,
            retention_days: 30,
            max_total_size_mb: 1000,
            compression_enabled: true,
            enable_cleanup: true,
            slow_request_threshold_ms: 5000,
        }
    }
}

impl LogConfig {
    /// Load logging configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.console_log_level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "mimika_server=info,hf_hub=warn".to_string());

        if let Ok(level) = env::var("MIMIKA_FILE_LOG_LEVEL") {
            config.file_log_level = level;
        }

        if let Ok(val) = env::var("LOG_MAX_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.max_size_mb = size;
            }
        }

        if let Ok(val) = env::var("LOG_RETENTION_DAYS") {
            if let Ok(days) = val.parse() {
                config.retention_days = days;
            }
        }

        if let Ok(val) = env::var("LOG_MAX_TOTAL_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.max_total_size_mb = size;
            }
        }

        if let Ok(val) = env::var("LOG_COMPRESSION") {
            config.compression_enabled = val.to_lowercase() == "true";
        }

        if let Ok(val) = env::var("LOG_ENABLE_CLEANUP") {
            config.enable_cleanup = val.to_lowercase() == "true";
        }

        if let Ok(val) = env::var("LOG_SLOW_REQUEST_THRESHOLD_MS") {
            if let Ok(threshold) = val.parse() {
                config.slow_request_threshold_ms = threshold;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.file_log_level, "debug");
        assert_eq!(config.max_size_mb, 50);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.max_total_size_mb, 1000);
        assert!(config.compression_enabled);
        assert!(config.enable_cleanup);
    }

    #[test]
    fn test_from_env_custom_values() {
        env::set_var("LOG_MAX_SIZE_MB", "100");
        env::set_var("LOG_RETENTION_DAYS", "60");
        env::set_var("LOG_COMPRESSION", "false");

        let config = LogConfig::from_env();
        assert_eq!(config.max_size_mb, 100);
        assert_eq!(config.retention_days, 60);
        assert!(!config.compression_enabled);

        env::remove_var("LOG_MAX_SIZE_MB");
        env::remove_var("LOG_RETENTION_DAYS");
        env::remove_var("LOG_COMPRESSION");
    }
}
