//! Configuration for the raw image importer.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default image store.
pub const DEFAULT_IMAGE_ROOT: &str = "/var/lib/machines";

/// Default cap on the decoded image size (8 GiB).
pub const DEFAULT_MAX_SIZE: u64 = 8 * 1024 * 1024 * 1024;

/// Importer configuration.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Directory holding committed artifacts and local copies.
    pub image_root: PathBuf,

    /// Maximum decoded image size in bytes.
    pub max_size: u64,

    /// Minimum time between two progress lines.
    pub progress_interval: Duration,

    /// `qemu-img` binary used for QCOW2 conversion.
    pub qemu_img: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines.
    pub log_json: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            image_root: PathBuf::from(DEFAULT_IMAGE_ROOT),
            max_size: DEFAULT_MAX_SIZE,
            progress_interval: Duration::from_secs(1),
            qemu_img: PathBuf::from("qemu-img"),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ImportConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let image_root = lookup("GHOST_IMAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.image_root);

        let max_size = parse_var(&lookup, "GHOST_IMPORT_MAX_SIZE")?.unwrap_or(defaults.max_size);

        let progress_interval = parse_var::<u64>(&lookup, "GHOST_IMPORT_PROGRESS_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.progress_interval);

        let qemu_img = lookup("GHOST_QEMU_IMG")
            .map(PathBuf::from)
            .unwrap_or(defaults.qemu_img);

        let log_level = lookup("GHOST_LOG_LEVEL").unwrap_or(defaults.log_level);

        let log_json = lookup("GHOST_LOG_JSON")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.log_json);

        Ok(Self {
            image_root,
            max_size,
            progress_interval,
            qemu_img,
            log_level,
            log_json,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .with_context(|| format!("invalid value for {key}: '{value}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ImportConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ImportConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.image_root, PathBuf::from("/var/lib/machines"));
        assert_eq!(config.max_size, 8 * 1024 * 1024 * 1024);
        assert_eq!(config.progress_interval, Duration::from_secs(1));
        assert!(!config.log_json);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("GHOST_IMAGE_ROOT", "/srv/images"),
            ("GHOST_IMPORT_MAX_SIZE", "1048576"),
            ("GHOST_IMPORT_PROGRESS_INTERVAL_MS", "250"),
            ("GHOST_QEMU_IMG", "/usr/local/bin/qemu-img"),
            ("GHOST_LOG_JSON", "true"),
        ])
        .unwrap();

        assert_eq!(config.image_root, PathBuf::from("/srv/images"));
        assert_eq!(config.max_size, 1_048_576);
        assert_eq!(config.progress_interval, Duration::from_millis(250));
        assert_eq!(config.qemu_img, PathBuf::from("/usr/local/bin/qemu-img"));
        assert!(config.log_json);
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let err = load(&[("GHOST_IMPORT_MAX_SIZE", "huge")]).unwrap_err();
        assert!(err.to_string().contains("GHOST_IMPORT_MAX_SIZE"));
    }
}
