//! Settings for a harvest run.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "etariff-harvest.toml";

/// Run configuration, loaded from a TOML file with per-field defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Grid "All Tariffs" view the walk starts from.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Endpoint the export form posts to.
    #[serde(default = "default_export_url")]
    pub export_url: String,

    /// Destination folder for downloaded XML files.
    #[serde(default = "default_dest_folder")]
    pub dest_folder: PathBuf,

    /// Safety bound on pages visited; grid sizes are not known reliably.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Retries per item after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Bounded wait for grid rows to render, in seconds.
    #[serde(default = "default_page_load_timeout_secs")]
    pub page_load_timeout_secs: u64,

    /// Per-request HTTP timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Minimum interval between outbound export requests.
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Base backoff between retry attempts for one item.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Run the browser in headless mode.
    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Also write logs to this file.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    "https://etariff.ferc.gov/TariffList.aspx".to_string()
}

fn default_export_url() -> String {
    "https://etariff.ferc.gov/TariffExport.aspx".to_string()
}

fn default_dest_folder() -> PathBuf {
    PathBuf::from("TariffXML")
}

fn default_max_pages() -> u32 {
    350
}

fn default_max_retries() -> u32 {
    3
}

fn default_page_load_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_request_delay_ms() -> u64 {
    500
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_headless() -> bool {
    true
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            export_url: default_export_url(),
            dest_folder: default_dest_folder(),
            max_pages: default_max_pages(),
            max_retries: default_max_retries(),
            page_load_timeout_secs: default_page_load_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            headless: default_headless(),
            window_width: default_window_width(),
            window_height: default_window_height(),
            log_file: None,
        }
    }
}

impl Settings {
    /// Load settings from an explicit path, or from `etariff-harvest.toml` in
    /// the working directory, falling back to defaults when neither exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let settings = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(settings)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Create the destination folder if it does not exist yet.
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.dest_folder).with_context(|| {
            format!(
                "Destination folder {} is not writable",
                self.dest_folder.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.dest_folder, PathBuf::from("TariffXML"));
        assert_eq!(settings.max_pages, 350);
        assert_eq!(settings.max_retries, 3);
        assert!(settings.headless);
        assert!(settings.log_file.is_none());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings.base_url, default_base_url());
        assert_eq!(settings.request_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_toml_overrides() {
        let settings: Settings = toml::from_str(
            r#"
            max_pages = 5
            dest_folder = "out"
            headless = false
            "#,
        )
        .unwrap();
        assert_eq!(settings.max_pages, 5);
        assert_eq!(settings.dest_folder, PathBuf::from("out"));
        assert!(!settings.headless);
        // Untouched fields keep their defaults
        assert_eq!(settings.max_retries, 3);
    }

    #[test]
    fn test_load_missing_explicit_file_errors() {
        let err = Settings::load(Some(Path::new("/nonexistent/harvest.toml")));
        assert!(err.is_err());
    }
}
