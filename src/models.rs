//! Core data model for a harvest run.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identifier a grid row's export action is bound to.
///
/// Opaque and website-defined; created during page extraction and consumed
/// exactly once by the download engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TariffId(String);

impl TariffId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TariffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TariffId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Terminal outcome for one tariff id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Export fetched, validated and written to the destination folder.
    Success,
    /// A file for this id already existed; no network work performed.
    Skipped,
    /// All attempts exhausted (or the run halted on this item).
    Failed,
}

/// Per-id outcome record. Created once, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub tariff_id: TariffId,
    pub status: DownloadStatus,
    /// Number of export requests issued for this id (0 when skipped).
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DownloadResult {
    pub fn success(tariff_id: TariffId, attempts: u32, saved_path: PathBuf) -> Self {
        Self {
            tariff_id,
            status: DownloadStatus::Success,
            attempts,
            saved_path: Some(saved_path),
            error: None,
        }
    }

    pub fn skipped(tariff_id: TariffId, existing_path: PathBuf) -> Self {
        Self {
            tariff_id,
            status: DownloadStatus::Skipped,
            attempts: 0,
            saved_path: Some(existing_path),
            error: None,
        }
    }

    pub fn failed(tariff_id: TariffId, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            tariff_id,
            status: DownloadStatus::Failed,
            attempts,
            saved_path: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }
}

/// One failed id with enough detail for an operator to retry it manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItem {
    pub tariff_id: TariffId,
    pub error: String,
}

/// Counts and itemized failures for a whole run.
///
/// Always produced, even when the run stopped early.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<FailedItem>,
}

impl RunSummary {
    pub fn from_results(discovered: usize, results: &[DownloadResult]) -> Self {
        let mut summary = Self {
            discovered,
            ..Self::default()
        };
        for result in results {
            match result.status {
                DownloadStatus::Success => summary.downloaded += 1,
                DownloadStatus::Skipped => summary.skipped += 1,
                DownloadStatus::Failed => {
                    summary.failed += 1;
                    summary.failures.push(FailedItem {
                        tariff_id: result.tariff_id.clone(),
                        error: result
                            .error
                            .clone()
                            .unwrap_or_else(|| "unknown error".to_string()),
                    });
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let results = vec![
            DownloadResult::success("1".into(), 1, PathBuf::from("a.xml")),
            DownloadResult::skipped("2".into(), PathBuf::from("b.xml")),
            DownloadResult::failed("3".into(), 4, "HTTP 500"),
        ];
        let summary = RunSummary::from_results(5, &results);
        assert_eq!(summary.discovered, 5);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures[0].tariff_id.as_str(), "3");
        assert_eq!(summary.failures[0].error, "HTTP 500");
    }

    #[test]
    fn test_skipped_has_zero_attempts() {
        let result = DownloadResult::skipped("7".into(), PathBuf::from("c.xml"));
        assert_eq!(result.attempts, 0);
        assert_eq!(result.status, DownloadStatus::Skipped);
    }
}
