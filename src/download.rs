//! Download engine: one XML export per discovered tariff id.
//!
//! Sequential pass with per-item retry. Items fail independently; only a
//! rejected session or an unwritable destination stops the run. Separated
//! from UI concerns - emits events for progress tracking.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::models::{DownloadResult, TariffId};
use crate::storage;
use crate::transport::{ExportTransport, TransportError};

/// Retry/backoff policy for one run.
#[derive(Debug, Clone)]
pub struct DownloadPolicy {
    /// Retries per item after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts; grows linearly with the attempt number.
    pub backoff: Duration,
    /// Bodies smaller than this are treated as implausible.
    pub min_body_bytes: usize,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(1),
            min_body_bytes: 16,
        }
    }
}

/// Progress events consumed by the CLI layer.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Started { tariff_id: TariffId },
    Skipped { tariff_id: TariffId },
    Completed { tariff_id: TariffId, attempts: u32 },
    Failed { tariff_id: TariffId, error: String },
}

/// Outcome of a whole download pass.
#[derive(Debug)]
pub struct DownloadRun {
    /// One result per processed id, in input order.
    pub results: Vec<DownloadResult>,
    /// Set when the run stopped early on a fatal session error; ids after
    /// the failing one were not processed.
    pub halted: Option<String>,
}

/// Per-item attempt loop outcome, kept free of I/O so the retry policy is
/// testable with a fake transport.
enum ItemOutcome {
    Saved { body: Vec<u8>, attempts: u32 },
    Exhausted { attempts: u32, error: String },
    SessionExpired { attempts: u32, error: String },
}

pub struct DownloadEngine<T> {
    transport: T,
    dest: PathBuf,
    policy: DownloadPolicy,
    events: Option<mpsc::Sender<DownloadEvent>>,
}

impl<T: ExportTransport> DownloadEngine<T> {
    pub fn new(transport: T, dest: PathBuf, policy: DownloadPolicy) -> Self {
        Self {
            transport,
            dest,
            policy,
            events: None,
        }
    }

    /// Attach a progress event channel.
    pub fn with_events(mut self, tx: mpsc::Sender<DownloadEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Download every id, skipping files already present at the destination.
    /// Safe to re-run over a partially completed folder.
    pub async fn download_all(&self, ids: &[TariffId]) -> anyhow::Result<DownloadRun> {
        storage::ensure_dest(&self.dest)?;

        let mut results = Vec::with_capacity(ids.len());
        let mut halted = None;

        for id in ids {
            let path = storage::export_path(&self.dest, id);

            if path.exists() {
                debug!("Already downloaded {}, skipping", id);
                self.emit(DownloadEvent::Skipped {
                    tariff_id: id.clone(),
                })
                .await;
                results.push(DownloadResult::skipped(id.clone(), path));
                continue;
            }

            self.emit(DownloadEvent::Started {
                tariff_id: id.clone(),
            })
            .await;

            match self.fetch_with_retry(id).await {
                ItemOutcome::Saved { body, attempts } => {
                    // An unwritable destination is fatal; per-item absorption
                    // applies to network failures only.
                    storage::write_atomic(&path, &body)?;
                    info!("Saved {} ({} bytes, {} attempts)", id, body.len(), attempts);
                    self.emit(DownloadEvent::Completed {
                        tariff_id: id.clone(),
                        attempts,
                    })
                    .await;
                    results.push(DownloadResult::success(id.clone(), attempts, path));
                }
                ItemOutcome::Exhausted { attempts, error } => {
                    warn!("Giving up on {} after {} attempts: {}", id, attempts, error);
                    self.emit(DownloadEvent::Failed {
                        tariff_id: id.clone(),
                        error: error.clone(),
                    })
                    .await;
                    results.push(DownloadResult::failed(id.clone(), attempts, error));
                }
                ItemOutcome::SessionExpired { attempts, error } => {
                    self.emit(DownloadEvent::Failed {
                        tariff_id: id.clone(),
                        error: error.clone(),
                    })
                    .await;
                    results.push(DownloadResult::failed(id.clone(), attempts, error.clone()));
                    halted = Some(error);
                    break;
                }
            }
        }

        if let Some(ref error) = halted {
            warn!(
                "Run halted with {} of {} ids processed: {}",
                results.len(),
                ids.len(),
                error
            );
        }

        Ok(DownloadRun { results, halted })
    }

    async fn fetch_with_retry(&self, id: &TariffId) -> ItemOutcome {
        let max_attempts = self.policy.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.transport.fetch_export(id).await {
                Ok(body) => match validate_export(&body, self.policy.min_body_bytes) {
                    Ok(()) => {
                        return ItemOutcome::Saved {
                            body,
                            attempts: attempt,
                        }
                    }
                    Err(e) => {
                        debug!("Attempt {} for {} rejected: {}", attempt, id, e);
                        last_error = e;
                    }
                },
                Err(TransportError::SessionRejected(msg)) => {
                    return ItemOutcome::SessionExpired {
                        attempts: attempt,
                        error: msg,
                    };
                }
                Err(TransportError::Transient(msg)) => {
                    debug!("Attempt {} for {} failed: {}", attempt, id, msg);
                    last_error = msg;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.policy.backoff * attempt).await;
            }
        }

        ItemOutcome::Exhausted {
            attempts: max_attempts,
            error: last_error,
        }
    }

    async fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Check the body is plausibly an XML document. Failure is retryable, never
/// a silent success.
fn validate_export(body: &[u8], min_len: usize) -> Result<(), String> {
    if body.is_empty() {
        return Err("empty response body".to_string());
    }
    if body.len() < min_len {
        return Err(format!("response too small ({} bytes)", body.len()));
    }

    // Skip a UTF-8 BOM and leading whitespace before the document marker
    let mut rest = body.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(body);
    while let [b, tail @ ..] = rest {
        if b.is_ascii_whitespace() {
            rest = tail;
        } else {
            break;
        }
    }
    if rest.starts_with(b"<") {
        Ok(())
    } else {
        Err("response does not look like an XML document".to_string())
    }
}
