//! Export request transport.
//!
//! Reconstructs the request the browser's "Export XML" popup would have made:
//! every status filter enabled, plain-text XML format, the tariff id bound
//! into the form, session cookies attached.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::models::TariffId;
use crate::rate_limit::RateLimiter;
use crate::session::SessionContext;

/// Status filters the export popup enables before exporting. Field names are
/// kept in one place so an operator can adjust them if the site changes.
const STATUS_FILTERS: &[&str] = &[
    "statusPending",
    "statusEffective",
    "statusSuspended",
    "statusAccepted",
    "statusRejected",
    "statusWithdrawn",
    "statusCancelled",
];

const FORMAT_FIELD: (&str, &str) = ("format", "plaintext");

/// Failure taxonomy for one export request.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network failure or non-2xx status; worth retrying.
    #[error("{0}")]
    Transient(String),
    /// The session is no longer accepted. Retrying per item is pointless;
    /// the whole run must stop.
    #[error("session rejected: {0}")]
    SessionRejected(String),
}

/// Seam between the download engine and the network, so retry policy is
/// testable with a fake transport.
#[async_trait]
pub trait ExportTransport: Send + Sync {
    /// Fetch the raw export body for one tariff id.
    async fn fetch_export(&self, id: &TariffId) -> Result<Vec<u8>, TransportError>;
}

/// Production transport: direct HTTP posts reusing the browser session.
pub struct HttpExportTransport {
    client: reqwest::Client,
    export_url: Url,
    referer: String,
    limiter: RateLimiter,
}

impl HttpExportTransport {
    pub fn new(
        session: &SessionContext,
        export_url: &str,
        timeout: Duration,
        limiter: RateLimiter,
    ) -> Result<Self> {
        Ok(Self {
            client: session.http_client(timeout)?,
            export_url: Url::parse(export_url)?,
            referer: session.origin.clone(),
            limiter,
        })
    }

    fn export_form(id: &TariffId) -> Vec<(String, String)> {
        let mut form = Vec::with_capacity(STATUS_FILTERS.len() + 2);
        form.push(("tariffId".to_string(), id.as_str().to_string()));
        form.push((FORMAT_FIELD.0.to_string(), FORMAT_FIELD.1.to_string()));
        for field in STATUS_FILTERS {
            form.push((field.to_string(), "on".to_string()));
        }
        form
    }
}

/// A redirect landing on a login page means the session has expired.
fn is_login_redirect(url: &Url) -> bool {
    url.path().to_ascii_lowercase().contains("login")
}

#[async_trait]
impl ExportTransport for HttpExportTransport {
    async fn fetch_export(&self, id: &TariffId) -> Result<Vec<u8>, TransportError> {
        self.limiter.acquire().await;

        let response = self
            .client
            .post(self.export_url.clone())
            .header("Referer", &self.referer)
            .form(&Self::export_form(id))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = response.status();
        let final_url = response.url().clone();

        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || is_login_redirect(&final_url)
        {
            return Err(TransportError::SessionRejected(format!(
                "HTTP {} at {}",
                status.as_u16(),
                final_url
            )));
        }

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
            self.limiter.report_rate_limit(status.as_u16()).await;
            return Err(TransportError::Transient(format!("HTTP {}", status)));
        }

        if !status.is_success() {
            return Err(TransportError::Transient(format!("HTTP {}", status)));
        }

        self.limiter.report_success().await;

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;
        Ok(body.to_vec())
    }
}
