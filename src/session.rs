//! Session handoff between the browser walk and the HTTP download phase.
//!
//! The cookies captured from the authenticated browser session are carried as
//! an explicit, immutable value object so the download engine can be tested
//! with a fabricated session and never shares mutable state with the walker.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};
use url::Url;

/// User agent presented by both the browser session and the HTTP client, so
/// direct downloads look like continuations of the same browsing session.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Cookie extracted from the browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
}

/// Authenticated state established by the browser walk.
///
/// Read-only once created; the download engine borrows it to build its HTTP
/// client and never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub cookies: Vec<SessionCookie>,
    /// Grid URL the session was established against; sent as the Referer.
    pub origin: String,
    pub user_agent: String,
}

impl SessionContext {
    pub fn new(cookies: Vec<SessionCookie>, origin: impl Into<String>) -> Self {
        Self {
            cookies,
            origin: origin.into(),
            user_agent: USER_AGENT.to_string(),
        }
    }

    /// Build an HTTP client whose cookie jar replays the browser session.
    pub fn http_client(&self, timeout: Duration) -> Result<reqwest::Client> {
        let jar = Jar::default();
        for cookie in &self.cookies {
            if cookie.name.is_empty() || cookie.domain.is_empty() {
                continue;
            }
            let cookie_str = format!(
                "{}={}; Domain={}; Path={}",
                cookie.name, cookie.value, cookie.domain, cookie.path
            );
            let host = cookie.domain.trim_start_matches('.');
            if let Ok(url) = Url::parse(&format!("https://{}/", host)) {
                jar.add_cookie_str(&cookie_str, &url);
            }
        }

        let client = reqwest::Client::builder()
            .cookie_provider(Arc::new(jar))
            .user_agent(&self.user_agent)
            .timeout(timeout)
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(client)
    }

    /// Persist the session to a JSON file so a later download-only run can
    /// reuse it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        let session = serde_json::from_str(&content)
            .with_context(|| format!("Invalid session file {}", path.display()))?;
        Ok(session)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionContext {
        SessionContext::new(
            vec![SessionCookie {
                name: "ASP.NET_SessionId".to_string(),
                value: "abc123".to_string(),
                domain: ".example.test".to_string(),
                path: "/".to_string(),
                secure: true,
                http_only: true,
            }],
            "https://example.test/TariffList.aspx",
        )
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let session = sample();
        session.save(&path).unwrap();

        let loaded = SessionContext::load(&path).unwrap();
        assert_eq!(loaded.cookies.len(), 1);
        assert_eq!(loaded.cookies[0].name, "ASP.NET_SessionId");
        assert_eq!(loaded.origin, session.origin);
        assert_eq!(loaded.user_agent, USER_AGENT);
    }

    #[test]
    fn test_http_client_builds_with_cookies() {
        let session = sample();
        assert!(!session.is_empty());
        session.http_client(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_empty_session_detected() {
        let session = SessionContext::new(Vec::new(), "https://example.test/");
        assert!(session.is_empty());
    }
}
