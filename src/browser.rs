//! Chromium-driven access to the paginated tariff grid.
//!
//! The pagination walker only sees the [`GridSurface`] trait; the production
//! implementation drives Chromium over CDP. Compile with the default
//! `browser` feature for the real driver.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Settings;
use crate::models::TariffId;
use crate::session::SessionContext;

/// Browser automation surface consumed by the pagination walker.
#[async_trait]
pub trait GridSurface: Send {
    /// Navigate to the grid's "All Tariffs" view.
    async fn open_grid(&mut self) -> Result<()>;

    /// Wait until grid rows are present. Bounded; errors on timeout.
    async fn wait_for_rows(&mut self, timeout: Duration) -> Result<()>;

    /// Export ids of the rows currently displayed, in row order.
    async fn read_export_ids(&mut self) -> Result<Vec<TariffId>>;

    /// Whether a usable next-page control is present.
    async fn next_enabled(&mut self) -> Result<bool>;

    /// Advance to the next page.
    async fn click_next(&mut self) -> Result<()>;

    /// Cookies of the authenticated browser session.
    async fn session_context(&mut self) -> Result<SessionContext>;
}

#[async_trait]
impl<G: GridSurface + ?Sized> GridSurface for &mut G {
    async fn open_grid(&mut self) -> Result<()> {
        (**self).open_grid().await
    }

    async fn wait_for_rows(&mut self, timeout: Duration) -> Result<()> {
        (**self).wait_for_rows(timeout).await
    }

    async fn read_export_ids(&mut self) -> Result<Vec<TariffId>> {
        (**self).read_export_ids().await
    }

    async fn next_enabled(&mut self) -> Result<bool> {
        (**self).next_enabled().await
    }

    async fn click_next(&mut self) -> Result<()> {
        (**self).click_next().await
    }

    async fn session_context(&mut self) -> Result<SessionContext> {
        (**self).session_context().await
    }
}

/// Configuration for the grid browser.
#[derive(Debug, Clone)]
pub struct GridBrowserConfig {
    pub base_url: String,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub page_load_timeout: Duration,
}

impl GridBrowserConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            headless: settings.headless,
            window_width: settings.window_width,
            window_height: settings.window_height,
            page_load_timeout: settings.page_load_timeout(),
        }
    }
}

/// Row selectors tried in order; the grid markup has varied over time.
#[cfg(feature = "browser")]
const ROW_SELECTORS: &[&str] = &[
    "#tariffGrid tr[data-export-id]",
    "table.tariff-list tr[data-export-id]",
    "tr[data-export-id]",
];

#[cfg(feature = "browser")]
const READ_IDS_SCRIPT: &str = r##"
(() => {
    const selectors = [
        "#tariffGrid tr[data-export-id]",
        "table.tariff-list tr[data-export-id]",
        "tr[data-export-id]",
    ];
    for (const sel of selectors) {
        const rows = document.querySelectorAll(sel);
        if (rows.length > 0) {
            return Array.from(rows)
                .map(r => r.getAttribute("data-export-id"))
                .filter(v => v && v.length > 0);
        }
    }
    return [];
})()
"##;

#[cfg(feature = "browser")]
const FIND_NEXT_SCRIPT: &str = r##"
(() => {
    const selectors = [
        "a[title='Next']",
        "a[aria-label='Next']",
        ".pagination .next a",
        "input[type='submit'][value='Next']",
    ];
    for (const sel of selectors) {
        const el = document.querySelector(sel);
        if (el) {
            const disabled = el.disabled
                || el.classList.contains("disabled")
                || el.getAttribute("aria-disabled") === "true";
            return disabled ? "disabled" : "enabled";
        }
    }
    return "absent";
})()
"##;

#[cfg(feature = "browser")]
const CLICK_NEXT_SCRIPT: &str = r##"
(() => {
    const selectors = [
        "a[title='Next']",
        "a[aria-label='Next']",
        ".pagination .next a",
        "input[type='submit'][value='Next']",
    ];
    for (const sel of selectors) {
        const el = document.querySelector(sel);
        if (el) {
            el.scrollIntoView(true);
            el.click();
            return true;
        }
    }
    return false;
})()
"##;

#[cfg(feature = "browser")]
mod chromium {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use anyhow::{anyhow, Context, Result};
    use async_trait::async_trait;
    use chromiumoxide::cdp::browser_protocol::network::{
        GetCookiesParams, SetUserAgentOverrideParams,
    };
    use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
    use chromiumoxide::{Browser, BrowserConfig, Page};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use tracing::{debug, info, warn};

    use super::{
        GridBrowserConfig, GridSurface, CLICK_NEXT_SCRIPT, FIND_NEXT_SCRIPT, READ_IDS_SCRIPT,
        ROW_SELECTORS,
    };
    use crate::models::TariffId;
    use crate::session::{SessionContext, SessionCookie, USER_AGENT};

    /// Grid driver backed by a Chromium instance over CDP.
    pub struct TariffGridBrowser {
        config: GridBrowserConfig,
        browser: Option<Arc<Mutex<Browser>>>,
        page: Option<Page>,
    }

    impl TariffGridBrowser {
        /// Common Chrome executable paths to check.
        const CHROME_PATHS: &'static [&'static str] = &[
            // Linux
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            // macOS
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            // Common install locations
            "/opt/google/chrome/google-chrome",
        ];

        pub fn new(config: GridBrowserConfig) -> Self {
            Self {
                config,
                browser: None,
                page: None,
            }
        }

        /// Find a Chrome executable.
        fn find_chrome() -> Result<std::path::PathBuf> {
            for path in Self::CHROME_PATHS {
                let p = std::path::Path::new(path);
                if p.exists() {
                    info!("Found Chrome at: {}", path);
                    return Ok(p.to_path_buf());
                }
            }

            for cmd in &[
                "google-chrome",
                "google-chrome-stable",
                "chromium",
                "chromium-browser",
            ] {
                if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                    if output.status.success() {
                        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                        if !path.is_empty() {
                            info!("Found Chrome in PATH: {}", path);
                            return Ok(std::path::PathBuf::from(path));
                        }
                    }
                }
            }

            Err(anyhow!(
                "Chrome/Chromium not found. Please install it:\n\
                 - Arch/Manjaro: sudo pacman -S chromium\n\
                 - Ubuntu/Debian: sudo apt install chromium-browser\n\
                 - Fedora: sudo dnf install chromium\n\
                 - Or download from: https://www.google.com/chrome/"
            ))
        }

        /// Launch the browser if not already running.
        async fn ensure_browser(&mut self) -> Result<()> {
            if self.browser.is_some() {
                return Ok(());
            }

            info!("Launching browser (headless={})", self.config.headless);

            let chrome_path = Self::find_chrome()?;

            let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

            // with_head means NOT headless, confusingly
            if !self.config.headless {
                builder = builder.with_head();
            }

            builder = builder
                .arg(format!(
                    "--window-size={},{}",
                    self.config.window_width, self.config.window_height
                ))
                .arg("--disable-blink-features=AutomationControlled")
                .arg("--disable-infobars")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--disable-background-networking")
                .arg("--disable-sync")
                .arg("--no-sandbox") // Often needed for headless in containers
                .arg("--disable-gpu");

            let config = builder
                .build()
                .map_err(|e| anyhow!("Failed to build browser config: {}", e))?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .context("Failed to launch browser")?;

            // Spawn handler task
            tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            self.browser = Some(Arc::new(Mutex::new(browser)));

            Ok(())
        }

        fn page(&self) -> Result<&Page> {
            self.page
                .as_ref()
                .ok_or_else(|| anyhow!("Grid not opened; call open_grid first"))
        }

        /// Close the browser.
        pub async fn close(&mut self) {
            self.page = None;
            self.browser = None;
        }
    }

    #[async_trait]
    impl GridSurface for TariffGridBrowser {
        async fn open_grid(&mut self) -> Result<()> {
            self.ensure_browser().await?;

            let browser = self.browser.as_ref().unwrap().lock().await;
            let page = browser.new_page("about:blank").await?;
            drop(browser);

            // Set the user agent before any navigation so the session the
            // download phase inherits is consistent end to end.
            page.execute(SetUserAgentOverrideParams::new(USER_AGENT.to_string()))
                .await?;

            info!("Navigating to {}", self.config.base_url);
            let nav_params = NavigateParams::builder()
                .url(self.config.base_url.clone())
                .build()
                .map_err(|e| anyhow!("Invalid URL: {}", e))?;
            page.execute(nav_params).await?;

            // Wait for the document rather than sleeping a fixed interval.
            let ready_script = r#"
                new Promise((resolve) => {
                    if (document.readyState === 'complete' || document.readyState === 'interactive') {
                        resolve(document.readyState);
                    } else {
                        document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
                        setTimeout(() => resolve('timeout'), 10000);
                    }
                })
            "#;
            match tokio::time::timeout(
                self.config.page_load_timeout,
                page.evaluate(ready_script.to_string()),
            )
            .await
            {
                Ok(Ok(result)) => {
                    let state: String = result
                        .into_value()
                        .unwrap_or_else(|_| "unknown".to_string());
                    debug!("Page ready state: {}", state);
                }
                Ok(Err(e)) => debug!("Could not check ready state: {}", e),
                Err(_) => warn!("Timeout waiting for page ready state"),
            }

            // Small settle delay for late-rendering grid scripts
            tokio::time::sleep(Duration::from_millis(500)).await;

            self.page = Some(page);
            Ok(())
        }

        async fn wait_for_rows(&mut self, timeout: Duration) -> Result<()> {
            let page = self.page()?;
            let deadline = Instant::now() + timeout;

            loop {
                for selector in ROW_SELECTORS {
                    if page.find_element(*selector).await.is_ok() {
                        return Ok(());
                    }
                }
                if Instant::now() >= deadline {
                    return Err(anyhow!(
                        "Timed out after {:?} waiting for grid rows",
                        timeout
                    ));
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }

        async fn read_export_ids(&mut self) -> Result<Vec<TariffId>> {
            let page = self.page()?;
            let raw: Vec<String> = page
                .evaluate(READ_IDS_SCRIPT.to_string())
                .await?
                .into_value()?;
            debug!("Extracted {} export ids from current page", raw.len());
            Ok(raw.into_iter().map(TariffId::new).collect())
        }

        async fn next_enabled(&mut self) -> Result<bool> {
            let page = self.page()?;
            let state: String = page
                .evaluate(FIND_NEXT_SCRIPT.to_string())
                .await?
                .into_value()?;
            Ok(state == "enabled")
        }

        async fn click_next(&mut self) -> Result<()> {
            let page = self.page()?;
            let clicked: bool = page
                .evaluate(CLICK_NEXT_SCRIPT.to_string())
                .await?
                .into_value()?;
            if !clicked {
                return Err(anyhow!("Next-page control not found"));
            }
            // Give the grid a moment to start re-rendering; wait_for_rows
            // bounds the rest.
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(())
        }

        async fn session_context(&mut self) -> Result<SessionContext> {
            let page = self.page()?;

            let cookie_params = GetCookiesParams::builder()
                .urls(vec![self.config.base_url.clone()])
                .build();
            let browser_cookies = match page.execute(cookie_params).await {
                Ok(result) => result.result.cookies,
                Err(e) => {
                    warn!(
                        "Failed to get cookies via CDP: {}, trying page.get_cookies()",
                        e
                    );
                    page.get_cookies().await.unwrap_or_default()
                }
            };
            debug!("Got {} cookies from browser", browser_cookies.len());

            let cookies: Vec<SessionCookie> = browser_cookies
                .iter()
                .map(|c| SessionCookie {
                    name: c.name.clone(),
                    value: c.value.clone(),
                    domain: c.domain.clone(),
                    path: c.path.clone(),
                    secure: c.secure,
                    http_only: c.http_only,
                })
                .collect();

            Ok(SessionContext::new(cookies, self.config.base_url.clone()))
        }
    }
}

#[cfg(feature = "browser")]
pub use chromium::TariffGridBrowser;

#[cfg(all(test, feature = "browser"))]
mod tests {
    use super::*;

    /// The in-page scripts embed CSS selectors with `#` fragments; make sure
    /// each snippet carries its full selector list and body.
    #[test]
    fn test_grid_scripts_are_complete() {
        for selector in ROW_SELECTORS {
            assert!(READ_IDS_SCRIPT.contains(selector));
        }
        assert!(READ_IDS_SCRIPT.trim_end().ends_with("})()"));
        assert!(FIND_NEXT_SCRIPT.trim_end().ends_with("})()"));
        assert!(CLICK_NEXT_SCRIPT.contains("el.click()"));
        assert!(CLICK_NEXT_SCRIPT.trim_end().ends_with("})()"));
    }
}

// Stub for when the browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct TariffGridBrowser {
    #[allow(dead_code)]
    config: GridBrowserConfig,
}

#[cfg(not(feature = "browser"))]
impl TariffGridBrowser {
    pub fn new(config: GridBrowserConfig) -> Self {
        Self { config }
    }

    pub async fn close(&mut self) {}
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl GridSurface for TariffGridBrowser {
    async fn open_grid(&mut self) -> Result<()> {
        Err(anyhow::anyhow!(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
        ))
    }

    async fn wait_for_rows(&mut self, _timeout: Duration) -> Result<()> {
        Err(anyhow::anyhow!("Browser support not compiled"))
    }

    async fn read_export_ids(&mut self) -> Result<Vec<TariffId>> {
        Err(anyhow::anyhow!("Browser support not compiled"))
    }

    async fn next_enabled(&mut self) -> Result<bool> {
        Err(anyhow::anyhow!("Browser support not compiled"))
    }

    async fn click_next(&mut self) -> Result<()> {
        Err(anyhow::anyhow!("Browser support not compiled"))
    }

    async fn session_context(&mut self) -> Result<SessionContext> {
        Err(anyhow::anyhow!("Browser support not compiled"))
    }
}
