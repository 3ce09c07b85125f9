//! Pagination walk over the tariff grid.
//!
//! Advances page by page, extracting export ids until the grid is exhausted,
//! the content stalls, or the safety bound is hit. The walker is generic over
//! [`GridSurface`] so the termination logic is testable without a browser.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::browser::GridSurface;
use crate::models::TariffId;
use crate::session::SessionContext;

/// Why the walk stopped. Every variant is a normal completion, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkTermination {
    /// Next-page control absent or disabled.
    Exhausted,
    /// Advancing no longer changes visible content.
    Stalled,
    /// `max_pages` visited; remaining pages were not walked.
    SafetyBoundHit,
    /// The next-page control failed repeatedly. Ids collected so far are
    /// returned, but this is not a clean end of grid.
    NextControlFailed,
}

/// Result of a completed walk. A partial id set is valid output.
#[derive(Debug)]
pub struct WalkOutcome {
    /// Export ids in discovery order (page order, row order), deduplicated.
    pub ids: Vec<TariffId>,
    /// Session captured from the browser at the moment the walk concluded.
    pub session: SessionContext,
    pub termination: WalkTermination,
    pub pages_visited: u32,
}

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Hard safety bound on pages visited.
    pub max_pages: u32,
    /// Bounded wait for a page's rows to render.
    pub page_load_timeout: Duration,
}

pub struct PaginationWalker<G> {
    grid: G,
    config: WalkerConfig,
}

impl<G: GridSurface> PaginationWalker<G> {
    pub fn new(grid: G, config: WalkerConfig) -> Self {
        Self { grid, config }
    }

    /// Walk the grid and collect every export id, returning the ids together
    /// with the session context for the download phase.
    pub async fn discover(mut self) -> Result<WalkOutcome> {
        self.grid.open_grid().await?;

        let mut ids: Vec<TariffId> = Vec::new();
        let mut seen: HashSet<TariffId> = HashSet::new();
        let mut prev_rows: Option<Vec<TariffId>> = None;
        let mut pages_visited = 0u32;
        let mut advance_failures = 0u32;

        let termination = loop {
            if pages_visited >= self.config.max_pages {
                warn!(
                    "Safety bound of {} pages reached, stopping walk",
                    self.config.max_pages
                );
                break WalkTermination::SafetyBoundHit;
            }
            pages_visited += 1;

            match self.read_page_with_retry().await {
                Some(rows) => {
                    // Identical content after an advance means the grid has
                    // run out of data; re-read once in case it was still
                    // settling, then call it a stall.
                    if prev_rows.as_deref() == Some(rows.as_slice()) {
                        debug!("Page {} content unchanged, re-reading once", pages_visited);
                        let again = self.read_page_with_retry().await;
                        if again.as_deref() == Some(rows.as_slice()) || again.is_none() {
                            info!("Pagination stalled after page {}", pages_visited);
                            break WalkTermination::Stalled;
                        }
                        let rows = again.unwrap_or_default();
                        Self::accumulate(&mut ids, &mut seen, &rows);
                        prev_rows = Some(rows);
                    } else {
                        Self::accumulate(&mut ids, &mut seen, &rows);
                        prev_rows = Some(rows);
                    }
                }
                None => {
                    warn!(
                        "Skipping page {} after repeated extraction failure",
                        pages_visited
                    );
                }
            }

            debug!(
                "Page {} done, {} ids collected so far",
                pages_visited,
                ids.len()
            );

            match self.grid.next_enabled().await {
                Ok(false) => {
                    info!("No next-page control after page {}", pages_visited);
                    break WalkTermination::Exhausted;
                }
                Ok(true) => {}
                Err(e) => {
                    advance_failures += 1;
                    warn!("Could not query next-page control: {}", e);
                    if advance_failures >= 2 {
                        break WalkTermination::NextControlFailed;
                    }
                    continue;
                }
            }

            if let Err(e) = self.grid.click_next().await {
                advance_failures += 1;
                warn!("Failed to advance to next page: {}", e);
                if advance_failures >= 2 {
                    break WalkTermination::NextControlFailed;
                }
            } else {
                advance_failures = 0;
            }
        };

        let session = self.grid.session_context().await?;
        info!(
            "Walk finished: {} ids over {} pages ({:?})",
            ids.len(),
            pages_visited,
            termination
        );

        Ok(WalkOutcome {
            ids,
            session,
            termination,
            pages_visited,
        })
    }

    /// Wait for and read the current page's rows, retrying once locally.
    /// Returns None when both attempts fail; the page is then skipped.
    async fn read_page_with_retry(&mut self) -> Option<Vec<TariffId>> {
        for attempt in 1..=2u32 {
            if let Err(e) = self.grid.wait_for_rows(self.config.page_load_timeout).await {
                warn!("Rows not ready (attempt {}): {}", attempt, e);
                continue;
            }
            match self.grid.read_export_ids().await {
                Ok(rows) => return Some(rows),
                Err(e) => warn!("Extraction failed (attempt {}): {}", attempt, e),
            }
        }
        None
    }

    /// Append newly-seen ids in first-seen order; already-collected ids are
    /// dropped silently (the grid may re-render with stale state).
    fn accumulate(ids: &mut Vec<TariffId>, seen: &mut HashSet<TariffId>, rows: &[TariffId]) {
        for id in rows {
            if seen.insert(id.clone()) {
                ids.push(id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;

    /// Scripted grid for exercising the walk without a browser.
    struct FakeGrid {
        pages: Vec<Vec<&'static str>>,
        pos: usize,
        /// Remaining read failures per page index.
        fail_reads: HashMap<usize, u32>,
        /// When true, click_next stops advancing past the last page while the
        /// next control still reports enabled (stall simulation).
        sticky_next: bool,
        /// When true, every click_next call errors.
        fail_clicks: bool,
        opened: bool,
    }

    impl FakeGrid {
        fn new(pages: Vec<Vec<&'static str>>) -> Self {
            Self {
                pages,
                pos: 0,
                fail_reads: HashMap::new(),
                sticky_next: false,
                fail_clicks: false,
                opened: false,
            }
        }
    }

    #[async_trait]
    impl GridSurface for FakeGrid {
        async fn open_grid(&mut self) -> Result<()> {
            self.opened = true;
            Ok(())
        }

        async fn wait_for_rows(&mut self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        async fn read_export_ids(&mut self) -> Result<Vec<TariffId>> {
            if let Some(remaining) = self.fail_reads.get_mut(&self.pos) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("stale element on page {}", self.pos);
                }
            }
            Ok(self.pages[self.pos].iter().map(|s| TariffId::from(*s)).collect())
        }

        async fn next_enabled(&mut self) -> Result<bool> {
            if self.sticky_next {
                return Ok(true);
            }
            Ok(self.pos + 1 < self.pages.len())
        }

        async fn click_next(&mut self) -> Result<()> {
            if self.fail_clicks {
                anyhow::bail!("click intercepted by overlay");
            }
            if self.pos + 1 < self.pages.len() {
                self.pos += 1;
            }
            Ok(())
        }

        async fn session_context(&mut self) -> Result<SessionContext> {
            Ok(SessionContext::new(
                Vec::new(),
                "https://example.test/TariffList.aspx",
            ))
        }
    }

    fn config(max_pages: u32) -> WalkerConfig {
        WalkerConfig {
            max_pages,
            page_load_timeout: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_three_page_walk_collects_in_order() {
        let grid = FakeGrid::new(vec![vec!["A", "B"], vec!["C", "D"], vec![]]);
        let outcome = PaginationWalker::new(grid, config(50)).discover().await.unwrap();

        let ids: Vec<&str> = outcome.ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert_eq!(outcome.termination, WalkTermination::Exhausted);
        assert_eq!(outcome.pages_visited, 3);
    }

    #[tokio::test]
    async fn test_stale_rerender_does_not_duplicate_ids() {
        // Second page re-renders with the first page's rows still present
        let grid = FakeGrid::new(vec![vec!["A", "B"], vec!["A", "B", "C"]]);
        let outcome = PaginationWalker::new(grid, config(50)).discover().await.unwrap();

        let ids: Vec<&str> = outcome.ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_identical_content_after_advance_stalls() {
        let mut grid = FakeGrid::new(vec![vec!["A", "B"], vec!["C", "D"]]);
        grid.sticky_next = true;
        let outcome = PaginationWalker::new(grid, config(50)).discover().await.unwrap();

        let ids: Vec<&str> = outcome.ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert_eq!(outcome.termination, WalkTermination::Stalled);
    }

    #[tokio::test]
    async fn test_safety_bound_respected() {
        let mut pages = Vec::new();
        for i in 0..10 {
            pages.push(vec![match i {
                0 => "p0",
                1 => "p1",
                2 => "p2",
                3 => "p3",
                _ => "px",
            }]);
        }
        let grid = FakeGrid::new(pages);
        let outcome = PaginationWalker::new(grid, config(3)).discover().await.unwrap();

        assert_eq!(outcome.pages_visited, 3);
        assert_eq!(outcome.termination, WalkTermination::SafetyBoundHit);
        let ids: Vec<&str> = outcome.ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["p0", "p1", "p2"]);
    }

    #[tokio::test]
    async fn test_single_page_failure_retried_locally() {
        let mut grid = FakeGrid::new(vec![vec!["A"], vec!["B"], vec!["C"]]);
        // Page 1 fails once; the local retry succeeds
        grid.fail_reads.insert(1, 1);
        let outcome = PaginationWalker::new(grid, config(50)).discover().await.unwrap();

        let ids: Vec<&str> = outcome.ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_persistent_page_failure_skips_page() {
        let mut grid = FakeGrid::new(vec![vec!["A"], vec!["B"], vec!["C"]]);
        // Page 1 fails both attempts; its ids are lost but the walk continues
        grid.fail_reads.insert(1, 2);
        let outcome = PaginationWalker::new(grid, config(50)).discover().await.unwrap();

        let ids: Vec<&str> = outcome.ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(outcome.termination, WalkTermination::Exhausted);
    }

    #[tokio::test]
    async fn test_failing_next_control_not_reported_as_exhaustion() {
        let mut grid = FakeGrid::new(vec![vec!["A"]]);
        // Rows never render and the next control cannot be clicked; the walk
        // must stop and say the advance failed, not that the grid ended
        grid.fail_reads.insert(0, 100);
        grid.sticky_next = true;
        grid.fail_clicks = true;
        let outcome = PaginationWalker::new(grid, config(50)).discover().await.unwrap();

        assert_eq!(outcome.termination, WalkTermination::NextControlFailed);
        assert!(outcome.ids.is_empty());
    }

    #[tokio::test]
    async fn test_discovery_is_idempotent() {
        let first = PaginationWalker::new(
            FakeGrid::new(vec![vec!["A", "B"], vec!["C"]]),
            config(50),
        )
        .discover()
        .await
        .unwrap();
        let second = PaginationWalker::new(
            FakeGrid::new(vec![vec!["A", "B"], vec!["C"]]),
            config(50),
        )
        .discover()
        .await
        .unwrap();

        assert_eq!(first.ids, second.ids);
    }
}
