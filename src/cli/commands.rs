//! Command implementations.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use tokio::sync::mpsc;
use tracing::info;

use super::progress::DownloadProgress;
use crate::browser::{GridBrowserConfig, TariffGridBrowser};
use crate::config::Settings;
use crate::download::{DownloadEngine, DownloadEvent, DownloadPolicy, DownloadRun};
use crate::models::{RunSummary, TariffId};
use crate::rate_limit::RateLimiter;
use crate::session::SessionContext;
use crate::transport::HttpExportTransport;
use crate::walker::{PaginationWalker, WalkOutcome, WalkTermination, WalkerConfig};

/// Walk the grid, then download everything that was found.
pub async fn cmd_harvest(settings: &Settings, show_progress: bool) -> Result<()> {
    let outcome = run_walk(settings).await?;

    if outcome.ids.is_empty() {
        println!("{} No export ids discovered", style("!").yellow());
        return Ok(());
    }

    let run = run_downloads(settings, &outcome.ids, &outcome.session, show_progress).await?;
    let summary = RunSummary::from_results(outcome.ids.len(), &run.results);
    print_summary(&summary, run.halted.as_deref());

    if run.halted.is_some() {
        anyhow::bail!("Run halted early; re-run to resume from the partial result");
    }
    Ok(())
}

/// Walk the grid only; persist the id list and session for a later download.
pub async fn cmd_discover(
    settings: &Settings,
    ids_file: &Path,
    session_file: &Path,
) -> Result<()> {
    let outcome = run_walk(settings).await?;

    let mut lines = String::with_capacity(outcome.ids.len() * 12);
    for id in &outcome.ids {
        lines.push_str(id.as_str());
        lines.push('\n');
    }
    fs::write(ids_file, lines)
        .with_context(|| format!("Failed to write id list {}", ids_file.display()))?;
    outcome.session.save(session_file)?;

    println!(
        "{} Wrote {} ids to {} and session to {}",
        style("✓").green(),
        outcome.ids.len(),
        ids_file.display(),
        session_file.display()
    );
    println!(
        "  {} Run 'etariff-harvest download' to fetch the exports",
        style("→").dim()
    );
    Ok(())
}

/// Download exports for a previously discovered id list.
pub async fn cmd_download(
    settings: &Settings,
    ids_file: &Path,
    session_file: &Path,
    show_progress: bool,
) -> Result<()> {
    let content = fs::read_to_string(ids_file)
        .with_context(|| format!("Failed to read id list {}", ids_file.display()))?;
    let ids: Vec<TariffId> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(TariffId::from)
        .collect();

    if ids.is_empty() {
        println!("{} Id list {} is empty", style("!").yellow(), ids_file.display());
        return Ok(());
    }

    let session = SessionContext::load(session_file)?;
    if session.is_empty() {
        println!(
            "{} Session file has no cookies; downloads may be rejected",
            style("!").yellow()
        );
    }

    let run = run_downloads(settings, &ids, &session, show_progress).await?;
    let summary = RunSummary::from_results(ids.len(), &run.results);
    print_summary(&summary, run.halted.as_deref());

    if run.halted.is_some() {
        anyhow::bail!("Run halted early; re-run 'etariff-harvest discover' to refresh the session");
    }
    Ok(())
}

async fn run_walk(settings: &Settings) -> Result<WalkOutcome> {
    println!(
        "{} Walking grid at {} (bound: {} pages)",
        style("→").cyan(),
        settings.base_url,
        settings.max_pages
    );

    let mut grid = TariffGridBrowser::new(GridBrowserConfig::from_settings(settings));
    let walker = PaginationWalker::new(
        &mut grid,
        WalkerConfig {
            max_pages: settings.max_pages,
            page_load_timeout: settings.page_load_timeout(),
        },
    );
    let outcome = walker.discover().await?;
    grid.close().await;

    let termination = match outcome.termination {
        WalkTermination::Exhausted => "grid exhausted".to_string(),
        WalkTermination::Stalled => "pagination stalled".to_string(),
        WalkTermination::SafetyBoundHit => format!("safety bound of {} pages", settings.max_pages),
        WalkTermination::NextControlFailed => "next-page control failed".to_string(),
    };
    println!(
        "{} Discovered {} export ids over {} pages ({})",
        style("✓").green(),
        outcome.ids.len(),
        outcome.pages_visited,
        termination
    );

    Ok(outcome)
}

async fn run_downloads(
    settings: &Settings,
    ids: &[TariffId],
    session: &SessionContext,
    show_progress: bool,
) -> Result<DownloadRun> {
    settings.ensure_directories()?;

    let limiter = RateLimiter::new(settings.request_delay());
    let transport = HttpExportTransport::new(
        session,
        &settings.export_url,
        settings.request_timeout(),
        limiter,
    )?;

    let engine = DownloadEngine::new(
        transport,
        settings.dest_folder.clone(),
        DownloadPolicy {
            max_retries: settings.max_retries,
            backoff: settings.retry_backoff(),
            min_body_bytes: 16,
        },
    );

    info!(
        "Downloading {} exports to {}",
        ids.len(),
        settings.dest_folder.display()
    );

    let (event_tx, mut event_rx) = mpsc::channel::<DownloadEvent>(100);
    let engine = engine.with_events(event_tx);

    // Event consumer is UI-only; the engine does not depend on it draining
    let display = if show_progress {
        Some(DownloadProgress::new(ids.len())?)
    } else {
        None
    };
    let event_handler = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Some(ref display) = display {
                display.handle(&event);
            }
        }
        if let Some(display) = display {
            display.finish();
        }
    });

    let run = engine.download_all(ids).await;
    // Drop the engine (and with it the event sender) so the handler drains
    drop(engine);
    let _ = event_handler.await;
    run
}

fn print_summary(summary: &RunSummary, halted: Option<&str>) {
    println!();
    println!(
        "{} {} discovered, {} downloaded, {} skipped, {} failed",
        style("Summary:").bold(),
        summary.discovered,
        style(summary.downloaded).green(),
        style(summary.skipped).dim(),
        if summary.failed > 0 {
            style(summary.failed).red()
        } else {
            style(summary.failed).dim()
        }
    );

    if !summary.failures.is_empty() {
        println!("{} Failed ids:", style("✗").red());
        for item in &summary.failures {
            println!("  {} {}", item.tariff_id, style(&item.error).dim());
        }
        println!(
            "  {} Re-run the same command to retry just the failures",
            style("→").dim()
        );
    }

    if let Some(reason) = halted {
        println!(
            "{} Session rejected mid-run: {}",
            style("✗").red(),
            reason
        );
    }
}
