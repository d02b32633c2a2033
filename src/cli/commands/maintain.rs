//! Maintenance loop command.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use tokio::sync::{mpsc, Mutex};

use crate::capture::CaptureService;
use crate::config::Settings;

use super::helpers::{command_source, open_pool};

/// Run the maintenance loop until Ctrl-C: periodic cleanup, top-ups, and
/// on-demand refreshes requested by the pool.
pub async fn cmd_maintain(settings: &Settings, interval_mins: Option<u64>) -> anyhow::Result<()> {
    let mut pool = open_pool(settings)?;
    let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
    pool.set_refresh_notifier(refresh_tx);
    let pool = Arc::new(Mutex::new(pool));

    let source = Arc::new(command_source(settings)?);
    let interval_mins = interval_mins.unwrap_or(settings.refresh_interval_mins);
    let interval = Duration::from_secs(interval_mins * 60);

    let mut service = CaptureService::new(
        source,
        pool.clone(),
        settings.regions.clone(),
        settings.target_sessions_per_region,
        interval,
    );

    println!(
        "{} Maintaining {} (every {}m, target {} per region)",
        style("→").cyan(),
        settings.regions.join(", "),
        interval_mins,
        settings.target_sessions_per_region
    );
    println!("{}", style("  Press Ctrl+C to stop").dim());

    service.run(refresh_rx).await;

    let stats = service.stats();
    println!(
        "{} Stopped after {} capture{} ({} failed)",
        style("✓").green(),
        stats.attempted,
        if stats.attempted == 1 { "" } else { "s" },
        stats.failed
    );

    Ok(())
}
