//! Capture command: top regions up to their target session count.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;

use crate::capture::CaptureService;
use crate::config::Settings;

use super::helpers::{command_source, open_pool};

/// Capture sessions for the given regions (all configured regions if empty).
pub async fn cmd_capture(
    settings: &Settings,
    regions: &[String],
    count: Option<usize>,
) -> anyhow::Result<()> {
    let pool = Arc::new(Mutex::new(open_pool(settings)?));
    let source = Arc::new(command_source(settings)?);

    let regions: Vec<String> = if regions.is_empty() {
        settings.regions.clone()
    } else {
        regions.to_vec()
    };
    let target = count.unwrap_or(settings.target_sessions_per_region);

    let mut service = CaptureService::new(
        source,
        pool.clone(),
        regions.clone(),
        target,
        settings.refresh_interval(),
    );

    for region in &regions {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        pb.set_message(format!("Capturing sessions for {}...", region));
        pb.enable_steady_tick(Duration::from_millis(100));

        let created = service.refresh_region(region).await?;

        pb.finish_and_clear();
        let healthy = pool.lock().await.healthy_count(region)?;
        println!(
            "{} {}: {} healthy session{} ({} new)",
            style("✓").green(),
            region,
            healthy,
            if healthy == 1 { "" } else { "s" },
            created
        );
    }

    let stats = service.stats();
    if stats.failed > 0 {
        println!(
            "{} {} of {} capture attempts failed (see logs)",
            style("!").yellow(),
            stats.failed,
            stats.attempted
        );
    }

    Ok(())
}
