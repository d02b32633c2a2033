//! Replay command: exercise one pooled session against its captured target.

use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::replay::{FailureKind, Outcome, ReplayClient};

use super::helpers::open_pool;

/// Check out a session, fetch its target, and report the health verdict.
pub async fn cmd_replay(settings: &Settings, region: Option<&str>) -> anyhow::Result<()> {
    let region = match region {
        Some(region) => region.to_string(),
        None => settings
            .regions
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no regions configured"))?,
    };

    let pool = Arc::new(Mutex::new(open_pool(settings)?));
    let client = ReplayClient::new(
        &settings.user_agent,
        settings.request_timeout(),
        settings.proxy.as_deref(),
    )?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(format!("Replaying via {} session...", region));
    pb.enable_steady_tick(Duration::from_millis(100));

    let report = client.replay_via(&pool, &region).await?;
    pb.finish_and_clear();

    let Some(report) = report else {
        println!(
            "{} No healthy session available for {}",
            style("!").yellow(),
            region
        );
        println!("  Run 'cbpool capture --region {}' to add one", region);
        return Ok(());
    };

    let session_id = report
        .session_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "?".to_string());

    match report.outcome {
        Outcome::Success => {
            println!(
                "{} Session {} healthy: {} bytes in {}ms",
                style("✓").green(),
                session_id,
                report.body_bytes,
                report.elapsed_ms
            );
        }
        Outcome::Failure(kind) => {
            let reason = match kind {
                FailureKind::Transport => "transport error".to_string(),
                FailureKind::HttpStatus => match report.status {
                    Some(code) => format!("HTTP {}", code),
                    None => "bad HTTP status".to_string(),
                },
                FailureKind::Blocked => "block page detected".to_string(),
                FailureKind::EmptyBody => {
                    format!("body too small ({} bytes)", report.body_bytes)
                }
            };
            println!(
                "{} Session {} failed: {}",
                style("✗").red(),
                session_id,
                reason
            );
            println!("  Failure recorded; repeat failures retire the session");
        }
    }

    Ok(())
}
