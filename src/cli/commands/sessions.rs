//! Session management commands.

use console::style;

use crate::config::Settings;
use crate::models::SessionDisplay;

use super::helpers::{format_age, format_last_used, open_pool, styled_state, truncate};

/// List stored sessions, optionally filtered by region.
pub async fn cmd_sessions_list(
    settings: &Settings,
    region: Option<&str>,
    all: bool,
    json: bool,
) -> anyhow::Result<()> {
    let pool = open_pool(settings)?;
    let sessions = pool.repository().list(region, all)?;

    if json {
        let displays: Vec<SessionDisplay> = sessions.iter().map(|s| s.display()).collect();
        println!("{}", serde_json::to_string_pretty(&displays)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("{} No sessions found", style("!").yellow());
        if !all {
            println!("  Use --all to include retired sessions");
        }
        return Ok(());
    }

    println!(
        "{:<6} {:<10} {:<9} {:>4} {:>5} {:>8}  {:<12} {}",
        "ID", "Region", "State", "OK", "Fail", "Age", "Last used", "Target"
    );
    println!("{}", "-".repeat(96));
    for session in &sessions {
        println!(
            "{:<6} {:<10} {} {:>4} {:>5} {:>8}  {:<12} {}",
            session
                .id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            session.region,
            styled_state(session.state(), 9),
            session.success_count,
            session.failure_count,
            format_age(session.age_minutes()),
            format_last_used(session.last_used_at),
            truncate(&session.target, 48),
        );
    }
    println!(
        "\n{} session{}",
        sessions.len(),
        if sessions.len() == 1 { "" } else { "s" }
    );

    Ok(())
}

/// Permanently retire one session.
pub async fn cmd_sessions_retire(settings: &Settings, id: i64) -> anyhow::Result<()> {
    let pool = open_pool(settings)?;
    if pool.repository().retire(id)? {
        println!("{} Retired session {}", style("✓").green(), id);
    } else {
        println!("{} No session with id {}", style("!").yellow(), id);
    }
    Ok(())
}

/// Retire every active session that no longer passes the health check.
pub async fn cmd_sessions_cleanup(settings: &Settings) -> anyhow::Result<()> {
    let pool = open_pool(settings)?;
    let retired = pool.cleanup()?;
    if retired == 0 {
        println!("{} Nothing to clean up", style("✓").green());
    } else {
        println!(
            "{} Retired {} stale session{}",
            style("✓").green(),
            retired,
            if retired == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

/// Delete session rows older than the retention window.
pub async fn cmd_sessions_prune(settings: &Settings, days: Option<i64>) -> anyhow::Result<()> {
    let days = days.unwrap_or(settings.retention_days);
    let pool = open_pool(settings)?;
    let deleted = pool.repository().prune_older_than(days)?;
    if deleted == 0 {
        println!(
            "{} No sessions older than {} day{}",
            style("✓").green(),
            days,
            if days == 1 { "" } else { "s" }
        );
    } else {
        println!(
            "{} Deleted {} session{} older than {} days",
            style("✓").green(),
            deleted,
            if deleted == 1 { "" } else { "s" },
            days
        );
    }
    Ok(())
}
