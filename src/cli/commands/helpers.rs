//! Shared helper functions for CLI commands.

use chrono::{DateTime, Utc};
use console::style;

use crate::capture::CommandSource;
use crate::config::{Settings, CONFIG_FILENAME};
use crate::models::SessionState;
use crate::pool::SessionPool;
use crate::repository::SessionRepository;

/// Open the session store and wrap it in a pool using configured thresholds.
pub fn open_pool(settings: &Settings) -> anyhow::Result<SessionPool> {
    settings.ensure_directories()?;
    let repo = SessionRepository::new(&settings.database_path())?;
    Ok(SessionPool::new(repo, settings.min_sessions_per_region))
}

/// Build the capture source from the configured command line.
pub fn command_source(settings: &Settings) -> anyhow::Result<CommandSource> {
    let command = settings.capture_command.clone().ok_or_else(|| {
        anyhow::anyhow!(
            "no capture_command configured; set it in {} or the user config",
            CONFIG_FILENAME
        )
    })?;
    Ok(CommandSource::new(
        command,
        settings.capture_args.clone(),
        settings.source_pool_label.clone(),
    ))
}

/// Render an age in minutes as a compact duration ("45m", "3h07m", "2d").
pub fn format_age(minutes: f64) -> String {
    let mins = minutes.max(0.0) as i64;
    if mins < 60 {
        format!("{}m", mins)
    } else if mins < 24 * 60 {
        format!("{}h{:02}m", mins / 60, mins % 60)
    } else {
        format!("{}d", mins / (24 * 60))
    }
}

/// Render a last-used timestamp relative to now, or "never".
pub fn format_last_used(last_used_at: Option<DateTime<Utc>>) -> String {
    match last_used_at {
        Some(when) => {
            let minutes = (Utc::now() - when).num_minutes().max(0) as f64;
            format!("{} ago", format_age(minutes))
        }
        None => "never".to_string(),
    }
}

/// Color a session state label padded to a fixed column width.
///
/// Padding happens before styling so the escape codes do not throw off
/// column alignment.
pub fn styled_state(state: SessionState, width: usize) -> String {
    let label = format!("{:<width$}", state.as_str(), width = width);
    match state {
        SessionState::Fresh => style(label).cyan().to_string(),
        SessionState::Proven => style(label).green().to_string(),
        SessionState::Degraded => style(label).yellow().to_string(),
        SessionState::Expired => style(label).dim().to_string(),
        SessionState::Retired => style(label).red().to_string(),
    }
}

/// Shorten a URL for table display.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_age_buckets() {
        assert_eq!(format_age(0.4), "0m");
        assert_eq!(format_age(45.0), "45m");
        assert_eq!(format_age(187.0), "3h07m");
        assert_eq!(format_age(3000.0), "2d");
    }

    #[test]
    fn truncate_preserves_short_text() {
        assert_eq!(truncate("https://e.com/cb", 40), "https://e.com/cb");
        let long = "https://example.com/".repeat(5);
        let cut = truncate(&long, 40);
        assert_eq!(cut.chars().count(), 40);
        assert!(cut.ends_with("..."));
    }
}
