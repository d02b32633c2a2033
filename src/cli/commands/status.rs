//! Status command: pool health at a glance.

use console::style;

use crate::config::Settings;

use super::helpers::open_pool;

/// Show per-region pool health and store-wide aggregates.
pub async fn cmd_status(settings: &Settings, json: bool) -> anyhow::Result<()> {
    if !settings.database_exists() {
        println!(
            "{} No database at {}",
            style("!").yellow(),
            settings.database_path().display()
        );
        println!("  Run 'cbpool init' to create one");
        return Ok(());
    }

    let pool = open_pool(settings)?;
    let status = pool.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("\n{}", style("Session Pool Status").bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Sessions:", status.store.total);
    println!("{:<20} {}", "Active:", status.store.active);
    println!("{:<20} {}", "Successes:", status.store.total_successes);
    println!("{:<20} {}", "Failures:", status.store.total_failures);
    if status.store.total_successes + status.store.total_failures > 0 {
        println!(
            "{:<20} {:.1}%",
            "Success rate:",
            status.store.success_rate * 100.0
        );
    }

    println!("\n{}", style("Regions").bold());
    println!("{}", "-".repeat(40));
    for region in &status.regions {
        let readiness = if region.ready {
            style("ready").green().to_string()
        } else {
            style("low").yellow().to_string()
        };
        println!(
            "{:<16} {:>3} healthy / {:>3} active / {:>3} total  [{}]",
            region.region, region.healthy, region.active, region.total, readiness
        );
    }
    // Configured regions with no rows yet never show up in the store stats.
    for configured in &settings.regions {
        if !status.regions.iter().any(|r| &r.region == configured) {
            println!(
                "{:<16} {:>3} healthy / {:>3} active / {:>3} total  [{}]",
                configured,
                0,
                0,
                0,
                style("empty").dim()
            );
        }
    }
    println!();

    Ok(())
}
