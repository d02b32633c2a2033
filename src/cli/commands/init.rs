//! Initialize command.

use console::style;

use crate::config::Settings;
use crate::repository::SessionRepository;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let existed = settings.database_exists();
    SessionRepository::new(&settings.database_path())?;
    if existed {
        println!(
            "  {} Database already present: {}",
            style("✓").green(),
            settings.database_path().display()
        );
    } else {
        println!(
            "  {} Created database: {}",
            style("✓").green(),
            settings.database_path().display()
        );
    }

    if let Some(config_path) = Settings::user_config_path() {
        if config_path.exists() {
            println!(
                "  {} Using config: {}",
                style("✓").green(),
                config_path.display()
            );
        } else {
            settings.write_starter(&config_path)?;
            println!(
                "  {} Wrote starter config: {}",
                style("✓").green(),
                config_path.display()
            );
        }
    }

    if settings.capture_command.is_none() {
        println!("{} No capture_command configured", style("!").yellow());
        println!("  Point it at a script that prints one callback URL for {{region}}");
    }

    println!(
        "{} Initialized callbackpool in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
