use anyhow::Context;
use cartobase_core::settings::WarnLevel;
use cartobase_core::Config;
use clap::Subcommand;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Check the config for common mistakes
    Validate,

    /// Print the resolved settings and configured sources
    Show,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, subcommand: ConfigSubcommand) -> anyhow::Result<()> {
    match subcommand {
        ConfigSubcommand::Validate => validate(config_path),
        ConfigSubcommand::Show => show(config_path),
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load config")?;
    let warnings = config.validate();

    if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if !config.is_usable() {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load config")?;

    let mut settings = config.settings.clone();
    if settings.database.password.is_some() {
        settings.database.password = Some("<redacted>".to_string());
    }
    print!("{}", serde_yaml::to_string(&settings)?);

    if config.sources.is_empty() {
        println!("(no sources configured)");
    } else {
        println!("sources:");
        for (name, source) in &config.sources {
            println!("  {name}: {}", source.url);
        }
    }
    Ok(())
}
