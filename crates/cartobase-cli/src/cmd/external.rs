use anyhow::Context;
use cartobase_core::db;
use cartobase_core::external::{sync_all, SyncOptions};
use cartobase_core::settings::WarnLevel;
use cartobase_core::{Config, DbOverrides};
use std::path::Path;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, overrides: &DbOverrides, opts: SyncOptions) -> anyhow::Result<()> {
    let mut config = Config::load(config_path).context("failed to load config")?;
    config.settings.database.merge_overrides(overrides);

    for w in config.validate() {
        let prefix = match w.level {
            WarnLevel::Warning => "warning",
            WarnLevel::Error => "error",
        };
        eprintln!("[{prefix}] {}", w.message);
    }
    if !config.is_usable() {
        anyhow::bail!("config validation found errors");
    }

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let mut client = db::connect(&config.settings.database).await?;
        sync_all(&mut client, &config, &opts).await
    })?;

    println!(
        "Synchronized {} table(s): {} imported, {} unchanged, {} failed.",
        report.imported.len() + report.skipped.len() + report.failed.len(),
        report.imported.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (table, reason) in &report.failed {
        println!("[failed] {table}: {reason}");
    }
    // per-table failures were logged and skipped; the run itself succeeded
    Ok(())
}
