use anyhow::Context;
use cartobase_core::gtfs::{self, GtfsConfig};
use cartobase_core::DbOverrides;
use std::path::Path;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(feeds_path: &Path, overrides: &DbOverrides) -> anyhow::Result<()> {
    let mut config = GtfsConfig::load(feeds_path).context("failed to load feed config")?;
    config.database.merge_overrides(overrides);

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(gtfs::run(&config))?;

    println!(
        "GTFS import finished: {} feed(s) imported, {} skipped, {} table batch(es) rolled back, {} record(s) dead-lettered.",
        report.imported.len(),
        report.failed.len(),
        report.tables_failed,
        report.dead_letters
    );
    for (feed, reason) in &report.failed {
        println!("[skipped] {feed}: {reason}");
    }
    Ok(())
}
