//! GTFS ETL pipeline.
//!
//! Feeds are processed one at a time: download the zip (with retry), parse
//! and validate its members, persist dead letters, then refresh each target
//! table in its own transaction. A broken feed or a failed table batch is
//! logged and skipped; only a dead database connection stops the run.

pub mod config;
pub mod feed;
pub mod load;
pub mod model;
pub mod transform;

pub use config::{FeedSpec, GtfsConfig, GTFS_CONFIG_FILE};
pub use model::{GTFS_SCHEMA, GTFS_SRID};
pub use transform::{DeadLetter, TransformOutput};

use crate::db;
use crate::error::{CartobaseError, Result};
use crate::gtfs::feed::{download_feed, FeedArchive, RetryPolicy};
use std::time::Duration;
use tokio_postgres::Client;
use tracing::{error, info, warn};

/// What one pipeline run did.
#[derive(Debug, Default)]
pub struct GtfsReport {
    pub imported: Vec<String>,
    /// Feed name and the reason it was skipped.
    pub failed: Vec<(String, String)>,
    /// Table batches rolled back inside otherwise-processed feeds.
    pub tables_failed: usize,
    pub dead_letters: usize,
}

impl GtfsReport {
    pub fn had_failures(&self) -> bool {
        !self.failed.is_empty() || self.tables_failed > 0
    }
}

/// Import every configured feed in order.
pub async fn run(config: &GtfsConfig) -> Result<GtfsReport> {
    config.validate()?;
    let mut client = db::connect(&config.database).await?;
    load::ensure_schema(&client).await?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;
    let retry = RetryPolicy {
        max_attempts: config.max_attempts,
        base_delay: Duration::from_secs(config.retry_base_secs),
    };

    let mut report = GtfsReport::default();
    for feed in &config.feeds {
        info!(feed = %feed.name, url = %feed.url, "importing feed");
        match import_feed(&mut client, &http, feed, &retry, &mut report).await {
            Ok(()) => report.imported.push(feed.name.clone()),
            Err(CartobaseError::Db(e)) if e.is_closed() => {
                error!(feed = %feed.name, error = %e, "database connection lost, aborting run");
                return Err(CartobaseError::Db(e));
            }
            Err(e) => {
                warn!(feed = %feed.name, error = %e, "feed skipped");
                report.failed.push((feed.name.clone(), e.to_string()));
            }
        }
    }
    info!(
        imported = report.imported.len(),
        skipped = report.failed.len(),
        dead_letters = report.dead_letters,
        "gtfs run finished"
    );
    Ok(report)
}

async fn import_feed(
    client: &mut Client,
    http: &reqwest::Client,
    feed: &FeedSpec,
    retry: &RetryPolicy,
    report: &mut GtfsReport,
) -> Result<()> {
    let bytes = download_feed(http, &feed.name, &feed.url, retry).await?;
    let mut archive = FeedArchive::from_bytes(&feed.name, bytes)?;
    let output = transform::transform(&feed.name, &mut archive)?;

    if !output.dead_letters.is_empty() {
        warn!(
            feed = %feed.name,
            rejected = output.dead_letters.len(),
            "records failed validation, see gtfs.import_errors"
        );
    }
    // evidence first, so a later batch failure cannot take it down
    report.dead_letters += output.dead_letters.len();
    load::record_dead_letters(client, &output.dead_letters).await?;

    for batch in &output.batches {
        match load::load_batch(client, batch).await {
            Ok(_) => {}
            Err(CartobaseError::Db(e)) if e.is_closed() => return Err(CartobaseError::Db(e)),
            Err(e) => {
                warn!(
                    feed = %feed.name,
                    table = batch.table.name,
                    error = %e,
                    "table batch rolled back"
                );
                report.tables_failed += 1;
            }
        }
    }
    Ok(())
}
