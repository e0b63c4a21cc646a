//! The per-table synchronization state machine and the run loop.
//!
//! One table's failure never blocks its siblings; only a lost database
//! connection aborts the run. Production data changes exclusively in
//! [`TrackedTable::publish`], so a failure anywhere earlier leaves the
//! destination schema as it was.

use crate::error::{CartobaseError, Result};
use crate::external::archive;
use crate::external::fetch::{self, FetchOutcome, Fetcher};
use crate::external::table::{self, TrackedTable};
use crate::settings::{Config, Settings, SourceSpec};
use std::path::Path;
use tokio_postgres::Client;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// SyncOptions
// ---------------------------------------------------------------------------

/// Flag surface of the `external` subcommand.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Re-download and re-import even when nothing changed.
    pub force: bool,
    /// Keep downloads and their `.lastmod` sidecars for later runs.
    pub cache: bool,
    /// Prefer local state: use the cache without asking the source.
    pub no_update: bool,
    /// Remove cached downloads once the table is published.
    pub delete_cache: bool,
    /// Import downloaded content even when the database looks current.
    pub force_import: bool,
}

// ---------------------------------------------------------------------------
// Outcome / report
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum SyncOutcome {
    Imported { last_modified: Option<String> },
    /// The source had nothing newer.
    NotModified,
    /// Content arrived, but the database already records this freshness.
    UpToDate,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub imported: Vec<String>,
    pub skipped: Vec<String>,
    /// Table name and failure text, in run order.
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    pub fn had_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Whether freshly fetched content still warrants an import.
pub(crate) fn import_needed(
    in_db: Option<&str>,
    source: Option<&str>,
    opts: &SyncOptions,
) -> bool {
    if opts.force || opts.force_import {
        return true;
    }
    match (in_db, source) {
        // the only skippable case: both sides agree
        (Some(db), Some(src)) => db != src,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Per-table state machine
// ---------------------------------------------------------------------------

pub async fn sync_table(
    client: &mut Client,
    fetcher: &Fetcher,
    settings: &Settings,
    name: &str,
    spec: &SourceSpec,
    opts: &SyncOptions,
) -> Result<SyncOutcome> {
    let tracked = TrackedTable::new(name, settings)?;
    tracked.clean_staging(client).await?;

    let in_db = tracked.last_modified_in_db(client).await?;
    debug!(table = name, recorded = ?in_db, "freshness in database");

    let outcome = fetcher
        .fetch(name, &spec.url, in_db.as_deref(), opts)
        .await?;
    let (download, last_modified, owned) = match outcome {
        FetchOutcome::NotModified => {
            info!(table = name, "source not modified; skipping");
            return Ok(SyncOutcome::NotModified);
        }
        FetchOutcome::Fresh {
            path,
            last_modified,
            owned,
        } => (path, last_modified, owned),
    };

    if !import_needed(in_db.as_deref(), last_modified.as_deref(), opts) {
        info!(table = name, "database already at source freshness; skipping");
        return Ok(SyncOutcome::UpToDate);
    }

    let scratch = settings.data_dir.join(name);
    if scratch.exists() {
        std::fs::remove_dir_all(&scratch)?;
    }

    if let Err(e) = import_and_publish(
        client,
        &tracked,
        settings,
        spec,
        &download,
        &scratch,
        last_modified.as_deref(),
    )
    .await
    {
        // leave nothing half-staged for the next run to trip over
        if let Err(cleanup) = tracked.clean_staging(client).await {
            warn!(table = name, "staging cleanup after failure also failed: {cleanup}");
        }
        return Err(e);
    }

    if scratch.exists() {
        std::fs::remove_dir_all(&scratch)?;
    }
    if owned && (opts.delete_cache || !opts.cache) {
        remove_quietly(&download);
        remove_quietly(&fetch::sidecar_path(&download));
    }

    Ok(SyncOutcome::Imported { last_modified })
}

/// Steps 5 through 8: extract, stage, normalize, publish, grant.
async fn import_and_publish(
    client: &mut Client,
    tracked: &TrackedTable,
    settings: &Settings,
    spec: &SourceSpec,
    download: &Path,
    scratch: &Path,
    last_modified: Option<&str>,
) -> Result<()> {
    let data_path = match &spec.archive {
        Some(archive_spec) => {
            let member = spec.file.as_deref().ok_or_else(|| {
                CartobaseError::Config(format!(
                    "source '{}' has an archive but no file to import",
                    tracked.name()
                ))
            })?;
            archive::extract_members(download, &archive_spec.files, scratch)?;
            scratch.join(member)
        }
        None => download.to_path_buf(),
    };

    tracked.stage(&settings.database, &data_path, &spec.ogropts)?;
    tracked.normalize(client).await?;
    tracked.publish(client, last_modified).await?;
    if let Some(role) = &settings.render_role {
        tracked.grant_read(client, role).await?;
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), "could not remove cached file: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// Synchronize every configured source, one at a time.
pub async fn sync_all(client: &mut Client, config: &Config, opts: &SyncOptions) -> Result<SyncReport> {
    table::prepare_database(client, &config.settings).await?;
    let fetcher = Fetcher::new(&config.settings.data_dir, config.settings.http_timeout_secs)?;

    let mut report = SyncReport::default();
    for (name, spec) in &config.sources {
        info!(table = %name, url = %spec.url, "synchronizing");
        match sync_table(client, &fetcher, &config.settings, name, spec, opts).await {
            Ok(SyncOutcome::Imported { last_modified }) => {
                info!(table = %name, last_modified = ?last_modified, "imported");
                report.imported.push(name.clone());
            }
            Ok(SyncOutcome::NotModified) | Ok(SyncOutcome::UpToDate) => {
                report.skipped.push(name.clone());
            }
            Err(CartobaseError::Db(e)) if e.is_closed() => {
                error!("database connection lost; aborting the run");
                return Err(CartobaseError::Db(e));
            }
            Err(e) => {
                warn!(table = %name, "synchronization failed: {e}");
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_freshness_skips_the_import() {
        let opts = SyncOptions::default();
        assert!(!import_needed(
            Some("Mon, 18 Aug 2025 12:00:00 GMT"),
            Some("Mon, 18 Aug 2025 12:00:00 GMT"),
            &opts
        ));
    }

    #[test]
    fn differing_freshness_imports() {
        let opts = SyncOptions::default();
        assert!(import_needed(
            Some("Sun, 17 Aug 2025 00:00:00 GMT"),
            Some("Mon, 18 Aug 2025 12:00:00 GMT"),
            &opts
        ));
    }

    #[test]
    fn first_load_always_imports() {
        let opts = SyncOptions::default();
        assert!(import_needed(None, Some("Mon, 18 Aug 2025 12:00:00 GMT"), &opts));
        assert!(import_needed(None, None, &opts));
    }

    #[test]
    fn unreported_source_freshness_imports() {
        // a source with no Last-Modified can never be proven current
        let opts = SyncOptions::default();
        assert!(import_needed(Some("recorded"), None, &opts));
    }

    #[test]
    fn force_flags_override_matching_freshness() {
        let same = Some("Mon, 18 Aug 2025 12:00:00 GMT");
        let force = SyncOptions {
            force: true,
            ..SyncOptions::default()
        };
        let force_import = SyncOptions {
            force_import: true,
            ..SyncOptions::default()
        };
        assert!(import_needed(same, same, &force));
        assert!(import_needed(same, same, &force_import));
    }
}
