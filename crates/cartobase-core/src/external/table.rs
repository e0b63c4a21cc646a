//! Staged PostGIS import for one tracked table.
//!
//! All identifiers are validated before any SQL text is built. The staged
//! copy lives in the staging schema until [`TrackedTable::publish`] moves it
//! into the destination schema in a single transaction, so readers only ever
//! see the old table or the new one.

use crate::db::{self, qualified};
use crate::error::Result;
use crate::proc;
use crate::settings::{DbSettings, Settings};
use std::path::Path;
use std::process::Command;
use tokio_postgres::Client;
use tracing::{debug, info};

/// Geometry column ogr2ogr is told to create; every later step keys on it.
pub const GEOMETRY_COLUMN: &str = "way";

/// Create the staging schema and the metadata table. Run once per sync run.
pub async fn prepare_database(client: &Client, settings: &Settings) -> Result<()> {
    for name in [
        &settings.schema,
        &settings.staging_schema,
        &settings.metadata_table,
    ] {
        db::validate_identifier(name)?;
    }
    client
        .batch_execute(&format!(
            "CREATE SCHEMA IF NOT EXISTS \"{}\"",
            settings.staging_schema
        ))
        .await?;
    client
        .batch_execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, last_modified TEXT)",
            qualified(&settings.schema, &settings.metadata_table)
        ))
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// TrackedTable
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TrackedTable {
    name: String,
    schema: String,
    staging: String,
    metadata: String,
}

impl TrackedTable {
    /// Rejects any identifier outside `[A-Za-z0-9_]` before SQL exists.
    pub fn new(name: &str, settings: &Settings) -> Result<Self> {
        db::validate_identifier(name)?;
        db::validate_identifier(&settings.schema)?;
        db::validate_identifier(&settings.staging_schema)?;
        db::validate_identifier(&settings.metadata_table)?;
        Ok(Self {
            name: name.to_string(),
            schema: settings.schema.clone(),
            staging: settings.staging_schema.clone(),
            metadata: settings.metadata_table.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn staged(&self) -> String {
        qualified(&self.staging, &self.name)
    }

    fn published(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn metadata_table(&self) -> String {
        qualified(&self.schema, &self.metadata)
    }

    // -----------------------------------------------------------------------
    // Step 1: staging hygiene
    // -----------------------------------------------------------------------

    /// Drop any staging leftover from an earlier failed run.
    pub async fn clean_staging(&self, client: &Client) -> Result<()> {
        client
            .batch_execute(&format!("DROP TABLE IF EXISTS {}", self.staged()))
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Step 2: recorded freshness
    // -----------------------------------------------------------------------

    pub async fn last_modified_in_db(&self, client: &Client) -> Result<Option<String>> {
        let rows = client
            .query(
                &format!(
                    "SELECT last_modified FROM {} WHERE name = $1",
                    self.metadata_table()
                ),
                &[&self.name],
            )
            .await?;
        Ok(rows.first().and_then(|row| row.get(0)))
    }

    // -----------------------------------------------------------------------
    // Step 5: stage via ogr2ogr
    // -----------------------------------------------------------------------

    /// The ogr2ogr invocation loading `src` into the staging schema.
    pub fn ogr_command(&self, dbs: &DbSettings, src: &Path, ogropts: &[String]) -> Command {
        let mut cmd = Command::new("ogr2ogr");
        cmd.args(["-f", "PostgreSQL"]);
        cmd.arg("-lco")
            .arg(format!("GEOMETRY_NAME={GEOMETRY_COLUMN}"));
        // the real spatial index is built after CLUSTER
        cmd.args(["-lco", "SPATIAL_INDEX=NONE"]);
        cmd.args(["-lco", "EXTRACT_SCHEMA_FROM_LAYER_NAME=YES"]);
        cmd.arg("-nln").arg(format!("{}.{}", self.staging, self.name));
        cmd.args(ogropts);
        cmd.arg(dbs.ogr_conn_string());
        cmd.arg(src);
        cmd
    }

    pub fn stage(&self, dbs: &DbSettings, src: &Path, ogropts: &[String]) -> Result<()> {
        info!(table = %self.name, src = %src.display(), "importing into staging");
        proc::run_streamed("ogr2ogr", &mut self.ogr_command(dbs, src, ogropts))
    }

    // -----------------------------------------------------------------------
    // Step 6: normalize the staged table
    // -----------------------------------------------------------------------

    /// Statement sequence run after a staging import, in order. Each runs in
    /// its own implicit transaction; the vacuum is separate because VACUUM
    /// cannot run inside one at all.
    pub fn normalize_statements(&self) -> Vec<String> {
        let staged = self.staged();
        let order_index = format!("{}_order", self.name);
        vec![
            format!("ALTER TABLE {staged} SET ( autovacuum_enabled = FALSE )"),
            // ogr2ogr's surrogate key is dead weight for a read-only table
            format!("ALTER TABLE {staged} DROP COLUMN IF EXISTS ogc_fid"),
            format!("DELETE FROM {staged} WHERE {GEOMETRY_COLUMN} IS NULL"),
            format!("ALTER TABLE {staged} ALTER COLUMN {GEOMETRY_COLUMN} SET NOT NULL"),
            format!(
                "CREATE INDEX \"{order_index}\" ON {staged} (ST_Envelope({GEOMETRY_COLUMN}))"
            ),
            format!("CLUSTER {staged} USING \"{order_index}\""),
            format!("DROP INDEX \"{}\".\"{order_index}\"", self.staging),
            // static table: pack the index pages completely
            format!(
                "CREATE INDEX ON {staged} USING GIST ({GEOMETRY_COLUMN}) WITH (fillfactor = 100)"
            ),
            format!("ALTER TABLE {staged} RESET ( autovacuum_enabled )"),
        ]
    }

    pub fn vacuum_statement(&self) -> String {
        format!("VACUUM ANALYZE {}", self.staged())
    }

    pub async fn normalize(&self, client: &Client) -> Result<()> {
        debug!(table = %self.name, "normalizing staged table");
        for statement in self.normalize_statements() {
            client.batch_execute(&statement).await?;
        }
        client.batch_execute(&self.vacuum_statement()).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Step 7: publish
    // -----------------------------------------------------------------------

    pub fn publish_statements(&self) -> (String, String) {
        (
            format!("DROP TABLE IF EXISTS {}", self.published()),
            format!(
                "ALTER TABLE {} SET SCHEMA \"{}\"",
                self.staged(),
                self.schema
            ),
        )
    }

    fn metadata_upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (name, last_modified) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET last_modified = EXCLUDED.last_modified",
            self.metadata_table()
        )
    }

    /// Swap the staged table into the destination schema and record its
    /// freshness, in one transaction.
    pub async fn publish(&self, client: &mut Client, last_modified: Option<&str>) -> Result<()> {
        let (drop_old, move_new) = self.publish_statements();
        let tx = client.transaction().await?;
        tx.batch_execute(&drop_old).await?;
        tx.batch_execute(&move_new).await?;
        tx.execute(&self.metadata_upsert_sql(), &[&self.name, &last_modified])
            .await?;
        tx.commit().await?;
        info!(table = %self.name, "published");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Step 8: grant
    // -----------------------------------------------------------------------

    pub fn grant_statement(&self, role: &str) -> Result<String> {
        db::validate_identifier(role)?;
        Ok(format!(
            "GRANT SELECT ON {} TO \"{role}\"",
            self.published()
        ))
    }

    pub async fn grant_read(&self, client: &Client, role: &str) -> Result<()> {
        client.batch_execute(&self.grant_statement(role)?).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
