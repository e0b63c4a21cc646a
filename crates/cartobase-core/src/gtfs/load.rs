//! Full-refresh loader.
//!
//! Each table is truncated and repopulated inside a single transaction, so
//! readers see either the previous import or the new one. Dead letters are
//! written outside any transaction: they must survive even when the data
//! load that produced them rolls back.

use crate::error::Result;
use crate::gtfs::model::{tables, SqlValue, TableBatch, TableDef, GTFS_SCHEMA, GTFS_SRID};
use crate::gtfs::transform::DeadLetter;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tracing::{debug, info};

/// Stay well under the wire-protocol limit of 65535 bind parameters.
const MAX_PARAMS: usize = 60_000;

/// Wide rows already cap the chunk through `MAX_PARAMS`; narrow ones are
/// capped here so a single statement stays a sane size.
const MAX_ROWS_PER_CHUNK: usize = 500;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

fn errors_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{GTFS_SCHEMA}\".\"import_errors\" (\
         id BIGSERIAL PRIMARY KEY, \
         occurred_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
         feed TEXT NOT NULL, \
         source TEXT NOT NULL, \
         reason TEXT NOT NULL, \
         record JSONB NOT NULL)"
    )
}

/// Create the schema, every entity table and the dead-letter table.
/// Idempotent; runs before each import.
pub async fn ensure_schema(client: &Client) -> Result<()> {
    client
        .batch_execute("CREATE EXTENSION IF NOT EXISTS postgis")
        .await?;
    client
        .batch_execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{GTFS_SCHEMA}\""))
        .await?;
    for table in tables() {
        client.batch_execute(&table.create_sql()).await?;
    }
    client.batch_execute(&errors_table_sql()).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Inserts
// ---------------------------------------------------------------------------

/// Rows per statement for a table this wide.
pub(crate) fn chunk_rows(column_count: usize) -> usize {
    (MAX_PARAMS / column_count.max(1)).clamp(1, MAX_ROWS_PER_CHUNK)
}

/// Multi-row INSERT with sequential placeholders; geometry cells go through
/// `ST_GeomFromText` so WKT binds as text.
pub(crate) fn build_insert<'a>(
    table: &TableDef,
    rows: &'a [Vec<SqlValue>],
) -> (String, Vec<&'a (dyn ToSql + Sync)>) {
    let srid = table.geometry.as_ref().map(|g| g.srid).unwrap_or(GTFS_SRID);
    let columns = table.insert_columns();
    let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(rows.len() * columns.len());
    let mut groups = Vec::with_capacity(rows.len());
    let mut n = 0usize;
    for row in rows {
        let mut placeholders = Vec::with_capacity(row.len());
        for value in row {
            n += 1;
            placeholders.push(match value {
                SqlValue::Geometry(_) => format!("ST_GeomFromText(${n}, {srid})"),
                _ => format!("${n}"),
            });
            params.push(value.as_param());
        }
        groups.push(format!("({})", placeholders.join(", ")));
    }
    let quoted = columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.qualified(),
        quoted,
        groups.join(", ")
    );
    (sql, params)
}

/// Replace one table's contents with `batch`, atomically.
pub async fn load_batch(client: &mut Client, batch: &TableBatch) -> Result<u64> {
    let chunk = chunk_rows(batch.table.insert_columns().len());
    let tx = client.transaction().await?;
    tx.batch_execute(&format!("TRUNCATE {} CASCADE", batch.table.qualified()))
        .await?;
    let mut loaded = 0u64;
    for rows in batch.rows.chunks(chunk) {
        let (sql, params) = build_insert(batch.table, rows);
        loaded += tx.execute(&sql, &params).await?;
        debug!(table = batch.table.name, rows = rows.len(), "chunk inserted");
    }
    tx.commit().await?;
    info!(table = batch.table.name, rows = loaded, "table refreshed");
    Ok(loaded)
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

/// Record rejected rows. Autocommit on purpose: a later batch failure must
/// not take the evidence down with it.
pub async fn record_dead_letters(client: &Client, letters: &[DeadLetter]) -> Result<()> {
    if letters.is_empty() {
        return Ok(());
    }
    let stmt = client
        .prepare(&format!(
            "INSERT INTO \"{GTFS_SCHEMA}\".\"import_errors\" \
             (feed, source, reason, record) VALUES ($1, $2, $3, $4)"
        ))
        .await?;
    for letter in letters {
        client
            .execute(
                &stmt,
                &[&letter.feed, &letter.source, &letter.reason, &letter.record],
            )
            .await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::model::{AGENCY, SHAPE_LINES, STOPS};

    fn stop_row(id: &str) -> Vec<SqlValue> {
        vec![
            SqlValue::text(Some(id.to_string())),
            SqlValue::Text(None),
            SqlValue::text(Some("Somewhere".into())),
            SqlValue::Double(Some(47.5)),
            SqlValue::Double(Some(19.05)),
            SqlValue::Integer(None),
            SqlValue::Text(None),
            SqlValue::Geometry(Some("POINT(19.05 47.5)".into())),
        ]
    }

    #[test]
    fn insert_numbers_placeholders_across_rows() {
        let rows = vec![stop_row("S1"), stop_row("S2")];
        let (sql, params) = build_insert(&STOPS, &rows);

        assert!(sql.starts_with("INSERT INTO \"gtfs\".\"stops\""));
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7, ST_GeomFromText($8, 4326))"));
        assert!(sql.contains("($9, $10, $11, $12, $13, $14, $15, ST_GeomFromText($16, 4326))"));
        assert_eq!(params.len(), 16);
    }

    #[test]
    fn geometry_binds_through_st_geomfromtext() {
        let rows = vec![vec![
            SqlValue::text(Some("A".into())),
            SqlValue::Geometry(Some("LINESTRING(0 0, 1 1)".into())),
        ]];
        let (sql, _) = build_insert(&SHAPE_LINES, &rows);
        assert!(sql.contains("ST_GeomFromText($2, 4326)"));
        assert!(sql.contains("(\"shape_id\", \"geom\")"));
    }

    #[test]
    fn plain_tables_use_bare_placeholders() {
        let rows = vec![vec![
            SqlValue::text(Some("A".into())),
            SqlValue::text(Some("Metro".into())),
            SqlValue::Text(None),
            SqlValue::Text(None),
        ]];
        let (sql, params) = build_insert(&AGENCY, &rows);
        assert!(sql.ends_with("VALUES ($1, $2, $3, $4)"));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn chunks_respect_both_caps() {
        // narrow table: the row cap wins
        assert_eq!(chunk_rows(4), MAX_ROWS_PER_CHUNK);
        // wide table: the parameter budget wins
        assert_eq!(chunk_rows(200), 300);
        // degenerate widths still make progress
        assert_eq!(chunk_rows(0), MAX_ROWS_PER_CHUNK);
        assert_eq!(chunk_rows(MAX_PARAMS * 2), 1);
    }

    #[test]
    fn chunks_never_exceed_the_parameter_budget() {
        for width in [1, 5, 8, 10, 60, 199, 500] {
            assert!(chunk_rows(width) * width <= MAX_PARAMS, "width {width}");
        }
    }

    #[test]
    fn dead_letter_table_is_schema_qualified_jsonb() {
        let sql = errors_table_sql();
        assert!(sql.contains("\"gtfs\".\"import_errors\""));
        assert!(sql.contains("record JSONB NOT NULL"));
        assert!(sql.contains("occurred_at TIMESTAMPTZ NOT NULL DEFAULT now()"));
    }
}
