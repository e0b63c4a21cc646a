//! PostgreSQL connectivity and identifier hygiene.
//!
//! Table and schema names arrive from user-editable config, so everything
//! that ends up interpolated into SQL text must pass [`validate_identifier`]
//! first. Values always go through bound parameters.

use crate::error::{CartobaseError, Result};
use crate::settings::DbSettings;
use regex::Regex;
use std::sync::OnceLock;
use tokio_postgres::Client;
use tracing::{debug, error};

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Open a connection and drive it on a background task.
pub async fn connect(db: &DbSettings) -> Result<Client> {
    let conn_string = db.conn_string();
    debug!(dbname = %db.dbname, "connecting to database");
    let (client, connection) = tokio_postgres::connect(&conn_string, tokio_postgres::NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("database connection error: {e}");
        }
    });
    // IF EXISTS drops and schema churn below are expected; keep notices quiet.
    client
        .execute("SET client_min_messages TO WARNING", &[])
        .await?;
    Ok(client)
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static IDENT_RE: OnceLock<Regex> = OnceLock::new();

fn ident_re() -> &'static Regex {
    IDENT_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap())
}

/// True for names safe to splice into SQL: `[A-Za-z0-9_]+`, at most the
/// PostgreSQL limit of 63 bytes.
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.len() <= 63 && ident_re().is_match(name)
}

pub fn validate_identifier(name: &str) -> Result<()> {
    if !is_valid_identifier(name) {
        return Err(CartobaseError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

/// `"schema"."table"` form for SQL text. Both parts must already be
/// validated; the restricted charset cannot escape the quoting.
pub fn qualified(schema: &str, table: &str) -> String {
    format!("\"{schema}\".\"{table}\"")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_identifiers() {
        for name in ["water_polygons", "ne_110m_admin_0", "X", "a1_b2", "_lead"] {
            assert!(is_valid_identifier(name), "expected valid: {name}");
        }
    }

    #[test]
    fn invalid_identifiers() {
        for name in [
            "",
            "robert'; drop table x;--",
            "with space",
            "semi;colon",
            "quo\"te",
            "dash-ed",
            "dot.ted",
        ] {
            assert!(!is_valid_identifier(name), "expected invalid: {name}");
        }
    }

    #[test]
    fn length_limit_is_postgres_63() {
        let ok = "a".repeat(63);
        let too_long = "a".repeat(64);
        assert!(is_valid_identifier(&ok));
        assert!(!is_valid_identifier(&too_long));
    }

    #[test]
    fn validate_reports_the_offending_name() {
        let err = validate_identifier("bad name").unwrap_err();
        assert!(matches!(err, CartobaseError::InvalidTableName(n) if n == "bad name"));
    }

    #[test]
    fn qualified_quotes_both_parts() {
        assert_eq!(qualified("loading", "water_polygons"), "\"loading\".\"water_polygons\"");
    }
}
