use crate::db;
use crate::error::{CartobaseError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default config file name, looked up relative to the working directory.
pub const CONFIG_FILE: &str = "cartobase.yml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// DbSettings
// ---------------------------------------------------------------------------

/// PostgreSQL connection parameters. Unset fields fall back to libpq-style
/// defaults (local socket, current user), matching how ogr2ogr and psql
/// resolve them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_dbname")]
    pub dbname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_dbname() -> String {
    "gis".to_string()
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            dbname: default_dbname(),
            user: None,
            password: None,
        }
    }
}

impl DbSettings {
    /// Key/value connection string accepted by tokio-postgres.
    pub fn conn_string(&self) -> String {
        let mut parts = vec![format!("dbname={}", self.dbname)];
        if let Some(host) = &self.host {
            parts.push(format!("host={host}"));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={port}"));
        }
        if let Some(user) = &self.user {
            parts.push(format!("user={user}"));
        }
        if let Some(password) = &self.password {
            parts.push(format!("password={password}"));
        }
        parts.join(" ")
    }

    /// Connection string in the `PG:` form ogr2ogr expects.
    pub fn ogr_conn_string(&self) -> String {
        format!("PG:{}", self.conn_string())
    }

    /// Overlay non-empty override values (CLI flags) on top of the file values.
    pub fn merge_overrides(&mut self, other: &DbOverrides) {
        if let Some(host) = &other.host {
            self.host = Some(host.clone());
        }
        if let Some(port) = other.port {
            self.port = Some(port);
        }
        if let Some(dbname) = &other.dbname {
            self.dbname = dbname.clone();
        }
        if let Some(user) = &other.user {
            self.user = Some(user.clone());
        }
        if let Some(password) = &other.password {
            self.password = Some(password.clone());
        }
    }
}

/// CLI-level overrides for any single connection parameter.
#[derive(Debug, Clone, Default)]
pub struct DbOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Scratch and cache directory for downloads and extracted archives.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub database: DbSettings,
    /// Destination schema for published tables.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Transient schema that staged imports land in before the swap.
    #[serde(default = "default_staging_schema")]
    pub staging_schema: String,
    /// Bookkeeping table holding one last-modified value per tracked table.
    #[serde(default = "default_metadata_table")]
    pub metadata_table: String,
    /// Role granted SELECT on published tables, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_role: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_staging_schema() -> String {
    "loading".to_string()
}

fn default_metadata_table() -> String {
    "external_data".to_string()
}

fn default_http_timeout_secs() -> u64 {
    300
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: DbSettings::default(),
            schema: default_schema(),
            staging_schema: default_staging_schema(),
            metadata_table: default_metadata_table(),
            render_role: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceSpec / ArchiveSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    Zip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveSpec {
    pub format: ArchiveFormat,
    /// Archive members to extract; sidecar files (e.g. shapefile .dbf/.prj)
    /// belong here even though only `file` is handed to the converter.
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// `http(s)://` or `file://` location of the dataset.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveSpec>,
    /// Path (within the extracted archive, or the bare download) handed to
    /// ogr2ogr. Defaults to the downloaded file itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Extra ogr2ogr arguments, e.g. target SRS reprojection flags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ogropts: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    /// Tracked tables: table name to source description.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceSpec>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CartobaseError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.sources.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no sources configured — nothing to synchronize".to_string(),
            });
        }

        if self.settings.schema == self.settings.staging_schema {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "schema and staging_schema are both '{}' — the staged swap needs distinct schemas",
                    self.settings.schema
                ),
            });
        }

        for name in [
            &self.settings.schema,
            &self.settings.staging_schema,
            &self.settings.metadata_table,
        ] {
            if !db::is_valid_identifier(name) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("invalid identifier '{name}' in settings"),
                });
            }
        }

        for (name, source) in &self.sources {
            if !db::is_valid_identifier(name) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("invalid table name '{name}' in sources"),
                });
            }
            let scheme_ok = source.url.starts_with("http://")
                || source.url.starts_with("https://")
                || source.url.starts_with("file://");
            if !scheme_ok {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!(
                        "source '{}' has url '{}' with an unrecognized scheme",
                        name, source.url
                    ),
                });
            }
            if let (Some(file), Some(archive)) = (&source.file, &source.archive) {
                if !archive.files.iter().any(|f| f == file) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "source '{}': file '{}' is not listed among the archive members",
                            name, file
                        ),
                    });
                }
            }
        }

        warnings
    }

    /// True when validation produced no error-level findings.
    pub fn is_usable(&self) -> bool {
        !self
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Error)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
settings:
  data_dir: /var/cache/cartobase
  database:
    dbname: gis
    host: localhost
    port: 5432
  schema: public
  staging_schema: loading
  metadata_table: external_data
  render_role: tileserver
sources:
  water_polygons:
    url: https://example.org/water-polygons-split-3857.zip
    file: water-polygons-split-3857/water_polygons.shp
    archive:
      format: zip
      files:
        - water-polygons-split-3857/water_polygons.shp
        - water-polygons-split-3857/water_polygons.shx
        - water-polygons-split-3857/water_polygons.dbf
        - water-polygons-split-3857/water_polygons.prj
    ogropts:
      - "-t_srs"
      - "EPSG:3857"
"#;

    #[test]
    fn sample_config_parses() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.settings.database.dbname, "gis");
        assert_eq!(cfg.settings.staging_schema, "loading");
        assert_eq!(cfg.sources.len(), 1);
        let spec = &cfg.sources["water_polygons"];
        assert_eq!(spec.ogropts, vec!["-t_srs", "EPSG:3857"]);
        assert!(spec.archive.is_some());
    }

    #[test]
    fn sample_config_has_no_errors() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert!(cfg.is_usable());
    }

    #[test]
    fn minimal_config_applies_defaults() {
        let cfg: Config = serde_yaml::from_str("settings: {}\n").unwrap();
        assert_eq!(cfg.settings.schema, "public");
        assert_eq!(cfg.settings.staging_schema, "loading");
        assert_eq!(cfg.settings.metadata_table, "external_data");
        assert_eq!(cfg.settings.database.dbname, "gis");
        assert!(cfg.sources.is_empty());
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let err = Config::load(Path::new("/definitely/not/here.yml")).unwrap_err();
        assert!(matches!(err, CartobaseError::ConfigNotFound(_)));
    }

    #[test]
    fn conn_string_includes_only_set_fields() {
        let db = DbSettings {
            host: Some("db.internal".into()),
            port: Some(5433),
            dbname: "gis".into(),
            user: None,
            password: None,
        };
        assert_eq!(db.conn_string(), "dbname=gis host=db.internal port=5433");
        assert_eq!(
            db.ogr_conn_string(),
            "PG:dbname=gis host=db.internal port=5433"
        );
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut db = DbSettings::default();
        db.merge_overrides(&DbOverrides {
            host: Some("10.0.0.8".into()),
            port: None,
            dbname: Some("osm".into()),
            user: Some("importer".into()),
            password: None,
        });
        assert_eq!(db.host.as_deref(), Some("10.0.0.8"));
        assert_eq!(db.dbname, "osm");
        assert_eq!(db.user.as_deref(), Some("importer"));
        assert!(db.port.is_none());
    }

    #[test]
    fn validate_rejects_hostile_table_name() {
        let yaml = r#"
settings: {}
sources:
  "robert'; drop table x;--":
    url: https://example.org/data.zip
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!cfg.is_usable());
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("invalid table name")));
    }

    #[test]
    fn validate_flags_identical_schemas() {
        let yaml = "settings:\n  schema: loading\n  staging_schema: loading\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!cfg.is_usable());
    }

    #[test]
    fn validate_warns_on_file_missing_from_archive() {
        let yaml = r#"
settings: {}
sources:
  coastlines:
    url: https://example.org/coastlines.zip
    file: coastlines.shp
    archive:
      format: zip
      files:
        - other.shp
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("not listed among the archive members")));
        // warning only, still usable
        assert!(cfg.is_usable());
    }
}
