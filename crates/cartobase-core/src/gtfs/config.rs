//! GTFS pipeline configuration: a JSON file with environment overrides.

use crate::error::{CartobaseError, Result};
use crate::settings::DbSettings;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Default config file name, looked up relative to the working directory.
pub const GTFS_CONFIG_FILE: &str = "gtfs.json";

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSpec {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GtfsConfig {
    #[serde(default)]
    pub feeds: Vec<FeedSpec>,
    #[serde(default)]
    pub database: DbSettings,
    /// Download attempts per feed before it is skipped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay; later ones back off exponentially.
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_secs() -> u64 {
    5
}

fn default_http_timeout_secs() -> u64 {
    300
}

impl Default for GtfsConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            database: DbSettings::default(),
            max_attempts: default_max_attempts(),
            retry_base_secs: default_retry_base_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl GtfsConfig {
    /// Read the file, then let the environment have the last word.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(CartobaseError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let mut config: GtfsConfig = serde_json::from_str(&data)?;
        config.apply_env(std::env::vars());
        Ok(config)
    }

    /// Overlay `GTFS_*` variables. Takes the variables as an iterator so
    /// tests never have to touch the process environment.
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "GTFS_DB_HOST" => self.database.host = Some(value),
                "GTFS_DB_PORT" => match value.parse() {
                    Ok(port) => self.database.port = Some(port),
                    Err(_) => warn!(%value, "ignoring unparseable GTFS_DB_PORT"),
                },
                "GTFS_DB_NAME" => self.database.dbname = value,
                "GTFS_DB_USER" => self.database.user = Some(value),
                "GTFS_DB_PASSWORD" => self.database.password = Some(value),
                "GTFS_MAX_ATTEMPTS" => match value.parse() {
                    Ok(n) => self.max_attempts = n,
                    Err(_) => warn!(%value, "ignoring unparseable GTFS_MAX_ATTEMPTS"),
                },
                "GTFS_RETRY_BASE_SECS" => match value.parse() {
                    Ok(secs) => self.retry_base_secs = secs,
                    Err(_) => warn!(%value, "ignoring unparseable GTFS_RETRY_BASE_SECS"),
                },
                "GTFS_HTTP_TIMEOUT_SECS" => match value.parse() {
                    Ok(secs) => self.http_timeout_secs = secs,
                    Err(_) => warn!(%value, "ignoring unparseable GTFS_HTTP_TIMEOUT_SECS"),
                },
                key => {
                    if let Some(feed_key) = key.strip_prefix("GTFS_FEED_URL_") {
                        self.override_feed_url(feed_key, value);
                    }
                }
            }
        }
    }

    /// `GTFS_FEED_URL_<NAME>` matches the feed whose name, uppercased with
    /// `-` as `_`, equals `<NAME>`.
    fn override_feed_url(&mut self, feed_key: &str, url: String) {
        let matched = self
            .feeds
            .iter_mut()
            .find(|f| f.name.to_uppercase().replace('-', "_") == feed_key);
        match matched {
            Some(feed) => feed.url = url,
            None => warn!(feed_key, "feed URL override names no configured feed"),
        }
    }

    /// A pipeline with no feeds or a feed without a URL cannot run at all.
    pub fn validate(&self) -> Result<()> {
        if self.feeds.is_empty() {
            return Err(CartobaseError::Config(
                "no GTFS feeds configured".to_string(),
            ));
        }
        for feed in &self.feeds {
            if feed.url.is_empty() {
                return Err(CartobaseError::Config(format!(
                    "feed '{}' has no URL",
                    feed.name
                )));
            }
        }
        if self.max_attempts == 0 {
            return Err(CartobaseError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "feeds": [
            { "name": "metro", "url": "https://transit.example/metro.zip" },
            { "name": "night-bus", "url": "https://transit.example/night.zip" }
        ],
        "database": { "dbname": "gis", "host": "localhost" },
        "max_attempts": 5
    }"#;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn sample_parses_with_defaults_filled() {
        let config: GtfsConfig = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.feeds.len(), 2);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_base_secs, 5);
        assert_eq!(config.http_timeout_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_database_and_retries() {
        let mut config: GtfsConfig = serde_json::from_str(SAMPLE).unwrap();
        config.apply_env(vars(&[
            ("GTFS_DB_HOST", "db.internal"),
            ("GTFS_DB_PORT", "5433"),
            ("GTFS_MAX_ATTEMPTS", "1"),
            ("UNRELATED", "ignored"),
        ]));
        assert_eq!(config.database.host.as_deref(), Some("db.internal"));
        assert_eq!(config.database.port, Some(5433));
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn bad_numeric_override_is_ignored() {
        let mut config: GtfsConfig = serde_json::from_str(SAMPLE).unwrap();
        config.apply_env(vars(&[("GTFS_DB_PORT", "not-a-port")]));
        assert_eq!(config.database.port, None);
    }

    #[test]
    fn feed_url_override_matches_normalized_name() {
        let mut config: GtfsConfig = serde_json::from_str(SAMPLE).unwrap();
        config.apply_env(vars(&[(
            "GTFS_FEED_URL_NIGHT_BUS",
            "https://mirror.example/night.zip",
        )]));
        assert_eq!(config.feeds[1].url, "https://mirror.example/night.zip");
        // the other feed is untouched
        assert_eq!(config.feeds[0].url, "https://transit.example/metro.zip");
    }

    #[test]
    fn empty_feed_list_fails_validation() {
        let config = GtfsConfig::default();
        assert!(matches!(
            config.validate(),
            Err(CartobaseError::Config(_))
        ));
    }

    #[test]
    fn feed_without_url_fails_validation() {
        let config = GtfsConfig {
            feeds: vec![FeedSpec {
                name: "metro".into(),
                url: String::new(),
            }],
            ..GtfsConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("metro"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let err = GtfsConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, CartobaseError::ConfigNotFound(_)));
    }
}
