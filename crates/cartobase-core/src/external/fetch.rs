//! Conditional retrieval of source datasets.
//!
//! Freshness tokens are opaque strings compared byte-for-byte: the HTTP
//! `Last-Modified` header for remote sources, a formatted file mtime for
//! `file://` sources. The database value takes priority over the local
//! `.lastmod` sidecar when building `If-Modified-Since`, so a wiped cache
//! does not force a re-download of data the database already has.

use crate::error::{CartobaseError, Result};
use crate::external::sync::SyncOptions;
use chrono::{DateTime, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// FetchOutcome
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum FetchOutcome {
    /// Usable content on disk, with the freshness value the source reported.
    Fresh {
        path: PathBuf,
        last_modified: Option<String>,
        /// True when the file lives in the data dir and cache cleanup may
        /// delete it; false for `file://` sources, which are never touched.
        owned: bool,
    },
    /// The source has nothing newer than what we asked about.
    NotModified,
}

/// Path of the sidecar recording a cached download's freshness value.
pub fn sidecar_path(download: &Path) -> PathBuf {
    let mut name = download.as_os_str().to_os_string();
    name.push(".lastmod");
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

pub struct Fetcher {
    http: reqwest::Client,
    data_dir: PathBuf,
}

impl Fetcher {
    pub fn new(data_dir: &Path, timeout_secs: u64) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Resolve source freshness for one table and, when needed, bring its
    /// content into the data dir.
    pub async fn fetch(
        &self,
        table: &str,
        url: &str,
        db_last_modified: Option<&str>,
        opts: &SyncOptions,
    ) -> Result<FetchOutcome> {
        if let Some(path) = url.strip_prefix("file://") {
            return self.fetch_local(path, db_last_modified, opts);
        }
        self.fetch_http(table, url, db_last_modified, opts).await
    }

    // -----------------------------------------------------------------------
    // file:// sources
    // -----------------------------------------------------------------------

    fn fetch_local(
        &self,
        path: &str,
        db_last_modified: Option<&str>,
        opts: &SyncOptions,
    ) -> Result<FetchOutcome> {
        let path = Path::new(path);
        let mtime = std::fs::metadata(path)?.modified()?;
        let stamp = DateTime::<Utc>::from(mtime).to_rfc2822();
        if !opts.force && db_last_modified == Some(stamp.as_str()) {
            return Ok(FetchOutcome::NotModified);
        }
        Ok(FetchOutcome::Fresh {
            path: path.to_path_buf(),
            last_modified: Some(stamp),
            owned: false,
        })
    }

    // -----------------------------------------------------------------------
    // http(s):// sources
    // -----------------------------------------------------------------------

    async fn fetch_http(
        &self,
        table: &str,
        url: &str,
        db_last_modified: Option<&str>,
        opts: &SyncOptions,
    ) -> Result<FetchOutcome> {
        let download = self.download_path(table, url);
        let sidecar = sidecar_path(&download);
        let cached_last_modified = std::fs::read_to_string(&sidecar)
            .ok()
            .map(|s| s.trim().to_string());

        if opts.no_update {
            if download.exists() {
                debug!(table, "using cached download without checking the source");
                return Ok(FetchOutcome::Fresh {
                    path: download,
                    last_modified: cached_last_modified,
                    owned: true,
                });
            }
            if db_last_modified.is_some() {
                debug!(table, "no cache but database has data; not updating");
                return Ok(FetchOutcome::NotModified);
            }
            // nothing local at all, the first load still has to happen
        }

        let mut request = self.http.get(url);
        if !opts.force {
            // database value first; sidecar only helps when the table is gone
            if let Some(since) = db_last_modified.or(cached_last_modified.as_deref()) {
                request = request.header(IF_MODIFIED_SINCE, since);
            }
        }

        let mut response = request.send().await.map_err(|e| CartobaseError::Download {
            url: url.to_string(),
            detail: e.to_string(),
        })?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }
        if !response.status().is_success() {
            return Err(CartobaseError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        // stream to a temp file, then move into place
        let mut tmp = tempfile::NamedTempFile::new_in(&self.data_dir)?;
        let mut bytes: u64 = 0;
        while let Some(chunk) = response.chunk().await.map_err(|e| CartobaseError::Download {
            url: url.to_string(),
            detail: e.to_string(),
        })? {
            tmp.write_all(&chunk)?;
            bytes += chunk.len() as u64;
        }
        tmp.persist(&download).map_err(|e| e.error)?;
        info!(table, bytes, "downloaded");

        if opts.cache {
            if let Some(value) = &last_modified {
                std::fs::write(&sidecar, value)?;
            }
        }

        Ok(FetchOutcome::Fresh {
            path: download,
            last_modified,
            owned: true,
        })
    }

    /// Cache location for a table's download: the url's basename inside the
    /// data dir, falling back to the table name.
    pub fn download_path(&self, table: &str, url: &str) -> PathBuf {
        let base = url
            .rsplit('/')
            .next()
            .filter(|b| !b.is_empty())
            .unwrap_or(table);
        self.data_dir.join(base)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
