//! GTFS feed retrieval and parsing.
//!
//! A feed is a zip of CSV members, most of them optional. Download failures
//! retry with bounded exponential backoff; parse problems below the member
//! level are reported per row so the transform can dead-letter them instead
//! of failing the feed.

use crate::error::{CartobaseError, Result};
use serde::de::DeserializeOwned;
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::{info, warn};
use zip::result::ZipError;
use zip::ZipArchive;

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based): doubles each
    /// time, capped at five minutes.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

pub async fn download_feed(
    http: &reqwest::Client,
    feed: &str,
    url: &str,
    retry: &RetryPolicy,
) -> Result<Vec<u8>> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match try_download(http, url).await {
            Ok(bytes) => {
                info!(feed, bytes = bytes.len(), attempt, "feed downloaded");
                return Ok(bytes);
            }
            Err(e) if attempt < retry.max_attempts => {
                let delay = retry.delay_for(attempt);
                warn!(
                    feed,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "download failed, will retry: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn try_download(http: &reqwest::Client, url: &str) -> Result<Vec<u8>> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| CartobaseError::Download {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
    if !response.status().is_success() {
        return Err(CartobaseError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }
    let bytes = response.bytes().await.map_err(|e| CartobaseError::Download {
        url: url.to_string(),
        detail: e.to_string(),
    })?;
    Ok(bytes.to_vec())
}

// ---------------------------------------------------------------------------
// FeedArchive
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FeedArchive {
    feed: String,
    zip: ZipArchive<Cursor<Vec<u8>>>,
}

impl FeedArchive {
    pub fn from_bytes(feed: &str, bytes: Vec<u8>) -> Result<Self> {
        let zip = ZipArchive::new(Cursor::new(bytes)).map_err(|e| CartobaseError::Feed {
            feed: feed.to_string(),
            detail: format!("not a zip archive: {e}"),
        })?;
        Ok(Self {
            feed: feed.to_string(),
            zip,
        })
    }

    fn feed_error(&self, detail: String) -> CartobaseError {
        CartobaseError::Feed {
            feed: self.feed.clone(),
            detail,
        }
    }

    /// Parse one CSV member. `None` when the member is absent, since most
    /// GTFS files are optional.
    pub fn table(&mut self, member: &str) -> Result<Option<CsvTable>> {
        let mut text = String::new();
        match self.zip.by_name(member) {
            Ok(mut entry) => {
                entry
                    .read_to_string(&mut text)
                    .map_err(|e| CartobaseError::Feed {
                        feed: self.feed.clone(),
                        detail: format!("member '{member}' is not valid UTF-8: {e}"),
                    })?;
            }
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(CartobaseError::Feed {
                    feed: self.feed.clone(),
                    detail: format!("member '{member}': {e}"),
                })
            }
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| self.feed_error(format!("member '{member}' has no header row: {e}")))?
            .clone();
        let mut records = Vec::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| self.feed_error(format!("member '{member}' is unreadable: {e}")))?;
            records.push(record);
        }
        Ok(Some(CsvTable {
            member: member.to_string(),
            headers,
            records,
        }))
    }
}

// ---------------------------------------------------------------------------
// CsvTable
// ---------------------------------------------------------------------------

pub struct CsvTable {
    pub member: String,
    pub headers: csv::StringRecord,
    pub records: Vec<csv::StringRecord>,
}

/// One record's parse attempt, with everything a dead letter needs.
pub struct RowParse<T> {
    /// `member:line`, lines counted like an editor shows them.
    pub source: String,
    pub raw: serde_json::Value,
    pub parsed: std::result::Result<T, String>,
}

impl CsvTable {
    pub fn rows<T: DeserializeOwned>(&self) -> Vec<RowParse<T>> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| RowParse {
                source: format!("{}:{}", self.member, i + 2),
                raw: self.raw_json(record),
                parsed: record
                    .deserialize(Some(&self.headers))
                    .map_err(|e| e.to_string()),
            })
            .collect()
    }

    fn raw_json(&self, record: &csv::StringRecord) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), serde_json::Value::from(v)))
            .collect();
        serde_json::Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Build an in-memory feed zip from (member, content) pairs.
#[cfg(test)]
pub(crate) fn feed_zip(members: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in members {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}
