//! Source boundary for facility SCADA retrieval.
//!
//! One fetch returns the raw decoded JSON document(s) for one trading date on
//! one channel. No normalization happens here; the normalizer owns envelope
//! shapes and field aliases.

use std::fmt;
use std::io::{Cursor, Read};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::Channel;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

/// One decoded JSON document. Current-channel payloads carry exactly one;
/// historical archives carry one per `*.json` entry, in archive order.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadDocument {
    /// File or archive entry name the document was read from.
    pub name: String,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub channel: Channel,
    pub trading_date: NaiveDate,
    pub documents: Vec<PayloadDocument>,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a [`ScadaSource`] may return.
#[derive(Debug)]
pub enum SourceError {
    /// Connect, timeout or body-read failure.
    Transport { url: String, message: String },
    /// Non-success HTTP status.
    Status { code: u16, url: String },
    /// Historical archive unreadable or without JSON entries.
    Archive(String),
    /// A document was not valid JSON.
    Decode { document: String, message: String },
}

impl SourceError {
    /// Transport failures and 5xx/429 responses may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport { .. } => true,
            SourceError::Status { code, .. } => *code >= 500 || *code == 429,
            SourceError::Archive(_) | SourceError::Decode { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::Status { code: 404, .. })
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Transport { url, message } => {
                write!(f, "transport error url={url}: {message}")
            }
            SourceError::Status { code, url } => write!(f, "http status {code} url={url}"),
            SourceError::Archive(msg) => write!(f, "archive error: {msg}"),
            SourceError::Decode { document, message } => {
                write!(f, "decode error in {document}: {message}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Upstream SCADA publisher contract.
///
/// Object-safe so the orchestrator can hold an `Arc<dyn ScadaSource>`.
#[async_trait]
pub trait ScadaSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Single JSON document for a recent trading date.
    async fn fetch_current(&self, date: NaiveDate) -> Result<RawPayload, SourceError>;

    /// ZIP archive of JSON documents for an older trading date.
    async fn fetch_historical(&self, date: NaiveDate) -> Result<RawPayload, SourceError>;

    async fn fetch(&self, channel: Channel, date: NaiveDate) -> Result<RawPayload, SourceError> {
        match channel {
            Channel::Current => self.fetch_current(date).await,
            Channel::Historical => self.fetch_historical(date).await,
        }
    }
}

// ---------------------------------------------------------------------------
// AEMO WEM public data site
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AemoWemConfig {
    pub current_base_url: String,
    pub historical_base_url: String,
    pub current_timeout: Duration,
    pub historical_timeout: Duration,
    /// Alternate current-day file names tried in order after a 404 on the primary.
    /// `{date}` expands to `YYYY-MM-DD`, `{compact}` to `YYYYMMDD`.
    pub current_fallback_patterns: Vec<String>,
}

impl Default for AemoWemConfig {
    fn default() -> Self {
        Self {
            current_base_url:
                "https://data.wa.aemo.com.au/public/market-data/wemde/facilityScada/current/"
                    .to_string(),
            historical_base_url:
                "https://data.wa.aemo.com.au/public/market-data/wemde/facilityScada/previous/"
                    .to_string(),
            current_timeout: Duration::from_secs(60),
            historical_timeout: Duration::from_secs(120),
            current_fallback_patterns: vec![
                "SCADA{compact}.json".to_string(),
                "facilityScada-{compact}.json".to_string(),
                "facilityScada-{date}.json".to_string(),
            ],
        }
    }
}

/// reqwest-backed client for the AEMO WEM facility SCADA directories.
#[derive(Debug, Clone)]
pub struct AemoWemSource {
    http: reqwest::Client,
    cfg: AemoWemConfig,
}

impl AemoWemSource {
    pub fn new(cfg: AemoWemConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    pub fn current_url(&self, date: NaiveDate) -> String {
        join_url(&self.cfg.current_base_url, &current_file_name(date))
    }

    pub fn historical_url(&self, date: NaiveDate) -> String {
        join_url(&self.cfg.historical_base_url, &historical_file_name(date))
    }

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, SourceError> {
        let resp = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| SourceError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                code: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = resp.bytes().await.map_err(|e| SourceError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ScadaSource for AemoWemSource {
    fn source_name(&self) -> &'static str {
        "aemo-wem"
    }

    async fn fetch_current(&self, date: NaiveDate) -> Result<RawPayload, SourceError> {
        let primary = self.current_url(date);
        let mut candidates = vec![primary.clone()];
        candidates.extend(
            self.cfg
                .current_fallback_patterns
                .iter()
                .map(|p| join_url(&self.cfg.current_base_url, &expand_pattern(p, date))),
        );

        for url in &candidates {
            match self.get_bytes(url, self.cfg.current_timeout).await {
                Ok(bytes) => {
                    if *url != primary {
                        tracing::info!(%date, url = %url, "current scada found at alternate name");
                    }
                    let name = url.rsplit('/').next().unwrap_or(url.as_str()).to_string();
                    let body = decode_json(&name, &bytes)?;
                    return Ok(RawPayload {
                        channel: Channel::Current,
                        trading_date: date,
                        documents: vec![PayloadDocument { name, body }],
                    });
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(%date, url = %url, "current scada not found");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(SourceError::Status {
            code: 404,
            url: primary,
        })
    }

    async fn fetch_historical(&self, date: NaiveDate) -> Result<RawPayload, SourceError> {
        let url = self.historical_url(date);
        let bytes = self.get_bytes(&url, self.cfg.historical_timeout).await?;
        let documents = read_json_archive(&bytes)?;
        tracing::debug!(%date, documents = documents.len(), "historical archive decoded");
        Ok(RawPayload {
            channel: Channel::Historical,
            trading_date: date,
            documents,
        })
    }
}

pub fn current_file_name(date: NaiveDate) -> String {
    format!("SCADA_{}.json", date.format("%Y-%m-%d"))
}

pub fn historical_file_name(date: NaiveDate) -> String {
    format!("FacilityScada_{}.zip", date.format("%Y%m%d"))
}

fn expand_pattern(pattern: &str, date: NaiveDate) -> String {
    pattern
        .replace("{date}", &date.format("%Y-%m-%d").to_string())
        .replace("{compact}", &date.format("%Y%m%d").to_string())
}

fn join_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Upper bound on the buffer reserved from an entry's declared size.
const MAX_ENTRY_PREALLOC: u64 = 16 * 1024 * 1024;

fn entry_prealloc(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_ENTRY_PREALLOC)).unwrap_or(0)
}

fn decode_json(name: &str, bytes: &[u8]) -> Result<Value, SourceError> {
    serde_json::from_slice(bytes).map_err(|e| SourceError::Decode {
        document: name.to_string(),
        message: e.to_string(),
    })
}

/// Decode every `*.json` entry of a ZIP archive, in archive order.
pub fn read_json_archive(bytes: &[u8]) -> Result<Vec<PayloadDocument>, SourceError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| SourceError::Archive(format!("unreadable zip: {e}")))?;

    let mut documents = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| SourceError::Archive(format!("entry {i}: {e}")))?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".json") {
            continue;
        }
        let name = entry.name().to_string();
        let mut buf = Vec::with_capacity(entry_prealloc(entry.size()));
        entry
            .read_to_end(&mut buf)
            .map_err(|e| SourceError::Archive(format!("entry {name}: {e}")))?;
        let body = decode_json(&name, &buf)?;
        documents.push(PayloadDocument { name, body });
    }

    if documents.is_empty() {
        return Err(SourceError::Archive(
            "archive contains no JSON entries".to_string(),
        ));
    }
    Ok(documents)
}

// ---------------------------------------------------------------------------
// Bounded retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. 1 disables retry.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Wraps a source with bounded, fixed-backoff retry of retryable errors.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ScadaSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn with_retry(&self, channel: Channel, date: NaiveDate) -> Result<RawPayload, SourceError> {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.fetch(channel, date).await {
                Ok(p) => return Ok(p),
                Err(e) if e.is_retryable() && attempt < max => {
                    tracing::warn!(
                        %date,
                        channel = channel.as_str(),
                        attempt,
                        max_attempts = max,
                        error = %e,
                        "scada fetch failed; retrying"
                    );
                    tokio::time::sleep(self.policy.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: ScadaSource> ScadaSource for RetryingSource<S> {
    fn source_name(&self) -> &'static str {
        self.inner.source_name()
    }

    async fn fetch_current(&self, date: NaiveDate) -> Result<RawPayload, SourceError> {
        self.with_retry(Channel::Current, date).await
    }

    async fn fetch_historical(&self, date: NaiveDate) -> Result<RawPayload, SourceError> {
        self.with_retry(Channel::Historical, date).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
