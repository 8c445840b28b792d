//! Feed abstraction for telemetry and polled meter data.
//!
//! The engine only needs the latest reading of each feed. Wire-level
//! ingestion (subscriptions, HTTP polling) lives outside this crate; the
//! document adapters here read the JSON files those ingestors maintain.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::types::{MeterReadings, TelemetrySnapshot};

/// Feed errors
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed I/O error ({}): {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("feed document malformed ({}): {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("feed unavailable: {0}")]
    Unavailable(String),
}

/// Latest named sensor groups of the telemetry subscription.
///
/// `Ok(None)` means nothing is available yet; callers skip the tick.
#[async_trait]
pub trait TelemetryFeed: Send + Sync + 'static {
    async fn latest(&self) -> Result<Option<TelemetrySnapshot>, FeedError>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

/// Latest per-device record lists of the polled feed.
#[async_trait]
pub trait MeterFeed: Send + Sync + 'static {
    async fn latest(&self) -> Result<Option<MeterReadings>, FeedError>;

    fn source_name(&self) -> &str;
}

// ============================================================================
// Document Feeds
// ============================================================================

/// Reads a JSON document; a missing file is "no data yet", not an error.
async fn read_document<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, FeedError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(FeedError::Io { path: path.to_path_buf(), source: e });
        }
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| FeedError::Malformed { path: path.to_path_buf(), source: e })
}

/// Telemetry feed backed by a JSON document (`{"groups": {...}}`).
pub struct DocumentTelemetryFeed {
    path: PathBuf,
}

impl DocumentTelemetryFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TelemetryFeed for DocumentTelemetryFeed {
    async fn latest(&self) -> Result<Option<TelemetrySnapshot>, FeedError> {
        read_document(&self.path).await
    }

    fn source_name(&self) -> &str {
        "telemetry-document"
    }
}

/// Meter feed backed by a JSON document (`{"devices": {...}}`).
pub struct DocumentMeterFeed {
    path: PathBuf,
}

impl DocumentMeterFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MeterFeed for DocumentMeterFeed {
    async fn latest(&self) -> Result<Option<MeterReadings>, FeedError> {
        read_document(&self.path).await
    }

    fn source_name(&self) -> &str {
        "meters-document"
    }
}

// ============================================================================
// Static Feeds
// ============================================================================

/// Feed holding a replaceable reading in memory (tests, replay tools).
pub struct StaticFeed<T> {
    value: std::sync::RwLock<Option<T>>,
}

impl<T: Clone> StaticFeed<T> {
    pub fn new(value: Option<T>) -> Self {
        Self { value: std::sync::RwLock::new(value) }
    }

    pub fn set(&self, value: Option<T>) {
        if let Ok(mut slot) = self.value.write() {
            *slot = value;
        }
    }

    fn get(&self) -> Result<Option<T>, FeedError> {
        self.value
            .read()
            .map(|v| v.clone())
            .map_err(|e| FeedError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl TelemetryFeed for StaticFeed<TelemetrySnapshot> {
    async fn latest(&self) -> Result<Option<TelemetrySnapshot>, FeedError> {
        self.get()
    }

    fn source_name(&self) -> &str {
        "static-telemetry"
    }
}

#[async_trait]
impl MeterFeed for StaticFeed<MeterReadings> {
    async fn latest(&self) -> Result<Option<MeterReadings>, FeedError> {
        self.get()
    }

    fn source_name(&self) -> &str {
        "static-meters"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensorGroup;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_document_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let feed = DocumentTelemetryFeed::new(dir.path().join("telemetry.json"));
        assert!(feed.latest().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_document_feed_reads_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        let doc = json!({
            "groups": {
                "master1/port1": {
                    "valid": true,
                    "timestamp": "2026-03-02T10:00:00Z",
                    "fields": {"element_present": true}
                }
            }
        });
        std::fs::write(&path, doc.to_string()).unwrap();
        let feed = DocumentTelemetryFeed::new(&path);
        let snap = feed.latest().await.unwrap().unwrap();
        let group = snap.group("master1/port1").unwrap();
        assert!(group.valid);
        assert_eq!(group.fields["element_present"], json!(true));
    }

    #[tokio::test]
    async fn test_malformed_document_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meters.json");
        std::fs::write(&path, "{\"devices\": [").unwrap();
        let feed = DocumentMeterFeed::new(&path);
        assert!(matches!(feed.latest().await, Err(FeedError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_static_feed_replace() {
        let feed: StaticFeed<TelemetrySnapshot> = StaticFeed::new(None);
        assert!(TelemetryFeed::latest(&feed).await.unwrap().is_none());
        let mut snap = TelemetrySnapshot::default();
        snap.insert("g", SensorGroup::default());
        feed.set(Some(snap.clone()));
        assert_eq!(TelemetryFeed::latest(&feed).await.unwrap(), Some(snap));
    }
}
