use crate::broker::Record;
use crate::env;
use crate::session::types::SinkError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Line closing every entry
pub const ENTRY_DELIMITER: &str = "----";

/// Append-only writer of per-session, per-topic artifacts
#[derive(Debug, Clone)]
pub struct RecordSink {
    root: PathBuf,
    sync_writes: bool,
}

impl RecordSink {
    /// Create a sink writing under `root`, which must already exist
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sync_writes: true,
        }
    }

    /// Skip `fsync` after each append
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, session_id: &str, topic: &str) -> PathBuf {
        env::artifact_path(&self.root, session_id, topic)
    }

    /// Append one formatted entry for `record`, creating the artifact if needed.
    ///
    /// Returns the number of bytes written.
    pub async fn append(
        &self,
        session_id: &str,
        topic: &str,
        record: &Record,
    ) -> Result<u64, SinkError> {
        let path = self.artifact_path(session_id, topic);
        let entry = format_entry(record);

        let io_error = |source: std::io::Error| SinkError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error)?;
        file.write_all(entry.as_bytes()).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;
        if self.sync_writes {
            file.sync_data().await.map_err(io_error)?;
        }

        debug!(
            session_id = %session_id,
            topic = %topic,
            partition = record.partition,
            offset = record.offset,
            bytes = entry.len(),
            "Appended record"
        );
        Ok(entry.len() as u64)
    }
}

fn render_bytes(bytes: Option<&[u8]>) -> String {
    match bytes {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => "null".to_string(),
    }
}

/// Render a record as a human readable block.
///
/// ```text
/// partition=0 [42]
/// TS=1700000000000
/// key=user-1
/// value={"total":10}
/// headers={"source":"web"}
/// ----
/// ```
pub fn format_entry(record: &Record) -> String {
    let headers: BTreeMap<&str, String> = record
        .headers
        .iter()
        .flatten()
        .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value).into_owned()))
        .collect();
    let headers = serde_json::to_string(&headers).unwrap_or_else(|_| "{}".to_string());

    format!(
        "partition={} [{}]\nTS={}\nkey={}\nvalue={}\nheaders={}\n{}\n",
        record.partition,
        record.offset,
        record.timestamp,
        render_bytes(record.key.as_deref()),
        render_bytes(record.value.as_deref()),
        headers,
        ENTRY_DELIMITER,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Headers;

    fn record(offset: i64, value: &str) -> Record {
        Record {
            topic: "orders".to_string(),
            partition: 2,
            offset,
            timestamp: 1_700_000_000_000,
            key: Some(b"user-1".to_vec()),
            value: Some(value.as_bytes().to_vec()),
            headers: None,
        }
    }

    #[test]
    fn test_format_entry_without_headers() {
        let entry = format_entry(&record(42, "{\"total\":10}"));

        assert_eq!(
            entry,
            "partition=2 [42]\nTS=1700000000000\nkey=user-1\nvalue={\"total\":10}\nheaders={}\n----\n"
        );
    }

    #[test]
    fn test_format_entry_with_headers_and_nulls() {
        let mut headers = Headers::new();
        headers.insert("trace".to_string(), b"abc".to_vec());
        headers.insert("source".to_string(), b"web".to_vec());

        let tombstone = Record {
            key: None,
            value: None,
            headers: Some(headers),
            ..record(7, "")
        };

        let entry = format_entry(&tombstone);
        assert!(entry.contains("key=null\n"));
        assert!(entry.contains("value=null\n"));
        // Sorted by header name
        assert!(entry.contains("headers={\"source\":\"web\",\"trace\":\"abc\"}\n"));
    }

    #[test]
    fn test_empty_headers_render_like_absent_headers() {
        let empty = Record {
            headers: Some(Headers::new()),
            ..record(1, "v")
        };
        assert_eq!(format_entry(&empty), format_entry(&record(1, "v")));
    }

    #[tokio::test]
    async fn test_append_only_grows_artifact() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sink = RecordSink::new(temp_dir.path());

        let first = sink.append("g1", "orders", &record(0, "a")).await.unwrap();
        let second = sink.append("g1", "orders", &record(1, "b")).await.unwrap();

        let path = temp_dir.path().join("g1-orders.txt");
        let content = tokio::fs::read_to_string(&path).await.unwrap();

        assert_eq!(content.len() as u64, first + second);
        let first_at = content.find("[0]").unwrap();
        let second_at = content.find("[1]").unwrap();
        assert!(first_at < second_at);
        assert_eq!(content.matches("----\n").count(), 2);
    }

    #[tokio::test]
    async fn test_append_keeps_existing_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("g1-orders.txt");
        tokio::fs::write(&path, "previous run\n").await.unwrap();

        let sink = RecordSink::new(temp_dir.path()).with_sync_writes(false);
        sink.append("g1", "orders", &record(0, "a")).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("previous run\npartition=2 [0]\n"));
    }

    #[tokio::test]
    async fn test_append_failure_reports_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let missing_root = temp_dir.path().join("missing");
        let sink = RecordSink::new(&missing_root);

        let error = sink.append("g1", "orders", &record(0, "a")).await.unwrap_err();
        let SinkError::Io { path, source } = error;
        assert_eq!(path, missing_root.join("g1-orders.txt"));
        assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
    }
}
