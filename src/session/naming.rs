//! Session ids and artifact references.

use crate::env;
use crate::session::types::{ArtifactReference, SessionError, SessionId};
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Generates `consumer-<unix millis>` ids.
///
/// Ids are strictly increasing: a call landing in the same millisecond as the
/// previous one gets the previous value plus one.
#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    last: AtomicI64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> SessionId {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let stamp = now.max(previous + 1);
        format!("{}-{}", env::GENERATED_ID_PREFIX, stamp)
    }
}

/// Builds artifact references from the configured download base
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    download_base: String,
}

impl ArtifactLocator {
    pub fn new(download_base: impl Into<String>) -> Self {
        Self {
            download_base: download_base.into(),
        }
    }

    pub fn download_base(&self) -> &str {
        &self.download_base
    }

    pub fn reference(&self, session_id: &str, topic: &str) -> ArtifactReference {
        ArtifactReference {
            topic: topic.to_string(),
            download_url: env::download_url(&self.download_base, session_id, topic),
        }
    }
}

/// Reject names that would escape the data root once used in a file name
pub fn validate_name(kind: &'static str, name: &str) -> Result<(), SessionError> {
    if env::is_safe_name(name) {
        Ok(())
    } else {
        Err(SessionError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}
