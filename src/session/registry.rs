use crate::broker::BrokerError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Work to run when a session's budget elapses
pub type ExpiryAction = BoxFuture<'static, Result<(), BrokerError>>;

/// An expiry action that failed. Nobody waits on the action, so this is the
/// only trace left besides the log line.
#[derive(Debug, Clone)]
pub struct ExpiryFailure {
    pub session_id: String,
    pub generation: u64,
    pub reason: String,
}

/// Public view of a registry entry
#[derive(Debug, Clone)]
pub struct TimerInfo {
    pub generation: u64,
    pub armed_at: DateTime<Utc>,
    pub fires_at: DateTime<Utc>,
    /// `false` once the timer fired (or its task was cancelled)
    pub pending: bool,
}

struct ExpiryTimer {
    generation: u64,
    armed_at: DateTime<Utc>,
    fires_at: DateTime<Utc>,
    /// Set once the sleep elapsed and the action started
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ExpiryTimer {
    fn is_pending(&self) -> bool {
        !self.fired.load(Ordering::SeqCst) && !self.handle.is_finished()
    }
}

/// Maps session ids to their single expiration timer
pub struct SessionRegistry {
    timers: DashMap<String, ExpiryTimer>,
    generation: AtomicU64,
    failure_reporter: Option<mpsc::UnboundedSender<ExpiryFailure>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            timers: DashMap::new(),
            generation: AtomicU64::new(0),
            failure_reporter: None,
        }
    }

    /// Send every failed expiry action to `reporter`
    pub fn with_failure_reporter(mut self, reporter: mpsc::UnboundedSender<ExpiryFailure>) -> Self {
        self.failure_reporter = Some(reporter);
        self
    }

    /// Schedule `on_expire` after `duration`, superseding any pending timer for `id`.
    ///
    /// A superseded timer that already started its action is left to finish.
    /// Returns the generation number of the new timer.
    pub fn arm(&self, id: &str, duration: Duration, on_expire: ExpiryAction) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let armed_at = Utc::now();
        let fires_at = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|delay| armed_at.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let fired = Arc::new(AtomicBool::new(false));
        let handle = self.spawn_timer(id, generation, duration, on_expire, Arc::clone(&fired));
        let timer = ExpiryTimer {
            generation,
            armed_at,
            fires_at,
            fired,
            handle,
        };

        if let Some(previous) = self.timers.insert(id.to_string(), timer)
            && previous.is_pending()
        {
            previous.handle.abort();
            debug!(
                session_id = %id,
                superseded = previous.generation,
                generation,
                "Superseded pending expiration timer"
            );
        }

        debug!(session_id = %id, generation, ?duration, "Armed expiration timer");
        generation
    }

    fn spawn_timer(
        &self,
        id: &str,
        generation: u64,
        duration: Duration,
        on_expire: ExpiryAction,
        fired: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let session_id = id.to_string();
        let reporter = self.failure_reporter.clone();

        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            fired.store(true, Ordering::SeqCst);

            info!(session_id = %session_id, generation, "Session budget elapsed");
            if let Err(e) = on_expire.await {
                warn!(
                    session_id = %session_id,
                    generation,
                    error = %e,
                    "Expiration action failed"
                );
                if let Some(reporter) = reporter {
                    let _ = reporter.send(ExpiryFailure {
                        session_id,
                        generation,
                        reason: e.to_string(),
                    });
                }
            }
        })
    }

    /// Look up the timer currently stored for `id`
    pub fn lookup(&self, id: &str) -> Option<TimerInfo> {
        self.timers.get(id).map(|timer| TimerInfo {
            generation: timer.generation,
            armed_at: timer.armed_at,
            fires_at: timer.fires_at,
            pending: timer.is_pending(),
        })
    }

    /// Number of timers that have not fired yet
    pub fn pending_count(&self) -> usize {
        self.timers.iter().filter(|timer| timer.is_pending()).count()
    }

    /// Number of ids ever armed; fired entries stay in the map
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
