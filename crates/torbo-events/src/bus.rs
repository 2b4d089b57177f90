//! The in-process event bus.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use torbo_protocol::{AuditEventRecord, BusEvent, GatewayResult, Severity};
use tracing::{debug, error, trace, warn};

use crate::audit::AuditStore;
use crate::topic::{is_critical_topic, topic_matches};

/// Callback invoked for every event matching a subscription's pattern.
///
/// Handlers run detached from the publisher; a slow or panicking handler
/// never blocks `publish`.
pub type EventHandler = Arc<dyn Fn(BusEvent) + Send + Sync + 'static>;

/// Each subscription owns a queue and a worker task; the publisher only
/// ever enqueues, so per-subscription delivery order matches publish order
/// while a slow handler never blocks `publish`.
struct Subscription {
    pattern: String,
    sender: mpsc::UnboundedSender<BusEvent>,
    worker: tokio::task::JoinHandle<()>,
}

struct StreamingClient {
    pattern: String,
    sender: mpsc::UnboundedSender<String>,
}

/// Publish/subscribe hub with a bounded history and an audit trail.
pub struct EventBus {
    capacity: usize,
    recent: Mutex<VecDeque<BusEvent>>,
    counter: AtomicU64,
    next_subscription_id: AtomicU64,
    subscriptions: RwLock<HashMap<u64, Subscription>>,
    streaming: RwLock<HashMap<String, StreamingClient>>,
    audit: Option<AuditStore>,
}

impl EventBus {
    /// Bus with no durable audit trail (tests, degraded mode).
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            capacity,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            counter: AtomicU64::new(0),
            next_subscription_id: AtomicU64::new(0),
            subscriptions: RwLock::new(HashMap::new()),
            streaming: RwLock::new(HashMap::new()),
            audit: None,
        }
    }

    /// Bus persisting critical events to the audit database at `path`.
    ///
    /// A failed open disables persistence but leaves the bus fully
    /// functional in memory.
    pub fn with_audit(capacity: usize, path: impl AsRef<std::path::Path>) -> Self {
        let audit = match AuditStore::open(path.as_ref()) {
            Ok(store) => Some(store),
            Err(error) => {
                error!(%error, path = %path.as_ref().display(), "audit store unavailable, critical events will not be persisted");
                None
            }
        };
        let mut bus = Self::in_memory(capacity);
        bus.audit = audit;
        bus
    }

    /// Whether critical events are being persisted.
    pub fn audit_enabled(&self) -> bool {
        self.audit.is_some()
    }

    /// Total events published since startup.
    pub fn event_count(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Publish an event: append to the ring, persist if critical, then fan
    /// out to subscribers and streaming clients. Never blocks on either.
    pub async fn publish(
        &self,
        name: &str,
        payload: IndexMap<String, String>,
        source: &str,
    ) -> BusEvent {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let event = BusEvent {
            id: format!("evt-{seq}"),
            name: name.to_owned(),
            payload,
            timestamp: unix_now(),
            source: source.to_owned(),
        };

        if self.capacity > 0 {
            let mut recent = self.recent.lock();
            while recent.len() >= self.capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        if is_critical_topic(name) {
            if let Some(audit) = &self.audit {
                if let Err(error) = audit.record(&event, Severity::for_topic(name)).await {
                    error!(%error, topic = name, "failed to persist critical event");
                }
            }
        }

        {
            let subscriptions = self.subscriptions.read();
            let mut notified = 0usize;
            for sub in subscriptions.values() {
                if topic_matches(&sub.pattern, name) {
                    let _ = sub.sender.send(event.clone());
                    notified += 1;
                }
            }
            trace!(topic = name, subscribers = notified, "dispatching event");
        }

        self.push_to_streams(&event);
        event
    }

    fn push_to_streams(&self, event: &BusEvent) {
        let serialized = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(error) => {
                warn!(%error, topic = %event.name, "event not serializable for streaming");
                return;
            }
        };

        let mut dead = Vec::new();
        {
            let streaming = self.streaming.read();
            for (id, client) in streaming.iter() {
                if !topic_matches(&client.pattern, &event.name) {
                    continue;
                }
                if client.sender.send(serialized.clone()).is_err() {
                    dead.push(id.clone());
                }
            }
        }
        if !dead.is_empty() {
            let mut streaming = self.streaming.write();
            for id in dead {
                debug!(client = %id, "dropping disconnected streaming client");
                streaming.remove(&id);
            }
        }
    }

    /// Register a handler for topics matching `pattern`. Returns the
    /// subscription id for [`unsubscribe`](Self::unsubscribe).
    ///
    /// The handler runs on a dedicated task and sees matching events in
    /// publish order. A panicking handler kills only its own subscription.
    pub fn subscribe(&self, pattern: impl Into<String>, handler: EventHandler) -> u64 {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, mut receiver) = mpsc::unbounded_channel::<BusEvent>();
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                handler(event);
            }
        });
        self.subscriptions.write().insert(
            id,
            Subscription {
                pattern: pattern.into(),
                sender,
                worker,
            },
        );
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        match self.subscriptions.write().remove(&id) {
            Some(sub) => {
                sub.worker.abort();
                true
            }
            None => false,
        }
    }

    /// Attach a live streaming client. Each matching event is sent as one
    /// JSON-serialized line; a failed send detaches the client.
    pub fn add_streaming_client(
        &self,
        id: impl Into<String>,
        pattern: impl Into<String>,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.streaming.write().insert(
            id.into(),
            StreamingClient {
                pattern: pattern.into(),
                sender,
            },
        );
    }

    pub fn remove_streaming_client(&self, id: &str) -> bool {
        self.streaming.write().remove(id).is_some()
    }

    /// The most recent buffered events in publish order, optionally
    /// filtered by pattern before the limit is applied.
    pub fn recent_events(&self, limit: usize, pattern: Option<&str>) -> Vec<BusEvent> {
        let recent = self.recent.lock();
        let filtered: Vec<BusEvent> = recent
            .iter()
            .filter(|event| pattern.is_none_or(|p| topic_matches(p, &event.name)))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit);
        filtered[start..].to_vec()
    }

    /// Persisted critical events, newest first, optionally filtered by
    /// exact topic. Empty when the audit store is unavailable.
    pub async fn critical_events(
        &self,
        limit: usize,
        topic: Option<&str>,
    ) -> GatewayResult<Vec<AuditEventRecord>> {
        match &self.audit {
            Some(audit) => audit.recent(limit, topic).await,
            None => Ok(Vec::new()),
        }
    }

    /// Derived severity for a topic, exposed for dashboards.
    pub fn severity_of(topic: &str) -> Severity {
        Severity::for_topic(topic)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("published", &self.event_count())
            .field("audit_enabled", &self.audit_enabled())
            .finish_non_exhaustive()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
