//! Content-addressed event deduplication.
//!
//! Entries are keyed by `(kind, namespace, name, eventType)` and carry a
//! SHA-256 signature of the event payload. An entry older than the TTL no
//! longer influences decisions; a background reclaimer sweeps expired
//! entries on a `ttl` period and on demand after inserts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::event::{ContainerInfo, Event, EventType, ReplicaInfo, ResourceKind};

type Signature = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub event_type: EventType,
}

impl From<&Event> for EventKey {
    fn from(event: &Event) -> Self {
        Self {
            kind: event.kind,
            namespace: event.namespace.clone(),
            name: event.name.clone(),
            event_type: event.event_type,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    signature: Signature,
    observed_at: Instant,
}

/// The notification-relevant projection of an event, hashed for the
/// signature. Observation time is deliberately excluded: two events that
/// differ only in when they were seen are the same notification. Labels
/// are a `BTreeMap` on the event itself, so serialization order is stable.
#[derive(Serialize)]
struct SignaturePayload<'a> {
    kind: ResourceKind,
    namespace: &'a str,
    name: &'a str,
    event_type: EventType,
    labels: &'a std::collections::BTreeMap<String, String>,
    reason: &'a Option<String>,
    message: &'a Option<String>,
    status: &'a Option<String>,
    containers: &'a [ContainerInfo],
    replicas: &'a Option<ReplicaInfo>,
    service_type: &'a Option<String>,
}

pub struct Deduplicator {
    cache: Mutex<HashMap<EventKey, CacheEntry>>,
    ttl: Duration,
    max_size: usize,
    nonce: AtomicU64,
    cleanup_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
    stopped: AtomicBool,
}

impl Deduplicator {
    /// Create a deduplicator and spawn its background reclaimer.
    #[must_use]
    pub fn new(ttl: Duration, max_size: usize) -> Arc<Self> {
        let (cleanup_tx, cleanup_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let dedup = Arc::new(Self {
            cache: Mutex::new(HashMap::new()),
            ttl,
            max_size,
            nonce: AtomicU64::new(0),
            cleanup_tx,
            shutdown_tx,
            stopped: AtomicBool::new(false),
        });

        let reclaimer = dedup.clone();
        tokio::spawn(async move {
            reclaimer.run_reclaimer(cleanup_rx, shutdown_rx).await;
        });

        dedup
    }

    /// Decide whether an event is worth processing.
    ///
    /// True iff no live entry exists for the event's key, or the live
    /// entry's signature differs from the event's. The entry is refreshed
    /// only when the decision is true; a suppressed duplicate does not
    /// extend its own lifetime.
    pub async fn should_process(&self, event: &Event) -> bool {
        let key = EventKey::from(event);
        let signature = self.signature(event);
        let now = Instant::now();

        let mut cache = self.cache.lock().await;

        if let Some(entry) = cache.get(&key) {
            let live = now.duration_since(entry.observed_at) < self.ttl;
            if live && entry.signature == signature {
                return false;
            }
        } else if cache.len() >= self.max_size {
            Self::evict_oldest(&mut cache);
        }

        cache.insert(
            key,
            CacheEntry {
                signature,
                observed_at: now,
            },
        );
        drop(cache);

        // Nudge the reclaimer; dropped when a sweep is already pending.
        let _ = self.cleanup_tx.try_send(());

        true
    }

    /// Number of entries currently held, expired or not.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }

    /// Stop the background reclaimer. Idempotent.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.try_send(());
        }
    }

    fn signature(&self, event: &Event) -> Signature {
        let payload = SignaturePayload {
            kind: event.kind,
            namespace: &event.namespace,
            name: &event.name,
            event_type: event.event_type,
            labels: &event.labels,
            reason: &event.reason,
            message: &event.message,
            status: &event.status,
            containers: &event.containers,
            replicas: &event.replicas,
            service_type: &event.service_type,
        };

        match serde_json::to_vec(&payload) {
            Ok(bytes) => Sha256::digest(&bytes).into(),
            Err(err) => {
                // Fail open: an unhashable payload counts as unique so the
                // notification is never silently dropped.
                warn!(error = %err, "event serialization failed, treating as unique");
                let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
                let mut hasher = Sha256::new();
                hasher.update(nonce.to_be_bytes());
                hasher.finalize().into()
            }
        }
    }

    fn evict_oldest(cache: &mut HashMap<EventKey, CacheEntry>) {
        let oldest = cache
            .iter()
            .min_by_key(|(_, entry)| entry.observed_at)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            debug!(?key, "cache full, evicting oldest entry");
            cache.remove(&key);
        }
    }

    async fn run_reclaimer(
        &self,
        mut cleanup_rx: mpsc::Receiver<()>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = interval_at(Instant::now() + self.ttl, self.ttl);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("dedup reclaimer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.reclaim().await;
                }
                Some(()) = cleanup_rx.recv() => {
                    self.reclaim().await;
                }
            }
        }
    }

    async fn reclaim(&self) {
        let now = Instant::now();
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|_, entry| now.duration_since(entry.observed_at) < self.ttl);
        let removed = before - cache.len();
        drop(cache);

        if removed > 0 {
            debug!(removed, "reclaimed expired dedup entries");
        }
    }
}
