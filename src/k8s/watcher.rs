//! K8s watch stream manager.
//!
//! One watch loop per configured kind, all scoped to a single namespace.
//! Each loop keeps the last-seen [`ObjectState`] per object so updates can
//! run through the change detector, and restarts its stream on expiry or
//! error. Domain events flow to the pipeline over an mpsc channel.

use std::collections::HashMap;
use std::time::Duration;

use futures::{pin_mut, TryStreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use kube::api::{Api, WatchEvent, WatchParams};
use kube::Client;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::event::{Event, EventType, ResourceKind};

use super::detect;
use super::snapshot::{ObjectState, Observed};

/// Watch stream timeout in seconds (294 vs 300 to allow 6 seconds for graceful shutdown)
const WATCH_TIMEOUT_SECONDS: u32 = 294;

/// Brief delay between stream restarts
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Backoff after a failed stream before trying again
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// How a single watch stream finished.
enum StreamEnd {
    /// The server closed the stream (timeout, error event); reconnect.
    Expired,
    /// The pipeline side of the event channel is gone; stop watching.
    Closed,
}

/// Spawns and supervises the per-kind watch loops.
pub struct WatchManager {
    client: Client,
    namespace: String,
    kinds: Vec<ResourceKind>,
    event_tx: mpsc::Sender<Event>,
}

impl WatchManager {
    #[must_use]
    pub fn new(
        client: Client,
        namespace: String,
        kinds: Vec<ResourceKind>,
        event_tx: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            client,
            namespace,
            kinds,
            event_tx,
        }
    }

    /// Start one watch loop per configured kind (namespace-scoped).
    ///
    /// Returns a shutdown sender; sending `true` stops every loop.
    #[must_use]
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        for kind in &self.kinds {
            self.spawn_kind(*kind, shutdown_rx.clone());
        }

        info!(
            namespace = %self.namespace,
            kinds = ?self.kinds,
            "🔍 watch streams started"
        );

        shutdown_tx
    }

    fn spawn_kind(&self, kind: ResourceKind, shutdown_rx: watch::Receiver<bool>) {
        let client = self.client.clone();
        let namespace = self.namespace.clone();
        let event_tx = self.event_tx.clone();

        match kind {
            ResourceKind::Pod => spawn_watch_loop::<Pod>(client, namespace, event_tx, shutdown_rx),
            ResourceKind::Deployment => {
                spawn_watch_loop::<Deployment>(client, namespace, event_tx, shutdown_rx);
            }
            ResourceKind::Service => {
                spawn_watch_loop::<Service>(client, namespace, event_tx, shutdown_rx);
            }
            ResourceKind::ConfigMap => {
                spawn_watch_loop::<ConfigMap>(client, namespace, event_tx, shutdown_rx);
            }
            ResourceKind::Secret => {
                spawn_watch_loop::<Secret>(client, namespace, event_tx, shutdown_rx);
            }
            ResourceKind::ReplicaSet => {
                spawn_watch_loop::<ReplicaSet>(client, namespace, event_tx, shutdown_rx);
            }
            ResourceKind::StatefulSet => {
                spawn_watch_loop::<StatefulSet>(client, namespace, event_tx, shutdown_rx);
            }
            ResourceKind::DaemonSet => {
                spawn_watch_loop::<DaemonSet>(client, namespace, event_tx, shutdown_rx);
            }
        }
    }
}

fn spawn_watch_loop<K: Observed>(
    client: Client,
    namespace: String,
    event_tx: mpsc::Sender<Event>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        info!(kind = %K::KIND, "🔍 watch loop started");

        let api: Api<K> = Api::namespaced(client, &namespace);
        let mut store: HashMap<String, ObjectState> = HashMap::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!(kind = %K::KIND, "watch loop shutting down");
                    break;
                }
                result = watch_stream(&api, &mut store, &event_tx) => match result {
                    Ok(StreamEnd::Expired) => {
                        debug!(kind = %K::KIND, "watch stream ended, restarting");
                    }
                    Ok(StreamEnd::Closed) => break,
                    Err(e) => {
                        error!(kind = %K::KIND, error = %e, "❌ watch stream failed, restarting in 5s");
                        sleep(ERROR_BACKOFF).await;
                    }
                }
            }

            sleep(RESTART_DELAY).await;
        }
    });
}

async fn watch_stream<K: Observed>(
    api: &Api<K>,
    store: &mut HashMap<String, ObjectState>,
    event_tx: &mpsc::Sender<Event>,
) -> Result<StreamEnd> {
    let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECONDS);

    let stream = api.watch(&wp, "0").await?;
    pin_mut!(stream);

    while let Some(watch_event) = stream.try_next().await? {
        let emitted = match watch_event {
            WatchEvent::Added(obj) => on_added(store, &obj),
            WatchEvent::Modified(obj) => on_modified(store, &obj),
            WatchEvent::Deleted(obj) => on_deleted(store, &obj),
            WatchEvent::Bookmark(_) => None,
            WatchEvent::Error(e) => {
                warn!(kind = %K::KIND, error = %e, "watch error event");
                return Ok(StreamEnd::Expired);
            }
        };

        if let Some(event) = emitted {
            if event_tx.send(event).await.is_err() {
                return Ok(StreamEnd::Closed);
            }
        }
    }

    Ok(StreamEnd::Expired)
}

fn on_added<K: Observed>(store: &mut HashMap<String, ObjectState>, obj: &K) -> Option<Event> {
    let state = obj.object_state();
    let name = state.name.clone();

    // A re-list after reconnect replays every object as Added; objects we
    // already know go through update detection instead.
    let event = match store.get(&name) {
        Some(old) => {
            if detect::is_meaningful(K::KIND, old, &state) {
                debug!(kind = %K::KIND, name = %name, "📝 re-listed with changes");
                Some(state.clone().into_event(K::KIND, EventType::Updated))
            } else {
                None
            }
        }
        None => {
            info!(kind = %K::KIND, name = %name, "➕ added");
            Some(state.clone().into_event(K::KIND, EventType::Added))
        }
    };

    store.insert(name, state);
    event
}

fn on_modified<K: Observed>(store: &mut HashMap<String, ObjectState>, obj: &K) -> Option<Event> {
    let state = obj.object_state();
    let name = state.name.clone();

    let event = match store.get(&name) {
        Some(old) if !detect::is_meaningful(K::KIND, old, &state) => None,
        // No prior snapshot means we cannot prove the update is a no-op;
        // assume it matters.
        _ => {
            debug!(kind = %K::KIND, name = %name, "📝 modified");
            Some(state.clone().into_event(K::KIND, EventType::Updated))
        }
    };

    store.insert(name, state);
    event
}

fn on_deleted<K: Observed>(store: &mut HashMap<String, ObjectState>, obj: &K) -> Option<Event> {
    let state = obj.object_state();
    store.remove(&state.name);
    info!(kind = %K::KIND, name = %state.name, "🗑️  deleted");
    Some(state.into_event(K::KIND, EventType::Deleted))
}
