//! Windowed event aggregation.
//!
//! The first `add` after a flush (or after construction) arms a
//! single-shot timer; later adds never extend it, so a steady trickle of
//! events cannot defer notification indefinitely. Flushes leave the
//! batcher through an mpsc channel after the internal lock is released,
//! so the consumer may freely call back into the pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::event::{Event, EventType, ResourceKind};

const FLUSH_CHANNEL_CAPACITY: usize = 16;

/// Events accumulated over one window, in insertion order.
#[derive(Debug, Clone)]
pub struct Batch {
    pub events: Vec<Event>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Window length on the monotonic clock; wall timestamps can jump.
    pub elapsed: Duration,
}

/// Events of a batch sharing `(kind, eventType)`, in first-arrival order.
#[derive(Debug)]
pub struct EventGroup<'a> {
    pub kind: ResourceKind,
    pub event_type: EventType,
    pub events: Vec<&'a Event>,
}

impl Batch {
    /// Project the batch into its `(kind, eventType)` groups.
    #[must_use]
    pub fn groups(&self) -> Vec<EventGroup<'_>> {
        let mut groups: Vec<EventGroup<'_>> = Vec::new();
        for event in &self.events {
            match groups
                .iter_mut()
                .find(|g| g.kind == event.kind && g.event_type == event.event_type)
            {
                Some(group) => group.events.push(event),
                None => groups.push(EventGroup {
                    kind: event.kind,
                    event_type: event.event_type,
                    events: vec![event],
                }),
            }
        }
        groups
    }

    /// Window length rounded to whole seconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn duration_seconds(&self) -> u64 {
        self.elapsed.as_secs_f64().round() as u64
    }
}

struct State {
    events: Vec<Event>,
    start_time: DateTime<Utc>,
    started_at: Instant,
    // Bumped on every flush; a pending timer whose epoch no longer
    // matches has been superseded and must not flush again.
    epoch: u64,
    stopped: bool,
}

pub struct Batcher {
    window: Duration,
    state: Mutex<State>,
    // Taken (and thereby closed) on stop so the consuming side can drain
    // the final flush and finish even while `Arc<Batcher>` clones survive.
    flush_tx: Mutex<Option<mpsc::Sender<Batch>>>,
}

impl Batcher {
    /// Create a batcher and the receiving end of its flush channel.
    ///
    /// The caller owns the receiver and is expected to consume batches on
    /// its own task; `stop` closes the channel.
    #[must_use]
    pub fn new(window: Duration) -> (Arc<Self>, mpsc::Receiver<Batch>) {
        let (flush_tx, flush_rx) = mpsc::channel(FLUSH_CHANNEL_CAPACITY);
        let batcher = Arc::new(Self {
            window,
            state: Mutex::new(State {
                events: Vec::new(),
                start_time: Utc::now(),
                started_at: Instant::now(),
                epoch: 0,
                stopped: false,
            }),
            flush_tx: Mutex::new(Some(flush_tx)),
        });
        (batcher, flush_rx)
    }

    /// Accept an event into the current window.
    ///
    /// Returns immediately; the batch is emitted when the window timer
    /// fires. Events offered after `stop` are discarded.
    pub async fn add(self: &Arc<Self>, event: Event) {
        let mut state = self.state.lock().await;
        if state.stopped {
            debug!("batcher stopped, dropping event");
            return;
        }

        state.events.push(event);

        if state.events.len() == 1 {
            state.start_time = Utc::now();
            state.started_at = Instant::now();
            let epoch = state.epoch;
            drop(state);

            let batcher = self.clone();
            tokio::spawn(async move {
                sleep(batcher.window).await;
                batcher.flush_epoch(epoch).await;
            });
        }
    }

    /// Flush whatever has accumulated, refuse all further events and close
    /// the flush channel.
    pub async fn stop(&self) {
        let batch = {
            let mut state = self.state.lock().await;
            state.stopped = true;
            Self::take_batch(&mut state)
        };
        let flush_tx = self.flush_tx.lock().await.take();
        if let (Some(batch), Some(tx)) = (batch, flush_tx) {
            let _ = tx.send(batch).await;
        }
    }

    async fn flush_epoch(&self, epoch: u64) {
        let batch = {
            let mut state = self.state.lock().await;
            if state.epoch != epoch {
                // A stop (or an earlier flush) already handled this window.
                return;
            }
            Self::take_batch(&mut state)
        };
        let flush_tx = self.flush_tx.lock().await.clone();
        if let (Some(batch), Some(tx)) = (batch, flush_tx) {
            // Locks released above; the consumer may re-enter the pipeline.
            let _ = tx.send(batch).await;
        }
    }

    fn take_batch(state: &mut State) -> Option<Batch> {
        state.epoch += 1;
        if state.events.is_empty() {
            return None;
        }
        Some(Batch {
            events: std::mem::take(&mut state.events),
            start_time: state.start_time,
            end_time: Utc::now(),
            elapsed: state.started_at.elapsed(),
        })
    }
}
