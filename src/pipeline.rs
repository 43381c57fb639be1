//! Pipeline wiring and hot-swap.
//!
//! All reloadable components live in one [`Generation`] behind a
//! read-write lock. Handlers snapshot the current generation under the
//! shared side and work only with that snapshot, so a single event never
//! observes components from two configurations. A reload constructs the
//! full replacement generation first, installs it under the exclusive
//! side, and only then stops the displaced deduplicator and batcher;
//! handlers still holding the old snapshot finish against intact (if
//! stopped) components.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::batch::Batcher;
use crate::config::{BatchMode, Config, DEFAULT_TEMPLATE};
use crate::dedup::Deduplicator;
use crate::error::Result;
use crate::event::Event;
use crate::filter::Filter;
use crate::format::Formatter;
use crate::notify::{Notifier, SlackNotifier};

pub type NotifierFactory = Box<dyn Fn(&Config) -> Result<Arc<dyn Notifier>> + Send + Sync>;

/// One configuration generation's component set.
pub struct Generation {
    pub number: u64,
    filter: Filter,
    formatter: Arc<Formatter>,
    notifier: Arc<dyn Notifier>,
    dedup: Option<Arc<Deduplicator>>,
    batcher: Option<Arc<Batcher>>,
}

pub struct Pipeline {
    current: RwLock<Arc<Generation>>,
    // Batch consumer task of the current generation; superseded consumers
    // drain their closed channel and finish on their own.
    batch_consumer: Mutex<Option<JoinHandle<()>>>,
    notifier_factory: NotifierFactory,
    generation_counter: AtomicU64,
}

impl Pipeline {
    /// Build the initial pipeline from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails on a bad filter expression or an unusable webhook client.
    pub async fn new(config: &Config) -> Result<Arc<Self>> {
        Self::with_notifier_factory(
            config,
            Box::new(|config: &Config| {
                Ok(Arc::new(SlackNotifier::new(&config.notifier.slack.webhook_url)?)
                    as Arc<dyn Notifier>)
            }),
        )
        .await
    }

    /// Like [`Pipeline::new`] with a custom sink constructor, so tests can
    /// substitute a recording notifier.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Pipeline::new`].
    pub async fn with_notifier_factory(
        config: &Config,
        notifier_factory: NotifierFactory,
    ) -> Result<Arc<Self>> {
        let generation_counter = AtomicU64::new(1);
        let (generation, consumer) =
            build_generation(config, &notifier_factory, &generation_counter)?;

        Ok(Arc::new(Self {
            current: RwLock::new(generation),
            batch_consumer: Mutex::new(consumer),
            notifier_factory,
            generation_counter,
        }))
    }

    /// Consume events from the watch layer until the channel closes.
    pub fn spawn_event_processor(
        self: &Arc<Self>,
        mut event_rx: mpsc::Receiver<Event>,
    ) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                pipeline.handle_event(event).await;
            }
            debug!("event processor finished");
        })
    }

    /// Run one event through filter, dedup and batcher or direct send.
    pub async fn handle_event(&self, event: Event) {
        // One snapshot per traversal; every component below belongs to the
        // same configuration generation.
        let generation = self.current.read().await.clone();

        if !generation.filter.should_process(&event) {
            debug!(
                kind = %event.kind,
                namespace = %event.namespace,
                name = %event.name,
                event_type = %event.event_type,
                "event filtered out"
            );
            return;
        }

        if let Some(dedup) = &generation.dedup {
            if !dedup.should_process(&event).await {
                debug!(
                    kind = %event.kind,
                    namespace = %event.namespace,
                    name = %event.name,
                    event_type = %event.event_type,
                    "event deduplicated"
                );
                return;
            }
        }

        if let Some(batcher) = &generation.batcher {
            debug!(
                kind = %event.kind,
                name = %event.name,
                "event added to batch"
            );
            batcher.add(event).await;
            return;
        }

        let message = generation.formatter.format_single(&event);
        match generation.notifier.send(&message).await {
            Ok(()) => info!(
                kind = %event.kind,
                namespace = %event.namespace,
                name = %event.name,
                event_type = %event.event_type,
                "notification sent"
            ),
            // Dropped by design; the dedup TTL bounds re-notification and
            // the watch re-lists on reconnect.
            Err(err) => error!(error = %err, "failed to send notification"),
        }
    }

    /// Swap in a new configuration generation.
    ///
    /// The replacement is fully constructed before the exclusive lock is
    /// taken; on any build error the prior generation stays in place.
    ///
    /// # Errors
    ///
    /// Fails on a bad filter expression or an unusable webhook client.
    pub async fn rebuild(&self, config: &Config) -> Result<()> {
        let (generation, consumer) =
            build_generation(config, &self.notifier_factory, &self.generation_counter)?;
        let number = generation.number;

        let displaced = {
            let mut current = self.current.write().await;
            std::mem::replace(&mut *current, generation)
        };
        // The superseded consumer keeps draining until its channel closes.
        let _displaced_consumer =
            std::mem::replace(&mut *self.batch_consumer.lock().await, consumer);

        // Stop the displaced instances only after the swap so in-flight
        // handlers holding the old snapshot complete cleanly.
        if let Some(batcher) = &displaced.batcher {
            batcher.stop().await;
        }
        if let Some(dedup) = &displaced.dedup {
            dedup.stop();
        }

        info!(generation = number, "pipeline components swapped");
        Ok(())
    }

    /// Flush and stop the current generation's components.
    pub async fn shutdown(&self) {
        let generation = self.current.read().await.clone();
        if let Some(batcher) = &generation.batcher {
            batcher.stop().await;
        }
        if let Some(dedup) = &generation.dedup {
            dedup.stop();
        }
        if let Some(consumer) = self.batch_consumer.lock().await.take() {
            // The stop above closed the flush channel; wait for the final
            // batch to go out.
            let _ = consumer.await;
        }
        info!("pipeline stopped");
    }

    /// Generation number observed by the next event.
    pub async fn generation(&self) -> u64 {
        self.current.read().await.number
    }
}

fn build_generation(
    config: &Config,
    notifier_factory: &NotifierFactory,
    counter: &AtomicU64,
) -> Result<(Arc<Generation>, Option<JoinHandle<()>>)> {
    let number = counter.fetch_add(1, Ordering::SeqCst);

    let filter = Filter::new(&config.filters)?;
    let notifier = notifier_factory(config)?;

    let formatter = match Formatter::new(&config.notifier.slack.template) {
        Ok(formatter) => Arc::new(formatter),
        Err(err) => {
            warn!(error = %err, "template failed to compile, using default");
            Arc::new(Formatter::new(DEFAULT_TEMPLATE)?)
        }
    };

    let dedup = if config.deduplication.enabled {
        let ttl = Duration::from_secs(config.deduplication.ttl_seconds);
        let dedup = Deduplicator::new(ttl, config.deduplication.max_cache_size);
        info!(
            ttl_seconds = config.deduplication.ttl_seconds,
            max_cache_size = config.deduplication.max_cache_size,
            "deduplication enabled"
        );
        Some(dedup)
    } else {
        None
    };

    let (batcher, consumer) = if config.batching.enabled {
        let window = Duration::from_secs(config.batching.window_seconds);
        let mode = config.batching.mode.unwrap_or(BatchMode::Smart);
        let smart = config.batching.smart.clone();
        let (batcher, mut flush_rx) = Batcher::new(window);

        // The consumer captures this generation's formatter and notifier,
        // so batches always render and send within one generation.
        let formatter = formatter.clone();
        let notifier = notifier.clone();
        let consumer = tokio::spawn(async move {
            while let Some(batch) = flush_rx.recv().await {
                let message = formatter.format_batch(&batch, mode, &smart);
                match notifier.send(&message).await {
                    Ok(()) => info!(events = batch.events.len(), "batch notification sent"),
                    Err(err) => error!(error = %err, "failed to send batch notification"),
                }
            }
        });

        info!(
            window_seconds = config.batching.window_seconds,
            mode = ?mode,
            "batching enabled"
        );
        (Some(batcher), Some(consumer))
    } else {
        (None, None)
    };

    let generation = Arc::new(Generation {
        number,
        filter,
        formatter,
        notifier,
        dedup,
        batcher,
    });

    Ok((generation, consumer))
}
