//! Configuration hot-reload.
//!
//! A polling watcher rather than an fs-notify subscription: the config
//! file is tiny and the poll period is short, and polling sees through the
//! symlink shuffle orchestrator-mounted config volumes perform on update
//! (the path's resolved content changes even when no write event lands on
//! the path itself). On every observed content change the file is
//! re-parsed and re-validated; failures keep the prior configuration.

use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;

const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(2);

type ReloadCallback = Box<dyn Fn(Config) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct ConfigWatcher {
    config_path: PathBuf,
    poll_period: Duration,
    callbacks: Vec<ReloadCallback>,
}

impl ConfigWatcher {
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            poll_period: DEFAULT_POLL_PERIOD,
            callbacks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_poll_period(mut self, poll_period: Duration) -> Self {
        self.poll_period = poll_period;
        self
    }

    /// Register a callback invoked after each successful reload.
    /// Callbacks run in registration order.
    pub fn add_callback<F>(&mut self, callback: F)
    where
        F: Fn(Config) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Start watching. Returns a shutdown sender.
    #[must_use]
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            info!(path = %self.config_path.display(), "configuration hot-reload enabled");

            let mut fingerprint = self.read_fingerprint();
            let mut ticker = interval(self.poll_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!("config watcher shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let current = self.read_fingerprint();
                        if current.is_some() && current != fingerprint {
                            info!("configuration file changed, reloading");
                            self.reload().await;
                        }
                        if current.is_some() {
                            fingerprint = current;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Content hash of the config file, following symlinks. `None` while
    /// the file is unreadable (mid-swap, for instance).
    fn read_fingerprint(&self) -> Option<[u8; 32]> {
        match std::fs::read(&self.config_path) {
            Ok(bytes) => Some(Sha256::digest(&bytes).into()),
            Err(err) => {
                debug!(error = %err, "config file not readable");
                None
            }
        }
    }

    async fn reload(&self) {
        let config = match Config::load(&self.config_path) {
            Ok(config) => config,
            Err(err) => {
                // Keep running on the prior configuration.
                warn!(error = %err, "failed to reload config, keeping previous");
                return;
            }
        };

        info!(namespace = %config.namespace, "configuration reloaded");

        for callback in &self.callbacks {
            if let Err(err) = callback(config.clone()).await {
                error!(error = %err, "reload callback failed");
            }
        }
    }
}
