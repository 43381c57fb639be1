//! Configuration loading and validation.
//!
//! The file is YAML with a closed set of top-level keys; anything
//! unrecognized at the top level is an error. `validate()` applies the
//! documented defaults in place, so the rest of the crate can assume a
//! fully-populated configuration.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::warn;

use crate::error::{Error, Result};
use crate::event::{EventType, ResourceKind};

pub const DEFAULT_TEMPLATE: &str = "[{{ Kind }}] {{ Namespace }}/{{ Name }} was {{ EventType }}";

pub const DEFAULT_DEDUP_TTL_SECONDS: u64 = 300;
pub const DEFAULT_DEDUP_MAX_CACHE_SIZE: usize = 1000;

pub const MIN_BATCH_WINDOW_SECONDS: u64 = 30;
pub const LONG_BATCH_WINDOW_SECONDS: u64 = 600;
pub const DEFAULT_SMART_MAX_EVENTS_PER_GROUP: usize = 5;
pub const DEFAULT_SMART_MAX_TOTAL_EVENTS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub namespace: String,
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub deduplication: DeduplicationConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub kind: ResourceKind,
}

/// One filter rule per resource kind.
///
/// When `expression` is present the basic `event_types`/`labels` pair is
/// inert at match time but still serves as the fallback on evaluation
/// failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    pub resource: ResourceKind,
    #[serde(default)]
    pub event_types: Vec<EventType>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub slack: SlackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub template: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ttl_seconds: u64,
    #[serde(default)]
    pub max_cache_size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub window_seconds: u64,
    #[serde(default)]
    pub mode: Option<BatchMode>,
    #[serde(default)]
    pub smart: SmartBatchingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchMode {
    Detailed,
    Summary,
    Smart,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartBatchingConfig {
    #[serde(default)]
    pub max_events_per_group: usize,
    #[serde(default)]
    pub max_total_events: usize,
    #[serde(default)]
    pub always_show_details: Vec<EventType>,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, fails to parse, or
    /// fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints and apply documented defaults in place.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidation` on an empty namespace, empty resource
    /// list, missing webhook URL, a duplicate filter rule, or an
    /// out-of-range batching window.
    pub fn validate(&mut self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::ConfigValidation("namespace is required".into()));
        }

        if self.resources.is_empty() {
            return Err(Error::ConfigValidation(
                "at least one resource must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for rule in &self.filters {
            if !seen.insert(rule.resource) {
                return Err(Error::ConfigValidation(format!(
                    "duplicate filter rule for resource {}",
                    rule.resource
                )));
            }
        }

        if self.notifier.slack.webhook_url.is_empty() {
            return Err(Error::ConfigValidation(
                "slack webhook URL is required".into(),
            ));
        }

        if self.notifier.slack.template.is_empty() {
            self.notifier.slack.template = DEFAULT_TEMPLATE.to_string();
        }

        if self.deduplication.enabled {
            if self.deduplication.ttl_seconds == 0 {
                self.deduplication.ttl_seconds = DEFAULT_DEDUP_TTL_SECONDS;
            }
            if self.deduplication.max_cache_size == 0 {
                self.deduplication.max_cache_size = DEFAULT_DEDUP_MAX_CACHE_SIZE;
            }
        }

        if self.batching.enabled {
            if self.batching.window_seconds < MIN_BATCH_WINDOW_SECONDS {
                return Err(Error::ConfigValidation(format!(
                    "batching.windowSeconds must be at least {MIN_BATCH_WINDOW_SECONDS} seconds (got {})",
                    self.batching.window_seconds
                )));
            }
            if self.batching.window_seconds > LONG_BATCH_WINDOW_SECONDS {
                warn!(
                    window_seconds = self.batching.window_seconds,
                    "batching window exceeds 10 minutes, consider a shorter window for responsiveness"
                );
            }

            if self.batching.mode.is_none() {
                self.batching.mode = Some(BatchMode::Smart);
            }

            if self.batching.mode == Some(BatchMode::Smart) {
                let smart = &mut self.batching.smart;
                if smart.max_events_per_group == 0 {
                    smart.max_events_per_group = DEFAULT_SMART_MAX_EVENTS_PER_GROUP;
                }
                if smart.max_total_events == 0 {
                    smart.max_total_events = DEFAULT_SMART_MAX_TOTAL_EVENTS;
                }
                if smart.always_show_details.is_empty() {
                    smart.always_show_details = vec![EventType::Deleted];
                }
            }
        }

        Ok(())
    }

    /// The filter rule configured for a resource kind, if any.
    #[must_use]
    pub fn filter_for(&self, kind: ResourceKind) -> Option<&FilterConfig> {
        self.filters.iter().find(|f| f.resource == kind)
    }
}
