//! Per-kind event filtering.
//!
//! A rule with an `expression` delegates entirely to the compiled
//! predicate; the basic `(eventTypes, labels)` pair only comes back into
//! play as the fallback when evaluation fails at runtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::config::FilterConfig;
use crate::error::Result;
use crate::event::{Event, EventType, ResourceKind};
use crate::expr::CompiledExpr;

pub struct Filter {
    rules: HashMap<ResourceKind, CompiledRule>,
}

struct CompiledRule {
    event_types: Vec<EventType>,
    labels: BTreeMap<String, String>,
    expression: Option<CompiledExpr>,
    // Set once the first evaluation failure for this rule has been logged
    // at warn; later failures drop to debug. Reset by rebuilding the rule.
    eval_failure_logged: AtomicBool,
}

impl Filter {
    /// Compile a rule set.
    ///
    /// # Errors
    ///
    /// Returns `BadExpression` if any rule's predicate fails to compile;
    /// the caller aborts the component build in that case.
    pub fn new(filters: &[FilterConfig]) -> Result<Self> {
        let mut rules = HashMap::new();
        for rule in filters {
            let expression = match &rule.expression {
                Some(source) => Some(CompiledExpr::compile(source)?),
                None => None,
            };
            rules.insert(
                rule.resource,
                CompiledRule {
                    event_types: rule.event_types.clone(),
                    labels: rule.labels.clone(),
                    expression,
                    eval_failure_logged: AtomicBool::new(false),
                },
            );
        }
        Ok(Self { rules })
    }

    /// Decide whether an event passes the configured rules.
    ///
    /// Events for kinds without a rule always pass.
    #[must_use]
    pub fn should_process(&self, event: &Event) -> bool {
        let Some(rule) = self.rules.get(&event.kind) else {
            return true;
        };

        if let Some(expression) = &rule.expression {
            match expression.evaluate(event) {
                Ok(verdict) => return verdict,
                Err(err) => {
                    if rule.eval_failure_logged.swap(true, Ordering::Relaxed) {
                        debug!(kind = %event.kind, error = %err, "expression evaluation failed");
                    } else {
                        warn!(
                            kind = %event.kind,
                            expression = expression.source(),
                            error = %err,
                            "expression evaluation failed, falling back to basic filter"
                        );
                    }
                    if rule.event_types.is_empty() && rule.labels.is_empty() {
                        // No basic configuration to fall back to.
                        return false;
                    }
                }
            }
        }

        rule.matches_event_type(event.event_type) && rule.matches_labels(&event.labels)
    }
}

impl CompiledRule {
    fn matches_event_type(&self, event_type: EventType) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event_type)
    }

    fn matches_labels(&self, event_labels: &BTreeMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(key, value)| event_labels.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(resource: ResourceKind) -> FilterConfig {
        FilterConfig {
            resource,
            event_types: Vec::new(),
            labels: BTreeMap::new(),
            expression: None,
        }
    }

    fn pod_event(event_type: EventType) -> Event {
        let mut event = Event::new(ResourceKind::Pod, "default", "web-1", event_type);
        event.labels.insert("app".to_string(), "web".to_string());
        event.labels.insert("tier".to_string(), "frontend".to_string());
        event
    }

    #[test]
    fn test_no_rule_passes() {
        let filter = Filter::new(&[]).unwrap();
        assert!(filter.should_process(&pod_event(EventType::Added)));
    }

    #[test]
    fn test_event_type_gating() {
        let mut config = rule(ResourceKind::Pod);
        config.event_types = vec![EventType::Added, EventType::Deleted];
        let filter = Filter::new(&[config]).unwrap();

        assert!(filter.should_process(&pod_event(EventType::Added)));
        assert!(filter.should_process(&pod_event(EventType::Deleted)));
        assert!(!filter.should_process(&pod_event(EventType::Updated)));
    }

    #[test]
    fn test_label_subset_matching() {
        let mut config = rule(ResourceKind::Pod);
        config.labels.insert("app".to_string(), "web".to_string());
        let filter = Filter::new(&[config]).unwrap();

        // Extra labels on the event are ignored.
        assert!(filter.should_process(&pod_event(EventType::Added)));

        let mut config = rule(ResourceKind::Pod);
        config.labels.insert("app".to_string(), "api".to_string());
        let filter = Filter::new(&[config]).unwrap();
        assert!(!filter.should_process(&pod_event(EventType::Added)));

        // A required label the event lacks fails the match.
        let mut config = rule(ResourceKind::Pod);
        config.labels.insert("env".to_string(), "prod".to_string());
        let filter = Filter::new(&[config]).unwrap();
        assert!(!filter.should_process(&pod_event(EventType::Added)));
    }

    #[test]
    fn test_expression_takes_precedence_over_basic() {
        let mut config = rule(ResourceKind::Pod);
        // Basic fields would reject UPDATED, but the expression allows it.
        config.event_types = vec![EventType::Added];
        config.expression = Some("event.eventType == 'UPDATED'".to_string());
        let filter = Filter::new(&[config]).unwrap();

        assert!(filter.should_process(&pod_event(EventType::Updated)));
        assert!(!filter.should_process(&pod_event(EventType::Added)));
    }

    #[test]
    fn test_expression_decision_matches_predicate() {
        let mut config = rule(ResourceKind::Pod);
        config.expression = Some("event.labels.app == 'web'".to_string());
        let filter = Filter::new(&[config]).unwrap();
        assert!(filter.should_process(&pod_event(EventType::Updated)));

        let mut config = rule(ResourceKind::Pod);
        config.expression = Some("event.labels.app == 'api'".to_string());
        let filter = Filter::new(&[config]).unwrap();
        assert!(!filter.should_process(&pod_event(EventType::Updated)));
    }

    #[test]
    fn test_eval_failure_falls_back_to_basic() {
        let mut config = rule(ResourceKind::Pod);
        // event.labels.env is missing on the event, so evaluation errors.
        config.expression = Some("event.labels.env == 'prod'".to_string());
        config.event_types = vec![EventType::Added];
        let filter = Filter::new(&[config]).unwrap();

        assert!(filter.should_process(&pod_event(EventType::Added)));
        assert!(!filter.should_process(&pod_event(EventType::Updated)));
    }

    #[test]
    fn test_eval_failure_without_basic_drops() {
        let mut config = rule(ResourceKind::Pod);
        config.expression = Some("event.labels.env == 'prod'".to_string());
        let filter = Filter::new(&[config]).unwrap();

        assert!(!filter.should_process(&pod_event(EventType::Added)));
    }

    #[test]
    fn test_bad_expression_fails_build() {
        let mut config = rule(ResourceKind::Pod);
        config.expression = Some("event.kind ==".to_string());
        assert!(Filter::new(&[config]).is_err());
    }

    #[test]
    fn test_rule_only_applies_to_its_kind() {
        let mut config = rule(ResourceKind::Deployment);
        config.event_types = vec![EventType::Deleted];
        let filter = Filter::new(&[config]).unwrap();

        // Pod events are not constrained by the Deployment rule.
        assert!(filter.should_process(&pod_event(EventType::Added)));
    }
}
