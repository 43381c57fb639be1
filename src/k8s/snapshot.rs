//! Typed snapshots of watched objects.
//!
//! A watch hands us whole API objects; `ObjectState` keeps only what the
//! change detector and the event model care about, so the per-object store
//! stays small and comparisons stay cheap.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use kube::{Resource, ResourceExt};

use crate::event::{ContainerInfo, Event, EventType, ReplicaInfo, ResourceKind};

/// The notification-relevant projection of one object revision.
#[derive(Debug, Clone, Default)]
pub struct ObjectState {
    pub namespace: String,
    pub name: String,
    pub resource_version: String,
    pub labels: BTreeMap<String, String>,

    pub status: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub containers: Vec<ContainerInfo>,
    pub replicas: Option<ReplicaInfo>,
    pub service_type: Option<String>,
    /// Service port cardinality, kept for change detection only.
    pub port_count: usize,
}

impl ObjectState {
    /// Ordered container images, the unit the change detector compares.
    #[must_use]
    pub fn images(&self) -> Vec<&str> {
        self.containers.iter().map(|c| c.image.as_str()).collect()
    }

    /// Promote the snapshot into a pipeline event observed now.
    #[must_use]
    pub fn into_event(self, kind: ResourceKind, event_type: EventType) -> Event {
        let mut event = Event::new(kind, self.namespace, self.name, event_type);
        event.labels = self.labels;
        event.status = self.status;
        event.reason = self.reason;
        event.message = self.message;
        event.containers = self.containers;
        event.replicas = self.replicas;
        event.service_type = self.service_type;
        event
    }
}

/// A resource kind the watcher understands end to end: it names its
/// [`ResourceKind`] tag and can project itself into an [`ObjectState`].
pub trait Observed:
    Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>
    + Clone
    + serde::de::DeserializeOwned
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    const KIND: ResourceKind;

    fn object_state(&self) -> ObjectState;
}

fn base_state<K: Observed>(obj: &K) -> ObjectState {
    ObjectState {
        namespace: obj.namespace().unwrap_or_default(),
        name: obj.name_any(),
        resource_version: obj.resource_version().unwrap_or_default(),
        labels: obj.labels().clone(),
        ..ObjectState::default()
    }
}

fn container_infos(containers: &[k8s_openapi::api::core::v1::Container]) -> Vec<ContainerInfo> {
    containers
        .iter()
        .map(|c| ContainerInfo {
            name: c.name.clone(),
            image: c.image.clone().unwrap_or_default(),
        })
        .collect()
}

impl Observed for Pod {
    const KIND: ResourceKind = ResourceKind::Pod;

    fn object_state(&self) -> ObjectState {
        let mut state = base_state(self);
        if let Some(status) = &self.status {
            state.status = status.phase.clone();
            state.reason = status.reason.clone();
            state.message = status.message.clone();
        }
        if let Some(spec) = &self.spec {
            state.containers = container_infos(&spec.containers);
        }
        state
    }
}

impl Observed for Deployment {
    const KIND: ResourceKind = ResourceKind::Deployment;

    fn object_state(&self) -> ObjectState {
        let mut state = base_state(self);
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let (ready, current) = self
            .status
            .as_ref()
            .map(|s| (s.ready_replicas.unwrap_or(0), s.replicas.unwrap_or(0)))
            .unwrap_or((0, 0));
        state.replicas = Some(ReplicaInfo {
            desired,
            ready,
            current,
        });

        if let Some(template_spec) = self
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
        {
            state.containers = container_infos(&template_spec.containers);
        }

        // The Progressing condition carries the rollout story.
        if let Some(condition) = self
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .and_then(|conds| conds.iter().find(|c| c.type_ == "Progressing"))
        {
            state.status = Some(condition.status.clone());
            state.reason = condition.reason.clone();
            state.message = condition.message.clone();
        }

        state
    }
}

impl Observed for Service {
    const KIND: ResourceKind = ResourceKind::Service;

    fn object_state(&self) -> ObjectState {
        let mut state = base_state(self);
        if let Some(spec) = &self.spec {
            state.service_type = spec.type_.clone();
            state.port_count = spec.ports.as_ref().map_or(0, Vec::len);
        }
        state
    }
}

impl Observed for ConfigMap {
    const KIND: ResourceKind = ResourceKind::ConfigMap;

    fn object_state(&self) -> ObjectState {
        base_state(self)
    }
}

impl Observed for Secret {
    const KIND: ResourceKind = ResourceKind::Secret;

    fn object_state(&self) -> ObjectState {
        base_state(self)
    }
}

impl Observed for ReplicaSet {
    const KIND: ResourceKind = ResourceKind::ReplicaSet;

    fn object_state(&self) -> ObjectState {
        let mut state = base_state(self);
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let (ready, current) = self
            .status
            .as_ref()
            .map(|s| (s.ready_replicas.unwrap_or(0), s.replicas))
            .unwrap_or((0, 0));
        state.replicas = Some(ReplicaInfo {
            desired,
            ready,
            current,
        });
        state
    }
}

impl Observed for StatefulSet {
    const KIND: ResourceKind = ResourceKind::StatefulSet;

    fn object_state(&self) -> ObjectState {
        let mut state = base_state(self);
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let (ready, current) = self
            .status
            .as_ref()
            .map(|s| (s.ready_replicas.unwrap_or(0), s.replicas))
            .unwrap_or((0, 0));
        state.replicas = Some(ReplicaInfo {
            desired,
            ready,
            current,
        });
        state
    }
}

impl Observed for DaemonSet {
    const KIND: ResourceKind = ResourceKind::DaemonSet;

    fn object_state(&self) -> ObjectState {
        base_state(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn meta(name: &str, version: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            resource_version: Some(version.to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            ..ObjectMeta::default()
        }
    }

    #[test]
    fn test_pod_state_extraction() {
        let pod = Pod {
            metadata: meta("web-1", "v42"),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web".to_string(),
                    image: Some("nginx:1.27".to_string()),
                    ..Container::default()
                }],
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..PodStatus::default()
            }),
        };

        let state = pod.object_state();
        assert_eq!(state.name, "web-1");
        assert_eq!(state.namespace, "default");
        assert_eq!(state.resource_version, "v42");
        assert_eq!(state.status.as_deref(), Some("Running"));
        assert_eq!(state.images(), ["nginx:1.27"]);
        assert_eq!(state.labels.get("app").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_service_state_extraction() {
        let service = Service {
            metadata: meta("web", "v1"),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                ports: Some(vec![ServicePort::default(), ServicePort::default()]),
                ..ServiceSpec::default()
            }),
            ..Service::default()
        };

        let state = service.object_state();
        assert_eq!(state.service_type.as_deref(), Some("ClusterIP"));
        assert_eq!(state.port_count, 2);
    }

    #[test]
    fn test_into_event_carries_all_fields() {
        let mut state = ObjectState {
            namespace: "default".to_string(),
            name: "api".to_string(),
            ..ObjectState::default()
        };
        state.replicas = Some(ReplicaInfo {
            desired: 2,
            ready: 2,
            current: 2,
        });

        let event = state.into_event(ResourceKind::Deployment, EventType::Added);
        assert_eq!(event.kind, ResourceKind::Deployment);
        assert_eq!(event.event_type, EventType::Added);
        assert_eq!(event.name, "api");
        assert!(event.replicas.is_some());
    }
}
