//! Semantic change detection between object revisions.
//!
//! Creations and deletions always notify; this module decides which
//! updates do. Equal resource versions short-circuit to "no change", then
//! a per-kind rule decides whether the transition is worth a message.

use crate::event::ResourceKind;

use super::snapshot::ObjectState;

/// Whether the transition from `old` to `new` is materially interesting.
///
/// Kinds not listed below (`ConfigMap`, `Secret`, `DaemonSet`) never
/// notify on update; their churn is almost always noise.
#[must_use]
pub fn is_meaningful(kind: ResourceKind, old: &ObjectState, new: &ObjectState) -> bool {
    if old.resource_version == new.resource_version {
        return false;
    }

    match kind {
        ResourceKind::Pod => old.status != new.status || old.images() != new.images(),
        ResourceKind::Deployment => {
            replicas_changed(old, new) || old.images() != new.images()
        }
        ResourceKind::ReplicaSet | ResourceKind::StatefulSet => replicas_changed(old, new),
        ResourceKind::Service => {
            old.service_type != new.service_type || old.port_count != new.port_count
        }
        ResourceKind::ConfigMap | ResourceKind::Secret | ResourceKind::DaemonSet => false,
    }
}

fn replicas_changed(old: &ObjectState, new: &ObjectState) -> bool {
    let desired = |s: &ObjectState| s.replicas.map(|r| r.desired);
    let ready = |s: &ObjectState| s.replicas.map(|r| r.ready);
    desired(old) != desired(new) || ready(old) != ready(new)
}
