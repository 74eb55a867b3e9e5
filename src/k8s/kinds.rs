//! `ResourceKind` and its per-kind capability record.
//!
//! The corpus drives per-kind behaviour through a `HashMap<String, Arc<dyn
//! ResourceHandler>>` registry populated at startup (see
//! `resource_registry.rs` in the teacher). Here the set of kinds is fixed and
//! known at compile time, so a capability record keyed by an enum variant
//! replaces the dynamic registry while keeping the same "ask the registry,
//! don't match on strings everywhere" shape.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Nodes,
    Components,
    Services,
    Deployments,
    StatefulSets,
    DaemonSets,
    Pods,
    Containers,
    Secrets,
    Ingresses,
    Pvcs,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 11] = [
        ResourceKind::Nodes,
        ResourceKind::Components,
        ResourceKind::Services,
        ResourceKind::Deployments,
        ResourceKind::StatefulSets,
        ResourceKind::DaemonSets,
        ResourceKind::Pods,
        ResourceKind::Containers,
        ResourceKind::Secrets,
        ResourceKind::Ingresses,
        ResourceKind::Pvcs,
    ];

    /// The lowercase token used in metric keys, CLI exclude-lists and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Nodes => "nodes",
            ResourceKind::Components => "components",
            ResourceKind::Services => "services",
            ResourceKind::Deployments => "deployments",
            ResourceKind::StatefulSets => "statefulsets",
            ResourceKind::DaemonSets => "daemonsets",
            ResourceKind::Pods => "pods",
            ResourceKind::Containers => "containers",
            ResourceKind::Secrets => "secrets",
            ResourceKind::Ingresses => "ingresses",
            ResourceKind::Pvcs => "pvcs",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    /// True for cluster-scoped kinds that never carry a namespace.
    pub fn is_cluster_scoped(self) -> bool {
        matches!(self, ResourceKind::Nodes | ResourceKind::Components)
    }

    /// True if the kind is backed directly by a watch/list against the
    /// upstream API, as opposed to being derived from another store.
    pub fn has_own_store(self) -> bool {
        !matches!(self, ResourceKind::Containers)
    }

    /// True if the upstream API offers a streaming watch for this kind.
    /// `components` and `pvcs` are relist-only in this deployment.
    pub fn supports_watch(self) -> bool {
        !matches!(self, ResourceKind::Components | ResourceKind::Pvcs | ResourceKind::Containers)
    }

    /// True if the kind participates in discovery-gated metric/inventory dispatch.
    pub fn participates_in_discovery(self) -> bool {
        true
    }

    /// True for kinds whose "resend" task is actually an aggregation over
    /// another store rather than a per-record resend.
    pub fn is_aggregated(self) -> bool {
        matches!(self, ResourceKind::Services | ResourceKind::Containers)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_str(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn unknown_kind_is_none() {
        assert_eq!(ResourceKind::from_str("bogus"), None);
    }

    #[test]
    fn cluster_scoped_kinds() {
        assert!(ResourceKind::Nodes.is_cluster_scoped());
        assert!(ResourceKind::Components.is_cluster_scoped());
        assert!(!ResourceKind::Pods.is_cluster_scoped());
    }
}
