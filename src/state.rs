//! Process-wide shared state: one lock guarding every kind's store plus the
//! two ledgers (see SPEC_FULL.md §5 and §9's "process-wide state" design
//! note). The teacher spreads the equivalent of this across
//! `SharedWatchCache.active_watches` and per-kind `resource_cache` maps
//! behind their own `RwLock`s; here everything that a scheduler tick reads
//! together lives behind a single `Mutex` so "snapshot under lock, do I/O
//! after release" is a single, auditable discipline rather than N locks
//! taken in some order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::errors::ProjectionResult;
use crate::k8s::kinds::ResourceKind;
use crate::k8s::ledger::Ledger;
use crate::k8s::store::{ProjectedRecord, ResourceStore, UpsertOutcome};

struct Inner {
    stores: HashMap<ResourceKind, ResourceStore>,
    discovery_ledger: Ledger,
    refresh_ledger: Ledger,
}

/// Cheaply cloneable handle shared by every spawned task.
#[derive(Clone)]
pub struct ClusterState {
    inner: Arc<Mutex<Inner>>,
}

impl ClusterState {
    pub fn new() -> Self {
        let mut stores = HashMap::new();
        for kind in ResourceKind::ALL {
            if kind.has_own_store() {
                stores.insert(kind, ResourceStore::new());
            }
        }
        Self {
            inner: Arc::new(Mutex::new(Inner {
                stores,
                discovery_ledger: Ledger::new(),
                refresh_ledger: Ledger::new(),
            })),
        }
    }

    pub async fn upsert(
        &self,
        kind: ResourceKind,
        raw: &Value,
        namespace_exclude_re: Option<&regex::Regex>,
    ) -> ProjectionResult<(UpsertOutcome, Option<ProjectedRecord>)> {
        let mut guard = self.inner.lock().await;
        let store = guard.stores.entry(kind).or_default();
        store.upsert(kind, raw, namespace_exclude_re)
    }

    pub async fn delete_by_uid(&self, kind: ResourceKind, uid: &str) -> Option<ProjectedRecord> {
        let mut guard = self.inner.lock().await;
        guard.stores.get_mut(&kind)?.delete(uid)
    }

    pub async fn snapshot(&self, kind: ResourceKind) -> Vec<ProjectedRecord> {
        let guard = self.inner.lock().await;
        guard.stores.get(&kind).map(ResourceStore::snapshot).unwrap_or_default()
    }

    /// Relist reconciliation: upsert every item in `raw_list`, then drop any
    /// store entry absent from it. Returns (upserted, removed).
    pub async fn reconcile(
        &self,
        kind: ResourceKind,
        raw_list: &[Value],
        namespace_exclude_re: Option<&regex::Regex>,
    ) -> ProjectionResult<(Vec<ProjectedRecord>, Vec<ProjectedRecord>)> {
        let mut guard = self.inner.lock().await;
        let store = guard.stores.entry(kind).or_default();

        let mut upserted = Vec::with_capacity(raw_list.len());
        let mut live_uids = std::collections::BTreeSet::new();
        for raw in raw_list {
            if let (_, Some(record)) = store.upsert(kind, raw, namespace_exclude_re)? {
                live_uids.insert(record.uid.clone());
                upserted.push(record);
            }
        }
        let removed = store.reconcile_keep_only(&live_uids);
        guard.refresh_ledger.set(kind, Utc::now());
        Ok((upserted, removed))
    }

    pub async fn mark_sent_metrics(&self, kind: ResourceKind, uid: &str, at: DateTime<Utc>) {
        let mut guard = self.inner.lock().await;
        if let Some(store) = guard.stores.get_mut(&kind) {
            store.mark_sent_metrics(uid, at);
        }
    }

    pub async fn mark_sent_inventory(&self, kind: ResourceKind, uid: &str, at: DateTime<Utc>) {
        let mut guard = self.inner.lock().await;
        if let Some(store) = guard.stores.get_mut(&kind) {
            store.mark_sent_inventory(uid, at);
        }
    }

    pub async fn discovery_ledger_get(&self, kind: ResourceKind) -> Option<DateTime<Utc>> {
        self.inner.lock().await.discovery_ledger.get(kind)
    }

    pub async fn discovery_ledger_set(&self, kind: ResourceKind, at: DateTime<Utc>) {
        self.inner.lock().await.discovery_ledger.set(kind, at);
    }

    pub async fn refresh_ledger_get(&self, kind: ResourceKind) -> Option<DateTime<Utc>> {
        self.inner.lock().await.refresh_ledger.get(kind)
    }

    pub async fn refresh_ledger_set(&self, kind: ResourceKind, at: DateTime<Utc>) {
        self.inner.lock().await.refresh_ledger.set(kind, at);
    }

    /// SIGUSR1 diagnostic: per-kind record counts.
    pub async fn dump_counts(&self) -> BTreeMap<String, usize> {
        let guard = self.inner.lock().await;
        guard
            .stores
            .iter()
            .map(|(kind, store)| (kind.as_str().to_string(), store.len()))
            .collect()
    }

    /// SIGUSR2 diagnostic: every record's full payload.
    pub async fn dump_payloads(&self) -> BTreeMap<String, Vec<ProjectedRecord>> {
        let guard = self.inner.lock().await;
        guard
            .stores
            .iter()
            .map(|(kind, store)| (kind.as_str().to_string(), store.snapshot()))
            .collect()
    }
}

impl Default for ClusterState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod_raw(name: &str) -> Value {
        json!({
            "metadata": {"name": name, "namespace": "n"},
            "spec": {"containers": []},
            "status": {}
        })
    }

    #[tokio::test]
    async fn discovery_gating_blocks_until_ledger_advances() {
        let state = ClusterState::new();
        assert_eq!(state.discovery_ledger_get(ResourceKind::Pods).await, None);
        state.upsert(ResourceKind::Pods, &pod_raw("p"), None).await.unwrap();

        let snapshot = state.snapshot(ResourceKind::Pods).await;
        assert_eq!(snapshot.len(), 1);
        // no discovery timestamp yet: per I5, a caller must refuse to send
        assert!(state.discovery_ledger_get(ResourceKind::Pods).await.is_none());

        let now = Utc::now();
        state.discovery_ledger_set(ResourceKind::Pods, now).await;
        assert_eq!(state.discovery_ledger_get(ResourceKind::Pods).await, Some(now));
    }

    #[tokio::test]
    async fn reconcile_drops_stale_and_updates_refresh_ledger() {
        let state = ClusterState::new();
        state.upsert(ResourceKind::Pods, &pod_raw("stale"), None).await.unwrap();
        assert!(state.refresh_ledger_get(ResourceKind::Pods).await.is_none());

        let (upserted, removed) = state
            .reconcile(ResourceKind::Pods, &[pod_raw("fresh")], None)
            .await
            .unwrap();
        assert_eq!(upserted.len(), 1);
        assert_eq!(removed.len(), 1);
        assert!(state.refresh_ledger_get(ResourceKind::Pods).await.is_some());
        assert_eq!(state.snapshot(ResourceKind::Pods).await.len(), 1);
    }
}
