//! Per-kind resource store: `uid -> ProjectedRecord`, plus the bookkeeping
//! (dirty flags, send timestamps) the scheduler needs to decide what to
//! send and when. Modeled on the teacher's `shared_cache.rs`
//! (`resource_cache: Arc<RwLock<HashMap<String, K8sListItem>>>`), generalized
//! from a live-watch cache into the upsert/delete/snapshot/reconcile surface
//! the scheduler needs.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::kinds::ResourceKind;
use super::projector::{self, ProjectionOutcome};
use crate::errors::ProjectionResult;

/// Sentinel timestamp meaning "never sent", matching the spec's literal
/// `2000-01-01T00:00:00` sentinel.
pub fn never_sent() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap()
}

#[derive(Debug, Clone)]
pub struct ProjectedRecord {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
    pub payload: BTreeMap<String, String>,
    pub content_hash: String,
    pub inserted_at: DateTime<Utc>,
    pub last_sent_metrics: DateTime<Utc>,
    pub last_sent_inventory: DateTime<Utc>,
    pub dirty_metrics: bool,
    pub dirty_inventory: bool,
}

impl ProjectedRecord {
    /// `namespace/name`, truncated to `max_len` by keeping a prefix and
    /// suffix joined with `~` (see GLOSSARY: Slug).
    pub fn slug(&self, max_len: usize) -> String {
        let full = match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        };
        if full.len() <= max_len || max_len < 3 {
            return full;
        }
        let keep = max_len - 1;
        let head = keep / 2;
        let tail = keep - head;
        format!("{}~{}", &full[..head], &full[full.len() - tail..])
    }
}

pub fn derive_uid(kind: ResourceKind, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}_{}_{}", kind.as_str(), ns, name),
        _ => format!("{}_{}", kind.as_str(), name),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Modified,
    Unchanged,
    Skipped,
}

/// Uses `BTreeMap` so `snapshot()` iteration order is deterministic,
/// which keeps the S1-S6 fixture tests reproducible.
#[derive(Debug, Default)]
pub struct ResourceStore {
    records: BTreeMap<String, ProjectedRecord>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, uid: &str) -> Option<&ProjectedRecord> {
        self.records.get(uid)
    }

    pub fn snapshot(&self) -> Vec<ProjectedRecord> {
        self.records.values().cloned().collect()
    }

    pub fn uids(&self) -> std::collections::BTreeSet<String> {
        self.records.keys().cloned().collect()
    }

    /// Project `raw` and merge it into the store. Returns `None` when the
    /// projector skips the object (namespace filter); otherwise the outcome
    /// and a reference to the resulting record.
    pub fn upsert(
        &mut self,
        kind: ResourceKind,
        raw: &Value,
        namespace_exclude_re: Option<&regex::Regex>,
    ) -> ProjectionResult<(UpsertOutcome, Option<ProjectedRecord>)> {
        let projection = projector::project(kind, raw, namespace_exclude_re)?;
        let projection = match projection {
            ProjectionOutcome::Skip => return Ok((UpsertOutcome::Skipped, None)),
            ProjectionOutcome::Record(p) => p,
        };

        let now = Utc::now();
        match self.records.get(&projection.uid) {
            None => {
                let record = ProjectedRecord {
                    kind,
                    namespace: projection.namespace,
                    name: projection.name,
                    uid: projection.uid.clone(),
                    payload: projection.payload,
                    content_hash: projection.content_hash,
                    inserted_at: now,
                    last_sent_metrics: never_sent(),
                    last_sent_inventory: never_sent(),
                    dirty_metrics: true,
                    dirty_inventory: true,
                };
                self.records.insert(projection.uid.clone(), record.clone());
                Ok((UpsertOutcome::Inserted, Some(record)))
            }
            Some(existing) if existing.content_hash == projection.content_hash => {
                Ok((UpsertOutcome::Unchanged, Some(existing.clone())))
            }
            Some(existing) => {
                let record = ProjectedRecord {
                    kind,
                    namespace: projection.namespace,
                    name: projection.name,
                    uid: projection.uid.clone(),
                    payload: projection.payload,
                    content_hash: projection.content_hash,
                    inserted_at: existing.inserted_at,
                    last_sent_metrics: existing.last_sent_metrics,
                    last_sent_inventory: existing.last_sent_inventory,
                    dirty_metrics: true,
                    dirty_inventory: true,
                };
                self.records.insert(projection.uid.clone(), record.clone());
                Ok((UpsertOutcome::Modified, Some(record)))
            }
        }
    }

    pub fn delete(&mut self, uid: &str) -> Option<ProjectedRecord> {
        self.records.remove(uid)
    }

    /// Replace the store contents with exactly `uids`, returning the
    /// records removed because they were absent from the authoritative list.
    pub fn reconcile_keep_only(&mut self, uids: &std::collections::BTreeSet<String>) -> Vec<ProjectedRecord> {
        let stale: Vec<String> = self
            .records
            .keys()
            .filter(|uid| !uids.contains(*uid))
            .cloned()
            .collect();
        stale
            .into_iter()
            .filter_map(|uid| self.records.remove(&uid))
            .collect()
    }

    pub fn mark_sent_metrics(&mut self, uid: &str, at: DateTime<Utc>) {
        if let Some(r) = self.records.get_mut(uid) {
            r.last_sent_metrics = at;
            r.dirty_metrics = false;
        }
    }

    pub fn mark_sent_inventory(&mut self, uid: &str, at: DateTime<Utc>) {
        if let Some(r) = self.records.get_mut(uid) {
            r.last_sent_inventory = at;
            r.dirty_inventory = false;
        }
    }
}

/// Grouping key used by the container aggregator: `(namespace, base_name)`.
pub type PodGroupKey = (Option<String>, String);

pub fn group_pods_by_base_name(records: &[ProjectedRecord]) -> HashMap<PodGroupKey, Vec<&ProjectedRecord>> {
    let mut groups: HashMap<PodGroupKey, Vec<&ProjectedRecord>> = HashMap::new();
    for record in records {
        let base_name = record
            .payload
            .get("base_name")
            .cloned()
            .unwrap_or_else(|| record.name.clone());
        groups
            .entry((record.namespace.clone(), base_name))
            .or_default()
            .push(record);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod_raw(name: &str, phase: &str) -> Value {
        json!({
            "metadata": {"name": name, "namespace": "n"},
            "spec": {"containers": [{"name": "c"}]},
            "status": {
                "phase": phase,
                "containerStatuses": [
                    {"name": "c", "ready": true, "restartCount": 0, "state": {"running": {}}}
                ]
            }
        })
    }

    #[test]
    fn upsert_idempotent_on_identical_raw() {
        let mut store = ResourceStore::new();
        let raw = pod_raw("p", "Running");
        let (outcome1, rec1) = store.upsert(ResourceKind::Pods, &raw, None).unwrap();
        assert_eq!(outcome1, UpsertOutcome::Inserted);
        let inserted_at = rec1.unwrap().inserted_at;

        let (outcome2, rec2) = store.upsert(ResourceKind::Pods, &raw, None).unwrap();
        assert_eq!(outcome2, UpsertOutcome::Unchanged);
        assert_eq!(rec2.unwrap().inserted_at, inserted_at);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn modify_preserves_inserted_at_and_resets_dirty() {
        let mut store = ResourceStore::new();
        let raw = pod_raw("p", "Running");
        let (_, rec1) = store.upsert(ResourceKind::Pods, &raw, None).unwrap();
        let inserted_at = rec1.unwrap().inserted_at;
        store.mark_sent_metrics("pods_n_p", Utc::now());
        store.mark_sent_inventory("pods_n_p", Utc::now());

        let raw2 = pod_raw("p", "Failed");
        let (outcome, rec2) = store.upsert(ResourceKind::Pods, &raw2, None).unwrap();
        assert_eq!(outcome, UpsertOutcome::Modified);
        let rec2 = rec2.unwrap();
        assert_eq!(rec2.inserted_at, inserted_at);
        assert!(rec2.dirty_metrics);
        assert!(rec2.dirty_inventory);
    }

    #[test]
    fn reconcile_removes_absent_uids() {
        let mut store = ResourceStore::new();
        store.upsert(ResourceKind::Pods, &pod_raw("p1", "Running"), None).unwrap();
        store.upsert(ResourceKind::Pods, &pod_raw("p2", "Running"), None).unwrap();

        let keep: std::collections::BTreeSet<String> =
            ["pods_n_p2".to_string()].into_iter().collect();
        let removed = store.reconcile_keep_only(&keep);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].uid, "pods_n_p1");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn slug_truncates_long_identifiers() {
        let record = ProjectedRecord {
            kind: ResourceKind::Pods,
            namespace: Some("a-very-long-namespace-name".into()),
            name: "a-very-long-pod-name-with-a-hash-suffix".into(),
            uid: "x".into(),
            payload: BTreeMap::new(),
            content_hash: "h".into(),
            inserted_at: Utc::now(),
            last_sent_metrics: never_sent(),
            last_sent_inventory: never_sent(),
            dirty_metrics: false,
            dirty_inventory: false,
        };
        let slug = record.slug(20);
        assert!(slug.len() <= 20);
        assert!(slug.contains('~'));
    }
}
