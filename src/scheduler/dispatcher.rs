//! Event dispatch and the four per-kind scheduler tasks (SPEC_FULL.md §4.4):
//! watch, discovery, resend, and — for `services`/`containers` — aggregation
//! in place of a per-record resend.
//!
//! `Pipeline` deliberately does not own a `ClusterClient`: every method that
//! needs upstream I/O takes one as a parameter, so the pure dispatch/resend
//! logic can be unit tested without a cluster or a fake client.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::watch as watch_channel;

use crate::config::KubeZabbixConfig;
use crate::k8s::aggregate::{aggregate_containers, aggregate_services};
use crate::k8s::client::ClusterClient;
use crate::k8s::kinds::ResourceKind;
use crate::k8s::projector::{discovery_descriptors, metrics_for_record};
use crate::k8s::store::UpsertOutcome;
use crate::sinks::{InventoryAction, InventoryItem, InventorySink, MetricItem, MetricSink};
use crate::state::ClusterState;

#[derive(Clone)]
pub struct Pipeline {
    pub state: ClusterState,
    pub metric_sink: Arc<dyn MetricSink>,
    pub inventory_sink: Arc<dyn InventorySink>,
    pub config: Arc<KubeZabbixConfig>,
}

impl Pipeline {
    fn namespace_re(&self) -> Option<regex::Regex> {
        self.config
            .namespace_exclude_re
            .as_deref()
            .and_then(|re| regex::Regex::new(re).ok())
    }

    fn excluded(&self, kind: ResourceKind) -> bool {
        self.config.resources_exclude.iter().any(|k| k == kind.as_str())
    }

    fn metrics_excluded(&self, kind: ResourceKind) -> bool {
        self.config.zabbix_resources_exclude.iter().any(|k| k == kind.as_str())
    }

    fn inventory_excluded(&self, kind: ResourceKind) -> bool {
        self.config.web_api_resources_exclude.iter().any(|k| k == kind.as_str())
    }

    /// Applies one raw object (ADDED or MODIFIED) to the store and, if the
    /// rate limit allows, dispatches it immediately to each sink.
    async fn handle_applied(&self, kind: ResourceKind, raw: &Value) {
        let re = self.namespace_re();
        let (outcome, record) = match self.state.upsert(kind, raw, re.as_ref()).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "projection failed, skipping object");
                return;
            }
        };
        if outcome == UpsertOutcome::Unchanged || outcome == UpsertOutcome::Skipped {
            return;
        }
        let Some(record) = record else { return };

        // I6: a record inserted after the last discovery push must wait for
        // the next discovery run before it is eligible for metric dispatch.
        let discovery_at = self.state.discovery_ledger_get(kind).await;
        let admission_ok = discovery_at.map(|at| record.inserted_at <= at).unwrap_or(false);

        if admission_ok
            && !self.metrics_excluded(kind)
            && record.dirty_metrics
            && Utc::now().signed_duration_since(record.last_sent_metrics)
                >= chrono::Duration::from_std(self.config.rate_limit_seconds).unwrap_or_default()
        {
            let items: Vec<MetricItem> = metrics_for_record(&record)
                .into_iter()
                .map(|(key, value)| MetricItem {
                    host: self.config.zabbix_host.clone(),
                    key,
                    value,
                })
                .collect();
            if let Ok(result) = self.metric_sink.send(&items).await {
                if result.failed == 0 {
                    self.state.mark_sent_metrics(kind, &record.uid, Utc::now()).await;
                }
            }
        }

        if !self.inventory_excluded(kind)
            && record.dirty_inventory
            && Utc::now().signed_duration_since(record.last_sent_inventory)
                >= chrono::Duration::from_std(self.config.rate_limit_seconds).unwrap_or_default()
        {
            let action = if outcome == UpsertOutcome::Inserted {
                InventoryAction::Added
            } else {
                InventoryAction::Modified
            };
            let item = InventoryItem::new(
                kind,
                record.namespace.clone(),
                record.name.clone(),
                self.config.cluster_name.clone(),
                action,
                record.payload.clone(),
            );
            if self.inventory_sink.send(&item).await.is_ok() {
                self.state.mark_sent_inventory(kind, &record.uid, Utc::now()).await;
            }
        }
    }

    async fn handle_deleted(&self, kind: ResourceKind, raw: &Value) {
        let name = raw.pointer("/metadata/name").and_then(Value::as_str);
        let namespace = raw.pointer("/metadata/namespace").and_then(Value::as_str);
        let Some(name) = name else { return };
        let uid = crate::k8s::store::derive_uid(kind, namespace, name);

        let Some(record) = self.state.delete_by_uid(kind, &uid).await else {
            return;
        };
        if self.inventory_excluded(kind) {
            return;
        }
        let item = InventoryItem::new(
            kind,
            record.namespace,
            record.name,
            self.config.cluster_name.clone(),
            InventoryAction::Deleted,
            record.payload,
        );
        let _ = self.inventory_sink.send(&item).await;
    }

    async fn relist(&self, kind: ResourceKind, client: &ClusterClient) {
        match client.list_all(kind, self.config.k8s_api_request_timeout_seconds).await {
            Ok(items) => {
                let re = self.namespace_re();
                if let Err(e) = self.state.reconcile(kind, &items, re.as_ref()).await {
                    tracing::warn!(kind = kind.as_str(), error = %e, "reconcile failed");
                }
            }
            Err(e) => tracing::warn!(kind = kind.as_str(), error = %e, "relist failed"),
        }
    }

    /// Watch task: supervises the applied- and delete- streams for `kind`,
    /// reopening on normal stream termination and logging+continuing on
    /// transient errors (SPEC_FULL.md §4.4 item 1, §5 failure isolation).
    pub async fn run_watch_task(
        self: Arc<Self>,
        kind: ResourceKind,
        client: ClusterClient,
        mut exit: watch_channel::Receiver<bool>,
    ) {
        if self.excluded(kind) || !kind.supports_watch() {
            return;
        }
        loop {
            if *exit.borrow() {
                return;
            }
            let applied = client.watch_applied(kind, self.config.k8s_api_stream_timeout_seconds);
            let deletions = client.watch_deletions(kind, self.config.k8s_api_stream_timeout_seconds);
            tokio::pin!(applied);
            tokio::pin!(deletions);

            loop {
                tokio::select! {
                    _ = exit.changed() => {
                        if *exit.borrow() { return; }
                    }
                    item = applied.next() => {
                        match item {
                            Some(Ok(raw)) => self.handle_applied(kind, &raw).await,
                            Some(Err(e)) => {
                                tracing::warn!(kind = kind.as_str(), error = %e, "watch stream error, restarting");
                                break;
                            }
                            None => break,
                        }
                    }
                    item = deletions.next() => {
                        match item {
                            Some(Ok(raw)) => self.handle_deleted(kind, &raw).await,
                            Some(Err(e)) => {
                                tracing::warn!(kind = kind.as_str(), error = %e, "delete watch error, restarting");
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    /// Relist-only task for kinds without a usable watch (`components`, `pvcs`).
    pub async fn run_relist_task(
        self: Arc<Self>,
        kind: ResourceKind,
        client: ClusterClient,
        mut exit: watch_channel::Receiver<bool>,
    ) {
        if self.excluded(kind) {
            return;
        }
        loop {
            tokio::select! {
                _ = exit.changed() => { if *exit.borrow() { return; } }
                _ = tokio::time::sleep(self.config.data_resend_interval) => {
                    self.relist(kind, &client).await;
                }
            }
        }
    }

    /// Discovery task: periodic relist-if-due, then push a discovery payload
    /// and advance the ledger (SPEC_FULL.md §4.4 item 2).
    pub async fn run_discovery_task(
        self: Arc<Self>,
        kind: ResourceKind,
        client: ClusterClient,
        mut exit: watch_channel::Receiver<bool>,
    ) {
        if self.excluded(kind) || self.metrics_excluded(kind) {
            return;
        }
        tokio::select! {
            _ = exit.changed() => { if *exit.borrow() { return; } }
            _ = tokio::time::sleep(self.config.discovery_interval_delay) => {}
        }
        loop {
            self.discovery_tick(kind, &client).await;
            tokio::select! {
                _ = exit.changed() => { if *exit.borrow() { return; } }
                _ = tokio::time::sleep(self.config.discovery_interval) => {}
            }
        }
    }

    async fn discovery_tick(&self, kind: ResourceKind, client: &ClusterClient) {
        let needs_refresh = match self.state.refresh_ledger_get(kind).await {
            Some(at) => Utc::now().signed_duration_since(at)
                >= chrono::Duration::from_std(self.config.data_refresh_interval).unwrap_or_default(),
            None => true,
        };
        if needs_refresh && kind.has_own_store() {
            self.relist(kind, client).await;
        }

        let records = self.state.snapshot(kind).await;
        let mut entries = Vec::new();
        for record in &records {
            entries.extend(discovery_descriptors(record, self.config.container_crawling));
        }
        let payload = serde_json::json!({ "data": entries }).to_string();
        let items = vec![MetricItem {
            host: self.config.zabbix_host.clone(),
            key: format!("check_kubernetesd[discover,{}]", kind.as_str()),
            value: payload,
        }];
        if self.metric_sink.send(&items).await.is_ok() {
            let now = Utc::now();
            self.state.discovery_ledger_set(kind, now).await;
            if kind == ResourceKind::Pods && self.config.container_crawling == crate::config::ContainerCrawling::Container {
                self.state.discovery_ledger_set(ResourceKind::Containers, now).await;
            }
        }
    }

    /// Resend task: periodic republish of unchanged-but-stale records, plus
    /// inventory catch-up (SPEC_FULL.md §4.4 item 3).
    pub async fn run_resend_task(self: Arc<Self>, kind: ResourceKind, mut exit: watch_channel::Receiver<bool>) {
        if self.excluded(kind) || kind.is_aggregated() {
            return;
        }
        tokio::select! {
            _ = exit.changed() => { if *exit.borrow() { return; } }
            _ = tokio::time::sleep(self.config.data_resend_interval_delay) => {}
        }
        loop {
            self.resend_tick(kind).await;
            tokio::select! {
                _ = exit.changed() => { if *exit.borrow() { return; } }
                _ = tokio::time::sleep(self.config.data_resend_interval) => {}
            }
        }
    }

    async fn resend_tick(&self, kind: ResourceKind) {
        let Some(discovered_at) = self.state.discovery_ledger_get(kind).await else {
            tracing::info!(kind = kind.as_str(), "resend skipped: no discovery yet");
            return;
        };
        let records = self.state.snapshot(kind).await;
        let now = Utc::now();

        if !self.metrics_excluded(kind) {
            let mut batch = Vec::new();
            let mut sent_uids = Vec::new();
            for record in &records {
                if record.inserted_at > discovered_at {
                    continue;
                }
                let stale = now.signed_duration_since(record.last_sent_metrics)
                    >= chrono::Duration::from_std(self.config.data_resend_interval).unwrap_or_default();
                if !stale {
                    continue;
                }
                for (key, value) in metrics_for_record(record) {
                    batch.push(MetricItem {
                        host: self.config.zabbix_host.clone(),
                        key,
                        value,
                    });
                }
                sent_uids.push(record.uid.clone());
            }
            if !batch.is_empty() && self.metric_sink.send(&batch).await.is_ok() {
                for uid in sent_uids {
                    self.state.mark_sent_metrics(kind, &uid, now).await;
                }
            }
        }

        if !self.inventory_excluded(kind) {
            for record in &records {
                let never_sent = record.last_sent_inventory == crate::k8s::store::never_sent();
                let stale = now.signed_duration_since(record.last_sent_inventory)
                    >= chrono::Duration::from_std(self.config.data_resend_interval).unwrap_or_default();
                if !(never_sent || record.dirty_inventory || stale) {
                    continue;
                }
                let action = if never_sent {
                    InventoryAction::Added
                } else {
                    InventoryAction::Modified
                };
                let item = InventoryItem::new(
                    record.kind,
                    record.namespace.clone(),
                    record.name.clone(),
                    self.config.cluster_name.clone(),
                    action,
                    record.payload.clone(),
                );
                if self.inventory_sink.send(&item).await.is_ok() {
                    self.state.mark_sent_inventory(kind, &record.uid, now).await;
                }
            }
        }
    }

    /// Aggregation task for `services`/`containers`: waits for the
    /// underlying kind's discovery to have run once, then periodically
    /// recomputes and pushes the derived metrics (SPEC_FULL.md §4.5).
    pub async fn run_aggregate_task(self: Arc<Self>, kind: ResourceKind, mut exit: watch_channel::Receiver<bool>) {
        if self.excluded(kind) || self.metrics_excluded(kind) {
            return;
        }
        let startup_delay = self.config.discovery_interval + Duration::from_secs(5);
        tokio::select! {
            _ = exit.changed() => { if *exit.borrow() { return; } }
            _ = tokio::time::sleep(startup_delay) => {}
        }
        loop {
            self.aggregate_tick(kind).await;
            tokio::select! {
                _ = exit.changed() => { if *exit.borrow() { return; } }
                _ = tokio::time::sleep(self.config.data_resend_interval) => {}
            }
        }
    }

    async fn aggregate_tick(&self, kind: ResourceKind) {
        let source_kind = match kind {
            ResourceKind::Services => ResourceKind::Services,
            ResourceKind::Containers => ResourceKind::Pods,
            _ => return,
        };
        if self.state.discovery_ledger_get(source_kind).await.is_none() {
            return;
        }
        let records = self.state.snapshot(source_kind).await;
        let metrics = match kind {
            ResourceKind::Services => aggregate_services(&records),
            ResourceKind::Containers => aggregate_containers(&records),
            _ => return,
        };
        let items: Vec<MetricItem> = metrics
            .into_iter()
            .map(|(key, value)| MetricItem {
                host: self.config.zabbix_host.clone(),
                key,
                value,
            })
            .collect();
        let _ = self.metric_sink.send(&items).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KubeZabbixConfig;
    use crate::sinks::{MetricSendResult, NullInventorySink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingMetricSink {
        items: StdMutex<Vec<MetricItem>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetricSink for RecordingMetricSink {
        async fn send(&self, items: &[MetricItem]) -> crate::errors::SinkResult<MetricSendResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.items.lock().unwrap().extend(items.iter().cloned());
            Ok(MetricSendResult {
                processed: items.len(),
                failed: 0,
            })
        }
    }

    fn test_pipeline(metric_sink: Arc<RecordingMetricSink>) -> Pipeline {
        Pipeline {
            state: ClusterState::new(),
            metric_sink,
            inventory_sink: Arc::new(NullInventorySink),
            config: Arc::new(KubeZabbixConfig::testing()),
        }
    }

    #[tokio::test]
    async fn discovery_gating_blocks_metric_send_before_discovery() {
        let sink = Arc::new(RecordingMetricSink {
            items: StdMutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let pipeline = test_pipeline(sink.clone());
        let raw = serde_json::json!({
            "metadata": {"name": "p", "namespace": "n"},
            "spec": {"containers": []},
            "status": {}
        });
        pipeline.handle_applied(ResourceKind::Pods, &raw).await;
        // no discovery timestamp yet, so no metric send should have happened
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);

        pipeline.state.discovery_ledger_set(ResourceKind::Pods, Utc::now()).await;
        // record was inserted before the discovery timestamp we just set,
        // re-applying the identical object leaves it Unchanged (no send path)
        pipeline.handle_applied(ResourceKind::Pods, &raw).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn discovery_admits_record_inserted_before_discovery_timestamp() {
        let sink = Arc::new(RecordingMetricSink {
            items: StdMutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        });
        let pipeline = test_pipeline(sink.clone());
        let raw = serde_json::json!({
            "metadata": {"name": "p", "namespace": "n"},
            "spec": {"containers": []},
            "status": {}
        });
        let (_, record) = pipeline.state.upsert(ResourceKind::Pods, &raw, None).await.unwrap();
        assert!(record.is_some());
        pipeline.state.discovery_ledger_set(ResourceKind::Pods, Utc::now()).await;

        let raw2 = serde_json::json!({
            "metadata": {"name": "p", "namespace": "n"},
            "spec": {"containers": [{"name": "c"}]},
            "status": {}
        });
        pipeline.handle_applied(ResourceKind::Pods, &raw2).await;
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }
}
