//! Derived views computed over a [`ResourceStore`](super::store::ResourceStore)
//! snapshot: service counts and the container-level rollup over the pod
//! store. Grounded on the teacher's `shared_cache.rs` snapshot-then-compute
//! pattern (`cache.read().await` followed by plain-Rust aggregation with no
//! I/O under the lock).

use std::collections::BTreeMap;

use super::store::{group_pods_by_base_name, ProjectedRecord};

/// `(key_suffix, value)` triples ready to be prefixed with the zabbix host.
pub fn aggregate_services(records: &[ProjectedRecord]) -> Vec<(String, String)> {
    let total = records.len();
    let ingress_count = records
        .iter()
        .filter(|r| r.payload.get("is_ingress").map(|v| v == "true").unwrap_or(false))
        .count();
    vec![
        (
            "check_kubernetes[get,services,num_services]".to_string(),
            total.to_string(),
        ),
        (
            "check_kubernetes[get,services,num_ingress_services]".to_string(),
            ingress_count.to_string(),
        ),
    ]
}

/// Sum numeric container fields across pods sharing a `(namespace, base_name)`
/// group; for the `status` field, keep the first `ERROR` seen within the
/// group, per SPEC_FULL.md §4.5.
pub fn aggregate_containers(pods: &[ProjectedRecord]) -> Vec<(String, String)> {
    let groups = group_pods_by_base_name(pods);
    let mut out = Vec::new();

    for ((namespace, base_name), members) in groups {
        let mut per_container: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

        for pod in &members {
            let container_names: Vec<&str> = pod
                .payload
                .keys()
                .filter_map(|k| k.strip_prefix("container.").and_then(|r| r.strip_suffix(".status")))
                .collect();

            for container_name in container_names {
                let status = pod
                    .payload
                    .get(&format!("container.{container_name}.status"))
                    .cloned()
                    .unwrap_or_default();
                let restart_count: i64 = pod
                    .payload
                    .get(&format!("container.{container_name}.restart_count"))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let ready: i64 = pod
                    .payload
                    .get(&format!("container.{container_name}.ready"))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let not_ready: i64 = pod
                    .payload
                    .get(&format!("container.{container_name}.not_ready"))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);

                let entry = per_container.entry(container_name.to_string()).or_default();
                let prior_restart: i64 = entry
                    .get("restart_count")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                entry.insert("restart_count".to_string(), (prior_restart + restart_count).to_string());

                let prior_ready: i64 = entry.get("ready").and_then(|v| v.parse().ok()).unwrap_or(0);
                entry.insert("ready".to_string(), (prior_ready + ready).to_string());

                let prior_not_ready: i64 = entry.get("not_ready").and_then(|v| v.parse().ok()).unwrap_or(0);
                entry.insert("not_ready".to_string(), (prior_not_ready + not_ready).to_string());

                let existing_status = entry.get("status").cloned().unwrap_or_default();
                if existing_status.is_empty() || status.starts_with("ERROR") {
                    entry.insert("status".to_string(), status);
                } else {
                    entry.entry("status".to_string()).or_insert(existing_status);
                }
            }
        }

        for (container_name, fields) in per_container {
            for (field, value) in fields {
                let key = match &namespace {
                    Some(ns) => format!(
                        "check_kubernetesd[get,containers,{ns},{base_name},{container_name},{field}]"
                    ),
                    None => format!(
                        "check_kubernetesd[get,containers,{base_name},{container_name},{field}]"
                    ),
                };
                out.push((key, value));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::kinds::ResourceKind;
    use crate::k8s::store::never_sent;
    use chrono::Utc;

    fn svc(is_ingress: bool) -> ProjectedRecord {
        let mut payload = BTreeMap::new();
        payload.insert("is_ingress".to_string(), is_ingress.to_string());
        ProjectedRecord {
            kind: ResourceKind::Services,
            namespace: Some("n".into()),
            name: "s".into(),
            uid: "x".into(),
            payload,
            content_hash: "h".into(),
            inserted_at: Utc::now(),
            last_sent_metrics: never_sent(),
            last_sent_inventory: never_sent(),
            dirty_metrics: false,
            dirty_inventory: false,
        }
    }

    #[test]
    fn service_aggregate_counts_ingress() {
        let records = vec![svc(true), svc(false)];
        let metrics = aggregate_services(&records);
        assert!(metrics.iter().any(|(k, v)| k.contains("num_services") && v == "2"));
        assert!(metrics
            .iter()
            .any(|(k, v)| k.contains("num_ingress_services") && v == "1"));
    }

    fn pod_with_container(base: &str, container: &str, restart: i64, status: &str) -> ProjectedRecord {
        let mut payload = BTreeMap::new();
        payload.insert("base_name".to_string(), base.to_string());
        payload.insert(format!("container.{container}.status"), status.to_string());
        payload.insert(format!("container.{container}.restart_count"), restart.to_string());
        let ok = status == "OK";
        payload.insert(
            format!("container.{container}.ready"),
            (if ok { 1 } else { 0 }).to_string(),
        );
        payload.insert(
            format!("container.{container}.not_ready"),
            (if ok { 0 } else { 1 }).to_string(),
        );
        ProjectedRecord {
            kind: ResourceKind::Pods,
            namespace: Some("n".into()),
            name: format!("{base}-xyz"),
            uid: format!("pods_n_{base}-xyz"),
            payload,
            content_hash: "h".into(),
            inserted_at: Utc::now(),
            last_sent_metrics: never_sent(),
            last_sent_inventory: never_sent(),
            dirty_metrics: false,
            dirty_inventory: false,
        }
    }

    #[test]
    fn container_aggregate_sums_restarts_across_pods() {
        let pods = vec![
            pod_with_container("web", "app", 1, "OK"),
            pod_with_container("web", "app", 2, "OK"),
        ];
        let metrics = aggregate_containers(&pods);
        let restart = metrics
            .iter()
            .find(|(k, _)| k.contains("restart_count"))
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(restart, "3");
    }

    #[test]
    fn container_aggregate_sums_ready_counts_across_pods() {
        let pods = vec![
            pod_with_container("web", "app", 0, "OK"),
            pod_with_container("web", "app", 0, "OK"),
            pod_with_container("web", "app", 0, "ERROR: unknown"),
        ];
        let metrics = aggregate_containers(&pods);
        let ready = metrics
            .iter()
            .find(|(k, _)| k.ends_with(",ready]"))
            .map(|(_, v)| v.clone())
            .unwrap();
        let not_ready = metrics
            .iter()
            .find(|(k, _)| k.ends_with(",not_ready]"))
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(ready, "2");
        assert_eq!(not_ready, "1");
    }

    #[test]
    fn container_aggregate_keeps_error_status() {
        let pods = vec![
            pod_with_container("web", "app", 0, "OK"),
            pod_with_container("web", "app", 1, "ERROR: terminated"),
        ];
        let metrics = aggregate_containers(&pods);
        let status = metrics
            .iter()
            .find(|(k, _)| k.contains("status"))
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(status, "ERROR: terminated");
    }
}
