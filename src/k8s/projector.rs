//! Pure, deterministic mapping from a raw cluster object (`serde_json::Value`)
//! to the fields stored in a [`ProjectedRecord`](super::store::ProjectedRecord),
//! plus the discovery descriptors and metric triples derived from a record.
//!
//! Raw objects are handled as `serde_json::Value` rather than typed
//! `k8s-openapi` structs so this module has no dependency on which concrete
//! type the watch task used to obtain them (see SPEC_FULL.md §4.1) — the same
//! approach the teacher's `convert_to_list_item` takes when flattening typed
//! list items into the kind-agnostic `K8sListItem`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::kinds::ResourceKind;
use crate::errors::{ProjectionError, ProjectionResult};

#[derive(Debug)]
pub struct Projection {
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
    pub payload: BTreeMap<String, String>,
    pub content_hash: String,
}

#[derive(Debug)]
pub enum ProjectionOutcome {
    Skip,
    Record(Projection),
}

static KI_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)Ki$").unwrap());
static MILLI_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)m$").unwrap());
static JOB_OWNED_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\d+-$").unwrap());
static REPLICASET_OWNED_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"-[0-9a-f]{4,}-$").unwrap());
static TRAILING_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"-$").unwrap());

/// Convert the upstream scalar grammar to a plain string per SPEC_FULL.md §4.2.
pub fn normalize_value(value: &Value) -> String {
    match value {
        Value::Null => "0".to_string(),
        Value::String(s) => {
            if let Some(caps) = KI_SUFFIX.captures(s) {
                let ki: u64 = caps[1].parse().unwrap_or(0);
                return (ki * 1024).to_string();
            }
            if let Some(caps) = MILLI_SUFFIX.captures(s) {
                let milli: f64 = caps[1].parse().unwrap_or(0.0);
                return format!("{}", milli / 1000.0);
            }
            s.clone()
        }
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn get_str<'a>(raw: &'a Value, pointer: &str) -> Option<&'a str> {
    raw.pointer(pointer).and_then(Value::as_str)
}

fn canonical_json(raw: &Value) -> String {
    // serde_json::Map preserves insertion order; re-serializing through a
    // BTreeMap normalizes key order so semantically-identical objects with
    // differently-ordered keys hash identically.
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: std::collections::BTreeMap<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), sort(v))).collect();
                serde_json::to_value(sorted).unwrap()
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(raw)).unwrap_or_default()
}

pub fn content_hash(raw: &Value) -> String {
    let canonical = canonical_json(raw);
    format!("{:x}", md5::compute(canonical.as_bytes()))
}

fn identity(kind: ResourceKind, raw: &Value) -> ProjectionResult<(Option<String>, String)> {
    let name = get_str(raw, "/metadata/name")
        .ok_or_else(|| ProjectionError::malformed(kind.as_str(), "missing metadata.name"))?
        .to_string();
    if kind.is_cluster_scoped() {
        return Ok((None, name));
    }
    let namespace = get_str(raw, "/metadata/namespace")
        .ok_or_else(|| ProjectionError::malformed(kind.as_str(), "missing metadata.namespace"))?
        .to_string();
    Ok((Some(namespace), name))
}

fn base_name(raw: &Value, name: &str) -> String {
    let generate_name = get_str(raw, "/metadata/generateName");
    let candidate = generate_name.unwrap_or(name);
    let owner_kind = raw
        .pointer("/metadata/ownerReferences/0/kind")
        .and_then(Value::as_str)
        .unwrap_or("");
    let stripped = match owner_kind {
        "Job" => JOB_OWNED_SUFFIX.replace(candidate, ""),
        "ReplicaSet" => REPLICASET_OWNED_SUFFIX.replace(candidate, ""),
        _ => TRAILING_DASH.replace(candidate, ""),
    };
    stripped.to_string()
}

#[derive(Debug, Clone, Default)]
pub struct ContainerStatus {
    pub name: String,
    pub restart_count: i64,
    pub status: String,
}

fn container_status_ok(state: &Value) -> bool {
    state.get("running").is_some() || state.get("waiting").is_some()
}

fn project_container_statuses(raw: &Value) -> Vec<ContainerStatus> {
    let Some(list) = raw.pointer("/status/containerStatuses").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .map(|cs| {
            let name = cs.get("name").and_then(Value::as_str).unwrap_or("").to_string();
            let restart_count = cs.get("restartCount").and_then(Value::as_i64).unwrap_or(0);
            let state = cs.get("state").cloned().unwrap_or(Value::Null);
            let status = if let Some(terminated) = state.get("terminated") {
                let reason = terminated.get("reason").and_then(Value::as_str).unwrap_or("");
                if reason == "Completed" {
                    "OK".to_string()
                } else {
                    "ERROR: terminated".to_string()
                }
            } else if container_status_ok(&state) {
                "OK".to_string()
            } else {
                "ERROR: unknown".to_string()
            };
            ContainerStatus {
                name,
                restart_count,
                status,
            }
        })
        .collect()
}

fn is_image_pull_backoff(raw: &Value) -> bool {
    let phase = get_str(raw, "/status/phase").unwrap_or("");
    if phase != "Pending" {
        return false;
    }
    raw.pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .map(|statuses| {
            statuses.iter().any(|cs| {
                cs.pointer("/state/waiting/reason")
                    .and_then(Value::as_str)
                    .map(|r| r == "ImagePullBackOff")
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn project_pod(raw: &Value, name: &str) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    let base = base_name(raw, name);
    payload.insert("base_name".to_string(), base);

    let container_count = raw
        .pointer("/spec/containers")
        .and_then(Value::as_array)
        .map(|c| c.len())
        .unwrap_or(0);
    payload.insert("containers".to_string(), container_count.to_string());

    // Per-container record `{restart_count, ready, not_ready, status}`
    // (spec.md §4.2; `ready`/`not_ready` are 0/1 counters derived from
    // `status == "OK"`, not the raw `ready` boolean on the container
    // status entry — matching the original `pod.py`'s `pod_data["ready"]
    // += 1` / `pod_data["not_ready"] += 1` tally).
    let statuses = project_container_statuses(raw);
    let mut pod_ready = !statuses.is_empty();
    let mut aggregate_status = "OK".to_string();
    let mut restart_total = 0i64;
    let mut ready_total = 0i64;
    let mut not_ready_total = 0i64;
    for cs in &statuses {
        let container_ok = cs.status == "OK";
        if !container_ok {
            pod_ready = false;
        }
        if cs.status.starts_with("ERROR") {
            aggregate_status = cs.status.clone();
        }
        restart_total += cs.restart_count;
        if container_ok {
            ready_total += 1;
        } else {
            not_ready_total += 1;
        }
        payload.insert(format!("container.{}.status", cs.name), cs.status.clone());
        payload.insert(
            format!("container.{}.restart_count", cs.name),
            cs.restart_count.to_string(),
        );
        payload.insert(
            format!("container.{}.ready", cs.name),
            (if container_ok { 1 } else { 0 }).to_string(),
        );
        payload.insert(
            format!("container.{}.not_ready", cs.name),
            (if container_ok { 0 } else { 1 }).to_string(),
        );
    }
    if is_image_pull_backoff(raw) {
        aggregate_status = "ERROR: ImagePullBackOff".to_string();
        pod_ready = false;
    }
    // Pod-level boolean: false iff any container's status is not OK
    // (spec.md §4.2), distinct from the numeric `ready`/`not_ready`
    // pod_data counters below.
    payload.insert("pod_ready".to_string(), pod_ready.to_string());
    payload.insert("status".to_string(), aggregate_status);
    payload.insert("restart_count".to_string(), restart_total.to_string());
    payload.insert("ready".to_string(), ready_total.to_string());
    payload.insert("not_ready".to_string(), not_ready_total.to_string());
    payload.insert(
        "phase".to_string(),
        get_str(raw, "/status/phase").unwrap_or("Unknown").to_string(),
    );
    payload
}

fn project_service(raw: &Value) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    let is_ingress = raw
        .pointer("/status/loadBalancer/ingress")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    payload.insert("is_ingress".to_string(), is_ingress.to_string());
    payload.insert(
        "type".to_string(),
        get_str(raw, "/spec/type").unwrap_or("ClusterIP").to_string(),
    );
    payload
}

fn project_node(raw: &Value) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    let ready = raw
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
        .unwrap_or(false);
    payload.insert("status".to_string(), if ready { "Ready" } else { "NotReady" }.to_string());
    let schedulable = !raw
        .pointer("/spec/unschedulable")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    payload.insert("schedulable".to_string(), schedulable.to_string());
    payload.insert(
        "kubelet_version".to_string(),
        get_str(raw, "/status/nodeInfo/kubeletVersion").unwrap_or("").to_string(),
    );
    if let Some(cpu) = raw.pointer("/status/allocatable/cpu") {
        payload.insert("allocatable_cpu".to_string(), normalize_value(cpu));
    }
    if let Some(mem) = raw.pointer("/status/allocatable/memory") {
        payload.insert("allocatable_memory".to_string(), normalize_value(mem));
    }
    payload
}

fn project_component(raw: &Value) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    let conditions = raw.pointer("/conditions").and_then(Value::as_array);
    let healthy = conditions
        .map(|conds| conds.iter().all(|c| c.get("status").and_then(Value::as_str) == Some("True")))
        .unwrap_or(false);
    payload.insert("healthy".to_string(), healthy.to_string());
    let message = conditions
        .and_then(|conds| {
            conds
                .iter()
                .find(|c| c.get("status").and_then(Value::as_str) != Some("True"))
        })
        .and_then(|c| c.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    payload.insert("message".to_string(), message);
    payload
}

fn project_replica_controller(raw: &Value) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    let desired = raw.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(0);
    let ready = raw.pointer("/status/readyReplicas").and_then(Value::as_i64).unwrap_or(0);
    let available = raw
        .pointer("/status/availableReplicas")
        .or_else(|| raw.pointer("/status/currentReplicas"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    payload.insert("desired".to_string(), desired.to_string());
    payload.insert("ready".to_string(), ready.to_string());
    payload.insert("available".to_string(), available.to_string());
    payload
}

fn project_secret(raw: &Value) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    payload.insert(
        "type".to_string(),
        get_str(raw, "/type").unwrap_or("Opaque").to_string(),
    );
    let key_count = raw.pointer("/data").and_then(Value::as_object).map(|m| m.len()).unwrap_or(0);
    payload.insert("key_count".to_string(), key_count.to_string());
    payload
}

fn project_ingress(raw: &Value) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    let hosts: Vec<String> = raw
        .pointer("/spec/rules")
        .and_then(Value::as_array)
        .map(|rules| {
            rules
                .iter()
                .filter_map(|r| r.get("host").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    payload.insert("hosts".to_string(), hosts.join(","));
    let is_loadbalanced = raw
        .pointer("/status/loadBalancer/ingress")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    payload.insert("is_loadbalanced".to_string(), is_loadbalanced.to_string());
    payload
}

fn project_pvc(raw: &Value) -> BTreeMap<String, String> {
    let mut payload = BTreeMap::new();
    payload.insert(
        "phase".to_string(),
        get_str(raw, "/status/phase").unwrap_or("Unknown").to_string(),
    );
    if let Some(capacity) = raw.pointer("/status/capacity/storage") {
        payload.insert("capacity".to_string(), normalize_value(capacity));
    }
    payload.insert(
        "storage_class".to_string(),
        get_str(raw, "/spec/storageClassName").unwrap_or("").to_string(),
    );
    payload
}

fn namespace_is_excluded(namespace: Option<&str>, namespace_exclude_re: Option<&Regex>) -> bool {
    match (namespace, namespace_exclude_re) {
        (Some(ns), Some(re)) => re.is_match(ns),
        _ => false,
    }
}

pub fn project(
    kind: ResourceKind,
    raw: &Value,
    namespace_exclude_re: Option<&Regex>,
) -> ProjectionResult<ProjectionOutcome> {
    let (namespace, name) = identity(kind, raw)?;
    if namespace_is_excluded(namespace.as_deref(), namespace_exclude_re) {
        return Ok(ProjectionOutcome::Skip);
    }

    let payload = match kind {
        ResourceKind::Pods => project_pod(raw, &name),
        ResourceKind::Services => project_service(raw),
        ResourceKind::Nodes => project_node(raw),
        ResourceKind::Components => project_component(raw),
        ResourceKind::Deployments | ResourceKind::StatefulSets | ResourceKind::DaemonSets => {
            project_replica_controller(raw)
        }
        ResourceKind::Secrets => project_secret(raw),
        ResourceKind::Ingresses => project_ingress(raw),
        ResourceKind::Pvcs => project_pvc(raw),
        ResourceKind::Containers => BTreeMap::new(),
    };

    let uid = super::store::derive_uid(kind, namespace.as_deref(), &name);
    Ok(ProjectionOutcome::Record(Projection {
        namespace,
        name,
        uid,
        payload,
        content_hash: content_hash(raw),
    }))
}

/// One discovery entry per SPEC_FULL.md §4.2 (`{#NAME}`, `{#NAMESPACE}`, `{#SLUG}`, ...).
pub fn discovery_descriptors(
    record: &super::store::ProjectedRecord,
    container_crawling: crate::config::ContainerCrawling,
) -> Vec<BTreeMap<String, String>> {
    let namespace_tag = record.namespace.clone().unwrap_or_else(|| "None".to_string());
    let base = |container: Option<&str>| -> BTreeMap<String, String> {
        let mut d = BTreeMap::new();
        d.insert("{#NAME}".to_string(), record.name.clone());
        d.insert("{#NAMESPACE}".to_string(), namespace_tag.clone());
        d.insert("{#SLUG}".to_string(), record.slug(64));
        d.insert("{#KIND}".to_string(), record.kind.as_str().to_string());
        if let Some(c) = container {
            d.insert("{#CONTAINER}".to_string(), c.to_string());
        }
        d
    };

    if record.kind == ResourceKind::Pods && container_crawling == crate::config::ContainerCrawling::Container {
        let mut containers: Vec<&str> = record
            .payload
            .keys()
            .filter_map(|k| k.strip_prefix("container.").and_then(|rest| rest.strip_suffix(".status")))
            .collect();
        containers.sort_unstable();
        if containers.is_empty() {
            return vec![base(None)];
        }
        containers.into_iter().map(|c| base(Some(c))).collect()
    } else {
        vec![base(None)]
    }
}

/// The pod-level record exposed as metrics is the `{restart_count, ready,
/// not_ready, status}` aggregate (spec.md §4.2), not the full projected
/// payload — `base_name`, `containers` and the per-container `container.*`
/// fields exist for [`aggregate_containers`](super::aggregate) to consume,
/// not to be reported individually.
const POD_METRIC_FIELDS: [&str; 4] = ["restart_count", "ready", "not_ready", "status"];

/// Metric triples `(key_suffix, value)` for a single record, per SPEC_FULL.md §6.
pub fn metrics_for_record(record: &super::store::ProjectedRecord) -> Vec<(String, String)> {
    let fields: Box<dyn Iterator<Item = (&String, &String)>> = if record.kind == ResourceKind::Pods {
        Box::new(
            POD_METRIC_FIELDS
                .iter()
                .filter_map(|field| record.payload.get_key_value(*field)),
        )
    } else {
        Box::new(record.payload.iter())
    };

    fields
        .map(|(field, value)| {
            let key = match &record.namespace {
                Some(ns) => format!(
                    "check_kubernetesd[get,{},{},{},{}]",
                    record.kind.as_str(),
                    ns,
                    record.name,
                    field
                ),
                None => format!(
                    "check_kubernetesd[get,{},{},{}]",
                    record.kind.as_str(),
                    record.name,
                    field
                ),
            };
            (key, value.clone())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[rstest::rstest]
    #[case(json!("1024Ki"), "1048576")]
    #[case(json!("500m"), "0.5")]
    #[case(Value::Null, "0")]
    #[case(json!("plain"), "plain")]
    fn normalize_value_cases(#[case] input: Value, #[case] expected: &str) {
        assert_eq!(normalize_value(&input), expected);
    }

    #[test]
    fn canonical_json_ignores_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn pod_with_terminated_non_completed_is_error() {
        let raw = json!({
            "metadata": {"name": "p", "namespace": "n"},
            "spec": {"containers": [{"name": "c"}]},
            "status": {
                "phase": "Running",
                "containerStatuses": [
                    {"name": "c", "ready": false, "restartCount": 2, "state": {"terminated": {"reason": "OOMKilled"}}}
                ]
            }
        });
        let ProjectionOutcome::Record(p) = project(ResourceKind::Pods, &raw, None).unwrap() else {
            panic!("expected record")
        };
        assert_eq!(p.payload.get("status").unwrap(), "ERROR: terminated");
        assert_eq!(p.payload.get("pod_ready").unwrap(), "false");
        assert_eq!(p.payload.get("ready").unwrap(), "0");
        assert_eq!(p.payload.get("not_ready").unwrap(), "1");
    }

    #[test]
    fn service_ingress_flag_follows_load_balancer() {
        let with_ingress = json!({
            "metadata": {"name": "s", "namespace": "n"},
            "status": {"loadBalancer": {"ingress": [{"ip": "1.2.3.4"}]}}
        });
        let ProjectionOutcome::Record(p) = project(ResourceKind::Services, &with_ingress, None).unwrap() else {
            panic!()
        };
        assert_eq!(p.payload.get("is_ingress").unwrap(), "true");

        let without = json!({
            "metadata": {"name": "s2", "namespace": "n"},
            "status": {"loadBalancer": {"ingress": null}}
        });
        let ProjectionOutcome::Record(p2) = project(ResourceKind::Services, &without, None).unwrap() else {
            panic!()
        };
        assert_eq!(p2.payload.get("is_ingress").unwrap(), "false");
    }

    #[test]
    fn namespace_exclusion_skips_projection() {
        let re = Regex::new("^kube-.*").unwrap();
        let raw = json!({
            "metadata": {"name": "p", "namespace": "kube-system"},
            "spec": {"containers": []},
            "status": {}
        });
        let outcome = project(ResourceKind::Pods, &raw, Some(&re)).unwrap();
        assert!(matches!(outcome, ProjectionOutcome::Skip));
    }

    #[test]
    fn missing_name_is_malformed() {
        let raw = json!({"metadata": {"namespace": "n"}});
        let err = project(ResourceKind::Pods, &raw, None).unwrap_err();
        assert!(matches!(err, ProjectionError::MalformedObject { .. }));
    }

    #[test]
    fn base_name_strips_replicaset_suffix() {
        let raw = json!({
            "metadata": {
                "name": "web-7d9f8c6b5-abcde",
                "namespace": "n",
                "generateName": "web-7d9f8c6b5-",
                "ownerReferences": [{"kind": "ReplicaSet"}]
            },
            "spec": {"containers": []},
            "status": {}
        });
        let ProjectionOutcome::Record(p) = project(ResourceKind::Pods, &raw, None).unwrap() else {
            panic!()
        };
        assert_eq!(p.payload.get("base_name").unwrap(), "web");
    }
}
