//! Global heartbeat: one task, independent of any resource kind, pushing a
//! liveness metric every `api_zabbix_interval` seconds (SPEC_FULL.md §4.4).

use std::sync::Arc;

use tokio::sync::watch as watch_channel;

use crate::config::KubeZabbixConfig;
use crate::sinks::{MetricItem, MetricSink};

pub async fn run(
    metric_sink: Arc<dyn MetricSink>,
    config: Arc<KubeZabbixConfig>,
    mut exit: watch_channel::Receiver<bool>,
) {
    loop {
        let epoch = chrono::Utc::now().timestamp();
        let items = vec![MetricItem {
            host: config.zabbix_host.clone(),
            key: "check_kubernetesd[discover,api]".to_string(),
            value: epoch.to_string(),
        }];
        if let Err(e) = metric_sink.send(&items).await {
            tracing::warn!(error = %e, "heartbeat send failed");
        }
        tokio::select! {
            _ = exit.changed() => { if *exit.borrow() { return; } }
            _ = tokio::time::sleep(config.api_zabbix_interval) => {}
        }
    }
}
