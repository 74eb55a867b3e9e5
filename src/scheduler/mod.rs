//! Wires the cluster client, state, sinks and `Pipeline` into a set of
//! `TaskManager`-registered tasks, one quartet per active resource kind plus
//! the global heartbeat (SPEC_FULL.md §4.4).

pub mod dispatcher;
pub mod heartbeat;

use std::sync::Arc;

use tokio::sync::watch as watch_channel;

use crate::cleanup::TaskManager;
use crate::config::KubeZabbixConfig;
use crate::errors::AppResult;
use crate::k8s::client::{build_client, ClusterClient};
use crate::k8s::kinds::ResourceKind;
use crate::sinks::{
    DryRunMetricSink, HttpInventorySink, InventorySink, MetricSink, NullInventorySink, TcpMetricSink,
};
use crate::state::ClusterState;
use dispatcher::Pipeline;

pub use dispatcher::Pipeline as DispatchPipeline;

/// Runs the whole daemon: builds the cluster client and sinks, spawns every
/// per-kind task into `tasks`, and returns once spawning is complete. The
/// caller owns `exit_rx`/`tasks` and drives shutdown.
pub async fn run(
    config: Arc<KubeZabbixConfig>,
    state: ClusterState,
    tasks: &TaskManager,
    exit_rx: watch_channel::Receiver<bool>,
) -> AppResult<()> {
    let client = build_client(&config.client_mode, config.k8s_context.as_deref()).await?;
    let cluster_client = ClusterClient::new(client);

    let metric_sink: Arc<dyn MetricSink> = if config.zabbix_dry_run {
        Arc::new(DryRunMetricSink)
    } else {
        Arc::new(TcpMetricSink::new(
            config.metric_sink_host.clone(),
            config.metric_sink_port,
            config.k8s_api_request_timeout_seconds,
        ))
    };

    let inventory_sink: Arc<dyn InventorySink> = if config.web_api_enable {
        Arc::new(HttpInventorySink::new(config.inventory_base_url.clone()))
    } else {
        Arc::new(NullInventorySink)
    };

    let pipeline = Arc::new(Pipeline {
        state,
        metric_sink: metric_sink.clone(),
        inventory_sink,
        config: config.clone(),
    });

    for kind in ResourceKind::ALL {
        if config.resources_exclude.iter().any(|k| k == kind.as_str()) {
            tracing::info!(kind = kind.as_str(), "resource kind excluded, not spawning tasks");
            continue;
        }

        if kind.supports_watch() {
            tasks
                .spawn_task(
                    format!("{}:watch", kind.as_str()),
                    pipeline.clone().run_watch_task(kind, cluster_client.clone(), exit_rx.clone()),
                )
                .await;
        } else if kind.has_own_store() {
            tasks
                .spawn_task(
                    format!("{}:relist", kind.as_str()),
                    pipeline.clone().run_relist_task(kind, cluster_client.clone(), exit_rx.clone()),
                )
                .await;
        }

        if kind.has_own_store() {
            tasks
                .spawn_task(
                    format!("{}:discovery", kind.as_str()),
                    pipeline.clone().run_discovery_task(kind, cluster_client.clone(), exit_rx.clone()),
                )
                .await;
        }

        if kind.is_aggregated() {
            tasks
                .spawn_task(
                    format!("{}:aggregate", kind.as_str()),
                    pipeline.clone().run_aggregate_task(kind, exit_rx.clone()),
                )
                .await;
        } else {
            tasks
                .spawn_task(
                    format!("{}:resend", kind.as_str()),
                    pipeline.clone().run_resend_task(kind, exit_rx.clone()),
                )
                .await;
        }
    }

    if !config.resources_exclude.iter().any(|k| k == "nodes") {
        tasks
            .spawn_task("heartbeat", heartbeat::run(metric_sink, config.clone(), exit_rx.clone()))
            .await;
    }

    Ok(())
}
