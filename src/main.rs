use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kube_zabbix_rs::cleanup::TaskManager;
use kube_zabbix_rs::config::{Args, KubeZabbixConfig};
use kube_zabbix_rs::scheduler;
use kube_zabbix_rs::signals;
use kube_zabbix_rs::state::ClusterState;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match KubeZabbixConfig::from_args(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(config);
    let state = ClusterState::new();
    let tasks = TaskManager::new("kube-zabbix-rs");
    let (exit_tx, exit_rx) = watch::channel(false);

    if let Err(e) = scheduler::run(config, state.clone(), &tasks, exit_rx).await {
        tracing::error!(error = %e, "failed to start scheduler");
        return ExitCode::FAILURE;
    }

    signals::run_until_shutdown(state, &tasks, exit_tx).await;
    ExitCode::SUCCESS
}
