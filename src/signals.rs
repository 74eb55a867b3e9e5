//! Unix signal handling: SIGTERM triggers bounded shutdown, SIGUSR1/SIGUSR2
//! dump diagnostic state to the log (SPEC_FULL.md §5, §6).

use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch as watch_channel;

use crate::cleanup::TaskManager;
use crate::state::ClusterState;

/// Installs signal handlers and runs until SIGTERM, then drives a bounded
/// shutdown of `tasks` before returning.
pub async fn run_until_shutdown(state: ClusterState, tasks: &TaskManager, exit_tx: watch_channel::Sender<bool>) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut sigusr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGUSR1 handler");
            return;
        }
    };
    let mut sigusr2 = match signal(SignalKind::user_defined2()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGUSR2 handler");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                let _ = exit_tx.send(true);
                tasks.shutdown(Duration::from_secs(3)).await;
                return;
            }
            _ = sigusr1.recv() => {
                let counts = state.dump_counts().await;
                tracing::info!(?counts, "SIGUSR1: resource store counts");
            }
            _ = sigusr2.recv() => {
                let payloads = state.dump_payloads().await;
                for (kind, records) in payloads {
                    tracing::info!(kind = %kind, records = ?records, "SIGUSR2: resource store payloads");
                }
            }
        }
    }
}
