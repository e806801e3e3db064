pub mod cache;
mod conf;
pub mod controller;
pub mod error;
pub mod model;
pub mod naming;
pub mod observability;
pub mod openapi;
pub mod registry;
pub mod server;

use std::sync::Arc;

pub use conf::{Config, StoreType};
use nexus_store::{KubeObjectStore, MemoryObjectStore, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::EndpointCache;
use crate::controller::CrdProcessor;
use crate::server::{GatewayState, ServingSupervisor, route_channel};

async fn kube_client(config: &Config) -> anyhow::Result<Option<kube::Client>> {
    match config.store()? {
        StoreType::Kube => Ok(Some(kube::Client::try_default().await?)),
        StoreType::Memory if config.watch_crds || config.watch_datamodels => {
            match kube::Client::try_default().await {
                Ok(client) => Ok(Some(client)),
                Err(e) => {
                    warn!(error = %e, "no cluster available, watchers disabled");
                    Ok(None)
                }
            }
        }
        StoreType::Memory => Ok(None),
    }
}

/// Runs the gateway until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    let client = kube_client(&config).await?;
    let store: Arc<dyn ObjectStore> = match (config.store()?, &client) {
        (StoreType::Kube, Some(client)) => Arc::new(KubeObjectStore::new(client.clone())),
        _ => Arc::new(MemoryObjectStore::new()),
    };
    info!(store = %config.store_type, %addr, "starting nexus gateway");

    let state = GatewayState::new(store);
    let cancel = CancellationToken::new();
    let (route_tx, route_rx) = route_channel(config.route_channel_depth);
    let supervisor = ServingSupervisor::new(
        state.clone(),
        addr,
        config.shutdown_timeout(),
        route_rx,
        cancel.clone(),
    );
    let mut serving = tokio::spawn(supervisor.run());

    let mut watchers = Vec::new();
    if let Some(client) = client {
        if config.watch_crds {
            let processor = Arc::new(CrdProcessor::new(
                &state,
                Arc::new(EndpointCache::new()),
                route_tx.clone(),
            ));
            watchers.push(tokio::spawn(controller::watch_crds(
                client.clone(),
                processor,
                state.registries.clone(),
                cancel.clone(),
            )));
        }
        if config.watch_datamodels {
            watchers.push(tokio::spawn(controller::watch_datamodels(
                client,
                state.registries.clone(),
                state.openapi.clone(),
                cancel.clone(),
            )));
        }
    }

    let served = tokio::select! {
        signal = shutdown_signal() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
            }
            None
        }
        served = &mut serving => Some(served),
    };
    cancel.cancel();
    drop(route_tx);
    let served = match served {
        Some(served) => served,
        None => serving.await,
    };
    for watcher in watchers {
        if let Err(e) = watcher.await {
            warn!(error = %e, "watcher task failed");
        }
    }
    served??;
    info!("nexus gateway stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
