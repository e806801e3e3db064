//! HTTP serving layer: one supervisor task owns the listener and applies
//! route events in arrival order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::model::RestUri;

mod handler;
mod link;
mod router;

pub use handler::{
    CONTINUE_HEADER, DEFAULT_LIST_LIMIT, GatewayState, RestRequest, RouteContext,
    object_view,
};
pub use link::LinkGvk;
pub use router::{RouteTable, axum_path, build_router, served_methods};

/// Work for the serving supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    /// Replace the running instance with one serving exactly these routes.
    FullReplace(Vec<RestUri>),
    /// Mount these routes on the running instance.
    Incremental(Vec<RestUri>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Serving,
    Draining,
    Stopped,
}

#[derive(Clone)]
pub struct ServerStatus {
    pub state: ServerState,
    /// Number of instances started so far.
    pub generation: u64,
    pub local_addr: Option<SocketAddr>,
    pub routes: Option<Arc<RouteTable>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn route_channel(
    depth: usize,
) -> (mpsc::Sender<RouteEvent>, mpsc::Receiver<RouteEvent>) {
    mpsc::channel(depth.max(1))
}

struct Instance {
    routes: Arc<RouteTable>,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

/// Owns the HTTP listener. At most one instance is serving at any time:
/// the old one is fully drained before its replacement binds.
pub struct ServingSupervisor {
    state: GatewayState,
    addr: SocketAddr,
    shutdown_timeout: Duration,
    events: mpsc::Receiver<RouteEvent>,
    status: watch::Sender<ServerStatus>,
    cancel: CancellationToken,
    generation: u64,
}

impl ServingSupervisor {
    pub fn new(
        state: GatewayState,
        addr: SocketAddr,
        shutdown_timeout: Duration,
        events: mpsc::Receiver<RouteEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(ServerStatus {
            state: ServerState::Starting,
            generation: 0,
            local_addr: None,
            routes: None,
        });
        Self {
            state,
            addr,
            shutdown_timeout,
            events,
            status,
            cancel,
            generation: 0,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    fn publish(&self, state: ServerState, instance: Option<&Instance>) {
        self.status.send_replace(ServerStatus {
            state,
            generation: self.generation,
            local_addr: instance.map(|i| i.local_addr),
            routes: instance.map(|i| i.routes.clone()),
        });
    }

    /// Runs until the cancel token fires or every event sender is gone.
    /// Failing to bind a replacement instance is fatal.
    pub async fn run(mut self) -> Result<(), ServeError> {
        let mut current = self.start(&[]).await?;
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.events.recv() => event,
            };
            match event {
                None => break,
                Some(RouteEvent::FullReplace(routes)) => {
                    info!(routes = routes.len(), "route removal, restarting server");
                    self.drain(current).await;
                    current = self.start(&routes).await?;
                    let total = self.state.restarts.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(restarts = total, "server restarted");
                }
                Some(RouteEvent::Incremental(added)) => {
                    let mounted = current.routes.register(&added);
                    debug!(mounted, "hot-registered routes");
                }
            }
        }
        self.drain(current).await;
        self.publish(ServerState::Stopped, None);
        info!("server stopped");
        Ok(())
    }

    async fn start(&mut self, routes: &[RestUri]) -> Result<Instance, ServeError> {
        self.generation += 1;
        self.publish(ServerState::Starting, None);

        let table = Arc::new(RouteTable::new(self.state.clone()));
        table.register(routes);
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServeError::Bind {
                addr: self.addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let app = build_router(table.clone());
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        table.set_serving(true);
        let instance = Instance {
            routes: table,
            local_addr,
            shutdown,
            task,
        };
        self.publish(ServerState::Serving, Some(&instance));
        info!(%local_addr, generation = self.generation, "server listening");
        Ok(instance)
    }

    async fn drain(&self, instance: Instance) {
        instance.routes.set_serving(false);
        self.publish(ServerState::Draining, Some(&instance));
        instance.shutdown.cancel();

        let mut task = instance.task;
        match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => debug!(addr = %instance.local_addr, "server drained"),
            Ok(Ok(Err(e))) => warn!(error = %e, "server exited with error"),
            Ok(Err(e)) => error!(error = %e, "server task failed"),
            Err(_) => {
                warn!(
                    timeout = ?self.shutdown_timeout,
                    "graceful shutdown timed out, aborting"
                );
                task.abort();
                let _ = task.await;
            }
        }
    }
}
