mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use nexus_gateway::cache::EndpointCache;
use nexus_gateway::controller::CrdProcessor;
use nexus_gateway::model::HttpMethod;
use nexus_gateway::server::{
    GatewayState, RouteTable, ServeError, ServerState, ServingSupervisor, route_channel,
    served_methods,
};
use nexus_store::MemoryObjectStore;
use tokio_util::sync::CancellationToken;

fn local() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn wait_for_route(routes: &RouteTable, uri: &str, method: HttpMethod) {
    for _ in 0..100 {
        if routes.routes().contains(&(uri.to_string(), method)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{method} {uri} never registered");
}

#[tokio::test]
async fn additions_hot_register_and_removals_restart() {
    let state = GatewayState::new(Arc::new(MemoryObjectStore::new()));
    let (tx, rx) = route_channel(8);
    let cancel = CancellationToken::new();
    let supervisor = ServingSupervisor::new(
        state.clone(),
        local(),
        Duration::from_secs(2),
        rx,
        cancel.clone(),
    );
    let mut status = supervisor.subscribe();
    let serving = tokio::spawn(supervisor.run());

    let first = status
        .wait_for(|s| s.state == ServerState::Serving)
        .await
        .unwrap()
        .clone();
    assert_eq!(first.generation, 1);
    assert_ne!(first.local_addr.unwrap().port(), 0);
    let first_routes = first.routes.unwrap();

    let processor = CrdProcessor::new(&state, Arc::new(EndpointCache::new()), tx.clone());
    processor.process(upsert(ROOT_CRD, ROOT)).await.unwrap();
    processor.process(upsert(LEADER_CRD, LEADER)).await.unwrap();
    wait_for_route(&first_routes, "/leaders", HttpMethod::List).await;
    wait_for_route(&first_routes, "/root/{orgchart.Root}", HttpMethod::Patch).await;
    assert_eq!(status.borrow().generation, 1);
    assert_eq!(state.restarts.load(Ordering::SeqCst), 0);

    processor.process(delete(LEADER_CRD)).await.unwrap();
    let second = status
        .wait_for(|s| s.generation == 2 && s.state == ServerState::Serving)
        .await
        .unwrap()
        .clone();
    assert_eq!(state.restarts.load(Ordering::SeqCst), 1);

    let expected: BTreeSet<(String, HttpMethod)> = state
        .registries
        .rest_uris(ROOT_CRD)
        .await
        .iter()
        .flat_map(|u| served_methods(u).into_iter().map(|m| (u.uri.clone(), m)))
        .collect();
    let mounted = second.routes.unwrap().routes();
    assert_eq!(mounted, expected);
    assert!(!mounted.iter().any(|(uri, _)| uri == "/leaders"));
    assert!(!first_routes.is_serving());

    cancel.cancel();
    serving.await.unwrap().unwrap();
    assert_eq!(status.borrow().state, ServerState::Stopped);
}

#[tokio::test]
async fn closed_channel_stops_the_server() {
    let state = GatewayState::new(Arc::new(MemoryObjectStore::new()));
    let (tx, rx) = route_channel(1);
    let supervisor = ServingSupervisor::new(
        state,
        local(),
        Duration::from_secs(1),
        rx,
        CancellationToken::new(),
    );
    let status = supervisor.subscribe();
    let serving = tokio::spawn(supervisor.run());
    drop(tx);
    serving.await.unwrap().unwrap();
    assert_eq!(status.borrow().state, ServerState::Stopped);
}

#[tokio::test]
async fn bind_failure_is_fatal() {
    let taken = std::net::TcpListener::bind(local()).unwrap();
    let addr = taken.local_addr().unwrap();
    let (_tx, rx) = route_channel(1);
    let supervisor = ServingSupervisor::new(
        GatewayState::new(Arc::new(MemoryObjectStore::new())),
        addr,
        Duration::from_secs(1),
        rx,
        CancellationToken::new(),
    );
    let err = supervisor.run().await.unwrap_err();
    assert!(matches!(err, ServeError::Bind { .. }));
}
