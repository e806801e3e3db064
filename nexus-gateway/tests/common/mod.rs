#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use http::{Request, Response};
use nexus_gateway::cache::EndpointCache;
use nexus_gateway::controller::{CrdEvent, CrdProcessor};
use nexus_gateway::model::EventType;
use nexus_gateway::server::{GatewayState, RouteEvent, RouteTable, build_router};
use nexus_store::MemoryObjectStore;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub const ROOT_CRD: &str = "roots.orgchart.vmware.org";
pub const LEADER_CRD: &str = "leaders.management.vmware.org";
pub const EMPLOYEE_CRD: &str = "employees.role.vmware.org";
pub const CONFIG_CRD: &str = "configs.orgchart.vmware.org";

pub const ROOT: &str = r#"{
    "name": "orgchart.Root",
    "is_singleton": true,
    "children": {
        "leaders.management.vmware.org": {"fieldName": "CEO", "fieldNameGvk": "cEOGvk", "isNamed": false}
    },
    "nexus-rest-api-gen": {"uris": [
        {"uri": "/root/{orgchart.Root}", "methods": {"GET": {}, "PUT": {}, "DELETE": {}}}
    ]}
}"#;

pub const LEADER: &str = r#"{
    "name": "management.Leader",
    "hierarchy": ["roots.orgchart.vmware.org"],
    "children": {
        "employees.role.vmware.org": {"fieldName": "Staff", "fieldNameGvk": "staffGvk", "isNamed": true}
    },
    "nexus-rest-api-gen": {"uris": [
        {"uri": "/root/{orgchart.Root}/leader/{management.Leader}", "methods": {"GET": {}, "PUT": {}, "DELETE": {}}},
        {"uri": "/leaders", "methods": {"LIST": {}}},
        {"uri": "/leader", "methods": {"PUT": {}}}
    ]}
}"#;

pub const EMPLOYEE: &str = r#"{
    "name": "role.Employee",
    "hierarchy": ["roots.orgchart.vmware.org", "leaders.management.vmware.org"],
    "nexus-rest-api-gen": {"uris": [
        {"uri": "/root/{orgchart.Root}/leader/{management.Leader}/employee/{role.Employee}", "methods": {"GET": {}, "PUT": {}, "DELETE": {}}}
    ]}
}"#;

pub const CONFIG: &str = r#"{
    "name": "orgchart.Config",
    "is_singleton": true,
    "nexus-rest-api-gen": {"uris": [
        {"uri": "/config", "methods": {"GET": {}, "PUT": {}}}
    ]}
}"#;

pub fn upsert(crd_type: &str, annotation: &str) -> CrdEvent {
    CrdEvent {
        event: EventType::Upsert,
        crd_type: crd_type.to_string(),
        annotation: Some(annotation.to_string()),
        spec: None,
    }
}

pub fn delete(crd_type: &str) -> CrdEvent {
    CrdEvent {
        event: EventType::Delete,
        crd_type: crd_type.to_string(),
        annotation: None,
        spec: None,
    }
}

pub struct TestGateway {
    pub app: Router,
    pub routes: Arc<RouteTable>,
    pub state: GatewayState,
    pub store: MemoryObjectStore,
}

/// Gateway with the org chart types registered and every synthesized route
/// mounted on a serving route table.
pub async fn org_chart() -> TestGateway {
    let store = MemoryObjectStore::new();
    let state = GatewayState::new(Arc::new(store.clone()));
    let (tx, mut rx) = mpsc::channel::<RouteEvent>(16);
    let processor = CrdProcessor::new(&state, Arc::new(EndpointCache::new()), tx);
    for (crd_type, annotation) in [
        (ROOT_CRD, ROOT),
        (LEADER_CRD, LEADER),
        (EMPLOYEE_CRD, EMPLOYEE),
        (CONFIG_CRD, CONFIG),
    ] {
        processor.process(upsert(crd_type, annotation)).await.unwrap();
    }

    let routes = Arc::new(RouteTable::new(state.clone()));
    while let Ok(event) = rx.try_recv() {
        match event {
            RouteEvent::Incremental(uris) | RouteEvent::FullReplace(uris) => {
                routes.register(&uris);
            }
        }
    }
    routes.set_serving(true);
    TestGateway {
        app: build_router(routes.clone()),
        routes,
        state,
        store,
    }
}

impl TestGateway {
    pub async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> Response<Body> {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        self.app.clone().oneshot(req).await.unwrap()
    }

    /// Status code and JSON body; an empty body reads as `null`.
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (u16, Value) {
        let resp = self.call(method, uri, body).await;
        let status = resp.status().as_u16();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}
