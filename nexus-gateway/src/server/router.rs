use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter, get, on};
use bytes::Bytes;
use http::{StatusCode, Uri};
use serde_json::json;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::handler::{self, GatewayState, RestRequest, RouteContext, message};
use crate::model::{HttpMethod, RestUri};

/// Router syntax for a nexus URI. Every `{Type.Name}` segment becomes
/// `{s<index>}` so that routes sharing a prefix never disagree on parameter
/// names. Returns the path and the router-to-nexus parameter mapping, or
/// `None` when the URI cannot be routed.
///
/// Accepted paths are always insertable: parameters are whole segments with
/// positional names, there are no wildcards, and no segment carries the
/// legacy `:`/`*` prefixes the router refuses.
pub fn axum_path(uri: &str) -> Option<(String, BTreeMap<String, String>)> {
    if !uri.starts_with('/') {
        return None;
    }
    let mut params = BTreeMap::new();
    let mut segments = Vec::new();
    for (i, segment) in uri.split('/').enumerate() {
        let token = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .filter(|t| !t.is_empty() && !t.contains(['{', '}']));
        match token {
            Some(name) => {
                let key = format!("s{i}");
                segments.push(format!("{{{key}}}"));
                params.insert(key, name.to_string());
            }
            None if segment.contains(['{', '}']) => return None,
            None if segment.starts_with([':', '*']) => return None,
            None => segments.push(segment.to_string()),
        }
    }
    Some((segments.join("/"), params))
}

/// Verbs a URI is served under. `PUT` implies `PATCH`.
pub fn served_methods(uri: &RestUri) -> BTreeSet<HttpMethod> {
    let mut methods: BTreeSet<HttpMethod> = uri.methods.keys().copied().collect();
    if methods.contains(&HttpMethod::Put) {
        methods.insert(HttpMethod::Patch);
    }
    methods
}

fn method_filter(method: HttpMethod) -> Option<MethodFilter> {
    match method {
        HttpMethod::Get | HttpMethod::List => Some(MethodFilter::GET),
        HttpMethod::Put => Some(MethodFilter::PUT),
        HttpMethod::Patch => Some(MethodFilter::PATCH),
        HttpMethod::Delete => Some(MethodFilter::DELETE),
        HttpMethod::Post => None,
    }
}

/// Dynamic routes of one server instance. Routes can only be added; a
/// removal needs a fresh table.
pub struct RouteTable {
    state: GatewayState,
    router: RwLock<Router>,
    registered: Mutex<BTreeSet<(String, HttpMethod)>>,
    mounted: Mutex<BTreeSet<(String, &'static str)>>,
    serving: AtomicBool,
}

impl RouteTable {
    pub fn new(state: GatewayState) -> Self {
        Self {
            state,
            router: RwLock::new(Router::new().fallback(route_not_found)),
            registered: Mutex::new(BTreeSet::new()),
            mounted: Mutex::new(BTreeSet::new()),
            serving: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Mounts every (URI, method) pair not mounted yet and returns how many
    /// pairs were added.
    pub fn register(&self, uris: &[RestUri]) -> usize {
        let mut added = 0;
        for uri in uris {
            let Some((path, params)) = axum_path(&uri.uri) else {
                warn!(uri = %uri.uri, "skipping unroutable uri");
                continue;
            };
            for method in served_methods(uri) {
                if self.register_one(uri, &path, &params, method) {
                    added += 1;
                }
            }
        }
        added
    }

    fn register_one(
        &self,
        uri: &RestUri,
        path: &str,
        params: &BTreeMap<String, String>,
        method: HttpMethod,
    ) -> bool {
        let Some(filter) = method_filter(method) else {
            debug!(uri = %uri.uri, %method, "method not served");
            return false;
        };
        let key = (uri.uri.clone(), method);
        let mut registered = self
            .registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if registered.contains(&key) {
            return false;
        }

        // GET and LIST on one URI share a single GET route.
        let verb = if method == HttpMethod::List { "GET" } else { method.as_str() };
        let mut mounted = self.mounted.lock().unwrap_or_else(PoisonError::into_inner);
        if !mounted.contains(&(path.to_string(), verb)) {
            let route = Arc::new(RouteContext {
                uri: uri.uri.clone(),
                method,
                params: params.clone(),
            });
            let method_router = self.method_router(route, filter);
            // `mounted` rules out a second route for the same (path, verb),
            // and `axum_path` only yields conflict-free shapes.
            let mut router = self.router.write().unwrap_or_else(PoisonError::into_inner);
            let next = router.clone().route(path, method_router);
            *router = next;
            mounted.insert((path.to_string(), verb));
        }
        info!(uri = %uri.uri, %method, "registered route");
        registered.insert(key);
        true
    }

    fn method_router(&self, route: Arc<RouteContext>, filter: MethodFilter) -> MethodRouter {
        let state = self.state.clone();
        if route.params.is_empty() {
            on(
                filter,
                move |Query(query): Query<HashMap<String, String>>, uri: Uri, body: Bytes| {
                    let state = state.clone();
                    let route = route.clone();
                    async move {
                        let req = RestRequest {
                            params: HashMap::new(),
                            query,
                            request_uri: uri.to_string(),
                            body,
                        };
                        handler::handle(&state, &route, req).await
                    }
                },
            )
        } else {
            on(
                filter,
                move |Path(raw): Path<HashMap<String, String>>,
                      Query(query): Query<HashMap<String, String>>,
                      uri: Uri,
                      body: Bytes| {
                    let state = state.clone();
                    let route = route.clone();
                    async move {
                        let params = raw
                            .into_iter()
                            .filter_map(|(k, v)| route.params.get(&k).map(|n| (n.clone(), v)))
                            .collect();
                        let req = RestRequest {
                            params,
                            query,
                            request_uri: uri.to_string(),
                            body,
                        };
                        handler::handle(&state, &route, req).await
                    }
                },
            )
        }
    }

    /// Registered (nexus URI, method) pairs.
    pub fn routes(&self) -> BTreeSet<(String, HttpMethod)> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn router(&self) -> Router {
        self.router
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::SeqCst);
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }
}

async fn route_not_found(uri: Uri) -> Response {
    message(StatusCode::NOT_FOUND, format!("no route for {}", uri.path()))
}

/// Static endpoints plus a fallback into the dynamic table.
pub fn build_router(routes: Arc<RouteTable>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/readyz", get(readyz))
        .route("/debug/all", get(debug_all))
        .route("/{datamodel}/openapi.json", get(openapi_document))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(routes)
}

async fn dispatch(State(routes): State<Arc<RouteTable>>, req: Request) -> Response {
    match routes.router().oneshot(req).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn readyz(State(routes): State<Arc<RouteTable>>) -> Response {
    if routes.is_serving() {
        Json(json!({ "status": "ready" })).into_response()
    } else {
        message(StatusCode::SERVICE_UNAVAILABLE, "not serving")
    }
}

async fn debug_all(State(routes): State<Arc<RouteTable>>) -> Response {
    let state = routes.state();
    let snapshot = state.registries.snapshot().await;
    let registered: Vec<_> = routes
        .routes()
        .into_iter()
        .map(|(uri, method)| json!({ "uri": uri, "method": method }))
        .collect();
    Json(json!({
        "crdTypeToRestUris": snapshot.crd_to_uris,
        "uriToUriInfo": snapshot.uri_info,
        "uriToCrdType": snapshot.uri_to_crd,
        "crdTypeToNodeInfo": snapshot.crd_to_node,
        "datamodelToDatamodelInfo": snapshot.datamodels,
        "registeredRoutes": registered,
        "totalHttpServerRestarts": state.restarts.load(Ordering::SeqCst),
    }))
    .into_response()
}

async fn openapi_document(
    State(routes): State<Arc<RouteTable>>,
    Path(datamodel): Path<String>,
) -> Response {
    match routes.state().openapi.document(&datamodel).await {
        Some(doc) => Json(doc).into_response(),
        None => message(
            StatusCode::NOT_FOUND,
            format!("no openapi document for datamodel {datamodel}"),
        ),
    }
}
