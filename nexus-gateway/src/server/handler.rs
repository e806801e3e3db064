use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::Json;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::{HeaderValue, StatusCode};
use nexus_store::{
    Document, Gvr, ListOptions, ObjectPatch, ObjectStore, PatchOp,
    StoreError, StoreObject, Subresource,
};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::link;
use crate::error::{ApiError, override_message};
use crate::model::{DEFAULT_KEY, HttpCodes, HttpMethod, NodeInfo, UriType};
use crate::naming::{self, DISPLAY_NAME_LABEL, IS_NAME_HASHED_LABEL};
use crate::openapi::OpenApiDocs;
use crate::registry::Registries;

pub const DEFAULT_LIST_LIMIT: u32 = 500;
pub const CONTINUE_HEADER: &str = "nexus-continue";
const RESERVED_STATUS_KEY: &str = "nexus";

/// Shared by every handler of every server instance.
#[derive(Clone)]
pub struct GatewayState {
    pub registries: Arc<Registries>,
    pub store: Arc<dyn ObjectStore>,
    pub openapi: Arc<OpenApiDocs>,
    pub restarts: Arc<AtomicU64>,
}

impl GatewayState {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            registries: Arc::new(Registries::new()),
            store,
            openapi: Arc::new(OpenApiDocs::new()),
            restarts: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Static facts about one registered (URI, method) route.
#[derive(Debug, Clone)]
pub struct RouteContext {
    /// URI as written in the annotation, `{Type.Name}` tokens included.
    pub uri: String,
    pub method: HttpMethod,
    /// Router parameter name to annotation parameter name.
    pub params: BTreeMap<String, String>,
}

/// Extracted pieces of an incoming request.
#[derive(Debug, Default)]
pub struct RestRequest {
    /// Path parameters keyed by annotation parameter name.
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub request_uri: String,
    pub body: Bytes,
}

pub fn message(status: StatusCode, msg: impl Into<String>) -> Response {
    let msg: String = msg.into();
    (status, Json(json!({ "message": msg }))).into_response()
}

pub fn escape_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn parse_body(body: &Bytes) -> Result<Document, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Document::new());
    }
    Ok(serde_json::from_slice(body)?)
}

/// Spec and status as exposed to callers: relation pointers and the
/// reserved status key removed.
pub fn object_view(node: &NodeInfo, obj: &StoreObject) -> Value {
    let mut spec = obj.spec();
    for field in node.relation_fields() {
        spec.remove(field);
    }
    let mut status = obj.status();
    status.remove(RESERVED_STATUS_KEY);
    json!({ "spec": spec, "status": status })
}

pub async fn handle(
    state: &GatewayState,
    route: &RouteContext,
    req: RestRequest,
) -> Response {
    let call = match NodeCall::resolve(state, route, req).await {
        Ok(call) => call,
        Err(e) => return e.into_response(),
    };
    let result = match route.method {
        HttpMethod::List => call.list().await,
        HttpMethod::Get if call.wants_list() => call.list().await,
        HttpMethod::Get => call.get().await,
        HttpMethod::Put => call.put().await,
        HttpMethod::Patch => call.patch().await,
        HttpMethod::Delete => call.delete().await,
        HttpMethod::Post => Err(ApiError::BadRequest(format!(
            "method POST is not served for {}",
            route.uri
        ))),
    };
    result.unwrap_or_else(|e| e.into_response())
}

/// One request bound to the node type that owns its route.
struct NodeCall<'a> {
    state: &'a GatewayState,
    route: &'a RouteContext,
    req: RestRequest,
    crd_type: String,
    gvr: Gvr,
    node: NodeInfo,
    uri_type: UriType,
    codes: HttpCodes,
}

impl<'a> NodeCall<'a> {
    async fn resolve(
        state: &'a GatewayState,
        route: &'a RouteContext,
        req: RestRequest,
    ) -> Result<Self, ApiError> {
        let registries = &state.registries;
        let crd_type = registries
            .crd_type_for_uri(&route.uri)
            .await
            .ok_or_else(|| {
                ApiError::NotFound(format!("no resource type serves {}", route.uri))
            })?;
        let node = registries.node(&crd_type).await.ok_or_else(|| {
            ApiError::NotFound(format!("resource type {crd_type} is not registered"))
        })?;
        let uri_type = registries
            .uri_type(&route.uri)
            .await
            .unwrap_or(UriType::Default);
        let codes = registries
            .rest_uris(&crd_type)
            .await
            .into_iter()
            .find(|u| u.uri == route.uri)
            .and_then(|u| {
                let codes = match route.method {
                    HttpMethod::Patch => u
                        .methods
                        .get(&HttpMethod::Patch)
                        .or_else(|| u.methods.get(&HttpMethod::Put)),
                    m => u.methods.get(&m),
                };
                codes.cloned()
            })
            .unwrap_or_default();

        Ok(Self {
            state,
            route,
            req,
            gvr: naming::gvr_for(&crd_type),
            crd_type,
            node,
            uri_type,
            codes,
        })
    }

    fn store(&self) -> &dyn ObjectStore {
        self.state.store.as_ref()
    }

    fn store_error(&self, err: StoreError) -> ApiError {
        ApiError::from_store(err, Some(&self.codes))
    }

    fn param(&self, name: &str) -> Option<&str> {
        self.req
            .params
            .get(name)
            .or_else(|| self.req.query.get(name))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// A GET on a plain URI that does not identify an instance lists them.
    fn wants_list(&self) -> bool {
        self.uri_type == UriType::Default
            && !self.node.is_singleton
            && self.param(&self.node.name).is_none()
    }

    fn missing_param(&self) -> ApiError {
        debug!(
            param = %self.node.name,
            uri = %self.req.request_uri,
            "required param missing"
        );
        ApiError::BadRequest(
            override_message(Some(&self.codes), 400).unwrap_or_else(|| {
                format!("Could not find required param: {}", self.node.name)
            }),
        )
    }

    /// Display name addressed by the request. Singletons only answer to
    /// `default`.
    fn node_name(&self) -> Result<String, ApiError> {
        let node = &self.node;
        let mut name = self.req.params.get(&node.name).cloned().unwrap_or_default();
        if node.is_singleton {
            if name.is_empty() {
                name = DEFAULT_KEY.to_string();
            }
            if name != DEFAULT_KEY {
                return Err(ApiError::BadRequest(format!(
                    "Wrong singleton node name {}: {} for request {}, only '{}' is allowed as name",
                    node.name, name, self.req.request_uri, DEFAULT_KEY
                )));
            }
        }
        if let Some(v) = self.req.query.get(&node.name).filter(|v| !v.is_empty()) {
            name = v.clone();
        }
        if name.is_empty() {
            return Err(self.missing_param());
        }
        Ok(name)
    }

    /// One label per registered ancestor, valued by its path or query
    /// parameter, `default` when the request names neither.
    async fn parent_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        for parent in &self.node.parent_hierarchy {
            if let Some(parent_node) = self.state.registries.node(parent).await {
                let value = self.param(&parent_node.name).unwrap_or(DEFAULT_KEY);
                labels.insert(parent.clone(), value.to_string());
            }
        }
        labels
    }

    fn hashed(&self, labels: &BTreeMap<String, String>, name: &str) -> String {
        naming::hashed_name(&self.crd_type, &self.node.parent_hierarchy, labels, name)
    }

    async fn list(&self) -> Result<Response, ApiError> {
        let limit = match self.req.query.get("limit") {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                ApiError::BadRequest(format!("invalid limit '{raw}'"))
            })?,
            None => DEFAULT_LIST_LIMIT,
        };
        let options = ListOptions {
            label_selector: self.parent_labels().await,
            limit: Some(limit),
            continue_token: self.req.query.get("continue").cloned(),
        };
        let list = self
            .store()
            .list(&self.gvr, &options)
            .await
            .map_err(|e| self.store_error(e))?;

        let mut out = serde_json::Map::new();
        for item in &list.items {
            let key = item.label(DISPLAY_NAME_LABEL).unwrap_or(item.name());
            out.insert(key.to_string(), object_view(&self.node, item));
        }
        let mut response = Json(Value::Object(out)).into_response();
        if let Some(token) = list.continue_token.filter(|t| !t.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(&token) {
                response.headers_mut().insert(CONTINUE_HEADER, value);
            }
        }
        Ok(response)
    }

    async fn get(&self) -> Result<Response, ApiError> {
        let name = self.node_name()?;
        let labels = self.parent_labels().await;
        let obj = self
            .store()
            .get(&self.gvr, &self.hashed(&labels, &name))
            .await
            .map_err(|e| self.store_error(e))?;

        let body = match self.uri_type {
            UriType::Status => {
                let mut status = obj.status();
                status.remove(RESERVED_STATUS_KEY);
                Value::Object(status)
            }
            UriType::SingleLink | UriType::NamedLink => {
                link::link_view(self.state, &self.node, self.uri_type, &self.route.uri, &obj)
                    .await?
            }
            UriType::Default => object_view(&self.node, &obj),
        };
        Ok(Json(body).into_response())
    }

    async fn put(&self) -> Result<Response, ApiError> {
        let name = self.node_name()?;
        let body = parse_body(&self.req.body)?;

        let mut labels = self.parent_labels().await;
        labels.insert(IS_NAME_HASHED_LABEL.to_string(), "true".to_string());
        labels.insert(DISPLAY_NAME_LABEL.to_string(), name.clone());
        labels.insert(self.node.name.clone(), name.clone());
        let hashed = self.hashed(&labels, &name);

        match self.store().get(&self.gvr, &hashed).await {
            Ok(mut existing) => {
                existing.set_labels(labels);
                self.update_existing(existing, body).await
            }
            Err(e) if e.is_not_found() => {
                if self.uri_type == UriType::Status {
                    return Err(ApiError::NotFound(
                        "Can't put status subresource as nexus object not found"
                            .to_string(),
                    ));
                }
                let mut obj = StoreObject::new(&self.gvr, self.node.kind(), &hashed);
                obj.set_labels(labels.clone());
                obj.set_spec(body);
                self.store()
                    .create(&self.gvr, &obj)
                    .await
                    .map_err(|e| self.store_error(e))?;
                self.link_into_parent(&labels, &name, &hashed).await?;
                Ok(message(StatusCode::OK, name))
            }
            Err(e) => Err(self.store_error(e)),
        }
    }

    async fn update_existing(
        &self,
        mut obj: StoreObject,
        mut body: Document,
    ) -> Result<Response, ApiError> {
        let name = obj.name().to_string();
        if self.uri_type == UriType::Status {
            if body.contains_key(RESERVED_STATUS_KEY) {
                return Err(ApiError::BadRequest(
                    "can't update nexus status subresource, only user defined status subresource update is allowed"
                        .to_string(),
                ));
            }
            if !obj.has_status() {
                self.store()
                    .patch(
                        &self.gvr,
                        &name,
                        &ObjectPatch::Merge(json!({ "status": {} })),
                        Some(Subresource::Status),
                    )
                    .await
                    .map_err(|e| self.store_error(e))?;
            }
            let ops = body
                .into_iter()
                .map(|(k, v)| PatchOp::add(format!("/status/{}", escape_pointer(&k)), v))
                .collect();
            self.store()
                .patch(&self.gvr, &name, &ObjectPatch::Json(ops), Some(Subresource::Status))
                .await
                .map_err(|e| self.store_error(e))?;
            return Ok(message(StatusCode::OK, "Status Updated successfully"));
        }

        if self.req.query.get("update_if_exists").map(String::as_str) == Some("false") {
            return Err(ApiError::Forbidden("Already Exists.".to_string()));
        }

        let stored = obj.spec();
        for field in self.node.relation_fields() {
            if let Some(value) = stored.get(field) {
                body.insert(field.to_string(), value.clone());
            }
        }
        obj.set_spec(body);
        self.store()
            .update(&self.gvr, &obj)
            .await
            .map_err(|e| self.store_error(e))?;
        Ok(message(StatusCode::OK, "Updated successfully"))
    }

    /// Points the immediate parent at a freshly created child.
    async fn link_into_parent(
        &self,
        labels: &BTreeMap<String, String>,
        name: &str,
        hashed: &str,
    ) -> Result<(), ApiError> {
        let Some(parent_type) = self.node.parent() else {
            return Ok(());
        };
        let registries = &self.state.registries;
        let Some(parent) = registries.node(parent_type).await else {
            warn!(parent = %parent_type, "parent type not registered, skipping link");
            return Ok(());
        };
        let Some(rel) = parent
            .children
            .get(&self.crd_type)
            .or_else(|| parent.links.get(&self.crd_type))
        else {
            warn!(parent = %parent_type, child = %self.crd_type, "parent has no relation to child");
            return Ok(());
        };

        let parent_name = labels
            .get(parent_type)
            .map(String::as_str)
            .unwrap_or(DEFAULT_KEY);
        let parent_hashed = naming::hashed_name(
            parent_type,
            &parent.parent_hierarchy,
            labels,
            parent_name,
        );
        let pointer = json!({
            "group": self.gvr.group,
            "kind": self.node.kind(),
            "name": hashed,
        });
        let patch = if rel.is_named {
            let mut named = serde_json::Map::new();
            named.insert(name.to_string(), pointer);
            let mut spec = serde_json::Map::new();
            spec.insert(rel.field_name_gvk.clone(), Value::Object(named));
            ObjectPatch::Merge(json!({ "spec": spec }))
        } else {
            ObjectPatch::Json(vec![PatchOp::add(
                format!("/spec/{}", escape_pointer(&rel.field_name_gvk)),
                pointer,
            )])
        };
        self.store()
            .patch(&naming::gvr_for(parent_type), &parent_hashed, &patch, None)
            .await
            .map_err(|e| self.store_error(e))?;
        Ok(())
    }

    async fn patch(&self) -> Result<Response, ApiError> {
        let name = self.node_name()?;
        let labels = self.parent_labels().await;
        let hashed = self.hashed(&labels, &name);
        let mut body = parse_body(&self.req.body)?;

        let (patch, subresource, done) = if self.uri_type == UriType::Status {
            body.remove(RESERVED_STATUS_KEY);
            (
                json!({ "status": body }),
                Some(Subresource::Status),
                "Status patch applied successfully",
            )
        } else {
            for field in self.node.relation_fields() {
                body.remove(field);
            }
            (json!({ "spec": body }), None, "Patch applied successfully")
        };
        self.store()
            .patch(&self.gvr, &hashed, &ObjectPatch::Merge(patch), subresource)
            .await
            .map_err(|e| self.store_error(e))?;
        Ok(message(StatusCode::OK, done))
    }

    async fn delete(&self) -> Result<Response, ApiError> {
        let name = self.node_name()?;
        let labels = self.parent_labels().await;
        let hashed = self.hashed(&labels, &name);
        self.store()
            .get(&self.gvr, &hashed)
            .await
            .map_err(|e| self.store_error(e))?;

        let mut selector = labels.clone();
        selector.insert(self.crd_type.clone(), name.clone());
        for descendant in self.descendant_types().await {
            self.store()
                .delete_collection(&naming::gvr_for(&descendant), &selector)
                .await
                .map_err(|e| self.store_error(e))?;
        }

        self.unlink_from_parent(&labels, &name).await?;
        self.store()
            .delete(&self.gvr, &hashed)
            .await
            .map_err(|e| self.store_error(e))?;
        Ok(StatusCode::OK.into_response())
    }

    /// Every registered descendant type, deepest first.
    async fn descendant_types(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::from([self.crd_type.clone()]);
        let mut queue: VecDeque<String> = self.node.children.keys().cloned().collect();
        while let Some(crd_type) = queue.pop_front() {
            if !seen.insert(crd_type.clone()) {
                continue;
            }
            if let Some(node) = self.state.registries.node(&crd_type).await {
                queue.extend(node.children.keys().cloned());
            }
            order.push(crd_type);
        }
        order.reverse();
        order
    }

    async fn unlink_from_parent(
        &self,
        labels: &BTreeMap<String, String>,
        name: &str,
    ) -> Result<(), ApiError> {
        let Some(parent_type) = self.node.parent() else {
            return Ok(());
        };
        let Some(parent) = self.state.registries.node(parent_type).await else {
            return Ok(());
        };
        let Some(rel) = parent
            .children
            .get(&self.crd_type)
            .or_else(|| parent.links.get(&self.crd_type))
        else {
            return Ok(());
        };
        let parent_name = labels
            .get(parent_type)
            .map(String::as_str)
            .unwrap_or(DEFAULT_KEY);
        let parent_gvr = naming::gvr_for(parent_type);
        let parent_hashed = naming::hashed_name(
            parent_type,
            &parent.parent_hierarchy,
            labels,
            parent_name,
        );

        let parent_obj = match self.store().get(&parent_gvr, &parent_hashed).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                debug!(parent = %parent_hashed, "parent already gone");
                return Ok(());
            }
            Err(e) => return Err(self.store_error(e)),
        };
        let spec = parent_obj.spec();
        let pointer = spec.get(&rel.field_name_gvk);
        let path = match pointer {
            Some(Value::Object(named)) if rel.is_named && named.contains_key(name) => {
                format!(
                    "/spec/{}/{}",
                    escape_pointer(&rel.field_name_gvk),
                    escape_pointer(name)
                )
            }
            Some(_) if !rel.is_named => {
                format!("/spec/{}", escape_pointer(&rel.field_name_gvk))
            }
            _ => return Ok(()),
        };
        self.store()
            .patch(
                &parent_gvr,
                &parent_hashed,
                &ObjectPatch::Json(vec![PatchOp::remove(path)]),
                None,
            )
            .await
            .map_err(|e| self.store_error(e))?;
        Ok(())
    }
}
