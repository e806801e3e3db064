use std::collections::BTreeMap;

use nexus_store::StoreObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use super::handler::GatewayState;
use crate::error::ApiError;
use crate::model::{NodeInfo, UriType};
use crate::naming::{self, DISPLAY_NAME_LABEL};

/// Relation pointer as stored in a parent's spec, and as returned by the
/// link views.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkGvk {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hierarchy: Vec<String>,
}

struct Target {
    display_name: Option<String>,
    hierarchy: Vec<String>,
}

async fn resolve(state: &GatewayState, link: &LinkGvk) -> Option<Target> {
    let crd_type = state
        .registries
        .crd_type_for_kind(&link.group, &link.kind)
        .await?;
    let item = match state
        .store
        .get(&naming::gvr_for(&crd_type), &link.name)
        .await
    {
        Ok(item) => item,
        Err(e) => {
            error!(name = %link.name, error = %e, "couldn't find linked object");
            return None;
        }
    };
    let hierarchy = match state.registries.node(&crd_type).await {
        Some(node) => naming::parent_hierarchy(&node.parent_hierarchy, &item.labels()),
        None => Vec::new(),
    };
    Some(Target {
        display_name: item.label(DISPLAY_NAME_LABEL).map(str::to_string),
        hierarchy,
    })
}

fn unmarshal_error(_: serde_json::Error) -> ApiError {
    ApiError::Internal("Couldn't unmarshal gvk of link".to_string())
}

/// Child or link pointers of `obj` named by the last segment of `uri`.
pub async fn link_view(
    state: &GatewayState,
    node: &NodeInfo,
    uri_type: UriType,
    uri: &str,
    obj: &StoreObject,
) -> Result<Value, ApiError> {
    let field = uri.rsplit('/').next().unwrap_or_default();
    let gvk_field = node
        .relation_by_field(field)
        .map(|rel| rel.field_name_gvk.as_str())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::Internal("Couldn't determine gvk of link".to_string()))?;
    let raw = obj.spec().get(gvk_field).cloned().unwrap_or(Value::Null);
    debug!(%uri, gvk_field, "resolving link");

    match uri_type {
        UriType::SingleLink => {
            let mut link: LinkGvk = if raw.is_null() {
                LinkGvk::default()
            } else {
                serde_json::from_value(raw).map_err(unmarshal_error)?
            };
            if !link.group.is_empty() {
                let target = resolve(state, &link).await.ok_or_else(|| {
                    ApiError::NotFound("Couldn't find object".to_string())
                })?;
                link.hierarchy = target.hierarchy;
                if let Some(display) = target.display_name {
                    link.name = display;
                }
                link.group = format!("{}/v1", link.group);
            }
            Ok(serde_json::to_value(link)?)
        }
        UriType::NamedLink => {
            let links: BTreeMap<String, LinkGvk> = if raw.is_null() {
                BTreeMap::new()
            } else {
                serde_json::from_value(raw).map_err(unmarshal_error)?
            };
            // Named siblings share their ancestry, resolve it once.
            let mut hierarchy = Vec::new();
            if let Some(first) = links.values().next() {
                if let Some(target) = resolve(state, first).await {
                    hierarchy = target.hierarchy;
                }
            }
            let list: Vec<LinkGvk> = links
                .into_iter()
                .map(|(name, link)| LinkGvk {
                    group: format!("{}/v1", link.group),
                    kind: link.kind,
                    name,
                    hierarchy: hierarchy.clone(),
                })
                .collect();
            Ok(serde_json::to_value(list)?)
        }
        UriType::Default | UriType::Status => Err(ApiError::Internal(
            "Something went wrong during link processing".to_string(),
        )),
    }
}
