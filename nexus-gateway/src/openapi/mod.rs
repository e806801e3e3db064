//! OpenAPI documents derived from the registries, one per datamodel.

use std::collections::BTreeMap;

use openapiv3::{Components, Info, OpenAPI, ReferenceOr, Server};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::naming;
use crate::registry::{Registries, RegistrySnapshot};

mod path;
mod schema;

pub use path::{parameters, path_params};
pub use schema::{parse_fields, property_schema};

pub const DEFAULT_TITLE: &str = "Nexus API GW APIs";

fn base_document(title: &str) -> OpenAPI {
    let servers = [
        ("/", "API Gateway"),
        ("http://localhost:5000", "Local"),
        ("https://localhost:5443", "Local SSL"),
    ]
    .into_iter()
    .map(|(url, description)| Server {
        url: url.to_string(),
        description: Some(description.to_string()),
        ..Default::default()
    })
    .collect();

    let mut components = Components::default();
    schema::base_responses(&mut components);

    OpenAPI {
        openapi: "3.0.0".to_string(),
        info: Info {
            title: title.to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        },
        servers,
        components: Some(components),
        ..Default::default()
    }
}

/// Rebuilds every document from scratch. Output depends only on the
/// snapshot contents.
pub fn build_documents(snapshot: &RegistrySnapshot) -> BTreeMap<String, OpenAPI> {
    let mut docs: BTreeMap<String, OpenAPI> = BTreeMap::new();

    for (crd_type, node) in &snapshot.crd_to_node {
        let datamodel = naming::datamodel_name(crd_type);
        let doc = docs.entry(datamodel.clone()).or_insert_with(|| {
            let title = snapshot
                .datamodels
                .get(&datamodel)
                .map(|d| d.title.as_str())
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_TITLE);
            base_document(title)
        });
        let components = doc.components.get_or_insert_with(Default::default);
        schema::add_node_components(
            components,
            node,
            snapshot.crd_to_spec.get(crd_type),
        );
    }

    for (crd_type, uris) in &snapshot.crd_to_uris {
        for rest_uri in uris {
            let owner = snapshot
                .uri_to_crd
                .get(&rest_uri.uri)
                .unwrap_or(crd_type);
            let Some(node) = snapshot.crd_to_node.get(owner) else {
                debug!(uri = %rest_uri.uri, "no node registered for uri");
                continue;
            };
            let Some(doc) = docs.get_mut(&naming::datamodel_name(owner)) else {
                continue;
            };
            doc.paths.paths.insert(
                rest_uri.uri.clone(),
                ReferenceOr::Item(path::path_item(snapshot, rest_uri, node)),
            );
        }
    }
    docs
}

/// Latest generated documents, replaced wholesale on every rebuild.
#[derive(Default)]
pub struct OpenApiDocs {
    docs: RwLock<BTreeMap<String, OpenAPI>>,
}

impl OpenApiDocs {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recreate(&self, registries: &Registries) {
        let snapshot = registries.snapshot().await;
        let docs = build_documents(&snapshot);
        info!(datamodels = docs.len(), "regenerated openapi documents");
        *self.docs.write().await = docs;
    }

    pub async fn document(&self, datamodel: &str) -> Option<OpenAPI> {
        self.docs.read().await.get(datamodel).cloned()
    }

    pub async fn datamodels(&self) -> Vec<String> {
        self.docs.read().await.keys().cloned().collect()
    }
}
