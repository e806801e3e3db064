use std::collections::{BTreeMap, HashMap};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionSpec;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::model::{EventType, NodeInfo, RestUri, UriType};
use crate::naming;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatamodelInfo {
    pub title: String,
}

/// Process-wide lookup tables fed by CRD events.
///
/// Every map has its own lock and no operation holds two locks at once, so
/// readers may briefly observe one map updated ahead of another.
#[derive(Default)]
pub struct Registries {
    uri_info: RwLock<HashMap<String, UriType>>,
    uri_to_crd: RwLock<HashMap<String, String>>,
    crd_to_node: RwLock<HashMap<String, NodeInfo>>,
    crd_to_spec: RwLock<HashMap<String, CustomResourceDefinitionSpec>>,
    crd_to_uris: RwLock<HashMap<String, Vec<RestUri>>>,
    datamodels: RwLock<HashMap<String, DatamodelInfo>>,
}

/// Ordered copy of every registry, taken map by map.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    pub uri_info: BTreeMap<String, UriType>,
    pub uri_to_crd: BTreeMap<String, String>,
    pub crd_to_node: BTreeMap<String, NodeInfo>,
    #[serde(skip)]
    pub crd_to_spec: BTreeMap<String, CustomResourceDefinitionSpec>,
    pub crd_to_uris: BTreeMap<String, Vec<RestUri>>,
    pub datamodels: BTreeMap<String, DatamodelInfo>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the kind of each URI. On delete the given URIs are dropped.
    pub async fn set_uri_info(
        &self,
        event: EventType,
        uris: &BTreeMap<String, UriType>,
    ) {
        let mut w = self.uri_info.write().await;
        for (uri, kind) in uris {
            match event {
                EventType::Upsert => {
                    w.insert(uri.clone(), *kind);
                }
                EventType::Delete => {
                    w.remove(uri);
                }
            }
        }
    }

    /// On delete every URI owned by `crd_type` goes; on upsert the given URIs
    /// are (re)pointed at it and stale ones are left for the endpoint cache.
    pub async fn set_uri_crd_type(
        &self,
        event: EventType,
        crd_type: &str,
        uris: &[RestUri],
    ) {
        let mut w = self.uri_to_crd.write().await;
        match event {
            EventType::Delete => w.retain(|_, owner| owner != crd_type),
            EventType::Upsert => {
                for uri in uris {
                    w.insert(uri.uri.clone(), crd_type.to_string());
                }
            }
        }
    }

    pub async fn set_node(
        &self,
        event: EventType,
        crd_type: &str,
        node: NodeInfo,
    ) {
        let mut w = self.crd_to_node.write().await;
        match event {
            EventType::Upsert => {
                w.insert(crd_type.to_string(), node);
            }
            EventType::Delete => {
                w.remove(crd_type);
            }
        }
    }

    pub async fn set_spec(
        &self,
        event: EventType,
        crd_type: &str,
        spec: Option<CustomResourceDefinitionSpec>,
    ) {
        let mut w = self.crd_to_spec.write().await;
        match (event, spec) {
            (EventType::Upsert, Some(spec)) => {
                w.insert(crd_type.to_string(), spec);
            }
            (EventType::Upsert, None) => {}
            (EventType::Delete, _) => {
                w.remove(crd_type);
            }
        }
    }

    pub async fn set_rest_uris(
        &self,
        event: EventType,
        crd_type: &str,
        uris: Vec<RestUri>,
    ) {
        let mut w = self.crd_to_uris.write().await;
        match event {
            EventType::Upsert => {
                w.insert(crd_type.to_string(), uris);
            }
            EventType::Delete => {
                w.remove(crd_type);
            }
        }
    }

    pub async fn set_datamodel(
        &self,
        event: EventType,
        name: &str,
        info: Option<DatamodelInfo>,
    ) {
        let key = naming::datamodel_key(name);
        let mut w = self.datamodels.write().await;
        match (event, info) {
            (EventType::Upsert, Some(info)) => {
                w.insert(key, info);
            }
            (EventType::Upsert, None) => {}
            (EventType::Delete, _) => {
                w.remove(&key);
            }
        }
    }

    pub async fn crd_type_for_uri(&self, uri: &str) -> Option<String> {
        self.uri_to_crd.read().await.get(uri).cloned()
    }

    /// URIs whose last recorded owner is `crd_type`, including ones a later
    /// upsert no longer synthesizes.
    pub async fn uris_owned_by(&self, crd_type: &str) -> Vec<String> {
        let mut uris: Vec<String> = self
            .uri_to_crd
            .read()
            .await
            .iter()
            .filter(|(_, owner)| owner.as_str() == crd_type)
            .map(|(uri, _)| uri.clone())
            .collect();
        uris.sort();
        uris
    }

    pub async fn uri_type(&self, uri: &str) -> Option<UriType> {
        self.uri_info.read().await.get(uri).copied()
    }

    pub async fn node(&self, crd_type: &str) -> Option<NodeInfo> {
        self.crd_to_node.read().await.get(crd_type).cloned()
    }

    /// CRD types currently registered as nexus nodes.
    pub async fn node_types(&self) -> Vec<String> {
        let mut types: Vec<String> =
            self.crd_to_node.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    pub async fn spec(
        &self,
        crd_type: &str,
    ) -> Option<CustomResourceDefinitionSpec> {
        self.crd_to_spec.read().await.get(crd_type).cloned()
    }

    pub async fn rest_uris(&self, crd_type: &str) -> Vec<RestUri> {
        self.crd_to_uris
            .read()
            .await
            .get(crd_type)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn datamodel(&self, name: &str) -> Option<DatamodelInfo> {
        self.datamodels.read().await.get(name).cloned()
    }

    /// CRD type of the node whose kind and group match a relation pointer.
    pub async fn crd_type_for_kind(
        &self,
        group: &str,
        kind: &str,
    ) -> Option<String> {
        let r = self.crd_to_node.read().await;
        let mut found: Vec<&String> = r
            .iter()
            .filter(|(crd_type, node)| {
                node.kind() == kind
                    && naming::gvr_for(crd_type).group == group
            })
            .map(|(crd_type, _)| crd_type)
            .collect();
        found.sort();
        found.first().map(|s| s.to_string())
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            uri_info: self.uri_info.read().await.clone().into_iter().collect(),
            uri_to_crd: self
                .uri_to_crd
                .read()
                .await
                .clone()
                .into_iter()
                .collect(),
            crd_to_node: self
                .crd_to_node
                .read()
                .await
                .clone()
                .into_iter()
                .collect(),
            crd_to_spec: self
                .crd_to_spec
                .read()
                .await
                .clone()
                .into_iter()
                .collect(),
            crd_to_uris: self
                .crd_to_uris
                .read()
                .await
                .clone()
                .into_iter()
                .collect(),
            datamodels: self
                .datamodels
                .read()
                .await
                .clone()
                .into_iter()
                .collect(),
        }
    }
}
