use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod annotation;
mod uri;

pub use annotation::{
    AnnotationError, HttpCodes, HttpMethod, HttpResponse, NexusAnnotation,
    NodeChild, RestApiSpec, RestUri, parse_annotation,
};
pub use uri::{SynthesizedUris, default_codes, synthesize_uris};

/// Name used for singleton nodes and for unnamed ancestors.
pub const DEFAULT_KEY: &str = "default";

/// Annotation key under which the compiler stores routing metadata.
pub const NEXUS_ANNOTATION: &str = "nexus";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UriType {
    Default,
    Status,
    SingleLink,
    NamedLink,
}

/// Registry view of one nexus node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub parent_hierarchy: Vec<String>,
    pub children: BTreeMap<String, NodeChild>,
    pub links: BTreeMap<String, NodeChild>,
    pub is_singleton: bool,
    pub description: String,
}

impl NodeInfo {
    pub fn from_annotation(annotation: &NexusAnnotation) -> Self {
        Self {
            name: annotation.name.clone(),
            parent_hierarchy: annotation.hierarchy.clone(),
            children: annotation.children.clone(),
            links: annotation.links.clone(),
            is_singleton: annotation.is_singleton,
            description: annotation.description.clone(),
        }
    }

    /// Kind part of the node name, `Leader` for `management.Leader`.
    pub fn kind(&self) -> &str {
        self.name
            .split_once('.')
            .map(|(_, kind)| kind)
            .unwrap_or(&self.name)
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent_hierarchy.last().map(String::as_str)
    }

    /// Children first, then links.
    pub fn relations(&self) -> impl Iterator<Item = (&String, &NodeChild)> {
        self.children.iter().chain(self.links.iter())
    }

    /// Spec fields holding relation pointers rather than user data.
    pub fn relation_fields(&self) -> impl Iterator<Item = &str> {
        self.relations()
            .map(|(_, rel)| rel.field_name_gvk.as_str())
            .filter(|f| !f.is_empty())
    }

    pub fn relation_by_field(&self, field_name: &str) -> Option<&NodeChild> {
        self.relations()
            .map(|(_, rel)| rel)
            .find(|rel| rel.field_name == field_name)
    }
}
