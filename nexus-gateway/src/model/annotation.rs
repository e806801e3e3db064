use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::EventType;

#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    #[error("malformed nexus annotation: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// HTTP verbs accepted in annotations. `LIST` is a pseudo-verb served as
/// `GET` by the list handler.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    List,
    Put,
    Patch,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::List => "LIST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    #[serde(default)]
    pub description: String,
}

impl HttpResponse {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

/// Status code to canned response.
pub type HttpCodes = BTreeMap<u16, HttpResponse>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestUri {
    pub uri: String,
    #[serde(
        rename = "queryParams",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub query_params: Vec<String>,
    #[serde(default)]
    pub methods: BTreeMap<HttpMethod, HttpCodes>,
}

impl RestUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            query_params: Vec::new(),
            methods: BTreeMap::new(),
        }
    }

    pub fn with_method(mut self, method: HttpMethod, codes: HttpCodes) -> Self {
        self.methods.insert(method, codes);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestApiSpec {
    #[serde(default)]
    pub uris: Vec<RestUri>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChild {
    #[serde(rename = "fieldName", default)]
    pub field_name: String,
    #[serde(rename = "fieldNameGvk", default)]
    pub field_name_gvk: String,
    #[serde(rename = "isNamed", default)]
    pub is_named: bool,
}

/// Routing metadata the compiler embeds into every nexus CRD.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NexusAnnotation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hierarchy: Vec<String>,
    #[serde(default)]
    pub children: BTreeMap<String, NodeChild>,
    #[serde(default)]
    pub links: BTreeMap<String, NodeChild>,
    #[serde(rename = "nexus-rest-api-gen", default)]
    pub rest_api: RestApiSpec,
    #[serde(rename = "is_singleton", default)]
    pub is_singleton: bool,
    #[serde(default)]
    pub description: String,
}

/// Parses the raw annotation for one CRD event.
///
/// Delete events never look at the annotation: it may be absent or garbage
/// by then, and the node is removed regardless. An upsert without the
/// annotation is not a nexus CRD and yields `None`.
pub fn parse_annotation(
    event: EventType,
    raw: Option<&str>,
) -> Result<Option<NexusAnnotation>, AnnotationError> {
    match (event, raw) {
        (EventType::Delete, _) => Ok(Some(NexusAnnotation::default())),
        (EventType::Upsert, None) => Ok(None),
        (EventType::Upsert, Some(raw)) => Ok(Some(serde_json::from_str(raw)?)),
    }
}
