use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Schema-less document body, used for `spec`, `status` and request bodies.
pub type Document = Map<String, Value>;

/// Group-version-resource triple addressing one custom resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl Gvr {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for Gvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.resource, self.group, self.version)
    }
}

/// An untyped cluster-scoped object. Metadata is typed; everything else
/// (`spec`, `status`, ...) is kept as a raw document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreObject {
    #[serde(
        rename = "apiVersion",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub data: Document,
}

impl StoreObject {
    pub fn new(gvr: &Gvr, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: gvr.api_version(),
            kind: kind.into(),
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            data: Document::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.metadata.labels.clone().unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) {
        self.metadata.labels = Some(labels);
    }

    pub fn spec(&self) -> Document {
        self.section("spec")
    }

    pub fn status(&self) -> Document {
        self.section("status")
    }

    pub fn has_status(&self) -> bool {
        self.data.contains_key("status")
    }

    pub fn set_spec(&mut self, spec: Document) {
        self.data.insert("spec".to_string(), Value::Object(spec));
    }

    fn section(&self, key: &str) -> Document {
        match self.data.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Document::new(),
        }
    }

    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.label(k) == Some(v.as_str()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub label_selector: BTreeMap<String, String>,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
}

impl ListOptions {
    pub fn with_selector(label_selector: BTreeMap<String, String>) -> Self {
        Self {
            label_selector,
            ..Default::default()
        }
    }
}

/// Renders an equality-based label selector (`a=b,c=d`).
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<StoreObject>,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOpKind {
    Add,
    Replace,
    Remove,
}

/// One RFC 6902 operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchOpKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOpKind::Replace,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// Converts operations into the `json_patch` representation shared by
/// every backend.
pub fn to_json_patch(ops: &[PatchOp]) -> StoreResult<json_patch::Patch> {
    Ok(serde_json::from_value(serde_json::to_value(ops)?)?)
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectPatch {
    /// RFC 7386 merge patch.
    Merge(Value),
    /// RFC 6902 JSON patch.
    Json(Vec<PatchOp>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subresource {
    Status,
}

/// CRUD over dynamically typed custom resources.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, gvr: &Gvr, name: &str) -> StoreResult<StoreObject>;

    async fn list(
        &self,
        gvr: &Gvr,
        options: &ListOptions,
    ) -> StoreResult<ObjectList>;

    async fn create(
        &self,
        gvr: &Gvr,
        object: &StoreObject,
    ) -> StoreResult<StoreObject>;

    async fn update(
        &self,
        gvr: &Gvr,
        object: &StoreObject,
    ) -> StoreResult<StoreObject>;

    async fn patch(
        &self,
        gvr: &Gvr,
        name: &str,
        patch: &ObjectPatch,
        subresource: Option<Subresource>,
    ) -> StoreResult<StoreObject>;

    async fn delete(&self, gvr: &Gvr, name: &str) -> StoreResult<()>;

    async fn delete_collection(
        &self,
        gvr: &Gvr,
        selector: &BTreeMap<String, String>,
    ) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_object_keeps_unknown_sections() {
        let obj: StoreObject = serde_json::from_value(json!({
            "apiVersion": "management.vmware.org/v1",
            "kind": "Leader",
            "metadata": {"name": "abc", "labels": {"nexus/display_name": "lead"}},
            "spec": {"designation": "CEO"},
            "status": {"nexus": {"rv": 1}}
        }))
        .unwrap();
        assert_eq!(obj.name(), "abc");
        assert_eq!(obj.label("nexus/display_name"), Some("lead"));
        assert_eq!(obj.spec().get("designation"), Some(&json!("CEO")));
        assert!(obj.has_status());
        let back = serde_json::to_value(&obj).unwrap();
        assert_eq!(back["status"]["nexus"]["rv"], json!(1));
    }

    #[test]
    fn selector_string_is_sorted() {
        let mut sel = BTreeMap::new();
        sel.insert("b".to_string(), "2".to_string());
        sel.insert("a".to_string(), "1".to_string());
        assert_eq!(selector_string(&sel), "a=1,b=2");
    }

    #[test]
    fn patch_op_serializes_without_value_for_remove() {
        let op = serde_json::to_value(PatchOp::remove("/spec/x")).unwrap();
        assert_eq!(op, json!({"op": "remove", "path": "/spec/x"}));
    }
}
