use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::traits::*;

type Bucket = BTreeMap<String, StoreObject>;

/// In-process object store. Objects are kept per resource type, ordered by
/// name so that paging is stable.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    store: Arc<RwLock<HashMap<Gvr, Bucket>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects of one type.
    pub async fn count(&self, gvr: &Gvr) -> usize {
        let store = self.store.read().await;
        store.get(gvr).map(|b| b.len()).unwrap_or(0)
    }
}

fn not_found(gvr: &Gvr, name: &str) -> StoreError {
    StoreError::NotFound(format!("{} \"{}\" not found", gvr, name))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, gvr: &Gvr, name: &str) -> StoreResult<StoreObject> {
        let store = self.store.read().await;
        store
            .get(gvr)
            .and_then(|bucket| bucket.get(name))
            .cloned()
            .ok_or_else(|| not_found(gvr, name))
    }

    async fn list(
        &self,
        gvr: &Gvr,
        options: &ListOptions,
    ) -> StoreResult<ObjectList> {
        let store = self.store.read().await;
        let Some(bucket) = store.get(gvr) else {
            return Ok(ObjectList::default());
        };
        let mut matching = bucket
            .iter()
            .filter(|(name, _)| match &options.continue_token {
                Some(after) => name.as_str() > after.as_str(),
                None => true,
            })
            .filter(|(_, obj)| obj.matches(&options.label_selector))
            .map(|(_, obj)| obj.clone());

        let mut items = Vec::new();
        let limit = options.limit.filter(|l| *l > 0).map(|l| l as usize);
        while let Some(obj) = matching.next() {
            items.push(obj);
            if limit == Some(items.len()) {
                break;
            }
        }
        let continue_token = match matching.next() {
            Some(_) => items.last().map(|o| o.name().to_string()),
            None => None,
        };
        Ok(ObjectList {
            items,
            continue_token,
        })
    }

    async fn create(
        &self,
        gvr: &Gvr,
        object: &StoreObject,
    ) -> StoreResult<StoreObject> {
        let name = object.name().to_string();
        if name.is_empty() {
            return Err(StoreError::Invalid(
                "metadata.name: Required value".to_string(),
            ));
        }
        let mut store = self.store.write().await;
        let bucket = store.entry(gvr.clone()).or_default();
        if bucket.contains_key(&name) {
            return Err(StoreError::AlreadyExists(format!(
                "{} \"{}\" already exists",
                gvr, name
            )));
        }
        bucket.insert(name, object.clone());
        Ok(object.clone())
    }

    async fn update(
        &self,
        gvr: &Gvr,
        object: &StoreObject,
    ) -> StoreResult<StoreObject> {
        let name = object.name();
        let mut store = self.store.write().await;
        let slot = store
            .get_mut(gvr)
            .and_then(|bucket| bucket.get_mut(name))
            .ok_or_else(|| not_found(gvr, name))?;
        *slot = object.clone();
        Ok(object.clone())
    }

    async fn patch(
        &self,
        gvr: &Gvr,
        name: &str,
        patch: &ObjectPatch,
        _subresource: Option<Subresource>,
    ) -> StoreResult<StoreObject> {
        let mut store = self.store.write().await;
        let slot = store
            .get_mut(gvr)
            .and_then(|bucket| bucket.get_mut(name))
            .ok_or_else(|| not_found(gvr, name))?;
        let mut doc: Value = serde_json::to_value(&*slot)?;
        match patch {
            ObjectPatch::Merge(body) => json_patch::merge(&mut doc, body),
            ObjectPatch::Json(ops) => {
                let ops = to_json_patch(ops)?;
                json_patch::patch(&mut doc, &ops.0)
                    .map_err(|e| StoreError::Invalid(e.to_string()))?
            }
        }
        let patched: StoreObject = serde_json::from_value(doc)?;
        *slot = patched.clone();
        Ok(patched)
    }

    async fn delete(&self, gvr: &Gvr, name: &str) -> StoreResult<()> {
        let mut store = self.store.write().await;
        store
            .get_mut(gvr)
            .and_then(|bucket| bucket.remove(name))
            .map(|_| ())
            .ok_or_else(|| not_found(gvr, name))
    }

    async fn delete_collection(
        &self,
        gvr: &Gvr,
        selector: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let mut store = self.store.write().await;
        if let Some(bucket) = store.get_mut(gvr) {
            bucket.retain(|_, obj| !obj.matches(selector));
        }
        Ok(())
    }
}
