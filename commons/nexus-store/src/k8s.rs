use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, ListParams, Patch, PatchParams, PostParams,
};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::*;

impl From<kube::Error> for StoreError {
    fn from(value: kube::Error) -> Self {
        match value {
            kube::Error::Api(resp) => {
                StoreError::from_status(resp.code, &resp.reason, resp.message)
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Object store backed by the Kubernetes dynamic API. All nexus objects are
/// cluster scoped.
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, gvr: &Gvr) -> Api<DynamicObject> {
        let resource = ApiResource {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            api_version: gvr.api_version(),
            kind: String::new(),
            plural: gvr.resource.clone(),
        };
        Api::all_with(self.client.clone(), &resource)
    }
}

fn to_dynamic(object: &StoreObject) -> StoreResult<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn from_dynamic(object: DynamicObject) -> StoreResult<StoreObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, gvr: &Gvr, name: &str) -> StoreResult<StoreObject> {
        let obj = self.api(gvr).get(name).await?;
        from_dynamic(obj)
    }

    async fn list(
        &self,
        gvr: &Gvr,
        options: &ListOptions,
    ) -> StoreResult<ObjectList> {
        let mut params = ListParams::default();
        if !options.label_selector.is_empty() {
            params.label_selector =
                Some(selector_string(&options.label_selector));
        }
        params.limit = options.limit;
        params.continue_token = options.continue_token.clone();
        debug!(%gvr, selector = ?params.label_selector, "list objects");
        let list = self.api(gvr).list(&params).await?;
        let continue_token =
            list.metadata.continue_.filter(|token| !token.is_empty());
        let items = list
            .items
            .into_iter()
            .map(from_dynamic)
            .collect::<StoreResult<Vec<_>>>()?;
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
        let obj = to_dynamic(object)?;
        let created = self.api(gvr).create(&PostParams::default(), &obj).await?;
        from_dynamic(created)
    }

    async fn update(
        &self,
        gvr: &Gvr,
        object: &StoreObject,
    ) -> StoreResult<StoreObject> {
        let name = object.name().to_string();
        if name.is_empty() {
            return Err(StoreError::BadRequest(
                "object without metadata.name".to_string(),
            ));
        }
        let obj = to_dynamic(object)?;
        let updated = self
            .api(gvr)
            .replace(&name, &PostParams::default(), &obj)
            .await?;
        from_dynamic(updated)
    }

    async fn patch(
        &self,
        gvr: &Gvr,
        name: &str,
        patch: &ObjectPatch,
        subresource: Option<Subresource>,
    ) -> StoreResult<StoreObject> {
        let api = self.api(gvr);
        let params = PatchParams::default();
        let patched = match (patch, subresource) {
            (ObjectPatch::Merge(body), None) => {
                api.patch(name, &params, &Patch::Merge(body)).await?
            }
            (ObjectPatch::Merge(body), Some(Subresource::Status)) => {
                api.patch_status(name, &params, &Patch::Merge(body)).await?
            }
            (ObjectPatch::Json(ops), None) => {
                let p: Patch<()> = Patch::Json(to_json_patch(ops)?);
                api.patch(name, &params, &p).await?
            }
            (ObjectPatch::Json(ops), Some(Subresource::Status)) => {
                let p: Patch<()> = Patch::Json(to_json_patch(ops)?);
                api.patch_status(name, &params, &p).await?
            }
        };
        from_dynamic(patched)
    }

    async fn delete(&self, gvr: &Gvr, name: &str) -> StoreResult<()> {
        self.api(gvr)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn delete_collection(
        &self,
        gvr: &Gvr,
        selector: &BTreeMap<String, String>,
    ) -> StoreResult<()> {
        let params = ListParams::default().labels(&selector_string(selector));
        self.api(gvr)
            .delete_collection(&DeleteParams::default(), &params)
            .await?;
        Ok(())
    }
}
