use std::sync::Arc;

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::runtime::watcher::Event;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::drive;
use crate::model::EventType;
use crate::openapi::OpenApiDocs;
use crate::registry::{DatamodelInfo, Registries};

const GROUP: &str = "nexus.vmware.com";
const KIND: &str = "Datamodel";
const PLURAL: &str = "datamodels";

fn datamodel_resource() -> ApiResource {
    ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(GROUP, "v1", KIND), PLURAL)
}

/// Title override carried by a `Datamodel` object, if it sets one.
pub fn datamodel_info(obj: &DynamicObject) -> Option<DatamodelInfo> {
    obj.data
        .pointer("/spec/title")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
        .map(|title| DatamodelInfo {
            title: title.to_string(),
        })
}

pub async fn apply_datamodel(
    registries: &Registries,
    openapi: &OpenApiDocs,
    event: EventType,
    obj: &DynamicObject,
) {
    let name = obj.name_any();
    let info = datamodel_info(obj);
    info!(datamodel = %name, ?event, title = ?info.as_ref().map(|i| &i.title), "datamodel changed");
    registries.set_datamodel(event, &name, info).await;
    openapi.recreate(registries).await;
}

/// Watches `Datamodel` objects and refreshes document titles.
pub async fn watch_datamodels(
    client: Client,
    registries: Arc<Registries>,
    openapi: Arc<OpenApiDocs>,
    cancel: CancellationToken,
) {
    let api: Api<DynamicObject> = Api::all_with(client, &datamodel_resource());
    drive(api, "datamodels", cancel, |event| {
        let registries = registries.clone();
        let openapi = openapi.clone();
        async move {
            match event {
                Event::Applied(obj) => {
                    apply_datamodel(&registries, &openapi, EventType::Upsert, &obj).await
                }
                Event::Deleted(obj) => {
                    apply_datamodel(&registries, &openapi, EventType::Delete, &obj).await
                }
                Event::Restarted(list) => {
                    for obj in &list {
                        apply_datamodel(&registries, &openapi, EventType::Upsert, obj).await;
                    }
                }
            }
        }
    })
    .await
}
