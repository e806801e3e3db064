//! Kubernetes watchers feeding the registries.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::model::{EventType, NEXUS_ANNOTATION};
use crate::registry::Registries;

pub mod datamodel;
pub mod process;

pub use datamodel::{apply_datamodel, datamodel_info, watch_datamodels};
pub use process::{CrdEvent, CrdProcessor, ProcessError};

/// Streams watch events of `api` into `on_event` until `cancel` fires.
/// Watch errors are logged and retried with backoff.
pub(crate) async fn drive<K, F, Fut>(
    api: Api<K>,
    what: &'static str,
    cancel: CancellationToken,
    mut on_event: F,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
    F: FnMut(Event<K>) -> Fut,
    Fut: Future<Output = ()>,
{
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures_util::pin_mut!(stream);
    info!(watch = what, "watcher started");
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => on_event(event).await,
            Some(Err(e)) => warn!(watch = what, error = %e, "watch error"),
            None => {
                warn!(watch = what, "watcher stream ended");
                break;
            }
        }
    }
    info!(watch = what, "watcher stopped");
}

/// Turns a CRD object into a processor event.
pub fn crd_event(event: EventType, crd: CustomResourceDefinition) -> CrdEvent {
    let annotation = crd.annotations().get(NEXUS_ANNOTATION).cloned();
    CrdEvent {
        event,
        crd_type: crd.name_any(),
        annotation,
        spec: Some(crd.spec),
    }
}

/// Events needed to bring the registries in line with a full relist: every
/// listed CRD is upserted and every registered type missing from the list
/// is deleted.
pub fn resync_events(
    known: &[String],
    listed: Vec<CustomResourceDefinition>,
) -> Vec<CrdEvent> {
    let present: BTreeSet<String> = listed.iter().map(|crd| crd.name_any()).collect();
    let mut events: Vec<CrdEvent> = listed
        .into_iter()
        .map(|crd| crd_event(EventType::Upsert, crd))
        .collect();
    events.extend(
        known
            .iter()
            .filter(|crd_type| !present.contains(*crd_type))
            .map(|crd_type| CrdEvent {
                event: EventType::Delete,
                crd_type: crd_type.clone(),
                annotation: None,
                spec: None,
            }),
    );
    events
}

async fn apply(processor: &CrdProcessor, ev: CrdEvent) {
    let crd_type = ev.crd_type.clone();
    if let Err(e) = processor.process(ev).await {
        error!(crd = %crd_type, error = %e, "dropping crd event");
    }
}

/// Watches every CRD in the cluster and folds nexus-annotated ones into the
/// gateway.
pub async fn watch_crds(
    client: Client,
    processor: Arc<CrdProcessor>,
    registries: Arc<Registries>,
    cancel: CancellationToken,
) {
    let api: Api<CustomResourceDefinition> = Api::all(client);
    drive(api, "crds", cancel, |event| {
        let processor = processor.clone();
        let registries = registries.clone();
        async move {
            match event {
                Event::Applied(crd) => {
                    apply(&processor, crd_event(EventType::Upsert, crd)).await
                }
                Event::Deleted(crd) => {
                    apply(&processor, crd_event(EventType::Delete, crd)).await
                }
                Event::Restarted(list) => {
                    let known = registries.node_types().await;
                    info!(listed = list.len(), known = known.len(), "crd relist");
                    for ev in resync_events(&known, list) {
                        apply(&processor, ev).await;
                    }
                }
            }
        }
    })
    .await
}
