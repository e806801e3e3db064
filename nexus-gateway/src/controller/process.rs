use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinitionSpec;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info};

use crate::cache::{CacheDelta, EndpointCache};
use crate::model::{
    AnnotationError, EventType, NodeInfo, SynthesizedUris, UriType,
    parse_annotation, synthesize_uris,
};
use crate::openapi::OpenApiDocs;
use crate::registry::Registries;
use crate::server::{GatewayState, RouteEvent};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
    #[error("route channel closed")]
    ChannelClosed,
}

/// One observed change of a CRD.
#[derive(Debug, Clone)]
pub struct CrdEvent {
    pub event: EventType,
    pub crd_type: String,
    /// Raw `nexus` annotation, if the CRD carries one.
    pub annotation: Option<String>,
    pub spec: Option<CustomResourceDefinitionSpec>,
}

/// Folds CRD events into the registries, the endpoint cache and the
/// OpenAPI documents, and tells the serving layer what changed.
///
/// Events are folded one at a time: the route event for a cache change is
/// sent before the next event touches the cache, so the serving layer sees
/// deltas and snapshots in the order they were computed.
pub struct CrdProcessor {
    serial: Mutex<()>,
    registries: Arc<Registries>,
    cache: Arc<EndpointCache>,
    openapi: Arc<OpenApiDocs>,
    routes: mpsc::Sender<RouteEvent>,
}

impl CrdProcessor {
    pub fn new(
        state: &GatewayState,
        cache: Arc<EndpointCache>,
        routes: mpsc::Sender<RouteEvent>,
    ) -> Self {
        Self {
            serial: Mutex::new(()),
            registries: state.registries.clone(),
            cache,
            openapi: state.openapi.clone(),
            routes,
        }
    }

    /// Returns `None` for CRDs that are not nexus nodes. A malformed
    /// annotation fails before any registry is touched.
    pub async fn process(&self, ev: CrdEvent) -> Result<Option<CacheDelta>, ProcessError> {
        let Some(annotation) = parse_annotation(ev.event, ev.annotation.as_deref())? else {
            debug!(crd = %ev.crd_type, "no nexus annotation, skipping");
            return Ok(None);
        };
        let _serial = self.serial.lock().await;
        let crd_type = ev.crd_type.as_str();
        let synth = match ev.event {
            EventType::Upsert => synthesize_uris(&annotation),
            EventType::Delete => SynthesizedUris::default(),
        };

        let registries = &self.registries;
        match ev.event {
            EventType::Upsert => {
                registries.set_uri_info(EventType::Upsert, &synth.uri_types).await;
            }
            EventType::Delete => {
                let mut stale: BTreeMap<String, UriType> = registries
                    .rest_uris(crd_type)
                    .await
                    .into_iter()
                    .map(|u| (u.uri, UriType::Default))
                    .collect();
                for uri in registries.uris_owned_by(crd_type).await {
                    stale.entry(uri).or_insert(UriType::Default);
                }
                registries.set_uri_info(EventType::Delete, &stale).await;
            }
        }
        registries
            .set_uri_crd_type(ev.event, crd_type, &synth.uris)
            .await;
        registries
            .set_node(ev.event, crd_type, NodeInfo::from_annotation(&annotation))
            .await;
        registries
            .set_rest_uris(ev.event, crd_type, synth.uris.clone())
            .await;
        registries.set_spec(ev.event, crd_type, ev.spec).await;

        let delta = self.cache.populate(ev.event, crd_type, &synth.uris).await;
        let route_event = if delta.needs_restart() {
            Some(RouteEvent::FullReplace(self.cache.snapshot().await))
        } else if !delta.added.is_empty() {
            Some(RouteEvent::Incremental(delta.added.clone()))
        } else {
            None
        };
        if let Some(route_event) = route_event {
            self.routes
                .send(route_event)
                .await
                .map_err(|_| ProcessError::ChannelClosed)?;
        }

        self.openapi.recreate(registries).await;
        info!(
            crd = %crd_type,
            event = ?ev.event,
            removed = delta.removed,
            added = delta.added.len(),
            "processed crd"
        );
        Ok(Some(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::model::HttpMethod;
    use nexus_store::MemoryObjectStore;

    const LEADER: &str = r#"{
        "name": "management.Leader",
        "nexus-rest-api-gen": {"uris": [
            {"uri": "/leader/{management.Leader}", "methods": {"GET": {}, "PUT": {}}}
        ]}
    }"#;

    fn setup() -> (CrdProcessor, GatewayState, mpsc::Receiver<RouteEvent>) {
        let state = GatewayState::new(Arc::new(MemoryObjectStore::new()));
        let (tx, rx) = mpsc::channel(4);
        let processor = CrdProcessor::new(&state, Arc::new(EndpointCache::new()), tx);
        (processor, state, rx)
    }

    fn upsert(annotation: Option<&str>) -> CrdEvent {
        CrdEvent {
            event: EventType::Upsert,
            crd_type: "leaders.management.vmware.org".into(),
            annotation: annotation.map(str::to_string),
            spec: None,
        }
    }

    #[tokio::test]
    async fn first_upsert_hot_adds() {
        let (processor, state, mut rx) = setup();
        processor.process(upsert(Some(LEADER))).await.unwrap();
        match rx.try_recv().unwrap() {
            RouteEvent::Incremental(added) => assert_eq!(added.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            state
                .registries
                .uri_type("/leader/{management.Leader}/status")
                .await,
            Some(UriType::Status)
        );
        assert!(state.openapi.document("vmware.org").await.is_some());
    }

    #[tokio::test]
    async fn malformed_annotation_leaves_registries_alone() {
        let (processor, state, mut rx) = setup();
        processor.process(upsert(Some(LEADER))).await.unwrap();
        rx.try_recv().unwrap();

        let err = processor.process(upsert(Some("{broken"))).await;
        assert!(matches!(err, Err(ProcessError::Annotation(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            state.registries.rest_uris("leaders.management.vmware.org").await.len(),
            2
        );
    }

    #[tokio::test]
    async fn delete_clears_everything_and_restarts() {
        let (processor, state, mut rx) = setup();
        processor.process(upsert(Some(LEADER))).await.unwrap();
        rx.try_recv().unwrap();

        let delta = processor
            .process(CrdEvent {
                event: EventType::Delete,
                crd_type: "leaders.management.vmware.org".into(),
                annotation: None,
                spec: None,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delta.removed, 4);
        assert_eq!(rx.try_recv().unwrap(), RouteEvent::FullReplace(Vec::new()));

        let snapshot = state.registries.snapshot().await;
        assert!(snapshot.uri_info.is_empty());
        assert!(snapshot.uri_to_crd.is_empty());
        assert!(snapshot.crd_to_node.is_empty());
        assert!(snapshot.crd_to_uris.is_empty());
        assert!(state.openapi.document("vmware.org").await.is_none());
    }

    #[tokio::test]
    async fn unannotated_crd_is_ignored() {
        let (processor, state, mut rx) = setup();
        assert!(processor.process(upsert(None)).await.unwrap().is_none());
        assert!(rx.try_recv().is_err());
        assert!(state.registries.snapshot().await.crd_to_node.is_empty());
    }

    fn event(event: EventType, crd_type: &str, annotation: Option<String>) -> CrdEvent {
        CrdEvent {
            event,
            crd_type: crd_type.into(),
            annotation,
            spec: None,
        }
    }

    fn single_uri(name: &str, uri: &str) -> String {
        format!(
            r#"{{"name": "{name}", "nexus-rest-api-gen": {{"uris": [
                {{"uri": "{uri}", "methods": {{"GET": {{}}}}}}
            ]}}}}"#
        )
    }

    /// Replays route events the way the serving layer does.
    fn replay(rx: &mut mpsc::Receiver<RouteEvent>) -> BTreeSet<(String, HttpMethod)> {
        let mut mounted = BTreeSet::new();
        while let Ok(ev) = rx.try_recv() {
            let uris = match ev {
                RouteEvent::FullReplace(uris) => {
                    mounted.clear();
                    uris
                }
                RouteEvent::Incremental(uris) => uris,
            };
            for u in uris {
                mounted.extend(u.methods.keys().map(|m| (u.uri.clone(), *m)));
            }
        }
        mounted
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_events_reach_the_server_in_cache_order() {
        for _ in 0..50 {
            let state = GatewayState::new(Arc::new(MemoryObjectStore::new()));
            let cache = Arc::new(EndpointCache::new());
            let (tx, mut rx) = mpsc::channel(16);
            let processor = Arc::new(CrdProcessor::new(&state, cache.clone(), tx));
            processor
                .process(event(
                    EventType::Upsert,
                    "as.x.vmware.org",
                    Some(single_uri("x.A", "/a")),
                ))
                .await
                .unwrap();

            let p1 = processor.clone();
            let p2 = processor.clone();
            let (removed, added) = tokio::join!(
                tokio::spawn(async move {
                    p1.process(event(EventType::Delete, "as.x.vmware.org", None)).await
                }),
                tokio::spawn(async move {
                    p2.process(event(
                        EventType::Upsert,
                        "bs.x.vmware.org",
                        Some(single_uri("x.B", "/b")),
                    ))
                    .await
                }),
            );
            removed.unwrap().unwrap();
            added.unwrap().unwrap();

            let expected: BTreeSet<(String, HttpMethod)> = cache
                .snapshot()
                .await
                .iter()
                .flat_map(|u| u.methods.keys().map(|m| (u.uri.clone(), *m)))
                .collect();
            assert!(expected.contains(&("/b".to_string(), HttpMethod::Get)));
            assert_eq!(replay(&mut rx), expected);
        }
    }

    #[tokio::test]
    async fn delete_forgets_uris_dropped_by_earlier_upserts() {
        let (processor, state, _rx) = setup();
        let crd = "leaders.management.vmware.org";
        processor
            .process(event(
                EventType::Upsert,
                crd,
                Some(single_uri("management.Leader", "/old")),
            ))
            .await
            .unwrap();
        processor
            .process(event(
                EventType::Upsert,
                crd,
                Some(single_uri("management.Leader", "/new")),
            ))
            .await
            .unwrap();
        assert_eq!(state.registries.uri_type("/old").await, Some(UriType::Default));

        processor.process(event(EventType::Delete, crd, None)).await.unwrap();
        let snapshot = state.registries.snapshot().await;
        assert!(snapshot.uri_info.is_empty(), "{:?}", snapshot.uri_info);
        assert!(snapshot.uri_to_crd.is_empty());
    }
}
