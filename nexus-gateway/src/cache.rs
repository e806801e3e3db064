use std::collections::BTreeMap;

use tokio::sync::Mutex;

use crate::model::{EventType, RestUri};

/// Outcome of folding one CRD's new URI snapshot into the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheDelta {
    /// Number of (URI, method) pairs that disappeared.
    pub removed: usize,
    /// URIs, restricted to their new methods, that appeared.
    pub added: Vec<RestUri>,
}

impl CacheDelta {
    pub fn needs_restart(&self) -> bool {
        self.removed > 0
    }
}

/// Last processed URI set per CRD type, used to decide between a full
/// server restart and hot registration of new routes.
#[derive(Default)]
pub struct EndpointCache {
    entries: Mutex<BTreeMap<String, Vec<RestUri>>>,
}

/// Entries of `a` missing from `b` at (URI, method) granularity. A URI
/// present in both but lacking some methods in `b` yields an entry with just
/// those methods.
pub fn difference(a: &[RestUri], b: &[RestUri]) -> Vec<RestUri> {
    let mut out = Vec::new();
    for entry in a {
        match b.iter().find(|other| other.uri == entry.uri) {
            None => out.push(entry.clone()),
            Some(other) => {
                let mut missing = RestUri::new(entry.uri.clone());
                missing.query_params = entry.query_params.clone();
                for (method, codes) in &entry.methods {
                    if !other.methods.contains_key(method) {
                        missing.methods.insert(*method, codes.clone());
                    }
                }
                if !missing.methods.is_empty() {
                    out.push(missing);
                }
            }
        }
    }
    out
}

pub fn method_count(uris: &[RestUri]) -> usize {
    uris.iter().map(|u| u.methods.len()).sum()
}

/// Applies `removed` then `added` to `current` in place.
fn apply(current: &mut Vec<RestUri>, removed: &[RestUri], added: &[RestUri]) {
    for gone in removed {
        if let Some(entry) = current.iter_mut().find(|e| e.uri == gone.uri) {
            for method in gone.methods.keys() {
                entry.methods.remove(method);
            }
        }
    }
    current.retain(|e| !e.methods.is_empty());

    for new in added {
        match current.iter_mut().find(|e| e.uri == new.uri) {
            Some(entry) => entry
                .methods
                .extend(new.methods.iter().map(|(m, c)| (*m, c.clone()))),
            None => current.push(new.clone()),
        }
    }
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn populate(
        &self,
        event: EventType,
        crd_type: &str,
        new_uris: &[RestUri],
    ) -> CacheDelta {
        let mut entries = self.entries.lock().await;

        if event == EventType::Delete {
            let removed = entries
                .remove(crd_type)
                .map(|old| method_count(&old))
                .unwrap_or(0);
            return CacheDelta {
                removed,
                added: Vec::new(),
            };
        }

        let cached = entries.entry(crd_type.to_string()).or_default();
        let removed = difference(cached, new_uris);
        let added = difference(new_uris, cached);
        apply(cached, &removed, &added);

        // Methods kept across snapshots take the latest response tables.
        for entry in cached.iter_mut() {
            if let Some(fresh) = new_uris.iter().find(|n| n.uri == entry.uri) {
                for (method, codes) in entry.methods.iter_mut() {
                    if let Some(c) = fresh.methods.get(method) {
                        *codes = c.clone();
                    }
                }
                entry.query_params = fresh.query_params.clone();
            }
        }

        CacheDelta {
            removed: method_count(&removed),
            added,
        }
    }

    /// Every cached URI, CRD types in key order.
    pub async fn snapshot(&self) -> Vec<RestUri> {
        let entries = self.entries.lock().await;
        entries.values().flatten().cloned().collect()
    }

    pub async fn get(&self, crd_type: &str) -> Option<Vec<RestUri>> {
        self.entries.lock().await.get(crd_type).cloned()
    }
}
