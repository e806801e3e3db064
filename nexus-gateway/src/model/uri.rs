use std::collections::BTreeMap;

use super::annotation::{
    HttpCodes, HttpMethod, HttpResponse, NexusAnnotation, NodeChild, RestUri,
};
use super::UriType;

/// Canned response tables used when the compiler does not supply one.
pub fn default_codes(method: HttpMethod) -> HttpCodes {
    let table: &[(u16, &str)] = match method {
        HttpMethod::Get | HttpMethod::List => {
            &[(200, "OK"), (404, "Not Found"), (501, "Not Implemented")]
        }
        HttpMethod::Put | HttpMethod::Patch | HttpMethod::Post => {
            &[(200, "OK"), (201, "Created"), (501, "Not Implemented")]
        }
        HttpMethod::Delete => &[(200, "OK"), (501, "Not Implemented")],
    };
    table
        .iter()
        .map(|(code, desc)| (*code, HttpResponse::new(*desc)))
        .collect()
}

/// Base and derived URIs of one node, plus the kind of every URI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesizedUris {
    pub uris: Vec<RestUri>,
    pub uri_types: BTreeMap<String, UriType>,
}

/// Expands the annotation's base URIs with the status, child and link
/// sub-resources of every base URI that answers `GET`.
///
/// Output order is the base URIs in annotation order, followed by derived
/// URIs in the order they are produced.
pub fn synthesize_uris(annotation: &NexusAnnotation) -> SynthesizedUris {
    let mut out = SynthesizedUris::default();
    let mut derived = Vec::new();

    for base in &annotation.rest_api.uris {
        out.uri_types.insert(base.uri.clone(), UriType::Default);
        if !base.methods.contains_key(&HttpMethod::Get) {
            continue;
        }

        let status = format!("{}/status", base.uri);
        out.uri_types.insert(status.clone(), UriType::Status);
        derived.push(
            RestUri::new(status)
                .with_method(HttpMethod::Get, default_codes(HttpMethod::Get))
                .with_method(HttpMethod::Put, default_codes(HttpMethod::Put)),
        );

        for relations in [&annotation.children, &annotation.links] {
            for rel in relations.values() {
                let (path, kind) = relation_uri(&base.uri, rel);
                out.uri_types.insert(path.clone(), kind);
                derived.push(
                    RestUri::new(path).with_method(
                        HttpMethod::Get,
                        default_codes(HttpMethod::Get),
                    ),
                );
            }
        }
    }

    out.uris = annotation.rest_api.uris.clone();
    out.uris.extend(derived);
    out
}

fn relation_uri(base: &str, rel: &NodeChild) -> (String, UriType) {
    let kind = if rel.is_named {
        UriType::NamedLink
    } else {
        UriType::SingleLink
    };
    (format!("{}/{}", base, rel.field_name), kind)
}
