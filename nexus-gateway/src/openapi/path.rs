use std::collections::BTreeSet;
use std::sync::LazyLock;

use openapiv3::{
    Operation, Parameter, ParameterData, ParameterSchemaOrContent, PathItem,
    PathStyle, QueryStyle, ReferenceOr, Response, StatusCode,
};
use regex::Regex;
use sha1::{Digest, Sha1};
use tracing::debug;

use super::schema::{bool_schema, reference, schema_key, string_schema};
use crate::model::{HttpMethod, NodeInfo, RestUri, UriType};
use crate::registry::RegistrySnapshot;

static PATH_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]+)\}").expect("valid regex"));

/// Names of the `{...}` segments of a URI, in order.
pub fn path_params(uri: &str) -> Vec<String> {
    PATH_PARAM
        .captures_iter(uri)
        .map(|c| c[1].to_string())
        .collect()
}

fn describe(snapshot: &RegistrySnapshot, name: &str) -> String {
    snapshot
        .crd_to_node
        .values()
        .find(|n| n.name == name && !n.description.is_empty())
        .map(|n| n.description.clone())
        .unwrap_or_else(|| format!("Name of the {name} node"))
}

fn parameter_data(name: &str, description: String, required: bool) -> ParameterData {
    ParameterData {
        name: name.to_string(),
        description: Some(description),
        required,
        deprecated: None,
        format: ParameterSchemaOrContent::Schema(ReferenceOr::Item(
            string_schema(),
        )),
        example: None,
        examples: Default::default(),
        explode: None,
        extensions: Default::default(),
    }
}

fn query_param(data: ParameterData) -> ReferenceOr<Parameter> {
    ReferenceOr::Item(Parameter::Query {
        parameter_data: data,
        allow_reserved: false,
        style: QueryStyle::Form,
        allow_empty_value: None,
    })
}

/// Required path parameters for every URI segment, then a required query
/// parameter for every non-singleton ancestor the path does not name.
pub fn parameters(
    snapshot: &RegistrySnapshot,
    uri: &str,
    node: &NodeInfo,
) -> Vec<ReferenceOr<Parameter>> {
    let in_path = path_params(uri);
    let mut out: Vec<_> = in_path
        .iter()
        .map(|name| {
            ReferenceOr::Item(Parameter::Path {
                parameter_data: parameter_data(
                    name,
                    describe(snapshot, name),
                    true,
                ),
                style: PathStyle::Simple,
            })
        })
        .collect();

    let named: BTreeSet<&str> = in_path.iter().map(String::as_str).collect();
    for parent in &node.parent_hierarchy {
        let Some(parent_node) = snapshot.crd_to_node.get(parent) else {
            continue;
        };
        if parent_node.is_singleton || named.contains(parent_node.name.as_str())
        {
            continue;
        }
        out.push(query_param(parameter_data(
            &parent_node.name,
            describe(snapshot, &parent_node.name),
            true,
        )));
    }
    out
}

fn respond(operation: &mut Operation, code: u16, response: ReferenceOr<Response>) {
    operation
        .responses
        .responses
        .insert(StatusCode::Code(code), response);
}

fn get_response(
    method: HttpMethod,
    uri_type: UriType,
    params: usize,
    node: &NodeInfo,
) -> String {
    let name = &node.name;
    match uri_type {
        UriType::Status => format!("Get{}", schema_key(node, "Status")),
        UriType::SingleLink => format!("Get{}", schema_key(node, "SingleLink")),
        UriType::NamedLink => format!("Get{}", schema_key(node, "NamedLink")),
        UriType::Default if method == HttpMethod::List || params == 0 => {
            format!("List{name}")
        }
        UriType::Default => format!("Get{name}"),
    }
}

/// Builds the path item of one URI. Every URI accepting `PUT` also
/// documents `PATCH`.
pub fn path_item(
    snapshot: &RegistrySnapshot,
    rest_uri: &RestUri,
    node: &NodeInfo,
) -> PathItem {
    let uri = &rest_uri.uri;
    let uri_type = snapshot
        .uri_info
        .get(uri)
        .copied()
        .unwrap_or(UriType::Default);
    let params = parameters(snapshot, uri, node);

    let mut methods: BTreeSet<HttpMethod> =
        rest_uri.methods.keys().copied().collect();
    if methods.contains(&HttpMethod::Put) {
        methods.insert(HttpMethod::Patch);
    }

    let mut item = PathItem::default();
    let mut hasher = Sha1::new();
    for method in methods {
        hasher.update(format!("{method}{uri}").as_bytes());
        let mut operation = Operation {
            tags: vec![node.kind().to_string()],
            operation_id: Some(hex::encode(hasher.clone().finalize())),
            parameters: params.clone(),
            ..Default::default()
        };

        match method {
            HttpMethod::Get | HttpMethod::List => {
                let response = get_response(method, uri_type, params.len(), node);
                respond(&mut operation, 200, reference("responses", &response));
                respond(&mut operation, 404, reference("responses", "NotFoundResponse"));
                item.get = Some(operation);
            }
            HttpMethod::Put => {
                let body = if uri_type == UriType::Status {
                    format!("Create{}", schema_key(node, "Status"))
                } else {
                    operation.parameters.push(query_param(parameter_data(
                        "update_if_exists",
                        "If set to false, disables update of preexisting object. Default value is true"
                            .to_string(),
                        false,
                    )));
                    if let Some(ReferenceOr::Item(Parameter::Query {
                        parameter_data,
                        ..
                    })) = operation.parameters.last_mut()
                    {
                        parameter_data.format = ParameterSchemaOrContent::Schema(
                            ReferenceOr::Item(bool_schema()),
                        );
                    }
                    format!("Create{}", node.name)
                };
                operation.request_body = Some(reference("requestBodies", &body));
                respond(&mut operation, 200, reference("responses", "DefaultResponse"));
                item.put = Some(operation);
            }
            HttpMethod::Patch => {
                respond(&mut operation, 200, reference("responses", "DefaultResponse"));
                respond(&mut operation, 404, reference("responses", "NotFoundResponse"));
                item.patch = Some(operation);
            }
            HttpMethod::Delete => {
                respond(
                    &mut operation,
                    200,
                    ReferenceOr::Item(Response {
                        description: "No content".to_string(),
                        ..Default::default()
                    }),
                );
                item.delete = Some(operation);
            }
            HttpMethod::Post => {
                debug!(%uri, "POST is not served, leaving it out of the document");
            }
        }
    }
    item
}
