use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinitionSpec, JSONSchemaProps, JSONSchemaPropsOrArray,
};
use openapiv3::{
    AdditionalProperties, ArrayType, BooleanType, Components, IntegerFormat,
    IntegerType, MediaType, NumberFormat, NumberType, ObjectType,
    ReferenceOr, RequestBody, Response, Schema, SchemaData, SchemaKind,
    StringFormat, StringType, Type, VariantOrUnknownOrEmpty,
};
use tracing::debug;

use crate::model::NodeInfo;

pub(crate) const JSON: &str = "application/json";

/// Marks relation-pointer fields in generated CRD schemas.
const RELATION_FIELD_MARKER: &str = "Gvk";

pub(crate) fn schema(kind: Type) -> Schema {
    Schema {
        schema_data: SchemaData::default(),
        schema_kind: SchemaKind::Type(kind),
    }
}

pub(crate) fn string_schema() -> Schema {
    schema(Type::String(StringType::default()))
}

pub(crate) fn bool_schema() -> Schema {
    schema(Type::Boolean(BooleanType::default()))
}

fn object_schema(object: ObjectType) -> Schema {
    schema(Type::Object(object))
}

fn array_schema(items: Schema) -> Schema {
    schema(Type::Array(ArrayType {
        items: Some(ReferenceOr::Item(Box::new(items))),
        min_items: None,
        max_items: None,
        unique_items: false,
    }))
}

pub(crate) fn reference<T>(section: &str, name: &str) -> ReferenceOr<T> {
    ReferenceOr::Reference {
        reference: format!("#/components/{section}/{name}"),
    }
}

pub(crate) fn json_response(
    description: String,
    schema: ReferenceOr<Schema>,
) -> Response {
    let mut response = Response {
        description,
        ..Default::default()
    };
    response.content.insert(
        JSON.to_string(),
        MediaType {
            schema: Some(schema),
            ..Default::default()
        },
    );
    response
}

fn json_request(
    description: String,
    required: bool,
    schema: ReferenceOr<Schema>,
) -> RequestBody {
    let mut body = RequestBody {
        description: Some(description),
        required,
        ..Default::default()
    };
    body.content.insert(
        JSON.to_string(),
        MediaType {
            schema: Some(schema),
            ..Default::default()
        },
    );
    body
}

fn message_schema() -> ObjectType {
    let mut object = ObjectType::default();
    object.properties.insert(
        "message".to_string(),
        ReferenceOr::Item(Box::new(string_schema())),
    );
    object
}

/// `DefaultResponse` and `NotFoundResponse`, shared by every document.
pub(crate) fn base_responses(components: &mut Components) {
    for (name, description) in
        [("DefaultResponse", "Default response"), ("NotFoundResponse", "Not Found")]
    {
        components.responses.insert(
            name.to_string(),
            ReferenceOr::Item(json_response(
                description.to_string(),
                ReferenceOr::Item(object_schema(message_schema())),
            )),
        );
    }
}

/// Maps one CRD JSON-schema property to an OpenAPI schema, or `None` for
/// types the generator does not model.
pub fn property_schema(prop: &JSONSchemaProps) -> Option<Schema> {
    let format = prop.format.as_deref().unwrap_or_default();
    let kind = match prop.type_.as_deref().unwrap_or_default() {
        "string" => Type::String(StringType {
            format: match format {
                "byte" => VariantOrUnknownOrEmpty::Item(StringFormat::Byte),
                "date-time" => {
                    VariantOrUnknownOrEmpty::Item(StringFormat::DateTime)
                }
                _ => VariantOrUnknownOrEmpty::Empty,
            },
            ..Default::default()
        }),
        "boolean" => Type::Boolean(BooleanType::default()),
        "integer" => Type::Integer(IntegerType {
            format: match format {
                "int32" => VariantOrUnknownOrEmpty::Item(IntegerFormat::Int32),
                "int64" => VariantOrUnknownOrEmpty::Item(IntegerFormat::Int64),
                _ => VariantOrUnknownOrEmpty::Empty,
            },
            ..Default::default()
        }),
        "number" => Type::Number(NumberType {
            format: VariantOrUnknownOrEmpty::Item(NumberFormat::Double),
            ..Default::default()
        }),
        "object" => Type::Object(parse_fields(prop.properties.as_ref())),
        "array" => {
            let items = match &prop.items {
                Some(JSONSchemaPropsOrArray::Schema(item)) => {
                    property_schema(item)
                }
                Some(JSONSchemaPropsOrArray::Schemas(items)) => {
                    items.first().and_then(property_schema)
                }
                None => None,
            };
            return Some(array_schema(
                items.unwrap_or_else(|| object_schema(ObjectType::default())),
            ));
        }
        other => {
            debug!(r#type = other, "skipping property of unknown type");
            return None;
        }
    };
    Some(schema(kind))
}

/// Object schema of a property map, dropping relation-pointer fields.
pub fn parse_fields(
    props: Option<&BTreeMap<String, JSONSchemaProps>>,
) -> ObjectType {
    let mut object = ObjectType::default();
    for (name, prop) in props.into_iter().flatten() {
        if name.contains(RELATION_FIELD_MARKER) {
            continue;
        }
        if let Some(s) = property_schema(prop) {
            object
                .properties
                .insert(name.clone(), ReferenceOr::Item(Box::new(s)));
        }
    }
    object
}

fn top_level_props(
    spec: Option<&CustomResourceDefinitionSpec>,
    section: &str,
) -> Option<BTreeMap<String, JSONSchemaProps>> {
    let root = spec?
        .versions
        .iter()
        .find(|v| v.served)?
        .schema
        .as_ref()?
        .open_api_v3_schema
        .as_ref()?;
    root.properties.as_ref()?.get(section)?.properties.clone()
}

pub(crate) fn schema_key(node: &NodeInfo, suffix: &str) -> String {
    format!("{}.{}", node.name, suffix)
}

/// Component schemas, request bodies and responses of one node type.
pub(crate) fn add_node_components(
    components: &mut Components,
    node: &NodeInfo,
    spec: Option<&CustomResourceDefinitionSpec>,
) {
    let spec_schema = object_schema(parse_fields(
        top_level_props(spec, "spec").as_ref(),
    ));
    let mut status_props = top_level_props(spec, "status").unwrap_or_default();
    status_props.remove("nexus");
    let status_schema = object_schema(parse_fields(Some(&status_props)));

    let mut get = ObjectType::default();
    get.properties.insert(
        "spec".to_string(),
        ReferenceOr::Item(Box::new(spec_schema.clone())),
    );
    get.properties.insert(
        "status".to_string(),
        ReferenceOr::Item(Box::new(status_schema.clone())),
    );
    let get_schema = object_schema(get);

    // Lists are keyed by display name.
    let list_schema = object_schema(ObjectType {
        additional_properties: Some(AdditionalProperties::Schema(Box::new(
            ReferenceOr::Item(get_schema.clone()),
        ))),
        ..Default::default()
    });

    let mut link = ObjectType::default();
    for field in ["group", "kind", "name"] {
        link.properties.insert(
            field.to_string(),
            ReferenceOr::Item(Box::new(string_schema())),
        );
    }
    link.properties.insert(
        "hierarchy".to_string(),
        ReferenceOr::Item(Box::new(array_schema(string_schema()))),
    );
    let single_link = object_schema(link);
    let named_link = array_schema(single_link.clone());

    for (suffix, s) in [
        ("Get", get_schema),
        ("Post", spec_schema),
        ("List", list_schema),
        ("Status", status_schema),
        ("SingleLink", single_link),
        ("NamedLink", named_link),
    ] {
        components
            .schemas
            .insert(schema_key(node, suffix), ReferenceOr::Item(s));
    }

    let name = &node.name;
    components.request_bodies.insert(
        format!("Create{name}"),
        ReferenceOr::Item(json_request(
            format!("Request used to create {name}"),
            true,
            reference("schemas", &schema_key(node, "Post")),
        )),
    );
    components.request_bodies.insert(
        format!("Create{}", schema_key(node, "Status")),
        ReferenceOr::Item(json_request(
            format!("Request used to create Status subresource of {name}"),
            false,
            reference("schemas", &schema_key(node, "Status")),
        )),
    );

    let responses = [
        (
            format!("Get{name}"),
            format!("Response returned back after getting {name} object"),
            "Get",
        ),
        (
            format!("Get{}", schema_key(node, "Status")),
            format!(
                "Response returned back after getting status subresource of {name} object"
            ),
            "Status",
        ),
        (
            format!("List{name}"),
            format!("Response returned back after getting {name} objects"),
            "List",
        ),
        (
            format!("Get{}", schema_key(node, "SingleLink")),
            format!("Response returned back after getting {name} link"),
            "SingleLink",
        ),
        (
            format!("Get{}", schema_key(node, "NamedLink")),
            format!("Response returned back after getting {name} links"),
            "NamedLink",
        ),
    ];
    for (key, description, suffix) in responses {
        components.responses.insert(
            key,
            ReferenceOr::Item(json_response(
                description,
                reference("schemas", &schema_key(node, suffix)),
            )),
        );
    }
}
