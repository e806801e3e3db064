//! Deterministic object naming and resource addressing.

use std::collections::BTreeMap;

use nexus_store::Gvr;
use sha1::{Digest, Sha1};

use crate::model::DEFAULT_KEY;

pub const DISPLAY_NAME_LABEL: &str = "nexus/display_name";
pub const IS_NAME_HASHED_LABEL: &str = "nexus/is_name_hashed";

/// Store name of a node object.
///
/// Each ancestor contributes `<type>:<label value>` (missing labels count as
/// `default`), joined by `/`, and the node itself appends
/// `<type>:<display name>`. The SHA-1 of that string, hex encoded, is the
/// name. Labels that are not ancestors are ignored.
pub fn hashed_name(
    crd_type: &str,
    hierarchy: &[String],
    labels: &BTreeMap<String, String>,
    name: &str,
) -> String {
    let mut output = hierarchy
        .iter()
        .map(|parent| {
            let value = labels
                .get(parent)
                .map(String::as_str)
                .unwrap_or(DEFAULT_KEY);
            format!("{parent}:{value}")
        })
        .collect::<Vec<_>>()
        .join("/");
    output.push_str(&format!("{crd_type}:{name}"));

    let mut hasher = Sha1::new();
    hasher.update(output.as_bytes());
    hex::encode(hasher.finalize())
}

/// `leaders.management.vmware.org` addresses resource `leaders` in group
/// `management.vmware.org`, always at version `v1`.
pub fn gvr_for(crd_type: &str) -> Gvr {
    let (resource, group) = crd_type.split_once('.').unwrap_or((crd_type, ""));
    Gvr::new(group, "v1", resource)
}

/// Datamodel a CRD type belongs to: its group without the first label.
pub fn datamodel_name(crd_type: &str) -> String {
    crd_type.split('.').skip(2).collect::<Vec<_>>().join(".")
}

/// Effective datamodel key of a `Datamodel` object name: its last two labels.
pub fn datamodel_key(name: &str) -> String {
    let parts: Vec<&str> = name.split('.').collect();
    let start = parts.len().saturating_sub(2);
    parts[start..].join(".")
}

/// `<parentType>:<label>` entries for the ancestors that carry a label.
pub fn parent_hierarchy(
    parents: &[String],
    labels: &BTreeMap<String, String>,
) -> Vec<String> {
    parents
        .iter()
        .filter_map(|p| labels.get(p).map(|v| format!("{p}:{v}")))
        .collect()
}
