mod common;

use std::collections::BTreeMap;

use common::*;
use nexus_gateway::naming;
use nexus_gateway::server::CONTINUE_HEADER;
use nexus_store::{ObjectStore, StoreObject};
use serde_json::json;

const ALICE: &str = "/root/default/leader/alice";

async fn with_root_and_alice() -> TestGateway {
    let gw = org_chart().await;
    let (status, _) = gw.json("PUT", "/root/default", Some(json!({"name": "acme"}))).await;
    assert_eq!(status, 200);
    let (status, body) = gw
        .json("PUT", ALICE, Some(json!({"designation": "CEO", "age": 41})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "alice");
    gw
}

#[tokio::test]
async fn singleton_only_answers_to_default() {
    let gw = org_chart().await;
    let (status, body) = gw.json("PUT", "/root/default", Some(json!({"name": "acme"}))).await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "default");

    let (status, body) = gw.json("GET", "/root/default", None).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"spec": {"name": "acme"}, "status": {}}));

    let (status, body) = gw.json("PUT", "/root/other", Some(json!({}))).await;
    assert_eq!(status, 400);
    assert!(body["message"].as_str().unwrap().starts_with("Wrong singleton node name"));
}

#[tokio::test]
async fn parameterless_singleton_defaults_its_name() {
    let gw = org_chart().await;
    let (status, body) = gw.json("PUT", "/config", Some(json!({"theme": "dark"}))).await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "default");

    let stored = gw
        .store
        .get(
            &naming::gvr_for(CONFIG_CRD),
            &naming::hashed_name(CONFIG_CRD, &[], &BTreeMap::new(), "default"),
        )
        .await
        .unwrap();
    assert_eq!(stored.label(naming::DISPLAY_NAME_LABEL), Some("default"));

    let (status, body) = gw.json("GET", "/config", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["spec"], json!({"theme": "dark"}));
}

#[tokio::test]
async fn list_keys_unlabelled_objects_by_store_name() {
    let gw = with_root_and_alice().await;
    let gvr = naming::gvr_for(LEADER_CRD);
    let mut raw = StoreObject::new(&gvr, "Leader", "raw-name");
    raw.set_labels(BTreeMap::from([(ROOT_CRD.to_string(), "default".to_string())]));
    raw.set_spec(json!({"designation": "COO"}).as_object().cloned().unwrap());
    gw.store.create(&gvr, &raw).await.unwrap();

    let (status, list) = gw.json("GET", "/leaders", None).await;
    assert_eq!(status, 200);
    assert_eq!(list["raw-name"]["spec"]["designation"], "COO");
    assert_eq!(list["alice"]["spec"]["designation"], "CEO");
}

#[tokio::test]
async fn child_is_linked_into_parent_and_listed_by_display_name() {
    let gw = with_root_and_alice().await;

    let (status, body) = gw.json("GET", ALICE, None).await;
    assert_eq!(status, 200);
    assert_eq!(body["spec"], json!({"designation": "CEO", "age": 41}));

    // Relation pointers stay out of the parent's view.
    let (_, root) = gw.json("GET", "/root/default", None).await;
    assert_eq!(root["spec"], json!({"name": "acme"}));

    let (status, link) = gw.json("GET", "/root/default/CEO", None).await;
    assert_eq!(status, 200);
    assert_eq!(link["group"], "management.vmware.org/v1");
    assert_eq!(link["kind"], "Leader");
    assert_eq!(link["name"], "alice");
    assert_eq!(link["hierarchy"], json!(["roots.orgchart.vmware.org:default"]));

    let (status, list) = gw.json("GET", "/leaders", None).await;
    assert_eq!(status, 200);
    assert_eq!(list["alice"]["spec"]["designation"], "CEO");
}

#[tokio::test]
async fn list_pages_with_continue_header() {
    let gw = with_root_and_alice().await;
    gw.json("PUT", "/root/default/leader/bob", Some(json!({"designation": "CTO"})))
        .await;

    let resp = gw.call("GET", "/leaders?limit=1", None).await;
    assert_eq!(resp.status(), 200);
    let token = resp
        .headers()
        .get(CONTINUE_HEADER)
        .expect("continue header")
        .to_str()
        .unwrap()
        .to_string();

    let (status, rest) = gw
        .json("GET", &format!("/leaders?limit=1&continue={token}"), None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(rest.as_object().unwrap().len(), 1);

    let (status, _) = gw.json("GET", "/leaders?limit=abc", None).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn existing_objects_are_updated_unless_told_otherwise() {
    let gw = with_root_and_alice().await;

    let (status, body) = gw
        .json("PUT", &format!("{ALICE}?update_if_exists=false"), Some(json!({})))
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["message"], "Already Exists.");

    let (status, body) = gw
        .json("PUT", "/root/default", Some(json!({"name": "acme corp"})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Updated successfully");

    // The CEO pointer survives a full spec replacement.
    let (_, link) = gw.json("GET", "/root/default/CEO", None).await;
    assert_eq!(link["name"], "alice");
}

#[tokio::test]
async fn status_subresource_round_trip() {
    let gw = org_chart().await;
    gw.json("PUT", "/root/default", Some(json!({}))).await;

    let (status, body) = gw
        .json("PUT", &format!("{ALICE}/status"), Some(json!({"health": "ok"})))
        .await;
    assert_eq!(status, 404);
    assert_eq!(
        body["message"],
        "Can't put status subresource as nexus object not found"
    );

    gw.json("PUT", ALICE, Some(json!({"designation": "CEO"}))).await;
    let (status, body) = gw
        .json("PUT", &format!("{ALICE}/status"), Some(json!({"health": "ok"})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Status Updated successfully");

    let (status, body) = gw.json("GET", &format!("{ALICE}/status"), None).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({"health": "ok"}));

    let (status, _) = gw
        .json("PUT", &format!("{ALICE}/status"), Some(json!({"nexus": {}})))
        .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn patch_merges_into_spec() {
    let gw = with_root_and_alice().await;
    let (status, body) = gw
        .json("PATCH", ALICE, Some(json!({"designation": "CTO"})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "Patch applied successfully");

    let (_, body) = gw.json("GET", ALICE, None).await;
    assert_eq!(body["spec"], json!({"designation": "CTO", "age": 41}));

    let (status, _) = gw
        .json("PATCH", "/root/default/leader/nobody", Some(json!({"a": 1})))
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn delete_cascades_and_unlinks() {
    let gw = with_root_and_alice().await;
    let (status, _) = gw
        .json("PUT", &format!("{ALICE}/employee/bob"), Some(json!({"title": "eng"})))
        .await;
    assert_eq!(status, 200);

    let (status, staff) = gw.json("GET", &format!("{ALICE}/Staff"), None).await;
    assert_eq!(status, 200);
    assert_eq!(staff[0]["name"], "bob");
    assert_eq!(staff[0]["group"], "role.vmware.org/v1");

    let (status, body) = gw.json("DELETE", ALICE, None).await;
    assert_eq!(status, 200);
    assert_eq!(body, serde_json::Value::Null);

    let (status, _) = gw.json("GET", ALICE, None).await;
    assert_eq!(status, 404);
    assert_eq!(gw.store.count(&naming::gvr_for(EMPLOYEE_CRD)).await, 0);

    let (_, link) = gw.json("GET", "/root/default/CEO", None).await;
    assert_eq!(link["group"], "");
    assert_eq!(link["name"], "");

    let (status, _) = gw.json("DELETE", ALICE, None).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn name_can_come_from_query() {
    let gw = org_chart().await;
    gw.json("PUT", "/root/default", Some(json!({}))).await;

    let (status, body) = gw.json("PUT", "/leader", Some(json!({}))).await;
    assert_eq!(status, 400);
    assert_eq!(body["message"], "Could not find required param: management.Leader");

    let (status, body) = gw
        .json("PUT", "/leader?management.Leader=carol", Some(json!({"designation": "CFO"})))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["message"], "carol");

    let (status, body) = gw.json("GET", "/root/default/leader/carol", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["spec"]["designation"], "CFO");
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let gw = org_chart().await;
    let (status, _) = gw.json("PUT", "/root/default", Some(json!([1, 2]))).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn openapi_is_served_per_datamodel() {
    let gw = org_chart().await;
    let (status, doc) = gw.json("GET", "/vmware.org/openapi.json", None).await;
    assert_eq!(status, 200);
    assert_eq!(doc["openapi"], "3.0.0");
    assert!(doc["paths"]["/root/{orgchart.Root}/leader/{management.Leader}"]["put"].is_object());

    let (status, _) = gw.json("GET", "/example.io/openapi.json", None).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn health_readiness_and_debug() {
    let gw = org_chart().await;
    let (status, _) = gw.json("GET", "/health", None).await;
    assert_eq!(status, 200);
    let (status, _) = gw.json("GET", "/readyz", None).await;
    assert_eq!(status, 200);

    let (status, debug) = gw.json("GET", "/debug/all", None).await;
    assert_eq!(status, 200);
    assert_eq!(debug["totalHttpServerRestarts"], 0);
    assert_eq!(debug["uriToCrdType"]["/leaders"], LEADER_CRD);
    assert!(!debug["registeredRoutes"].as_array().unwrap().is_empty());

    gw.routes.set_serving(false);
    let (status, _) = gw.json("GET", "/readyz", None).await;
    assert_eq!(status, 503);

    let (status, _) = gw.json("GET", "/no/such/route", None).await;
    assert_eq!(status, 404);
}
