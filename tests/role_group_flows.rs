mod common;

use axum::http::StatusCode;
use common::{empty_request, json_request, read_json, test_app, view_filter};
use serde_json::json;

#[tokio::test]
async fn members_inherit_group_grants_until_the_group_is_deleted() {
    let app = test_app().await;
    let admin = app.admin_token();

    let response = app
        .send(json_request(
            "POST",
            "/user/role/group",
            Some(&admin),
            json!({
                "name": "Release Team",
                "description": "deployers",
                "roleFilters": [view_filter("team1", "dev", "app1", "trigger")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let group = read_json(response).await["result"].clone();
    assert_eq!(group["casbinName"], "group:release_team");
    let group_id = group["id"].as_i64().expect("id");

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({"email_id": "erin@example.com", "groups": ["Release Team"]}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let engine = &app.state.engine;
    assert!(
        engine
            .enforce("erin@example.com", "applications", "trigger", "team1/app1")
            .await
    );

    let response = app
        .send(empty_request(
            "GET",
            "/user/role/group?name=release",
            Some(&admin),
        ))
        .await;
    let found = read_json(response).await["result"]
        .as_array()
        .expect("groups")
        .len();
    assert_eq!(found, 1);

    let response = app
        .send(empty_request(
            "DELETE",
            &format!("/user/role/group/{group_id}"),
            Some(&admin),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        !engine
            .enforce("erin@example.com", "applications", "trigger", "team1/app1")
            .await
    );

    let response = app
        .send(empty_request(
            "GET",
            &format!("/user/role/group/{group_id}"),
            Some(&admin),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_names_conflict_and_updates_keep_the_name() {
    let app = test_app().await;
    let admin = app.admin_token();
    let create = json!({
        "name": "viewers",
        "roleFilters": [view_filter("team1", "dev", "app1", "view")]
    });
    let response = app
        .send(json_request("POST", "/user/role/group", Some(&admin), create.clone()))
        .await;
    let id = read_json(response).await["result"]["id"]
        .as_i64()
        .expect("id");
    let response = app
        .send(json_request("POST", "/user/role/group", Some(&admin), create))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .send(json_request(
            "PUT",
            "/user/role/group",
            Some(&admin),
            json!({
                "id": id,
                "name": "renamed",
                "roleFilters": [view_filter("team1", "dev", "app2", "view")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["result"]["name"], "viewers");
    assert_eq!(payload["result"]["roleFilters"][0]["entityName"], "app2");

    let engine = &app.state.engine;
    let roles = engine.roles_for_user("group:viewers").await;
    assert!(roles.iter().any(|r| r.ends_with("_app2")));
    assert!(!roles.iter().any(|r| r.ends_with("_app1")));
}

#[tokio::test]
async fn groups_sharing_a_casbin_subject_conflict() {
    let app = test_app().await;
    let admin = app.admin_token();
    let response = app
        .send(json_request(
            "POST",
            "/user/role/group",
            Some(&admin),
            json!({
                "name": "Ops Team",
                "roleFilters": [view_filter("team1", "dev", "app1", "view")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(json_request(
            "POST",
            "/user/role/group",
            Some(&admin),
            json!({
                "name": "ops_team",
                "roleFilters": [view_filter("team1", "dev", "app1", "admin")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let roles = app.state.engine.roles_for_user("group:ops_team").await;
    assert!(roles.iter().all(|r| !r.starts_with("role:admin_")));
}
