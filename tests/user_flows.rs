mod common;

use axum::http::StatusCode;
use common::{empty_request, json_request, read_json, test_app, view_filter};
use orchestrator_auth::model::SUPER_ADMIN_ROLE;
use serde_json::json;

#[tokio::test]
async fn admin_grants_view_and_the_engine_follows() {
    let app = test_app().await;
    let admin = app.admin_token();

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({
                "email_id": "alice@example.com",
                "roleFilters": [view_filter("team1", "dev", "app1", "view")],
                "groups": [],
                "superAdmin": false
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["code"], 200);
    let id = payload["result"][0]["id"].as_i64().expect("id");

    assert!(
        app.state
            .engine
            .enforce("alice@example.com", "applications", "get", "team1/app1")
            .await
    );
    assert!(
        !app.state
            .engine
            .enforce("alice@example.com", "applications", "trigger", "team1/app1")
            .await
    );

    let response = app
        .send(empty_request("GET", &format!("/user/{id}"), Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["result"]["email_id"], "alice@example.com");
    let filters = payload["result"]["roleFilters"].as_array().expect("filters");
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0]["team"], "team1");
    assert_eq!(filters[0]["action"], "view");
}

#[tokio::test]
async fn update_replaces_grants_and_delete_revokes_everything() {
    let app = test_app().await;
    let admin = app.admin_token();
    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({
                "email_id": "carol@example.com",
                "roleFilters": [view_filter("team1", "dev", "app1", "view")]
            }),
        ))
        .await;
    let id = read_json(response).await["result"][0]["id"]
        .as_i64()
        .expect("id");

    let response = app
        .send(json_request(
            "PUT",
            "/user",
            Some(&admin),
            json!({
                "id": id,
                "email_id": "carol@example.com",
                "roleFilters": [view_filter("team1", "dev", "app1", "trigger")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let engine = &app.state.engine;
    assert!(
        engine
            .enforce("carol@example.com", "applications", "trigger", "team1/app1")
            .await
    );
    let roles = engine.roles_for_user("carol@example.com").await;
    assert!(roles.iter().all(|r| !r.starts_with("role:view_")));

    let response = app
        .send(empty_request("DELETE", &format!("/user/{id}"), Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(engine.roles_for_user("carol@example.com").await.is_empty());

    let response = app
        .send(empty_request("GET", &format!("/user/{id}"), Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn team_manager_may_only_grant_inside_the_team() {
    let app = test_app().await;
    let admin = app.admin_token();
    app.send(json_request(
        "POST",
        "/user",
        Some(&admin),
        json!({
            "email_id": "manager@example.com",
            "roleFilters": [view_filter("team1", "", "", "manager")]
        }),
    ))
    .await;
    let manager = app.token_for("manager@example.com");

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&manager),
            json!({
                "email_id": "dev@example.com",
                "roleFilters": [view_filter("team1", "dev", "app1", "view")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&manager),
            json!({
                "email_id": "ops@example.com",
                "roleFilters": [view_filter("team2", "dev", "app1", "view")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let payload = read_json(response).await;
    assert_eq!(payload["errors"][0]["userMessage"], "FORBIDDEN");

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&manager),
            json!({"email_id": "root@example.com", "superAdmin": true}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn seeded_users_and_bad_input_are_rejected() {
    let app = test_app().await;
    let admin = app.admin_token();

    let response = app
        .send(empty_request("DELETE", "/user/1", Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({"email_id": "not-an-email"}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({"email_id": "x@example.com", "groups": ["missing"]}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .send(empty_request("GET", "/user/999", Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn check_roles_reports_super_admin() {
    let app = test_app().await;
    let admin = app.admin_token();
    let response = app
        .send(empty_request("GET", "/user/check/roles", Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["result"]["superAdmin"], true);

    let response = app.send(empty_request("GET", "/user", Some(&admin))).await;
    let users = read_json(response).await["result"]
        .as_array()
        .expect("users")
        .len();
    assert!(users >= 2);
}

#[tokio::test]
async fn mirror_sync_restores_dropped_edges() {
    let app = test_app().await;
    let admin = app.admin_token();
    app.send(json_request(
        "POST",
        "/user",
        Some(&admin),
        json!({
            "email_id": "dave@example.com",
            "roleFilters": [view_filter("team1", "dev", "app1", "view")]
        }),
    ))
    .await;
    app.state
        .engine
        .delete_roles_for_user("dave@example.com")
        .await
        .expect("drop edges");

    let response = app
        .send(empty_request(
            "POST",
            "/user/sync/orchestratortocasbin",
            Some(&admin),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        app.state
            .engine
            .enforce("dave@example.com", "applications", "get", "team1/app1")
            .await
    );
}

#[tokio::test]
async fn differently_cased_email_merges_into_the_existing_user() {
    let app = test_app().await;
    let admin = app.admin_token();
    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({
                "email_id": "alice@example.com",
                "roleFilters": [view_filter("team1", "dev", "app1", "view")]
            }),
        ))
        .await;
    let id = read_json(response).await["result"][0]["id"]
        .as_i64()
        .expect("id");
    let old_token = app.token_for("alice@example.com");

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({
                "email_id": "Alice@Example.com",
                "roleFilters": [view_filter("team1", "dev", "app1", "trigger")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(payload["result"][0]["id"].as_i64(), Some(id));

    let response = app
        .send(empty_request("GET", "/user/check/roles", Some(&old_token)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    let roles: Vec<&str> = payload["result"]["roles"]
        .as_array()
        .expect("roles")
        .iter()
        .filter_map(|role| role.as_str())
        .collect();
    assert!(roles.iter().any(|role| role.starts_with("role:view_")));
    assert!(roles.iter().any(|role| role.starts_with("role:trigger_")));
    assert!(
        app.state
            .engine
            .roles_for_user("alice@example.com")
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn recreating_a_deleted_user_revives_it_with_only_the_new_grants() {
    let app = test_app().await;
    let admin = app.admin_token();
    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({
                "email_id": "frank@example.com",
                "roleFilters": [view_filter("team1", "dev", "app1", "view")]
            }),
        ))
        .await;
    let id = read_json(response).await["result"][0]["id"]
        .as_i64()
        .expect("id");
    let response = app
        .send(empty_request("DELETE", &format!("/user/{id}"), Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({
                "email_id": "frank@example.com",
                "roleFilters": [view_filter("team2", "prod", "app2", "trigger")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["result"][0]["id"].as_i64(), Some(id));

    let response = app
        .send(empty_request("GET", &format!("/user/{id}"), Some(&admin)))
        .await;
    let payload = read_json(response).await;
    let filters = payload["result"]["roleFilters"].as_array().expect("filters");
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0]["team"], "team2");
    assert_eq!(filters[0]["action"], "trigger");

    let roles = app.state.engine.roles_for_user("frank@example.com").await;
    assert_eq!(roles.len(), 1);
    assert!(roles[0].starts_with("role:trigger_"));
}

#[tokio::test]
async fn repeating_a_create_changes_nothing() {
    let app = test_app().await;
    let admin = app.admin_token();
    let body = json!({
        "email_id": "grace@example.com",
        "roleFilters": [view_filter("team1", "dev", "app1", "view")]
    });
    let response = app
        .send(json_request("POST", "/user", Some(&admin), body.clone()))
        .await;
    let first = read_json(response).await["result"][0].clone();
    let id = first["id"].as_i64().expect("id") as i32;
    let engine_roles = app.state.engine.roles_for_user("grace@example.com").await;
    let stored_roles = app.state.store.roles_for_user(id).await.expect("roles");

    let response = app
        .send(json_request("POST", "/user", Some(&admin), body))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = read_json(response).await["result"][0].clone();
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["roleFilters"], first["roleFilters"]);
    assert_eq!(
        app.state.engine.roles_for_user("grace@example.com").await,
        engine_roles
    );
    assert_eq!(
        app.state.store.roles_for_user(id).await.expect("roles"),
        stored_roles
    );
}

#[tokio::test]
async fn only_super_admins_may_touch_a_super_admin() {
    let app = test_app().await;
    let admin = app.admin_token();
    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({"email_id": "root@example.com", "superAdmin": true}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let root_id = read_json(response).await["result"][0]["id"]
        .as_i64()
        .expect("id");
    app.send(json_request(
        "POST",
        "/user",
        Some(&admin),
        json!({
            "email_id": "manager@example.com",
            "roleFilters": [view_filter("team1", "", "", "manager")]
        }),
    ))
    .await;
    let manager = app.token_for("manager@example.com");

    let response = app
        .send(json_request(
            "PUT",
            "/user",
            Some(&manager),
            json!({
                "id": root_id,
                "email_id": "root@example.com",
                "roleFilters": [view_filter("team1", "dev", "app1", "view")]
            }),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app
        .send(empty_request(
            "DELETE",
            &format!("/user/{root_id}"),
            Some(&manager),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let roles = app.state.engine.roles_for_user("root@example.com").await;
    assert!(roles.contains(&SUPER_ADMIN_ROLE.to_string()));
    let response = app
        .send(empty_request("GET", &format!("/user/{root_id}"), Some(&admin)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["result"]["superAdmin"], true);
}

#[tokio::test]
async fn update_grant_without_an_entity_name_is_reported_not_applied() {
    let app = test_app().await;
    let admin = app.admin_token();
    let chart_group = |name: &str| {
        json!({
            "entity": "chart-group",
            "entityName": name,
            "action": "update",
            "team": "",
            "environment": "",
            "accessType": ""
        })
    };
    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({"email_id": "owner@example.com", "roleFilters": [chart_group("payments")]}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.state.engine.roles_for_user("owner@example.com").await.len(),
        1
    );

    let response = app
        .send(json_request(
            "POST",
            "/user",
            Some(&admin),
            json!({"email_id": "other@example.com", "roleFilters": [chart_group("")]}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json(response).await;
    assert_eq!(
        payload["result"][0]["roleFilterStatuses"][0]["status"],
        "update filter needs an entityName"
    );
    assert!(
        app.state
            .engine
            .roles_for_user("other@example.com")
            .await
            .is_empty()
    );
}
