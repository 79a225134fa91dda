use axum::http::StatusCode;
use axum_test::TestServer;
use pagesmith::api::{create_router, create_router_with_config, ErrorBody, SecurityConfig};
use pagesmith::db::Database;
use pagesmith::designer::{DesignerCommit, DesignerView, PublishOutcome};
use pagesmith::models::*;
use serde_json::{json, Value};

fn setup() -> TestServer {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let app = create_router(db);
    TestServer::new(app).expect("Failed to create test server")
}

async fn create_test_page(server: &TestServer) -> Page {
    server
        .post("/api/v1/pages")
        .json(&CreatePageInput {
            title: "Home".to_string(),
            slug: None,
            parent_id: None,
        })
        .await
        .json::<Page>()
}

/// The page's current token, as handed out in the designer's `ETag`.
async fn page_token(server: &TestServer, page: &Page) -> String {
    server
        .get(&format!("/api/v1/pages/{}/designer", page.id))
        .await
        .header("etag")
        .to_str()
        .expect("ETag is not text")
        .to_string()
}

async fn create_component(server: &TestServer, page: &Page, body: Value) -> PageComponent {
    let token = page_token(server, page).await;
    let response = server
        .post(&format!("/api/v1/pages/{}/components", page.id))
        .add_header("If-Match", token)
        .json(&body)
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<PageComponent>()
}

mod pages {
    use super::*;

    #[tokio::test]
    async fn creates_and_fetches_a_page() {
        let server = setup();
        let page = create_test_page(&server).await;

        assert_eq!(page.slug, "home");
        let response = server.get(&format!("/api/v1/pages/{}", page.id)).await;
        response.assert_status_ok();
        assert_eq!(response.json::<Page>().id, page.id);
    }

    #[tokio::test]
    async fn records_the_actor_header() {
        let server = setup();
        let page = server
            .post("/api/v1/pages")
            .add_header("X-Actor", "ada")
            .json(&json!({ "title": "About" }))
            .await
            .json::<Page>();

        assert_eq!(page.created_by, "ada");
    }

    #[tokio::test]
    async fn anonymous_without_actor_header() {
        let server = setup();
        let page = create_test_page(&server).await;
        assert_eq!(page.created_by, "anonymous");
    }

    #[tokio::test]
    async fn unknown_page_is_404_with_code() {
        let server = setup();
        let response = server
            .get(&format!("/api/v1/pages/{}", uuid::Uuid::new_v4()))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<ErrorBody>().code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn duplicate_slug_is_409() {
        let server = setup();
        create_test_page(&server).await;

        let response = server
            .post("/api/v1/pages")
            .json(&json!({ "title": "Home again", "slug": "home" }))
            .await;

        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<ErrorBody>().code, "CONFLICT");
    }

    #[tokio::test]
    async fn updates_and_deletes() {
        let server = setup();
        let page = create_test_page(&server).await;

        let updated = server
            .put(&format!("/api/v1/pages/{}", page.id))
            .json(&json!({ "title": "Start" }))
            .await
            .json::<Page>();
        assert_eq!(updated.title, "Start");

        server
            .delete(&format!("/api/v1/pages/{}", page.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .get(&format!("/api/v1/pages/{}", page.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lists_pages() {
        let server = setup();
        create_test_page(&server).await;

        let pages = server.get("/api/v1/pages").await.json::<Vec<Page>>();
        assert_eq!(pages.len(), 1);
    }
}

mod components {
    use super::*;

    #[tokio::test]
    async fn lists_components_in_pre_order() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "section", "key": "main" })).await;
        create_component(&server, &page, json!({ "type": "text", "key": "intro", "parent_key": "main" })).await;
        create_component(&server, &page, json!({ "type": "footer", "key": "footer" })).await;

        let nodes = server
            .get(&format!("/api/v1/pages/{}/components", page.id))
            .await
            .json::<Vec<PageComponent>>();

        let keys: Vec<_> = nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["main", "intro", "footer"]);
    }

    #[tokio::test]
    async fn serves_the_nested_tree() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "section", "key": "main" })).await;
        create_component(&server, &page, json!({ "type": "text", "key": "intro", "parent_key": "main" })).await;

        let tree = server
            .get(&format!("/api/v1/pages/{}/tree", page.id))
            .await
            .json::<Value>();

        assert_eq!(tree["forest"][0]["key"], "main");
        assert_eq!(tree["forest"][0]["children"][0]["key"], "intro");
        assert_eq!(tree["orphans"], json!([]));
    }

    #[tokio::test]
    async fn accepts_explicit_positions() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "hero", "key": "hero", "position": { "kind": "order", "value": 0 } })).await;
        create_component(&server, &page, json!({ "type": "footer", "key": "footer", "position": { "kind": "order", "value": 1 } })).await;
        create_component(&server, &page, json!({ "type": "banner", "key": "banner", "position": { "kind": "index", "value": 1 } })).await;

        let nodes = server
            .get(&format!("/api/v1/pages/{}/components", page.id))
            .await
            .json::<Vec<PageComponent>>();
        let keys: Vec<_> = nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["hero", "banner", "footer"]);
    }

    #[tokio::test]
    async fn invalid_placement_is_400() {
        let server = setup();
        let page = create_test_page(&server).await;

        let response = server
            .post(&format!("/api/v1/pages/{}/components", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .json(&json!({ "type": "text", "placement": { "column": 0, "column_span": 0, "row": 0, "row_span": 1 } }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<ErrorBody>().code, "INVALID");
    }

    #[tokio::test]
    async fn moving_under_a_descendant_is_409() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "block", "key": "a" })).await;
        create_component(&server, &page, json!({ "type": "block", "key": "b", "parent_key": "a" })).await;
        create_component(&server, &page, json!({ "type": "block", "key": "c", "parent_key": "b" })).await;

        let response = server
            .post(&format!("/api/v1/pages/{}/components/a/move", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .json(&json!({ "parent_key": "c" }))
            .await;

        response.assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn moving_a_locked_component_is_423() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "block", "key": "a", "is_locked": true })).await;

        let response = server
            .post(&format!("/api/v1/pages/{}/components/a/move", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .json(&json!({ "position": { "kind": "index", "value": 0 } }))
            .await;

        response.assert_status(StatusCode::LOCKED);
        assert_eq!(response.json::<ErrorBody>().code, "LOCKED");
    }

    #[tokio::test]
    async fn deleting_a_parent_requires_cascade() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "block", "key": "a" })).await;
        create_component(&server, &page, json!({ "type": "block", "key": "b", "parent_key": "a" })).await;

        let response = server
            .delete(&format!("/api/v1/pages/{}/components/a", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<ErrorBody>().code, "INTEGRITY_VIOLATION");

        let response = server
            .delete(&format!("/api/v1/pages/{}/components/a?cascade=true", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["deleted"], json!(["a", "b"]));

        server
            .get(&format!("/api/v1/pages/{}/components/b", page.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn updates_documents() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "text", "key": "intro" })).await;

        let updated = server
            .put(&format!("/api/v1/pages/{}/components/intro", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .json(&json!({ "content": { "text": "Hi" } }))
            .await
            .json::<PageComponent>();

        assert_eq!(updated.documents.content, json!({ "text": "Hi" }));
    }

    #[tokio::test]
    async fn mutations_hand_back_the_next_token() {
        let server = setup();
        let page = create_test_page(&server).await;
        let before = page_token(&server, &page).await;

        let response = server
            .post(&format!("/api/v1/pages/{}/components", page.id))
            .add_header("If-Match", before.clone())
            .json(&json!({ "type": "text", "key": "intro" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let after = response.header("etag").to_str().expect("ETag is not text").to_string();

        assert_ne!(after, before);
        assert_eq!(after, page_token(&server, &page).await);

        server
            .put(&format!("/api/v1/pages/{}/components/intro", page.id))
            .add_header("If-Match", after)
            .json(&json!({ "content": { "text": "Hi" } }))
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn a_second_writer_with_a_stale_token_is_409() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "text", "key": "intro" })).await;
        let stale = page_token(&server, &page).await;

        server
            .put(&format!("/api/v1/pages/{}/components/intro", page.id))
            .add_header("If-Match", stale.clone())
            .json(&json!({ "content": { "text": "first" } }))
            .await
            .assert_status_ok();

        let response = server
            .put(&format!("/api/v1/pages/{}/components/intro", page.id))
            .add_header("If-Match", stale.clone())
            .json(&json!({ "content": { "text": "second" } }))
            .await;
        response.assert_status(StatusCode::CONFLICT);

        server
            .delete(&format!("/api/v1/pages/{}/components/intro?hard=true", page.id))
            .add_header("If-Match", stale)
            .await
            .assert_status(StatusCode::CONFLICT);

        let intro = server
            .get(&format!("/api/v1/pages/{}/components/intro", page.id))
            .await
            .json::<PageComponent>();
        assert_eq!(intro.documents.content, json!({ "text": "first" }));
    }

    #[tokio::test]
    async fn mutations_without_a_token_are_428() {
        let server = setup();
        let page = create_test_page(&server).await;

        let response = server
            .post(&format!("/api/v1/pages/{}/components", page.id))
            .json(&json!({ "type": "text" }))
            .await;
        response.assert_status(StatusCode::PRECONDITION_REQUIRED);
        assert_eq!(response.json::<ErrorBody>().code, "TOKEN_REQUIRED");

        server
            .post(&format!("/api/v1/pages/{}/components", page.id))
            .add_header("If-Match", "\"not-a-token\"")
            .json(&json!({ "type": "text" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        let nodes = server
            .get(&format!("/api/v1/pages/{}/components", page.id))
            .await
            .json::<Vec<PageComponent>>();
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn hard_deleted_keys_stay_taken() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "text", "key": "intro" })).await;

        server
            .delete(&format!("/api/v1/pages/{}/components/intro?hard=true", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .await
            .assert_status_ok();

        let response = server
            .post(&format!("/api/v1/pages/{}/components", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .json(&json!({ "type": "text", "key": "intro" }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
    }
}

mod designer {
    use super::*;

    #[tokio::test]
    async fn load_apply_publish_round_trip() {
        let server = setup();
        let page = create_test_page(&server).await;

        let view = server
            .get(&format!("/api/v1/pages/{}/designer", page.id))
            .await
            .json::<DesignerView>();

        let commit = server
            .post(&format!("/api/v1/pages/{}/designer/ops", page.id))
            .json(&json!({
                "token": view.token,
                "ops": [
                    { "op": "create", "type": "section", "key": "main" },
                    { "op": "create", "type": "text", "key": "intro", "parent_key": "main" },
                    { "op": "update", "key": "intro", "changes": { "content": { "text": "Hello" } } }
                ]
            }))
            .await
            .json::<DesignerCommit>();
        assert_eq!(commit.outcomes.len(), 3);

        let published = server
            .post(&format!("/api/v1/pages/{}/publish", page.id))
            .json(&json!({ "token": commit.token, "notes": "First cut" }))
            .await
            .json::<PublishOutcome>();

        assert_eq!(published.version.version_number, 1);
        assert!(published.version.is_published);
        assert_eq!(published.version.snapshot.node_count(), 2);
    }

    #[tokio::test]
    async fn stale_token_is_409() {
        let server = setup();
        let page = create_test_page(&server).await;
        let view = server
            .get(&format!("/api/v1/pages/{}/designer", page.id))
            .await
            .json::<DesignerView>();

        server
            .post(&format!("/api/v1/pages/{}/designer/ops", page.id))
            .json(&json!({ "token": view.token, "ops": [{ "op": "create", "type": "text" }] }))
            .await
            .assert_status_ok();

        let response = server
            .post(&format!("/api/v1/pages/{}/designer/ops", page.id))
            .json(&json!({ "token": view.token, "ops": [{ "op": "create", "type": "text" }] }))
            .await;

        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<ErrorBody>().code, "CONFLICT");
    }
}

mod versions {
    use super::*;

    #[tokio::test]
    async fn snapshot_restore_snapshot_numbers_one_two_three() {
        let server = setup();
        let page = create_test_page(&server).await;
        create_component(&server, &page, json!({ "type": "hero", "key": "hero" })).await;

        let v1 = server
            .post(&format!("/api/v1/pages/{}/versions", page.id))
            .json(&json!({}))
            .await;
        v1.assert_status(StatusCode::CREATED);

        create_component(&server, &page, json!({ "type": "popup", "key": "popup" })).await;

        let restored = server
            .post(&format!("/api/v1/pages/{}/versions/1/restore", page.id))
            .add_header("If-Match", page_token(&server, &page).await)
            .await;
        restored.assert_status_ok();
        let restored = restored.json::<Value>();
        assert_eq!(restored["version"]["version_number"], 2);
        assert_eq!(restored["report"]["removed"], json!(["popup"]));

        let v3 = server
            .post(&format!("/api/v1/pages/{}/versions", page.id))
            .json(&json!({ "notes": "after restore" }))
            .await
            .json::<PageVersion>();
        assert_eq!(v3.version_number, 3);

        let history = server
            .get(&format!("/api/v1/pages/{}/versions", page.id))
            .await
            .json::<Vec<PageVersionSummary>>();
        let numbers: Vec<_> = history.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![3, 2, 1]);
        assert_eq!(history[1].restored_from, Some(1));
    }

    #[tokio::test]
    async fn fetches_a_single_version() {
        let server = setup();
        let page = create_test_page(&server).await;
        server
            .post(&format!("/api/v1/pages/{}/versions", page.id))
            .json(&json!({ "notes": "empty" }))
            .await
            .assert_status(StatusCode::CREATED);

        let version = server
            .get(&format!("/api/v1/pages/{}/versions/1", page.id))
            .await
            .json::<PageVersion>();
        assert_eq!(version.change_notes.as_deref(), Some("empty"));

        server
            .get(&format!("/api/v1/pages/{}/versions/9", page.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn restore_with_a_stale_token_is_409() {
        let server = setup();
        let page = create_test_page(&server).await;
        let stale = page_token(&server, &page).await;
        server
            .post(&format!("/api/v1/pages/{}/versions", page.id))
            .json(&json!({}))
            .await
            .assert_status(StatusCode::CREATED);
        create_component(&server, &page, json!({ "type": "text" })).await;

        let response = server
            .post(&format!("/api/v1/pages/{}/versions/1/restore", page.id))
            .add_header("If-Match", stale)
            .await;

        response.assert_status(StatusCode::CONFLICT);
        let nodes = server
            .get(&format!("/api/v1/pages/{}/components", page.id))
            .await
            .json::<Vec<PageComponent>>();
        assert_eq!(nodes.len(), 1);
    }

    #[tokio::test]
    async fn restore_without_a_token_is_428() {
        let server = setup();
        let page = create_test_page(&server).await;
        server
            .post(&format!("/api/v1/pages/{}/versions", page.id))
            .json(&json!({}))
            .await
            .assert_status(StatusCode::CREATED);

        let response = server
            .post(&format!("/api/v1/pages/{}/versions/1/restore", page.id))
            .await;

        response.assert_status(StatusCode::PRECONDITION_REQUIRED);
        assert_eq!(response.json::<ErrorBody>().code, "TOKEN_REQUIRED");
    }
}

// ============================================================
// Security - API Key Authentication
// ============================================================

mod security_auth {
    use super::*;

    fn setup_with_auth(api_key: &str) -> TestServer {
        let db = Database::open_memory().expect("Failed to create database");
        db.migrate().expect("Failed to migrate");
        let config = SecurityConfig::with_api_key(api_key);
        let app = create_router_with_config(db, config);
        TestServer::new(app).expect("Failed to create test server")
    }

    #[tokio::test]
    async fn health_endpoint_is_accessible_without_auth() {
        let server = setup_with_auth("test-secret-key");
        server.get("/api/v1/health").await.assert_status_ok();
    }

    #[tokio::test]
    async fn protected_endpoint_requires_auth() {
        let server = setup_with_auth("test-secret-key");
        server
            .get("/api/v1/pages")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_endpoint_accepts_valid_bearer_token() {
        let server = setup_with_auth("test-secret-key");
        server
            .get("/api/v1/pages")
            .add_header("Authorization", "Bearer test-secret-key")
            .await
            .assert_status_ok();
    }

    #[tokio::test]
    async fn protected_endpoint_rejects_invalid_bearer_token() {
        let server = setup_with_auth("test-secret-key");
        server
            .get("/api/v1/pages")
            .add_header("Authorization", "Bearer wrong-key")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_endpoint_rejects_malformed_auth_header() {
        let server = setup_with_auth("test-secret-key");
        server
            .get("/api/v1/pages")
            .add_header("Authorization", "Basic dXNlcjpwYXNz")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
