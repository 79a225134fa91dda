use pagesmith::db::Database;
use pagesmith::designer::{Designer, DesignerOp, DesignerSession, OpOutcome};
use pagesmith::error::PageError;
use pagesmith::models::*;
use pagesmith::providers::StaticIdentity;
use serde_json::json;
use speculate2::speculate;

fn create_test_page(db: &Database) -> Page {
    db.create_page(CreatePageInput {
        title: "Designer".to_string(),
        slug: None,
        parent_id: None,
    })
    .expect("Failed to create page")
}

fn create(key: &str, parent: Option<&str>) -> DesignerOp {
    let mut input = CreateComponentInput::new("block").with_key(key);
    if let Some(parent) = parent {
        input = input.under(parent);
    }
    DesignerOp::Create(input)
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
        let page = create_test_page(&db);
        let designer = Designer::new(db.clone());
    }

    describe "load" {
        it "returns the page token and forest" {
            db.create_node(page.id, CreateComponentInput::new("hero").with_key("hero"))
                .expect("Failed to create");

            let view = designer.load(page.id).expect("Failed to load");

            assert_eq!(view.page.id, page.id);
            assert_eq!(view.token.0, view.page.updated_at);
            assert_eq!(view.forest.len(), 1);
            assert!(view.orphans.is_empty());
        }

        it "fails for a deleted page" {
            db.delete_page(page.id).expect("Failed to delete");
            let err = designer.load(page.id).unwrap_err();
            assert!(matches!(err, PageError::NotFound { .. }));
        }
    }

    describe "apply" {
        it "applies ops in order within one batch" {
            let token = designer.load(page.id).expect("Failed to load").token;

            let commit = designer.apply(page.id, token, vec![
                create("section", None),
                create("heading", Some("section")),
                DesignerOp::Update {
                    key: "heading".to_string(),
                    changes: UpdateComponentInput {
                        content: Some(json!({ "text": "Welcome" })),
                        ..Default::default()
                    },
                },
                create("aside", None),
                DesignerOp::Move {
                    key: "aside".to_string(),
                    parent_key: None,
                    position: Position::Index(0),
                },
            ]).expect("Failed to apply");

            assert_eq!(commit.outcomes.len(), 5);
            assert!(matches!(commit.outcomes[4], OpOutcome::Moved { .. }));
            let roots: Vec<_> = commit.forest.iter().map(|n| n.item.key.as_str()).collect();
            assert_eq!(roots, vec!["aside", "section"]);
            assert_eq!(commit.forest[1].children[0].item.documents.content, json!({ "text": "Welcome" }));
        }

        it "cascades deletes only when asked" {
            let token = designer.load(page.id).expect("Failed to load").token;
            let token = designer.apply(page.id, token, vec![
                create("a", None),
                create("b", Some("a")),
            ]).expect("Failed to apply").token;

            let err = designer.apply(page.id, token, vec![DesignerOp::Delete {
                key: "a".to_string(),
                cascade: false,
            }]).unwrap_err();
            assert!(matches!(err, PageError::IntegrityViolation(_)));

            let commit = designer.apply(page.id, token, vec![DesignerOp::Delete {
                key: "a".to_string(),
                cascade: true,
            }]).expect("Failed to apply");
            assert_eq!(commit.outcomes, vec![OpOutcome::Deleted { keys: vec!["a".to_string(), "b".to_string()] }]);
            assert!(commit.forest.is_empty());
        }

        it "rejects a stale token without applying anything" {
            let stale = designer.load(page.id).expect("Failed to load").token;
            db.create_node(page.id, CreateComponentInput::new("block").with_key("sneaky"))
                .expect("Failed to create");

            let err = designer.apply(page.id, stale, vec![create("mine", None)]).unwrap_err();

            assert!(matches!(err, PageError::Conflict(_)));
            assert!(db.get_node(page.id, "mine").expect("Query failed").is_none());
        }

        it "rolls back the whole batch when one op fails" {
            let token = designer.load(page.id).expect("Failed to load").token;

            let err = designer.apply(page.id, token, vec![
                create("a", None),
                create("b", Some("a")),
                DesignerOp::Move {
                    key: "a".to_string(),
                    parent_key: Some("b".to_string()),
                    position: Position::End,
                },
            ]).unwrap_err();

            assert!(matches!(err, PageError::Conflict(_)));
            assert!(db.list_nodes(page.id).expect("Failed to list").is_empty());
            assert_eq!(designer.load(page.id).expect("Failed to load").token, token);
        }

        it "stamps the acting user" {
            let designer = Designer::new(db.acting_as(StaticIdentity::new("grace")));
            let token = designer.load(page.id).expect("Failed to load").token;

            let commit = designer.apply(page.id, token, vec![create("a", None)]).expect("Failed to apply");

            assert_eq!(commit.forest[0].item.created_by, "grace");
            let page = db.get_page(page.id).expect("Query failed").expect("Page missing");
            assert_eq!(page.updated_by, "grace");
        }
    }

    describe "publish and restore" {
        it "publishes under the token and hands back a fresh one" {
            let token = designer.load(page.id).expect("Failed to load").token;
            let token = designer.apply(page.id, token, vec![create("hero", None)])
                .expect("Failed to apply").token;

            let outcome = designer.publish(page.id, token, Some("v1".to_string())).expect("Failed to publish");

            assert!(outcome.version.is_published);
            assert!(outcome.token > token);
            let err = designer.publish(page.id, token, None).unwrap_err();
            assert!(matches!(err, PageError::Conflict(_)));
        }

        it "restores under the token" {
            let token = designer.load(page.id).expect("Failed to load").token;
            let token = designer.apply(page.id, token, vec![create("hero", None)])
                .expect("Failed to apply").token;
            let token = designer.publish(page.id, token, None).expect("Failed to publish").token;
            let token = designer.apply(page.id, token, vec![create("popup", None)])
                .expect("Failed to apply").token;

            let outcome = designer.restore(page.id, token, 1).expect("Failed to restore");

            assert_eq!(outcome.result.version.version_number, 2);
            assert_eq!(outcome.result.report.removed, vec!["popup"]);
            assert_eq!(outcome.token, designer.load(page.id).expect("Failed to load").token);
        }
    }

    describe "sessions" {
        it "edit, conflict, reload and save again" {
            let mut alice = DesignerSession::open(designer.clone(), page.id).expect("Failed to open");
            let mut bob = DesignerSession::open(designer.clone(), page.id).expect("Failed to open");

            alice.stage(create("hero", None));
            alice.save().expect("Failed to save");

            let key = bob.stage(DesignerOp::Create(CreateComponentInput::new("footer")));
            assert_eq!(bob.dirty_keys(), vec![key.clone()]);
            let err = bob.save().unwrap_err();
            assert!(matches!(err, PageError::Conflict(_)));
            assert!(bob.is_dirty());

            bob.reload().expect("Failed to reload");
            assert_eq!(bob.forest().len(), 1);
            bob.save().expect("Failed to save after reload");

            let roots: Vec<_> = bob.forest().iter().map(|n| n.item.key.clone()).collect();
            assert_eq!(roots, vec!["hero".to_string(), key]);
        }

        it "publishes staged work in one step" {
            let mut session = DesignerSession::open(designer.clone(), page.id).expect("Failed to open");
            session.stage(create("hero", None));
            session.stage(create("title", Some("hero")));

            let outcome = session.publish(None).expect("Failed to publish");

            assert_eq!(outcome.version.snapshot.node_count(), 2);
            assert!(!session.is_dirty());
            assert_eq!(session.page().status, PageStatus::Published);
        }

        it "restores a version once nothing is staged" {
            let mut session = DesignerSession::open(designer.clone(), page.id).expect("Failed to open");
            session.stage(create("hero", None));
            session.publish(None).expect("Failed to publish");
            session.stage(create("popup", None));
            session.save().expect("Failed to save");

            session.restore(1).expect("Failed to restore");

            let roots: Vec<_> = session.forest().iter().map(|n| n.item.key.as_str()).collect();
            assert_eq!(roots, vec!["hero"]);
        }
    }
}
