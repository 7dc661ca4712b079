mod common;

use axum::http::StatusCode;
use common::{Actor, TestApp};
use diesel::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

async fn create_approved_document(app: &TestApp, actor: &Actor) -> Uuid {
    let response = app
        .post_json(
            "/api/documents",
            &json!({ "title": "Code of Conduct", "doc_type": "policy" }),
            actor,
        )
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    let document_id: Uuid = body["id"].as_str().unwrap().parse().unwrap();

    app.with_conn(move |conn| {
        use docgov::schema::documents;
        diesel::update(documents::table.find(document_id))
            .set(documents::status.eq("approved"))
            .execute(conn)?;
        Ok(())
    })
    .await
    .expect("force approve");

    document_id
}

#[tokio::test]
async fn custom_audience_gets_one_assignment_per_user() {
    let _guard = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await.expect("setup") else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };

    let actor = Actor::new(Uuid::new_v4());
    let document_id = create_approved_document(&app, &actor).await;
    let readers: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    // A duplicated id in the list must not produce a second assignment.
    let mut audience = readers.clone();
    audience.push(readers[0]);

    let response = app
        .post_json(
            &format!("/api/documents/{document_id}/ack-campaigns"),
            &json!({
                "title": "Annual re-acknowledgment",
                "audience_type": "custom",
                "audience_ids": audience,
            }),
            &actor,
        )
        .await
        .expect("create campaign");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    assert_eq!(body["campaign"]["status"], "active");
    assert_eq!(body["assignments"].as_array().unwrap().len(), 3);
    for assignment in body["assignments"].as_array().unwrap() {
        assert_eq!(assignment["status"], "pending");
    }

    for reader in &readers {
        let notifications = app.notifications_for(*reader).await.expect("notifications");
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, "ack.requested");
    }
}

#[tokio::test]
async fn all_audience_resolves_active_tenant_users() {
    let _guard = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await.expect("setup") else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };

    let tenant_id = Uuid::new_v4();
    let actor = Actor::new(tenant_id);
    let document_id = create_approved_document(&app, &actor).await;

    for i in 0..5 {
        app.insert_user(tenant_id, &format!("user{i}@example.com"), true)
            .await
            .expect("insert user");
    }
    app.insert_user(tenant_id, "inactive@example.com", false)
        .await
        .expect("insert user");
    app.insert_user(Uuid::new_v4(), "other-tenant@example.com", true)
        .await
        .expect("insert user");

    let response = app
        .post_json(
            &format!("/api/documents/{document_id}/ack-campaigns"),
            &json!({ "title": "Everyone must read this", "audience_type": "all" }),
            &actor,
        )
        .await
        .expect("create campaign");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    assert_eq!(body["assignments"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn campaign_preconditions_are_enforced() {
    let _guard = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await.expect("setup") else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };

    let actor = Actor::new(Uuid::new_v4());

    // Draft document: no campaign.
    let response = app
        .post_json(
            "/api/documents",
            &json!({ "title": "Draft Policy", "doc_type": "policy" }),
            &actor,
        )
        .await
        .expect("create");
    let body: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    let draft_id = body["id"].as_str().unwrap();
    let response = app
        .post_json(
            &format!("/api/documents/{draft_id}/ack-campaigns"),
            &json!({
                "title": "Too early",
                "audience_type": "custom",
                "audience_ids": [Uuid::new_v4()],
            }),
            &actor,
        )
        .await
        .expect("create campaign");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let document_id = create_approved_document(&app, &actor).await;

    // Role and department resolution is not available.
    let response = app
        .post_json(
            &format!("/api/documents/{document_id}/ack-campaigns"),
            &json!({
                "title": "By role",
                "audience_type": "role",
                "audience_ids": [Uuid::new_v4()],
            }),
            &actor,
        )
        .await
        .expect("create campaign");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Empty custom audience is rejected.
    let response = app
        .post_json(
            &format!("/api/documents/{document_id}/ack-campaigns"),
            &json!({ "title": "Nobody", "audience_type": "custom", "audience_ids": [] }),
            &actor,
        )
        .await
        .expect("create campaign");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn acknowledging_all_assignments_completes_the_campaign() {
    let _guard = common::acquire_db_lock().await;
    let Some(app) = TestApp::new().await.expect("setup") else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return;
    };

    let tenant_id = Uuid::new_v4();
    let actor = Actor::new(tenant_id);
    let reader_one = Actor::new(tenant_id);
    let reader_two = Actor::new(tenant_id);
    let document_id = create_approved_document(&app, &actor).await;

    let response = app
        .post_json(
            &format!("/api/documents/{document_id}/ack-campaigns"),
            &json!({
                "title": "Read and confirm",
                "audience_type": "custom",
                "audience_ids": [reader_one.user_id, reader_two.user_id],
            }),
            &actor,
        )
        .await
        .expect("create campaign");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    let campaign_id = body["campaign"]["id"].as_str().unwrap().to_string();

    // Each reader sees their own pending assignment.
    let response = app.get("/api/ack/assignments", &reader_one).await.expect("list");
    let mine: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 1);
    let assignment_id = mine[0]["id"].as_str().unwrap().to_string();

    // Nobody else can acknowledge on a reader's behalf.
    let response = app
        .post_json(
            &format!("/api/ack/assignments/{assignment_id}/acknowledge"),
            &json!({}),
            &reader_two,
        )
        .await
        .expect("acknowledge");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &format!("/api/ack/assignments/{assignment_id}/acknowledge"),
            &json!({ "quiz_score": 90, "quiz_passed": true }),
            &reader_one,
        )
        .await
        .expect("acknowledge");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    assert_eq!(body["status"], "acknowledged");
    assert_eq!(body["quiz_passed"], true);

    // Acknowledging twice is a conflict.
    let response = app
        .post_json(
            &format!("/api/ack/assignments/{assignment_id}/acknowledge"),
            &json!({}),
            &reader_one,
        )
        .await
        .expect("acknowledge");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The second reader closes out the campaign.
    let response = app.get("/api/ack/assignments", &reader_two).await.expect("list");
    let mine: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    let assignment_id = mine.as_array().unwrap()[0]["id"].as_str().unwrap().to_string();
    let response = app
        .post_json(
            &format!("/api/ack/assignments/{assignment_id}/acknowledge"),
            &json!({}),
            &reader_two,
        )
        .await
        .expect("acknowledge");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .get(&format!("/api/documents/{document_id}/ack-campaigns"), &actor)
        .await
        .expect("list campaigns");
    let campaigns: Value = serde_json::from_slice(
        &common::body_to_vec(response.into_body()).await.expect("body"),
    )
    .expect("json");
    let campaigns = campaigns.as_array().unwrap();
    assert_eq!(campaigns.len(), 1);
    assert_eq!(campaigns[0]["id"].as_str().unwrap(), campaign_id);
    assert_eq!(campaigns[0]["status"], "completed");
}
