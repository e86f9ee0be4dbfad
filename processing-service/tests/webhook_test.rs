//! Webhook trust boundary tests: signature enforcement and the folder
//! lookup contract.

mod common;

use chrono::Utc;
use common::{TestApp, TEST_WORKFLOW_SECRET};
use service_core::utils::signature::generate_signature;

#[tokio::test]
async fn unsigned_webhook_requests_are_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/webhooks/lookup-folder", app.address))
        .json(&serde_json::json!({ "folder_id": "folder-x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn tampered_body_fails_verification() {
    let app = TestApp::spawn().await;

    let signed_body = serde_json::json!({ "folder_id": "folder-x" }).to_string();
    let timestamp = Utc::now().timestamp();
    let signature = generate_signature(
        TEST_WORKFLOW_SECRET,
        "POST",
        "/webhooks/lookup-folder",
        timestamp,
        &signed_body,
    )
    .unwrap();

    // Send a different body than the one that was signed
    let response = app
        .client
        .post(format!("{}/webhooks/lookup-folder", app.address))
        .header("content-type", "application/json")
        .header("x-client-id", common::TEST_WORKFLOW_CLIENT)
        .header("x-timestamp", timestamp.to_string())
        .header("x-signature", signature)
        .body(serde_json::json!({ "folder_id": "folder-y" }).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn stale_timestamps_are_rejected() {
    let app = TestApp::spawn().await;

    let body = serde_json::json!({ "folder_id": "folder-x" }).to_string();
    let timestamp = Utc::now().timestamp() - 300;
    let signature = generate_signature(
        TEST_WORKFLOW_SECRET,
        "POST",
        "/webhooks/lookup-folder",
        timestamp,
        &body,
    )
    .unwrap();

    let response = app
        .client
        .post(format!("{}/webhooks/lookup-folder", app.address))
        .header("content-type", "application/json")
        .header("x-client-id", common::TEST_WORKFLOW_CLIENT)
        .header("x-timestamp", timestamp.to_string())
        .header("x-signature", signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn unknown_client_id_is_rejected() {
    let app = TestApp::spawn().await;

    let body = serde_json::json!({ "folder_id": "folder-x" }).to_string();
    let timestamp = Utc::now().timestamp();
    let signature = generate_signature(
        TEST_WORKFLOW_SECRET,
        "POST",
        "/webhooks/lookup-folder",
        timestamp,
        &body,
    )
    .unwrap();

    let response = app
        .client
        .post(format!("{}/webhooks/lookup-folder", app.address))
        .header("content-type", "application/json")
        .header("x-client-id", "some-other-client")
        .header("x-timestamp", timestamp.to_string())
        .header("x-signature", signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn folder_lookup_resolves_active_customers() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, Some("drive-abc")).await;

    let response = app
        .signed_post(
            "/webhooks/lookup-folder",
            &serde_json::json!({ "folder_id": "drive-abc" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["found"], true);
    assert_eq!(body["customer_id"], signup["customer_id"]);
    assert_eq!(body["usage_limit"], 100);

    // Unknown folder
    let response = app
        .signed_post(
            "/webhooks/lookup-folder",
            &serde_json::json!({ "folder_id": "drive-unknown" }),
        )
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["found"], false);
    assert!(body.get("customer_id").is_none());

    app.cleanup().await;
}

#[tokio::test]
async fn malformed_result_payload_is_a_bad_request() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id = signup["customer_id"].as_str().unwrap();

    let job = app.create_job(customer_id, "doc.pdf").await;
    let job_id = job["job_id"].as_str().unwrap();

    let response = app
        .signed_post(
            &format!("/webhooks/jobs/{}/status", job_id),
            &serde_json::json!({ "status": "processing" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    // vendor must be an object, not a string
    let response = app
        .signed_post(
            &format!("/webhooks/jobs/{}/result", job_id),
            &serde_json::json!({ "vendor": "not-an-object" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    // A minimal payload with missing sections is still acceptable
    let response = app
        .signed_post(
            &format!("/webhooks/jobs/{}/result", job_id),
            &serde_json::json!({}),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    app.cleanup().await;
}

#[tokio::test]
async fn status_endpoint_only_accepts_engine_transitions() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id = signup["customer_id"].as_str().unwrap();

    let job = app.create_job(customer_id, "doc.pdf").await;
    let job_id = job["job_id"].as_str().unwrap();

    // Completion, requeueing and retry have their own endpoints
    for status in ["completed", "queued", "retry"] {
        let response = app
            .signed_post(
                &format!("/webhooks/jobs/{}/status", job_id),
                &serde_json::json!({ "status": status }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 400, "status {} should be refused", status);
    }

    let response = app
        .signed_post(
            &format!("/webhooks/jobs/{}/status", job_id),
            &serde_json::json!({ "status": "reticulating" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);

    // The job is untouched by the refused updates
    let response = app
        .signed_post(
            &format!("/webhooks/jobs/{}/status", job_id),
            &serde_json::json!({ "status": "processing" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    app.cleanup().await;
}
