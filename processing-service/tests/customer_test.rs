//! Customer signup and self-service endpoint tests.

mod common;

use common::TestApp;
use uuid::Uuid;

#[tokio::test]
async fn signup_returns_credentials_once() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;

    let signup = app.signup_customer(plan.plan_id, None).await;

    assert_eq!(signup["subscription_status"], "trial");
    assert_eq!(signup["usage_limit"], 100);
    assert_eq!(signup["api_key"].as_str().unwrap().len(), 32);
    assert_eq!(signup["webhook_secret"].as_str().unwrap().len(), 16);
    assert!(signup["trial_end_date"].is_string());

    // The dashboard must never echo the credentials back
    let api_key = signup["api_key"].as_str().unwrap();
    let response = app
        .client
        .get(format!("{}/api/customers/me/dashboard", app.address))
        .header("x-api-key", api_key)
        .send()
        .await
        .expect("Failed to execute request");
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["customer"].get("api_key").is_none());
    assert!(body["customer"].get("webhook_secret").is_none());

    app.cleanup().await;
}

#[tokio::test]
async fn signup_rejects_duplicate_email() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;

    let payload = serde_json::json!({
        "customer_name": "Acme",
        "email": "dup@example.com",
        "plan_id": plan.plan_id,
    });

    let first = app
        .client
        .post(format!("{}/api/customers", app.address))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);

    let second = app
        .client
        .post(format!("{}/api/customers", app.address))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);

    app.cleanup().await;
}

#[tokio::test]
async fn signup_rejects_unknown_plan_and_bad_email() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;

    let response = app
        .client
        .post(format!("{}/api/customers", app.address))
        .json(&serde_json::json!({
            "customer_name": "Acme",
            "email": "a@example.com",
            "plan_id": Uuid::new_v4(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = app
        .client
        .post(format!("{}/api/customers", app.address))
        .json(&serde_json::json!({
            "customer_name": "Acme",
            "email": "not-an-email",
            "plan_id": plan.plan_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);

    app.cleanup().await;
}

#[tokio::test]
async fn api_key_is_required_and_validated() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/api/customers/me/stats", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = app
        .client
        .get(format!("{}/api/customers/me/stats", app.address))
        .header("x-api-key", "0000000000000000000000000000000v")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn customers_cannot_see_each_others_jobs() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;

    let alice = app.signup_customer(plan.plan_id, None).await;
    let bob = app.signup_customer(plan.plan_id, None).await;

    // Create a job for Alice through the webhook path
    let response = app
        .signed_post(
            "/webhooks/jobs",
            &serde_json::json!({
                "customer_id": alice["customer_id"],
                "file_name": "invoice.pdf",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let job: serde_json::Value = response.json().await.unwrap();
    let job_id = job["job_id"].as_str().unwrap();

    // Bob gets a 403, not the job
    let response = app
        .client
        .get(format!("{}/api/jobs/{}", app.address, job_id))
        .header("x-api-key", bob["api_key"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    // Alice can read it
    let response = app
        .client
        .get(format!("{}/api/jobs/{}", app.address, job_id))
        .header("x-api-key", alice["api_key"].as_str().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    app.cleanup().await;
}

#[tokio::test]
async fn profile_update_only_touches_whitelisted_fields() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let api_key = signup["api_key"].as_str().unwrap();

    let response = app
        .client
        .patch(format!("{}/api/customers/me/profile", app.address))
        .header("x-api-key", api_key)
        .json(&serde_json::json!({
            "customer_name": "Renamed Inc",
            "phone": "+1 555 0100",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["customer_name"], "Renamed Inc");
    assert_eq!(body["phone"], "+1 555 0100");
    // Company untouched by a partial update
    assert!(body["company"].is_null());
    assert_eq!(body["email"], signup["email"]);

    app.cleanup().await;
}

#[tokio::test]
async fn plans_created_through_the_admin_api_are_usable() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/admin/plans", app.address))
        .header("x-admin-token", common::TEST_ADMIN_TOKEN)
        .json(&serde_json::json!({
            "plan_code": format!("starter-{}", Uuid::new_v4()),
            "name": "Starter",
            "monthly_price": "29.00",
            "annual_price": null,
            "processing_limit": 50,
            "overage_rate": "0.25",
            "trial_days": 14,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);

    let plan: serde_json::Value = response.json().await.unwrap();
    let plan_id: Uuid = plan["plan_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(plan["processing_limit"], 50);

    // Invalid pricing is refused
    let response = app
        .client
        .post(format!("{}/admin/plans", app.address))
        .header("x-admin-token", common::TEST_ADMIN_TOKEN)
        .json(&serde_json::json!({
            "plan_code": format!("free-{}", Uuid::new_v4()),
            "name": "Free",
            "monthly_price": "0.00",
            "annual_price": null,
            "processing_limit": 10,
            "overage_rate": null,
            "trial_days": 0,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // A customer can sign up against the new plan
    let signup = app.signup_customer(plan_id, None).await;
    assert_eq!(signup["usage_limit"], 50);

    app.cleanup().await;
}
