//! Quota ledger integration tests: limits, alerts, overage, reset and
//! invoicing.

mod common;

use common::{TestApp, TEST_ADMIN_TOKEN};
use uuid::Uuid;

async fn alerts_sent(app: &TestApp, customer_id: Uuid) -> Vec<i32> {
    let month = processing_service::models::current_month();
    let period = app
        .db
        .get_period(customer_id, month)
        .await
        .expect("Failed to read period")
        .expect("Period should exist");
    let mut alerts = period.alerts_sent.clone();
    alerts.sort_unstable();
    alerts
}

#[tokio::test]
async fn check_quota_reports_numbers_under_limit() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, Some("folder-quota-1")).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    app.set_usage(customer_id, 40, 100).await;

    let response = app
        .signed_post(
            "/webhooks/check-quota",
            &serde_json::json!({ "folder_id": "folder-quota-1" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["allowed"], true);
    assert_eq!(body["decision"]["current_usage"], 40);
    assert_eq!(body["decision"]["remaining"], 60);
    assert_eq!(body["decision"]["in_overage"], false);

    app.cleanup().await;
}

#[tokio::test]
async fn exhausted_quota_denies_submission_before_any_state() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, Some("folder-quota-2")).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    app.set_usage(customer_id, 100, 100).await;

    // Pre-flight check reports the denial in the body
    let response = app
        .signed_post(
            "/webhooks/check-quota",
            &serde_json::json!({ "folder_id": "folder-quota-2" }),
        )
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["allowed"], false);

    // Submission is a hard 429 and creates no job
    let response = app
        .signed_post(
            "/webhooks/jobs",
            &serde_json::json!({
                "customer_id": customer_id,
                "file_name": "over.pdf",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 429);

    let jobs = app
        .db
        .list_jobs(customer_id, None, 10)
        .await
        .expect("Failed to list jobs");
    assert!(jobs.is_empty());

    app.cleanup().await;
}

#[tokio::test]
async fn suspended_subscription_cannot_submit() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, Some("folder-quota-3")).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    sqlx::query("UPDATE customers SET subscription_status = 'suspended' WHERE customer_id = $1")
        .bind(customer_id)
        .execute(app.db.pool())
        .await
        .unwrap();

    let response = app
        .signed_post(
            "/webhooks/jobs",
            &serde_json::json!({
                "customer_id": customer_id,
                "file_name": "doc.pdf",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 403);

    // And the folder lookup hides the account entirely
    let response = app
        .signed_post(
            "/webhooks/lookup-folder",
            &serde_json::json!({ "folder_id": "folder-quota-3" }),
        )
        .await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["found"], false);

    app.cleanup().await;
}

#[tokio::test]
async fn jump_to_limit_fires_every_threshold_exactly_once() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    // One document short of the limit, no alerts fired yet
    app.set_usage(customer_id, 99, 100).await;

    let job = app.create_job(&customer_id.to_string(), "final.pdf").await;
    app.complete_job(job["job_id"].as_str().unwrap()).await;

    // 99 -> 100 crosses 80, 90 and 100 in one completion
    assert_eq!(alerts_sent(&app, customer_id).await, vec![80, 90, 100]);

    let customer = app
        .db
        .get_customer(customer_id)
        .await
        .unwrap()
        .expect("Customer should exist");
    assert_eq!(customer.current_usage, 100);

    // The next submission is denied
    let response = app
        .signed_post(
            "/webhooks/jobs",
            &serde_json::json!({
                "customer_id": customer_id,
                "file_name": "denied.pdf",
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 429);

    app.cleanup().await;
}

#[tokio::test]
async fn alerts_do_not_repeat_within_a_period() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(10).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    app.set_usage(customer_id, 7, 10).await;

    // 8/10 crosses 80
    let job = app.create_job(&customer_id.to_string(), "a.pdf").await;
    app.complete_job(job["job_id"].as_str().unwrap()).await;
    assert_eq!(alerts_sent(&app, customer_id).await, vec![80]);

    // 9/10 crosses 90; 80 does not fire again
    let job = app.create_job(&customer_id.to_string(), "b.pdf").await;
    app.complete_job(job["job_id"].as_str().unwrap()).await;
    assert_eq!(alerts_sent(&app, customer_id).await, vec![80, 90]);

    app.cleanup().await;
}

#[tokio::test]
async fn overage_customers_keep_processing_and_accrue_charges() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(2).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    app.set_overage_allowed(customer_id, true).await;

    for n in 0..3 {
        let job = app
            .create_job(&customer_id.to_string(), &format!("doc-{}.pdf", n))
            .await;
        app.complete_job(job["job_id"].as_str().unwrap()).await;
    }

    let month = processing_service::models::current_month();
    let period = app
        .db
        .get_period(customer_id, month)
        .await
        .unwrap()
        .expect("Period should exist");

    assert_eq!(period.processed_count, 3);
    assert_eq!(period.overage_count, 1);
    // 1 document over at 0.50 each
    assert_eq!(period.overage_charges.to_string(), "0.50");

    app.cleanup().await;
}

#[tokio::test]
async fn monthly_reset_is_idempotent() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    app.set_usage(customer_id, 50, 100).await;

    let response = app
        .client
        .post(format!("{}/admin/periods/reset", app.address))
        .header("x-admin-token", TEST_ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["reset_count"], 1);

    let customer = app.db.get_customer(customer_id).await.unwrap().unwrap();
    assert_eq!(customer.current_usage, 0);

    // A rerun of the sweep is a no-op and cannot wipe fresh usage
    app.set_usage(customer_id, 3, 100).await;

    let response = app
        .client
        .post(format!("{}/admin/periods/reset", app.address))
        .header("x-admin-token", TEST_ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["reset_count"], 0);

    let customer = app.db.get_customer(customer_id).await.unwrap().unwrap();
    assert_eq!(customer.current_usage, 3);

    app.cleanup().await;
}

#[tokio::test]
async fn reset_requires_admin_token() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .post(format!("{}/admin/periods/reset", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = app
        .client
        .post(format!("{}/admin/periods/reset", app.address))
        .header("x-admin-token", "wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    app.cleanup().await;
}

#[tokio::test]
async fn invoice_freezes_the_period() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(2).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    app.set_overage_allowed(customer_id, true).await;

    for n in 0..3 {
        let job = app
            .create_job(&customer_id.to_string(), &format!("inv-{}.pdf", n))
            .await;
        app.complete_job(job["job_id"].as_str().unwrap()).await;
    }

    let month = processing_service::models::current_month();
    let response = app
        .client
        .post(format!(
            "{}/admin/periods/{}/invoice?month={}",
            app.address, customer_id, month
        ))
        .header("x-admin-token", TEST_ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["invoice_generated"], true);
    assert!(body["invoice_id"].as_str().unwrap().starts_with("INV-"));
    assert_eq!(body["billing_status"], "billed");
    // 49.00 base plus 0.50 overage
    assert_eq!(body["total_charges"], "49.50");

    // Second generation is rejected
    let response = app
        .client
        .post(format!(
            "{}/admin/periods/{}/invoice?month={}",
            app.address, customer_id, month
        ))
        .header("x-admin-token", TEST_ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // Usage after invoicing still moves the customer counter but not the
    // frozen period
    let job = app.create_job(&customer_id.to_string(), "late.pdf").await;
    app.complete_job(job["job_id"].as_str().unwrap()).await;

    let period = app.db.get_period(customer_id, month).await.unwrap().unwrap();
    assert_eq!(period.processed_count, 3);

    let customer = app.db.get_customer(customer_id).await.unwrap().unwrap();
    assert_eq!(customer.current_usage, 4);

    app.cleanup().await;
}

#[tokio::test]
async fn single_customer_reset_honors_the_period_guard() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    app.set_usage(customer_id, 42, 100).await;

    let response = app
        .client
        .post(format!(
            "{}/admin/periods/{}/reset",
            app.address, customer_id
        ))
        .header("x-admin-token", TEST_ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["reset"], true);

    let customer = app.db.get_customer(customer_id).await.unwrap().unwrap();
    assert_eq!(customer.current_usage, 0);

    // Same cycle again: the guard makes it a no-op
    let response = app
        .client
        .post(format!(
            "{}/admin/periods/{}/reset",
            app.address, customer_id
        ))
        .header("x-admin-token", TEST_ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["reset"], false);

    app.cleanup().await;
}

#[tokio::test]
async fn overage_recompute_returns_the_current_numbers() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(2).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    app.set_overage_allowed(customer_id, true).await;

    for n in 0..3 {
        let job = app
            .create_job(&customer_id.to_string(), &format!("doc-{}.pdf", n))
            .await;
        app.complete_job(job["job_id"].as_str().unwrap()).await;
    }

    let response = app
        .client
        .post(format!(
            "{}/admin/periods/{}/recompute",
            app.address, customer_id
        ))
        .header("x-admin-token", TEST_ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["overage_count"], 1);
    assert_eq!(body["overage_charges"], "0.50");

    app.cleanup().await;
}

#[tokio::test]
async fn concurrent_completions_never_lose_an_increment() {
    let app = TestApp::spawn().await;
    let plan = app.create_test_plan(100).await;
    let signup = app.signup_customer(plan.plan_id, None).await;
    let customer_id: Uuid = signup["customer_id"].as_str().unwrap().parse().unwrap();

    let mut job_ids = Vec::new();
    for n in 0..8 {
        let job = app
            .create_job(&customer_id.to_string(), &format!("batch-{}.pdf", n))
            .await;
        let job_id = job["job_id"].as_str().unwrap().to_string();
        let response = app
            .signed_post(
                &format!("/webhooks/jobs/{}/status", job_id),
                &serde_json::json!({ "status": "processing" }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 200);
        job_ids.push(job_id);
    }

    let payload = serde_json::json!({
        "vendor": { "name": "Initech Supplies" },
        "invoice": { "number": "INV-1001" },
        "amounts": { "total": "125.50", "currency": "USD" },
        "confidence_score": 0.93,
    });

    // All eight result posts land at once; every one must count
    let mut handles = Vec::new();
    for job_id in &job_ids {
        let request =
            app.signed_post_request(&format!("/webhooks/jobs/{}/result", job_id), &payload);
        handles.push(tokio::spawn(async move { request.send().await }));
    }
    for handle in handles {
        let response = handle
            .await
            .expect("completion task panicked")
            .expect("completion request failed");
        assert_eq!(response.status().as_u16(), 200);
    }

    let customer = app.db.get_customer(customer_id).await.unwrap().unwrap();
    assert_eq!(customer.current_usage, 8);
    assert_eq!(customer.total_processed, 8);

    let month = processing_service::models::current_month();
    let period = app.db.get_period(customer_id, month).await.unwrap().unwrap();
    assert_eq!(period.processed_count, 8);
    assert_eq!(period.successful_count, 8);

    app.cleanup().await;
}
