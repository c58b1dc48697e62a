mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use receipt_backend::extraction::SimulatedExtractor;
use receipt_backend::workflow::JobOutcome;
use receipt_backend::ExtractionWorkflow;
use serde_json::json;

use common::{spawn_app, spawn_app_without_extraction};

#[tokio::test]
async fn test_upload_create_and_extract() {
    let app = spawn_app().await;
    let file_id = app.upload_pdf("alice").await;

    let (status, receipt) = app.create_receipt("alice", &file_id).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["status"], "processing");
    assert_eq!(receipt["fileId"], file_id.as_str());
    let receipt_id = receipt["id"].as_str().unwrap().to_string();

    let done = app.wait_for_status("alice", &receipt_id).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["merchant"], "Sample Store");
    assert_eq!(done["total"], 42.99);
    assert_eq!(done["items"].as_array().unwrap().len(), 2);

    let token = app.token("alice");
    let (status, list) = app.request(Method::GET, "/api/receipts?limit=5", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, stats) = app.request(Method::GET, "/api/receipts/stats", Some(&token), None).await;
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["thisMonth"], 1);
    assert_eq!(stats["thisWeek"], 1);

    let (_, usage) = app.request(Method::GET, "/api/users/me/usage", Some(&token), None).await;
    assert_eq!(usage["receiptsUploaded"], 1);
}

#[tokio::test]
async fn test_free_tier_receipt_quota() {
    let app = spawn_app_without_extraction().await;

    let mut files = Vec::new();
    for _ in 0..11 {
        files.push(app.upload_pdf("bob").await);
    }

    for file_id in &files[..10] {
        let (status, _) = app.create_receipt("bob", file_id).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app.create_receipt("bob", &files[10]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["type"], "quota_exceeded");

    // Issuing upload URLs is gated by the same quota
    let token = app.token("bob");
    let (status, _) = app.request(Method::POST, "/api/files/upload-url", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, usage) = app.request(Method::GET, "/api/users/me/usage", Some(&token), None).await;
    assert_eq!(usage["receiptsUploaded"], 10);
}

#[tokio::test]
async fn test_receipts_of_other_users_are_hidden() {
    let app = spawn_app_without_extraction().await;
    let file_id = app.upload_pdf("alice").await;
    let (_, receipt) = app.create_receipt("alice", &file_id).await;
    let uri = format!("/api/receipts/{}", receipt["id"].as_str().unwrap());

    let mallory = app.token("mallory");
    let (status, _) = app.request(Method::GET, &uri, Some(&mallory), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(Method::PATCH, &uri, Some(&mallory), Some(json!({"merchant": "Evil"})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.request(Method::DELETE, &uri, Some(&mallory), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(Method::GET, &format!("/api/files/{}", file_id), Some(&mallory), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.create_receipt("mallory", &file_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_url_is_single_use() {
    let app = spawn_app_without_extraction().await;
    let token = app.token("carol");

    let (status, issued) = app.request(Method::POST, "/api/files/upload-url", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let upload_url = issued["uploadUrl"].as_str().unwrap().to_string();
    assert!(upload_url.starts_with("http://localhost:8080/api/uploads/"));

    let (status, first) = app
        .raw_upload(&upload_url, "image/png", Bytes::from_static(b"\x89PNG fake"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .raw_upload(&upload_url, "image/png", Bytes::from_static(b"\x89PNG other"))
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["error"]["type"], "upload_url_unavailable");

    let (status, _) = app
        .raw_upload("/api/uploads/not-a-real-token", "image/png", Bytes::from_static(b"x"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let file_id = first["storageId"].as_str().unwrap();
    let (status, file) = app
        .request(Method::GET, &format!("/api/files/{}", file_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(file["contentType"], "image/png");
    assert_eq!(
        file["url"],
        format!("http://localhost:8080/api/files/{}/content", file_id).as_str()
    );

    let (status, _) = app
        .request(Method::DELETE, &format!("/api/files/{}", file_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .request(Method::GET, &format!("/api/files/{}", file_id), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ai_summary_requires_pro_plan() {
    let app = spawn_app_without_extraction().await;
    let file_id = app.upload_pdf("dave").await;
    let (_, receipt) = app.create_receipt("dave", &file_id).await;
    let uri = format!("/api/receipts/{}", receipt["id"].as_str().unwrap());
    let token = app.token("dave");

    let (status, body) = app
        .request(Method::PATCH, &uri, Some(&token), Some(json!({"aiSummary": "Lunch"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["type"], "plan_restricted");

    let admin = app.admin_token("root");
    let (status, user) = app
        .request(
            Method::PUT,
            "/admin/users/dave/plan",
            Some(&admin),
            Some(json!({
                "planTier": "PRO",
                "subscriptionId": "sub_123",
                "customerId": "cus_456",
                "billingPeriodStart": "2024-03-01",
                "billingPeriodEnd": "2024-03-31"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["planTier"], "pro");
    assert_eq!(user["quota"]["aiSummaries"], 50);
    assert_eq!(user["subscriptionId"], "sub_123");
    assert_eq!(user["customerId"], "cus_456");

    let (_, plan) = app.request(Method::GET, "/api/users/me/plan", Some(&token), None).await;
    assert_eq!(plan["billingPeriodStart"], "2024-03-01");
    assert_eq!(plan["billingPeriodEnd"], "2024-03-31");

    let (status, patched) = app
        .request(Method::PATCH, &uri, Some(&token), Some(json!({"aiSummary": "Lunch"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["aiSummary"], "Lunch");

    let (_, usage) = app.request(Method::GET, "/api/users/me/usage", Some(&token), None).await;
    assert_eq!(usage["aiSummariesGenerated"], 1);
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let app = spawn_app_without_extraction().await;
    let body = json!({"planTier": "starter"});

    let (status, _) = app
        .request(Method::PUT, "/admin/users/erin/plan", None, Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let user = app.token("erin");
    let (status, _) = app
        .request(Method::PUT, "/admin/users/erin/plan", Some(&user), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.admin_token("root");
    let (status, _) = app
        .request(Method::PUT, "/admin/users/erin/plan", Some(&admin), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(Method::POST, "/admin/users", Some(&admin), Some(json!({"id": "erin"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .request(Method::PUT, "/admin/users/erin/plan", Some(&admin), Some(json!({"planTier": "gold"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(Method::PUT, "/admin/users/erin/plan", Some(&admin), Some(body))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, plan) = app.request(Method::GET, "/api/users/me/plan", Some(&user), None).await;
    assert_eq!(plan["planTier"], "starter");
    assert_eq!(plan["quota"]["receipts"], 50);
}

#[tokio::test]
async fn test_user_registration() {
    let app = spawn_app_without_extraction().await;
    let token = app.token("frank");

    let (_, exists) = app.request(Method::GET, "/api/users/me/exists", Some(&token), None).await;
    assert_eq!(exists["exists"], false);

    let (_, plan) = app.request(Method::GET, "/api/users/me/plan", Some(&token), None).await;
    assert_eq!(plan["planTier"], "free");

    let (status, user) = app
        .request(Method::POST, "/api/users", Some(&token), Some(json!({"name": "Frank"})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(user["email"], "frank@example.com");
    assert_eq!(user["name"], "Frank");

    let (status, body) = app.request(Method::POST, "/api/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "already_exists");

    let (_, exists) = app.request(Method::GET, "/api/users/me/exists", Some(&token), None).await;
    assert_eq!(exists["exists"], true);
}

#[tokio::test]
async fn test_edit_during_extraction_survives() {
    let app = spawn_app_without_extraction().await;
    let file_id = app.upload_pdf("hana").await;
    let (_, receipt) = app.create_receipt("hana", &file_id).await;
    let receipt_id = receipt["id"].as_str().unwrap().to_string();
    let uri = format!("/api/receipts/{}", receipt_id);
    let token = app.token("hana");

    let (status, edited) = app
        .request(Method::PATCH, &uri, Some(&token), Some(json!({"merchant": "Typed by hand"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["status"], "manual_edit");

    let workflow = ExtractionWorkflow::new(
        app.state.store.clone(),
        app.state.files.clone(),
        Arc::new(SimulatedExtractor::new(Duration::ZERO)),
        app.state.signals.clone(),
        Duration::from_secs(5),
    );
    assert_eq!(workflow.run(&receipt_id).await.unwrap(), JobOutcome::Retired);

    let (_, stored) = app.request(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(stored["merchant"], "Typed by hand");
    assert_eq!(stored["status"], "manual_edit");
}

#[tokio::test]
async fn test_users_cannot_set_workflow_statuses() {
    let app = spawn_app_without_extraction().await;
    let file_id = app.upload_pdf("ivan").await;
    let (_, receipt) = app.create_receipt("ivan", &file_id).await;
    let uri = format!("/api/receipts/{}", receipt["id"].as_str().unwrap());
    let token = app.token("ivan");

    for status in ["completed", "failed"] {
        let (code, body) = app
            .request(Method::PATCH, &uri, Some(&token), Some(json!({"status": status, "total": 1.0})))
            .await;
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(body["error"]["type"], "invalid_transition");
    }

    let (_, stored) = app.request(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(stored["status"], "processing");
}

#[tokio::test]
async fn test_manual_edit_and_delete() {
    let app = spawn_app_without_extraction().await;
    let file_id = app.upload_pdf("gina").await;
    let (_, receipt) = app.create_receipt("gina", &file_id).await;
    let uri = format!("/api/receipts/{}", receipt["id"].as_str().unwrap());
    let token = app.token("gina");

    let (status, edited) = app
        .request(
            Method::PATCH,
            &uri,
            Some(&token),
            Some(json!({"merchant": "Corner Cafe", "date": "2024-02-10", "total": 7.5, "status": "manual_edit"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["status"], "manual_edit");
    assert_eq!(edited["merchant"], "Corner Cafe");

    let (status, body) = app
        .request(Method::PATCH, &uri, Some(&token), Some(json!({"status": "completed"})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "invalid_transition");

    let (status, summary) = app
        .request(
            Method::GET,
            "/api/receipts/summary?startDate=2024-02-01&endDate=2024-02-29",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total"], 7.5);
    assert_eq!(summary["byCategory"][0]["name"], "Uncategorized");

    let (status, _) = app.request(Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.request(Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Deleting does not give the quota unit back
    let (_, usage) = app.request(Method::GET, "/api/users/me/usage", Some(&token), None).await;
    assert_eq!(usage["receiptsUploaded"], 1);
}

#[tokio::test]
async fn test_summary_requires_valid_dates() {
    let app = spawn_app_without_extraction().await;
    let token = app.token("hank");

    let (status, _) = app
        .request(Method::GET, "/api/receipts/summary?endDate=2024-02-29", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::GET,
            "/api/receipts/summary?startDate=yesterday&endDate=2024-02-29",
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_publish_event() {
    let app = spawn_app_without_extraction().await;
    let file_id = app.upload_pdf("ivy").await;
    let (_, receipt) = app.create_receipt("ivy", &file_id).await;
    let receipt_id = receipt["id"].as_str().unwrap();
    let token = app.token("ivy");

    let (status, body) = app
        .request(Method::POST, "/api/events", Some(&token), Some(json!({"eventName": "receipt/error"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Missing required fields: eventName and eventData");

    let mut events = app.state.signals.subscribe();
    let (status, body) = app
        .request(
            Method::POST,
            "/api/events",
            Some(&token),
            Some(json!({
                "eventName": "receipt/extraction-failed",
                "eventData": {"userId": "ivy", "receiptId": receipt_id, "errorMessage": "blurry"}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let signal = events.recv().await.unwrap();
    assert_eq!(signal.name(), "receipt/error");
    assert_eq!(signal.receipt_id(), receipt_id);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/events",
            Some(&token),
            Some(json!({
                "eventName": "receipt/error",
                "eventData": {"userId": "someone-else", "receiptId": receipt_id, "errorMessage": "x"}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
