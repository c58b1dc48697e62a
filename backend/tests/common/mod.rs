#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use bytes::Bytes;
use http::{Method, Request, StatusCode};
use receipt_backend::auth::JwksClient;
use receipt_backend::test_util::{generate_test_jwt, test_config, test_jwks, TEST_AUDIENCE, TEST_ISSUER_PATH};
use receipt_backend::{routes, AppState};
use receipt_common::ReceiptUploaded;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct TestApp {
    pub app: Router,
    pub state: Arc<AppState>,
    pub issuer: String,
    _server: MockServer,
    _dir: TempDir,
    _dispatcher: Option<JoinHandle<()>>,
    _idle_triggers: Option<mpsc::Receiver<ReceiptUploaded>>,
}

async fn mock_issuer() -> (MockServer, String) {
    let server = MockServer::start().await;
    let issuer = format!("{}{}", server.uri(), TEST_ISSUER_PATH);

    Mock::given(method("GET"))
        .and(path(format!("{}/.well-known/openid-configuration", TEST_ISSUER_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jwks_uri": format!("{}/jwks.json", server.uri()),
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(test_jwks()))
        .mount(&server)
        .await;

    (server, issuer)
}

async fn build(with_dispatcher: bool) -> TestApp {
    let (server, issuer) = mock_issuer().await;
    let dir = TempDir::new().unwrap();

    let mut config = test_config(dir.path());
    config.oidc.issuer = issuer.clone();

    let jwks_client = JwksClient::new(&issuer, Some(TEST_AUDIENCE)).await.unwrap();
    let (state, triggers) = AppState::new(config, jwks_client).unwrap();
    let state = Arc::new(state);

    let (dispatcher, idle_triggers) = if with_dispatcher {
        (Some(state.spawn_extraction(triggers).unwrap()), None)
    } else {
        (None, Some(triggers))
    };

    TestApp {
        app: routes::router(state.clone()),
        state,
        issuer,
        _server: server,
        _dir: dir,
        _dispatcher: dispatcher,
        _idle_triggers: idle_triggers,
    }
}

/// App with the extraction dispatcher running.
pub async fn spawn_app() -> TestApp {
    build(true).await
}

/// App without background extraction; receipts stay `processing`.
pub async fn spawn_app_without_extraction() -> TestApp {
    build(false).await
}

impl TestApp {
    pub fn token(&self, user_id: &str) -> String {
        generate_test_jwt(&self.issuer, user_id, Some(&format!("{}@example.com", user_id)), vec![])
    }

    pub fn admin_token(&self, user_id: &str) -> String {
        generate_test_jwt(&self.issuer, user_id, None, vec!["admin"])
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self.app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn raw_upload(&self, upload_url: &str, content_type: &str, bytes: Bytes) -> (StatusCode, Value) {
        // Upload URLs are absolute; route on the path part
        let path = upload_url
            .find("/api/uploads/")
            .map(|i| &upload_url[i..])
            .unwrap();
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("Content-Type", content_type)
            .body(Body::from(bytes))
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Issue an upload URL for `user_id` and post a small PDF to it.
    pub async fn upload_pdf(&self, user_id: &str) -> String {
        let token = self.token(user_id);
        let (status, issued) = self
            .request(Method::POST, "/api/files/upload-url", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK, "upload-url failed: {}", issued);

        let upload_url = issued["uploadUrl"].as_str().unwrap().to_string();
        let (status, stored) = self
            .raw_upload(&upload_url, "application/pdf", Bytes::from_static(b"%PDF-1.4 test receipt"))
            .await;
        assert_eq!(status, StatusCode::OK);
        stored["storageId"].as_str().unwrap().to_string()
    }

    pub async fn create_receipt(&self, user_id: &str, file_id: &str) -> (StatusCode, Value) {
        let token = self.token(user_id);
        self.request(
            Method::POST,
            "/api/receipts",
            Some(&token),
            Some(json!({"fileId": file_id, "fileName": "receipt.pdf"})),
        )
        .await
    }

    /// Poll a receipt until it leaves `processing`.
    pub async fn wait_for_status(&self, user_id: &str, receipt_id: &str) -> Value {
        let token = self.token(user_id);
        let uri = format!("/api/receipts/{}", receipt_id);
        for _ in 0..100 {
            let (status, receipt) = self.request(Method::GET, &uri, Some(&token), None).await;
            assert_eq!(status, StatusCode::OK);
            if receipt["status"] != "processing" {
                return receipt;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("receipt {} still processing", receipt_id);
    }
}
