//! Gateway integration tests
//!
//! Drive the full router with `oneshot` over the in-memory store, blob store,
//! mock extractor and local identity provider.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use lexdesk_common::{
    auth::LocalIdentityProvider,
    config::{AppConfig, WindowConfig},
    db::models::{DocumentStatus, Role, Subscription},
    extraction::{DocumentExtractionService, MockExtractor},
    ratelimit::create_rate_limiter,
    services::{ServiceSettings, Services},
    storage::create_blob_store,
    store::{MemoryStore, Store},
};
use lexdesk_gateway::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use tower::util::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    state: AppState,
    store: Arc<dyn Store>,
    base_url: String,
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::in_memory();
    config.rate_limit.enabled = false;
    config
}

async fn app_with(config: AppConfig) -> TestApp {
    app_with_extractor(config, MockExtractor::new()).await
}

async fn app_with_extractor(config: AppConfig, extractor: MockExtractor) -> TestApp {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let blobs = create_blob_store(&config.storage).unwrap();
    let extractor: Arc<dyn DocumentExtractionService> = Arc::new(extractor);
    let identity = Arc::new(LocalIdentityProvider::new(store.clone(), "test_secret", 3600, 600));
    let limiter = create_rate_limiter(&config.rate_limit, None).await.unwrap();
    let services = Services::new(
        store.clone(),
        blobs,
        extractor,
        identity,
        ServiceSettings::from_config(&config),
    );

    let base_url = config.storage.public_base_url.trim_end_matches('/').to_string();
    let state = AppState {
        config: Arc::new(config),
        services,
        limiter,
        metrics: None,
    };
    TestApp {
        router: build_router(state.clone()),
        state,
        store,
        base_url,
    }
}

async fn app() -> TestApp {
    app_with(test_config()).await
}

impl TestApp {
    /// Same services and data behind a router with a different request deadline
    fn with_request_timeout(&self, secs: u64) -> TestApp {
        let mut config = (*self.state.config).clone();
        config.server.request_timeout_secs = secs;
        let state = AppState {
            config: Arc::new(config),
            ..self.state.clone()
        };
        TestApp {
            router: build_router(state.clone()),
            state,
            store: self.store.clone(),
            base_url: self.base_url.clone(),
        }
    }

    async fn send_raw(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, _, bytes) = self.send_raw(request).await;
        (status, extract_json(&bytes))
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, token, None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, token, Some(body)).await
    }

    /// Register an account and return `(uid, token)`
    async fn register(&self, email: &str) -> (String, String) {
        let (status, body) = self
            .post(
                "/auth/register",
                None,
                json!({ "email": email, "password": "correct-horse-battery" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["data"]["user"]["id"].as_str().unwrap().to_string(),
            body["data"]["token"].as_str().unwrap().to_string(),
        )
    }

    async fn set_plan(&self, uid: &str, subscription: Subscription, role: Role) {
        let mut user = self.store.get_user(uid).await.unwrap().unwrap();
        user.subscription = subscription;
        user.role = role;
        assert_ok!(self.store.save_user(user).await);
    }

    /// Init, PUT through the signed URL, and confirm. Returns the document id.
    async fn upload(&self, token: &str, file_name: &str, contents: &[u8]) -> String {
        let (status, body) = self
            .post(
                "/documents/upload",
                Some(token),
                json!({
                    "fileName": file_name,
                    "fileSize": contents.len(),
                    "contentType": "text/plain",
                    "tags": ["nda"]
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["data"]["document"]["status"], "uploading");
        let id = body["data"]["documentId"].as_str().unwrap().to_string();

        let url = body["data"]["upload"]["url"].as_str().unwrap();
        let target = url.strip_prefix(&self.base_url).unwrap();
        let request = Request::builder()
            .method(Method::PUT)
            .uri(target)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(contents.to_vec()))
            .unwrap();
        let (status, _, _) = self.send_raw(request).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = self
            .post(&format!("/documents/{}/upload-complete", id), Some(token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["status"], "uploaded");
        id
    }

    async fn document_status(&self, id: &str) -> DocumentStatus {
        let id = Uuid::parse_str(id).unwrap();
        self.store.get_document(id).await.unwrap().unwrap().status
    }
}

fn extract_json(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

fn assert_error(body: &Value, code: &str) {
    assert_eq!(body["success"], false, "{body}");
    assert_eq!(body["error"]["code"], code, "{body}");
    assert!(body["error"]["message"].is_string());
}

#[tokio::test]
async fn test_health_uses_envelope() {
    let app = app().await;
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");

    let (status, body) = app.get("/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["checks"]["store"]["backend"], "memory");
}

#[tokio::test]
async fn test_timed_out_processing_uses_envelope_and_still_finishes() {
    let app = app_with_extractor(test_config(), MockExtractor::slow(Duration::from_millis(1500))).await;
    let (_, token) = app.register("slow@example.com").await;
    let id = app.upload(&token, "slow.txt", b"The parties agree.").await;

    let impatient = app.with_request_timeout(1);
    let (status, body) = impatient
        .post("/process/document", Some(&token), json!({ "documentId": id }))
        .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_error(&body, "REQUEST_TIMEOUT");
    assert_eq!(body["error"]["details"]["timeoutSecs"], 1);

    let mut current = app.document_status(&id).await;
    for _ in 0..50 {
        if current != DocumentStatus::Processing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        current = app.document_status(&id).await;
    }
    assert_eq!(current, DocumentStatus::Processed);

    let (status, body) = app.get(&format!("/documents/{}/analysis", id), Some(&token)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn test_unknown_route_not_found() {
    let app = app().await;
    let (status, body) = app.get("/nope/nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "ROUTE_NOT_FOUND");
}

#[tokio::test]
async fn test_missing_and_bad_tokens() {
    let app = app().await;
    let (status, body) = app.get("/documents", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error(&body, "UNAUTHORIZED");

    let (status, body) = app.get("/documents", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error(&body, "INVALID_TOKEN");
}

#[tokio::test]
async fn test_malformed_json_is_validation_error() {
    let app = app().await;
    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"email\": "))
        .unwrap();
    let (status, _, bytes) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&extract_json(&bytes), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_register_login_and_verify() {
    let app = app().await;
    let (uid, _) = app.register("dana@example.com").await;

    let (status, body) = app
        .post(
            "/auth/login",
            None,
            json!({ "email": "dana@example.com", "password": "wrong-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error(&body, "INVALID_CREDENTIALS");

    let (status, body) = app
        .post(
            "/auth/login",
            None,
            json!({ "email": "dana@example.com", "password": "correct-horse-battery" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["data"]["token"].as_str().unwrap().to_string();

    let (status, body) = app.post("/auth/verify-token", None, json!({ "token": token })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], true);
    assert_eq!(body["data"]["user"]["id"], uid.as_str());
    assert_eq!(body["data"]["user"]["subscription"], "free");
}

#[tokio::test]
async fn test_upload_process_ask_happy_path() {
    let app = app().await;
    let (_, token) = app.register("owner@example.com").await;
    let id = app
        .upload(&token, "contract.txt", b"The supplier accepts unlimited liability. Payment is due in 30 days.")
        .await;

    // Asking before processing fails
    let (status, body) = app
        .post("/qa/ask", Some(&token), json!({ "documentId": id, "question": "What is the payment term?" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "DOCUMENT_NOT_PROCESSED");

    let (status, body) = app
        .post("/process/document", Some(&token), json!({ "documentId": id, "options": { "extractText": true } }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["document"]["status"], "processed");
    let analysis_id = body["data"]["analysis"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["document"]["analysis"]["analysisId"], analysis_id.as_str());
    assert_eq!(body["data"]["analysis"]["documentId"], id.as_str());

    let (status, body) = app.get(&format!("/documents/{}/analysis", id), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], analysis_id.as_str());

    let (status, body) = app
        .post("/qa/ask", Some(&token), json!({ "documentId": id, "question": "What is the payment term?" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["isFollowUp"], false);
    let conversation_id = body["data"]["conversationId"].as_str().unwrap().to_string();

    let (status, body) = app
        .post(
            "/qa/follow-up",
            Some(&token),
            json!({ "conversationId": conversation_id, "question": "And late fees?" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["isFollowUp"], true);
    assert_eq!(body["data"]["documentId"], id.as_str());

    let (status, body) = app
        .get(&format!("/qa/conversations/{}", conversation_id), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sessions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_processing_document_blocks_questions() {
    let app = app().await;
    let (_, token) = app.register("busy@example.com").await;
    let id = app.upload(&token, "contract.txt", b"Terms").await;

    let doc_id = Uuid::parse_str(&id).unwrap();
    app.store
        .update_document_if(
            doc_id,
            Some(&[DocumentStatus::Uploaded]),
            Box::new(|doc| doc.status = DocumentStatus::Processing),
        )
        .await
        .unwrap();

    let (status, body) = app
        .post("/qa/ask", Some(&token), json!({ "documentId": id, "question": "Anything?" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "DOCUMENT_NOT_PROCESSED");
    assert_eq!(body["error"]["details"]["currentStatus"], "processing");
}

#[tokio::test]
async fn test_failed_extraction_marks_error() {
    let app = app().await;
    let (_, token) = app.register("unlucky@example.com").await;
    let id = app.upload(&token, "will-fail.txt", b"Terms").await;

    let (status, body) = app
        .post("/process/document", Some(&token), json!({ "documentId": id }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_error(&body, "PROCESSING_FAILED");
    assert_eq!(app.document_status(&id).await, DocumentStatus::Error);

    let (status, body) = app.get(&format!("/process/status/{}", id), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "error");
    assert!(body["data"]["processing"]["error"]
        .as_str()
        .unwrap()
        .contains("Mock extraction failed"));
}

#[tokio::test]
async fn test_ownership_isolation() {
    let app = app().await;
    let (_, alice) = app.register("alice@example.com").await;
    let (_, bob) = app.register("bob@example.com").await;
    let id = app.upload(&alice, "secret-merger.txt", b"Confidential").await;

    for uri in [
        format!("/documents/{}", id),
        format!("/documents/{}/download", id),
        format!("/documents/{}/status", id),
    ] {
        let (status, body) = app.get(&uri, Some(&bob)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_error(&body, "ACCESS_DENIED");
        assert!(!body.to_string().contains("secret-merger"));
        assert!(body.get("data").is_none());
    }

    let (status, _) = app.call(Method::DELETE, &format!("/documents/{}", id), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let doc = app
        .store
        .get_document(Uuid::parse_str(&id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.views, 0);

    let (status, body) = app.get(&format!("/documents/{}", id), Some(&alice)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["views"], 1);
}

#[tokio::test]
async fn test_public_documents_are_readable_anonymously() {
    let app = app().await;
    let (_, token) = app.register("publisher@example.com").await;
    let id = app.upload(&token, "template.txt", b"Standard terms").await;

    let (status, _) = app.get(&format!("/documents/{}", id), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(Method::PUT, &format!("/documents/{}", id), Some(&token), Some(json!({ "isPublic": true })))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app.get(&format!("/documents/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isPublic"], true);

    let (status, body) = app.get(&format!("/documents/{}/download", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let url = body["data"]["download"]["url"].as_str().unwrap();
    let target = url.strip_prefix(&app.base_url).unwrap();
    let request = Request::builder().uri(target).body(Body::empty()).unwrap();
    let (status, _, bytes) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"Standard terms");
}

#[tokio::test]
async fn test_tampered_signature_rejected() {
    let app = app().await;
    let (_, token) = app.register("signer@example.com").await;
    let id = app.upload(&token, "deed.txt", b"Deed").await;

    let (_, body) = app.get(&format!("/documents/{}/download", id), Some(&token)).await;
    let url = body["data"]["download"]["url"].as_str().unwrap();
    let target = url.strip_prefix(&app.base_url).unwrap();

    // A download URL cannot be used to upload
    let put = target.replace("method=GET", "method=PUT");
    let request = Request::builder()
        .method(Method::PUT)
        .uri(put)
        .body(Body::from("overwrite"))
        .unwrap();
    let (status, _, bytes) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_error(&extract_json(&bytes), "INVALID_SIGNATURE");

    let tampered = format!("{}0", target);
    let request = Request::builder().uri(tampered).body(Body::empty()).unwrap();
    let (status, _, _) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_free_plan_cannot_reanalyze_or_batch() {
    let app = app().await;
    let (_, token) = app.register("free@example.com").await;
    let id = app.upload(&token, "contract.txt", b"Terms").await;
    let (status, _) = app
        .post("/process/document", Some(&token), json!({ "documentId": id }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .post("/process/reanalyze", Some(&token), json!({ "documentId": id }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_error(&body, "SUBSCRIPTION_REQUIRED");
    assert_eq!(body["error"]["details"]["currentPlan"], "free");
    assert_eq!(app.document_status(&id).await, DocumentStatus::Processed);

    let other = app.upload(&token, "second.txt", b"More terms").await;
    let (status, body) = app
        .post("/process/batch", Some(&token), json!({ "documentIds": [other] }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_error(&body, "SUBSCRIPTION_REQUIRED");
    assert_eq!(body["error"]["details"]["currentPlan"], "free");
    assert_eq!(app.document_status(&other).await, DocumentStatus::Uploaded);

    let (status, body) = app
        .post("/analyze/risk-assessment", Some(&token), json!({ "documentId": id }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_error(&body, "SUBSCRIPTION_REQUIRED");
}

#[tokio::test]
async fn test_premium_reanalysis_links_previous() {
    let app = app().await;
    let (uid, token) = app.register("premium@example.com").await;
    app.set_plan(&uid, Subscription::Premium, Role::User).await;
    let id = app.upload(&token, "contract.txt", b"Unlimited liability applies.").await;

    let (_, first) = app
        .post("/process/document", Some(&token), json!({ "documentId": id }))
        .await;
    let first_id = first["data"]["analysis"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post("/process/reanalyze", Some(&token), json!({ "documentId": id }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["analysis"]["type"], "reanalysis");
    assert_eq!(body["data"]["analysis"]["previousAnalysisId"], first_id.as_str());

    let (_, body) = app.get(&format!("/documents/{}/analyses", id), Some(&token)).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = app
        .post("/analyze/risk-assessment", Some(&token), json!({ "documentId": id }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["totalRisks"], 1);
}

#[tokio::test]
async fn test_oversized_free_upload_rejected() {
    let app = app().await;
    let (_, token) = app.register("big@example.com").await;

    let (status, body) = app
        .post(
            "/documents/upload",
            Some(&token),
            json!({ "fileName": "huge.pdf", "fileSize": 10_000_000, "contentType": "application/pdf" }),
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_error(&body, "FILE_TOO_LARGE");
    assert_eq!(body["error"]["details"]["maxSize"], 5_242_880);
    assert_eq!(body["error"]["details"]["currentPlan"], "free");

    let (_, body) = app.get("/documents", Some(&token)).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_unsupported_content_type_rejected() {
    let app = app().await;
    let (_, token) = app.register("image@example.com").await;
    let (status, body) = app
        .post(
            "/documents/upload",
            Some(&token),
            json!({ "fileName": "photo.png", "fileSize": 100, "contentType": "image/png" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "UNSUPPORTED_FILE_TYPE");
}

#[tokio::test]
async fn test_list_documents_shape_and_filters() {
    let app = app().await;
    let (_, token) = app.register("lister@example.com").await;
    app.upload(&token, "alpha-lease.txt", b"Lease").await;
    app.upload(&token, "beta-nda.txt", b"NDA").await;

    let (status, body) = app.get("/documents?limit=1", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["documents"].as_array().unwrap().len(), 1);
    assert_eq!(data["total"], 2);
    assert_eq!(data["limit"], 1);
    assert_eq!(data["offset"], 0);
    assert_eq!(data["hasMore"], true);

    let (_, body) = app.get("/documents?search=LEASE", Some(&token)).await;
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["documents"][0]["fileName"], "alpha-lease.txt");

    let (_, body) = app.get("/documents?status=processed", Some(&token)).await;
    assert_eq!(body["data"]["total"], 0);

    let (status, body) = app.get("/documents?status=bogus", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_batch_with_foreign_document_rejected() {
    let app = app().await;
    let (uid, token) = app.register("enterprise@example.com").await;
    app.set_plan(&uid, Subscription::Enterprise, Role::User).await;
    let (_, other) = app.register("other@example.com").await;

    let first = app.upload(&token, "one.txt", b"One").await;
    let second = app.upload(&token, "two.txt", b"Two").await;
    let foreign = app.upload(&other, "theirs.txt", b"Theirs").await;

    let (status, body) = app
        .post(
            "/process/batch",
            Some(&token),
            json!({ "documentIds": [first, foreign, second] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error(&body, "INVALID_DOCUMENTS");
    assert_eq!(body["error"]["details"]["invalidDocumentIds"], json!([foreign]));

    for id in [&first, &second, &foreign] {
        assert_eq!(app.document_status(id).await, DocumentStatus::Uploaded);
    }
}

#[tokio::test]
async fn test_batch_runs_to_partial() {
    let app = app().await;
    let (uid, token) = app.register("bulk@example.com").await;
    app.set_plan(&uid, Subscription::Enterprise, Role::User).await;

    let good = app.upload(&token, "good.txt", b"Fine").await;
    let bad = app.upload(&token, "fail-me.txt", b"Broken").await;

    let (status, body) = app
        .post("/process/batch", Some(&token), json!({ "documentIds": [good, bad, good] }))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    assert_eq!(body["data"]["progress"]["total"], 2);
    let batch_id = body["data"]["id"].as_str().unwrap().to_string();

    let mut last = Value::Null;
    for _ in 0..100 {
        let (status, body) = app.get(&format!("/process/batch/{}", batch_id), Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        last = body["data"].clone();
        if last["completedAt"].is_string() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last["status"], "partial", "{last}");
    assert_eq!(last["progress"]["completed"], 1);
    assert_eq!(last["progress"]["failed"], 1);
    assert_eq!(app.document_status(&good).await, DocumentStatus::Processed);
    assert_eq!(app.document_status(&bad).await, DocumentStatus::Error);

    // Owner only
    let (_, stranger) = app.register("stranger@example.com").await;
    let (status, _) = app.get(&format!("/process/batch/{}", batch_id), Some(&stranger)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_delete_cascades() {
    let app = app().await;
    let (_, token) = app.register("cleanup@example.com").await;
    let id = app.upload(&token, "contract.txt", b"Terms").await;
    app.post("/process/document", Some(&token), json!({ "documentId": id }))
        .await;
    let (_, session) = app
        .post("/qa/ask", Some(&token), json!({ "documentId": id, "question": "Term?" }))
        .await;
    let conversation_id = session["data"]["conversationId"].as_str().unwrap().to_string();

    let (status, body) = app.call(Method::DELETE, &format!("/documents/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app.get(&format!("/documents/{}", id), Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error(&body, "DOCUMENT_NOT_FOUND");

    let doc_id = Uuid::parse_str(&id).unwrap();
    assert!(app.store.list_analyses(doc_id).await.unwrap().is_empty());
    assert!(app
        .store
        .list_conversation(Uuid::parse_str(&conversation_id).unwrap())
        .await
        .unwrap()
        .is_empty());

    // Second delete is a clean not-found
    let (status, _) = app.call(Method::DELETE, &format!("/documents/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_routes_require_admin() {
    let app = app().await;
    let (_, user) = app.register("regular@example.com").await;
    let (admin_uid, admin) = app.register("root@example.com").await;
    app.set_plan(&admin_uid, Subscription::Free, Role::Admin).await;

    let (status, body) = app.get("/admin/stats", Some(&user)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_error(&body, "ACCESS_DENIED");

    let (status, body) = app.get("/admin/stats", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["users"]["total"], 2);
    assert_eq!(body["data"]["users"]["admins"], 1);

    let (status, body) = app.get("/admin/analytics?period=day", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["newUsers"], 2);

    let (status, body) = app
        .post("/admin/broadcast", Some(&admin), json!({ "title": "Maintenance", "message": "Tonight" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["recipients"], 2);

    let (_, body) = app.get("/users/notifications", Some(&user)).await;
    assert_eq!(body["data"][0]["title"], "Maintenance");
}

#[tokio::test]
async fn test_admin_disables_user() {
    let app = app().await;
    let (uid, user) = app.register("suspended@example.com").await;
    let (admin_uid, admin) = app.register("boss@example.com").await;
    app.set_plan(&admin_uid, Subscription::Free, Role::Admin).await;

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/admin/users/{}", uid),
            Some(&admin),
            Some(json!({ "isActive": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["isActive"], false);

    let (status, body) = app.get("/users/profile", Some(&user)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_error(&body, "ACCOUNT_DISABLED");
}

#[tokio::test]
async fn test_account_deletion_removes_everything() {
    let app = app().await;
    let (uid, token) = app.register("leaving@example.com").await;
    let id = app.upload(&token, "contract.txt", b"Terms").await;

    let (status, _) = app.call(Method::DELETE, "/users/account", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    assert!(app.store.get_user(&uid).await.unwrap().is_none());
    assert!(app
        .store
        .get_document(Uuid::parse_str(&id).unwrap())
        .await
        .unwrap()
        .is_none());

    let (status, _) = app.get("/users/profile", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_routes_rate_limited() {
    let mut config = AppConfig::in_memory();
    config.rate_limit.enabled = true;
    config.rate_limit.auth = WindowConfig { window_secs: 60, max: 2 };
    let app = app_with(config).await;

    let login = json!({ "email": "nobody@example.com", "password": "whatever-password" });
    for _ in 0..2 {
        let (status, _) = app.post("/auth/login", None, login.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(login.to_string()))
        .unwrap();
    let (status, headers, bytes) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_error(&extract_json(&bytes), "RATE_LIMIT_EXCEEDED");
    assert!(headers.contains_key("retry-after"));
    assert_eq!(headers["x-ratelimit-remaining"], "0");

    // Health probes are never limited
    let (status, _) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
}
