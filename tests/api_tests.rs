use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use interview_coach::ai::{AiError, AudioClip, ChatCompletion, PromptMessage, SpeechToText};
use interview_coach::auth::create_jwt;
use interview_coach::billing::{signature_header, BillingError, BillingProvider};
use interview_coach::config::Config;
use interview_coach::rest::{create_router, AppState};
use interview_coach::storage::{Storage, SubscriptionUpdate};
use interview_coach::usage::{TierLimits, UsageLimits};

const ACCESS_SECRET: &str = "test-access-secret";
const WEBHOOK_SECRET: &str = "whsec_test";
const PASSWORD: &str = "password123";
const REPLY: &str = "1. Why this role?\n2. Describe a conflict you resolved.";

struct StubSpeech {
    calls: AtomicUsize,
}

#[async_trait]
impl SpeechToText for StubSpeech {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("I would start by listening to the customer.".to_string())
    }
}

struct StubLlm {
    fail: AtomicBool,
    /// (user id, recording id) deleted while the reply is being produced.
    delete_during_reply: Mutex<Option<(Storage, String, String)>>,
}

#[async_trait]
impl ChatCompletion for StubLlm {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, AiError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AiError::RateLimited);
        }
        if let Some((storage, user_id, recording_id)) = self.delete_during_reply.lock().unwrap().take() {
            storage.delete_recording(&user_id, &recording_id).unwrap();
        }
        assert!(!messages.is_empty());
        Ok(REPLY.to_string())
    }
}

struct StubBilling;

#[async_trait]
impl BillingProvider for StubBilling {
    async fn customer_email(&self, customer_id: &str) -> Result<Option<String>, BillingError> {
        Ok(match customer_id {
            "cus_pro" => Some("Pro@Example.com".to_string()),
            _ => None,
        })
    }

    async fn ensure_customer(&self, _email: &str, _user_id: &str) -> Result<String, BillingError> {
        Ok("cus_created".to_string())
    }
}

struct TestApp {
    router: Router,
    storage: Storage,
    speech: Arc<StubSpeech>,
    llm: Arc<StubLlm>,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestApp {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(configure: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::new(ACCESS_SECRET, "test-refresh-secret");
        config.bcrypt_cost = 4;
        config.stripe.webhook_secret = Some(WEBHOOK_SECRET.to_string());
        configure(&mut config);

        let storage = Storage::temporary().unwrap();
        let speech = Arc::new(StubSpeech {
            calls: AtomicUsize::new(0),
        });
        let llm = Arc::new(StubLlm {
            fail: AtomicBool::new(false),
            delete_during_reply: Mutex::new(None),
        });
        let state = Arc::new(AppState {
            config,
            storage: storage.clone(),
            speech: speech.clone(),
            llm: llm.clone(),
            billing: Arc::new(StubBilling),
        });
        Self {
            router: create_router(state),
            storage,
            speech,
            llm,
        }
    }

    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> Reply {
        let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: &str) -> Reply {
        self.send(
            Request::get(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn delete(&self, uri: &str, token: &str) -> Reply {
        self.send(
            Request::delete(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Registers and logs in; returns the access token.
    async fn sign_up(&self, email: &str) -> String {
        let registered = self
            .post_json(
                "/auth/register",
                None,
                json!({ "email": email, "password": PASSWORD }),
            )
            .await;
        assert_eq!(registered.status, StatusCode::CREATED);
        self.login(email).await.body["accessToken"]
            .as_str()
            .unwrap()
            .to_string()
    }

    async fn login(&self, email: &str) -> Reply {
        self.post_json(
            "/auth/login",
            None,
            json!({ "email": email, "password": PASSWORD }),
        )
        .await
    }

    fn user_id(&self, email: &str) -> String {
        self.storage.find_user_by_email(email).unwrap().unwrap().id
    }

    fn make_premium(&self, email: &str) {
        let update = SubscriptionUpdate {
            status: "active".to_string(),
            current_period_end: None,
            cancel_at_period_end: false,
        };
        self.storage
            .apply_subscription(&self.user_id(email), &update)
            .unwrap();
    }

    async fn transcribe(&self, token: &str) -> Reply {
        self.send(upload(token, "audio/wav", b"RIFF....WAVEfmt ", Some("Tell me about yourself")))
            .await
    }

    /// Uploads an answer and returns the new recording id.
    async fn record(&self, token: &str) -> String {
        let reply = self.transcribe(token).await;
        assert_eq!(reply.status, StatusCode::OK, "{:?}", reply.body);
        reply.body["_id"].as_str().unwrap().to_string()
    }
}

fn upload(token: &str, mime: &str, audio: &[u8], question: Option<&str>) -> Request<Body> {
    let boundary = "coach-test-boundary";
    let mut body = Vec::new();
    if let Some(question) = question {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"question\"\r\n\r\n{question}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"industry\"\r\n\r\nRetail\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"answer.wav\"\r\nContent-Type: {mime}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(audio);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::post("/api/transcribe")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let app = TestApp::new();
    app.sign_up("dup@example.com").await;

    let again = app
        .post_json(
            "/auth/register",
            None,
            json!({ "email": "Dup@Example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(again.status, StatusCode::BAD_REQUEST);
    assert_eq!(again.body["message"], "User already exists");
}

#[tokio::test]
async fn registration_validates_input() {
    let app = TestApp::new();
    let short = app
        .post_json(
            "/auth/register",
            None,
            json!({ "email": "a@example.com", "password": "123" }),
        )
        .await;
    assert_eq!(short.status, StatusCode::BAD_REQUEST);

    let no_at = app
        .post_json(
            "/auth/register",
            None,
            json!({ "email": "nobody", "password": PASSWORD }),
        )
        .await;
    assert_eq!(no_at.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_json_bodies_get_json_errors() {
    let app = TestApp::new();

    let missing_field = app
        .post_json("/auth/register", None, json!({ "email": "a@b.com" }))
        .await;
    assert_eq!(missing_field.status, StatusCode::BAD_REQUEST);
    assert!(missing_field.body["message"]
        .as_str()
        .unwrap()
        .contains("password"));

    let broken = app
        .send(
            Request::post("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"email\":"))
                .unwrap(),
        )
        .await;
    assert_eq!(broken.status, StatusCode::BAD_REQUEST);
    assert!(broken.body["message"].is_string());

    let plain_text = app
        .send(
            Request::post("/auth/register")
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Body::from("email=a@b.com"))
                .unwrap(),
        )
        .await;
    assert_eq!(plain_text.status, StatusCode::BAD_REQUEST);
    assert!(plain_text.body["message"].is_string());
}

#[tokio::test]
async fn login_issues_tokens_and_cookie() {
    let app = TestApp::new();
    app.sign_up("login@example.com").await;

    let reply = app.login("login@example.com").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body["accessToken"].is_string());
    assert!(reply.body["refreshToken"].is_string());
    let cookie = reply.headers[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("refreshToken="));
    assert!(cookie.contains("HttpOnly"));

    let wrong = app
        .post_json(
            "/auth/login",
            None,
            json!({ "email": "login@example.com", "password": "wrong-password" }),
        )
        .await;
    assert_eq!(wrong.status, StatusCode::BAD_REQUEST);
    assert_eq!(wrong.body["message"], "Invalid credentials");
}

#[tokio::test]
async fn token_checks() {
    let app = TestApp::new();
    let token = app.sign_up("tokens@example.com").await;
    let user_id = app.user_id("tokens@example.com");

    let valid = app.get("/auth/check", &token).await;
    assert_eq!(valid.status, StatusCode::OK);
    assert_eq!(valid.body["message"], "Token is valid");
    assert_eq!(valid.body["user"]["email"], "tokens@example.com");
    assert!(valid.body["user"].get("passwordHash").is_none());

    let missing = app
        .send(Request::get("/auth/check").body(Body::empty()).unwrap())
        .await;
    assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

    let expired = create_jwt(&user_id, ACCESS_SECRET.as_bytes(), -10).unwrap();
    assert_eq!(
        app.get("/auth/check", &expired).await.status,
        StatusCode::FORBIDDEN
    );

    let forged = create_jwt(&user_id, b"some-other-secret", 600).unwrap();
    assert_eq!(
        app.get("/auth/check", &forged).await.status,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        app.get("/auth/check", "not.a.token").await.status,
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn refresh_via_cookie_yields_working_access_token() {
    let app = TestApp::new();
    app.sign_up("refresh@example.com").await;
    let login = app.login("refresh@example.com").await;
    let set_cookie = login.headers[header::SET_COOKIE].to_str().unwrap();
    let pair = set_cookie.split(';').next().unwrap().to_string();

    let refreshed = app
        .send(
            Request::post("/auth/refresh-token")
                .header(header::COOKIE, pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(refreshed.status, StatusCode::OK);
    let access = refreshed.body["accessToken"].as_str().unwrap();
    assert_eq!(app.get("/auth/check", access).await.status, StatusCode::OK);

    let without = app
        .send(Request::post("/auth/refresh-token").body(Body::empty()).unwrap())
        .await;
    assert_eq!(without.status, StatusCode::UNAUTHORIZED);

    // An access token is not a refresh token
    let wrong_kind = app
        .post_json(
            "/auth/refresh-token",
            None,
            json!({ "refreshToken": access }),
        )
        .await;
    assert_eq!(wrong_kind.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_clears_cookie() {
    let app = TestApp::new();
    let reply = app
        .send(Request::post("/auth/logout").body(Body::empty()).unwrap())
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    let cookie = reply.headers[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn email_verification() {
    let app = TestApp::new();
    let token = app.sign_up("verify@example.com").await;
    let verification = app
        .storage
        .find_user_by_email("verify@example.com")
        .unwrap()
        .unwrap()
        .verification_token
        .unwrap();

    let unknown = app
        .send(
            Request::get("/auth/verify-email?token=nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::BAD_REQUEST);

    let verified = app
        .send(
            Request::get(format!("/auth/verify-email?token={verification}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(verified.status, StatusCode::OK);

    let profile = app.get("/api/profile", &token).await;
    assert_eq!(profile.body["isVerified"], true);
}

#[tokio::test]
async fn free_user_is_blocked_after_audio_limit() {
    let app = TestApp::new();
    let token = app.sign_up("free@example.com").await;

    for _ in 0..3 {
        app.record(&token).await;
    }
    let fourth = app.transcribe(&token).await;
    assert_eq!(fourth.status, StatusCode::FORBIDDEN);
    assert_eq!(fourth.body["requiresUpgrade"], true);
    // Rejected before reaching speech-to-text
    assert_eq!(app.speech.calls.load(Ordering::SeqCst), 3);

    let status = app.get("/api/check-audio-limit", &token).await;
    assert_eq!(status.body["allowed"], false);
    assert_eq!(status.body["used"], 3);
    assert_eq!(status.body["remaining"], 0);

    let recordings = app.get("/api/recordings", &token).await;
    assert_eq!(recordings.body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn premium_user_is_never_blocked() {
    let app = TestApp::new();
    let token = app.sign_up("premium@example.com").await;
    app.make_premium("premium@example.com");

    for _ in 0..5 {
        app.record(&token).await;
    }
    let status = app.get("/api/check-audio-limit", &token).await;
    assert_eq!(status.body["allowed"], true);
    assert_eq!(status.body["limit"], Value::Null);
}

#[tokio::test]
async fn upload_validation() {
    let app = TestApp::with(|config| config.max_upload_bytes = 64);
    let token = app.sign_up("upload@example.com").await;

    let wrong_type = app
        .send(upload(&token, "text/plain", b"hello", Some("Q")))
        .await;
    assert_eq!(wrong_type.status, StatusCode::BAD_REQUEST);

    let no_question = app
        .send(upload(&token, "audio/mpeg", b"ID3", None))
        .await;
    assert_eq!(no_question.status, StatusCode::BAD_REQUEST);

    let too_big = app
        .send(upload(&token, "audio/wav", &[0u8; 128], Some("Q")))
        .await;
    assert_eq!(too_big.status, StatusCode::PAYLOAD_TOO_LARGE);

    // Nothing was counted
    let status = app.get("/api/check-audio-limit", &token).await;
    assert_eq!(status.body["used"], 0);
}

#[tokio::test]
async fn recording_reads_and_audio() {
    let app = TestApp::new();
    let token = app.sign_up("reads@example.com").await;
    let id = app.record(&token).await;

    let recording = app.get(&format!("/api/recordings/{id}"), &token).await;
    assert_eq!(recording.status, StatusCode::OK);
    assert_eq!(recording.body["question"], "Tell me about yourself");
    assert_eq!(recording.body["industry"], "Retail");
    assert_eq!(recording.body["audio"]["mimeType"], "audio/wav");

    let audio = app
        .router
        .clone()
        .oneshot(
            Request::get(format!("/api/recordings/{id}/audio"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(audio.status(), StatusCode::OK);
    assert_eq!(audio.headers()[header::CONTENT_TYPE], "audio/wav");
    let bytes = axum::body::to_bytes(audio.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"RIFF....WAVEfmt ");

    // Other users cannot see it
    let other = app.sign_up("other@example.com").await;
    let hidden = app.get(&format!("/api/recordings/{id}"), &other).await;
    assert_eq!(hidden.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_recording_cascades() {
    let app = TestApp::new();
    let token = app.sign_up("cascade@example.com").await;
    let id = app.record(&token).await;

    let chat = app
        .post_json(
            "/api/chat",
            Some(&token),
            json!({ "recordingId": id, "input": "How can I improve?" }),
        )
        .await;
    assert_eq!(chat.status, StatusCode::OK);
    assert!(app.storage.get_chat(&id).unwrap().is_some());

    let other = app.sign_up("intruder@example.com").await;
    assert_eq!(
        app.delete(&format!("/api/recordings/{id}"), &other).await.status,
        StatusCode::NOT_FOUND
    );

    let deleted = app.delete(&format!("/api/recordings/{id}"), &token).await;
    assert_eq!(deleted.status, StatusCode::OK);

    assert!(app.storage.get_chat(&id).unwrap().is_none());
    assert!(app.storage.get_audio(&id).unwrap().is_none());
    assert_eq!(
        app.get(&format!("/api/sessions/{id}"), &token).await.status,
        StatusCode::NOT_FOUND
    );
    let profile = app.get("/api/profile", &token).await;
    assert_eq!(profile.body["recordings"], json!([]));
}

#[tokio::test]
async fn chat_counts_down_and_stops_at_limit() {
    let app = TestApp::with(|config| config.limits.free.chat_messages = Some(2));
    let token = app.sign_up("chat@example.com").await;
    let id = app.record(&token).await;

    let first = app
        .post_json(
            "/api/chat",
            Some(&token),
            json!({ "recordingId": id, "input": "Was my answer too long?" }),
        )
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body["remainingMessages"], 1);
    assert_eq!(first.body["messages"].as_array().unwrap().len(), 2);
    assert_eq!(first.body["messages"][0]["user"], "user");
    assert_eq!(first.body["messages"][1]["user"], "bot");

    let second = app
        .post_json(
            "/api/chat",
            Some(&token),
            json!({ "recordingId": id, "input": "What should I cut?" }),
        )
        .await;
    assert_eq!(second.body["remainingMessages"], 0);
    assert_eq!(second.body["messages"].as_array().unwrap().len(), 4);

    let third = app
        .post_json(
            "/api/chat",
            Some(&token),
            json!({ "recordingId": id, "input": "One more?" }),
        )
        .await;
    assert_eq!(third.status, StatusCode::FORBIDDEN);
    assert_eq!(third.body["requiresUpgrade"], true);

    let session = app.get(&format!("/api/sessions/{id}"), &token).await;
    assert_eq!(session.body["messages"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn chat_validates_input_and_ownership() {
    let app = TestApp::new();
    let token = app.sign_up("chatval@example.com").await;
    let id = app.record(&token).await;

    let empty = app
        .post_json(
            "/api/chat",
            Some(&token),
            json!({ "recordingId": id, "input": "   " }),
        )
        .await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);

    let unknown = app
        .post_json(
            "/api/chat",
            Some(&token),
            json!({ "recordingId": "missing", "input": "hi" }),
        )
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let status = app.get("/api/check-chat-limit", &token).await;
    assert_eq!(status.body["used"], 0);
}

#[tokio::test]
async fn failed_completion_is_not_counted() {
    let app = TestApp::new();
    let token = app.sign_up("refund@example.com").await;
    let id = app.record(&token).await;

    app.llm.fail.store(true, Ordering::SeqCst);
    let reply = app
        .post_json(
            "/api/chat",
            Some(&token),
            json!({ "recordingId": id, "input": "Hello?" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);

    let user = app
        .storage
        .find_user_by_email("refund@example.com")
        .unwrap()
        .unwrap();
    assert_eq!(user.total_chat_messages_count, 0);
    assert!(app.storage.get_chat(&id).unwrap().is_none());
}

#[tokio::test]
async fn chat_on_recording_deleted_mid_reply_is_not_counted() {
    let app = TestApp::new();
    let token = app.sign_up("vanish@example.com").await;
    let id = app.record(&token).await;

    *app.llm.delete_during_reply.lock().unwrap() = Some((
        app.storage.clone(),
        app.user_id("vanish@example.com"),
        id.clone(),
    ));
    let reply = app
        .post_json(
            "/api/chat",
            Some(&token),
            json!({ "recordingId": id, "input": "Are you still there?" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body["message"], "Recording not found");

    assert!(app.storage.get_chat(&id).unwrap().is_none());
    let status = app.get("/api/check-chat-limit", &token).await;
    assert_eq!(status.body["used"], 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_chat_requests_respect_limit() {
    let app = TestApp::with(|config| {
        config.limits = UsageLimits {
            free: TierLimits {
                audio_submissions: Some(3),
                chat_messages: Some(3),
            },
            premium: TierLimits::UNBOUNDED,
        }
    });
    let token = app.sign_up("race@example.com").await;
    let id = app.record(&token).await;

    let handles = (0..12).map(|i| {
        let router = app.router.clone();
        let body = json!({ "recordingId": id, "input": format!("question {i}") }).to_string();
        let request = Request::post("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(body))
            .unwrap();
        tokio::spawn(router.oneshot(request))
    });
    let statuses: Vec<StatusCode> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().status())
        .collect();

    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let blocked = statuses
        .iter()
        .filter(|s| **s == StatusCode::FORBIDDEN)
        .count();
    assert_eq!(ok, 3);
    assert_eq!(blocked, 9);

    let user = app
        .storage
        .find_user_by_email("race@example.com")
        .unwrap()
        .unwrap();
    assert_eq!(user.total_chat_messages_count, 3);
    assert_eq!(app.storage.get_chat(&id).unwrap().unwrap().messages.len(), 6);
}

#[tokio::test]
async fn generate_questions() {
    let app = TestApp::new();
    let token = app.sign_up("questions@example.com").await;

    let reply = app
        .post_json(
            "/api/generate-questions",
            Some(&token),
            json!({ "jobDescription": "Store manager for a retail chain" }),
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.body["questions"],
        json!(["Why this role?", "Describe a conflict you resolved."])
    );

    let empty = app
        .post_json(
            "/api/generate-questions",
            Some(&token),
            json!({ "jobDescription": "" }),
        )
        .await;
    assert_eq!(empty.status, StatusCode::BAD_REQUEST);
}

fn webhook_request(payload: &str, signature: &str) -> Request<Body> {
    Request::post("/stripe/stripe-webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("Stripe-Signature", signature)
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn subscription_event(customer: &str, status: &str) -> String {
    json!({
        "id": "evt_test",
        "type": "customer.subscription.updated",
        "data": { "object": {
            "customer": customer,
            "status": status,
            "current_period_end": 1_900_000_000,
            "cancel_at_period_end": false
        }}
    })
    .to_string()
}

#[tokio::test]
async fn webhook_makes_subscriber_premium() {
    let app = TestApp::new();
    let token = app.sign_up("pro@example.com").await;

    let payload = subscription_event("cus_pro", "active");
    let now = chrono::Utc::now().timestamp();
    let signature = signature_header(payload.as_bytes(), WEBHOOK_SECRET, now);
    let reply = app.send(webhook_request(&payload, &signature)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["received"], true);

    let profile = app.get("/api/profile", &token).await;
    assert_eq!(profile.body["isPremium"], true);
    assert_eq!(profile.body["subscriptionStatus"], "active");

    // Cancellation comes through the stored customer link
    let payload = subscription_event("cus_pro", "canceled");
    let signature = signature_header(payload.as_bytes(), WEBHOOK_SECRET, now);
    app.send(webhook_request(&payload, &signature)).await;
    let profile = app.get("/api/profile", &token).await;
    assert_eq!(profile.body["isPremium"], false);
}

#[tokio::test]
async fn webhook_rejects_bad_signature() {
    let app = TestApp::new();
    let token = app.sign_up("pro@example.com").await;

    let payload = subscription_event("cus_pro", "active");
    let now = chrono::Utc::now().timestamp();
    let signature = signature_header(payload.as_bytes(), "whsec_wrong", now);
    let reply = app.send(webhook_request(&payload, &signature)).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.body["message"]
        .as_str()
        .unwrap()
        .starts_with("Webhook Error"));

    let unsigned = app
        .send(
            Request::post("/stripe/stripe-webhook")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await;
    assert_eq!(unsigned.status, StatusCode::BAD_REQUEST);

    let profile = app.get("/api/profile", &token).await;
    assert_eq!(profile.body["isPremium"], false);
}

#[tokio::test]
async fn create_customer_links_user() {
    let app = TestApp::new();
    let token = app.sign_up("customer@example.com").await;

    let reply = app
        .post_json("/stripe/create-stripe-customer", Some(&token), json!({}))
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["stripeCustomerId"], "cus_created");

    let linked = app.storage.find_user_by_customer("cus_created").unwrap();
    assert_eq!(linked.unwrap().email, "customer@example.com");
}

#[tokio::test]
async fn notes_crud() {
    let app = TestApp::new();
    let token = app.sign_up("notes@example.com").await;

    let created = app
        .post_json(
            "/api/notes",
            Some(&token),
            json!({ "title": "STAR", "content": "Situation, Task, Action, Result" }),
        )
        .await;
    assert_eq!(created.status, StatusCode::CREATED);
    let id = created.body["note"]["_id"].as_str().unwrap().to_string();

    let invalid = app
        .post_json("/api/notes", Some(&token), json!({ "title": "" }))
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);

    let updated = app
        .send(
            Request::put(format!("/api/notes/{id}"))
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::from(
                    json!({ "title": "STAR method", "content": "Keep it short" }).to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(updated.status, StatusCode::OK);
    assert_eq!(updated.body["title"], "STAR method");

    let listed = app.get("/api/notes", &token).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);

    let other = app.sign_up("nosy@example.com").await;
    assert_eq!(
        app.delete(&format!("/api/notes/{id}"), &other).await.status,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        app.delete(&format!("/api/notes/{id}"), &token).await.status,
        StatusCode::OK
    );
    assert_eq!(app.get("/api/notes", &token).await.body, json!([]));
}
