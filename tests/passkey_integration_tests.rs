mod common;

use axum::http::{Method, StatusCode};
use common::{TestHarness, json_body};
use federated_auth::{
    auth::{
        TokenIssuer,
        passkey::types::{CreationChallengeResponse, RequestChallengeResponse},
    },
    database::entities::UserRecord,
    test_utils::SoftAuthenticator,
};
use serde_json::{Value, json};

const ORIGIN: &str = "https://app.example";

async fn register(
    harness: &TestHarness,
    user: &UserRecord,
    authenticator: &SoftAuthenticator,
    device_name: Option<&str>,
) -> Value {
    let token = harness.token_for(user);
    let begin = harness
        .request(
            Method::POST,
            "/auth/passkey/register/begin",
            Some(&token),
            Some(ORIGIN),
            Some(json!({ "device_name": device_name })),
        )
        .await;
    assert_eq!(begin.status(), StatusCode::OK);
    let challenge = json_body(begin).await;
    let options: CreationChallengeResponse = serde_json::from_value(challenge.clone()).unwrap();
    assert_eq!(options.public_key.rp.id, "app.example");

    let credential = authenticator.register(&options, ORIGIN);
    let finish = harness
        .request(
            Method::POST,
            "/auth/passkey/register/finish",
            Some(&token),
            Some(ORIGIN),
            Some(json!({ "nonce": challenge["nonce"], "credential": credential })),
        )
        .await;
    assert_eq!(finish.status(), StatusCode::OK);
    json_body(finish).await
}

/// Run a login ceremony and return the finish response status and body
async fn login(
    harness: &TestHarness,
    authenticator: &SoftAuthenticator,
    counter: u32,
) -> (StatusCode, Value) {
    let begin = harness
        .request(Method::POST, "/auth/passkey/login/begin", None, Some(ORIGIN), None)
        .await;
    assert_eq!(begin.status(), StatusCode::OK);
    let challenge = json_body(begin).await;
    let options: RequestChallengeResponse = serde_json::from_value(challenge.clone()).unwrap();
    assert!(options.public_key.allow_credentials.is_empty());

    let credential = authenticator.authenticate(&options, ORIGIN, counter);
    let finish = harness
        .request(
            Method::POST,
            "/auth/passkey/login/finish",
            None,
            Some(ORIGIN),
            Some(json!({ "nonce": challenge["nonce"], "credential": credential })),
        )
        .await;
    let status = finish.status();
    (status, json_body(finish).await)
}

#[tokio::test]
async fn test_register_then_login() {
    let harness = TestHarness::new().await;
    let alice = harness.create_user("alice", false).await;
    let authenticator = SoftAuthenticator::new();

    let device = register(&harness, &alice, &authenticator, Some("Laptop")).await;
    assert_eq!(device["device_name"], "Laptop");
    assert_eq!(device["aaguid"], authenticator.aaguid_string());
    assert!(device["last_used_at"].is_null());

    let (status, body) = login(&harness, &authenticator, 1).await;
    assert_eq!(status, StatusCode::OK);
    let claims = harness
        .server
        .token_issuer
        .verify(body["token"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.user_id, alice.id);
    assert_eq!(claims.username, "alice");

    let list = json_body(
        harness
            .request(
                Method::GET,
                "/auth/passkeys",
                Some(&harness.token_for(&alice)),
                None,
                None,
            )
            .await,
    )
    .await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert!(!list[0]["last_used_at"].is_null());
}

#[tokio::test]
async fn test_counter_regression_is_rejected() {
    let harness = TestHarness::new().await;
    let alice = harness.create_user("alice", false).await;
    let authenticator = SoftAuthenticator::new();
    register(&harness, &alice, &authenticator, None).await;

    assert_eq!(login(&harness, &authenticator, 5).await.0, StatusCode::OK);
    let (status, body) = login(&harness, &authenticator, 5).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("counter"));
}

#[tokio::test]
async fn test_origin_mismatch_consumes_session() {
    let harness = TestHarness::new().await;
    let alice = harness.create_user("alice", false).await;
    let token = harness.token_for(&alice);
    let authenticator = SoftAuthenticator::new();

    let challenge = json_body(
        harness
            .request(
                Method::POST,
                "/auth/passkey/register/begin",
                Some(&token),
                Some(ORIGIN),
                Some(json!({})),
            )
            .await,
    )
    .await;
    let options: CreationChallengeResponse = serde_json::from_value(challenge.clone()).unwrap();
    let credential = authenticator.register(&options, ORIGIN);
    let body = json!({ "nonce": challenge["nonce"], "credential": credential });

    let foreign = harness
        .request(
            Method::POST,
            "/auth/passkey/register/finish",
            Some(&token),
            Some("https://evil.example"),
            Some(body.clone()),
        )
        .await;
    assert_eq!(foreign.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(foreign).await["error"], "session_error");

    let retry = harness
        .request(
            Method::POST,
            "/auth/passkey/register/finish",
            Some(&token),
            Some(ORIGIN),
            Some(body),
        )
        .await;
    assert_eq!(retry.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_manage_devices() {
    let harness = TestHarness::new().await;
    let alice = harness.create_user("alice", false).await;
    let mallory = harness.create_user("mallory", false).await;
    let alice_token = harness.token_for(&alice);
    let authenticator = SoftAuthenticator::new();

    let device = register(&harness, &alice, &authenticator, Some("Laptop")).await;
    assert_eq!(device["device_name"], "Laptop");
    let uri = format!("/auth/passkeys/{}", device["id"]);

    let renamed = harness
        .request(
            Method::PUT,
            &uri,
            Some(&alice_token),
            None,
            Some(json!({ "device_name": "Phone" })),
        )
        .await;
    assert_eq!(renamed.status(), StatusCode::OK);
    assert_eq!(json_body(renamed).await["device_name"], "Phone");

    // Another account cannot see or touch it
    let foreign = harness
        .request(
            Method::DELETE,
            &uri,
            Some(&harness.token_for(&mallory)),
            None,
            None,
        )
        .await;
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
    let mallory_list = json_body(
        harness
            .request(
                Method::GET,
                "/auth/passkeys",
                Some(&harness.token_for(&mallory)),
                None,
                None,
            )
            .await,
    )
    .await;
    assert!(mallory_list.as_array().unwrap().is_empty());

    let deleted = harness
        .request(Method::DELETE, &uri, Some(&alice_token), None, None)
        .await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let (status, _) = login(&harness, &authenticator, 1).await;
    assert_ne!(status, StatusCode::OK);
}
