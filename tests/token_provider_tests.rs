//! Integration tests for the OAuth2 token provider
//!
//! Tests behavioral contracts against a mock token endpoint:
//! - refresh-token grant form fields
//! - reuse within the safety margin, refresh after it
//! - a single refresh for concurrent callers
//! - rejection and malformed response handling

use avs_client::auth::{AccessTokenSource, AuthError, Credentials, TokenProvider};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer, margin: Duration) -> TokenProvider {
    TokenProvider::new(
        Credentials::new("client-123", "secret-456", "Atzr|refresh-789"),
        format!("{}/auth/o2/token", server.uri()),
        Duration::from_secs(3600),
        margin,
    )
    .unwrap()
}

fn token_response(token: &str, expires_in: u64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": token,
        "refresh_token": "Atzr|refresh-789",
        "token_type": "bearer",
        "expires_in": expires_in
    }))
}

#[tokio::test]
async fn test_refresh_posts_refresh_token_grant() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("client_id=client-123"))
        .and(body_string_contains("client_secret=secret-456"))
        .and(body_string_contains("refresh_token=Atzr%7Crefresh-789"))
        .respond_with(token_response("Atza|first", 3600))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, Duration::from_secs(30));
    assert_eq!(provider.access_token().await.unwrap(), "Atza|first");
}

#[tokio::test]
async fn test_token_reused_within_margin() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .respond_with(token_response("Atza|cached", 3600))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, Duration::from_secs(30));
    let first = provider.access_token().await.unwrap();
    let second = provider.access_token().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(provider.refresh_count(), 1);
}

#[tokio::test]
async fn test_token_refreshed_once_after_margin_elapses() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .respond_with(token_response("Atza|short", 1))
        .expect(2)
        .mount(&server)
        .await;

    let provider = provider(&server, Duration::ZERO);
    provider.access_token().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    provider.access_token().await.unwrap();

    assert_eq!(provider.refresh_count(), 2);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .respond_with(token_response("Atza|shared", 3600).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(provider(&server, Duration::from_secs(30)));
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move { provider.access_token().await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "Atza|shared");
    }
    assert_eq!(provider.refresh_count(), 1);
}

#[tokio::test]
async fn test_invalidate_forces_refresh() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .respond_with(token_response("Atza|again", 3600))
        .expect(2)
        .mount(&server)
        .await;

    let provider = provider(&server, Duration::from_secs(30));
    provider.access_token().await.unwrap();
    provider.invalidate().await;
    provider.access_token().await.unwrap();

    assert_eq!(provider.refresh_count(), 2);
}

#[tokio::test]
async fn test_rejected_refresh_propagates() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "The request has an invalid grant parameter"
        })))
        .mount(&server)
        .await;

    let provider = provider(&server, Duration::from_secs(30));
    let result = provider.access_token().await;

    match result {
        Err(AuthError::Rejected { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("Expected Rejected error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_response_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let provider = provider(&server, Duration::from_secs(30));
    assert!(matches!(
        provider.access_token().await,
        Err(AuthError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn test_missing_expires_in_uses_configured_lifetime() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/o2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"access_token": "Atza|no-expiry"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider(&server, Duration::from_secs(30));
    provider.access_token().await.unwrap();
    provider.access_token().await.unwrap();

    assert_eq!(provider.refresh_count(), 1);
}
