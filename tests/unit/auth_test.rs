use axum::extract::FromRequestParts;
use axum::http::Request;
use iknoweverything::api::routes::AppState;
use iknoweverything::auth::{user_id_for_key, AuthUser};
use iknoweverything::config::Config;
use iknoweverything::relay::{ChatRelay, RelaySettings};
use iknoweverything::services::completion_client::CompletionClient;
use iknoweverything::storage::{init_db, SeaOrmConversationRepository};
use std::sync::Arc;
use tokio::sync::RwLock;

const TEST_KEY: &str = "test_key_12345678901234567890123456789012";

async fn create_test_state(api_keys: Vec<String>) -> AppState {
    let config = Arc::new(RwLock::new(Config {
        server_port: 8080,
        api_keys,
        database_url: "sqlite::memory:".to_string(),
        completion_url: "http://localhost:11434".to_string(),
        completion_api_key: None,
        completion_model: "gpt-4o-mini".to_string(),
        system_prompt: None,
        context_window_messages: 30,
        title_max_chars: 48,
        max_connections: 10,
        log_level: "info".to_string(),
        cors_enabled: true,
        rate_limit_per_minute: Some(60),
    }));

    let db = init_db("sqlite::memory:", 5).await.unwrap();
    let repo = Arc::new(SeaOrmConversationRepository::new(db));
    let completion = Arc::new(CompletionClient::new(
        "http://localhost:11434".to_string(),
        None,
        "gpt-4o-mini".to_string(),
    ));
    let relay = Arc::new(ChatRelay::new(
        repo.clone(),
        completion,
        RelaySettings {
            context_window: 30,
            system_prompt: None,
            title_max_chars: 48,
        },
    ));

    AppState {
        config,
        repo,
        relay,
    }
}

#[tokio::test]
async fn test_valid_auth_token() {
    let state = create_test_state(vec![TEST_KEY.to_string()]).await;

    let req = Request::builder()
        .header("authorization", format!("Bearer {}", TEST_KEY))
        .body(())
        .unwrap();

    let (mut parts, _) = req.into_parts();
    let result = AuthUser::from_request_parts(&mut parts, &state).await;

    assert!(result.is_ok());
    assert_eq!(result.unwrap().id, user_id_for_key(TEST_KEY));
}

#[tokio::test]
async fn test_missing_authorization_header() {
    let state = create_test_state(vec![TEST_KEY.to_string()]).await;

    let req = Request::builder().body(()).unwrap();

    let (mut parts, _) = req.into_parts();
    let result = AuthUser::from_request_parts(&mut parts, &state).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_authorization_format() {
    let state = create_test_state(vec![TEST_KEY.to_string()]).await;

    let req = Request::builder()
        .header("authorization", format!("Basic {}", TEST_KEY))
        .body(())
        .unwrap();

    let (mut parts, _) = req.into_parts();
    let result = AuthUser::from_request_parts(&mut parts, &state).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_unknown_api_key() {
    let state = create_test_state(vec![TEST_KEY.to_string()]).await;

    let req = Request::builder()
        .header(
            "authorization",
            "Bearer wrong_key_1234567890123456789012345678901",
        )
        .body(())
        .unwrap();

    let (mut parts, _) = req.into_parts();
    let result = AuthUser::from_request_parts(&mut parts, &state).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_short_api_key() {
    // Even a configured key is rejected below the minimum length
    let state = create_test_state(vec!["short".to_string()]).await;

    let req = Request::builder()
        .header("authorization", "Bearer short")
        .body(())
        .unwrap();

    let (mut parts, _) = req.into_parts();
    let result = AuthUser::from_request_parts(&mut parts, &state).await;

    assert!(result.is_err());
}

#[test]
fn test_user_id_is_stable_and_opaque() {
    let a = user_id_for_key(TEST_KEY);
    let b = user_id_for_key(TEST_KEY);
    assert_eq!(a, b);
    assert_eq!(a.len(), 64); // hex sha-256
    assert!(!a.contains(TEST_KEY));
}

#[test]
fn test_distinct_keys_give_distinct_users() {
    assert_ne!(
        user_id_for_key("key_one_123456789012345678901234567"),
        user_id_for_key("key_two_123456789012345678901234567")
    );
}
