pub use serde_json::json;
pub use std::sync::Arc;
pub use uuid::Uuid;

use axum::Router;
use iknoweverything::{
    api::routes::{create_router, AppState},
    auth::user_id_for_key,
    config::Config,
    relay::{ChatRelay, RelaySettings},
    services::completion_client::CompletionClient,
    storage::{init_db, SeaOrmConversationRepository},
};
use tokio::sync::RwLock;

pub mod relay;

// ============================================
// Shared Test Helpers
// ============================================

pub const TEST_API_KEY: &str = "test_key_12345678901234567890123456789012";
pub const OTHER_API_KEY: &str = "other_key_1234567890123456789012345678901";

pub fn test_user_id() -> String {
    user_id_for_key(TEST_API_KEY)
}

pub fn create_test_config(completion_url: &str) -> Arc<RwLock<Config>> {
    Arc::new(RwLock::new(Config {
        server_port: 8080,
        api_keys: vec![TEST_API_KEY.to_string(), OTHER_API_KEY.to_string()],
        database_url: "sqlite::memory:".to_string(),
        completion_url: completion_url.to_string(),
        completion_api_key: None,
        completion_model: "gpt-4o-mini".to_string(),
        system_prompt: None,
        context_window_messages: 30,
        title_max_chars: 48,
        max_connections: 10,
        log_level: "info".to_string(),
        cors_enabled: true,
        rate_limit_per_minute: Some(60),
    }))
}

pub async fn create_test_repo() -> Arc<SeaOrmConversationRepository> {
    let db = init_db("sqlite::memory:", 5).await.unwrap();
    Arc::new(SeaOrmConversationRepository::new(db))
}

pub fn create_test_relay(
    repo: Arc<SeaOrmConversationRepository>,
    completion_url: &str,
    settings: RelaySettings,
) -> Arc<ChatRelay> {
    let completion = Arc::new(CompletionClient::new(
        completion_url.to_string(),
        None,
        "gpt-4o-mini".to_string(),
    ));
    Arc::new(ChatRelay::new(repo, completion, settings))
}

pub fn default_relay_settings() -> RelaySettings {
    RelaySettings {
        context_window: 30,
        system_prompt: None,
        title_max_chars: 48,
    }
}

pub async fn create_test_app(completion_url: &str) -> Router {
    let repo = create_test_repo().await;
    let relay = create_test_relay(repo.clone(), completion_url, default_relay_settings());

    let state = AppState {
        config: create_test_config(completion_url),
        repo,
        relay,
    };

    create_router(state)
}
