//! IKnowEverything Relay - chat backend

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod relay;
pub mod services;
pub mod storage;

// Re-export for convenience
pub use crate::api::dto::*;
pub use crate::api::routes::{create_router, AppState};
pub use crate::config::Config;
pub use crate::models::internal::{Conversation, Message, NewConversation, NewMessage, Role};
pub use crate::relay::{ChatRelay, RelayReply, RelaySettings};
pub use crate::services::completion_client::CompletionClient;
pub use crate::storage::db::init_db;
pub use crate::storage::repository::{ConversationRepository, SeaOrmConversationRepository};
