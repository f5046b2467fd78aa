use async_trait::async_trait;
use sea_orm::{prelude::*, QueryOrder, QuerySelect, Set};
use uuid::Uuid;

use crate::models::internal::{Conversation, Message, NewConversation, NewMessage, Role};
use crate::storage::entities::{conversations, messages};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DbError(#[from] sea_orm::DbErr),
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Persistence seam for conversations and their messages.
///
/// Every operation is scoped to an owning `user_id`: a conversation that
/// exists but belongs to someone else behaves exactly like a missing one.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conv: NewConversation) -> Result<Uuid, RepositoryError>;

    async fn find_by_id(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<Option<Conversation>, RepositoryError>;

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Conversation>, u64), RepositoryError>;

    async fn rename(&self, user_id: &str, id: Uuid, title: &str) -> Result<(), RepositoryError>;

    async fn touch(&self, user_id: &str, id: Uuid) -> Result<(), RepositoryError>;

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<(), RepositoryError>;

    async fn append_message(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        msg: NewMessage,
    ) -> Result<Uuid, RepositoryError>;

    async fn get_conversation_messages(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn find_recent_messages(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn count_messages(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> Result<u64, RepositoryError>;

    async fn count_conversations(&self) -> Result<u64, RepositoryError>;
}

pub struct SeaOrmConversationRepository {
    db: DatabaseConnection,
}

impl SeaOrmConversationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Loads a conversation row only if it is owned by `user_id`.
    async fn find_owned(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<Option<conversations::Model>, RepositoryError> {
        let model = conversations::Entity::find_by_id(id.to_string())
            .filter(conversations::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?;
        Ok(model)
    }
}

#[async_trait]
impl ConversationRepository for SeaOrmConversationRepository {
    async fn create(&self, conv: NewConversation) -> Result<Uuid, RepositoryError> {
        let conv_id = conv.id.unwrap_or_else(Uuid::new_v4);
        let now = chrono::Utc::now().naive_utc();

        let conversation = conversations::ActiveModel {
            id: Set(conv_id.to_string()),
            user_id: Set(conv.user_id.clone()),
            title: Set(conv.title),
            created_at: Set(now.to_string()),
            updated_at: Set(now.to_string()),
        };

        conversation.insert(&self.db).await?;
        tracing::info!("Created conversation: {}", conv_id);

        for msg in conv.messages {
            self.append_message(&conv.user_id, conv_id, msg).await?;
        }

        Ok(conv_id)
    }

    async fn find_by_id(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.find_owned(user_id, id).await?.map(Conversation::from))
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<Conversation>, u64), RepositoryError> {
        let query =
            conversations::Entity::find().filter(conversations::Column::UserId.eq(user_id));

        let total = query.clone().count(&self.db).await?;

        let models = query
            .order_by_desc(conversations::Column::UpdatedAt)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?;

        Ok((models.into_iter().map(Conversation::from).collect(), total))
    }

    async fn rename(&self, user_id: &str, id: Uuid, title: &str) -> Result<(), RepositoryError> {
        let model = self
            .find_owned(user_id, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("Conversation not found".to_string()))?;

        let mut active_model: conversations::ActiveModel = model.into();
        active_model.title = Set(Some(title.to_string()));
        active_model.updated_at = Set(chrono::Utc::now().naive_utc().to_string());

        active_model.update(&self.db).await?;
        Ok(())
    }

    async fn touch(&self, user_id: &str, id: Uuid) -> Result<(), RepositoryError> {
        let model = self
            .find_owned(user_id, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("Conversation not found".to_string()))?;

        let mut active_model: conversations::ActiveModel = model.into();
        active_model.updated_at = Set(chrono::Utc::now().naive_utc().to_string());

        active_model.update(&self.db).await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<(), RepositoryError> {
        self.find_owned(user_id, id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("Conversation not found".to_string()))?;

        // Explicit message cleanup keeps the cascade invariant even when
        // the connection's foreign_keys pragma is off.
        messages::Entity::delete_many()
            .filter(messages::Column::ConversationId.eq(id.to_string()))
            .exec(&self.db)
            .await?;

        conversations::Entity::delete_by_id(id.to_string())
            .exec(&self.db)
            .await?;

        tracing::info!("Deleted conversation: {}", id);
        Ok(())
    }

    async fn append_message(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        new_msg: NewMessage,
    ) -> Result<Uuid, RepositoryError> {
        if new_msg.content.trim().is_empty() {
            return Err(RepositoryError::InvalidInput(
                "Message content must not be empty".to_string(),
            ));
        }

        self.find_owned(user_id, conversation_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("Conversation not found".to_string()))?;

        let msg_id = Uuid::new_v4();
        let now = chrono::Utc::now().naive_utc();

        let message = messages::ActiveModel {
            id: Set(msg_id.to_string()),
            conversation_id: Set(conversation_id.to_string()),
            user_id: Set(user_id.to_string()),
            role: Set(new_msg.role.as_str().to_string()),
            content: Set(new_msg.content),
            attachment: Set(new_msg.attachment.map(|a| a.to_string())),
            created_at: Set(now.to_string()),
        };

        message.insert(&self.db).await?;
        tracing::debug!("Stored {} message: {}", new_msg.role, msg_id);

        Ok(msg_id)
    }

    async fn get_conversation_messages(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, RepositoryError> {
        let models = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id.to_string()))
            .filter(messages::Column::UserId.eq(user_id))
            .order_by_asc(messages::Column::CreatedAt)
            .order_by_asc(messages::Column::Id)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Message::from).collect())
    }

    async fn find_recent_messages(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let models = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id.to_string()))
            .filter(messages::Column::UserId.eq(user_id))
            .order_by_desc(messages::Column::CreatedAt)
            .order_by_desc(messages::Column::Id)
            .limit(limit as u64)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Message::from).collect())
    }

    async fn count_messages(
        &self,
        user_id: &str,
        conversation_id: Uuid,
    ) -> Result<u64, RepositoryError> {
        let count = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id.to_string()))
            .filter(messages::Column::UserId.eq(user_id))
            .count(&self.db)
            .await?;
        Ok(count)
    }

    async fn count_conversations(&self) -> Result<u64, RepositoryError> {
        let count = conversations::Entity::find().count(&self.db).await?;
        Ok(count)
    }
}

// ============================================
// Conversions
// ============================================

fn parse_timestamp(raw: &str) -> chrono::NaiveDateTime {
    chrono::NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).unwrap_or_default()
}

impl From<conversations::Model> for Conversation {
    fn from(model: conversations::Model) -> Self {
        Self {
            id: Uuid::parse_str(&model.id).unwrap_or_default(),
            user_id: model.user_id,
            title: model.title,
            created_at: parse_timestamp(&model.created_at),
            updated_at: parse_timestamp(&model.updated_at),
        }
    }
}

impl From<messages::Model> for Message {
    fn from(model: messages::Model) -> Self {
        Self {
            id: Uuid::parse_str(&model.id).unwrap_or_default(),
            conversation_id: Uuid::parse_str(&model.conversation_id).unwrap_or_default(),
            user_id: model.user_id,
            role: Role::from(model.role.as_str()),
            content: model.content,
            attachment: model
                .attachment
                .and_then(|raw| serde_json::from_str(&raw).ok()),
            created_at: parse_timestamp(&model.created_at),
        }
    }
}
