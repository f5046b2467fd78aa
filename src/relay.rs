//! The relay pipeline: persist the inbound message, rebuild context,
//! forward it upstream, persist the reply.

use std::sync::Arc;
use uuid::Uuid;

use crate::models::internal::{Message, NewMessage, Role};
use crate::services::completion_client::{CompletionClient, CompletionError, WireMessage};
use crate::storage::repository::{ConversationRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Completion error: {0}")]
    Completion(#[from] CompletionError),
    #[error("Message content must not be empty")]
    EmptyMessage,
    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// How many of the most recent messages are forwarded upstream.
    pub context_window: usize,
    /// Optional system prompt prepended to every upstream request.
    pub system_prompt: Option<String>,
    /// Auto-derived titles are truncated to this many chars.
    pub title_max_chars: usize,
}

#[derive(Debug, Clone)]
pub struct RelayReply {
    pub conversation_id: Uuid,
    pub user_message_id: Uuid,
    pub assistant_message_id: Uuid,
    pub content: String,
}

pub struct ChatRelay {
    repo: Arc<dyn ConversationRepository>,
    completion: Arc<CompletionClient>,
    settings: RelaySettings,
}

impl ChatRelay {
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        completion: Arc<CompletionClient>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            repo,
            completion,
            settings,
        }
    }

    /// Runs the full pipeline for one inbound user message.
    ///
    /// The inbound message is persisted before the upstream call, so an
    /// upstream failure leaves it stored and surfaces as an error to the
    /// caller. No rollback.
    pub async fn send_message(
        &self,
        user_id: &str,
        conversation_id: Uuid,
        content: &str,
        image_url: Option<String>,
    ) -> Result<RelayReply, RelayError> {
        if content.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let conversation = self
            .repo
            .find_by_id(user_id, conversation_id)
            .await?
            .ok_or(RelayError::ConversationNotFound(conversation_id))?;

        let attachment = image_url.map(|url| serde_json::json!({ "image_url": url }));

        let user_message_id = self
            .repo
            .append_message(
                user_id,
                conversation_id,
                NewMessage {
                    role: Role::User,
                    content: content.to_string(),
                    attachment,
                },
            )
            .await?;

        // Context is fetched newest-first, then restored to wire order.
        let mut context = self
            .repo
            .find_recent_messages(user_id, conversation_id, self.settings.context_window)
            .await?;
        context.reverse();

        let wire = self.assemble_wire(&context);

        tracing::debug!(
            "Relaying {} messages to model {}",
            wire.len(),
            self.completion.model()
        );

        let reply = self.completion.complete(wire).await?;

        let assistant_message_id = self
            .repo
            .append_message(
                user_id,
                conversation_id,
                NewMessage {
                    role: Role::Assistant,
                    content: reply.clone(),
                    attachment: None,
                },
            )
            .await?;

        if conversation.title.is_none() {
            if let Some(title) = first_user_title(&context, self.settings.title_max_chars) {
                self.repo.rename(user_id, conversation_id, &title).await?;
            }
        } else {
            self.repo.touch(user_id, conversation_id).await?;
        }

        Ok(RelayReply {
            conversation_id,
            user_message_id,
            assistant_message_id,
            content: reply,
        })
    }

    fn assemble_wire(&self, context: &[Message]) -> Vec<WireMessage> {
        let mut wire = Vec::with_capacity(context.len() + 1);

        if let Some(prompt) = &self.settings.system_prompt {
            wire.push(WireMessage::system(prompt.clone()));
        }

        for msg in context {
            let image = msg
                .attachment
                .as_ref()
                .and_then(|a| a.get("image_url"))
                .and_then(|v| v.as_str());

            match image {
                Some(url) => wire.push(WireMessage::with_image(msg.role, &msg.content, url)),
                None => wire.push(WireMessage::text(msg.role, &msg.content)),
            }
        }

        wire
    }
}

/// Title for an untitled conversation: its first user message, sliced to
/// `max_chars` on a char boundary, with an ellipsis when truncated.
fn first_user_title(context: &[Message], max_chars: usize) -> Option<String> {
    let first = context.iter().find(|m| m.role == Role::User)?;
    Some(derive_title(&first.content, max_chars))
}

pub fn derive_title(content: &str, max_chars: usize) -> String {
    let flattened = content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut title: String = flattened.chars().take(max_chars).collect();
    if flattened.chars().count() > max_chars {
        title = title.trim_end().to_string();
        title.push('…');
    }
    title
}
