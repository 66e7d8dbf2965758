//! Request handling around the tutor: validation, history and persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TutorConfig;
use crate::error::{Result, TutorError};
use crate::llm::ImageAttachment;
use crate::memory::ConversationWindow;
use crate::message::ChatExchange;
use crate::storage::ConversationStore;
use crate::tutor::Tutor;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const DEFAULT_IMAGE_QUESTION: &str = "What do you see in this image?";
const IMAGE_MARKER: &str = " [Image uploaded]";

/// The authenticated student a request acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl StudentIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

pub struct ChatService {
    tutor: Tutor,
    store: Arc<dyn ConversationStore>,
    config: TutorConfig,
}

impl ChatService {
    pub fn new(tutor: Tutor, store: Arc<dyn ConversationStore>, config: TutorConfig) -> Self {
        Self {
            tutor: tutor.with_history_pairs(config.history_pairs),
            store,
            config,
        }
    }

    pub async fn send_message(
        &self,
        student: &StudentIdentity,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<ChatReply> {
        let message = self.validate(message)?;
        let window = self.window(student, session_id).await?;

        let response = self
            .tutor
            .respond(&message, window.messages(), student.display_name.as_deref())
            .await;

        self.record(student, session_id, message, response, window.len())
            .await
    }

    /// Answers a question about an uploaded picture. A blank question asks
    /// what the picture shows; the stored message is marked as carrying an
    /// image, the image itself is not persisted.
    pub async fn send_message_with_image(
        &self,
        student: &StudentIdentity,
        message: &str,
        image: &ImageAttachment,
        session_id: Option<&str>,
    ) -> Result<ChatReply> {
        let message = if message.trim().is_empty() {
            DEFAULT_IMAGE_QUESTION
        } else {
            message
        };
        let message = self.validate(message)?;
        let window = self.window(student, session_id).await?;

        let response = self
            .tutor
            .respond_with_image(
                &message,
                image,
                window.messages(),
                student.display_name.as_deref(),
            )
            .await;

        self.record(
            student,
            session_id,
            format!("{message}{IMAGE_MARKER}"),
            response,
            window.len(),
        )
        .await
    }

    async fn window(
        &self,
        student: &StudentIdentity,
        session_id: Option<&str>,
    ) -> Result<ConversationWindow> {
        let recent = self
            .store
            .recent(&student.id, session_id, self.config.history_pairs)
            .await?;
        Ok(ConversationWindow::from_exchanges(
            &recent,
            self.config.history_pairs,
        ))
    }

    async fn record(
        &self,
        student: &StudentIdentity,
        session_id: Option<&str>,
        message: String,
        response: String,
        history: usize,
    ) -> Result<ChatReply> {
        let exchange = ChatExchange::new(
            student.id.clone(),
            session_id.map(str::to_string),
            message,
            response,
        );
        self.store.append(&exchange).await?;
        info!(user = %student.id, history, "stored chat exchange");

        Ok(ChatReply {
            message: exchange.message,
            response: exchange.response,
            timestamp: exchange.created_at,
        })
    }

    /// Newest first. `limit` defaults to 20.
    pub async fn history(
        &self,
        student: &StudentIdentity,
        session_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ChatExchange>> {
        self.store
            .history(&student.id, session_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await
    }

    pub async fn clear_history(
        &self,
        student: &StudentIdentity,
        session_id: Option<&str>,
    ) -> Result<u64> {
        let removed = self.store.clear(&student.id, session_id).await?;
        info!(user = %student.id, removed, "cleared chat history");
        Ok(removed)
    }

    /// Trims, enforces the length limit, and HTML-escapes the text.
    fn validate(&self, message: &str) -> Result<String> {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return Err(TutorError::EmptyMessage);
        }
        if trimmed.chars().count() > self.config.max_message_chars {
            return Err(TutorError::MessageTooLong(self.config.max_message_chars));
        }
        Ok(escape_html(trimmed))
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '/' => escaped.push_str("&#x2F;"),
            '\\' => escaped.push_str("&#x5C;"),
            '`' => escaped.push_str("&#96;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{templates, Subject};
    use crate::storage::FileConversationStore;

    fn service(dir: &tempfile::TempDir) -> ChatService {
        let path = dir.path().join("chat.jsonl");
        ChatService::new(
            Tutor::offline(),
            Arc::new(FileConversationStore::new(path.to_str().unwrap())),
            TutorConfig::default(),
        )
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<b>x & y</b>"),
            "&lt;b&gt;x &amp; y&lt;&#x2F;b&gt;"
        );
        assert_eq!(escape_html(r"`rm` C:\tmp"), "&#96;rm&#96; C:&#x5C;tmp");
    }

    #[tokio::test]
    async fn rejects_empty_and_over_long_messages() {
        let dir = tempfile::tempdir().unwrap();
        let chat = service(&dir);
        let student = StudentIdentity::new("stu-1");

        let err = chat.send_message(&student, "   \n", None).await.unwrap_err();
        assert!(matches!(err, TutorError::EmptyMessage));

        let long = "a".repeat(2001);
        let err = chat.send_message(&student, &long, None).await.unwrap_err();
        assert!(matches!(err, TutorError::MessageTooLong(2000)));

        let exact = "é".repeat(2000);
        assert!(chat.send_message(&student, &exact, None).await.is_ok());
    }

    #[tokio::test]
    async fn image_exchange_is_marked_in_history() {
        let dir = tempfile::tempdir().unwrap();
        let chat = service(&dir);
        let student = StudentIdentity::new("stu-1");
        let image = ImageAttachment::from_upload("cell.png", vec![1, 2]).unwrap();

        let reply = chat
            .send_message_with_image(&student, "  ", &image, None)
            .await
            .unwrap();

        assert_eq!(reply.message, "What do you see in this image? [Image uploaded]");
        assert!(templates(Subject::General).contains(&reply.response.as_str()));
        let stored = chat.history(&student, None, None).await.unwrap();
        assert_eq!(stored[0].message, reply.message);
    }

    #[tokio::test]
    async fn persists_each_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let chat = service(&dir);
        let student = StudentIdentity::new("stu-1").with_display_name("Ada");

        let reply = chat
            .send_message(&student, "  What is photosynthesis?  ", Some("biology"))
            .await
            .unwrap();
        assert_eq!(reply.message, "What is photosynthesis?");
        assert!(templates(Subject::Science).contains(&reply.response.as_str()));

        let stored = chat.history(&student, Some("biology"), None).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].response, reply.response);

        assert_eq!(chat.clear_history(&student, None).await.unwrap(), 1);
        assert!(chat.history(&student, None, None).await.unwrap().is_empty());
    }
}
