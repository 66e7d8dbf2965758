//! The conversation pipeline: bounded context in, tutoring reply out.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{Result, TutorError};
use crate::fallback;
use crate::llm::{CompletionProvider, CompletionRequest, GeminiClient, ImageAttachment};
use crate::memory::ConversationWindow;
use crate::message::Message;
use crate::prompt::assemble_turns;
use crate::telemetry::TelemetryCollector;

/// Produces a reply to one student message.
///
/// `respond` never fails: a missing provider, a transport failure and a bad
/// provider answer all resolve to a canned reply from the fallback pool. The
/// tutor holds no per-conversation state, so one instance serves every user.
#[derive(Clone)]
pub struct Tutor {
    provider: Option<Arc<dyn CompletionProvider>>,
    history_pairs: usize,
    telemetry: Option<TelemetryCollector>,
}

impl Tutor {
    pub fn new(provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        Self {
            provider,
            history_pairs: 5,
            telemetry: None,
        }
    }

    /// A tutor that only ever answers from the fallback pool.
    pub fn offline() -> Self {
        Self::new(None)
    }

    pub fn with_provider(provider: Arc<dyn CompletionProvider>) -> Self {
        Self::new(Some(provider))
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let provider = GeminiClient::from_config(&cfg.model)?
            .map(|client| Arc::new(client) as Arc<dyn CompletionProvider>);
        Ok(Self::new(provider).with_history_pairs(cfg.tutor.history_pairs))
    }

    pub fn with_history_pairs(mut self, pairs: usize) -> Self {
        self.history_pairs = pairs;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn history_pairs(&self) -> usize {
        self.history_pairs
    }

    pub async fn respond(
        &self,
        user_message: &str,
        history: &[Message],
        display_name: Option<&str>,
    ) -> String {
        let Some(provider) = &self.provider else {
            debug!("no completion provider configured, answering from fallback pool");
            return self.fallback(user_message);
        };

        match self
            .ask_provider(provider.as_ref(), user_message, None, history, display_name)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "completion provider failed, answering from fallback pool");
                self.fallback(user_message)
            }
        }
    }

    /// Like [`Tutor::respond`], with a picture attached to the question.
    ///
    /// Without a provider the reply comes from the subject pool; a provider
    /// failure yields an image-specific reply for that kind of failure.
    pub async fn respond_with_image(
        &self,
        user_message: &str,
        image: &ImageAttachment,
        history: &[Message],
        display_name: Option<&str>,
    ) -> String {
        let Some(provider) = &self.provider else {
            debug!("no completion provider configured, answering image question from fallback pool");
            return self.fallback(user_message);
        };

        match self
            .ask_provider(provider.as_ref(), user_message, Some(image), history, display_name)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "completion provider failed on image question");
                if let Some(t) = &self.telemetry {
                    t.record("image_fallback_response", json!({ "error": err.to_string() }));
                }
                fallback::image_fallback(&err).to_string()
            }
        }
    }

    async fn ask_provider(
        &self,
        provider: &dyn CompletionProvider,
        user_message: &str,
        image: Option<&ImageAttachment>,
        history: &[Message],
        display_name: Option<&str>,
    ) -> Result<String> {
        let window = ConversationWindow::bounded(history, self.history_pairs.saturating_mul(2));
        let mut turns = assemble_turns(window.messages(), user_message, display_name);
        let request = match image {
            Some(image) => {
                if let Some(question) = turns.pop() {
                    turns.push(question.with_image(image.clone()));
                }
                CompletionRequest::image_tutoring(turns)
            }
            None => CompletionRequest::tutoring(turns),
        };

        let outcome = match provider.complete(&request).await {
            Ok(text) if text.trim().is_empty() => Err(TutorError::EmptyCompletion),
            other => other,
        };
        if let Some(t) = &self.telemetry {
            match &outcome {
                Ok(text) => t.record("provider_response", json!({ "chars": text.chars().count() })),
                Err(err) => t.record_failure("provider", err.to_string()),
            }
        }
        outcome
    }

    fn fallback(&self, user_message: &str) -> String {
        let (subject, template) = fallback::fallback_response(user_message);
        debug!(%subject, "selected fallback template");
        if let Some(t) = &self.telemetry {
            t.record("fallback_response", json!({ "subject": subject }));
        }
        template.to_string()
    }
}

impl std::fmt::Debug for Tutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tutor")
            .field("has_provider", &self.has_provider())
            .field("history_pairs", &self.history_pairs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{templates, Subject};
    use crate::llm::{StubProvider, TurnRole};
    use crate::message::ChatExchange;
    use chrono::{Duration, TimeZone, Utc};

    fn history_of(pairs: usize) -> Vec<Message> {
        let base = Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap();
        (0..pairs)
            .flat_map(|i| {
                ChatExchange::new("stu-1", None, format!("q{i}"), format!("a{i}"))
                    .at(base + Duration::minutes(i as i64))
                    .to_messages()
            })
            .collect()
    }

    #[tokio::test]
    async fn offline_math_question_uses_math_pool() {
        let tutor = Tutor::offline();
        let reply = tutor
            .respond("Can you help me solve this algebra equation?", &[], None)
            .await;
        assert!(templates(Subject::Math).contains(&reply.as_str()));
    }

    #[tokio::test]
    async fn offline_science_question_uses_science_pool() {
        let reply = Tutor::offline()
            .respond("What is photosynthesis?", &history_of(2), Some("Sam"))
            .await;
        assert!(templates(Subject::Science).contains(&reply.as_str()));
    }

    #[tokio::test]
    async fn provider_text_is_returned_unmodified() {
        let stub = StubProvider::replying("  Let's think about **slopes** first.\n");
        let tutor = Tutor::with_provider(stub.clone());

        let reply = tutor.respond("What is a slope?", &[], None).await;

        assert_eq!(reply, "  Let's think about **slopes** first.\n");
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_falls_back() {
        let telemetry = TelemetryCollector::default();
        let stub = StubProvider::new(vec![Err(TutorError::ProviderUnavailable(
            "connection refused".into(),
        ))]);
        let tutor = Tutor::with_provider(stub).with_telemetry(telemetry.clone());

        let reply = tutor.respond("Help me with my essay", &[], None).await;

        assert!(templates(Subject::English).contains(&reply.as_str()));
        let (events, failures) = telemetry.drain();
        assert_eq!(failures.len(), 1);
        assert_eq!(events[0].kind, "fallback_response");
        assert_eq!(events[0].detail["subject"], "english");
    }

    #[tokio::test]
    async fn whitespace_reply_counts_as_failure() {
        let stub = StubProvider::replying("   ");
        let reply = Tutor::with_provider(stub)
            .respond("plan my week", &[], None)
            .await;
        assert!(templates(Subject::General).contains(&reply.as_str()));
    }

    #[tokio::test]
    async fn over_long_history_is_trimmed_to_recent_pairs() {
        let stub = StubProvider::replying("ok");
        let tutor = Tutor::with_provider(stub.clone()).with_history_pairs(5);

        let mut history = history_of(12);
        history.reverse();
        tutor.respond("next question", &history, Some("Ada")).await;

        let request = &stub.requests()[0];
        // preamble + handshake + 10 history entries + new message
        assert_eq!(request.turns.len(), 13);
        let middle: Vec<&str> = request.turns[2..12].iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            middle,
            vec!["q7", "a7", "q8", "a8", "q9", "a9", "q10", "a10", "q11", "a11"]
        );
        assert_eq!(request.turns[2].role, TurnRole::User);
        assert_eq!(request.turns[3].role, TurnRole::Model);
        assert_eq!(request.turns[12].text, "Student Ada asks: next question");
        assert_eq!(request.generation.max_output_tokens, 1024);
    }

    #[tokio::test]
    async fn unbounded_history_setting_still_answers() {
        let stub = StubProvider::replying("ok");
        let tutor = Tutor::with_provider(stub.clone()).with_history_pairs(usize::MAX);

        let reply = tutor.respond("hi", &history_of(3), None).await;

        assert_eq!(reply, "ok");
        assert_eq!(stub.requests()[0].turns.len(), 9);
    }

    #[tokio::test]
    async fn image_goes_on_the_final_turn_only() {
        let stub = StubProvider::replying("That graph shows a parabola.");
        let tutor = Tutor::with_provider(stub.clone());
        let image = ImageAttachment::from_upload("graph.jpg", vec![1, 2, 3]).unwrap();

        let reply = tutor
            .respond_with_image("What is this curve?", &image, &history_of(1), Some("Ada"))
            .await;

        assert_eq!(reply, "That graph shows a parabola.");
        let request = &stub.requests()[0];
        assert_eq!(request.turns.len(), 5);
        assert!(request.turns[..4].iter().all(|turn| turn.image.is_none()));
        assert_eq!(request.turns[4].text, "Student Ada asks: What is this curve?");
        assert_eq!(request.turns[4].image.as_ref(), Some(&image));
        assert_eq!(request.generation.max_output_tokens, 2048);
    }

    #[tokio::test]
    async fn image_failure_uses_image_wording() {
        let telemetry = TelemetryCollector::default();
        let stub = StubProvider::new(vec![Err(TutorError::ProviderTimeout("30s".into()))]);
        let tutor = Tutor::with_provider(stub).with_telemetry(telemetry.clone());
        let image = ImageAttachment::from_upload("page.png", vec![7]).unwrap();

        let reply = tutor.respond_with_image("help", &image, &[], None).await;

        assert!(reply.contains("taking too long"));
        let (events, failures) = telemetry.drain();
        assert_eq!(failures.len(), 1);
        assert_eq!(events[0].kind, "image_fallback_response");
    }

    #[tokio::test]
    async fn offline_image_question_uses_subject_pool() {
        let image = ImageAttachment::from_upload("sum.png", vec![7]).unwrap();
        let reply = Tutor::offline()
            .respond_with_image("How do I solve this equation?", &image, &[], None)
            .await;
        assert!(templates(Subject::Math).contains(&reply.as_str()));
    }

    #[tokio::test]
    async fn from_config_without_key_is_offline() {
        let tutor = Tutor::from_config(&AppConfig::default()).unwrap();
        assert!(!tutor.has_provider());
        assert_eq!(tutor.history_pairs(), 5);
    }
}
