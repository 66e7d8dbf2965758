//! Homework tutor chat pipeline.
//!
//! The crate provides:
//! - A `Tutor` that turns a student message plus bounded history into a reply,
//!   falling back to canned subject templates when the provider cannot answer.
//! - A completion provider abstraction (`CompletionProvider`) with a Gemini client.
//! - Image questions, sent to the provider as inline data on the final turn.
//! - Conversation stores (`ConversationStore`) and a `ChatService` that validates,
//!   fetches history, and persists each exchange.

mod chat;
mod config;
mod error;
mod fallback;
mod llm;
mod memory;
mod message;
mod prompt;
mod storage;
mod telemetry;
mod tutor;

pub use chat::{ChatReply, ChatService, StudentIdentity};
pub use config::{
    AppConfig, LogFormat, LoggingConfig, ModelConfig, StorageBackend, StorageConfig, TutorConfig,
};
pub use error::{Result, TutorError};
pub use fallback::{classify, fallback_response, image_fallback, templates, Subject};
pub use llm::{
    CompletionProvider, CompletionRequest, GeminiClient, GenerationConfig, ImageAttachment,
    SafetySetting, StubProvider, Turn, TurnRole, MAX_IMAGE_BYTES,
};
pub use memory::ConversationWindow;
pub use message::{ChatExchange, Message, Role};
pub use prompt::{assemble_turns, PERSONA_ACKNOWLEDGEMENT, TUTOR_PREAMBLE};
#[cfg(feature = "persistence")]
pub use storage::SqlConversationStore;
pub use storage::{open_store, ConversationStore, FileConversationStore};
pub use telemetry::{init_tracing, FailureRecord, TelemetryCollector, TelemetryEvent};
pub use tutor::Tutor;
