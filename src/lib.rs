//! Quill: writing-assistant core for a local generative model.
//!
//! Sends the user's prompt to a locally hosted model over a streaming
//! connection, renders the answer as it arrives, recognizes an embedded
//! action marker in the finished text, and applies that action only after
//! the user accepts it.
//!
//! # Architecture
//!
//! - **Style**: picks a named style from prompt keywords or the manual selection
//! - **Template**: merges the style template, agent directive and prompt
//! - **Ollama**: streaming HTTP client and NDJSON decoder, model discovery
//! - **Action**: finds `<<CREATE_CHAPTER: title>>` in completed text
//! - **Message**: per-message lifecycle and user commands
//! - **Orchestrator**: owns the single live session and the conversation log
//!
//! The editor itself (document, preferences) is reached only through the
//! traits in [`collaborators`].

pub mod action;
pub mod app_dirs;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod message;
pub mod ollama;
pub mod orchestrator;
pub mod session;
pub mod style;
pub mod template;

pub use action::{ActionKind, MessageAction};
pub use collaborators::{DocumentSink, PreferenceStore, StylePreference};
pub use config::{ConfigPreferenceStore, QuillConfig};
pub use error::{AssistError, Result};
pub use message::{ChatMessage, MessageCommand, MessageId, MessageState, Role};
pub use ollama::OllamaClient;
pub use orchestrator::{CommandOutcome, EventOutcome, SessionOrchestrator, SubmitOutcome};
pub use session::{GenerationBackend, Session, SessionEvent, SessionToken};
pub use style::{StyleMode, StyleResolver};
pub use template::{ModelfileTemplateStore, TemplateStore};
