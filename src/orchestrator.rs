//! The session orchestrator.
//!
//! [`SessionOrchestrator`] owns the conversation log and the single live
//! generation. It is the only consumer of worker events and the only code
//! that mutates the log, so it needs no locks: callers drive it through
//! `&mut self` from one task.
//!
//! A new generation starts either from [`submit`](SessionOrchestrator::submit),
//! which is refused while another generation is in flight, or from a
//! [`MessageCommand::Regenerate`], which first discards whatever is in flight.
//! Issuing a session makes its token the live one; events carrying any other
//! token are dropped without touching the log.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::action::ActionKind;
use crate::collaborators::{DocumentSink, PreferenceStore, StylePreference};
use crate::error::AssistError;
use crate::message::{ChatMessage, InvalidTransition, MessageCommand, MessageId, MessageState};
use crate::session::{GenerationBackend, Session, SessionEvent, SessionToken, spawn_worker};
use crate::style::{StyleMode, StyleResolver};
use crate::template::{TemplateStore, compose_instruction};

/// Shown when a prompt is submitted before a model is configured.
pub const MODEL_MISSING_NOTICE: &str =
    "No model is configured. Set the model identifier before sending a prompt.";

/// Result of [`SessionOrchestrator::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A session was issued.
    Started(SessionToken),
    /// The prompt was blank.
    Ignored,
    /// A generation is already in flight.
    Busy,
    /// No model configured; a system message was posted instead.
    ModelMissing,
}

/// What applying one worker event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Text was appended to the live message.
    Delta { message: MessageId, text: String },
    /// The live message completed and its controls are now available.
    Completed(MessageId),
    /// The live message failed; `notice` is the system message posted for it.
    Failed { message: MessageId, notice: MessageId },
    /// The event belonged to a superseded session and was ignored.
    Stale,
}

/// Result of a successfully dispatched [`MessageCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The payload was handed to the document sink.
    Accepted(ActionKind),
    /// The message was removed from the log.
    Rejected,
    /// The message was removed and a new session issued.
    Regenerated(SessionToken),
}

/// Why a command could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("no message {0} in the conversation")]
    UnknownMessage(MessageId),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    #[error("message {0} has no session to regenerate from")]
    NoSession(MessageId),

    #[error(transparent)]
    Collaborator(#[from] AssistError),
}

/// Owns the conversation log and the live generation.
pub struct SessionOrchestrator {
    backend: Arc<dyn GenerationBackend>,
    templates: Box<dyn TemplateStore>,
    preferences: Box<dyn PreferenceStore>,
    sink: Box<dyn DocumentSink>,
    resolver: StyleResolver,

    log: Vec<ChatMessage>,
    sessions: HashMap<SessionToken, Session>,
    live: Option<SessionToken>,
    last_token: SessionToken,
    next_message_id: u64,

    input: String,
    agent_mode: bool,
    auto_style: bool,
    selected_style: String,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionOrchestrator {
    /// Create an orchestrator. The style mode and selection are read from
    /// the preference store.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        templates: Box<dyn TemplateStore>,
        preferences: Box<dyn PreferenceStore>,
        sink: Box<dyn DocumentSink>,
    ) -> Self {
        let style = preferences.style_preference();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            templates,
            preferences,
            sink,
            resolver: StyleResolver::default(),
            log: Vec::new(),
            sessions: HashMap::new(),
            live: None,
            last_token: SessionToken::new(0),
            next_message_id: 1,
            input: String::new(),
            agent_mode: false,
            auto_style: style.auto_style,
            selected_style: style.last_style,
            events_tx,
            events_rx,
        }
    }

    /// Replace the keyword table used for automatic detection.
    pub fn with_resolver(mut self, resolver: StyleResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_agent_mode(mut self, enabled: bool) -> Self {
        self.agent_mode = enabled;
        self
    }

    // ── Accessors ──────────────────────────────────────────────

    /// The conversation log, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.log
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.log.iter().find(|m| m.id == id)
    }

    /// Text waiting in the input field. Restored after a timeout.
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Take the input text, leaving the field empty.
    pub fn take_input(&mut self) -> String {
        std::mem::take(&mut self.input)
    }

    /// Whether a generation is in flight.
    pub fn is_busy(&self) -> bool {
        self.live.is_some()
    }

    pub fn live_token(&self) -> Option<SessionToken> {
        self.live
    }

    /// The session that produced a message, if it is still known.
    pub fn session_for(&self, id: MessageId) -> Option<&Session> {
        let token = self.message(id)?.session?;
        self.sessions.get(&token)
    }

    /// Current style selection (the last detected style in automatic mode).
    pub fn current_style(&self) -> &str {
        &self.selected_style
    }

    pub fn auto_style(&self) -> bool {
        self.auto_style
    }

    pub fn agent_mode(&self) -> bool {
        self.agent_mode
    }

    pub fn style_names(&self) -> Vec<String> {
        self.templates.list_style_names()
    }

    pub fn endpoint_url(&self) -> String {
        self.preferences.endpoint_url()
    }

    pub fn model(&self) -> Option<String> {
        self.preferences.model()
    }

    // ── Preferences ────────────────────────────────────────────

    /// Switch between automatic detection and manual selection.
    ///
    /// # Errors
    ///
    /// Returns the preference store's error if the change cannot be saved.
    pub fn set_auto_style(&mut self, enabled: bool) -> Result<(), AssistError> {
        self.auto_style = enabled;
        self.persist_style()
    }

    /// Select a style manually.
    ///
    /// # Errors
    ///
    /// Returns the preference store's error if the change cannot be saved.
    pub fn select_style(&mut self, name: impl Into<String>) -> Result<(), AssistError> {
        self.selected_style = name.into();
        self.persist_style()
    }

    pub fn set_agent_mode(&mut self, enabled: bool) {
        self.agent_mode = enabled;
    }

    /// Point at a different endpoint and model.
    ///
    /// # Errors
    ///
    /// Returns the preference store's error if the change cannot be saved.
    pub fn configure_endpoint(&mut self, url: &str, model: Option<&str>) -> Result<(), AssistError> {
        self.preferences.set_endpoint_url(url)?;
        self.preferences.set_model(model)
    }

    fn persist_style(&mut self) -> Result<(), AssistError> {
        self.preferences.set_style_preference(&StylePreference {
            auto_style: self.auto_style,
            last_style: self.selected_style.clone(),
        })
    }

    // ── Generation ─────────────────────────────────────────────

    /// Submit a prompt typed by the user.
    pub fn submit(&mut self, prompt: &str) -> SubmitOutcome {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return SubmitOutcome::Ignored;
        }
        if self.is_busy() {
            debug!("submission refused, generation in flight");
            return SubmitOutcome::Busy;
        }
        let Some(model) = self.preferences.model().filter(|m| !m.trim().is_empty()) else {
            warn!("submission without a configured model");
            self.post_system(MODEL_MISSING_NOTICE);
            return SubmitOutcome::ModelMissing;
        };

        self.input.clear();
        let id = self.next_id();
        self.log.push(ChatMessage::user(id, prompt));

        let style = self.resolve_style(prompt);
        let instruction =
            compose_instruction(&style, self.templates.as_ref(), prompt, self.agent_mode);
        let session = Session {
            token: self.issue_token(),
            prompt: prompt.to_owned(),
            style,
            instruction,
            model,
            endpoint: self.preferences.endpoint_url(),
        };
        let at = self.log.len();
        SubmitOutcome::Started(self.start(session, at))
    }

    fn resolve_style(&mut self, prompt: &str) -> String {
        let mode = StyleMode::from_auto_flag(self.auto_style);
        let style = self
            .resolver
            .resolve(prompt, mode, &self.selected_style)
            .to_owned();
        if mode == StyleMode::Automatic
            && style != self.selected_style
            && self.templates.contains(&style)
        {
            debug!(%style, "automatic style detected");
            self.selected_style = style.clone();
            if let Err(e) = self.persist_style() {
                warn!(error = %e, "failed to persist detected style");
            }
        }
        style
    }

    /// Issue `session`, placing its pending reply at log position `at`.
    fn start(&mut self, session: Session, at: usize) -> SessionToken {
        let token = session.token;
        info!(%token, style = %session.style, "issuing session");
        let id = self.next_id();
        let at = at.min(self.log.len());
        self.log.insert(at, ChatMessage::pending_assistant(id, token));
        self.live = Some(token);
        spawn_worker(
            Arc::clone(&self.backend),
            token,
            session.request(),
            self.events_tx.clone(),
        );
        self.sessions.insert(token, session);
        token
    }

    fn issue_token(&mut self) -> SessionToken {
        self.last_token = self.last_token.next();
        self.last_token
    }

    fn next_id(&mut self) -> MessageId {
        let id = MessageId(self.next_message_id);
        self.next_message_id += 1;
        id
    }

    fn post_system(&mut self, text: impl Into<String>) -> MessageId {
        let id = self.next_id();
        self.log.push(ChatMessage::system(id, text));
        id
    }

    // ── Events ─────────────────────────────────────────────────

    /// Wait for the next worker event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Wait for one event and apply it.
    pub async fn pump(&mut self) -> Option<EventOutcome> {
        let event = self.next_event().await?;
        Some(self.apply_event(event))
    }

    /// Apply events until no generation is in flight.
    pub async fn run_until_idle(&mut self) -> Vec<EventOutcome> {
        let mut outcomes = Vec::new();
        while self.is_busy() {
            match self.pump().await {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        outcomes
    }

    /// Apply one worker event to the log.
    pub fn apply_event(&mut self, event: SessionEvent) -> EventOutcome {
        let token = event.token();
        if self.live != Some(token) {
            debug!(%token, live = ?self.live, "dropping stale event");
            return EventOutcome::Stale;
        }
        let Some(index) = self
            .log
            .iter()
            .position(|m| m.session == Some(token) && m.state().is_in_flight())
        else {
            debug!(%token, "no in-flight message for live session");
            self.live = None;
            return EventOutcome::Stale;
        };
        let id = self.log[index].id;

        match event {
            SessionEvent::Chunk { text, .. } => match self.log[index].append_chunk(&text) {
                Ok(()) => EventOutcome::Delta { message: id, text },
                Err(e) => {
                    warn!(error = %e, "chunk rejected");
                    EventOutcome::Stale
                }
            },
            SessionEvent::Finished { text, .. } => {
                self.live = None;
                if let Err(e) = self.log[index].complete(Some(&text)) {
                    warn!(error = %e, "completion rejected");
                    return EventOutcome::Stale;
                }
                info!(%token, message = %id, "message complete");
                EventOutcome::Completed(id)
            }
            SessionEvent::Failed { error, .. } => {
                self.live = None;
                if let Err(e) = self.log[index].fail() {
                    warn!(error = %e, "failure transition rejected");
                }
                warn!(%token, code = error.code(), %error, "generation failed");
                if error.restores_prompt()
                    && let Some(session) = self.sessions.get(&token)
                {
                    self.input = session.prompt.clone();
                }
                let notice = self.post_system(error.user_message());
                EventOutcome::Failed {
                    message: id,
                    notice,
                }
            }
        }
    }

    // ── Commands ───────────────────────────────────────────────

    /// Apply a user decision to a completed assistant message.
    ///
    /// # Errors
    ///
    /// Fails if the message does not exist, is not complete, or the
    /// document sink refuses the payload.
    pub fn dispatch(
        &mut self,
        id: MessageId,
        command: MessageCommand,
    ) -> Result<CommandOutcome, CommandError> {
        let index = self
            .log
            .iter()
            .position(|m| m.id == id)
            .ok_or(CommandError::UnknownMessage(id))?;
        let message = &self.log[index];
        if !message.controls_enabled() {
            return Err(InvalidTransition {
                id,
                from: message.state(),
                to: command.target_state(),
            }
            .into());
        }

        match command {
            MessageCommand::Accept => self.accept(index),
            MessageCommand::Reject => {
                self.log[index].apply(MessageCommand::Reject)?;
                let removed = self.log.remove(index);
                self.forget_session(&removed);
                info!(message = %id, "message rejected");
                Ok(CommandOutcome::Rejected)
            }
            MessageCommand::Regenerate => self.regenerate(index),
        }
    }

    fn accept(&mut self, index: usize) -> Result<CommandOutcome, CommandError> {
        let message = &self.log[index];
        let kind = match message.action() {
            Some(action) if action.is_structural() => {
                self.sink.request_create_chapter(&action.payload)?;
                action.kind
            }
            Some(action) => {
                self.sink.insert_text(&action.payload)?;
                ActionKind::None
            }
            None => {
                self.sink.insert_text(message.text())?;
                ActionKind::None
            }
        };
        self.log[index].apply(MessageCommand::Accept)?;
        info!(message = %self.log[index].id, ?kind, "message accepted");
        Ok(CommandOutcome::Accepted(kind))
    }

    fn regenerate(&mut self, index: usize) -> Result<CommandOutcome, CommandError> {
        let id = self.log[index].id;
        let previous = self.log[index]
            .session
            .and_then(|token| self.sessions.get(&token).cloned())
            .ok_or(CommandError::NoSession(id))?;

        self.log[index].apply(MessageCommand::Regenerate)?;
        let removed = self.log.remove(index);
        self.forget_session(&removed);
        // The replacement takes the removed message's slot.
        let mut at = index;
        if self.discard_in_flight().is_some_and(|pos| pos < at) {
            at -= 1;
        }

        let session = previous.reissue(self.issue_token());
        let token = self.start(session, at);
        info!(message = %id, %token, "regenerating");
        Ok(CommandOutcome::Regenerated(token))
    }

    /// Drop the in-flight message, if any, and supersede its token.
    ///
    /// Returns the log position the dropped message occupied.
    fn discard_in_flight(&mut self) -> Option<usize> {
        let token = self.live.take()?;
        debug!(%token, "superseding in-flight session");
        self.sessions.remove(&token);
        let pos = self
            .log
            .iter()
            .position(|m| m.session == Some(token) && m.state().is_in_flight())?;
        self.log.remove(pos);
        Some(pos)
    }

    fn forget_session(&mut self, message: &ChatMessage) {
        if let Some(token) = message.session {
            self.sessions.remove(&token);
        }
    }

    /// Clear the conversation. Any in-flight generation is superseded.
    pub fn clear(&mut self) {
        if let Some(token) = self.live.take() {
            debug!(%token, "superseding in-flight session on clear");
        }
        self.log.clear();
        self.sessions.clear();
        info!("conversation cleared");
    }

    /// States of all assistant messages, oldest first.
    pub fn assistant_states(&self) -> Vec<MessageState> {
        self.log
            .iter()
            .filter(|m| m.role == crate::message::Role::Assistant)
            .map(ChatMessage::state)
            .collect()
    }
}
