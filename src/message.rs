//! Conversation messages and the per-message lifecycle.
//!
//! Assistant messages move through
//!
//! ```text
//! Pending → Streaming → Complete → Accepted | Rejected | Regenerating
//!     └─────────┴─────→ Error
//! ```
//!
//! Transitions only move forward. The recognized action is filled in when
//! the message completes, never from a partial stream, and the
//! accept/regenerate/reject controls exist only in [`MessageState::Complete`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::{MessageAction, extract_action};
use crate::session::SessionToken;

/// Stable identifier of a message in the conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Lifecycle of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Created, no text yet.
    Pending,
    /// Chunks are arriving.
    Streaming,
    /// Done signal received and action extraction has run.
    Complete,
    /// The generation failed.
    Error,
    /// Forwarded to the document. Terminal.
    Accepted,
    /// Discarded by the user. Terminal.
    Rejected,
    /// Discarded in favour of a new generation. Terminal.
    Regenerating,
}

impl MessageState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, next),
            (Pending, Streaming)
                | (Pending, Complete)
                | (Pending, Error)
                | (Streaming, Complete)
                | (Streaming, Error)
                | (Complete, Accepted)
                | (Complete, Rejected)
                | (Complete, Regenerating)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Error | Self::Accepted | Self::Rejected | Self::Regenerating
        )
    }

    /// Whether a generation is still feeding this message.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Streaming)
    }

    /// Whether accept/regenerate/reject are available.
    pub fn controls_enabled(self) -> bool {
        self == Self::Complete
    }
}

/// User decision on a completed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCommand {
    Accept,
    Regenerate,
    Reject,
}

impl MessageCommand {
    /// State the message enters when the command is applied.
    pub fn target_state(self) -> MessageState {
        match self {
            Self::Accept => MessageState::Accepted,
            Self::Regenerate => MessageState::Regenerating,
            Self::Reject => MessageState::Rejected,
        }
    }
}

/// A transition that the lifecycle does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message {id} cannot move from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub id: MessageId,
    pub from: MessageState,
    pub to: MessageState,
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    text: String,
    state: MessageState,
    action: Option<MessageAction>,
    display: Option<String>,
    /// Session that produced this message (assistant messages only).
    pub session: Option<SessionToken>,
}

impl ChatMessage {
    /// A finished user message.
    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self::settled(id, Role::User, text.into())
    }

    /// A finished system notice.
    pub fn system(id: MessageId, text: impl Into<String>) -> Self {
        Self::settled(id, Role::System, text.into())
    }

    /// An empty assistant message waiting for its first chunk.
    pub fn pending_assistant(id: MessageId, session: SessionToken) -> Self {
        Self {
            id,
            role: Role::Assistant,
            text: String::new(),
            state: MessageState::Pending,
            action: None,
            display: None,
            session: Some(session),
        }
    }

    fn settled(id: MessageId, role: Role, text: String) -> Self {
        Self {
            id,
            role,
            text,
            state: MessageState::Complete,
            action: None,
            display: None,
            session: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    /// Recognized action; `None` until the message completes.
    pub fn action(&self) -> Option<&MessageAction> {
        self.action.as_ref()
    }

    /// Text to render: the raw stream while in flight, the marker-substituted
    /// text once complete.
    pub fn display_text(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.text)
    }

    /// Whether the user can act on this message.
    pub fn controls_enabled(&self) -> bool {
        self.role == Role::Assistant && self.state.controls_enabled()
    }

    fn transition(&mut self, to: MessageState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(to) {
            return Err(InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Append a streamed delta.
    pub fn append_chunk(&mut self, chunk: &str) -> Result<(), InvalidTransition> {
        if self.state == MessageState::Pending {
            self.transition(MessageState::Streaming)?;
        } else if self.state != MessageState::Streaming {
            return Err(InvalidTransition {
                id: self.id,
                from: self.state,
                to: MessageState::Streaming,
            });
        }
        self.text.push_str(chunk);
        Ok(())
    }

    /// Mark the stream done and run action extraction on the final text.
    ///
    /// `final_text` is the worker's full accumulation; it replaces the
    /// locally appended text when the two differ.
    pub fn complete(&mut self, final_text: Option<&str>) -> Result<(), InvalidTransition> {
        self.transition(MessageState::Complete)?;
        if let Some(text) = final_text
            && text != self.text
        {
            self.text = text.to_owned();
        }
        let extraction = extract_action(&self.text);
        self.display = (extraction.display != self.text).then_some(extraction.display);
        self.action = Some(extraction.action);
        Ok(())
    }

    /// Mark the generation failed.
    pub fn fail(&mut self) -> Result<(), InvalidTransition> {
        self.transition(MessageState::Error)
    }

    /// Apply a user decision; only legal once complete.
    pub fn apply(&mut self, command: MessageCommand) -> Result<(), InvalidTransition> {
        self.transition(command.target_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;

    fn assistant() -> ChatMessage {
        ChatMessage::pending_assistant(MessageId(1), SessionToken::new(1))
    }

    #[test]
    fn full_happy_path() {
        let mut msg = assistant();
        assert_eq!(msg.state(), MessageState::Pending);
        assert!(!msg.controls_enabled());

        msg.append_chunk("Hello").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(msg.state(), MessageState::Streaming);
        assert!(!msg.controls_enabled());
        msg.append_chunk(", world").unwrap_or_else(|e| panic!("{e}"));

        msg.complete(None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(msg.state(), MessageState::Complete);
        assert!(msg.controls_enabled());
        assert_eq!(msg.text(), "Hello, world");
        assert_eq!(
            msg.action(),
            Some(&MessageAction::plain("Hello, world"))
        );

        msg.apply(MessageCommand::Accept).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(msg.state(), MessageState::Accepted);
        assert!(msg.state().is_terminal());
    }

    #[test]
    fn action_is_absent_while_streaming() {
        let mut msg = assistant();
        msg.append_chunk("<<CREATE_CHAPTER: Dawn>>").unwrap_or_else(|e| panic!("{e}"));
        assert!(msg.action().is_none());
        assert_eq!(msg.display_text(), "<<CREATE_CHAPTER: Dawn>>");

        msg.complete(None).unwrap_or_else(|e| panic!("{e}"));
        let action = msg.action().unwrap_or_else(|| panic!("no action"));
        assert_eq!(action.kind, ActionKind::CreateChapter);
        assert_eq!(action.payload, "Dawn");
        assert!(msg.display_text().contains("create chapter titled 'Dawn'"));
    }

    #[test]
    fn complete_adopts_worker_text() {
        let mut msg = assistant();
        msg.append_chunk("par").unwrap_or_else(|e| panic!("{e}"));
        msg.complete(Some("partial")).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(msg.text(), "partial");
    }

    #[test]
    fn controls_rejected_before_complete() {
        let mut msg = assistant();
        let err = msg
            .apply(MessageCommand::Accept)
            .expect_err("accept before complete must fail");
        assert_eq!(err.from, MessageState::Pending);
        assert_eq!(msg.state(), MessageState::Pending);

        msg.append_chunk("x").unwrap_or_else(|e| panic!("{e}"));
        assert!(msg.apply(MessageCommand::Regenerate).is_err());
    }

    #[test]
    fn error_state_has_no_controls_and_is_terminal() {
        let mut msg = assistant();
        msg.append_chunk("x").unwrap_or_else(|e| panic!("{e}"));
        msg.fail().unwrap_or_else(|e| panic!("{e}"));
        assert!(!msg.controls_enabled());
        assert!(msg.apply(MessageCommand::Reject).is_err());
        assert!(msg.append_chunk("more").is_err());
        assert!(msg.complete(None).is_err());
    }

    #[test]
    fn states_are_never_revisited() {
        let mut msg = assistant();
        msg.complete(None).unwrap_or_else(|e| panic!("{e}"));
        assert!(msg.append_chunk("late").is_err());
        assert!(msg.complete(None).is_err());
        msg.apply(MessageCommand::Reject).unwrap_or_else(|e| panic!("{e}"));
        assert!(msg.apply(MessageCommand::Accept).is_err());
    }

    #[test]
    fn transition_table() {
        use MessageState::*;
        assert!(Pending.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Streaming));
        assert!(!Error.can_transition_to(Complete));
        assert!(!Accepted.can_transition_to(Rejected));
        assert!(Streaming.is_in_flight());
        assert!(!Complete.is_in_flight());
    }

    #[test]
    fn user_and_system_messages_have_no_controls() {
        assert!(!ChatMessage::user(MessageId(1), "hi").controls_enabled());
        assert!(!ChatMessage::system(MessageId(2), "note").controls_enabled());
    }
}
