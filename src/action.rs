//! Embedded action markers in generated text.
//!
//! The model requests a structural action by emitting
//! `<<CREATE_CHAPTER: Title>>`. Extraction runs only on finalized text; a
//! marker whose close token never arrived, or whose title is blank, leaves
//! the message as plain content.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AssistError;

/// Literal token opening a create-chapter marker.
pub const CREATE_CHAPTER_OPEN: &str = "<<CREATE_CHAPTER:";

/// Literal token closing a marker.
pub const MARKER_CLOSE: &str = ">>";

/// Kind of action recognized in a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Plain text; accepting inserts it into the document.
    None,
    /// Request to create a chapter; accepting creates it.
    CreateChapter,
}

/// Action recognized in a finalized message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAction {
    pub kind: ActionKind,
    /// Chapter title for [`ActionKind::CreateChapter`], full text otherwise.
    pub payload: String,
}

impl MessageAction {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::None,
            payload: text.into(),
        }
    }

    pub fn create_chapter(title: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::CreateChapter,
            payload: title.into(),
        }
    }

    pub fn is_structural(&self) -> bool {
        self.kind != ActionKind::None
    }
}

/// A marker located in text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    /// Trimmed title between the tokens.
    pub title: String,
    /// Byte range of the whole marker, tokens included.
    pub span: std::ops::Range<usize>,
}

/// Locate the first create-chapter marker.
///
/// Returns `Ok(None)` when the open token is absent and
/// [`AssistError::MarkerIncomplete`] when it is present without a close
/// token or with an empty title.
pub fn find_marker(text: &str) -> Result<Option<MarkerMatch>, AssistError> {
    let Some(open_at) = text.find(CREATE_CHAPTER_OPEN) else {
        return Ok(None);
    };
    let title_start = open_at + CREATE_CHAPTER_OPEN.len();
    let close_rel = text[title_start..]
        .find(MARKER_CLOSE)
        .ok_or(AssistError::MarkerIncomplete)?;
    let title = text[title_start..title_start + close_rel].trim();
    if title.is_empty() {
        return Err(AssistError::MarkerIncomplete);
    }
    Ok(Some(MarkerMatch {
        title: title.to_owned(),
        span: open_at..title_start + close_rel + MARKER_CLOSE.len(),
    }))
}

/// Human-readable proposal shown in place of a raw marker.
pub fn proposal_text(title: &str) -> String {
    format!("Proposed action: create chapter titled '{title}'")
}

/// Result of inspecting finalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub action: MessageAction,
    /// Text to render; the marker is replaced by [`proposal_text`].
    pub display: String,
}

/// Inspect a message's finalized text for an action marker.
///
/// At most one marker is recognized. Without a usable marker the action is
/// [`ActionKind::None`] with the full text as payload.
pub fn extract_action(text: &str) -> Extraction {
    match find_marker(text) {
        Ok(Some(found)) => {
            let mut display = String::with_capacity(text.len());
            display.push_str(&text[..found.span.start]);
            display.push_str(&proposal_text(&found.title));
            display.push_str(&text[found.span.end..]);
            Extraction {
                action: MessageAction::create_chapter(found.title),
                display: display.trim().to_owned(),
            }
        }
        Ok(None) => plain(text),
        Err(e) => {
            debug!(error = %e, "treating message as plain text");
            plain(text)
        }
    }
}

fn plain(text: &str) -> Extraction {
    Extraction {
        action: MessageAction::plain(text),
        display: text.to_owned(),
    }
}
