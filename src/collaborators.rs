//! Interfaces to the editor-side collaborators of the assistant.
//!
//! The document itself and the user's preferences live outside this crate.
//! The orchestrator talks to them only through these traits.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::style::DEFAULT_STYLE;

/// Receiver of accepted assistant output.
pub trait DocumentSink: Send {
    /// Insert accepted text at the editor's cursor.
    fn insert_text(&mut self, text: &str) -> Result<()>;

    /// Create a new chapter with the given title.
    fn request_create_chapter(&mut self, title: &str) -> Result<()>;
}

/// Persisted style choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StylePreference {
    /// Detect the style from prompt keywords.
    pub auto_style: bool,
    /// Last manually selected (or detected) style.
    pub last_style: String,
}

impl Default for StylePreference {
    fn default() -> Self {
        Self {
            auto_style: true,
            last_style: DEFAULT_STYLE.to_owned(),
        }
    }
}

/// Durable user preferences. Setters persist immediately.
pub trait PreferenceStore: Send {
    fn endpoint_url(&self) -> String;
    fn set_endpoint_url(&mut self, url: &str) -> Result<()>;

    fn model(&self) -> Option<String>;
    fn set_model(&mut self, model: Option<&str>) -> Result<()>;

    fn style_preference(&self) -> StylePreference;
    fn set_style_preference(&mut self, preference: &StylePreference) -> Result<()>;
}

/// What a [`RecordingSink`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    InsertText(String),
    CreateChapter(String),
}

/// Sink that records calls; shares its log so tests can inspect it after
/// handing the sink to an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    calls: std::sync::Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record(&self, call: SinkCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl DocumentSink for RecordingSink {
    fn insert_text(&mut self, text: &str) -> Result<()> {
        self.record(SinkCall::InsertText(text.to_owned()));
        Ok(())
    }

    fn request_create_chapter(&mut self, title: &str) -> Result<()> {
        self.record(SinkCall::CreateChapter(title.to_owned()));
        Ok(())
    }
}

/// Preferences held in memory only.
#[derive(Debug, Clone)]
pub struct MemoryPreferences {
    pub endpoint_url: String,
    pub model: Option<String>,
    pub style: StylePreference,
}

impl Default for MemoryPreferences {
    fn default() -> Self {
        Self {
            endpoint_url: crate::config::DEFAULT_GENERATE_URL.to_owned(),
            model: None,
            style: StylePreference::default(),
        }
    }
}

impl MemoryPreferences {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_style(mut self, auto_style: bool, last_style: impl Into<String>) -> Self {
        self.style = StylePreference {
            auto_style,
            last_style: last_style.into(),
        };
        self
    }
}

impl PreferenceStore for MemoryPreferences {
    fn endpoint_url(&self) -> String {
        self.endpoint_url.clone()
    }

    fn set_endpoint_url(&mut self, url: &str) -> Result<()> {
        self.endpoint_url = url.to_owned();
        Ok(())
    }

    fn model(&self) -> Option<String> {
        self.model.clone()
    }

    fn set_model(&mut self, model: Option<&str>) -> Result<()> {
        self.model = model.map(str::to_owned);
        Ok(())
    }

    fn style_preference(&self) -> StylePreference {
        self.style.clone()
    }

    fn set_style_preference(&mut self, preference: &StylePreference) -> Result<()> {
        self.style = preference.clone();
        Ok(())
    }
}
