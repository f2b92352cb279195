//! Configuration for the writing assistant.
//!
//! Stored as TOML; every field has a default so partial files load.
//! [`ConfigPreferenceStore`] exposes the file as the editor's preference
//! store and writes it back on every change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::collaborators::{PreferenceStore, StylePreference};
use crate::error::{AssistError, Result};

/// Generate endpoint of a local Ollama server.
pub const DEFAULT_GENERATE_URL: &str = "http://localhost:11434/api/generate";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    /// Inference endpoint settings.
    pub endpoint: EndpointConfig,
    /// Sampling options sent with every request.
    pub sampling: SamplingOptions,
    /// Style selection and template location.
    pub style: StyleConfig,
    /// Append the action directive so the model can propose chapters.
    pub agent_mode: bool,
}

/// Inference endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Full URL of the generate endpoint.
    pub url: String,
    /// Model identifier. `None` until the user picks one.
    pub model: Option<String>,
    /// Seconds to wait for the response to start and for each later read.
    pub timeout_secs: u64,
    /// Seconds to wait for the TCP connection.
    pub connect_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GENERATE_URL.to_owned(),
            model: None,
            timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

impl EndpointConfig {
    /// Server root, with a trailing `/api/generate` removed.
    pub fn base_url(&self) -> &str {
        crate::ollama::server_base(&self.url)
    }
}

/// Sampling options, serialized as the request's `options` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingOptions {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repeat_penalty: f64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.95,
            top_p: 0.95,
            top_k: 50,
            repeat_penalty: 1.1,
        }
    }
}

/// Style selection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleConfig {
    /// Detect the style from prompt keywords.
    pub auto_style: bool,
    /// Last selected style.
    pub last_style: String,
    /// Directory of `<Style>.Modelfile` templates (None = `app_dirs::templates_dir()`).
    pub templates_dir: Option<PathBuf>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        let pref = StylePreference::default();
        Self {
            auto_style: pref.auto_style,
            last_style: pref.last_style,
            templates_dir: None,
        }
    }
}

impl StyleConfig {
    pub fn effective_templates_dir(&self) -> PathBuf {
        self.templates_dir
            .clone()
            .unwrap_or_else(crate::app_dirs::templates_dir)
    }
}

impl QuillConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AssistError::Config(e.to_string()))
    }

    /// Load the file if it exists, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AssistError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }
}

/// [`PreferenceStore`] backed by a config file.
#[derive(Debug, Clone)]
pub struct ConfigPreferenceStore {
    path: PathBuf,
    config: QuillConfig,
}

impl ConfigPreferenceStore {
    /// Open the store, loading the file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = QuillConfig::load_or_default(&path)?;
        Ok(Self { path, config })
    }

    pub fn config(&self) -> &QuillConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&mut self, apply: impl FnOnce(&mut QuillConfig)) -> Result<()> {
        apply(&mut self.config);
        self.config.save_to_file(&self.path)
    }
}

impl PreferenceStore for ConfigPreferenceStore {
    fn endpoint_url(&self) -> String {
        self.config.endpoint.url.clone()
    }

    fn set_endpoint_url(&mut self, url: &str) -> Result<()> {
        self.update(|c| c.endpoint.url = url.to_owned())
    }

    fn model(&self) -> Option<String> {
        self.config.endpoint.model.clone()
    }

    fn set_model(&mut self, model: Option<&str>) -> Result<()> {
        self.update(|c| c.endpoint.model = model.map(str::to_owned))
    }

    fn style_preference(&self) -> StylePreference {
        StylePreference {
            auto_style: self.config.style.auto_style,
            last_style: self.config.style.last_style.clone(),
        }
    }

    fn set_style_preference(&mut self, preference: &StylePreference) -> Result<()> {
        self.update(|c| {
            c.style.auto_style = preference.auto_style;
            c.style.last_style = preference.last_style.clone();
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn defaults_match_local_ollama() {
        let config = QuillConfig::default();
        assert_eq!(config.endpoint.url, DEFAULT_GENERATE_URL);
        assert!(config.endpoint.model.is_none());
        assert_eq!(config.endpoint.timeout_secs, 120);
        assert_eq!(config.sampling.top_k, 50);
        assert!(config.style.auto_style);
        assert_eq!(config.style.last_style, "Normal");
        assert!(!config.agent_mode);
    }

    #[test]
    fn base_url_strips_generate_path() {
        let mut endpoint = EndpointConfig::default();
        assert_eq!(endpoint.base_url(), "http://localhost:11434");
        endpoint.url = "http://gpu-box:11434/".into();
        assert_eq!(endpoint.base_url(), "http://gpu-box:11434");
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: QuillConfig = toml::from_str(
            r#"
            agent_mode = true
            [endpoint]
            model = "llama3"
            "#,
        )
        .unwrap();
        assert!(config.agent_mode);
        assert_eq!(config.endpoint.model.as_deref(), Some("llama3"));
        assert_eq!(config.endpoint.url, DEFAULT_GENERATE_URL);
        assert_eq!(config.sampling, SamplingOptions::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = QuillConfig::default();
        config.endpoint.model = Some("mistral".into());
        config.style.last_style = "Humor".into();
        config.save_to_file(&path).unwrap();

        let loaded = QuillConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "endpoint = [[[").unwrap();
        let err = QuillConfig::from_file(&path).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn load_or_default_missing_file() {
        let config = QuillConfig::load_or_default(Path::new("/nonexistent/quill.toml")).unwrap();
        assert_eq!(config, QuillConfig::default());
    }

    #[test]
    fn preference_store_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut store = ConfigPreferenceStore::open(&path).unwrap();
        store.set_model(Some("llama3")).unwrap();
        store
            .set_style_preference(&StylePreference {
                auto_style: false,
                last_style: "Romance".into(),
            })
            .unwrap();
        store.set_endpoint_url("http://box:11434/api/generate").unwrap();

        let reopened = ConfigPreferenceStore::open(&path).unwrap();
        assert_eq!(reopened.model().as_deref(), Some("llama3"));
        assert_eq!(reopened.endpoint_url(), "http://box:11434/api/generate");
        let style = reopened.style_preference();
        assert!(!style.auto_style);
        assert_eq!(style.last_style, "Romance");
    }
}
