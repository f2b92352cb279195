//! Style templates and instruction composition.
//!
//! A [`TemplateStore`] maps style names to instruction text. The default
//! store reads Ollama `Modelfile`s from a directory and takes the body of
//! their `TEMPLATE """..."""` block. [`compose_instruction`] merges a
//! template, the optional agent directive and the user prompt into the
//! single instruction sent to the model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::style::DEFAULT_STYLE;

/// Token marking where the prompt is inserted into a template.
pub const PROMPT_PLACEHOLDER: &str = "{{ .Prompt }}";

/// Separator between template sections and the prompt (one blank line).
pub const SECTION_SEPARATOR: &str = "\n\n";

/// Directive appended in agent mode.
pub const AGENT_DIRECTIVE: &str = "SYSTEM INSTRUCTION: You are a narrative assistant. \
If the user asks to create a chapter, reply ONLY with the format: \
<<CREATE_CHAPTER: Chapter Title>>. \
If the user asks for text, write it normally without quotation marks.";

const MODELFILE_EXTENSION: &str = "Modelfile";
const TEMPLATE_OPEN: &str = "TEMPLATE \"\"\"";
const TEMPLATE_CLOSE: &str = "\"\"\"";

/// Instruction text for one style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub style: String,
    pub body: String,
}

impl Template {
    pub fn new(style: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            body: body.into(),
        }
    }

    /// Whether the body carries the prompt placeholder.
    pub fn has_placeholder(&self) -> bool {
        self.body.contains(PROMPT_PLACEHOLDER)
    }
}

/// Lookup of style templates.
pub trait TemplateStore: Send + Sync {
    /// Known style names, in display order. [`DEFAULT_STYLE`] is first.
    fn list_style_names(&self) -> Vec<String>;

    /// Template body for a style; empty if the style is unknown.
    fn template_body(&self, name: &str) -> String;

    /// Template record for a style.
    fn template(&self, name: &str) -> Template {
        Template::new(name, self.template_body(name))
    }

    /// Whether the store lists `name`.
    fn contains(&self, name: &str) -> bool {
        self.list_style_names().iter().any(|n| n == name)
    }
}

/// Templates held in memory, listed in name order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplateStore {
    templates: BTreeMap<String, String>,
}

impl InMemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template.
    pub fn with_template(mut self, style: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(style.into(), body.into());
        self
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn list_style_names(&self) -> Vec<String> {
        std::iter::once(DEFAULT_STYLE.to_owned())
            .chain(
                self.templates
                    .keys()
                    .filter(|k| k.as_str() != DEFAULT_STYLE)
                    .cloned(),
            )
            .collect()
    }

    fn template_body(&self, name: &str) -> String {
        self.templates.get(name).cloned().unwrap_or_default()
    }
}

/// Templates read from `<dir>/<Style>.Modelfile`.
///
/// Files are read on every lookup, so edits on disk are picked up by the
/// next request without a reload step.
#[derive(Debug, Clone)]
pub struct ModelfileTemplateStore {
    dir: PathBuf,
}

impl ModelfileTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{MODELFILE_EXTENSION}"))
    }
}

impl TemplateStore for ModelfileTemplateStore {
    fn list_style_names(&self) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some(MODELFILE_EXTENSION) {
                        return None;
                    }
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .map(str::to_owned)
                })
                .filter(|name| name != DEFAULT_STYLE)
                .collect(),
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "template directory not readable");
                Vec::new()
            }
        };
        names.sort();
        names.insert(0, DEFAULT_STYLE.to_owned());
        names
    }

    fn template_body(&self, name: &str) -> String {
        if name == DEFAULT_STYLE {
            return String::new();
        }
        let path = self.path_for(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => extract_template_block(&content).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read modelfile");
                String::new()
            }
        }
    }
}

/// Body of the first `TEMPLATE """..."""` block in a Modelfile, trimmed.
pub fn extract_template_block(modelfile: &str) -> Option<String> {
    let start = modelfile.find(TEMPLATE_OPEN)? + TEMPLATE_OPEN.len();
    let rest = &modelfile[start..];
    let end = rest.find(TEMPLATE_CLOSE)?;
    Some(rest[..end].trim().to_owned())
}

/// Build the instruction for a request.
///
/// - The default style contributes no template.
/// - In agent mode [`AGENT_DIRECTIVE`] follows the template after a blank
///   line, or stands alone when there is no template.
/// - If the combined text holds [`PROMPT_PLACEHOLDER`], its first occurrence
///   is replaced by the prompt; otherwise the prompt follows after a blank
///   line. With neither template nor directive the prompt is used verbatim.
pub fn compose_instruction(
    style: &str,
    store: &dyn TemplateStore,
    prompt: &str,
    agent_mode: bool,
) -> String {
    let template = (style != DEFAULT_STYLE).then(|| store.template(style));
    let mut system = template.as_ref().map(|t| t.body.clone()).unwrap_or_default();
    if agent_mode {
        if !system.is_empty() {
            system.push_str(SECTION_SEPARATOR);
        }
        system.push_str(AGENT_DIRECTIVE);
    }

    if system.is_empty() {
        prompt.to_owned()
    } else if template.as_ref().is_some_and(Template::has_placeholder) {
        system.replacen(PROMPT_PLACEHOLDER, prompt, 1)
    } else {
        format!("{system}{SECTION_SEPARATOR}{prompt}")
    }
}
