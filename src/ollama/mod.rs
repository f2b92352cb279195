//! Ollama transport: request client, NDJSON stream decoding and model discovery.

pub mod client;
pub mod decoder;
pub mod probe;

pub use client::OllamaClient;
pub use decoder::{StreamChunk, StreamDecoder};
pub use probe::{ModelProbe, ProbeConfig, ProbeStatus, ServerModel};

/// Server root for a configured URL: trailing slashes and a trailing
/// `/api/generate` are removed.
pub fn server_base(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    trimmed
        .strip_suffix("/api/generate")
        .unwrap_or(trimmed)
        .trim_end_matches('/')
}
