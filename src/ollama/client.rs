//! Streaming client for the `/api/generate` endpoint.
//!
//! Posts one generate request and turns the response body into an ordered
//! stream of [`StreamChunk`]s. Transport and status failures are classified
//! into [`AssistError`] variants the orchestrator can surface directly.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use super::decoder::{StreamChunk, StreamDecoder, decode_error_body};
use crate::config::{EndpointConfig, SamplingOptions};
use crate::error::AssistError;
use crate::session::{ChunkStream, GenerationBackend, GenerationRequest};

/// JSON body of a generate request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: &'a SamplingOptions,
}

impl<'a> GenerateRequest<'a> {
    /// A streaming request for `prompt`.
    pub fn streaming(model: &'a str, prompt: &'a str, options: &'a SamplingOptions) -> Self {
        Self {
            model,
            prompt,
            stream: true,
            options,
        }
    }
}

/// HTTP client for a local Ollama-compatible server.
pub struct OllamaClient {
    client: reqwest::Client,
    read_timeout: Duration,
    sampling: SamplingOptions,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("read_timeout", &self.read_timeout)
            .field("sampling", &self.sampling)
            .finish()
    }
}

impl OllamaClient {
    /// Create a client with the endpoint's timeouts and the given sampling options.
    ///
    /// `timeout_secs` bounds the wait for response headers and for every
    /// subsequent read; the request as a whole may stream for longer.
    pub fn new(endpoint: &EndpointConfig, sampling: SamplingOptions) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(endpoint.connect_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            read_timeout: Duration::from_secs(endpoint.timeout_secs),
            sampling,
        }
    }

    /// Override the per-read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn sampling(&self) -> &SamplingOptions {
        &self.sampling
    }

    /// Send a generate request and return its chunk stream.
    ///
    /// # Errors
    ///
    /// Returns a classified error when the server cannot be reached, does
    /// not answer within the read timeout, or answers with a non-success
    /// status.
    pub async fn generate(&self, url: &str, model: &str, prompt: &str) -> Result<ChunkStream, AssistError> {
        let body = GenerateRequest::streaming(model, prompt, &self.sampling);
        let send = self.client.post(url).json(&body).send();

        let response = match tokio::time::timeout(self.read_timeout, send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify_transport_error(&e)),
            Err(_) => {
                return Err(AssistError::Timeout(format!(
                    "no response within {}s",
                    self.read_timeout.as_secs()
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(status.as_u16(), &body, model);
            warn!(status = status.as_u16(), error = %err, "generate request rejected");
            return Err(err);
        }

        debug!(url, model, "generate stream opened");
        Ok(Box::pin(chunk_stream(
            response.bytes_stream(),
            self.read_timeout,
            model.to_owned(),
        )))
    }
}

#[async_trait]
impl GenerationBackend for OllamaClient {
    async fn open_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, AssistError> {
        self.generate(&request.endpoint, &request.model, &request.instruction)
            .await
    }
}

/// Internal state for the chunk stream.
struct StreamState {
    byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    decoder: StreamDecoder,
    pending: VecDeque<StreamChunk>,
    read_timeout: Duration,
    model: String,
    failure: Option<AssistError>,
    finished: bool,
}

impl StreamState {
    /// Turn a mid-stream `error` line into the stream's last item.
    fn collect_failure(&mut self) {
        if let Some(message) = self.decoder.take_error() {
            self.finished = true;
            self.failure = Some(classify_status(200, &message, &self.model));
        }
    }
}

/// Decode a response byte stream into chunks.
///
/// Ends after the terminal chunk, when the transport closes, or after the
/// first read error, read timeout or server `error` line (yielded as the
/// last item, after any chunks decoded before it).
fn chunk_stream(
    byte_stream: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    read_timeout: Duration,
    model: String,
) -> impl Stream<Item = Result<StreamChunk, AssistError>> + Send {
    futures_util::stream::unfold(
        StreamState {
            byte_stream: Box::pin(byte_stream),
            decoder: StreamDecoder::new(),
            pending: VecDeque::new(),
            read_timeout,
            model,
            failure: None,
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Some((Ok(chunk), state));
                }
                if let Some(err) = state.failure.take() {
                    return Some((Err(err), state));
                }
                if state.finished {
                    return None;
                }

                match tokio::time::timeout(state.read_timeout, state.byte_stream.next()).await {
                    Ok(Some(Ok(bytes))) => {
                        state.pending.extend(state.decoder.push(&bytes));
                        if state.decoder.is_done() {
                            state.finished = true;
                        }
                        state.collect_failure();
                    }
                    Ok(Some(Err(e))) => {
                        state.finished = true;
                        return Some((Err(classify_transport_error(&e)), state));
                    }
                    Ok(None) => {
                        state.finished = true;
                        state.pending.extend(state.decoder.finish());
                        state.collect_failure();
                        if state.decoder.skipped_lines() > 0 {
                            debug!(
                                skipped = state.decoder.skipped_lines(),
                                "stream closed with skipped lines"
                            );
                        }
                    }
                    Err(_) => {
                        state.finished = true;
                        let err = AssistError::Timeout(format!(
                            "no data for {}s",
                            state.read_timeout.as_secs()
                        ));
                        return Some((Err(err), state));
                    }
                }
            }
        },
    )
}

/// Classify a reqwest transport error.
pub fn classify_transport_error(err: &reqwest::Error) -> AssistError {
    if err.is_timeout() {
        AssistError::Timeout(err.to_string())
    } else if err.is_connect() {
        AssistError::ConnectionUnavailable(err.to_string())
    } else {
        AssistError::Transport(err.to_string())
    }
}

/// Classify a non-success response.
///
/// Messages reporting a missing model map to [`AssistError::ModelNotFound`],
/// everything else to [`AssistError::ApiError`].
pub fn classify_status(status: u16, body: &str, requested_model: &str) -> AssistError {
    let message = decode_error_body(body);
    if reports_missing_model(&message) {
        let model = model_named_in(&message).unwrap_or_else(|| requested_model.to_owned());
        return AssistError::ModelNotFound { model };
    }
    AssistError::ApiError { status, message }
}

/// Whether `message` says the model itself is missing.
///
/// Matches `no model ...`, `model not found...` and `model "NAME" not found`.
/// Other failures that merely mention a model, such as a missing template
/// file, stay API errors.
fn reports_missing_model(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    if lower.contains("no model") || lower.contains("model not found") {
        return true;
    }
    quoted_model_not_found(&lower)
}

fn quoted_model_not_found(lower: &str) -> bool {
    lower.match_indices("model ").any(|(at, m)| {
        let rest = &lower[at + m.len()..];
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            return false;
        };
        let inner = &rest[1..];
        inner
            .find(quote)
            .is_some_and(|close| inner[close + 1..].trim_start().starts_with("not found"))
    })
}

/// Model name in `model not found: NAME` or `model "NAME" not found` messages.
fn model_named_in(message: &str) -> Option<String> {
    let lower = message.to_ascii_lowercase();
    const PREFIX: &str = "model not found:";
    if let Some(at) = lower.find(PREFIX) {
        let rest = message[at + PREFIX.len()..].trim();
        let name = rest
            .split(|c: char| c.is_whitespace() || c == ',')
            .next()
            .unwrap_or_default()
            .trim_matches(|c| c == '"' || c == '\'');
        return (!name.is_empty()).then(|| name.to_owned());
    }

    let after = &message[lower.find("model")? + "model".len()..];
    let open = after.find(['"', '\''])?;
    let quote = after[open..].chars().next()?;
    let inner = &after[open + 1..];
    let close = inner.find(quote)?;
    let name = &inner[..close];
    (!name.is_empty()).then(|| name.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let options = SamplingOptions::default();
        let body = GenerateRequest::streaming("llama3", "hi", &options);
        let json = serde_json::to_value(&body).unwrap_or_default();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3",
                "prompt": "hi",
                "stream": true,
                "options": {
                    "temperature": 0.95,
                    "top_p": 0.95,
                    "top_k": 50,
                    "repeat_penalty": 1.1
                }
            })
        );
    }

    #[test]
    fn status_404_model_not_found_names_model() {
        let err = classify_status(404, r#"{"error":"model not found: foo"}"#, "bar");
        match err {
            AssistError::ModelNotFound { model } => assert_eq!(model, "foo"),
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn quoted_model_name_is_extracted() {
        let err = classify_status(
            404,
            r#"{"error":"model \"llama9\" not found, try pulling it first"}"#,
            "bar",
        );
        assert!(matches!(err, AssistError::ModelNotFound { model } if model == "llama9"));
    }

    #[test]
    fn unnamed_missing_model_uses_requested() {
        let err = classify_status(400, "no model loaded", "mistral");
        assert!(matches!(err, AssistError::ModelNotFound { model } if model == "mistral"));
    }

    #[test]
    fn unrelated_not_found_mentioning_model_is_api_error() {
        let err = classify_status(
            404,
            r#"{"error":"template for model llama3: file not found"}"#,
            "llama3",
        );
        match err {
            AssistError::ApiError { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "template for model llama3: file not found");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
        assert!(!reports_missing_model("model 'x' loaded but adapter not found"));
        assert!(reports_missing_model("model 'x' not found"));
    }

    #[test]
    fn other_status_is_api_error_with_decoded_message() {
        let err = classify_status(500, r#"{"error":"out of memory"}"#, "m");
        match err {
            AssistError::ApiError { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "out of memory");
            }
            other => panic!("expected ApiError, got {other:?}"),
        }
    }

    #[test]
    fn raw_body_is_used_when_not_json() {
        let err = classify_status(502, "Bad Gateway", "m");
        assert!(matches!(err, AssistError::ApiError { status: 502, message } if message == "Bad Gateway"));
    }

    #[tokio::test]
    async fn chunk_stream_stops_at_done() {
        let reads: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"{\"response\":\"a\"}\n{\"resp")),
            Ok(Bytes::from_static(b"onse\":\"b\"}\n{\"response\":\"\",\"done\":true}\n")),
            Ok(Bytes::from_static(b"{\"response\":\"never\"}\n")),
        ];
        let stream = chunk_stream(futures_util::stream::iter(reads), Duration::from_secs(5), "m".into());
        let items: Vec<_> = stream.collect().await;
        let chunks: Vec<StreamChunk> = items.into_iter().filter_map(Result::ok).collect();
        assert_eq!(
            chunks,
            vec![
                StreamChunk::delta("a"),
                StreamChunk::delta("b"),
                StreamChunk::terminal(""),
            ]
        );
    }

    #[tokio::test]
    async fn chunk_stream_flushes_on_close() {
        let reads: Vec<Result<Bytes, reqwest::Error>> =
            vec![Ok(Bytes::from_static(b"{\"response\":\"x\"}\n{\"response\":\"y\"}"))];
        let stream = chunk_stream(futures_util::stream::iter(reads), Duration::from_secs(5), "m".into());
        let items: Vec<_> = stream.collect().await;
        let texts: Vec<String> = items
            .into_iter()
            .filter_map(Result::ok)
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, ["x", "y"]);
    }

    #[tokio::test]
    async fn chunk_stream_ends_with_error_line() {
        let reads: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"{\"response\":\"a\"}\n{\"error\":\"out of memory\"}\n")),
            Ok(Bytes::from_static(b"{\"response\":\"never\"}\n")),
        ];
        let stream = chunk_stream(futures_util::stream::iter(reads), Duration::from_secs(5), "m".into());
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Ok(chunk) if chunk.text == "a"));
        assert!(matches!(
            &items[1],
            Err(AssistError::ApiError { message, .. }) if message == "out of memory"
        ));
    }

    #[tokio::test]
    async fn chunk_stream_times_out_on_silent_read() {
        let silent = futures_util::stream::pending::<Result<Bytes, reqwest::Error>>();
        let stream = chunk_stream(silent, Duration::from_millis(20), "m".into());
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(AssistError::Timeout(_))));
    }
}
