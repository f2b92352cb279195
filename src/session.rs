//! Generation sessions and their background workers.
//!
//! A [`Session`] is one request to the model, identified by a monotonically
//! increasing [`SessionToken`]. The worker for a session runs as a spawned
//! task and only ever talks to the consumer through [`SessionEvent`]s on a
//! channel; every event carries the token it belongs to so the consumer can
//! drop events from superseded sessions.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::AssistError;
use crate::ollama::decoder::StreamChunk;

/// Identifier of one generation. Later sessions have larger tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// The token issued after this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Everything needed to issue, and later re-issue, one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: SessionToken,
    /// Prompt as typed by the user.
    pub prompt: String,
    /// Style the instruction was composed with.
    pub style: String,
    /// Instruction actually sent to the model.
    pub instruction: String,
    pub model: String,
    /// Full URL of the generate endpoint.
    pub endpoint: String,
}

impl Session {
    /// The request the worker sends for this session.
    pub fn request(&self) -> GenerationRequest {
        GenerationRequest {
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            instruction: self.instruction.clone(),
        }
    }

    /// A copy of this session under a new token.
    pub fn reissue(&self, token: SessionToken) -> Self {
        Self {
            token,
            ..self.clone()
        }
    }
}

/// Transport-level request handed to a [`GenerationBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub endpoint: String,
    pub model: String,
    pub instruction: String,
}

/// Ordered chunks from one generation.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, AssistError>> + Send>>;

/// Source of generated text.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Start a generation and return its chunk stream.
    async fn open_stream(&self, request: &GenerationRequest) -> Result<ChunkStream, AssistError>;
}

/// Event delivered from a worker to the consumer.
#[derive(Debug)]
pub enum SessionEvent {
    /// A text delta, in the order the worker read it.
    Chunk { token: SessionToken, text: String },
    /// The stream ended; `text` is everything received.
    Finished { token: SessionToken, text: String },
    /// The generation failed.
    Failed {
        token: SessionToken,
        error: AssistError,
    },
}

impl SessionEvent {
    /// Session this event belongs to.
    pub fn token(&self) -> SessionToken {
        match self {
            Self::Chunk { token, .. } | Self::Finished { token, .. } | Self::Failed { token, .. } => {
                *token
            }
        }
    }
}

/// Spawn the worker for a session.
///
/// The worker owns nothing the consumer reads; it only sends events. It is
/// never aborted: a superseded worker runs to completion and its events are
/// dropped by the consumer's token check.
pub fn spawn_worker(
    backend: Arc<dyn GenerationBackend>,
    token: SessionToken,
    request: GenerationRequest,
    events: mpsc::UnboundedSender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(run_worker(backend, token, request, events))
}

async fn run_worker(
    backend: Arc<dyn GenerationBackend>,
    token: SessionToken,
    request: GenerationRequest,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    info!(%token, model = %request.model, "generation started");

    let mut stream = match backend.open_stream(&request).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%token, %error, "generation failed to start");
            let _ = events.send(SessionEvent::Failed { token, error });
            return;
        }
    };

    let mut text = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => {
                if !chunk.text.is_empty() {
                    text.push_str(&chunk.text);
                    if events
                        .send(SessionEvent::Chunk {
                            token,
                            text: chunk.text,
                        })
                        .is_err()
                    {
                        debug!(%token, "consumer gone, stopping worker");
                        return;
                    }
                }
                if chunk.done {
                    break;
                }
            }
            Err(error) if !error.is_fatal() => {
                debug!(%token, code = error.code(), %error, "skipping recoverable stream error");
            }
            Err(error) => {
                warn!(%token, %error, "generation stream failed");
                let _ = events.send(SessionEvent::Failed { token, error });
                return;
            }
        }
    }

    info!(%token, chars = text.chars().count(), "generation finished");
    let _ = events.send(SessionEvent::Finished { token, text });
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend replaying a fixed script of stream items.
    struct Scripted(Vec<Result<StreamChunk, String>>);

    #[async_trait]
    impl GenerationBackend for Scripted {
        async fn open_stream(&self, _: &GenerationRequest) -> Result<ChunkStream, AssistError> {
            let items: Vec<Result<StreamChunk, AssistError>> = self
                .0
                .iter()
                .map(|r| r.clone().map_err(AssistError::Transport))
                .collect();
            Ok(Box::pin(futures_util::stream::iter(items)))
        }
    }

    /// Backend yielding a fixed list of items, errors included.
    struct Replay(fn() -> Vec<Result<StreamChunk, AssistError>>);

    #[async_trait]
    impl GenerationBackend for Replay {
        async fn open_stream(&self, _: &GenerationRequest) -> Result<ChunkStream, AssistError> {
            Ok(Box::pin(futures_util::stream::iter((self.0)())))
        }
    }

    struct Refusing;

    #[async_trait]
    impl GenerationBackend for Refusing {
        async fn open_stream(&self, _: &GenerationRequest) -> Result<ChunkStream, AssistError> {
            Err(AssistError::ConnectionUnavailable("refused".into()))
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            endpoint: "http://localhost:11434/api/generate".into(),
            model: "llama3".into(),
            instruction: "hi".into(),
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Some(event) = rx.recv().await {
            out.push(event);
        }
        out
    }

    #[test]
    fn tokens_are_monotonic() {
        let first = SessionToken::new(1);
        assert!(first.next() > first);
        assert_eq!(first.next().value(), 2);
        assert_eq!(first.to_string(), "s1");
    }

    #[test]
    fn reissue_keeps_instruction() {
        let session = Session {
            token: SessionToken::new(1),
            prompt: "p".into(),
            style: "Peleas".into(),
            instruction: "T\n\np".into(),
            model: "m".into(),
            endpoint: "e".into(),
        };
        let again = session.reissue(SessionToken::new(2));
        assert_eq!(again.token, SessionToken::new(2));
        assert_eq!(again.request(), session.request());
    }

    #[tokio::test]
    async fn worker_emits_chunks_then_finished() {
        let backend = Arc::new(Scripted(vec![
            Ok(StreamChunk::delta("Once")),
            Ok(StreamChunk::delta(" upon")),
            Ok(StreamChunk::terminal("")),
            Ok(StreamChunk::delta("ignored")),
        ]));
        let (tx, rx) = mpsc::unbounded_channel();
        let token = SessionToken::new(7);
        spawn_worker(backend, token, request(), tx)
            .await
            .unwrap_or_else(|e| panic!("worker panicked: {e}"));

        let events = drain(rx).await;
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.token() == token));
        assert!(matches!(&events[0], SessionEvent::Chunk { text, .. } if text == "Once"));
        assert!(matches!(&events[1], SessionEvent::Chunk { text, .. } if text == " upon"));
        assert!(matches!(&events[2], SessionEvent::Finished { text, .. } if text == "Once upon"));
    }

    #[tokio::test]
    async fn worker_reports_stream_error() {
        let backend = Arc::new(Scripted(vec![
            Ok(StreamChunk::delta("part")),
            Err("reset".into()),
        ]));
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_worker(backend, SessionToken::new(1), request(), tx)
            .await
            .unwrap_or_else(|e| panic!("worker panicked: {e}"));

        let events = drain(rx).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            SessionEvent::Failed {
                error: AssistError::Transport(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn worker_skips_recoverable_errors() {
        let backend = Arc::new(Replay(|| {
            vec![
                Ok(StreamChunk::delta("a")),
                Err(AssistError::LineDecodeSkip("bad line".into())),
                Ok(StreamChunk::delta("b")),
                Ok(StreamChunk::terminal("")),
            ]
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_worker(backend, SessionToken::new(1), request(), tx)
            .await
            .unwrap_or_else(|e| panic!("worker panicked: {e}"));

        let events = drain(rx).await;
        assert_eq!(events.len(), 3);
        assert!(matches!(events.last(), Some(SessionEvent::Finished { text, .. }) if text == "ab"));
    }

    #[tokio::test]
    async fn worker_reports_open_failure() {
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_worker(Arc::new(Refusing), SessionToken::new(3), request(), tx)
            .await
            .unwrap_or_else(|e| panic!("worker panicked: {e}"));

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SessionEvent::Failed {
                error: AssistError::ConnectionUnavailable(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stream_closing_without_done_still_finishes() {
        let backend = Arc::new(Scripted(vec![Ok(StreamChunk::delta("tail"))]));
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_worker(backend, SessionToken::new(1), request(), tx)
            .await
            .unwrap_or_else(|e| panic!("worker panicked: {e}"));

        let events = drain(rx).await;
        assert!(matches!(events.last(), Some(SessionEvent::Finished { text, .. }) if text == "tail"));
    }
}
