//! Transport seam for the streaming recognition service.
//!
//! The engine never talks to the remote service directly; it opens sessions
//! through [`RecognitionBackend`]. The production implementation lives in
//! [`crate::speech::google`]; tests drive the engine with scripted backends.

use crate::error::Result;
use crate::speech::stream::StreamConfig;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the per-session audio queue between the engine and the
/// transport task.
pub const SESSION_AUDIO_QUEUE_SIZE: usize = 16;

/// Capacity of the per-session inbound response queue.
pub const SESSION_RESPONSE_QUEUE_SIZE: usize = 16;

/// One word of a recognition alternative, timed relative to the session
/// start.
#[derive(Debug, Clone, PartialEq)]
pub struct WordSpan {
    pub start: Duration,
    pub end: Duration,
    pub word: String,
}

/// One hypothesis for a stretch of audio.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionAlternative {
    /// Confidence in [0, 1]; 0 when the service does not report one.
    pub confidence: f64,
    pub words: Vec<WordSpan>,
}

/// One result within a response. The first alternative is the most probable
/// one and the only one the engine consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub alternatives: Vec<RecognitionAlternative>,
    pub is_final: bool,
}

/// A non-fatal status the service may embed in an otherwise healthy
/// response, e.g. a degradation warning.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub code: i32,
    pub message: String,
}

/// One message from the remote receive half.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecognitionResponse {
    pub error: Option<ServiceStatus>,
    pub results: Vec<RecognitionResult>,
}

/// The two halves of an open remote session.
///
/// Dropping `audio_tx` half-closes the remote stream: the service keeps
/// delivering recognitions for audio it already received, then closes the
/// response queue. A transport failure arrives as a final `Err` item before
/// the queue closes.
pub struct BackendSession {
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub responses: mpsc::Receiver<Result<RecognitionResponse>>,
}

impl BackendSession {
    /// Builds a session plus the transport-side ends of its two queues.
    pub fn pair() -> (
        Self,
        mpsc::Receiver<Vec<u8>>,
        mpsc::Sender<Result<RecognitionResponse>>,
    ) {
        let (audio_tx, audio_rx) = mpsc::channel(SESSION_AUDIO_QUEUE_SIZE);
        let (response_tx, responses) = mpsc::channel(SESSION_RESPONSE_QUEUE_SIZE);
        (
            Self {
                audio_tx,
                responses,
            },
            audio_rx,
            response_tx,
        )
    }
}

/// Opens bounded sessions against the remote recognition service.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Opens one session: delivers the streaming configuration to the
    /// service and returns the session's audio sink and response source.
    ///
    /// Failure to open is fatal for the stream that requested it.
    async fn open_session(&self, config: &StreamConfig) -> Result<BackendSession>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_connects_audio_queue() {
        let (session, mut audio_rx, _response_tx) = BackendSession::pair();

        session.audio_tx.try_send(vec![1, 2, 3]).unwrap();
        assert_eq!(audio_rx.try_recv().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_pair_connects_response_queue() {
        let (mut session, _audio_rx, response_tx) = BackendSession::pair();

        response_tx
            .send(Ok(RecognitionResponse::default()))
            .await
            .unwrap();
        let response = session.responses.recv().await.unwrap().unwrap();
        assert!(response.results.is_empty());
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_dropping_transport_closes_responses() {
        let (mut session, _audio_rx, response_tx) = BackendSession::pair();
        drop(response_tx);
        assert!(session.responses.recv().await.is_none());
    }
}
