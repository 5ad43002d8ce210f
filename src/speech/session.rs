//! A single bounded recognition session.
//!
//! Wraps one open backend stream: audio goes in through [`send_audio`],
//! recognized words come out as batches through [`next_records`]. A listener
//! task maps raw responses into transcript records — taking the first
//! alternative of each result as the canonical one — and closes the record
//! queue when the remote receive half ends. Timestamps stay session-relative
//! here; the stream loop shifts them onto the logical timeline.
//!
//! [`send_audio`]: RecognitionSession::send_audio
//! [`next_records`]: RecognitionSession::next_records

use crate::error::{DiscimError, Result};
use crate::speech::backend::{BackendSession, RecognitionResponse};
use crate::transcript::StreamingTranscriptRecord;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One remote recognition session.
pub struct RecognitionSession {
    audio_tx: Option<mpsc::Sender<Vec<u8>>>,
    records_rx: mpsc::Receiver<Vec<StreamingTranscriptRecord>>,
    bytes_sent: usize,
    err: Arc<Mutex<Option<DiscimError>>>,
}

impl RecognitionSession {
    /// Starts listening on an open backend session.
    pub fn start(session: BackendSession) -> Self {
        let BackendSession {
            audio_tx,
            mut responses,
        } = session;

        // Rendezvous queue: a batch is handed over only when the stream
        // loop is ready to take it.
        let (records_tx, records_rx) = mpsc::channel(1);
        let err = Arc::new(Mutex::new(None));
        let err_slot = err.clone();

        tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                match response {
                    Ok(response) => {
                        let records = map_response(response);
                        if records.is_empty() {
                            debug!("no transcript words received in response");
                            continue;
                        }
                        if records_tx.send(records).await.is_err() {
                            // The stream loop is gone; nothing left to do.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "session receive half failed");
                        *err_slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(e);
                        break;
                    }
                }
            }
        });

        Self {
            audio_tx: Some(audio_tx),
            records_rx,
            bytes_sent: 0,
            err,
        }
    }

    /// Sends one buffer of Linear16 audio to the remote.
    ///
    /// An empty buffer is accepted as a no-op and does not count towards
    /// `bytes_sent`.
    pub async fn send_audio(&mut self, buffer: &[u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let Some(audio_tx) = &self.audio_tx else {
            return Err(DiscimError::SessionClosed {
                message: "send half already closed".to_string(),
            });
        };
        audio_tx
            .send(buffer.to_vec())
            .await
            .map_err(|_| DiscimError::Transport {
                message: "session audio queue closed by transport".to_string(),
            })?;
        self.bytes_sent += buffer.len();
        Ok(())
    }

    /// Total audio bytes successfully handed to the remote. The stream loop
    /// reads this snapshot when rotating to account the session's audio into
    /// the timeshift offset.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Receives the next batch of session-relative records, or `None` once
    /// the remote receive half has closed.
    pub async fn next_records(&mut self) -> Option<Vec<StreamingTranscriptRecord>> {
        self.records_rx.recv().await
    }

    /// Half-closes the session: no more audio will be sent, but the remote
    /// keeps delivering recognitions for audio it already has.
    pub fn close_send(&mut self) {
        self.audio_tx = None;
    }

    /// The terminal error, if any. Meaningful only after [`next_records`]
    /// returned `None`.
    ///
    /// [`next_records`]: RecognitionSession::next_records
    pub fn take_err(&self) -> Option<DiscimError> {
        self.err.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// Maps a raw response into records, flattening every result's first
/// alternative. Empty words are skipped; a response without any word maps to
/// an empty batch that the caller drops.
fn map_response(response: RecognitionResponse) -> Vec<StreamingTranscriptRecord> {
    if let Some(status) = response.error {
        // Non-fatal service status embedded in a healthy response.
        warn!(code = status.code, message = %status.message, "session returned a status error");
    }

    let mut records = Vec::new();
    for result in response.results {
        let Some(alternative) = result.alternatives.first() else {
            continue;
        };
        for word in &alternative.words {
            let text = word.word.trim();
            if text.is_empty() {
                continue;
            }
            records.push(StreamingTranscriptRecord {
                start: word.start,
                end: word.end,
                text: text.to_string(),
                is_final: result.is_final,
                confidence: alternative.confidence,
            });
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::backend::{RecognitionAlternative, RecognitionResult, ServiceStatus, WordSpan};
    use std::time::Duration;

    fn word(start_ms: u64, text: &str) -> WordSpan {
        WordSpan {
            start: Duration::from_millis(start_ms),
            end: Duration::from_millis(start_ms + 300),
            word: text.to_string(),
        }
    }

    fn response_with_words(words: Vec<WordSpan>, is_final: bool) -> RecognitionResponse {
        RecognitionResponse {
            error: None,
            results: vec![RecognitionResult {
                alternatives: vec![RecognitionAlternative {
                    confidence: 0.8,
                    words,
                }],
                is_final,
            }],
        }
    }

    #[tokio::test]
    async fn test_maps_first_alternative_words() {
        let (backend, _audio_rx, response_tx) = BackendSession::pair();
        let mut session = RecognitionSession::start(backend);

        response_tx
            .send(Ok(response_with_words(
                vec![word(500, "hello"), word(900, "world")],
                true,
            )))
            .await
            .unwrap();

        let records = session.next_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "hello");
        assert_eq!(records[0].start, Duration::from_millis(500));
        assert!(records[0].is_final);
        assert_eq!(records[1].text, "world");
    }

    #[tokio::test]
    async fn test_skips_empty_words_and_wordless_responses() {
        let (backend, _audio_rx, response_tx) = BackendSession::pair();
        let mut session = RecognitionSession::start(backend);

        // A response with no usable word is never forwarded.
        response_tx
            .send(Ok(response_with_words(vec![word(0, "  ")], true)))
            .await
            .unwrap();
        // The next one carries a real word next to an empty one.
        response_tx
            .send(Ok(response_with_words(
                vec![word(100, ""), word(200, " word ")],
                false,
            )))
            .await
            .unwrap();

        let records = session.next_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "word");
        assert!(!records[0].is_final);
    }

    #[tokio::test]
    async fn test_embedded_status_is_ignored() {
        let (backend, _audio_rx, response_tx) = BackendSession::pair();
        let mut session = RecognitionSession::start(backend);

        let mut response = response_with_words(vec![word(0, "still")], true);
        response.error = Some(ServiceStatus {
            code: 8,
            message: "degraded".to_string(),
        });
        response_tx.send(Ok(response)).await.unwrap();

        let records = session.next_records().await.unwrap();
        assert_eq!(records[0].text, "still");
        assert!(session.take_err().is_none());
    }

    #[tokio::test]
    async fn test_receive_error_closes_queue_and_fills_slot() {
        let (backend, _audio_rx, response_tx) = BackendSession::pair();
        let mut session = RecognitionSession::start(backend);

        response_tx
            .send(Err(DiscimError::Transport {
                message: "connection reset".to_string(),
            }))
            .await
            .unwrap();
        drop(response_tx);

        assert!(session.next_records().await.is_none());
        let err = session.take_err().unwrap();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_send_audio_counts_bytes() {
        let (backend, mut audio_rx, _response_tx) = BackendSession::pair();
        let mut session = RecognitionSession::start(backend);

        session.send_audio(&[0u8; 320]).await.unwrap();
        session.send_audio(&[]).await.unwrap(); // zero-byte write: no-op
        session.send_audio(&[0u8; 160]).await.unwrap();

        assert_eq!(session.bytes_sent(), 480);
        assert_eq!(audio_rx.recv().await.unwrap().len(), 320);
        assert_eq!(audio_rx.recv().await.unwrap().len(), 160);
    }

    #[tokio::test]
    async fn test_close_send_closes_audio_queue() {
        let (backend, mut audio_rx, _response_tx) = BackendSession::pair();
        let mut session = RecognitionSession::start(backend);

        session.close_send();
        assert!(audio_rx.recv().await.is_none());
        assert!(session.send_audio(&[0u8; 16]).await.is_err());
    }
}
