//! The rotating-session stream.
//!
//! [`SpeechStream::open`] spawns the session loop and hands back a writer
//! and a receiver. The loop owns at most one recognition session at a time
//! and keeps the logical stream alive across the per-session audio bound:
//!
//! - `OPENING`: open a remote session and send the streaming configuration.
//!   Failure here is fatal.
//! - `ACTIVE`: race the session deadline, inbound word batches, producer
//!   writes and cancellation, in that priority order. Inbound records are
//!   shifted by the current timeshift offset before they are forwarded.
//! - `ROTATING`: half-close the send side, drain the receive side until the
//!   remote closes it (tail words keep the pre-rotation offset), account the
//!   session's audio into the offset, reopen.
//!
//! Producer writes block on a bounded queue while a rotation is in
//! progress; that queue is the stream's backpressure mechanism. If the
//! producer's audio lands across a rotation boundary the remote may emit
//! the same tail word twice; consumers must tolerate duplicates.

use crate::audio::AudioSpec;
use crate::error::{DiscimError, Result};
use crate::speech::backend::RecognitionBackend;
use crate::speech::session::RecognitionSession;
use crate::transcript::StreamingTranscriptRecord;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the producer write queue. Buffering the writes gives the
/// session loop time to drain a rotating session without blocking the
/// producer, which may be fed by a connection we must not stall.
pub const WRITE_QUEUE_SIZE: usize = 100;

/// The remote caps a session at a little over five minutes of audio; the
/// loop rotates just under the cap.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Configuration of one logical stream.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Expected spoken language, as a BCP-47 identifier.
    pub language: String,
    /// Maximum wall-clock lifetime and audio budget of one session.
    pub session_timeout: Duration,
    /// Phrases the audio is likely to contain, for improved recognition.
    pub speech_context: Vec<String>,
    /// Whether the recognizer should also produce unstable intermediate
    /// words.
    pub interim_results: bool,
    /// Format of the audio pushed through [`StreamWriter::write`].
    pub audio: AudioSpec,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            speech_context: Vec::new(),
            interim_results: false,
            audio: AudioSpec::default(),
        }
    }
}

/// A logical transcription stream over rotating recognition sessions.
pub struct SpeechStream {
    backend: Arc<dyn RecognitionBackend>,
    config: StreamConfig,
}

impl SpeechStream {
    pub fn new(backend: Arc<dyn RecognitionBackend>, config: StreamConfig) -> Self {
        Self { backend, config }
    }

    /// Starts the session loop and returns the stream's two ends.
    ///
    /// The receiver yields records until a fatal error occurs, `cancel`
    /// fires, or every writer has been dropped and the tail of the last
    /// session has been drained.
    pub fn open(self, cancel: CancellationToken) -> (StreamWriter, StreamReceiver) {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_SIZE);
        let (out_tx, out_rx) = mpsc::channel(1);
        let err = Arc::new(Mutex::new(None));

        let session_loop = SessionLoop {
            backend: self.backend,
            config: self.config,
            write_rx,
            out_tx,
            err: err.clone(),
            cancel,
            timeshift_offset: Duration::ZERO,
        };
        tokio::spawn(session_loop.run());

        (
            StreamWriter { tx: write_tx },
            StreamReceiver { rx: out_rx, err },
        )
    }
}

/// Write end of a stream. Cloneable; the stream ends cleanly once every
/// clone has been dropped.
#[derive(Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

impl StreamWriter {
    /// Queues one buffer of Linear16 audio, waiting while the queue is
    /// full. An empty buffer is accepted and ignored.
    pub async fn write(&self, buffer: &[u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        self.tx
            .send(buffer.to_vec())
            .await
            .map_err(|_| DiscimError::StreamClosed)
    }
}

/// Receive end of a stream.
pub struct StreamReceiver {
    rx: mpsc::Receiver<StreamingTranscriptRecord>,
    err: Arc<Mutex<Option<DiscimError>>>,
}

impl StreamReceiver {
    /// The next record on the logical timeline, or `None` once the stream
    /// has closed.
    pub async fn recv(&mut self) -> Option<StreamingTranscriptRecord> {
        self.rx.recv().await
    }

    /// The terminal error, if the stream closed because of one. Meaningful
    /// only after [`recv`] returned `None`.
    ///
    /// [`recv`]: StreamReceiver::recv
    pub fn take_err(&self) -> Option<DiscimError> {
        self.err.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

/// How one session iteration came to its end.
enum SessionEnd {
    /// Deadline or audio budget reached: rotate into a fresh session.
    Expired,
    /// Every writer is gone; stop after the tail drain.
    InputClosed,
    /// The outer token fired; stop after the tail drain.
    Canceled,
}

enum Event {
    Deadline,
    Batch(Option<Vec<StreamingTranscriptRecord>>),
    Write(Option<Vec<u8>>),
    Canceled,
}

struct SessionLoop {
    backend: Arc<dyn RecognitionBackend>,
    config: StreamConfig,
    write_rx: mpsc::Receiver<Vec<u8>>,
    out_tx: mpsc::Sender<StreamingTranscriptRecord>,
    err: Arc<Mutex<Option<DiscimError>>>,
    cancel: CancellationToken,
    timeshift_offset: Duration,
}

impl SessionLoop {
    async fn run(mut self) {
        loop {
            match self.run_session().await {
                Ok(SessionEnd::Expired) => continue,
                Ok(SessionEnd::InputClosed) => {
                    info!("write side closed; stream finished");
                    break;
                }
                Ok(SessionEnd::Canceled) => {
                    info!("stream canceled");
                    self.set_err(DiscimError::Canceled);
                    break;
                }
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        // Cancellation is surfaced as the cause, not
                        // whatever the dying session happened to report.
                        info!(error = %e, "stream canceled during session error");
                        self.set_err(DiscimError::Canceled);
                        break;
                    }
                    if e.is_fatal() {
                        warn!(error = %e, "closing stream");
                        self.set_err(e);
                        break;
                    }
                    warn!(error = %e, "session ended with error; reopening");
                }
            }
        }
        // Dropping out_tx here closes the receiver.
    }

    async fn run_session(&mut self) -> Result<SessionEnd> {
        info!(language = %self.config.language, "opening recognition session");
        let backend_session = match self.backend.open_session(&self.config).await {
            Ok(backend_session) => backend_session,
            Err(e @ DiscimError::SessionOpen { .. }) => return Err(e),
            Err(e) => {
                return Err(DiscimError::SessionOpen {
                    message: e.to_string(),
                })
            }
        };
        let mut session = RecognitionSession::start(backend_session);
        let deadline = Instant::now() + self.config.session_timeout;

        let outcome = self.drive_session(&mut session, deadline).await;

        let drained = match &outcome {
            Ok(_) => self.drain_session(&mut session).await,
            Err(_) => Ok(()),
        };

        // Account the session's audio into the logical timeline on every
        // exit, so the next session's timestamps land after this one's.
        self.timeshift_offset += self.config.audio.duration_for_bytes(session.bytes_sent());
        info!(
            bytes_sent = session.bytes_sent(),
            offset_ms = self.timeshift_offset.as_millis() as u64,
            "session closed"
        );

        drained?;
        outcome
    }

    /// Runs one session until it expires, the input or the remote closes,
    /// or the outer token fires.
    async fn drive_session(
        &mut self,
        session: &mut RecognitionSession,
        deadline: Instant,
    ) -> Result<SessionEnd> {
        loop {
            let event = tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => Event::Deadline,
                batch = session.next_records() => Event::Batch(batch),
                buffer = self.write_rx.recv() => Event::Write(buffer),
                _ = self.cancel.cancelled() => Event::Canceled,
            };

            match event {
                Event::Deadline => {
                    debug!("session deadline reached");
                    return Ok(SessionEnd::Expired);
                }
                Event::Batch(Some(records)) => self.forward(records).await?,
                Event::Batch(None) => {
                    // The remote closed its receive half before the
                    // deadline. Non-fatal: the outer loop reopens.
                    let message = session
                        .take_err()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "end of stream".to_string());
                    return Err(DiscimError::SessionClosed { message });
                }
                Event::Write(Some(buffer)) => {
                    session.send_audio(&buffer).await?;
                    let sent = self.config.audio.duration_for_bytes(session.bytes_sent());
                    if sent >= self.config.session_timeout {
                        debug!(sent_ms = sent.as_millis() as u64, "session audio budget reached");
                        return Ok(SessionEnd::Expired);
                    }
                }
                Event::Write(None) => return Ok(SessionEnd::InputClosed),
                Event::Canceled => return Ok(SessionEnd::Canceled),
            }
        }
    }

    /// Half-closes the session and consumes everything the remote still has
    /// to say, so words recognized between the last write and the close are
    /// not lost. Forwarded tail records keep the pre-rotation offset.
    async fn drain_session(&mut self, session: &mut RecognitionSession) -> Result<()> {
        session.close_send();
        debug!("consuming pending session recognitions");
        while let Some(records) = session.next_records().await {
            self.forward(records).await?;
        }
        if let Some(e) = session.take_err() {
            warn!(error = %e, "session receive half ended while draining");
        }
        Ok(())
    }

    async fn forward(&self, records: Vec<StreamingTranscriptRecord>) -> Result<()> {
        for mut record in records {
            record.shift(self.timeshift_offset);
            self.out_tx
                .send(record)
                .await
                .map_err(|_| DiscimError::Canceled)?;
        }
        Ok(())
    }

    fn set_err(&self, e: DiscimError) {
        *self.err.lock().unwrap_or_else(|e| e.into_inner()) = Some(e);
    }
}
