//! Pluggable progress reporting.
//!
//! Long operations publish updates through a [`ProgressSink`]. Three sinks
//! cover the standard wiring: drop everything, print to stderr for humans,
//! or publish JSON lines over a Unix socket to an external supervisor. The
//! socket peer may send back a `cancel` command, which fires a callback the
//! caller typically wires to its root cancellation token.

use crate::error::{DiscimError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Minimum interval between periodic updates of one long operation.
pub const MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(2_500);

/// One progress update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Human-readable description of the current phase.
    pub description: String,
    /// Current stage, 1-based.
    pub stage: i32,
    /// Total number of stages.
    pub stages: i32,
    /// Progress within the stage; -1 when reporting a failure.
    pub part: i64,
    /// Upper bound of `part`; -1 when unknown.
    pub total: i64,
}

/// Where progress updates go. Implementations must be cheap enough to call
/// from hot paths; anything slow should hand off internally.
pub trait ProgressSink: Send + Sync {
    fn update(&self, update: &ProgressUpdate) -> Result<()>;
}

/// Drops every update.
pub struct SilentSink;

impl ProgressSink for SilentSink {
    fn update(&self, _update: &ProgressUpdate) -> Result<()> {
        Ok(())
    }
}

/// Prints updates to stderr, one line each.
pub struct StderrSink;

impl ProgressSink for StderrSink {
    fn update(&self, update: &ProgressUpdate) -> Result<()> {
        eprintln!(
            "{} update: stage {}/{}, progress {}/{}",
            update.description, update.stage, update.stages, update.part, update.total
        );
        Ok(())
    }
}

/// Publishes updates as JSON lines over a Unix socket.
///
/// One subscriber is served at a time; updates sent while nobody is
/// connected are buffered. Any inbound line containing `cancel` fires the
/// callback and stops the sink.
pub struct SocketSink {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl SocketSink {
    /// Binds the socket and starts serving. An existing file at `path` is
    /// removed first.
    pub async fn bind<F>(path: impl AsRef<Path>, on_cancel: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let path: PathBuf = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(serve(listener, rx, Arc::new(on_cancel)));
        Ok(Self { tx })
    }
}

impl ProgressSink for SocketSink {
    fn update(&self, update: &ProgressUpdate) -> Result<()> {
        self.tx
            .send(update.clone())
            .map_err(|_| DiscimError::Progress {
                message: "socket task stopped".to_string(),
            })
    }
}

async fn serve(
    listener: UnixListener,
    mut updates: mpsc::UnboundedReceiver<ProgressUpdate>,
    on_cancel: Arc<dyn Fn() + Send + Sync>,
) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "progress socket accept failed");
                return;
            }
        };
        debug!("progress subscriber connected");

        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(update) = update else {
                        // Every sink handle is gone; nothing more to publish.
                        return;
                    };
                    let mut line = match serde_json::to_string(&update) {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(error = %e, "unable to encode progress update");
                            continue;
                        }
                    };
                    line.push('\n');
                    if writer.write_all(line.as_bytes()).await.is_err() {
                        // Subscriber went away; wait for the next one.
                        break;
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(command)) if command.contains("cancel") => {
                            debug!("cancel command received from progress subscriber");
                            on_cancel();
                            return;
                        }
                        Ok(Some(_)) => {}
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }
    }
}

/// Rate limiter for periodic updates. The first call is always ready.
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::with_interval(MIN_UPDATE_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True when enough time has passed since the last ready call.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}
