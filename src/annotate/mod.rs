//! Ordered image annotation of a CSV record stream.
//!
//! ```text
//! ┌────────┐ rows ┌────────────┐ pending slots ┌────────┐
//! │ Reader │─────▶│ Dispatcher │──────────────▶│ Writer │──▶ output
//! └────────┘      └─────┬──────┘   (in order)  └────────┘
//!                       │ spawn ≤ max_concurrency workers
//!                 ┌─────▼──────┐
//!                 │ Ring cache │──▶ image search on miss
//!                 └────────────┘
//! ```
//!
//! The dispatcher reads records sequentially and enqueues a pending slot
//! for each one before spawning its worker, so the writer emits rows in
//! input order no matter which lookup finishes first. A worker resolves its
//! record's query through the ring cache, falling back to one upstream
//! search that refills the ring. Per-record failures are logged and the
//! record is dropped; only a failure to write to the output sink stops the
//! pipeline.

use crate::error::{DiscimError, Result};
use crate::progress::{ProgressSink, ProgressUpdate, Throttle};
use crate::search::client::ImageSearcher;
use crate::search::ring::RingCache;
use crate::transcript::raw::TEXT_COLUMN;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Maximum number of lookups in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Deadline of one per-record lookup. Independent of the outer token:
/// cancellation lets in-flight lookups finish within this bound.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the annotation pipeline.
#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    /// 0-indexed column holding the query word.
    pub query_column: usize,
    /// Maximum number of concurrently running lookups.
    pub max_concurrency: usize,
    /// Deadline of one per-record lookup.
    pub lookup_timeout: Duration,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            query_column: TEXT_COLUMN,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }
}

/// One record's slot in the ordered completion queue.
struct PendingRecord {
    done_rx: oneshot::Receiver<Result<Vec<String>>>,
}

/// The annotation pipeline.
pub struct AnnotatePipeline {
    searcher: Arc<dyn ImageSearcher>,
    cache: Arc<RingCache>,
    config: AnnotateConfig,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl AnnotatePipeline {
    pub fn new(
        searcher: Arc<dyn ImageSearcher>,
        cache: Arc<RingCache>,
        config: AnnotateConfig,
    ) -> Self {
        Self {
            searcher,
            cache,
            config,
            progress: None,
        }
    }

    /// Attaches a progress sink; the pipeline reports the number of written
    /// records periodically.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs the pipeline until the input ends, `cancel` fires, or the
    /// output sink fails.
    ///
    /// On cancellation no further input is read, but in-flight lookups
    /// complete (bounded by the per-record deadline) and their rows are
    /// flushed; cancellation itself is not an error. A sink failure is: the
    /// pipeline stops and the write error is returned.
    pub async fn run<R, W>(&self, input: R, output: W, cancel: CancellationToken) -> Result<()>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (row_tx, mut row_rx) = mpsc::channel::<Vec<String>>(1);
        let reader_handle = tokio::task::spawn_blocking(move || read_rows(input, row_tx));

        let (pending_tx, pending_rx) =
            mpsc::channel::<PendingRecord>(self.config.max_concurrency);
        let (abort_tx, mut abort_rx) = mpsc::channel::<()>(1);
        let writer_handle = tokio::spawn(write_annotated(
            output,
            pending_rx,
            abort_tx,
            self.progress.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));

        loop {
            let row = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("cancellation received; no more input records");
                    break;
                }
                Some(()) = abort_rx.recv() => {
                    error!("annotation writer failed; aborting pipeline");
                    break;
                }
                row = row_rx.recv() => match row {
                    Some(row) => row,
                    None => break, // input exhausted
                },
            };

            let (done_tx, done_rx) = oneshot::channel();
            if pending_tx.send(PendingRecord { done_rx }).await.is_err() {
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let searcher = self.searcher.clone();
            let cache = self.cache.clone();
            let column = self.config.query_column;
            let lookup_timeout = self.config.lookup_timeout;
            tokio::spawn(async move {
                let _permit = permit; // held until the lookup is done
                let outcome = tokio::time::timeout(
                    lookup_timeout,
                    annotate_record(searcher.as_ref(), &cache, row, column),
                )
                .await
                .unwrap_or_else(|_| {
                    Err(DiscimError::Record {
                        message: "lookup deadline exceeded".to_string(),
                    })
                });
                let _ = done_tx.send(outcome);
            });
        }

        // Stop the reader and let the writer finish the in-flight tail.
        drop(row_rx);
        drop(pending_tx);

        // Wait for outstanding workers; each is bounded by the per-record
        // deadline.
        let _ = semaphore
            .acquire_many(self.config.max_concurrency as u32)
            .await;
        let _ = reader_handle.await;

        writer_handle.await.unwrap_or_else(|e| {
            Err(DiscimError::Io(std::io::Error::other(format!(
                "writer task ended abnormally: {e}"
            ))))
        })
    }
}

/// Pumps CSV rows into the dispatcher. Runs on the blocking pool because
/// the reader is synchronous.
fn read_rows<R: Read>(input: R, row_tx: mpsc::Sender<Vec<String>>) {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(input);
    let mut row = csv::StringRecord::new();
    loop {
        match reader.read_record(&mut row) {
            Ok(false) => break,
            Ok(true) => {
                let fields: Vec<String> = row.iter().map(|field| field.to_string()).collect();
                if row_tx.blocking_send(fields).is_err() {
                    // Dispatcher is gone; stop reading.
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "unable to read input record");
                break;
            }
        }
    }
}

/// Resolves one record's query to an image URL and appends it.
///
/// Cache miss path: one upstream search refills the ring with every result,
/// then the ring is read again. Zero results never mutate the record; the
/// failure is logged upstream and the record dropped.
async fn annotate_record(
    searcher: &dyn ImageSearcher,
    cache: &RingCache,
    mut row: Vec<String>,
    column: usize,
) -> Result<Vec<String>> {
    let Some(key) = row.get(column).cloned() else {
        return Err(DiscimError::Record {
            message: format!("tried to access column {column} out of {}", row.len()),
        });
    };

    if let Some(image) = cache.next(&key).await {
        row.push(image.link);
        return Ok(row);
    }

    let items = searcher.search_images(&key).await?;
    if items.is_empty() {
        return Err(DiscimError::Record {
            message: format!("no results for {key:?}"),
        });
    }
    cache.set(&key, items).await;

    let Some(image) = cache.next(&key).await else {
        // Every fresh result failed its liveness probe.
        return Err(DiscimError::Record {
            message: format!("no live result for {key:?}"),
        });
    };
    row.push(image.link);
    Ok(row)
}

/// Walks the pending queue in submission order and writes finished rows.
///
/// Per-record failures are skipped with a log line. Anything else — a
/// worker error outside the per-record taxonomy or a sink write failure —
/// is critical: the dispatcher is signalled and the error returned.
async fn write_annotated<W: Write + Send + 'static>(
    output: W,
    mut pending_rx: mpsc::Receiver<PendingRecord>,
    abort_tx: mpsc::Sender<()>,
    progress: Option<Arc<dyn ProgressSink>>,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    let mut throttle = Throttle::new();
    let mut written: i64 = 0;

    report(&progress, None, written, -1);

    while let Some(pending) = pending_rx.recv().await {
        let outcome = pending.done_rx.await.unwrap_or_else(|_| {
            Err(DiscimError::Record {
                message: "worker dropped without a result".to_string(),
            })
        });

        let row = match outcome {
            Ok(row) => row,
            Err(e) if e.is_per_record() => {
                // The log is here to prevent records from being discarded
                // silently.
                warn!(error = %e, "unable to obtain link");
                continue;
            }
            Err(e) => {
                let _ = abort_tx.try_send(());
                return Err(e);
            }
        };

        if let Err(e) = writer.write_record(&row) {
            let _ = abort_tx.try_send(());
            return Err(e.into());
        }
        if let Err(e) = writer.flush() {
            let _ = abort_tx.try_send(());
            return Err(DiscimError::Io(e));
        }

        written += 1;
        report(&progress, Some(&mut throttle), written, -1);
    }

    report(&progress, None, written, written);
    Ok(())
}

fn report(
    progress: &Option<Arc<dyn ProgressSink>>,
    throttle: Option<&mut Throttle>,
    part: i64,
    total: i64,
) {
    let Some(sink) = progress else { return };
    if let Some(throttle) = throttle {
        if !throttle.ready() {
            return;
        }
    }
    let update = ProgressUpdate {
        description: "annotating".to_string(),
        stage: 1,
        stages: 1,
        part,
        total,
    };
    if let Err(e) = sink.update(&update) {
        warn!(error = %e, "unable to publish progress update");
    }
}
