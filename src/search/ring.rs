//! Per-query rotating cache of candidate image URLs.
//!
//! Every query maps to a ring of results in upstream order. Returning a URL
//! advances the cursor, so a word spoken repeatedly cycles through its
//! candidates. Entries are validated lazily: the first time the cursor
//! touches one, an HTTP HEAD decides whether the URL still points at an
//! image, and the verdict is remembered. A ring left without a single valid
//! entry is evicted and the query reported as a miss, which makes the
//! caller refill it from a fresh search.

use crate::search::client::ImageResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Bound on one liveness probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Decides whether a URL still serves an image.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_live(&self, url: &str) -> bool;
}

/// Production prober: HEAD with a 2-second bound. A URL is live when the
/// request succeeds with a status below 400 and a `Content-Type` containing
/// `"image"`.
pub struct HeadProbe {
    client: reqwest::Client,
}

impl HeadProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HeadProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LivenessProbe for HeadProbe {
    async fn is_live(&self, url: &str) -> bool {
        let response = match self.client.head(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response,
            Err(_) => return false,
        };
        if response.status().as_u16() >= 400 {
            return false;
        }
        response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|content_type| content_type.contains("image"))
    }
}

/// A cached result and what the prober said about it. `valid` is meaningful
/// only once `checked` is set.
#[derive(Debug, Clone)]
pub struct TouchedImage {
    pub image: ImageResult,
    pub checked: bool,
    pub valid: bool,
}

/// The rotating candidate set of one query.
#[derive(Debug)]
pub struct ImageRing {
    entries: Vec<TouchedImage>,
    index: usize,
}

impl ImageRing {
    pub fn new(results: Vec<ImageResult>) -> Self {
        Self {
            entries: results
                .into_iter()
                .map(|image| TouchedImage {
                    image,
                    checked: false,
                    valid: false,
                })
                .collect(),
            index: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the next valid image and advances the cursor past it, or
    /// `None` once a full scan finds no valid entry. Unchecked entries are
    /// probed on the way; an entry is never probed twice.
    async fn next(&mut self, probe: &dyn LivenessProbe) -> Option<ImageResult> {
        let count = self.entries.len();
        for step in 0..count {
            let i = (self.index + step) % count;
            let entry = &mut self.entries[i];
            if !entry.checked {
                entry.valid = probe.is_live(&entry.image.link).await;
                entry.checked = true;
            }
            if entry.valid {
                self.index = (i + 1) % count;
                return Some(entry.image.clone());
            }
        }
        None
    }
}

/// Query-keyed ring cache. All operations serialize under one mutex; a
/// probe holds the guard, which is acceptable because probes are bounded by
/// [`PROBE_TIMEOUT`] and the cache is not on the recognition path.
pub struct RingCache {
    probe: Box<dyn LivenessProbe>,
    rings: Mutex<HashMap<String, ImageRing>>,
}

impl RingCache {
    pub fn new(probe: impl LivenessProbe + 'static) -> Self {
        Self {
            probe: Box::new(probe),
            rings: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the next valid image for `query`, or `None` on a miss. A
    /// query whose ring has no valid entry left is evicted and reported as
    /// a miss.
    pub async fn next(&self, query: &str) -> Option<ImageResult> {
        let mut rings = self.rings.lock().await;
        let ring = rings.get_mut(query)?;
        match ring.next(self.probe.as_ref()).await {
            Some(image) => Some(image),
            None => {
                debug!(query, "ring exhausted; evicting");
                rings.remove(query);
                None
            }
        }
    }

    /// Replaces the ring of `query` with a fresh one built from `results`:
    /// cursor at the front, all liveness verdicts forgotten.
    pub async fn set(&self, query: &str, results: Vec<ImageResult>) {
        let mut rings = self.rings.lock().await;
        rings.insert(query.to_string(), ImageRing::new(results));
    }

    /// Number of cached queries.
    pub async fn len(&self) -> usize {
        self.rings.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rings.lock().await.is_empty()
    }
}
