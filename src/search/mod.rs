//! Remote image search and the per-query ring cache.
//!
//! The client is stateless: one query in, an ordered list of candidate
//! images out. The ring cache sits on top of it so that a word spoken many
//! times drains a rotating set of already-validated URLs instead of calling
//! the service again.

pub mod client;
pub mod ring;

pub use client::{
    ImageMeta, ImageResult, ImageSearchClient, ImageSearcher, ImageSize, ImageType, SearchFilters,
};
pub use ring::{HeadProbe, ImageRing, LivenessProbe, RingCache, TouchedImage};
