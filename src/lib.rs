//! discim - core engine for live "discursive image" installations.
//!
//! Spoken words are transcribed continuously through a remote recognition
//! service and each word is resolved to an image URL, producing a timed
//! stream of (word, image) pairs for downstream consumers:
//!
//! ```text
//! audio bytes ─▶ speech (rotating sessions) ─▶ transcript records
//!              ─▶ annotate (ring cache + image search) ─▶ annotated records
//! ```
//!
//! Transcoding, object storage, the websocket fan-out and all CLI wiring
//! live outside this crate.

pub mod annotate;
pub mod audio;
pub mod error;
pub mod progress;
pub mod search;
pub mod speech;
pub mod transcript;

pub use error::{DiscimError, Result};
