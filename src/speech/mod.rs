//! Streaming transcription engine.
//!
//! The remote recognition service caps a single session at roughly five
//! minutes of audio. The engine hides that bound behind one logical stream:
//!
//! ```text
//! ┌──────────┐  write()  ┌──────────────────────────────┐  recv()  ┌──────────┐
//! │ Producer │──────────▶│ SpeechStream (session loop)  │─────────▶│ Consumer │
//! └──────────┘           │   open → active → rotate →…  │          └──────────┘
//!                        └──────────────┬───────────────┘
//!                                       │ one bounded session at a time
//!                                ┌──────▼───────┐
//!                                │ Recognition  │
//!                                │ backend      │
//!                                └──────────────┘
//! ```
//!
//! Sessions are rotated transparently: the send half is closed, the tail of
//! pending recognitions is drained, and the cumulative audio duration of the
//! finished session is added to every timestamp of the sessions that follow.

pub mod backend;
pub mod google;
pub mod proto;
pub mod session;
pub mod stream;

pub use backend::{
    BackendSession, RecognitionAlternative, RecognitionBackend, RecognitionResponse,
    RecognitionResult, ServiceStatus, WordSpan,
};
pub use google::{GoogleBackend, SpeechClient};
pub use session::RecognitionSession;
pub use stream::{SpeechStream, StreamConfig, StreamReceiver, StreamWriter};
