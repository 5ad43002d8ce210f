//! Audio stream parameters and time-offset accounting.
//!
//! The recognition service consumes raw Linear16 PCM. Because the format is
//! constant for the lifetime of a stream, the number of bytes pushed to a
//! session is an exact measure of the audio time it covers; the engine uses
//! this to shift session-relative word timestamps onto the logical stream
//! timeline.

use std::time::Duration;

/// Parameters of the Linear16 PCM stream sent to the recognition service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    /// Samples per second (Hz).
    pub sample_rate: u32,
    /// Bits used to represent one sample.
    pub bit_depth: u32,
    /// Number of interleaved channels.
    pub channels: u32,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            bit_depth: 16,
            channels: 1,
        }
    }
}

impl AudioSpec {
    /// Bits of audio data per second of signal.
    pub fn bitrate(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.bit_depth) * u64::from(self.channels)
    }

    /// Bytes of audio data per second of signal.
    pub fn byte_rate(&self) -> u64 {
        self.bitrate() / 8
    }

    /// Duration of signal covered by `bytes` of audio data.
    ///
    /// Returns zero for a degenerate spec (zero byte rate) rather than
    /// dividing by zero.
    pub fn duration_for_bytes(&self, bytes: usize) -> Duration {
        let byte_rate = self.byte_rate();
        if byte_rate == 0 {
            return Duration::ZERO;
        }
        let nanos = bytes as u128 * 1_000_000_000 / byte_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Number of bytes covering `duration` of signal.
    pub fn bytes_for_duration(&self, duration: Duration) -> usize {
        (duration.as_nanos() * self.byte_rate() as u128 / 1_000_000_000) as usize
    }
}
