//! Decoder contract (§6.1) and the codec capability vector (§6.1's table).
//!
//! Concrete container parsing for Ogg Vorbis, XACT (XWB/XSB) and XNB is
//! explicitly out of scope (spec.md §1): those containers are modeled by
//! their capability flags only, so [`crate::stream::StreamPackage`] and the
//! segmented-loop controller can be exercised against every decoder kind
//! described in the table without depending on their real byte layouts.
//! [`WavDecoder`] is fully implemented since WAV/PCM utilities are the one
//! container spec.md treats as in-scope plumbing (§1, §6.3).

pub mod wav;

use std::time::Duration;

use crate::error::Result;

/// Format description returned by [`Decoder::format`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }
}

/// The result of one `read_samples` call: decoded bytes, how many bytes of
/// source were consumed, and whether the caller should check for a loop
/// boundary immediately.
pub struct ReadResult {
    pub bytes: Vec<u8>,
    pub bytes_read: u64,
    pub check_loop: bool,
}

/// A PCM-producing decoder, owned exclusively by one [`crate::stream::StreamPackage`].
pub trait Decoder: Send {
    fn format(&self) -> AudioFormat;

    /// Total size of the decoded PCM stream in bytes, or `None` if unknown.
    fn total_bytes(&self) -> Option<i64>;

    /// Maximum playable duration, or `None` if unbounded/unknown.
    fn max_duration(&self) -> Option<Duration>;

    fn read_samples(&mut self, seconds: f64) -> Result<ReadResult>;

    /// Seek to an absolute time offset. Decoders that cannot seek (MP3)
    /// return [`crate::error::MonoSoundError::Unsupported`].
    fn seek(&mut self, seconds: f64) -> Result<()>;

    /// Reset to the start of the sample data.
    fn reset(&mut self) -> Result<()>;

    fn is_seekable(&self) -> bool;
}

/// Which container kind produced a [`Decoder`], used only to report the
/// capability vector from §6.1's table (seek/duration/default-loop).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    Wav,
    Xnb,
    OggVorbis,
    Mp3,
    XactWaveBank,
    Dynamic,
}

impl ContainerKind {
    pub fn supports_seek(self) -> bool {
        !matches!(self, ContainerKind::Mp3 | ContainerKind::Dynamic)
    }

    pub fn supports_duration(self) -> bool {
        !matches!(self, ContainerKind::Mp3 | ContainerKind::Dynamic)
    }

    pub fn default_looping(self) -> bool {
        !matches!(self, ContainerKind::Dynamic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_vector_matches_table() {
        assert!(ContainerKind::Wav.supports_seek());
        assert!(ContainerKind::Xnb.supports_seek());
        assert!(ContainerKind::OggVorbis.supports_seek());
        assert!(!ContainerKind::Mp3.supports_seek());
        assert!(ContainerKind::XactWaveBank.supports_seek());
        assert!(!ContainerKind::Dynamic.supports_seek());

        assert!(!ContainerKind::Mp3.supports_duration());
        assert!(!ContainerKind::Dynamic.default_looping());
        assert!(ContainerKind::Mp3.default_looping());
    }
}
