//! WAV/PCM decoder: RIFF chunk walking, §6.3. Only PCM (format code 1),
//! mono/stereo, 16/24-bit, 8kHz-48kHz is accepted; unknown subchunks are
//! skipped.

use std::time::Duration;

use crate::decoder::{AudioFormat, Decoder, ReadResult};
use crate::error::{MonoSoundError, Result};
use crate::sample::pcm24_to_pcm16;

struct RiffLayout {
    format: AudioFormat,
    data_offset: usize,
    data_len: usize,
}

fn read_u32_le(bytes: &[u8], at: usize) -> Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
        .ok_or_else(|| MonoSoundError::DecoderFailure("truncated RIFF chunk header".into()))
}

fn read_u16_le(bytes: &[u8], at: usize) -> Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|s| u16::from_le_bytes(s.try_into().unwrap()))
        .ok_or_else(|| MonoSoundError::DecoderFailure("truncated RIFF chunk header".into()))
}

/// Walk the RIFF chunk list, reading `fmt ` and locating `data`, skipping
/// every other (unknown) subchunk by its declared size.
fn parse_riff(bytes: &[u8]) -> Result<RiffLayout> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(MonoSoundError::DecoderFailure("not a RIFF/WAVE file".into()));
    }
    let mut pos = 12usize;
    let mut fmt: Option<(u16, u16, u32, u16)> = None; // (format_code, channels, sample_rate, bits_per_sample)
    let mut data: Option<(usize, usize)> = None;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32_le(bytes, pos + 4)? as usize;
        let body = pos + 8;
        if id == b"fmt " {
            if body + 16 > bytes.len() {
                return Err(MonoSoundError::DecoderFailure("truncated fmt chunk".into()));
            }
            let format_code = read_u16_le(bytes, body)?;
            let channels = read_u16_le(bytes, body + 2)?;
            let sample_rate = read_u32_le(bytes, body + 4)?;
            let bits_per_sample = read_u16_le(bytes, body + 14)?;
            fmt = Some((format_code, channels, sample_rate, bits_per_sample));
        } else if id == b"data" {
            let len = size.min(bytes.len().saturating_sub(body));
            data = Some((body, len));
        }
        // chunks are word-aligned; a size is a byte count, padded to even.
        pos = body + size + (size % 2);
    }

    let (format_code, channels, sample_rate, bits_per_sample) = fmt
        .ok_or_else(|| MonoSoundError::DecoderFailure("missing fmt chunk".into()))?;
    let (data_offset, data_len) = data
        .ok_or_else(|| MonoSoundError::DecoderFailure("missing data chunk".into()))?;

    if format_code != 1 {
        return Err(MonoSoundError::UnsupportedFormat(format!(
            "WAV format code {format_code} (only PCM=1 supported)"
        )));
    }
    if !(channels == 1 || channels == 2) {
        return Err(MonoSoundError::UnsupportedFormat(format!(
            "WAV channel count {channels} (only mono/stereo supported)"
        )));
    }
    if !(bits_per_sample == 16 || bits_per_sample == 24) {
        return Err(MonoSoundError::UnsupportedFormat(format!(
            "WAV bit depth {bits_per_sample} (only 16/24-bit PCM supported)"
        )));
    }
    if !(8000..=48000).contains(&sample_rate) {
        return Err(MonoSoundError::UnsupportedFormat(format!(
            "WAV sample rate {sample_rate} (must be in [8000, 48000])"
        )));
    }

    Ok(RiffLayout {
        format: AudioFormat { sample_rate, channels, bits_per_sample },
        data_offset,
        data_len,
    })
}

/// A fully-seekable WAV/PCM decoder over an in-memory file.
#[derive(Debug)]
pub struct WavDecoder {
    format: AudioFormat,
    data: Vec<u8>,
    block_align: usize,
    read_pos: usize,
}

impl WavDecoder {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let layout = parse_riff(bytes)?;
        let data = bytes[layout.data_offset..layout.data_offset + layout.data_len].to_vec();
        let block_align = (layout.format.channels as usize) * (layout.format.bits_per_sample as usize / 8);
        if !data.len().is_multiple_of(block_align) {
            return Err(MonoSoundError::DecoderFailure(
                "PCM data length is not a multiple of the block alignment".into(),
            ));
        }
        Ok(Self {
            format: layout.format,
            data,
            block_align,
            read_pos: 0,
        })
    }

    /// Raw PCM payload, exposed for one-shot effect loading (the whole file
    /// is decoded once and handed to the caller, per spec.md's one-shot
    /// control flow).
    pub fn whole_data(&self) -> &[u8] {
        &self.data
    }
}

impl Decoder for WavDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_bytes(&self) -> Option<i64> {
        Some(self.data.len() as i64)
    }

    fn max_duration(&self) -> Option<Duration> {
        let frames = self.data.len() / self.block_align;
        Some(Duration::from_secs_f64(frames as f64 / self.format.sample_rate as f64))
    }

    fn read_samples(&mut self, seconds: f64) -> Result<ReadResult> {
        if seconds <= 0.0 {
            return Err(MonoSoundError::InternalAssert(
                "requested to read zero or negative samples".into(),
            ));
        }
        let bytes_per_sec = self.format.sample_rate as f64
            * self.block_align as f64;
        let mut want = (seconds * bytes_per_sec).round() as usize;
        want -= want % self.block_align;
        want = want.max(self.block_align);

        let available = self.data.len() - self.read_pos;
        let take = want.min(available);
        let mut bytes = self.data[self.read_pos..self.read_pos + take].to_vec();
        self.read_pos += take;

        if self.format.bits_per_sample == 24 {
            bytes = pcm24_to_pcm16(&bytes);
        }

        Ok(ReadResult {
            bytes_read: take as u64,
            check_loop: take < want || self.read_pos >= self.data.len(),
            bytes,
        })
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let bytes_per_sec = self.format.sample_rate as f64 * self.block_align as f64;
        let mut pos = (seconds * bytes_per_sec).round() as usize;
        pos -= pos % self.block_align;
        self.read_pos = pos.min(self.data.len());
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        self.read_pos = 0;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}
