//! Dynamic stream (C9): a stream package whose decoder is the caller
//! rather than a file/container parser. The caller supplies a
//! `read_samples` closure that produces raw PCM on demand; an empty
//! return is treated as decoder failure and folds into `handle_looping`,
//! same as any other decoder (§7).
//!
//! Seeking and looping are "locked off" per §4.10 simply because this
//! decoder answers `is_seekable() == false` and `seek()` with
//! [`MonoSoundError::Unsupported`] — [`crate::stream::StreamPackage`]
//! already refuses `attach_loop_segments` on a non-seekable decoder and
//! propagates `seek`'s error straight out of `set_stream_position`, so no
//! special-casing is needed in the stream package itself.

use std::time::Duration;

use crate::decoder::{AudioFormat, Decoder, ReadResult};
use crate::error::{MonoSoundError, Result};

/// A user-driven PCM producer: given a requested duration in seconds,
/// returns raw interleaved PCM bytes matching [`DynamicDecoder::format`].
/// An empty return signals end-of-stream/failure.
pub type PcmProducer = Box<dyn FnMut(f64) -> Vec<u8> + Send>;

pub struct DynamicDecoder {
    format: AudioFormat,
    produce: PcmProducer,
    bytes_read: u64,
}

impl DynamicDecoder {
    pub fn new(channels: u16, sample_rate: u32, bits_per_sample: u16, produce: PcmProducer) -> Self {
        Self {
            format: AudioFormat { sample_rate, channels, bits_per_sample },
            produce,
            bytes_read: 0,
        }
    }
}

impl Decoder for DynamicDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_bytes(&self) -> Option<i64> {
        None
    }

    fn max_duration(&self) -> Option<Duration> {
        None
    }

    fn read_samples(&mut self, seconds: f64) -> Result<ReadResult> {
        let bytes = (self.produce)(seconds);
        if bytes.is_empty() {
            return Ok(ReadResult { bytes: Vec::new(), bytes_read: 0, check_loop: true });
        }
        let produced = bytes.len() as u64;
        self.bytes_read += produced;
        Ok(ReadResult { bytes, bytes_read: produced, check_loop: false })
    }

    fn seek(&mut self, _seconds: f64) -> Result<()> {
        Err(MonoSoundError::Unsupported("dynamic streams do not support seeking"))
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::test_sink::TestSink;
    use crate::stream::StreamPackage;

    fn silence_producer(frames_per_call: usize) -> PcmProducer {
        Box::new(move |_seconds| vec![0u8; frames_per_call * 2])
    }

    #[test]
    fn dynamic_decoder_reports_unknown_duration_and_size() {
        let decoder = DynamicDecoder::new(1, 44100, 16, silence_producer(100));
        assert!(decoder.total_bytes().is_none());
        assert!(decoder.max_duration().is_none());
        assert!(!decoder.is_seekable());
    }

    #[test]
    fn seek_is_unsupported() {
        let mut decoder = DynamicDecoder::new(1, 44100, 16, silence_producer(100));
        let err = decoder.seek(1.0).unwrap_err();
        assert!(matches!(err, MonoSoundError::Unsupported(_)));
    }

    #[test]
    fn empty_producer_return_signals_end_of_stream() {
        let mut decoder = DynamicDecoder::new(1, 44100, 16, Box::new(|_| Vec::new()));
        let read = decoder.read_samples(0.01).unwrap();
        assert!(read.bytes.is_empty());
        assert!(read.check_loop);
    }

    #[test]
    fn set_stream_position_on_dynamic_stream_surfaces_unsupported() {
        let decoder = Box::new(DynamicDecoder::new(1, 44100, 16, silence_producer(1000)));
        let sink = Box::new(TestSink::new(AudioFormat { sample_rate: 44100, channels: 1, bits_per_sample: 16 }));
        let mut stream = StreamPackage::new(decoder, sink, false);
        let err = stream.set_stream_position(1.0).unwrap_err();
        assert!(matches!(err, MonoSoundError::Unsupported(_)));
    }

    #[test]
    fn pre_submit_byte_hook_observes_final_bytes() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let decoder = Box::new(DynamicDecoder::new(1, 44100, 16, silence_producer(10_000)));
        let sink = Box::new(TestSink::new(AudioFormat { sample_rate: 44100, channels: 1, bits_per_sample: 16 }));
        let mut stream = StreamPackage::new(decoder, sink, false);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        stream.set_pre_submit_byte_hook(Box::new(move |bytes: &mut Vec<u8>| {
            calls2.fetch_add(1, Ordering::SeqCst);
            for b in bytes.iter_mut() {
                *b = 0xFF;
            }
        }));

        let config = crate::config::EngineConfig::default();
        stream.fill_queue(&config, 0.0).unwrap();
        assert!(calls.load(Ordering::SeqCst) > 0);
    }
}
