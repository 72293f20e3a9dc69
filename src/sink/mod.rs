//! Playback sink contract (§6.2): the engine only requires `Play/Pause/
//! Resume/Stop`, `SubmitBuffer`, `PendingBufferCount`, and a `BufferNeeded`
//! event. Concrete container/codec playback is out of scope per spec.md §1;
//! [`CpalSink`](cpal_sink::CpalSink) and [`TestSink`](test_sink::TestSink)
//! are the two collaborators the stream engine is built and tested against.

#[cfg(feature = "cpal-sink")]
pub mod cpal_sink;
pub mod test_sink;

use std::time::Duration;

use crate::decoder::AudioFormat;
use crate::error::Result;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SinkState {
    Playing,
    Paused,
    Stopped,
}

/// A buffer-consuming playback output. Implementations own exactly one
/// background thread that advances the audio pipeline and may call the
/// registered `BufferNeeded` callback; everything else runs on the caller's
/// thread (§5).
pub trait Sink: Send {
    fn format(&self) -> AudioFormat;

    fn play(&mut self) -> Result<()>;
    fn pause(&mut self);
    fn resume(&mut self);
    fn stop(&mut self, immediate: bool);
    fn state(&self) -> SinkState;

    /// Accepts 16-bit PCM, little-endian, block-align-aligned bytes.
    /// Non-empty and `len % blockAlign == 0` is the caller's responsibility
    /// (§6.2); violating it is an [`crate::error::MonoSoundError::InternalAssert`].
    fn submit_buffer(&mut self, bytes: Vec<u8>) -> Result<()>;

    fn pending_buffer_count(&self) -> usize;

    /// Total playable duration still queued and not yet consumed; used by
    /// `StreamPackage` to compute how much `playTime` has advanced between
    /// two `BufferNeeded` events.
    fn pending_buffer_duration(&self) -> Duration;

    /// Advances the audio pipeline one tick, possibly firing `BufferNeeded`.
    fn strobe_queue(&mut self);

    fn set_on_buffer_needed(&mut self, callback: Box<dyn FnMut() + Send>);

    fn volume(&self) -> f64;
    fn set_volume(&mut self, volume: f64);
    fn pan(&self) -> f64;
    fn set_pan(&mut self, pan: f64);
    fn pitch(&self) -> f64;
    fn set_pitch(&mut self, pitch: f64);
}
