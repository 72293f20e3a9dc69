//! In-memory [`Sink`] used by unit and integration tests: no audio
//! hardware, just a FIFO of submitted buffers with a timestamp-free
//! duration ledger, grounded in the ring-buffer/frame-accounting style of
//! `StreamState` (buffered `TimestampedFrame`s, drained on delivery).

use std::collections::VecDeque;
use std::time::Duration;

use crate::decoder::AudioFormat;
use crate::error::{MonoSoundError, Result};
use crate::sink::{Sink, SinkState};

pub struct TestSink {
    format: AudioFormat,
    state: SinkState,
    queue: VecDeque<Vec<u8>>,
    on_buffer_needed: Option<Box<dyn FnMut() + Send>>,
    volume: f64,
    pan: f64,
    pitch: f64,
    /// Total bytes ever popped by `drain_one`/`strobe_queue`, for test assertions.
    total_drained_buffers: usize,
}

impl TestSink {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            state: SinkState::Stopped,
            queue: VecDeque::new(),
            on_buffer_needed: None,
            volume: 1.0,
            pan: 0.0,
            pitch: 1.0,
            total_drained_buffers: 0,
        }
    }

    fn buffer_duration(&self, bytes: &[u8]) -> Duration {
        let block_align = self.format.block_align().max(1) as usize;
        let frames = bytes.len() / block_align;
        Duration::from_secs_f64(frames as f64 / self.format.sample_rate as f64)
    }

    /// Test hook: simulates the device consuming exactly one submitted
    /// buffer, without invoking the `BufferNeeded` callback.
    pub fn drain_one(&mut self) -> Option<Vec<u8>> {
        let popped = self.queue.pop_front();
        if popped.is_some() {
            self.total_drained_buffers += 1;
        }
        popped
    }

    pub fn total_drained_buffers(&self) -> usize {
        self.total_drained_buffers
    }

    pub fn queued_buffers(&self) -> &VecDeque<Vec<u8>> {
        &self.queue
    }
}

impl Sink for TestSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn play(&mut self) -> Result<()> {
        self.state = SinkState::Playing;
        Ok(())
    }

    fn pause(&mut self) {
        self.state = SinkState::Paused;
    }

    fn resume(&mut self) {
        self.state = SinkState::Playing;
    }

    fn stop(&mut self, immediate: bool) {
        self.state = SinkState::Stopped;
        if immediate {
            self.queue.clear();
        }
    }

    fn state(&self) -> SinkState {
        self.state
    }

    fn submit_buffer(&mut self, bytes: Vec<u8>) -> Result<()> {
        let block_align = self.format.block_align() as usize;
        if bytes.is_empty() || !bytes.len().is_multiple_of(block_align) {
            return Err(MonoSoundError::InternalAssert(
                "submitted buffer is empty or not block-align-aligned".into(),
            ));
        }
        self.queue.push_back(bytes);
        Ok(())
    }

    fn pending_buffer_count(&self) -> usize {
        self.queue.len()
    }

    fn pending_buffer_duration(&self) -> Duration {
        self.queue.iter().map(|b| self.buffer_duration(b)).sum()
    }

    fn strobe_queue(&mut self) {
        if self.state == SinkState::Playing {
            self.drain_one();
        }
        if let Some(cb) = &mut self.on_buffer_needed {
            cb();
        }
    }

    fn set_on_buffer_needed(&mut self, callback: Box<dyn FnMut() + Send>) {
        self.on_buffer_needed = Some(callback);
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn pan(&self) -> f64 {
        self.pan
    }

    fn set_pan(&mut self, pan: f64) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    fn pitch(&self) -> f64 {
        self.pitch
    }

    fn set_pitch(&mut self, pitch: f64) {
        self.pitch = pitch.max(0.01);
    }
}
