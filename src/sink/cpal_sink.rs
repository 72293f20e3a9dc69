//! Real audio output via `cpal`, grounded directly in the teacher's
//! `create_stream`/`write_audio`/`AtomicVolume` machinery. Feature-gated
//! behind `cpal-sink` so the crate builds headless (CI, tests) without it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};

use crate::decoder::AudioFormat;
use crate::error::{MonoSoundError, Result};
use crate::sink::{Sink, SinkState};

/// Lock-free-ish volume control shared with the audio callback, the same
/// pattern as the teacher's `AtomicVolume` (stores `f64` bit patterns in an
/// `AtomicU64` since `AtomicF64` doesn't exist in std).
#[derive(Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }
    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed)
    }
}

const RING_CAPACITY_FRAMES: usize = 1 << 15;

/// `cpal::Stream` is deliberately `!Send` on all platforms (see cpal's
/// `NotSendSyncAcrossAllPlatforms` marker) even though the underlying
/// platform streams used here are safe to drop/control from another
/// thread; the audio callback itself runs on cpal's own thread regardless
/// of which thread holds this handle.
struct SendStream(cpal::Stream);
unsafe impl Send for SendStream {}

pub struct CpalSink {
    format: AudioFormat,
    state: SinkState,
    stream: Option<SendStream>,
    producer: Option<HeapProd<i16>>,
    /// Bytes handed to `submit_buffer` but not yet pushed into the ring
    /// (the ring may be briefly full); mirrors the teacher's `sample_deque`.
    pending_bytes: VecDeque<u8>,
    submitted_frames_total: Arc<AtomicU64>,
    consumed_frames_total: Arc<AtomicU64>,
    /// Frame length of each `submit_buffer` call still outstanding, oldest
    /// first; reaped in `reap_consumed_buffers` as `consumed_frames_total`
    /// passes each entry's cumulative length. `pending_buffer_count` is the
    /// length of this queue, a *buffer* count, matching `TestSink` and the
    /// unit `StreamPackage::fill_queue` expects — not the raw frame count
    /// `submitted_frames_total - consumed_frames_total` would give.
    pending_buffer_frames: Mutex<VecDeque<u64>>,
    /// Cumulative frames belonging to buffers already reaped from
    /// `pending_buffer_frames`.
    frames_accounted: AtomicU64,
    needs_buffer: Arc<Mutex<bool>>,
    on_buffer_needed: Option<Box<dyn FnMut() + Send>>,
    volume: Arc<AtomicF64>,
    pan: f64,
    pitch: f64,
}

impl CpalSink {
    pub fn new(format: AudioFormat) -> Result<Self> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or_else(|| MonoSoundError::AudioHardwareMissing("no output device available".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| MonoSoundError::AudioHardwareMissing(e.to_string()))?;

        let stream_config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring: HeapRb<i16> = HeapRb::new(RING_CAPACITY_FRAMES * format.channels as usize);
        let (producer, consumer) = ring.split();

        let volume = Arc::new(AtomicF64::new(1.0));
        let consumed_frames_total = Arc::new(AtomicU64::new(0));
        let needs_buffer = Arc::new(Mutex::new(false));

        let stream = build_stream(
            &device,
            &stream_config,
            supported.sample_format(),
            consumer,
            volume.clone(),
            consumed_frames_total.clone(),
            needs_buffer.clone(),
            format.channels,
        )?;

        Ok(Self {
            format,
            state: SinkState::Stopped,
            stream: Some(SendStream(stream)),
            producer: Some(producer),
            pending_bytes: VecDeque::new(),
            submitted_frames_total: Arc::new(AtomicU64::new(0)),
            consumed_frames_total,
            pending_buffer_frames: Mutex::new(VecDeque::new()),
            frames_accounted: AtomicU64::new(0),
            needs_buffer,
            on_buffer_needed: None,
            volume,
            pan: 0.0,
            pitch: 1.0,
        })
    }

    fn push_pending_into_ring(&mut self) {
        let Some(producer) = self.producer.as_mut() else { return };
        while self.pending_bytes.len() >= 2 {
            if producer.is_full() {
                break;
            }
            let lo = self.pending_bytes.pop_front().unwrap();
            let hi = self.pending_bytes.pop_front().unwrap();
            let sample = i16::from_le_bytes([lo, hi]);
            let _ = producer.try_push(sample);
        }
    }

    /// Pops any `submit_buffer` entries whose frames have been fully
    /// consumed by the audio callback, in submission order.
    fn reap_consumed_buffers(&self) {
        let consumed = self.consumed_frames_total.load(Ordering::Relaxed);
        let mut accounted = self.frames_accounted.load(Ordering::Relaxed);
        let mut queue = self.pending_buffer_frames.lock().unwrap();
        while let Some(&front_len) = queue.front() {
            if consumed >= accounted + front_len {
                accounted += front_len;
                queue.pop_front();
            } else {
                break;
            }
        }
        self.frames_accounted.store(accounted, Ordering::Relaxed);
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: SampleFormat,
    consumer: impl Consumer<Item = i16> + Send + 'static,
    volume: Arc<AtomicF64>,
    consumed_frames_total: Arc<AtomicU64>,
    needs_buffer: Arc<Mutex<bool>>,
    channels: u16,
) -> Result<cpal::Stream> {
    match sample_format {
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, consumer, volume, consumed_frames_total, needs_buffer, channels),
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, consumer, volume, consumed_frames_total, needs_buffer, channels),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, consumer, volume, consumed_frames_total, needs_buffer, channels),
        other => Err(MonoSoundError::AudioHardwareMissing(format!("unsupported device sample format: {other:?}"))),
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: impl Consumer<Item = i16> + Send + 'static,
    volume: Arc<AtomicF64>,
    consumed_frames_total: Arc<AtomicU64>,
    needs_buffer: Arc<Mutex<bool>>,
    channels: u16,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = channels as usize;
    let err_fn = |e| log::error!("cpal stream error: {e}");
    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                let vol = volume.load() as f32;
                let mut consumed_samples = 0u64;
                for sample_slot in data.iter_mut() {
                    let value = match consumer.try_pop() {
                        Some(raw) => {
                            consumed_samples += 1;
                            (raw as f32 / i16::MAX as f32) * vol
                        }
                        None => 0.0,
                    };
                    *sample_slot = T::from_sample(value);
                }
                let frames = consumed_samples / channels.max(1) as u64;
                if frames > 0 {
                    consumed_frames_total.fetch_add(frames, Ordering::Relaxed);
                    *needs_buffer.lock().unwrap() = true;
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| MonoSoundError::AudioHardwareMissing(e.to_string()))?;
    Ok(stream)
}

impl Sink for CpalSink {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn play(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream.0.play().map_err(|e| MonoSoundError::AudioHardwareMissing(e.to_string()))?;
        }
        self.state = SinkState::Playing;
        Ok(())
    }

    fn pause(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.0.pause();
        }
        self.state = SinkState::Paused;
    }

    fn resume(&mut self) {
        if let Some(stream) = &self.stream {
            let _ = stream.0.play();
        }
        self.state = SinkState::Playing;
    }

    fn stop(&mut self, immediate: bool) {
        if let Some(stream) = &self.stream {
            let _ = stream.0.pause();
        }
        self.state = SinkState::Stopped;
        if immediate {
            self.pending_bytes.clear();
            let submitted = self.submitted_frames_total.load(Ordering::Relaxed);
            self.frames_accounted.store(submitted, Ordering::Relaxed);
            self.pending_buffer_frames.lock().unwrap().clear();
        }
    }

    fn state(&self) -> SinkState {
        self.state
    }

    fn submit_buffer(&mut self, bytes: Vec<u8>) -> Result<()> {
        let block_align = self.format.block_align() as usize;
        if bytes.is_empty() || bytes.len() % block_align != 0 {
            return Err(MonoSoundError::InternalAssert(
                "submitted buffer is empty or not block-align-aligned".into(),
            ));
        }
        let frames = bytes.len() / block_align;
        self.submitted_frames_total.fetch_add(frames as u64, Ordering::Relaxed);
        self.pending_buffer_frames.lock().unwrap().push_back(frames as u64);
        self.pending_bytes.extend(bytes);
        self.push_pending_into_ring();
        Ok(())
    }

    fn pending_buffer_count(&self) -> usize {
        self.reap_consumed_buffers();
        self.pending_buffer_frames.lock().unwrap().len()
    }

    fn pending_buffer_duration(&self) -> Duration {
        let submitted = self.submitted_frames_total.load(Ordering::Relaxed);
        let consumed = self.consumed_frames_total.load(Ordering::Relaxed);
        let frames = submitted.saturating_sub(consumed) as f64;
        Duration::from_secs_f64(frames / self.format.sample_rate as f64)
    }

    fn strobe_queue(&mut self) {
        self.push_pending_into_ring();
        let mut flag = self.needs_buffer.lock().unwrap();
        if *flag {
            *flag = false;
            drop(flag);
            if let Some(cb) = &mut self.on_buffer_needed {
                cb();
            }
        }
    }

    fn set_on_buffer_needed(&mut self, callback: Box<dyn FnMut() + Send>) {
        self.on_buffer_needed = Some(callback);
    }

    fn volume(&self) -> f64 {
        self.volume.load()
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume.store(volume.clamp(0.0, 1.0));
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
