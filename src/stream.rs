//! Stream package (C5): per-stream state tying a decoder, a filter chain,
//! an optional FFT tap, and a sink together, plus the buffered read loop,
//! looping, immediate-jump seeking, and focus-pause policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{EngineConfig, FocusBehavior};
use crate::decoder::{AudioFormat, Decoder};
use crate::error::{MonoSoundError, Result};
use crate::fft::FftQuery;
use crate::filter::FilterInstance;
use crate::loop_segment::{Segment, SegmentTracker};
use crate::sample::Sample16;
use crate::sink::{Sink, SinkState};

/// Buffers are topped up until `queued + sink-pending` reaches this depth.
const TARGET_QUEUE_DEPTH: usize = 3;

/// §6.4 `allowEchoOversampling`'s cap on synthesized post-EOF tail.
const MAX_OVERSAMPLE_SECONDS: f64 = 30.0;

/// Selects which representation a [`StreamPackage`]'s pre-submit hook (C9)
/// observes: the post-filter float "wave" buffer, or the quantized bytes
/// about to be pushed to the queue. Mirrors the source's
/// `requestPcmSamplesForEvent` control.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PcmHookKind {
    Bytes,
    Wave,
}

type ByteHook = Box<dyn FnMut(&mut Vec<u8>) + Send>;
type WaveHook = Box<dyn FnMut(&mut [f64]) + Send>;

fn bytes_to_seconds(len: usize, format: &AudioFormat) -> f64 {
    let block_align = format.block_align().max(1) as f64;
    (len as f64 / block_align) / format.sample_rate as f64
}

pub struct StreamPackage {
    decoder: Box<dyn Decoder>,
    /// The stream's working format: always 16-bit PCM regardless of the
    /// decoder's source bit depth, since `process_filters` and the sink
    /// contract both operate on 16-bit PCM only.
    format: AudioFormat,
    total_bytes: Option<i64>,
    read_bytes: u64,
    /// Resets to zero on every loop (Open Question #1).
    seconds_read: f64,
    /// Tracks the decoder's true current position; updated by both reads
    /// and seeks, never blindly zeroed the way `seconds_read` is.
    read_time: Duration,
    is_looping: bool,
    /// Microsecond ticks, matching §5's "64-bit, updated with atomic add".
    play_time_micros: AtomicU64,
    sink: Box<dyn Sink>,
    read_queue: VecDeque<Vec<u8>>,
    filter_chain: Vec<FilterInstance>,
    fft_query: Option<FftQuery>,
    focus_behavior: Option<FocusBehavior>,
    loop_tracker: Option<SegmentTracker>,
    disposed: bool,
    finished_streaming: bool,
    focus_paused: bool,
    /// Seconds target of an in-flight `setStreamPosition`, armed until the
    /// sink finishes draining its pending buffers.
    pending_jump: Option<f64>,
    previous_pending_duration: Duration,
    /// Seconds of synthesized post-EOF silence emitted so far to flush a
    /// filter's tail (§6.4 `allowEchoOversampling`), capped at
    /// [`MAX_OVERSAMPLE_SECONDS`] and reset on every loop/reset.
    oversample_seconds_emitted: f64,
    /// C9 dynamic-stream pre-submit hooks; `None` for every ordinary
    /// (decoder-backed) stream.
    pcm_hook_kind: PcmHookKind,
    pre_submit_byte_hook: Option<ByteHook>,
    pre_submit_wave_hook: Option<WaveHook>,
}

impl StreamPackage {
    pub fn new(decoder: Box<dyn Decoder>, sink: Box<dyn Sink>, is_looping: bool) -> Self {
        let source_format = decoder.format();
        let format = AudioFormat {
            sample_rate: source_format.sample_rate,
            channels: source_format.channels,
            bits_per_sample: 16,
        };
        let total_bytes = decoder.total_bytes();
        Self {
            decoder,
            format,
            total_bytes,
            read_bytes: 0,
            seconds_read: 0.0,
            read_time: Duration::ZERO,
            is_looping,
            play_time_micros: AtomicU64::new(0),
            sink,
            read_queue: VecDeque::new(),
            filter_chain: Vec::new(),
            fft_query: None,
            focus_behavior: None,
            loop_tracker: None,
            disposed: false,
            finished_streaming: false,
            focus_paused: false,
            pending_jump: None,
            previous_pending_duration: Duration::ZERO,
            oversample_seconds_emitted: 0.0,
            pcm_hook_kind: PcmHookKind::Bytes,
            pre_submit_byte_hook: None,
            pre_submit_wave_hook: None,
        }
    }

    /// Selects which buffer representation `preQueueBuffers` hands to the
    /// pre-submit hook (C9); only meaningful once a hook is set via
    /// [`Self::set_pre_submit_byte_hook`] / [`Self::set_pre_submit_wave_hook`].
    pub fn set_request_pcm_samples_for_event(&mut self, kind: PcmHookKind) {
        self.pcm_hook_kind = kind;
    }

    pub fn set_pre_submit_byte_hook(&mut self, hook: ByteHook) {
        self.pre_submit_byte_hook = Some(hook);
    }

    pub fn set_pre_submit_wave_hook(&mut self, hook: WaveHook) {
        self.pre_submit_wave_hook = Some(hook);
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn total_bytes(&self) -> Option<i64> {
        self.total_bytes
    }

    pub fn is_looping(&self) -> bool {
        self.is_looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.is_looping = looping;
    }

    pub fn disposed(&self) -> bool {
        self.disposed
    }

    pub fn finished_streaming(&self) -> bool {
        self.finished_streaming
    }

    pub fn state(&self) -> SinkState {
        self.sink.state()
    }

    pub fn play_time(&self) -> Duration {
        Duration::from_micros(self.play_time_micros.load(Ordering::Relaxed))
    }

    fn play_time_add(&self, d: Duration) {
        self.play_time_micros.fetch_add(d.as_micros() as u64, Ordering::Relaxed);
    }

    fn play_time_store_secs(&self, secs: f64) {
        self.play_time_micros
            .store((secs.max(0.0) * 1_000_000.0).round() as u64, Ordering::Relaxed);
    }

    pub fn volume(&self) -> f64 {
        self.sink.volume()
    }
    pub fn set_volume(&mut self, v: f64) {
        self.sink.set_volume(v);
    }
    pub fn pan(&self) -> f64 {
        self.sink.pan()
    }
    pub fn set_pan(&mut self, p: f64) {
        self.sink.set_pan(p);
    }
    pub fn pitch(&self) -> f64 {
        self.sink.pitch()
    }
    pub fn set_pitch(&mut self, p: f64) {
        self.sink.set_pitch(p);
    }

    pub fn focus_behavior(&self) -> Option<FocusBehavior> {
        self.focus_behavior
    }
    pub fn set_focus_behavior(&mut self, behavior: Option<FocusBehavior>) {
        self.focus_behavior = behavior;
    }

    pub fn play(&mut self) -> Result<()> {
        self.sink.play()
    }

    pub fn pause(&mut self) {
        self.sink.pause();
    }

    pub fn resume(&mut self) {
        self.sink.resume();
    }

    pub fn stop(&mut self) -> Result<()> {
        self.sink.stop(true);
        self.internal_reset(true)
    }

    pub fn dispose(&mut self) {
        self.sink.stop(true);
        self.disposed = true;
    }

    /// Seeks the decoder and schedules an immediate jump: `play_time` is
    /// hard-set to `seconds` only once the sink finishes draining whatever
    /// was already queued (§4.6). Paused sinks take the same path: draining
    /// zero pending buffers jumps immediately.
    pub fn set_stream_position(&mut self, seconds: f64) -> Result<()> {
        self.decoder.seek(seconds)?;
        let byte_rate = self.format.sample_rate as f64 * self.format.block_align() as f64;
        self.read_bytes = (seconds * byte_rate).round() as u64;
        self.read_time = Duration::from_secs_f64(seconds.max(0.0));
        self.pending_jump = Some(seconds);
        Ok(())
    }

    /// Seeks back to the start of sample data (or, with a loop-segment
    /// tracker attached, to segment 0 / the pending delayed jump), optionally
    /// clearing the queue. On a stopped sink, `play_time` resets to zero.
    pub fn reset(&mut self) -> Result<()> {
        self.internal_reset(true)
    }

    fn internal_reset(&mut self, clear_queue: bool) -> Result<()> {
        if let Some(tracker) = self.loop_tracker.as_mut() {
            tracker.reset(self.decoder.as_mut())?;
            self.read_time = tracker.loop_target_time();
        } else {
            self.decoder.reset()?;
            self.read_time = Duration::ZERO;
        }
        self.read_bytes = 0;
        self.seconds_read = 0.0;
        if clear_queue {
            self.read_queue.clear();
        }
        if self.sink.state() == SinkState::Stopped {
            self.play_time_store_secs(0.0);
        }
        self.finished_streaming = false;
        self.oversample_seconds_emitted = 0.0;
        Ok(())
    }

    /// Replaces the filter chain. Only `FilterInstance`s are accepted by the
    /// type system, so a singleton definition can never be smuggled in.
    pub fn apply_filters(&mut self, chain: Vec<FilterInstance>) {
        self.filter_chain = chain;
    }

    pub fn begin_tracking_fft(&mut self, size: usize) {
        self.fft_query = Some(FftQuery::new(size));
    }

    pub fn stop_tracking_fft(&mut self) {
        self.fft_query = None;
    }

    pub fn fft_query(&self) -> Option<&FftQuery> {
        self.fft_query.as_ref()
    }

    /// Attaches a multi-segment loop graph over this stream's decoder.
    /// Requires a seekable decoder.
    pub fn attach_loop_segments(&mut self, segments: Vec<Segment>) -> Result<()> {
        if !self.decoder.is_seekable() {
            return Err(MonoSoundError::Unsupported(
                "loop segments require a seekable decoder",
            ));
        }
        let max_duration = self.decoder.max_duration().unwrap_or(Duration::MAX);
        self.loop_tracker = Some(SegmentTracker::new(segments, max_duration));
        Ok(())
    }

    /// §4.6's internal read loop: tops the queue up to `queue.len() +
    /// sink.pending < TARGET_QUEUE_DEPTH`, running each block through
    /// `process_filters` before enqueuing.
    pub fn fill_queue(&mut self, config: &EngineConfig, now: f64) -> Result<()> {
        while self.read_queue.len() + self.sink.pending_buffer_count() < TARGET_QUEUE_DEPTH {
            let mut secs = config
                .stream_buffer_length_seconds
                .clamp(EngineConfig::MIN_BUFFER_SECONDS, EngineConfig::MAX_BUFFER_SECONDS);

            if let Some(tracker) = self.loop_tracker.as_mut() {
                tracker.modify_read_seconds(self.read_time, &mut secs);
            }
            if secs <= 0.0 {
                self.handle_looping()?;
                break;
            }

            let read = match self.decoder.read_samples(secs) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("stream read failed, treating as end-of-stream: {e}");
                    if self.try_emit_oversample_tail(config, now)? {
                        continue;
                    }
                    self.handle_looping()?;
                    break;
                }
            };

            let block_align = self.format.block_align() as usize;
            let mut bytes = read.bytes;
            let trimmed = bytes.len() - (bytes.len() % block_align);
            bytes.truncate(trimmed);
            if bytes.is_empty() {
                if self.try_emit_oversample_tail(config, now)? {
                    continue;
                }
                self.handle_looping()?;
                break;
            }

            self.process_filters(&mut bytes, now)?;

            if self.pcm_hook_kind == PcmHookKind::Bytes {
                if let Some(hook) = self.pre_submit_byte_hook.as_mut() {
                    hook(&mut bytes);
                }
            }

            self.read_bytes += read.bytes_read;
            self.seconds_read += bytes_to_seconds(bytes.len(), &self.format);
            self.read_time += Duration::from_secs_f64(secs);
            self.read_queue.push_back(bytes);

            let forced = self
                .loop_tracker
                .as_mut()
                .map(|t| t.take_force_check_loop())
                .unwrap_or(false);
            if (read.check_loop || forced) && !self.try_emit_oversample_tail(config, now)? {
                self.handle_looping()?;
            }
        }
        Ok(())
    }

    /// Submits every queued buffer to the sink, in the order they were
    /// read (invariant #6).
    pub fn drain_to_sink(&mut self) -> Result<()> {
        while let Some(buf) = self.read_queue.pop_front() {
            self.sink.submit_buffer(buf)?;
        }
        Ok(())
    }

    /// Deinterleaves 16-bit PCM to per-channel floats, runs the filter
    /// chain, clamps to `[-1,1]`, submits to the FFT query if attached, and
    /// re-interleaves/re-quantizes in place.
    fn process_filters(&mut self, bytes: &mut [u8], now: f64) -> Result<()> {
        assert_eq!(self.format.bits_per_sample, 16, "process_filters only accepts 16-bit PCM");
        let channels = self.format.channels as usize;
        let frames = bytes.len() / (channels * 2);

        let mut deinterleaved = vec![0.0f64; channels * frames];
        for f in 0..frames {
            for c in 0..channels {
                let idx = (f * channels + c) * 2;
                let sample = i16::from_le_bytes([bytes[idx], bytes[idx + 1]]);
                deinterleaved[c * frames + f] = Sample16(sample).to_float();
            }
        }

        for filter in &mut self.filter_chain {
            filter.update_parameter_faders(now);
            filter.begin_filtering(channels, self.format.sample_rate)?;
            filter.apply_filtering_to_all_channels(&mut deinterleaved, 0, frames, channels, frames);
        }

        for v in deinterleaved.iter_mut() {
            *v = v.clamp(-1.0, 1.0);
        }

        if self.pcm_hook_kind == PcmHookKind::Wave {
            if let Some(hook) = self.pre_submit_wave_hook.as_mut() {
                hook(&mut deinterleaved);
            }
        }

        if let Some(fft) = self.fft_query.as_mut() {
            fft.submit(&deinterleaved, channels, frames, now);
        }

        for f in 0..frames {
            for c in 0..channels {
                let idx = (f * channels + c) * 2;
                let quantized = Sample16::from_float(deinterleaved[c * frames + f]);
                let le = quantized.0.to_le_bytes();
                bytes[idx] = le[0];
                bytes[idx + 1] = le[1];
            }
        }
        Ok(())
    }

    /// §6.4 `allowEchoOversampling`: once the decoder hits natural EOF on a
    /// one-shot stream, keep reading synthesized silence through the filter
    /// chain instead of finishing immediately, so a filter with a delay
    /// tail (Echo, chiefly) gets to ring out past the source's length.
    /// Capped at `MAX_OVERSAMPLE_SECONDS`; returns `true` if a silence
    /// buffer was queued and the caller should keep reading.
    fn try_emit_oversample_tail(&mut self, config: &EngineConfig, now: f64) -> Result<bool> {
        if !config.allow_echo_oversampling || self.is_looping {
            return Ok(false);
        }
        if self.loop_tracker.as_ref().map(|t| t.forces_looping()).unwrap_or(false) {
            return Ok(false);
        }
        let remaining = MAX_OVERSAMPLE_SECONDS - self.oversample_seconds_emitted;
        if remaining <= 0.0 {
            return Ok(false);
        }
        let secs = config
            .stream_buffer_length_seconds
            .clamp(EngineConfig::MIN_BUFFER_SECONDS, EngineConfig::MAX_BUFFER_SECONDS)
            .min(remaining);
        let block_align = self.format.block_align() as usize;
        let frames = ((secs * self.format.sample_rate as f64).round() as usize).max(1);
        let mut bytes = vec![0u8; frames * block_align];
        self.process_filters(&mut bytes, now)?;
        self.oversample_seconds_emitted += secs;
        self.read_queue.push_back(bytes);
        Ok(true)
    }

    /// §4.6: on exhaustion, either mark the stream finished (non-looping)
    /// or loop back without clearing the queue. A segment tracker parked on
    /// a non-final segment forces looping regardless of `is_looping`.
    fn handle_looping(&mut self) -> Result<()> {
        let forces_loop = self.loop_tracker.as_ref().map(|t| t.forces_looping()).unwrap_or(false);
        if !self.is_looping && !forces_loop {
            self.finished_streaming = true;
            return Ok(());
        }
        self.internal_reset(false)
    }

    /// Invoked once per worker tick while playing: advances the sink's
    /// internal pipeline (which may synchronously raise `BufferNeeded`) and
    /// then runs this stream's own buffer-needed bookkeeping. The stream
    /// manager calls this directly rather than relying on the sink's
    /// registered `BufferNeeded` closure, which would require the sink to
    /// hold a mutable reference back into the `StreamPackage` that owns it.
    pub fn strobe(&mut self, config: &EngineConfig, now: f64) -> Result<()> {
        self.sink.strobe_queue();
        self.on_buffer_needed(config, now)
    }

    fn on_buffer_needed(&mut self, config: &EngineConfig, now: f64) -> Result<()> {
        let current_pending = self.sink.pending_buffer_duration();
        if self.sink.state() == SinkState::Playing && self.pending_jump.is_none() {
            let drained = self.previous_pending_duration.saturating_sub(current_pending);
            self.play_time_add(drained);
        }
        self.previous_pending_duration = current_pending;

        if self.pending_jump.is_some() {
            if self.sink.pending_buffer_count() > 0 {
                return Ok(());
            }
            let target = self.pending_jump.take().unwrap();
            self.play_time_store_secs(target);
        }

        self.fill_queue(config, now)?;
        self.drain_to_sink()
    }

    /// Distinct from user `pause`/`resume`: only affects streams whose
    /// effective focus behavior is `PauseOnLostFocus`, and only resumes
    /// streams this policy itself paused.
    pub fn apply_focus_policy(&mut self, focused: bool, default_behavior: FocusBehavior) {
        let behavior = self.focus_behavior.unwrap_or(default_behavior);
        if behavior != FocusBehavior::PauseOnLostFocus {
            return;
        }
        if !focused && self.sink.state() == SinkState::Playing {
            self.sink.pause();
            self.focus_paused = true;
        } else if focused && self.focus_paused {
            self.sink.resume();
            self.focus_paused = false;
        }
    }
}
