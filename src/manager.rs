//! Stream manager (C6): a concurrent registry of live streams plus one
//! long-lived background worker that strobes every playing stream's sink
//! and enforces focus policy, grounded in the `DashMap`-backed registry and
//! `parking_lot`-guarded per-entry state of the other_examples stream
//! manager this component is modeled on.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::decoder::Decoder;
use crate::sink::{Sink, SinkState};
use crate::stream::StreamPackage;

const WAITING: u8 = 0;
const PROCESSING: u8 = 1;
const LOCKED: u8 = 2;

struct Registry {
    streams: DashMap<String, Arc<Mutex<StreamPackage>>>,
    /// `{Waiting -> Processing -> Waiting}` for normal ticks, `{Waiting ->
    /// Locked -> Waiting}` for the deinit path; CAS-driven so the worker
    /// never observes a half-freed registry.
    lock_state: AtomicU8,
    disposed: AtomicBool,
    focused: AtomicBool,
}

pub struct StreamManager {
    registry: Arc<Registry>,
    config: Arc<Mutex<EngineConfig>>,
    worker: Option<JoinHandle<()>>,
}

impl StreamManager {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(Registry {
            streams: DashMap::new(),
            lock_state: AtomicU8::new(WAITING),
            disposed: AtomicBool::new(false),
            focused: AtomicBool::new(true),
        });
        let config = Arc::new(Mutex::new(config));
        let worker = thread::spawn({
            let registry = registry.clone();
            let config = config.clone();
            move || worker_loop(registry, config)
        });
        Self { registry, config, worker: Some(worker) }
    }

    /// Registers a stream under a name derived from `basename`, appending an
    /// increasing integer suffix on collision.
    pub fn create_stream(
        &self,
        basename: &str,
        decoder: Box<dyn Decoder>,
        sink: Box<dyn Sink>,
        looping: bool,
    ) -> String {
        let name = self.unique_name(basename);
        let stream = StreamPackage::new(decoder, sink, looping);
        self.registry.streams.insert(name.clone(), Arc::new(Mutex::new(stream)));
        name
    }

    fn unique_name(&self, basename: &str) -> String {
        if !self.registry.streams.contains_key(basename) {
            return basename.to_string();
        }
        let mut i = 1u64;
        loop {
            let candidate = format!("{basename}_{i}");
            if !self.registry.streams.contains_key(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    pub fn get_stream(&self, name: &str) -> Option<Arc<Mutex<StreamPackage>>> {
        self.registry.streams.get(name).map(|e| e.value().clone())
    }

    pub fn remove_stream(&self, name: &str) {
        if let Some((_, stream)) = self.registry.streams.remove(name) {
            stream.lock().dispose();
        }
    }

    pub fn stream_count(&self) -> usize {
        self.registry.streams.len()
    }

    pub fn list_stream_names(&self) -> Vec<String> {
        self.registry.streams.iter().map(|e| e.key().clone()).collect()
    }

    pub fn set_focused(&self, focused: bool) {
        self.registry.focused.store(focused, Ordering::Relaxed);
    }

    pub fn set_config(&self, config: EngineConfig) {
        *self.config.lock() = config;
    }

    pub fn config(&self) -> EngineConfig {
        self.config.lock().clone()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        while self
            .registry
            .lock_state
            .compare_exchange(WAITING, LOCKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            thread::yield_now();
        }
        self.registry.disposed.store(true, Ordering::Release);
        for entry in self.registry.streams.iter() {
            entry.value().lock().dispose();
        }
        self.registry.streams.clear();
        self.registry.lock_state.store(WAITING, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(registry: Arc<Registry>, config: Arc<Mutex<EngineConfig>>) {
    loop {
        if registry.disposed.load(Ordering::Acquire) {
            break;
        }
        if registry
            .lock_state
            .compare_exchange(WAITING, PROCESSING, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            thread::yield_now();
            continue;
        }
        if registry.disposed.load(Ordering::Acquire) {
            registry.lock_state.store(WAITING, Ordering::Release);
            break;
        }

        let focused = registry.focused.load(Ordering::Relaxed);
        let cfg = config.lock().clone();
        let names: Vec<String> = registry.streams.iter().map(|e| e.key().clone()).collect();
        let mut finished = Vec::new();
        for name in names {
            let Some(entry) = registry.streams.get(&name) else { continue };
            let stream = entry.value().clone();
            drop(entry);
            if tick_one_stream(&name, &stream, focused, &cfg) {
                finished.push(name);
            }
        }
        // §4.6: an exhausted, non-looping stream requests removal from the
        // manager once the worker observes it; dropping it disposes its sink.
        for name in finished {
            if let Some((_, stream)) = registry.streams.remove(&name) {
                stream.lock().dispose();
            }
        }

        registry.lock_state.store(WAITING, Ordering::Release);
        thread::yield_now();
    }
}

/// A misbehaving stream (panic or propagated error) is logged and left in
/// place rather than allowed to stop the worker (§4.7, §7). Returns `true`
/// if the stream finished streaming this tick and should be removed.
fn tick_one_stream(name: &str, stream: &Arc<Mutex<StreamPackage>>, focused: bool, cfg: &EngineConfig) -> bool {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let mut guard = stream.lock();
        if guard.disposed() {
            return crate::error::Result::Ok(false);
        }
        guard.apply_focus_policy(focused, cfg.default_stream_focus_behavior);
        if guard.state() == SinkState::Playing {
            let now = guard.play_time().as_secs_f64();
            guard.strobe(cfg, now)?;
        }
        Ok(guard.finished_streaming())
    }));
    match result {
        Ok(Ok(finished)) => finished,
        Ok(Err(e)) => {
            log::warn!("stream {name} worker tick failed: {e}");
            false
        }
        Err(panic) => {
            log::error!("stream {name} panicked in the worker tick: {panic:?}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::wav::WavDecoder;
    use crate::sink::test_sink::TestSink;
    use std::time::Duration;

    fn build_wav(channels: u16, sample_rate: u32, pcm: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let block_align = channels * 2;
        let byte_rate = sample_rate * block_align as u32;
        let data_len = pcm.len() as u32;
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&byte_rate.to_le_bytes());
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        buf.extend_from_slice(pcm);
        buf
    }

    fn make_decoder_and_sink(frames: usize) -> (Box<dyn Decoder>, Box<dyn Sink>) {
        let pcm: Vec<u8> = (0..frames as u16).flat_map(|v| v.to_le_bytes()).collect();
        let file = build_wav(1, 44100, &pcm);
        let decoder = Box::new(WavDecoder::from_bytes(&file).unwrap());
        let sink = Box::new(TestSink::new(crate::decoder::AudioFormat {
            sample_rate: 44100,
            channels: 1,
            bits_per_sample: 16,
        }));
        (decoder, sink)
    }

    #[test]
    fn basename_collisions_get_an_incrementing_suffix() {
        let manager = StreamManager::new(EngineConfig::default());
        let (d1, s1) = make_decoder_and_sink(1000);
        let (d2, s2) = make_decoder_and_sink(1000);
        let a = manager.create_stream("boom", d1, s1, false);
        let b = manager.create_stream("boom", d2, s2, false);
        assert_eq!(a, "boom");
        assert_eq!(b, "boom_1");
        assert_eq!(manager.stream_count(), 2);
    }

    #[test]
    fn worker_strobes_playing_streams() {
        let manager = StreamManager::new(EngineConfig::default());
        let (decoder, sink) = make_decoder_and_sink(100_000);
        let name = manager.create_stream("loop", decoder, sink, true);
        let handle = manager.get_stream(&name).unwrap();
        handle.lock().play().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if handle.lock().play_time() > Duration::ZERO {
                break;
            }
            if std::time::Instant::now() > deadline {
                panic!("worker never advanced play_time");
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn remove_stream_disposes_it() {
        let manager = StreamManager::new(EngineConfig::default());
        let (decoder, sink) = make_decoder_and_sink(1000);
        let name = manager.create_stream("effect", decoder, sink, false);
        manager.remove_stream(&name);
        assert!(manager.get_stream(&name).is_none());
    }
}
