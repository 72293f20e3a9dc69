//! MonoSound: an audio-loading and streaming core for a 2D game
//! framework. Decodes a handful of sound-container formats, materializes
//! them either as whole in-memory effects or as continuously buffered
//! streams, and runs a SoLoud-derived DSP filter chain over the samples
//! on the fly.
//!
//! The crate is organized leaf-first, mirroring the component table this
//! was designed against:
//!
//! - [`sample`] / [`param`]: PCM primitives and the bounded-parameter +
//!   fader value type shared by every filter.
//! - [`filter`]: the singleton/instance filter framework and its three
//!   concrete DSP kernels ([`filter::biquad`], [`filter::echo`],
//!   [`filter::freeverb`]).
//! - [`decoder`] / [`sink`]: the narrow external contracts the stream
//!   engine is built against, plus a real WAV decoder and two sink
//!   implementations (`cpal`-backed and an in-memory test double).
//! - [`stream`]: per-stream state tying a decoder, filter chain, FFT tap
//!   and sink together, with the buffered read loop, looping, seeking
//!   and focus-pause policy.
//! - [`dynamic`]: a stream package whose decoder is the caller.
//! - [`manager`]: the concurrent stream registry and its background
//!   worker.
//! - [`loop_segment`]: the segmented-loop controller.
//! - [`fft`]: the Cooley-Tukey spectrum pipeline and its graphs.
//! - [`config`]: engine-wide configuration.
//! - [`error`]: the crate's error enum.

pub mod config;
pub mod decoder;
pub mod dynamic;
pub mod error;
pub mod fft;
pub mod filter;
pub mod loop_segment;
pub mod manager;
pub mod param;
pub mod sample;
pub mod sink;
pub mod stream;

pub use config::{EngineConfig, FocusBehavior};
pub use error::{MonoSoundError, Result};
pub use manager::StreamManager;
