use thiserror::Error;

use crate::filter::FilterId;

/// Errors surfaced across the MonoSound engine, per the error-handling policy:
/// fatal kinds propagate to the caller, stream-internal decode failures are
/// folded into the looping machinery instead (see [`crate::stream`]).
#[derive(Debug, Error)]
pub enum MonoSoundError {
    #[error("MonoSound engine has not been initialized")]
    NotInitialized,

    #[error("failed to decode audio data: {0}")]
    DecoderFailure(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("parameter {name} = {value} is out of range [{min}, {max}]")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("filter {expected:?} lookup returned instance of a different kind ({actual:?})")]
    FilterWrongType { expected: FilterId, actual: FilterId },

    #[error("filter {filter:?} cannot process {channels}-channel audio")]
    FilterChannelMismatch { filter: FilterId, channels: usize },

    #[error("audio hardware unavailable: {0}")]
    AudioHardwareMissing(String),

    #[error("internal assertion failed: {0}")]
    InternalAssert(String),

    #[error("operation unsupported by this decoder: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MonoSoundError>;
