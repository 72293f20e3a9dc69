use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-stream policy for handling application focus loss, falling back to
/// [`EngineConfig::default_stream_focus_behavior`] when unset on a stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FocusBehavior {
    /// Keep streaming regardless of application focus.
    #[default]
    KeepPlaying,
    /// Pause on focus loss, resume on focus gain (only for streams the
    /// manager paused itself; user-issued pause/resume never trips this).
    PauseOnLostFocus,
}

/// Global engine configuration, mirrored from the §6.4 enumeration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Per-read duration requested from decoders, clamped to `[1/500, 1/10]` seconds.
    pub stream_buffer_length_seconds: f64,
    /// Allow echo-generated tail to exceed 30s beyond the source's length.
    pub allow_echo_oversampling: bool,
    /// Directory filtered one-shot effects are written to, when `log_filters` is set.
    pub log_directory: Option<PathBuf>,
    /// Write filtered one-shot effects to `log_directory` as WAV files.
    pub log_filters: bool,
    /// Default per-stream focus policy, used when a stream has none set.
    pub default_stream_focus_behavior: FocusBehavior,
}

impl EngineConfig {
    pub const MIN_BUFFER_SECONDS: f64 = 1.0 / 500.0;
    pub const MAX_BUFFER_SECONDS: f64 = 1.0 / 10.0;

    /// Set the per-read buffer length, clamping to `[1/500, 1/10]` seconds.
    pub fn set_stream_buffer_length_seconds(&mut self, seconds: f64) {
        self.stream_buffer_length_seconds =
            seconds.clamp(Self::MIN_BUFFER_SECONDS, Self::MAX_BUFFER_SECONDS);
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_buffer_length_seconds: 0.01,
            allow_echo_oversampling: false,
            log_directory: None,
            log_filters: false,
            default_stream_focus_behavior: FocusBehavior::KeepPlaying,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_length_clamps() {
        let mut cfg = EngineConfig::default();
        cfg.set_stream_buffer_length_seconds(10.0);
        assert_eq!(cfg.stream_buffer_length_seconds, EngineConfig::MAX_BUFFER_SECONDS);
        cfg.set_stream_buffer_length_seconds(0.0);
        assert_eq!(cfg.stream_buffer_length_seconds, EngineConfig::MIN_BUFFER_SECONDS);
    }
}
