//! Constrained parameter + fader (C2): a bounded numeric value with linear
//! or LFO fade over time.

use std::f64::consts::PI;

/// Fade mode for a [`Fader`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaderMode {
    Inactive,
    Linear,
    Lfo,
}

/// Time-varying animation of a parameter value.
///
/// `now`/`start_time`/`duration`/`period` are all expressed in seconds as
/// `f64`, matching the playback timestamps the stream engine hands to
/// `updateParameterFaders`.
#[derive(Copy, Clone, Debug)]
pub struct Fader<T> {
    mode: FaderMode,
    from: T,
    to: T,
    start_time: f64,
    /// Linear fade duration in seconds, or LFO period in seconds.
    duration: f64,
    current: T,
    enabled: bool,
    expired: bool,
}

impl<T> Fader<T>
where
    T: Copy + Into<f64> + From<f64>,
{
    pub fn inactive(value: T) -> Self {
        Self {
            mode: FaderMode::Inactive,
            from: value,
            to: value,
            start_time: 0.0,
            duration: 0.0,
            current: value,
            enabled: false,
            expired: false,
        }
    }

    pub fn start_linear(&mut self, from: T, to: T, start_time: f64, duration: f64) {
        self.mode = FaderMode::Linear;
        self.from = from;
        self.to = to;
        self.start_time = start_time;
        self.duration = duration;
        self.current = from;
        self.enabled = true;
        self.expired = false;
    }

    pub fn start_lfo(&mut self, from: T, to: T, start_time: f64, period: f64) {
        self.mode = FaderMode::Lfo;
        self.from = from;
        self.to = to;
        self.start_time = start_time;
        self.duration = period;
        self.current = from;
        self.enabled = true;
        self.expired = false;
    }

    /// Reset to an inactive fader holding `value`; used when a parameter is
    /// assigned directly.
    pub fn reset(&mut self, value: T) {
        *self = Self::inactive(value);
    }

    pub fn mode(&self) -> FaderMode {
        self.mode
    }

    pub fn expired(&self) -> bool {
        self.expired
    }

    pub fn current(&self) -> T {
        self.current
    }

    /// Advance the fader to `now`. Returns `true` if `current` produced a
    /// new value this call.
    pub fn update(&mut self, now: f64) -> bool {
        if self.mode == FaderMode::Inactive || !self.enabled {
            return false;
        }
        if now < self.start_time {
            // Clock wrap-around / seek: un-expire a completed linear fade so it restarts.
            if self.mode == FaderMode::Linear && self.expired {
                self.expired = false;
            }
            return false;
        }
        match self.mode {
            FaderMode::Inactive => unreachable!(),
            FaderMode::Linear => {
                if now >= self.start_time + self.duration {
                    self.current = self.to;
                    self.expired = true;
                    true
                } else {
                    let from: f64 = self.from.into();
                    let to: f64 = self.to.into();
                    let t = (now - self.start_time) / self.duration;
                    self.current = T::from(from + (to - from) * t);
                    true
                }
            }
            FaderMode::Lfo => {
                let from: f64 = self.from.into();
                let to: f64 = self.to.into();
                let omega = 2.0 * PI / self.duration;
                let amplitude = (to - from).abs() / 2.0;
                let value = from + amplitude * ((now - self.start_time) * omega).sin() + amplitude;
                self.current = T::from(value);
                true
            }
        }
    }

    /// Duplicate fader state into a fader owned by the receiver.
    pub fn copy_to(&self, other: &mut Self) {
        *other = *self;
    }
}

/// A bounded numeric parameter with an attached fader.
///
/// Writing clamps to `[min, max]` and resets the fader to inactive;
/// `changed` is left for the owning [`crate::filter::FilterInstance`] to
/// track via its changed-bitmask.
#[derive(Copy, Clone, Debug)]
pub struct Parameter<T> {
    value: T,
    min: T,
    max: T,
    fader: Fader<T>,
}

impl<T> Parameter<T>
where
    T: Copy + PartialOrd + Into<f64> + From<f64>,
{
    pub fn new(value: T, min: T, max: T) -> Self {
        let value = Self::clamp(value, min, max);
        Self {
            value,
            min,
            max,
            fader: Fader::inactive(value),
        }
    }

    fn clamp(value: T, min: T, max: T) -> T {
        if value < min {
            min
        } else if value > max {
            max
        } else {
            value
        }
    }

    pub fn value(&self) -> T {
        self.value
    }

    pub fn min(&self) -> T {
        self.min
    }

    pub fn max(&self) -> T {
        self.max
    }

    /// Set the value directly: clamps, resets the fader. Returns `true` if
    /// the clamped value differs from the previous one (the caller sets the
    /// changed-bit on `true`).
    pub fn set(&mut self, value: T) -> bool {
        let clamped = Self::clamp(value, self.min, self.max);
        let changed = clamped.into() != self.value.into();
        self.value = clamped;
        self.fader.reset(clamped);
        changed
    }

    pub fn start_linear_fade(&mut self, to: T, start_time: f64, duration: f64) {
        let from = self.value;
        self.fader.start_linear(from, Self::clamp(to, self.min, self.max), start_time, duration);
    }

    pub fn start_lfo_fade(&mut self, from: T, to: T, start_time: f64, period: f64) {
        self.fader.start_lfo(
            Self::clamp(from, self.min, self.max),
            Self::clamp(to, self.min, self.max),
            start_time,
            period,
        );
    }

    /// Advance the fader and, if it produced a new value, write it through
    /// (re-clamping). Returns `true` if the value changed.
    pub fn update_fader(&mut self, now: f64) -> bool {
        if !self.fader.update(now) {
            return false;
        }
        let clamped = Self::clamp(self.fader.current(), self.min, self.max);
        let changed = clamped.into() != self.value.into();
        self.value = clamped;
        changed
    }

    pub fn fader(&self) -> &Fader<T> {
        &self.fader
    }

    pub fn copy_to(&self, other: &mut Self) {
        other.value = self.value;
        other.min = self.min;
        other.max = self.max;
        self.fader.copy_to(&mut other.fader);
    }
}

/// A boolean flag parameter: no fader.
#[derive(Copy, Clone, Debug)]
pub struct BoolParameter {
    value: bool,
}

impl BoolParameter {
    pub fn new(value: bool) -> Self {
        Self { value }
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn set(&mut self, value: bool) -> bool {
        let changed = value != self.value;
        self.value = value;
        changed
    }
}
