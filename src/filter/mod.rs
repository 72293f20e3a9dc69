//! Filter framework (C3): singleton filter definitions + per-playback
//! instances, parameter change tracking via an atomic 64-bit mask.
//!
//! The source this is reworked from relies on open inheritance and runtime
//! downcasts between filter kinds. Rust has no such thing, so filter kinds
//! are a closed tagged union ([`FilterKind`]) instead: each kind owns its
//! parameter schema and its processing state, and [`FilterInstance`]
//! dispatches on the tag rather than through a vtable. A filter never
//! defines more than 64 parameters, so the changed-mask fits in one `u64`.

pub mod biquad;
pub mod echo;
pub mod freeverb;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::{MonoSoundError, Result};
use crate::param::Parameter;

/// Opaque, globally unique identifier for a registered [`FilterDefinition`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilterId(u64);

static NEXT_FILTER_ID: AtomicU64 = AtomicU64::new(1);

impl FilterId {
    fn next() -> Self {
        FilterId(NEXT_FILTER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The closed set of concrete DSP kernels (C4).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterKind {
    BiquadResonant,
    Echo,
    Freeverb,
}

/// Bit reserved for `paramStrength` in the changed-mask; kind-specific
/// parameters use bits `0..63`.
pub const STRENGTH_CHANGED_BIT: u64 = 1 << 63;

/// Kind-specific parameter storage, cloned wholesale from singleton to
/// instance on `create_instance`.
#[derive(Clone, Debug)]
pub enum FilterParams {
    BiquadResonant(biquad::BiquadParams),
    Echo(echo::EchoParams),
    Freeverb(freeverb::FreeverbParams),
}

/// Kind-specific per-channel processing state, (re)allocated by
/// `begin_filtering` when channel count or sample rate changes.
pub enum FilterState {
    BiquadResonant(biquad::BiquadState),
    Echo(echo::EchoState),
    Freeverb(freeverb::FreeverbState),
}

/// Atomically read-and-clear changed-parameter mask, isolating the audio
/// thread (reader) from the control thread (writer).
#[derive(Debug, Default)]
pub struct ChangedMask(AtomicU64);

impl ChangedMask {
    pub fn mark(&self, bit: u64) {
        self.0.fetch_or(bit, Ordering::Relaxed);
    }

    /// Atomically read and clear the mask; returns `true` if any bit was set.
    pub fn take_any_changed(&self) -> bool {
        self.0.swap(0, Ordering::AcqRel) != 0
    }
}

/// A named, registered DSP kind: holds the mutable singleton (the public API's
/// configuration target) and manufactures per-playback instances from it.
///
/// The singleton must never be used directly to process audio.
pub struct FilterDefinition {
    id: FilterId,
    kind: FilterKind,
    singleton: RwLock<SingletonState>,
}

struct SingletonState {
    params: FilterParams,
    strength: Parameter<f64>,
}

impl FilterDefinition {
    pub fn new_biquad_resonant() -> Self {
        Self {
            id: FilterId::next(),
            kind: FilterKind::BiquadResonant,
            singleton: RwLock::new(SingletonState {
                params: FilterParams::BiquadResonant(biquad::BiquadParams::default()),
                strength: Parameter::new(1.0, 0.0, 1.0),
            }),
        }
    }

    pub fn new_echo() -> Self {
        Self {
            id: FilterId::next(),
            kind: FilterKind::Echo,
            singleton: RwLock::new(SingletonState {
                params: FilterParams::Echo(echo::EchoParams::default()),
                strength: Parameter::new(1.0, 0.0, 1.0),
            }),
        }
    }

    pub fn new_freeverb() -> Self {
        Self {
            id: FilterId::next(),
            kind: FilterKind::Freeverb,
            singleton: RwLock::new(SingletonState {
                params: FilterParams::Freeverb(freeverb::FreeverbParams::default()),
                strength: Parameter::new(1.0, 0.0, 1.0),
            }),
        }
    }

    pub fn id(&self) -> FilterId {
        self.id
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Configure the singleton's wet-mix strength.
    pub fn set_strength(&self, strength: f64) {
        self.singleton.write().strength.set(strength);
    }

    pub fn strength(&self) -> f64 {
        self.singleton.read().strength.value()
    }

    /// Access the singleton's kind-specific parameters for configuration.
    pub fn with_params<R>(&self, f: impl FnOnce(&mut FilterParams) -> R) -> R {
        f(&mut self.singleton.write().params)
    }

    /// Clone the singleton's current parameter values into a fresh instance.
    pub fn create_instance(&self) -> FilterInstance {
        let singleton = self.singleton.read();
        FilterInstance {
            id: self.id,
            kind: self.kind,
            params: singleton.params.clone(),
            strength: singleton.strength,
            changed: ChangedMask::default(),
            state: None,
            channel_count: 0,
            sample_rate: 0,
        }
    }
}

/// Per-playback live DSP state, produced by [`FilterDefinition::create_instance`].
pub struct FilterInstance {
    id: FilterId,
    kind: FilterKind,
    params: FilterParams,
    strength: Parameter<f64>,
    changed: ChangedMask,
    state: Option<FilterState>,
    channel_count: usize,
    sample_rate: u32,
}

impl FilterInstance {
    pub fn id(&self) -> FilterId {
        self.id
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn strength(&self) -> f64 {
        self.strength.value()
    }

    pub fn set_strength(&mut self, strength: f64) {
        if self.strength.set(strength) {
            self.changed.mark(STRENGTH_CHANGED_BIT);
        }
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> (&mut FilterParams, &ChangedMask) {
        (&mut self.params, &self.changed)
    }

    /// Step 1 of the per-buffer contract: advance every fader, writing
    /// through any parameter whose fader produced a new value.
    pub fn update_parameter_faders(&mut self, now: f64) {
        if self.strength.update_fader(now) {
            self.changed.mark(STRENGTH_CHANGED_BIT);
        }
        match &mut self.params {
            FilterParams::BiquadResonant(p) => p.update_faders(now, &self.changed),
            FilterParams::Echo(p) => p.update_faders(now, &self.changed),
            FilterParams::Freeverb(p) => p.update_faders(now, &self.changed),
        }
    }

    /// Step 2: (re)allocate per-channel state if the channel count grew or
    /// the sample rate changed, and recompute coefficients if any parameter
    /// changed since the last call.
    pub fn begin_filtering(&mut self, channel_count: usize, sample_rate: u32) -> Result<()> {
        if self.kind == FilterKind::Freeverb && channel_count != 2 {
            return Err(MonoSoundError::FilterChannelMismatch {
                filter: self.id,
                channels: channel_count,
            });
        }
        let realloc = self.state.is_none()
            || channel_count > self.channel_count
            || sample_rate != self.sample_rate;
        let changed = self.changed.take_any_changed();
        if realloc {
            self.channel_count = channel_count;
            self.sample_rate = sample_rate;
            self.state = Some(match &self.params {
                FilterParams::BiquadResonant(p) => {
                    FilterState::BiquadResonant(biquad::BiquadState::new(channel_count, p, sample_rate))
                }
                FilterParams::Echo(p) => {
                    FilterState::Echo(echo::EchoState::new(channel_count, p, sample_rate))
                }
                FilterParams::Freeverb(p) => {
                    FilterState::Freeverb(freeverb::FreeverbState::new(p, sample_rate))
                }
            });
        } else if changed {
            match (&self.params, self.state.as_mut().unwrap()) {
                (FilterParams::BiquadResonant(p), FilterState::BiquadResonant(s)) => {
                    s.recompute_coefficients(p, sample_rate)
                }
                (FilterParams::Echo(p), FilterState::Echo(s)) => s.reconfigure(p, sample_rate),
                (FilterParams::Freeverb(p), FilterState::Freeverb(s)) => s.reconfigure(p),
                _ => unreachable!("params/state kind mismatch"),
            }
        }
        Ok(())
    }

    /// Step 3: apply the filter in place to interleaved-by-channel samples.
    /// `buf` holds `channel_count` contiguous per-channel slices of
    /// `channel_size` floats each; this call processes `sample_count`
    /// samples starting at `offset` in every channel.
    pub fn apply_filtering_to_all_channels(
        &mut self,
        buf: &mut [f64],
        offset: usize,
        sample_count: usize,
        channel_count: usize,
        channel_size: usize,
    ) {
        let strength = self.strength.value();
        match (&self.params, self.state.as_mut().expect("begin_filtering must run first")) {
            (FilterParams::BiquadResonant(p), FilterState::BiquadResonant(s)) => {
                for c in 0..channel_count {
                    let start = c * channel_size + offset;
                    s.apply_channel(&mut buf[start..start + sample_count], c, p, strength);
                }
            }
            (FilterParams::Echo(p), FilterState::Echo(s)) => {
                for c in 0..channel_count {
                    let start = c * channel_size + offset;
                    s.apply_channel(&mut buf[start..start + sample_count], c, p, strength);
                }
            }
            (FilterParams::Freeverb(p), FilterState::Freeverb(s)) => {
                // Freeverb inherently crosses channels; it overrides the default per-channel loop.
                s.apply_stereo(buf, offset, sample_count, channel_size, p, strength);
            }
            _ => unreachable!("params/state kind mismatch"),
        }
    }
}

/// A registry of [`FilterDefinition`]s, keyed by [`FilterId`]. Mirrors
/// `FilterLoader`'s role (out of scope per spec.md §1) as a thin lookup
/// table the rest of the crate can build on.
#[derive(Default)]
pub struct FilterRegistry {
    next_slot: AtomicU32,
    definitions: parking_lot::RwLock<Vec<std::sync::Arc<FilterDefinition>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: FilterDefinition) -> std::sync::Arc<FilterDefinition> {
        let arc = std::sync::Arc::new(definition);
        self.next_slot.fetch_add(1, Ordering::Relaxed);
        self.definitions.write().push(arc.clone());
        arc
    }

    pub fn get(&self, id: FilterId) -> Option<std::sync::Arc<FilterDefinition>> {
        self.definitions.read().iter().find(|d| d.id() == id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_is_template_instance_is_independent() {
        let def = FilterDefinition::new_biquad_resonant();
        def.set_strength(0.5);
        let mut inst = def.create_instance();
        assert_eq!(inst.strength(), 0.5);
        inst.set_strength(0.9);
        // mutating the instance must not affect the singleton
        assert_eq!(def.strength(), 0.5);
    }

    #[test]
    fn changed_mask_atomicity() {
        let def = FilterDefinition::new_biquad_resonant();
        let mut inst = def.create_instance();
        inst.set_strength(0.2);
        inst.set_strength(0.8);
        assert!(inst.changed.take_any_changed());
        assert!(!inst.changed.take_any_changed());
    }

    #[test]
    fn strength_zero_is_dry_passthrough() {
        let def = FilterDefinition::new_biquad_resonant();
        def.with_params(|p| {
            if let FilterParams::BiquadResonant(b) = p {
                b.set_frequency(1000.0);
            }
        });
        let mut inst = def.create_instance();
        inst.set_strength(0.0);
        inst.update_parameter_faders(0.0);
        inst.begin_filtering(1, 48000).unwrap();
        let mut buf = vec![0.3, -0.2, 0.7, -0.9];
        let before = buf.clone();
        inst.apply_filtering_to_all_channels(&mut buf, 0, 4, 1, 4);
        assert_eq!(buf, before);
    }
}
