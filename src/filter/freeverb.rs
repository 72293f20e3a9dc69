//! Freeverb filter (C4), §4.5: Jari Komppa's SoLoud port of the
//! Schroeder/Moorer Freeverb reverberator. Requires stereo input.

use crate::filter::ChangedMask;
use crate::param::{BoolParameter, Parameter};

const BIT_FROZEN: u64 = 1 << 0;
const BIT_FEEDBACK: u64 = 1 << 1;
const BIT_DAMPNESS: u64 = 1 << 2;
const BIT_STEREO_WIDTH: u64 = 1 << 3;

const COMB_TUNING_L: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING_L: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;

const FIXED_GAIN: f64 = 0.015;
const SCALE_ROOM: f64 = 0.28;
const OFFSET_ROOM: f64 = 0.7;
const SCALE_DAMP: f64 = 0.4;

#[derive(Clone, Debug)]
pub struct FreeverbParams {
    frozen: BoolParameter,
    feedback: Parameter<f64>,
    dampness: Parameter<f64>,
    stereo_width: Parameter<f64>,
}

impl Default for FreeverbParams {
    fn default() -> Self {
        Self {
            frozen: BoolParameter::new(false),
            feedback: Parameter::new(0.5, 0.0, 1.0),
            dampness: Parameter::new(0.5, 0.0, 1.0),
            stereo_width: Parameter::new(1.0, 0.0, 1.0),
        }
    }
}

impl FreeverbParams {
    pub fn set_frozen(&mut self, frozen: bool, changed: &ChangedMask) {
        if self.frozen.set(frozen) {
            changed.mark(BIT_FROZEN);
        }
    }

    pub fn set_feedback(&mut self, feedback: f64, changed: &ChangedMask) {
        if self.feedback.set(feedback) {
            changed.mark(BIT_FEEDBACK);
        }
    }

    pub fn set_dampness(&mut self, dampness: f64, changed: &ChangedMask) {
        if self.dampness.set(dampness) {
            changed.mark(BIT_DAMPNESS);
        }
    }

    pub fn set_stereo_width(&mut self, width: f64, changed: &ChangedMask) {
        if self.stereo_width.set(width) {
            changed.mark(BIT_STEREO_WIDTH);
        }
    }

    pub fn frozen(&self) -> bool {
        self.frozen.value()
    }

    pub fn feedback(&self) -> f64 {
        self.feedback.value()
    }

    pub fn dampness(&self) -> f64 {
        self.dampness.value()
    }

    pub fn stereo_width(&self) -> f64 {
        self.stereo_width.value()
    }

    pub(crate) fn update_faders(&mut self, now: f64, changed: &ChangedMask) {
        if self.feedback.update_fader(now) {
            changed.mark(BIT_FEEDBACK);
        }
        if self.dampness.update_fader(now) {
            changed.mark(BIT_DAMPNESS);
        }
        if self.stereo_width.update_fader(now) {
            changed.mark(BIT_STEREO_WIDTH);
        }
    }
}

struct Comb {
    buffer: Vec<f64>,
    index: usize,
    store: f64,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; len], index: 0, store: 0.0 }
    }

    fn process(&mut self, input: f64, feedback: f64, damp: f64) -> f64 {
        let out = self.buffer[self.index];
        self.store = out * (1.0 - damp) + self.store * damp;
        self.buffer[self.index] = input + self.store * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        out
    }
}

struct Allpass {
    buffer: Vec<f64>,
    index: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self { buffer: vec![0.0; len], index: 0 }
    }

    fn process(&mut self, input: f64, feedback: f64) -> f64 {
        let bufout = self.buffer[self.index];
        let out = -input + bufout;
        self.buffer[self.index] = input + bufout * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        out
    }
}

struct ChannelNetwork {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
}

impl ChannelNetwork {
    fn new(spread: usize, sample_rate_scale: f64) -> Self {
        let combs = COMB_TUNING_L
            .iter()
            .map(|&len| Comb::new(scale_len(len, spread, sample_rate_scale)))
            .collect();
        let allpasses = ALLPASS_TUNING_L
            .iter()
            .map(|&len| Allpass::new(scale_len(len, spread, sample_rate_scale)))
            .collect();
        Self { combs, allpasses }
    }
}

fn scale_len(base: usize, spread: usize, sample_rate_scale: f64) -> usize {
    (((base + spread) as f64) * sample_rate_scale).round().max(1.0) as usize
}

#[derive(Copy, Clone)]
struct Derived {
    room_size: f64,
    damp: f64,
    gain: f64,
    wet_left: f64,
    wet_right: f64,
}

fn derive(params: &FreeverbParams, strength: f64) -> Derived {
    let (room_size, damp, gain) = if params.frozen() {
        (1.0, 0.0, 0.0)
    } else {
        (
            params.feedback() * SCALE_ROOM + OFFSET_ROOM,
            params.dampness() * SCALE_DAMP,
            FIXED_GAIN,
        )
    };
    // The reference Freeverb scales its wet *and* dry mix knobs
    // (scaleWet = 3, scaleDry = 2) as two independently configured controls.
    // Here `strength` is the one wet/dry crossfade knob every filter kind
    // shares, with `dry = 1 - strength` so strength=0 reproduces the input
    // sample-for-sample and strength=1 reproduces the wet signal outright
    // (the filter framework's strength contract). Baking scaleDry into the
    // dry term would scale the input even at strength=0 and break that
    // contract, so only scaleWet carries over from the original algorithm.
    let wet = strength * 3.0; // scaleWet = 3
    let width = params.stereo_width();
    Derived {
        room_size,
        damp,
        gain,
        wet_left: wet * (width / 2.0 + 0.5),
        wet_right: wet * ((1.0 - width) / 2.0),
    }
}

pub struct FreeverbState {
    left: ChannelNetwork,
    right: ChannelNetwork,
    frozen: bool,
}

impl FreeverbState {
    pub fn new(params: &FreeverbParams, sample_rate: u32) -> Self {
        // Tuning lengths are specified at a 44100 Hz reference rate.
        let scale = sample_rate as f64 / 44100.0;
        Self {
            left: ChannelNetwork::new(0, scale),
            right: ChannelNetwork::new(STEREO_SPREAD, scale),
            frozen: params.frozen(),
        }
    }

    /// Frozen transitions don't clear the comb/allpass buffers; only the
    /// cached frozen flag (which mutes comb input, see `apply_stereo`) updates.
    pub fn reconfigure(&mut self, params: &FreeverbParams) {
        self.frozen = params.frozen();
    }

    pub fn apply_stereo(
        &mut self,
        buf: &mut [f64],
        offset: usize,
        sample_count: usize,
        channel_size: usize,
        params: &FreeverbParams,
        strength: f64,
    ) {
        let derived = derive(params, strength);
        let dry = 1.0 - strength;
        let left_start = offset;
        let right_start = channel_size + offset;
        for i in 0..sample_count {
            let l = buf[left_start + i];
            let r = buf[right_start + i];
            let input = if self.frozen { 0.0 } else { (l + r) * derived.gain };

            let out_l: f64 = self
                .left
                .combs
                .iter_mut()
                .map(|c| c.process(input, derived.room_size, derived.damp))
                .sum();
            let out_r: f64 = self
                .right
                .combs
                .iter_mut()
                .map(|c| c.process(input, derived.room_size, derived.damp))
                .sum();

            let mut out_l = out_l;
            for ap in self.left.allpasses.iter_mut() {
                out_l = ap.process(out_l, 0.5);
            }
            let mut out_r = out_r;
            for ap in self.right.allpasses.iter_mut() {
                out_r = ap.process(out_r, 0.5);
            }

            let new_l = out_l * derived.wet_left + out_r * derived.wet_right + l * dry;
            let new_r = out_r * derived.wet_left + out_l * derived.wet_right + r * dry;
            buf[left_start + i] = new_l;
            buf[right_start + i] = new_r;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::filter::{FilterDefinition, FilterParams};

    #[test]
    fn dry_strength_zero_passes_through() {
        let def = FilterDefinition::new_freeverb();
        let mut inst = def.create_instance();
        inst.set_strength(0.0);
        inst.update_parameter_faders(0.0);
        inst.begin_filtering(2, 44100).unwrap();
        let mut buf = vec![0.3, 0.4, -0.2, 0.1, 0.5, -0.6, 0.2, 0.0];
        let before = buf.clone();
        // channel_size here = 4, two channels of 4 samples each, process all 4
        inst.apply_filtering_to_all_channels(&mut buf, 0, 4, 2, 4);
        // strength 0 -> wet_left/wet_right are 0 and dry = 1, so output is
        // the unscaled input (see the comment on `derive` for why scaleDry
        // is deliberately not applied here).
        for i in 0..4 {
            assert!((buf[i] - before[i]).abs() < 1e-9);
            assert!((buf[4 + i] - before[4 + i]).abs() < 1e-9);
        }
    }

    #[test]
    fn mono_is_rejected() {
        let def = FilterDefinition::new_freeverb();
        let mut inst = def.create_instance();
        inst.update_parameter_faders(0.0);
        let err = inst.begin_filtering(1, 44100).unwrap_err();
        assert!(matches!(err, crate::error::MonoSoundError::FilterChannelMismatch { .. }));
    }

    #[test]
    fn default_params_kind_roundtrip() {
        let def = FilterDefinition::new_freeverb();
        def.with_params(|p| {
            if let FilterParams::Freeverb(fv) = p {
                assert!(!fv.frozen());
            }
        });
    }
}
