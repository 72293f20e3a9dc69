//! Biquad Resonant filter (C4), §4.3: a 2-pole/2-zero IIR low/band/high-pass
//! with resonance.

use crate::filter::ChangedMask;
use crate::param::Parameter;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BiquadType {
    LowPass = 0,
    BandPass = 1,
    HighPass = 2,
}

const BIT_TYPE: u64 = 1 << 0;
const BIT_FREQUENCY: u64 = 1 << 1;
const BIT_RESONANCE: u64 = 1 << 2;

#[derive(Clone, Debug)]
pub struct BiquadParams {
    filter_type: BiquadType,
    frequency: Parameter<f64>,
    resonance: Parameter<f64>,
}

impl Default for BiquadParams {
    fn default() -> Self {
        Self {
            filter_type: BiquadType::LowPass,
            frequency: Parameter::new(2000.0, 10.0, 8000.0),
            resonance: Parameter::new(2.0, 0.1, 20.0),
        }
    }
}

impl BiquadParams {
    pub fn set_type(&mut self, filter_type: BiquadType, changed: &ChangedMask) {
        if self.filter_type != filter_type {
            self.filter_type = filter_type;
            changed.mark(BIT_TYPE);
        }
    }

    pub fn set_frequency(&mut self, hz: f64) {
        self.frequency.set(hz);
    }

    pub fn set_frequency_tracked(&mut self, hz: f64, changed: &ChangedMask) {
        if self.frequency.set(hz) {
            changed.mark(BIT_FREQUENCY);
        }
    }

    pub fn set_resonance(&mut self, resonance: f64, changed: &ChangedMask) {
        if self.resonance.set(resonance) {
            changed.mark(BIT_RESONANCE);
        }
    }

    pub fn filter_type(&self) -> BiquadType {
        self.filter_type
    }

    pub fn frequency(&self) -> f64 {
        self.frequency.value()
    }

    pub fn resonance(&self) -> f64 {
        self.resonance.value()
    }

    pub(crate) fn update_faders(&mut self, now: f64, changed: &ChangedMask) {
        if self.frequency.update_fader(now) {
            changed.mark(BIT_FREQUENCY);
        }
        if self.resonance.update_fader(now) {
            changed.mark(BIT_RESONANCE);
        }
    }
}

/// Recomputed feed-forward (`a`) and feedback (`b`) coefficients.
#[derive(Copy, Clone, Debug, Default)]
struct Coefficients {
    a: [f64; 3],
    b: [f64; 2],
}

fn compute_coefficients(params: &BiquadParams, sample_rate: u32) -> Coefficients {
    let omega = 2.0 * std::f64::consts::PI * params.frequency() / sample_rate as f64;
    let (sin_omega, cos_omega) = omega.sin_cos();
    let alpha = sin_omega / (2.0 * params.resonance());
    let s = 1.0 / (1.0 + alpha);
    let a = match params.filter_type() {
        BiquadType::LowPass => {
            let x = (1.0 - cos_omega) / 2.0;
            [x * s, (1.0 - cos_omega) * s, x * s]
        }
        BiquadType::BandPass => [alpha * s, 0.0, -alpha * s],
        BiquadType::HighPass => {
            let x = (1.0 + cos_omega) / 2.0;
            [x * s, -(1.0 + cos_omega) * s, x * s]
        }
    };
    let b = [-2.0 * cos_omega * s, (1.0 - alpha) * s];
    Coefficients { a, b }
}

struct ChannelState {
    x: [f64; 3],
    y: [f64; 2],
}

impl ChannelState {
    fn new() -> Self {
        Self { x: [0.0; 3], y: [0.0; 2] }
    }
}

pub struct BiquadState {
    coefficients: Coefficients,
    channels: Vec<ChannelState>,
}

impl BiquadState {
    pub fn new(channel_count: usize, params: &BiquadParams, sample_rate: u32) -> Self {
        Self {
            coefficients: compute_coefficients(params, sample_rate),
            channels: (0..channel_count).map(|_| ChannelState::new()).collect(),
        }
    }

    pub fn recompute_coefficients(&mut self, params: &BiquadParams, sample_rate: u32) {
        self.coefficients = compute_coefficients(params, sample_rate);
    }

    pub fn apply_channel(&mut self, samples: &mut [f64], channel: usize, _params: &BiquadParams, strength: f64) {
        let Coefficients { a, b } = self.coefficients;
        let state = &mut self.channels[channel];
        for s in samples.iter_mut() {
            let input = *s;
            state.x[0] = input;
            let y0 = a[0] * state.x[0] + a[1] * state.x[1] + a[2] * state.x[2]
                - b[0] * state.y[0]
                - b[1] * state.y[1];
            let output = input + (y0 - input) * strength;
            state.x[2] = state.x[1];
            state.x[1] = state.x[0];
            state.y[1] = state.y[0];
            state.y[0] = y0;
            *s = output;
        }
    }
}
