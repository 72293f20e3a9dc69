//! Echo filter (C4), §4.4: a circular delay line with bias-weighted decay.

use crate::filter::ChangedMask;
use crate::param::Parameter;

const BIT_DELAY: u64 = 1 << 0;
const BIT_DECAY: u64 = 1 << 1;
const BIT_BIAS: u64 = 1 << 2;

#[derive(Clone, Debug)]
pub struct EchoParams {
    delay: Parameter<f64>,
    decay: Parameter<f64>,
    bias: Parameter<f64>,
}

impl Default for EchoParams {
    fn default() -> Self {
        Self {
            delay: Parameter::new(0.3, f64::MIN_POSITIVE, f64::MAX),
            decay: Parameter::new(0.7, 0.0, 1.0),
            bias: Parameter::new(0.0, 0.0, 1.0),
        }
    }
}

impl EchoParams {
    pub fn set_delay(&mut self, seconds: f64, changed: &ChangedMask) {
        if self.delay.set(seconds) {
            changed.mark(BIT_DELAY);
        }
    }

    pub fn set_decay(&mut self, decay: f64, changed: &ChangedMask) {
        if self.decay.set(decay) {
            changed.mark(BIT_DECAY);
        }
    }

    pub fn set_bias(&mut self, bias: f64, changed: &ChangedMask) {
        if self.bias.set(bias) {
            changed.mark(BIT_BIAS);
        }
    }

    pub fn delay(&self) -> f64 {
        self.delay.value()
    }

    pub fn decay(&self) -> f64 {
        self.decay.value()
    }

    pub fn bias(&self) -> f64 {
        self.bias.value()
    }

    pub(crate) fn update_faders(&mut self, now: f64, changed: &ChangedMask) {
        if self.delay.update_fader(now) {
            changed.mark(BIT_DELAY);
        }
        if self.decay.update_fader(now) {
            changed.mark(BIT_DECAY);
        }
        if self.bias.update_fader(now) {
            changed.mark(BIT_BIAS);
        }
    }
}

struct ChannelState {
    buffer: Vec<f64>,
    usable_len: usize,
    offset: usize,
}

impl ChannelState {
    fn new(max_buffer_len: usize, usable_len: usize) -> Self {
        Self {
            buffer: vec![0.0; max_buffer_len],
            usable_len,
            offset: 0,
        }
    }
}

pub struct EchoState {
    max_buffer_len: usize,
    channels: Vec<ChannelState>,
}

impl EchoState {
    pub fn new(channel_count: usize, params: &EchoParams, sample_rate: u32) -> Self {
        let max_buffer_len = (params.delay() * sample_rate as f64).ceil() as usize;
        let usable_len = max_buffer_len.max(1);
        Self {
            max_buffer_len: max_buffer_len.max(1),
            channels: (0..channel_count)
                .map(|_| ChannelState::new(usable_len, usable_len))
                .collect(),
        }
    }

    /// Changing delay after the first `begin_filtering` only shrinks the
    /// usable window within the fixed-size buffer allocated at first use,
    /// matching "Max buffer length fixed on first beginFiltering".
    pub fn reconfigure(&mut self, params: &EchoParams, sample_rate: u32) {
        let requested = (params.delay() * sample_rate as f64).ceil() as usize;
        let usable = requested.min(self.max_buffer_len).max(1);
        for ch in &mut self.channels {
            ch.usable_len = usable;
            if ch.offset >= usable {
                ch.offset = 0;
            }
        }
    }

    pub fn apply_channel(&mut self, samples: &mut [f64], channel: usize, params: &EchoParams, strength: f64) {
        let ch = &mut self.channels[channel];
        let usable = ch.usable_len;
        let bias = params.bias();
        let decay = params.decay();
        for s in samples.iter_mut() {
            let input = *s;
            let i = ch.offset;
            let prev_echo = ch.buffer[(i + usable - 1) % usable];
            let echo = bias * prev_echo + (1.0 - bias) * ch.buffer[i];
            let out = input + echo * decay;
            ch.buffer[i] = out;
            let mixed = input + (out - input) * strength;
            ch.offset = (i + 1) % usable;
            *s = mixed;
        }
    }
}
