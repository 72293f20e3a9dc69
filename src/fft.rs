//! FFT pipeline (C8): an in-place iterative Cooley-Tukey radix-2 DFT over a
//! post-filter sample block, feeding RMS / dB graphs with static or
//! decay-over-time rendering.
//!
//! The transform is hand-rolled rather than pulled from a crate: §4.9 gives
//! an exact algorithm (twiddle-squaring iterative DIT + bit-reverse
//! reshuffle + `1/sqrt(N)` normalization) that a general-purpose FFT crate
//! wouldn't reproduce bit-for-bit, and the testable properties (§8.10)
//! assert against this specific normalization convention.

use std::f64::consts::PI;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Complex64 {
    pub re: f64,
    pub im: f64,
}

impl Complex64 {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    fn add(self, o: Self) -> Self {
        Self::new(self.re + o.re, self.im + o.im)
    }

    fn sub(self, o: Self) -> Self {
        Self::new(self.re - o.re, self.im - o.im)
    }

    fn mul(self, o: Self) -> Self {
        Self::new(self.re * o.re - self.im * o.im, self.re * o.im + self.im * o.re)
    }

    fn scale(self, s: f64) -> Self {
        Self::new(self.re * s, self.im * s)
    }

    fn conj(self) -> Self {
        Self::new(self.re, -self.im)
    }

    pub fn abs(self) -> f64 {
        (self.re * self.re + self.im * self.im).sqrt()
    }
}

fn reverse_bits(mut v: usize, bits: u32) -> usize {
    let mut r = 0usize;
    for _ in 0..bits {
        r = (r << 1) | (v & 1);
        v >>= 1;
    }
    r
}

fn bit_reverse_reshuffle(buf: &mut [Complex64]) {
    let n = buf.len();
    let bits = n.trailing_zeros();
    for a in 0..n {
        let b = reverse_bits(a, bits);
        if b > a {
            buf.swap(a, b);
        }
    }
}

/// Unnormalized in-place iterative radix-2 DIT transform, per §4.9's
/// twiddle-squaring recurrence, followed by the bit-reverse unscramble.
fn raw_fft(buf: &mut [Complex64]) {
    let count = buf.len();
    assert!(count.is_power_of_two(), "FFT length must be a power of two");
    let theta = PI / count as f64;
    let mut phi_t = Complex64::new(theta.cos(), -theta.sin());
    let mut k = count;
    while k > 1 {
        let n_level = k;
        k >>= 1;
        phi_t = phi_t.mul(phi_t);
        let mut t = Complex64::new(1.0, 0.0);
        for l in 0..k {
            let mut a = l;
            while a < count {
                let b = a + k;
                let diff = buf[a].sub(buf[b]);
                buf[a] = buf[a].add(buf[b]);
                buf[b] = diff.mul(t);
                a += n_level;
            }
            t = t.mul(phi_t);
        }
    }
    bit_reverse_reshuffle(buf);
}

/// Forward transform of a real-valued block, normalized by `1/sqrt(N)`.
pub fn forward(real_input: &[f64]) -> Vec<Complex64> {
    let n = real_input.len();
    let mut buf: Vec<Complex64> = real_input.iter().map(|&r| Complex64::new(r, 0.0)).collect();
    raw_fft(&mut buf);
    let norm = 1.0 / (n as f64).sqrt();
    for c in buf.iter_mut() {
        *c = c.scale(norm);
    }
    buf
}

/// Inverse transform, the exact adjoint of [`forward`] under its
/// `1/sqrt(N)` normalization (so `inverse(forward(x)) == x`).
pub fn inverse(freq: &[Complex64]) -> Vec<f64> {
    let n = freq.len();
    let mut buf: Vec<Complex64> = freq.iter().map(|c| c.conj()).collect();
    raw_fft(&mut buf);
    let norm = 1.0 / (n as f64).sqrt();
    buf.iter().map(|c| c.re * norm).collect()
}

/// `freq[i] = i * sampleRate / (N/2) / 2` for `i in [0, N/2]`, per §4.9.
pub fn frequency_axis(n: usize, sample_rate: u32) -> Vec<f64> {
    let half = n / 2;
    (0..=half)
        .map(|i| (i as f64 * sample_rate as f64 / (half as f64)) / 2.0)
        .collect()
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RenderMode {
    Static,
    DecayOverTime(f64),
}

/// A spectrum query attached to a stream's post-filter samples (C8).
/// `active` while producing; graphs only pull once `!active` and fresh data
/// has been populated.
pub struct FftQuery {
    size: usize,
    active: bool,
    fresh: bool,
    spectrum: Vec<Complex64>,
    render_mode: RenderMode,
    last_populate_time: f64,
}

impl FftQuery {
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "FFT query size must be a power of two");
        Self {
            size,
            active: true,
            fresh: false,
            spectrum: vec![Complex64::default(); size],
            render_mode: RenderMode::Static,
            last_populate_time: 0.0,
        }
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) {
        self.render_mode = mode;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Downmixes a deinterleaved-by-channel block to mono, zero-padding or
    /// truncating to the query's fixed size, and transforms it.
    pub fn submit(&mut self, deinterleaved: &[f64], channel_count: usize, channel_size: usize, now: f64) {
        let mut mono = vec![0.0f64; self.size];
        let take = channel_size.min(self.size);
        for (i, slot) in mono.iter_mut().take(take).enumerate() {
            let sum: f64 = (0..channel_count).map(|c| deinterleaved[c * channel_size + i]).sum();
            *slot = sum / channel_count.max(1) as f64;
        }
        self.spectrum = forward(&mono);
        self.fresh = true;
        self.last_populate_time = now;
    }

    fn render(&self, value: f64, now: f64) -> f64 {
        match self.render_mode {
            RenderMode::Static => value,
            RenderMode::DecayOverTime(factor) => value * factor.powf((now - self.last_populate_time).max(0.0)),
        }
    }

    pub fn rms_graph(&self, now: f64) -> Option<Vec<f64>> {
        if self.active || !self.fresh {
            return None;
        }
        Some(self.spectrum.iter().map(|c| self.render(c.abs(), now)).collect())
    }

    pub fn db_graph(&self, now: f64) -> Option<Vec<f64>> {
        if self.active || !self.fresh {
            return None;
        }
        Some(self.spectrum.iter().map(|c| self.render(20.0 * c.abs().ln(), now)).collect())
    }

    pub fn frequency_axis(&self, sample_rate: u32) -> Vec<f64> {
        frequency_axis(self.size, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ifft_of_fft_is_identity() {
        let n = 64;
        let input: Vec<f64> = (0..n).map(|i| (i as f64 * 0.1).sin()).collect();
        let spectrum = forward(&input);
        let back = inverse(&spectrum);
        for (a, b) in input.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    #[test]
    fn pure_sine_peaks_at_expected_bin() {
        let n = 256;
        let sample_rate = 8192u32;
        let target_freq = 1000.0;
        let input: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * target_freq * i as f64 / sample_rate as f64).sin())
            .collect();
        let spectrum = forward(&input);
        let axis = frequency_axis(n, sample_rate);
        let (peak_bin, _) = spectrum[..=n / 2]
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
            .unwrap();
        let nearest_expected = axis
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (**a - target_freq).abs().partial_cmp(&(**b - target_freq).abs()).unwrap())
            .unwrap()
            .0;
        assert_eq!(peak_bin, nearest_expected);
    }

    #[test]
    fn decay_over_time_shrinks_magnitude() {
        let mut q = FftQuery::new(8);
        q.set_render_mode(RenderMode::DecayOverTime(0.5));
        q.set_active(false);
        let block = vec![1.0; 8];
        q.submit(&block, 1, 8, 0.0);
        let at_zero = q.rms_graph(0.0).unwrap();
        let at_one = q.rms_graph(1.0).unwrap();
        for (a, b) in at_zero.iter().zip(at_one.iter()) {
            assert!(*b <= *a + 1e-12);
        }
    }

    #[test]
    fn active_query_withholds_graphs() {
        let mut q = FftQuery::new(8);
        assert!(q.rms_graph(0.0).is_none());
        q.submit(&[0.0; 8], 1, 8, 0.0);
        assert!(q.rms_graph(0.0).is_none(), "still active");
        q.set_active(false);
        assert!(q.rms_graph(0.0).is_some());
    }
}
