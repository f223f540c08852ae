//! Microphone signal conditioning
//!
//! High-pass, presence boost, low-pass and a feed-forward compressor, applied
//! in that order to every captured block before it is packetized.

use std::f64::consts::PI;

use crate::config::{CompressorConfig, ConditioningConfig};

/// Butterworth Q for the shelving-free high/low-pass stages
const BUTTERWORTH_Q: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Bandwidth of the presence peak
const PRESENCE_Q: f64 = 1.0;

/// Floor for level detection, avoids log of zero
const LEVEL_FLOOR: f32 = 1e-9;

/// Second-order IIR section (RBJ cookbook coefficients, transposed direct form II)
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    /// Second-order high-pass at `cutoff` Hz
    #[must_use]
    pub fn high_pass(sample_rate: u32, cutoff: f32) -> Self {
        let (cos, alpha) = Self::prewarp(sample_rate, cutoff, BUTTERWORTH_Q);
        Self::normalized(
            (1.0 + cos) / 2.0,
            -(1.0 + cos),
            (1.0 + cos) / 2.0,
            1.0 + alpha,
            -2.0 * cos,
            1.0 - alpha,
        )
    }

    /// Second-order low-pass at `cutoff` Hz
    #[must_use]
    pub fn low_pass(sample_rate: u32, cutoff: f32) -> Self {
        let (cos, alpha) = Self::prewarp(sample_rate, cutoff, BUTTERWORTH_Q);
        Self::normalized(
            (1.0 - cos) / 2.0,
            1.0 - cos,
            (1.0 - cos) / 2.0,
            1.0 + alpha,
            -2.0 * cos,
            1.0 - alpha,
        )
    }

    /// Peaking EQ centred on `center` Hz
    #[must_use]
    pub fn peaking(sample_rate: u32, center: f32, gain_db: f32, q: f64) -> Self {
        let (cos, alpha) = Self::prewarp(sample_rate, center, q);
        let a = 10f64.powf(f64::from(gain_db) / 40.0);
        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos,
            1.0 - alpha / a,
        )
    }

    fn prewarp(sample_rate: u32, freq: f32, q: f64) -> (f64, f64) {
        // Keep the corner below Nyquist so the filter stays stable
        let nyquist = f64::from(sample_rate) / 2.0;
        let freq = f64::from(freq).clamp(1.0, nyquist * 0.99);
        let w0 = 2.0 * PI * freq / f64::from(sample_rate);
        (w0.cos(), w0.sin() / (2.0 * q))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn normalized(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: (b0 / a0) as f32,
            b1: (b1 / a0) as f32,
            b2: (b2 / a0) as f32,
            a1: (a1 / a0) as f32,
            a2: (a2 / a0) as f32,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Filter one sample
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let y = self.b0.mul_add(x, self.z1);
        self.z1 = self.b1.mul_add(x, -self.a1 * y) + self.z2;
        self.z2 = self.b2.mul_add(x, -self.a2 * y);
        y
    }
}

/// Feed-forward compressor with a soft knee
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold_db: f32,
    ratio: f32,
    knee_db: f32,
    attack_coef: f32,
    release_coef: f32,
    envelope_db: f32,
}

impl Compressor {
    /// Create a compressor running at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, config: &CompressorConfig) -> Self {
        Self {
            threshold_db: config.threshold_db,
            ratio: config.ratio.max(1.0),
            knee_db: config.knee_db.max(0.0),
            attack_coef: time_coefficient(sample_rate, config.attack_secs),
            release_coef: time_coefficient(sample_rate, config.release_secs),
            envelope_db: 0.0,
        }
    }

    /// Static gain curve: output level for an input level, both in dB
    #[must_use]
    pub fn gain_curve(&self, level_db: f32) -> f32 {
        let over = level_db - self.threshold_db;
        if 2.0 * over < -self.knee_db {
            level_db
        } else if 2.0 * over.abs() <= self.knee_db && self.knee_db > 0.0 {
            let knee = over + self.knee_db / 2.0;
            level_db + (1.0 / self.ratio - 1.0) * knee * knee / (2.0 * self.knee_db)
        } else {
            self.threshold_db + over / self.ratio
        }
    }

    /// Compress one sample
    pub fn process_sample(&mut self, x: f32) -> f32 {
        let level_db = 20.0 * x.abs().max(LEVEL_FLOOR).log10();
        let reduction = self.gain_curve(level_db) - level_db;

        // More reduction than the envelope holds means the attack is running
        let coef = if reduction < self.envelope_db {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope_db = coef.mul_add(self.envelope_db, (1.0 - coef) * reduction);

        x * 10f32.powf(self.envelope_db / 20.0)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn time_coefficient(sample_rate: u32, secs: f32) -> f32 {
    if secs <= 0.0 {
        return 0.0;
    }
    (-1.0 / (f64::from(secs) * f64::from(sample_rate))).exp() as f32
}

/// One stage of the conditioning chain
#[derive(Debug, Clone)]
enum Stage {
    Filter(Biquad),
    Dynamics(Compressor),
}

impl Stage {
    fn process_sample(&mut self, x: f32) -> f32 {
        match self {
            Self::Filter(f) => f.process_sample(x),
            Self::Dynamics(c) => c.process_sample(x),
        }
    }
}

/// Ordered chain of optional conditioning stages
#[derive(Debug, Clone, Default)]
pub struct ConditioningChain {
    stages: Vec<Stage>,
}

impl ConditioningChain {
    /// Build the chain described by `config`; disabled stages are skipped
    #[must_use]
    pub fn new(sample_rate: u32, config: &ConditioningConfig) -> Self {
        let mut stages = Vec::new();
        if let Some(cutoff) = config.high_pass_hz {
            stages.push(Stage::Filter(Biquad::high_pass(sample_rate, cutoff)));
        }
        if let Some(center) = config.presence_hz {
            stages.push(Stage::Filter(Biquad::peaking(
                sample_rate,
                center,
                config.presence_gain_db,
                PRESENCE_Q,
            )));
        }
        if let Some(cutoff) = config.low_pass_hz {
            stages.push(Stage::Filter(Biquad::low_pass(sample_rate, cutoff)));
        }
        if let Some(compressor) = &config.compressor {
            stages.push(Stage::Dynamics(Compressor::new(sample_rate, compressor)));
        }

        tracing::debug!(stages = stages.len(), sample_rate, "conditioning chain built");
        Self { stages }
    }

    /// Number of active stages
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True if no stage is enabled
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Condition a block in place
    pub fn process(&mut self, block: &mut [f32]) {
        if self.stages.is_empty() {
            return;
        }
        for sample in block.iter_mut() {
            let mut s = *sample;
            for stage in &mut self.stages {
                s = stage.process_sample(s);
            }
            *sample = s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn sine(freq: f32, secs: f32, amplitude: f32) -> Vec<f32> {
        let n = (RATE as f32 * secs) as usize;
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / RATE as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    /// RMS of the second half, after the filter has settled
    fn settled_rms(samples: &[f32]) -> f32 {
        rms(&samples[samples.len() / 2..])
    }

    #[test]
    fn high_pass_cuts_rumble() {
        let mut filter = Biquad::high_pass(RATE, 180.0);
        let input = sine(40.0, 1.0, 0.5);
        let output: Vec<f32> = input.iter().map(|&x| filter.process_sample(x)).collect();
        assert!(settled_rms(&output) < settled_rms(&input) * 0.2);
    }

    #[test]
    fn high_pass_keeps_speech_band() {
        let mut filter = Biquad::high_pass(RATE, 180.0);
        let input = sine(1000.0, 1.0, 0.5);
        let output: Vec<f32> = input.iter().map(|&x| filter.process_sample(x)).collect();
        assert!(settled_rms(&output) > settled_rms(&input) * 0.9);
    }

    #[test]
    fn low_pass_cuts_hiss() {
        let mut filter = Biquad::low_pass(RATE, 2000.0);
        let input = sine(7500.0, 1.0, 0.5);
        let output: Vec<f32> = input.iter().map(|&x| filter.process_sample(x)).collect();
        assert!(settled_rms(&output) < settled_rms(&input) * 0.2);
    }

    #[test]
    fn presence_peak_boosts_center() {
        let mut filter = Biquad::peaking(RATE, 2500.0, 6.0, PRESENCE_Q);
        let input = sine(2500.0, 1.0, 0.1);
        let output: Vec<f32> = input.iter().map(|&x| filter.process_sample(x)).collect();
        assert!(settled_rms(&output) > settled_rms(&input) * 1.5);
    }

    #[test]
    fn compressor_curve_is_identity_below_knee() {
        let compressor = Compressor::new(RATE, &CompressorConfig::default());
        assert!((compressor.gain_curve(-60.0) + 60.0).abs() < 1e-4);
    }

    #[test]
    fn compressor_curve_reduces_above_threshold() {
        let config = CompressorConfig::default();
        let compressor = Compressor::new(RATE, &config);
        let out = compressor.gain_curve(0.0);
        let expected = config.threshold_db + (0.0 - config.threshold_db) / config.ratio;
        assert!((out - expected).abs() < 1e-4);
    }

    #[test]
    fn compressor_tames_loud_signal() {
        let mut compressor = Compressor::new(RATE, &CompressorConfig::default());
        let input = sine(440.0, 1.0, 0.9);
        let output: Vec<f32> = input.iter().map(|&x| compressor.process_sample(x)).collect();
        assert!(settled_rms(&output) < settled_rms(&input) * 0.7);
    }

    #[test]
    fn empty_chain_is_passthrough() {
        let config = ConditioningConfig {
            high_pass_hz: None,
            presence_hz: None,
            presence_gain_db: 0.0,
            low_pass_hz: None,
            compressor: None,
        };
        let mut chain = ConditioningChain::new(RATE, &config);
        assert!(chain.is_empty());

        let mut block = vec![0.1, -0.2, 0.3];
        chain.process(&mut block);
        assert_eq!(block, vec![0.1, -0.2, 0.3]);
    }

    #[test]
    fn default_chain_has_all_stages() {
        let chain = ConditioningChain::new(RATE, &ConditioningConfig::default());
        assert_eq!(chain.len(), 4);
    }
}
