//! Butterworth low-pass smoothing with forward/reverse averaging.
use crate::config::LowPassConfig;
use crate::error::{AppResult, PipelineError};
use biquad::{Biquad, Coefficients, DirectForm1, Hertz};
use std::f64::consts::PI;

/// A low-pass filter applied once forward and once on the reversed row.
///
/// The two passes are averaged to cancel phase lag. The first and last
/// `edge_width` samples carry the start-up transient of one of the passes, so
/// they take the reverse pass alone.
///
/// The Butterworth response of order `n` is realised as a cascade of
/// second-order sections built with the `biquad` crate, plus one first-order
/// section when `n` is odd.
///
/// # Example Configuration (`.toml`)
///
/// ```toml
/// [filter.lowpass]
/// order = 2
/// sample_rate_hz = 0.000277778  # one sample per hour
/// cutoff_hz = 0.0000339537
/// edge_width = 20
/// ```
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    sections: Vec<Coefficients<f64>>,
    edge_width: usize,
}

impl LowPassFilter {
    pub fn new(config: &LowPassConfig) -> AppResult<Self> {
        Ok(Self {
            sections: Self::design_filter(config)?,
            edge_width: config.edge_width,
        })
    }

    fn design_filter(config: &LowPassConfig) -> AppResult<Vec<Coefficients<f64>>> {
        let order = config.order;
        if order == 0 {
            return Err(PipelineError::Filter("filter order must be at least 1".into()));
        }
        let (fs, f0) = (config.sample_rate_hz, config.cutoff_hz);
        if !(f0 > 0.0 && f0 < fs / 2.0) {
            return Err(PipelineError::Filter(format!(
                "cutoff {f0} Hz must lie between 0 and the Nyquist frequency {} Hz",
                fs / 2.0
            )));
        }
        let hz = |value: f64| {
            Hertz::<f64>::from_hz(value)
                .map_err(|_| PipelineError::Filter(format!("invalid frequency {value} Hz")))
        };

        let mut sections = Vec::with_capacity(order.div_ceil(2));
        for k in 1..=order / 2 {
            let q = 1.0 / (2.0 * ((2 * k - 1) as f64 * PI / (2 * order) as f64).sin());
            let coeffs = Coefficients::<f64>::from_params(biquad::Type::LowPass, hz(fs)?, hz(f0)?, q)
                .map_err(|e| PipelineError::Filter(format!("section {k}: {e:?}")))?;
            sections.push(coeffs);
        }
        if order % 2 == 1 {
            // First-order bilinear section, prewarped like the biquads
            let k = (PI * f0 / fs).tan();
            sections.push(Coefficients {
                a1: (k - 1.0) / (k + 1.0),
                a2: 0.0,
                b0: k / (1.0 + k),
                b1: k / (1.0 + k),
                b2: 0.0,
            });
        }
        Ok(sections)
    }

    pub fn edge_width(&self) -> usize {
        self.edge_width
    }

    /// Runs the cascade from a zero initial state.
    fn run(&self, samples: impl Iterator<Item = f64>) -> Vec<f64> {
        let mut stages: Vec<DirectForm1<f64>> =
            self.sections.iter().map(|c| DirectForm1::<f64>::new(*c)).collect();
        samples
            .map(|x| stages.iter_mut().fold(x, |acc, stage| stage.run(acc)))
            .collect()
    }

    /// Forward pass and time-aligned reverse pass of a finite segment.
    pub fn passes(&self, segment: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let forward = self.run(segment.iter().copied());
        let mut backward = self.run(segment.iter().rev().copied());
        backward.reverse();
        (forward, backward)
    }

    fn smooth_segment(&self, segment: &[f64]) -> Vec<f64> {
        let (forward, backward) = self.passes(segment);
        let len = segment.len();
        (0..len)
            .map(|i| {
                if i < self.edge_width || i + self.edge_width >= len {
                    backward[i]
                } else {
                    (forward[i] + backward[i]) / 2.0
                }
            })
            .collect()
    }

    /// Smooths every maximal run of finite samples independently; non-finite
    /// samples are passed through.
    pub fn apply(&self, row: &[f64]) -> Vec<f64> {
        let mut out = row.to_vec();
        let mut start = 0;
        while start < row.len() {
            if !row[start].is_finite() {
                start += 1;
                continue;
            }
            let end = row[start..]
                .iter()
                .position(|v| !v.is_finite())
                .map_or(row.len(), |p| start + p);
            out[start..end].copy_from_slice(&self.smooth_segment(&row[start..end]));
            start = end;
        }
        out
    }
}
