//! Sliding-window median smoothing.
use crate::error::{AppResult, PipelineError};

/// A centred running median over an odd window.
///
/// Near the ends the window is truncated rather than padded or reflected, and
/// non-finite samples inside a window are ignored. A window that ends up with
/// an even number of finite samples takes the mean of the two middle ones.
#[derive(Debug, Clone, PartialEq)]
pub struct MedianFilter {
    window_size: usize,
}

impl MedianFilter {
    pub fn new(window_size: usize) -> AppResult<Self> {
        if window_size % 2 == 0 {
            return Err(PipelineError::Filter(format!(
                "median window must be odd, got {window_size}"
            )));
        }
        Ok(Self { window_size })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn apply(&self, row: &[f64]) -> Vec<f64> {
        let half = self.window_size / 2;
        let mut buffer = Vec::with_capacity(self.window_size);
        (0..row.len())
            .map(|i| {
                let lo = i.saturating_sub(half);
                let hi = (i + half + 1).min(row.len());
                buffer.clear();
                buffer.extend(row[lo..hi].iter().copied().filter(|v| v.is_finite()));
                median(&mut buffer)
            })
            .collect()
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    }
}
