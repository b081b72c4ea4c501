//! Regularize-and-fill: resamples irregular raw dates onto an even grid.
//!
//! Raw dates are rounded to `resolution`, a grid is laid from the earliest to
//! the latest rounded date at `interval`, and every raw date is snapped to its
//! nearest grid slot. Each row is then interpolated independently in slot
//! space, so gaps of any length are filled but nothing is extrapolated beyond a
//! row's first and last finite sample.
use super::SeriesFrame;
use crate::error::{AppResult, PipelineError};
use chrono::{Duration, NaiveDateTime, NaiveTime};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Interpolation scheme used between known samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationKind {
    Linear,
    Nearest,
    /// Not-a-knot cubic spline.
    #[default]
    Cubic,
}

impl InterpolationKind {
    /// Fewest finite samples a row needs before it can be interpolated.
    pub fn min_points(self) -> usize {
        match self {
            InterpolationKind::Nearest => 1,
            InterpolationKind::Linear => 2,
            InterpolationKind::Cubic => 4,
        }
    }
}

/// Rounds `dt` to the nearest multiple of `resolution` counted from midnight.
/// Halfway values round up.
pub fn round_to(dt: NaiveDateTime, resolution: Duration) -> NaiveDateTime {
    let step = resolution.num_seconds();
    if step <= 0 {
        return dt;
    }
    let midnight = dt.date().and_time(NaiveTime::default());
    let offset = (dt - midnight).num_seconds();
    let rounded = (offset + step / 2).div_euclid(step) * step;
    midnight + Duration::seconds(rounded)
}

/// `start + k·interval` for every `k` that stays at or before `end`.
pub fn regular_grid(start: NaiveDateTime, end: NaiveDateTime, interval: Duration) -> Vec<NaiveDateTime> {
    let mut grid = Vec::new();
    if interval <= Duration::zero() {
        return grid;
    }
    let mut t = start;
    while t <= end {
        grid.push(t);
        t += interval;
    }
    grid
}

/// Grid slot closest to `date`; ties go to the earlier slot.
pub fn nearest_slot(start: NaiveDateTime, interval: Duration, slots: usize, date: NaiveDateTime) -> usize {
    let step = interval.num_seconds().max(1);
    let offset = (date - start).num_seconds().max(0);
    let (k, rem) = (offset / step, offset % step);
    let k = if 2 * rem > step { k + 1 } else { k };
    usize::try_from(k).unwrap_or(usize::MAX).min(slots.saturating_sub(1))
}

/// The regularize-and-fill strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RegularizeFill {
    interval: Duration,
    resolution: Duration,
    kind: InterpolationKind,
}

impl RegularizeFill {
    pub fn new(
        interval: std::time::Duration,
        resolution: std::time::Duration,
        kind: InterpolationKind,
    ) -> AppResult<Self> {
        let convert = |d: std::time::Duration, name: &str| {
            Duration::from_std(d)
                .ok()
                .filter(|d| d.num_seconds() > 0)
                .ok_or_else(|| PipelineError::Filter(format!("{name} must be at least one second")))
        };
        Ok(Self {
            interval: convert(interval, "interval")?,
            resolution: convert(resolution, "resolution")?,
            kind,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn kind(&self) -> InterpolationKind {
        self.kind
    }

    /// Regular date axis covering the rounded raw dates.
    pub fn grid(&self, dates: &[NaiveDateTime]) -> Vec<NaiveDateTime> {
        let rounded = dates.iter().map(|d| round_to(*d, self.resolution));
        match (rounded.clone().min(), rounded.max()) {
            (Some(start), Some(end)) => regular_grid(start, end, self.interval),
            _ => Vec::new(),
        }
    }

    pub fn transform(&self, frame: SeriesFrame) -> AppResult<SeriesFrame> {
        let grid = self.grid(&frame.dates);
        let Some(&start) = grid.first() else {
            return Ok(SeriesFrame {
                dates: Vec::new(),
                resistance: Array2::zeros((frame.resistance.nrows(), 0)),
                apres: Array2::zeros((frame.apres.nrows(), 0)),
                chargeability: Array2::zeros((frame.chargeability.nrows(), 0)),
            });
        };
        let slots: Vec<usize> = frame
            .dates
            .iter()
            .map(|d| nearest_slot(start, self.interval, grid.len(), round_to(*d, self.resolution)))
            .collect();

        let mut sparse_rows = 0;
        let mut fill = |array: &Array2<f64>| {
            let mut out = Array2::from_elem((array.nrows(), grid.len()), f64::NAN);
            for (r, row) in array.rows().into_iter().enumerate() {
                let points = slot_points(row.iter().copied(), &slots);
                if points.len() < self.kind.min_points() {
                    sparse_rows += 1;
                    continue;
                }
                let filled = interpolate_row(&points, grid.len(), self.kind);
                out.row_mut(r).assign(&ArrayView1::from(filled.as_slice()));
            }
            out
        };
        let resistance = fill(&frame.resistance);
        let apres = fill(&frame.apres);
        let chargeability = fill(&frame.chargeability);

        if sparse_rows > 0 {
            debug!(rows = sparse_rows, kind = ?self.kind, "rows with too few samples left empty");
        }
        Ok(SeriesFrame {
            dates: grid,
            resistance,
            apres,
            chargeability,
        })
    }
}

/// Finite samples keyed by slot, ascending; a later sample wins a shared slot.
fn slot_points(values: impl Iterator<Item = f64>, slots: &[usize]) -> Vec<(f64, f64)> {
    let mut points: Vec<(usize, f64)> = Vec::new();
    for (value, &slot) in values.zip(slots) {
        if !value.is_finite() {
            continue;
        }
        match points.binary_search_by_key(&slot, |(s, _)| *s) {
            Ok(i) => points[i].1 = value,
            Err(i) => points.insert(i, (slot, value)),
        }
    }
    points.into_iter().map(|(s, v)| (s as f64, v)).collect()
}

/// Evaluates the interpolant at slots `0..slots`; NaN outside the support.
///
/// `points` must be sorted by strictly increasing x.
pub fn interpolate_row(points: &[(f64, f64)], slots: usize, kind: InterpolationKind) -> Vec<f64> {
    let mut out = vec![f64::NAN; slots];
    let (Some(&(first, _)), Some(&(last, _))) = (points.first(), points.last()) else {
        return out;
    };
    if points.len() < kind.min_points() {
        return out;
    }
    let spline = match kind {
        InterpolationKind::Cubic => Some(CubicSpline::not_a_knot(points)),
        _ => None,
    };

    let mut segment = 0;
    for (slot, value) in out.iter_mut().enumerate() {
        let x = slot as f64;
        if x < first || x > last {
            continue;
        }
        while segment + 2 < points.len() && x > points[segment + 1].0 {
            segment += 1;
        }
        let (x0, y0) = points[segment];
        let Some(&(x1, y1)) = points.get(segment + 1) else {
            *value = y0;
            continue;
        };
        *value = match (kind, &spline) {
            (InterpolationKind::Cubic, Some(spline)) => spline.eval(segment, x),
            (InterpolationKind::Nearest, _) => {
                if x - x0 <= x1 - x {
                    y0
                } else {
                    y1
                }
            }
            _ => y0 + (y1 - y0) * (x - x0) / (x1 - x0),
        };
    }
    out
}

/// Cubic spline through `points` stored as knot second derivatives.
struct CubicSpline<'a> {
    points: &'a [(f64, f64)],
    m: Vec<f64>,
}

impl<'a> CubicSpline<'a> {
    /// Not-a-knot end conditions: the third derivative is continuous across
    /// the second and the second-to-last knot. Needs at least four points.
    fn not_a_knot(points: &'a [(f64, f64)]) -> Self {
        let n = points.len();
        let h: Vec<f64> = points.windows(2).map(|w| w[1].0 - w[0].0).collect();
        let d: Vec<f64> = points
            .windows(2)
            .zip(&h)
            .map(|(w, h)| (w[1].1 - w[0].1) / h)
            .collect();

        // Unknowns M1..M(n-2); M0 and M(n-1) are eliminated with the end conditions.
        let size = n - 2;
        let mut sub = vec![0.0; size];
        let mut diag = vec![0.0; size];
        let mut sup = vec![0.0; size];
        let mut rhs = vec![0.0; size];
        for j in 0..size {
            let i = j + 1;
            sub[j] = h[i - 1];
            diag[j] = 2.0 * (h[i - 1] + h[i]);
            sup[j] = h[i];
            rhs[j] = 6.0 * (d[i] - d[i - 1]);
        }
        let (h0, h1) = (h[0], h[1]);
        diag[0] = (h0 + h1) * (h0 + 2.0 * h1) / h1;
        sup[0] = (h1 * h1 - h0 * h0) / h1;
        let (a, b) = (h[n - 3], h[n - 2]);
        sub[size - 1] = (a * a - b * b) / a;
        diag[size - 1] = (a + b) * (2.0 * a + b) / a;

        let inner = solve_tridiagonal(&sub, &diag, &sup, &rhs);
        let mut m = Vec::with_capacity(n);
        m.push(((h0 + h1) * inner[0] - h0 * inner.get(1).copied().unwrap_or(0.0)) / h1);
        m.extend_from_slice(&inner);
        let before_last = if size >= 2 { inner[size - 2] } else { m[0] };
        m.push(((a + b) * inner[size - 1] - b * before_last) / a);
        Self { points, m }
    }

    fn eval(&self, segment: usize, x: f64) -> f64 {
        let (x0, y0) = self.points[segment];
        let (x1, y1) = self.points[segment + 1];
        let (m0, m1) = (self.m[segment], self.m[segment + 1]);
        let h = x1 - x0;
        let (l, r) = (x1 - x, x - x0);
        m0 * l.powi(3) / (6.0 * h)
            + m1 * r.powi(3) / (6.0 * h)
            + (y0 / h - m0 * h / 6.0) * l
            + (y1 / h - m1 * h / 6.0) * r
    }
}

/// Thomas algorithm; `sub[0]` and `sup[len-1]` are ignored.
fn solve_tridiagonal(sub: &[f64], diag: &[f64], sup: &[f64], rhs: &[f64]) -> Vec<f64> {
    let n = diag.len();
    let mut c = vec![0.0; n];
    let mut x = vec![0.0; n];
    c[0] = sup[0] / diag[0];
    x[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - sub[i] * c[i - 1];
        c[i] = sup[i] / denom;
        x[i] = (rhs[i] - sub[i] * x[i - 1]) / denom;
    }
    for i in (0..n.saturating_sub(1)).rev() {
        x[i] -= c[i] * x[i + 1];
    }
    x
}
