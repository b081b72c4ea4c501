//! Filtering strategies and tabular writers.
//!
//! The filter pipeline turns the raw resistance, apparent resistivity and
//! chargeability arrays into the regularized products of the
//! [`FilteredSeriesStore`](crate::series::FilteredSeriesStore). Strategies form
//! a closed set ([`FilterStrategy`]) and are chained by the
//! [`registry`] from configuration.
pub mod iir_filter;
pub mod interpolate;
pub mod processor;
pub mod registry;
pub mod storage;

use crate::error::AppResult;
use crate::series::RawSeriesStore;
use chrono::NaiveDateTime;
use iir_filter::LowPassFilter;
use interpolate::RegularizeFill;
use ndarray::{Array2, ArrayView1};
use processor::MedianFilter;

/// The quantities carried through the filter pipeline on one date axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesFrame {
    pub dates: Vec<NaiveDateTime>,
    /// `[measurement, date]`
    pub resistance: Array2<f64>,
    pub apres: Array2<f64>,
    pub chargeability: Array2<f64>,
}

impl SeriesFrame {
    pub fn from_raw(raw: &RawSeriesStore) -> Self {
        Self {
            dates: raw.dates().to_vec(),
            resistance: raw.resistance().clone(),
            apres: raw.apres().clone(),
            chargeability: raw.chargeability().clone(),
        }
    }

    /// Replaces every row of every quantity with `f(row)`; the date axis is kept.
    pub fn map_rows(mut self, f: impl Fn(&[f64]) -> Vec<f64>) -> Self {
        for array in [&mut self.resistance, &mut self.apres, &mut self.chargeability] {
            for mut row in array.rows_mut() {
                let values: Vec<f64> = row.iter().copied().collect();
                row.assign(&ArrayView1::from(f(&values).as_slice()));
            }
        }
        self
    }
}

/// One step of the filter pipeline.
#[derive(Debug, Clone)]
pub enum FilterStrategy {
    /// Regularize-and-fill; the only strategy that changes the date axis.
    Fill(RegularizeFill),
    Median(MedianFilter),
    LowPass(LowPassFilter),
}

impl FilterStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            FilterStrategy::Fill(_) => "fill",
            FilterStrategy::Median(_) => "median",
            FilterStrategy::LowPass(_) => "lowpass",
        }
    }

    pub fn changes_date_axis(&self) -> bool {
        matches!(self, FilterStrategy::Fill(_))
    }

    pub fn transform(&self, frame: SeriesFrame) -> AppResult<SeriesFrame> {
        match self {
            FilterStrategy::Fill(fill) => fill.transform(frame),
            FilterStrategy::Median(median) => Ok(frame.map_rows(|row| median.apply(row))),
            FilterStrategy::LowPass(lowpass) => Ok(frame.map_rows(|row| lowpass.apply(row))),
        }
    }
}
