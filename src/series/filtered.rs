//! Regularized products derived from the raw series.
use crate::error::{AppResult, PipelineError};
use chrono::{Duration, NaiveDateTime};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Resistance, apparent resistivity and chargeability on an evenly spaced
/// date axis of their own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredSeriesStore {
    dates: Vec<NaiveDateTime>,
    resistance: Array2<f64>,
    apres: Array2<f64>,
    chargeability: Array2<f64>,
}

impl FilteredSeriesStore {
    /// Replaces the whole product set after checking its date axis.
    pub fn replace(
        &mut self,
        dates: Vec<NaiveDateTime>,
        resistance: Array2<f64>,
        apres: Array2<f64>,
        chargeability: Array2<f64>,
    ) -> AppResult<()> {
        if dates.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::Inconsistent(
                "filtered dates must be strictly increasing".into(),
            ));
        }
        if let Some(step) = dates.get(1).zip(dates.first()).map(|(b, a)| *b - *a) {
            if dates.windows(2).any(|w| w[1] - w[0] != step) {
                return Err(PipelineError::Inconsistent(
                    "filtered dates must be evenly spaced".into(),
                ));
            }
        }
        for (name, array) in [
            ("resistance", &resistance),
            ("apres", &apres),
            ("chargeability", &chargeability),
        ] {
            if array.ncols() != dates.len() {
                return Err(PipelineError::Inconsistent(format!(
                    "filtered {name} has {} columns for {} dates",
                    array.ncols(),
                    dates.len()
                )));
            }
        }

        self.dates = dates;
        self.resistance = resistance;
        self.apres = apres;
        self.chargeability = chargeability;
        Ok(())
    }

    pub fn dates(&self) -> &[NaiveDateTime] {
        &self.dates
    }

    /// Spacing of the date axis, if it has at least two entries.
    pub fn interval(&self) -> Option<Duration> {
        match self.dates.as_slice() {
            [first, second, ..] => Some(*second - *first),
            _ => None,
        }
    }

    pub fn resistance(&self) -> &Array2<f64> {
        &self.resistance
    }

    pub fn apres(&self) -> &Array2<f64> {
        &self.apres
    }

    pub fn chargeability(&self) -> &Array2<f64> {
        &self.chargeability
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}
