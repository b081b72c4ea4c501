//! Append-only store of raw per-snapshot measurements.
use crate::error::{AppResult, PipelineError};
use crate::geometry::GeometryIndex;
use chrono::NaiveDateTime;
use ndarray::{concatenate, Array2, Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// The six raw quantities of one or more date columns.
///
/// Used both as the store's backing arrays and as the batch of new columns
/// produced by the ingestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawColumns {
    pub voltage: Array2<f64>,
    pub current: Array2<f64>,
    pub resistance: Array2<f64>,
    pub apres: Array2<f64>,
    pub chargeability: Array2<f64>,
    /// `[measurement, date, window]`
    pub decay: Array3<f64>,
}

impl RawColumns {
    /// `dates` columns filled with NaN.
    pub fn empty(measurements: usize, dates: usize, windows: usize) -> Self {
        let nan2 = || Array2::from_elem((measurements, dates), f64::NAN);
        Self {
            voltage: nan2(),
            current: nan2(),
            resistance: nan2(),
            apres: nan2(),
            chargeability: nan2(),
            decay: Array3::from_elem((measurements, dates, windows), f64::NAN),
        }
    }

    pub fn num_dates(&self) -> usize {
        self.resistance.ncols()
    }

    fn date_axis_lengths(&self) -> [usize; 6] {
        [
            self.voltage.ncols(),
            self.current.ncols(),
            self.resistance.ncols(),
            self.apres.ncols(),
            self.chargeability.ncols(),
            self.decay.len_of(Axis(1)),
        ]
    }
}

/// Raw time series: one column per ingested snapshot date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeriesStore {
    geometry: GeometryIndex,
    dates: Vec<NaiveDateTime>,
    columns: RawColumns,
}

impl RawSeriesStore {
    /// An empty store over a fixed channel set.
    pub fn new(geometry: GeometryIndex) -> Self {
        let columns = RawColumns::empty(geometry.len(), 0, geometry.ip_windows());
        Self {
            geometry,
            dates: Vec::new(),
            columns,
        }
    }

    pub fn geometry(&self) -> &GeometryIndex {
        &self.geometry
    }

    /// Strictly increasing snapshot dates.
    pub fn dates(&self) -> &[NaiveDateTime] {
        &self.dates
    }

    pub fn num_dates(&self) -> usize {
        self.dates.len()
    }

    pub fn contains_date(&self, date: &NaiveDateTime) -> bool {
        self.dates.binary_search(date).is_ok()
    }

    pub fn voltage(&self) -> &Array2<f64> {
        &self.columns.voltage
    }

    pub fn current(&self) -> &Array2<f64> {
        &self.columns.current
    }

    pub fn resistance(&self) -> &Array2<f64> {
        &self.columns.resistance
    }

    pub fn apres(&self) -> &Array2<f64> {
        &self.columns.apres
    }

    pub fn chargeability(&self) -> &Array2<f64> {
        &self.columns.chargeability
    }

    pub fn decay(&self) -> &Array3<f64> {
        &self.columns.decay
    }

    /// Resistance of every channel at one date.
    pub fn resistance_at(&self, date_index: usize) -> Option<ArrayView1<'_, f64>> {
        (date_index < self.num_dates()).then(|| self.columns.resistance.column(date_index))
    }

    /// Whether every array agrees with `dates` on the date-axis length.
    pub fn is_consistent(&self) -> bool {
        self.columns
            .date_axis_lengths()
            .iter()
            .all(|&len| len == self.dates.len())
    }

    /// Merges new date columns into the store, keeping `dates` ascending.
    ///
    /// `dates` must be strictly increasing, disjoint from the stored dates and
    /// match the column count of `columns`; the store is left untouched otherwise.
    pub(crate) fn append(&mut self, dates: Vec<NaiveDateTime>, columns: RawColumns) -> AppResult<()> {
        if dates.len() != columns.num_dates() {
            return Err(PipelineError::Inconsistent(format!(
                "{} dates for {} new columns",
                dates.len(),
                columns.num_dates()
            )));
        }
        if !dates.windows(2).all(|w| w[0] < w[1]) || dates.iter().any(|d| self.contains_date(d)) {
            return Err(PipelineError::Inconsistent(
                "appended dates must be sorted and not yet stored".into(),
            ));
        }
        if dates.is_empty() {
            return Ok(());
        }

        let join2 = |old: &Array2<f64>, new: &Array2<f64>| concatenate(Axis(1), &[old.view(), new.view()]);
        let mut joined = RawColumns {
            voltage: join2(&self.columns.voltage, &columns.voltage)?,
            current: join2(&self.columns.current, &columns.current)?,
            resistance: join2(&self.columns.resistance, &columns.resistance)?,
            apres: join2(&self.columns.apres, &columns.apres)?,
            chargeability: join2(&self.columns.chargeability, &columns.chargeability)?,
            decay: concatenate(Axis(1), &[self.columns.decay.view(), columns.decay.view()])?,
        };
        let mut all_dates = self.dates.clone();
        all_dates.extend(dates);

        // Out-of-order snapshot: reorder every array by date.
        if !all_dates.windows(2).all(|w| w[0] < w[1]) {
            let mut order: Vec<usize> = (0..all_dates.len()).collect();
            order.sort_by_key(|&i| all_dates[i]);
            joined = RawColumns {
                voltage: joined.voltage.select(Axis(1), &order),
                current: joined.current.select(Axis(1), &order),
                resistance: joined.resistance.select(Axis(1), &order),
                apres: joined.apres.select(Axis(1), &order),
                chargeability: joined.chargeability.select(Axis(1), &order),
                decay: joined.decay.select(Axis(1), &order),
            };
            all_dates = order.iter().map(|&i| all_dates[i]).collect();
        }

        self.columns = joined;
        self.dates = all_dates;
        Ok(())
    }
}
