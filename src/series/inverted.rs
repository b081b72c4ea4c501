//! Per-task solver results in solver (model-cell) space.
use crate::core::{InversionResult, TaskId};
use crate::error::{AppResult, PipelineError};
use chrono::NaiveDateTime;
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Spatial discretization of a task's solver model.
///
/// Fixed by the first assimilated result and never changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ModelGrid {
    #[default]
    Uninitialized,
    Initialized { x: Vec<f64>, depth: Vec<f64> },
}

impl ModelGrid {
    pub fn cells(&self) -> Option<usize> {
        match self {
            ModelGrid::Uninitialized => None,
            ModelGrid::Initialized { x, .. } => Some(x.len()),
        }
    }
}

/// Inverted resistivity/chargeability sections of one survey line over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvertedSeriesStore {
    task_id: TaskId,
    grid: ModelGrid,
    dates: Vec<NaiveDateTime>,
    /// `[model_cell, date]`
    resistivity: Array2<f64>,
    /// `[model_cell, date]`
    chargeability: Array2<f64>,
}

impl InvertedSeriesStore {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            grid: ModelGrid::Uninitialized,
            dates: Vec::new(),
            resistivity: Array2::zeros((0, 0)),
            chargeability: Array2::zeros((0, 0)),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn grid(&self) -> &ModelGrid {
        &self.grid
    }

    pub fn x(&self) -> &[f64] {
        match &self.grid {
            ModelGrid::Initialized { x, .. } => x,
            ModelGrid::Uninitialized => &[],
        }
    }

    pub fn depth(&self) -> &[f64] {
        match &self.grid {
            ModelGrid::Initialized { depth, .. } => depth,
            ModelGrid::Uninitialized => &[],
        }
    }

    pub fn dates(&self) -> &[NaiveDateTime] {
        &self.dates
    }

    pub fn contains_date(&self, date: &NaiveDateTime) -> bool {
        self.dates.binary_search(date).is_ok()
    }

    pub fn resistivity(&self) -> &Array2<f64> {
        &self.resistivity
    }

    pub fn chargeability(&self) -> &Array2<f64> {
        &self.chargeability
    }

    /// Checks that `result` fits this store without modifying it.
    ///
    /// A result without model cells is never accepted, so it cannot fix an
    /// empty grid.
    pub fn check(&self, result: &InversionResult) -> AppResult<()> {
        let cells = result.cells();
        if cells == 0 && self.grid == ModelGrid::Uninitialized {
            return Err(PipelineError::Inconsistent(format!(
                "task {}: result has no model cells",
                self.task_id
            )));
        }
        let expected = self.grid.cells().unwrap_or(cells);
        for found in [
            cells,
            result.depth.len(),
            result.resistivity.len(),
            result.chargeability.len(),
        ] {
            if found != expected {
                return Err(PipelineError::ShapeMismatch {
                    task_id: self.task_id,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Adds one dated result column.
    ///
    /// The first call fixes the model grid; later calls must match its cell
    /// count. On any error the store is unchanged.
    pub fn append(&mut self, date: NaiveDateTime, result: InversionResult) -> AppResult<()> {
        self.check(&result)?;
        if self.contains_date(&date) {
            return Err(PipelineError::Inconsistent(format!(
                "task {} already holds a result for {date}",
                self.task_id
            )));
        }

        let InversionResult {
            x,
            depth,
            resistivity,
            chargeability,
        } = result;
        let (mut res, mut charg) = match self.grid {
            ModelGrid::Uninitialized => (Array2::zeros((x.len(), 0)), Array2::zeros((x.len(), 0))),
            ModelGrid::Initialized { .. } => (self.resistivity.clone(), self.chargeability.clone()),
        };
        res.push_column(ArrayView1::from(resistivity.as_slice()))?;
        charg.push_column(ArrayView1::from(chargeability.as_slice()))?;

        let mut dates = self.dates.clone();
        dates.push(date);
        if dates.len() > 1 && dates[dates.len() - 2] > date {
            let mut order: Vec<usize> = (0..dates.len()).collect();
            order.sort_by_key(|&i| dates[i]);
            res = res.select(Axis(1), &order);
            charg = charg.select(Axis(1), &order);
            dates = order.iter().map(|&i| dates[i]).collect();
        }

        if self.grid == ModelGrid::Uninitialized {
            self.grid = ModelGrid::Initialized { x, depth };
        }
        self.dates = dates;
        self.resistivity = res;
        self.chargeability = charg;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn result(cells: usize, value: f64) -> InversionResult {
        InversionResult {
            x: (0..cells).map(|i| i as f64).collect(),
            depth: vec![1.5; cells],
            resistivity: vec![value; cells],
            chargeability: vec![value / 10.0; cells],
        }
    }

    #[test]
    fn first_append_fixes_grid_and_creates_column() {
        let mut store = InvertedSeriesStore::new(4);
        assert_eq!(store.grid().cells(), None);
        store.append(day(1), result(5, 100.0)).unwrap();
        assert_eq!(store.grid().cells(), Some(5));
        assert_eq!(store.resistivity().dim(), (5, 1));
        assert_eq!(store.x(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn second_and_third_appends_stay_two_dimensional() {
        let mut store = InvertedSeriesStore::new(4);
        store.append(day(1), result(5, 100.0)).unwrap();
        store.append(day(2), result(5, 110.0)).unwrap();
        assert_eq!(store.resistivity().dim(), (5, 2));
        store.append(day(3), result(5, 120.0)).unwrap();
        assert_eq!(store.chargeability().dim(), (5, 3));
        assert_eq!(store.resistivity()[[2, 1]], 110.0);
        assert_eq!(store.chargeability()[[0, 2]], 12.0);
    }

    #[test]
    fn mismatched_cell_count_is_rejected_and_store_unchanged() {
        let mut store = InvertedSeriesStore::new(4);
        store.append(day(1), result(5, 100.0)).unwrap();
        let before = store.clone();
        let err = store.append(day(2), result(6, 100.0)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ShapeMismatch {
                task_id: 4,
                expected: 5,
                found: 6
            }
        ));
        assert_eq!(store, before);
    }

    #[test]
    fn ragged_result_is_rejected_even_on_first_append() {
        let mut store = InvertedSeriesStore::new(1);
        let mut r = result(5, 1.0);
        r.resistivity.pop();
        assert!(store.append(day(1), r).is_err());
        assert_eq!(store.grid(), &ModelGrid::Uninitialized);
    }

    #[test]
    fn empty_first_result_leaves_grid_uninitialized() {
        let mut store = InvertedSeriesStore::new(7);
        let err = store.append(day(1), result(0, 1.0)).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(store.grid(), &ModelGrid::Uninitialized);
        assert!(store.dates().is_empty());

        store.append(day(2), result(3, 1.0)).unwrap();
        assert_eq!(store.grid().cells(), Some(3));
    }

    #[test]
    fn earlier_result_is_inserted_in_order() {
        let mut store = InvertedSeriesStore::new(1);
        store.append(day(3), result(2, 30.0)).unwrap();
        store.append(day(1), result(2, 10.0)).unwrap();
        assert_eq!(store.dates(), &[day(1), day(3)]);
        assert_eq!(store.resistivity()[[0, 0]], 10.0);
        assert!(store.append(day(3), result(2, 1.0)).is_err());
    }
}
