use crate::config::FilterConfig;
use crate::data::iir_filter::LowPassFilter;
use crate::data::interpolate::RegularizeFill;
use crate::data::processor::MedianFilter;
use crate::data::{FilterStrategy, SeriesFrame};
use crate::error::{AppResult, PipelineError};
use crate::series::TimeSeriesArchive;
use std::collections::HashMap;
use tracing::{debug, info};

type StrategyFactory = Box<dyn Fn(&FilterConfig) -> AppResult<FilterStrategy> + Send + Sync>;

/// Builds filter strategies by name from the `[filter]` configuration.
pub struct StrategyRegistry {
    factories: HashMap<&'static str, StrategyFactory>,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        let mut factories: HashMap<&'static str, StrategyFactory> = HashMap::new();

        factories.insert(
            "fill",
            Box::new(|config| {
                let fill = RegularizeFill::new(config.interval, config.resolution, config.kind)?;
                Ok(FilterStrategy::Fill(fill))
            }),
        );

        factories.insert(
            "median",
            Box::new(|config| Ok(FilterStrategy::Median(MedianFilter::new(config.median_window)?))),
        );

        factories.insert(
            "lowpass",
            Box::new(|config| Ok(FilterStrategy::LowPass(LowPassFilter::new(&config.lowpass)?))),
        );

        Self { factories }
    }

    pub fn create(&self, name: &str, config: &FilterConfig) -> AppResult<FilterStrategy> {
        self.factories
            .get(name)
            .ok_or_else(|| PipelineError::Configuration(format!("Filter '{}' not found", name)))
            .and_then(|factory| factory(config))
    }
}

/// An ordered filter pipeline whose first step regularizes the date axis.
#[derive(Debug, Clone)]
pub struct FilterChain {
    steps: Vec<FilterStrategy>,
}

impl FilterChain {
    pub fn from_config(config: &FilterConfig) -> AppResult<Self> {
        let registry = StrategyRegistry::new();
        let steps = config
            .chain
            .iter()
            .map(|name| registry.create(name, config))
            .collect::<AppResult<Vec<_>>>()?;
        Self::new(steps)
    }

    /// Median and low-pass assume a regular sample rate, so exactly one fill
    /// step must come first.
    pub fn new(steps: Vec<FilterStrategy>) -> AppResult<Self> {
        let fills = steps.iter().filter(|s| s.changes_date_axis()).count();
        if !steps.first().is_some_and(FilterStrategy::changes_date_axis) || fills != 1 {
            return Err(PipelineError::Configuration(
                "filter chain must start with exactly one 'fill' step".into(),
            ));
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[FilterStrategy] {
        &self.steps
    }

    pub fn apply(&self, mut frame: SeriesFrame) -> AppResult<SeriesFrame> {
        for step in &self.steps {
            debug!(step = step.name(), dates = frame.dates.len(), "applying filter");
            frame = step.transform(frame)?;
        }
        Ok(frame)
    }

    /// Recomputes the filtered store of `archive` from its raw store.
    ///
    /// Returns the number of filtered dates.
    #[tracing::instrument(skip_all)]
    pub fn run(&self, archive: &mut TimeSeriesArchive) -> AppResult<usize> {
        let frame = self.apply(SeriesFrame::from_raw(archive.raw()?))?;
        let count = frame.dates.len();
        archive
            .filtered
            .replace(frame.dates, frame.resistance, frame.apres, frame.chargeability)?;
        info!(dates = count, "filtered series rebuilt");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::data::interpolate::InterpolationKind;
    use crate::geometry::tests::sample_index;
    use crate::series::{RawColumns, RawSeriesStore};
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn at(h: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 11, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(h)
    }

    fn archive_with_raw(hours: &[i64]) -> TimeSeriesArchive {
        let geometry = sample_index();
        let mut columns = RawColumns::empty(geometry.len(), hours.len(), geometry.ip_windows());
        for (c, &h) in hours.iter().enumerate() {
            for r in 0..geometry.len() {
                let value = 50.0 + r as f64 + h as f64 * 0.5;
                columns.resistance[[r, c]] = value;
                columns.apres[[r, c]] = value * 6.0;
                columns.chargeability[[r, c]] = 2.0;
            }
        }
        let mut raw = RawSeriesStore::new(geometry);
        raw.append(hours.iter().map(|&h| at(h)).collect(), columns).unwrap();
        TimeSeriesArchive {
            raw: Some(raw),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_filter_name_is_a_configuration_error() {
        let registry = StrategyRegistry::new();
        let err = registry.create("boxcar", &FilterConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn chain_must_start_with_fill() {
        let mut config = FilterConfig::default();
        config.chain = vec!["median".into()];
        assert!(FilterChain::from_config(&config).is_err());
        config.chain = vec!["fill".into(), "median".into(), "lowpass".into()];
        let chain = FilterChain::from_config(&config).unwrap();
        let names: Vec<&str> = chain.steps().iter().map(FilterStrategy::name).collect();
        assert_eq!(names, vec!["fill", "median", "lowpass"]);
    }

    #[test]
    fn run_populates_filtered_store_on_regular_axis() {
        let mut archive = archive_with_raw(&[0, 1, 2, 4, 5, 7, 9, 10, 12]);
        let config = FilterConfig {
            interval: std::time::Duration::from_secs(3 * 3600),
            kind: InterpolationKind::Linear,
            chain: vec!["fill".into(), "median".into()],
            ..Default::default()
        };
        let count = FilterChain::from_config(&config).unwrap().run(&mut archive).unwrap();

        assert_eq!(count, 5);
        let filtered = &archive.filtered;
        assert_eq!(filtered.dates(), &[at(0), at(3), at(6), at(9), at(12)]);
        assert_eq!(filtered.interval(), Some(Duration::hours(3)));
        assert_eq!(filtered.resistance().dim(), (6, 5));
        assert!(filtered.chargeability().iter().all(|v| (*v - 2.0).abs() < 1e-12));
    }

    #[test]
    fn run_without_raw_store_fails() {
        let mut archive = TimeSeriesArchive::default();
        let chain = FilterChain::from_config(&FilterConfig::default()).unwrap();
        assert!(matches!(
            chain.run(&mut archive),
            Err(PipelineError::NotInitialized)
        ));
    }
}
