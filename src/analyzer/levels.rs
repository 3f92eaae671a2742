use crate::config::{ClusterTolerance, LevelConfig};
use crate::model::{
    ComputationWarning, DataError, Level, LevelKind, LevelSet, PriceBar, Series, SwingKind,
    SwingPoint, columns,
};
use std::cmp::Ordering;
use tracing::debug;

/// Finds swing points in the lookback window and clusters them into support/resistance levels.
pub struct LevelDetector {
    config: LevelConfig,
}

impl LevelDetector {
    pub fn new(config: LevelConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, series: &Series) -> Result<LevelSet, DataError> {
        self.config.validate()?;
        let close = series.last_close().ok_or(DataError::Empty)?;

        let width = match self.config.tolerance {
            ClusterTolerance::Percent(p) => p * close.abs(),
            ClusterTolerance::Atr(multiple) => multiple * series.require_latest(columns::ATR)?,
        };

        let start = series.len().saturating_sub(self.config.lookback);
        let swings = Self::find_swings(&series.bars()[start..], start, self.config.pivot_radius);

        let mut levels: Vec<Level> = Self::cluster(&swings, width)
            .into_iter()
            .map(|members| {
                let price = members.iter().sum::<f64>() / members.len() as f64;
                Level {
                    price,
                    kind: if price <= close {
                        LevelKind::Support
                    } else {
                        LevelKind::Resistance
                    },
                    strength: members.len() as u32,
                }
            })
            .collect();

        levels.sort_by(|a, b| {
            let da = (a.price - close).abs();
            let db = (b.price - close).abs();
            da.total_cmp(&db).then(a.price.total_cmp(&b.price))
        });

        let mut warnings = Vec::new();
        if swings.len() < self.config.min_pivots {
            warnings.push(ComputationWarning::InsufficientPivots {
                found: swings.len(),
            });
        }

        let nearest_support = levels.iter().find(|l| l.kind == LevelKind::Support).copied();
        let nearest_resistance = levels.iter().find(|l| l.kind == LevelKind::Resistance).copied();

        debug!(
            symbol = series.symbol(),
            swings = swings.len(),
            levels = levels.len(),
            "levels detected"
        );

        Ok(LevelSet {
            reference_price: close,
            levels,
            nearest_support,
            nearest_resistance,
            swings,
            warnings,
        })
    }

    /// A high pivot is strictly above its `radius` left neighbours and not below its
    /// right neighbours, so a flat top yields one pivot. Lows mirror this.
    fn find_swings(window: &[PriceBar], offset: usize, radius: usize) -> Vec<SwingPoint> {
        let mut swings = Vec::new();
        if window.len() < 2 * radius + 1 {
            return swings;
        }
        for i in radius..window.len() - radius {
            let bar = &window[i];
            let left = &window[i - radius..i];
            let right = &window[i + 1..=i + radius];

            if left.iter().all(|b| b.high < bar.high) && right.iter().all(|b| b.high <= bar.high) {
                swings.push(SwingPoint {
                    index: offset + i,
                    timestamp: bar.timestamp,
                    price: bar.high,
                    kind: SwingKind::High,
                });
            }
            if left.iter().all(|b| b.low > bar.low) && right.iter().all(|b| b.low >= bar.low) {
                swings.push(SwingPoint {
                    index: offset + i,
                    timestamp: bar.timestamp,
                    price: bar.low,
                    kind: SwingKind::Low,
                });
            }
        }
        swings
    }

    /// Greedy single pass over sorted prices; a price joins the current cluster while it
    /// sits within `width` of the cluster mean.
    fn cluster(swings: &[SwingPoint], width: f64) -> Vec<Vec<f64>> {
        let mut prices: Vec<f64> = swings.iter().map(|s| s.price).collect();
        prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

        let mut clusters: Vec<Vec<f64>> = Vec::new();
        for price in prices {
            match clusters.last_mut() {
                Some(current) => {
                    let mean = current.iter().sum::<f64>() / current.len() as f64;
                    if price - mean <= width {
                        current.push(price);
                    } else {
                        clusters.push(vec![price]);
                    }
                }
                None => clusters.push(vec![price]),
            }
        }
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::market_indicators::IndicatorEngine;
    use crate::config::IndicatorConfig;
    use chrono::{Duration, TimeZone, Utc};

    fn series_from(closes: &[f64]) -> Series {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PriceBar {
                timestamp: start + Duration::hours(i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            })
            .collect();
        Series::new("LVL", bars).unwrap()
    }

    fn triangle_wave(n: usize) -> Vec<f64> {
        let cycle = [100.0, 105.0, 110.0, 105.0, 100.0, 95.0, 90.0, 95.0];
        (0..n).map(|i| cycle[i % cycle.len()]).collect()
    }

    #[test]
    fn oscillation_yields_support_and_resistance() {
        let set = LevelDetector::new(LevelConfig::default())
            .detect(&series_from(&triangle_wave(33)))
            .unwrap();

        let resistance = set.nearest_resistance.unwrap();
        assert_eq!(resistance.price, 111.0);
        assert_eq!(resistance.strength, 3);

        let support = set.nearest_support.unwrap();
        assert_eq!(support.price, 89.0);
        assert_eq!(support.strength, 4);

        assert_eq!(set.levels.len(), 2);
        assert!(set.warnings.is_empty());
        assert_eq!(set.swings.len(), 7);
    }

    #[test]
    fn rising_series_has_no_resistance_below_close() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let set = LevelDetector::new(LevelConfig::default())
            .detect(&series_from(&closes))
            .unwrap();
        let close = set.reference_price;

        assert!(set.resistances().all(|l| l.price >= close));
        assert!(set.supports().all(|l| l.price <= close));
        assert!(set.levels.is_empty());
        assert_eq!(set.warnings, vec![ComputationWarning::InsufficientPivots { found: 0 }]);
        assert!(set.is_low_confidence());
    }

    #[test]
    fn rerun_on_same_window_is_identical() {
        let series = series_from(&triangle_wave(45));
        let detector = LevelDetector::new(LevelConfig::default());
        let first = detector.detect(&series).unwrap();
        let second = detector.detect(&series).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn equal_prices_merge_into_one_level() {
        let set = LevelDetector::new(LevelConfig {
            tolerance: ClusterTolerance::Percent(0.0),
            ..LevelConfig::default()
        })
        .detect(&series_from(&triangle_wave(33)))
        .unwrap();
        assert_eq!(set.nearest_resistance.unwrap().strength, 3);
    }

    #[test]
    fn atr_band_merges_peaks_the_percent_band_splits() {
        let cycle = [
            100.0, 105.0, 110.0, 105.0, 100.0, 95.0, 90.0, 95.0, 100.0, 105.0, 112.0, 105.0,
            100.0, 95.0, 90.0, 95.0,
        ];
        let closes: Vec<f64> = (0..41).map(|i| cycle[i % cycle.len()]).collect();
        let series =
            IndicatorEngine::compute(&series_from(&closes), &IndicatorConfig::default()).unwrap();
        assert!(series.require_latest(columns::ATR).unwrap() > 2.0);

        let by_percent = LevelDetector::new(LevelConfig::default()).detect(&series).unwrap();
        let prices: Vec<f64> = by_percent.resistances().map(|l| l.price).collect();
        assert_eq!(prices, vec![111.0, 113.0]);

        let by_atr = LevelDetector::new(LevelConfig {
            tolerance: ClusterTolerance::Atr(1.0),
            ..LevelConfig::default()
        })
        .detect(&series)
        .unwrap();
        let merged: Vec<Level> = by_atr.resistances().copied().collect();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].strength, 3);
        assert!((merged[0].price - 335.0 / 3.0).abs() < 1e-9);
        assert_eq!(by_atr.nearest_support.unwrap().price, 89.0);
        assert_eq!(by_atr.nearest_support.unwrap().strength, 4);
    }

    #[test]
    fn atr_tolerance_requires_indicator_column() {
        let detector = LevelDetector::new(LevelConfig {
            tolerance: ClusterTolerance::Atr(1.0),
            ..LevelConfig::default()
        });
        let err = detector.detect(&series_from(&triangle_wave(33))).unwrap_err();
        assert_eq!(err, DataError::MissingColumn(columns::ATR.into()));
    }
}
