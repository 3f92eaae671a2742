use crate::analyzer::market_indicators::IndicatorEngine;
use crate::config::{RegimeConfig, SaturationCurve, VolatilityMetric};
use crate::model::{
    DataError, Regime, RegimeLabel, Series, TrendDirection, VolatilityRegime, columns,
};
use tracing::debug;

/// Deterministic rule-based regime labelling from the latest indicator values.
pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, series: &Series) -> Result<RegimeLabel, DataError> {
        let cfg = &self.config;
        cfg.validate()?;

        let atr = series.require_latest(columns::ATR)?;
        let hist = series.require_latest(columns::MACD_HIST)?;
        let trend_ma = series
            .column(columns::TREND_MA)
            .ok_or_else(|| DataError::MissingColumn(columns::TREND_MA.into()))?;
        if trend_ma.len() < cfg.slope_window {
            return Err(DataError::InsufficientBars {
                needed: cfg.slope_window,
                got: trend_ma.len(),
            });
        }
        let recent: Option<Vec<f64>> = trend_ma[trend_ma.len() - cfg.slope_window..]
            .iter()
            .copied()
            .collect();
        let recent = recent.ok_or_else(|| DataError::NotWarm(columns::TREND_MA.into()))?;

        let slope = IndicatorEngine::linear_slope(&recent);
        let slope_score = Self::scaled(slope, atr, cfg.slope_full_scale);
        let hist_score = Self::scaled(hist, atr, cfg.histogram_full_scale);
        let trend_strength =
            100.0 * (cfg.slope_weight * slope_score + (1.0 - cfg.slope_weight) * hist_score);

        let direction = if slope_score < cfg.flat_slope_score {
            TrendDirection::Flat
        } else if slope > 0.0 {
            TrendDirection::Up
        } else {
            TrendDirection::Down
        };

        let readings = self.volatility_readings(series)?;
        let current = *readings.last().ok_or_else(|| DataError::NotWarm(columns::ATR.into()))?;
        let percentile = Self::percentile_rank(&readings, current);
        let median = Self::median(&readings[..readings.len() - 1]).unwrap_or(current);
        let margin = cfg.min_volatility_spread * median.abs();
        let volatility_regime = if percentile >= cfg.high_volatility_percentile
            && current - median > margin
        {
            VolatilityRegime::High
        } else if percentile <= cfg.low_volatility_percentile && median - current > margin {
            VolatilityRegime::Low
        } else {
            VolatilityRegime::Normal
        };

        let (regime, distance) = if volatility_regime == VolatilityRegime::High {
            let span = 1.0 - cfg.high_volatility_percentile;
            (Regime::Volatile, (percentile - cfg.high_volatility_percentile) / span)
        } else if trend_strength > cfg.trend_threshold {
            let span = 100.0 - cfg.trend_threshold;
            (Regime::Trending, (trend_strength - cfg.trend_threshold) / span)
        } else {
            (Regime::Ranging, (cfg.trend_threshold - trend_strength) / cfg.trend_threshold)
        };

        let label = RegimeLabel {
            regime,
            confidence: self.confidence(distance),
            trend_strength,
            volatility_regime,
            direction,
            volatility_percentile: percentile,
        };
        debug!(symbol = series.symbol(), ?label, "regime classified");
        Ok(label)
    }

    /// Saturating map from normalized distance-to-threshold (0..=1) to a 0..=100 confidence.
    pub fn confidence(&self, distance: f64) -> f64 {
        let x = self.config.confidence_rate * distance.clamp(0.0, 1.0);
        let c = match self.config.confidence_curve {
            SaturationCurve::Exponential => 1.0 - (-x).exp(),
            SaturationCurve::Tanh => x.tanh(),
        };
        (100.0 * c).clamp(0.0, 100.0)
    }

    /// |value| / atr relative to `full_scale`, capped at 1. A zero ATR means the
    /// price never moved, so there is nothing to score.
    fn scaled(value: f64, atr: f64, full_scale: f64) -> f64 {
        if atr <= 0.0 {
            return 0.0;
        }
        (value.abs() / atr / full_scale).min(1.0)
    }

    /// Trailing volatility readings ending at the latest bar, oldest first.
    fn volatility_readings(&self, series: &Series) -> Result<Vec<f64>, DataError> {
        let readings: Vec<f64> = match self.config.volatility_metric {
            VolatilityMetric::NormalizedAtr => {
                series.require_latest(columns::ATR)?;
                let atr = series
                    .column(columns::ATR)
                    .ok_or_else(|| DataError::MissingColumn(columns::ATR.into()))?;
                atr.iter()
                    .zip(series.bars())
                    .filter_map(|(a, bar)| match a {
                        Some(a) if bar.close != 0.0 => Some(a / bar.close),
                        _ => None,
                    })
                    .collect()
            }
            VolatilityMetric::ReturnStdev => {
                series.require_latest(columns::VOLATILITY)?;
                series
                    .column(columns::VOLATILITY)
                    .ok_or_else(|| DataError::MissingColumn(columns::VOLATILITY.into()))?
                    .iter()
                    .flatten()
                    .copied()
                    .collect()
            }
        };
        let skip = readings.len().saturating_sub(self.config.volatility_percentile_window);
        Ok(readings[skip..].to_vec())
    }

    fn median(values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        Some(if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        })
    }

    /// Mid-rank of `current` among the readings preceding it, 0..=1. Values within a
    /// relative 1e-9 of `current` count as ties.
    fn percentile_rank(readings: &[f64], current: f64) -> f64 {
        let others = &readings[..readings.len().saturating_sub(1)];
        if others.is_empty() {
            return 0.5;
        }
        let eps = 1e-12_f64.max(current.abs() * 1e-9);
        let below = others.iter().filter(|&&v| v < current - eps).count() as f64;
        let equal = others.iter().filter(|&&v| (v - current).abs() <= eps).count() as f64;
        (below + 0.5 * equal) / others.len() as f64
    }
}
