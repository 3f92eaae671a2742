use crate::config::{IndicatorConfig, ReturnKind};
use crate::model::{Column, DataError, PriceBar, Series, columns};
use tracing::debug;

/// Pure indicator functions over price slices. Every output has one entry per input,
/// with `None` for indices before the indicator's warm-up.
pub struct IndicatorEngine;

impl IndicatorEngine {
    /// Returns a copy of `series` augmented with every indicator column.
    pub fn compute(series: &Series, cfg: &IndicatorConfig) -> Result<Series, DataError> {
        cfg.validate()?;
        let needed = cfg.required_bars();
        if series.len() < needed {
            return Err(DataError::InsufficientBars {
                needed,
                got: series.len(),
            });
        }

        let closes = series.closes();
        let bars = series.bars();
        let mut out = series.clone();

        out.insert_column(columns::RSI, Self::rsi(&closes, cfg.rsi_period))?;

        let (macd, signal, hist) =
            Self::macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
        out.insert_column(columns::MACD, macd)?;
        out.insert_column(columns::MACD_SIGNAL, signal)?;
        out.insert_column(columns::MACD_HIST, hist)?;

        let (middle, upper, lower) = Self::bollinger(&closes, cfg.bb_period, cfg.bb_devs);
        out.insert_column(columns::BB_MIDDLE, middle)?;
        out.insert_column(columns::BB_UPPER, upper)?;
        out.insert_column(columns::BB_LOWER, lower)?;

        out.insert_column(columns::ATR, Self::atr(bars, cfg.atr_period))?;

        let returns = Self::returns(&closes, cfg.return_kind);
        let volatility = Self::rolling_std_defined(&returns, cfg.volatility_window);
        out.insert_column(columns::RETURNS, returns)?;
        out.insert_column(columns::VOLATILITY, volatility)?;

        out.insert_column(columns::TREND_MA, Self::moving_average(&closes, cfg.trend_ma_period))?;

        debug!(
            symbol = series.symbol(),
            bars = series.len(),
            "indicator columns computed"
        );
        Ok(out)
    }

    /// Simple moving average over `window_size` values.
    pub fn moving_average(data: &[f64], window_size: usize) -> Column {
        if window_size == 0 || data.len() < window_size {
            return vec![None; data.len()];
        }
        let mut out = vec![None; window_size - 1];
        out.extend(
            data.windows(window_size)
                .map(|window| Some(window.iter().sum::<f64>() / window_size as f64)),
        );
        out
    }

    /// Exponential moving average seeded with the simple average of the first `period` values.
    pub fn ema(data: &[f64], period: usize) -> Column {
        let mut out = vec![None; data.len()];
        if period == 0 || data.len() < period {
            return out;
        }
        let alpha = 2.0 / (period as f64 + 1.0);
        let mut prev = data[..period].iter().sum::<f64>() / period as f64;
        out[period - 1] = Some(prev);
        for (i, &value) in data.iter().enumerate().skip(period) {
            prev = alpha * value + (1.0 - alpha) * prev;
            out[i] = Some(prev);
        }
        out
    }

    /// Relative Strength Index with Wilder smoothing. First value at index `period`.
    pub fn rsi(closes: &[f64], period: usize) -> Column {
        let mut out = vec![None; closes.len()];
        if period == 0 || closes.len() <= period {
            return out;
        }

        let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let gain = |d: f64| d.max(0.0);
        let loss = |d: f64| (-d).max(0.0);

        let p = period as f64;
        let mut avg_gain = deltas[..period].iter().map(|&d| gain(d)).sum::<f64>() / p;
        let mut avg_loss = deltas[..period].iter().map(|&d| loss(d)).sum::<f64>() / p;
        out[period] = Some(Self::rsi_value(avg_gain, avg_loss));

        for (i, &d) in deltas.iter().enumerate().skip(period) {
            avg_gain = (avg_gain * (p - 1.0) + gain(d)) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss(d)) / p;
            out[i + 1] = Some(Self::rsi_value(avg_gain, avg_loss));
        }
        out
    }

    fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
        if avg_gain + avg_loss == 0.0 {
            return 50.0;
        }
        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        (100.0 - (100.0 / (1.0 + rs))).clamp(0.0, 100.0)
    }

    /// MACD line, signal line and histogram.
    pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> (Column, Column, Column) {
        let fast_ema = Self::ema(closes, fast);
        let slow_ema = Self::ema(closes, slow);
        let macd: Column = fast_ema
            .iter()
            .zip(slow_ema.iter())
            .map(|(f, s)| match (f, s) {
                (Some(f), Some(s)) => Some(f - s),
                _ => None,
            })
            .collect();

        let signal_line = match macd.iter().position(Option::is_some) {
            Some(start) => {
                let defined: Vec<f64> = macd[start..].iter().flatten().copied().collect();
                let mut line = vec![None; start];
                line.extend(Self::ema(&defined, signal));
                line
            }
            None => vec![None; closes.len()],
        };

        let hist = macd
            .iter()
            .zip(signal_line.iter())
            .map(|(m, s)| match (m, s) {
                (Some(m), Some(s)) => Some(m - s),
                _ => None,
            })
            .collect();
        (macd, signal_line, hist)
    }

    /// Population standard deviation of a slice.
    pub fn std_dev(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let count = values.len() as f64;
        let mean = values.iter().sum::<f64>() / count;
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count).sqrt()
    }

    /// Rolling population standard deviation over a column; a window containing an
    /// undefined entry yields `None`.
    pub fn rolling_std_defined(data: &[Option<f64>], window: usize) -> Column {
        let mut out = vec![None; data.len()];
        if window == 0 {
            return out;
        }
        for end in window..=data.len() {
            let slice = &data[end - window..end];
            if slice.iter().all(Option::is_some) {
                let values: Vec<f64> = slice.iter().flatten().copied().collect();
                out[end - 1] = Some(Self::std_dev(&values));
            }
        }
        out
    }

    /// Bollinger middle, upper and lower bands.
    pub fn bollinger(closes: &[f64], period: usize, devs: f64) -> (Column, Column, Column) {
        let n = closes.len();
        let (mut middle, mut upper, mut lower) = (vec![None; n], vec![None; n], vec![None; n]);
        if period == 0 || n < period {
            return (middle, upper, lower);
        }
        for end in period..=n {
            let window = &closes[end - period..end];
            let mean = window.iter().sum::<f64>() / period as f64;
            let sd = Self::std_dev(window);
            middle[end - 1] = Some(mean);
            upper[end - 1] = Some(mean + devs * sd);
            lower[end - 1] = Some(mean - devs * sd);
        }
        (middle, upper, lower)
    }

    /// True range needs the previous close, so index 0 is undefined.
    pub fn true_range(bars: &[PriceBar]) -> Column {
        let mut out = vec![None; bars.len()];
        for (i, w) in bars.windows(2).enumerate() {
            let prev_close = w[0].close;
            let bar = &w[1];
            let tr = (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs());
            out[i + 1] = Some(tr);
        }
        out
    }

    /// Average True Range, Wilder smoothed. First value at index `period`.
    pub fn atr(bars: &[PriceBar], period: usize) -> Column {
        let mut out = vec![None; bars.len()];
        if period == 0 || bars.len() <= period {
            return out;
        }
        let tr: Vec<f64> = Self::true_range(bars).into_iter().flatten().collect();
        let p = period as f64;
        let mut atr = tr[..period].iter().sum::<f64>() / p;
        out[period] = Some(atr);
        for (i, &value) in tr.iter().enumerate().skip(period) {
            atr = (atr * (p - 1.0) + value) / p;
            out[i + 1] = Some(atr);
        }
        out
    }

    /// Per-bar returns; index 0 is undefined.
    pub fn returns(closes: &[f64], kind: ReturnKind) -> Column {
        let mut out = vec![None; closes.len()];
        for (i, w) in closes.windows(2).enumerate() {
            if w[0] == 0.0 {
                continue;
            }
            let value = match kind {
                ReturnKind::Simple => w[1] / w[0] - 1.0,
                ReturnKind::Log => (w[1] / w[0]).ln(),
            };
            if value.is_finite() {
                out[i + 1] = Some(value);
            }
        }
        out
    }

    /// Least-squares slope of `data` against its index.
    pub fn linear_slope(data: &[f64]) -> f64 {
        let n = data.len() as f64;
        if data.len() < 2 {
            return 0.0;
        }
        let x_mean = (n - 1.0) / 2.0;
        let y_mean = data.iter().sum::<f64>() / n;
        let (mut num, mut den) = (0.0, 0.0);
        for (i, &y) in data.iter().enumerate() {
            num += (i as f64 - x_mean) * (y - y_mean);
            den += (i as f64 - x_mean).powi(2);
        }
        if den == 0.0 { 0.0 } else { num / den }
    }

    /// Calculates the Pearson correlation coefficient between two slices.
    /// Returns None if slices have different lengths or are empty.
    pub fn compute_correlation(x: &[f64], y: &[f64]) -> Option<f64> {
        if x.len() != y.len() || x.is_empty() {
            return None;
        }
        let n = x.len() as f64;
        let mean_x = x.iter().sum::<f64>() / n;
        let mean_y = y.iter().sum::<f64>() / n;
        let numerator: f64 = x.iter().zip(y.iter()).map(|(xi, yi)| (xi - mean_x) * (yi - mean_y)).sum();
        let denominator_x: f64 = x.iter().map(|xi| (xi - mean_x).powi(2)).sum();
        let denominator_y: f64 = y.iter().map(|yi| (yi - mean_y).powi(2)).sum();
        let denominator = (denominator_x * denominator_y).sqrt();
        if denominator == 0.0 {
            None
        } else {
            Some(numerator / denominator)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn zigzag_series(n: usize) -> Series {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.1;
                PriceBar {
                    timestamp: start + Duration::days(i as i64),
                    open: close - 0.3,
                    high: close + 1.0,
                    low: close - 1.2,
                    close,
                    volume: 1_000.0 + i as f64,
                }
            })
            .collect();
        Series::new("TEST", bars).unwrap()
    }

    #[test]
    fn columns_match_bar_count_and_warm_up_is_undefined() {
        let cfg = IndicatorConfig::default();
        let series = IndicatorEngine::compute(&zigzag_series(60), &cfg).unwrap();

        for name in series.column_names() {
            assert_eq!(series.column(name).unwrap().len(), 60, "column {}", name);
        }
        let rsi = series.column(columns::RSI).unwrap();
        assert!(rsi[..cfg.rsi_period].iter().all(Option::is_none));
        assert!(rsi[cfg.rsi_period].is_some());

        let signal = series.column(columns::MACD_SIGNAL).unwrap();
        assert!(signal[..32].iter().all(Option::is_none));
        assert!(signal[33].is_some());

        let atr = series.column(columns::ATR).unwrap();
        assert!(atr[..14].iter().all(Option::is_none));
        assert!(atr[14].is_some());
    }

    #[test]
    fn rsi_bounded_and_bands_ordered() {
        let series = IndicatorEngine::compute(&zigzag_series(80), &IndicatorConfig::default()).unwrap();
        for value in series.column(columns::RSI).unwrap().iter().flatten() {
            assert!((0.0..=100.0).contains(value));
        }
        let upper = series.column(columns::BB_UPPER).unwrap();
        let middle = series.column(columns::BB_MIDDLE).unwrap();
        let lower = series.column(columns::BB_LOWER).unwrap();
        for i in 0..series.len() {
            if let (Some(u), Some(m), Some(l)) = (upper[i], middle[i], lower[i]) {
                assert!(u >= m && m >= l);
            }
        }
    }

    #[test]
    fn rejects_short_series() {
        let err = IndicatorEngine::compute(&zigzag_series(20), &IndicatorConfig::default()).unwrap_err();
        assert_eq!(err, DataError::InsufficientBars { needed: 34, got: 20 });
    }

    #[test]
    fn rsi_saturates_on_one_way_moves() {
        let up: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(IndicatorEngine::rsi(&up, 14).last().copied().flatten(), Some(100.0));

        let flat = vec![100.0; 20];
        assert_eq!(IndicatorEngine::rsi(&flat, 14).last().copied().flatten(), Some(50.0));
    }

    #[test]
    fn ema_seeds_with_simple_average() {
        let ema = IndicatorEngine::ema(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(ema[0].is_none() && ema[1].is_none());
        assert_eq!(ema[2], Some(2.0));
        assert_eq!(ema[3], Some(0.5 * 4.0 + 0.5 * 2.0));
    }

    #[test]
    fn true_range_uses_previous_close_gap() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = [
            PriceBar { timestamp: t, open: 10.0, high: 11.0, low: 9.0, close: 10.0, volume: 0.0 },
            PriceBar {
                timestamp: t + Duration::days(1),
                open: 14.0,
                high: 15.0,
                low: 14.0,
                close: 14.5,
                volume: 0.0,
            },
        ];
        assert_eq!(IndicatorEngine::true_range(&bars), vec![None, Some(5.0)]);
    }

    #[test]
    fn log_returns_are_log_price_ratios() {
        let cfg = IndicatorConfig {
            return_kind: ReturnKind::Log,
            ..IndicatorConfig::default()
        };
        let raw = zigzag_series(40);
        let series = IndicatorEngine::compute(&raw, &cfg).unwrap();
        let closes = raw.closes();
        let returns = series.column(columns::RETURNS).unwrap();

        assert!(returns[0].is_none());
        for i in 1..closes.len() {
            let expected = (closes[i] / closes[i - 1]).ln();
            assert!((returns[i].unwrap() - expected).abs() < 1e-12, "bar {}", i);
        }
        assert_eq!(
            IndicatorEngine::returns(&[100.0, 110.0, 0.0, 5.0], ReturnKind::Log)[..2],
            [None, Some(1.1_f64.ln())]
        );
    }

    #[test]
    fn correlation_of_identical_slices_is_one() {
        let x = [1.0, 2.0, 3.0, 5.0];
        let r = IndicatorEngine::compute_correlation(&x, &x).unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(IndicatorEngine::compute_correlation(&x, &[1.0]), None);
    }
}
