use crate::model::DataError;
use chrono::TimeDelta;
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    Simple,
    Log,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_devs: f64,
    pub atr_period: usize,
    pub volatility_window: usize,
    pub return_kind: ReturnKind,
    pub trend_ma_period: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_devs: 2.0,
            atr_period: 14,
            volatility_window: 5,
            return_kind: ReturnKind::Simple,
            trend_ma_period: 20,
        }
    }
}

impl IndicatorConfig {
    /// Number of bars needed before every indicator has produced its first value.
    pub fn required_bars(&self) -> usize {
        [
            self.rsi_period + 1,
            self.macd_slow + self.macd_signal - 1,
            self.bb_period,
            self.atr_period + 1,
            self.volatility_window + 1,
            self.trend_ma_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), DataError> {
        let periods = [
            ("rsi_period", self.rsi_period),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("bb_period", self.bb_period),
            ("atr_period", self.atr_period),
            ("volatility_window", self.volatility_window),
            ("trend_ma_period", self.trend_ma_period),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, p)| *p == 0) {
            return Err(DataError::InvalidConfig(format!("{} must be positive", name)));
        }
        if self.macd_fast >= self.macd_slow {
            return Err(DataError::InvalidConfig(
                "macd_fast must be shorter than macd_slow".into(),
            ));
        }
        if !(self.bb_devs.is_finite() && self.bb_devs > 0.0) {
            return Err(DataError::InvalidConfig("bb_devs must be positive".into()));
        }
        Ok(())
    }
}

/// Width of the band within which pivots are merged into one level.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterTolerance {
    /// Fraction of the current close, e.g. 0.01 = 1%.
    Percent(f64),
    /// Multiple of the latest ATR.
    Atr(f64),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub lookback: usize,
    pub pivot_radius: usize,
    pub tolerance: ClusterTolerance,
    pub min_pivots: usize,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            lookback: 30,
            pivot_radius: 2,
            tolerance: ClusterTolerance::Percent(0.01),
            min_pivots: 2,
        }
    }
}

impl LevelConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        if self.lookback == 0 || self.pivot_radius == 0 {
            return Err(DataError::InvalidConfig(
                "lookback and pivot_radius must be positive".into(),
            ));
        }
        let width = match self.tolerance {
            ClusterTolerance::Percent(p) | ClusterTolerance::Atr(p) => p,
        };
        if !(width.is_finite() && width >= 0.0) {
            return Err(DataError::InvalidConfig("tolerance must be non-negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityMetric {
    /// ATR divided by close.
    NormalizedAtr,
    /// Rolling standard deviation of returns.
    ReturnStdev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationCurve {
    /// 1 - exp(-rate * d)
    Exponential,
    /// tanh(rate * d)
    Tanh,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// trend_strength above this (0..100) counts as trending.
    pub trend_threshold: f64,
    pub slope_window: usize,
    /// |MA slope| / ATR at which the slope component saturates.
    pub slope_full_scale: f64,
    /// |MACD histogram| / ATR at which the histogram component saturates.
    pub histogram_full_scale: f64,
    /// Share of trend_strength taken from the slope; the rest comes from the histogram.
    pub slope_weight: f64,
    pub volatility_metric: VolatilityMetric,
    pub volatility_percentile_window: usize,
    pub high_volatility_percentile: f64,
    pub low_volatility_percentile: f64,
    /// Relative distance from the trailing median the latest reading must clear
    /// before it is labelled high or low.
    pub min_volatility_spread: f64,
    pub confidence_curve: SaturationCurve,
    pub confidence_rate: f64,
    /// Slope component below this counts as flat.
    pub flat_slope_score: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            trend_threshold: 40.0,
            slope_window: 10,
            slope_full_scale: 0.5,
            histogram_full_scale: 0.5,
            slope_weight: 0.7,
            volatility_metric: VolatilityMetric::NormalizedAtr,
            volatility_percentile_window: 30,
            high_volatility_percentile: 2.0 / 3.0,
            low_volatility_percentile: 1.0 / 3.0,
            min_volatility_spread: 0.15,
            confidence_curve: SaturationCurve::Exponential,
            confidence_rate: 3.0,
            flat_slope_score: 0.05,
        }
    }
}

impl RegimeConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        if !(0.0..100.0).contains(&self.trend_threshold) || self.trend_threshold <= 0.0 {
            return Err(DataError::InvalidConfig(
                "trend_threshold must lie in (0, 100)".into(),
            ));
        }
        if self.slope_window < 2 || self.volatility_percentile_window == 0 {
            return Err(DataError::InvalidConfig(
                "slope_window must be at least 2 and the percentile window positive".into(),
            ));
        }
        if !(self.low_volatility_percentile < self.high_volatility_percentile
            && self.high_volatility_percentile < 1.0
            && self.low_volatility_percentile > 0.0)
        {
            return Err(DataError::InvalidConfig(
                "volatility percentiles must satisfy 0 < low < high < 1".into(),
            ));
        }
        if !(self.min_volatility_spread.is_finite() && self.min_volatility_spread >= 0.0) {
            return Err(DataError::InvalidConfig(
                "min_volatility_spread must be non-negative".into(),
            ));
        }
        if self.slope_full_scale <= 0.0 || self.histogram_full_scale <= 0.0 {
            return Err(DataError::InvalidConfig("full scales must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.slope_weight) || self.confidence_rate <= 0.0 {
            return Err(DataError::InvalidConfig(
                "slope_weight must lie in [0, 1] and confidence_rate be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementWeighting {
    /// log_base(1 + engagement)
    Logarithmic { base: f64 },
    /// engagement / max(engagement)
    Linear,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub weighting: EngagementWeighting,
    pub strong_threshold: f64,
    pub moderate_threshold: f64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            weighting: EngagementWeighting::Logarithmic {
                base: std::f64::consts::E,
            },
            strong_threshold: 0.6,
            moderate_threshold: 0.2,
        }
    }
}

impl SentimentConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        if let EngagementWeighting::Logarithmic { base } = self.weighting {
            if !(base.is_finite() && base > 1.0) {
                return Err(DataError::InvalidConfig(
                    "engagement log base must be greater than 1".into(),
                ));
            }
        }
        if !(0.0 < self.moderate_threshold && self.moderate_threshold < self.strong_threshold) {
            return Err(DataError::InvalidConfig(
                "sentiment thresholds must satisfy 0 < moderate < strong".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub indicators: IndicatorConfig,
    pub levels: LevelConfig,
    pub regime: RegimeConfig,
    pub sentiment: SentimentConfig,
    pub cross_check: CrossCheckConfig,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<(), DataError> {
        self.indicators.validate()?;
        self.levels.validate()?;
        self.regime.validate()?;
        self.sentiment.validate()?;
        if !(self.cross_check.tolerance.is_finite() && self.cross_check.tolerance >= 0.0) {
            return Err(DataError::InvalidConfig(
                "cross_check tolerance must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrossCheckConfig {
    /// Maximum |claimed - detected| / close for an oracle level to count as confirmed.
    pub tolerance: f64,
}

impl Default for CrossCheckConfig {
    fn default() -> Self {
        Self { tolerance: 0.02 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    /// Model used to score individual posts.
    pub scorer_model: String,
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub cache_ttl_seconds: i64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://openrouter.ai/api/v1/chat/completions".into(),
            model: "deepseek/deepseek-r1-distill-llama-70b".into(),
            scorer_model: "deepseek/deepseek-r1:nitro".into(),
            api_key_env: "OPENROUTER_API_KEY".into(),
            temperature: 0.1,
            max_tokens: 200,
            timeout_seconds: 30,
            max_retries: 2,
            cache_ttl_seconds: 300,
        }
    }
}

impl OracleConfig {
    /// Lifetime of cached oracle answers; out-of-range or negative values are rejected.
    pub fn cache_ttl(&self) -> Result<TimeDelta, DataError> {
        TimeDelta::try_seconds(self.cache_ttl_seconds)
            .filter(|ttl| *ttl >= TimeDelta::zero())
            .ok_or_else(|| {
                DataError::InvalidConfig(format!(
                    "cache_ttl_seconds {} is out of range",
                    self.cache_ttl_seconds
                ))
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PriceSourceConfig {
    pub endpoint: String,
    /// Appended to tickers that do not already carry it, e.g. BTC -> BTC-USD.
    pub quote_suffix: Option<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for PriceSourceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://query1.finance.yahoo.com/v8/finance/chart".into(),
            quote_suffix: Some("-USD".into()),
            timeout_seconds: 15,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_period")]
    pub period: String,
    /// JSON endpoint returning recent posts for this symbol.
    pub feed_url: Option<String>,
    #[serde(default = "default_hours_back")]
    pub hours_back: u32,
    #[serde(default = "default_max_posts")]
    pub max_posts: usize,
}

fn default_interval() -> String {
    "1d".into()
}

fn default_period() -> String {
    "3mo".into()
}

fn default_hours_back() -> u32 {
    24
}

fn default_max_posts() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub symbols: Vec<SymbolConfig>,
    /// 0 runs a single pass and exits.
    #[serde(default)]
    pub check_interval_seconds: u64,
    #[serde(default)]
    pub prices: PriceSourceConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

pub fn load_config(path: &str) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config: AppConfig = serde_json::from_str(content)?;
    config.analysis.validate()?;
    config.oracle.cache_ttl()?;
    Ok(config)
}
