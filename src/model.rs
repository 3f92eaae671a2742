// Core structs: PriceBar, Series, Level, RegimeLabel, SentimentItem and the report
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Indicator column names written by the indicator engine.
pub mod columns {
    pub const RSI: &str = "rsi";
    pub const MACD: &str = "macd";
    pub const MACD_SIGNAL: &str = "macd_signal";
    pub const MACD_HIST: &str = "macd_hist";
    pub const BB_MIDDLE: &str = "bb_middle";
    pub const BB_UPPER: &str = "bb_upper";
    pub const BB_LOWER: &str = "bb_lower";
    pub const ATR: &str = "atr";
    pub const RETURNS: &str = "returns";
    pub const VOLATILITY: &str = "volatility";
    pub const TREND_MA: &str = "trend_ma";
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A column entry is `None` until the indicator's warm-up has elapsed.
pub type Column = Vec<Option<f64>>;

/// Ordered bars plus derived indicator columns keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    symbol: String,
    bars: Vec<PriceBar>,
    columns: BTreeMap<String, Column>,
}

impl Series {
    /// Validates that timestamps are strictly increasing.
    pub fn new(symbol: impl Into<String>, bars: Vec<PriceBar>) -> Result<Self, DataError> {
        if bars.is_empty() {
            return Err(DataError::Empty);
        }
        for (index, pair) in bars.windows(2).enumerate() {
            if pair[1].timestamp == pair[0].timestamp {
                return Err(DataError::DuplicateTimestamp { index: index + 1 });
            }
            if pair[1].timestamp < pair[0].timestamp {
                return Err(DataError::NonMonotonicTimestamp { index: index + 1 });
            }
        }
        Ok(Self {
            symbol: symbol.into(),
            bars,
            columns: BTreeMap::new(),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_bar(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(|c| c.as_slice())
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    /// Latest defined value of a column, if the column exists and its last entry is warm.
    pub fn latest(&self, name: &str) -> Option<f64> {
        self.columns.get(name).and_then(|c| c.last().copied().flatten())
    }

    /// Like [`Series::latest`] but reports a missing column or cold value as a `DataError`.
    pub fn require_latest(&self, name: &str) -> Result<f64, DataError> {
        match self.columns.get(name) {
            None => Err(DataError::MissingColumn(name.to_string())),
            Some(col) => col
                .last()
                .copied()
                .flatten()
                .ok_or_else(|| DataError::NotWarm(name.to_string())),
        }
    }

    /// Columns must have exactly one entry per bar.
    pub fn insert_column(&mut self, name: &str, values: Column) -> Result<(), DataError> {
        if values.len() != self.bars.len() {
            return Err(DataError::ColumnLength {
                column: name.to_string(),
                expected: self.bars.len(),
                got: values.len(),
            });
        }
        self.columns.insert(name.to_string(), values);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub kind: LevelKind,
    pub strength: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingKind {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub kind: SwingKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelSet {
    /// Current close the levels were ranked against.
    pub reference_price: f64,
    /// All levels, nearest to the reference price first.
    pub levels: Vec<Level>,
    pub nearest_support: Option<Level>,
    pub nearest_resistance: Option<Level>,
    pub swings: Vec<SwingPoint>,
    pub warnings: Vec<ComputationWarning>,
}

impl LevelSet {
    pub fn supports(&self) -> impl Iterator<Item = &Level> {
        self.levels.iter().filter(|l| l.kind == LevelKind::Support)
    }

    pub fn resistances(&self) -> impl Iterator<Item = &Level> {
        self.levels.iter().filter(|l| l.kind == LevelKind::Resistance)
    }

    /// Levels are only actionable when enough pivots backed them.
    pub fn is_low_confidence(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Trending,
    Ranging,
    Volatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeLabel {
    pub regime: Regime,
    /// 0..=100
    pub confidence: f64,
    /// 0..=100
    pub trend_strength: f64,
    pub volatility_regime: VolatilityRegime,
    pub direction: TrendDirection,
    /// Rank of the latest volatility reading within its trailing window, 0..=1.
    pub volatility_percentile: f64,
}

/// A scorer's verdict on one text: the score and the reasoning it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredText {
    pub score: f64,
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentItem {
    pub text: String,
    pub score: f64,
    pub engagement: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Distribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stdev: f64,
}

impl Distribution {
    pub fn empty() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            stdev: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    StronglyBullish,
    ModeratelyBullish,
    Neutral,
    ModeratelyBearish,
    StronglyBearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingUsed {
    Engagement,
    Equal,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateSentiment {
    pub weighted_score: f64,
    pub label: SentimentLabel,
    pub distribution: Distribution,
    pub item_count: usize,
    /// Mean engagement of the kept items.
    pub average_engagement: f64,
    pub weighting: WeightingUsed,
    /// Recurring themes in the scorers' reasoning; empty when no reasoning was collected.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub themes: Vec<String>,
    pub warnings: Vec<ComputationWarning>,
}

/// Soft, non-fatal conditions attached to a result instead of being thrown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputationWarning {
    ScoreClamped { index: usize, original: f64 },
    ScoreDropped { index: usize },
    InsufficientPivots { found: usize },
    ZeroWeightAggregate { item_count: usize },
    EmptySentimentInput,
    OracleDisagreement { claimed: f64, nearest: Option<f64> },
    ScoringFailed { failed: usize, attempted: usize },
}

/// Structured output of the external pattern-recognition oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub patterns: Vec<String>,
    pub quality_score: f64,
    pub completion: Option<f64>,
    pub reliability: Option<String>,
    #[serde(default)]
    pub price_targets: Vec<f64>,
    #[serde(default)]
    pub key_levels: Vec<f64>,
    pub support_level: Option<f64>,
    pub resistance_level: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimRole {
    Support,
    Resistance,
    KeyLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelCrossCheck {
    pub role: ClaimRole,
    pub claimed: f64,
    pub nearest_detected: Option<f64>,
    /// |claimed - nearest| / reference price
    pub deviation: Option<f64>,
    pub agrees: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSummary {
    pub detected_patterns: Vec<String>,
    pub quality_score: f64,
    pub reliability: String,
    pub price_targets: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_hist: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr: Option<f64>,
    pub volatility: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn from_series(series: &Series) -> Self {
        Self {
            rsi: series.latest(columns::RSI),
            macd: series.latest(columns::MACD),
            macd_signal: series.latest(columns::MACD_SIGNAL),
            macd_hist: series.latest(columns::MACD_HIST),
            bb_upper: series.latest(columns::BB_UPPER),
            bb_middle: series.latest(columns::BB_MIDDLE),
            bb_lower: series.latest(columns::BB_LOWER),
            atr: series.latest(columns::ATR),
            volatility: series.latest(columns::VOLATILITY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStage {
    Idle,
    Fetching,
    Computing,
    AwaitingOracle,
    Merged,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub current_price: f64,
    pub indicators: IndicatorSnapshot,
    pub levels: LevelSet,
    pub regime: RegimeLabel,
    pub patterns: Option<PatternSummary>,
    pub cross_checks: Vec<LevelCrossCheck>,
    pub sentiment: AggregateSentiment,
    /// Every warning from levels, sentiment and cross-checking, in that order.
    pub warnings: Vec<ComputationWarning>,
    pub stage: AnalysisStage,
}

impl AnalysisReport {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub interval: String,
    pub period: String,
    pub hours_back: u32,
    pub max_posts: usize,
}

/// Raw post as delivered by a text feed, before scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub text: String,
    #[serde(default)]
    pub username: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub retweets: u64,
    #[serde(default)]
    pub replies: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("series is empty")]
    Empty,
    #[error("series has {got} bars but {needed} are required for indicator warm-up")]
    InsufficientBars { needed: usize, got: usize },
    #[error("duplicate timestamp at bar {index}")]
    DuplicateTimestamp { index: usize },
    #[error("timestamp at bar {index} is earlier than its predecessor")]
    NonMonotonicTimestamp { index: usize },
    #[error("indicator column '{0}' is missing; compute indicators first")]
    MissingColumn(String),
    #[error("indicator column '{0}' has no value at the latest bar")]
    NotWarm(String),
    #[error("column '{column}' has {got} entries, expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollaboratorError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("malformed oracle output: {0}")]
    MalformedOracle(String),
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
}

impl CollaboratorError {
    /// Transport failures may succeed on a later attempt; bad payloads will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollaboratorError::Http(_) | CollaboratorError::Timeout)
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CollaboratorError::Timeout
        } else {
            CollaboratorError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(err: serde_json::Error) -> Self {
        CollaboratorError::InvalidResponse(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error("{stage:?} failed: {source}")]
    Collaborator {
        stage: AnalysisStage,
        #[source]
        source: CollaboratorError,
    },
    #[error("illegal stage transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: AnalysisStage,
        to: AnalysisStage,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(secs: i64, close: f64) -> PriceBar {
        PriceBar {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn rejects_duplicate_and_backwards_timestamps() {
        let dup = Series::new("X", vec![bar(0, 1.0), bar(0, 2.0)]);
        assert_eq!(dup, Err(DataError::DuplicateTimestamp { index: 1 }));

        let back = Series::new("X", vec![bar(10, 1.0), bar(20, 1.0), bar(15, 1.0)]);
        assert_eq!(back, Err(DataError::NonMonotonicTimestamp { index: 2 }));

        assert_eq!(Series::new("X", vec![]), Err(DataError::Empty));
    }

    #[test]
    fn column_length_must_match_bar_count() {
        let mut series = Series::new("X", vec![bar(0, 1.0), bar(1, 2.0)]).unwrap();
        let err = series.insert_column("rsi", vec![None]).unwrap_err();
        assert!(matches!(err, DataError::ColumnLength { expected: 2, got: 1, .. }));

        series.insert_column("rsi", vec![None, Some(55.0)]).unwrap();
        assert_eq!(series.latest("rsi"), Some(55.0));
        assert_eq!(series.require_latest("atr"), Err(DataError::MissingColumn("atr".into())));
    }
}
