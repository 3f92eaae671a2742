// Analyzer module: indicators, levels, regime and sentiment, plus the orchestrator that
// sequences them against the collaborators.

pub mod levels;
pub mod lifecycle;
pub mod market_indicators;
pub mod orchestrator;
pub mod price_analysis;
pub mod regime;
pub mod sentiment;

pub use levels::LevelDetector;
pub use lifecycle::Lifecycle;
pub use market_indicators::IndicatorEngine;
pub use orchestrator::AnalysisOrchestrator;
pub use price_analysis::{Analyzer, AnalyzerImpl, QuantitativeAnalysis};
pub use regime::RegimeClassifier;
pub use sentiment::SentimentAggregator;

use crate::config::{IndicatorConfig, LevelConfig, RegimeConfig};
use crate::model::{
    AggregateSentiment, AnalysisError, AnalysisReport, DataError, LevelSet, OracleResponse,
    RegimeLabel, SentimentItem, Series,
};

pub fn compute_indicators(series: &Series, config: &IndicatorConfig) -> Result<Series, DataError> {
    IndicatorEngine::compute(series, config)
}

/// Level detection with default settings apart from the lookback window.
pub fn detect_levels(series: &Series, lookback: usize) -> Result<LevelSet, DataError> {
    LevelDetector::new(LevelConfig {
        lookback,
        ..LevelConfig::default()
    })
    .detect(series)
}

pub fn classify_regime(series: &Series) -> Result<RegimeLabel, DataError> {
    RegimeClassifier::new(RegimeConfig::default()).classify(series)
}

pub fn aggregate_sentiment(items: &[SentimentItem]) -> AggregateSentiment {
    SentimentAggregator::default().aggregate(items)
}

pub fn run_analysis(
    series: &Series,
    items: &[SentimentItem],
    oracle_response: Option<&OracleResponse>,
) -> Result<AnalysisReport, AnalysisError> {
    AnalyzerImpl::default().run_analysis(series, items, oracle_response)
}
