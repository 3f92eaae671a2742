use crate::analyzer::levels::LevelDetector;
use crate::analyzer::lifecycle::Lifecycle;
use crate::analyzer::market_indicators::IndicatorEngine;
use crate::analyzer::regime::RegimeClassifier;
use crate::analyzer::sentiment::SentimentAggregator;
use crate::config::AnalysisConfig;
use crate::model::{
    AggregateSentiment, AnalysisError, AnalysisReport, AnalysisStage, ClaimRole,
    ComputationWarning, DataError, IndicatorSnapshot, LevelCrossCheck, LevelKind, LevelSet,
    OracleResponse, PatternSummary, RegimeLabel, SentimentItem, Series,
};
use chrono::Utc;
use tracing::{info, warn};

/// Trait defining the interface for the quantitative analyzer.
pub trait Analyzer {
    fn compute_indicators(&self, series: &Series) -> Result<Series, DataError>;
    fn detect_levels(&self, series: &Series) -> Result<LevelSet, DataError>;
    fn classify_regime(&self, series: &Series) -> Result<RegimeLabel, DataError>;
    fn aggregate_sentiment(&self, items: &[SentimentItem]) -> AggregateSentiment;
    /// Compares every numeric level the oracle claimed with the locally detected levels.
    fn cross_check(&self, levels: &LevelSet, oracle: &OracleResponse) -> Vec<LevelCrossCheck>;
    /// Computing through Merged for callers that already hold the raw series, the
    /// scored items and (optionally) the oracle's answer.
    fn run_analysis(
        &self,
        series: &Series,
        items: &[SentimentItem],
        oracle: Option<&OracleResponse>,
    ) -> Result<AnalysisReport, AnalysisError>;
}

/// Output of the Computing stage.
#[derive(Debug, Clone)]
pub struct QuantitativeAnalysis {
    pub series: Series,
    pub levels: LevelSet,
    pub regime: RegimeLabel,
}

pub struct AnalyzerImpl {
    config: AnalysisConfig,
    sentiment: SentimentAggregator,
}

impl Default for AnalyzerImpl {
    fn default() -> Self {
        Self {
            config: AnalysisConfig::default(),
            sentiment: SentimentAggregator::default(),
        }
    }
}

impl AnalyzerImpl {
    pub fn new(config: AnalysisConfig) -> Result<Self, DataError> {
        config.validate()?;
        let sentiment = SentimentAggregator::new(config.sentiment.clone())?;
        Ok(Self { config, sentiment })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Indicators, then levels and regime over the augmented series.
    pub fn analyze_series(&self, series: &Series) -> Result<QuantitativeAnalysis, DataError> {
        let series = self.compute_indicators(series)?;
        let levels = self.detect_levels(&series)?;
        let regime = self.classify_regime(&series)?;
        Ok(QuantitativeAnalysis {
            series,
            levels,
            regime,
        })
    }

    /// Builds the report from the computed parts. Warnings are collected from levels,
    /// sentiment and cross-checking, in that order.
    pub fn merge(
        &self,
        quant: QuantitativeAnalysis,
        sentiment: AggregateSentiment,
        oracle: Option<&OracleResponse>,
    ) -> AnalysisReport {
        let cross_checks = oracle
            .map(|o| self.cross_check(&quant.levels, o))
            .unwrap_or_default();

        let mut warnings = quant.levels.warnings.clone();
        warnings.extend(sentiment.warnings.iter().cloned());
        warnings.extend(
            cross_checks
                .iter()
                .filter(|c| !c.agrees)
                .map(|c| ComputationWarning::OracleDisagreement {
                    claimed: c.claimed,
                    nearest: c.nearest_detected,
                }),
        );

        let patterns = oracle.map(|o| PatternSummary {
            detected_patterns: o.patterns.clone(),
            quality_score: o.quality_score.clamp(0.0, 100.0),
            reliability: o.reliability.clone().unwrap_or_else(|| "unknown".into()),
            price_targets: o.price_targets.clone(),
        });

        AnalysisReport {
            symbol: quant.series.symbol().to_string(),
            generated_at: Utc::now(),
            current_price: quant.levels.reference_price,
            indicators: IndicatorSnapshot::from_series(&quant.series),
            levels: quant.levels,
            regime: quant.regime,
            patterns,
            cross_checks,
            sentiment,
            warnings,
            stage: AnalysisStage::Merged,
        }
    }
}

impl Analyzer for AnalyzerImpl {
    fn compute_indicators(&self, series: &Series) -> Result<Series, DataError> {
        IndicatorEngine::compute(series, &self.config.indicators)
    }

    fn detect_levels(&self, series: &Series) -> Result<LevelSet, DataError> {
        LevelDetector::new(self.config.levels.clone()).detect(series)
    }

    fn classify_regime(&self, series: &Series) -> Result<RegimeLabel, DataError> {
        RegimeClassifier::new(self.config.regime.clone()).classify(series)
    }

    fn aggregate_sentiment(&self, items: &[SentimentItem]) -> AggregateSentiment {
        self.sentiment.aggregate(items)
    }

    fn cross_check(&self, levels: &LevelSet, oracle: &OracleResponse) -> Vec<LevelCrossCheck> {
        let claims = oracle
            .support_level
            .map(|p| (ClaimRole::Support, p))
            .into_iter()
            .chain(oracle.resistance_level.map(|p| (ClaimRole::Resistance, p)))
            .chain(oracle.key_levels.iter().map(|&p| (ClaimRole::KeyLevel, p)))
            .filter(|(_, p)| p.is_finite());

        let reference = levels.reference_price.abs();
        let tolerance = self.config.cross_check.tolerance;

        claims
            .map(|(role, claimed)| {
                let wanted = match role {
                    ClaimRole::Support => Some(LevelKind::Support),
                    ClaimRole::Resistance => Some(LevelKind::Resistance),
                    ClaimRole::KeyLevel => None,
                };
                let nearest = levels
                    .levels
                    .iter()
                    .filter(|l| wanted.is_none_or(|kind| l.kind == kind))
                    .map(|l| l.price)
                    .min_by(|a, b| (a - claimed).abs().total_cmp(&(b - claimed).abs()));
                let deviation = nearest.and_then(|n| {
                    (reference > 0.0).then(|| (claimed - n).abs() / reference)
                });
                let agrees = deviation.is_some_and(|d| d <= tolerance);
                if !agrees {
                    warn!(?role, claimed, ?nearest, "oracle level not confirmed by detected levels");
                }
                LevelCrossCheck {
                    role,
                    claimed,
                    nearest_detected: nearest,
                    deviation,
                    agrees,
                }
            })
            .collect()
    }

    fn run_analysis(
        &self,
        series: &Series,
        items: &[SentimentItem],
        oracle: Option<&OracleResponse>,
    ) -> Result<AnalysisReport, AnalysisError> {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(AnalysisStage::Computing)?;

        let quant = match self.analyze_series(series) {
            Ok(q) => q,
            Err(e) => return Err(lifecycle.fail(e.into())),
        };
        if oracle.is_some() {
            lifecycle.advance(AnalysisStage::AwaitingOracle)?;
        }
        let sentiment = self.aggregate_sentiment(items);
        lifecycle.advance(AnalysisStage::Merged)?;

        let report = self.merge(quant, sentiment, oracle);
        info!(
            symbol = %report.symbol,
            regime = ?report.regime.regime,
            warnings = report.warnings.len(),
            "analysis merged"
        );
        Ok(report)
    }
}
