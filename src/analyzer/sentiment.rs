use crate::analyzer::market_indicators::IndicatorEngine;
use crate::config::{EngagementWeighting, SentimentConfig};
use crate::model::{
    AggregateSentiment, ComputationWarning, DataError, Distribution, SentimentItem,
    SentimentLabel, WeightingUsed,
};
use serde::Serialize;
use tracing::{debug, warn};

/// Combines pre-scored items into one engagement-weighted market sentiment.
pub struct SentimentAggregator {
    config: SentimentConfig,
}

impl Default for SentimentAggregator {
    fn default() -> Self {
        Self {
            config: SentimentConfig::default(),
        }
    }
}

impl SentimentAggregator {
    /// Rejects weightings that would turn every weight into inf or NaN.
    pub fn new(config: SentimentConfig) -> Result<Self, DataError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn aggregate(&self, items: &[SentimentItem]) -> AggregateSentiment {
        let mut warnings = Vec::new();
        let mut scores = Vec::with_capacity(items.len());
        let mut engagements = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            if !item.score.is_finite() {
                warnings.push(ComputationWarning::ScoreDropped { index });
                continue;
            }
            let score = item.score.clamp(-1.0, 1.0);
            if score != item.score {
                warnings.push(ComputationWarning::ScoreClamped {
                    index,
                    original: item.score,
                });
            }
            scores.push(score);
            engagements.push(if item.engagement.is_finite() {
                item.engagement.max(0.0)
            } else {
                0.0
            });
        }

        if scores.is_empty() {
            warnings.push(ComputationWarning::EmptySentimentInput);
            return AggregateSentiment {
                weighted_score: 0.0,
                label: SentimentLabel::Neutral,
                distribution: Distribution::empty(),
                item_count: 0,
                average_engagement: 0.0,
                weighting: WeightingUsed::None,
                themes: Vec::new(),
                warnings,
            };
        }

        let weights = self.weights(&engagements);
        let total: f64 = weights.iter().sum();
        let (weighted_score, weighting) = if total > 0.0 && total.is_finite() {
            let sum: f64 = scores.iter().zip(&weights).map(|(s, w)| s * w).sum();
            (sum / total, WeightingUsed::Engagement)
        } else {
            warnings.push(ComputationWarning::ZeroWeightAggregate {
                item_count: scores.len(),
            });
            (
                scores.iter().sum::<f64>() / scores.len() as f64,
                WeightingUsed::Equal,
            )
        };
        let weighted_score = weighted_score.clamp(-1.0, 1.0);

        let distribution = Distribution {
            min: scores.iter().copied().fold(f64::INFINITY, f64::min),
            max: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean: scores.iter().sum::<f64>() / scores.len() as f64,
            stdev: IndicatorEngine::std_dev(&scores),
        };

        if !warnings.is_empty() {
            warn!(count = warnings.len(), "sentiment aggregate carries warnings");
        }
        debug!(weighted_score, items = scores.len(), "sentiment aggregated");

        AggregateSentiment {
            weighted_score,
            label: self.label(weighted_score),
            distribution,
            item_count: scores.len(),
            average_engagement: engagements.iter().sum::<f64>() / engagements.len() as f64,
            weighting,
            themes: Vec::new(),
            warnings,
        }
    }

    /// Per-item weights for the configured weighting mode.
    pub fn weights(&self, engagements: &[f64]) -> Vec<f64> {
        match self.config.weighting {
            EngagementWeighting::Logarithmic { base } => {
                let ln_base = base.ln();
                engagements.iter().map(|e| e.ln_1p() / ln_base).collect()
            }
            EngagementWeighting::Linear => {
                let max = engagements.iter().copied().fold(0.0, f64::max);
                if max <= 0.0 {
                    return vec![0.0; engagements.len()];
                }
                engagements.iter().map(|e| e / max).collect()
            }
        }
    }

    pub fn label(&self, score: f64) -> SentimentLabel {
        let strong = self.config.strong_threshold;
        let moderate = self.config.moderate_threshold;
        if score >= strong {
            SentimentLabel::StronglyBullish
        } else if score >= moderate {
            SentimentLabel::ModeratelyBullish
        } else if score <= -strong {
            SentimentLabel::StronglyBearish
        } else if score <= -moderate {
            SentimentLabel::ModeratelyBearish
        } else {
            SentimentLabel::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    StrongPositive,
    ModeratePositive,
    Weak,
    ModerateNegative,
    StrongNegative,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SentimentCorrelation {
    pub correlation: f64,
    pub strength: CorrelationStrength,
}

/// Pearson correlation between per-period sentiment scores and price changes.
/// Returns None for mismatched or degenerate inputs.
pub fn correlate_with_price(scores: &[f64], price_changes: &[f64]) -> Option<SentimentCorrelation> {
    let correlation = IndicatorEngine::compute_correlation(scores, price_changes)?;
    let strength = if correlation > 0.7 {
        CorrelationStrength::StrongPositive
    } else if correlation > 0.3 {
        CorrelationStrength::ModeratePositive
    } else if correlation > -0.3 {
        CorrelationStrength::Weak
    } else if correlation > -0.7 {
        CorrelationStrength::ModerateNegative
    } else {
        CorrelationStrength::StrongNegative
    };
    Some(SentimentCorrelation {
        correlation,
        strength,
    })
}
