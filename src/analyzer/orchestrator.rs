use crate::analyzer::lifecycle::Lifecycle;
use crate::analyzer::price_analysis::{Analyzer, AnalyzerImpl};
use crate::collector::{PatternOracle, PostSource, PriceSource, SentimentScorer};
use crate::model::{
    AnalysisError, AnalysisReport, AnalysisRequest, AnalysisStage, CollaboratorError,
    ComputationWarning, IndicatorSnapshot, SentimentItem, Series,
};
use crate::normalizer::{select_top_posts, to_sentiment_item};
use crate::parser::extract_themes;
use futures::future::join_all;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one analysis request end to end: fetch, compute, ask the oracle, merge.
pub struct AnalysisOrchestrator {
    analyzer: AnalyzerImpl,
    prices: Arc<dyn PriceSource>,
    posts: Arc<dyn PostSource>,
    scorer: Arc<dyn SentimentScorer>,
    oracle: Option<Arc<dyn PatternOracle>>,
}

/// Minimum number of analyses that must mention a theme before it is reported.
const MIN_THEME_MENTIONS: usize = 2;

/// Scored items plus how many scoring calls failed.
struct ScoredPosts {
    items: Vec<SentimentItem>,
    analyses: Vec<String>,
    failed: usize,
    attempted: usize,
}

impl AnalysisOrchestrator {
    pub fn new(
        analyzer: AnalyzerImpl,
        prices: Arc<dyn PriceSource>,
        posts: Arc<dyn PostSource>,
        scorer: Arc<dyn SentimentScorer>,
    ) -> Self {
        Self {
            analyzer,
            prices,
            posts,
            scorer,
            oracle: None,
        }
    }

    /// Without an oracle the AwaitingOracle stage is skipped.
    pub fn with_oracle(mut self, oracle: Arc<dyn PatternOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisReport, AnalysisError> {
        let mut lifecycle = Lifecycle::new();

        lifecycle.advance(AnalysisStage::Fetching)?;
        info!(symbol = %request.symbol, "fetching market data and posts");
        let (series, scored) = tokio::join!(
            self.prices
                .fetch_series(&request.symbol, &request.interval, &request.period),
            self.collect_sentiment(request)
        );
        let (series, scored) = match (series, scored) {
            (Ok(series), Ok(scored)) => (series, scored),
            (Err(source), _) | (_, Err(source)) => {
                warn!(symbol = %request.symbol, error = %source, "fetch failed");
                return Err(lifecycle.fail(AnalysisError::Collaborator {
                    stage: AnalysisStage::Fetching,
                    source,
                }));
            }
        };

        lifecycle.advance(AnalysisStage::Computing)?;
        let quant = match self.analyzer.analyze_series(&series) {
            Ok(quant) => quant,
            Err(e) => {
                warn!(symbol = %request.symbol, error = %e, "computation failed");
                return Err(lifecycle.fail(e.into()));
            }
        };

        let oracle_response = match &self.oracle {
            Some(oracle) => {
                lifecycle.advance(AnalysisStage::AwaitingOracle)?;
                let prompt = pattern_prompt(&quant.series);
                match oracle.recognize(&prompt).await {
                    Ok(response) => Some(response),
                    Err(source) => {
                        warn!(symbol = %request.symbol, error = %source, "oracle failed");
                        return Err(lifecycle.fail(AnalysisError::Collaborator {
                            stage: AnalysisStage::AwaitingOracle,
                            source,
                        }));
                    }
                }
            }
            None => None,
        };

        let mut sentiment = self.analyzer.aggregate_sentiment(&scored.items);
        if !scored.analyses.is_empty() {
            sentiment.themes = extract_themes(&scored.analyses, MIN_THEME_MENTIONS);
        }
        if scored.failed > 0 {
            sentiment.warnings.insert(
                0,
                ComputationWarning::ScoringFailed {
                    failed: scored.failed,
                    attempted: scored.attempted,
                },
            );
        }

        lifecycle.advance(AnalysisStage::Merged)?;
        let mut report = self.analyzer.merge(quant, sentiment, oracle_response.as_ref());

        lifecycle.advance(AnalysisStage::Done)?;
        report.stage = lifecycle.stage();
        info!(
            symbol = %report.symbol,
            price = report.current_price,
            regime = ?report.regime.regime,
            sentiment = ?report.sentiment.label,
            warnings = report.warnings.len(),
            "analysis done"
        );
        Ok(report)
    }

    /// Fetches posts, keeps the most engaged ones and scores them concurrently.
    /// Individual scoring failures are counted, not fatal.
    async fn collect_sentiment(&self, request: &AnalysisRequest) -> Result<ScoredPosts, CollaboratorError> {
        let posts = self
            .posts
            .fetch_posts(&request.symbol, request.hours_back, request.max_posts)
            .await?;
        let selected = select_top_posts(posts, request.max_posts);
        let attempted = selected.len();

        let scores = join_all(selected.iter().map(|post| self.scorer.score(&post.text))).await;

        let mut items = Vec::with_capacity(attempted);
        let mut analyses = Vec::with_capacity(attempted);
        let mut failed = 0;
        for (post, scored) in selected.iter().zip(scores) {
            match scored {
                Ok(scored) => {
                    items.push(to_sentiment_item(post, scored.score));
                    analyses.push(scored.analysis);
                }
                Err(e) => {
                    warn!(symbol = %request.symbol, error = %e, "scoring failed, skipping post");
                    failed += 1;
                }
            }
        }
        Ok(ScoredPosts {
            items,
            analyses,
            failed,
            attempted,
        })
    }
}

/// Prompt for the pattern oracle: the last five bars and the latest indicator readings.
pub fn pattern_prompt(series: &Series) -> String {
    let mut prompt = String::from(
        "Analyze the following price action and technical indicators to identify chart patterns:\n\n\
         Price Action (last 5 periods):\n",
    );
    let start = series.len().saturating_sub(5);
    for bar in &series.bars()[start..] {
        let _ = writeln!(
            prompt,
            "Date {}: O:{:.2} H:{:.2} L:{:.2} C:{:.2}",
            bar.timestamp.format("%Y-%m-%d %H:%M"),
            bar.open,
            bar.high,
            bar.low,
            bar.close
        );
    }

    let snapshot = IndicatorSnapshot::from_series(series);
    let fmt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v));
    let _ = write!(
        prompt,
        "\nTechnical Indicators:\n\
         - RSI: {}\n\
         - MACD: {}\n\
         - BB Upper: {}\n\
         - BB Lower: {}\n\n",
        fmt(snapshot.rsi),
        fmt(snapshot.macd),
        fmt(snapshot.bb_upper),
        fmt(snapshot.bb_lower)
    );
    prompt.push_str(
        "Return ONLY a valid JSON object in this exact format:\n\
         {\n\
             \"patterns\": [\"string\"],\n\
             \"quality_score\": number,\n\
             \"completion\": number,\n\
             \"reliability\": \"string\",\n\
             \"price_targets\": [number],\n\
             \"key_levels\": [number],\n\
             \"support_level\": number,\n\
             \"resistance_level\": number\n\
         }",
    );
    prompt
}
