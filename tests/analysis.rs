use chrono::{Duration, TimeZone, Utc};
use market_lens::analyzer::{AnalysisOrchestrator, Analyzer, AnalyzerImpl};
use market_lens::collector::{PatternOracle, PostSource, PriceSource, SentimentScorer};
use market_lens::model::{
    AnalysisError, AnalysisRequest, AnalysisStage, ClaimRole, CollaboratorError,
    ComputationWarning, DataError, OracleResponse, PriceBar, RawPost, Regime, ScoredText,
    SentimentItem, SentimentLabel, Series, TrendDirection,
};
use market_lens::{aggregate_sentiment, classify_regime, compute_indicators, detect_levels, run_analysis};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn series_from(symbol: &str, closes: &[f64], spread: f64) -> Series {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| PriceBar {
            timestamp: start + Duration::days(i as i64),
            open: close,
            high: close + spread,
            low: close - spread,
            close,
            volume: 1_000.0,
        })
        .collect();
    Series::new(symbol, bars).unwrap()
}

fn oscillating(n: usize) -> Vec<f64> {
    let cycle = [100.0, 104.0, 108.0, 104.0, 100.0, 96.0, 92.0, 96.0];
    (0..n).map(|i| cycle[i % cycle.len()]).collect()
}

fn uptrend(n: i32) -> Vec<f64> {
    (0..n).map(|i| 100.0 * 1.01_f64.powi(i)).collect()
}

fn request() -> AnalysisRequest {
    AnalysisRequest {
        symbol: "BTC".into(),
        interval: "1d".into(),
        period: "3mo".into(),
        hours_back: 24,
        max_posts: 30,
    }
}

struct FakePrices(Result<Series, CollaboratorError>);

#[async_trait::async_trait]
impl PriceSource for FakePrices {
    async fn fetch_series(&self, _: &str, _: &str, _: &str) -> Result<Series, CollaboratorError> {
        self.0.clone()
    }
}

struct FakePosts(Vec<RawPost>);

#[async_trait::async_trait]
impl PostSource for FakePosts {
    async fn fetch_posts(&self, _: &str, _: u32, _: usize) -> Result<Vec<RawPost>, CollaboratorError> {
        Ok(self.0.clone())
    }
}

/// Scores by lookup; unknown texts fail.
struct FakeScorer(HashMap<&'static str, (f64, &'static str)>);

#[async_trait::async_trait]
impl SentimentScorer for FakeScorer {
    async fn score(&self, text: &str) -> Result<ScoredText, CollaboratorError> {
        self.0
            .get(text)
            .map(|&(score, analysis)| ScoredText {
                score,
                analysis: analysis.to_string(),
            })
            .ok_or_else(|| CollaboratorError::Http("503 Service Unavailable".into()))
    }
}

struct FakeOracle {
    response: Result<OracleResponse, CollaboratorError>,
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl PatternOracle for FakeOracle {
    async fn recognize(&self, prompt: &str) -> Result<OracleResponse, CollaboratorError> {
        assert!(prompt.contains("Price Action (last 5 periods)"));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

fn post(text: &str, likes: u64) -> RawPost {
    RawPost {
        text: text.into(),
        username: "someone".into(),
        timestamp: Utc::now(),
        likes,
        retweets: 0,
        replies: 0,
    }
}

fn posts() -> Vec<RawPost> {
    vec![
        post("to the moon", 1000),
        post("looks heavy", 10),
        post("sideways again", 10),
        post("unscorable", 5),
    ]
}

fn scorer() -> FakeScorer {
    FakeScorer(HashMap::from([
        ("to the moon", (0.8, "Bullish breakout on heavy volume.\nScore: 0.8")),
        ("looks heavy", (-0.2, "Sellers defend resistance, some risk of a dump.\nScore: -0.2")),
        ("sideways again", (0.0, "Range bound, waiting for news.\nScore: 0.0")),
    ]))
}

fn oracle_response() -> OracleResponse {
    OracleResponse {
        patterns: vec!["symmetrical triangle".into()],
        quality_score: 64.0,
        completion: Some(70.0),
        reliability: Some("medium".into()),
        price_targets: vec![112.0],
        key_levels: vec![],
        support_level: Some(91.5),
        resistance_level: Some(130.0),
    }
}

fn orchestrator(prices: Result<Series, CollaboratorError>) -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(
        AnalyzerImpl::default(),
        Arc::new(FakePrices(prices)),
        Arc::new(FakePosts(posts())),
        Arc::new(scorer()),
    )
}

#[test]
fn indicator_columns_match_bar_count() {
    let raw = series_from("ETH", &oscillating(50), 1.0);
    let series = compute_indicators(&raw, &Default::default()).unwrap();
    for name in series.column_names() {
        let column = series.column(name).unwrap();
        assert_eq!(column.len(), 50, "{}", name);
        assert!(column[0].is_none(), "{} should be undefined at bar 0", name);
    }
    for rsi in series.column("rsi").unwrap().iter().flatten() {
        assert!((0.0..=100.0).contains(rsi));
    }
}

#[test]
fn uptrend_end_to_end() {
    let raw = series_from("UP", &uptrend(60), 0.5);
    let series = compute_indicators(&raw, &Default::default()).unwrap();

    let levels = detect_levels(&series, 30).unwrap();
    let close = series.last_close().unwrap();
    assert!(levels.resistances().all(|l| l.price > close));
    assert!(levels.supports().all(|l| l.price <= close));

    let regime = classify_regime(&series).unwrap();
    assert_eq!(regime.regime, Regime::Trending);
    assert_eq!(regime.direction, TrendDirection::Up);
    assert!(regime.trend_strength > 50.0);

    let report = run_analysis(&raw, &[], None).unwrap();
    assert_eq!(report.regime, regime);
    assert!(report.patterns.is_none());
    assert!(report.cross_checks.is_empty());
}

#[test]
fn free_functions_match_configured_analyzer() {
    let items: Vec<SentimentItem> = [(0.8, 1000.0), (-0.2, 10.0), (0.0, 10.0)]
        .iter()
        .map(|&(score, engagement)| SentimentItem {
            text: String::new(),
            score,
            engagement,
            timestamp: Utc::now(),
        })
        .collect();
    let free = aggregate_sentiment(&items);
    let configured = AnalyzerImpl::default().aggregate_sentiment(&items);
    assert_eq!(free, configured);
    assert!((free.weighted_score - 0.431).abs() < 0.005, "{}", free.weighted_score);
    assert_eq!(free.label, SentimentLabel::ModeratelyBullish);
}

#[tokio::test]
async fn full_pipeline_flags_oracle_disagreement() {
    let oracle = Arc::new(FakeOracle {
        response: Ok(oracle_response()),
        calls: AtomicUsize::new(0),
    });
    let orchestrator = orchestrator(Ok(series_from("BTC-USD", &oscillating(49), 1.0)))
        .with_oracle(oracle.clone());

    let report = orchestrator.analyze(&request()).await.unwrap();

    assert_eq!(report.stage, AnalysisStage::Done);
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.current_price, 100.0);
    assert_eq!(report.levels.nearest_support.unwrap().price, 91.0);
    assert_eq!(report.levels.nearest_resistance.unwrap().price, 109.0);

    let patterns = report.patterns.as_ref().unwrap();
    assert_eq!(patterns.detected_patterns, vec!["symmetrical triangle".to_string()]);
    assert_eq!(patterns.reliability, "medium");

    assert_eq!(report.cross_checks.len(), 2);
    let support = &report.cross_checks[0];
    assert_eq!(support.role, ClaimRole::Support);
    assert!(support.agrees);
    let resistance = &report.cross_checks[1];
    assert_eq!(resistance.role, ClaimRole::Resistance);
    assert!(!resistance.agrees);

    assert_eq!(report.sentiment.item_count, 3);
    assert_eq!(report.sentiment.label, SentimentLabel::ModeratelyBullish);
    assert_eq!(report.sentiment.average_engagement, 340.0);
    assert_eq!(report.sentiment.themes, vec!["momentum".to_string()]);
    assert_eq!(
        report.warnings,
        vec![
            ComputationWarning::ScoringFailed {
                failed: 1,
                attempted: 4,
            },
            ComputationWarning::OracleDisagreement {
                claimed: 130.0,
                nearest: Some(109.0),
            },
        ]
    );
    assert!(report.is_degraded());
}

#[tokio::test]
async fn skipped_oracle_still_completes() {
    let report = orchestrator(Ok(series_from("BTC-USD", &uptrend(60), 0.5)))
        .analyze(&request())
        .await
        .unwrap();
    assert_eq!(report.stage, AnalysisStage::Done);
    assert!(report.patterns.is_none());
    assert!(report.cross_checks.is_empty());
    assert_eq!(report.regime.regime, Regime::Trending);
}

#[tokio::test]
async fn fetch_failure_is_terminal() {
    let err = orchestrator(Err(CollaboratorError::Timeout))
        .analyze(&request())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AnalysisError::Collaborator {
            stage: AnalysisStage::Fetching,
            source: CollaboratorError::Timeout,
        }
    );
}

#[tokio::test]
async fn oracle_failure_is_terminal() {
    let oracle = Arc::new(FakeOracle {
        response: Err(CollaboratorError::MalformedOracle("missing field 'patterns'".into())),
        calls: AtomicUsize::new(0),
    });
    let err = orchestrator(Ok(series_from("BTC-USD", &oscillating(49), 1.0)))
        .with_oracle(oracle)
        .analyze(&request())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AnalysisError::Collaborator {
            stage: AnalysisStage::AwaitingOracle,
            source: CollaboratorError::MalformedOracle(_),
        }
    ));
}

#[tokio::test]
async fn short_history_fails_in_computing() {
    let oracle = Arc::new(FakeOracle {
        response: Ok(oracle_response()),
        calls: AtomicUsize::new(0),
    });
    let err = orchestrator(Ok(series_from("BTC-USD", &oscillating(20), 1.0)))
        .with_oracle(oracle.clone())
        .analyze(&request())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        AnalysisError::Data(DataError::InsufficientBars { needed: 34, got: 20 })
    );
    assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
}
