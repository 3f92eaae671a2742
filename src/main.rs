use futures::future::join_all;
use market_lens::analyzer::{AnalysisOrchestrator, AnalyzerImpl};
use market_lens::collector::{
    CachedOracle, JsonFeedSource, OpenRouterClient, OpenRouterOracle, OpenRouterScorer,
    YahooPriceSource,
};
use market_lens::config::{AppConfig, SymbolConfig, load_config};
use market_lens::model::AnalysisRequest;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Set panic hook to log details about any panic
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Panic occurred: {:?}", panic_info);
    }));

    if dotenvy::dotenv().is_ok() {
        info!("Loaded environment from .env");
    }

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".into());
    let config: Arc<AppConfig> = match load_config(&config_path) {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("Config load error ({}): {}", config_path, e);
            return;
        }
    };

    let orchestrator = match build_orchestrator(&config) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            error!("Failed to initialize collaborators: {}", e);
            return;
        }
    };

    loop {
        info!("Symbols to analyze: {}", config.symbols.len());
        let tasks: Vec<_> = config
            .symbols
            .iter()
            .map(|symbol_cfg| process_symbol(symbol_cfg, orchestrator.clone()))
            .collect();
        join_all(tasks).await;

        if config.check_interval_seconds == 0 {
            break;
        }
        info!("Waiting {}s for the next pass...", config.check_interval_seconds);
        tokio::select! {
            _ = sleep(Duration::from_secs(config.check_interval_seconds)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested.");
                break;
            }
        }
    }
}

fn build_orchestrator(config: &AppConfig) -> Result<AnalysisOrchestrator, Box<dyn std::error::Error>> {
    let prices = Arc::new(YahooPriceSource::new(config.prices.clone())?);
    let feeds: HashMap<String, String> = config
        .symbols
        .iter()
        .filter_map(|s| s.feed_url.clone().map(|url| (s.symbol.clone(), url)))
        .collect();
    let posts = Arc::new(JsonFeedSource::new(
        feeds,
        config.prices.timeout_seconds,
        config.prices.max_retries,
    )?);
    let chat = OpenRouterClient::from_env(config.oracle.clone())?;
    let scorer = Arc::new(OpenRouterScorer::new(chat.clone()));

    let orchestrator = AnalysisOrchestrator::new(
        AnalyzerImpl::new(config.analysis.clone())?,
        prices,
        posts,
        scorer,
    );
    if !config.oracle.enabled {
        warn!("Pattern oracle disabled; reports will carry no pattern summary");
        return Ok(orchestrator);
    }
    let oracle = CachedOracle::new(OpenRouterOracle::new(chat), config.oracle.cache_ttl()?);
    Ok(orchestrator.with_oracle(Arc::new(oracle)))
}

async fn process_symbol(symbol_cfg: &SymbolConfig, orchestrator: Arc<AnalysisOrchestrator>) {
    let request = AnalysisRequest {
        symbol: symbol_cfg.symbol.clone(),
        interval: symbol_cfg.interval.clone(),
        period: symbol_cfg.period.clone(),
        hours_back: symbol_cfg.hours_back,
        max_posts: symbol_cfg.max_posts,
    };
    match orchestrator.analyze(&request).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => info!("Report for {}:\n{}", request.symbol, json),
            Err(e) => warn!("Report serialization failed for {}: {}", request.symbol, e),
        },
        Err(e) => warn!("Analysis failed for {}: {}", request.symbol, e),
    }
}
