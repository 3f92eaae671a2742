use crate::collector::retry::with_retry;
use crate::collector::traits::{PostSource, PriceSource};
use crate::config::PriceSourceConfig;
use crate::model::{CollaboratorError, RawPost, Series};
use crate::parser::parse_chart;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) MarketLens/0.1";

pub fn build_client(timeout_seconds: u64) -> Result<Client, CollaboratorError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(CollaboratorError::from)
}

/// OHLCV bars from the Yahoo chart API.
pub struct YahooPriceSource {
    client: Client,
    config: PriceSourceConfig,
}

impl YahooPriceSource {
    pub fn new(config: PriceSourceConfig) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client(config.timeout_seconds)?,
            config,
        })
    }

    pub fn ticker(&self, symbol: &str) -> String {
        let symbol = symbol.trim().to_uppercase();
        match &self.config.quote_suffix {
            Some(suffix) if !symbol.ends_with(suffix.as_str()) => format!("{}{}", symbol, suffix),
            _ => symbol,
        }
    }

    fn build_url(&self, ticker: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), ticker)
    }

    async fn fetch_once(
        &self,
        ticker: &str,
        interval: &str,
        period: &str,
    ) -> Result<Series, CollaboratorError> {
        let response = self
            .client
            .get(self.build_url(ticker))
            .query(&[("interval", interval), ("range", period)])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CollaboratorError::Http(format!("{} for {}", status, ticker)));
        }
        parse_chart(ticker, &body)
    }
}

#[async_trait::async_trait]
impl PriceSource for YahooPriceSource {
    async fn fetch_series(
        &self,
        symbol: &str,
        interval: &str,
        period: &str,
    ) -> Result<Series, CollaboratorError> {
        let ticker = self.ticker(symbol);
        info!(ticker = %ticker, interval, period, "fetching price series");
        let series = with_retry(&ticker, self.config.max_retries, || {
            self.fetch_once(&ticker, interval, period)
        })
        .await?;
        debug!(ticker = %ticker, bars = series.len(), "price series fetched");
        Ok(series)
    }
}

/// Posts from per-symbol JSON endpoints returning an array of posts.
/// Symbols without a configured feed have no posts.
pub struct JsonFeedSource {
    client: Client,
    feeds: HashMap<String, String>,
    max_retries: u32,
}

impl JsonFeedSource {
    pub fn new(
        feeds: HashMap<String, String>,
        timeout_seconds: u64,
        max_retries: u32,
    ) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client(timeout_seconds)?,
            feeds,
            max_retries,
        })
    }

    async fn fetch_once(&self, url: &str, max_posts: usize) -> Result<Vec<RawPost>, CollaboratorError> {
        let response = self
            .client
            .get(url)
            .query(&[("limit", max_posts.to_string())])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CollaboratorError::Http(format!("{} from {}", status, url)));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Drops posts older than `hours_back` and keeps the newest `max_posts`.
pub fn recent_posts(mut posts: Vec<RawPost>, hours_back: u32, max_posts: usize) -> Vec<RawPost> {
    let cutoff = Utc::now() - ChronoDuration::hours(i64::from(hours_back));
    posts.retain(|p| p.timestamp > cutoff);
    posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    posts.truncate(max_posts);
    posts
}

#[async_trait::async_trait]
impl PostSource for JsonFeedSource {
    async fn fetch_posts(
        &self,
        symbol: &str,
        hours_back: u32,
        max_posts: usize,
    ) -> Result<Vec<RawPost>, CollaboratorError> {
        let Some(url) = self.feeds.get(symbol) else {
            debug!(symbol, "no post feed configured");
            return Ok(Vec::new());
        };
        let posts = with_retry(url, self.max_retries, || self.fetch_once(url, max_posts)).await?;
        let fetched = posts.len();
        let posts = recent_posts(posts, hours_back, max_posts);
        info!(symbol, fetched, kept = posts.len(), hours_back, "posts fetched");
        Ok(posts)
    }
}
