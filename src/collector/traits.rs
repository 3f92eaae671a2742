use crate::model::{CollaboratorError, OracleResponse, RawPost, ScoredText, Series};

#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_series(
        &self,
        symbol: &str,
        interval: &str,
        period: &str,
    ) -> Result<Series, CollaboratorError>;
}

#[async_trait::async_trait]
pub trait PostSource: Send + Sync {
    /// Posts about `symbol` from the last `hours_back` hours, at most `max_posts` of them.
    async fn fetch_posts(
        &self,
        symbol: &str,
        hours_back: u32,
        max_posts: usize,
    ) -> Result<Vec<RawPost>, CollaboratorError>;
}

#[async_trait::async_trait]
pub trait SentimentScorer: Send + Sync {
    /// Sentiment of one text, nominally in [-1, 1], with the reasoning behind it.
    async fn score(&self, text: &str) -> Result<ScoredText, CollaboratorError>;
}

#[async_trait::async_trait]
pub trait PatternOracle: Send + Sync {
    async fn recognize(&self, prompt: &str) -> Result<OracleResponse, CollaboratorError>;
}
