pub mod fetcher;
pub mod oracle;
pub mod retry;
pub mod traits;

pub use fetcher::{JsonFeedSource, YahooPriceSource};
pub use oracle::{CachedOracle, OpenRouterClient, OpenRouterOracle, OpenRouterScorer};
pub use traits::{PatternOracle, PostSource, PriceSource, SentimentScorer};
