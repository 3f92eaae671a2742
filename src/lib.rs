pub mod analyzer;
pub mod collector;
pub mod config;
pub mod model;
pub mod normalizer;
pub mod parser;
pub mod utils;

pub use analyzer::{
    aggregate_sentiment, classify_regime, compute_indicators, detect_levels, run_analysis,
};
