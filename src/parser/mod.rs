pub mod chart_parser;
pub mod oracle_parser;

pub use chart_parser::parse_chart;
pub use oracle_parser::{extract_score, extract_themes, parse_oracle_response};
