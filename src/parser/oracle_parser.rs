// Parsing of free-form model replies: oracle JSON and per-post sentiment scores
use crate::model::{CollaboratorError, OracleResponse};
use crate::utils::{outer_json_object, strip_code_fences};
use serde_json::Value;

const REQUIRED_FIELDS: [&str; 4] = ["patterns", "quality_score", "completion", "reliability"];

const SCORE_MARKERS: [&str; 4] = ["score:", "score is:", "sentiment:", "rating:"];
const POSITIVE_WORDS: [&str; 5] = ["bullish", "positive", "optimistic", "growth", "gain"];
const NEGATIVE_WORDS: [&str; 5] = ["bearish", "negative", "pessimistic", "decline", "loss"];

const THEMES: [(&str, [&str; 5]); 5] = [
    ("bullish", ["bullish", "uptrend", "growth", "rally", "surge"]),
    ("bearish", ["bearish", "downtrend", "decline", "dump", "crash"]),
    ("momentum", ["momentum", "volume", "breakout", "resistance", "support"]),
    ("fundamental", ["adoption", "development", "partnership", "news", "update"]),
    ("risk", ["risk", "volatile", "uncertainty", "caution", "warning"]),
];

/// Shape-checks the oracle's reply. Only structure is validated here; the
/// numbers themselves are cross-checked later against locally detected levels.
pub fn parse_oracle_response(content: &str) -> Result<OracleResponse, CollaboratorError> {
    let cleaned = strip_code_fences(content);
    let value: Value = match serde_json::from_str(cleaned) {
        Ok(v) => v,
        Err(_) => {
            let inner = outer_json_object(cleaned).ok_or_else(|| {
                CollaboratorError::MalformedOracle("reply contains no JSON object".into())
            })?;
            serde_json::from_str(inner)
                .map_err(|e| CollaboratorError::MalformedOracle(e.to_string()))?
        }
    };

    let object = value
        .as_object()
        .ok_or_else(|| CollaboratorError::MalformedOracle("reply is not a JSON object".into()))?;
    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
        return Err(CollaboratorError::MalformedOracle(format!(
            "missing field '{}'",
            missing
        )));
    }
    if !object["quality_score"].is_number() {
        return Err(CollaboratorError::MalformedOracle(
            "quality_score is not numeric".into(),
        ));
    }

    serde_json::from_value(value).map_err(|e| CollaboratorError::MalformedOracle(e.to_string()))
}

/// Reads the score from the last `score:`-style line; falls back to counting
/// bullish and bearish keywords when no such line parses.
pub fn extract_score(analysis: &str) -> f64 {
    explicit_score(analysis).unwrap_or_else(|| keyword_score(analysis))
}

fn explicit_score(analysis: &str) -> Option<f64> {
    let line = analysis
        .lines()
        .rev()
        .find(|line| {
            let lower = line.to_lowercase();
            SCORE_MARKERS.iter().any(|m| lower.contains(m))
        })?;
    let tail = line.rsplit(':').next()?.trim();
    let token = tail.split_whitespace().next()?;
    let token = token.split('/').next()?;
    let token = token.trim_matches(|c: char| !(c.is_ascii_digit() || c == '-' || c == '+' || c == '.'));
    let token = token.trim_end_matches('.');
    token.parse::<f64>().ok().filter(|s| s.is_finite())
}

/// Themes mentioned by at least `min_occurrences` analyses, in fixed theme order.
/// Returns `["neutral"]` when none recurs.
pub fn extract_themes<S: AsRef<str>>(analyses: &[S], min_occurrences: usize) -> Vec<String> {
    let lowered: Vec<String> = analyses.iter().map(|a| a.as_ref().to_lowercase()).collect();
    let themes: Vec<String> = THEMES
        .iter()
        .filter(|(_, keywords)| {
            let hits = lowered
                .iter()
                .filter(|text| keywords.iter().any(|k| text.contains(k)))
                .count();
            hits >= min_occurrences
        })
        .map(|(theme, _)| theme.to_string())
        .collect();
    if themes.is_empty() {
        vec!["neutral".to_string()]
    } else {
        themes
    }
}

fn keyword_score(analysis: &str) -> f64 {
    let lower = analysis.to_lowercase();
    let positive: usize = POSITIVE_WORDS.iter().map(|w| lower.matches(w).count()).sum();
    let negative: usize = NEGATIVE_WORDS.iter().map(|w| lower.matches(w).count()).sum();
    let total = positive + negative;
    if total == 0 {
        return 0.0;
    }
    (positive as f64 - negative as f64) / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_reply() {
        let reply = "```json\n{\"patterns\": [\"double bottom\"], \"quality_score\": 72, \
                     \"completion\": 80, \"reliability\": \"medium\", \
                     \"price_targets\": [105.5], \"key_levels\": [98.0, 101.0]}\n```";
        let parsed = parse_oracle_response(reply).unwrap();
        assert_eq!(parsed.patterns, vec!["double bottom".to_string()]);
        assert_eq!(parsed.quality_score, 72.0);
        assert_eq!(parsed.key_levels, vec![98.0, 101.0]);
        assert_eq!(parsed.support_level, None);
    }

    #[test]
    fn tolerates_prose_around_the_object() {
        let reply = "Here is the analysis: {\"patterns\": [], \"quality_score\": 10, \
                     \"completion\": null, \"reliability\": \"low\"} hope it helps";
        let parsed = parse_oracle_response(reply).unwrap();
        assert!(parsed.patterns.is_empty());
        assert_eq!(parsed.completion, None);
        assert!(parsed.price_targets.is_empty());
    }

    #[test]
    fn rejects_missing_fields_and_non_numeric_scores() {
        let missing = parse_oracle_response("{\"patterns\": [], \"quality_score\": 5}");
        assert!(matches!(missing, Err(CollaboratorError::MalformedOracle(m)) if m.contains("completion")));

        let textual = parse_oracle_response(
            "{\"patterns\": [], \"quality_score\": \"high\", \"completion\": 1, \"reliability\": \"x\"}",
        );
        assert!(matches!(textual, Err(CollaboratorError::MalformedOracle(_))));

        assert!(parse_oracle_response("not json").is_err());
    }

    #[test]
    fn score_line_wins_over_keywords() {
        let text = "Step 1: bearish tone overall.\nFinal sentiment score: 0.65";
        assert_eq!(extract_score(text), 0.65);
        assert_eq!(extract_score("Rating: **-0.4**"), -0.4);
        assert_eq!(extract_score("Score: 0.8/1"), 0.8);
    }

    #[test]
    fn keyword_fallback() {
        assert_eq!(extract_score("Very bullish, strong growth, minor loss"), 1.0 / 3.0);
        assert_eq!(extract_score("nothing to see"), 0.0);
    }

    #[test]
    fn themes_need_two_mentions() {
        let analyses = [
            "Strong rally on rising volume, bullish setup.",
            "Breakout above resistance; uptrend intact.",
            "Some caution: a dump is possible.",
        ];
        assert_eq!(extract_themes(&analyses, 2), vec!["bullish", "momentum"]);
        assert_eq!(extract_themes(&analyses, 1), vec!["bullish", "bearish", "momentum", "risk"]);
        assert_eq!(extract_themes(&["Nothing much happening."], 2), vec!["neutral"]);
        assert_eq!(extract_themes::<&str>(&[], 2), vec!["neutral"]);
    }
}
