// Yahoo chart API payload -> Series
use crate::model::{CollaboratorError, PriceBar, Series};
use crate::utils::from_unix_seconds;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Rows with any missing OHLC value are skipped; a missing volume counts as 0.
pub fn parse_chart(symbol: &str, body: &str) -> Result<Series, CollaboratorError> {
    let envelope: ChartEnvelope = serde_json::from_str(body)?;
    if let Some(err) = envelope.chart.error {
        return Err(CollaboratorError::InvalidResponse(format!(
            "{}: {}",
            err.code.unwrap_or_default(),
            err.description.unwrap_or_default()
        )));
    }
    let result = envelope
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| CollaboratorError::InvalidResponse("chart has no result".into()))?;
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| CollaboratorError::InvalidResponse("chart has no quote block".into()))?;

    let field = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();
    let mut skipped = 0usize;
    let mut bars = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let row = (
            from_unix_seconds(ts),
            field(&quote.open, i),
            field(&quote.high, i),
            field(&quote.low, i),
            field(&quote.close, i),
        );
        match row {
            (Some(timestamp), Some(open), Some(high), Some(low), Some(close)) => bars.push(PriceBar {
                timestamp,
                open,
                high,
                low,
                close,
                volume: field(&quote.volume, i).unwrap_or(0.0),
            }),
            _ => skipped += 1,
        }
    }
    debug!(symbol, bars = bars.len(), skipped, "chart parsed");

    Series::new(symbol, bars).map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_incomplete_rows() {
        let body = r#"{"chart": {"result": [{
            "timestamp": [1700000000, 1700086400, 1700172800],
            "indicators": {"quote": [{
                "open": [1.0, null, 3.0],
                "high": [1.5, 2.5, 3.5],
                "low": [0.5, 1.5, 2.5],
                "close": [1.2, 2.2, 3.2],
                "volume": [10, 20, null]
            }]}
        }], "error": null}}"#;
        let series = parse_chart("BTC-USD", body).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.closes(), vec![1.2, 3.2]);
        assert_eq!(series.bars()[1].volume, 0.0);
        assert_eq!(series.symbol(), "BTC-USD");
    }

    #[test]
    fn surfaces_api_errors() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found"}}}"#;
        let err = parse_chart("NOPE-USD", body).unwrap_err();
        assert_eq!(err, CollaboratorError::InvalidResponse("Not Found: No data found".into()));
    }

    #[test]
    fn empty_chart_is_invalid() {
        let body = r#"{"chart": {"result": [{"timestamp": [], "indicators": {"quote": [{}]}}], "error": null}}"#;
        assert!(matches!(
            parse_chart("X", body),
            Err(CollaboratorError::InvalidResponse(_))
        ));
    }
}
