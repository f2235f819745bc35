//! AI Pick-List Contract
//!
//! The market summary produced by the generative-AI collaborator: a hot
//! sector label, a short narrative and a list of instrument picks. Only the
//! pick symbols are consumed by the client, which hands them to
//! `init_watch`.
//!
//! # Wire Format (JSON)
//! ```json
//! {
//!   "summary": "...",
//!   "hot_sector": "Semiconductors",
//!   "stocks": [
//!     { "symbol": "NVDA.US", "name": "Nvidia", "reason": "..." }
//!   ]
//! }
//! ```
//!
//! Model output frequently arrives wrapped in markdown code fences, which
//! [`parse_analysis`] strips before parsing.

use serde::{Deserialize, Serialize};

/// Errors from parsing a pick list.
#[derive(Debug, thiserror::Error)]
pub enum PicksError {
    /// Nothing left to parse after cleanup.
    #[error("empty analysis text")]
    Empty,

    /// The cleaned text is not a valid analysis object.
    #[error("invalid analysis JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One instrument pick with its rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPick {
    /// Vendor instrument code, e.g. `NVDA.US`.
    pub symbol: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Why the instrument was picked.
    #[serde(default)]
    pub reason: String,
}

/// Structured market summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    /// Short narrative summary.
    #[serde(default)]
    pub summary: String,
    /// Hottest sector label.
    #[serde(default)]
    pub hot_sector: String,
    /// Instrument picks.
    #[serde(default)]
    pub stocks: Vec<StockPick>,
}

impl MarketAnalysis {
    /// Distinct, non-empty pick symbols in pick order.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::with_capacity(self.stocks.len());
        for pick in &self.stocks {
            let symbol = pick.symbol.trim();
            if !symbol.is_empty() && !symbols.iter().any(|s| s == symbol) {
                symbols.push(symbol.to_string());
            }
        }
        symbols
    }
}

/// Parse model output into a [`MarketAnalysis`], stripping code fences.
///
/// # Errors
///
/// Returns `PicksError::Empty` for blank input and `PicksError::Json`
/// when the cleaned text is not a valid analysis object.
pub fn parse_analysis(text: &str) -> Result<MarketAnalysis, PicksError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(PicksError::Empty);
    }
    Ok(serde_json::from_str(&cleaned)?)
}

fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "summary": "AI capex keeps lifting chip names",
        "hot_sector": "Semiconductors",
        "stocks": [
            { "symbol": "NVDA.US", "name": "Nvidia", "reason": "Data center demand" },
            { "symbol": "AMD.US", "name": "AMD", "reason": "MI300 ramp" },
            { "symbol": "NVDA.US", "name": "Nvidia", "reason": "duplicate" }
        ]
    }"#;

    #[test]
    fn parses_plain_json() {
        let analysis = parse_analysis(SAMPLE).unwrap();
        assert_eq!(analysis.hot_sector, "Semiconductors");
        assert_eq!(analysis.stocks.len(), 3);
    }

    #[test]
    fn strips_markdown_fences() {
        let fenced = format!("```json\n{SAMPLE}\n```");
        let analysis = parse_analysis(&fenced).unwrap();
        assert_eq!(analysis.symbols(), vec!["NVDA.US", "AMD.US"]);
    }

    #[test]
    fn blank_input_is_rejected() {
        assert!(matches!(parse_analysis("```\n```"), Err(PicksError::Empty)));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            parse_analysis("the market is up"),
            Err(PicksError::Json(_))
        ));
    }

    #[test]
    fn missing_optional_fields_default() {
        let analysis = parse_analysis(r#"{"stocks":[{"symbol":" TSLA.US "}]}"#).unwrap();
        assert!(analysis.summary.is_empty());
        assert_eq!(analysis.symbols(), vec!["TSLA.US"]);
    }
}
