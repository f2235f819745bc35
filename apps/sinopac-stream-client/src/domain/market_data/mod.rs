//! Market Data Store
//!
//! In-memory table of the latest known fields for every instrument the
//! gateway has reported on, keyed by vendor instrument code (`AAPL.US`).
//!
//! # Merge Semantics
//!
//! Every fragment is folded into the existing record field by field. A
//! fragment only overwrites the fields it actually carries, so a snapshot
//! without a history series never erases a previously received trend, and
//! a trend never erases price/change/volume. The order in which snapshot
//! and trend fragments arrive does not matter for the populated fields.
//!
//! The table lives behind an `Arc` and is mutated copy-on-write, so
//! readers holding a [`MarketSnapshot`] never observe a partial update.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Markets and Instrument Codes
// =============================================================================

/// Exchange market an instrument code belongs to.
///
/// The gateway registers push subscriptions per market, so codes are
/// partitioned by this before a push request is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Market {
    /// United States equities (`.US`).
    #[serde(rename = "US")]
    Us,
    /// Hong Kong equities (`.HK`).
    #[serde(rename = "HK")]
    Hk,
    /// Taiwan equities (`.TW`).
    #[serde(rename = "TW")]
    Tw,
}

impl Market {
    /// Get all markets.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Us, Self::Hk, Self::Tw]
    }

    /// Get the wire name of the market (`US`, `HK`, `TW`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Hk => "HK",
            Self::Tw => "TW",
        }
    }

    /// Parse a market suffix, case-insensitively.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.trim().to_ascii_uppercase().as_str() {
            "US" => Some(Self::Us),
            "HK" => Some(Self::Hk),
            "TW" => Some(Self::Tw),
            _ => None,
        }
    }

    /// Determine the market of an instrument code such as `AAPL.US`.
    ///
    /// Returns `None` when the code has no suffix or an unknown one.
    #[must_use]
    pub fn of_code(code: &str) -> Option<Self> {
        let (ticker, suffix) = code.trim().rsplit_once('.')?;
        if ticker.is_empty() {
            return None;
        }
        Self::from_suffix(suffix)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codes grouped by market, plus the codes whose market could not be
/// determined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketPartition {
    /// Codes per market, in first-seen order with duplicates removed.
    pub by_market: BTreeMap<Market, Vec<String>>,
    /// Codes without a recognised market suffix.
    pub unrecognized: Vec<String>,
}

impl MarketPartition {
    /// Partition instrument codes by market.
    #[must_use]
    pub fn from_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut partition = Self::default();

        for code in codes {
            let code = code.as_ref().trim();
            if code.is_empty() {
                continue;
            }

            match Market::of_code(code) {
                Some(market) => {
                    let bucket = partition.by_market.entry(market).or_default();
                    if !bucket.iter().any(|c| c == code) {
                        bucket.push(code.to_string());
                    }
                }
                None => {
                    if !partition.unrecognized.iter().any(|c| c == code) {
                        partition.unrecognized.push(code.to_string());
                    }
                }
            }
        }

        partition
    }

    /// Check if no code was recognised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_market.is_empty()
    }
}

// =============================================================================
// Fragments
// =============================================================================

/// Snapshot fragment for one instrument, as carried by `quote` responses and
/// unsolicited `sync` pushes.
///
/// Every numeric field is optional; a missing field leaves the stored value
/// untouched. Fields the client does not model are kept in `extra`.
///
/// The vendor may send `price` next to `closePrice`; use
/// [`QuoteFragment::from_value`] so the secondary keys only fill in what the
/// primary ones leave empty.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QuoteFragment {
    /// Vendor instrument code.
    #[serde(default)]
    pub code: String,

    /// Last traded price.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,

    /// Percentage change versus the previous close.
    #[serde(
        default,
        rename = "limitUpDown",
        deserialize_with = "lenient_decimal"
    )]
    pub change_percent: Option<Decimal>,

    /// Traded volume.
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub volume: Option<Decimal>,

    /// Fields not modelled explicitly (name, open, high, low, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Keys read for the price when `price` itself is absent, in order.
const PRICE_FALLBACK_KEYS: &[&str] = &["closePrice", "lastPrice"];

/// Keys read for the change when `limitUpDown` is absent.
const CHANGE_FALLBACK_KEYS: &[&str] = &["changePercent"];

impl QuoteFragment {
    /// Decode one instrument object.
    ///
    /// `closePrice`/`lastPrice` and `changePercent` stay in `extra` and are
    /// only used when the primary field is missing or blank.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object or `code` is not a
    /// string.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut fragment = Self::deserialize(value)?;
        if fragment.price.is_none() {
            fragment.price = fragment.first_extra_decimal(PRICE_FALLBACK_KEYS);
        }
        if fragment.change_percent.is_none() {
            fragment.change_percent = fragment.first_extra_decimal(CHANGE_FALLBACK_KEYS);
        }
        Ok(fragment)
    }

    fn first_extra_decimal(&self, keys: &[&str]) -> Option<Decimal> {
        keys.iter()
            .filter_map(|key| self.extra.get(*key))
            .find_map(decimal_from_value)
    }

    /// Create an empty fragment for a code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Set the price.
    #[must_use]
    pub const fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// Set the percentage change.
    #[must_use]
    pub const fn with_change_percent(mut self, change: Decimal) -> Self {
        self.change_percent = Some(change);
        self
    }

    /// Set the volume.
    #[must_use]
    pub const fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// Parse a decimal from a JSON number or string, mapping blanks and
/// placeholders such as `"--"` to `None` instead of failing the frame.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(decimal_from_value))
}

/// Convert a JSON scalar to a decimal.
#[must_use]
pub fn decimal_from_value(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => parse_decimal(&n.to_string()),
        serde_json::Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// Parse a decimal string, accepting scientific notation and `+` signs.
#[must_use]
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let trimmed = text.trim().trim_start_matches('+');
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

// =============================================================================
// Instrument Quote
// =============================================================================

/// Latest known fields for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstrumentQuote {
    /// Vendor instrument code.
    pub code: String,
    /// Last traded price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    /// Percentage change versus the previous close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<Decimal>,
    /// Traded volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
    /// Historical closing prices, oldest first. Absent until a trend arrives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Decimal>>,
    /// Unmodelled vendor fields.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
    /// Time of the last merge into this record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl InstrumentQuote {
    /// Create an empty record for a code.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Fold a snapshot fragment into this record.
    pub fn apply_snapshot(&mut self, fragment: QuoteFragment, at: DateTime<Utc>) {
        if let Some(price) = fragment.price {
            self.price = Some(price);
        }
        if let Some(change) = fragment.change_percent {
            self.change_percent = Some(change);
        }
        if let Some(volume) = fragment.volume {
            self.volume = Some(volume);
        }
        self.extra.extend(fragment.extra);
        self.updated_at = Some(at);
    }

    /// Replace the history series, leaving every other field untouched.
    pub fn apply_history(&mut self, closes: Vec<Decimal>, at: DateTime<Utc>) {
        self.history = Some(closes);
        self.updated_at = Some(at);
    }
}

// =============================================================================
// Market Data Store
// =============================================================================

/// Immutable view of the store handed to readers.
pub type MarketSnapshot = Arc<BTreeMap<String, InstrumentQuote>>;

/// Single-writer market data table.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use rust_decimal::Decimal;
/// use sinopac_stream_client::domain::market_data::{MarketDataStore, QuoteFragment};
///
/// let mut store = MarketDataStore::new();
/// store.merge_snapshot(QuoteFragment::new("AAPL.US").with_price(Decimal::new(18950, 2)), Utc::now());
/// store.merge_history("AAPL.US", vec![Decimal::new(188, 0), Decimal::new(189, 0)], Utc::now());
///
/// let quote = store.get("AAPL.US").unwrap();
/// assert_eq!(quote.price, Some(Decimal::new(18950, 2)));
/// assert_eq!(quote.history.as_ref().map(Vec::len), Some(2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MarketDataStore {
    quotes: MarketSnapshot,
    generation: u64,
}

impl MarketDataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a snapshot fragment.
    ///
    /// Returns `false` (and changes nothing) when the fragment has no code.
    pub fn merge_snapshot(&mut self, fragment: QuoteFragment, at: DateTime<Utc>) -> bool {
        let code = fragment.code.trim().to_string();
        if code.is_empty() {
            return false;
        }

        Arc::make_mut(&mut self.quotes)
            .entry(code.clone())
            .or_insert_with(|| InstrumentQuote::new(code))
            .apply_snapshot(fragment, at);
        self.generation += 1;
        true
    }

    /// Merge a history series for one instrument.
    ///
    /// Returns `false` (and changes nothing) when the code is empty.
    pub fn merge_history(&mut self, code: &str, closes: Vec<Decimal>, at: DateTime<Utc>) -> bool {
        let code = code.trim();
        if code.is_empty() {
            return false;
        }

        Arc::make_mut(&mut self.quotes)
            .entry(code.to_string())
            .or_insert_with(|| InstrumentQuote::new(code))
            .apply_history(closes, at);
        self.generation += 1;
        true
    }

    /// Get the record for a code.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&InstrumentQuote> {
        self.quotes.get(code)
    }

    /// Number of tracked instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Check if no instrument is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Cheap immutable snapshot of the whole table.
    #[must_use]
    pub fn snapshot(&self) -> MarketSnapshot {
        Arc::clone(&self.quotes)
    }

    /// Monotonic counter bumped on every successful merge.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Drop every record (full client reset).
    pub fn clear(&mut self) {
        if !self.quotes.is_empty() {
            self.quotes = Arc::default();
            self.generation += 1;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn at() -> DateTime<Utc> {
        Utc::now()
    }

    #[test_case("AAPL.US", Some(Market::Us))]
    #[test_case("0700.hk", Some(Market::Hk))]
    #[test_case("2330.TW", Some(Market::Tw))]
    #[test_case("AAPL", None)]
    #[test_case(".US", None)]
    #[test_case("AAPL.XX", None)]
    fn market_of_code(code: &str, expected: Option<Market>) {
        assert_eq!(Market::of_code(code), expected);
    }

    #[test]
    fn partition_groups_and_dedups() {
        let partition =
            MarketPartition::from_codes(["AAPL.US", "0700.HK", "NVDA.US", "AAPL.US", "BAD", ""]);

        assert_eq!(
            partition.by_market.get(&Market::Us),
            Some(&vec!["AAPL.US".to_string(), "NVDA.US".to_string()])
        );
        assert_eq!(
            partition.by_market.get(&Market::Hk),
            Some(&vec!["0700.HK".to_string()])
        );
        assert_eq!(partition.unrecognized, vec!["BAD".to_string()]);
    }

    #[test]
    fn fragment_falls_back_to_close_price() {
        let fragment = QuoteFragment::from_value(&serde_json::json!(
            {"code":"AAPL.US","closePrice":"189.50","limitUpDown":"-1.25","volume":120033,"name":"Apple"}
        ))
        .unwrap();

        assert_eq!(fragment.code, "AAPL.US");
        assert_eq!(fragment.price, Some(Decimal::new(18950, 2)));
        assert_eq!(fragment.change_percent, Some(Decimal::new(-125, 2)));
        assert_eq!(fragment.volume, Some(Decimal::new(120_033, 0)));
        assert_eq!(fragment.extra.get("name"), Some(&serde_json::json!("Apple")));
    }

    #[test]
    fn fragment_prefers_price_over_close_price() {
        let fragment = QuoteFragment::from_value(&serde_json::json!({
            "code": "AAPL.US",
            "price": "190.1",
            "closePrice": "188.0",
            "changePercent": "0.8"
        }))
        .unwrap();

        assert_eq!(fragment.price, Some(Decimal::new(1901, 1)));
        assert_eq!(fragment.change_percent, Some(Decimal::new(8, 1)));
        assert_eq!(
            fragment.extra.get("closePrice"),
            Some(&serde_json::json!("188.0"))
        );
    }

    #[test]
    fn fragment_blank_price_uses_close_price() {
        let fragment = QuoteFragment::from_value(&serde_json::json!(
            {"code": "0700.HK", "price": "--", "closePrice": "380.2", "lastPrice": "379"}
        ))
        .unwrap();
        assert_eq!(fragment.price, Some(Decimal::new(3802, 1)));
    }

    #[test]
    fn fragment_rejects_non_string_code() {
        assert!(QuoteFragment::from_value(&serde_json::json!({"code": 7, "price": "1"})).is_err());
    }

    #[test]
    fn fragment_placeholder_values_become_none() {
        let fragment: QuoteFragment =
            serde_json::from_str(r#"{"code":"AAPL.US","price":"--","volume":""}"#).unwrap();
        assert!(fragment.price.is_none());
        assert!(fragment.volume.is_none());
    }

    #[test]
    fn parse_decimal_variants() {
        assert_eq!(parse_decimal("+1.5"), Some(Decimal::new(15, 1)));
        assert_eq!(parse_decimal(" 42 "), Some(Decimal::new(42, 0)));
        assert_eq!(parse_decimal("1e2"), Some(Decimal::new(100, 0)));
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("n/a"), None);
    }

    #[test]
    fn snapshot_merge_keeps_absent_fields() {
        let mut store = MarketDataStore::new();
        store.merge_snapshot(
            QuoteFragment::new("AAPL.US")
                .with_price(Decimal::new(100, 0))
                .with_volume(Decimal::new(5, 0)),
            at(),
        );
        store.merge_snapshot(
            QuoteFragment::new("AAPL.US").with_price(Decimal::new(101, 0)),
            at(),
        );

        let quote = store.get("AAPL.US").unwrap();
        assert_eq!(quote.price, Some(Decimal::new(101, 0)));
        assert_eq!(quote.volume, Some(Decimal::new(5, 0)));
    }

    #[test]
    fn later_snapshot_does_not_erase_history() {
        let mut store = MarketDataStore::new();
        store.merge_history("AAPL.US", vec![Decimal::ONE, Decimal::TWO], at());
        store.merge_snapshot(
            QuoteFragment::new("AAPL.US").with_price(Decimal::TEN),
            at(),
        );

        let quote = store.get("AAPL.US").unwrap();
        assert_eq!(quote.history, Some(vec![Decimal::ONE, Decimal::TWO]));
        assert_eq!(quote.price, Some(Decimal::TEN));
    }

    #[test]
    fn empty_code_is_ignored() {
        let mut store = MarketDataStore::new();
        assert!(!store.merge_snapshot(QuoteFragment::new("  "), at()));
        assert!(!store.merge_history("", vec![], at()));
        assert!(store.is_empty());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut store = MarketDataStore::new();
        store.merge_snapshot(QuoteFragment::new("AAPL.US").with_price(Decimal::ONE), at());
        let before = store.snapshot();

        store.merge_snapshot(QuoteFragment::new("AAPL.US").with_price(Decimal::TWO), at());

        assert_eq!(before.get("AAPL.US").unwrap().price, Some(Decimal::ONE));
        assert_eq!(store.get("AAPL.US").unwrap().price, Some(Decimal::TWO));
    }

    #[test]
    fn clear_resets_table() {
        let mut store = MarketDataStore::new();
        store.merge_snapshot(QuoteFragment::new("AAPL.US").with_price(Decimal::ONE), at());
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.generation(), 2);
    }

    proptest! {
        #[test]
        fn snapshot_and_trend_commute(
            price in 1i64..1_000_000,
            volume in 0i64..1_000_000,
            closes in proptest::collection::vec(1i64..100_000, 0..20),
        ) {
            let fragment = QuoteFragment::new("AAPL.US")
                .with_price(Decimal::new(price, 2))
                .with_volume(Decimal::new(volume, 0));
            let history: Vec<Decimal> = closes.iter().map(|c| Decimal::new(*c, 2)).collect();

            let mut snapshot_first = MarketDataStore::new();
            snapshot_first.merge_snapshot(fragment.clone(), at());
            snapshot_first.merge_history("AAPL.US", history.clone(), at());

            let mut trend_first = MarketDataStore::new();
            trend_first.merge_history("AAPL.US", history.clone(), at());
            trend_first.merge_snapshot(fragment, at());

            let a = snapshot_first.get("AAPL.US").unwrap();
            let b = trend_first.get("AAPL.US").unwrap();
            prop_assert_eq!(a.price, b.price);
            prop_assert_eq!(a.volume, b.volume);
            prop_assert_eq!(&a.history, &b.history);
            prop_assert_eq!(a.history.as_ref(), Some(&history));
        }
    }
}
