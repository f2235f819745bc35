//! Push Subscription Watchlist
//!
//! Tracks which instrument codes are registered for push updates, per
//! market. A fresh connection starts without any gateway-side
//! registration, so the watchlist is what gets replayed after every
//! successful re-authentication.

use std::collections::BTreeMap;

use super::market_data::Market;

/// Codes registered for push updates, grouped by market.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watchlist {
    by_market: BTreeMap<Market, Vec<String>>,
}

impl Watchlist {
    /// Create an empty watchlist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add codes to a market (additive registration).
    ///
    /// Returns the codes that were not already registered.
    pub fn add(&mut self, market: Market, codes: &[String]) -> Vec<String> {
        let entry = self.by_market.entry(market).or_default();
        let mut added = Vec::new();

        for code in codes {
            if !entry.contains(code) {
                entry.push(code.clone());
                added.push(code.clone());
            }
        }

        added
    }

    /// Replace every code registered for a market (replacing registration).
    pub fn replace(&mut self, market: Market, codes: &[String]) {
        let mut unique: Vec<String> = Vec::with_capacity(codes.len());
        for code in codes {
            if !unique.contains(code) {
                unique.push(code.clone());
            }
        }

        if unique.is_empty() {
            self.by_market.remove(&market);
        } else {
            self.by_market.insert(market, unique);
        }
    }

    /// Codes registered for a market.
    #[must_use]
    pub fn codes(&self, market: Market) -> &[String] {
        self.by_market.get(&market).map_or(&[][..], Vec::as_slice)
    }

    /// Iterate non-empty registrations per market.
    pub fn iter(&self) -> impl Iterator<Item = (Market, &[String])> {
        self.by_market
            .iter()
            .filter(|(_, codes)| !codes.is_empty())
            .map(|(market, codes)| (*market, codes.as_slice()))
    }

    /// Check if a code is registered.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.by_market.values().any(|codes| codes.iter().any(|c| c == code))
    }

    /// Total number of registered codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_market.values().map(Vec::len).sum()
    }

    /// Check if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every registration.
    pub fn clear(&mut self) {
        self.by_market.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn add_is_additive_and_reports_new_codes() {
        let mut watchlist = Watchlist::new();
        let added = watchlist.add(Market::Us, &codes(&["AAPL.US", "NVDA.US"]));
        assert_eq!(added, codes(&["AAPL.US", "NVDA.US"]));

        let added = watchlist.add(Market::Us, &codes(&["NVDA.US", "TSLA.US"]));
        assert_eq!(added, codes(&["TSLA.US"]));
        assert_eq!(
            watchlist.codes(Market::Us),
            codes(&["AAPL.US", "NVDA.US", "TSLA.US"]).as_slice()
        );
    }

    #[test]
    fn replace_drops_previous_codes() {
        let mut watchlist = Watchlist::new();
        watchlist.add(Market::Us, &codes(&["AAPL.US", "NVDA.US"]));
        watchlist.add(Market::Hk, &codes(&["0700.HK"]));

        watchlist.replace(Market::Us, &codes(&["MSFT.US", "MSFT.US"]));

        assert_eq!(watchlist.codes(Market::Us), codes(&["MSFT.US"]).as_slice());
        assert!(watchlist.contains("0700.HK"));
        assert!(!watchlist.contains("AAPL.US"));
        assert_eq!(watchlist.len(), 2);
    }

    #[test]
    fn replace_with_nothing_removes_market() {
        let mut watchlist = Watchlist::new();
        watchlist.add(Market::Hk, &codes(&["0700.HK"]));
        watchlist.replace(Market::Hk, &[]);
        assert!(watchlist.is_empty());
        assert_eq!(watchlist.iter().count(), 0);
    }

    #[test]
    fn iter_orders_by_market() {
        let mut watchlist = Watchlist::new();
        watchlist.add(Market::Tw, &codes(&["2330.TW"]));
        watchlist.add(Market::Us, &codes(&["AAPL.US"]));

        let markets: Vec<Market> = watchlist.iter().map(|(m, _)| m).collect();
        assert_eq!(markets, vec![Market::Us, Market::Tw]);
    }
}
