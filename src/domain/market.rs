use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market data field carried by a single tick push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketDataField {
    Last,
    Bid,
    Ask,
    High,
    Low,
    Close,
    Open,
    Volume,
    BidSize,
    AskSize,
    LastSize,
}

impl MarketDataField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketDataField::Last => "last",
            MarketDataField::Bid => "bid",
            MarketDataField::Ask => "ask",
            MarketDataField::High => "high",
            MarketDataField::Low => "low",
            MarketDataField::Close => "close",
            MarketDataField::Open => "open",
            MarketDataField::Volume => "volume",
            MarketDataField::BidSize => "bid_size",
            MarketDataField::AskSize => "ask_size",
            MarketDataField::LastSize => "last_size",
        }
    }

    /// Default field set requested when a subscription does not name any
    pub fn default_set() -> Vec<MarketDataField> {
        vec![
            MarketDataField::Last,
            MarketDataField::Bid,
            MarketDataField::Ask,
            MarketDataField::Close,
            MarketDataField::Volume,
        ]
    }
}

impl std::fmt::Display for MarketDataField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Incremental field update for one symbol, validated at the transport
/// boundary before any reducer sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataUpdate {
    pub symbol: String,
    pub field: MarketDataField,
    pub value: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl MarketDataUpdate {
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("tick update with empty symbol".to_string());
        }
        if self.value < Decimal::ZERO {
            return Err(format!(
                "tick update for {} carries negative {}: {}",
                self.symbol, self.field, self.value
            ));
        }
        Ok(())
    }
}

/// Latest known full state for one symbol, built by merging independent
/// field updates. A push carrying only one field never clears the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataSnapshot {
    pub symbol: String,
    pub last: Option<Decimal>,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub open: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub bid_size: Option<Decimal>,
    pub ask_size: Option<Decimal>,
    pub last_size: Option<Decimal>,
    pub change: Option<Decimal>,
    pub change_percent: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl MarketDataSnapshot {
    /// Empty snapshot, created lazily on the first update for a symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last: None,
            bid: None,
            ask: None,
            high: None,
            low: None,
            close: None,
            open: None,
            volume: None,
            bid_size: None,
            ask_size: None,
            last_size: None,
            change: None,
            change_percent: None,
            timestamp: Utc::now(),
        }
    }

    /// Merge one field into the snapshot. `change`/`change_percent` are
    /// recomputed whenever `last` or `close` moves.
    pub fn apply(&mut self, field: MarketDataField, value: Decimal, timestamp: DateTime<Utc>) {
        match field {
            MarketDataField::Last => self.last = Some(value),
            MarketDataField::Bid => self.bid = Some(value),
            MarketDataField::Ask => self.ask = Some(value),
            MarketDataField::High => self.high = Some(value),
            MarketDataField::Low => self.low = Some(value),
            MarketDataField::Close => self.close = Some(value),
            MarketDataField::Open => self.open = Some(value),
            MarketDataField::Volume => self.volume = Some(value),
            MarketDataField::BidSize => self.bid_size = Some(value),
            MarketDataField::AskSize => self.ask_size = Some(value),
            MarketDataField::LastSize => self.last_size = Some(value),
        }
        self.timestamp = timestamp;

        if matches!(field, MarketDataField::Last | MarketDataField::Close) {
            self.recompute_change();
        }
    }

    fn recompute_change(&mut self) {
        match (self.last, self.close) {
            (Some(last), Some(close)) if !close.is_zero() => {
                let change = last - close;
                self.change = Some(change);
                self.change_percent = Some(change / close * Decimal::from(100));
            }
            _ => {
                self.change = None;
                self.change_percent = None;
            }
        }
    }

    /// Mid price from the current quote, when both sides are present
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Best available price for valuation: last trade, then quote mid,
    /// then prior close
    pub fn current_price(&self) -> Option<Decimal> {
        self.last.or_else(|| self.mid_price()).or(self.close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fields_merge_independently() {
        let mut snap = MarketDataSnapshot::new("AAPL");
        let now = Utc::now();

        snap.apply(MarketDataField::Last, dec!(150.25), now);
        snap.apply(MarketDataField::Ask, dec!(150.30), now);

        // An ask-only push must not clear last
        assert_eq!(snap.last, Some(dec!(150.25)));
        assert_eq!(snap.ask, Some(dec!(150.30)));
        assert_eq!(snap.bid, None);
    }

    #[test]
    fn test_change_recomputed_on_last_and_close() {
        let mut snap = MarketDataSnapshot::new("AAPL");
        let now = Utc::now();

        snap.apply(MarketDataField::Close, dec!(148.00), now);
        assert_eq!(snap.change, None);

        snap.apply(MarketDataField::Last, dec!(150.25), now);
        assert_eq!(snap.change, Some(dec!(2.25)));

        // (150.25 - 148.00) / 148.00 * 100 ≈ 1.52
        let pct = snap.change_percent.expect("change percent computed");
        assert!(pct > dec!(1.51) && pct < dec!(1.53));

        // A volume push must not disturb the derived values
        snap.apply(MarketDataField::Volume, dec!(100000), now);
        assert_eq!(snap.change, Some(dec!(2.25)));
    }

    #[test]
    fn test_change_cleared_when_close_is_zero() {
        let mut snap = MarketDataSnapshot::new("AAPL");
        let now = Utc::now();

        snap.apply(MarketDataField::Last, dec!(150.25), now);
        snap.apply(MarketDataField::Close, Decimal::ZERO, now);
        assert_eq!(snap.change, None);
        assert_eq!(snap.change_percent, None);
    }

    #[test]
    fn test_current_price_fallback_chain() {
        let mut snap = MarketDataSnapshot::new("MSFT");
        let now = Utc::now();
        assert_eq!(snap.current_price(), None);

        snap.apply(MarketDataField::Close, dec!(310.00), now);
        assert_eq!(snap.current_price(), Some(dec!(310.00)));

        snap.apply(MarketDataField::Bid, dec!(311.00), now);
        snap.apply(MarketDataField::Ask, dec!(312.00), now);
        assert_eq!(snap.current_price(), Some(dec!(311.50)));

        snap.apply(MarketDataField::Last, dec!(311.75), now);
        assert_eq!(snap.current_price(), Some(dec!(311.75)));
    }

    #[test]
    fn test_update_validation() {
        let update = MarketDataUpdate {
            symbol: "".to_string(),
            field: MarketDataField::Last,
            value: dec!(1),
            timestamp: Utc::now(),
        };
        assert!(update.validate().is_err());

        let update = MarketDataUpdate {
            symbol: "AAPL".to_string(),
            field: MarketDataField::Bid,
            value: dec!(-1),
            timestamp: Utc::now(),
        };
        assert!(update.validate().is_err());
    }
}
