//! Price Feed Types

use serde::{Deserialize, Serialize};

/// A normalized price tick for one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTick {
    /// Market ticker.
    pub ticker: String,
    /// Last traded price.
    pub price: f64,
    /// Source timestamp (ms). Ticks older than the last processed
    /// timestamp for their market are dropped.
    pub timestamp: i64,
}

impl PriceTick {
    pub fn new(ticker: impl Into<String>, price: f64, timestamp: i64) -> Self {
        Self {
            ticker: ticker.into().to_uppercase(),
            price,
            timestamp,
        }
    }
}
