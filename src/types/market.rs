//! Market Reference Data
//!
//! Immutable catalog of tradeable perpetual markets. Tickers, categories,
//! leverage caps, and tick sizes are fixed at build time; prices come from
//! the feed.

use serde::{Deserialize, Serialize};

/// Asset category for a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketCategory {
    Stocks,
    Commodities,
    Indices,
    Forex,
    Crypto,
}

impl MarketCategory {
    /// Maximum leverage allowed for markets in this category.
    pub fn max_leverage(&self) -> f64 {
        match self {
            MarketCategory::Stocks => 5.0,
            MarketCategory::Commodities => 10.0,
            MarketCategory::Indices => 10.0,
            MarketCategory::Forex => 20.0,
            MarketCategory::Crypto => 50.0,
        }
    }

    /// Parse a category filter string.
    pub fn parse(s: &str) -> Option<MarketCategory> {
        match s {
            "stocks" => Some(MarketCategory::Stocks),
            "commodities" => Some(MarketCategory::Commodities),
            "indices" => Some(MarketCategory::Indices),
            "forex" => Some(MarketCategory::Forex),
            "crypto" => Some(MarketCategory::Crypto),
            _ => None,
        }
    }
}

impl std::fmt::Display for MarketCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketCategory::Stocks => write!(f, "stocks"),
            MarketCategory::Commodities => write!(f, "commodities"),
            MarketCategory::Indices => write!(f, "indices"),
            MarketCategory::Forex => write!(f, "forex"),
            MarketCategory::Crypto => write!(f, "crypto"),
        }
    }
}

/// A tradeable perpetual market.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    /// Ticker symbol (e.g., "BTC", "TSLA", "GOLD").
    pub ticker: String,
    /// Human-readable name.
    pub name: String,
    /// Asset category.
    pub category: MarketCategory,
    /// Maximum leverage for this market.
    pub max_leverage: f64,
    /// Minimum price increment.
    pub tick_size: f64,
}

/// Static catalog rows: (ticker, name, category, tick size).
/// Leverage is the category cap for every listed market.
const CATALOG: &[(&str, &str, MarketCategory, f64)] = &[
    // Stocks
    ("TSLA", "Tesla", MarketCategory::Stocks, 0.01),
    ("NVDA", "NVIDIA", MarketCategory::Stocks, 0.01),
    ("AAPL", "Apple", MarketCategory::Stocks, 0.01),
    ("GOOGL", "Alphabet", MarketCategory::Stocks, 0.01),
    ("META", "Meta Platforms", MarketCategory::Stocks, 0.01),
    ("AMD", "Advanced Micro Devices", MarketCategory::Stocks, 0.01),
    ("MSFT", "Microsoft", MarketCategory::Stocks, 0.01),
    ("AMZN", "Amazon", MarketCategory::Stocks, 0.01),
    ("COIN", "Coinbase", MarketCategory::Stocks, 0.01),
    ("PLTR", "Palantir", MarketCategory::Stocks, 0.01),
    // Commodities
    ("GOLD", "Gold", MarketCategory::Commodities, 0.1),
    ("SILVER", "Silver", MarketCategory::Commodities, 0.001),
    ("OIL", "Crude Oil", MarketCategory::Commodities, 0.01),
    ("COPPER", "Copper", MarketCategory::Commodities, 0.0001),
    ("URANIUM", "Uranium", MarketCategory::Commodities, 0.01),
    ("NATGAS", "Natural Gas", MarketCategory::Commodities, 0.001),
    // Indices
    ("SPX", "S&P 500", MarketCategory::Indices, 0.25),
    ("JP225", "Nikkei 225", MarketCategory::Indices, 1.0),
    ("DXY", "US Dollar Index", MarketCategory::Indices, 0.001),
    // Forex
    ("EUR", "Euro / USD", MarketCategory::Forex, 0.00001),
    ("JPY", "USD / Japanese Yen", MarketCategory::Forex, 0.001),
    // Crypto
    ("BTC", "Bitcoin", MarketCategory::Crypto, 0.1),
    ("ETH", "Ethereum", MarketCategory::Crypto, 0.01),
    ("SOL", "Solana", MarketCategory::Crypto, 0.001),
    ("XRP", "XRP", MarketCategory::Crypto, 0.00001),
    ("DOGE", "Dogecoin", MarketCategory::Crypto, 0.000001),
    ("AVAX", "Avalanche", MarketCategory::Crypto, 0.001),
    ("LINK", "Chainlink", MarketCategory::Crypto, 0.0001),
    ("ARB", "Arbitrum", MarketCategory::Crypto, 0.0001),
    ("HYPE", "Hyperliquid", MarketCategory::Crypto, 0.001),
    ("SUI", "Sui", MarketCategory::Crypto, 0.0001),
];

impl Market {
    /// All listed markets.
    pub fn all() -> Vec<Market> {
        CATALOG
            .iter()
            .map(|(ticker, name, category, tick_size)| Market {
                ticker: (*ticker).to_string(),
                name: (*name).to_string(),
                category: *category,
                max_leverage: category.max_leverage(),
                tick_size: *tick_size,
            })
            .collect()
    }

    /// All markets in a category.
    pub fn in_category(category: MarketCategory) -> Vec<Market> {
        Market::all()
            .into_iter()
            .filter(|m| m.category == category)
            .collect()
    }

    /// All non-crypto markets (stocks + commodities + indices + forex).
    pub fn real_world_assets() -> Vec<Market> {
        Market::all()
            .into_iter()
            .filter(|m| m.category != MarketCategory::Crypto)
            .collect()
    }

    /// Look up a market by ticker, case-insensitive.
    pub fn find(ticker: &str) -> Option<Market> {
        let upper = ticker.to_uppercase();
        Market::all().into_iter().find(|m| m.ticker == upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_lookup_case_insensitive() {
        let market = Market::find("btc").unwrap();
        assert_eq!(market.ticker, "BTC");
        assert_eq!(market.category, MarketCategory::Crypto);
        assert_eq!(market.max_leverage, 50.0);
    }

    #[test]
    fn test_unknown_ticker() {
        assert!(Market::find("NOPE").is_none());
    }

    #[test]
    fn test_category_caps() {
        assert_eq!(Market::find("TSLA").unwrap().max_leverage, 5.0);
        assert_eq!(Market::find("GOLD").unwrap().max_leverage, 10.0);
        assert_eq!(Market::find("EUR").unwrap().max_leverage, 20.0);
    }

    #[test]
    fn test_rwa_excludes_crypto() {
        let rwa = Market::real_world_assets();
        assert!(!rwa.is_empty());
        assert!(rwa.iter().all(|m| m.category != MarketCategory::Crypto));
    }
}
