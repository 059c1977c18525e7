use index_core::{ConstituentId, ConstituentRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{MarketDataError, Result};

/// Provider-neutral listing of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    pub id: ConstituentId,
    pub name: String,
    pub symbol: String,
    pub price: f64,
    pub market_cap: f64,
    pub tags: Vec<String>,
}

impl MarketListing {
    pub fn to_constituent(&self) -> ConstituentRef {
        ConstituentRef {
            id: self.id,
            symbol: self.symbol.clone(),
            name: self.name.clone(),
            reference_price: self.price,
            reference_market_cap: self.market_cap,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// CoinMarketCap response envelope
#[derive(Debug, Deserialize)]
pub struct CmcResponse {
    pub status: CmcStatus,
    #[serde(default)]
    pub data: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct CmcStatus {
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// CoinMarketCap `listings/latest` entry
#[derive(Debug, Deserialize)]
pub struct CmcListing {
    pub id: ConstituentId,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    pub quote: HashMap<String, CmcQuote>,
}

#[derive(Debug, Deserialize)]
pub struct CmcQuote {
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
}

/// Decode a `listings/latest` body. Entries that fail to decode or lack a quote in the
/// requested currency are dropped individually.
pub fn parse_cmc_listings(body: &str, convert: &str) -> Result<Vec<MarketListing>> {
    let response: CmcResponse = serde_json::from_str(body)?;

    if response.status.error_code != 0 {
        return Err(MarketDataError::Api {
            code: response.status.error_code,
            message: response.status.error_message.unwrap_or_default(),
        });
    }

    let mut listings = Vec::new();
    for raw in response.data.unwrap_or_default() {
        let listing: CmcListing = match serde_json::from_value(raw) {
            Ok(listing) => listing,
            Err(e) => {
                debug!("Dropping undecodable listing: {}", e);
                continue;
            }
        };

        let quote = match listing.quote.get(convert) {
            Some(quote) => quote,
            None => {
                debug!("Dropping listing {} without a {} quote", listing.symbol, convert);
                continue;
            }
        };

        match (quote.price, quote.market_cap) {
            (Some(price), Some(market_cap)) if price.is_finite() && market_cap.is_finite() => {
                listings.push(MarketListing {
                    id: listing.id,
                    name: listing.name,
                    symbol: listing.symbol,
                    price,
                    market_cap,
                    tags: listing.tags.unwrap_or_default(),
                });
            }
            _ => debug!("Dropping listing {} with incomplete quote", listing.symbol),
        }
    }

    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "status": {"timestamp": "2024-01-01T00:00:00Z", "error_code": 0, "error_message": null},
        "data": [
            {"id": 1, "name": "Bitcoin", "symbol": "BTC", "tags": ["mineable"],
             "quote": {"USD": {"price": 50000.0, "market_cap": 1000000000000.0}}},
            {"id": 825, "name": "Tether USDt", "symbol": "USDT", "tags": ["stablecoin"],
             "quote": {"USD": {"price": 1.0, "market_cap": 90000000000.0}}},
            {"id": "bad", "name": "Broken", "symbol": "BRK", "quote": {}},
            {"id": 5, "name": "NoQuote", "symbol": "NQ", "tags": null,
             "quote": {"EUR": {"price": 1.0, "market_cap": 1.0}}},
            {"id": 6, "name": "NullCap", "symbol": "NC", "quote": {"USD": {"price": 1.0, "market_cap": null}}}
        ]
    }"#;

    #[test]
    fn test_parse_listings() {
        let listings = parse_cmc_listings(BODY, "USD").unwrap();

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].symbol, "BTC");
        assert_eq!(listings[0].market_cap, 1e12);
        assert!(listings[1].has_tag("Stablecoin"));

        let constituent = listings[0].to_constituent();
        assert_eq!(constituent.circulating_supply(), 2e7);
    }

    #[test]
    fn test_parse_provider_error() {
        let body = r#"{"status": {"error_code": 1002, "error_message": "API key missing."}}"#;
        match parse_cmc_listings(body, "USD") {
            Err(MarketDataError::Api { code, message }) => {
                assert_eq!(code, 1002);
                assert_eq!(message, "API key missing.");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
