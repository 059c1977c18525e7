//! Oracle symbol directory: maps `SYMBOL/USD` pairs to feed keys

use std::collections::HashMap;

use crate::QUOTE_CURRENCY;

/// Canonical form of an oracle feed id: lowercase hex without a `0x` prefix
pub fn normalize_feed_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_prefix = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    without_prefix.to_ascii_lowercase()
}

/// Lookup table from quote pair (e.g. `BTC/USD`) to feed key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDirectory {
    pairs: HashMap<String, String>,
}

impl FeedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(pair, feed_key)` entries. Pairs may carry an asset-class prefix
    /// (`Crypto.BTC/USD`), which is stripped.
    pub fn from_entries<I, P, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, K)>,
        P: AsRef<str>,
        K: AsRef<str>,
    {
        let mut directory = Self::new();
        for (pair, key) in entries {
            directory.insert(pair.as_ref(), key.as_ref());
        }
        directory
    }

    pub fn insert(&mut self, pair: &str, feed_key: &str) {
        let pair = match pair.split_once('.') {
            Some((_, rest)) => rest,
            None => pair,
        };
        self.pairs.insert(pair.trim().to_ascii_uppercase(), normalize_feed_key(feed_key));
    }

    /// Feed key for a constituent symbol, matched case-insensitively against `SYMBOL/USD`
    pub fn lookup(&self, symbol: &str) -> Option<&str> {
        let pair = format!("{}/{}", symbol.trim().to_ascii_uppercase(), QUOTE_CURRENCY);
        self.pairs.get(&pair).map(String::as_str)
    }

    /// Feed keys for a list of symbols, skipping symbols with no oracle feed
    pub fn resolve<'a, I>(&self, symbols: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        symbols.into_iter().filter_map(|s| self.lookup(s)).map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_feed_key() {
        assert_eq!(normalize_feed_key("0xE62DF6C8"), "e62df6c8");
        assert_eq!(normalize_feed_key("e62df6c8"), "e62df6c8");
        assert_eq!(normalize_feed_key(" 0XABCD "), "abcd");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let directory = FeedDirectory::from_entries([
            ("Crypto.BTC/USD", "0xAAA"),
            ("Crypto.ETH/USD", "bbb"),
        ]);

        assert_eq!(directory.len(), 2);
        assert_eq!(directory.lookup("btc"), Some("aaa"));
        assert_eq!(directory.lookup("ETH"), Some("bbb"));
        assert_eq!(directory.lookup("DOGE"), None);
    }

    #[test]
    fn test_resolve_skips_unknown_symbols() {
        let directory = FeedDirectory::from_entries([("BTC/USD", "aaa"), ("SOL/USD", "ccc")]);
        let keys = directory.resolve(["BTC", "XYZ", "sol"]);
        assert_eq!(keys, vec!["aaa".to_string(), "ccc".to_string()]);
    }
}
