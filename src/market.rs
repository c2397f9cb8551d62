use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("invalid market symbol: {0:?}")]
pub struct InvalidMarket(pub String);

/// A spot market symbol, e.g. `"ETH"` or `"BTC"`. Normalized to ASCII
/// uppercase so the registry key matches regardless of request casing.
///
/// Which symbols actually have a book is configuration; this type only
/// guards the shape of the string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Market(String);

impl Market {
    pub fn new(code: &str) -> Result<Self, InvalidMarket> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(InvalidMarket(code));
        }
        Ok(Market(code))
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl FromStr for Market {
    type Err = InvalidMarket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Market::new(s)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(Market::new(" eth ").unwrap().code(), "ETH");
        assert_eq!(Market::new("BTC").unwrap(), "btc".parse::<Market>().unwrap());
    }

    #[test]
    fn rejects_empty_and_non_alphanumeric() {
        assert!(Market::new("").is_err());
        assert!(Market::new("ETH-USD").is_err());
        assert!(Market::new("e t h").is_err());
    }
}
