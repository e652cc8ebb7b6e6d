use serde::{Deserialize, Serialize};
use std::fmt;

/// A tradable asset the bot knows how to buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Btc,
    Eth,
    Sol,
    Usdc,
}

impl Asset {
    pub fn code(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
            Asset::Sol => "SOL",
            Asset::Usdc => "USDC",
        }
    }

    /// Exchange-enforced minimum order size for this asset.
    pub fn min_quantity(&self) -> f64 {
        match self {
            Asset::Btc => 0.00005,
            Asset::Eth => 0.002,
            Asset::Sol => 0.02,
            Asset::Usdc => 5.0,
        }
    }

    /// Decimal places used when logging quantities.
    pub fn precision(&self) -> usize {
        match self {
            Asset::Btc => 8,
            Asset::Eth => 6,
            Asset::Sol => 4,
            Asset::Usdc => 2,
        }
    }

    pub fn pair(&self, funding: Currency) -> String {
        format!("{}/{}", self.code(), funding.code())
    }

    /// Resolve the asset named by a `buy<asset>` command suffix.
    pub fn from_command_suffix(suffix: &str) -> Option<Asset> {
        match suffix {
            "" | "btc" => Some(Asset::Btc),
            "eth" => Some(Asset::Eth),
            "sol" => Some(Asset::Sol),
            "usdc" => Some(Asset::Usdc),
            _ => None,
        }
    }

    pub fn all() -> [Asset; 4] {
        [Asset::Btc, Asset::Eth, Asset::Sol, Asset::Usdc]
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A concrete funding currency on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Eur,
    Usdc,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usdc => "USDC",
        }
    }

    /// Auto-selection considers currencies in this fixed order.
    pub fn priority_order() -> [Currency; 2] {
        [Currency::Eur, Currency::Usdc]
    }

    pub fn parse(token: &str) -> Option<Currency> {
        match token.to_ascii_uppercase().as_str() {
            "EUR" => Some(Currency::Eur),
            "USDC" => Some(Currency::Usdc),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// How an instruction chooses its funding currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingCurrency {
    Fixed(Currency),
    /// First currency in priority order whose balance clears the funding minimum.
    Auto,
}
