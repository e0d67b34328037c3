use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// An asset symbol such as `BTC` or `USDT`, always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Asset(String);

impl Asset {
    /// Symbols shorter than this are rejected.
    pub const MIN_LEN: usize = 2;

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Asset {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < Self::MIN_LEN {
            return Err(EngineError::Validation(format!(
                "asset symbol `{}` must be at least {} characters",
                s,
                Self::MIN_LEN
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(EngineError::Validation(format!(
                "asset symbol `{}` must be alphanumeric",
                s
            )));
        }
        Ok(Asset(s.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for Asset {
    type Error = EngineError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Asset> for String {
    fn from(a: Asset) -> Self {
        a.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

//A Trading pair: base/quote
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    /// The asset you buy or sell
    pub base: Asset,
    /// The asset you pay or receive
    pub quote: Asset,
}

impl Pair {
    pub fn new(base: Asset, quote: Asset) -> Self {
        Pair { base, quote }
    }

    /// Returns the canonical code, e.g "BTC/USDT"
    pub fn code(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// URL-safe form used in paths, e.g "BTC-USDT"
    pub fn path_code(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }
}

/// Accepts `BASE/QUOTE`; `-` and `_` are allowed as separators so pairs can
/// travel inside a single URL path segment.
impl FromStr for Pair {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(['/', '-', '_']);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) => {
                let base: Asset = base.parse()?;
                let quote: Asset = quote.parse()?;
                if base == quote {
                    return Err(EngineError::Validation(format!(
                        "pair `{}` must have distinct base and quote",
                        s
                    )));
                }
                Ok(Pair { base, quote })
            }
            _ => Err(EngineError::Validation(format!(
                "invalid trading pair `{}`, expected BASE/QUOTE",
                s
            ))),
        }
    }
}

impl TryFrom<String> for Pair {
    type Error = EngineError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Pair> for String {
    fn from(p: Pair) -> Self {
        p.code()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}
