use serde::{Deserialize, Serialize};
use std::fmt;

/// Market regime label carried on each prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarketRegime {
    Trending,
    Ranging,
    HighVolatility,
    #[default]
    Unknown,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarketRegime::Trending => "trending",
            MarketRegime::Ranging => "ranging",
            MarketRegime::HighVolatility => "high_volatility",
            MarketRegime::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

impl MarketRegime {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trending" | "trending_up" | "trending_down" => MarketRegime::Trending,
            "ranging" | "sideways" => MarketRegime::Ranging,
            "high_volatility" | "volatile" => MarketRegime::HighVolatility,
            _ => MarketRegime::Unknown,
        }
    }
}
