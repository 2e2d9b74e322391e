use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete decision output of the predictor for one symbol at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

/// Direction of an open futures position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short; multiplies price deltas into signed PnL.
    pub fn sign(self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// The action that would open a position on this side.
    pub fn entry_action(self) -> Action {
        match self {
            Side::Long => Action::Buy,
            Side::Short => Action::Sell,
        }
    }

    /// True when the given action trades against this side.
    pub fn is_opposed_by(self, action: Action) -> bool {
        matches!(
            (self, action),
            (Side::Long, Action::Sell) | (Side::Short, Action::Buy)
        )
    }
}

impl From<Side> for OrderSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn flipped(self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopMarket => write!(f, "STOP_MARKET"),
            OrderType::TakeProfitMarket => write!(f, "TAKE_PROFIT_MARKET"),
        }
    }
}

/// Order lifecycle: Created -> Submitted -> Accepted -> (PartiallyFilled)* ->
/// Filled | Cancelled | Rejected. Terminal states emit exactly one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Created,
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Outbound order, fully specified by the caller. `client_order_id` is the
/// idempotency key `(position_id, attempt)`; replaying the same key must
/// never produce a second fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub leverage: u32,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub reduce_only: bool,
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
            leverage: 1,
            stop_loss: None,
            take_profit: None,
            reduce_only: false,
            client_order_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn idempotency_key(position_id: uuid::Uuid, attempt: u32) -> String {
        format!("{}:{}", position_id, attempt)
    }
}

/// Exchange acknowledgement for a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub average_fill_price: Decimal,
    pub fee: Decimal,
}

impl OrderAck {
    /// Fraction of the requested quantity that actually filled.
    pub fn fill_fraction(&self, requested: Decimal) -> Decimal {
        if requested.is_zero() {
            return Decimal::ZERO;
        }
        self.filled_quantity / requested
    }
}

/// A single trade print from an exchange tick stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: i64,
}

/// Raw position report from an exchange, used for startup rediscovery and
/// sync reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
}

/// Free/used balance for one asset on one exchange.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: Decimal,
    pub used: Decimal,
}

impl AssetBalance {
    pub fn total(&self) -> Decimal {
        self.free + self.used
    }
}

pub type BalanceMap = std::collections::HashMap<String, AssetBalance>;

// ===== Symbol Normalization =====

/// Quote currencies recognized in canonical futures symbols, longest first so
/// USDT is preferred over USD.
const QUOTE_CURRENCIES: &[&str] = &["USDT", "USDC", "BUSD", "USD", "EUR", "BTC", "ETH"];

/// Normalizes an exchange symbol rendering into canonical "BASE/QUOTE" form.
///
/// Exchanges report futures symbols without separators (e.g. "BTCUSDT",
/// sometimes suffixed "BTCUSDT_UMCBL"); the engine keys everything by the
/// canonical slash-separated form.
pub fn normalize_symbol(symbol: &str) -> Result<String, String> {
    if symbol.contains('/') {
        return Ok(symbol.to_string());
    }

    if symbol.is_empty() {
        return Err("Cannot normalize empty symbol".to_string());
    }

    // Strip product-type suffixes some venues append after an underscore.
    let bare = symbol.split('_').next().unwrap_or(symbol);

    for quote in QUOTE_CURRENCIES {
        if bare.ends_with(quote) && bare.len() > quote.len() {
            let base = &bare[..bare.len() - quote.len()];
            if !base.is_empty() && base.chars().all(|c| c.is_ascii_uppercase()) {
                return Ok(format!("{}/{}", base, quote));
            }
        }
    }

    Err(format!(
        "Cannot normalize symbol: '{}' - no recognized quote currency",
        symbol
    ))
}

/// Reverse of `normalize_symbol`: canonical "BASE/QUOTE" to the plain
/// concatenated rendering most venues expect.
pub fn denormalize_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), Decimal::ONE);
        assert_eq!(Side::Short.sign(), Decimal::NEGATIVE_ONE);
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn test_side_opposed_by_action() {
        assert!(Side::Long.is_opposed_by(Action::Sell));
        assert!(Side::Short.is_opposed_by(Action::Buy));
        assert!(!Side::Long.is_opposed_by(Action::Buy));
        assert!(!Side::Long.is_opposed_by(Action::Hold));
        assert!(!Side::Short.is_opposed_by(Action::Hold));
    }

    #[test]
    fn test_normalize_standard_pairs() {
        assert_eq!(normalize_symbol("BTCUSDT").unwrap(), "BTC/USDT");
        assert_eq!(normalize_symbol("ETHUSDC").unwrap(), "ETH/USDC");
        assert_eq!(normalize_symbol("SOLEUR").unwrap(), "SOL/EUR");
    }

    #[test]
    fn test_normalize_prefers_longer_quote() {
        // USDT (4 chars) must win over USD (3 chars)
        assert_eq!(normalize_symbol("BTCUSDT").unwrap(), "BTC/USDT");
    }

    #[test]
    fn test_normalize_strips_product_suffix() {
        assert_eq!(normalize_symbol("BTCUSDT_UMCBL").unwrap(), "BTC/USDT");
    }

    #[test]
    fn test_normalize_already_canonical() {
        assert_eq!(normalize_symbol("BTC/USDT").unwrap(), "BTC/USDT");
    }

    #[test]
    fn test_normalize_invalid() {
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("USDT").is_err());
        assert!(normalize_symbol("btcusdt").is_err());
        assert!(normalize_symbol("NOTASYMBOL").is_err());
    }

    #[test]
    fn test_denormalize_roundtrip() {
        for symbol in ["BTCUSDT", "ETHUSDT", "AVAXUSD"] {
            let normalized = normalize_symbol(symbol).unwrap();
            assert_eq!(denormalize_symbol(&normalized), symbol);
        }
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            OrderRequest::idempotency_key(id, 1),
            OrderRequest::idempotency_key(id, 1)
        );
        assert_ne!(
            OrderRequest::idempotency_key(id, 1),
            OrderRequest::idempotency_key(id, 2)
        );
    }

    #[test]
    fn test_fill_fraction() {
        let ack = OrderAck {
            order_id: "1".into(),
            client_order_id: "c1".into(),
            status: OrderStatus::PartiallyFilled,
            filled_quantity: rust_decimal_macros::dec!(0.6),
            average_fill_price: rust_decimal_macros::dec!(100),
            fee: Decimal::ZERO,
        };
        assert_eq!(
            ack.fill_fraction(Decimal::ONE),
            rust_decimal_macros::dec!(0.6)
        );
        assert_eq!(ack.fill_fraction(Decimal::ZERO), Decimal::ZERO);
    }
}
