// Core trading domain entities and value objects
pub mod account;
pub mod position;
pub mod types;

pub use account::AccountState;
pub use position::{ExitReason, Position, PositionOrigin, TradeRecord};
pub use types::{
    Action, AssetBalance, BalanceMap, OrderAck, OrderRequest, OrderSide, OrderStatus, OrderType,
    PositionInfo, Side, Tick,
};
