pub mod asset;
pub mod instruction;
pub mod order;

pub use asset::{Asset, Currency, FundingCurrency};
pub use instruction::{AmountSpec, TradeInstruction};
pub use order::{BookLevel, OrderBook, OrderStatus, Ticker};
