// 8.0: clearing engine. owns every market, the token ledger, the insurance fund and the fee pool.
// positions, margin, funding, liquidation and settlement all go through here.
// every public mutation is all-or-nothing: a failed call leaves no state and no events behind.

mod collateral;
mod config;
mod core;
mod funding;
mod liquidations;
mod liquidity;
mod positions;
mod results;
mod settlement;
mod transfers;
mod valuation;

pub use config::EngineConfig;
pub use core::Engine;
pub use results::{EngineError, FundingResult, LiquidationResult, SettlementResult, TradeResult};
