// vamm-core: perpetual futures clearing against a virtual constant product curve.
// margin-first architecture: every trade is checked against margin before it is stored.
// all computation is deterministic; time and blocks come from the caller.
//
// file map (search X.0 for structs, X.1+ for logic):
//   0.x  fixed.rs: 18-decimal fixed point with checked, truncating math
//   1.x  types.rs: ids, sides, curve directions, block clock
//   2.0  curve.rs: constant product pricing and fees
//   2.2  snapshots.rs: reserve history, twap, liquidity epochs
//   2.3  amm.rs: the virtual curve and its limits
//   3.x  margin.rs: initial/maintenance ratios, remaining margin, free collateral
//   4.x  position.rs: position record and invariants
//   5.x  funding.rs: premium fraction and per-position payments
//   6.x  liquidation.rs: liquidation status and penalty split
//   7.x  config.rs: exchange config, env presets, json
//   8.x  engine/: clearing engine: trades, margin, funding, liquidation, settlement
//   9.0  token.rs: token ledger with per-token precision
//   9.1  price_feed.rs: index oracle trait (mocked)
//   9.2  reserve.rs: insurance fund
//   9.3  fee_pool.rs: toll fee sink
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market config + runtime state

// core clearing modules
pub mod amm;
pub mod curve;
pub mod engine;
pub mod events;
pub mod fixed;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod position;
pub mod snapshots;
pub mod types;

// integration modules
pub mod config;
pub mod fee_pool;
pub mod price_feed;
pub mod reserve;
pub mod token;

// re exports for convenience
pub use engine::*;
pub use events::*;
pub use fixed::*;
pub use liquidation::*;
pub use market::*;
pub use position::*;
pub use types::*;
pub use amm::{Amm, AmmParams, FundingSettlement, SwapAmount};
pub use config::{ConfigError, Environment, ExchangeConfig, QuoteTokenConfig};
pub use curve::CurveError;
pub use fee_pool::FeePool;
pub use margin::MarginParams;
pub use price_feed::{MockPriceFeed, OracleError, PriceFeed};
pub use reserve::{InsuranceFund, ReserveStats};
pub use snapshots::{LiquidityChangedSnapshot, ReserveSnapshot};
pub use token::{Holder, Ledger, TokenInfo, TransferError};
