// 8.0.2: result types and errors for engine operations.

use crate::config::ConfigError;
use crate::curve::CurveError;
use crate::fixed::{FixedDecimal, MathError};
use crate::position::{Position, PositionError};
use crate::price_feed::OracleError;
use crate::token::TransferError;
use crate::types::{AccountId, MarketId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeResult {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub exchanged_size: FixedDecimal,
    pub exchanged_notional: FixedDecimal,
    pub realized_pnl: FixedDecimal,
    /// Toll plus spread.
    pub fee: FixedDecimal,
    pub funding_payment: FixedDecimal,
    /// Positive: trader paid into the vault. Negative: vault paid the trader.
    pub margin_to_vault: FixedDecimal,
    pub position: Position,
    pub spot_price_after: FixedDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationResult {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub liquidator: AccountId,
    pub partial: bool,
    pub exchanged_size: FixedDecimal,
    pub exchanged_notional: FixedDecimal,
    pub fee_to_liquidator: FixedDecimal,
    pub fee_to_insurance_fund: FixedDecimal,
    /// Loss beyond margin plus liquidator reward the margin could not pay.
    pub bad_debt: FixedDecimal,
    /// What actually reached the liquidator.
    pub liquidator_paid: FixedDecimal,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingResult {
    pub market_id: MarketId,
    pub premium_fraction: FixedDecimal,
    pub funding_rate: FixedDecimal,
    pub market_twap: FixedDecimal,
    pub oracle_twap: FixedDecimal,
    pub amm_funding_profit: FixedDecimal,
    pub next_funding_time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementResult {
    pub market_id: MarketId,
    pub account_id: AccountId,
    pub settlement_price: FixedDecimal,
    /// What the position was worth.
    pub value: FixedDecimal,
    /// What the vault paid out.
    pub paid: FixedDecimal,
    /// What the vault owed but could not pay.
    pub unresolved: FixedDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Market {0:?} not found")]
    MarketNotFound(MarketId),

    #[error("Market {0:?} already exists")]
    MarketExists(MarketId),

    #[error("Market is closed")]
    MarketClosed,

    #[error("Market {0:?} is still open")]
    MarketOpen(MarketId),

    #[error("Amount must be non-zero")]
    ZeroAmount,

    #[error("Insufficient margin")]
    InsufficientMargin,

    #[error("Insufficient free collateral")]
    InsufficientFreeCollateral,

    #[error("Position size {size} over cap {cap}")]
    PositionCapExceeded { size: FixedDecimal, cap: FixedDecimal },

    #[error("Open interest {open_interest} over cap {cap}")]
    OpenInterestCapExceeded {
        open_interest: FixedDecimal,
        cap: FixedDecimal,
    },

    #[error("Price over fluctuation limit")]
    FluctuationLimitExceeded,

    #[error("Over trading limit")]
    OverTradingLimit,

    #[error("Slippage: got {actual}, limit {limit}")]
    SlippageExceeded {
        actual: FixedDecimal,
        limit: FixedDecimal,
    },

    #[error("Nothing to close")]
    NothingToClose,

    #[error("No open position")]
    NoPosition,

    #[error("Bad debt")]
    BadDebt,

    #[error("Position is not liquidatable")]
    NotLiquidatable,

    #[error("Only one action per block after a liquidation")]
    OneActionPerBlock,

    #[error("Settle funding too early")]
    FundingTooEarly,

    #[error("Price data: {0}")]
    StaleOrMissingPriceData(#[from] OracleError),

    #[error("Transfer failed: {0}")]
    TransferFailed(#[from] TransferError),

    #[error("Invalid position: {0}")]
    InvalidPosition(#[from] PositionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Curve error: {0}")]
    Curve(CurveError),

    #[error("Math error: {0}")]
    Math(#[from] MathError),
}

impl From<CurveError> for EngineError {
    fn from(e: CurveError) -> Self {
        match e {
            CurveError::OverTradingLimit => EngineError::OverTradingLimit,
            CurveError::SlippageExceeded { actual, limit } => EngineError::SlippageExceeded { actual, limit },
            CurveError::AlreadyOverFluctuationLimit | CurveError::OverFluctuationLimit => {
                EngineError::FluctuationLimitExceeded
            }
            CurveError::Closed => EngineError::MarketClosed,
            CurveError::FundingTooEarly => EngineError::FundingTooEarly,
            CurveError::Math(m) => EngineError::Math(m),
            other => EngineError::Curve(other),
        }
    }
}
