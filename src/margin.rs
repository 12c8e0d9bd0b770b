//! Margin requirements for the clearing engine.
//!
//! Initial margin gates new exposure (`1 / leverage` must clear it) and margin removal.
//! Maintenance margin is the floor below which a position can be liquidated and above
//! which every post-trade margin ratio must stay.

use crate::fixed::{FixedDecimal, MathError};
use crate::position::Position;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginParams {
    pub initial_margin_ratio: FixedDecimal,
    pub maintenance_margin_ratio: FixedDecimal,
    /// Fraction of closed notional charged on liquidation, split half and half.
    pub liquidation_fee_ratio: FixedDecimal,
    /// Fraction of size closed when a full close would break the fluctuation limit.
    pub partial_liquidation_ratio: FixedDecimal,
}

impl Default for MarginParams {
    fn default() -> Self {
        Self {
            initial_margin_ratio: FixedDecimal::from_raw(100_000_000_000_000_000), // 10%
            maintenance_margin_ratio: FixedDecimal::from_raw(62_500_000_000_000_000), // 6.25%
            liquidation_fee_ratio: FixedDecimal::from_raw(12_500_000_000_000_000), // 1.25%
            partial_liquidation_ratio: FixedDecimal::from_raw(250_000_000_000_000_000), // 25%
        }
    }
}

impl MarginParams {
    /// Partial close is configured when the ratio is strictly between 0 and 1.
    pub fn partial_close_enabled(&self) -> bool {
        self.partial_liquidation_ratio.is_positive() && self.partial_liquidation_ratio < FixedDecimal::ONE
    }

    // 10x leverage needs 1/10 >= initial margin ratio
    pub fn leverage_allowed(&self, leverage: FixedDecimal) -> Result<bool, MathError> {
        let fraction = FixedDecimal::ONE.try_div(leverage)?;
        Ok(fraction >= self.initial_margin_ratio)
    }
}

/// Splits a signed margin after `delta` into what is left and what nobody covers.
pub fn calc_remain_margin(
    margin: FixedDecimal,
    delta: FixedDecimal,
) -> Result<(FixedDecimal, FixedDecimal), MathError> {
    let signed = margin.try_add(delta)?;
    if signed.is_negative() {
        Ok((FixedDecimal::ZERO, signed.abs()))
    } else {
        Ok((signed, FixedDecimal::ZERO))
    }
}

/// `(margin + pnl) / notional`. A flat position has no ratio.
pub fn margin_ratio(
    margin: FixedDecimal,
    unrealized_pnl: FixedDecimal,
    position_notional: FixedDecimal,
) -> Result<FixedDecimal, MathError> {
    margin.try_add(unrealized_pnl)?.try_div(position_notional)
}

/// `min(margin, margin + pnl) / notional`. Unrealized profit never lifts a position out of
/// liquidation; only losses count against it.
pub fn liquidation_margin_ratio(
    margin: FixedDecimal,
    unrealized_pnl: FixedDecimal,
    position_notional: FixedDecimal,
) -> Result<FixedDecimal, MathError> {
    let account_value = margin.try_add(unrealized_pnl)?.min(margin);
    account_value.try_div(position_notional)
}

// unrealized profit never backs a withdrawal. longs are charged on cost basis,
// shorts on what it would take to buy the base back.
pub fn free_collateral(
    position: &Position,
    min_unrealized_pnl: FixedDecimal,
    position_notional: FixedDecimal,
    initial_margin_ratio: FixedDecimal,
) -> Result<FixedDecimal, MathError> {
    let account_value = position.margin.try_add(min_unrealized_pnl)?;
    let collateral = account_value.min(position.margin);
    let basis = if position.size.is_positive() {
        position.open_notional
    } else {
        position_notional
    };
    let requirement = basis.try_mul(initial_margin_ratio)?;
    collateral.try_sub(requirement)
}
