// 4.0: per (market, trader) position. pure data plus invariant checks.
// pnl is valued by a hypothetical close against the curve, never by size * price.

use crate::fixed::{FixedDecimal, MathError};
use crate::types::Side;
use serde::{Deserialize, Serialize};

/// Largest nonzero size treated as rounding residue.
///
/// Sizes in `(0, DUST_SIZE]` are live positions (closable, settle funding) but skip the
/// post-trade margin-ratio gate. Only an exact zero is "nothing to close".
pub const DUST_SIZE: FixedDecimal = FixedDecimal::UNIT;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("negative margin {0} on a live position")]
    NegativeMargin(FixedDecimal),

    #[error("negative open notional {0}")]
    NegativeOpenNotional(FixedDecimal),

    #[error("open notional {0} without size")]
    OrphanOpenNotional(FixedDecimal),

    #[error("liquidity epoch {0} does not exist")]
    UnknownLiquidityEpoch(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Signed base units, positive = long.
    pub size: FixedDecimal,
    /// Collateral net of realized pnl and settled funding.
    pub margin: FixedDecimal,
    /// Quote cost basis of `size`.
    pub open_notional: FixedDecimal,
    pub last_updated_cumulative_premium_fraction: FixedDecimal,
    /// Liquidity epoch `size` is denominated in.
    pub liquidity_history_index: usize,
    /// Block of the last mutation.
    pub block_number: u64,
}

impl Position {
    pub fn is_empty(&self) -> bool {
        self.size.is_zero() && self.margin.is_zero()
    }

    pub fn has_size(&self) -> bool {
        !self.size.is_zero()
    }

    pub fn is_dust(&self) -> bool {
        self.has_size() && self.size.abs() <= DUST_SIZE
    }

    pub fn side(&self) -> Option<Side> {
        Side::of(self.size)
    }

    /// Average entry price, `None` when flat.
    pub fn entry_price(&self) -> Result<Option<FixedDecimal>, MathError> {
        if self.size.is_zero() {
            return Ok(None);
        }
        self.open_notional.try_div(self.size.abs()).map(Some)
    }

    // 4.1: long earns notional - cost, short earns cost - notional
    pub fn unrealized_pnl(&self, position_notional: FixedDecimal) -> Result<FixedDecimal, MathError> {
        match self.side() {
            Some(Side::Long) => position_notional.try_sub(self.open_notional),
            Some(Side::Short) => self.open_notional.try_sub(position_notional),
            None => Ok(FixedDecimal::ZERO),
        }
    }

    pub fn validate(&self) -> Result<(), PositionError> {
        if self.margin.is_negative() {
            return Err(PositionError::NegativeMargin(self.margin));
        }
        if self.open_notional.is_negative() {
            return Err(PositionError::NegativeOpenNotional(self.open_notional));
        }
        if self.size.is_zero() && !self.open_notional.is_zero() {
            return Err(PositionError::OrphanOpenNotional(self.open_notional));
        }
        Ok(())
    }
}

/// Everything one position mutation produced, before token flows are applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PositionChange {
    pub position: Position,
    pub exchanged_size: FixedDecimal,
    pub exchanged_notional: FixedDecimal,
    pub realized_pnl: FixedDecimal,
    pub unrealized_pnl_after: FixedDecimal,
    pub bad_debt: FixedDecimal,
    /// Positive: trader pays into the vault. Negative: vault pays the trader.
    pub margin_to_vault: FixedDecimal,
}

impl PositionChange {
    // 4.2: a close followed by a reverse open reports as one change
    pub fn chain(&self, next: &PositionChange) -> Result<PositionChange, MathError> {
        Ok(PositionChange {
            position: next.position,
            exchanged_size: self.exchanged_size.try_add(next.exchanged_size)?,
            exchanged_notional: self.exchanged_notional.try_add(next.exchanged_notional)?,
            realized_pnl: self.realized_pnl.try_add(next.realized_pnl)?,
            unrealized_pnl_after: FixedDecimal::ZERO,
            bad_debt: self.bad_debt.try_add(next.bad_debt)?,
            margin_to_vault: self.margin_to_vault.try_add(next.margin_to_vault)?,
        })
    }
}
