//! Liquidation conditions and penalty distribution.
//!
//! A position becomes liquidatable when `min(margin, margin + pnl) / notional`, with pnl the
//! less favourable of spot and twap, drops below the maintenance ratio. The engine does the closing; this
//! module decides eligibility and who gets what out of the penalty.

use crate::fixed::{FixedDecimal, MathError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginStatus {
    Healthy { margin_ratio: FixedDecimal },
    Liquidatable { margin_ratio: FixedDecimal },
    /// Account value is negative; closing leaves bad debt.
    Bankrupt { margin_ratio: FixedDecimal },
}

impl MarginStatus {
    pub fn margin_ratio(&self) -> FixedDecimal {
        match self {
            Self::Healthy { margin_ratio }
            | Self::Liquidatable { margin_ratio }
            | Self::Bankrupt { margin_ratio } => *margin_ratio,
        }
    }

    pub fn is_liquidatable(&self) -> bool {
        !matches!(self, Self::Healthy { .. })
    }
}

pub fn evaluate_status(margin_ratio: FixedDecimal, maintenance_margin_ratio: FixedDecimal) -> MarginStatus {
    if margin_ratio.is_negative() {
        MarginStatus::Bankrupt { margin_ratio }
    } else if margin_ratio < maintenance_margin_ratio {
        MarginStatus::Liquidatable { margin_ratio }
    } else {
        MarginStatus::Healthy { margin_ratio }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidationPenalty {
    pub total: FixedDecimal,
    pub liquidator_reward: FixedDecimal,
    pub insurance_contribution: FixedDecimal,
}

// half to whoever liquidated, the rest (including the odd raw unit) to the reserve
pub fn calculate_liquidation_penalty(
    closed_notional: FixedDecimal,
    liquidation_fee_ratio: FixedDecimal,
) -> Result<LiquidationPenalty, MathError> {
    let total = closed_notional.abs().try_mul(liquidation_fee_ratio)?;
    let liquidator_reward = total.try_div_int(2)?;
    let insurance_contribution = total.try_sub(liquidator_reward)?;
    Ok(LiquidationPenalty {
        total,
        liquidator_reward,
        insurance_contribution,
    })
}

/// Outcome of charging the liquidator reward against what is left of a fully closed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FullLiquidationSplit {
    /// Reward the margin could not pay; the reserve pays it instead.
    pub liquidation_bad_debt: FixedDecimal,
    /// Margin left after the reward, forfeited to the reserve.
    pub remain_to_reserve: FixedDecimal,
}

pub fn split_remaining_margin(
    remain_margin: FixedDecimal,
    liquidator_reward: FixedDecimal,
) -> Result<FullLiquidationSplit, MathError> {
    let left = remain_margin.try_sub(liquidator_reward)?;
    if left.is_negative() {
        Ok(FullLiquidationSplit {
            liquidation_bad_debt: left.abs(),
            remain_to_reserve: FixedDecimal::ZERO,
        })
    } else {
        Ok(FullLiquidationSplit {
            liquidation_bad_debt: FixedDecimal::ZERO,
            remain_to_reserve: left,
        })
    }
}
