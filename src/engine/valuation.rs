//! Position valuation.
//!
//! A position is worth what closing it against the curve would return, either at the current
//! reserves or averaged over recent snapshots. Margin ratios and liquidation eligibility are
//! derived from these values.

use super::core::Engine;
use super::liquidity::position_after_liquidity_migration;
use super::results::EngineError;
use crate::amm::Amm;
use crate::fixed::FixedDecimal;
use crate::funding;
use crate::margin;
use crate::position::Position;
use crate::types::{AccountId, Dir, MarketId, PnlCalcOption, PnlPreference, Timestamp};

/// `(position notional, unrealized pnl)` of a hypothetical full close.
pub(super) fn position_notional_and_pnl(
    amm: &Amm,
    position: &Position,
    option: PnlCalcOption,
    twap_interval_ms: i64,
    now: Timestamp,
) -> Result<(FixedDecimal, FixedDecimal), EngineError> {
    if position.size.is_zero() {
        return Ok((FixedDecimal::ZERO, FixedDecimal::ZERO));
    }
    let dir = Dir::closing_base(position.size);
    let size = position.size.abs();
    let notional = match option {
        PnlCalcOption::SpotPrice => amm.output_price(dir, size)?,
        PnlCalcOption::Twap => amm.output_twap(dir, size, twap_interval_ms, now)?,
    };
    let pnl = position.unrealized_pnl(notional)?;
    Ok((notional, pnl))
}

// spot and twap, whichever has the larger (Max) or smaller (Min) pnl
pub(super) fn preferred_notional_and_pnl(
    amm: &Amm,
    position: &Position,
    preference: PnlPreference,
    twap_interval_ms: i64,
    now: Timestamp,
) -> Result<(FixedDecimal, FixedDecimal), EngineError> {
    let spot = position_notional_and_pnl(amm, position, PnlCalcOption::SpotPrice, twap_interval_ms, now)?;
    let twap = position_notional_and_pnl(amm, position, PnlCalcOption::Twap, twap_interval_ms, now)?;
    let pick_spot = match preference {
        PnlPreference::Max => spot.1 >= twap.1,
        PnlPreference::Min => spot.1 <= twap.1,
    };
    Ok(if pick_spot { spot } else { twap })
}

impl Engine {
    /// Stored position, before liquidity and funding adjustments.
    pub fn position(&self, market_id: MarketId, trader: AccountId) -> Result<Position, EngineError> {
        Ok(self.market_ref(market_id)?.position(trader))
    }

    /// Position as the next operation would see it: re-expressed on the current liquidity
    /// epoch with pending funding taken out of margin. Nothing is stored.
    pub fn current_position(&self, market_id: MarketId, trader: AccountId) -> Result<Position, EngineError> {
        let market = self.market_ref(market_id)?;
        let mut position = position_after_liquidity_migration(market, &market.position(trader))?;
        funding::settle(&mut position, market.amm.cumulative_premium_fraction())?;
        Ok(position)
    }

    pub fn position_notional_and_unrealized_pnl(
        &self,
        market_id: MarketId,
        trader: AccountId,
        option: PnlCalcOption,
    ) -> Result<(FixedDecimal, FixedDecimal), EngineError> {
        let position = self.current_position(market_id, trader)?;
        let market = self.market_ref(market_id)?;
        position_notional_and_pnl(
            &market.amm,
            &position,
            option,
            self.config.twap_pnl_interval_ms,
            self.clock.timestamp,
        )
    }

    /// `min(margin, margin + pnl) / notional` with the less favourable of spot and twap pnl.
    /// This is the ratio liquidation eligibility is judged on.
    pub fn margin_ratio(&self, market_id: MarketId, trader: AccountId) -> Result<FixedDecimal, EngineError> {
        let position = self.current_position(market_id, trader)?;
        if !position.has_size() {
            return Err(EngineError::NoPosition);
        }
        let market = self.market_ref(market_id)?;
        let (notional, pnl) = preferred_notional_and_pnl(
            &market.amm,
            &position,
            PnlPreference::Min,
            self.config.twap_pnl_interval_ms,
            self.clock.timestamp,
        )?;
        Ok(margin::liquidation_margin_ratio(position.margin, pnl, notional)?)
    }

    // post-trade gate: plain `(margin + pnl) / notional` at spot
    pub(super) fn spot_margin_ratio(&self, market_id: MarketId, position: &Position) -> Result<FixedDecimal, EngineError> {
        let market = self.market_ref(market_id)?;
        let (notional, pnl) = position_notional_and_pnl(
            &market.amm,
            position,
            PnlCalcOption::SpotPrice,
            self.config.twap_pnl_interval_ms,
            self.clock.timestamp,
        )?;
        Ok(margin::margin_ratio(position.margin, pnl, notional)?)
    }

    pub fn spot_price(&self, market_id: MarketId) -> Result<FixedDecimal, EngineError> {
        Ok(self.market_ref(market_id)?.amm.spot_price()?)
    }

    pub fn twap_price(&self, market_id: MarketId, interval_ms: i64) -> Result<FixedDecimal, EngineError> {
        Ok(self.market_ref(market_id)?.amm.twap_price(interval_ms, self.clock.timestamp)?)
    }
}
