// 8.4: liquidity migration and the per-operation position touch.
// a position stores the epoch its size was measured in. before anything reads it, the size is
// re-expressed on the current curve and pending funding comes out of margin.

use super::core::Engine;
use super::results::EngineError;
use crate::curve;
use crate::events::{EventPayload, LiquidityChangedEvent, PositionAdjustedEvent};
use crate::fixed::FixedDecimal;
use crate::funding;
use crate::market::MarketState;
use crate::position::{Position, PositionError};
use crate::snapshots::LiquidityChangedSnapshot;
use crate::types::{AccountId, Dir, MarketId};
use tracing::info;

/// Size of `position` expressed on the latest liquidity epoch. `open_notional` and margin
/// carry over unchanged.
pub(super) fn position_after_liquidity_migration(
    market: &MarketState,
    position: &Position,
) -> Result<Position, EngineError> {
    let amm = &market.amm;
    let latest = amm.latest_liquidity_index();
    let mut adjusted = *position;
    if position.size.is_zero() || position.liquidity_history_index >= latest {
        adjusted.liquidity_history_index = latest;
        return Ok(adjusted);
    }

    let snapshot = amm
        .liquidity_history()
        .get(position.liquidity_history_index)
        .copied()
        .ok_or(PositionError::UnknownLiquidityEpoch(position.liquidity_history_index))?;

    // replay every trade since the snapshot on the old curve
    let (mut quote, mut base) = (snapshot.quote_reserve, snapshot.base_reserve);
    let notional_delta = amm.cumulative_notional().try_sub(snapshot.cumulative_notional)?;
    if !notional_delta.is_zero() {
        let dir = if notional_delta.is_positive() {
            Dir::AddToAmm
        } else {
            Dir::RemoveFromAmm
        };
        let amount = notional_delta.abs();
        let base_delta = curve::input_price_with_reserves(dir, amount, quote, base)?;
        (quote, base) = curve::reserves_after(dir, amount, base_delta, quote, base)?;
    }

    adjusted.size = amm.calc_base_after_liquidity_migration(position.size, quote, base)?;
    adjusted.liquidity_history_index = latest;
    Ok(adjusted)
}

impl Engine {
    /// Scales both reserves of a market by `multiplier`. Spot price is unchanged; positions
    /// opened before are re-expressed lazily on their next touch.
    pub fn migrate_liquidity(
        &mut self,
        market_id: MarketId,
        multiplier: FixedDecimal,
    ) -> Result<LiquidityChangedSnapshot, EngineError> {
        self.atomically(|engine| {
            let now = engine.clock;
            let market = engine.open_market_mut(market_id)?;
            let limit = market.amm.fluctuation_limit_ratio();
            let snapshot = market.amm.migrate_liquidity(multiplier, limit, now)?;
            info!(
                market = market_id.0,
                %multiplier,
                quote_reserve = %snapshot.quote_reserve,
                base_reserve = %snapshot.base_reserve,
                "liquidity migrated"
            );
            engine.emit_event(EventPayload::LiquidityChanged(LiquidityChangedEvent {
                market_id,
                quote_reserve: snapshot.quote_reserve,
                base_reserve: snapshot.base_reserve,
                cumulative_notional: snapshot.cumulative_notional,
            }));
            Ok(snapshot)
        })
    }

    /// Moves a stored position onto the current liquidity epoch without settling funding.
    pub fn adjust_position_for_liquidity_changed(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
    ) -> Result<Position, EngineError> {
        self.atomically(|engine| {
            let adjusted = engine.adjust_stored_position(market_id, trader)?;
            engine.market_mut(market_id)?.set_position(trader, adjusted);
            Ok(adjusted)
        })
    }

    fn adjust_stored_position(&mut self, market_id: MarketId, trader: AccountId) -> Result<Position, EngineError> {
        let (old, adjusted) = {
            let market = self.market_ref(market_id)?;
            let old = market.position(trader);
            (old, position_after_liquidity_migration(market, &old)?)
        };
        if old.has_size() && old.liquidity_history_index != adjusted.liquidity_history_index {
            self.emit_event(EventPayload::PositionAdjusted(PositionAdjustedEvent {
                market_id,
                account_id: trader,
                old_position_size: old.size,
                new_position_size: adjusted.size,
                old_liquidity_index: old.liquidity_history_index,
                new_liquidity_index: adjusted.liquidity_history_index,
            }));
        }
        Ok(adjusted)
    }

    // 8.4.1: every mutating op starts here. returns the up-to-date position and the funding
    // it just paid (negative when it received).
    pub(super) fn touch_position(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
    ) -> Result<(Position, FixedDecimal), EngineError> {
        let mut position = self.adjust_stored_position(market_id, trader)?;
        let market = self.market_mut(market_id)?;
        let funding_payment = funding::settle(&mut position, market.amm.cumulative_premium_fraction())?;
        market.set_position(trader, position);
        Ok((position, funding_payment))
    }
}
