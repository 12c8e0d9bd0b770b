//! Opening, reducing, reversing and closing positions against the curve.

use super::core::Engine;
use super::results::{EngineError, TradeResult};
use super::valuation::position_notional_and_pnl;
use crate::events::{EventPayload, PositionChangedEvent};
use crate::fixed::FixedDecimal;
use crate::margin::calc_remain_margin;
use crate::position::{Position, PositionChange, PositionError};
use crate::types::{AccountId, Dir, MarketId, PnlCalcOption, Side};
use tracing::debug;

impl Engine {
    /// Opens or adds to a position with `margin * leverage` of notional, or trades against an
    /// existing opposite position. `base_limit` bounds the base received (long) or owed (short);
    /// zero disables it.
    pub fn open_position(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        side: Side,
        margin: FixedDecimal,
        leverage: FixedDecimal,
        base_limit: FixedDecimal,
    ) -> Result<TradeResult, EngineError> {
        self.atomically(|engine| engine.open_position_inner(market_id, trader, side, margin, leverage, base_limit))
    }

    /// Trades against the current position. `NothingToClose` when flat.
    pub fn reduce_position(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        margin: FixedDecimal,
        leverage: FixedDecimal,
        base_limit: FixedDecimal,
    ) -> Result<TradeResult, EngineError> {
        self.atomically(|engine| {
            let side = engine
                .current_position(market_id, trader)?
                .side()
                .ok_or(EngineError::NothingToClose)?;
            engine.open_position_inner(market_id, trader, side.opposite(), margin, leverage, base_limit)
        })
    }

    /// Closes the whole position, or a slice of it when a full close would break the
    /// fluctuation limit. `quote_limit` bounds the quote received (long) or paid (short).
    pub fn close_position(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        quote_limit: FixedDecimal,
    ) -> Result<TradeResult, EngineError> {
        self.atomically(|engine| engine.close_position_inner(market_id, trader, quote_limit))
    }

    fn open_position_inner(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        side: Side,
        margin: FixedDecimal,
        leverage: FixedDecimal,
        base_limit: FixedDecimal,
    ) -> Result<TradeResult, EngineError> {
        if !margin.is_positive() || !leverage.is_positive() || base_limit.is_negative() {
            return Err(EngineError::ZeroAmount);
        }
        if !self.config.margin.leverage_allowed(leverage)? {
            return Err(EngineError::InsufficientMargin);
        }
        self.open_market_mut(market_id)?;

        let (old, funding_payment) = self.touch_position(market_id, trader)?;
        self.require_action_allowed(market_id, trader)?;

        let is_new = !old.has_size();
        let notional = margin.try_mul(leverage)?;
        let change = if is_new || old.side() == Some(side) {
            self.increase_position(market_id, trader, &old, side, notional, leverage, base_limit)?
        } else {
            self.open_reverse_position(market_id, trader, &old, side, notional, leverage, base_limit, false)?
        };
        if change.bad_debt.is_positive() {
            return Err(EngineError::BadDebt);
        }
        self.store_after_trade(market_id, trader, change.position)?;
        self.check_post_trade_margin(market_id, trader, is_new, &change.position)?;
        self.settle_trade(market_id, trader, change, funding_payment)
    }

    fn close_position_inner(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        quote_limit: FixedDecimal,
    ) -> Result<TradeResult, EngineError> {
        if quote_limit.is_negative() {
            return Err(EngineError::ZeroAmount);
        }
        self.open_market_mut(market_id)?;

        let (old, funding_payment) = self.touch_position(market_id, trader)?;
        if !old.has_size() {
            return Err(EngineError::NothingToClose);
        }
        self.require_action_allowed(market_id, trader)?;

        let change = match self.partial_close_notional(market_id, &old)? {
            Some(partial_notional) => {
                let side = Side::of(old.size).map(|s| s.opposite()).ok_or(EngineError::NothingToClose)?;
                self.open_reverse_position(
                    market_id,
                    trader,
                    &old,
                    side,
                    partial_notional,
                    FixedDecimal::ONE,
                    FixedDecimal::ZERO,
                    true,
                )?
            }
            None => self.close_position_internal(market_id, &old, quote_limit, false)?,
        };
        if change.bad_debt.is_positive() {
            return Err(EngineError::BadDebt);
        }
        self.store_after_trade(market_id, trader, change.position)?;
        self.settle_trade(market_id, trader, change, funding_payment)
    }

    // 8.5: runs strictly after the mutation. new positions already passed the leverage gate,
    // closed and dust positions have nothing left to protect.
    fn check_post_trade_margin(
        &self,
        market_id: MarketId,
        trader: AccountId,
        is_new: bool,
        position: &Position,
    ) -> Result<(), EngineError> {
        if is_new || !position.has_size() || position.is_dust() {
            return Ok(());
        }
        let ratio = self.spot_margin_ratio(market_id, position)?;
        if ratio < self.config.margin.maintenance_margin_ratio {
            debug!(market = market_id.0, trader = trader.0, %ratio, "post-trade margin ratio too low");
            return Err(EngineError::InsufficientMargin);
        }
        Ok(())
    }

    pub(super) fn require_action_allowed(&self, market_id: MarketId, trader: AccountId) -> Result<(), EngineError> {
        if self.market_ref(market_id)?.action_allowed(trader, self.clock.number) {
            Ok(())
        } else {
            Err(EngineError::OneActionPerBlock)
        }
    }

    /// Notional of the slice to close when a full close would break the fluctuation limit.
    pub(super) fn partial_close_notional(
        &self,
        market_id: MarketId,
        position: &Position,
    ) -> Result<Option<FixedDecimal>, EngineError> {
        let params = &self.config.margin;
        if !params.partial_close_enabled() {
            return Ok(None);
        }
        let amm = &self.market_ref(market_id)?.amm;
        let dir = Dir::closing_base(position.size);
        if !amm.is_over_fluctuation_limit(dir, position.size.abs(), self.clock)? {
            return Ok(None);
        }
        let partial_size = position.size.abs().try_mul(params.partial_liquidation_ratio)?;
        Ok(Some(amm.output_price(dir, partial_size)?))
    }

    fn store_after_trade(&mut self, market_id: MarketId, trader: AccountId, position: Position) -> Result<(), EngineError> {
        let block = self.clock.number;
        let market = self.market_mut(market_id)?;
        market.set_position(trader, position);
        market.record_action(trader, block);
        Ok(())
    }

    // 8.6: token flows for a trade that already changed the position. margin moves first,
    // then fees on the traded notional.
    fn settle_trade(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        change: PositionChange,
        funding_payment: FixedDecimal,
    ) -> Result<TradeResult, EngineError> {
        let token = self.quote_token(market_id)?;
        if change.margin_to_vault.is_positive() {
            self.pull_to_vault(token, trader, change.margin_to_vault)?;
        } else if change.margin_to_vault.is_negative() {
            self.withdraw_from_vault(token, trader, change.margin_to_vault.abs())?;
        }

        let (toll, spread) = self
            .market_ref(market_id)?
            .amm
            .calc_fee(change.exchanged_notional.abs())?;
        let fee = self.charge_fees(token, trader, toll, spread)?;

        change.position.validate()?;
        let spot_price_after = self.spot_price(market_id)?;
        self.emit_event(EventPayload::PositionChanged(PositionChangedEvent {
            market_id,
            account_id: trader,
            margin: change.position.margin,
            exchanged_notional: change.exchanged_notional,
            exchanged_size: change.exchanged_size,
            fee,
            position_size_after: change.position.size,
            realized_pnl: change.realized_pnl,
            unrealized_pnl_after: change.unrealized_pnl_after,
            bad_debt: change.bad_debt,
            liquidation_penalty: FixedDecimal::ZERO,
            spot_price: spot_price_after,
            funding_payment,
        }));

        Ok(TradeResult {
            market_id,
            account_id: trader,
            exchanged_size: change.exchanged_size,
            exchanged_notional: change.exchanged_notional,
            realized_pnl: change.realized_pnl,
            fee,
            funding_payment,
            margin_to_vault: change.margin_to_vault,
            position: change.position,
            spot_price_after,
        })
    }

    // 8.7: same side or fresh position. margin grows by notional / leverage.
    #[allow(clippy::too_many_arguments)]
    fn increase_position(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        old: &Position,
        side: Side,
        notional: FixedDecimal,
        leverage: FixedDecimal,
        base_limit: FixedDecimal,
    ) -> Result<PositionChange, EngineError> {
        let now = self.clock;
        let twap_interval = self.config.twap_pnl_interval_ms;
        let market = self.market_mut(market_id)?;

        let base = market.amm.swap_input(side.quote_dir(), notional, base_limit, false, now)?;
        let exchanged_size = match side {
            Side::Long => base,
            Side::Short => base.try_neg()?,
        };
        let new_size = old.size.try_add(exchanged_size)?;

        let whitelisted = market.amm.is_whitelisted(trader);
        let cap = market.amm.max_holding_base();
        if !whitelisted && cap.is_positive() && new_size.abs() > cap {
            return Err(EngineError::PositionCapExceeded {
                size: new_size.abs(),
                cap,
            });
        }
        let open_interest = market.apply_open_interest(notional)?;
        let oi_cap = market.amm.open_interest_notional_cap();
        if !whitelisted && oi_cap.is_positive() && open_interest > oi_cap {
            return Err(EngineError::OpenInterestCapExceeded {
                open_interest,
                cap: oi_cap,
            });
        }

        let margin_requirement = notional.try_div(leverage)?;
        let position = Position {
            size: new_size,
            margin: old.margin.try_add(margin_requirement)?,
            open_notional: old.open_notional.try_add(notional)?,
            last_updated_cumulative_premium_fraction: market.amm.cumulative_premium_fraction(),
            liquidity_history_index: market.amm.latest_liquidity_index(),
            block_number: now.number,
        };
        let (_, unrealized_pnl_after) =
            position_notional_and_pnl(&market.amm, &position, PnlCalcOption::SpotPrice, twap_interval, now.timestamp)?;

        Ok(PositionChange {
            position,
            exchanged_size,
            exchanged_notional: notional,
            realized_pnl: FixedDecimal::ZERO,
            unrealized_pnl_after,
            bad_debt: FixedDecimal::ZERO,
            margin_to_vault: margin_requirement,
        })
    }

    // 8.8: opposite side. smaller than the position: reduce. otherwise close and reopen the rest.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn open_reverse_position(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        old: &Position,
        side: Side,
        notional: FixedDecimal,
        leverage: FixedDecimal,
        base_limit: FixedDecimal,
        can_over_fluctuation: bool,
    ) -> Result<PositionChange, EngineError> {
        let now = self.clock;
        let twap_interval = self.config.twap_pnl_interval_ms;
        let (old_notional, unrealized) = {
            let market = self.market_ref(market_id)?;
            position_notional_and_pnl(&market.amm, old, PnlCalcOption::SpotPrice, twap_interval, now.timestamp)?
        };

        if old_notional > notional {
            let market = self.market_mut(market_id)?;
            let base = market
                .amm
                .swap_input(side.quote_dir(), notional, base_limit, can_over_fluctuation, now)?;
            let exchanged_size = match side {
                Side::Long => base,
                Side::Short => base.try_neg()?,
            };

            let realized_pnl = if old.size.is_zero() {
                FixedDecimal::ZERO
            } else {
                unrealized.try_mul_div(exchanged_size.abs(), old.size.abs())?
            };
            let (remain_margin, bad_debt) = calc_remain_margin(old.margin, realized_pnl)?;
            let unrealized_pnl_after = unrealized.try_sub(realized_pnl)?;

            // what is left of the position at spot, minus the pnl it still carries
            let remain_open_notional = if old.size.is_positive() {
                old_notional.try_sub(notional)?.try_sub(unrealized_pnl_after)?
            } else {
                unrealized_pnl_after.try_add(old_notional)?.try_sub(notional)?
            };
            if !remain_open_notional.is_positive() {
                return Err(PositionError::NegativeOpenNotional(remain_open_notional).into());
            }

            let open_interest_delta = realized_pnl
                .try_add(bad_debt)?
                .try_add(old.open_notional)?
                .try_sub(remain_open_notional)?
                .try_neg()?;
            market.apply_open_interest(open_interest_delta)?;

            let position = Position {
                size: old.size.try_add(exchanged_size)?,
                margin: remain_margin,
                open_notional: remain_open_notional,
                last_updated_cumulative_premium_fraction: market.amm.cumulative_premium_fraction(),
                liquidity_history_index: market.amm.latest_liquidity_index(),
                block_number: now.number,
            };
            return Ok(PositionChange {
                position,
                exchanged_size,
                exchanged_notional: notional,
                realized_pnl,
                unrealized_pnl_after,
                bad_debt,
                margin_to_vault: FixedDecimal::ZERO,
            });
        }

        self.close_and_open_reverse_position(market_id, trader, old, side, notional, leverage, base_limit)
    }

    #[allow(clippy::too_many_arguments)]
    fn close_and_open_reverse_position(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        old: &Position,
        side: Side,
        notional: FixedDecimal,
        leverage: FixedDecimal,
        base_limit: FixedDecimal,
    ) -> Result<PositionChange, EngineError> {
        let closed = self.close_position_internal(market_id, old, FixedDecimal::ZERO, false)?;
        if closed.bad_debt.is_positive() {
            return Err(EngineError::BadDebt);
        }

        let open_notional = notional.try_sub(closed.exchanged_notional)?;
        if open_notional.try_div(leverage)?.is_zero() {
            return Ok(closed);
        }

        // the base already traded by the close counts against the limit
        let remaining_limit = if base_limit.is_positive() {
            let left = base_limit.try_sub(closed.exchanged_size.abs())?;
            if left.is_negative() {
                return Err(EngineError::SlippageExceeded {
                    actual: closed.exchanged_size.abs(),
                    limit: base_limit,
                });
            }
            left
        } else {
            FixedDecimal::ZERO
        };

        let opened = self.increase_position(
            market_id,
            trader,
            &closed.position,
            side,
            open_notional,
            leverage,
            remaining_limit,
        )?;
        Ok(closed.chain(&opened)?)
    }

    // 8.9: full close. everything left of margin after pnl goes back to the trader.
    pub(super) fn close_position_internal(
        &mut self,
        market_id: MarketId,
        old: &Position,
        quote_limit: FixedDecimal,
        can_over_fluctuation: bool,
    ) -> Result<PositionChange, EngineError> {
        let now = self.clock;
        let twap_interval = self.config.twap_pnl_interval_ms;
        let (_, unrealized) = {
            let market = self.market_ref(market_id)?;
            position_notional_and_pnl(&market.amm, old, PnlCalcOption::SpotPrice, twap_interval, now.timestamp)?
        };
        let (remain_margin, bad_debt) = calc_remain_margin(old.margin, unrealized)?;

        let market = self.market_mut(market_id)?;
        let exchanged_notional = market.amm.swap_output(
            Dir::closing_base(old.size),
            old.size.abs(),
            quote_limit,
            can_over_fluctuation,
            now,
        )?;
        let open_interest_delta = unrealized
            .try_add(bad_debt)?
            .try_add(old.open_notional)?
            .try_neg()?;
        market.apply_open_interest(open_interest_delta)?;

        let position = Position {
            last_updated_cumulative_premium_fraction: market.amm.cumulative_premium_fraction(),
            liquidity_history_index: market.amm.latest_liquidity_index(),
            block_number: now.number,
            ..Position::default()
        };
        Ok(PositionChange {
            position,
            exchanged_size: old.size.try_neg()?,
            exchanged_notional,
            realized_pnl: unrealized,
            unrealized_pnl_after: FixedDecimal::ZERO,
            bad_debt,
            margin_to_vault: remain_margin.try_neg()?,
        })
    }
}
