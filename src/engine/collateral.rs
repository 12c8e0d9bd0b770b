//! Adding and removing margin on an open position.

use super::core::Engine;
use super::results::EngineError;
use super::valuation::preferred_notional_and_pnl;
use crate::events::{EventPayload, MarginChangedEvent};
use crate::fixed::FixedDecimal;
use crate::margin::{self, calc_remain_margin};
use crate::types::{AccountId, MarketId, PnlPreference};
use tracing::debug;

impl Engine {
    pub fn add_margin(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, EngineError> {
        self.atomically(|engine| {
            if !amount.is_positive() {
                return Err(EngineError::ZeroAmount);
            }
            engine.open_market_mut(market_id)?;
            let (mut position, funding_payment) = engine.touch_position(market_id, trader)?;
            if !position.has_size() {
                return Err(EngineError::NoPosition);
            }

            position.margin = position.margin.try_add(amount)?;
            // funding can leave a hole bigger than the top-up
            if position.margin.is_negative() {
                return Err(EngineError::InsufficientMargin);
            }
            engine.market_mut(market_id)?.set_position(trader, position);

            let token = engine.quote_token(market_id)?;
            engine.pull_to_vault(token, trader, amount)?;
            engine.emit_event(EventPayload::MarginChanged(MarginChangedEvent {
                market_id,
                account_id: trader,
                amount,
                funding_payment,
            }));
            Ok(position.margin)
        })
    }

    /// Withdraws margin as long as free collateral stays non-negative. Returns the margin left.
    pub fn remove_margin(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, EngineError> {
        self.atomically(|engine| {
            if !amount.is_positive() {
                return Err(EngineError::ZeroAmount);
            }
            engine.open_market_mut(market_id)?;
            let (mut position, funding_payment) = engine.touch_position(market_id, trader)?;
            if !position.has_size() {
                return Err(EngineError::NoPosition);
            }

            let (remain_margin, bad_debt) = calc_remain_margin(position.margin, amount.try_neg()?)?;
            if bad_debt.is_positive() {
                return Err(EngineError::InsufficientFreeCollateral);
            }
            position.margin = remain_margin;
            engine.market_mut(market_id)?.set_position(trader, position);

            let free = engine.free_collateral(market_id, trader)?;
            if free.is_negative() {
                debug!(market = market_id.0, trader = trader.0, %free, "margin removal rejected");
                return Err(EngineError::InsufficientFreeCollateral);
            }

            let token = engine.quote_token(market_id)?;
            engine.withdraw_from_vault(token, trader, amount)?;
            engine.emit_event(EventPayload::MarginChanged(MarginChangedEvent {
                market_id,
                account_id: trader,
                amount: amount.try_neg()?,
                funding_payment,
            }));
            Ok(position.margin)
        })
    }

    /// Margin that could be withdrawn right now. Negative when the position is already below
    /// the initial requirement.
    pub fn free_collateral(&self, market_id: MarketId, trader: AccountId) -> Result<FixedDecimal, EngineError> {
        let position = self.current_position(market_id, trader)?;
        let market = self.market_ref(market_id)?;
        let (notional, min_pnl) = preferred_notional_and_pnl(
            &market.amm,
            &position,
            PnlPreference::Min,
            self.config.twap_pnl_interval_ms,
            self.clock.timestamp,
        )?;
        Ok(margin::free_collateral(
            &position,
            min_pnl,
            notional,
            self.config.margin.initial_margin_ratio,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::market::MarketConfig;
    use crate::token::Holder;
    use crate::types::{BlockTime, Side, TokenId};

    const USDC: TokenId = TokenId(1);
    const ALICE: AccountId = AccountId(1);

    fn fx(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn setup_with_long() -> (Engine, MarketId) {
        let mut engine = Engine::new(EngineConfig::default(), BlockTime::genesis());
        engine.register_token(USDC, "USDC", Some(18));
        let mut config = MarketConfig::eth_perp(USDC);
        config.amm.spread_ratio = FixedDecimal::ZERO;
        let id = engine.add_market(config).unwrap();
        engine.mint(USDC, ALICE, fx("1000")).unwrap();
        engine.advance_time(15_000);
        // 120 margin at 5x: 600 notional, 37.5 base
        engine
            .open_position(id, ALICE, Side::Long, fx("120"), fx("5"), FixedDecimal::ZERO)
            .unwrap();
        // past the twap window so both valuations agree
        engine.advance_time(16 * 60_000);
        (engine, id)
    }

    #[test]
    fn add_margin_needs_a_position() {
        let (mut engine, id) = setup_with_long();
        assert_eq!(
            engine.add_margin(id, AccountId(7), fx("1")),
            Err(EngineError::NoPosition)
        );
        assert_eq!(engine.add_margin(id, ALICE, FixedDecimal::ZERO), Err(EngineError::ZeroAmount));
        assert_eq!(engine.add_margin(id, ALICE, fx("40")).unwrap(), fx("160"));
        assert_eq!(engine.balance_of(USDC, Holder::Vault).unwrap(), fx("160"));
    }

    #[test]
    fn remove_margin_respects_initial_requirement() {
        let (mut engine, id) = setup_with_long();
        // requirement is 10% of 600 cost basis
        let free = engine.free_collateral(id, ALICE).unwrap();
        assert_eq!(free, fx("60"));

        assert_eq!(
            engine.remove_margin(id, ALICE, fx("61")),
            Err(EngineError::InsufficientFreeCollateral)
        );
        assert_eq!(engine.remove_margin(id, ALICE, fx("60")).unwrap(), fx("60"));
        assert_eq!(engine.balance_of(USDC, Holder::Trader(ALICE)).unwrap(), fx("940"));
        assert_eq!(engine.free_collateral(id, ALICE).unwrap(), FixedDecimal::ZERO);
    }

    #[test]
    fn cannot_remove_more_than_margin() {
        let (mut engine, id) = setup_with_long();
        assert_eq!(
            engine.remove_margin(id, ALICE, fx("121")),
            Err(EngineError::InsufficientFreeCollateral)
        );
        assert_eq!(engine.position(id, ALICE).unwrap().margin, fx("120"));
    }
}
