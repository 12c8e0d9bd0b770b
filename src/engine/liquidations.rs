//! Liquidation detection and execution.

use super::core::Engine;
use super::results::{EngineError, LiquidationResult};
use crate::events::{EventPayload, PositionChangedEvent, PositionLiquidatedEvent};
use crate::fixed::FixedDecimal;
use crate::liquidation::{calculate_liquidation_penalty, evaluate_status, split_remaining_margin, MarginStatus};
use crate::margin::calc_remain_margin;
use crate::position::Position;
use crate::types::{AccountId, MarketId, Side};
use tracing::{info, warn};

// what one liquidation decided, before the liquidator is paid
struct LiquidationOutcome {
    position: Position,
    partial: bool,
    exchanged_size: FixedDecimal,
    exchanged_notional: FixedDecimal,
    realized_pnl: FixedDecimal,
    penalty: FixedDecimal,
    fee_to_liquidator: FixedDecimal,
    fee_to_insurance_fund: FixedDecimal,
    bad_debt: FixedDecimal,
}

impl Engine {
    /// Margin health of a position, valued with the less favourable of spot and twap pnl.
    pub fn evaluate(&self, market_id: MarketId, trader: AccountId) -> Result<MarginStatus, EngineError> {
        let ratio = self.margin_ratio(market_id, trader)?;
        Ok(evaluate_status(ratio, self.config.margin.maintenance_margin_ratio))
    }

    /// Every trader on the market whose position can be liquidated right now.
    pub fn liquidatable_accounts(&self, market_id: MarketId) -> Result<Vec<(AccountId, MarginStatus)>, EngineError> {
        let market = self.market_ref(market_id)?;
        let mut traders: Vec<AccountId> = market
            .positions
            .iter()
            .filter(|(_, p)| p.has_size())
            .map(|(id, _)| *id)
            .collect();
        traders.sort();

        let mut found = Vec::new();
        for trader in traders {
            let status = self.evaluate(market_id, trader)?;
            if status.is_liquidatable() {
                found.push((trader, status));
            }
        }
        Ok(found)
    }

    pub fn liquidate(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        liquidator: AccountId,
    ) -> Result<LiquidationResult, EngineError> {
        self.atomically(|engine| engine.liquidate_inner(market_id, trader, liquidator))
    }

    fn liquidate_inner(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        liquidator: AccountId,
    ) -> Result<LiquidationResult, EngineError> {
        self.open_market_mut(market_id)?;
        let status = self.evaluate(market_id, trader)?;
        if !status.is_liquidatable() {
            return Err(EngineError::NotLiquidatable);
        }

        let (old, funding_payment) = self.touch_position(market_id, trader)?;
        let token = self.quote_token(market_id)?;

        let outcome = match self.partial_close_notional(market_id, &old)? {
            Some(partial_notional) => self.liquidate_partially(market_id, trader, liquidator, &old, partial_notional)?,
            None => self.liquidate_fully(market_id, liquidator, &old)?,
        };

        let block = self.clock.number;
        {
            let market = self.market_mut(market_id)?;
            market.set_position(trader, outcome.position);
            market.record_action(trader, block);
            market.enter_restriction_mode(block);
        }

        self.transfer_to_insurance_fund(token, outcome.fee_to_insurance_fund)?;
        let liquidator_paid = self.withdraw_from_vault(token, liquidator, outcome.fee_to_liquidator)?;
        outcome.position.validate()?;

        info!(
            market = market_id.0,
            trader = trader.0,
            liquidator = liquidator.0,
            margin_ratio = %status.margin_ratio(),
            partial = outcome.partial,
            notional = %outcome.exchanged_notional,
            bad_debt = %outcome.bad_debt,
            "position liquidated"
        );

        let spot_price = self.spot_price(market_id)?;
        self.emit_event(EventPayload::PositionChanged(PositionChangedEvent {
            market_id,
            account_id: trader,
            margin: outcome.position.margin,
            exchanged_notional: outcome.exchanged_notional,
            exchanged_size: outcome.exchanged_size,
            fee: FixedDecimal::ZERO,
            position_size_after: outcome.position.size,
            realized_pnl: outcome.realized_pnl,
            unrealized_pnl_after: FixedDecimal::ZERO,
            bad_debt: outcome.bad_debt,
            liquidation_penalty: outcome.penalty,
            spot_price,
            funding_payment,
        }));
        self.emit_event(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
            market_id,
            account_id: trader,
            liquidator,
            exchanged_notional: outcome.exchanged_notional,
            exchanged_size: outcome.exchanged_size,
            fee_to_liquidator: outcome.fee_to_liquidator,
            fee_to_insurance_fund: outcome.fee_to_insurance_fund,
            bad_debt: outcome.bad_debt,
            partial: outcome.partial,
        }));

        Ok(LiquidationResult {
            market_id,
            account_id: trader,
            liquidator,
            partial: outcome.partial,
            exchanged_size: outcome.exchanged_size,
            exchanged_notional: outcome.exchanged_notional,
            fee_to_liquidator: outcome.fee_to_liquidator,
            fee_to_insurance_fund: outcome.fee_to_insurance_fund,
            bad_debt: outcome.bad_debt,
            liquidator_paid,
            position: outcome.position,
        })
    }

    // 8.11: the close leg lost more than the margin held. only a backstop lp takes that on.
    fn require_backstop(&self, liquidator: AccountId, bad_debt: FixedDecimal) -> Result<(), EngineError> {
        if bad_debt.is_positive() && !self.is_backstop_liquidity_provider(liquidator) {
            warn!(liquidator = liquidator.0, %bad_debt, "liquidation with bad debt needs a backstop lp");
            return Err(EngineError::BadDebt);
        }
        Ok(())
    }

    // 8.11.1: close a slice with leverage 1, bypassing the fluctuation limit. the penalty comes
    // out of what margin is left; the reserve pays any part it cannot.
    fn liquidate_partially(
        &mut self,
        market_id: MarketId,
        trader: AccountId,
        liquidator: AccountId,
        old: &Position,
        partial_notional: FixedDecimal,
    ) -> Result<LiquidationOutcome, EngineError> {
        let side = Side::of(old.size).map(|s| s.opposite()).ok_or(EngineError::NoPosition)?;
        let change = self.open_reverse_position(
            market_id,
            trader,
            old,
            side,
            partial_notional,
            FixedDecimal::ONE,
            FixedDecimal::ZERO,
            true,
        )?;
        self.require_backstop(liquidator, change.bad_debt)?;

        let liquidation_fee_ratio = self.config.margin.liquidation_fee_ratio;
        let penalty = calculate_liquidation_penalty(change.exchanged_notional, liquidation_fee_ratio)?;
        let mut position = change.position;
        let (remain_margin, penalty_shortfall) = calc_remain_margin(position.margin, penalty.total.try_neg()?)?;
        position.margin = remain_margin;

        let bad_debt = change.bad_debt.try_add(penalty_shortfall)?;
        let token = self.quote_token(market_id)?;
        self.realize_bad_debt(token, bad_debt)?;

        Ok(LiquidationOutcome {
            position,
            partial: true,
            exchanged_size: change.exchanged_size,
            exchanged_notional: change.exchanged_notional,
            realized_pnl: change.realized_pnl,
            penalty: penalty.total,
            fee_to_liquidator: penalty.liquidator_reward,
            fee_to_insurance_fund: penalty.insurance_contribution,
            bad_debt,
        })
    }

    // 8.11.2: close everything. the liquidator's half comes out of the remaining margin, the
    // rest of the margin goes to the reserve.
    fn liquidate_fully(
        &mut self,
        market_id: MarketId,
        liquidator: AccountId,
        old: &Position,
    ) -> Result<LiquidationOutcome, EngineError> {
        let change = self.close_position_internal(market_id, old, FixedDecimal::ZERO, true)?;
        self.require_backstop(liquidator, change.bad_debt)?;

        let liquidation_fee_ratio = self.config.margin.liquidation_fee_ratio;
        let penalty = calculate_liquidation_penalty(change.exchanged_notional, liquidation_fee_ratio)?;
        let remain_margin = change.margin_to_vault.try_neg()?;
        let split = split_remaining_margin(remain_margin, penalty.liquidator_reward)?;

        let bad_debt = change.bad_debt.try_add(split.liquidation_bad_debt)?;
        let token = self.quote_token(market_id)?;
        self.realize_bad_debt(token, bad_debt)?;

        Ok(LiquidationOutcome {
            position: change.position,
            partial: false,
            exchanged_size: change.exchanged_size,
            exchanged_notional: change.exchanged_notional,
            realized_pnl: change.realized_pnl,
            penalty: penalty.total,
            fee_to_liquidator: penalty.liquidator_reward,
            fee_to_insurance_fund: split.remain_to_reserve,
            bad_debt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::market::MarketConfig;
    use crate::token::Holder;
    use crate::types::{BlockTime, TokenId};

    const USDC: TokenId = TokenId(1);
    const ALICE: AccountId = AccountId(1);
    const BOB: AccountId = AccountId(2);
    const KEEPER: AccountId = AccountId(3);
    const FUNDER: AccountId = AccountId(9);

    fn fx(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn setup() -> (Engine, MarketId) {
        let mut engine = Engine::new(EngineConfig::default(), BlockTime::genesis());
        engine.register_token(USDC, "USDC", Some(18));
        let mut config = MarketConfig::eth_perp(USDC);
        config.amm.spread_ratio = FixedDecimal::ZERO;
        config.amm.trade_limit_ratio = FixedDecimal::ZERO;
        let id = engine.add_market(config).unwrap();
        for who in [ALICE, BOB, FUNDER] {
            engine.mint(USDC, who, fx("10000")).unwrap();
        }
        engine.fund_insurance(USDC, FUNDER, fx("5000")).unwrap();
        engine.advance_time(15_000);
        (engine, id)
    }

    // alice long 600 at 10x, then bob shorts 200: price falls from 25.6 to about 19.6
    fn underwater(engine: &mut Engine, id: MarketId) {
        engine
            .open_position(id, ALICE, Side::Long, fx("60"), fx("10"), FixedDecimal::ZERO)
            .unwrap();
        engine.advance_time(15_000);
        engine
            .open_position(id, BOB, Side::Short, fx("20"), fx("10"), FixedDecimal::ZERO)
            .unwrap();
        // past the twap window so spot and twap agree
        engine.advance_time(16 * 60_000);
    }

    #[test]
    fn healthy_positions_are_not_liquidatable() {
        let (mut engine, id) = setup();
        engine
            .open_position(id, ALICE, Side::Long, fx("60"), fx("2"), FixedDecimal::ZERO)
            .unwrap();
        engine.advance_time(16 * 60_000);
        assert!(!engine.evaluate(id, ALICE).unwrap().is_liquidatable());
        assert_eq!(engine.liquidate(id, ALICE, KEEPER), Err(EngineError::NotLiquidatable));
        assert_eq!(engine.evaluate(id, BOB), Err(EngineError::NoPosition));
    }

    #[test]
    fn full_liquidation_pays_keeper_and_reserve() {
        let (mut engine, id) = setup();
        underwater(&mut engine, id);
        let status = engine.evaluate(id, ALICE).unwrap();
        assert!(status.is_liquidatable());
        assert_eq!(engine.liquidatable_accounts(id).unwrap(), vec![(ALICE, status)]);

        // loss beyond margin: only a backstop lp may take it on
        assert_eq!(engine.liquidate(id, ALICE, KEEPER), Err(EngineError::BadDebt));
        engine.set_backstop_liquidity_provider(KEEPER, true);
        let result = engine.liquidate(id, ALICE, KEEPER).unwrap();

        assert!(!result.partial);
        assert!(result.bad_debt.is_positive());
        assert_eq!(result.fee_to_insurance_fund, FixedDecimal::ZERO);
        assert_eq!(result.liquidator_paid, result.fee_to_liquidator);
        assert_eq!(engine.balance_of(USDC, Holder::Trader(KEEPER)).unwrap(), result.fee_to_liquidator);
        assert!(engine.position(id, ALICE).unwrap().is_empty());
        assert_eq!(engine.unresolved_debt(USDC), FixedDecimal::ZERO);
        assert!(engine
            .events()
            .iter()
            .any(|e| matches!(e.payload, EventPayload::PositionLiquidated(_))));
    }

    #[test]
    fn liquidation_restricts_the_block() {
        let (mut engine, id) = setup();
        underwater(&mut engine, id);
        engine.set_backstop_liquidity_provider(KEEPER, true);
        engine.liquidate(id, ALICE, KEEPER).unwrap();

        // the liquidated trader already acted this block
        assert_eq!(
            engine.open_position(id, ALICE, Side::Long, fx("10"), fx("1"), FixedDecimal::ZERO),
            Err(EngineError::OneActionPerBlock)
        );
        // everyone else gets one action
        engine
            .open_position(id, BOB, Side::Short, fx("10"), fx("1"), FixedDecimal::ZERO)
            .unwrap();
        assert_eq!(
            engine.open_position(id, BOB, Side::Short, fx("10"), fx("1"), FixedDecimal::ZERO),
            Err(EngineError::OneActionPerBlock)
        );
        engine.advance_time(15_000);
        engine
            .open_position(id, ALICE, Side::Long, fx("10"), fx("1"), FixedDecimal::ZERO)
            .unwrap();
    }

    // alice long 600 at 10x, then bob buys 600 more: price climbs from 25.6 to about 48.4
    fn thin_but_profitable(engine: &mut Engine, id: MarketId) {
        engine
            .open_position(id, ALICE, Side::Long, fx("60"), fx("10"), FixedDecimal::ZERO)
            .unwrap();
        engine.advance_time(15_000);
        engine
            .open_position(id, BOB, Side::Long, fx("60"), fx("10"), FixedDecimal::ZERO)
            .unwrap();
        engine.advance_time(16 * 60_000);
    }

    fn close_to(a: FixedDecimal, b: FixedDecimal) -> bool {
        a.try_sub(b).unwrap().abs() <= FixedDecimal::from_raw(1_000)
    }

    fn last_change(engine: &Engine) -> PositionChangedEvent {
        engine
            .events()
            .iter()
            .rev()
            .find_map(|e| match &e.payload {
                EventPayload::PositionChanged(event) => Some(event.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn unrealized_profit_does_not_count_toward_maintenance() {
        let (mut engine, id) = setup();
        thin_but_profitable(&mut engine, id);

        // 37.5 base now sells for about 994.5 against 600 paid
        let (notional, pnl) = engine
            .position_notional_and_unrealized_pnl(id, ALICE, crate::types::PnlCalcOption::SpotPrice)
            .unwrap();
        assert!(pnl > fx("394") && pnl < fx("395"), "pnl {pnl}");
        let with_profit = fx("60").try_add(pnl).unwrap().try_div(notional).unwrap();
        assert!(with_profit > fx("0.45"));

        // 60 / 994.5 is under the 6.25% maintenance ratio
        let status = engine.evaluate(id, ALICE).unwrap();
        assert!(matches!(status, MarginStatus::Liquidatable { .. }), "{status:?}");
        assert!(status.margin_ratio() > fx("0.06") && status.margin_ratio() < fx("0.0625"));
        assert_eq!(engine.liquidatable_accounts(id).unwrap(), vec![(ALICE, status)]);

        // no loss beyond margin, so any keeper may close it
        let result = engine.liquidate(id, ALICE, KEEPER).unwrap();
        assert!(!result.partial);
        assert_eq!(result.bad_debt, FixedDecimal::ZERO);
        assert!(result.fee_to_insurance_fund.is_positive());
        assert_eq!(result.liquidator_paid, result.fee_to_liquidator);
        assert_eq!(engine.balance_of(USDC, Holder::Trader(KEEPER)).unwrap(), result.fee_to_liquidator);
        assert!(engine.position(id, ALICE).unwrap().is_empty());
    }

    #[test]
    fn partial_liquidation_takes_penalty_from_margin() {
        let (mut engine, id) = setup();
        thin_but_profitable(&mut engine, id);
        engine.set_fluctuation_limit_ratio(id, fx("0.05")).unwrap();

        let result = engine.liquidate(id, ALICE, KEEPER).unwrap();
        assert!(result.partial);
        // a quarter of 37.5 is sold, past the limit
        assert!(close_to(result.exchanged_size, fx("-9.375")), "{}", result.exchanged_size);
        assert!(close_to(result.position.size, fx("28.125")), "{}", result.position.size);
        assert_eq!(result.bad_debt, FixedDecimal::ZERO);

        let change = last_change(&engine);
        let penalty = calculate_liquidation_penalty(result.exchanged_notional, fx("0.0125")).unwrap();
        assert_eq!(change.liquidation_penalty, penalty.total);
        assert_eq!(result.fee_to_liquidator, penalty.liquidator_reward);
        assert_eq!(result.fee_to_insurance_fund, penalty.insurance_contribution);
        // realized profit joins the margin, the penalty leaves it
        assert!(change.realized_pnl.is_positive());
        assert_eq!(
            result.position.margin,
            fx("60").try_add(change.realized_pnl).unwrap().try_sub(penalty.total).unwrap()
        );
        assert_eq!(engine.position(id, ALICE).unwrap(), result.position);
        assert_eq!(result.liquidator_paid, result.fee_to_liquidator);
    }

    #[test]
    fn partial_liquidation_penalty_beyond_margin_is_bad_debt() {
        let (mut engine, id) = setup();
        let mut params = engine.margin_params().clone();
        params.liquidation_fee_ratio = fx("0.5");
        engine.set_margin_params(params);
        thin_but_profitable(&mut engine, id);
        engine.set_fluctuation_limit_ratio(id, fx("0.05")).unwrap();

        // the close leg itself is profitable, so no backstop is needed
        let result = engine.liquidate(id, ALICE, KEEPER).unwrap();
        assert!(result.partial);
        assert_eq!(result.position.margin, FixedDecimal::ZERO);

        // half of about 376 notional against about 158.6 of margin
        let change = last_change(&engine);
        let margin_before_penalty = fx("60").try_add(change.realized_pnl).unwrap();
        assert_eq!(
            result.bad_debt,
            change.liquidation_penalty.try_sub(margin_before_penalty).unwrap()
        );
        assert!(result.bad_debt > fx("29") && result.bad_debt < fx("30"), "bad debt {}", result.bad_debt);

        let bad_debt = engine
            .events()
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::BadDebt(event) => Some(event.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(bad_debt.debt_amount, result.bad_debt);
        assert_eq!(engine.unresolved_debt(USDC), FixedDecimal::ZERO);
        assert_eq!(result.liquidator_paid, result.fee_to_liquidator);
    }
}
