// 8.10: end of a market's life. shutdown freezes the curve at one settlement price, then each
// trader settles against it once. the reserve does not backstop settlement.

use super::core::Engine;
use super::results::{EngineError, SettlementResult};
use crate::events::{DebtReason, EventPayload, MarketShutdownEvent, PositionSettledEvent};
use crate::fixed::FixedDecimal;
use crate::position::Position;
use crate::token::Holder;
use crate::types::{AccountId, MarketId};
use tracing::{info, warn};

/// What a position is worth at `settlement_price`, never below zero.
pub(super) fn settlement_value(position: &Position, settlement_price: FixedDecimal) -> Result<FixedDecimal, EngineError> {
    if settlement_price.is_zero() {
        return Ok(position.margin.non_negative());
    }
    let entry_price = position.open_notional.try_div(position.size.abs())?;
    let pnl = position.size.try_mul(settlement_price.try_sub(entry_price)?)?;
    Ok(pnl.try_add(position.margin)?.non_negative())
}

impl Engine {
    pub fn shutdown_market(&mut self, market_id: MarketId) -> Result<FixedDecimal, EngineError> {
        self.atomically(|engine| {
            let settlement_price = engine.market_mut(market_id)?.amm.shutdown()?;
            info!(market = market_id.0, %settlement_price, "market shut down");
            engine.emit_event(EventPayload::MarketShutdown(MarketShutdownEvent {
                market_id,
                settlement_price,
            }));
            Ok(settlement_price)
        })
    }

    pub fn settle_position(&mut self, market_id: MarketId, trader: AccountId) -> Result<SettlementResult, EngineError> {
        self.atomically(|engine| {
            if engine.market_ref(market_id)?.amm.is_open() {
                return Err(EngineError::MarketOpen(market_id));
            }
            let (position, _) = engine.touch_position(market_id, trader)?;
            if !position.has_size() {
                return Err(EngineError::NothingToClose);
            }
            engine.market_mut(market_id)?.clear_position(trader);

            let settlement_price = engine.market_ref(market_id)?.amm.settlement_price();
            let value = settlement_value(&position, settlement_price)?;

            let token = engine.quote_token(market_id)?;
            let vault = engine.ledger.balance_of(token, Holder::Vault)?;
            let (paid, unresolved) = if vault < value {
                warn!(market = market_id.0, trader = trader.0, %value, %vault, "vault cannot pay settlement");
                engine.record_unresolved_debt(token, value, DebtReason::SettlementShortfall)?;
                (FixedDecimal::ZERO, value)
            } else {
                let paid = engine
                    .ledger
                    .transfer(token, Holder::Vault, Holder::Trader(trader), value)?;
                (paid, FixedDecimal::ZERO)
            };

            engine.emit_event(EventPayload::PositionSettled(PositionSettledEvent {
                market_id,
                account_id: trader,
                value_transferred: paid,
            }));
            Ok(SettlementResult {
                market_id,
                account_id: trader,
                settlement_price,
                value,
                paid,
                unresolved,
            })
        })
    }
}
