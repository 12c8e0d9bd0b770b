// 8.0 engine/core.rs: main engine. holds all markets, the token ledger, insurance fund, fee pool
// and the debt books. every public mutating op runs through `atomically`.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::events::{DebtReason, Event, EventId, EventPayload, MarketAddedEvent, UnresolvedDebtEvent};
use crate::fee_pool::FeePool;
use crate::fixed::FixedDecimal;
use crate::margin::MarginParams;
use crate::market::{MarketConfig, MarketState};
use crate::reserve::InsuranceFund;
use crate::token::{Holder, Ledger};
use crate::types::{AccountId, BlockTime, MarketId, Timestamp, TokenId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) markets: HashMap<MarketId, MarketState>,
    pub(super) ledger: Ledger,
    pub(super) insurance_fund: InsuranceFund,
    pub(super) fee_pool: FeePool,
    pub(super) backstop_liquidity_providers: HashSet<AccountId>,
    pub(super) prepaid_bad_debt: HashMap<TokenId, FixedDecimal>,
    pub(super) unresolved_debt: HashMap<TokenId, FixedDecimal>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) clock: BlockTime,
    // nonzero while an `atomically` op runs; the event log is trimmed only once it commits
    pub(super) atomic_depth: usize,
}

// everything an operation may touch, taken before it runs
struct Checkpoint {
    markets: HashMap<MarketId, MarketState>,
    ledger: Ledger,
    insurance_fund: InsuranceFund,
    fee_pool: FeePool,
    prepaid_bad_debt: HashMap<TokenId, FixedDecimal>,
    unresolved_debt: HashMap<TokenId, FixedDecimal>,
    next_event_id: u64,
}

impl Engine {
    pub fn new(config: EngineConfig, genesis: BlockTime) -> Self {
        Self {
            config,
            markets: HashMap::new(),
            ledger: Ledger::new(),
            insurance_fund: InsuranceFund::new(),
            fee_pool: FeePool::new(),
            backstop_liquidity_providers: HashSet::new(),
            prepaid_bad_debt: HashMap::new(),
            unresolved_debt: HashMap::new(),
            events: Vec::new(),
            next_event_id: 1,
            clock: genesis,
            atomic_depth: 0,
        }
    }

    // 8.1.1: clock. every advance mines a new block.
    pub fn clock(&self) -> BlockTime {
        self.clock
    }

    pub fn time(&self) -> Timestamp {
        self.clock.timestamp
    }

    pub fn block_number(&self) -> u64 {
        self.clock.number
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.clock = self.clock.advance(millis);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn margin_params(&self) -> &MarginParams {
        &self.config.margin
    }

    pub fn set_margin_params(&mut self, margin: MarginParams) {
        self.config.margin = margin;
    }

    // 8.1.2: tokens and balances
    pub fn register_token(&mut self, token: TokenId, symbol: &str, decimals: Option<u8>) {
        self.ledger.register_token(token, symbol, decimals);
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Credits a trader wallet. Simulation and test setup only.
    pub fn mint(&mut self, token: TokenId, account: AccountId, amount: FixedDecimal) -> Result<FixedDecimal, EngineError> {
        Ok(self.ledger.mint(token, Holder::Trader(account), amount)?)
    }

    pub fn balance_of(&self, token: TokenId, holder: Holder) -> Result<FixedDecimal, EngineError> {
        Ok(self.ledger.balance_of(token, holder)?)
    }

    pub fn fund_insurance(&mut self, token: TokenId, from: AccountId, amount: FixedDecimal) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine
                .insurance_fund
                .deposit(&mut engine.ledger, token, Holder::Trader(from), amount)?;
            Ok(())
        })
    }

    pub fn insurance_fund(&self) -> &InsuranceFund {
        &self.insurance_fund
    }

    pub fn insurance_fund_mut(&mut self) -> &mut InsuranceFund {
        &mut self.insurance_fund
    }

    pub fn fee_pool(&self) -> &FeePool {
        &self.fee_pool
    }

    pub fn prepaid_bad_debt(&self, token: TokenId) -> FixedDecimal {
        self.prepaid_bad_debt.get(&token).copied().unwrap_or_default()
    }

    pub fn unresolved_debt(&self, token: TokenId) -> FixedDecimal {
        self.unresolved_debt.get(&token).copied().unwrap_or_default()
    }

    // 8.1.3: markets
    pub fn add_market(&mut self, config: MarketConfig) -> Result<MarketId, EngineError> {
        config.validate()?;
        let market_id = config.id;
        if self.markets.contains_key(&market_id) {
            return Err(EngineError::MarketExists(market_id));
        }
        let quote_token = config.quote_token;
        self.ledger.token(quote_token)?;

        let state = MarketState::new(config, self.clock)?;
        let (quote_reserve, base_reserve) = (state.amm.quote_reserve(), state.amm.base_reserve());
        info!(market = market_id.0, name = %state.config.name, %quote_reserve, %base_reserve, "market added");
        self.markets.insert(market_id, state);
        self.emit_event(EventPayload::MarketAdded(MarketAddedEvent {
            market_id,
            quote_token,
            quote_reserve,
            base_reserve,
        }));
        Ok(market_id)
    }

    pub fn market(&self, market_id: MarketId) -> Option<&MarketState> {
        self.markets.get(&market_id)
    }

    pub fn market_ids(&self) -> Vec<MarketId> {
        let mut ids: Vec<MarketId> = self.markets.keys().copied().collect();
        ids.sort();
        ids
    }

    pub(super) fn market_ref(&self, market_id: MarketId) -> Result<&MarketState, EngineError> {
        self.markets.get(&market_id).ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn market_mut(&mut self, market_id: MarketId) -> Result<&mut MarketState, EngineError> {
        self.markets.get_mut(&market_id).ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn open_market_mut(&mut self, market_id: MarketId) -> Result<&mut MarketState, EngineError> {
        let market = self.market_mut(market_id)?;
        if !market.amm.is_open() {
            return Err(EngineError::MarketClosed);
        }
        Ok(market)
    }

    pub(super) fn quote_token(&self, market_id: MarketId) -> Result<TokenId, EngineError> {
        Ok(self.market_ref(market_id)?.config.quote_token)
    }

    // 8.1.4: admin setters
    pub fn set_fee_ratios(
        &mut self,
        market_id: MarketId,
        toll_ratio: FixedDecimal,
        spread_ratio: FixedDecimal,
    ) -> Result<(), EngineError> {
        self.market_mut(market_id)?.amm.set_fee_ratios(toll_ratio, spread_ratio);
        Ok(())
    }

    pub fn set_fluctuation_limit_ratio(&mut self, market_id: MarketId, ratio: FixedDecimal) -> Result<(), EngineError> {
        self.market_mut(market_id)?.amm.set_fluctuation_limit_ratio(ratio);
        Ok(())
    }

    pub fn set_trade_limit_ratio(&mut self, market_id: MarketId, ratio: FixedDecimal) -> Result<(), EngineError> {
        self.market_mut(market_id)?.amm.set_trade_limit_ratio(ratio);
        Ok(())
    }

    pub fn set_max_holding_base(&mut self, market_id: MarketId, cap: FixedDecimal) -> Result<(), EngineError> {
        self.market_mut(market_id)?.amm.set_max_holding_base(cap);
        Ok(())
    }

    pub fn set_open_interest_notional_cap(&mut self, market_id: MarketId, cap: FixedDecimal) -> Result<(), EngineError> {
        self.market_mut(market_id)?.amm.set_open_interest_notional_cap(cap);
        Ok(())
    }

    pub fn set_whitelisted(&mut self, market_id: MarketId, account: AccountId, whitelisted: bool) -> Result<(), EngineError> {
        self.market_mut(market_id)?.amm.set_whitelisted(account, whitelisted);
        Ok(())
    }

    pub fn set_backstop_liquidity_provider(&mut self, account: AccountId, enabled: bool) {
        if enabled {
            self.backstop_liquidity_providers.insert(account);
        } else {
            self.backstop_liquidity_providers.remove(&account);
        }
    }

    pub fn is_backstop_liquidity_provider(&self, account: AccountId) -> bool {
        self.backstop_liquidity_providers.contains(&account)
    }

    // 8.1.5: events
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.clock.timestamp, self.clock.number, payload);
        self.next_event_id += 1;

        debug!(id = event.id.0, block = event.block_number, payload = ?event.payload, "event");

        self.events.push(event);
        if self.atomic_depth == 0 {
            self.trim_events();
        }
    }

    fn trim_events(&mut self) {
        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }

    pub(super) fn record_unresolved_debt(
        &mut self,
        token: TokenId,
        amount: FixedDecimal,
        reason: DebtReason,
    ) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Ok(());
        }
        let total = self.unresolved_debt.entry(token).or_default();
        *total = total.try_add(amount)?;
        warn!(token = token.0, %amount, ?reason, total = %*total, "unresolved debt");
        self.emit_event(EventPayload::UnresolvedDebt(UnresolvedDebtEvent { token, amount, reason }));
        Ok(())
    }

    // 8.2: all-or-nothing. on error every market, balance, debt book and event the op touched
    // is put back the way it was.
    pub fn atomically<T, F>(&mut self, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Engine) -> Result<T, EngineError>,
    {
        let checkpoint = Checkpoint {
            markets: self.markets.clone(),
            ledger: self.ledger.clone(),
            insurance_fund: self.insurance_fund.clone(),
            fee_pool: self.fee_pool.clone(),
            prepaid_bad_debt: self.prepaid_bad_debt.clone(),
            unresolved_debt: self.unresolved_debt.clone(),
            next_event_id: self.next_event_id,
        };
        self.atomic_depth += 1;
        let outcome = op(self);
        self.atomic_depth -= 1;
        match outcome {
            Ok(value) => {
                if self.atomic_depth == 0 {
                    self.trim_events();
                }
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "operation rolled back");
                self.markets = checkpoint.markets;
                self.ledger = checkpoint.ledger;
                self.insurance_fund = checkpoint.insurance_fund;
                self.fee_pool = checkpoint.fee_pool;
                self.prepaid_bad_debt = checkpoint.prepaid_bad_debt;
                self.unresolved_debt = checkpoint.unresolved_debt;
                self.events.retain(|e| e.id.0 < checkpoint.next_event_id);
                self.next_event_id = checkpoint.next_event_id;
                Err(err)
            }
        }
    }
}
