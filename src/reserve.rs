//! Insurance fund.
//!
//! Holds spread fees, liquidation penalties and forfeited margin, and pays them back into
//! the vault whenever the vault comes up short. Tokens live in the shared [`Ledger`] under
//! [`Holder::InsuranceFund`]; this type only keeps the books around them.

use crate::fixed::FixedDecimal;
use crate::token::{Holder, Ledger, TransferError};
use crate::types::TokenId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStats {
    pub total_deposits: FixedDecimal,
    pub total_payouts: FixedDecimal,
    pub fee_income: FixedDecimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsuranceFund {
    stats: HashMap<TokenId, ReserveStats>,
    /// A frozen fund keeps accepting income but covers nothing.
    frozen: bool,
}

impl InsuranceFund {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, ledger: &Ledger, token: TokenId) -> Result<FixedDecimal, TransferError> {
        ledger.balance_of(token, Holder::InsuranceFund)
    }

    pub fn stats(&self, token: TokenId) -> ReserveStats {
        self.stats.get(&token).copied().unwrap_or_default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn deposit(
        &mut self,
        ledger: &mut Ledger,
        token: TokenId,
        from: Holder,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, TransferError> {
        let moved = ledger.transfer(token, from, Holder::InsuranceFund, amount)?;
        let entry = self.stats.entry(token).or_default();
        entry.total_deposits = entry.total_deposits.try_add(moved).map_err(|_| TransferError::Unrepresentable(moved))?;
        debug!(token = token.0, %moved, %from, "insurance fund deposit");
        Ok(moved)
    }

    /// Bookkeeping for spread fees that were already paid in.
    pub fn notify_fee_income(&mut self, token: TokenId, amount: FixedDecimal) -> Result<(), TransferError> {
        let entry = self.stats.entry(token).or_default();
        entry.fee_income = entry.fee_income.try_add(amount).map_err(|_| TransferError::Unrepresentable(amount))?;
        Ok(())
    }

    pub fn can_cover(&self, ledger: &Ledger, token: TokenId, amount: FixedDecimal) -> Result<bool, TransferError> {
        Ok(!self.frozen && self.balance(ledger, token)? >= amount)
    }

    // pays as much of `amount` into the vault as it holds. the caller records the rest as debt.
    pub fn cover_shortfall(
        &mut self,
        ledger: &mut Ledger,
        token: TokenId,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, TransferError> {
        if !amount.is_positive() {
            return Ok(FixedDecimal::ZERO);
        }
        if self.frozen {
            warn!(token = token.0, %amount, "insurance fund frozen, shortfall not covered");
            return Ok(FixedDecimal::ZERO);
        }
        let available = self.balance(ledger, token)?;
        let covered = ledger.transfer(token, Holder::InsuranceFund, Holder::Vault, amount.min(available))?;
        let entry = self.stats.entry(token).or_default();
        entry.total_payouts = entry.total_payouts.try_add(covered).map_err(|_| TransferError::Unrepresentable(covered))?;
        if covered < amount {
            warn!(token = token.0, %amount, %covered, "insurance fund could not cover shortfall");
        }
        Ok(covered)
    }
}
