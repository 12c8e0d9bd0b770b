//! Token movement between traders, the vault, the insurance fund and the fee pool.
//!
//! The vault holds every trader's margin. When it cannot pay, the insurance fund tops it up
//! and the top-up is remembered as prepaid bad debt; whatever neither can pay becomes
//! unresolved debt.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{BadDebtEvent, DebtReason, EventPayload};
use crate::fixed::FixedDecimal;
use crate::token::Holder;
use crate::types::{AccountId, TokenId};
use tracing::warn;

impl Engine {
    pub(super) fn pull_to_vault(
        &mut self,
        token: TokenId,
        from: AccountId,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, EngineError> {
        if !amount.is_positive() {
            return Ok(FixedDecimal::ZERO);
        }
        Ok(self.ledger.transfer(token, Holder::Trader(from), Holder::Vault, amount)?)
    }

    /// Pays `amount` out of the vault. Returns what actually reached the recipient.
    pub(super) fn withdraw_from_vault(
        &mut self,
        token: TokenId,
        to: AccountId,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, EngineError> {
        if !amount.is_positive() {
            return Ok(FixedDecimal::ZERO);
        }
        let vault = self.ledger.balance_of(token, Holder::Vault)?;
        if vault < amount {
            let shortfall = amount.try_sub(vault)?;
            let covered = self.insurance_fund.cover_shortfall(&mut self.ledger, token, shortfall)?;
            if covered.is_positive() {
                let prepaid = self.prepaid_bad_debt.entry(token).or_default();
                *prepaid = prepaid.try_add(covered)?;
            }
            let uncovered = shortfall.try_sub(covered)?;
            if uncovered.is_positive() {
                warn!(token = token.0, account = to.0, %amount, %uncovered, "vault cannot pay in full");
                self.record_unresolved_debt(token, uncovered, DebtReason::VaultShortfall)?;
            }
        }
        let payable = amount.min(self.ledger.balance_of(token, Holder::Vault)?);
        Ok(self.ledger.transfer(token, Holder::Vault, Holder::Trader(to), payable)?)
    }

    // 8.3: losses nobody's margin covers. insurance top-ups already made for this token
    // count first, then the fund pays, the rest is unresolved.
    pub(super) fn realize_bad_debt(&mut self, token: TokenId, amount: FixedDecimal) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Ok(());
        }
        let prepaid = self.prepaid_bad_debt(token);
        let from_prepaid = prepaid.min(amount);
        self.prepaid_bad_debt.insert(token, prepaid.try_sub(from_prepaid)?);

        let remaining = amount.try_sub(from_prepaid)?;
        let covered_by_insurance = self.insurance_fund.cover_shortfall(&mut self.ledger, token, remaining)?;
        let unresolved = remaining.try_sub(covered_by_insurance)?;

        warn!(
            token = token.0,
            %amount,
            %from_prepaid,
            %covered_by_insurance,
            %unresolved,
            "bad debt realized"
        );
        self.emit_event(EventPayload::BadDebt(BadDebtEvent {
            token,
            debt_amount: amount,
            from_prepaid,
            covered_by_insurance,
            unresolved,
        }));
        self.record_unresolved_debt(token, unresolved, DebtReason::BadDebt)
    }

    /// Moves up to `amount` of vault funds into the insurance fund.
    pub(super) fn transfer_to_insurance_fund(
        &mut self,
        token: TokenId,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, EngineError> {
        if !amount.is_positive() {
            return Ok(FixedDecimal::ZERO);
        }
        let vault = self.ledger.balance_of(token, Holder::Vault)?;
        Ok(self
            .insurance_fund
            .deposit(&mut self.ledger, token, Holder::Vault, amount.min(vault))?)
    }

    // toll to the fee pool, spread to the insurance fund. both paid by the trader on top of margin.
    pub(super) fn charge_fees(
        &mut self,
        token: TokenId,
        trader: AccountId,
        toll: FixedDecimal,
        spread: FixedDecimal,
    ) -> Result<FixedDecimal, EngineError> {
        let mut total = FixedDecimal::ZERO;
        if toll.is_positive() {
            let moved = self.fee_pool.collect(&mut self.ledger, token, Holder::Trader(trader), toll)?;
            total = total.try_add(moved)?;
        }
        if spread.is_positive() {
            let moved = self
                .insurance_fund
                .deposit(&mut self.ledger, token, Holder::Trader(trader), spread)?;
            self.insurance_fund.notify_fee_income(token, moved)?;
            total = total.try_add(moved)?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::types::BlockTime;

    const USDC: TokenId = TokenId(1);
    const ALICE: AccountId = AccountId(1);
    const FUNDER: AccountId = AccountId(9);

    fn fx(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn engine() -> Engine {
        let mut engine = Engine::new(EngineConfig::default(), BlockTime::genesis());
        engine.register_token(USDC, "USDC", Some(6));
        engine
    }

    #[test]
    fn vault_shortfall_is_topped_up_by_insurance() {
        let mut engine = engine();
        engine.mint(USDC, FUNDER, fx("50")).unwrap();
        engine.fund_insurance(USDC, FUNDER, fx("50")).unwrap();
        engine.mint(USDC, ALICE, fx("10")).unwrap();
        engine.pull_to_vault(USDC, ALICE, fx("10")).unwrap();

        let paid = engine.withdraw_from_vault(USDC, ALICE, fx("25")).unwrap();
        assert_eq!(paid, fx("25"));
        assert_eq!(engine.prepaid_bad_debt(USDC), fx("15"));
        assert_eq!(engine.insurance_fund().balance(engine.ledger(), USDC).unwrap(), fx("35"));
        assert_eq!(engine.unresolved_debt(USDC), FixedDecimal::ZERO);
    }

    #[test]
    fn uncovered_shortfall_pays_what_exists() {
        let mut engine = engine();
        engine.mint(USDC, ALICE, fx("10")).unwrap();
        engine.pull_to_vault(USDC, ALICE, fx("10")).unwrap();

        let paid = engine.withdraw_from_vault(USDC, ALICE, fx("25")).unwrap();
        assert_eq!(paid, fx("10"));
        assert_eq!(engine.unresolved_debt(USDC), fx("15"));
    }

    #[test]
    fn bad_debt_nets_against_prepaid_first() {
        let mut engine = engine();
        engine.mint(USDC, FUNDER, fx("100")).unwrap();
        engine.fund_insurance(USDC, FUNDER, fx("100")).unwrap();
        engine.prepaid_bad_debt.insert(USDC, fx("30"));

        engine.realize_bad_debt(USDC, fx("40")).unwrap();
        assert_eq!(engine.prepaid_bad_debt(USDC), FixedDecimal::ZERO);
        // only the 10 beyond the prepaid amount leaves the fund
        assert_eq!(engine.insurance_fund().balance(engine.ledger(), USDC).unwrap(), fx("90"));
        assert!(engine
            .events()
            .iter()
            .any(|e| matches!(e.payload, EventPayload::BadDebt(_))));
    }

    #[test]
    fn fees_split_between_pool_and_fund() {
        let mut engine = engine();
        engine.mint(USDC, ALICE, fx("10")).unwrap();
        let total = engine.charge_fees(USDC, ALICE, fx("1"), fx("2")).unwrap();
        assert_eq!(total, fx("3"));
        assert_eq!(engine.fee_pool().total_collected(USDC), fx("1"));
        assert_eq!(engine.insurance_fund().stats(USDC).fee_income, fx("2"));
        assert_eq!(engine.balance_of(USDC, Holder::Trader(ALICE)).unwrap(), fx("7"));
    }
}
