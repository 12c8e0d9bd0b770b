// 9.3 fee_pool.rs: toll fees land here. nothing is paid out of it by the engine.

use crate::fixed::FixedDecimal;
use crate::token::{Holder, Ledger, TransferError};
use crate::types::TokenId;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct FeePool {
    collected: HashMap<TokenId, FixedDecimal>,
}

impl FeePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(
        &mut self,
        ledger: &mut Ledger,
        token: TokenId,
        from: Holder,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, TransferError> {
        let moved = ledger.transfer(token, from, Holder::FeePool, amount)?;
        let total = self.collected.entry(token).or_default();
        *total = total.try_add(moved).map_err(|_| TransferError::Unrepresentable(moved))?;
        Ok(moved)
    }

    pub fn total_collected(&self, token: TokenId) -> FixedDecimal {
        self.collected.get(&token).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;

    #[test]
    fn collects_into_pool_holder() {
        let token = TokenId(1);
        let trader = Holder::Trader(AccountId(7));
        let mut ledger = Ledger::new();
        ledger.register_token(token, "USDC", Some(6));
        ledger.mint(token, trader, FixedDecimal::from_int(10)).unwrap();

        let mut pool = FeePool::new();
        pool.collect(&mut ledger, token, trader, FixedDecimal::from_int(2)).unwrap();
        pool.collect(&mut ledger, token, trader, FixedDecimal::from_int(1)).unwrap();
        assert_eq!(pool.total_collected(token), FixedDecimal::from_int(3));
        assert_eq!(ledger.balance_of(token, Holder::FeePool).unwrap(), FixedDecimal::from_int(3));
    }
}
