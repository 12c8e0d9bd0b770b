// 9.0 token.rs: in-process token ledger. balances are held in each token's native precision;
// the engine speaks 18-decimal amounts and conversion rounds down at this boundary.
// every transfer re-reads the recipient balance and refuses tokens that deliver less than sent.

use crate::fixed::{FixedDecimal, DECIMALS};
use crate::types::{AccountId, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Precision assumed for tokens that do not report one.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

const MAX_TOKEN_DECIMALS: u8 = 36;
const BPS: u128 = 10_000;

/// Who holds a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holder {
    Trader(AccountId),
    /// Collateral backing every open position.
    Vault,
    InsuranceFund,
    FeePool,
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Holder::Trader(id) => write!(f, "trader:{}", id.0),
            Holder::Vault => write!(f, "vault"),
            Holder::InsuranceFund => write!(f, "insurance_fund"),
            Holder::FeePool => write!(f, "fee_pool"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("unknown token {0:?}")]
    UnknownToken(TokenId),

    #[error("{holder} holds {available}, needs {needed}")]
    InsufficientBalance {
        holder: Holder,
        needed: FixedDecimal,
        available: FixedDecimal,
    },

    #[error("balance inconsistent: expected +{expected}, got +{actual}")]
    BalanceInconsistent {
        expected: FixedDecimal,
        actual: FixedDecimal,
    },

    #[error("amount {0} not representable in token precision")]
    Unrepresentable(FixedDecimal),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u8,
    /// Skimmed from every transfer. Nonzero fees make transfers fail verification.
    pub transfer_fee_bps: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    tokens: HashMap<TokenId, TokenInfo>,
    balances: HashMap<(TokenId, Holder), u128>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_token(&mut self, token: TokenId, symbol: &str, decimals: Option<u8>) {
        let decimals = match decimals {
            Some(d) if d <= MAX_TOKEN_DECIMALS => d,
            Some(d) => {
                warn!(token = token.0, decimals = d, "token precision out of range, assuming default");
                DEFAULT_TOKEN_DECIMALS
            }
            None => {
                warn!(token = token.0, symbol, "token reports no decimals, assuming default");
                DEFAULT_TOKEN_DECIMALS
            }
        };
        self.tokens.insert(
            token,
            TokenInfo {
                symbol: symbol.to_string(),
                decimals,
                transfer_fee_bps: 0,
            },
        );
    }

    pub fn token(&self, token: TokenId) -> Result<&TokenInfo, TransferError> {
        self.tokens.get(&token).ok_or(TransferError::UnknownToken(token))
    }

    pub fn is_registered(&self, token: TokenId) -> bool {
        self.tokens.contains_key(&token)
    }

    pub fn set_transfer_fee_bps(&mut self, token: TokenId, bps: u32) -> Result<(), TransferError> {
        let info = self.tokens.get_mut(&token).ok_or(TransferError::UnknownToken(token))?;
        info.transfer_fee_bps = bps;
        Ok(())
    }

    /// Credits fresh tokens. Simulation and test setup only.
    pub fn mint(&mut self, token: TokenId, to: Holder, amount: FixedDecimal) -> Result<FixedDecimal, TransferError> {
        let decimals = self.token(token)?.decimals;
        let native = to_native(amount, decimals)?;
        let balance = self.balances.entry((token, to)).or_insert(0);
        *balance = balance
            .checked_add(native)
            .ok_or(TransferError::Unrepresentable(amount))?;
        from_native(native, decimals)
    }

    pub fn balance_of(&self, token: TokenId, holder: Holder) -> Result<FixedDecimal, TransferError> {
        let decimals = self.token(token)?.decimals;
        from_native(self.native_balance(token, holder), decimals)
    }

    fn native_balance(&self, token: TokenId, holder: Holder) -> u128 {
        self.balances.get(&(token, holder)).copied().unwrap_or(0)
    }

    // 9.1: move `amount` (rounded down to native precision) and verify the recipient got all of it.
    // returns the amount actually moved, in 18 decimals.
    pub fn transfer(
        &mut self,
        token: TokenId,
        from: Holder,
        to: Holder,
        amount: FixedDecimal,
    ) -> Result<FixedDecimal, TransferError> {
        let info = self.token(token)?;
        let decimals = info.decimals;
        let fee_bps = u128::from(info.transfer_fee_bps);
        let native = to_native(amount, decimals)?;
        if native == 0 || from == to {
            return Ok(FixedDecimal::ZERO);
        }

        let from_before = self.native_balance(token, from);
        if from_before < native {
            return Err(TransferError::InsufficientBalance {
                holder: from,
                needed: amount,
                available: from_native(from_before, decimals)?,
            });
        }
        let to_before = self.native_balance(token, to);
        let fee = native
            .checked_mul(fee_bps)
            .ok_or(TransferError::Unrepresentable(amount))?
            / BPS;
        let delivered = native - fee;
        let to_after = to_before
            .checked_add(delivered)
            .ok_or(TransferError::Unrepresentable(amount))?;

        self.balances.insert((token, from), from_before - native);
        self.balances.insert((token, to), to_after);

        let received = self.native_balance(token, to) - to_before;
        if received != native {
            // undo before reporting
            self.balances.insert((token, from), from_before);
            self.balances.insert((token, to), to_before);
            return Err(TransferError::BalanceInconsistent {
                expected: from_native(native, decimals)?,
                actual: from_native(received, decimals)?,
            });
        }
        from_native(native, decimals)
    }
}

fn pow10(exp: u32) -> Option<u128> {
    10u128.checked_pow(exp)
}

/// 18-decimal amount to native units, rounding down. Negative amounts are rejected.
pub fn to_native(amount: FixedDecimal, decimals: u8) -> Result<u128, TransferError> {
    if amount.is_negative() {
        return Err(TransferError::Unrepresentable(amount));
    }
    let raw = amount.raw() as u128;
    let decimals = u32::from(decimals);
    if decimals <= DECIMALS {
        let divisor = pow10(DECIMALS - decimals).ok_or(TransferError::Unrepresentable(amount))?;
        Ok(raw / divisor)
    } else {
        let factor = pow10(decimals - DECIMALS).ok_or(TransferError::Unrepresentable(amount))?;
        raw.checked_mul(factor).ok_or(TransferError::Unrepresentable(amount))
    }
}

pub fn from_native(native: u128, decimals: u8) -> Result<FixedDecimal, TransferError> {
    let decimals = u32::from(decimals);
    let raw = if decimals <= DECIMALS {
        pow10(DECIMALS - decimals).and_then(|f| native.checked_mul(f))
    } else {
        pow10(decimals - DECIMALS).map(|d| native / d)
    };
    raw.and_then(|r| i128::try_from(r).ok())
        .map(FixedDecimal::from_raw)
        .ok_or(TransferError::Unrepresentable(FixedDecimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDC: TokenId = TokenId(1);
    const ALICE: Holder = Holder::Trader(AccountId(1));

    fn fx(s: &str) -> FixedDecimal {
        s.parse().unwrap()
    }

    fn ledger() -> Ledger {
        let mut ledger = Ledger::new();
        ledger.register_token(USDC, "USDC", Some(6));
        ledger
    }

    #[test]
    fn transfer_rounds_down_to_native_precision() {
        let mut ledger = ledger();
        ledger.mint(USDC, ALICE, fx("100")).unwrap();
        let moved = ledger.transfer(USDC, ALICE, Holder::Vault, fx("1.2345678")).unwrap();
        assert_eq!(moved, fx("1.234567"));
        assert_eq!(ledger.balance_of(USDC, Holder::Vault).unwrap(), fx("1.234567"));
        assert_eq!(ledger.balance_of(USDC, ALICE).unwrap(), fx("98.765433"));
    }

    #[test]
    fn insufficient_balance() {
        let mut ledger = ledger();
        ledger.mint(USDC, ALICE, fx("1")).unwrap();
        let err = ledger.transfer(USDC, ALICE, Holder::Vault, fx("2")).unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { .. }));
    }

    #[test]
    fn fee_on_transfer_token_is_rejected_and_rolled_back() {
        let mut ledger = ledger();
        ledger.mint(USDC, ALICE, fx("100")).unwrap();
        ledger.set_transfer_fee_bps(USDC, 10).unwrap();
        let err = ledger.transfer(USDC, ALICE, Holder::Vault, fx("10")).unwrap_err();
        assert!(matches!(err, TransferError::BalanceInconsistent { .. }));
        assert_eq!(ledger.balance_of(USDC, ALICE).unwrap(), fx("100"));
        assert_eq!(ledger.balance_of(USDC, Holder::Vault).unwrap(), fx("0"));
    }

    #[test]
    fn fee_on_a_huge_transfer_does_not_overflow() {
        let mut ledger = Ledger::new();
        ledger.register_token(TokenId(9), "BIG", Some(18));
        let huge = FixedDecimal::from_raw(i128::MAX / 2);
        ledger.mint(TokenId(9), ALICE, huge).unwrap();
        ledger.set_transfer_fee_bps(TokenId(9), 10).unwrap();
        let err = ledger.transfer(TokenId(9), ALICE, Holder::Vault, huge).unwrap_err();
        assert_eq!(err, TransferError::Unrepresentable(huge));
        assert_eq!(ledger.balance_of(TokenId(9), ALICE).unwrap(), huge);
    }

    #[test]
    fn missing_decimals_default_to_18() {
        let mut ledger = Ledger::new();
        ledger.register_token(TokenId(9), "ODD", None);
        assert_eq!(ledger.token(TokenId(9)).unwrap().decimals, DEFAULT_TOKEN_DECIMALS);
    }

    #[test]
    fn unknown_token() {
        let ledger = Ledger::new();
        assert_eq!(
            ledger.balance_of(TokenId(3), Holder::Vault),
            Err(TransferError::UnknownToken(TokenId(3)))
        );
    }

    #[test]
    fn wide_precision_round_trips() {
        let native = to_native(fx("1.5"), 24).unwrap();
        assert_eq!(native, 1_500_000_000_000_000_000_000_000);
        assert_eq!(from_native(native, 24).unwrap(), fx("1.5"));
    }
}
