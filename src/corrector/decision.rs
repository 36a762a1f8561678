//! Pure decision rules. No I/O happens here.

use crate::Amount;

/// Why a correction ended without a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoOpReason {
    /// The triggering transaction moved no money.
    ZeroAmount,
    /// The balance already equals the target.
    OnTarget,
    /// A withdrawal was needed but the pot holds nothing.
    PotEmpty,
}

/// The transfer a correction settles on, before dry-run is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoOp(NoOpReason),
    Deposit(Amount),
    /// `amount` is below `needed` when the pot can only partly cover it.
    Withdraw { amount: Amount, needed: Amount },
}

impl Decision {
    pub fn is_partial(&self) -> bool {
        matches!(self, Decision::Withdraw { amount, needed } if amount < needed)
    }
}

/// Direction of the imbalance, before the pot is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    Nothing(NoOpReason),
    /// Money to sweep into the pot.
    Excess(Amount),
    /// Money to cover from the pot.
    Shortfall(Amount),
}

/// Classify a signed transaction amount. The shortfall for `i64::MIN`
/// saturates to `i64::MAX`.
pub fn for_signed_amount(amount: Amount) -> Movement {
    if amount.is_zero() {
        Movement::Nothing(NoOpReason::ZeroAmount)
    } else if amount.is_positive() {
        Movement::Excess(amount)
    } else {
        Movement::Shortfall(amount.saturating_abs())
    }
}

/// Compare a balance snapshot with the target.
pub fn for_balance(current: Amount, target: Amount) -> Movement {
    let diff = current.saturating_sub(target);
    if diff.is_zero() {
        Movement::Nothing(NoOpReason::OnTarget)
    } else if diff.is_positive() {
        Movement::Excess(diff)
    } else {
        Movement::Shortfall(diff.saturating_abs())
    }
}

/// Cap a withdrawal at what the pot holds. An empty pot means no transfer.
pub fn for_withdrawal(needed: Amount, available: Amount) -> Decision {
    if !available.is_positive() {
        return Decision::NoOp(NoOpReason::PotEmpty);
    }
    Decision::Withdraw {
        amount: needed.min(available),
        needed,
    }
}
