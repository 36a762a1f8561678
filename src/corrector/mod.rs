//! Balance correction.
//!
//! The corrector looks at one triggering event, decides whether money has to
//! move between the account and its pot, and issues at most one transfer.
//! Every transfer carries a dedupe id derived from the triggering id, so a
//! redelivered event collapses into the same ledger effect.
//!
//! Two paths exist:
//! - amount-aware: the triggering transaction's signed amount is trusted as-is,
//!   which keeps concurrent corrections independent of each other
//! - balance snapshot: used when the amount is unknown. Two concurrent
//!   corrections on this path can observe the same stale balance and both
//!   correct it; nothing here prevents that.

use tracing::instrument;

use crate::Amount;
use crate::ledger::{LedgerReader, LedgerWriter, PotDeposit, PotWithdrawal};
use crate::log::{CorrectionLog, Note, TracingLog};
use crate::model::{CorrectionConfig, Direction, PotSnapshot, TransferIntent, Trigger, TriggerEvent};

mod decision;
pub use decision::{Decision, Movement, NoOpReason};

mod error;
pub use error::CorrectionError;

/// How a correction ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    NoOp(NoOpReason),
    /// A transfer was decided but not issued because of dry-run.
    DryRun(TransferIntent),
    Executed(TransferIntent),
}

impl Outcome {
    /// The decided transfer, whether or not it was issued.
    pub fn intent(&self) -> Option<&TransferIntent> {
        match self {
            Outcome::NoOp(_) => None,
            Outcome::DryRun(intent) | Outcome::Executed(intent) => Some(intent),
        }
    }
}

/// Keeps an account at its target balance using its pot as a buffer.
///
/// Holds no state between calls; concurrent calls only share the ledger.
pub struct BalanceCorrector<R, W, L = TracingLog> {
    reader: R,
    writer: W,
    log: L,
}

/// Public API
impl<R, W, L> BalanceCorrector<R, W, L>
where
    R: LedgerReader,
    W: LedgerWriter,
    L: CorrectionLog,
{
    pub fn new(reader: R, writer: W, log: L) -> Self {
        Self {
            reader,
            writer,
            log,
        }
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Decide and, unless `config` is a dry run, execute the correction for
    /// one event.
    ///
    /// # Errors
    ///
    /// [`CorrectionError::PotNotFound`] when the configured pot is missing
    /// from the account, [`CorrectionError::Ledger`] for any ledger failure.
    /// Nothing is retried.
    #[instrument(
        skip_all,
        fields(
            triggering_id = %event.triggering_id,
            account = config.account_id(),
            dry_run = config.dry_run()
        )
    )]
    pub async fn correct(
        &self,
        config: &CorrectionConfig,
        event: &TriggerEvent,
    ) -> Result<Outcome, CorrectionError> {
        let decision = match event.trigger {
            Trigger::KnownAmount(amount) => {
                self.decide_for_amount(config, &event.triggering_id, amount)
                    .await?
            }
            Trigger::Unknown => self.decide_for_balance(config).await?,
        };

        self.settle(config, event, decision).await
    }

    /// Build an amount-aware event by looking up the triggering transaction.
    pub async fn resolve_trigger(
        &self,
        triggering_id: &str,
    ) -> Result<TriggerEvent, CorrectionError> {
        let record = self.reader.transaction(triggering_id).await?;
        Ok(TriggerEvent::known(triggering_id, record.amount))
    }
}

/// Private API
impl<R, W, L> BalanceCorrector<R, W, L>
where
    R: LedgerReader,
    W: LedgerWriter,
    L: CorrectionLog,
{
    /// Amount-aware path:
    /// - Zero amount: nothing to do, no ledger calls
    /// - Incoming: deposit exactly that amount, no reads
    /// - Outgoing: withdraw it, capped at the pot balance
    async fn decide_for_amount(
        &self,
        config: &CorrectionConfig,
        triggering_id: &str,
        amount: Amount,
    ) -> Result<Decision, CorrectionError> {
        match decision::for_signed_amount(amount) {
            Movement::Nothing(reason) => {
                self.log.info(&Note::ZeroAmount { triggering_id });
                Ok(Decision::NoOp(reason))
            }
            Movement::Excess(amount) => {
                self.log.info(&Note::IncomingFunds {
                    amount,
                    pot_id: config.pot_id(),
                });
                Ok(Decision::Deposit(amount))
            }
            Movement::Shortfall(needed) => {
                let pot = self.pot_snapshot(config).await?;
                Ok(self.decide_withdrawal(needed, &pot))
            }
        }
    }

    /// Balance snapshot path:
    /// - Read balance and pot together
    /// - Deposit any excess over the target, uncapped
    /// - Cover any deficit from the pot, capped at the pot balance
    async fn decide_for_balance(
        &self,
        config: &CorrectionConfig,
    ) -> Result<Decision, CorrectionError> {
        let (current, pot) = tokio::try_join!(
            async {
                self.reader
                    .balance(config.account_id())
                    .await
                    .map_err(CorrectionError::from)
            },
            self.pot_snapshot(config),
        )?;

        let target = config.target_balance();
        self.log.info(&Note::CheckingBalance { current, target });

        match decision::for_balance(current, target) {
            Movement::Nothing(reason) => {
                self.log.info(&Note::OnTarget);
                Ok(Decision::NoOp(reason))
            }
            Movement::Excess(amount) => {
                self.log.info(&Note::ExcessFunds {
                    amount,
                    pot_id: config.pot_id(),
                });
                Ok(Decision::Deposit(amount))
            }
            Movement::Shortfall(needed) => Ok(self.decide_withdrawal(needed, &pot)),
        }
    }

    fn decide_withdrawal(&self, needed: Amount, pot: &PotSnapshot) -> Decision {
        let available = pot.available;
        self.log.info(&Note::CheckingPot { available, needed });

        let decision = decision::for_withdrawal(needed, available);
        match decision {
            Decision::NoOp(_) => self.log.warn(&Note::PotEmpty { needed }),
            _ if decision.is_partial() => {
                self.log.warn(&Note::InsufficientPotFunds { available, needed })
            }
            _ => {}
        }
        decision
    }

    /// Fetch the configured pot from the account's pot list.
    async fn pot_snapshot(&self, config: &CorrectionConfig) -> Result<PotSnapshot, CorrectionError> {
        let pots = self.reader.pots(config.account_id()).await?;

        pots.into_iter()
            .find(|pot| pot.id == config.pot_id())
            .map(|pot| PotSnapshot {
                pot_id: pot.id,
                available: pot.balance,
            })
            .ok_or_else(|| CorrectionError::PotNotFound(config.pot_id().to_string()))
    }

    /// Turn a decision into an outcome. Dry-run stops right before the
    /// mutating call.
    async fn settle(
        &self,
        config: &CorrectionConfig,
        event: &TriggerEvent,
        decision: Decision,
    ) -> Result<Outcome, CorrectionError> {
        let (direction, amount) = match decision {
            Decision::NoOp(reason) => return Ok(Outcome::NoOp(reason)),
            Decision::Deposit(amount) => (Direction::DepositToPot, amount),
            Decision::Withdraw { amount, .. } => {
                self.log.info(&Note::Withdrawing {
                    amount,
                    pot_id: config.pot_id(),
                });
                (Direction::WithdrawFromPot, amount)
            }
        };

        let intent = TransferIntent {
            direction,
            amount,
            idempotency_key: event.idempotency_key(),
            account_id: config.account_id().to_string(),
            pot_id: config.pot_id().to_string(),
        };

        if config.dry_run() {
            self.log.info(&Note::DryRun { direction, amount });
            return Ok(Outcome::DryRun(intent));
        }

        self.execute(&intent).await?;
        self.log.info(&Note::Transferred {
            direction,
            amount,
            dedupe_id: &intent.idempotency_key,
        });

        Ok(Outcome::Executed(intent))
    }

    async fn execute(&self, intent: &TransferIntent) -> Result<(), CorrectionError> {
        match intent.direction {
            Direction::DepositToPot => {
                let request = PotDeposit {
                    amount: intent.amount,
                    dedupe_id: intent.idempotency_key.clone(),
                    source_account_id: intent.account_id.clone(),
                };
                self.writer.deposit_into_pot(&intent.pot_id, request).await?;
            }
            Direction::WithdrawFromPot => {
                let request = PotWithdrawal {
                    amount: intent.amount,
                    dedupe_id: intent.idempotency_key.clone(),
                    destination_account_id: intent.account_id.clone(),
                };
                self.writer.withdraw_from_pot(&intent.pot_id, request).await?;
            }
        }
        Ok(())
    }
}
