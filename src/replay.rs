//! Replay of transaction deliveries against a [`MemoryLedger`].
//!
//! Each delivery is turned into a webhook, admitted, applied to the ledger
//! and corrected on its own task, the way independent webhook deliveries are
//! handled in production.

use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

use crate::corrector::{BalanceCorrector, CorrectionError, Outcome};
use crate::csv::{Delivery, TriggerMode};
use crate::event::{Admission, WebhookEvent};
use crate::ledger::MemoryLedger;
use crate::log::{CorrectionLog, Note};
use crate::model::{CorrectionConfig, TriggerEvent};

/// Corrector reading from and writing to one shared [`MemoryLedger`].
pub type LedgerCorrector<L> = BalanceCorrector<Arc<MemoryLedger>, Arc<MemoryLedger>, L>;

/// Counters for one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub deliveries: usize,
    /// Deliveries whose transaction id was already applied
    pub redeliveries: usize,
    /// Deliveries admission decided not to correct
    pub ignored: usize,
    /// Deliveries the ledger or admission refused
    pub rejected: usize,
    pub no_ops: usize,
    pub dry_runs: usize,
    pub executed: usize,
    pub failed: usize,
}

impl ReplaySummary {
    fn record(&mut self, joined: Result<Result<Outcome, CorrectionError>, JoinError>) {
        match joined {
            Ok(Ok(Outcome::NoOp(_))) => self.no_ops += 1,
            Ok(Ok(Outcome::DryRun(_))) => self.dry_runs += 1,
            Ok(Ok(Outcome::Executed(_))) => self.executed += 1,
            // already reported by the task
            Ok(Err(_)) => self.failed += 1,
            Err(err) => {
                error!(error = %err, "correction task did not complete");
                self.failed += 1;
            }
        }
    }
}

pub struct Replay<L> {
    ledger: Arc<MemoryLedger>,
    corrector: Arc<LedgerCorrector<L>>,
    config: Arc<CorrectionConfig>,
    max_in_flight: usize,
}

impl<L: CorrectionLog + 'static> Replay<L> {
    pub fn new(ledger: Arc<MemoryLedger>, config: CorrectionConfig, log: L) -> Self {
        let corrector = BalanceCorrector::new(ledger.clone(), ledger.clone(), log);
        Self {
            ledger,
            corrector: Arc::new(corrector),
            config: Arc::new(config),
            max_in_flight: 1,
        }
    }

    /// Allow up to `max_in_flight` corrections to run at once. The default of
    /// one finishes each correction before the next delivery is applied.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    /// Run the replay with the given delivery stream
    pub async fn run(&self, mut stream: impl Stream<Item = Delivery> + Unpin) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        let mut tasks = JoinSet::new();

        while let Some(delivery) = stream.next().await {
            summary.deliveries += 1;

            let Some(event) = self.admit(&delivery, &mut summary).await else {
                continue;
            };

            while tasks.len() >= self.max_in_flight {
                match tasks.join_next().await {
                    Some(joined) => summary.record(joined),
                    None => break,
                }
            }

            let corrector = self.corrector.clone();
            let config = self.config.clone();
            let lookup = delivery.mode == TriggerMode::Lookup;
            tasks.spawn(async move { correct_one(&corrector, &config, event, lookup).await });
        }

        while let Some(joined) = tasks.join_next().await {
            summary.record(joined);
        }

        summary
    }

    /// Admit a delivery and apply its transaction to the ledger:
    /// - Pot transfer echoes are skipped entirely
    /// - A repeated transaction id is not applied twice but still corrected,
    ///   as a webhook redelivery would be
    async fn admit(&self, delivery: &Delivery, summary: &mut ReplaySummary) -> Option<TriggerEvent> {
        let amount = match delivery.mode {
            TriggerMode::Payload => Some(delivery.amount),
            TriggerMode::Lookup | TriggerMode::Balance => None,
        };
        let webhook = WebhookEvent::transaction_created(
            &delivery.id,
            self.config.account_id(),
            amount,
            delivery.description.clone(),
        );

        let event = match webhook.admit(&self.config) {
            Ok(Admission::Correct(event)) => event,
            Ok(Admission::Ignored(reason)) => {
                self.corrector.log().info(&Note::Ignored {
                    triggering_id: &delivery.id,
                    reason: &reason,
                });
                summary.ignored += 1;
                return None;
            }
            Err(err) => {
                warn!(transaction = %delivery.id, error = %err, "delivery rejected");
                summary.rejected += 1;
                return None;
            }
        };

        match self
            .ledger
            .record_transaction(self.config.account_id(), &delivery.id, delivery.amount)
            .await
        {
            Ok(true) => {}
            Ok(false) => summary.redeliveries += 1,
            Err(err) => {
                warn!(transaction = %delivery.id, error = %err, "transaction rejected by ledger");
                summary.rejected += 1;
                return None;
            }
        }

        Some(event)
    }
}

async fn correct_one<L: CorrectionLog>(
    corrector: &LedgerCorrector<L>,
    config: &CorrectionConfig,
    event: TriggerEvent,
    lookup: bool,
) -> Result<Outcome, CorrectionError> {
    let result = async {
        let event = if lookup {
            corrector.resolve_trigger(&event.triggering_id).await?
        } else {
            event.clone()
        };
        corrector.correct(config, &event).await
    }
    .await;

    if let Err(err) = &result {
        corrector.log().error(&Note::Failed {
            triggering_id: &event.triggering_id,
            error: err,
        });
    }
    result
}
