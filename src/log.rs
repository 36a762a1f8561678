//! Logging capability injected into the corrector.
//!
//! The corrector reports what it decided as typed [`Note`]s. [`TracingLog`]
//! turns them into `tracing` events with structured fields, [`MemoryLog`]
//! keeps them for inspection and [`NoopLog`] drops them.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::Amount;
use crate::corrector::CorrectionError;
use crate::event::IgnoreReason;
use crate::model::Direction;

/// Something worth reporting about a correction. The `Display` text is the
/// message every log renders.
#[derive(Debug, Clone, Copy)]
pub enum Note<'a> {
    ZeroAmount {
        triggering_id: &'a str,
    },
    IncomingFunds {
        amount: Amount,
        pot_id: &'a str,
    },
    CheckingBalance {
        current: Amount,
        target: Amount,
    },
    OnTarget,
    ExcessFunds {
        amount: Amount,
        pot_id: &'a str,
    },
    CheckingPot {
        available: Amount,
        needed: Amount,
    },
    PotEmpty {
        needed: Amount,
    },
    InsufficientPotFunds {
        available: Amount,
        needed: Amount,
    },
    Withdrawing {
        amount: Amount,
        pot_id: &'a str,
    },
    DryRun {
        direction: Direction,
        amount: Amount,
    },
    Transferred {
        direction: Direction,
        amount: Amount,
        dedupe_id: &'a str,
    },
    Ignored {
        triggering_id: &'a str,
        reason: &'a IgnoreReason,
    },
    Failed {
        triggering_id: &'a str,
        error: &'a CorrectionError,
    },
}

impl fmt::Display for Note<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Note::ZeroAmount { triggering_id } => {
                write!(f, "transaction {triggering_id} has zero amount, nothing to correct")
            }
            Note::IncomingFunds { amount, pot_id } => {
                write!(f, "depositing incoming funds of {amount} into pot {pot_id}")
            }
            Note::CheckingBalance { current, target } => {
                write!(f, "checking balance: current {current}, target {target}")
            }
            Note::OnTarget => f.write_str("balance is exactly on target"),
            Note::ExcessFunds { amount, pot_id } => {
                write!(f, "depositing excess funds of {amount} into pot {pot_id}")
            }
            Note::CheckingPot { available, needed } => {
                write!(f, "checking pot balance: available {available}, needed {needed}")
            }
            Note::PotEmpty { needed } => {
                write!(f, "pot is empty, cannot cover {needed}")
            }
            Note::InsufficientPotFunds { available, needed } => write!(
                f,
                "insufficient pot funds: available {available}, needed {needed}, partial correction only"
            ),
            Note::Withdrawing { amount, pot_id } => {
                write!(f, "withdrawing {amount} from pot {pot_id}")
            }
            Note::DryRun { direction, amount } => {
                write!(f, "dry run enabled, skipping {direction} of {amount}")
            }
            Note::Transferred {
                direction,
                amount,
                dedupe_id,
            } => write!(f, "{direction} of {amount} submitted with dedupe id {dedupe_id}"),
            Note::Ignored {
                triggering_id,
                reason,
            } => write!(f, "ignoring transaction {triggering_id}: {reason}"),
            Note::Failed {
                triggering_id,
                error,
            } => write!(f, "balance correction for {triggering_id} failed: {error}"),
        }
    }
}

/// Sink for correction notes.
pub trait CorrectionLog: Send + Sync {
    fn info(&self, note: &Note<'_>);

    fn warn(&self, note: &Note<'_>);

    fn error(&self, note: &Note<'_>);
}

impl<T: CorrectionLog + ?Sized> CorrectionLog for Arc<T> {
    fn info(&self, note: &Note<'_>) {
        (**self).info(note)
    }

    fn warn(&self, note: &Note<'_>) {
        (**self).warn(note)
    }

    fn error(&self, note: &Note<'_>) {
        (**self).error(note)
    }
}

/// `tracing` needs a literal level per callsite, so each level expands the
/// whole match. The message is always the note's `Display` text.
macro_rules! emit {
    ($level:ident, $note:expr) => {{
        let note = $note;
        match note {
            Note::ZeroAmount { triggering_id } => tracing::$level!(triggering_id, "{note}"),
            Note::IncomingFunds { amount, pot_id }
            | Note::ExcessFunds { amount, pot_id }
            | Note::Withdrawing { amount, pot_id } => {
                tracing::$level!(amount = %amount, pot_id, "{note}")
            }
            Note::CheckingBalance { current, target } => {
                tracing::$level!(current = %current, target = %target, "{note}")
            }
            Note::OnTarget => tracing::$level!("{note}"),
            Note::CheckingPot { available, needed }
            | Note::InsufficientPotFunds { available, needed } => {
                tracing::$level!(available = %available, needed = %needed, "{note}")
            }
            Note::PotEmpty { needed } => tracing::$level!(needed = %needed, "{note}"),
            Note::DryRun { direction, amount } => {
                tracing::$level!(direction = %direction, amount = %amount, "{note}")
            }
            Note::Transferred {
                direction,
                amount,
                dedupe_id,
            } => {
                tracing::$level!(direction = %direction, amount = %amount, dedupe_id, "{note}")
            }
            Note::Ignored {
                triggering_id,
                reason,
            } => tracing::$level!(triggering_id, reason = %reason, "{note}"),
            Note::Failed {
                triggering_id,
                error,
            } => tracing::$level!(triggering_id, error = %error, "{note}"),
        }
    }};
}

/// Forwards notes to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLog;

impl CorrectionLog for TracingLog {
    fn info(&self, note: &Note<'_>) {
        emit!(info, note)
    }

    fn warn(&self, note: &Note<'_>) {
        emit!(warn, note)
    }

    fn error(&self, note: &Note<'_>) {
        emit!(error, note)
    }
}

/// Discards every note.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLog;

impl CorrectionLog for NoopLog {
    fn info(&self, _note: &Note<'_>) {}

    fn warn(&self, _note: &Note<'_>) {}

    fn error(&self, _note: &Note<'_>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// Keeps rendered notes in memory.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(Severity, String)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Severity, String)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages recorded at the given severity.
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(level, _)| *level == severity)
            .map(|(_, message)| message)
            .collect()
    }

    fn push(&self, severity: Severity, note: &Note<'_>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((severity, note.to_string()));
    }
}

impl CorrectionLog for MemoryLog {
    fn info(&self, note: &Note<'_>) {
        self.push(Severity::Info, note)
    }

    fn warn(&self, note: &Note<'_>) {
        self.push(Severity::Warn, note)
    }

    fn error(&self, note: &Note<'_>) {
        self.push(Severity::Error, note)
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::ledger::LedgerError;

    #[test]
    fn memory_log_records_severity_and_message() {
        let log = MemoryLog::new();
        log.info(&Note::OnTarget);
        log.warn(&Note::InsufficientPotFunds {
            available: Amount::from_minor(300),
            needed: Amount::from_minor(500),
        });

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (Severity::Info, "balance is exactly on target".to_string()));
        assert_eq!(entries[1].0, Severity::Warn);
        assert!(entries[1].1.contains("available 3.00, needed 5.00"));
    }

    #[test]
    fn messages_filters_by_severity() {
        let log = MemoryLog::new();
        let error = CorrectionError::Ledger(LedgerError::Unavailable("connection reset".into()));
        log.info(&Note::OnTarget);
        log.error(&Note::Failed {
            triggering_id: "tx_1",
            error: &error,
        });

        assert_eq!(
            log.messages(Severity::Error),
            vec![
                "balance correction for tx_1 failed: ledger request failed: ledger unavailable: connection reset"
                    .to_string()
            ]
        );
        assert!(log.messages(Severity::Warn).is_empty());
    }

    #[test]
    fn shared_log_records_through_arc() {
        let log = Arc::new(MemoryLog::new());
        let shared: Arc<dyn CorrectionLog> = log.clone();
        shared.info(&Note::DryRun {
            direction: Direction::DepositToPot,
            amount: Amount::from_minor(1),
        });

        assert_eq!(
            log.messages(Severity::Info),
            vec!["dry run enabled, skipping deposit of 0.01".to_string()]
        );
    }

    /// Collects formatted `tracing` output.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn traced(note: &Note<'_>) -> String {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();

        tracing::subscriber::with_default(subscriber, || TracingLog.warn(note));

        let bytes = capture.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn tracing_log_uses_the_note_text_as_message() {
        let reason = IgnoreReason::ManagedPot;
        let error = CorrectionError::PotNotFound("pot_1".to_string());
        let notes = [
            Note::ZeroAmount { triggering_id: "tx" },
            Note::OnTarget,
            Note::PotEmpty {
                needed: Amount::from_minor(500),
            },
            Note::InsufficientPotFunds {
                available: Amount::from_minor(300),
                needed: Amount::from_minor(500),
            },
            Note::Transferred {
                direction: Direction::WithdrawFromPot,
                amount: Amount::from_minor(300),
                dedupe_id: "balance-correction-tx",
            },
            Note::Ignored {
                triggering_id: "tx",
                reason: &reason,
            },
            Note::Failed {
                triggering_id: "tx",
                error: &error,
            },
        ];

        for note in &notes {
            let output = traced(note);
            assert!(output.contains("WARN"), "{output}");
            assert!(output.contains(&note.to_string()), "{output}");
        }
    }

    #[test]
    fn noop_log_accepts_every_note() {
        NoopLog.info(&Note::OnTarget);
        NoopLog.warn(&Note::PotEmpty {
            needed: Amount::from_minor(1),
        });
        NoopLog.error(&Note::ZeroAmount { triggering_id: "tx" });
    }
}
