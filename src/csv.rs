use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::Amount;

/// Errors that can occur when reading or writing csv
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized trigger '{trigger}'")]
    UnrecognizedTrigger { line: usize, trigger: String },

    #[error("line {line}: missing transaction id")]
    MissingId { line: usize },

    #[error("failed to write balances: {0}")]
    Write(#[from] csv::Error),
}

/// How the corrector learns the amount of a replayed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerMode {
    /// The webhook body carries the amount.
    #[default]
    Payload,
    /// The webhook body has no amount; it is fetched by transaction id.
    Lookup,
    /// The webhook body has no amount; the balance snapshot is used.
    Balance,
}

/// One replayed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub amount: Amount,
    pub mode: TriggerMode,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InputRow {
    id: String,
    amount: i64,
    #[serde(default)]
    trigger: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Final balances of the replayed account and pot.
#[derive(Debug, Serialize)]
pub struct BalanceRow {
    pub account: String,
    pub balance: String,
    pub pot: String,
    pub pot_balance: String,
}

impl BalanceRow {
    pub fn new(account: &str, balance: Amount, pot: &str, pot_balance: Amount) -> Self {
        Self {
            account: account.to_string(),
            balance: balance.to_string(),
            pot: pot.to_string(),
            pot_balance: pot_balance.to_string(),
        }
    }
}

/// Read deliveries from a csv file with columns `id,amount,trigger,description`
pub fn read_deliveries(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Delivery, CsvError>>, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;

            if row.id.is_empty() {
                return Err(CsvError::MissingId { line });
            }

            let mode = match row.trigger.as_deref() {
                None | Some("payload") => TriggerMode::Payload,
                Some("lookup") => TriggerMode::Lookup,
                Some("balance") => TriggerMode::Balance,
                Some(other) => {
                    return Err(CsvError::UnrecognizedTrigger {
                        line,
                        trigger: other.to_string(),
                    });
                }
            };

            Ok(Delivery {
                id: row.id,
                amount: Amount::from_minor(row.amount),
                mode,
                description: row.description,
            })
        }))
}

/// Write balance rows in csv format
pub fn write_balances(
    writer: impl io::Write,
    rows: impl IntoIterator<Item = BalanceRow>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for row in rows {
        writer.serialize(&row)?;
    }

    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}
