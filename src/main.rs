use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use pot_balancer::csv::{BalanceRow, read_deliveries, write_balances};
use pot_balancer::ledger::MemoryLedger;
use pot_balancer::log::TracingLog;
use pot_balancer::replay::Replay;
use pot_balancer::{Amount, CorrectionConfig};
use tokio_stream::wrappers::ReceiverStream;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pot-balancer",
    version,
    about = "Replay transactions through the pot balance corrector"
)]
struct Cli {
    /// CSV file with columns id,amount,trigger,description
    events: PathBuf,

    /// Target account balance in minor units
    #[arg(long)]
    target: i64,

    #[arg(long, default_value = "acc_main")]
    account: String,

    #[arg(long, default_value = "pot_buffer")]
    pot: String,

    /// Opening account balance in minor units, defaults to the target
    #[arg(long)]
    opening_balance: Option<i64>,

    /// Opening pot balance in minor units
    #[arg(long, default_value_t = 0)]
    pot_balance: i64,

    /// Decide transfers without executing them
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Corrections allowed to run at once
    #[arg(long, default_value_t = 1)]
    max_in_flight: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match CorrectionConfig::new(
        &cli.account,
        &cli.pot,
        Amount::from_minor(cli.target),
        cli.dry_run,
    ) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::from(2);
        }
    };

    if cli.events.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %cli.events.display(), "input file seems to not be a csv file");
    }

    let deliveries = match read_deliveries(cli.events.clone()) {
        Ok(deliveries) => deliveries,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let opening = Amount::from_minor(cli.opening_balance.unwrap_or(cli.target));
    let ledger = Arc::new(
        MemoryLedger::new()
            .with_account(config.account_id(), opening)
            .with_pot(
                config.account_id(),
                config.pot_id(),
                Amount::from_minor(cli.pot_balance),
            ),
    );

    let replay = Replay::new(ledger.clone(), config.clone(), TracingLog)
        .with_max_in_flight(cli.max_in_flight);
    let (tx_sender, tx_receiver) = tokio::sync::mpsc::channel(16);

    tokio::task::spawn_blocking(move || {
        for result in deliveries {
            match result {
                Ok(delivery) => {
                    if tx_sender.blocking_send(delivery).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let summary = replay.run(ReceiverStream::new(tx_receiver)).await;
    info!(?summary, "replay finished");

    let row = BalanceRow::new(
        config.account_id(),
        ledger.balance_of(config.account_id()).await.unwrap_or_default(),
        config.pot_id(),
        ledger.pot_balance(config.pot_id()).await.unwrap_or_default(),
    );
    if let Err(e) = write_balances(io::stdout().lock(), [row]) {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    if summary.failed > 0 {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
