use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use pot_balancer::csv::{Delivery, TriggerMode};
use pot_balancer::ledger::MemoryLedger;
use pot_balancer::log::NoopLog;
use pot_balancer::replay::Replay;
use pot_balancer::{Amount, BalanceCorrector, CorrectionConfig, TriggerEvent};
use tokio::runtime::Runtime;

const TARGET: i64 = 100_000;

/// Generates deliveries that keep the pot solvent.
///
/// Pattern (repeating):
/// 1. Income of 100.00
/// 2. Spending of 50.00
/// 3. Spending of 30.00, amount looked up from the balance
pub struct DeliveryGenerator {
    next_id: u32,
    remaining: u32,
}

impl DeliveryGenerator {
    pub fn new(count: u32) -> Self {
        Self {
            next_id: 1,
            remaining: count,
        }
    }
}

impl Iterator for DeliveryGenerator {
    type Item = Delivery;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let id = self.next_id;
        self.next_id += 1;

        let (amount, mode) = match id % 3 {
            1 => (10_000, TriggerMode::Payload),
            2 => (-5_000, TriggerMode::Payload),
            _ => (-3_000, TriggerMode::Balance),
        };

        Some(Delivery {
            id: format!("tx_{id}"),
            amount: Amount::from_minor(amount),
            mode,
            description: None,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DeliveryGenerator {}

fn config() -> CorrectionConfig {
    CorrectionConfig::new("acc_1", "pot_1", Amount::from_minor(TARGET), false).unwrap()
}

fn ledger() -> Arc<MemoryLedger> {
    Arc::new(
        MemoryLedger::new()
            .with_account("acc_1", Amount::from_minor(TARGET))
            .with_pot("acc_1", "pot_1", Amount::from_minor(1_000_000)),
    )
}

fn bench_single_correction(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("single_correction");

    group.bench_function("amount_aware_deposit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = ledger();
                ledger
                    .record_transaction("acc_1", "tx", Amount::from_minor(10_000))
                    .await
                    .unwrap();
                let corrector = BalanceCorrector::new(ledger.clone(), ledger, NoopLog);
                let event = TriggerEvent::known("tx", Amount::from_minor(10_000));
                black_box(corrector.correct(&config(), &event).await.unwrap())
            })
        });
    });

    group.bench_function("balance_snapshot_withdrawal", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ledger = ledger();
                ledger
                    .record_transaction("acc_1", "tx", Amount::from_minor(-10_000))
                    .await
                    .unwrap();
                let corrector = BalanceCorrector::new(ledger.clone(), ledger, NoopLog);
                let event = TriggerEvent::unknown("tx");
                black_box(corrector.correct(&config(), &event).await.unwrap())
            })
        });
    });

    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("replay");
    group.sample_size(20);

    for (count, in_flight) in [(1_000u32, 1usize), (10_000, 1), (10_000, 8)] {
        let label = format!("{count}tx_{in_flight}inflight");
        group.bench_with_input(
            BenchmarkId::from_parameter(&label),
            &(count, in_flight),
            |b, &(count, in_flight)| {
                b.iter(|| {
                    rt.block_on(async {
                        let replay =
                            Replay::new(ledger(), config(), NoopLog).with_max_in_flight(in_flight);
                        let stream = tokio_stream::iter(DeliveryGenerator::new(count));
                        black_box(replay.run(stream).await)
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_correction, bench_replay);

criterion_main!(benches);
