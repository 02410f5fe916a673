use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use rust_decimal::Decimal;
use tripvault_core::{Currency, Money, TripId, UserId};
use tripvault_vault::{NewEntry, ShareInput, SplitMode, VaultEntry, allocate, compute_balances};

fn users(n: usize) -> Vec<UserId> {
    (0..n).map(|_| UserId::new()).collect()
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_allocation");
    let amount = Money::new(1_234_567, Currency::usd());

    for n in [2usize, 8, 32] {
        let participants = users(n);
        group.throughput(Throughput::Elements(n as u64));

        let equal = SplitMode::Equal {
            participants: participants.clone(),
        };
        group.bench_with_input(BenchmarkId::new("equal", n), &equal, |b, mode| {
            b.iter(|| allocate(black_box(&amount), mode).unwrap());
        });

        // 100 / n rounded down to basis points, remainder on the first share.
        let bp = 10_000 / n as i64;
        let shares = participants
            .iter()
            .enumerate()
            .map(|(i, u)| {
                let points = if i == 0 { 10_000 - bp * (n as i64 - 1) } else { bp };
                ShareInput::new(*u, Decimal::new(points, 2))
            })
            .collect();
        let percentage = SplitMode::Percentage { shares };
        group.bench_with_input(BenchmarkId::new("percentage", n), &percentage, |b, mode| {
            b.iter(|| allocate(black_box(&amount), mode).unwrap());
        });
    }

    group.finish();
}

fn bench_balances(c: &mut Criterion) {
    let mut group = c.benchmark_group("trip_balances");
    let trip_id = TripId::new();
    let participants = users(6);

    for entries in [10usize, 100, 1000] {
        let snapshot: Vec<VaultEntry> = (0..entries)
            .map(|i| {
                NewEntry {
                    trip_id,
                    description: format!("expense {i}"),
                    amount: Money::new(1_000 + i as i64, Currency::usd()),
                    paid_by: participants[i % participants.len()],
                    category: None,
                    occurred_at: None,
                    split: SplitMode::Equal {
                        participants: participants.clone(),
                    },
                    processor_payable: true,
                }
                .build(Utc::now())
                .unwrap()
            })
            .collect();

        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &snapshot, |b, s| {
            b.iter(|| compute_balances(black_box(s)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_allocation, bench_balances);
criterion_main!(benches);
