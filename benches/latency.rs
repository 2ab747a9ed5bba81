//! Benchmark harness using Criterion for latency measurement.
//!
//! Measures:
//! - Crossing a direct book at several depths (matching only)
//! - Crossing through the native bridge
//! - Booking an order that does not cross
//! - Place/cancel churn
//! - Auditing a snapshot

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use offer_cross::matching::cross;
use offer_cross::{
    verify, AccountId, Amount, BookIndex, CancelOffer, Command, Engine, EngineConfig, IncomingOrder, LedgerSnapshot,
    SnapshotBuilder,
};
use rust_decimal::Decimal;

fn usd(value: i64, issuer: &str) -> Amount {
    Amount::issued(Decimal::from(value), "USD", issuer)
}

fn xrp(value: i64) -> Amount {
    Amount::native(Decimal::from(value))
}

/// `depth` offers of 10 USD/g1 each, one maker per offer, plus both legs of
/// a USD/g2 → native → USD/g1 bridge.
fn market(depth: u32) -> LedgerSnapshot {
    let mut builder = SnapshotBuilder::new(1)
        .account("g1", Decimal::from(1_000_000))
        .account("g2", Decimal::from(1_000_000))
        .account("taker", Decimal::from(1_000_000_000))
        .trust_line("taker", "USD", "g1", Decimal::from(1_000_000_000))
        .trust_line("taker", "USD", "g2", Decimal::from(1_000_000_000))
        .fund("taker", usd(1_000_000, "g2"));
    for i in 0..depth {
        let maker = format!("m{i}");
        builder = builder
            .account(&maker, Decimal::from(1_000_000))
            .trust_line(&maker, "USD", "g1", Decimal::from(1_000_000))
            .trust_line(&maker, "USD", "g2", Decimal::from(1_000_000))
            .fund(&maker, usd(1_000, "g1"))
            .offer(&maker, xrp(10 + i64::from(i)), usd(10, "g1"))
            .offer(&maker, usd(10, "g2"), xrp(9))
            .offer(&maker, usd(11, "g2"), usd(10, "g1"));
    }
    builder.build()
}

/// Benchmark: Cross a direct book, consuming every offer
fn bench_cross_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_direct");
    let config = EngineConfig::default();

    for depth in [1u32, 10, 100].iter() {
        let snapshot = market(*depth);
        let index = BookIndex::build(&snapshot);
        let want = 10 * i64::from(*depth);
        let order = IncomingOrder::new("taker", usd(want, "g1"), xrp(want * 1_000));

        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| black_box(cross(&snapshot, &index, &config, &order, Decimal::from(1_000_000_000))))
        });
    }

    group.finish();
}

/// Benchmark: Cross an issued pair where bridge and direct interleave
fn bench_cross_bridged(c: &mut Criterion) {
    let mut group = c.benchmark_group("cross_bridged");
    let config = EngineConfig::default();

    for depth in [1u32, 10, 100].iter() {
        let snapshot = market(*depth);
        let index = BookIndex::build(&snapshot);
        let want = 20 * i64::from(*depth);
        let order = IncomingOrder::new("taker", usd(want, "g1"), usd(want * 2, "g2"));

        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| black_box(cross(&snapshot, &index, &config, &order, Decimal::from(1_000_000))))
        });
    }

    group.finish();
}

/// Benchmark: Order that books without crossing
fn bench_book_no_match(c: &mut Criterion) {
    let mut engine = Engine::new(EngineConfig::default(), market(100));

    c.bench_function("book_no_match", |b| {
        b.iter(|| {
            // Far below the book
            let cmd = Command::Create(IncomingOrder::new("taker", usd(10, "g1"), xrp(1)));
            black_box(engine.process_command(cmd))
        })
    });
}

/// Benchmark: Book then cancel the same offer
fn bench_place_cancel(c: &mut Criterion) {
    let mut engine = Engine::new(EngineConfig::default(), market(100));

    c.bench_function("place_cancel", |b| {
        b.iter(|| {
            let placed = engine.process_command(Command::Create(IncomingOrder::new(
                "taker",
                usd(10, "g1"),
                xrp(1),
            )));
            if let Some(sequence) = placed.sequence {
                black_box(engine.process_command(Command::Cancel(CancelOffer {
                    owner: AccountId::new("taker"),
                    sequence,
                })));
            }
        })
    });
}

/// Benchmark: Full invariant audit
fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify");

    for depth in [10u32, 100, 1000].iter() {
        let snapshot = market(*depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), depth, |b, _| {
            b.iter(|| black_box(verify(&snapshot)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cross_direct,
    bench_cross_bridged,
    bench_book_no_match,
    bench_place_cancel,
    bench_verify,
);

criterion_main!(benches);
