use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use offer_cross::{Amount, Command, Engine, EngineConfig, IncomingOrder, SnapshotBuilder};
use rust_decimal::Decimal;

const MAKERS: usize = 10;
const TAKERS: usize = 10;
const OFFERS_PER_MAKER: u32 = 50;
const ITERATIONS: u64 = 100_000;

fn usd(value: i64) -> Amount {
    Amount::issued(Decimal::from(value), "USD", "gw")
}

fn xrp(value: i64) -> Amount {
    Amount::native(Decimal::from(value))
}

/// Deep USD/native book: every maker quotes a ladder of offers.
fn build_engine() -> Engine {
    let mut builder = SnapshotBuilder::new(1).account("gw", Decimal::from(1_000_000));
    for m in 0..MAKERS {
        let maker = format!("maker{m}");
        builder = builder
            .account(&maker, Decimal::from(1_000_000_000))
            .trust_line(&maker, "USD", "gw", Decimal::from(1_000_000_000))
            .fund(&maker, usd(10_000_000));
        for level in 0..OFFERS_PER_MAKER {
            builder = builder.offer(&maker, xrp(100 + i64::from(level)), usd(100));
        }
    }
    for t in 0..TAKERS {
        let taker = format!("taker{t}");
        builder = builder
            .account(&taker, Decimal::from(1_000_000_000_000i64))
            .trust_line(&taker, "USD", "gw", Decimal::from(1_000_000_000_000i64));
    }
    Engine::new(EngineConfig::default(), builder.build())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Preparing Latency Benchmark...");

    let mut engine = build_engine();
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 100_000_000, 3)?;

    println!("Running {} iterations...", ITERATIONS);

    let mut total_duration = Duration::new(0, 0);

    for i in 0..ITERATIONS {
        // Ten lifts of 10 USD use up one 100 USD offer; one refill keeps the depth
        let cmd = if i % 10 != 9 {
            let taker = format!("taker{}", i as usize % TAKERS);
            Command::Create(IncomingOrder::new(taker, usd(10), xrp(20)))
        } else {
            let maker = format!("maker{}", i as usize % MAKERS);
            let level = (i % u64::from(OFFERS_PER_MAKER)) as i64;
            Command::Create(IncomingOrder::new(maker, xrp(100 + level), usd(100)))
        };

        let start = Instant::now();
        std::hint::black_box(engine.process_command(cmd));
        let elapsed = start.elapsed();

        // Outliers beyond the histogram bounds are dropped
        histogram.record(elapsed.as_nanos() as u64).unwrap_or(());
        total_duration += elapsed;
    }

    println!("\n=== Latency Report (ns) ===");
    println!("Total Ops:  {}", ITERATIONS);
    println!("Throughput: {:.2} ops/sec", ITERATIONS as f64 / total_duration.as_secs_f64());
    println!("Open offers: {}", engine.index().offer_count());
    println!("---------------------------");
    println!("Min:    {:9} ns", histogram.min());
    println!("P50:    {:9} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:9} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:9} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:9} ns", histogram.value_at_quantile(0.999));
    println!("P99.99: {:9} ns", histogram.value_at_quantile(0.9999));
    println!("Max:    {:9} ns", histogram.max());
    println!("---------------------------");

    println!("\nDistribution:");
    for v in histogram.iter_log(1_000, 2.0) {
        let count = v.count_since_last_iteration();
        if count > 0 {
            println!("<= {:9} ns: {:10} count", v.value_iterated_to(), count);
        }
    }

    let report = engine.verify();
    println!("\nInvariant findings after run: {}", report.finding_count());

    Ok(())
}
