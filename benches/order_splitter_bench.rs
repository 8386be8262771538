use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use sor_core::orderbook::PriceLevel;
use sor_core::splitter::{OrderSplitter, VenueLiquidity};
use sor_core::types::{OrderIntent, RoutingStrategy, Side};

fn venues(count: usize) -> Vec<VenueLiquidity> {
    (0..count)
        .map(|i| {
            let available = Decimal::from(100 + i as u64 * 10);
            VenueLiquidity {
                venue: format!("venue-{}", i),
                available,
                spread_bps: Some(Decimal::from(5 + i as u64)),
                best_bid: Some(dec!(99.9)),
                best_ask: Some(dec!(100)),
                volume_24h: Decimal::from(1_000_000u64 * (i as u64 + 1)),
                avg_latency_ns: Some(1_000_000.0 * (i as f64 + 1.0)),
                opposing_levels: vec![
                    PriceLevel::new(dec!(100), available / dec!(2)),
                    PriceLevel::new(dec!(100.5), available / dec!(2)),
                ],
            }
        })
        .collect()
}

fn bench_splitter(c: &mut Criterion) {
    let splitter = OrderSplitter::default();
    let mut group = c.benchmark_group("OrderSplitter");

    for strategy in [
        RoutingStrategy::Proportional,
        RoutingStrategy::MinSlippage,
        RoutingStrategy::VWAP,
        RoutingStrategy::Iceberg,
        RoutingStrategy::TWAP,
    ] {
        group.bench_function(BenchmarkId::new("split", strategy.to_string()), |b| {
            let intent =
                OrderIntent::market("BTC/USDT", Side::Buy, dec!(50)).with_strategy(strategy);
            let venues = venues(5);
            b.iter(|| {
                let splits = splitter.split(black_box(&intent), black_box(&venues)).unwrap();
                black_box(splits);
            });
        });
    }

    group.bench_function(BenchmarkId::new("split", "20_venues"), |b| {
        let intent = OrderIntent::market("BTC/USDT", Side::Buy, dec!(200))
            .with_strategy(RoutingStrategy::Proportional);
        let venues = venues(20);
        b.iter(|| {
            let splits = splitter.split(black_box(&intent), black_box(&venues)).unwrap();
            black_box(splits);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_splitter);
criterion_main!(benches);
