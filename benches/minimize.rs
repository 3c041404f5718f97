use automata_memo::{prelude::*, random::generate_random_automaton};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_minimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("minimize");
    let minimizer = StateMachineMinimizer::default();
    for &size in &[10usize, 50, 200] {
        let automata: Vec<_> = (0..8).map(|_| generate_random_automaton(2, size)).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &automata, |b, automata| {
            b.iter(|| {
                for aut in automata {
                    let minimized = minimizer.minimize(aut).expect("random automata are valid");
                    black_box(minimized.metrics().minimized_state_count);
                }
            })
        });
    }
    group.finish();
}

fn bench_cached_diff(c: &mut Criterion) {
    let sheet = |color: &str| {
        Node::stylesheet((0..50).map(|i| {
            Node::rule(format!(".item-{i}"))
                .with_declaration("color", color)
                .with_declaration("margin", format!("{i}px"))
        }))
    };
    let (old, new) = (sheet("red"), sheet("blue"));
    let mut cached = CachedDiffer::new(
        StylesheetDiffer,
        SignatureGenerator::new(),
        CacheConfig::default(),
    );
    c.bench_function("cached_stylesheet_diff", |b| {
        b.iter(|| black_box(cached.diff(&old, &new).patches.len()))
    });
}

criterion_group!(benches, bench_minimize, bench_cached_diff);
criterion_main!(benches);
