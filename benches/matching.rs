//! Benchmarks for automaton construction, determinization and matching

use automat::{Automaton, MatchBuffers};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

fn lit(like: &Automaton, c: char) -> Automaton {
    Automaton::new_matching(Some(like), &[(c as u32, c as u32)]).unwrap()
}

/// `kw0|kw1|...|kwN`, every keyword in the same arena.
fn keywords(n: usize) -> Automaton {
    let mut prefix = Automaton::new_matching(None, &[('k' as u32, 'k' as u32)]).unwrap();
    let mut w = lit(&prefix, 'w');
    prefix.sequence(&mut w).unwrap();

    let mut result: Option<Automaton> = None;
    for i in 0..n {
        let mut word = prefix.copy(Some(&prefix)).unwrap();
        for c in i.to_string().chars() {
            let mut digit = lit(&prefix, c);
            word.sequence(&mut digit).unwrap();
        }
        result = Some(match result.take() {
            Some(mut all) => {
                all.union(&mut word).unwrap();
                all
            }
            None => word,
        });
    }
    result.unwrap()
}

/// `(a|b)*a(a|b)^n`, whose DFA has 2^(n+1) states.
fn nth_from_end(n: usize) -> Automaton {
    let mut a = Automaton::new_matching(None, &[('a' as u32, 'b' as u32)]).unwrap();
    a.repeat(false).unwrap();
    let mut marker = lit(&a, 'a');
    a.sequence(&mut marker).unwrap();
    for _ in 0..n {
        let mut any = Automaton::new_matching(Some(&a), &[('a' as u32, 'b' as u32)]).unwrap();
        a.sequence(&mut any).unwrap();
    }
    a
}

fn to_input(s: &str) -> Vec<u32> {
    s.chars().map(u32::from).collect()
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("build_keywords_100", |b| b.iter(|| keywords(black_box(100))));
}

fn bench_determinize(c: &mut Criterion) {
    c.bench_function("determinize_keywords_100", |b| {
        b.iter_batched(
            || keywords(100),
            |mut a| {
                a.determinize().unwrap();
                a
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("determinize_nth_from_end_8", |b| {
        b.iter_batched(
            || nth_from_end(8),
            |mut a| {
                a.determinize().unwrap();
                a
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_minimize(c: &mut Criterion) {
    c.bench_function("minimize_keywords_100", |b| {
        b.iter_batched(
            || keywords(100),
            |mut a| {
                a.minimize().unwrap();
                a
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_match(c: &mut Criterion) {
    let nfa = nth_from_end(8);
    let mut dfa = nth_from_end(8);
    dfa.minimize().unwrap();
    let input = to_input(&"ab".repeat(512));

    let mut bufs = MatchBuffers::new();
    c.bench_function("match_nfa_1k", |b| {
        b.iter(|| nfa.find_match_with(&mut bufs, black_box(&input), true))
    });
    c.bench_function("match_dfa_1k", |b| {
        b.iter(|| dfa.find_match_with(&mut bufs, black_box(&input), true))
    });

    let kw = keywords(100);
    let hit = to_input("kw57");
    let miss = to_input("kx57");
    c.bench_function("match_keyword_hit", |b| b.iter(|| kw.is_match(black_box(&hit))));
    c.bench_function("match_keyword_miss", |b| b.iter(|| kw.is_match(black_box(&miss))));
}

criterion_group!(
    benches,
    bench_build,
    bench_determinize,
    bench_minimize,
    bench_match,
);
criterion_main!(benches);
