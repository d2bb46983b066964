//! Benchmark suite for ratchet hot paths.
//!
//! This module provides performance benchmarks for:
//! - Failure classification (runs after every iteration)
//! - Plan diffing (runs on every replan)
//! - Plan backups (hash and dedup check)
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ratchet::plan::save_plans;
use ratchet::{compute_diff, FailureClassifier, Plan, PlanVersioner};
use tempfile::TempDir;

// ============================================================================
// Classification Benchmarks
// ============================================================================

/// Build agent output of roughly `lines` lines ending in `tail`.
fn agent_output(lines: usize, tail: &str) -> String {
    let mut output = String::new();
    for i in 0..lines {
        output.push_str(&format!("   Compiling crate_{i} v0.1.0 (/work/crate_{i})\n"));
    }
    output.push_str(tail);
    output
}

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let classifier = FailureClassifier::new();

    let cases = [
        ("clean", "test result: ok. 12 passed; 0 failed\n", 0),
        ("test_failure", "test api::get ... FAILED\ntest result: FAILED. 11 passed; 1 failed\n", 101),
        ("typecheck", "error[E0308]: mismatched types\n", 101),
        ("agent_error", "unexpected end of stream\n", 2),
    ];

    for size in [100, 1_000, 10_000] {
        for (name, tail, exit_code) in cases {
            let output = agent_output(size, tail);
            group.throughput(Throughput::Bytes(output.len() as u64));
            group.bench_with_input(BenchmarkId::new(name, size), &output, |b, output| {
                b.iter(|| black_box(classifier.classify(black_box(output), exit_code, 7, 1)));
            });
        }
    }

    group.finish();
}

// ============================================================================
// Diff Benchmarks
// ============================================================================

fn plan_list(count: u32) -> Vec<Plan> {
    (1..=count)
        .map(|id| {
            Plan::new(id, format!("Feature {id}"))
                .with_category(if id % 2 == 0 { "api" } else { "ui" })
                .with_steps([format!("Implement {id}"), format!("Test {id}")])
        })
        .collect()
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_diff");

    for count in [10, 100, 1_000] {
        let old = plan_list(count);
        let mut new = old.clone();
        for plan in new.iter_mut().step_by(5) {
            plan.description.push_str(" [needs review]");
        }
        new.truncate(new.len() - 1);
        new.push(Plan::new(count + 1, "Added"));

        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(
            BenchmarkId::new("compute_diff", count),
            &(old, new),
            |b, (old, new)| b.iter(|| black_box(compute_diff(black_box(old), black_box(new)))),
        );
    }

    group.finish();
}

// ============================================================================
// Backup Benchmarks
// ============================================================================

/// Backing up unchanged content is the common case: one hash and a lookup.
fn bench_backup_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_backup");

    for count in [10, 100, 1_000] {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("plans.json");
        save_plans(&path, &plan_list(count)).expect("write plans");

        let mut versioner = PlanVersioner::new(&path).expect("versioner");
        versioner.create_backup("manual").expect("first backup");

        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_function(BenchmarkId::new("unchanged", count), |b| {
            b.iter(|| black_box(versioner.create_backup("manual").expect("backup")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classification, bench_diff, bench_backup_dedup);
criterion_main!(benches);
