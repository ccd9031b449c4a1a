// This Source Code Form is subject to the terms of the Mozilla Public
// License, v2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{ffi::OsString, path::PathBuf, process::Command};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use crossbeam::thread::Scope;
use intern_table::collector::collect_garbage;
use intern_table::heap::{Heap, StringRef};
use intern_table::{InternTable, Strength};
use std::hash::{BuildHasher, BuildHasherDefault};
use walkdir::WalkDir;

fn go<'a, RS: Send + Sync + Clone + BuildHasher>(
    nthreads: u8,
    scope: &&Scope<'a>,
    heap: &'a Heap<RS>,
    table: &'a InternTable<StringRef, RS>,
    strength: Strength,
    path: &str,
) {
    let mut senders = vec![];
    for _ in 0..nthreads {
        let (sender, receiver) = std::sync::mpsc::channel();
        senders.push(sender);
        let _ = scope.spawn(move |_| loop {
            match receiver.recv() {
                Ok(Run::Continue(pb)) => {
                    let buf = std::fs::read_to_string(pb).unwrap();
                    for s in buf.split_whitespace() {
                        table.intern(heap.alloc_str(s), strength);
                    }
                }
                Ok(Run::Stop) | Err(_) => break,
            }
        });
    }
    for (idx, pb) in rs_files(path).enumerate() {
        senders[idx % (nthreads as usize)]
            .send(Run::Continue(pb))
            .expect("failed to send continue message");
    }
    for sender in senders.iter() {
        sender.send(Run::Stop).expect("failed to send stop message");
    }
}

fn do_stuff<RS: Send + Sync + Clone + Default + BuildHasher>(
    nthreads: u8,
    strength: Strength,
    path: &str,
) {
    let heap = Heap::<RS>::new(Default::default());
    let table = InternTable::<StringRef, RS>::new(Default::default());
    let _ = crossbeam::scope(|scope| {
        go(nthreads, &scope, &heap, &table, strength, path);
    });
    collect_garbage(&heap, &table, &[]);
}

fn warm_cache(path: &str) {
    for _ in 0..10 {
        do_stuff::<ahash::RandomState>(1, Strength::Strong, path);
    }
}

#[cfg(target_os = "macos")]
#[allow(unused)]
fn clear_cache() {
    Command::new("sudo")
        .arg("sync")
        .output()
        .expect("sync failed");
    Command::new("sudo")
        .arg("purge")
        .output()
        .expect("purge failed");
}

#[cfg(target_os = "linux")]
#[allow(unused)]
fn clear_cache() {
    Command::new("sudo")
        .arg("sync")
        .output()
        .expect("sync failed");
    Command::new("sudo")
        .arg("sysctl")
        .arg("vm.drop_caches=1")
        .output()
        .expect("sysctl vm.drop_caches=1 failed");
}

fn criterion_benchmark(c: &mut Criterion) {
    criterion_benchmark_generic::<ahash::RandomState>(c, "ahash");
    criterion_benchmark_generic::<BuildHasherDefault<rustc_hash::FxHasher>>(c, "fxhash");
}

fn criterion_benchmark_generic<RS: Send + Sync + Clone + Default + BuildHasher>(
    c: &mut Criterion,
    hash_name: &'static str,
) {
    let benchmark_name = |n: u8, strength: Strength, cache_state: &'static str| {
        format!(
            "intern {:?} + collect: ({}/{}, n = {})",
            strength, cache_state, hash_name, n,
        )
    };

    let nthreads = match std::env::var("BENCH_NTHREADS") {
        Ok(s) => s
            .split_whitespace()
            .map(|x| x.parse::<u8>())
            .collect::<Result<Vec<_>, _>>()
            .expect("BENCH_NTHREADS should be a whitespace-separated list of u8s"),
        Err(_) => (1..=8).collect(),
    };

    let path = "./benchmarks/data";

    let mut run_benchmark = |name| {
        for strength in [Strength::Strong, Strength::Weak] {
            for n in nthreads.iter() {
                c.bench_function(&benchmark_name(*n, strength, name), |b| {
                    b.iter_batched(
                        if name == "warm" { || {} } else { clear_cache },
                        |_| do_stuff::<RS>(*n, strength, path),
                        BatchSize::NumIterations(1),
                    );
                });
            }
        }
    };

    if std::env::var("BENCH_COLD_CACHE").is_ok() {
        clear_cache();
        run_benchmark("cold");
    }

    warm_cache(path);
    run_benchmark("warm");
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

// Benchmark:
//
// Walk over nested directories with lots of files, handing each file to
// one of n threads. Each thread allocates every whitespace-separated token
// on a shared heap and interns it with the given strength. A collection
// with no mutator roots follows, which clears out the weak tier.
//
// Combinations:
// (1) Strong or weak interning
// (2) With warm or cold disk buffer cache

fn rs_files(path: &str) -> impl Iterator<Item = PathBuf> {
    let mut rs = OsString::new();
    rs.push("rs");
    WalkDir::new(path).into_iter().filter_map(move |e| {
        let pb = e.ok()?.into_path();
        if pb.extension() == Some(&rs) {
            Some(pb)
        } else {
            None
        }
    })
}

enum Run<T> {
    Continue(T),
    Stop,
}
