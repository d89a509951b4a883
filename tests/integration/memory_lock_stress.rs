//! MemoryLock under contention: overlapping batches from many threads never
//! produce two holders of one key, and every acquisition is released.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use sombra_chain::primitives::concurrency::{MemoryLock, MemoryLockGuard};

const THREADS: usize = 8;
const ROUNDS: usize = 2_000;
const KEYS: usize = 16;

#[test]
fn overlapping_batches_keep_single_holders() {
    let lock = Arc::new(MemoryLock::<u32>::new());
    let holders: Arc<Vec<AtomicUsize>> = Arc::new((0..KEYS).map(|_| AtomicUsize::new(0)).collect());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_id| {
            let lock = Arc::clone(&lock);
            let holders = Arc::clone(&holders);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut acquired = 0usize;
                for round in 0..ROUNDS {
                    let start = (thread_id * 3 + round) % KEYS;
                    let keys: Vec<u32> = (0..3).map(|i| ((start + i) % KEYS) as u32).collect();
                    let guard = MemoryLockGuard::new(Arc::clone(&lock), keys, true, true);
                    if !guard.is_locked() {
                        continue;
                    }
                    acquired += 1;
                    for key in guard.keys() {
                        let prev = holders[*key as usize].fetch_add(1, Ordering::SeqCst);
                        assert_eq!(prev, 0, "key {key} had two holders");
                    }
                    for key in guard.keys() {
                        holders[*key as usize].fetch_sub(1, Ordering::SeqCst);
                    }
                }
                acquired
            })
        })
        .collect();

    let acquired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(acquired > 0);
    assert_eq!(lock.size(), 0);
}

#[test]
fn single_key_winners_are_unique_per_round() {
    let lock = Arc::new(MemoryLock::<Vec<u8>>::new());
    for round in 0..200u32 {
        let barrier = Arc::new(Barrier::new(THREADS));
        let key = round.to_be_bytes().to_vec();
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let barrier = Arc::clone(&barrier);
                let key = key.clone();
                thread::spawn(move || {
                    barrier.wait();
                    lock.try_lock(key)
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1, "round {round}");
        assert!(lock.unlock(&key));
    }
    assert_eq!(lock.size(), 0);
}
