//! # Concurrency Tests
//!
//! These tests exercise the substrate's concurrent contracts from multiple
//! preemptive threads:
//!
//! 1. **CAS winner**: N threads race `safe_get_and_set` on one bit; exactly
//!    one observes the clear prior state.
//! 2. **Insert-unique**: racing `try_add` calls over a key set with
//!    duplicates admit exactly one winner per distinct key.
//! 3. **Reader during growth**: a reader loops over element 0 while a
//!    writer grows the array past several spine boundaries; the reader must
//!    never observe a torn value, and a subsequent `collect` reclaims the
//!    retired spines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use colstore::{BitVector, BlockArray, ConcurrentKeyMap, KeyArray, Pool};

#[test]
fn safe_get_and_set_has_exactly_one_winner() {
    let pool = Arc::new(Pool::new());
    let vector = Arc::new(BitVector::new(&pool));
    vector.ensure_capacity(8).unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = Vec::new();
    for _ in 0..threads {
        let vector = Arc::clone(&vector);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            vector.safe_get_and_set(3)
        }));
    }

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|was_set| !was_set)
        .count();
    assert_eq!(winners, 1, "exactly one thread must observe the clear bit");
    assert!(vector.get(3));
}

#[test]
fn concurrent_try_add_admits_one_winner_per_key() {
    let pool = Arc::new(Pool::new());
    let keys = Arc::new(KeyArray::new(&pool));
    let distinct = 64usize;
    keys.ensure_capacity(distinct).unwrap();
    for ix in 0..distinct {
        let data = [2u8, ix as u8, (ix * 7) as u8];
        assert!(keys.try_set_at(ix, Some(&data)).unwrap());
    }

    let map = Arc::new(ConcurrentKeyMap::new(&pool));
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = Vec::new();
    for thread_id in 0..threads {
        let map = Arc::clone(&map);
        let keys = Arc::clone(&keys);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut won = 0usize;
            for ix in 0..distinct {
                let key = keys.get_at(ix).unwrap().unwrap();
                let value = (thread_id * distinct + ix) as u64;
                if unsafe { map.try_add(key, value).unwrap() } {
                    won += 1;
                }
            }
            won
        }));
    }

    let total_wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total_wins, distinct, "each distinct key admits exactly one insert");
    assert_eq!(map.len(), distinct);

    for ix in 0..distinct {
        let probe = [2u8, ix as u8, (ix * 7) as u8];
        let value = map.try_get_value(&probe).unwrap().expect("winner value must be visible");
        assert_eq!(value as usize % distinct, ix, "stored value must come from a thread's insert");
    }
}

#[test]
fn reader_survives_spine_growth_and_collect_reclaims() {
    let pool = Arc::new(Pool::new());
    // Small geometry so growth crosses many spine boundaries quickly.
    let array: Arc<BlockArray<u64>> = Arc::new(BlockArray::new(Arc::clone(&pool), 64, 2));
    array.ensure_capacity(1).unwrap();

    const SENTINEL: u64 = 0xA5A5_5A5A_DEAD_BEEF;
    array.set(0, SENTINEL);

    let stop = Arc::new(AtomicBool::new(false));
    let reader = {
        let array = Arc::clone(&array);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut reads = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let value = array.get(0);
                assert_eq!(value, SENTINEL, "reader observed a torn element during growth");
                reads += 1;
            }
            reads
        })
    };

    // Grow in steps that repeatedly outgrow the 2-slot spine granularity.
    for step in 1..=64usize {
        array.ensure_capacity(step * 64 * 2).unwrap();
    }

    stop.store(true, Ordering::Relaxed);
    let reads = reader.join().unwrap();
    assert!(reads > 0);

    // The writer retired a chain of replaced spines; with the reader gone
    // the pool may reclaim them.
    let reserved_before = pool.reserved_bytes();
    unsafe { pool.collect() };
    assert!(pool.reserved_bytes() <= reserved_before);

    // Retired spine memory is reusable again.
    assert!(pool.alloc(1024).is_ok());
    assert_eq!(array.get(0), SENTINEL);
}

#[test]
fn growth_is_safe_from_competing_writers() {
    let pool = Arc::new(Pool::new());
    let vector = Arc::new(BitVector::new(&pool));

    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let mut handles = Vec::new();
    for thread_id in 0..threads {
        let vector = Arc::clone(&vector);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for step in 1..=16usize {
                let bits = step * 100_000 + thread_id;
                assert!(vector.try_ensure_capacity(bits, None).unwrap());
                assert!(vector.capacity() >= bits);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let top = vector.capacity() - 1;
    vector.set(top);
    assert!(vector.get(top));
}
