use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use gauge_relay::{BoundedLatestQueue, Frame};

#[test]
fn never_exceeds_capacity_and_newest_is_retrievable() {
    for capacity in [1usize, 2, 5] {
        let queue = BoundedLatestQueue::new(capacity);
        for i in 0..50u32 {
            queue.push(i);
            assert!(queue.len() <= capacity);

            let probe = queue.clone();
            let mut drained = Vec::new();
            while let Some(item) = probe.try_pop_nowait() {
                drained.push(item);
            }
            assert_eq!(drained.last(), Some(&i));
            for item in drained {
                queue.push(item);
            }
        }
    }
}

#[test]
fn scenario_a_capacity_one_keeps_latest_frame() {
    let queue = BoundedLatestQueue::new(1);
    let f1 = Frame::solid(2, 2, [1, 1, 1]).with_sequence(1);
    let f2 = Frame::solid(2, 2, [2, 2, 2]).with_sequence(2);
    queue.push(f1);
    queue.push(f2.clone());

    assert_eq!(queue.pop(Duration::from_millis(10)), Some(f2));
    assert_eq!(queue.pop(Duration::from_millis(10)), None);
    assert_eq!(queue.stats().dropped, 1);
}

#[test]
fn push_never_blocks_with_stalled_consumer() {
    let queue = BoundedLatestQueue::new(2);
    let _stalled_consumer = queue.clone();
    let started = Instant::now();
    for i in 0..100_000u32 {
        queue.push(i);
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(queue.len(), 2);
}

#[test]
fn consumer_sees_increasing_subset_of_pushes() {
    let queue = BoundedLatestQueue::new(1);
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let queue = queue.clone();
        let done = done.clone();
        std::thread::spawn(move || {
            for i in 0..20_000u64 {
                queue.push(i);
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    let mut last: Option<u64> = None;
    loop {
        match queue.pop(Duration::from_millis(20)) {
            Some(item) => {
                if let Some(prev) = last {
                    assert!(item > prev, "reordered or duplicated: {} after {}", item, prev);
                }
                last = Some(item);
            }
            None if done.load(Ordering::SeqCst) => break,
            None => {}
        }
    }
    producer.join().unwrap();
    assert_eq!(last, Some(19_999));
}
