mod common;

use common::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use resv::{Ticket, TicketClass};
use resv_execbuf::{BusyReason, Execbuf, ExecbufConfig, ExecbufError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

static STRESS_CLASS: TicketClass = TicketClass::new("stress");

const BOS: usize = 12;
const THREADS: usize = 8;
const ROUNDS: usize = 300;
const MAX_SET: usize = 5;

#[test_log::test]
#[cfg_attr(miri, ignore)]
fn overlapping_sets_always_complete() {
    let dev = device();
    let bos = Arc::new(bos(&dev, BOS));
    let in_use: Arc<Vec<AtomicBool>> = Arc::new((0..BOS).map(|_| AtomicBool::new(false)).collect());
    let fenced = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));
    let execbuf = Execbuf::new(ExecbufConfig::default().ticket_class(&STRESS_CLASS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let bos = bos.clone();
            let in_use = in_use.clone();
            let fenced = fenced.clone();
            let barrier = barrier.clone();
            let execbuf = execbuf.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0x5eed ^ t as u64);
                let mut idx: Vec<usize> = (0..BOS).collect();
                let mut ticket = Ticket::new();
                barrier.wait();

                for round in 0..ROUNDS {
                    idx.shuffle(&mut rng);
                    let picked = &idx[..rng.random_range(1..=MAX_SET)];
                    let set: Vec<Bo> = picked.iter().map(|&i| bos[i].clone()).collect();
                    let mut list = validation_set(&set);

                    execbuf.reserve(Some(&mut ticket), &mut list).unwrap();
                    for &i in picked {
                        assert!(!in_use[i].swap(true, Ordering::AcqRel), "bo {i} reserved twice");
                    }
                    assert_eq!(ticket.acquired(), picked.len());
                    thread::yield_now();
                    for &i in picked {
                        in_use[i].store(false, Ordering::Release);
                    }

                    if round % 4 == 3 {
                        execbuf.back_off(Some(&mut ticket), &mut list);
                    } else {
                        execbuf.fence(Some(&mut ticket), &mut list, &fence(round as u64));
                        fenced.fetch_add(1, Ordering::Relaxed);
                    }
                    assert!(list.iter().all(|e| !e.is_reserved() && !e.is_removed()));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(fenced.load(Ordering::Relaxed) > 0);
    assert_eq!(dev.glob().lru().len(), BOS);
    for bo in bos.iter() {
        assert_released(bo);
        assert_eq!(bo.list_refs().count(), 2);
    }

    let driver = dev.driver();
    let attached = bos.iter().filter(|bo| !bo.is_idle()).count();
    assert_eq!(
        driver.refs.load(Ordering::SeqCst) - driver.unrefs.load(Ordering::SeqCst),
        attached
    );
}

#[test_log::test]
#[cfg_attr(miri, ignore)]
fn ticketless_batches_never_block() {
    let dev = device();
    let bos = Arc::new(bos(&dev, 4));
    let busy = Arc::new(AtomicUsize::new(0));
    let execbuf = Execbuf::default();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let bos = bos.clone();
            let busy = busy.clone();
            let execbuf = execbuf.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(t);
                for round in 0..200u64 {
                    let mut set: Vec<Bo> = bos.iter().cloned().collect();
                    set.shuffle(&mut rng);
                    set.truncate(rng.random_range(1..=bos.len()));
                    let mut list = validation_set(&set);
                    match execbuf.reserve(None, &mut list) {
                        Ok(()) => execbuf.fence(None, &mut list, &fence(round)),
                        Err(ExecbufError::Busy {
                            reason: BusyReason::Contended,
                        }) => {
                            busy.fetch_add(1, Ordering::Relaxed);
                            assert!(list.iter().all(|e| !e.is_reserved()));
                        }
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    bos.iter().for_each(assert_released);
    tracing::debug!(busy = busy.load(Ordering::Relaxed), "ticketless contention");
}
