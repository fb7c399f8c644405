use shared_ptr::{alloc::Counting, alloc::Global, make_shared_in, SharedPtr};
use std::{
    sync::atomic::AtomicBool,
    sync::atomic::AtomicUsize,
    sync::atomic::Ordering::SeqCst,
    sync::{Arc, Barrier},
};

const THREADS: usize = 8;
const ROUNDS: usize = 200;

struct Probe {
    alive: AtomicBool,
    drops: Arc<AtomicUsize>,
}

impl Drop for Probe {
    fn drop(&mut self) {
        assert!(self.alive.swap(false, SeqCst));
        self.drops.fetch_add(1, SeqCst);
    }
}

#[test]
fn lock_races_the_last_release() {
    static ALLOC: Counting<Global> = Counting::new(Global);
    let _ = env_logger::builder().is_test(true).try_init();

    for _ in 0..ROUNDS {
        let drops = Arc::new(AtomicUsize::new(0));
        let owner = make_shared_in(
            Probe {
                alive: AtomicBool::new(true),
                drops: Arc::clone(&drops),
            },
            &ALLOC,
        );
        let weak = owner.downgrade();
        let barrier = Barrier::new(THREADS + 1);

        crossbeam::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|_| {
                    barrier.wait();
                    for _ in 0..64 {
                        let locked: SharedPtr<Probe> = weak.lock();
                        match locked.get() {
                            Some(probe) => assert!(probe.alive.load(SeqCst)),
                            None => assert!(weak.expired()),
                        }
                    }
                });
            }

            barrier.wait();
            drop(owner);
        })
        .unwrap();

        assert!(drops.load(SeqCst) == 1);
        assert!(weak.expired());
        assert!(weak.lock().is_null());
        assert!(weak.weak_count() == 1);
    }

    assert!(ALLOC.live() == 0);
    assert!(ALLOC.allocations() == ROUNDS);
}

#[test]
fn promoted_owners_keep_the_object_alive() {
    let drops = Arc::new(AtomicUsize::new(0));
    let owner = make_shared_in(
        Probe {
            alive: AtomicBool::new(true),
            drops: Arc::clone(&drops),
        },
        &shared_ptr::alloc::GLOBAL,
    );
    let weak = owner.downgrade();
    let barrier = Barrier::new(THREADS + 1);

    crossbeam::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|_| {
                let locked = weak.lock();
                assert!(!locked.is_null());
                barrier.wait();
                barrier.wait();
                assert!(locked.alive.load(SeqCst));
            });
        }

        barrier.wait();
        drop(owner);
        assert!(drops.load(SeqCst) == 0);
        barrier.wait();
    })
    .unwrap();

    assert!(drops.load(SeqCst) == 1);
    assert!(weak.expired());
}
