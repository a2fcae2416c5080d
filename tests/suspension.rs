mod common;

use common::*;
use dex_runtime::{
    utils::MethodId,
    vm::{
        entrypoints,
        metrics::RuntimeMetrics,
        thread::{ThreadFlag, ThreadState},
    },
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};

const WARN_AFTER: Duration = Duration::from_secs(1);

/// Keeps the calling thread runnable, polling for suspension, until `stop` is set.
fn spin(fx: &Fixture, name: &str, progress: &AtomicU64, stop: &AtomicBool) {
    fx.with_thread(name, |soa| {
        while !stop.load(Ordering::Acquire) {
            progress.fetch_add(1, Ordering::Relaxed);
            soa.check_suspend();
            thread::yield_now();
        }
    });
}

// ============================================================================
// Single-thread suspension
// ============================================================================

#[test]
fn test_suspend_parks_thread_at_suspend_check() {
    let fx = Fixture::new();
    let progress = AtomicU64::new(0);
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| spin(&fx, "worker", &progress, &stop));
        wait_until(|| fx.runtime.threads().thread_count() == 1);
        let worker = fx.runtime.threads().list().remove(0);
        wait_until(|| worker.state() == ThreadState::Runnable);

        let guard = fx.runtime.threads().suspend(&worker, WARN_AFTER);
        assert_eq!(worker.state(), ThreadState::Suspended);
        assert_eq!(worker.suspend_count(), 1);
        let parked_at = progress.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(progress.load(Ordering::Relaxed), parked_at);

        drop(guard);
        wait_until(|| progress.load(Ordering::Relaxed) > parked_at);
        assert_eq!(worker.suspend_count(), 0);
        stop.store(true, Ordering::Release);
    });
    assert_eq!(RuntimeMetrics::get(&fx.runtime.metrics().suspensions), 1);
}

#[test]
fn test_suspending_native_thread_does_not_wait() {
    let fx = Fixture::new();
    let idle = fx.runtime.attach_thread("idle");
    assert_eq!(idle.state(), ThreadState::Native);

    let guard = fx.runtime.threads().suspend(&idle, WARN_AFTER);
    assert_eq!(idle.suspend_count(), 1);
    drop(guard);
    assert_eq!(idle.suspend_count(), 0);
    fx.runtime.detach_thread(&idle);
}

// ============================================================================
// Checkpoints
// ============================================================================

#[test]
fn test_checkpoint_runs_on_target_thread() {
    let fx = Fixture::new();
    let progress = AtomicU64::new(0);
    let stop = AtomicBool::new(false);
    let ran_on = Arc::new(Mutex::new(None));

    thread::scope(|scope| {
        scope.spawn(|| spin(&fx, "worker", &progress, &stop));
        wait_until(|| fx.runtime.threads().thread_count() == 1);
        let worker = fx.runtime.threads().list().remove(0);

        wait_until(|| {
            let ran_on = ran_on.clone();
            fx.runtime.threads().request_checkpoint(&worker, move |target| {
                *ran_on.lock() = Some((thread::current().id(), target.id()));
            })
        });
        wait_until(|| ran_on.lock().is_some());
        assert_eq!(*ran_on.lock(), Some((worker.native_id(), worker.id())));
        stop.store(true, Ordering::Release);
    });
    assert_eq!(RuntimeMetrics::get(&fx.runtime.metrics().checkpoints_run), 1);
}

#[test]
fn test_suspend_check_without_requests_runs_nothing() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        assert_eq!(soa.thread().flags(), 0);
        soa.check_suspend();
        assert_eq!(soa.thread().state(), ThreadState::Runnable);
    });
    assert_eq!(RuntimeMetrics::get(&fx.runtime.metrics().checkpoints_run), 0);
}

#[test]
fn test_checkpoint_runs_once() {
    let fx = Fixture::new();
    let runs = Arc::new(AtomicUsize::new(0));
    fx.with_thread("main", |soa| {
        let counted = runs.clone();
        assert!(fx.runtime.threads().request_checkpoint(soa.thread(), move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(soa.thread().read_flag(ThreadFlag::CHECKPOINT_REQUEST));

        soa.check_suspend();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!soa.thread().read_flag(ThreadFlag::CHECKPOINT_REQUEST));

        soa.check_suspend();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    });
    assert_eq!(RuntimeMetrics::get(&fx.runtime.metrics().checkpoints_run), 1);
}

#[test]
fn test_checkpoint_for_non_runnable_thread_runs_on_requester() {
    let fx = Fixture::new();
    let idle = fx.runtime.attach_thread("idle");
    let runs = Arc::new(AtomicUsize::new(0));

    let counted = runs.clone();
    assert!(!fx
        .runtime
        .threads()
        .request_checkpoint(&idle, move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let counted = runs.clone();
    let requested = fx.runtime.threads().run_checkpoint(move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(requested, 0);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(idle.suspend_count(), 0);
    fx.runtime.detach_thread(&idle);
}

// ============================================================================
// Suspend-all
// ============================================================================

#[test]
fn test_suspend_all_stops_every_thread() {
    const WORKERS: usize = 3;
    let fx = Fixture::new();
    let progress: Vec<_> = (0..WORKERS).map(|_| AtomicU64::new(0)).collect();
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        for (i, counter) in progress.iter().enumerate() {
            let (fx, stop) = (&fx, &stop);
            scope.spawn(move || spin(fx, &format!("worker-{i}"), counter, stop));
        }
        wait_until(|| fx.runtime.threads().thread_count() == WORKERS);
        let workers = fx.runtime.threads().list();
        wait_until(|| workers.iter().all(|t| t.state() == ThreadState::Runnable));

        let world = fx.runtime.suspend_all();
        assert_eq!(world.suspended_threads().len(), WORKERS);
        assert!(fx.runtime.mutator_lock().is_exclusively_held());
        assert!(workers.iter().all(|t| t.state() != ThreadState::Runnable));
        let snapshot: Vec<_> = progress.iter().map(|p| p.load(Ordering::Relaxed)).collect();
        thread::sleep(Duration::from_millis(50));
        let after: Vec<_> = progress.iter().map(|p| p.load(Ordering::Relaxed)).collect();
        assert_eq!(snapshot, after);

        drop(world);
        assert!(!fx.runtime.mutator_lock().is_exclusively_held());
        wait_until(|| {
            progress
                .iter()
                .zip(&snapshot)
                .all(|(p, before)| p.load(Ordering::Relaxed) > *before)
        });
        stop.store(true, Ordering::Release);
    });
    assert_eq!(
        RuntimeMetrics::get(&fx.runtime.metrics().suspend_all_count),
        1
    );
}

#[test]
fn test_native_code_returning_during_suspend_all_blocks() {
    let fx = Fixture::new();
    let in_native = AtomicBool::new(false);
    let release = AtomicBool::new(false);
    let returned = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            fx.with_thread("native-worker", |soa| {
                let natives = fx.class(soa, NATIVES);
                let name = MethodId::new(natives, slots::NATIVES_NAME);
                let result = soa.call_native(name, None, |_, _| {
                    in_native.store(true, Ordering::Release);
                    while !release.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(1));
                    }
                    None
                });
                assert_eq!(result, Ok(None));
                returned.store(true, Ordering::Release);
            });
        });

        wait_until(|| in_native.load(Ordering::Acquire));
        let worker = fx.runtime.threads().list().remove(0);
        assert_eq!(worker.state(), ThreadState::Native);

        // A thread in native code does not hold up the suspension.
        let world = fx.runtime.suspend_all();
        release.store(true, Ordering::Release);
        thread::sleep(Duration::from_millis(50));
        assert!(!returned.load(Ordering::Acquire));
        assert_ne!(worker.state(), ThreadState::Runnable);

        drop(world);
        wait_until(|| returned.load(Ordering::Acquire));
    });
}

// ============================================================================
// Class initialization
// ============================================================================

#[test]
fn test_class_initialized_once_across_threads() {
    const THREADS: usize = 8;
    let fx = Fixture::new();
    let barrier = Barrier::new(THREADS);

    let fields: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let (fx, barrier) = (&fx, &barrier);
                scope.spawn(move || {
                    fx.with_thread(&format!("init-{i}"), |soa| {
                        let main = fx.main_run(soa);
                        barrier.wait();
                        entrypoints::find_field_from_code(
                            soa,
                            fx.idx.counter_value,
                            main,
                            static_read(true),
                            4,
                        )
                        .unwrap()
                    })
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(fx.counter_runs.load(Ordering::SeqCst), 1);
    assert!(fields.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(
        RuntimeMetrics::get(&fx.runtime.metrics().class_initializations),
        1
    );
}

#[test]
fn test_suspend_all_while_thread_waits_for_initializer() {
    let fx = Fixture::new();
    let barrier = Barrier::new(2);

    thread::scope(|scope| {
        for i in 0..2 {
            let (fx, barrier) = (&fx, &barrier);
            scope.spawn(move || {
                fx.with_thread(&format!("init-{i}"), |soa| {
                    let main = fx.main_run(soa);
                    barrier.wait();
                    entrypoints::resolve_verify_and_clinit(soa, fx.idx.counter, main, true, true)
                        .unwrap();
                });
            });
        }
        // The initializer sleeps; stop the world while one thread waits on the other.
        wait_until(|| {
            let counter = fx.runtime.linker().lookup_class(COUNTER);
            counter.is_some_and(|c| fx.runtime.linker().class(c).is_initializing())
        });
        fx.runtime.collect_garbage();
    });
    assert_eq!(fx.counter_runs.load(Ordering::SeqCst), 1);
}
