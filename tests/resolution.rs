mod common;

use common::*;
use dex_runtime::vm::{entrypoints, exceptions::ExceptionKind, metrics::RuntimeMetrics};
use std::{
    sync::{atomic::Ordering, Barrier},
    thread,
};

// ============================================================================
// Strings
// ============================================================================

#[test]
fn test_equal_literals_resolve_to_one_object() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        let hello = entrypoints::resolve_string_from_code(soa, fx.idx.hello, main).unwrap();
        let again = entrypoints::resolve_string_from_code(soa, fx.idx.hello_again, main).unwrap();
        let world = entrypoints::resolve_string_from_code(soa, fx.idx.world, main).unwrap();

        assert_eq!(hello, again);
        assert_ne!(hello, world);
        assert_eq!(fx.runtime.heap().string_value(hello).as_deref(), Some("hello"));
        assert_eq!(fx.runtime.heap().string_value(world).as_deref(), Some("world"));
        assert_eq!(
            fx.runtime.heap().class_of(hello),
            Some(fx.runtime.linker().well_known().string)
        );
    });
}

#[test]
fn test_string_resolution_is_cached() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        let first = entrypoints::resolve_string_from_code(soa, fx.idx.hello, main).unwrap();
        for _ in 0..3 {
            let again = entrypoints::resolve_string_from_code(soa, fx.idx.hello, main).unwrap();
            assert_eq!(again, first);
        }
    });
    assert_eq!(RuntimeMetrics::get(&fx.runtime.metrics().string_resolutions), 1);
}

#[test]
fn test_concurrent_string_resolution_yields_one_object() {
    const THREADS: usize = 8;
    let fx = Fixture::new();
    let barrier = Barrier::new(THREADS);

    let resolved: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let (fx, barrier) = (&fx, &barrier);
                scope.spawn(move || {
                    fx.with_thread(&format!("resolver-{i}"), |soa| {
                        let main = fx.main_run(soa);
                        barrier.wait();
                        entrypoints::resolve_string_from_code(soa, fx.idx.hello, main).unwrap()
                    })
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(resolved.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(
        fx.runtime.heap().string_value(resolved[0]).as_deref(),
        Some("hello")
    );
}

#[test]
fn test_interned_strings_survive_collection() {
    let fx = Fixture::new();
    let hello = fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        entrypoints::resolve_string_from_code(soa, fx.idx.hello, main).unwrap()
    });
    fx.runtime.collect_garbage();
    assert!(fx.runtime.heap().is_live(hello));
    assert!(fx.runtime.linker().roots().contains(&hello));
}

// ============================================================================
// Types
// ============================================================================

#[test]
fn test_resolve_type_caches_result() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        let point = entrypoints::resolve_type_from_code(soa, fx.idx.point, main).unwrap();
        assert_eq!(point, fx.class(soa, POINT));
        let cache = fx.runtime.linker().class(main.class);
        assert_eq!(cache.resolution_cache().resolved_type(fx.idx.point), Some(point));
        // Resolving a type does not initialize it.
        assert!(!fx.runtime.linker().class(point).is_initialized());

        let ints = entrypoints::resolve_type_from_code(soa, fx.idx.int_array, main).unwrap();
        assert!(fx.runtime.linker().class(ints).is_array_class());
    });
}

#[test]
fn test_resolve_missing_type() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        for _ in 0..2 {
            let thrown =
                entrypoints::resolve_type_from_code(soa, fx.idx.missing, main).unwrap_err();
            assert_thrown(
                &thrown,
                ExceptionKind::NoClassDefFound,
                "Class not found: com.example.Missing",
            );
            soa.thread().clear_exception();
        }
    });
}

// ============================================================================
// Static storage
// ============================================================================

#[test]
fn test_resolve_and_initialize() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        let counter =
            entrypoints::resolve_verify_and_clinit(soa, fx.idx.counter, main, true, true).unwrap();
        assert!(fx.runtime.linker().class(counter).is_initialized());
        let cache = fx.runtime.linker().class(main.class);
        assert_eq!(
            cache.resolution_cache().initialized_static_storage(fx.idx.counter),
            Some(counter)
        );

        entrypoints::resolve_verify_and_clinit(soa, fx.idx.counter, main, true, true).unwrap();
    });
    assert_eq!(fx.counter_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_resolve_without_running_initializer() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        let counter =
            entrypoints::resolve_verify_and_clinit(soa, fx.idx.counter, main, false, true)
                .unwrap();
        assert!(!fx.runtime.linker().class(counter).is_initialized());
        assert!(!soa.thread().is_exception_pending());
        let cache = fx.runtime.linker().class(main.class);
        assert_eq!(
            cache.resolution_cache().initialized_static_storage(fx.idx.counter),
            None
        );
    });
    assert_eq!(fx.counter_runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_initializer_referring_to_own_class() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let counter = fx.class(soa, COUNTER);
        let clinit = fx
            .runtime
            .linker()
            .class(counter)
            .class_initializer()
            .expect("Counter has a static initializer");
        let resolved =
            entrypoints::resolve_verify_and_clinit(soa, COUNTER_SELF, clinit, true, true).unwrap();
        assert_eq!(resolved, counter);
        assert!(!fx.runtime.linker().class(counter).is_initialized());
    });
    assert_eq!(fx.counter_runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_verify_access_on_hidden_class() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        let thrown = entrypoints::resolve_verify_and_clinit(soa, fx.idx.hidden, main, true, true)
            .unwrap_err();
        assert_thrown(
            &thrown,
            ExceptionKind::IllegalAccess,
            "Illegal class access: 'com.example.Main' attempting to access 'com.example.internal.Hidden'",
        );
        soa.thread().clear_exception();

        let hidden =
            entrypoints::resolve_verify_and_clinit(soa, fx.idx.hidden, main, true, false).unwrap();
        assert!(fx.runtime.linker().class(hidden).is_initialized());
    });
}

#[test]
fn test_initialize_failing_class() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let main = fx.main_run(soa);
        let thrown = entrypoints::resolve_verify_and_clinit(soa, fx.idx.broken, main, true, true)
            .unwrap_err();
        assert_eq!(*thrown.kind(), ExceptionKind::ExceptionInInitializer);
        assert_eq!(take_pending(soa), thrown);

        // Resolution itself still succeeds and stays cached.
        let broken = entrypoints::resolve_type_from_code(soa, fx.idx.broken, main).unwrap();
        assert!(fx.runtime.linker().class(broken).is_erroneous());
    });
}
