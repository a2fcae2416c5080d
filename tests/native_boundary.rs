mod common;

use common::*;
use dex_runtime::{
    utils::MethodId,
    vm::{
        exceptions::ExceptionKind,
        native::{release_implicit_monitor, validate_return_value},
        thread::ThreadState,
        ScopedAccess,
    },
};

fn natives(fx: &Fixture, soa: &ScopedAccess<'_>, slot: u16) -> MethodId {
    MethodId::new(fx.class(soa, NATIVES), slot)
}

// ============================================================================
// Calls
// ============================================================================

#[test]
fn test_static_native_returns_string() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let name = natives(&fx, soa, slots::NATIVES_NAME);
        let result = soa
            .call_native(name, None, |env, this| {
                assert!(this.is_none());
                assert_eq!(env.method(), name);
                assert_eq!(env.thread().state(), ThreadState::Native);
                assert_eq!(env.thread().current_method(), Some(name));
                env.new_string("Natives")
            })
            .unwrap()
            .expect("a string was returned");

        assert_eq!(
            fx.runtime.heap().string_value(result).as_deref(),
            Some("Natives")
        );
        assert_eq!(soa.thread().state(), ThreadState::Runnable);
        assert_eq!(soa.thread().frame_depth(), 0);
        assert_eq!(soa.thread().local_ref_count(), 0);
    });
}

#[test]
fn test_native_body_regains_access() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let name = natives(&fx, soa, slots::NATIVES_NAME);
        let interned = fx.runtime.linker().intern(soa, "shared").unwrap();
        let result = soa
            .call_native(name, None, |env, _| {
                let object = env.with_access(|soa| {
                    assert_eq!(soa.thread().state(), ThreadState::Runnable);
                    soa.runtime().linker().intern(soa, "shared").unwrap()
                });
                assert_eq!(env.thread().state(), ThreadState::Native);
                Some(env.new_local_ref(object))
            })
            .unwrap();
        assert_eq!(result, Some(interned));
    });
}

#[test]
fn test_native_allocates_and_initializes() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let as_point = natives(&fx, soa, slots::NATIVES_AS_POINT);
        let point = soa
            .call_native(as_point, None, |env, _| env.alloc_object(POINT))
            .unwrap()
            .unwrap();
        let point_class = fx.class(soa, POINT);
        assert_eq!(fx.runtime.heap().class_of(point), Some(point_class));
        assert!(fx.runtime.linker().class(point_class).is_initialized());
    });
}

#[test]
fn test_native_exception_is_returned() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let as_point = natives(&fx, soa, slots::NATIVES_AS_POINT);
        let thrown = soa
            .call_native(as_point, None, |env, _| {
                let shape = env.alloc_object(SHAPE);
                assert!(shape.is_none());
                assert!(env.exception_check());
                shape
            })
            .unwrap_err();
        assert_thrown(&thrown, ExceptionKind::Instantiation, "com.example.Shape");
        assert_eq!(take_pending(soa), thrown);
    });
}

#[test]
fn test_instance_native_without_receiver() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let locked = natives(&fx, soa, slots::NATIVES_LOCKED);
        let thrown = soa
            .call_native(locked, None, |_, _| panic!("body must not run"))
            .unwrap_err();
        assert_thrown(
            &thrown,
            ExceptionKind::NullPointer,
            "Attempt to invoke virtual method 'void com.example.Natives.locked()' on a null object reference",
        );
        assert_eq!(soa.thread().frame_depth(), 0);
    });
}

// ============================================================================
// Synchronized methods
// ============================================================================

#[test]
fn test_synchronized_instance_method_holds_receiver_monitor() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let locked = natives(&fx, soa, slots::NATIVES_LOCKED);
        let receiver = {
            let class = fx.runtime.linker().class(locked.class);
            fx.runtime.heap().alloc_instance(&class).unwrap()
        };
        let me = soa.thread().id();

        soa.call_native(locked, Some(receiver), |env, this| {
            assert_eq!(env.decode(this.unwrap()), receiver);
            assert_eq!(env.runtime().monitors().owner(receiver), Some(me));
            None
        })
        .unwrap();
        assert_eq!(fx.runtime.monitors().owner(receiver), None);
    });
}

#[test]
fn test_synchronized_static_method_locks_class_mirror() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let static_locked = natives(&fx, soa, slots::NATIVES_STATIC_LOCKED);
        let mirror = fx.runtime.linker().class_mirror(soa, static_locked.class).unwrap();
        let me = soa.thread().id();

        let thrown = soa
            .call_native(static_locked, None, |env, _| {
                assert_eq!(env.runtime().monitors().owner(mirror), Some(me));
                env.throw_new(ExceptionKind::IllegalArgument, "rejected");
                None
            })
            .unwrap_err();
        assert_thrown(&thrown, ExceptionKind::IllegalArgument, "rejected");
        assert_eq!(fx.runtime.monitors().owner(mirror), None);
    });
}

#[test]
fn test_release_keeps_pending_exception() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let object = fx.runtime.linker().intern(soa, "lock").unwrap();
        soa.monitor_enter(Some(object)).unwrap();
        let reference = soa.thread().add_local_ref(object);
        let thrown = soa.throw_new(ExceptionKind::Runtime, "from native");

        release_implicit_monitor(soa, reference);
        assert_eq!(fx.runtime.monitors().owner(object), None);
        assert_eq!(soa.thread().exception(), Some(thrown));
    });
}

#[test]
fn test_release_of_unowned_monitor() {
    let fx = Fixture::new();
    fx.with_thread("main", |soa| {
        let object = fx.runtime.linker().intern(soa, "never locked").unwrap();
        let reference = soa.thread().add_local_ref(object);

        release_implicit_monitor(soa, reference);
        let pending = take_pending(soa);
        assert_thrown(
            &pending,
            ExceptionKind::IllegalMonitorState,
            "did not lock monitor on object of type 'java.lang.String' before unlocking",
        );
    });
}

#[test]
#[should_panic(expected = "Encountered second exception during implicit MonitorExit")]
fn test_release_failure_with_pending_exception_aborts() {
    let fx = Fixture::aborting();
    fx.with_thread("main", |soa| {
        let object = fx.runtime.linker().intern(soa, "never locked").unwrap();
        let reference = soa.thread().add_local_ref(object);
        soa.throw_new(ExceptionKind::Runtime, "first");
        release_implicit_monitor(soa, reference);
    });
}

// ============================================================================
// Return value checks
// ============================================================================

#[test]
#[should_panic(
    expected = "attempt to return an instance of java.lang.String from com.example.Point com.example.Natives.asPoint()"
)]
fn test_mistyped_return_value_aborts() {
    let fx = Fixture::aborting();
    fx.with_thread("main", |soa| {
        fx.class(soa, POINT);
        let as_point = natives(&fx, soa, slots::NATIVES_AS_POINT);
        let _ = soa.call_native(as_point, None, |env, _| env.new_string("not a point"));
    });
}

#[test]
#[should_panic(expected = "returned invalid reference")]
fn test_dead_return_value_aborts() {
    let fx = Fixture::aborting();
    fx.with_thread("main", |soa| {
        let name = natives(&fx, soa, slots::NATIVES_NAME);
        let _ = soa.call_native(name, None, |env, _| {
            let string = env.new_string("gone")?;
            env.runtime().heap().release(env.decode(string));
            Some(string)
        });
    });
}

#[test]
fn test_return_values_unchecked_when_disabled() {
    let fx = Fixture::with_config(aborting_config().with_check_jni(false));
    fx.with_thread("main", |soa| {
        fx.class(soa, POINT);
        let as_point = natives(&fx, soa, slots::NATIVES_AS_POINT);
        let result = soa
            .call_native(as_point, None, |env, _| env.new_string("not a point"))
            .unwrap()
            .unwrap();
        assert_eq!(
            fx.runtime.heap().string_value(result).as_deref(),
            Some("not a point")
        );
    });
}

#[test]
fn test_validate_accepts_subclass_and_null() {
    let fx = Fixture::aborting();
    fx.with_thread("main", |soa| {
        let as_point = natives(&fx, soa, slots::NATIVES_AS_POINT);
        let point3d = {
            let class = fx.runtime.linker().class(fx.class(soa, POINT3D));
            fx.runtime.heap().alloc_instance(&class).unwrap()
        };
        soa.push_frame(as_point).unwrap();
        validate_return_value(soa, Some(point3d));
        validate_return_value(soa, None);
        soa.pop_frame();
    });
}
