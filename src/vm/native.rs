//! The boundary between managed code and natively implemented methods.
//!
//! While a native method runs its thread is in the native state and holds no mutator access,
//! so it never delays a suspension. Objects cross the boundary as [`NativeRef`]s into the
//! thread's local reference table; the table segment is dropped when the call returns.
use crate::{
    utils::{MethodId, NativeRef, ObjectRef},
    vm::{
        exceptions::{ExceptionKind, ManagedResult},
        thread::{ManagedThread, ThreadState},
        Runtime, ScopedAccess,
    },
};
use parking_lot::RwLockReadGuard;
use std::sync::Arc;
use tracing::{trace, warn};

/// Releases the monitor a synchronized native method held, without losing the exception the
/// method may have raised.
pub fn release_implicit_monitor(soa: &mut ScopedAccess<'_>, locked: NativeRef) {
    let saved = soa.thread().clear_exception();
    let object = soa.thread().decode_local_ref(locked);
    let object = (!object.is_invalid()).then_some(object);
    if soa.monitor_exit(object).is_err() {
        if let Some(saved) = saved {
            let second = soa.expect_pending();
            soa.runtime().fatal(&format!(
                "Synchronized JNI code returning with an exception:\n{}\n\
                 Encountered second exception during implicit MonitorExit:\n{}",
                saved.dump(),
                second.dump()
            ));
        }
        return;
    }
    if let Some(saved) = saved {
        soa.throw(saved);
    }
}

/// Checks a reference returned by the native method on top of the thread's frame stack
/// against its declared return type. Aborts on a mismatch.
pub fn validate_return_value(soa: &ScopedAccess<'_>, value: Option<ObjectRef>) {
    let Some(object) = value else {
        return;
    };
    let runtime = soa.runtime();
    let linker = runtime.linker();
    let Some(method) = soa.thread().current_method() else {
        runtime.fatal("native return value checked outside of any method");
    };
    let Some(class) = runtime.heap().class_of(object) else {
        runtime.fatal(&format!(
            "native method {} returned invalid reference {object}",
            linker.pretty_method(method)
        ));
    };
    let declaring = linker.class(method.class);
    let return_type = linker.lookup_class(declaring.method(method.slot).return_descriptor());
    match return_type {
        Some(return_type) if linker.is_assignable(return_type, class) => {}
        _ => runtime.fatal(&format!(
            "attempt to return an instance of {} from {}",
            linker.class(class).pretty_name(),
            linker.pretty_method(method)
        )),
    }
}

/// What a native method body sees of the runtime.
pub struct NativeEnv<'a, 'r> {
    runtime: &'r Runtime,
    thread: &'a Arc<ManagedThread>,
    method: MethodId,
}

impl<'r> NativeEnv<'_, 'r> {
    pub fn runtime(&self) -> &'r Runtime {
        self.runtime
    }

    pub fn thread(&self) -> &Arc<ManagedThread> {
        self.thread
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Runs `f` with the thread runnable again.
    pub fn with_access<R>(&mut self, f: impl FnOnce(&mut ScopedAccess<'r>) -> R) -> R {
        let mut soa = self.runtime.scoped(self.thread);
        f(&mut soa)
    }

    pub fn throw_new(&mut self, kind: ExceptionKind, message: impl Into<String>) {
        let message = message.into();
        self.with_access(|soa| {
            soa.throw_new(kind, message);
        });
    }

    pub fn exception_check(&self) -> bool {
        self.thread.is_exception_pending()
    }

    pub fn new_local_ref(&self, object: ObjectRef) -> NativeRef {
        self.thread.add_local_ref(object)
    }

    pub fn decode(&self, reference: NativeRef) -> ObjectRef {
        self.thread.decode_local_ref(reference)
    }

    /// Allocates a new (not interned) string. Returns `None` with an exception pending on
    /// failure.
    pub fn new_string(&mut self, value: &str) -> Option<NativeRef> {
        let object = self.with_access(|soa| {
            let runtime = soa.runtime();
            let string_class = runtime.linker().class(runtime.linker().well_known().string);
            match runtime.heap().alloc_string(&string_class, value) {
                Some(string) => {
                    runtime.metrics().record_allocation();
                    Some(string)
                }
                None => {
                    soa.throw_out_of_memory(value.len());
                    None
                }
            }
        })?;
        Some(self.new_local_ref(object))
    }

    /// Finds, initializes and instantiates the class named by `descriptor`.
    pub fn alloc_object(&mut self, descriptor: &str) -> Option<NativeRef> {
        let object = self.with_access(|soa| -> ManagedResult<ObjectRef> {
            let runtime = soa.runtime();
            let linker = runtime.linker();
            let class_id = linker.find_class(soa, descriptor)?;
            let class = linker.class(class_id);
            if !class.is_instantiable() {
                return Err(soa.throw_new(ExceptionKind::Instantiation, class.pretty_name()));
            }
            if !linker.ensure_initialized(soa, class_id, true, true) {
                return Err(soa.expect_pending());
            }
            match runtime.heap().alloc_instance(&class) {
                Some(object) => {
                    runtime.metrics().record_allocation();
                    Ok(object)
                }
                None => Err(soa.throw_out_of_memory(class.instance_size())),
            }
        });
        object.ok().map(|o| self.new_local_ref(o))
    }
}

impl<'r> ScopedAccess<'r> {
    /// Calls a native method implemented by `body`. Returns the decoded reference result, or
    /// the exception left pending by the method or by the boundary itself.
    pub fn call_native<F>(
        &mut self,
        method: MethodId,
        this: Option<ObjectRef>,
        body: F,
    ) -> ManagedResult<Option<ObjectRef>>
    where
        F: FnOnce(&mut NativeEnv<'_, 'r>, Option<NativeRef>) -> Option<NativeRef>,
    {
        let runtime = self.runtime;
        let linker = runtime.linker();
        let class = linker.class(method.class);
        let description = class.method(method.slot);
        if !description.is_native() {
            warn!(method = %linker.pretty_method(method), "calling non-native method through the native boundary");
        }
        if !description.is_static() && this.is_none() {
            return Err(self.throw_null_pointer_exception_for_method_access(
                method,
                description.invoke_type(&class),
            ));
        }

        self.push_frame(method)?;
        let cookie = self.thread.push_local_segment();
        let this_ref = this.map(|o| self.thread.add_local_ref(o));

        let lock = if description.is_synchronized() {
            match self.enter_implicit_monitor(method, this) {
                Ok(lock) => Some(lock),
                Err(e) => {
                    self.thread.pop_local_segment(cookie);
                    self.pop_frame();
                    return Err(e);
                }
            }
        } else {
            None
        };

        trace!(method = %linker.pretty_method(method), "entering native method");
        let result = self.run_native(method, this_ref, body);

        if let Some(lock) = lock {
            release_implicit_monitor(self, lock);
        }
        let value = result.map(|r| self.thread.decode_local_ref(r));
        if runtime.config().check_jni && !self.thread.is_exception_pending() {
            validate_return_value(self, value);
        }
        self.thread.pop_local_segment(cookie);
        self.pop_frame();
        self.check_suspend();

        match self.thread.exception() {
            Some(pending) => Err(pending),
            None => Ok(value),
        }
    }

    fn enter_implicit_monitor(
        &mut self,
        method: MethodId,
        this: Option<ObjectRef>,
    ) -> ManagedResult<NativeRef> {
        let target = match this {
            Some(object) => object,
            None => self.runtime.linker().class_mirror(self, method.class)?,
        };
        self.monitor_enter(Some(target))?;
        Ok(self.thread.add_local_ref(target))
    }

    fn run_native<F>(&mut self, method: MethodId, this_ref: Option<NativeRef>, body: F) -> Option<NativeRef>
    where
        F: FnOnce(&mut NativeEnv<'_, 'r>, Option<NativeRef>) -> Option<NativeRef>,
    {
        let runtime = self.runtime;
        let thread = self.thread.clone();
        runtime
            .threads()
            .transition_from_runnable(&thread, ThreadState::Native);
        let result = RwLockReadGuard::unlocked(&mut self.shared, || {
            let mut env = NativeEnv {
                runtime,
                thread: &thread,
                method,
            };
            body(&mut env, this_ref)
        });
        while !runtime.threads().try_transition_to_runnable(&thread) {
            RwLockReadGuard::unlocked(&mut self.shared, || thread.wait_while_suspended());
        }
        result
    }
}
