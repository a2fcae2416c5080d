use crate::{
    utils::{ClassId, MethodId, ObjectRef, StringIndex, TypeIndex},
    vm::{
        exceptions::{ExceptionKind, ManagedResult, ThrowableRef},
        ScopedAccess,
    },
};
use tracing::debug;

pub fn resolve_type_from_code(
    soa: &mut ScopedAccess<'_>,
    type_index: TypeIndex,
    referrer: MethodId,
) -> ManagedResult<ClassId> {
    soa.runtime()
        .linker()
        .resolve_type(soa, type_index, referrer.class)
}

pub fn resolve_string_from_code(
    soa: &mut ScopedAccess<'_>,
    string_index: StringIndex,
    referrer: MethodId,
) -> ManagedResult<ObjectRef> {
    soa.runtime()
        .linker()
        .resolve_string(soa, string_index, referrer.class)
}

/// Resolves a type for static storage access or `const-class`, initializing it when
/// `can_run_clinit` allows. A class's own initializer referring to that class does not
/// re-enter initialization.
pub fn resolve_verify_and_clinit(
    soa: &mut ScopedAccess<'_>,
    type_index: TypeIndex,
    referrer: MethodId,
    can_run_clinit: bool,
    verify_access: bool,
) -> ManagedResult<ClassId> {
    let linker = soa.runtime().linker();
    let class_id = linker.resolve_type(soa, type_index, referrer.class)?;
    let referring = linker.class(referrer.class);
    let class = linker.class(class_id);
    if verify_access && !linker.can_access(&referring, &class) {
        return Err(soa.throw_illegal_access_error_class(&referring, &class));
    }
    if class_id == referring.id() && referring.method(referrer.slot).is_class_initializer() {
        return Ok(class_id);
    }
    if !can_run_clinit {
        return Ok(class_id);
    }
    if !linker.ensure_initialized(soa, class_id, true, true) {
        return Err(soa.expect_pending());
    }
    referring
        .resolution_cache()
        .set_initialized_static_storage(type_index, class_id);
    Ok(class_id)
}

/// Raises `StackOverflowError`. The thread may use a few extra frames until it unwinds; a
/// second overflow before then is fatal.
pub fn throw_stack_overflow_error(soa: &ScopedAccess<'_>) -> ThrowableRef {
    let thread = soa.thread();
    if thread.is_handling_stack_overflow() {
        soa.runtime().fatal("Recursive stack overflow");
    }
    thread.set_handling_stack_overflow(true);
    let depth = thread.frame_depth();
    debug!(thread = %thread.id(), depth, "stack overflow");
    soa.throw_new(
        ExceptionKind::StackOverflow,
        format!("stack size {depth} frames"),
    )
}
