use super::checks::{check_method_access, select_target, DispatchFailure, MethodAccessViolation};
use crate::{
    types::members::InvokeType,
    utils::{MethodId, MethodIndex, ObjectRef},
    vm::{
        exceptions::{ExceptionKind, ManagedResult},
        Runtime, ScopedAccess,
    },
};
use tracing::trace;

/// Returns the method an invoke would run if the call site's method is already resolved and
/// needs no further checks.
pub fn find_method_fast(
    runtime: &Runtime,
    index: MethodIndex,
    this: Option<ObjectRef>,
    referrer: MethodId,
    access_check: bool,
    kind: InvokeType,
) -> Option<MethodId> {
    let found = find_method_fast_inner(runtime, index, this, referrer, access_check, kind);
    match found {
        Some(_) => runtime.metrics().record_method_fast_hit(),
        None => runtime.metrics().record_method_fast_miss(),
    }
    found
}

fn find_method_fast_inner(
    runtime: &Runtime,
    index: MethodIndex,
    this: Option<ObjectRef>,
    referrer: MethodId,
    access_check: bool,
    kind: InvokeType,
) -> Option<MethodId> {
    if this.is_none() && !kind.is_direct() {
        return None;
    }
    let linker = runtime.linker();
    let referring = linker.class(referrer.class);
    let resolved_id = referring.resolution_cache().resolved_method(index)?;
    let declaring = linker.class(resolved_id.class);
    let resolved = declaring.method(resolved_id.slot);
    if access_check
        && (resolved.check_incompatible_class_change(kind, &declaring)
            || check_method_access(linker, &referring, &declaring, resolved, index).is_err())
    {
        return None;
    }
    let receiver = match (kind.is_direct(), this) {
        (false, Some(object)) => Some(runtime.heap().class_of(object)?),
        _ => None,
    };
    select_target(linker, &referring, &declaring, resolved, receiver, kind).ok()
}

/// Resolves and dispatches an invoke, raising the error a failed call deserves.
pub fn find_method_from_code(
    soa: &mut ScopedAccess<'_>,
    index: MethodIndex,
    this: Option<ObjectRef>,
    referrer: MethodId,
    access_check: bool,
    kind: InvokeType,
) -> ManagedResult<MethodId> {
    let runtime = soa.runtime();
    let linker = runtime.linker();
    let resolved_id = linker.resolve_method(soa, index, referrer.class, kind)?;
    if this.is_none() && kind != InvokeType::Static {
        return Err(soa.throw_null_pointer_exception_for_method_access(resolved_id, kind));
    }

    let referring = linker.class(referrer.class);
    let declaring = linker.class(resolved_id.class);
    let resolved = declaring.method(resolved_id.slot);
    if access_check {
        if resolved.check_incompatible_class_change(kind, &declaring) {
            return Err(soa.throw_incompatible_class_change_error_method(
                kind,
                resolved.invoke_type(&declaring),
                resolved_id,
            ));
        }
        match check_method_access(linker, &referring, &declaring, resolved, index) {
            Ok(()) => {}
            Err(MethodAccessViolation::Class) => {
                return Err(soa.throw_illegal_access_error_class_for_method_dispatch(
                    &referring,
                    &declaring,
                    referrer,
                    resolved_id,
                    kind,
                ))
            }
            Err(MethodAccessViolation::Method) => {
                return Err(soa.throw_illegal_access_error_method(&referring, resolved_id))
            }
        }
    }

    let receiver = match (kind.is_direct(), this) {
        (false, Some(object)) => match runtime.heap().class_of(object) {
            Some(class) => Some(class),
            None => runtime.fatal(&format!(
                "invoke of {} on dead object {object}",
                linker.pretty_method(resolved_id)
            )),
        },
        _ => None,
    };

    match select_target(linker, &referring, &declaring, resolved, receiver, kind) {
        Ok(target) => {
            trace!(
                resolved = %linker.pretty_method(resolved_id),
                target = %linker.pretty_method(target),
                %kind,
                "dispatched method from code"
            );
            Ok(target)
        }
        Err(DispatchFailure::MissingInterface(receiver)) => Err(soa
            .throw_incompatible_class_change_error_interface(
                &linker.class(receiver),
                &declaring,
                resolved_id,
            )),
        Err(DispatchFailure::IncompatibleReceiver(receiver)) => Err(soa.throw_new(
            ExceptionKind::IncompatibleClassChange,
            format!(
                "Class '{}' is not an instance of '{}' in call to '{}'",
                linker.class(receiver).pretty_name(),
                declaring.pretty_name(),
                linker.pretty_method(resolved_id)
            ),
        )),
        Err(DispatchFailure::NoSuperMethod) => Err(soa.throw_new(
            ExceptionKind::NoSuchMethod,
            format!(
                "No super method {}{} in class {} or its super classes",
                resolved.name,
                resolved.signature,
                declaring.pretty_name()
            ),
        )),
        Err(DispatchFailure::Abstract(target)) => Err(soa.throw_abstract_method_error(target)),
        Err(DispatchFailure::NoReceiver) => {
            runtime.fatal(&format!("{kind} invoke without a receiver"))
        }
    }
}
