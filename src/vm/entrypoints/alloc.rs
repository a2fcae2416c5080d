use crate::{
    types::{Class, PrimitiveType},
    utils::{MethodId, ObjectRef, TypeIndex},
    vm::{
        exceptions::{ExceptionKind, ManagedResult},
        ScopedAccess,
    },
};
use std::sync::Arc;
use tracing::trace;

/// `new-instance`: resolves, checks and initializes the class, then allocates a zeroed
/// instance.
pub fn alloc_object_from_code(
    soa: &mut ScopedAccess<'_>,
    type_index: TypeIndex,
    referrer: MethodId,
    access_check: bool,
) -> ManagedResult<ObjectRef> {
    let linker = soa.runtime().linker();
    let class_id = linker.resolve_type(soa, type_index, referrer.class)?;
    let class = linker.class(class_id);
    if access_check {
        if !class.is_instantiable() {
            return Err(soa.throw_new(ExceptionKind::Instantiation, class.pretty_name()));
        }
        let referring = linker.class(referrer.class);
        if !linker.can_access(&referring, &class) {
            return Err(soa.throw_illegal_access_error_class(&referring, &class));
        }
    }
    if !class.is_initialized() && !linker.ensure_initialized(soa, class_id, true, true) {
        return Err(soa.expect_pending());
    }
    allocate_instance(soa, &class)
}

/// `new-array`. A negative length is rejected before anything is resolved.
pub fn alloc_array_from_code(
    soa: &mut ScopedAccess<'_>,
    type_index: TypeIndex,
    referrer: MethodId,
    length: i32,
    access_check: bool,
) -> ManagedResult<ObjectRef> {
    let length = checked_length(soa, length)?;
    let class = resolve_array_class(soa, type_index, referrer, access_check)?;
    allocate_array(soa, &class, length)
}

/// `filled-new-array`. Only `int` is supported among primitive component types.
pub fn check_and_alloc_array_from_code(
    soa: &mut ScopedAccess<'_>,
    type_index: TypeIndex,
    referrer: MethodId,
    length: i32,
    access_check: bool,
) -> ManagedResult<ObjectRef> {
    let length = checked_length(soa, length)?;
    let class = resolve_array_class(soa, type_index, referrer, access_check)?;
    let component = class
        .component_type()
        .and_then(|c| soa.runtime().linker().class(c).primitive_type());
    match component {
        None | Some(PrimitiveType::Int) => {}
        Some(PrimitiveType::Long) | Some(PrimitiveType::Double) => {
            return Err(soa.throw_new(
                ExceptionKind::Runtime,
                format!("Bad filled array request for type {}", class.pretty_name()),
            ));
        }
        Some(_) => {
            return Err(soa.throw_new(
                ExceptionKind::Internal,
                format!(
                    "Found type {}; filled-new-array not implemented for anything but 'int'",
                    class.pretty_name()
                ),
            ));
        }
    }
    allocate_array(soa, &class, length)
}

fn checked_length(soa: &ScopedAccess<'_>, length: i32) -> ManagedResult<usize> {
    usize::try_from(length)
        .map_err(|_| soa.throw_new(ExceptionKind::NegativeArraySize, length.to_string()))
}

fn resolve_array_class(
    soa: &mut ScopedAccess<'_>,
    type_index: TypeIndex,
    referrer: MethodId,
    access_check: bool,
) -> ManagedResult<Arc<Class>> {
    let linker = soa.runtime().linker();
    let class = linker.class(linker.resolve_type(soa, type_index, referrer.class)?);
    if !class.is_array_class() {
        soa.runtime().fatal(&format!(
            "array allocation of non-array class {}",
            class.pretty_name()
        ));
    }
    if access_check {
        let referring = linker.class(referrer.class);
        if !linker.can_access(&referring, &class) {
            return Err(soa.throw_illegal_access_error_class(&referring, &class));
        }
    }
    Ok(class)
}

fn allocate_instance(soa: &ScopedAccess<'_>, class: &Class) -> ManagedResult<ObjectRef> {
    let runtime = soa.runtime();
    match runtime.heap().alloc_instance(class) {
        Some(object) => {
            runtime.metrics().record_allocation();
            trace!(class = %class.pretty_name(), %object, "allocated instance");
            Ok(object)
        }
        None => Err(soa.throw_out_of_memory(class.instance_size())),
    }
}

fn allocate_array(soa: &ScopedAccess<'_>, class: &Class, length: usize) -> ManagedResult<ObjectRef> {
    let runtime = soa.runtime();
    match runtime.heap().alloc_array(class, length) {
        Some(array) => {
            runtime.metrics().record_allocation();
            trace!(class = %class.pretty_name(), length, %array, "allocated array");
            Ok(array)
        }
        None => Err(soa.throw_out_of_memory(length.saturating_mul(class.component_size()))),
    }
}
