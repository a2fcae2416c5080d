//! Predicates shared by the fast and slow paths, so a fast-path hit always agrees with what
//! the slow path would have decided.
use crate::{
    resolve::ClassLinker,
    types::{
        members::{FieldAccessKind, FieldDescription, InvokeType, MethodDescription},
        Class,
    },
    utils::{ClassId, MethodId, MethodIndex},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FieldAccessViolation {
    Class,
    Field,
    FinalField,
}

pub(super) fn check_field_access(
    linker: &ClassLinker,
    referring: &Class,
    declaring: &Class,
    field: &FieldDescription,
    is_write: bool,
) -> Result<(), FieldAccessViolation> {
    if !linker.can_access(referring, declaring) {
        return Err(FieldAccessViolation::Class);
    }
    if !linker.can_access_member(referring, declaring, field.access_flags) {
        return Err(FieldAccessViolation::Field);
    }
    if is_write && field.is_final() && referring.id() != declaring.id() {
        return Err(FieldAccessViolation::FinalField);
    }
    Ok(())
}

pub(super) fn field_type_matches(
    field: &FieldDescription,
    kind: FieldAccessKind,
    expected_size: usize,
) -> bool {
    field.is_primitive_type() == kind.is_primitive() && field.size() == expected_size
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MethodAccessViolation {
    Class,
    Method,
}

/// Access check for a resolved method. When the declaring class is inaccessible, the class
/// named by the call site may still grant access (a public subclass inheriting the method).
pub(super) fn check_method_access(
    linker: &ClassLinker,
    referring: &Class,
    declaring: &Class,
    method: &MethodDescription,
    index: MethodIndex,
) -> Result<(), MethodAccessViolation> {
    if !linker.can_access(referring, declaring) {
        let named = referring
            .constant_pool()
            .method_ref(index)
            .and_then(|r| referring.resolution_cache().resolved_type(r.class));
        match named {
            Some(class) if linker.can_access(referring, &linker.class(class)) => {}
            _ => return Err(MethodAccessViolation::Class),
        }
    }
    if !linker.can_access_member(referring, declaring, method.access_flags) {
        return Err(MethodAccessViolation::Method);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DispatchFailure {
    NoReceiver,
    /// The receiver does not implement the interface.
    MissingInterface(ClassId),
    /// The receiver is not an instance of the declaring class.
    IncompatibleReceiver(ClassId),
    /// The super slot is past the end of the superclass vtable.
    NoSuperMethod,
    Abstract(MethodId),
}

/// Picks the implementation an invoke of `resolved` with `kind` runs.
pub(super) fn select_target(
    linker: &ClassLinker,
    referring: &Class,
    declaring: &Class,
    resolved: &MethodDescription,
    receiver: Option<ClassId>,
    kind: InvokeType,
) -> Result<MethodId, DispatchFailure> {
    let target = match kind {
        InvokeType::Static | InvokeType::Direct => resolved.id,
        InvokeType::Super => {
            let vtable_owner = referring
                .super_class()
                .ok_or(DispatchFailure::NoSuperMethod)?;
            *linker
                .class(vtable_owner)
                .vtable()
                .get(resolved.method_index as usize)
                .ok_or(DispatchFailure::NoSuperMethod)?
        }
        InvokeType::Virtual | InvokeType::Interface => {
            let receiver = receiver.ok_or(DispatchFailure::NoReceiver)?;
            let receiver_class = linker.class(receiver);
            if declaring.is_interface() {
                receiver_class
                    .find_virtual_method_for_interface(resolved)
                    .ok_or(DispatchFailure::MissingInterface(receiver))?
            } else if linker.is_assignable(declaring.id(), receiver) {
                *receiver_class
                    .vtable()
                    .get(resolved.method_index as usize)
                    .ok_or(DispatchFailure::IncompatibleReceiver(receiver))?
            } else {
                return Err(DispatchFailure::IncompatibleReceiver(receiver));
            }
        }
    };
    if linker.class(target.class).method(target.slot).is_abstract() {
        return Err(DispatchFailure::Abstract(target));
    }
    Ok(target)
}
