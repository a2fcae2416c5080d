use super::checks::{check_field_access, field_type_matches, FieldAccessViolation};
use crate::{
    types::members::FieldAccessKind,
    utils::{FieldId, FieldIndex, MethodId},
    vm::{
        exceptions::{ExceptionKind, ManagedResult},
        Runtime, ScopedAccess,
    },
};
use tracing::trace;

/// Returns the cached field if it can be used for `kind` without any further checks.
pub fn find_field_fast(
    runtime: &Runtime,
    index: FieldIndex,
    referrer: MethodId,
    kind: FieldAccessKind,
    expected_size: usize,
) -> Option<FieldId> {
    let linker = runtime.linker();
    let referring = linker.class(referrer.class);
    let found = referring
        .resolution_cache()
        .resolved_field(index)
        .filter(|field_id| {
            let declaring = linker.class(field_id.class);
            if !declaring.is_initializing() {
                return false;
            }
            let field = declaring.field(field_id.slot);
            field.is_static() == kind.is_static()
                && check_field_access(linker, &referring, &declaring, field, kind.is_write())
                    .is_ok()
                && field_type_matches(field, kind, expected_size)
        });
    match found {
        Some(_) => runtime.metrics().record_field_fast_hit(),
        None => runtime.metrics().record_field_fast_miss(),
    }
    found
}

/// Resolves a field reference for `kind`, raising the error the access deserves. Static
/// fields have their declaring class initialized.
pub fn find_field_from_code(
    soa: &mut ScopedAccess<'_>,
    index: FieldIndex,
    referrer: MethodId,
    kind: FieldAccessKind,
    expected_size: usize,
) -> ManagedResult<FieldId> {
    let linker = soa.runtime().linker();
    let field_id = linker.resolve_field(soa, index, referrer.class)?;
    let declaring = linker.class(field_id.class);
    let field = declaring.field(field_id.slot);
    if field.is_static() != kind.is_static() {
        return Err(soa.throw_incompatible_class_change_error_field(field_id, kind.is_static()));
    }

    let referring = linker.class(referrer.class);
    match check_field_access(linker, &referring, &declaring, field, kind.is_write()) {
        Ok(()) => {}
        Err(FieldAccessViolation::Class) => {
            return Err(soa.throw_illegal_access_error_class(&referring, &declaring))
        }
        Err(FieldAccessViolation::Field) => {
            return Err(soa.throw_illegal_access_error_field(&referring, field_id))
        }
        Err(FieldAccessViolation::FinalField) => {
            return Err(soa.throw_illegal_access_error_final_field(referrer, field_id))
        }
    }

    if !field_type_matches(field, kind, expected_size) {
        return Err(soa.throw_new(
            ExceptionKind::NoSuchField,
            format!(
                "Attempted {} of {}-bit {} on field '{}'",
                if kind.is_write() { "write" } else { "read" },
                expected_size * 8,
                if kind.is_primitive() {
                    "primitive"
                } else {
                    "non-primitive"
                },
                linker.pretty_field(field_id)
            ),
        ));
    }

    if kind.is_static()
        && !declaring.is_initializing()
        && !linker.ensure_initialized(soa, declaring.id(), true, true)
    {
        return Err(soa.expect_pending());
    }
    trace!(field = %linker.pretty_field(field_id), ?kind, "resolved field from code");
    Ok(field_id)
}
