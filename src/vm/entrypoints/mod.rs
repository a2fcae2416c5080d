//! Runtime support routines called from compiled and interpreted method bodies.
//!
//! Every slow-path routine takes the calling thread's [`ScopedAccess`](crate::vm::ScopedAccess)
//! and the referring method, and on failure returns the exception it left pending. Fast paths
//! take only the [`Runtime`](crate::vm::Runtime): they never load classes, allocate or throw,
//! and return `None` whenever the caller has to fall back to the slow path.
mod alloc;
mod checks;
mod fields;
mod invoke;
mod types;

pub use alloc::{alloc_array_from_code, alloc_object_from_code, check_and_alloc_array_from_code};
pub use fields::{find_field_fast, find_field_from_code};
pub use invoke::{find_method_fast, find_method_from_code};
pub use types::{
    resolve_string_from_code, resolve_type_from_code, resolve_verify_and_clinit,
    throw_stack_overflow_error,
};
