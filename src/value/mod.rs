//! Heap objects.
use crate::{
    types::Class,
    utils::{ClassId, ObjectRef},
};
use std::sync::Arc;

pub mod heap;
pub mod object;

pub use heap::ArenaHeap;

/// Allocation and inspection interface used by the runtime. Allocation returns `None` when
/// the heap is exhausted; callers raise `OutOfMemoryError`.
pub trait HeapOps: Send + Sync {
    fn alloc_instance(&self, class: &Class) -> Option<ObjectRef>;
    fn alloc_array(&self, class: &Class, length: usize) -> Option<ObjectRef>;
    fn alloc_string(&self, class: &Class, value: &str) -> Option<ObjectRef>;
    fn class_of(&self, object: ObjectRef) -> Option<ClassId>;
    fn array_length(&self, object: ObjectRef) -> Option<usize>;
    fn string_value(&self, object: ObjectRef) -> Option<Arc<str>>;
    fn is_live(&self, object: ObjectRef) -> bool {
        self.class_of(object).is_some()
    }
    /// Drops the handle; the storage is reclaimed by the next `collect`.
    fn release(&self, object: ObjectRef) -> bool;
    /// Returns the number of objects reclaimed.
    fn collect(&self) -> usize;
    fn live_objects(&self) -> usize;
}
