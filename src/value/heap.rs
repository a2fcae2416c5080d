use crate::{
    types::Class,
    utils::{ClassId, ObjectRef},
    value::{
        object::{ArrayData, HasLayout, HeapEntry, InstanceData, StringData},
        HeapOps,
    },
};
use gc_arena::{Arena, Collect, Gc, Rootable};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::debug;

#[derive(Collect)]
#[collect(no_drop)]
struct HeapRoot<'gc> {
    handles: HashMap<u32, Gc<'gc, HeapEntry>>,
}

type HeapArena = Arena<Rootable![HeapRoot<'_>]>;

struct SendArena(HeapArena);

// SAFETY: the arena is only reachable through `ArenaHeap::arena`'s mutex, so it is never
// touched by two threads at once. No `Gc` pointer escapes a `mutate` closure; callers only
// ever see handles and owned copies of object data.
unsafe impl Send for SendArena {}

/// Heap backed by a single gc-arena. Objects are addressed through rooted handles and stay
/// alive until released; `collect` then reclaims their storage.
pub struct ArenaHeap {
    arena: Mutex<SendArena>,
    next_handle: AtomicU32,
    live: AtomicUsize,
    released_since_collect: AtomicUsize,
    capacity: Option<usize>,
}

impl ArenaHeap {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            arena: Mutex::new(SendArena(HeapArena::new(|_| HeapRoot {
                handles: HashMap::new(),
            }))),
            // Handle 0 is never issued
            next_handle: AtomicU32::new(1),
            live: AtomicUsize::new(0),
            released_since_collect: AtomicUsize::new(0),
            capacity,
        }
    }

    fn insert(&self, entry: HeapEntry) -> Option<ObjectRef> {
        let mut arena = self.arena.lock();
        if let Some(capacity) = self.capacity {
            if self.live.load(Ordering::Acquire) >= capacity {
                debug!(capacity, "heap capacity exhausted");
                return None;
            }
        }
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        if handle == ObjectRef::INVALID.as_u32() {
            return None;
        }
        arena.0.mutate_root(|mc, root| {
            root.handles.insert(handle, Gc::new(mc, entry));
        });
        self.live.fetch_add(1, Ordering::AcqRel);
        Some(ObjectRef(handle))
    }

    fn with_entry<R>(&self, object: ObjectRef, f: impl FnOnce(&HeapEntry) -> R) -> Option<R> {
        let arena = self.arena.lock();
        arena
            .0
            .mutate(|_, root| root.handles.get(&object.as_u32()).map(|entry| f(entry)))
    }
}

impl HeapOps for ArenaHeap {
    fn alloc_instance(&self, class: &Class) -> Option<ObjectRef> {
        self.insert(InstanceData::new(class.id(), class.instance_size()).into())
    }

    fn alloc_array(&self, class: &Class, length: usize) -> Option<ObjectRef> {
        let data = ArrayData::new(class.id(), length, class.component_size())?;
        self.insert(data.into())
    }

    fn alloc_string(&self, class: &Class, value: &str) -> Option<ObjectRef> {
        self.insert(StringData::new(class.id(), value).into())
    }

    fn class_of(&self, object: ObjectRef) -> Option<ClassId> {
        self.with_entry(object, |entry| entry.class())
    }

    fn array_length(&self, object: ObjectRef) -> Option<usize> {
        self.with_entry(object, |entry| match entry {
            HeapEntry::ArrayData(array) => Some(array.length()),
            _ => None,
        })
        .flatten()
    }

    fn string_value(&self, object: ObjectRef) -> Option<Arc<str>> {
        self.with_entry(object, |entry| match entry {
            HeapEntry::StringData(string) => Some(string.value().clone()),
            _ => None,
        })
        .flatten()
    }

    fn release(&self, object: ObjectRef) -> bool {
        let mut arena = self.arena.lock();
        let removed = arena
            .0
            .mutate_root(|_, root| root.handles.remove(&object.as_u32()).is_some());
        if removed {
            self.live.fetch_sub(1, Ordering::AcqRel);
            self.released_since_collect.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    fn collect(&self) -> usize {
        let mut arena = self.arena.lock();
        arena.0.collect_all();
        let freed = self.released_since_collect.swap(0, Ordering::AcqRel);
        debug!(freed, live = self.live.load(Ordering::Acquire), "heap collected");
        freed
    }

    fn live_objects(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}
