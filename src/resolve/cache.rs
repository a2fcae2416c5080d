//! Per-class resolution caches.
//!
//! Each slot is a single atomic word: 0 means "not yet resolved", anything else is the packed
//! entry plus one. Fast paths read these without taking any lock; a reader observes either an
//! empty slot or a fully published entry.
use crate::{
    types::definition::ConstantPool,
    utils::{ClassId, FieldId, FieldIndex, MethodId, MethodIndex, ObjectRef, StringIndex, TypeIndex},
};
use std::{
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
};

pub trait CacheEntry: Copy {
    fn pack(self) -> u64;
    fn unpack(raw: u64) -> Self;
}

impl CacheEntry for ClassId {
    fn pack(self) -> u64 {
        self.0 as u64
    }

    fn unpack(raw: u64) -> Self {
        ClassId(raw as u32)
    }
}

impl CacheEntry for ObjectRef {
    fn pack(self) -> u64 {
        self.0 as u64
    }

    fn unpack(raw: u64) -> Self {
        ObjectRef(raw as u32)
    }
}

impl CacheEntry for FieldId {
    fn pack(self) -> u64 {
        ((self.class.0 as u64) << 16) | self.slot as u64
    }

    fn unpack(raw: u64) -> Self {
        FieldId::new(ClassId((raw >> 16) as u32), raw as u16)
    }
}

impl CacheEntry for MethodId {
    fn pack(self) -> u64 {
        ((self.class.0 as u64) << 16) | self.slot as u64
    }

    fn unpack(raw: u64) -> Self {
        MethodId::new(ClassId((raw >> 16) as u32), raw as u16)
    }
}

pub struct CacheSlots<T> {
    slots: Box<[AtomicU64]>,
    _entry: PhantomData<fn() -> T>,
}

impl<T: CacheEntry> CacheSlots<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| AtomicU64::new(0)).collect(),
            _entry: PhantomData,
        }
    }

    pub fn get(&self, index: usize) -> Option<T> {
        match self.slots.get(index)?.load(Ordering::Acquire) {
            0 => None,
            raw => Some(T::unpack(raw - 1)),
        }
    }

    /// Publishes an entry. Out-of-range indices are ignored.
    pub fn set(&self, index: usize, value: T) {
        if let Some(slot) = self.slots.get(index) {
            slot.store(value.pack() + 1, Ordering::Release);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn resolved_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.load(Ordering::Relaxed) != 0)
            .count()
    }
}

pub struct ResolutionCache {
    strings: CacheSlots<ObjectRef>,
    types: CacheSlots<ClassId>,
    fields: CacheSlots<FieldId>,
    methods: CacheSlots<MethodId>,
    initialized_storage: CacheSlots<ClassId>,
}

impl ResolutionCache {
    pub fn for_pool(pool: &ConstantPool) -> Self {
        Self {
            strings: CacheSlots::new(pool.string_count()),
            types: CacheSlots::new(pool.type_count()),
            fields: CacheSlots::new(pool.field_count()),
            methods: CacheSlots::new(pool.method_count()),
            initialized_storage: CacheSlots::new(pool.type_count()),
        }
    }

    pub fn resolved_string(&self, index: StringIndex) -> Option<ObjectRef> {
        self.strings.get(index.as_usize())
    }

    pub fn set_resolved_string(&self, index: StringIndex, string: ObjectRef) {
        self.strings.set(index.as_usize(), string)
    }

    pub fn resolved_type(&self, index: TypeIndex) -> Option<ClassId> {
        self.types.get(index.as_usize())
    }

    pub fn set_resolved_type(&self, index: TypeIndex, class: ClassId) {
        self.types.set(index.as_usize(), class)
    }

    pub fn resolved_field(&self, index: FieldIndex) -> Option<FieldId> {
        self.fields.get(index.as_usize())
    }

    pub fn set_resolved_field(&self, index: FieldIndex, field: FieldId) {
        self.fields.set(index.as_usize(), field)
    }

    pub fn resolved_method(&self, index: MethodIndex) -> Option<MethodId> {
        self.methods.get(index.as_usize())
    }

    pub fn set_resolved_method(&self, index: MethodIndex, method: MethodId) {
        self.methods.set(index.as_usize(), method)
    }

    /// Classes known to be initialized, recorded by type index so compiled code can skip
    /// the initialization check on later static accesses.
    pub fn initialized_static_storage(&self, index: TypeIndex) -> Option<ClassId> {
        self.initialized_storage.get(index.as_usize())
    }

    pub fn set_initialized_static_storage(&self, index: TypeIndex, class: ClassId) {
        self.initialized_storage.set(index.as_usize(), class)
    }
}
