use crate::utils::ClassId;
use enum_dispatch::enum_dispatch;
use gc_arena::Collect;
use std::sync::Arc;

#[enum_dispatch]
pub trait HasLayout {
    /// Bytes of payload this object occupies.
    fn size(&self) -> usize;
    fn class(&self) -> ClassId;
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceData {
    class: ClassId,
    fields: Vec<u8>,
}

impl InstanceData {
    pub fn new(class: ClassId, instance_size: usize) -> Self {
        Self {
            class,
            fields: vec![0; instance_size],
        }
    }
}

impl HasLayout for InstanceData {
    fn size(&self) -> usize {
        self.fields.len()
    }

    fn class(&self) -> ClassId {
        self.class
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArrayData {
    class: ClassId,
    length: usize,
    elements: Vec<u8>,
}

impl ArrayData {
    /// Returns `None` if the backing storage cannot be allocated.
    pub fn new(class: ClassId, length: usize, element_size: usize) -> Option<Self> {
        let bytes = length.checked_mul(element_size)?;
        let mut elements = Vec::new();
        elements.try_reserve_exact(bytes).ok()?;
        elements.resize(bytes, 0);
        Some(Self {
            class,
            length,
            elements,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl HasLayout for ArrayData {
    fn size(&self) -> usize {
        self.elements.len()
    }

    fn class(&self) -> ClassId {
        self.class
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StringData {
    class: ClassId,
    value: Arc<str>,
}

impl StringData {
    pub fn new(class: ClassId, value: &str) -> Self {
        Self {
            class,
            value: value.into(),
        }
    }

    pub fn value(&self) -> &Arc<str> {
        &self.value
    }
}

impl HasLayout for StringData {
    fn size(&self) -> usize {
        self.value.len()
    }

    fn class(&self) -> ClassId {
        self.class
    }
}

#[enum_dispatch(HasLayout)]
#[derive(Clone, Debug, PartialEq, Collect)]
#[collect(require_static)]
pub enum HeapEntry {
    InstanceData,
    ArrayData,
    StringData,
}

impl HeapEntry {
    pub fn type_tag(&self) -> &'static str {
        match self {
            HeapEntry::InstanceData(_) => "instance",
            HeapEntry::ArrayData(_) => "array",
            HeapEntry::StringData(_) => "string",
        }
    }
}
