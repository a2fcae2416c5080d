use std::fmt::{self, Display, Formatter};

/// Index of a loaded class in the linker's registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Display for ClassId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// A field, addressed by its declaring class and its position in that class's field list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldId {
    pub class: ClassId,
    pub slot: u16,
}

impl FieldId {
    pub fn new(class: ClassId, slot: u16) -> Self {
        Self { class, slot }
    }
}

/// A method, addressed by its declaring class and its position in that class's method list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodId {
    pub class: ClassId,
    pub slot: u16,
}

impl MethodId {
    pub fn new(class: ClassId, slot: u16) -> Self {
        Self { class, slot }
    }
}

/// A rooted handle to a heap object. Handle 0 is never issued.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(pub u32);

impl ObjectRef {
    /// Produced when decoding a native reference that does not name a live local slot.
    pub const INVALID: Self = ObjectRef(u32::MAX);

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn is_invalid(self) -> bool {
        self == Self::INVALID
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "obj#<invalid>")
        } else {
            write!(f, "obj#{}", self.0)
        }
    }
}

/// A handle into a thread's local reference table, as seen by native code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NativeRef(pub u32);

/// Managed thread identifier. 0 is reserved to mean "no thread".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId {
    pub const INVALID: Self = ThreadId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

macro_rules! pool_index {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                pub fn as_usize(self) -> usize {
                    self.0 as usize
                }
            }

            impl Display for $name {
                fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

pool_index!(
    /// Index into a class's string pool.
    StringIndex,
    /// Index into a class's type pool.
    TypeIndex,
    /// Index into a class's field-reference pool.
    FieldIndex,
    /// Index into a class's method-reference pool.
    MethodIndex,
);
