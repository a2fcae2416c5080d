//! Loaded type descriptors.
//!
//! A [`Class`] is created by the class linker on first reference and lives in the
//! linker's registry for the rest of the runtime's life. Everything that points at a
//! class (objects, fields, methods, dispatch tables) does so through a [`ClassId`]
//! handle, never through an owning reference.
use crate::{
    resolve::{cache::ResolutionCache, init::InitStatus},
    types::{
        definition::{ClassInitializer, ConstantPool},
        members::{FieldDescription, MethodDescription},
    },
    utils::{pretty_descriptor, ClassId, MethodId, ObjectRef},
};
use std::{
    fmt::{self, Debug, Formatter},
    ops::BitOr,
    sync::{Arc, OnceLock},
};

pub mod definition;
pub mod members;

/// Access and property flags for classes, fields and methods. Values follow the dex format.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags(pub u32);

impl AccessFlags {
    pub const PUBLIC: Self = AccessFlags(0x0001);
    pub const PRIVATE: Self = AccessFlags(0x0002);
    pub const PROTECTED: Self = AccessFlags(0x0004);
    pub const STATIC: Self = AccessFlags(0x0008);
    pub const FINAL: Self = AccessFlags(0x0010);
    pub const SYNCHRONIZED: Self = AccessFlags(0x0020);
    pub const VOLATILE: Self = AccessFlags(0x0040);
    pub const NATIVE: Self = AccessFlags(0x0100);
    pub const INTERFACE: Self = AccessFlags(0x0200);
    pub const ABSTRACT: Self = AccessFlags(0x0400);
    pub const CONSTRUCTOR: Self = AccessFlags(0x1_0000);

    pub const fn empty() -> Self {
        AccessFlags(0)
    }

    pub const fn union(self, other: Self) -> Self {
        AccessFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: Self) -> Self {
        AccessFlags(self.0 & !other.0)
    }

    pub fn is_public(self) -> bool {
        self.contains(Self::PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    pub fn is_protected(self) -> bool {
        self.contains(Self::PROTECTED)
    }

    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }
}

impl BitOr for AccessFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl Debug for AccessFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        const NAMES: [(AccessFlags, &str); 11] = [
            (AccessFlags::PUBLIC, "public"),
            (AccessFlags::PRIVATE, "private"),
            (AccessFlags::PROTECTED, "protected"),
            (AccessFlags::STATIC, "static"),
            (AccessFlags::FINAL, "final"),
            (AccessFlags::SYNCHRONIZED, "synchronized"),
            (AccessFlags::VOLATILE, "volatile"),
            (AccessFlags::NATIVE, "native"),
            (AccessFlags::INTERFACE, "interface"),
            (AccessFlags::ABSTRACT, "abstract"),
            (AccessFlags::CONSTRUCTOR, "constructor"),
        ];
        let names: Vec<_> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "[{}]", names.join(" "))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl PrimitiveType {
    pub const ALL: [PrimitiveType; 9] = [
        PrimitiveType::Boolean,
        PrimitiveType::Byte,
        PrimitiveType::Char,
        PrimitiveType::Short,
        PrimitiveType::Int,
        PrimitiveType::Long,
        PrimitiveType::Float,
        PrimitiveType::Double,
        PrimitiveType::Void,
    ];

    pub fn from_descriptor(descriptor: &str) -> Option<Self> {
        use PrimitiveType::*;
        Some(match descriptor {
            "Z" => Boolean,
            "B" => Byte,
            "C" => Char,
            "S" => Short,
            "I" => Int,
            "J" => Long,
            "F" => Float,
            "D" => Double,
            "V" => Void,
            _ => return None,
        })
    }

    pub fn descriptor(self) -> &'static str {
        use PrimitiveType::*;
        match self {
            Boolean => "Z",
            Byte => "B",
            Char => "C",
            Short => "S",
            Int => "I",
            Long => "J",
            Float => "F",
            Double => "D",
            Void => "V",
        }
    }

    /// Storage size in bytes.
    pub fn size(self) -> usize {
        use PrimitiveType::*;
        match self {
            Boolean | Byte => 1,
            Char | Short => 2,
            Int | Float => 4,
            Long | Double => 8,
            Void => 0,
        }
    }
}

/// Class initialization status. Progresses monotonically from `Uninitialized` through
/// `Initializing` to either `Initialized` or `Erroneous`.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClassStatus {
    Uninitialized = 0,
    Initializing = 1,
    Initialized = 2,
    Erroneous = 3,
}

impl ClassStatus {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ClassStatus::Uninitialized,
            1 => ClassStatus::Initializing,
            2 => ClassStatus::Initialized,
            _ => ClassStatus::Erroneous,
        }
    }
}

/// One interface implemented by a class, with the implementation chosen for each of the
/// interface's methods (indexed by the interface method's slot).
#[derive(Clone, Debug)]
pub struct InterfaceEntry {
    pub interface: ClassId,
    pub methods: Vec<MethodId>,
}

pub struct Class {
    pub(crate) id: ClassId,
    pub(crate) descriptor: Arc<str>,
    pub(crate) access_flags: AccessFlags,
    pub(crate) super_class: Option<ClassId>,
    pub(crate) interfaces: Vec<ClassId>,
    pub(crate) component_type: Option<ClassId>,
    pub(crate) primitive: Option<PrimitiveType>,
    pub(crate) fields: Vec<FieldDescription>,
    pub(crate) methods: Vec<MethodDescription>,
    pub(crate) vtable: Vec<MethodId>,
    pub(crate) iftable: Vec<InterfaceEntry>,
    pub(crate) instance_size: usize,
    pub(crate) static_size: usize,
    pub(crate) component_size: usize,
    pub(crate) pool: ConstantPool,
    pub(crate) cache: ResolutionCache,
    pub(crate) init: InitStatus,
    pub(crate) initializer: Option<ClassInitializer>,
    pub(crate) mirror: OnceLock<ObjectRef>,
}

impl Class {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn pretty_name(&self) -> String {
        pretty_descriptor(&self.descriptor)
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn super_class(&self) -> Option<ClassId> {
        self.super_class
    }

    /// Directly implemented interfaces (or superinterfaces, for an interface).
    pub fn interfaces(&self) -> &[ClassId] {
        &self.interfaces
    }

    pub fn component_type(&self) -> Option<ClassId> {
        self.component_type
    }

    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        self.primitive
    }

    pub fn is_primitive(&self) -> bool {
        self.primitive.is_some()
    }

    pub fn is_array_class(&self) -> bool {
        self.component_type.is_some()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(AccessFlags::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(AccessFlags::ABSTRACT)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.is_final()
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.is_public()
    }

    pub fn is_object_class(&self) -> bool {
        self.super_class.is_none() && !self.is_primitive() && !self.is_interface()
    }

    /// Whether instances can be created. Array classes are abstract but still instantiable.
    pub fn is_instantiable(&self) -> bool {
        (!self.is_primitive() && !self.is_interface() && !self.is_abstract())
            || (self.is_abstract() && self.is_array_class())
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    pub fn field(&self, slot: u16) -> &FieldDescription {
        &self.fields[slot as usize]
    }

    pub fn methods(&self) -> &[MethodDescription] {
        &self.methods
    }

    pub fn method(&self, slot: u16) -> &MethodDescription {
        &self.methods[slot as usize]
    }

    pub fn vtable(&self) -> &[MethodId] {
        &self.vtable
    }

    pub fn iftable(&self) -> &[InterfaceEntry] {
        &self.iftable
    }

    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    pub fn static_size(&self) -> usize {
        self.static_size
    }

    /// Element storage size for array classes, 0 otherwise.
    pub fn component_size(&self) -> usize {
        self.component_size
    }

    pub fn constant_pool(&self) -> &ConstantPool {
        &self.pool
    }

    pub fn resolution_cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn status(&self) -> ClassStatus {
        self.init.status()
    }

    pub fn is_initialized(&self) -> bool {
        self.status() == ClassStatus::Initialized
    }

    /// True once initialization has at least started (and has not failed).
    pub fn is_initializing(&self) -> bool {
        matches!(
            self.status(),
            ClassStatus::Initializing | ClassStatus::Initialized
        )
    }

    pub fn is_erroneous(&self) -> bool {
        self.status() == ClassStatus::Erroneous
    }

    pub fn initializer(&self) -> Option<&ClassInitializer> {
        self.initializer.as_ref()
    }

    /// The `<clinit>` method, present when the class has an initializer.
    pub fn class_initializer(&self) -> Option<MethodId> {
        self.methods
            .iter()
            .find(|m| m.is_class_initializer())
            .map(|m| m.id)
    }

    pub fn find_declared_field(&self, name: &str, type_descriptor: &str) -> Option<&FieldDescription> {
        self.fields
            .iter()
            .find(|f| &*f.name == name && &*f.type_descriptor == type_descriptor)
    }

    pub fn find_declared_method(&self, name: &str, signature: &str) -> Option<&MethodDescription> {
        self.methods
            .iter()
            .find(|m| &*m.name == name && &*m.signature == signature)
    }

    /// Selects the implementation of an interface method for this class.
    pub fn find_virtual_method_for_interface(
        &self,
        interface_method: &MethodDescription,
    ) -> Option<MethodId> {
        let interface = interface_method.declaring_class();
        self.iftable
            .iter()
            .find(|entry| entry.interface == interface)
            .and_then(|entry| entry.methods.get(interface_method.id.slot as usize))
            .copied()
    }
}

impl Debug for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} ({}, {:?})",
            self.access_flags,
            self.pretty_name(),
            self.id,
            self.status()
        )
    }
}
