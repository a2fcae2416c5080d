use crate::{
    types::{AccessFlags, Class, PrimitiveType},
    utils::{return_descriptor, ClassId, FieldId, MethodId, REFERENCE_SIZE},
};
use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::Arc,
};

#[derive(Clone)]
pub struct FieldDescription {
    pub id: FieldId,
    pub name: Arc<str>,
    pub type_descriptor: Arc<str>,
    pub access_flags: AccessFlags,
    /// Byte offset within the instance (or within static storage, for static fields).
    pub offset: usize,
}

impl FieldDescription {
    pub fn declaring_class(&self) -> ClassId {
        self.id.class
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.is_final()
    }

    pub fn is_primitive_type(&self) -> bool {
        PrimitiveType::from_descriptor(&self.type_descriptor).is_some()
    }

    /// Storage size in bytes of a value of this field's type.
    pub fn size(&self) -> usize {
        PrimitiveType::from_descriptor(&self.type_descriptor)
            .map(PrimitiveType::size)
            .unwrap_or(REFERENCE_SIZE)
    }
}

impl Debug for FieldDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_static() {
            write!(f, "static ")?;
        }
        write!(
            f,
            "{} {}::{}",
            self.type_descriptor, self.id.class, self.name
        )
    }
}

impl PartialEq for FieldDescription {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FieldDescription {}

#[derive(Clone)]
pub struct MethodDescription {
    pub id: MethodId,
    pub name: Arc<str>,
    pub signature: Arc<str>,
    pub access_flags: AccessFlags,
    /// Virtual methods: slot in the declaring class's vtable. Interface methods: position in
    /// the interface's method list. Unused for direct methods.
    pub method_index: u16,
}

impl MethodDescription {
    pub fn declaring_class(&self) -> ClassId {
        self.id.class
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.is_private()
    }

    pub fn is_constructor(&self) -> bool {
        self.access_flags.contains(AccessFlags::CONSTRUCTOR)
    }

    /// Direct methods are never dispatched through a table.
    pub fn is_direct(&self) -> bool {
        self.is_static() || self.is_private() || self.is_constructor()
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(AccessFlags::ABSTRACT)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(AccessFlags::NATIVE)
    }

    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(AccessFlags::SYNCHRONIZED)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.is_final()
    }

    pub fn is_class_initializer(&self) -> bool {
        &*self.name == "<clinit>"
    }

    pub fn return_descriptor(&self) -> &str {
        return_descriptor(&self.signature).unwrap_or("V")
    }

    pub fn returns_reference(&self) -> bool {
        PrimitiveType::from_descriptor(self.return_descriptor()).is_none()
    }

    /// The invoke kind that matches how this method is declared.
    pub fn invoke_type(&self, declaring: &Class) -> InvokeType {
        if self.is_static() {
            InvokeType::Static
        } else if self.is_direct() {
            InvokeType::Direct
        } else if declaring.is_interface() {
            InvokeType::Interface
        } else {
            InvokeType::Virtual
        }
    }

    /// Whether calling this method with `kind` is an incompatible class change.
    /// `declaring` must be the class that declares this method.
    pub fn check_incompatible_class_change(&self, kind: InvokeType, declaring: &Class) -> bool {
        match kind {
            InvokeType::Static => !self.is_static(),
            InvokeType::Direct => !self.is_direct() || self.is_static(),
            InvokeType::Virtual => self.is_direct() || declaring.is_interface(),
            InvokeType::Super => false,
            InvokeType::Interface => {
                self.is_direct() || !(declaring.is_interface() || declaring.is_object_class())
            }
        }
    }
}

impl Debug for MethodDescription {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}{}", self.id.class, self.name, self.signature)
    }
}

impl PartialEq for MethodDescription {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MethodDescription {}

/// The eight field access patterns compiled code can request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldAccessKind {
    InstanceObjectRead,
    InstanceObjectWrite,
    InstancePrimitiveRead,
    InstancePrimitiveWrite,
    StaticObjectRead,
    StaticObjectWrite,
    StaticPrimitiveRead,
    StaticPrimitiveWrite,
}

impl FieldAccessKind {
    pub fn new(is_static: bool, is_primitive: bool, is_write: bool) -> Self {
        use FieldAccessKind::*;
        match (is_static, is_primitive, is_write) {
            (false, false, false) => InstanceObjectRead,
            (false, false, true) => InstanceObjectWrite,
            (false, true, false) => InstancePrimitiveRead,
            (false, true, true) => InstancePrimitiveWrite,
            (true, false, false) => StaticObjectRead,
            (true, false, true) => StaticObjectWrite,
            (true, true, false) => StaticPrimitiveRead,
            (true, true, true) => StaticPrimitiveWrite,
        }
    }

    pub fn is_static(self) -> bool {
        use FieldAccessKind::*;
        matches!(
            self,
            StaticObjectRead | StaticObjectWrite | StaticPrimitiveRead | StaticPrimitiveWrite
        )
    }

    pub fn is_primitive(self) -> bool {
        use FieldAccessKind::*;
        matches!(
            self,
            InstancePrimitiveRead
                | InstancePrimitiveWrite
                | StaticPrimitiveRead
                | StaticPrimitiveWrite
        )
    }

    pub fn is_write(self) -> bool {
        use FieldAccessKind::*;
        matches!(
            self,
            InstanceObjectWrite | InstancePrimitiveWrite | StaticObjectWrite | StaticPrimitiveWrite
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InvokeType {
    Static,
    Direct,
    Virtual,
    Super,
    Interface,
}

impl InvokeType {
    /// Static and direct calls bind to the resolved method without a receiver-based lookup.
    pub fn is_direct(self) -> bool {
        matches!(self, InvokeType::Static | InvokeType::Direct)
    }
}

impl Display for InvokeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvokeType::Static => "static",
            InvokeType::Direct => "direct",
            InvokeType::Virtual => "virtual",
            InvokeType::Super => "super",
            InvokeType::Interface => "interface",
        };
        write!(f, "{name}")
    }
}
