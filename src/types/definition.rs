//! Class definitions as handed to the linker before loading, and the symbolic constant pool
//! compiled code indexes into.
use crate::{
    error::DefinitionError,
    types::AccessFlags,
    utils::{
        is_valid_type_descriptor, parameter_descriptors, return_descriptor, ClassId, FieldIndex,
        MethodIndex, StringIndex, TypeIndex,
    },
    vm::{exceptions::ManagedResult, ScopedAccess},
};
use std::{
    collections::HashSet,
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// Runs a class's static initializer. An `Err` must carry the exception left pending on the thread.
pub type ClassInitializer =
    Arc<dyn Fn(&mut ScopedAccess<'_>, ClassId) -> ManagedResult<()> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRef {
    pub class: TypeIndex,
    pub name: Arc<str>,
    pub type_descriptor: Arc<str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodRef {
    pub class: TypeIndex,
    pub name: Arc<str>,
    pub signature: Arc<str>,
}

/// Symbolic references used by a class's code. Indices are stable once issued.
#[derive(Clone, Debug, Default)]
pub struct ConstantPool {
    strings: Vec<Arc<str>>,
    types: Vec<Arc<str>>,
    fields: Vec<FieldRef>,
    methods: Vec<MethodRef>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a string literal. Equal contents at distinct indices are allowed.
    pub fn add_string(&mut self, value: &str) -> StringIndex {
        self.strings.push(value.into());
        StringIndex(self.strings.len() as u32 - 1)
    }

    pub fn add_type(&mut self, descriptor: &str) -> TypeIndex {
        if let Some(i) = self.types.iter().position(|t| &**t == descriptor) {
            return TypeIndex(i as u32);
        }
        self.types.push(descriptor.into());
        TypeIndex(self.types.len() as u32 - 1)
    }

    pub fn add_field(&mut self, class: &str, name: &str, type_descriptor: &str) -> FieldIndex {
        let class = self.add_type(class);
        let field = FieldRef {
            class,
            name: name.into(),
            type_descriptor: type_descriptor.into(),
        };
        if let Some(i) = self.fields.iter().position(|f| *f == field) {
            return FieldIndex(i as u32);
        }
        self.fields.push(field);
        FieldIndex(self.fields.len() as u32 - 1)
    }

    pub fn add_method(&mut self, class: &str, name: &str, signature: &str) -> MethodIndex {
        let class = self.add_type(class);
        let method = MethodRef {
            class,
            name: name.into(),
            signature: signature.into(),
        };
        if let Some(i) = self.methods.iter().position(|m| *m == method) {
            return MethodIndex(i as u32);
        }
        self.methods.push(method);
        MethodIndex(self.methods.len() as u32 - 1)
    }

    pub fn string(&self, index: StringIndex) -> Option<&str> {
        self.strings.get(index.as_usize()).map(|s| &**s)
    }

    pub fn type_descriptor(&self, index: TypeIndex) -> Option<&str> {
        self.types.get(index.as_usize()).map(|s| &**s)
    }

    pub fn field_ref(&self, index: FieldIndex) -> Option<&FieldRef> {
        self.fields.get(index.as_usize())
    }

    pub fn method_ref(&self, index: MethodIndex) -> Option<&MethodRef> {
        self.methods.get(index.as_usize())
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

#[derive(Clone, Debug)]
pub struct FieldDefinition {
    pub name: Arc<str>,
    pub type_descriptor: Arc<str>,
    pub access_flags: AccessFlags,
}

#[derive(Clone, Debug)]
pub struct MethodDefinition {
    pub name: Arc<str>,
    pub signature: Arc<str>,
    pub access_flags: AccessFlags,
}

/// A class as it exists on the class path, before linking.
#[derive(Clone)]
pub struct ClassDefinition {
    pub descriptor: Arc<str>,
    pub super_class: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub access_flags: AccessFlags,
    pub fields: Vec<FieldDefinition>,
    pub methods: Vec<MethodDefinition>,
    pub pool: ConstantPool,
    pub initializer: Option<ClassInitializer>,
}

pub const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";

impl ClassDefinition {
    /// A public class extending `java.lang.Object`.
    pub fn class(descriptor: &str) -> Self {
        Self {
            descriptor: descriptor.into(),
            super_class: Some(OBJECT_DESCRIPTOR.into()),
            interfaces: vec![],
            access_flags: AccessFlags::PUBLIC,
            fields: vec![],
            methods: vec![],
            pool: ConstantPool::new(),
            initializer: None,
        }
    }

    pub fn interface(descriptor: &str) -> Self {
        Self {
            access_flags: AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
            ..Self::class(descriptor)
        }
    }

    pub fn access(mut self, flags: AccessFlags) -> Self {
        self.access_flags = flags;
        self
    }

    pub fn extends(mut self, super_class: &str) -> Self {
        self.super_class = Some(super_class.into());
        self
    }

    /// Only the root class may have no superclass.
    pub fn root(mut self) -> Self {
        self.super_class = None;
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn field(mut self, name: &str, type_descriptor: &str, flags: AccessFlags) -> Self {
        self.fields.push(FieldDefinition {
            name: name.into(),
            type_descriptor: type_descriptor.into(),
            access_flags: flags,
        });
        self
    }

    pub fn method(mut self, name: &str, signature: &str, flags: AccessFlags) -> Self {
        self.methods.push(MethodDefinition {
            name: name.into(),
            signature: signature.into(),
            access_flags: flags,
        });
        self
    }

    pub fn pool(mut self, pool: ConstantPool) -> Self {
        self.pool = pool;
        self
    }

    /// Attaches a static initializer; a matching `<clinit>` method is declared automatically.
    pub fn initializer<F>(mut self, initializer: F) -> Self
    where
        F: Fn(&mut ScopedAccess<'_>, ClassId) -> ManagedResult<()> + Send + Sync + 'static,
    {
        self.initializer = Some(Arc::new(initializer));
        if !self.methods.iter().any(|m| &*m.name == "<clinit>") {
            self = self.method("<clinit>", "()V", AccessFlags::STATIC | AccessFlags::CONSTRUCTOR);
        }
        self
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        let class = self.descriptor.to_string();
        let is_class_descriptor = self.descriptor.starts_with('L');
        if !is_class_descriptor || !is_valid_type_descriptor(&self.descriptor) {
            return Err(DefinitionError::InvalidDescriptor(class));
        }
        for related in self.super_class.iter().chain(&self.interfaces) {
            if !related.starts_with('L') || !is_valid_type_descriptor(related) {
                return Err(DefinitionError::InvalidDescriptor(related.to_string()));
            }
        }
        if self.fields.len() > u16::MAX as usize || self.methods.len() > u16::MAX as usize {
            return Err(DefinitionError::TooManyMembers(class));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !is_valid_type_descriptor(&field.type_descriptor) || &*field.type_descriptor == "V" {
                return Err(DefinitionError::InvalidDescriptor(
                    field.type_descriptor.to_string(),
                ));
            }
            if !seen.insert(format!("{}:{}", field.name, field.type_descriptor)) {
                return Err(DefinitionError::DuplicateMember {
                    class,
                    member: field.name.to_string(),
                });
            }
        }

        seen.clear();
        for method in &self.methods {
            if parameter_descriptors(&method.signature).is_none()
                || return_descriptor(&method.signature).is_none()
            {
                return Err(DefinitionError::InvalidSignature {
                    class,
                    name: method.name.to_string(),
                    signature: method.signature.to_string(),
                });
            }
            if !seen.insert(format!("{}{}", method.name, method.signature)) {
                return Err(DefinitionError::DuplicateMember {
                    class,
                    member: format!("{}{}", method.name, method.signature),
                });
            }
        }

        let types = self.pool.type_count();
        let check_type = |index: TypeIndex| {
            if index.as_usize() < types {
                Ok(())
            } else {
                Err(DefinitionError::PoolIndexOutOfRange {
                    class: self.descriptor.to_string(),
                    index: index.0,
                    length: types,
                })
            }
        };
        for field in &self.pool.fields {
            check_type(field.class)?;
        }
        for method in &self.pool.methods {
            check_type(method.class)?;
        }
        Ok(())
    }
}

impl Debug for ClassDefinition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDefinition")
            .field("descriptor", &self.descriptor)
            .field("super_class", &self.super_class)
            .field("interfaces", &self.interfaces)
            .field("access_flags", &self.access_flags)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .field("has_initializer", &self.initializer.is_some())
            .finish()
    }
}
