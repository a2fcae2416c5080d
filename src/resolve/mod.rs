//! The class linker: loads class definitions on demand, owns every [`Class`], and resolves the
//! symbolic references in a class's constant pool into handles.
use crate::{
    error::DefinitionError,
    types::{
        definition::{ClassDefinition, OBJECT_DESCRIPTOR},
        Class, PrimitiveType,
    },
    utils::{
        parameter_descriptors, pretty_descriptor, ClassId, FieldId, FieldIndex, MethodId,
        MethodIndex, ObjectRef, StringIndex, TypeIndex,
    },
    vm::{
        exceptions::{ExceptionKind, ManagedResult},
        metrics::RuntimeMetrics,
        ScopedAccess,
    },
};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::{cell::RefCell, sync::Arc};
use tracing::debug;

pub mod cache;
pub mod hierarchy;
pub mod init;
mod link;

pub use link::LinkError;

pub const CLASS_DESCRIPTOR: &str = "Ljava/lang/Class;";
pub const STRING_DESCRIPTOR: &str = "Ljava/lang/String;";

#[derive(Copy, Clone, Debug)]
pub struct WellKnownClasses {
    pub object: ClassId,
    pub class: ClassId,
    pub string: ClassId,
}

pub struct ClassLinker {
    classes: RwLock<Vec<Arc<Class>>>,
    by_descriptor: DashMap<Arc<str>, ClassId>,
    /// Definitions that have been registered but not yet loaded.
    class_path: DashMap<Arc<str>, ClassDefinition>,
    /// Descriptors whose loading failed, with the original failure.
    failed: DashMap<Arc<str>, LinkError>,
    /// Serializes loading. Holds the stack of descriptors being linked by the owning thread.
    load_lock: ReentrantMutex<RefCell<Vec<Arc<str>>>>,
    interned: DashMap<Arc<str>, ObjectRef>,
    mirror_lock: Mutex<()>,
    well_known: WellKnownClasses,
    metrics: Arc<RuntimeMetrics>,
}

impl ClassLinker {
    pub fn new(metrics: Arc<RuntimeMetrics>) -> Self {
        let mut linker = Self {
            classes: RwLock::new(vec![]),
            by_descriptor: DashMap::new(),
            class_path: DashMap::new(),
            failed: DashMap::new(),
            load_lock: ReentrantMutex::new(RefCell::new(vec![])),
            interned: DashMap::new(),
            mirror_lock: Mutex::new(()),
            well_known: WellKnownClasses {
                object: ClassId(0),
                class: ClassId(0),
                string: ClassId(0),
            },
            metrics,
        };
        for primitive in PrimitiveType::ALL {
            linker.register(link::primitive_class(ClassId(0), primitive));
        }
        linker.well_known = linker.bootstrap();
        linker
    }

    fn bootstrap(&self) -> WellKnownClasses {
        use crate::types::AccessFlags as F;
        let bootstrap = [
            ClassDefinition::class(OBJECT_DESCRIPTOR)
                .root()
                .method("<init>", "()V", F::PUBLIC | F::CONSTRUCTOR)
                .method("hashCode", "()I", F::PUBLIC)
                .method("equals", "(Ljava/lang/Object;)Z", F::PUBLIC)
                .method("toString", "()Ljava/lang/String;", F::PUBLIC),
            ClassDefinition::class(CLASS_DESCRIPTOR)
                .access(F::PUBLIC | F::FINAL)
                .method("getName", "()Ljava/lang/String;", F::PUBLIC),
            ClassDefinition::class(STRING_DESCRIPTOR)
                .access(F::PUBLIC | F::FINAL)
                .field("count", "I", F::PRIVATE | F::FINAL)
                .method("length", "()I", F::PUBLIC),
        ];
        let mut ids = vec![];
        for definition in bootstrap {
            let descriptor = definition.descriptor.clone();
            self.class_path.insert(descriptor.clone(), definition);
            let id = self
                .load(&descriptor)
                .unwrap_or_else(|e| panic!("bootstrap class failed to link: {e}"));
            ids.push(id);
        }
        WellKnownClasses {
            object: ids[0],
            class: ids[1],
            string: ids[2],
        }
    }

    pub fn well_known(&self) -> WellKnownClasses {
        self.well_known
    }

    /// Adds a definition to the class path. It is linked on first reference.
    pub fn define(&self, definition: ClassDefinition) -> Result<(), DefinitionError> {
        definition.validate()?;
        let descriptor = definition.descriptor.clone();
        if self.by_descriptor.contains_key(&descriptor) {
            return Err(DefinitionError::DuplicateClass(descriptor.to_string()));
        }
        match self.class_path.entry(descriptor) {
            Entry::Occupied(e) => Err(DefinitionError::DuplicateClass(e.key().to_string())),
            Entry::Vacant(v) => {
                v.insert(definition);
                Ok(())
            }
        }
    }

    pub fn class(&self, id: ClassId) -> Arc<Class> {
        self.classes.read()[id.as_usize()].clone()
    }

    pub fn try_class(&self, id: ClassId) -> Option<Arc<Class>> {
        self.classes.read().get(id.as_usize()).cloned()
    }

    pub fn class_count(&self) -> usize {
        self.classes.read().len()
    }

    /// Looks up an already-loaded class without triggering loading.
    pub fn lookup_class(&self, descriptor: &str) -> Option<ClassId> {
        self.by_descriptor.get(descriptor).map(|id| *id)
    }

    pub fn primitive_class(&self, primitive: PrimitiveType) -> ClassId {
        self.lookup_class(primitive.descriptor())
            .unwrap_or_else(|| panic!("primitive class {primitive:?} is not registered"))
    }

    /// Finds a class by descriptor, loading it if needed.
    pub fn find_class(&self, soa: &ScopedAccess<'_>, descriptor: &str) -> ManagedResult<ClassId> {
        self.load(descriptor)
            .map_err(|e| soa.throw_new(e.kind, e.message))
    }

    pub fn resolve_type(
        &self,
        soa: &ScopedAccess<'_>,
        index: TypeIndex,
        referrer: ClassId,
    ) -> ManagedResult<ClassId> {
        let referring = self.class(referrer);
        if let Some(id) = referring.cache.resolved_type(index) {
            return Ok(id);
        }
        self.metrics.record_type_resolution();
        let Some(descriptor) = referring.pool.type_descriptor(index) else {
            soa.runtime().fatal(&format!(
                "type index {index} out of range in {}",
                referring.pretty_name()
            ));
        };
        let id = self.find_class(soa, descriptor)?;
        referring.cache.set_resolved_type(index, id);
        Ok(id)
    }

    pub fn resolve_string(
        &self,
        soa: &ScopedAccess<'_>,
        index: StringIndex,
        referrer: ClassId,
    ) -> ManagedResult<ObjectRef> {
        let referring = self.class(referrer);
        if let Some(string) = referring.cache.resolved_string(index) {
            return Ok(string);
        }
        self.metrics.record_string_resolution();
        let Some(value) = referring.pool.string(index) else {
            soa.runtime().fatal(&format!(
                "string index {index} out of range in {}",
                referring.pretty_name()
            ));
        };
        let string = self.intern(soa, value)?;
        referring.cache.set_resolved_string(index, string);
        Ok(string)
    }

    /// Returns the canonical string object for `value`, allocating it on first use.
    pub fn intern(&self, soa: &ScopedAccess<'_>, value: &str) -> ManagedResult<ObjectRef> {
        if let Some(string) = self.interned.get(value) {
            return Ok(*string);
        }
        match self.interned.entry(value.into()) {
            Entry::Occupied(e) => Ok(*e.get()),
            Entry::Vacant(v) => {
                let string_class = self.class(self.well_known.string);
                match soa.runtime().heap().alloc_string(&string_class, value) {
                    Some(string) => {
                        soa.runtime().metrics().record_allocation();
                        v.insert(string);
                        Ok(string)
                    }
                    None => Err(soa.throw_out_of_memory(value.len())),
                }
            }
        }
    }

    pub fn interned_count(&self) -> usize {
        self.interned.len()
    }

    /// Resolves a field reference. Static and instance fields are found alike; callers
    /// check the kind themselves.
    pub fn resolve_field(
        &self,
        soa: &ScopedAccess<'_>,
        index: FieldIndex,
        referrer: ClassId,
    ) -> ManagedResult<FieldId> {
        let referring = self.class(referrer);
        if let Some(field) = referring.cache.resolved_field(index) {
            return Ok(field);
        }
        self.metrics.record_field_resolution();
        let Some(field_ref) = referring.pool.field_ref(index).cloned() else {
            soa.runtime().fatal(&format!(
                "field index {index} out of range in {}",
                referring.pretty_name()
            ));
        };
        let class = self.resolve_type(soa, field_ref.class, referrer)?;
        match self.find_field(class, &field_ref.name, &field_ref.type_descriptor) {
            Some(field) => {
                referring.cache.set_resolved_field(index, field);
                Ok(field)
            }
            None => Err(soa.throw_new(
                ExceptionKind::NoSuchField,
                format!(
                    "No field {} of type {} in class {} or its superclasses",
                    field_ref.name,
                    pretty_descriptor(&field_ref.type_descriptor),
                    self.class(class).pretty_name()
                ),
            )),
        }
    }

    /// Resolves a method reference for the given kind of invocation.
    pub fn resolve_method(
        &self,
        soa: &ScopedAccess<'_>,
        index: MethodIndex,
        referrer: ClassId,
        kind: crate::types::members::InvokeType,
    ) -> ManagedResult<MethodId> {
        use crate::types::members::InvokeType;

        let referring = self.class(referrer);
        if let Some(method) = referring.cache.resolved_method(index) {
            return Ok(method);
        }
        self.metrics.record_method_resolution();
        let Some(method_ref) = referring.pool.method_ref(index).cloned() else {
            soa.runtime().fatal(&format!(
                "method index {index} out of range in {}",
                referring.pretty_name()
            ));
        };
        let class_id = self.resolve_type(soa, method_ref.class, referrer)?;
        let class = self.class(class_id);
        let (name, signature) = (&*method_ref.name, &*method_ref.signature);

        match kind {
            InvokeType::Interface if !class.is_interface() => {
                return Err(soa.throw_new(
                    ExceptionKind::IncompatibleClassChange,
                    format!("Found class {}, but interface was expected", class.pretty_name()),
                ));
            }
            InvokeType::Virtual | InvokeType::Super if class.is_interface() => {
                return Err(soa.throw_new(
                    ExceptionKind::IncompatibleClassChange,
                    format!("Found interface {}, but class was expected", class.pretty_name()),
                ));
            }
            _ => {}
        }

        let found = match kind {
            InvokeType::Static | InvokeType::Direct => {
                self.find_direct_method(class_id, name, signature)
            }
            InvokeType::Virtual | InvokeType::Super => {
                self.find_virtual_method(class_id, name, signature)
            }
            InvokeType::Interface => self.find_interface_method(class_id, name, signature),
        };
        if let Some(method) = found {
            referring.cache.set_resolved_method(index, method);
            return Ok(method);
        }

        // Look for the method under a different kind so the error can say what was found.
        let other = match kind {
            InvokeType::Static | InvokeType::Direct => {
                self.find_virtual_method(class_id, name, signature)
            }
            InvokeType::Virtual | InvokeType::Super => self
                .find_direct_method(class_id, name, signature)
                .or_else(|| self.find_interface_method(class_id, name, signature)),
            InvokeType::Interface => self
                .find_virtual_method(class_id, name, signature)
                .or_else(|| self.find_direct_method(class_id, name, signature)),
        };
        match other {
            Some(found) => {
                let declaring = self.class(found.class);
                let method = declaring.method(found.slot);
                Err(soa.throw_incompatible_class_change_error_method(
                    kind,
                    method.invoke_type(&declaring),
                    found,
                ))
            }
            None => Err(soa.throw_new(
                ExceptionKind::NoSuchMethod,
                format!(
                    "No {kind} method {name}{signature} in class {} or its super classes",
                    class.pretty_name()
                ),
            )),
        }
    }

    /// The `java.lang.Class` object representing `class`, created on first request.
    pub fn class_mirror(&self, soa: &ScopedAccess<'_>, class: ClassId) -> ManagedResult<ObjectRef> {
        let target = self.class(class);
        if let Some(mirror) = target.mirror.get() {
            return Ok(*mirror);
        }
        let _lock = self.mirror_lock.lock();
        if let Some(mirror) = target.mirror.get() {
            return Ok(*mirror);
        }
        let class_class = self.class(self.well_known.class);
        match soa.runtime().heap().alloc_instance(&class_class) {
            Some(mirror) => {
                soa.runtime().metrics().record_allocation();
                let _ = target.mirror.set(mirror);
                debug!(class = %target.pretty_name(), mirror = %mirror, "created class mirror");
                Ok(mirror)
            }
            None => Err(soa.throw_out_of_memory(class_class.instance_size())),
        }
    }

    /// Every object the linker keeps alive: interned strings and class mirrors.
    pub fn roots(&self) -> Vec<ObjectRef> {
        let mut roots: Vec<_> = self.interned.iter().map(|e| *e.value()).collect();
        roots.extend(self.classes.read().iter().filter_map(|c| c.mirror.get().copied()));
        roots
    }

    /// `int com.example.Point.x`
    pub fn pretty_field(&self, field: FieldId) -> String {
        let class = self.class(field.class);
        let f = class.field(field.slot);
        format!(
            "{} {}.{}",
            pretty_descriptor(&f.type_descriptor),
            class.pretty_name(),
            f.name
        )
    }

    /// `java.lang.String com.example.Point.describe(int, long)`
    pub fn pretty_method(&self, method: MethodId) -> String {
        let class = self.class(method.class);
        let m = class.method(method.slot);
        let params: Vec<_> = parameter_descriptors(&m.signature)
            .unwrap_or_default()
            .into_iter()
            .map(pretty_descriptor)
            .collect();
        format!(
            "{} {}.{}({})",
            pretty_descriptor(m.return_descriptor()),
            class.pretty_name(),
            m.name,
            params.join(", ")
        )
    }

    fn register(&self, mut class: Class) -> ClassId {
        let mut classes = self.classes.write();
        let id = ClassId(classes.len() as u32);
        class.id = id;
        let descriptor = class.descriptor.clone();
        classes.push(Arc::new(class));
        drop(classes);
        self.by_descriptor.insert(descriptor, id);
        id
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }
}
