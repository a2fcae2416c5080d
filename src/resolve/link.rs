use crate::{
    resolve::{cache::ResolutionCache, init::InitStatus, ClassLinker},
    types::{
        definition::{ClassDefinition, ConstantPool},
        members::{FieldDescription, MethodDescription},
        AccessFlags, Class, ClassStatus, InterfaceEntry, PrimitiveType,
    },
    utils::{
        component_descriptor, is_array_descriptor, pretty_descriptor, ClassId, FieldId, MethodId,
        REFERENCE_SIZE,
    },
    vm::exceptions::ExceptionKind,
};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::debug;

/// Why a class could not be loaded. Surfaces to managed code as `kind`.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{kind:?}: {message}")]
pub struct LinkError {
    pub kind: ExceptionKind,
    pub message: String,
}

impl LinkError {
    fn new(kind: ExceptionKind, message: String) -> Self {
        Self { kind, message }
    }
}

fn bare_class(id: ClassId, descriptor: &str, access_flags: AccessFlags) -> Class {
    let pool = ConstantPool::new();
    Class {
        id,
        descriptor: descriptor.into(),
        access_flags,
        super_class: None,
        interfaces: vec![],
        component_type: None,
        primitive: None,
        fields: vec![],
        methods: vec![],
        vtable: vec![],
        iftable: vec![],
        instance_size: 0,
        static_size: 0,
        component_size: 0,
        cache: ResolutionCache::for_pool(&pool),
        pool,
        init: InitStatus::new(ClassStatus::Initialized),
        initializer: None,
        mirror: OnceLock::new(),
    }
}

pub(super) fn primitive_class(id: ClassId, primitive: PrimitiveType) -> Class {
    Class {
        primitive: Some(primitive),
        ..bare_class(
            id,
            primitive.descriptor(),
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
        )
    }
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

fn is_overridable(method: &MethodDescription) -> bool {
    !method.is_direct() && !method.is_class_initializer()
}

impl ClassLinker {
    /// Loads (or returns the already loaded) class named by `descriptor`.
    pub(crate) fn load(&self, descriptor: &str) -> Result<ClassId, LinkError> {
        if let Some(id) = self.lookup_class(descriptor) {
            return Ok(id);
        }

        let loading = self.load_lock.lock();
        if let Some(id) = self.lookup_class(descriptor) {
            return Ok(id);
        }
        if let Some(failure) = self.failed.get(descriptor) {
            return Err(LinkError::new(
                ExceptionKind::NoClassDefFound,
                format!(
                    "Class {} failed to link earlier: {}",
                    pretty_descriptor(descriptor),
                    failure.message
                ),
            ));
        }
        if loading.borrow().iter().any(|d| &**d == descriptor) {
            return Err(LinkError::new(
                ExceptionKind::ClassCircularity,
                pretty_descriptor(descriptor),
            ));
        }

        loading.borrow_mut().push(descriptor.into());
        let result = if is_array_descriptor(descriptor) {
            self.link_array(descriptor)
        } else {
            match self.class_path.get(descriptor).map(|d| d.clone()) {
                Some(definition) => self.link_definition(definition),
                None => Err(LinkError::new(
                    ExceptionKind::NoClassDefFound,
                    format!("Class not found: {}", pretty_descriptor(descriptor)),
                )),
            }
        };
        loading.borrow_mut().pop();

        match &result {
            Ok(id) => {
                self.class_path.remove(descriptor);
                self.metrics.record_class_load();
                debug!(class = %pretty_descriptor(descriptor), id = %id, "linked class");
            }
            Err(e) => {
                // A missing class may still be defined later; anything else is permanent.
                if self.class_path.remove(descriptor).is_some() {
                    self.failed.insert(descriptor.into(), e.clone());
                }
                debug!(class = %pretty_descriptor(descriptor), error = %e, "failed to link class");
            }
        }
        result
    }

    fn link_array(&self, descriptor: &str) -> Result<ClassId, LinkError> {
        let component_descriptor = component_descriptor(descriptor).unwrap_or_default();
        if component_descriptor == "V" {
            return Err(LinkError::new(
                ExceptionKind::NoClassDefFound,
                format!("Invalid array type: {descriptor}"),
            ));
        }
        let component_id = self.load(component_descriptor)?;
        let component = self.class(component_id);
        let object = self.class(self.well_known.object);

        let visibility = if component.is_public() {
            AccessFlags::PUBLIC
        } else {
            AccessFlags::empty()
        };
        let component_size = component
            .primitive_type()
            .map(PrimitiveType::size)
            .unwrap_or(REFERENCE_SIZE);

        let class = Class {
            super_class: Some(object.id()),
            component_type: Some(component_id),
            component_size,
            vtable: object.vtable.clone(),
            ..bare_class(
                ClassId(0),
                descriptor,
                visibility | AccessFlags::FINAL | AccessFlags::ABSTRACT,
            )
        };
        Ok(self.register(class))
    }

    fn link_definition(&self, definition: ClassDefinition) -> Result<ClassId, LinkError> {
        let name = pretty_descriptor(&definition.descriptor);
        let is_interface = definition.access_flags.contains(AccessFlags::INTERFACE);

        let super_class = match &definition.super_class {
            None => None,
            Some(super_descriptor) => {
                let super_id = self.load(super_descriptor)?;
                let super_class = self.class(super_id);
                if super_class.is_interface() {
                    return Err(LinkError::new(
                        ExceptionKind::IncompatibleClassChange,
                        format!(
                            "Superclass {} of {name} is an interface",
                            super_class.pretty_name()
                        ),
                    ));
                }
                if super_class.is_final() {
                    return Err(LinkError::new(
                        ExceptionKind::Verify,
                        format!(
                            "Superclass {} of {name} is declared final",
                            super_class.pretty_name()
                        ),
                    ));
                }
                if !self.can_access_class(&definition.descriptor, &super_class) {
                    return Err(LinkError::new(
                        ExceptionKind::IllegalAccess,
                        format!(
                            "Superclass {} is inaccessible to class {name}",
                            super_class.pretty_name()
                        ),
                    ));
                }
                Some(super_class)
            }
        };

        let mut interfaces = vec![];
        for interface_descriptor in &definition.interfaces {
            let interface_id = self.load(interface_descriptor)?;
            let interface = self.class(interface_id);
            if !interface.is_interface() {
                return Err(LinkError::new(
                    ExceptionKind::IncompatibleClassChange,
                    format!(
                        "Class {name} implements non-interface class {}",
                        interface.pretty_name()
                    ),
                ));
            }
            if !self.can_access_class(&definition.descriptor, &interface) {
                return Err(LinkError::new(
                    ExceptionKind::IllegalAccess,
                    format!(
                        "Interface {} implemented by class {name} is inaccessible",
                        interface.pretty_name()
                    ),
                ));
            }
            interfaces.push(interface_id);
        }

        // Loading is serialized, so the next registry slot is ours.
        let id = ClassId(self.class_count() as u32);

        let mut instance_size = super_class.as_ref().map_or(0, |s| s.instance_size);
        let mut static_size = 0;
        let fields: Vec<_> = definition
            .fields
            .iter()
            .enumerate()
            .map(|(slot, field)| {
                let mut description = FieldDescription {
                    id: FieldId::new(id, slot as u16),
                    name: field.name.clone(),
                    type_descriptor: field.type_descriptor.clone(),
                    access_flags: field.access_flags,
                    offset: 0,
                };
                let size = description.size();
                let cursor = if description.is_static() {
                    &mut static_size
                } else {
                    &mut instance_size
                };
                description.offset = align_up(*cursor, size);
                *cursor = description.offset + size;
                description
            })
            .collect();

        let mut methods: Vec<_> = definition
            .methods
            .iter()
            .enumerate()
            .map(|(slot, method)| MethodDescription {
                id: MethodId::new(id, slot as u16),
                name: method.name.clone(),
                signature: method.signature.clone(),
                access_flags: method.access_flags,
                method_index: slot as u16,
            })
            .collect();

        let signature_of = |candidate: MethodId, methods: &[MethodDescription]| {
            let describe = |m: &MethodDescription| (m.name.clone(), m.signature.clone(), m.is_final());
            if candidate.class == id {
                describe(&methods[candidate.slot as usize])
            } else {
                describe(self.class(candidate.class).method(candidate.slot))
            }
        };

        let mut vtable = vec![];
        if !is_interface {
            vtable = super_class.as_ref().map_or(vec![], |s| s.vtable.clone());
            for i in 0..methods.len() {
                if !is_overridable(&methods[i]) {
                    continue;
                }
                let overridden = vtable.iter().position(|&candidate| {
                    let (name, signature, _) = signature_of(candidate, &methods);
                    name == methods[i].name && signature == methods[i].signature
                });
                match overridden {
                    Some(slot) => {
                        let (_, _, is_final) = signature_of(vtable[slot], &methods);
                        if is_final {
                            return Err(LinkError::new(
                                ExceptionKind::Verify,
                                format!(
                                    "Method {}.{}{} overrides final method in {}",
                                    name,
                                    methods[i].name,
                                    methods[i].signature,
                                    pretty_descriptor(self.class(vtable[slot].class).descriptor())
                                ),
                            ));
                        }
                        vtable[slot] = methods[i].id;
                        methods[i].method_index = slot as u16;
                    }
                    None => {
                        methods[i].method_index = vtable.len() as u16;
                        vtable.push(methods[i].id);
                    }
                }
            }
        }

        // Every interface reachable through the superclass or the direct interfaces, in order.
        let mut all_interfaces: Vec<ClassId> = vec![];
        let inherited = super_class
            .as_ref()
            .map_or(vec![], |s| s.iftable.iter().map(|e| e.interface).collect());
        let declared = interfaces.iter().flat_map(|&i| {
            let interface = self.class(i);
            let mut reachable: Vec<_> = interface.iftable.iter().map(|e| e.interface).collect();
            reachable.push(i);
            reachable
        });
        for interface in inherited.into_iter().chain(declared) {
            if !all_interfaces.contains(&interface) {
                all_interfaces.push(interface);
            }
        }

        let iftable = all_interfaces
            .into_iter()
            .map(|interface_id| {
                let interface = self.class(interface_id);
                let implementations = if is_interface {
                    vec![]
                } else {
                    interface
                        .methods
                        .iter()
                        .map(|im| {
                            if !is_overridable(im) {
                                return im.id;
                            }
                            vtable
                                .iter()
                                .copied()
                                .find(|&candidate| {
                                    let (name, signature, _) = signature_of(candidate, &methods);
                                    name == im.name && signature == im.signature
                                })
                                .unwrap_or(im.id)
                        })
                        .collect()
                };
                InterfaceEntry {
                    interface: interface_id,
                    methods: implementations,
                }
            })
            .collect();

        let cache = ResolutionCache::for_pool(&definition.pool);
        let class = Class {
            id,
            descriptor: definition.descriptor.clone(),
            access_flags: definition.access_flags,
            super_class: super_class.as_ref().map(|s| s.id()),
            interfaces,
            component_type: None,
            primitive: None,
            fields,
            methods,
            vtable,
            iftable,
            instance_size,
            static_size,
            component_size: 0,
            pool: definition.pool,
            cache,
            init: InitStatus::new(ClassStatus::Uninitialized),
            initializer: definition.initializer,
            mirror: OnceLock::new(),
        };
        let registered = self.register(class);
        debug_assert_eq!(registered, id);
        Ok(registered)
    }

    fn can_access_class(&self, descriptor: &str, target: &Arc<Class>) -> bool {
        target.is_public() || crate::utils::package_of(descriptor) == crate::utils::package_of(target.descriptor())
    }
}
