//! Subtyping, member lookup and access rules over loaded classes.
use crate::{
    resolve::ClassLinker,
    types::{AccessFlags, Class},
    utils::{package_of, ClassId, FieldId, MethodId},
};

impl ClassLinker {
    /// Whether `class` is `ancestor` or inherits from it through superclasses.
    pub fn is_subclass(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.class(id).super_class();
        }
        false
    }

    pub fn implements(&self, class: &Class, interface: ClassId) -> bool {
        class.iftable().iter().any(|e| e.interface == interface)
    }

    /// Whether a value of class `source` may be stored where `target` is expected.
    pub fn is_assignable(&self, target: ClassId, source: ClassId) -> bool {
        if target == source {
            return true;
        }
        let target_class = self.class(target);
        let source_class = self.class(source);
        if target_class.is_primitive() || source_class.is_primitive() {
            return false;
        }
        if target_class.is_object_class() {
            return true;
        }
        if target_class.is_interface() {
            return self.implements(&source_class, target);
        }
        match (target_class.component_type(), source_class.component_type()) {
            (Some(target_component), Some(source_component)) => {
                self.is_assignable(target_component, source_component)
            }
            (Some(_), None) | (None, Some(_)) => false,
            (None, None) => self.is_subclass(source, target),
        }
    }

    pub fn is_same_package(&self, a: &Class, b: &Class) -> bool {
        package_of(a.descriptor()) == package_of(b.descriptor())
    }

    /// Whether code in `referrer` may name class `target` at all.
    pub fn can_access(&self, referrer: &Class, target: &Class) -> bool {
        target.is_public() || self.is_same_package(referrer, target)
    }

    /// Whether code in `referrer` may use a member of `declaring` with the given flags.
    pub fn can_access_member(&self, referrer: &Class, declaring: &Class, flags: AccessFlags) -> bool {
        if referrer.id() == declaring.id() || flags.is_public() {
            return true;
        }
        if flags.is_private() {
            return false;
        }
        if flags.is_protected()
            && !referrer.is_interface()
            && self.is_subclass(referrer.id(), declaring.id())
        {
            return true;
        }
        self.is_same_package(referrer, declaring)
    }

    /// Field lookup: the class itself, then its superinterfaces, then its superclass chain.
    pub fn find_field(&self, class: ClassId, name: &str, type_descriptor: &str) -> Option<FieldId> {
        let klass = self.class(class);
        if let Some(field) = klass.find_declared_field(name, type_descriptor) {
            return Some(field.id);
        }
        for &interface in klass.interfaces() {
            if let Some(field) = self.find_field(interface, name, type_descriptor) {
                return Some(field);
            }
        }
        klass
            .super_class()
            .and_then(|s| self.find_field(s, name, type_descriptor))
    }

    pub fn find_virtual_method(&self, class: ClassId, name: &str, signature: &str) -> Option<MethodId> {
        self.find_in_chain(class, name, signature, |m| !m.is_direct())
    }

    pub fn find_direct_method(&self, class: ClassId, name: &str, signature: &str) -> Option<MethodId> {
        self.find_in_chain(class, name, signature, |m| m.is_direct())
    }

    /// Interface method lookup: the interface, its superinterfaces, then `java.lang.Object`.
    pub fn find_interface_method(&self, class: ClassId, name: &str, signature: &str) -> Option<MethodId> {
        let klass = self.class(class);
        let candidates = std::iter::once(class).chain(klass.iftable().iter().map(|e| e.interface));
        for candidate in candidates {
            if let Some(method) = self.class(candidate).find_declared_method(name, signature) {
                if !method.is_direct() {
                    return Some(method.id);
                }
            }
        }
        self.find_virtual_method(self.well_known().object, name, signature)
    }

    fn find_in_chain(
        &self,
        class: ClassId,
        name: &str,
        signature: &str,
        accept: impl Fn(&crate::types::members::MethodDescription) -> bool,
    ) -> Option<MethodId> {
        let mut current = Some(class);
        while let Some(id) = current {
            let klass = self.class(id);
            if let Some(method) = klass.find_declared_method(name, signature) {
                if accept(method) {
                    return Some(method.id);
                }
            }
            current = klass.super_class();
        }
        None
    }
}
