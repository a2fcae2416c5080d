//! Handles and type-descriptor helpers shared by the linker, heap and entry points.
use std::fmt::{Debug, Formatter};

pub mod newtypes;

pub use newtypes::{
    ClassId, FieldId, FieldIndex, MethodId, MethodIndex, NativeRef, ObjectRef, StringIndex,
    ThreadId, TypeIndex,
};

pub struct DebugStr(pub String);

impl Debug for DebugStr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage size in bytes of a heap reference.
pub const REFERENCE_SIZE: usize = 4;

pub fn is_array_descriptor(descriptor: &str) -> bool {
    descriptor.starts_with('[')
}

pub fn is_primitive_descriptor(descriptor: &str) -> bool {
    descriptor.len() == 1 && matches!(descriptor, "Z" | "B" | "C" | "S" | "I" | "J" | "F" | "D" | "V")
}

/// The element descriptor of an array descriptor (`[[I` -> `[I`).
pub fn component_descriptor(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('[')
}

/// Checks the shape of a field-type descriptor: a primitive, `L<name>;`, or an array of either.
pub fn is_valid_type_descriptor(descriptor: &str) -> bool {
    let element = descriptor.trim_start_matches('[');
    if element.is_empty() {
        return false;
    }
    if element == "V" {
        // void is only legal as a bare return type, never as an element
        return descriptor == "V";
    }
    if is_primitive_descriptor(element) {
        return true;
    }
    match element.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        Some(name) => !name.is_empty() && !name.contains(';') && !name.contains('['),
        None => false,
    }
}

/// Returns the package part of a class descriptor; arrays use their innermost element.
/// Primitives and classes in the unnamed package yield `""`.
pub fn package_of(descriptor: &str) -> &str {
    let element = descriptor.trim_start_matches('[');
    match element.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
        Some(name) => match name.rfind('/') {
            Some(i) => &name[..i],
            None => "",
        },
        None => "",
    }
}

/// The return-type descriptor of a method signature such as `(ILjava/lang/String;)V`.
pub fn return_descriptor(signature: &str) -> Option<&str> {
    if !signature.starts_with('(') {
        return None;
    }
    let close = signature.find(')')?;
    let ret = &signature[close + 1..];
    if is_valid_type_descriptor(ret) {
        Some(ret)
    } else {
        None
    }
}

/// Splits the parameter list of a method signature into individual type descriptors.
pub fn parameter_descriptors(signature: &str) -> Option<Vec<&str>> {
    let params = signature.strip_prefix('(')?;
    let params = &params[..params.find(')')?];
    let mut out = vec![];
    let mut start = 0;
    let bytes = params.as_bytes();
    while start < bytes.len() {
        let mut end = start;
        while end < bytes.len() && bytes[end] == b'[' {
            end += 1;
        }
        match bytes.get(end)? {
            b'L' => end += params[end..].find(';')? + 1,
            _ => end += 1,
        }
        let param = &params[start..end];
        if !is_valid_type_descriptor(param) || param == "V" {
            return None;
        }
        out.push(param);
        start = end;
    }
    Some(out)
}

/// Human-readable form of a descriptor: `Ljava/lang/String;` -> `java.lang.String`, `[I` -> `int[]`.
pub fn pretty_descriptor(descriptor: &str) -> String {
    let dims = descriptor.len() - descriptor.trim_start_matches('[').len();
    let element = &descriptor[dims..];
    let mut out = match element {
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "S" => "short".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        "V" => "void".to_string(),
        other => match other.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
            Some(name) => name.replace('/', "."),
            None => other.to_string(),
        },
    };
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pretty_descriptor() {
        assert_eq!(pretty_descriptor("Ljava/lang/String;"), "java.lang.String");
        assert_eq!(pretty_descriptor("[[I"), "int[][]");
        assert_eq!(pretty_descriptor("[Lcom/example/Foo;"), "com.example.Foo[]");
    }

    #[test]
    fn test_package_of() {
        assert_eq!(package_of("Ljava/lang/String;"), "java/lang");
        assert_eq!(package_of("[[Lcom/example/Foo;"), "com/example");
        assert_eq!(package_of("LTopLevel;"), "");
        assert_eq!(package_of("I"), "");
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(is_valid_type_descriptor("I"));
        assert!(is_valid_type_descriptor("[[J"));
        assert!(is_valid_type_descriptor("Lcom/example/Foo;"));
        assert!(!is_valid_type_descriptor("L;"));
        assert!(!is_valid_type_descriptor("[V"));
        assert!(!is_valid_type_descriptor("Lcom/example/Foo"));
        assert!(!is_valid_type_descriptor("Q"));
    }

    #[test]
    fn test_return_descriptor() {
        assert_eq!(return_descriptor("(ILjava/lang/String;)V"), Some("V"));
        assert_eq!(return_descriptor("()[Ljava/lang/Object;"), Some("[Ljava/lang/Object;"));
        assert_eq!(return_descriptor("I"), None);
    }

    #[test]
    fn test_parameter_descriptors() {
        assert_eq!(
            parameter_descriptors("(I[JLjava/lang/String;[[Lcom/example/Foo;)V"),
            Some(vec!["I", "[J", "Ljava/lang/String;", "[[Lcom/example/Foo;"])
        );
        assert_eq!(parameter_descriptors("()V"), Some(vec![]));
        assert_eq!(parameter_descriptors("(V)V"), None);
        assert_eq!(parameter_descriptors("(Lcom/example/Foo)V"), None);
    }
}
