//! Type model for values flowing through a test case
//!
//! Every variable in a test case has a declared `TypeRef`. The set of types is
//! closed: primitives, strings, arrays and classes. Class types carry the full
//! set of their supertypes, resolved once when the generator catalog is built,
//! so assignability is a pure function and the core never has to introspect the
//! program under test while mutating.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Primitive value kinds understood by the literal generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveKind {
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Byte | PrimitiveKind::Short | PrimitiveKind::Int | PrimitiveKind::Long
        )
    }

    pub fn is_floating(self) -> bool {
        matches!(self, PrimitiveKind::Float | PrimitiveKind::Double)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integral() || self.is_floating()
    }

    /// Inclusive value range for integral kinds.
    pub fn integral_range(self) -> Option<(i64, i64)> {
        match self {
            PrimitiveKind::Byte => Some((i8::MIN as i64, i8::MAX as i64)),
            PrimitiveKind::Short => Some((i16::MIN as i64, i16::MAX as i64)),
            PrimitiveKind::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            PrimitiveKind::Long => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
        }
    }

    /// Rank in the widening order `byte < short < int < long < float < double`.
    /// `char` widens to `int` and above, `boolean` widens to nothing.
    fn widening_rank(self) -> Option<u8> {
        match self {
            PrimitiveKind::Byte => Some(0),
            PrimitiveKind::Short => Some(1),
            PrimitiveKind::Char => None,
            PrimitiveKind::Int => Some(2),
            PrimitiveKind::Long => Some(3),
            PrimitiveKind::Float => Some(4),
            PrimitiveKind::Double => Some(5),
            PrimitiveKind::Boolean => None,
        }
    }

    /// Whether a value of kind `from` can be used where `self` is expected.
    pub fn accepts(self, from: PrimitiveKind) -> bool {
        if self == from {
            return true;
        }
        if from == PrimitiveKind::Char {
            return matches!(self.widening_rank(), Some(rank) if rank >= 2);
        }
        match (self.widening_rank(), from.widening_rank()) {
            (Some(to), Some(from)) => to > from,
            _ => false,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        self as u8
    }
}

/// A class of the program under test, with its resolved supertypes.
///
/// Equality and hashing only consider the name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassType {
    pub name: String,
    pub supertypes: BTreeSet<String>,
    pub is_abstract: bool,
}

impl ClassType {
    pub fn new(name: impl Into<String>) -> Self {
        ClassType {
            name: name.into(),
            supertypes: BTreeSet::new(),
            is_abstract: false,
        }
    }

    pub fn with_supertype(mut self, name: impl Into<String>) -> Self {
        self.supertypes.insert(name.into());
        self
    }

    pub fn with_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    pub fn is_subtype_of(&self, other: &ClassType) -> bool {
        self.name == other.name || self.supertypes.contains(&other.name)
    }
}

impl PartialEq for ClassType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ClassType {}

impl Hash for ClassType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Declared type of a variable or of a callable site's parameter/return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Void,
    Primitive(PrimitiveKind),
    String,
    Array(Arc<TypeRef>),
    Class(Arc<ClassType>),
}

impl TypeRef {
    pub fn int() -> Self {
        TypeRef::Primitive(PrimitiveKind::Int)
    }

    pub fn long() -> Self {
        TypeRef::Primitive(PrimitiveKind::Long)
    }

    pub fn double() -> Self {
        TypeRef::Primitive(PrimitiveKind::Double)
    }

    pub fn float() -> Self {
        TypeRef::Primitive(PrimitiveKind::Float)
    }

    pub fn boolean() -> Self {
        TypeRef::Primitive(PrimitiveKind::Boolean)
    }

    pub fn char() -> Self {
        TypeRef::Primitive(PrimitiveKind::Char)
    }

    pub fn array_of(component: TypeRef) -> Self {
        TypeRef::Array(Arc::new(component))
    }

    pub fn class(class: ClassType) -> Self {
        TypeRef::Class(Arc::new(class))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeRef::Primitive(_))
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        match self {
            TypeRef::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, TypeRef::String)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeRef::Array(_))
    }

    pub fn is_class(&self) -> bool {
        matches!(self, TypeRef::Class(_))
    }

    /// Primitives and strings are produced by literals rather than generators.
    pub fn is_primitive_like(&self) -> bool {
        self.is_primitive() || self.is_string()
    }

    /// Types whose variables may hold `null`.
    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeRef::String | TypeRef::Array(_) | TypeRef::Class(_))
    }

    pub fn component_type(&self) -> Option<&TypeRef> {
        match self {
            TypeRef::Array(component) => Some(component.as_ref()),
            _ => None,
        }
    }

    pub fn class_type(&self) -> Option<&ClassType> {
        match self {
            TypeRef::Class(class) => Some(class.as_ref()),
            _ => None,
        }
    }

    /// Whether a value declared as `from` can be stored where `self` is expected.
    pub fn is_assignable_from(&self, from: &TypeRef) -> bool {
        match (self, from) {
            (TypeRef::Void, _) | (_, TypeRef::Void) => false,
            (TypeRef::Primitive(to), TypeRef::Primitive(from)) => to.accepts(*from),
            (TypeRef::String, TypeRef::String) => true,
            (TypeRef::Class(to), TypeRef::Class(from)) => from.is_subtype_of(to),
            (TypeRef::Array(to), TypeRef::Array(from)) => {
                if to == from {
                    true
                } else if to.is_nullable() && from.is_nullable() {
                    to.is_assignable_from(from)
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    pub fn is_assignable_to(&self, to: &TypeRef) -> bool {
        to.is_assignable_from(self)
    }

    /// Narrowing: `self` is a strictly more specific type than `declared`.
    pub fn narrows(&self, declared: &TypeRef) -> bool {
        self != declared && declared.is_assignable_from(self) && !self.is_primitive()
    }

    /// Number of array dimensions.
    pub fn array_depth(&self) -> usize {
        match self {
            TypeRef::Array(component) => 1 + component.array_depth(),
            _ => 0,
        }
    }

    pub fn simple_name(&self) -> String {
        match self {
            TypeRef::Void => "void".to_string(),
            TypeRef::Primitive(kind) => kind.name().to_string(),
            TypeRef::String => "String".to_string(),
            TypeRef::Array(component) => format!("{}[]", component.simple_name()),
            TypeRef::Class(class) => class
                .name
                .rsplit(|c| c == '.' || c == ':')
                .next()
                .unwrap_or(&class.name)
                .to_string(),
        }
    }

    /// Stable byte encoding used by test case fingerprints.
    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            TypeRef::Void => out.push(0),
            TypeRef::Primitive(kind) => {
                out.push(1);
                out.push(kind.tag());
            }
            TypeRef::String => out.push(2),
            TypeRef::Array(component) => {
                out.push(3);
                component.encode_into(out);
            }
            TypeRef::Class(class) => {
                out.push(4);
                out.extend_from_slice(class.name.as_bytes());
                out.push(0);
            }
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Class(class) => write!(f, "{}", class.name),
            TypeRef::Array(component) => write!(f, "{}[]", component),
            other => write!(f, "{}", other.simple_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animal() -> TypeRef {
        TypeRef::class(ClassType::new("zoo.Animal"))
    }

    fn dog() -> TypeRef {
        TypeRef::class(ClassType::new("zoo.Dog").with_supertype("zoo.Animal"))
    }

    #[test]
    fn test_primitive_widening() {
        assert!(TypeRef::long().is_assignable_from(&TypeRef::int()));
        assert!(TypeRef::double().is_assignable_from(&TypeRef::long()));
        assert!(TypeRef::int().is_assignable_from(&TypeRef::char()));
        assert!(!TypeRef::int().is_assignable_from(&TypeRef::long()));
        assert!(!TypeRef::char().is_assignable_from(&TypeRef::int()));
        assert!(!TypeRef::boolean().is_assignable_from(&TypeRef::int()));
    }

    #[test]
    fn test_class_assignability_uses_resolved_supertypes() {
        assert!(animal().is_assignable_from(&dog()));
        assert!(!dog().is_assignable_from(&animal()));
        assert!(dog().narrows(&animal()));
        assert!(!animal().narrows(&dog()));
    }

    #[test]
    fn test_array_covariance_only_for_references() {
        let animals = TypeRef::array_of(animal());
        let dogs = TypeRef::array_of(dog());
        assert!(animals.is_assignable_from(&dogs));
        assert!(!TypeRef::array_of(TypeRef::long()).is_assignable_from(&TypeRef::array_of(TypeRef::int())));
        assert_eq!(dogs.component_type(), Some(&dog()));
        assert_eq!(TypeRef::array_of(dogs.clone()).array_depth(), 2);
    }

    #[test]
    fn test_simple_name() {
        assert_eq!(dog().simple_name(), "Dog");
        assert_eq!(TypeRef::array_of(TypeRef::int()).simple_name(), "int[]");
    }
}
