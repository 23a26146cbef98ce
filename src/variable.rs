//! Variable references
//!
//! A `VariableReference` names a value that a statement reads or writes. The
//! reference is a *stable handle*: it points at a `SlotId` owned by exactly
//! one statement of the test case, not at a position. Inserting or removing
//! statements renumbers positions inside the `TestCase` index, but never
//! touches the references themselves, so every reference a statement holds
//! stays valid across edits that do not remove its defining statement.
//!
//! Composite references form a chain back to a local slot:
//!
//! ```text
//! arr0[3]          ArrayIndex { array: Local(arr0), index: 3 }
//! foo0.bar         Field { field: bar, source: Some(Local(foo0)) }
//! foo0.items[1]    ArrayIndex { array: Field { .. Local(foo0) }, index: 1 }
//! Config.DEFAULT   Field { field: DEFAULT, source: None }
//! ```
//!
//! The chain is acyclic by construction (each link is boxed and owned) and its
//! depth is bounded by the test case when the reference is inserted.
//!
//! The declared type of a reference is *not* stored here. It is resolved
//! through the owning test case so that narrowing a slot's type is visible to
//! every reference built on top of it.

use std::fmt;

use crate::catalog::CallableSite;

/// Identity of a statement's return value.
///
/// Slots are allocated by a `TestCase` and never reused within it. A clone of
/// a test case keeps the same slot numbers, which is what makes references
/// held by cloned statements resolve into the clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    pub fn new(raw: u64) -> Self {
        SlotId(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// An element of an array variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayIndexRef {
    pub array: Box<VariableReference>,
    pub index: usize,
}

/// A field, either of an object (`source` is set) or static.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub field: CallableSite,
    pub source: Option<Box<VariableReference>>,
}

/// A reference to a value inside a test case.
///
/// `PartialEq` is *identity*: two references are equal iff they denote the
/// same slot through the same chain. Semantic equivalence across different
/// test cases (same position, same type) is answered by
/// [`TestCase::same_variable`](crate::testcase::TestCase::same_variable).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableReference {
    Local(SlotId),
    ArrayIndex(ArrayIndexRef),
    Field(FieldRef),
}

impl VariableReference {
    pub fn array_index(array: VariableReference, index: usize) -> Self {
        VariableReference::ArrayIndex(ArrayIndexRef {
            array: Box::new(array),
            index,
        })
    }

    pub fn field(field: CallableSite, source: Option<VariableReference>) -> Self {
        VariableReference::Field(FieldRef {
            field,
            source: source.map(Box::new),
        })
    }

    pub fn as_local(&self) -> Option<SlotId> {
        match self {
            VariableReference::Local(slot) => Some(*slot),
            _ => None,
        }
    }

    pub fn is_array_index(&self) -> bool {
        matches!(self, VariableReference::ArrayIndex(_))
    }

    pub fn is_field(&self) -> bool {
        matches!(self, VariableReference::Field(_))
    }

    /// The back-edge of a composite reference: the array an index refers into,
    /// or the object a field is read from.
    pub fn additional_reference(&self) -> Option<&VariableReference> {
        match self {
            VariableReference::Local(_) => None,
            VariableReference::ArrayIndex(index_ref) => Some(&index_ref.array),
            VariableReference::Field(field_ref) => field_ref.source.as_deref(),
        }
    }

    /// The local slot at the end of the chain. Static fields have none.
    pub fn root_slot(&self) -> Option<SlotId> {
        match self {
            VariableReference::Local(slot) => Some(*slot),
            VariableReference::ArrayIndex(index_ref) => index_ref.array.root_slot(),
            VariableReference::Field(field_ref) => {
                field_ref.source.as_ref().and_then(|source| source.root_slot())
            }
        }
    }

    /// Number of composite links before the root.
    pub fn depth(&self) -> usize {
        match self.additional_reference() {
            Some(next) => 1 + next.depth(),
            None => usize::from(!matches!(self, VariableReference::Local(_))),
        }
    }

    /// Every slot mentioned anywhere in the chain.
    pub fn slots(&self) -> Vec<SlotId> {
        let mut out = Vec::new();
        self.collect_slots(&mut out);
        out
    }

    fn collect_slots(&self, out: &mut Vec<SlotId>) {
        match self {
            VariableReference::Local(slot) => out.push(*slot),
            VariableReference::ArrayIndex(index_ref) => index_ref.array.collect_slots(out),
            VariableReference::Field(field_ref) => {
                if let Some(source) = &field_ref.source {
                    source.collect_slots(out);
                }
            }
        }
    }

    pub fn mentions(&self, slot: SlotId) -> bool {
        match self {
            VariableReference::Local(own) => *own == slot,
            VariableReference::ArrayIndex(index_ref) => index_ref.array.mentions(slot),
            VariableReference::Field(field_ref) => field_ref
                .source
                .as_ref()
                .map_or(false, |source| source.mentions(slot)),
        }
    }

    /// Whether `other` is this reference or appears in its chain.
    pub fn contains(&self, other: &VariableReference) -> bool {
        self == other
            || self
                .additional_reference()
                .map_or(false, |next| next.contains(other))
    }

    /// Substitute every occurrence of `old` in the chain by `new`.
    ///
    /// Returns whether anything was replaced.
    pub fn replace(&mut self, old: &VariableReference, new: &VariableReference) -> bool {
        if self == old {
            *self = new.clone();
            return true;
        }
        match self {
            VariableReference::Local(_) => false,
            VariableReference::ArrayIndex(index_ref) => index_ref.array.replace(old, new),
            VariableReference::Field(field_ref) => match &mut field_ref.source {
                Some(source) => source.replace(old, new),
                None => false,
            },
        }
    }
}

impl fmt::Display for VariableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableReference::Local(slot) => write!(f, "{}", slot),
            VariableReference::ArrayIndex(index_ref) => write!(f, "{}[{}]", index_ref.array, index_ref.index),
            VariableReference::Field(field_ref) => match &field_ref.source {
                Some(source) => write!(f, "{}.{}", source, field_ref.field.name()),
                None => write!(f, "{}.{}", field_ref.field.declaring_type(), field_ref.field.name()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(raw: u64) -> VariableReference {
        VariableReference::Local(SlotId::new(raw))
    }

    #[test]
    fn test_chain_navigation() {
        let nested = VariableReference::array_index(VariableReference::array_index(local(3), 1), 2);
        assert_eq!(nested.root_slot(), Some(SlotId::new(3)));
        assert_eq!(nested.depth(), 2);
        assert_eq!(local(3).depth(), 0);
        assert!(nested.mentions(SlotId::new(3)));
        assert!(!nested.mentions(SlotId::new(4)));
        assert!(nested.contains(&VariableReference::array_index(local(3), 1)));
        assert_eq!(
            nested.additional_reference(),
            Some(&VariableReference::array_index(local(3), 1))
        );
    }

    #[test]
    fn test_replace_rewrites_the_chain_root() {
        let mut element = VariableReference::array_index(local(1), 0);
        assert!(element.replace(&local(1), &local(2)));
        assert_eq!(element, VariableReference::array_index(local(2), 0));
        assert!(!element.replace(&local(1), &local(5)));
    }

    #[test]
    fn test_identity_equality() {
        assert_eq!(local(1), local(1));
        assert_ne!(local(1), local(2));
        assert_ne!(
            VariableReference::array_index(local(1), 0),
            VariableReference::array_index(local(1), 1)
        );
    }
}
