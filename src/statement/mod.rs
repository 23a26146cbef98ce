//! Statements of a test case
//!
//! A `Statement` is one step of a test: a constructor call, a method call, a
//! field read, a literal, an array creation, an element or field assignment,
//! or an explicit `null`. Every statement owns exactly one slot, its return
//! value. Statements reference earlier values only through
//! [`VariableReference`]s, and the only structural edits they support are the
//! ones the owning [`TestCase`](crate::testcase::TestCase) needs to keep its
//! invariants: replacing one reference by another and remapping slots.
//!
//! Assignment statements (`AssignIndex`, `AssignField`) still own a slot: it
//! holds the assigned value and is typed by the assigned location, so reading
//! the statement's return value is equivalent to reading the location right
//! after the write.

mod literal;

pub use literal::LiteralValue;

use std::fmt;

use crate::catalog::CallableSite;
use crate::runtime::{ArrayHandle, Scope, Thrown, Value};
use crate::trace::ExecutionTracer;
use crate::types::TypeRef;
use crate::variable::{ArrayIndexRef, FieldRef, SlotId, VariableReference};

/// An observation attached to a statement (e.g. an expected return value).
///
/// The engine treats assertions as opaque payload: they are carried through
/// cloning, copying and reference replacement, but never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assertion {
    pub description: String,
}

impl Assertion {
    pub fn new(description: impl Into<String>) -> Self {
        Assertion {
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    NewInstance {
        constructor: CallableSite,
        args: Vec<VariableReference>,
    },
    Call {
        method: CallableSite,
        receiver: Option<VariableReference>,
        args: Vec<VariableReference>,
    },
    ReadField {
        field: CallableSite,
        source: Option<VariableReference>,
    },
    Literal(LiteralValue),
    NewArray {
        element_type: TypeRef,
        length: usize,
    },
    AssignIndex {
        target: ArrayIndexRef,
        value: VariableReference,
    },
    AssignField {
        target: FieldRef,
        value: VariableReference,
    },
    NullLiteral(TypeRef),
}

impl StatementKind {
    pub fn name(&self) -> &'static str {
        match self {
            StatementKind::NewInstance { .. } => "new-instance",
            StatementKind::Call { .. } => "call",
            StatementKind::ReadField { .. } => "read-field",
            StatementKind::Literal(_) => "literal",
            StatementKind::NewArray { .. } => "new-array",
            StatementKind::AssignIndex { .. } => "assign-index",
            StatementKind::AssignField { .. } => "assign-field",
            StatementKind::NullLiteral(_) => "null",
        }
    }

    /// References read by the statement, including the chain roots of
    /// assignment targets.
    pub fn variables_read(&self) -> Vec<&VariableReference> {
        match self {
            StatementKind::NewInstance { args, .. } => args.iter().collect(),
            StatementKind::Call { receiver, args, .. } => receiver.iter().chain(args.iter()).collect(),
            StatementKind::ReadField { source, .. } => source.iter().collect(),
            StatementKind::AssignIndex { target, value } => vec![target.array.as_ref(), value],
            StatementKind::AssignField { target, value } => {
                target.source.as_deref().into_iter().chain(std::iter::once(value)).collect()
            }
            StatementKind::Literal(_) | StatementKind::NewArray { .. } | StatementKind::NullLiteral(_) => {
                Vec::new()
            }
        }
    }

    fn variables_read_mut(&mut self) -> Vec<&mut VariableReference> {
        match self {
            StatementKind::NewInstance { args, .. } => args.iter_mut().collect(),
            StatementKind::Call { receiver, args, .. } => receiver.iter_mut().chain(args.iter_mut()).collect(),
            StatementKind::ReadField { source, .. } => source.iter_mut().collect(),
            StatementKind::AssignIndex { target, value } => vec![target.array.as_mut(), value],
            StatementKind::AssignField { target, value } => target
                .source
                .as_deref_mut()
                .into_iter()
                .chain(std::iter::once(value))
                .collect(),
            StatementKind::Literal(_) | StatementKind::NewArray { .. } | StatementKind::NullLiteral(_) => {
                Vec::new()
            }
        }
    }

    /// Replace every read of `old` by `new`. Returns whether anything changed.
    pub fn replace(&mut self, old: &VariableReference, new: &VariableReference) -> bool {
        let mut changed = false;
        for var in self.variables_read_mut() {
            changed |= var.replace(old, new);
        }
        changed
    }

    pub fn callable_site(&self) -> Option<&CallableSite> {
        match self {
            StatementKind::NewInstance { constructor, .. } => Some(constructor),
            StatementKind::Call { method, .. } => Some(method),
            StatementKind::ReadField { field, .. } => Some(field),
            StatementKind::AssignField { target, .. } => Some(&target.field),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    slot: SlotId,
    return_type: TypeRef,
    kind: StatementKind,
    assertions: Vec<Assertion>,
}

fn resolve_all(scope: &Scope, vars: &[VariableReference], tracer: &ExecutionTracer) -> Result<Vec<Value>, Thrown> {
    vars.iter().map(|var| scope.resolve(var, tracer)).collect()
}

fn resolve_receiver(
    scope: &Scope,
    receiver: Option<&VariableReference>,
    site: &CallableSite,
    tracer: &ExecutionTracer,
) -> Result<Option<Value>, Thrown> {
    match receiver {
        Some(var) => {
            let value = scope.resolve(var, tracer)?;
            if value.is_null() {
                return Err(Thrown::NullDereference(format!("{} on null receiver", site)));
            }
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

impl Statement {
    pub(crate) fn new(slot: SlotId, kind: StatementKind, return_type: TypeRef) -> Self {
        Statement {
            slot,
            return_type,
            kind,
            assertions: Vec::new(),
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    pub(crate) fn set_kind(&mut self, kind: StatementKind, return_type: TypeRef) {
        self.kind = kind;
        self.return_type = return_type;
    }

    /// Declared type of the return value.
    pub fn return_type(&self) -> &TypeRef {
        &self.return_type
    }

    pub(crate) fn set_return_type(&mut self, ty: TypeRef) {
        self.return_type = ty;
    }

    /// The value this statement defines.
    pub fn return_value(&self) -> VariableReference {
        VariableReference::Local(self.slot)
    }

    /// The location the statement writes: the assigned element or field for
    /// assignments, otherwise the return value.
    pub fn target(&self) -> VariableReference {
        match &self.kind {
            StatementKind::AssignIndex { target, .. } => VariableReference::ArrayIndex(target.clone()),
            StatementKind::AssignField { target, .. } => VariableReference::Field(target.clone()),
            _ => self.return_value(),
        }
    }

    pub fn is_assignment(&self) -> bool {
        matches!(self.kind, StatementKind::AssignIndex { .. } | StatementKind::AssignField { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, StatementKind::Literal(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, StatementKind::NullLiteral(_))
    }

    pub fn is_void(&self) -> bool {
        self.return_type.is_void()
    }

    pub fn literal(&self) -> Option<&LiteralValue> {
        match &self.kind {
            StatementKind::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    pub(crate) fn literal_mut(&mut self) -> Option<&mut LiteralValue> {
        match &mut self.kind {
            StatementKind::Literal(literal) => Some(literal),
            _ => None,
        }
    }

    pub fn callable_site(&self) -> Option<&CallableSite> {
        self.kind.callable_site()
    }

    pub fn variables_read(&self) -> Vec<&VariableReference> {
        self.kind.variables_read()
    }

    /// Whether `var` is read by this statement, directly or as part of a
    /// composite reference.
    pub fn references(&self, var: &VariableReference) -> bool {
        self.kind.variables_read().into_iter().any(|read| read.contains(var))
    }

    pub fn mentions_slot(&self, slot: SlotId) -> bool {
        self.kind.variables_read().into_iter().any(|read| read.mentions(slot))
    }

    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    pub fn add_assertion(&mut self, assertion: Assertion) {
        self.assertions.push(assertion);
    }

    pub fn clear_assertions(&mut self) {
        self.assertions.clear();
    }

    /// Run the statement against `scope`, binding its return value.
    pub fn execute(&self, scope: &mut Scope, tracer: &ExecutionTracer) -> Result<(), Thrown> {
        let value = match &self.kind {
            StatementKind::NewInstance { constructor, args } => {
                let args = resolve_all(scope, args, tracer)?;
                constructor.body().invoke(None, &args, tracer)?
            }
            StatementKind::Call { method, receiver, args } => {
                let receiver = resolve_receiver(scope, receiver.as_ref(), method, tracer)?;
                let args = resolve_all(scope, args, tracer)?;
                method.body().invoke(receiver.as_ref(), &args, tracer)?
            }
            StatementKind::ReadField { field, source } => {
                let source = resolve_receiver(scope, source.as_ref(), field, tracer)?;
                field.body().invoke(source.as_ref(), &[], tracer)?
            }
            StatementKind::Literal(literal) => literal.to_value(),
            StatementKind::NewArray { element_type, length } => {
                Value::Array(ArrayHandle::new(element_type.clone(), *length))
            }
            StatementKind::AssignIndex { target, value } => {
                let value = scope.resolve(value, tracer)?;
                scope.assign(&VariableReference::ArrayIndex(target.clone()), value.clone(), tracer)?;
                value
            }
            StatementKind::AssignField { target, value } => {
                let value = scope.resolve(value, tracer)?;
                scope.assign(&VariableReference::Field(target.clone()), value.clone(), tracer)?;
                value
            }
            StatementKind::NullLiteral(_) => Value::Null,
        };
        scope.bind(self.slot, value);
        Ok(())
    }

    /// Render as a line of Java-like code, naming variables through `name`.
    pub fn to_code(&self, name: &dyn Fn(&VariableReference) -> String) -> String {
        let declare = |rhs: String| {
            if self.return_type.is_void() {
                format!("{};", rhs)
            } else {
                format!("{} {} = {};", self.return_type.simple_name(), name(&self.return_value()), rhs)
            }
        };
        let arguments = |args: &[VariableReference]| args.iter().map(|a| name(a)).collect::<Vec<_>>().join(", ");
        let owner = |site: &CallableSite, receiver: &Option<VariableReference>| match receiver {
            Some(var) => name(var),
            None => site.declaring_type().simple_name(),
        };
        match &self.kind {
            StatementKind::NewInstance { constructor, args } => declare(format!(
                "new {}({})",
                constructor.declaring_type().simple_name(),
                arguments(args)
            )),
            StatementKind::Call { method, receiver, args } => declare(format!(
                "{}.{}({})",
                owner(method, receiver),
                method.name(),
                arguments(args)
            )),
            StatementKind::ReadField { field, source } => {
                declare(format!("{}.{}", owner(field, source), field.name()))
            }
            StatementKind::Literal(literal) => declare(literal.to_code()),
            StatementKind::NewArray { element_type, length } => {
                declare(format!("new {}[{}]", element_type.simple_name(), length))
            }
            StatementKind::AssignIndex { value, .. } | StatementKind::AssignField { value, .. } => {
                format!("{} = {};", name(&self.target()), name(value))
            }
            StatementKind::NullLiteral(ty) => declare(format!("({}) null", ty.simple_name())),
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code(&|var: &VariableReference| var.to_string()))
    }
}
