//! Runtime values and variable bindings for a single execution
//!
//! A `Scope` maps every executed statement's slot to the `Value` it produced.
//! Arrays and objects are handles: copying a `Value::Array` shares the
//! underlying storage, so an element write through one variable is visible
//! through every other variable bound to the same array. A `Scope` is created
//! fresh for each execution and is never shared between two executions.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::trace::ExecutionTracer;
use crate::types::{ClassType, PrimitiveKind, TypeRef};
use crate::variable::{SlotId, VariableReference};

/// A failure raised by the code under test.
///
/// This is an observable outcome of execution, not an error of the engine:
/// it is stored per statement in the execution result and may itself be the
/// target of a fitness function.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Thrown {
    #[error("{type_name}: {message}")]
    Exception { type_name: String, message: String },

    #[error("panic in code under test: {0}")]
    Panic(String),

    #[error("execution timed out")]
    Timeout,

    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("null dereference: {0}")]
    NullDereference(String),
}

impl Thrown {
    pub fn exception(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Thrown::Exception {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Name used to group failures, e.g. for exception coverage goals.
    pub fn type_name(&self) -> &str {
        match self {
            Thrown::Exception { type_name, .. } => type_name,
            Thrown::Panic(_) => "Panic",
            Thrown::Timeout => "Timeout",
            Thrown::IndexOutOfBounds { .. } => "IndexOutOfBounds",
            Thrown::NullDereference(_) => "NullDereference",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Thrown::Timeout)
    }
}

fn lock_ignoring_poison<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared, mutable array storage.
#[derive(Clone)]
pub struct ArrayHandle {
    element_type: TypeRef,
    items: Arc<Mutex<Vec<Value>>>,
}

impl ArrayHandle {
    /// A new array whose slots hold the default value for `element_type`.
    pub fn new(element_type: TypeRef, length: usize) -> Self {
        let items = vec![Value::default_for(&element_type); length];
        ArrayHandle {
            element_type,
            items: Arc::new(Mutex::new(items)),
        }
    }

    pub fn element_type(&self) -> &TypeRef {
        &self.element_type
    }

    pub fn len(&self) -> usize {
        lock_ignoring_poison(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<Value, Thrown> {
        let items = lock_ignoring_poison(&self.items);
        items
            .get(index)
            .cloned()
            .ok_or(Thrown::IndexOutOfBounds {
                index,
                length: items.len(),
            })
    }

    pub fn set(&self, index: usize, value: Value) -> Result<(), Thrown> {
        let mut items = lock_ignoring_poison(&self.items);
        let length = items.len();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(Thrown::IndexOutOfBounds { index, length }),
        }
    }

    pub fn to_vec(&self) -> Vec<Value> {
        lock_ignoring_poison(&self.items).clone()
    }

    pub fn same_array(&self, other: &ArrayHandle) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }
}

impl fmt::Debug for ArrayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayHandle")
            .field("element_type", &self.element_type)
            .field("items", &self.to_vec())
            .finish()
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// An instance of a class of the program under test.
///
/// The state is opaque to the engine; only the callable site bodies that
/// created the object know how to interpret it.
#[derive(Clone)]
pub struct ObjectHandle {
    class: Arc<ClassType>,
    id: u64,
    state: Arc<Mutex<Box<dyn Any + Send>>>,
}

impl ObjectHandle {
    pub fn new<T: Any + Send>(class: Arc<ClassType>, state: T) -> Self {
        ObjectHandle {
            class,
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(Mutex::new(Box::new(state))),
        }
    }

    pub fn class(&self) -> &Arc<ClassType> {
        &self.class
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run `f` on the object's state if it has type `T`.
    pub fn with_state<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = lock_ignoring_poison(&self.state);
        guard.downcast_mut::<T>().map(f)
    }

    pub fn same_object(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class.name, self.id)
    }
}

/// A runtime value bound to a variable.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    /// Any integral kind, widened to 64 bits.
    Int(i64),
    /// Any floating kind, widened to 64 bits.
    Float(f64),
    Str(String),
    Array(ArrayHandle),
    Object(ObjectHandle),
}

impl Value {
    /// Zero value stored in freshly created array slots.
    pub fn default_for(ty: &TypeRef) -> Value {
        match ty {
            TypeRef::Primitive(PrimitiveKind::Boolean) => Value::Bool(false),
            TypeRef::Primitive(PrimitiveKind::Char) => Value::Char('\0'),
            TypeRef::Primitive(kind) if kind.is_floating() => Value::Float(0.0),
            TypeRef::Primitive(_) => Value::Int(0),
            _ => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Char(c) => Some(*c as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayHandle> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The runtime class of an object value, used for type narrowing.
    pub fn dynamic_type(&self) -> Option<TypeRef> {
        match self {
            Value::Object(object) => Some(TypeRef::Class(object.class.clone())),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.same_array(b),
            (Value::Object(a), Value::Object(b)) => a.same_object(b),
            _ => false,
        }
    }
}

/// Variable bindings of one execution.
#[derive(Debug, Default)]
pub struct Scope {
    values: HashMap<SlotId, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    pub fn bind(&mut self, slot: SlotId, value: Value) {
        self.values.insert(slot, value);
    }

    pub fn get(&self, slot: SlotId) -> Option<&Value> {
        self.values.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read the current value of a (possibly composite) reference.
    pub fn resolve(&self, var: &VariableReference, tracer: &ExecutionTracer) -> Result<Value, Thrown> {
        match var {
            VariableReference::Local(slot) => self.values.get(slot).cloned().ok_or_else(|| {
                Thrown::exception("UnboundVariable", format!("no value bound for {}", slot))
            }),
            VariableReference::ArrayIndex(index_ref) => {
                let array = self.resolve(&index_ref.array, tracer)?;
                match array {
                    Value::Array(handle) => handle.get(index_ref.index),
                    Value::Null => Err(Thrown::NullDereference(format!(
                        "array read at index {}",
                        index_ref.index
                    ))),
                    other => Err(Thrown::exception(
                        "ClassCast",
                        format!("{:?} is not an array", other),
                    )),
                }
            }
            VariableReference::Field(field_ref) => {
                let source = match &field_ref.source {
                    Some(source) => {
                        let value = self.resolve(source, tracer)?;
                        if value.is_null() {
                            return Err(Thrown::NullDereference(format!(
                                "read of field {}",
                                field_ref.field.name()
                            )));
                        }
                        Some(value)
                    }
                    None => None,
                };
                field_ref.field.body().invoke(source.as_ref(), &[], tracer)
            }
        }
    }

    /// Store `value` into the location a reference denotes.
    pub fn assign(
        &mut self,
        var: &VariableReference,
        value: Value,
        tracer: &ExecutionTracer,
    ) -> Result<(), Thrown> {
        match var {
            VariableReference::Local(slot) => {
                self.values.insert(*slot, value);
                Ok(())
            }
            VariableReference::ArrayIndex(index_ref) => match self.resolve(&index_ref.array, tracer)? {
                Value::Array(handle) => handle.set(index_ref.index, value),
                Value::Null => Err(Thrown::NullDereference(format!(
                    "array write at index {}",
                    index_ref.index
                ))),
                other => Err(Thrown::exception(
                    "ClassCast",
                    format!("{:?} is not an array", other),
                )),
            },
            VariableReference::Field(field_ref) => {
                let source = match &field_ref.source {
                    Some(source) => {
                        let target = self.resolve(source, tracer)?;
                        if target.is_null() {
                            return Err(Thrown::NullDereference(format!(
                                "write of field {}",
                                field_ref.field.name()
                            )));
                        }
                        Some(target)
                    }
                    None => None,
                };
                field_ref.field.body().write_field(source.as_ref(), value, tracer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_handles_share_storage() {
        let array = ArrayHandle::new(TypeRef::int(), 3);
        let alias = Value::Array(array.clone());
        array.set(1, Value::Int(7)).unwrap();
        assert_eq!(alias.as_array().unwrap().get(1).unwrap(), Value::Int(7));
        assert_eq!(array.get(0).unwrap(), Value::Int(0));
        assert_eq!(
            array.get(3),
            Err(Thrown::IndexOutOfBounds { index: 3, length: 3 })
        );
    }

    #[test]
    fn test_default_values() {
        assert_eq!(Value::default_for(&TypeRef::boolean()), Value::Bool(false));
        assert_eq!(Value::default_for(&TypeRef::double()), Value::Float(0.0));
        assert_eq!(Value::default_for(&TypeRef::String), Value::Null);
    }

    #[test]
    fn test_object_state_access() {
        let class = Arc::new(ClassType::new("Counter"));
        let object = ObjectHandle::new(class, 41i32);
        object.with_state(|count: &mut i32| *count += 1);
        assert_eq!(object.with_state(|count: &mut i32| *count), Some(42));
        assert_eq!(object.with_state(|_: &mut String| ()), None);
        assert!(object.same_object(&object.clone()));
    }

    #[test]
    fn test_resolve_local_and_index() {
        let tracer = ExecutionTracer::new();
        let mut scope = Scope::new();
        let array = ArrayHandle::new(TypeRef::int(), 2);
        scope.bind(SlotId::new(0), Value::Array(array));
        let index = VariableReference::array_index(VariableReference::Local(SlotId::new(0)), 1);
        scope.assign(&index, Value::Int(5), &tracer).unwrap();
        assert_eq!(scope.resolve(&index, &tracer).unwrap(), Value::Int(5));
        assert!(scope.resolve(&VariableReference::Local(SlotId::new(9)), &tracer).is_err());
    }
}
