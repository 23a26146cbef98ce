//! Test cases
//!
//! A `TestCase` is an ordered sequence of statements together with an index
//! from slot to position. The index is the only place positions live:
//! statements and references hold slots, and every structural edit
//! (`insert`, `remove`, `set_statement`) renumbers the index in one pass.
//!
//! ## Invariants
//!
//! A valid test case satisfies, after every public operation:
//!
//! 1. every statement's return value resolves to that statement's position;
//! 2. every reference read by the statement at position `i` is rooted in a
//!    statement at a position `< i`;
//! 3. no statement references a slot that is not in the test case;
//! 4. composite references are at most `max_reference_chain` links deep and
//!    index into arrays inside their declared length.
//!
//! Operations that would break an invariant fail with a `TestCaseError` and
//! leave the test case untouched.
//!
//! ## Example
//!
//! ```rust
//! use suitegen::statement::{LiteralValue, StatementKind};
//! use suitegen::testcase::TestCase;
//!
//! let mut test = TestCase::new();
//! let five = test.add(StatementKind::Literal(LiteralValue::Int(5))).unwrap();
//! assert_eq!(test.position(&five).unwrap(), 0);
//! assert!(test.is_valid());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};

use byteorder::{BigEndian, WriteBytesExt};
use log::trace;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::statement::{LiteralValue, Statement, StatementKind};
use crate::types::TypeRef;
use crate::variable::{ArrayIndexRef, FieldRef, SlotId, VariableReference};

/// Default bound on reference chain depth.
pub const DEFAULT_MAX_REFERENCE_CHAIN: usize = 8;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TestCaseError {
    #[error("reference {0} points to a statement that is not part of the test case")]
    DetachedReference(String),

    #[error("statement at position {position} reads {variable}, which is defined at position {defined_at}")]
    ForwardReference {
        position: usize,
        variable: String,
        defined_at: usize,
    },

    #[error("position {position} is out of range for a test case of length {length}")]
    InvalidPosition { position: usize, length: usize },

    #[error("reference {variable} is {depth} links deep, the limit is {limit}")]
    ReferenceChainTooDeep {
        variable: String,
        depth: usize,
        limit: usize,
    },

    #[error("cannot change type of {variable} from {declared} to {requested}: not a narrowing")]
    TypeWidening {
        variable: String,
        declared: String,
        requested: String,
    },

    #[error("{0} is not an array")]
    NotAnArray(String),

    #[error("invalid statement: {0}")]
    InvalidStatement(String),
}

pub type TestCaseResult<T> = Result<T, TestCaseError>;

#[derive(Debug, Clone)]
pub struct TestCase {
    statements: Vec<Statement>,
    positions: HashMap<SlotId, usize>,
    next_slot: u64,
    max_reference_chain: usize,
}

impl Default for TestCase {
    fn default() -> Self {
        Self::with_reference_chain_limit(DEFAULT_MAX_REFERENCE_CHAIN)
    }
}

impl TestCase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference_chain_limit(max_reference_chain: usize) -> Self {
        TestCase {
            statements: Vec::new(),
            positions: HashMap::new(),
            next_slot: 0,
            max_reference_chain,
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn statement(&self, position: usize) -> Option<&Statement> {
        self.statements.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Statement> {
        self.statements.iter()
    }

    pub fn max_reference_chain(&self) -> usize {
        self.max_reference_chain
    }

    fn statement_at(&self, position: usize) -> TestCaseResult<&Statement> {
        self.statements.get(position).ok_or(TestCaseError::InvalidPosition {
            position,
            length: self.statements.len(),
        })
    }

    fn reindex_from(&mut self, start: usize) {
        for (position, statement) in self.statements.iter().enumerate().skip(start) {
            self.positions.insert(statement.slot(), position);
        }
    }

    fn allocate_slot(&mut self) -> SlotId {
        let slot = SlotId::new(self.next_slot);
        self.next_slot += 1;
        slot
    }

    /// Position of the statement owning `slot`.
    pub fn slot_position(&self, slot: SlotId) -> TestCaseResult<usize> {
        self.positions
            .get(&slot)
            .copied()
            .ok_or_else(|| TestCaseError::DetachedReference(slot.to_string()))
    }

    pub fn contains_slot(&self, slot: SlotId) -> bool {
        self.positions.contains_key(&slot)
    }

    /// Position of the statement defining the root of `var`.
    ///
    /// Static field references have no defining statement and are reported as
    /// position 0, the earliest point they can be used.
    pub fn position(&self, var: &VariableReference) -> TestCaseResult<usize> {
        match var.root_slot() {
            Some(slot) => self.slot_position(slot),
            None => Ok(0),
        }
    }

    /// The value defined by the statement at `position`.
    pub fn return_value(&self, position: usize) -> TestCaseResult<VariableReference> {
        Ok(self.statement_at(position)?.return_value())
    }

    /// Declared type of a reference.
    pub fn type_of(&self, var: &VariableReference) -> TestCaseResult<TypeRef> {
        match var {
            VariableReference::Local(slot) => {
                let position = self.slot_position(*slot)?;
                Ok(self.statements[position].return_type().clone())
            }
            VariableReference::ArrayIndex(index_ref) => {
                let array_type = self.type_of(&index_ref.array)?;
                array_type
                    .component_type()
                    .cloned()
                    .ok_or_else(|| TestCaseError::NotAnArray(index_ref.array.to_string()))
            }
            VariableReference::Field(field_ref) => Ok(field_ref.field.return_type().clone()),
        }
    }

    /// Declared length of an array variable created by a `NewArray` statement.
    pub fn array_length(&self, var: &VariableReference) -> Option<usize> {
        let slot = var.as_local()?;
        let position = self.positions.get(&slot)?;
        match self.statements[*position].kind() {
            StatementKind::NewArray { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// For each index of the array defined at `array`, the position of the
    /// statement that most recently assigned it.
    pub fn array_assignments(&self, array: &VariableReference) -> BTreeMap<usize, usize> {
        let mut writers = BTreeMap::new();
        for (position, statement) in self.statements.iter().enumerate() {
            if let StatementKind::AssignIndex { target, .. } = statement.kind() {
                if target.array.as_ref() == array {
                    writers.insert(target.index, position);
                }
            }
        }
        writers
    }

    /// Highest index of `array` that any statement reads or writes.
    pub fn max_index_used(&self, array: &VariableReference) -> Option<usize> {
        let mut max = None;
        for statement in &self.statements {
            let own_target = statement.target();
            let mut targets = statement.variables_read();
            targets.push(&own_target);
            for var in targets {
                let mut current = Some(var);
                while let Some(link) = current {
                    if let VariableReference::ArrayIndex(index_ref) = link {
                        if index_ref.array.as_ref() == array {
                            max = max.max(Some(index_ref.index));
                        }
                    }
                    current = link.additional_reference();
                }
            }
        }
        max
    }

    fn check_reference(&self, var: &VariableReference, position: usize) -> TestCaseResult<()> {
        let depth = var.depth();
        if depth > self.max_reference_chain {
            return Err(TestCaseError::ReferenceChainTooDeep {
                variable: var.to_string(),
                depth,
                limit: self.max_reference_chain,
            });
        }
        for slot in var.slots() {
            let defined_at = self.slot_position(slot)?;
            if defined_at >= position {
                return Err(TestCaseError::ForwardReference {
                    position,
                    variable: var.to_string(),
                    defined_at,
                });
            }
        }
        let mut link = Some(var);
        while let Some(current) = link {
            match current {
                VariableReference::ArrayIndex(index_ref) => {
                    let array_type = self.type_of(&index_ref.array)?;
                    if !array_type.is_array() {
                        return Err(TestCaseError::NotAnArray(index_ref.array.to_string()));
                    }
                    if let Some(length) = self.array_length(&index_ref.array) {
                        if index_ref.index >= length {
                            return Err(TestCaseError::InvalidStatement(format!(
                                "{} indexes past the array length {}",
                                current, length
                            )));
                        }
                    }
                }
                VariableReference::Field(field_ref) => {
                    self.check_field_source(field_ref)?;
                }
                VariableReference::Local(_) => {}
            }
            link = current.additional_reference();
        }
        Ok(())
    }

    fn check_field_source(&self, field_ref: &FieldRef) -> TestCaseResult<()> {
        let field = &field_ref.field;
        if !field.is_field() {
            return Err(TestCaseError::InvalidStatement(format!("{} is not a field", field)));
        }
        match &field_ref.source {
            Some(source) => self.check_receiver(source, field.declaring_type()),
            None if field.is_static() => Ok(()),
            None => Err(TestCaseError::InvalidStatement(format!("{} needs a source object", field))),
        }
    }

    fn check_receiver(&self, receiver: &VariableReference, declaring: &TypeRef) -> TestCaseResult<()> {
        let ty = self.type_of(receiver)?;
        if declaring.is_assignable_from(&ty) {
            Ok(())
        } else {
            Err(TestCaseError::InvalidStatement(format!(
                "{} of type {} cannot be used as {}",
                receiver, ty, declaring
            )))
        }
    }

    fn check_argument(&self, arg: &VariableReference, expected: &TypeRef) -> TestCaseResult<()> {
        let ty = self.type_of(arg)?;
        if expected.is_assignable_from(&ty) || (self.is_null_reference(arg) && expected.is_nullable()) {
            Ok(())
        } else {
            Err(TestCaseError::InvalidStatement(format!(
                "argument {} of type {} is not assignable to {}",
                arg, ty, expected
            )))
        }
    }

    fn check_arguments(&self, args: &[VariableReference], expected: &[TypeRef]) -> TestCaseResult<()> {
        if args.len() != expected.len() {
            return Err(TestCaseError::InvalidStatement(format!(
                "expected {} arguments, got {}",
                expected.len(),
                args.len()
            )));
        }
        args.iter()
            .zip(expected)
            .try_for_each(|(arg, ty)| self.check_argument(arg, ty))
    }

    /// Validate `kind` as the statement at `position` and compute its return type.
    fn check_statement(&self, kind: &StatementKind, position: usize) -> TestCaseResult<TypeRef> {
        for var in kind.variables_read() {
            self.check_reference(var, position)?;
        }
        match kind {
            StatementKind::NewInstance { constructor, args } => {
                if !constructor.is_constructor() {
                    return Err(TestCaseError::InvalidStatement(format!("{} is not a constructor", constructor)));
                }
                self.check_arguments(args, constructor.parameter_types())?;
                Ok(constructor.return_type().clone())
            }
            StatementKind::Call { method, receiver, args } => {
                if !method.is_method() {
                    return Err(TestCaseError::InvalidStatement(format!("{} is not a method", method)));
                }
                match (receiver, method.needs_receiver()) {
                    (Some(receiver), true) => self.check_receiver(receiver, method.declaring_type())?,
                    (None, false) => {}
                    (Some(_), false) => {
                        return Err(TestCaseError::InvalidStatement(format!("{} is static", method)))
                    }
                    (None, true) => {
                        return Err(TestCaseError::InvalidStatement(format!("{} needs a receiver", method)))
                    }
                }
                self.check_arguments(args, method.parameter_types())?;
                Ok(method.return_type().clone())
            }
            StatementKind::ReadField { field, source } => {
                self.check_field_source(&FieldRef {
                    field: field.clone(),
                    source: source.clone().map(Box::new),
                })?;
                Ok(field.return_type().clone())
            }
            StatementKind::Literal(literal) => Ok(literal.type_ref()),
            StatementKind::NewArray { element_type, .. } => {
                if element_type.is_void() {
                    return Err(TestCaseError::InvalidStatement("array of void".to_string()));
                }
                Ok(TypeRef::array_of(element_type.clone()))
            }
            StatementKind::AssignIndex { target, value } => {
                let target_ref = VariableReference::ArrayIndex(target.clone());
                self.check_reference(&target_ref, position)?;
                let component = self.type_of(&target_ref)?;
                self.check_argument(value, &component)?;
                Ok(component)
            }
            StatementKind::AssignField { target, value } => {
                if target.field.is_final() {
                    return Err(TestCaseError::InvalidStatement(format!("{} is final", target.field)));
                }
                self.check_field_source(target)?;
                let field_type = target.field.return_type().clone();
                self.check_argument(value, &field_type)?;
                Ok(field_type)
            }
            StatementKind::NullLiteral(ty) => {
                if ty.is_nullable() {
                    Ok(ty.clone())
                } else {
                    Err(TestCaseError::InvalidStatement(format!("{} cannot be null", ty)))
                }
            }
        }
    }

    /// Insert a statement at `position`, shifting later statements right.
    ///
    /// Every reference the statement reads must be defined strictly before
    /// `position`. Returns the new statement's return value.
    pub fn insert(&mut self, kind: StatementKind, position: usize) -> TestCaseResult<VariableReference> {
        if position > self.statements.len() {
            return Err(TestCaseError::InvalidPosition {
                position,
                length: self.statements.len(),
            });
        }
        let return_type = self.check_statement(&kind, position)?;
        let slot = self.allocate_slot();
        trace!("insert {} at {}", kind.name(), position);
        self.statements.insert(position, Statement::new(slot, kind, return_type));
        self.reindex_from(position);
        Ok(VariableReference::Local(slot))
    }

    /// Append a statement.
    pub fn add(&mut self, kind: StatementKind) -> TestCaseResult<VariableReference> {
        let end = self.statements.len();
        self.insert(kind, end)
    }

    /// Replace the statement at `position`, keeping its slot so that every
    /// later reference to it stays valid. Unless the old statement was void,
    /// the new return type must be assignable to the old one.
    pub fn set_statement(&mut self, position: usize, kind: StatementKind) -> TestCaseResult<VariableReference> {
        let current = self.statement_at(position)?;
        let old_type = current.return_type().clone();
        let same_site = kind.callable_site().is_some() && kind.callable_site() == current.callable_site();
        let new_type = self.check_statement(&kind, position)?;
        let declared = if old_type.is_void() || old_type == new_type || old_type.is_assignable_from(&new_type) {
            new_type
        } else if same_site && new_type.is_assignable_from(&old_type) {
            // Same site with different operands: keep a narrowed declaration.
            old_type
        } else {
            return Err(TestCaseError::TypeWidening {
                variable: self.statements[position].return_value().to_string(),
                declared: old_type.to_string(),
                requested: new_type.to_string(),
            });
        };
        let statement = &mut self.statements[position];
        statement.set_kind(kind, declared);
        Ok(statement.return_value())
    }

    /// Positions of all statements that (transitively) depend on the
    /// statement at `position`, including `position` itself, ascending.
    pub fn dependents(&self, position: usize) -> TestCaseResult<Vec<usize>> {
        self.statement_at(position)?;
        let mut removed: BTreeSet<SlotId> = BTreeSet::new();
        removed.insert(self.statements[position].slot());
        let mut positions = vec![position];
        for (index, statement) in self.statements.iter().enumerate().skip(position + 1) {
            if statement.variables_read().iter().any(|var| var.slots().iter().any(|s| removed.contains(s))) {
                removed.insert(statement.slot());
                positions.push(index);
            }
        }
        Ok(positions)
    }

    /// Remove the statement at `position` together with every statement that
    /// depends on it. Returns the removed positions (as they were before the
    /// removal, ascending).
    pub fn remove(&mut self, position: usize) -> TestCaseResult<Vec<usize>> {
        let doomed = self.dependents(position)?;
        for &index in doomed.iter().rev() {
            let statement = self.statements.remove(index);
            self.positions.remove(&statement.slot());
        }
        self.reindex_from(position);
        trace!("removed {} statement(s) starting at {}", doomed.len(), position);
        Ok(doomed)
    }

    /// Drop every statement at or after `length`.
    pub fn chop(&mut self, length: usize) {
        while self.statements.len() > length {
            if let Some(statement) = self.statements.pop() {
                self.positions.remove(&statement.slot());
            }
        }
    }

    /// Positions of statements after the definition of `var` that read it.
    pub fn statements_referencing(&self, var: &VariableReference) -> Vec<usize> {
        let start = self.position(var).map(|p| p + 1).unwrap_or(0);
        self.statements
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(_, statement)| statement.references(var))
            .map(|(position, _)| position)
            .collect()
    }

    /// Whether any statement reads `var`.
    pub fn has_references(&self, var: &VariableReference) -> bool {
        !self.statements_referencing(var).is_empty()
    }

    /// Whether `var` is a reference defined by an explicit `null`.
    pub fn is_null_reference(&self, var: &VariableReference) -> bool {
        var.as_local()
            .and_then(|slot| self.positions.get(&slot))
            .map_or(false, |&position| self.statements[position].is_null())
    }

    /// Every variable visible before `position` whose declared type is
    /// assignable to `ty`. Arrays with an assignable component type
    /// contribute one `ArrayIndex` reference per index. Void values and the
    /// slots of assignment statements are not candidates.
    pub fn objects_of_type(&self, ty: &TypeRef, position: usize) -> Vec<VariableReference> {
        let mut objects = Vec::new();
        for statement in self.statements.iter().take(position) {
            if statement.is_void() || statement.is_assignment() {
                continue;
            }
            let var = statement.return_value();
            let declared = statement.return_type();
            if ty.is_assignable_from(declared) {
                objects.push(var.clone());
            }
            if let (Some(component), Some(length)) = (declared.component_type(), self.array_length(&var)) {
                if ty.is_assignable_from(component) && var.depth() < self.max_reference_chain {
                    objects.extend((0..length).map(|index| VariableReference::array_index(var.clone(), index)));
                }
            }
        }
        objects
    }

    /// Every non-void, non-assignment value defined before `position`.
    pub fn all_objects(&self, position: usize) -> Vec<VariableReference> {
        self.statements
            .iter()
            .take(position)
            .filter(|s| !s.is_void() && !s.is_assignment())
            .map(Statement::return_value)
            .collect()
    }

    pub fn has_object(&self, ty: &TypeRef, position: usize) -> bool {
        !self.objects_of_type(ty, position).is_empty()
    }

    pub fn random_object<R: Rng + ?Sized>(&self, ty: &TypeRef, position: usize, rng: &mut R) -> Option<VariableReference> {
        let objects = self.objects_of_type(ty, position);
        crate::randomness::choice(rng, &objects).cloned()
    }

    /// Like [`random_object`](Self::random_object), excluding explicit nulls
    /// and primitives.
    pub fn random_non_null_object<R: Rng + ?Sized>(
        &self,
        ty: &TypeRef,
        position: usize,
        rng: &mut R,
    ) -> Option<VariableReference> {
        let objects: Vec<_> = self
            .objects_of_type(ty, position)
            .into_iter()
            .filter(|var| !self.is_null_reference(var))
            .filter(|var| self.type_of(var).map_or(false, |t| !t.is_primitive()))
            .collect();
        crate::randomness::choice(rng, &objects).cloned()
    }

    /// Replace the declared type of `slot` by a narrower one, typically the
    /// dynamic class observed during execution.
    pub fn narrow_type(&mut self, slot: SlotId, ty: TypeRef) -> TestCaseResult<()> {
        let position = self.slot_position(slot)?;
        let statement = &mut self.statements[position];
        let declared = statement.return_type().clone();
        if declared == ty {
            return Ok(());
        }
        if statement.is_assignment() || !ty.narrows(&declared) {
            return Err(TestCaseError::TypeWidening {
                variable: statement.return_value().to_string(),
                declared: declared.to_string(),
                requested: ty.to_string(),
            });
        }
        statement.set_return_type(ty);
        Ok(())
    }

    /// Mutable access to the literal at `position`.
    ///
    /// Literal edits cannot affect references, so they are safe to perform in
    /// place.
    pub fn literal_mut(&mut self, position: usize) -> Option<&mut LiteralValue> {
        self.statements.get_mut(position).and_then(Statement::literal_mut)
    }

    /// Check all invariants, reporting the first violation.
    pub fn validate(&self) -> TestCaseResult<()> {
        if self.positions.len() != self.statements.len() {
            return Err(TestCaseError::InvalidStatement(format!(
                "index holds {} slots for {} statements",
                self.positions.len(),
                self.statements.len()
            )));
        }
        for (position, statement) in self.statements.iter().enumerate() {
            let indexed = self.slot_position(statement.slot())?;
            if indexed != position {
                return Err(TestCaseError::InvalidStatement(format!(
                    "{} is indexed at {} but stored at {}",
                    statement.slot(),
                    indexed,
                    position
                )));
            }
            let computed = self.check_statement(statement.kind(), position)?;
            let declared = statement.return_type();
            if !(declared == &computed || computed.is_assignable_from(declared)) {
                return Err(TestCaseError::InvalidStatement(format!(
                    "statement at {} declares {} but produces {}",
                    position, declared, computed
                )));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Whether `a` in `self` and `b` in `other` denote the same variable:
    /// defined at the same position, with the same declared type and the
    /// same chain shape.
    pub fn same_variable(&self, a: &VariableReference, other: &TestCase, b: &VariableReference) -> bool {
        let mut left = Vec::new();
        let mut right = Vec::new();
        self.encode_reference(a, &mut left) && other.encode_reference(b, &mut right) && left == right && {
            match (self.type_of(a), other.type_of(b)) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            }
        }
    }

    /// Whether the statement at `position` in `self` performs the same
    /// operation as the statement at `other_position` in `other`, with
    /// semantically equal operands.
    pub fn same_statement(&self, position: usize, other: &TestCase, other_position: usize) -> bool {
        match (self.statements.get(position), other.statements.get(other_position)) {
            (Some(a), Some(b)) => {
                let mut left = Vec::new();
                let mut right = Vec::new();
                self.encode_statement(a, &mut left) && other.encode_statement(b, &mut right) && left == right
            }
            _ => false,
        }
    }

    fn encode_reference(&self, var: &VariableReference, out: &mut Vec<u8>) -> bool {
        match var {
            VariableReference::Local(slot) => match self.positions.get(slot) {
                Some(&position) => {
                    out.push(b'L');
                    out.write_u32::<BigEndian>(position as u32).is_ok()
                }
                None => false,
            },
            VariableReference::ArrayIndex(index_ref) => {
                out.push(b'A');
                out.write_u32::<BigEndian>(index_ref.index as u32).is_ok() && self.encode_reference(&index_ref.array, out)
            }
            VariableReference::Field(field_ref) => {
                out.push(b'F');
                field_ref.field.encode_into(out);
                match &field_ref.source {
                    Some(source) => self.encode_reference(source, out),
                    None => {
                        out.push(0);
                        true
                    }
                }
            }
        }
    }

    fn encode_statement(&self, statement: &Statement, out: &mut Vec<u8>) -> bool {
        out.extend_from_slice(statement.kind().name().as_bytes());
        out.push(0);
        statement.return_type().encode_into(out);
        if let Some(site) = statement.callable_site() {
            site.encode_into(out);
        }
        match statement.kind() {
            StatementKind::Literal(literal) => literal.encode_into(out),
            StatementKind::NewArray { element_type, length } => {
                element_type.encode_into(out);
                if out.write_u32::<BigEndian>(*length as u32).is_err() {
                    return false;
                }
            }
            StatementKind::AssignIndex { target, .. } => {
                if !self.encode_reference(&VariableReference::ArrayIndex(target.clone()), out) {
                    return false;
                }
            }
            StatementKind::NullLiteral(ty) => ty.encode_into(out),
            _ => {}
        }
        let reads = statement.variables_read();
        if out.write_u16::<BigEndian>(reads.len() as u16).is_err() {
            return false;
        }
        reads.into_iter().all(|var| self.encode_reference(var, out))
    }

    /// Position-normalised byte encoding of the whole test case.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for statement in &self.statements {
            self.encode_statement(statement, &mut out);
            out.push(b';');
        }
        out
    }

    /// Structural identity: equal for test cases that are equal statement by
    /// statement, regardless of slot numbering.
    pub fn fingerprint(&self) -> [u8; 32] {
        let digest = Sha256::digest(self.encode());
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&digest);
        fingerprint
    }

    /// Readable, Java-like listing of the test case.
    pub fn to_code(&self) -> String {
        let mut names: HashMap<SlotId, String> = HashMap::new();
        let mut counters: HashMap<String, usize> = HashMap::new();
        for statement in &self.statements {
            let base = variable_base_name(statement.return_type());
            let counter = counters.entry(base.clone()).or_insert(0);
            names.insert(statement.slot(), format!("{}{}", base, counter));
            *counter += 1;
        }
        let name = |var: &VariableReference| render_reference(var, &names);
        self.statements
            .iter()
            .map(|statement| statement.to_code(&name))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn variable_base_name(ty: &TypeRef) -> String {
    let simple = match ty {
        TypeRef::Array(component) => format!("{}Array", component.simple_name().replace("[]", "Array")),
        other => other.simple_name(),
    };
    let mut chars = simple.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => "var".to_string(),
    }
}

fn render_reference(var: &VariableReference, names: &HashMap<SlotId, String>) -> String {
    match var {
        VariableReference::Local(slot) => names.get(slot).cloned().unwrap_or_else(|| slot.to_string()),
        VariableReference::ArrayIndex(ArrayIndexRef { array, index }) => {
            format!("{}[{}]", render_reference(array, names), index)
        }
        VariableReference::Field(FieldRef { field, source }) => match source {
            Some(source) => format!("{}.{}", render_reference(source, names), field.name()),
            None => format!("{}.{}", field.declaring_type().simple_name(), field.name()),
        },
    }
}

impl PartialEq for TestCase {
    fn eq(&self, other: &Self) -> bool {
        self.statements.len() == other.statements.len() && self.encode() == other.encode()
    }
}

impl Eq for TestCase {}

impl Hash for TestCase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_code())
    }
}

impl<'a> IntoIterator for &'a TestCase {
    type Item = &'a Statement;
    type IntoIter = std::slice::Iter<'a, Statement>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.iter()
    }
}
