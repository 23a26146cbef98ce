//! Callable sites and the generator catalog
//!
//! A `CallableSite` is a constructor, method or field of the program under
//! test, reduced to its signature plus a `SiteBody` that knows how to run it.
//! The core engine never introspects the program: everything it knows about
//! what can be called, and what produces which type, comes from a
//! `GeneratorCatalog`.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use suitegen::catalog::{CallableSite, StaticCatalog, SiteBody};
//! use suitegen::runtime::{ObjectHandle, Thrown, Value};
//! use suitegen::trace::ExecutionTracer;
//! use suitegen::types::{ClassType, TypeRef};
//!
//! struct NewPoint(Arc<ClassType>);
//!
//! impl SiteBody for NewPoint {
//!     fn invoke(&self, _: Option<&Value>, _: &[Value], _: &ExecutionTracer) -> Result<Value, Thrown> {
//!         Ok(Value::Object(ObjectHandle::new(self.0.clone(), (0i64, 0i64))))
//!     }
//! }
//!
//! let point = Arc::new(ClassType::new("geo.Point"));
//! let catalog = StaticCatalog::new()
//!     .with_target(CallableSite::constructor(point.clone(), vec![], NewPoint(point.clone())));
//! assert_eq!(catalog.sites().len(), 1);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::runtime::{Thrown, Value};
use crate::trace::ExecutionTracer;
use crate::types::{ClassType, TypeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SiteKind {
    Constructor,
    Method,
    Field,
}

/// Executable behaviour behind a callable site.
///
/// Implementations report branch distances and other coverage events through
/// the `ExecutionTracer`. Long-running bodies should call
/// [`ExecutionTracer::check_timeout`] periodically so that a timed-out
/// execution can stop cooperatively.
pub trait SiteBody: Send + Sync {
    /// Run the site. For field sites this reads the field and `args` is empty.
    fn invoke(
        &self,
        receiver: Option<&Value>,
        args: &[Value],
        tracer: &ExecutionTracer,
    ) -> Result<Value, Thrown>;

    /// Write a field. Only field sites need to support this.
    fn write_field(
        &self,
        _receiver: Option<&Value>,
        _value: Value,
        _tracer: &ExecutionTracer,
    ) -> Result<(), Thrown> {
        Err(Thrown::exception(
            "IllegalAccess",
            "site does not support field writes",
        ))
    }
}

impl<F> SiteBody for F
where
    F: Fn(Option<&Value>, &[Value], &ExecutionTracer) -> Result<Value, Thrown> + Send + Sync,
{
    fn invoke(
        &self,
        receiver: Option<&Value>,
        args: &[Value],
        tracer: &ExecutionTracer,
    ) -> Result<Value, Thrown> {
        self(receiver, args, tracer)
    }
}

/// Pin a closure to the `SiteBody` call signature.
///
/// Closures passed straight to a site constructor cannot have their argument
/// and error types inferred; wrapping them here fixes both.
pub fn site_fn<F>(f: F) -> F
where
    F: Fn(Option<&Value>, &[Value], &ExecutionTracer) -> Result<Value, Thrown> + Send + Sync,
{
    f
}

struct SiteInner {
    kind: SiteKind,
    declaring_type: TypeRef,
    name: String,
    parameter_types: Vec<TypeRef>,
    return_type: TypeRef,
    is_static: bool,
    is_final: bool,
    body: Arc<dyn SiteBody>,
}

/// A constructor, method or field of the program under test.
///
/// Cheap to clone. Equality and hashing consider the signature only, never the
/// body, so two catalogs describing the same program agree on site identity.
#[derive(Clone)]
pub struct CallableSite {
    inner: Arc<SiteInner>,
}

impl CallableSite {
    pub fn constructor(class: Arc<ClassType>, parameter_types: Vec<TypeRef>, body: impl SiteBody + 'static) -> Self {
        let declaring_type = TypeRef::Class(class);
        CallableSite {
            inner: Arc::new(SiteInner {
                kind: SiteKind::Constructor,
                declaring_type: declaring_type.clone(),
                name: "<init>".to_string(),
                parameter_types,
                return_type: declaring_type,
                is_static: true,
                is_final: false,
                body: Arc::new(body),
            }),
        }
    }

    pub fn method(
        declaring_type: TypeRef,
        name: impl Into<String>,
        parameter_types: Vec<TypeRef>,
        return_type: TypeRef,
        body: impl SiteBody + 'static,
    ) -> Self {
        CallableSite {
            inner: Arc::new(SiteInner {
                kind: SiteKind::Method,
                declaring_type,
                name: name.into(),
                parameter_types,
                return_type,
                is_static: false,
                is_final: false,
                body: Arc::new(body),
            }),
        }
    }

    pub fn static_method(
        declaring_type: TypeRef,
        name: impl Into<String>,
        parameter_types: Vec<TypeRef>,
        return_type: TypeRef,
        body: impl SiteBody + 'static,
    ) -> Self {
        let site = Self::method(declaring_type, name, parameter_types, return_type, body);
        site.into_static()
    }

    pub fn field(
        declaring_type: TypeRef,
        name: impl Into<String>,
        field_type: TypeRef,
        body: impl SiteBody + 'static,
    ) -> Self {
        CallableSite {
            inner: Arc::new(SiteInner {
                kind: SiteKind::Field,
                declaring_type,
                name: name.into(),
                parameter_types: Vec::new(),
                return_type: field_type,
                is_static: false,
                is_final: false,
                body: Arc::new(body),
            }),
        }
    }

    fn rebuild(&self, is_static: bool, is_final: bool) -> Self {
        let inner = &self.inner;
        CallableSite {
            inner: Arc::new(SiteInner {
                kind: inner.kind,
                declaring_type: inner.declaring_type.clone(),
                name: inner.name.clone(),
                parameter_types: inner.parameter_types.clone(),
                return_type: inner.return_type.clone(),
                is_static,
                is_final,
                body: inner.body.clone(),
            }),
        }
    }

    /// Mark a method or field as static.
    pub fn into_static(self) -> Self {
        self.rebuild(true, self.inner.is_final)
    }

    /// Mark a field as final; final fields are never assignment targets.
    pub fn into_final(self) -> Self {
        self.rebuild(self.inner.is_static, true)
    }

    pub fn kind(&self) -> SiteKind {
        self.inner.kind
    }

    pub fn is_constructor(&self) -> bool {
        self.inner.kind == SiteKind::Constructor
    }

    pub fn is_method(&self) -> bool {
        self.inner.kind == SiteKind::Method
    }

    pub fn is_field(&self) -> bool {
        self.inner.kind == SiteKind::Field
    }

    pub fn declaring_type(&self) -> &TypeRef {
        &self.inner.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parameter_types(&self) -> &[TypeRef] {
        &self.inner.parameter_types
    }

    /// Result type: the constructed class, the method's return type, or the
    /// field's type.
    pub fn return_type(&self) -> &TypeRef {
        &self.inner.return_type
    }

    pub fn is_static(&self) -> bool {
        self.inner.is_static
    }

    pub fn is_final(&self) -> bool {
        self.inner.is_final
    }

    /// Whether using the site needs a receiver object.
    pub fn needs_receiver(&self) -> bool {
        !self.is_constructor() && !self.inner.is_static
    }

    pub fn body(&self) -> &dyn SiteBody {
        self.inner.body.as_ref()
    }

    /// Every type that has to be available before the site can be used:
    /// the receiver (if any) followed by the parameters.
    pub fn dependencies(&self) -> Vec<TypeRef> {
        let mut deps = Vec::with_capacity(self.inner.parameter_types.len() + 1);
        if self.needs_receiver() {
            deps.push(self.inner.declaring_type.clone());
        }
        deps.extend(self.inner.parameter_types.iter().cloned());
        deps
    }

    /// Whether the site produces a value usable as `ty`.
    pub fn generates(&self, ty: &TypeRef) -> bool {
        if self.is_constructor() {
            if let TypeRef::Class(class) = &self.inner.declaring_type {
                if class.is_abstract {
                    return false;
                }
            }
        }
        !self.inner.return_type.is_void() && ty.is_assignable_from(&self.inner.return_type)
    }

    /// Whether `ty` can be passed as the receiver or any parameter.
    pub fn accepts(&self, ty: &TypeRef) -> bool {
        (self.needs_receiver() && self.inner.declaring_type.is_assignable_from(ty))
            || self
                .inner
                .parameter_types
                .iter()
                .any(|param| param.is_assignable_from(ty))
    }

    /// Stable byte encoding of the signature, used by fingerprints.
    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.inner.kind as u8);
        self.inner.declaring_type.encode_into(out);
        out.extend_from_slice(self.inner.name.as_bytes());
        out.push(0);
        out.push(self.inner.parameter_types.len() as u8);
        for param in &self.inner.parameter_types {
            param.encode_into(out);
        }
        self.inner.return_type.encode_into(out);
        out.push(u8::from(self.inner.is_static));
    }

    fn signature(&self) -> (SiteKind, &TypeRef, &str, &[TypeRef], &TypeRef, bool) {
        (
            self.inner.kind,
            &self.inner.declaring_type,
            &self.inner.name,
            &self.inner.parameter_types,
            &self.inner.return_type,
            self.inner.is_static,
        )
    }
}

impl PartialEq for CallableSite {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.signature() == other.signature()
    }
}

impl Eq for CallableSite {}

impl Hash for CallableSite {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.signature().hash(state);
    }
}

impl fmt::Debug for CallableSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for CallableSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = self.inner.declaring_type.simple_name();
        match self.inner.kind {
            SiteKind::Field => write!(f, "{}.{}: {}", owner, self.inner.name, self.inner.return_type),
            SiteKind::Constructor | SiteKind::Method => {
                let params: Vec<String> = self.inner.parameter_types.iter().map(|p| p.to_string()).collect();
                let name = if self.is_constructor() { owner.clone() } else { format!("{}.{}", owner, self.inner.name) };
                write!(f, "{}({}) -> {}", name, params.join(", "), self.inner.return_type)
            }
        }
    }
}

/// The set of callable sites the test factory may use.
pub trait GeneratorCatalog: Send + Sync {
    /// Sites producing a value assignable to `ty`.
    fn generators_for(&self, ty: &TypeRef) -> Vec<CallableSite>;

    /// Sites that take `ty` as receiver or parameter.
    fn callable_sites_accepting(&self, ty: &TypeRef) -> Vec<CallableSite>;

    /// The sites of the unit under test.
    fn test_calls(&self) -> Vec<CallableSite>;

    /// Instance methods that can be invoked on a receiver of type `ty`.
    fn modifiers_for(&self, ty: &TypeRef) -> Vec<CallableSite> {
        self.callable_sites_accepting(ty)
            .into_iter()
            .filter(|site| site.is_method() && site.needs_receiver() && site.declaring_type().is_assignable_from(ty))
            .collect()
    }

    fn has_generator(&self, ty: &TypeRef) -> bool {
        !self.generators_for(ty).is_empty()
    }
}

/// An in-memory catalog built up front.
///
/// Sites added with [`with_target`](Self::with_target) belong to the unit
/// under test; sites added with [`with_site`](Self::with_site) are only used
/// as generators or modifiers for dependencies.
#[derive(Default, Clone)]
pub struct StaticCatalog {
    sites: Vec<CallableSite>,
    targets: Vec<CallableSite>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_site(mut self, site: CallableSite) -> Self {
        self.add_site(site);
        self
    }

    pub fn with_target(mut self, site: CallableSite) -> Self {
        self.add_target(site);
        self
    }

    pub fn add_site(&mut self, site: CallableSite) {
        if !self.sites.contains(&site) {
            self.sites.push(site);
        }
    }

    pub fn add_target(&mut self, site: CallableSite) {
        if !self.targets.contains(&site) {
            self.targets.push(site.clone());
        }
        self.add_site(site);
    }

    pub fn sites(&self) -> &[CallableSite] {
        &self.sites
    }
}

impl GeneratorCatalog for StaticCatalog {
    fn generators_for(&self, ty: &TypeRef) -> Vec<CallableSite> {
        self.sites.iter().filter(|site| site.generates(ty)).cloned().collect()
    }

    fn callable_sites_accepting(&self, ty: &TypeRef) -> Vec<CallableSite> {
        self.sites.iter().filter(|site| site.accepts(ty)).cloned().collect()
    }

    fn test_calls(&self) -> Vec<CallableSite> {
        self.targets.clone()
    }
}

impl fmt::Debug for StaticCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCatalog")
            .field("sites", &self.sites)
            .field("targets", &self.targets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(_: Option<&Value>, _: &[Value], _: &ExecutionTracer) -> Result<Value, Thrown> {
        Ok(Value::Null)
    }

    fn animal() -> Arc<ClassType> {
        Arc::new(ClassType::new("Animal").with_abstract(true))
    }

    fn dog() -> Arc<ClassType> {
        Arc::new(ClassType::new("Dog").with_supertype("Animal"))
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new()
            .with_site(CallableSite::constructor(animal(), vec![], unit))
            .with_site(CallableSite::constructor(dog(), vec![TypeRef::int()], unit))
            .with_target(CallableSite::method(
                TypeRef::Class(animal()),
                "feed",
                vec![TypeRef::String],
                TypeRef::Void,
                unit,
            ))
    }

    #[test]
    fn test_abstract_classes_have_no_constructor_generator() {
        let generators = catalog().generators_for(&TypeRef::Class(animal()));
        assert_eq!(generators.len(), 1);
        assert_eq!(generators[0].declaring_type(), &TypeRef::Class(dog()));
    }

    #[test]
    fn test_modifiers_accept_subtypes() {
        let catalog = catalog();
        let modifiers = catalog.modifiers_for(&TypeRef::Class(dog()));
        assert_eq!(modifiers.len(), 1);
        assert_eq!(modifiers[0].name(), "feed");
        assert_eq!(catalog.callable_sites_accepting(&TypeRef::int()).len(), 1);
        assert_eq!(catalog.test_calls().len(), 1);
    }

    #[test]
    fn test_site_equality_ignores_body() {
        let a = CallableSite::constructor(dog(), vec![TypeRef::int()], unit);
        let b = CallableSite::constructor(dog(), vec![TypeRef::int()], site_fn(|_, _, _| Ok(Value::Int(1))));
        assert_eq!(a, b);
        let method = CallableSite::method(TypeRef::Class(dog()), "bark", vec![], TypeRef::Void, unit);
        assert_ne!(method, method.clone().into_static());
    }

    #[test]
    fn test_dependencies_include_receiver() {
        let feed = CallableSite::method(TypeRef::Class(animal()), "feed", vec![TypeRef::String], TypeRef::Void, unit);
        assert_eq!(feed.dependencies(), vec![TypeRef::Class(animal()), TypeRef::String]);
        assert_eq!(feed.clone().into_static().dependencies(), vec![TypeRef::String]);
    }
}
