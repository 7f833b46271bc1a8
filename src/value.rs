//! The dynamic value model every observed source is built from.
//!
//! Rust has no universal proxy primitive, so "arbitrary user data (records
//! and ordered sequences)" from the distilled specification is represented
//! here as an explicit, JSON-shaped [`Value`] enum. Only the [`Value::Record`]
//! and [`Value::Sequence`] variants carry shared, interior-mutable storage
//! (`Rc<RefCell<..>>`) and are therefore the only variants the observation
//! layer (see [`crate::observation`]) ever wraps.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::updatable::Updatable;

/// A field or pseudo-key name. Interned as `Rc<str>` so that cloning a key
/// (which happens constantly while walking subscription tables) is cheap.
pub type Key = Rc<str>;

/// A getter/setter pair installed by [`crate::Manager::computed`].
///
/// The getter is always a memoized [`Updatable`]; the setter, if present, is
/// an ordinary unmemoized callback (per §4.4 of the specification).
#[derive(Clone)]
pub struct Accessor {
    pub(crate) getter: Rc<Updatable>,
    pub(crate) setter: Option<Rc<dyn Fn(Value)>>,
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("has_setter", &self.setter.is_some())
            .finish()
    }
}

/// What shape of data a [`Source`] holds.
pub(crate) enum Storage {
    Record(IndexMap<Key, Value>),
    Sequence(Vec<Value>),
}

/// The shared, mutable cell backing one observed record or sequence.
///
/// This is the "source" of §3: the user-owned data that an [`Observable`]
/// wrapper is bijectively associated with. A `Source` is never exposed to
/// user code directly through the public surface; it is only reachable via
/// `Value::Record`/`Value::Sequence` and the `get`/`set`/`delete` methods on
/// [`crate::observation`].
pub(crate) struct SourceInner {
    pub(crate) storage: Storage,
    /// Explicit prototype link, standing in for the implicit prototype
    /// chain a dynamic language would provide. Only consulted when
    /// `Options::prototypes` is enabled.
    pub(crate) proto: Option<Value>,
    pub(crate) accessors: FxHashMap<Key, Accessor>,
    pub(crate) subscriptions: FxHashMap<Key, Vec<Subscription>>,
}

/// One entry in a source's per-key subscription list.
///
/// `via` records whether this subscription was registered directly against
/// this source (`Root`) or reached it by delegating up a prototype chain
/// during a read (`Prototype`), per §4.1.
pub(crate) struct Subscription {
    pub(crate) updatable: std::rc::Weak<Updatable>,
    pub(crate) via: Via,
}

#[derive(Clone)]
pub(crate) enum Via {
    Root,
    /// The chain walked to satisfy the read, ordered from the read site
    /// (closest, index 0) to the ancestor that ultimately supplied the key
    /// (furthest, last index). Shared across every source in the chain that
    /// holds a copy of this subscription.
    Prototype(Rc<Vec<Source>>),
}

/// A shared handle to a [`SourceInner`]. Cloning a `Source` is a cheap `Rc`
/// clone; two `Source`s are the same record/sequence iff [`Source::ptr_eq`].
#[derive(Clone)]
pub struct Source(pub(crate) Rc<RefCell<SourceInner>>);

impl Source {
    pub(crate) fn new_record() -> Self {
        Source(Rc::new(RefCell::new(SourceInner {
            storage: Storage::Record(IndexMap::default()),
            proto: None,
            accessors: FxHashMap::default(),
            subscriptions: FxHashMap::default(),
        })))
    }

    pub(crate) fn new_sequence() -> Self {
        Source(Rc::new(RefCell::new(SourceInner {
            storage: Storage::Sequence(Vec::new()),
            proto: None,
            accessors: FxHashMap::default(),
            subscriptions: FxHashMap::default(),
        })))
    }

    pub(crate) fn borrow(&self) -> Ref<'_, SourceInner> {
        self.0.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, SourceInner> {
        self.0.borrow_mut()
    }

    pub(crate) fn ptr_eq(&self, other: &Source) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address used as a stable, non-owning identity for weak tables (the
    /// Updatable cache, the observable<->source table). Never dereferenced.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub(crate) fn downgrade(&self) -> std::rc::Weak<RefCell<SourceInner>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_rc(rc: Rc<RefCell<SourceInner>>) -> Self {
        Source(rc)
    }

    pub fn is_record(&self) -> bool {
        matches!(self.borrow().storage, Storage::Record(_))
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self.borrow().storage, Storage::Sequence(_))
    }

    /// All direct child values, used by the deep-watch walk (§4.1 step 6).
    /// Does not follow the prototype link.
    pub(crate) fn children(&self) -> Vec<Value> {
        match &self.borrow().storage {
            Storage::Record(fields) => fields.values().cloned().collect(),
            Storage::Sequence(items) => items.clone(),
        }
    }

    pub(crate) fn set_proto(&self, proto: Option<Value>) {
        self.borrow_mut().proto = proto;
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.borrow().storage {
            Storage::Record(fields) => {
                write!(f, "Record(")?;
                let mut first = true;
                for k in fields.keys() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}")?;
                    first = false;
                }
                write!(f, ")")
            }
            Storage::Sequence(items) => write!(f, "Sequence(len={})", items.len()),
        }
    }
}

/// A value flowing through the engine: either a primitive the engine never
/// observes, or a record/sequence that is always wrapped in an [`Source`]
/// and delivered through the observation layer.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// A callable is stored and returned like any other primitive; per §1 it
    /// is explicitly out of scope to observe one directly.
    Callable(Rc<dyn Fn(&[Value]) -> Value>),
    Record(Source),
    Sequence(Source),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(n) => write!(f, "Float({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Callable(_) => write!(f, "Callable(..)"),
            Value::Record(s) => write!(f, "Record({s:?})"),
            Value::Sequence(s) => write!(f, "Sequence({s:?})"),
        }
    }
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    /// Builds a fresh, unobserved record. Pass the result through
    /// [`crate::Manager::observable`] before handing it to user code (the
    /// call is idempotent and mostly documents intent, since `Value` already
    /// carries its own subscription table).
    pub fn new_record<K: Into<Key>>(fields: impl IntoIterator<Item = (K, Value)>) -> Value {
        let source = Source::new_record();
        {
            let mut inner = source.borrow_mut();
            let Storage::Record(map) = &mut inner.storage else { unreachable!() };
            for (k, v) in fields {
                map.insert(k.into(), v);
            }
        }
        Value::Record(source)
    }

    pub fn new_sequence(items: impl IntoIterator<Item = Value>) -> Value {
        let source = Source::new_sequence();
        {
            let mut inner = source.borrow_mut();
            let Storage::Sequence(vec) = &mut inner.storage else { unreachable!() };
            vec.extend(items);
        }
        Value::Sequence(source)
    }

    /// Attaches a prototype link consulted when `Options::prototypes` is
    /// enabled (§4.1).
    pub fn with_prototype(self, proto: Value) -> Value {
        if let Some(source) = self.source() {
            source.set_proto(Some(proto));
        }
        self
    }

    /// Unobserved, direct field read -- bypasses dependency tracking
    /// entirely. Intended for inspecting data outside a derivation (e.g. in
    /// tests or assertions); reads that should participate in the
    /// dependency graph must go through [`crate::Manager::get`].
    pub fn field(&self, key: &str) -> Value {
        match self.source() {
            Some(source) => match &source.borrow().storage {
                Storage::Record(fields) => fields.get(key).cloned().unwrap_or(Value::Null),
                Storage::Sequence(items) => {
                    if key == "length" {
                        Value::Int(items.len() as i64)
                    } else {
                        key.parse::<usize>().ok().and_then(|i| items.get(i)).cloned().unwrap_or(Value::Null)
                    }
                }
            },
            None => Value::Null,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether this value is a record or sequence -- the only shapes the
    /// engine ever observes (§3: "Only records/sequences are observed").
    pub fn is_observable_shape(&self) -> bool {
        matches!(self, Value::Record(_) | Value::Sequence(_))
    }

    pub(crate) fn source(&self) -> Option<&Source> {
        match self {
            Value::Record(s) | Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Referential equality: `Record`/`Sequence`/`Callable` compare by
    /// identity (pointer), primitives compare by value. Per §1's explicit
    /// non-goal, the engine never does deep-equality diffing of mutations.
    pub fn ref_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(a, b),
            (Value::Record(a), Value::Sequence(b)) | (Value::Sequence(a), Value::Record(b)) => {
                Rc::ptr_eq(&a.0, &b.0)
            }
            (Value::Record(a), Value::Record(b)) | (Value::Sequence(a), Value::Sequence(b)) => {
                Rc::ptr_eq(&a.0, &b.0)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_compare_by_identity_not_contents() {
        let a = Value::new_record([("x", Value::Int(1))]);
        let b = Value::new_record([("x", Value::Int(1))]);
        assert!(!a.ref_eq(&b), "two distinct records with equal contents are not ref_eq");
        assert!(a.ref_eq(&a.clone()));
    }

    #[test]
    fn primitives_compare_by_value() {
        assert!(Value::Int(3).ref_eq(&Value::Int(3)));
        assert!(!Value::Int(3).ref_eq(&Value::Int(4)));
        assert!(Value::str("a").ref_eq(&Value::str("a")));
    }

    #[test]
    fn field_reads_bypass_dependency_tracking() {
        let record = Value::new_record([("a", Value::Int(1))]);
        assert_eq!(record.field("a").as_int(), Some(1));
        assert!(record.field("missing").is_null());
    }

    #[test]
    fn sequence_length_field_reflects_item_count() {
        let seq = Value::new_sequence([Value::Int(1), Value::Int(2)]);
        assert_eq!(seq.field("length").as_int(), Some(2));
        assert_eq!(seq.field("0").as_int(), Some(1));
    }

    #[test]
    fn only_records_and_sequences_are_observable_shapes() {
        assert!(Value::new_record([] as [(Key, Value); 0]).is_observable_shape());
        assert!(Value::new_sequence([]).is_observable_shape());
        assert!(!Value::Int(1).is_observable_shape());
        assert!(!Value::Null.is_observable_shape());
    }
}
