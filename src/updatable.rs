//! The derivation engine's memoization primitive (§3, §4.2).
//!
//! An [`Updatable`] is a memoized wrapper around a user function: it caches
//! [`Value`], tracks which other `Updatable`s read it (so it can invalidate
//! them transitively), and tracks which subscription lists it joined while
//! it last executed (so it can evict itself from them before re-running).
//!
//! Cascading invalidation and call-stack bookkeeping need the owning
//! [`crate::Manager`], so those operations live on `Manager`/in
//! [`crate::scheduler`]; this module only owns the per-Updatable state.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;

use crate::value::{Source, Value};

/// A weak back-reference to the host object an Updatable was created for,
/// used to reconstruct the `context` value handed to its function on each
/// call without the Updatable keeping its host alive -- a computed
/// accessor's getter Updatable is itself stored inside that same host's
/// accessor map, so a strong reference here would be an owning cycle.
pub(crate) struct HostRef {
    source: Weak<RefCell<crate::value::SourceInner>>,
    is_sequence: bool,
}

impl HostRef {
    pub(crate) fn new(source: &Source) -> Self {
        HostRef {
            source: source.downgrade(),
            is_sequence: source.is_sequence(),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Value> {
        let inner = self.source.upgrade()?;
        let source = Source::from_rc(inner);
        Some(if self.is_sequence {
            Value::Sequence(source)
        } else {
            Value::Record(source)
        })
    }
}

/// A unit of teardown run before an `Updatable` re-executes: removes it from
/// one subscription list it joined during its previous run.
pub(crate) type Uninit = Box<dyn Fn()>;

/// Hook invoked every time this Updatable is invalidated. `reaction` uses
/// this to enqueue itself onto the scheduler's pending set (§4.3); plain
/// `updatable`/`computed` instances leave it unset.
pub(crate) type OnInvalidate = Box<dyn Fn()>;

pub(crate) struct UpdatableState {
    pub(crate) valid: bool,
    pub(crate) value: Value,
    pub(crate) computing: bool,
    pub(crate) invalidated_during_run: bool,
    /// Downstream consumers: other Updatables whose last execution read
    /// this one. Stored weakly so dependency edges never keep an Updatable
    /// alive by themselves (§9: "avoid owning-pointer cycles").
    pub(crate) deps: SmallVec<[Weak<Updatable>; 4]>,
    pub(crate) uninit: Vec<Uninit>,
}

/// A memoized derivation: user function plus dependency bookkeeping.
///
/// See the module documentation and §4.2 of the specification for the full
/// invocation semantics; this type only exposes the state transitions that
/// semantics is built from.
pub struct Updatable {
    pub(crate) id: u64,
    pub(crate) name: Option<Rc<str>>,
    pub(crate) func: Box<dyn Fn(Option<Value>) -> Value>,
    pub(crate) host: Option<HostRef>,
    pub(crate) on_invalidate: RefCell<Option<OnInvalidate>>,
    pub(crate) state: RefCell<UpdatableState>,
}

impl Updatable {
    pub(crate) fn new(
        id: u64,
        name: Option<Rc<str>>,
        host: Option<HostRef>,
        func: Box<dyn Fn(Option<Value>) -> Value>,
    ) -> Self {
        Updatable {
            id,
            name,
            func,
            host,
            on_invalidate: RefCell::new(None),
            state: RefCell::new(UpdatableState {
                valid: false,
                value: Value::Null,
                computing: false,
                invalidated_during_run: false,
                deps: SmallVec::new(),
                uninit: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_valid(&self) -> bool {
        self.state.borrow().valid
    }

    pub fn is_computing(&self) -> bool {
        self.state.borrow().computing
    }

    /// Last computed value, without forcing recomputation. `Value::Null`
    /// while invalid (there may also be a legitimately null cached value;
    /// callers that need to distinguish should check [`Updatable::is_valid`]
    /// first).
    pub fn peek(&self) -> Value {
        self.state.borrow().value.clone()
    }

    pub(crate) fn set_on_invalidate(&self, hook: OnInvalidate) {
        *self.on_invalidate.borrow_mut() = Some(hook);
    }

    pub(crate) fn add_consumer(&self, consumer: &Rc<Updatable>) {
        let mut st = self.state.borrow_mut();
        if !st
            .deps
            .iter()
            .any(|w| w.upgrade().is_some_and(|d| Rc::ptr_eq(&d, consumer)))
        {
            st.deps.push(Rc::downgrade(consumer));
        }
    }

    pub(crate) fn add_uninit(&self, action: Uninit) {
        self.state.borrow_mut().uninit.push(action);
    }

    /// Runs and clears every teardown action queued by the previous
    /// execution, evicting this Updatable from subscription lists it no
    /// longer belongs to (§4.2 step 4, and `dispose` in §4.3).
    pub(crate) fn run_uninit(&self) {
        let actions = std::mem::take(&mut self.state.borrow_mut().uninit);
        for action in actions {
            action();
        }
    }

    /// Marks this Updatable invalid; returns `true` if it transitioned from
    /// valid to invalid (the caller uses this to decide whether to cascade
    /// into `deps`, per §4.1's `invalidate`).
    pub(crate) fn mark_invalid(&self) -> bool {
        let mut st = self.state.borrow_mut();
        st.invalidated_during_run = true;
        let was_valid = st.valid;
        st.valid = false;
        was_valid
    }

    pub(crate) fn take_deps(&self) -> SmallVec<[Weak<Updatable>; 4]> {
        std::mem::take(&mut self.state.borrow_mut().deps)
    }

    pub(crate) fn fire_on_invalidate(&self) {
        if let Some(hook) = self.on_invalidate.borrow().as_ref() {
            hook();
        }
    }

    /// Begins execution: asserts not already computing, flips `computing`,
    /// clears `invalidated_during_run`, and runs prior teardown. Returns the
    /// user function and host so the caller (Manager, which owns the call
    /// stack) can invoke it without holding a borrow across the call.
    pub(crate) fn begin(&self) {
        self.run_uninit();
        let mut st = self.state.borrow_mut();
        st.computing = true;
        st.invalidated_during_run = false;
    }

    pub(crate) fn call_func(&self) -> Value {
        (self.func)(self.host_value())
    }

    /// Completes execution: stores `value`, sets `valid := !invalidated_during_run`,
    /// clears `computing`. Called from a drop guard so it runs even on panic.
    pub(crate) fn finish(&self, value: Value) {
        let mut st = self.state.borrow_mut();
        st.value = value;
        st.valid = !st.invalidated_during_run;
        st.computing = false;
    }

    /// Disposal path for a panic: clears `computing` without storing a
    /// value or validating, leaving the Updatable invalid so it is
    /// recomputed on next demand.
    pub(crate) fn abort(&self) {
        let mut st = self.state.borrow_mut();
        st.computing = false;
        st.valid = false;
    }

    pub(crate) fn host_value(&self) -> Option<Value> {
        self.host.as_ref().and_then(HostRef::upgrade)
    }
}


impl fmt::Debug for Updatable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.borrow();
        f.debug_struct("Updatable")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("valid", &st.valid)
            .field("computing", &st.computing)
            .finish()
    }
}
