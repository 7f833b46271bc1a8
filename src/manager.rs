//! The `Manager`: the single engine instance every other module is a
//! component of (§3 "Global Manager state", §6 "External Interfaces").

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use log::{trace, warn};
use rustc_hash::FxHashMap;

use crate::debug::DebugSnapshot;
use crate::error::EngineError;
use crate::observation;
use crate::options::{Options, OptionsPatch};
use crate::scheduler;
use crate::updatable::{HostRef, Updatable};
use crate::value::{Accessor, Key, Value};

/// A cached getter Updatable, verified live against the host weak pointer
/// it was interned for so a dead host's address is never mistaken for a
/// freshly-allocated, unrelated one (the teacher's "prune on miss" pattern,
/// applied to a pointer-keyed cache rather than a whole `InternTables`).
struct CacheEntry {
    host_check: Option<Weak<RefCell<crate::value::SourceInner>>>,
    updatable: Rc<Updatable>,
}

struct ManagerState {
    next_id: Cell<u64>,
    call_stack: RefCell<Vec<Rc<Updatable>>>,
    updatable_cache: RefCell<FxHashMap<(usize, Key), CacheEntry>>,
    pending: RefCell<IndexMap<usize, Rc<Updatable>>>,
    global_valid: Cell<bool>,
    in_run_section: Cell<bool>,
    run_scheduled: Cell<bool>,
    options: RefCell<Options>,
    on_after_run: RefCell<Option<Box<dyn Fn()>>>,
}

/// The reactive engine instance. Cheap to clone (an `Rc` handle); every
/// clone shares the same state. Intentionally `!Send`/`!Sync` -- built
/// entirely from `Rc`/`RefCell`/`Cell`, matching the single-threaded
/// cooperative scheduling model of §5.
#[derive(Clone)]
pub struct Manager(Rc<ManagerState>);

impl Manager {
    pub fn new() -> Manager {
        Manager(Rc::new(ManagerState {
            next_id: Cell::new(0),
            call_stack: RefCell::new(Vec::new()),
            updatable_cache: RefCell::new(FxHashMap::default()),
            pending: RefCell::new(IndexMap::new()),
            global_valid: Cell::new(true),
            in_run_section: Cell::new(false),
            run_scheduled: Cell::new(false),
            options: RefCell::new(Options::default()),
            on_after_run: RefCell::new(None),
        }))
    }

    /// A process-wide default instance, lazily created per thread (§9:
    /// "The process-wide default Manager is a convenience only").
    pub fn global() -> Manager {
        thread_local! {
            static GLOBAL: RefCell<Option<Manager>> = RefCell::new(None);
        }
        GLOBAL.with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_none() {
                *slot = Some(Manager::new());
            }
            slot.as_ref().unwrap().clone()
        })
    }

    fn next_id(&self) -> u64 {
        let id = self.0.next_id.get();
        self.0.next_id.set(id + 1);
        id
    }

    pub fn options(&self) -> Options {
        self.0.options.borrow().clone()
    }

    /// Merges a partial options record over the current one (§4.5).
    pub fn set_options(&self, patch: OptionsPatch) {
        self.0.options.borrow_mut().merge(patch);
    }

    /// Idempotent wrapping (§4.1). `Value::Record`/`Value::Sequence` already
    /// carry their own subscription table, so -- unlike a JS `Proxy` --
    /// there is nothing further to allocate here; this exists as a named
    /// entry point mirroring the public surface of §6.
    pub fn observable(&self, value: Value) -> Value {
        trace!("observable() called on a {:?} value", std::mem::discriminant(&value));
        value
    }

    pub fn is_observable(&self, value: &Value) -> bool {
        value.is_observable_shape()
    }

    /// Read interception entry point (§4.1).
    pub fn get(&self, value: &Value, key: impl Into<Key>) -> Value {
        match value.source() {
            Some(source) => observation::get(self, source, &key.into()),
            None => Value::Null,
        }
    }

    /// Write interception entry point (§4.1).
    pub fn set(&self, value: &Value, key: impl Into<Key>, new_value: Value) {
        if let Some(source) = value.source() {
            observation::set(self, source, &key.into(), new_value);
        }
    }

    /// Delete interception entry point (§4.1).
    pub fn delete(&self, value: &Value, key: impl Into<Key>) {
        if let Some(source) = value.source() {
            observation::delete(self, source, &key.into());
        }
    }

    /// Installs a memoized accessor at `key` on `obj` (§4.4). `obj` must be
    /// a record or sequence.
    pub fn computed(
        &self,
        obj: &Value,
        key: impl Into<Key>,
        get_fn: impl Fn(Option<Value>) -> Value + 'static,
        set_fn: Option<Rc<dyn Fn(Value)>>,
    ) {
        let key = key.into();
        let source = obj
            .source()
            .expect("computed() requires a record or sequence host")
            .clone();
        let getter = self.updatable(key.clone(), Some(obj), get_fn);
        source.borrow_mut().accessors.insert(key, Accessor { getter, setter: set_fn });
    }

    /// Memoization primitive (§4.2). Interned per `(host, key)`: calling
    /// this twice with the same host identity and key returns the same
    /// `Updatable`.
    pub fn updatable(
        &self,
        key: impl Into<Key>,
        host: Option<&Value>,
        func: impl Fn(Option<Value>) -> Value + 'static,
    ) -> Rc<Updatable> {
        let key = key.into();
        let host_source = host.and_then(Value::source);
        let addr = host_source.map(|s| s.addr()).unwrap_or(0);
        let cache_key = (addr, key.clone());

        {
            let mut cache = self.0.updatable_cache.borrow_mut();
            if let Some(entry) = cache.get(&cache_key) {
                let still_live = match &entry.host_check {
                    Some(weak) => weak.upgrade().is_some(),
                    None => true,
                };
                if still_live {
                    return entry.updatable.clone();
                }
                cache.remove(&cache_key);
            }
        }

        let id = self.next_id();
        let host_ref = host_source.map(HostRef::new);
        let updatable = Rc::new(Updatable::new(id, Some(key.clone()), host_ref, Box::new(func)));
        let host_check = host_source.map(|s| s.downgrade());
        self.0
            .updatable_cache
            .borrow_mut()
            .insert(cache_key, CacheEntry { host_check, updatable: updatable.clone() });
        updatable
    }

    /// Registers an auto-rerunning `Updatable` (§4.3).
    pub fn reaction(
        &self,
        name: impl Into<Key>,
        func: impl Fn(Option<Value>) -> Value + 'static,
        run: bool,
    ) -> Rc<Updatable> {
        let id = self.next_id();
        let updatable = Rc::new(Updatable::new(id, Some(name.into()), None, Box::new(func)));

        let manager = self.clone();
        let weak_self = Rc::downgrade(&updatable);
        updatable.set_on_invalidate(Box::new(move || {
            if let Some(u) = weak_self.upgrade() {
                manager.add_pending(&u);
            }
        }));
        self.add_pending(&updatable);

        if run {
            if self.options().immediate_reaction {
                if let Err(err) = self.run(None) {
                    warn!("reaction() initial run failed: {err}");
                }
            } else {
                self.run_deferred(None);
            }
        }
        updatable
    }

    /// Runs a fixed-point reaction pass synchronously (§4.3).
    pub fn run(&self, batch_action: Option<Box<dyn FnOnce()>>) -> Result<(), EngineError> {
        scheduler::run(self, batch_action)
    }

    /// Schedules a reaction pass to run at the next [`Manager::drain`]
    /// (§4.3, §5).
    pub fn run_deferred(&self, batch_action: Option<Box<dyn FnOnce()>>) {
        scheduler::run_deferred(self, batch_action)
    }

    /// Executes a deferred run if one is scheduled; otherwise a no-op
    /// (§5's substitute for "the next quiescent point").
    pub fn drain(&self) -> Result<(), EngineError> {
        if self.0.run_scheduled.get() {
            self.0.run_scheduled.set(false);
            self.run(None)
        } else {
            Ok(())
        }
    }

    /// Sets a hook invoked after every completed `run()` pass.
    pub fn on_after_run(&self, hook: impl Fn() + 'static) {
        *self.0.on_after_run.borrow_mut() = Some(Box::new(hook));
    }

    /// Force-evicts an Updatable's subscriptions immediately (§2.2, §4.3).
    pub fn dispose(&self, updatable: &Rc<Updatable>) {
        scheduler::dispose(self, updatable);
    }

    pub fn debug_snapshot(&self) -> DebugSnapshot {
        let cache = self.0.updatable_cache.borrow();
        let live: Vec<Rc<Updatable>> = cache.values().map(|e| e.updatable.clone()).collect();
        DebugSnapshot {
            live_updatables: live,
            pending_reactions: self.0.pending.borrow().len(),
            valid: self.0.global_valid.get(),
            in_run_section: self.0.in_run_section.get(),
        }
    }

    // -- internals shared with `observation`/`scheduler` --

    pub(crate) fn current_updatable(&self) -> Option<Rc<Updatable>> {
        self.0.call_stack.borrow().last().cloned()
    }

    /// Core invocation semantics of an Updatable (§4.2).
    pub(crate) fn call_updatable(&self, u: &Rc<Updatable>) -> Value {
        if u.is_computing() {
            warn!(
                "Detected cross reference inside computed properties! \"undefined\" will be returned to prevent infinite loop"
            );
            return Value::Null;
        }

        if let Some(top) = self.current_updatable() {
            u.add_consumer(&top);
        }

        if u.is_valid() {
            return u.peek();
        }

        u.begin();
        self.0.call_stack.borrow_mut().push(u.clone());

        struct StackGuard<'a> {
            manager: &'a Manager,
            updatable: &'a Rc<Updatable>,
            finished: bool,
        }
        impl Drop for StackGuard<'_> {
            fn drop(&mut self) {
                self.manager.0.call_stack.borrow_mut().pop();
                if !self.finished {
                    self.updatable.abort();
                }
            }
        }

        let mut guard = StackGuard { manager: self, updatable: u, finished: false };
        let value = u.call_func();
        guard.finished = true;
        drop(guard);

        u.finish(value.clone());
        value
    }

    pub(crate) fn invalidate(&self, u: &Rc<Updatable>) {
        scheduler::invalidate(self, u);
    }

    pub(crate) fn set_global_valid(&self, valid: bool) {
        self.0.global_valid.set(valid);
    }

    pub(crate) fn is_global_valid(&self) -> bool {
        self.0.global_valid.get()
    }

    pub(crate) fn set_in_run_section(&self, value: bool) {
        self.0.in_run_section.set(value);
    }

    pub(crate) fn is_in_run_section(&self) -> bool {
        self.0.in_run_section.get()
    }

    pub(crate) fn is_run_scheduled(&self) -> bool {
        self.0.run_scheduled.get()
    }

    pub(crate) fn set_run_scheduled(&self, value: bool) {
        self.0.run_scheduled.set(value);
    }

    pub(crate) fn add_pending(&self, u: &Rc<Updatable>) {
        let addr = Rc::as_ptr(u) as usize;
        self.0.pending.borrow_mut().entry(addr).or_insert_with(|| u.clone());
    }

    pub(crate) fn remove_pending(&self, u: &Rc<Updatable>) {
        let addr = Rc::as_ptr(u) as usize;
        self.0.pending.borrow_mut().shift_remove(&addr);
    }

    pub(crate) fn drain_pending_reactions(&self) -> Vec<Rc<Updatable>> {
        std::mem::take(&mut *self.0.pending.borrow_mut()).into_values().collect()
    }

    pub(crate) fn clear_scheduler_state(&self) {
        self.0.pending.borrow_mut().clear();
        self.0.in_run_section.set(false);
    }

    pub(crate) fn fire_on_after_run(&self) {
        if let Some(hook) = self.0.on_after_run.borrow().as_ref() {
            hook();
        }
    }

    /// After a write outside a batch: run synchronously in immediate mode,
    /// else schedule a deferred pass (§4.1 step 4).
    pub(crate) fn after_write(&self) {
        if self.is_in_run_section() {
            return;
        }
        if self.options().immediate_reaction {
            if let Err(err) = self.run(None) {
                warn!("run() after write failed: {err}");
            }
        } else {
            self.run_deferred(None);
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Manager::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Source;

    #[test]
    fn global_manager_is_stable_within_a_thread() {
        let a = Manager::global();
        let b = Manager::global();
        assert!(Rc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn updatable_is_interned_per_host_and_key() {
        let manager = Manager::new();
        let host = Value::Record(Source::new_record());
        let a = manager.updatable("sum", Some(&host), |_| Value::Int(1));
        let b = manager.updatable("sum", Some(&host), |_| Value::Int(2));
        assert!(Rc::ptr_eq(&a, &b));
    }
}
