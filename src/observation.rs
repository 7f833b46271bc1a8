//! Observation Layer (§4.1): read/write interception on a [`Source`],
//! prototype-chain resolution, and the subscription bookkeeping that ties a
//! read back to the [`Updatable`] that performed it.
//!
//! A `Value::Record`/`Value::Sequence` already *is* the transparent wrapper:
//! since `Source` owns its own subscription table, proto link and accessor
//! map directly, there is no separate weakly-keyed wrapper table to
//! maintain the way a JS `Proxy` would need one -- `observable(x) === observable(x)`
//! falls out of `Rc` identity for free. See `DESIGN.md` for this
//! simplification relative to the distilled specification's wording.

use std::rc::Rc;

use rustc_hash::FxHashSet;

use crate::manager::Manager;
use crate::updatable::Updatable;
use crate::value::{Key, Source, Storage, Subscription, Value, Via};

/// Internal marker key answering "is this value observable", distinct from
/// the configurable `watch_key`/`watch_deep_key`/`data_source_key` (§4.1
/// step 1). Not exposed in [`crate::Options`] since it is not meant to be
/// rebound.
const IS_OBSERVABLE_KEY: &str = "$$isObservable";

fn has_own_key(source: &Source, key: &str) -> bool {
    let inner = source.borrow();
    if inner.accessors.contains_key(key) {
        return true;
    }
    match &inner.storage {
        Storage::Record(fields) => fields.contains_key(key),
        Storage::Sequence(_) => key == "length" || key.parse::<usize>().is_ok(),
    }
}

/// Builds the prototype chain starting at `source` (index 0) by following
/// `.proto` links while `Options::prototypes` is enabled, stopping as soon
/// as an ancestor owns `key` (that ancestor becomes the last element), or at
/// the topmost observable ancestor if none does (§4.1: "prototype
/// handling").
fn resolve_chain(manager: &Manager, source: &Source, key: &str) -> Vec<Source> {
    let mut chain = vec![source.clone()];
    if !manager.options().prototypes {
        return chain;
    }
    if has_own_key(source, key) {
        return chain;
    }
    let mut current = source.clone();
    loop {
        let proto = current.borrow().proto.clone();
        let next = match proto {
            Some(ref v) => match v.source() {
                Some(s) => s.clone(),
                None => break,
            },
            None => break,
        };
        chain.push(next.clone());
        if has_own_key(&next, key) {
            break;
        }
        current = next;
    }
    chain
}

/// Registers `consumer` (the Updatable currently executing, if any) as a
/// subscriber of `key` on `source`, respecting prototype delegation, and
/// installs the matching `uninit` teardown on `consumer` (§4.1:
/// `register_read`).
pub(crate) fn register_read(manager: &Manager, source: &Source, key: &Key, consumer: &Rc<Updatable>) {
    let chain = resolve_chain(manager, source, key);
    let (owner, via) = if chain.len() == 1 {
        (chain[0].clone(), Via::Root)
    } else {
        let owner = chain.last().unwrap().clone();
        (owner, Via::Prototype(Rc::new(chain)))
    };

    owner.borrow_mut().subscriptions.entry(key.clone()).or_default().push(Subscription {
        updatable: Rc::downgrade(consumer),
        via,
    });

    let weak_owner = owner.downgrade();
    let weak_consumer = Rc::downgrade(consumer);
    let target_key = key.clone();
    consumer.add_uninit(Box::new(move || {
        if let Some(inner) = weak_owner.upgrade() {
            let mut inner = inner.borrow_mut();
            if let Some(list) = inner.subscriptions.get_mut(&target_key) {
                list.retain(|sub| sub.updatable.as_ptr() != weak_consumer.as_ptr());
            }
        }
    }));
}

/// Recursively registers `consumer` on `watch_key` for every nested
/// record/sequence reachable from `source` -- "behave as watchKey" (§4.1
/// step 6) applies at every level the walk reaches, not just the root,
/// which is what lets an ordinary write to a deeply-nested key reach
/// `update_property`'s `{key, watch_key}` check. Guards re-entrance into an
/// already-visited source within the same walk so a cycle terminates.
fn touch_watch_deep(
    manager: &Manager,
    source: &Source,
    consumer: &Rc<Updatable>,
    watch_key: &Key,
    visited: &mut FxHashSet<usize>,
) {
    if !visited.insert(source.addr()) {
        return;
    }
    register_read(manager, source, watch_key, consumer);
    for child in source.children() {
        if let Some(child_source) = child.source() {
            touch_watch_deep(manager, child_source, consumer, watch_key, visited);
        }
    }
}

/// Read interception on key `key` of `source` (§4.1's seven-step list).
pub(crate) fn get(manager: &Manager, source: &Source, key: &Key) -> Value {
    let opts = manager.options();

    if key.as_ref() == IS_OBSERVABLE_KEY {
        return Value::Bool(true);
    }
    if key.as_ref() == opts.data_source_key.as_ref() {
        return wrap_self(source);
    }

    let own_getter = source.borrow().accessors.get(key.as_ref()).map(|a| a.getter.clone());
    if let Some(getter) = own_getter {
        return manager.call_updatable(&getter);
    }

    if let Some(consumer) = manager.current_updatable() {
        register_read(manager, source, key, &consumer);
        if key.as_ref() == opts.watch_key.as_ref() {
            return wrap_self(source);
        }
        if key.as_ref() == opts.watch_deep_key.as_ref() {
            let mut visited = FxHashSet::default();
            touch_watch_deep(manager, source, &consumer, &opts.watch_key, &mut visited);
            return wrap_self(source);
        }
    } else if key.as_ref() == opts.watch_key.as_ref() || key.as_ref() == opts.watch_deep_key.as_ref() {
        return wrap_self(source);
    }

    read_storage(source, key)
}

fn wrap_self(source: &Source) -> Value {
    Value::from_source(source)
}

fn read_storage(source: &Source, key: &Key) -> Value {
    let inner = source.borrow();
    match &inner.storage {
        Storage::Record(fields) => fields.get(key.as_ref()).cloned().unwrap_or(Value::Null),
        Storage::Sequence(items) => {
            if key.as_ref() == "length" {
                Value::Int(items.len() as i64)
            } else if let Ok(idx) = key.parse::<usize>() {
                items.get(idx).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
    }
}

/// Write interception (§4.1's `set` rule). No-ops on a referentially-equal
/// value, except sequence `length`, which always proceeds.
pub(crate) fn set(manager: &Manager, source: &Source, key: &Key, value: Value) {
    let is_length_write = source.is_sequence() && key.as_ref() == "length";

    if let Some(setter) = source.borrow().accessors.get(key.as_ref()).and_then(|a| a.setter.clone()) {
        setter(value);
        return;
    }

    if !is_length_write {
        let old = read_storage(source, key);
        if old.ref_eq(&value) {
            return;
        }
    }

    {
        let mut inner = source.borrow_mut();
        match &mut inner.storage {
            Storage::Record(fields) => {
                fields.insert(key.clone(), value);
            }
            Storage::Sequence(items) => {
                if key.as_ref() == "length" {
                    let new_len = match value {
                        Value::Int(n) if n >= 0 => n as usize,
                        _ => items.len(),
                    };
                    items.resize(new_len, Value::Null);
                } else if let Ok(idx) = key.parse::<usize>() {
                    if idx >= items.len() {
                        items.resize(idx + 1, Value::Null);
                    }
                    items[idx] = value;
                }
            }
        }
    }

    update_property(manager, source, key);
}

/// Delete interception: always invokes `update_property`, even when the key
/// was already absent (§4.1's `delete` rule).
pub(crate) fn delete(manager: &Manager, source: &Source, key: &Key) {
    {
        let mut inner = source.borrow_mut();
        match &mut inner.storage {
            Storage::Record(fields) => {
                fields.shift_remove(key.as_ref());
            }
            Storage::Sequence(items) => {
                if let Ok(idx) = key.parse::<usize>() {
                    if idx < items.len() {
                        items[idx] = Value::Null;
                    }
                }
            }
        }
    }
    update_property(manager, source, key);
}

/// Invalidates every Updatable subscribed to `key` (and to `watch_key`) on
/// `source`, respecting prototype shadowing, then asks the scheduler to run
/// or schedule a pass (§4.1 steps 3-4).
fn update_property(manager: &Manager, source: &Source, key: &Key) {
    let watch_key = manager.options().watch_key.clone();
    let keys: [&Key; 2] = [key, &watch_key];
    let mut to_invalidate: Vec<Rc<Updatable>> = Vec::new();

    for k in keys {
        let subs = {
            let inner = source.borrow();
            inner.subscriptions.get(k.as_ref()).map(|v| {
                v.iter()
                    .map(|s| (s.updatable.clone(), s.via.clone()))
                    .collect::<Vec<_>>()
            })
        };
        let Some(subs) = subs else { continue };
        for (weak_up, via) in subs {
            let Some(up) = weak_up.upgrade() else { continue };
            match via {
                Via::Root => to_invalidate.push(up),
                Via::Prototype(chain) => {
                    let pos = chain.iter().position(|s| s.ptr_eq(source));
                    let shadowed = match pos {
                        Some(pos) => chain[..pos].iter().any(|anc| has_own_key(anc, key.as_ref())),
                        None => false,
                    };
                    if !shadowed {
                        to_invalidate.push(up);
                    }
                }
            }
        }
        if k.as_ref() == key.as_ref() && key.as_ref() == watch_key.as_ref() {
            break;
        }
    }

    for up in to_invalidate {
        manager.invalidate(&up);
    }

    manager.after_write();
}

impl Value {
    pub(crate) fn from_source(source: &Source) -> Value {
        if source.is_sequence() {
            Value::Sequence(source.clone())
        } else {
            Value::Record(source.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Manager;

    #[test]
    fn prototype_chain_collapses_when_disabled() {
        let manager = Manager::new();
        let parent = Source::new_record();
        parent.borrow_mut().storage = Storage::Record({
            let mut m = indexmap::IndexMap::default();
            m.insert(Key::from("a"), Value::Int(0));
            m
        });
        let child = Source::new_record();
        child.set_proto(Some(Value::Record(parent.clone())));

        let chain = resolve_chain(&manager, &child, "a");
        assert_eq!(chain.len(), 1, "prototypes disabled by default collapses chain to self");
    }

    #[test]
    fn prototype_chain_finds_owning_ancestor_when_enabled() {
        let manager = Manager::new();
        manager.set_options(crate::options::OptionsPatch {
            prototypes: Some(true),
            ..Default::default()
        });
        let parent = Source::new_record();
        parent.borrow_mut().storage = Storage::Record({
            let mut m = indexmap::IndexMap::default();
            m.insert(Key::from("a"), Value::Int(0));
            m
        });
        let child = Source::new_record();
        child.set_proto(Some(Value::Record(parent.clone())));

        let chain = resolve_chain(&manager, &child, "a");
        assert_eq!(chain.len(), 2);
        assert!(chain[1].ptr_eq(&parent));
    }
}
