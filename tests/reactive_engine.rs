//! End-to-end scenarios against the public surface only (§8 of the
//! specification). Mirrors the teacher crate's `tests/parallel/stress.rs`
//! convention of exercising the engine from outside the crate rather than
//! through `#[cfg(test)]` unit tests, which stay colocated with the modules
//! they check.

use std::cell::Cell;
use std::rc::Rc;

use reactive_data::{Key, Manager, OptionsPatch, Value};

fn record(fields: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    Value::new_record(fields.into_iter().map(|(k, v)| (Key::from(k), v)))
}

/// Initializes the `log` facade for this process so the engine's
/// `trace!`/`debug!`/`warn!` calls (invalidation cascades, iteration-limit
/// aborts, cross-reference detection) are visible with `--nocapture`,
/// matching the teacher's own `env_logger` dev-dependency. Idempotent since
/// every test calls it and only the first `init()` in a process takes
/// effect.
fn init_logging() {
    let _ = env_logger::try_init();
}

#[test]
fn laziness_defers_and_memoizes_a_computed_sum() {
    init_logging();
    let manager = Manager::new();
    let d = record([("a", Value::Int(1)), ("b", Value::Int(2))]);

    let calls = Rc::new(Cell::new(0));
    let calls_clone = calls.clone();
    let m = manager.clone();
    manager.computed(
        &d,
        "sum",
        move |host| {
            calls_clone.set(calls_clone.get() + 1);
            let host = host.unwrap();
            let a = m.get(&host, "a").as_int().unwrap_or(0);
            let b = m.get(&host, "b").as_int().unwrap_or(0);
            Value::Int(a + b)
        },
        None,
    );

    assert_eq!(calls.get(), 0, "a computed getter must not run before it is demanded");

    assert_eq!(manager.get(&d, "sum").as_int(), Some(3));
    assert_eq!(calls.get(), 1);

    assert_eq!(manager.get(&d, "sum").as_int(), Some(3));
    assert_eq!(calls.get(), 1, "re-reading without a relevant mutation must not recompute");

    manager.set(&d, "a", Value::Int(5));
    assert_eq!(calls.get(), 1, "invalidation alone must not force recomputation");

    assert_eq!(manager.get(&d, "sum").as_int(), Some(7));
    assert_eq!(calls.get(), 2);
}

#[test]
fn reaction_reruns_after_a_deferred_pass() {
    init_logging();
    let manager = Manager::new();
    let d = record([("a", Value::Int(1)), ("b", Value::Int(2))]);

    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    let m = manager.clone();
    let dd = d.clone();
    manager.reaction(
        "sum-reaction",
        move |_| {
            count_clone.set(count_clone.get() + 1);
            let a = m.get(&dd, "a").as_int().unwrap_or(0);
            let b = m.get(&dd, "b").as_int().unwrap_or(0);
            Value::Int(a + b)
        },
        false,
    );

    manager.run(None).unwrap();
    assert_eq!(count.get(), 1);

    manager.set(&d, "a", Value::Int(3));
    manager.set(&d, "b", Value::Int(2));
    manager.run(None).unwrap();
    assert_eq!(count.get(), 2);
}

#[test]
fn immediate_mode_fires_synchronously_and_batches_collapse_to_one_pass() {
    init_logging();
    let manager = Manager::new();
    manager.set_options(OptionsPatch { immediate_reaction: Some(true), ..Default::default() });
    let d = record([("a", Value::Int(1))]);

    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    let m = manager.clone();
    let dd = d.clone();
    manager.reaction("watch-a", move |_| { count_clone.set(count_clone.get() + 1); m.get(&dd, "a") }, true);
    assert_eq!(count.get(), 1, "the initial run happens synchronously");

    manager.set(&d, "a", Value::Int(2));
    assert_eq!(count.get(), 2, "immediate_reaction fires the pass on this very write");

    let m2 = manager.clone();
    let d2 = d.clone();
    manager
        .run(Some(Box::new(move || {
            m2.set(&d2, "a", Value::Int(3));
            m2.set(&d2, "a", Value::Int(4));
        })))
        .unwrap();
    assert_eq!(count.get(), 3, "a batch of writes fires the reaction exactly once after the batch");
}

#[test]
fn prototype_inheritance_respects_shadowing() {
    init_logging();
    let manager = Manager::new();
    manager.set_options(OptionsPatch { prototypes: Some(true), ..Default::default() });

    let parent = record([("a", Value::Int(0))]);
    let child = record([]).with_prototype(parent.clone());

    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    let m = manager.clone();
    let child_clone = child.clone();
    manager.reaction("reads-child-a", move |_| { count_clone.set(count_clone.get() + 1); m.get(&child_clone, "a") }, false);

    manager.run(None).unwrap();
    assert_eq!(count.get(), 1);

    manager.set(&parent, "a", Value::Int(5));
    manager.run(None).unwrap();
    assert_eq!(count.get(), 2, "a write to an inherited key must invalidate the reader that inherited it");

    manager.set(&child, "a", Value::Int(7));
    manager.run(None).unwrap();
    let after_override = count.get();

    manager.set(&parent, "a", Value::Int(9));
    manager.run(None).unwrap();
    assert_eq!(count.get(), after_override, "once the child overrides `a`, further writes to the parent must not fire it");
}

#[test]
fn whole_object_watch_fires_on_any_own_key_change_but_not_on_unrelated_records() {
    init_logging();
    let manager = Manager::new();
    let watched = record([("a", Value::Int(1))]);
    let unrelated = record([("z", Value::Int(1))]);

    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    let m = manager.clone();
    let watched_clone = watched.clone();
    manager.reaction(
        "whole-object",
        move |_| {
            count_clone.set(count_clone.get() + 1);
            m.get(&watched_clone, "$$watch")
        },
        false,
    );

    manager.run(None).unwrap();
    assert_eq!(count.get(), 1);

    manager.set(&unrelated, "z", Value::Int(2));
    manager.run(None).unwrap();
    assert_eq!(count.get(), 1, "a write to an unrelated record must not fire the watch");

    manager.set(&watched, "a", Value::Int(2));
    manager.run(None).unwrap();
    assert_eq!(count.get(), 2);

    manager.delete(&watched, "a");
    manager.run(None).unwrap();
    assert_eq!(count.get(), 3, "deleting an own key counts as an own-key change");
}

#[test]
fn deep_watch_reaches_nested_records_and_tolerates_cycles() {
    init_logging();
    let manager = Manager::new();
    let inner = record([("x", Value::Int(1))]);
    let outer = record([("inner", inner.clone())]);
    // Introduce a cycle: inner points back up at outer. The deep walk must
    // terminate instead of recursing forever (§4.1 step 6).
    manager.set(&inner, "parent", outer.clone());

    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    let m = manager.clone();
    let outer_clone = outer.clone();
    manager.reaction(
        "deep-watch",
        move |_| {
            count_clone.set(count_clone.get() + 1);
            m.get(&outer_clone, "$$watchDeep")
        },
        false,
    );

    manager.run(None).unwrap();
    assert_eq!(count.get(), 1);

    manager.set(&inner, "x", Value::Int(2));
    manager.run(None).unwrap();
    assert_eq!(count.get(), 2, "a mutation on a transitively-reachable record must fire the deep watch");
}

#[test]
fn cross_referential_computed_property_returns_null_instead_of_recursing() {
    init_logging();
    let manager = Manager::new();
    let d = record([("x", Value::Int(1))]);
    let m = manager.clone();
    manager.computed(
        &d,
        "a",
        move |host| {
            let host = host.unwrap();
            // Reading `a` from inside its own getter: the cache entry is
            // already `computing`, so this must short-circuit to `Value::Null`
            // rather than recurse.
            m.get(&host, "a")
        },
        None,
    );

    assert!(manager.get(&d, "a").is_null());
}

#[test]
fn self_writing_reaction_aborts_with_iteration_limit() {
    init_logging();
    let manager = Manager::new();
    let d = record([("n", Value::Int(0))]);
    let m = manager.clone();
    let dd = d.clone();
    manager.reaction(
        "looper",
        move |_| {
            let n = m.get(&dd, "n").as_int().unwrap_or(0);
            m.set(&dd, "n", Value::Int(n + 1));
            Value::Null
        },
        false,
    );

    let err = manager.run(None);
    assert!(err.is_err(), "a reaction that writes a value it also reads must not loop forever");
}

#[test]
fn data_source_key_round_trips_to_the_underlying_value() {
    init_logging();
    let manager = Manager::new();
    let d = record([("a", Value::Int(1))]);
    let unwrapped = manager.get(&d, "$$dataSource");
    assert!(unwrapped.ref_eq(&d));
}

#[test]
fn referentially_equal_writes_do_not_invalidate() {
    init_logging();
    let manager = Manager::new();
    let d = record([("a", Value::Int(1))]);

    let count = Rc::new(Cell::new(0));
    let count_clone = count.clone();
    let m = manager.clone();
    let dd = d.clone();
    manager.reaction("reads-a", move |_| { count_clone.set(count_clone.get() + 1); m.get(&dd, "a") }, false);
    manager.run(None).unwrap();
    assert_eq!(count.get(), 1);

    manager.set(&d, "a", Value::Int(1));
    manager.run(None).unwrap();
    assert_eq!(count.get(), 1, "writing the same primitive value back must not trigger a re-run");
}

#[test]
fn empty_options_patch_is_identity() {
    init_logging();
    let manager = Manager::new();
    let before = manager.options();
    manager.set_options(OptionsPatch::default());
    let after = manager.options();
    assert_eq!(before.enabled, after.enabled);
    assert_eq!(before.immediate_reaction, after.immediate_reaction);
    assert_eq!(before.prototypes, after.prototypes);
    assert_eq!(before.watch_key.as_ref(), after.watch_key.as_ref());
}
