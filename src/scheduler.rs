//! Reaction Scheduler (§4.3): cascading invalidation, the fixed-point
//! `run()` pass, deferred scheduling, and disposal.

use std::rc::Rc;

use log::{debug, warn};

use crate::error::EngineError;
use crate::manager::Manager;
use crate::updatable::Updatable;

/// Bound on fixed-point iterations within one `run()` pass (§4.3, §7).
/// A reaction that writes a value it also reads re-invalidates every
/// iteration and is caught by this bound rather than looping forever.
pub(crate) const MAX_ITERATIONS: u32 = 10;

/// Invalidates `u`, cascading into its consumers when it transitions from
/// valid to invalid (§4.1's `invalidate`).
pub(crate) fn invalidate(manager: &Manager, u: &Rc<Updatable>) {
    manager.set_global_valid(false);
    let was_valid = u.mark_invalid();
    u.fire_on_invalidate();
    if was_valid {
        debug!("invalidating {} downstream consumer(s) of updatable {}", u.id(), u.id());
        for weak_dep in u.take_deps() {
            if let Some(dep) = weak_dep.upgrade() {
                invalidate(manager, &dep);
            }
        }
    }
}

/// RAII guard clearing `in_run_section` on every exit path, including panic,
/// mirroring the teacher's `PanicGuard` around query execution.
struct RunSectionGuard<'a> {
    manager: &'a Manager,
}

impl<'a> RunSectionGuard<'a> {
    fn enter(manager: &'a Manager) -> Self {
        manager.set_in_run_section(true);
        RunSectionGuard { manager }
    }
}

impl Drop for RunSectionGuard<'_> {
    fn drop(&mut self) {
        self.manager.set_in_run_section(false);
    }
}

/// Runs a fixed-point reaction pass (§4.3). No-op if `Options::enabled` is
/// false. Runs `batch_action` first (its writes invalidate without
/// triggering a nested pass, since `in_run_section` is already set), then
/// drains `pending_reactions` until a full iteration invalidates nothing
/// new, bounded by [`MAX_ITERATIONS`].
pub(crate) fn run(manager: &Manager, batch_action: Option<Box<dyn FnOnce()>>) -> Result<(), EngineError> {
    if !manager.options().enabled {
        return Ok(());
    }
    let _guard = RunSectionGuard::enter(manager);

    if let Some(action) = batch_action {
        action();
    }

    let mut iterations: u32 = 0;
    loop {
        manager.set_global_valid(true);
        let batch = manager.drain_pending_reactions();
        if batch.is_empty() {
            break;
        }
        for reaction in batch {
            manager.call_updatable(&reaction);
        }
        iterations += 1;
        if manager.is_global_valid() {
            break;
        }
        if iterations >= MAX_ITERATIONS {
            manager.clear_scheduler_state();
            warn!("reaction pass did not reach a fixed point after {iterations} iterations");
            return Err(EngineError::IterationLimit(iterations));
        }
    }

    manager.fire_on_after_run();
    Ok(())
}

/// Disposal (§4.3, §9's Open Question resolution): removes `u` from the
/// pending-reaction set and runs its teardown actions immediately, so its
/// subscriptions do not linger until its host is reclaimed.
pub(crate) fn dispose(manager: &Manager, u: &Rc<Updatable>) {
    manager.remove_pending(u);
    u.run_uninit();
}

/// Schedules a `run()` to fire at the next [`crate::Manager::drain`] call
/// rather than running synchronously (§4.3, §5).
pub(crate) fn run_deferred(manager: &Manager, batch_action: Option<Box<dyn FnOnce()>>) {
    if !manager.options().enabled {
        return;
    }
    let _guard = RunSectionGuard::enter(manager);
    manager.set_run_scheduled(true);
    if let Some(action) = batch_action {
        action();
    }
}
