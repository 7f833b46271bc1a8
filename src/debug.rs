//! Introspection surface (§2.2), modeled on the teacher's
//! `debug::TableEntry`/`as_table_entry()` pattern: a read-only snapshot a
//! host application or test can inspect without reaching into engine
//! internals.

use std::rc::Rc;

use crate::updatable::Updatable;

/// A point-in-time view of one [`crate::Manager`]'s state.
pub struct DebugSnapshot {
    pub(crate) live_updatables: Vec<Rc<Updatable>>,
    pub pending_reactions: usize,
    pub valid: bool,
    pub in_run_section: bool,
}

/// One row of [`DebugSnapshot::entries`], analogous to the teacher's
/// `TableEntry`.
#[derive(Debug)]
pub struct UpdatableEntry {
    pub id: u64,
    pub valid: bool,
    pub computing: bool,
}

impl DebugSnapshot {
    pub fn entries(&self) -> Vec<UpdatableEntry> {
        self.live_updatables
            .iter()
            .map(|u| UpdatableEntry { id: u.id(), valid: u.is_valid(), computing: u.is_computing() })
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.live_updatables.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::manager::Manager;
    use crate::value::{Source, Value};

    #[test]
    fn snapshot_reflects_registered_updatables() {
        let manager = Manager::new();
        let host = Value::Record(Source::new_record());
        manager.updatable("k", Some(&host), |_| Value::Int(1));
        let snap = manager.debug_snapshot();
        assert_eq!(snap.live_count(), 1);
        assert_eq!(snap.entries()[0].valid, false);
    }
}
