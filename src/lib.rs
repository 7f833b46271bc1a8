#![warn(rust_2018_idioms)]

//! A reactive data manager. It wraps arbitrary user records and sequences in
//! a transparent observation layer, tracks which reads a derivation function
//! performs against that layer, memoizes the result, and invalidates it
//! precisely when the data it read changes. Dependency tracking is lazy (a
//! derivation never recomputes until its value is demanded again), automatic
//! (no manual subscription wiring), and fine-grained (down to a single key on
//! a single record, not the whole record).
//!
//! A single [`Manager`] owns all engine state for one logical instance --
//! the observation layer, the Updatable cache, the call stack, and the
//! pending-reaction set. `Manager::global()` offers a process-wide default
//! for callers that don't need more than one instance.

mod debug;
mod error;
mod manager;
mod observation;
mod options;
mod scheduler;
mod updatable;
mod value;

pub use crate::debug::{DebugSnapshot, UpdatableEntry};
pub use crate::error::EngineError;
pub use crate::manager::Manager;
pub use crate::options::{Options, OptionsPatch};
pub use crate::updatable::Updatable;
pub use crate::value::{Key, Source, Value};
