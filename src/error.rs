//! Error taxonomy (§7).
//!
//! Only [`EngineError::IterationLimit`] is a true error this crate returns
//! as a `Result`. `CrossReference` and `BadSource` from the specification's
//! taxonomy are not exceptions -- they are handled inline (a logged
//! diagnostic and an unchanged return value, respectively) and have no
//! variant here.

use thiserror::Error;

/// Errors `run` can report. Modeled on the teacher's `CycleError`: a small,
/// specific enum rather than a catch-all `anyhow`-style error, since callers
/// are expected to match on it (e.g. to report a misbehaving reaction).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    /// `run()` exceeded [`crate::scheduler::MAX_ITERATIONS`] fixed-point
    /// iterations draining `pending_reactions`. Scheduler state is cleared
    /// before this is returned.
    #[error(
        "reaction pass did not reach a fixed point after {0} iterations; a reaction is likely writing a value it also reads"
    )]
    IterationLimit(u32),
}
