//! Engine configuration (§4.5).
//!
//! Mirrors the teacher crate's [`crate::SweepStrategy`]-style chainable
//! builder: a small `Copy`/`Clone` record with `with_*` methods that return
//! `Self`, plus a `merge` used by `set_options`.

use std::rc::Rc;

/// The default pseudo-key that subscribes a reader to any own-key change on
/// a record (§4.1 step 5).
pub const DEFAULT_WATCH_KEY: &str = "$$watch";
/// The default pseudo-key that subscribes a reader transitively through
/// nested records (§4.1 step 6).
pub const DEFAULT_WATCH_DEEP_KEY: &str = "$$watchDeep";
/// The default pseudo-key that returns the underlying source unwrapped.
pub const DEFAULT_DATA_SOURCE_KEY: &str = "$$dataSource";

/// Runtime configuration for one [`crate::Manager`].
///
/// Construct with [`Options::default`] and adjust with the `with_*`
/// builders, or build a partial record and apply it via
/// [`crate::Manager::set_options`].
#[derive(Clone)]
pub struct Options {
    pub enabled: bool,
    pub immediate_reaction: bool,
    pub prototypes: bool,
    pub watch_key: Rc<str>,
    pub watch_deep_key: Rc<str>,
    pub data_source_key: Rc<str>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            enabled: true,
            immediate_reaction: false,
            prototypes: false,
            watch_key: Rc::from(DEFAULT_WATCH_KEY),
            watch_deep_key: Rc::from(DEFAULT_WATCH_DEEP_KEY),
            data_source_key: Rc::from(DEFAULT_DATA_SOURCE_KEY),
        }
    }
}

impl Options {
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_immediate_reaction(mut self, immediate: bool) -> Self {
        self.immediate_reaction = immediate;
        self
    }

    pub fn with_prototypes(mut self, prototypes: bool) -> Self {
        self.prototypes = prototypes;
        self
    }

    pub fn with_watch_key(mut self, key: impl Into<Rc<str>>) -> Self {
        self.watch_key = key.into();
        self
    }

    pub fn with_watch_deep_key(mut self, key: impl Into<Rc<str>>) -> Self {
        self.watch_deep_key = key.into();
        self
    }

    pub fn with_data_source_key(mut self, key: impl Into<Rc<str>>) -> Self {
        self.data_source_key = key.into();
        self
    }
}

/// A sparse set of overrides, as accepted by [`crate::Manager::set_options`].
/// Every field left `None` leaves the corresponding [`Options`] field
/// untouched, so `set_options(OptionsPatch::default())` is the identity
/// (§8: "round-trip / idempotence").
#[derive(Default, Clone)]
pub struct OptionsPatch {
    pub enabled: Option<bool>,
    pub immediate_reaction: Option<bool>,
    pub prototypes: Option<bool>,
    pub watch_key: Option<Rc<str>>,
    pub watch_deep_key: Option<Rc<str>>,
    pub data_source_key: Option<Rc<str>>,
}

impl Options {
    /// Merges a partial options record over `self` (§4.5: `setOptions`
    /// merges over the current record).
    pub fn merge(&mut self, patch: OptionsPatch) {
        if let Some(v) = patch.enabled {
            self.enabled = v;
        }
        if let Some(v) = patch.immediate_reaction {
            self.immediate_reaction = v;
        }
        if let Some(v) = patch.prototypes {
            self.prototypes = v;
        }
        if let Some(v) = patch.watch_key {
            self.watch_key = v;
        }
        if let Some(v) = patch.watch_deep_key {
            self.watch_deep_key = v;
        }
        if let Some(v) = patch.data_source_key {
            self.data_source_key = v;
        }
    }
}
