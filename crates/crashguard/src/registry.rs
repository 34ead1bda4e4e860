//! Process-wide default callback and label.
//!
//! Guarded calls snapshot these values when they start. Establish them before
//! concurrent guarded calls begin: a `set` racing with a starting `run` is not
//! ordered with it, so that call may observe either the old or the new value.
//! Calls already in flight are never affected.
//!
//! Empty until the first `set`.

use parking_lot::RwLock;

use crate::config::{DumpCallback, GuardConfig};

static REGISTRY: RwLock<GuardConfig> = RwLock::new(GuardConfig::new());

/// Replace the process default for subsequent guarded calls. Last write wins.
pub fn set(callback: Option<DumpCallback>, label: Option<&str>) {
    *REGISTRY.write() = GuardConfig::from_parts(callback, label.map(str::to_string));
}

/// Currently registered callback, if any.
pub fn callback() -> Option<DumpCallback> {
    REGISTRY.read().callback().cloned()
}

/// Currently registered label, if any.
pub fn label() -> Option<String> {
    REGISTRY.read().label().map(str::to_string)
}

/// Copy of the current default, as used by a starting guarded call.
pub fn snapshot() -> GuardConfig {
    REGISTRY.read().clone()
}
