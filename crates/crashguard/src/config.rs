use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Receives the dump path after a fault was intercepted.
///
/// The path is empty when no dump could be written.
pub type DumpCallback = Arc<dyn Fn(&Path) + Send + Sync>;

/// Callback and label for guarded calls.
///
/// Used both as the process-wide default (see [`crate::registry`]) and as a
/// per-call override. Missing fields fall back to the default when a call
/// starts.
#[derive(Clone, Default)]
pub struct GuardConfig {
    callback: Option<DumpCallback>,
    label: Option<String>,
}

impl GuardConfig {
    pub const fn new() -> Self {
        Self {
            callback: None,
            label: None,
        }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_shared_callback(mut self, callback: DumpCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn callback(&self) -> Option<&DumpCallback> {
        self.callback.as_ref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Field-wise fallback: keeps what `self` sets, takes the rest from `fallback`.
    pub fn or(self, fallback: GuardConfig) -> GuardConfig {
        GuardConfig {
            callback: self.callback.or(fallback.callback),
            label: self.label.or(fallback.label),
        }
    }

    pub(crate) fn into_parts(self) -> (Option<DumpCallback>, Option<String>) {
        (self.callback, self.label)
    }

    pub(crate) fn from_parts(callback: Option<DumpCallback>, label: Option<String>) -> Self {
        Self { callback, label }
    }
}

impl fmt::Debug for GuardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardConfig")
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .field("label", &self.label)
            .finish()
    }
}
