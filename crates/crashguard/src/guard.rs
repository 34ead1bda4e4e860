use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{DumpCallback, GuardConfig};
use crate::dump::{DEFAULT_LABEL, DumpDescriptor, DumpWriter, SnapshotEncoder};
use crate::fault::FaultContext;
use crate::process::{ProcessContext, SystemProcess};
use crate::registry;
use crate::strategy::{DefaultStrategy, Interception, InterceptionStrategy, StrategyKind};

/// Outcome of one guarded call.
///
/// `CrashIntercepted` is its own variant, so no status the protected function
/// returns can be mistaken for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardResult {
    Completed(i32),
    CrashIntercepted,
}

impl GuardResult {
    pub fn is_crash(self) -> bool {
        matches!(self, Self::CrashIntercepted)
    }

    /// The protected function's own status, if it returned.
    pub fn status(self) -> Option<i32> {
        match self {
            Self::Completed(status) => Some(status),
            Self::CrashIntercepted => None,
        }
    }
}

/// Lifecycle of a single `run`, as reported in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    Running,
    Completed,
    Faulted,
    Dumping,
    DumpOk,
    DumpFailed,
    CallbackInvoked,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
            Self::Dumping => "dumping",
            Self::DumpOk => "dump_ok",
            Self::DumpFailed => "dump_failed",
            Self::CallbackInvoked => "callback_invoked",
        })
    }
}

/// Everything needed to respond to a fault of one guarded call.
///
/// Resolved when the call starts and owned by that call alone, so neither
/// later `registry::set` calls nor other guarded calls can change who a fault
/// is attributed to.
pub struct FaultScope {
    label: Option<String>,
    callback: Option<DumpCallback>,
    writer: DumpWriter,
    process: Arc<dyn ProcessContext>,
}

impl FaultScope {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(DEFAULT_LABEL)
    }

    /// Write the dump, then hand its path to the callback, or to the log when
    /// there is no callback.
    ///
    /// Emits at most one warning per fault: the no-callback report, or the
    /// dump failure when a callback was told about it.
    pub fn respond(&self, fault: &FaultContext) -> DumpDescriptor {
        debug!(label = self.label(), state = %RunState::Dumping, kind = %fault.kind(), "writing crash dump");
        let path = self
            .writer
            .next_path(self.label.as_deref(), self.process.as_ref(), fault.thread_id);
        let (dump, failure) = match self.writer.try_write(fault, &path) {
            Ok(()) => (DumpDescriptor::written(path), None),
            Err(e) => (DumpDescriptor::missing(), Some(e)),
        };

        let state = if dump.is_created() {
            RunState::DumpOk
        } else {
            RunState::DumpFailed
        };
        debug!(label = self.label(), state = %state, dump = %dump.path().display(), "crash dump finished");

        match (&self.callback, failure) {
            (Some(callback), failure) => {
                if let Some(e) = failure {
                    warn!(label = self.label(), kind = %fault.kind(), %e, "failed to write crash dump");
                }
                callback(dump.path());
                debug!(label = self.label(), state = %RunState::CallbackInvoked, "crash callback returned");
            }
            (None, None) => {
                warn!(
                    label = self.label(),
                    kind = %fault.kind(),
                    dump = %dump.path().display(),
                    "intercepted crash, no callback registered"
                );
            }
            (None, Some(e)) => {
                warn!(
                    label = self.label(),
                    kind = %fault.kind(),
                    %e,
                    "intercepted crash, no callback registered and no dump written"
                );
            }
        }
        dump
    }
}

impl fmt::Debug for FaultScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultScope")
            .field("label", &self.label)
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .finish_non_exhaustive()
    }
}

// ── Guard ────────────────────────────────────────────────────────

/// Runs protected functions under an interception strategy.
///
/// Cheap to clone and safe to share; every call resolves its own
/// [`FaultScope`].
#[derive(Clone)]
pub struct CrashGuard<S = DefaultStrategy> {
    strategy: S,
    writer: DumpWriter,
    process: Arc<dyn ProcessContext>,
}

impl CrashGuard {
    pub fn builder() -> GuardBuilder {
        GuardBuilder {
            strategy: DefaultStrategy::default(),
            writer: None,
            process: None,
        }
    }
}

impl<S: InterceptionStrategy + Default> Default for CrashGuard<S> {
    fn default() -> Self {
        Self::with_strategy(S::default())
    }
}

impl<S: InterceptionStrategy> CrashGuard<S> {
    pub fn with_strategy(strategy: S) -> Self {
        Self {
            strategy,
            writer: DumpWriter::default(),
            process: Arc::new(SystemProcess::new()),
        }
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        S::KIND
    }

    /// Run `call` with the process default callback and label.
    pub fn run<F>(&self, call: F) -> GuardResult
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        self.run_with(GuardConfig::new(), call)
    }

    /// Run `call` with per-call overrides; unset fields fall back to
    /// [`registry`] as it is right now.
    ///
    /// Blocks until `call` returns or its fault has been dumped and reported.
    /// A panic in `call` is not a fault and unwinds out of this method.
    pub fn run_with<F>(&self, overrides: GuardConfig, call: F) -> GuardResult
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let (callback, label) = overrides.or(registry::snapshot()).into_parts();
        let scope = Arc::new(FaultScope {
            label,
            callback,
            writer: self.writer.clone(),
            process: Arc::clone(&self.process),
        });

        debug!(label = scope.label(), strategy = %S::KIND, state = %RunState::Running, "guarded call");
        match self.strategy.intercept(call, &scope) {
            Interception::Returned(status) => {
                debug!(label = scope.label(), state = %RunState::Completed, status, "guarded call");
                GuardResult::Completed(status)
            }
            Interception::Faulted(fault) => {
                debug!(
                    label = scope.label(),
                    state = %RunState::Faulted,
                    kind = %fault.kind(),
                    tid = fault.thread_id,
                    "guarded call"
                );
                scope.respond(&fault);
                GuardResult::CrashIntercepted
            }
        }
    }
}

/// Assembles a [`CrashGuard`]. Unset parts use the defaults: [`SystemProcess`]
/// and the JSON fault report encoder.
pub struct GuardBuilder<S = DefaultStrategy> {
    strategy: S,
    writer: Option<DumpWriter>,
    process: Option<Arc<dyn ProcessContext>>,
}

impl<S: InterceptionStrategy> GuardBuilder<S> {
    pub fn strategy<T: InterceptionStrategy>(self, strategy: T) -> GuardBuilder<T> {
        GuardBuilder {
            strategy,
            writer: self.writer,
            process: self.process,
        }
    }

    /// Write dumps to `dir` regardless of `CRASHGUARD_DUMP_DIR`.
    pub fn dump_dir(self, dir: impl Into<PathBuf>) -> Self {
        self.process(SystemProcess::with_dump_dir(dir))
    }

    pub fn process(mut self, process: impl ProcessContext + 'static) -> Self {
        self.process = Some(Arc::new(process));
        self
    }

    pub fn encoder(self, encoder: impl SnapshotEncoder + 'static) -> Self {
        self.writer(DumpWriter::new(encoder))
    }

    pub fn writer(mut self, writer: DumpWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn build(self) -> CrashGuard<S> {
        CrashGuard {
            strategy: self.strategy,
            writer: self.writer.unwrap_or_default(),
            process: self
                .process
                .unwrap_or_else(|| Arc::new(SystemProcess::new())),
        }
    }
}

/// One-shot guarded call with the default strategy and process.
///
/// `callback` and `label` override the process default when given.
pub fn guard<F>(callback: Option<DumpCallback>, label: Option<&str>, call: F) -> GuardResult
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let overrides = GuardConfig::from_parts(callback, label.map(str::to_string));
    CrashGuard::<DefaultStrategy>::default().run_with(overrides, call)
}
