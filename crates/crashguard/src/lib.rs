//! Crash guard: run a function so that a fatal fault becomes a result.
//!
//! A fatal runtime fault (invalid memory access, illegal instruction,
//! arithmetic trap, abort) normally ends the process without leaving anything
//! behind. [`CrashGuard::run`] executes a protected function under an
//! interception strategy. If the function faults, a diagnostic snapshot is
//! written next to the other dumps, the registered callback receives its
//! path, and `run` returns [`GuardResult::CrashIntercepted`].
//!
//! ```rust,no_run
//! use crashguard::{CrashGuard, GuardConfig, GuardResult};
//!
//! let guard = CrashGuard::builder().build();
//! let config = GuardConfig::new()
//!     .with_label("myapp")
//!     .with_callback(|dump: &std::path::Path| eprintln!("crashed, dump at {}", dump.display()));
//!
//! match guard.run_with(config, || 42) {
//!     GuardResult::Completed(status) => std::process::exit(status),
//!     GuardResult::CrashIntercepted => std::process::exit(70),
//! }
//! ```
//!
//! # Strategies
//!
//! | Target | Default strategy | After a fault |
//! |--------|------------------|---------------|
//! | unix | [`StructuredCall`] | `run` returns `CrashIntercepted` |
//! | unix + `global-filter` | [`GlobalFilter`] | dump + callback, then the process terminates |
//! | anything else | [`PassThrough`] | no interception at all |
//!
//! Pass-through is a capability gap, not a safe mode: faults behave exactly
//! as if no guard were present.
//!
//! # Configuration
//!
//! The callback and label come from a [`GuardConfig`] passed to the call,
//! falling back field by field to the process default held by
//! [`registry`]. The default is snapshotted when `run` starts, so changing it
//! later never affects a call already in flight.
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `CRASHGUARD_DUMP_DIR` | Directory for dumps (default: OS temp dir). |

mod config;
mod dump;
mod error;
mod fault;
mod guard;
mod process;
pub mod registry;
pub mod strategy;

pub use config::{DumpCallback, GuardConfig};
pub use dump::{
    DEFAULT_LABEL, DUMP_EXTENSION, DumpDescriptor, DumpWriter, FaultReport, FaultReportEncoder,
    MAX_DUMP_PATH_LEN, SnapshotEncoder, compute_path,
};
pub use error::DumpError;
pub use fault::{FaultContext, FaultKind};
pub use guard::{CrashGuard, FaultScope, GuardBuilder, GuardResult, guard};
pub use process::{DUMP_DIR_ENV, ProcessContext, SystemProcess};
pub use strategy::{DefaultStrategy, Interception, InterceptionStrategy, PassThrough, StrategyKind};
#[cfg(unix)]
pub use strategy::{GlobalFilter, StructuredCall};
