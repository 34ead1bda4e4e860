//! How a guarded call is protected.
//!
//! Every strategy follows the same shape: arm a trap (`enter`), run the call,
//! capture the fault context if the platform reports one (`on_fault`), and
//! disarm on normal return (`leave`, done by drop guards). A faulted call is
//! never resumed, so nothing is disarmed on that path.
//!
//! The variant is picked at build time through [`DefaultStrategy`];
//! [`crate::CrashGuard`] is generic over it so callers never branch on it.

use std::fmt;
use std::sync::Arc;

use crate::fault::FaultContext;
use crate::guard::FaultScope;

mod pass_through;

#[cfg(unix)]
mod global_filter;
#[cfg(unix)]
mod signals;
#[cfg(unix)]
mod structured;

pub use pass_through::PassThrough;

#[cfg(unix)]
pub use global_filter::GlobalFilter;
#[cfg(unix)]
pub use structured::StructuredCall;

#[cfg(all(unix, not(feature = "global-filter")))]
pub type DefaultStrategy = StructuredCall;

#[cfg(all(unix, feature = "global-filter"))]
pub type DefaultStrategy = GlobalFilter;

#[cfg(not(unix))]
pub type DefaultStrategy = PassThrough;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// The call site traps the fault and the call returns.
    StructuredCall,
    /// One process-wide filter handles the fault, then the process terminates.
    GlobalFilter,
    /// No interception.
    PassThrough,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StructuredCall => "structured_call",
            Self::GlobalFilter => "global_filter",
            Self::PassThrough => "pass_through",
        })
    }
}

/// What came back from an intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    Returned(i32),
    /// The call faulted; the caller still has to dump and report it.
    Faulted(FaultContext),
}

pub trait InterceptionStrategy: Send + Sync {
    const KIND: StrategyKind;

    /// Run `call` under this strategy's trap.
    ///
    /// Strategies that cannot hand control back after a fault respond through
    /// `scope` themselves and do not return.
    fn intercept<F>(&self, call: F, scope: &Arc<FaultScope>) -> Interception
    where
        F: FnOnce() -> i32 + Send + 'static;
}
