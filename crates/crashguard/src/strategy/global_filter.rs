//! One process-wide fault filter.
//!
//! While a guarded call runs, its scope is published in [`ARMED`]. A fault on
//! the guarded thread during that window takes the scope, writes the dump and
//! runs the callback from inside the signal handler, then lets the default
//! action end the process. Nothing is handed back to the caller. Faults on
//! other threads go to the previously installed handler.
//!
//! Guarded regions are serialized by [`REGION`] so a published scope always
//! belongs to the call that is actually running. The lock is reentrant, which
//! keeps nested guarded calls on one thread working: the inner scope wins
//! until it leaves.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use parking_lot::ReentrantMutex;
use tracing::debug;

use super::signals::{self, AltStack};
use super::{Interception, InterceptionStrategy, StrategyKind};
use crate::fault::FaultContext;
use crate::guard::FaultScope;

static REGION: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());
static ARMED: AtomicPtr<FaultScope> = AtomicPtr::new(ptr::null_mut());
/// Thread that owns the region; only written while holding [`REGION`].
static ARMED_THREAD: AtomicU64 = AtomicU64::new(0);

/// Responds to a fault from a process-wide filter, then terminates.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalFilter;

impl InterceptionStrategy for GlobalFilter {
    const KIND: StrategyKind = StrategyKind::GlobalFilter;

    fn intercept<F>(&self, call: F, scope: &Arc<FaultScope>) -> Interception
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        signals::install_fault_handler();

        let _region = REGION.lock();
        let stack = AltStack::install();
        if stack.is_none() {
            debug!("no alternate signal stack; stack overflows will not be intercepted");
        }
        let _armed = ArmedFilter::arm(scope);
        Interception::Returned(call())
    }
}

/// Publishes a scope for the filter; restores the previous one on drop.
struct ArmedFilter {
    previous: *mut FaultScope,
    previous_thread: u64,
}

impl ArmedFilter {
    fn arm(scope: &Arc<FaultScope>) -> Self {
        let current = Arc::as_ptr(scope).cast_mut();
        let previous_thread =
            ARMED_THREAD.swap(signals::current_thread_id(), Ordering::AcqRel);
        Self {
            previous: ARMED.swap(current, Ordering::AcqRel),
            previous_thread,
        }
    }
}

impl Drop for ArmedFilter {
    fn drop(&mut self) {
        ARMED.store(self.previous, Ordering::Release);
        ARMED_THREAD.store(self.previous_thread, Ordering::Release);
    }
}

/// Signal-handler side of the filter. Returns `true` when an armed scope took
/// the fault; the handler must then end the process.
pub(super) fn dispatch(fault: &FaultContext) -> bool {
    if ARMED_THREAD.load(Ordering::Acquire) != fault.thread_id {
        return false;
    }
    // Taken, not loaded: a second fault while responding goes to the chain.
    let scope = ARMED.swap(ptr::null_mut(), Ordering::AcqRel);
    if scope.is_null() {
        return false;
    }
    // SAFETY: the scope is owned by the faulting thread, which holds its Arc
    // until it disarms and cannot disarm while stuck in this handler.
    let scope = unsafe { &*scope };
    scope.respond(fault);
    true
}
