//! Per-call traps for unix.
//!
//! The call runs on its own guard thread while the caller blocks. The guard
//! thread owns a trap slot, reachable from the signal handler through a
//! thread-local pointer. When the call faults, the handler fills the slot,
//! wakes the caller and parks the faulted thread for good. The caller then
//! writes the dump and runs the callback outside of signal context.
//!
//! Each call has its own slot, so concurrent and nested guarded calls never
//! see each other's label or callback.
//!
//! The parked thread keeps every lock it held when it faulted, and never
//! releases them. If the fault hit while it was inside the allocator, stdio,
//! or any lock the dump encoder or callback also needs (typically after heap
//! corruption), the caller deadlocks while responding. The thread and its
//! stack are leaked in every case.

use std::cell::Cell;
use std::panic;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, Thread};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::signals::{self, AltStack};
use super::{Interception, InterceptionStrategy, StrategyKind};
use crate::fault::{FaultCell, FaultContext};
use crate::guard::FaultScope;

const RUNNING: u8 = 0;
const RETURNED: u8 = 1;
const FAULTED: u8 = 2;

struct TrapSlot {
    state: AtomicU8,
    fault: FaultCell,
    caller: Thread,
}

thread_local! {
    static ACTIVE_TRAP: Cell<*const TrapSlot> = const { Cell::new(ptr::null()) };
}

/// Traps faults per call and returns control to the caller.
///
/// The protected function runs on a dedicated thread, hence the `Send + 'static`
/// bound on guarded calls. A panic is not a fault: it resumes on the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredCall {
    stack_size: Option<usize>,
}

impl StructuredCall {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack size of the guard thread; the std default otherwise.
    pub fn with_stack_size(bytes: usize) -> Self {
        Self {
            stack_size: Some(bytes),
        }
    }
}

impl InterceptionStrategy for StructuredCall {
    const KIND: StrategyKind = StrategyKind::StructuredCall;

    fn intercept<F>(&self, call: F, scope: &Arc<FaultScope>) -> Interception
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        signals::install_fault_handler();

        let slot = Arc::new(TrapSlot {
            state: AtomicU8::new(RUNNING),
            fault: FaultCell::default(),
            caller: thread::current(),
        });
        let task = Arc::new(Mutex::new(Some(call)));

        let mut builder = thread::Builder::new().name(format!("crashguard:{}", scope.label()));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }
        let spawned = builder.spawn({
            let slot = Arc::clone(&slot);
            let task = Arc::clone(&task);
            move || run_trapped(&slot, &task)
        });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%e, "failed to start guard thread, running the call unguarded");
                let call = task
                    .lock()
                    .take()
                    .expect("invariant violated: guard thread never started but the call is gone");
                return Interception::Returned(call());
            }
        };

        loop {
            match slot.state.load(Ordering::Acquire) {
                RUNNING => thread::park(),
                FAULTED => {
                    // The faulted thread stays parked inside the handler; detach it.
                    drop(handle);
                    return Interception::Faulted(slot.fault.load());
                }
                _ => {
                    return match handle.join() {
                        Ok(status) => Interception::Returned(status),
                        Err(payload) => panic::resume_unwind(payload),
                    };
                }
            }
        }
    }
}

fn run_trapped<F>(slot: &Arc<TrapSlot>, task: &Mutex<Option<F>>) -> i32
where
    F: FnOnce() -> i32,
{
    let _done = Completion(slot);
    let call = task
        .lock()
        .take()
        .expect("invariant violated: guarded call taken twice");
    let stack = AltStack::install();
    if stack.is_none() {
        debug!("no alternate signal stack; stack overflows will not be intercepted");
    }
    let _trap = ArmedTrap::enter(slot);
    call()
}

/// Arms the slot for the current thread; disarms on drop.
struct ArmedTrap {
    previous: *const TrapSlot,
}

impl ArmedTrap {
    fn enter(slot: &Arc<TrapSlot>) -> Self {
        Self {
            previous: ACTIVE_TRAP.replace(Arc::as_ptr(slot)),
        }
    }
}

impl Drop for ArmedTrap {
    fn drop(&mut self) {
        ACTIVE_TRAP.set(self.previous);
    }
}

/// Tells the caller the call is over, whether it returned or unwound.
struct Completion<'a>(&'a TrapSlot);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.state.store(RETURNED, Ordering::Release);
        self.0.caller.unpark();
    }
}

/// Signal-handler side of the trap. Returns only if the current thread has no
/// armed trap; otherwise the faulted frame is parked forever.
pub(super) fn capture(fault: &FaultContext) {
    let slot = ACTIVE_TRAP.get();
    if slot.is_null() {
        return;
    }
    // SAFETY: the slot is kept alive by the guard thread's own frame, which
    // is blocked right here and never unwinds.
    let slot = unsafe { &*slot };
    slot.fault.store(fault);
    slot.state.store(FAULTED, Ordering::Release);
    slot.caller.unpark();
    loop {
        unsafe {
            libc::pause();
        }
    }
}
