//! The process-wide fault signal handler shared by the unix strategies.
//!
//! Installed once, on first use. A fault is offered to the structured trap of
//! the faulting thread first, then to the armed global filter; anything else
//! goes to whatever handler was installed before ours.

use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::{Once, OnceLock};

use libc::c_int;

use super::{global_filter, structured};
use crate::fault::FaultContext;

pub(crate) const FAULT_SIGNALS: [c_int; 5] = [
    libc::SIGSEGV,
    libc::SIGBUS,
    libc::SIGILL,
    libc::SIGFPE,
    libc::SIGABRT,
];

/// Room for the handler and, under the global filter, for writing the dump.
const ALT_STACK_SIZE: usize = 256 * 1024;

static INSTALL: Once = Once::new();
static PREVIOUS: OnceLock<[libc::sigaction; FAULT_SIGNALS.len()]> = OnceLock::new();

pub(crate) fn install_fault_handler() {
    INSTALL.call_once(|| {
        let mut previous: [libc::sigaction; FAULT_SIGNALS.len()] = unsafe { mem::zeroed() };
        for (slot, &signal) in previous.iter_mut().zip(FAULT_SIGNALS.iter()) {
            unsafe {
                let mut sa: libc::sigaction = mem::zeroed();
                sa.sa_sigaction = handle_fault as *const () as usize;
                sa.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
                libc::sigemptyset(&mut sa.sa_mask);
                libc::sigaction(signal, &sa, slot);
            }
        }
        let _ = PREVIOUS.set(previous);
    });
}

extern "C" fn handle_fault(signal: c_int, info: *mut libc::siginfo_t, ucontext: *mut c_void) {
    let fault = unsafe { fault_context(signal, info, ucontext) };

    // Only returns when the faulting thread is not running a structured call.
    structured::capture(&fault);

    if global_filter::dispatch(&fault) {
        unsafe { terminate(signal, info) };
        return;
    }

    unsafe { chain(signal, info, ucontext) };
}

// ── Fault context (async-signal-safe) ────────────────────────────

unsafe fn fault_context(
    signal: c_int,
    info: *mut libc::siginfo_t,
    ucontext: *mut c_void,
) -> FaultContext {
    let (code, fault_address) = if info.is_null() {
        (0, 0)
    } else {
        unsafe { ((*info).si_code, fault_address(info)) }
    };
    FaultContext {
        signal,
        code,
        fault_address,
        instruction_pointer: unsafe { instruction_pointer(ucontext) },
        thread_id: current_thread_id(),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
unsafe fn fault_address(info: *mut libc::siginfo_t) -> usize {
    unsafe { (*info).si_addr() as usize }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
unsafe fn fault_address(info: *mut libc::siginfo_t) -> usize {
    unsafe { (*info).si_addr as usize }
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
unsafe fn instruction_pointer(ucontext: *mut c_void) -> usize {
    if ucontext.is_null() {
        return 0;
    }
    let uc = unsafe { &*(ucontext as *const libc::ucontext_t) };
    uc.uc_mcontext.gregs[libc::REG_RIP as usize] as usize
}

#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "aarch64"))]
unsafe fn instruction_pointer(ucontext: *mut c_void) -> usize {
    if ucontext.is_null() {
        return 0;
    }
    let uc = unsafe { &*(ucontext as *const libc::ucontext_t) };
    uc.uc_mcontext.pc as usize
}

#[cfg(not(all(
    target_os = "linux",
    target_env = "gnu",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
unsafe fn instruction_pointer(_ucontext: *mut c_void) -> usize {
    0
}

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn current_thread_id() -> u64 {
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn current_thread_id() -> u64 {
    unsafe { libc::pthread_self() as usize as u64 }
}

// ── Leaving the handler ──────────────────────────────────────────

/// Restore the default action so the fault ends the process once we return.
unsafe fn terminate(signal: c_int, info: *mut libc::siginfo_t) {
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = libc::SIG_DFL;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(signal, &sa, ptr::null_mut());

        // Sent signals (raise, kill, abort) do not repeat when we return.
        let sent = info.is_null() || (*info).si_code <= 0;
        if sent || signal == libc::SIGABRT {
            libc::raise(signal);
        }
    }
}

unsafe fn chain(signal: c_int, info: *mut libc::siginfo_t, ucontext: *mut c_void) {
    let previous = PREVIOUS.get().and_then(|previous| {
        FAULT_SIGNALS
            .iter()
            .position(|&s| s == signal)
            .map(|i| previous[i])
    });

    let Some(previous) = previous else {
        unsafe { terminate(signal, info) };
        return;
    };

    if previous.sa_sigaction == libc::SIG_DFL || previous.sa_sigaction == libc::SIG_IGN {
        unsafe { terminate(signal, info) };
        return;
    }

    unsafe {
        if previous.sa_flags & libc::SA_SIGINFO != 0 {
            let handler: extern "C" fn(c_int, *mut libc::siginfo_t, *mut c_void) =
                mem::transmute(previous.sa_sigaction);
            handler(signal, info, ucontext);
        } else {
            let handler: extern "C" fn(c_int) = mem::transmute(previous.sa_sigaction);
            handler(signal);
        }
    }
}

// ── Alternate signal stack ───────────────────────────────────────

/// Per-thread alternate stack so a stack overflow can still be handled.
/// Restores the previous one on drop.
pub(crate) struct AltStack {
    _memory: Vec<u8>,
    previous: libc::stack_t,
}

impl AltStack {
    pub(crate) fn install() -> Option<Self> {
        let mut memory = vec![0u8; ALT_STACK_SIZE];
        unsafe {
            let mut stack: libc::stack_t = mem::zeroed();
            stack.ss_sp = memory.as_mut_ptr().cast();
            stack.ss_size = memory.len();
            let mut previous: libc::stack_t = mem::zeroed();
            if libc::sigaltstack(&stack, &mut previous) != 0 {
                return None;
            }
            Some(Self {
                _memory: memory,
                previous,
            })
        }
    }
}

impl Drop for AltStack {
    fn drop(&mut self) {
        unsafe {
            libc::sigaltstack(&self.previous, ptr::null_mut());
        }
    }
}
