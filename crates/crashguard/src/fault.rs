use std::fmt;
#[cfg(unix)]
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

/// What kind of fault the platform reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// Invalid memory access (SIGSEGV).
    Segmentation,
    /// Misaligned or nonexistent physical address (SIGBUS).
    Bus,
    /// Illegal instruction (SIGILL).
    IllegalInstruction,
    /// Arithmetic trap, e.g. integer division by zero (SIGFPE).
    FloatingPoint,
    /// Abnormal termination (SIGABRT).
    Abort,
    Other(i32),
}

impl FaultKind {
    #[cfg(unix)]
    pub fn from_signal(signal: i32) -> Self {
        match signal {
            libc::SIGSEGV => Self::Segmentation,
            libc::SIGBUS => Self::Bus,
            libc::SIGILL => Self::IllegalInstruction,
            libc::SIGFPE => Self::FloatingPoint,
            libc::SIGABRT => Self::Abort,
            other => Self::Other(other),
        }
    }

    #[cfg(not(unix))]
    pub fn from_signal(signal: i32) -> Self {
        Self::Other(signal)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Segmentation => "SIGSEGV",
            Self::Bus => "SIGBUS",
            Self::IllegalInstruction => "SIGILL",
            Self::FloatingPoint => "SIGFPE",
            Self::Abort => "SIGABRT",
            Self::Other(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(signal) => write!(f, "signal {signal}"),
            kind => f.write_str(kind.name()),
        }
    }
}

/// Platform description of one fault.
///
/// Only the snapshot encoder looks inside; the guard itself just carries it
/// from the interception point to the dump writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultContext {
    pub signal: i32,
    /// `si_code` of the delivered signal.
    pub code: i32,
    pub fault_address: usize,
    /// Zero where the platform does not expose it.
    pub instruction_pointer: usize,
    /// OS id of the faulting thread.
    pub thread_id: u64,
}

impl FaultContext {
    pub fn kind(&self) -> FaultKind {
        FaultKind::from_signal(self.signal)
    }
}

/// Lock-free holder for a [`FaultContext`], written from signal context.
#[cfg(unix)]
#[derive(Debug, Default)]
pub(crate) struct FaultCell {
    signal: AtomicI32,
    code: AtomicI32,
    fault_address: AtomicUsize,
    instruction_pointer: AtomicUsize,
    thread_id: AtomicU64,
}

#[cfg(unix)]
impl FaultCell {
    /// Publication is done by the caller with a release store on its own flag.
    pub(crate) fn store(&self, fault: &FaultContext) {
        self.signal.store(fault.signal, Ordering::Relaxed);
        self.code.store(fault.code, Ordering::Relaxed);
        self.fault_address
            .store(fault.fault_address, Ordering::Relaxed);
        self.instruction_pointer
            .store(fault.instruction_pointer, Ordering::Relaxed);
        self.thread_id.store(fault.thread_id, Ordering::Relaxed);
    }

    pub(crate) fn load(&self) -> FaultContext {
        FaultContext {
            signal: self.signal.load(Ordering::Relaxed),
            code: self.code.load(Ordering::Relaxed),
            fault_address: self.fault_address.load(Ordering::Relaxed),
            instruction_pointer: self.instruction_pointer.load(Ordering::Relaxed),
            thread_id: self.thread_id.load(Ordering::Relaxed),
        }
    }
}
