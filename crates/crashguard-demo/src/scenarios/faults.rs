use crashguard::{CrashGuard, GuardConfig, GuardResult, registry};

use super::print_dump;

fn config(label: Option<&str>) -> GuardConfig {
    let config = GuardConfig::new().with_shared_callback(print_dump());
    match label {
        Some(label) => config.with_label(label),
        None => config,
    }
}

pub fn segfault(guard: &CrashGuard, label: Option<&str>) -> GuardResult {
    guard.run_with(config(label), write_to_unmapped_page)
}

pub fn illegal_instruction(guard: &CrashGuard, label: Option<&str>) -> GuardResult {
    guard.run_with(config(label), || {
        println!("protected function raising SIGILL");
        raise_illegal_instruction()
    })
}

pub fn abort(guard: &CrashGuard, label: Option<&str>) -> GuardResult {
    guard.run_with(config(label), || {
        println!("protected function aborting");
        std::process::abort()
    })
}

/// Fault with no callback anywhere: the crash is reported through the log.
pub fn unlogged(guard: &CrashGuard, label: Option<&str>) -> GuardResult {
    registry::set(None, label);
    guard.run(write_to_unmapped_page)
}

fn write_to_unmapped_page() -> i32 {
    println!("protected function writing to an unmapped address");
    unsafe {
        std::ptr::write_volatile(8usize as *mut u32, 1);
    }
    0
}

#[cfg(unix)]
fn raise_illegal_instruction() -> i32 {
    unsafe {
        libc::raise(libc::SIGILL);
    }
    0
}

#[cfg(not(unix))]
fn raise_illegal_instruction() -> i32 {
    std::process::abort()
}
