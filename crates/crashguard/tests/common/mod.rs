#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use crashguard::DumpCallback;
use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Set in a re-executed test binary; holds the dump directory for the child.
pub const CHILD_ENV: &str = "CRASHGUARD_TEST_CHILD";

// ── Fault triggers ───────────────────────────────────────────────

/// A real invalid memory access, delivered by the kernel as SIGSEGV.
pub fn segfault() -> i32 {
    unsafe {
        std::ptr::write_volatile(8usize as *mut u32, 0xdead);
    }
    0
}

#[cfg(unix)]
pub fn raise(signal: libc::c_int) -> i32 {
    unsafe {
        libc::raise(signal);
    }
    0
}

// ── Dumps and callbacks ──────────────────────────────────────────

pub fn dumps_in(dir: &Path, label: &str) -> Vec<PathBuf> {
    let prefix = format!("{label}-");
    let mut dumps: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&prefix) && name.ends_with(".dump"))
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    dumps.sort();
    dumps
}

/// A callback that remembers every path it was given.
pub fn recorder() -> (DumpCallback, Arc<Mutex<Vec<PathBuf>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let callback: DumpCallback = {
        let seen = Arc::clone(&seen);
        Arc::new(move |path: &Path| seen.lock().push(path.to_path_buf()))
    };
    (callback, seen)
}

// ── Log capture ──────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Run `f` with a warn-level subscriber writing into this buffer.
    pub fn scoped<R>(&self, f: impl FnOnce() -> R) -> R {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ── Child processes ──────────────────────────────────────────────

/// Dump directory handed to this process by [`run_child`], if it is one.
pub fn child_dump_dir() -> Option<PathBuf> {
    std::env::var_os(CHILD_ENV).map(PathBuf::from)
}

/// Re-run a single test of the current binary in child mode.
pub fn run_child(test_name: &str, dump_dir: &Path, envs: &[(&str, &str)]) -> Output {
    let exe = std::env::current_exe().expect("current test binary");
    Command::new(exe)
        .args(["--exact", test_name, "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, dump_dir)
        .envs(envs.iter().copied())
        .output()
        .expect("spawn child test process")
}

#[cfg(unix)]
pub fn terminating_signal(output: &Output) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    output.status.signal()
}
