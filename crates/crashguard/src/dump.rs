//! Dump naming and writing.
//!
//! A dump is named `<dir>/<label>-<YYYYMMDD>-<HHMMSS>-<pid>-<tid>-<seq>.dump`
//! (UTC). `seq` is a process-wide counter, so two faults within the same
//! second on the same thread still get distinct names, and the file is opened
//! with `create_new` so an existing dump is never overwritten.

use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use facet::Facet;
use tracing::debug;

use crate::error::DumpError;
use crate::fault::FaultContext;
use crate::process::ProcessContext;

/// Label used when none is configured.
pub const DEFAULT_LABEL: &str = "crashguard";
pub const DUMP_EXTENSION: &str = "dump";
/// Longest dump path, in bytes, the writer accepts.
pub const MAX_DUMP_PATH_LEN: usize = 4096;

const REPORT_FORMAT: &str = "crashguard.fault-report.v1";

static DUMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Outcome of one dump attempt. The path is empty exactly when nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpDescriptor {
    path: PathBuf,
    created: bool,
}

impl DumpDescriptor {
    pub(crate) fn written(path: PathBuf) -> Self {
        Self {
            path,
            created: true,
        }
    }

    pub(crate) fn missing() -> Self {
        Self {
            path: PathBuf::new(),
            created: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

/// The platform's diagnostic capability: turns a fault into snapshot bytes.
pub trait SnapshotEncoder: Send + Sync {
    fn encode(&self, fault: &FaultContext, file: &mut File) -> io::Result<()>;
}

/// Contents of the default snapshot.
#[derive(Debug, Clone, Facet)]
pub struct FaultReport {
    pub format: String,
    pub signal: i32,
    pub signal_name: String,
    pub code: i32,
    pub fault_address: u64,
    pub instruction_pointer: u64,
    pub pid: u32,
    pub tid: u64,
    /// `/proc/self/maps` where available, for symbolication.
    pub memory_maps: Option<String>,
}

impl FaultReport {
    pub fn capture(fault: &FaultContext) -> Self {
        Self {
            format: REPORT_FORMAT.to_string(),
            signal: fault.signal,
            signal_name: fault.kind().name().to_string(),
            code: fault.code,
            fault_address: fault.fault_address as u64,
            instruction_pointer: fault.instruction_pointer as u64,
            pid: std::process::id(),
            tid: fault.thread_id,
            memory_maps: memory_maps(),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn memory_maps() -> Option<String> {
    fs::read_to_string("/proc/self/maps").ok()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn memory_maps() -> Option<String> {
    None
}

/// Writes a [`FaultReport`] as one line of JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultReportEncoder;

impl SnapshotEncoder for FaultReportEncoder {
    fn encode(&self, fault: &FaultContext, file: &mut File) -> io::Result<()> {
        let report = FaultReport::capture(fault);
        let json = facet_json::to_string(&report)
            .map_err(|e| io::Error::other(format!("serialize fault report: {e}")))?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")
    }
}

/// Deterministic dump path for the given inputs.
pub fn compute_path(
    label: Option<&str>,
    directory: &Path,
    pid: u32,
    tid: u64,
    timestamp: DateTime<Utc>,
    sequence: u64,
) -> PathBuf {
    let label = sanitize_label(label);
    let stamp = timestamp.format("%Y%m%d-%H%M%S");
    directory.join(format!(
        "{label}-{stamp}-{pid}-{tid}-{sequence}.{DUMP_EXTENSION}"
    ))
}

/// Keeps a label inside one path component.
fn sanitize_label(label: Option<&str>) -> Cow<'_, str> {
    let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
        return Cow::Borrowed(DEFAULT_LABEL);
    };
    let clean = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    if label.chars().all(clean) && label != "." && label != ".." {
        return Cow::Borrowed(label);
    }
    Cow::Owned(
        label
            .chars()
            .map(|c| if clean(c) && c != '.' { c } else { '_' })
            .collect(),
    )
}

/// Names and writes dumps through a [`SnapshotEncoder`].
#[derive(Clone)]
pub struct DumpWriter {
    encoder: Arc<dyn SnapshotEncoder>,
}

impl Default for DumpWriter {
    fn default() -> Self {
        Self::new(FaultReportEncoder)
    }
}

impl DumpWriter {
    pub fn new(encoder: impl SnapshotEncoder + 'static) -> Self {
        Self {
            encoder: Arc::new(encoder),
        }
    }

    /// Path for the next dump of this process; never repeats within the process.
    pub fn next_path(&self, label: Option<&str>, process: &dyn ProcessContext, tid: u64) -> PathBuf {
        let sequence = DUMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        compute_path(
            label,
            &process.dump_directory(),
            process.process_id(),
            tid,
            process.now(),
            sequence,
        )
    }

    /// Materialize a dump at `path`. Failures yield an empty descriptor.
    ///
    /// Reporting the failure is left to the caller; see
    /// [`crate::FaultScope::respond`].
    pub fn write(&self, fault: &FaultContext, path: &Path) -> DumpDescriptor {
        match self.try_write(fault, path) {
            Ok(()) => DumpDescriptor::written(path.to_path_buf()),
            Err(e) => {
                debug!(%e, "failed to write crash dump");
                DumpDescriptor::missing()
            }
        }
    }

    pub fn try_write(&self, fault: &FaultContext, path: &Path) -> Result<(), DumpError> {
        if path.as_os_str().len() > MAX_DUMP_PATH_LEN {
            return Err(DumpError::PathTooLong {
                path: path.to_path_buf(),
                max: MAX_DUMP_PATH_LEN,
            });
        }
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| DumpError::MissingDirectory {
                path: path.to_path_buf(),
            })?;
        fs::create_dir_all(dir).map_err(|source| DumpError::CreateDirectory {
            dir: dir.to_path_buf(),
            source,
        })?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| DumpError::CreateFile {
                path: path.to_path_buf(),
                source,
            })?;

        let result = self
            .encoder
            .encode(fault, &mut file)
            .map_err(|source| DumpError::Encode {
                path: path.to_path_buf(),
                source,
            })
            .and_then(|()| {
                file.flush()
                    .and_then(|()| file.sync_all())
                    .map_err(|source| DumpError::Sync {
                        path: path.to_path_buf(),
                        source,
                    })
            });

        if result.is_err() {
            drop(file);
            let _ = fs::remove_file(path);
        }
        result
    }
}
