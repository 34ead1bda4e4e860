use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Overrides the directory dumps are written to.
pub const DUMP_DIR_ENV: &str = "CRASHGUARD_DUMP_DIR";

/// Where and when: the process facts a dump name is built from.
pub trait ProcessContext: Send + Sync {
    fn dump_directory(&self) -> PathBuf;
    fn process_id(&self) -> u32;
    fn now(&self) -> DateTime<Utc>;
}

/// The running process: `CRASHGUARD_DUMP_DIR` or the OS temp dir, real pid, wall clock.
#[derive(Debug, Clone, Default)]
pub struct SystemProcess {
    dump_dir: Option<PathBuf>,
}

impl SystemProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the dump directory, ignoring the environment.
    pub fn with_dump_dir(dump_dir: impl Into<PathBuf>) -> Self {
        Self {
            dump_dir: Some(dump_dir.into()),
        }
    }
}

impl ProcessContext for SystemProcess {
    fn dump_directory(&self) -> PathBuf {
        if let Some(dir) = &self.dump_dir {
            return dir.clone();
        }
        std::env::var_os(DUMP_DIR_ENV)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir)
    }

    fn process_id(&self) -> u32 {
        std::process::id()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
