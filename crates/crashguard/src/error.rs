use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Why a dump could not be materialized.
///
/// Never escapes a guarded call: [`crate::DumpWriter::write`] turns it into an
/// empty [`crate::DumpDescriptor`] after logging it.
#[derive(Debug)]
pub enum DumpError {
    PathTooLong { path: PathBuf, max: usize },
    MissingDirectory { path: PathBuf },
    CreateDirectory { dir: PathBuf, source: io::Error },
    CreateFile { path: PathBuf, source: io::Error },
    Encode { path: PathBuf, source: io::Error },
    Sync { path: PathBuf, source: io::Error },
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathTooLong { path, max } => write!(
                f,
                "dump path is {} bytes, limit is {max}: {}",
                path.as_os_str().len(),
                path.display()
            ),
            Self::MissingDirectory { path } => {
                write!(f, "dump path has no parent directory: {}", path.display())
            }
            Self::CreateDirectory { dir, source } => {
                write!(f, "create dump directory {}: {source}", dir.display())
            }
            Self::CreateFile { path, source } => {
                write!(f, "create dump file {}: {source}", path.display())
            }
            Self::Encode { path, source } => {
                write!(f, "encode snapshot into {}: {source}", path.display())
            }
            Self::Sync { path, source } => write!(f, "flush dump {}: {source}", path.display()),
        }
    }
}

impl Error for DumpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDirectory { source, .. }
            | Self::CreateFile { source, .. }
            | Self::Encode { source, .. }
            | Self::Sync { source, .. } => Some(source),
            Self::PathTooLong { .. } | Self::MissingDirectory { .. } => None,
        }
    }
}
