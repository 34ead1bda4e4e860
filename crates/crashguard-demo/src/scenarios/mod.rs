pub mod completes;
pub mod faults;

use std::path::Path;
use std::sync::Arc;

use crashguard::DumpCallback;

/// Callback that tells the user where the dump went.
pub fn print_dump() -> DumpCallback {
    Arc::new(|dump: &Path| {
        if dump.as_os_str().is_empty() {
            println!("crash callback: no dump could be written");
        } else {
            println!("crash callback: dump written to {}", dump.display());
        }
    })
}
