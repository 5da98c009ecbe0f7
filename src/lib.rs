use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Force status logging on even when stderr is not a terminal (CI runners).
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

#[doc(hidden)]
pub fn status_enabled() -> bool {
    VERBOSE.load(Ordering::Relaxed) || ::std::io::IsTerminal::is_terminal(&::std::io::stderr())
}

/// Macro for prefixed status logging to stderr.
///
/// Prints when stderr is a terminal or verbose logging was requested.
///
/// Usage:
/// ```ignore
/// log_status!("deploy", "Fetching {} from {}", branch, remote);
/// log_status!("supervisor", "Started '{}' (pid {})", name, pid);
/// ```
#[macro_export]
macro_rules! log_status {
    ($prefix:expr, $($arg:tt)*) => {
        if $crate::status_enabled() {
            eprintln!(concat!("[", $prefix, "] {}"), format_args!($($arg)*));
        }
    };
}

pub mod core;
pub mod utils;

// Re-export everything from core for ergonomic library use
// Users can write `redeploy::supervisor` instead of `redeploy::core::supervisor`
pub use core::*;
pub use utils::*;
