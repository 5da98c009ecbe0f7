// Public modules
pub mod config;
pub mod error;
pub mod git;
pub mod install;
pub mod notify;
pub mod paths;
pub mod pipeline;
pub mod revision;
pub mod supervisor;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
