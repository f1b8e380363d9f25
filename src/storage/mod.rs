//! Storage Module
//!
//! Per-file locks and the local committed-content store.

mod locks;
mod local;

pub use locks::{FileLock, FileLockTable};
pub use local::{validate_file_name, LocalStore};
