//! Cleanup of problem paths.
//!
//! Containment and the threshold guard are checked for the batch as a
//! whole before anything is erased or deleted. Per target, the erase is
//! always issued before the disk deletion.

mod coordinator;
mod error;

pub use coordinator::{CleanupCoordinator, CleanupResult};
pub use error::{CleanupError, TargetFailure};
