#![forbid(unsafe_code)]
//! SlowFS public API facade.
//!
//! Re-exports the device configuration surface, the scheduler, and the
//! unit types through one crate for in-process consumers that want to
//! drive the model without the FUSE layer.

pub use slowfs_config::*;
pub use slowfs_scheduler::*;
pub use slowfs_types::*;
