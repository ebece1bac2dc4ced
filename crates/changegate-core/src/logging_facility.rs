//! Structured logging facility
//!
//! - Single initialization point via `init(profile)`
//! - Canonical macros (`log_op_start!`, `log_op_end!`, `log_op_error!`,
//!   `log_degraded!`) emitting the field names in `changegate_core_types::schema`
//! - Test capture mode for deterministic assertions
//!
//! ```rust
//! use changegate_core::logging_facility::{init, Profile};
//!
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};
