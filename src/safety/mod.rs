//! Safety and cleanup
//!
//! Run-scoped scratch directories and removal that never escapes them.

pub mod safe_cleanup;
pub mod workspace;
