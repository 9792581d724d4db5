//! Process execution
//!
//! Captured compile invocations and interactive pseudo-terminal processes.

pub mod compile;
pub mod pty;
