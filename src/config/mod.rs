//! Configuration
//!
//! Service configuration and the shared types every module speaks.

pub mod config;
pub mod types;
