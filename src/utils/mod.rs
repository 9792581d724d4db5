//! Utilities
//!
//! Cross-cutting utilities for environment hygiene and terminal output decoding.

pub mod env_hygiene;
pub mod output;
