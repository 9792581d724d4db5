//! sandterm: an interactive code-execution sandbox service
//!
//! Clients connect over WebSocket, authenticate with a shared secret, and send
//! source code. The service builds it in a private scratch directory, runs it
//! attached to a pseudo-terminal, and streams the terminal back until the
//! program exits or is killed.
//!
//! # Architecture
//!
//! ## Configuration ([`config`])
//! - [`config::config`]: Service configuration loading and validation
//! - [`config::types`]: Shared type definitions and closed enums
//!
//! ## Language Adapters ([`judge`])
//! - [`judge::probe`]: Host toolchain detection (capability table)
//! - [`judge::adapter`]: Adapter contract (materialize, compile, launch)
//! - [`judge::languages`]: Python, C++ and Java adapters
//! - [`judge::dispatch`]: Toolchain gate and strict compile step
//!
//! ## Process Execution ([`exec`])
//! - [`exec::compile`]: Captured compiler invocations with a wall-time bound
//! - [`exec::pty`]: Pseudo-terminal process controller
//!
//! ## Sessions ([`session`])
//! - [`session::protocol`]: Wire messages
//! - [`session::run`]: Per-run build/launch/forward task
//! - [`session`]: Handshake and run lifecycle state machine
//!
//! ## Safety & Cleanup ([`safety`])
//! - [`safety::workspace`]: Run-scoped scratch directories
//! - [`safety::safe_cleanup`]: Symlink-safe recursive removal
//!
//! ## Observability ([`observability`])
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Utilities ([`utils`])
//! - [`utils::env_hygiene`]: Child process environment
//! - [`utils::output`]: Incremental terminal output decoding
//!
//! # Design Principles
//!
//! 1. **One run per session** - a new run always reaps the previous one first
//! 2. **Exit is last** - every run's final message is its `exit`
//! 3. **Cleanup never fails the caller** - removal errors are logged, not returned
//! 4. **Capabilities are probed once** - the table is immutable and shared

// Configuration
pub mod config;

// Language adapters
pub mod judge;

// Process execution
pub mod exec;

// Sessions
pub mod session;

// Safety & Cleanup
pub mod safety;

// Observability
pub mod observability;

// Utilities
pub mod utils;

// HTTP/WebSocket front end
pub mod server;

// Shutdown signals
pub mod signal;

// CLI entrypoint wiring for the sandterm binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
