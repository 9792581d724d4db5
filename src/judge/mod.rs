//! Language adapters.
//!
//! Session and process code stays language-agnostic. Adapters decide how a
//! source file is named, compiled, and launched for each language; the probe
//! decides whether the host can serve that language at all.

pub mod adapter;
pub mod dispatch;
pub mod languages;
pub mod probe;
pub mod registry;

pub use registry::adapter_for;
