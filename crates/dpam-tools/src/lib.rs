// crates/dpam-tools/src/lib.rs

//! Adapters for the external tools DPAM drives.
//!
//! Each adapter is a pair of `(invoke, parse)` functions. Invocation
//! failures (non-zero exit, crash, unlaunchable binary) surface as a typed
//! [`ToolFailure`] and are never silently downgraded. Parse failures of
//! individual records are logged and the record skipped; a malformed file
//! as a whole is an error.
//!
//! Adapters work against each tool's native output format; no bespoke
//! preprocessing. Workers never mutate process-global state: absolute paths
//! everywhere, private working directories where a tool needs one.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

pub mod dali;
pub mod dssp;
pub mod foldseek;
pub mod hhsuite;
mod process;

pub use process::ToolFailure;
