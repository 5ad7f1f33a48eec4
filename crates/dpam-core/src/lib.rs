// crates/dpam-core/src/lib.rs

//! Canonical core types used across the DPAM workspace.
//!
//! Everything the stage kernels and the pipeline agree on lives here: the
//! stage enumeration with its on-disk names and criticality, the residue
//! range codec (`"a1-b1,a2-b2,…"`), coordinate ingestion for mmCIF/PDB
//! structures, PAE matrix ingestion, FASTA I/O, and the path resolver that
//! maps `(root, layout, stage)` to output directories.
//!
//! Residue indexing is 1-based throughout; ranges are closed intervals.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    clippy::all,
    clippy::unwrap_used,
    clippy::expect_used
)]

pub mod aa;
pub mod fasta;
pub mod pae;
pub mod paths;
pub mod pdb;
pub mod range;
pub mod stage;

pub use paths::PathResolver;
pub use stage::Stage;
