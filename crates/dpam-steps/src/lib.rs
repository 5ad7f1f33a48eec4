// crates/dpam-steps/src/lib.rs

//! Stage kernels of the DPAM pipeline.
//!
//! Each module implements one numbered stage as a function from
//! `(prefix, working directory, reference data)` to files on disk. Kernels
//! return `Ok(())` on success; data-absent situations (no hits, empty
//! candidate lists) are successes that emit empty outputs, while missing
//! required inputs and tool crashes are errors. The runner in
//! `dpam-pipeline` owns checkpointing and the criticality policy.
//!
//! Orderings, gap tolerances, thresholds, and tie-breaks inside the kernels
//! are part of the pipeline's contract; outputs are deterministic for
//! identical inputs.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

use dpam_core::PathResolver;
use dpam_refdata::ReferenceData;
use std::path::{Path, PathBuf};

pub mod analyze_dali;
pub mod compare_domains;
pub mod confident;
pub mod dali_candidates;
pub mod disorder;
pub mod domass_features;
pub mod domass_predict;
pub mod extract_domains;
pub mod filter_domains;
pub mod foldseek;
pub mod foldseek_filter;
pub mod hhsearch;
pub mod integrate;
pub mod iterative_dali;
pub mod map_ecod;
pub mod mapping;
pub mod merge_candidates;
pub mod merge_domains;
pub mod parse_domains;
pub mod predictions;
pub mod prepare;
pub mod sse;
pub mod support;

pub mod hits;

/// Everything a kernel may need for one protein.
pub struct StepContext<'a> {
    pub prefix: &'a str,
    pub resolver: &'a PathResolver,
    pub data_dir: &'a Path,
    pub refdata: &'a ReferenceData,
    pub cpus: usize,
    pub skip_addss: bool,
    pub scratch_dir: Option<&'a Path>,
    pub dali_workers: Option<usize>,
}

impl StepContext<'_> {
    /// Path of `{prefix}{suffix}` inside a stage directory.
    ///
    /// # Errors
    /// Returns an error if the stage directory cannot be created.
    pub fn stage_file(&self, step: u8, suffix: &str) -> anyhow::Result<PathBuf> {
        Ok(self
            .resolver
            .step_dir(step)?
            .join(format!("{}{suffix}", self.prefix)))
    }

    /// Path of `{prefix}{suffix}` at the working-directory root.
    #[must_use]
    pub fn root_file(&self, suffix: &str) -> PathBuf {
        self.resolver.root().join(format!("{}{suffix}", self.prefix))
    }

    /// Worker count for the stage-7 pool.
    #[must_use]
    pub fn dali_worker_count(&self) -> usize {
        self.dali_workers.unwrap_or(self.cpus).max(1)
    }
}
