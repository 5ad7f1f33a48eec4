// crates/dpam-core/src/paths.rs

//! Output-directory resolution.
//!
//! Two layouts exist:
//! - **sharded** (default for new runs): each stage writes into its own
//!   `step{NN}_{name}` subdirectory, batch-shared artefacts go under
//!   `_batch/`, and final domain files are additionally copied to
//!   `results/`;
//! - **flat** (legacy): everything lives in the root directory.
//!
//! Checkpoint files and user inputs (`.cif`, `.json`) always stay at the
//! root regardless of layout.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Subdirectory name for a stage number in the sharded layout.
#[must_use]
pub const fn step_dir_name(step: u8) -> Option<&'static str> {
    Some(match step {
        1 => "step01_prepare",
        2 => "step02_hhsearch",
        3 => "step03_foldseek",
        4 => "step04_filter",
        5 => "step05_map_ecod",
        6 => "step06_candidates",
        7 => "step07_dali",
        8 => "step08_analyze",
        9 => "step09_support",
        10 => "step10_filter_domains",
        11 => "step11_sse",
        12 => "step12_disorder",
        13 => "step13_parse",
        15 => "step15_domass_features",
        16 => "step16_domass_predict",
        17 => "step17_confident",
        18 => "step18_mapping",
        19 => "step19_merge_candidates",
        20 => "step20_extract",
        21 => "step21_compare",
        22 => "step22_merge",
        23 => "step23_predictions",
        24 => "step24_integrate",
        _ => return None,
    })
}

/// Resolves file paths for sharded or flat working directories.
#[derive(Clone, Debug)]
pub struct PathResolver {
    root: PathBuf,
    sharded: bool,
}

impl PathResolver {
    /// Create a resolver over `root` with the given layout.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, sharded: bool) -> Self {
        Self {
            root: root.into(),
            sharded,
        }
    }

    /// Root working directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether this resolver uses the sharded layout.
    #[must_use]
    pub const fn sharded(&self) -> bool {
        self.sharded
    }

    /// Output directory for a stage number, created on demand in sharded
    /// mode. Unknown numbers (and flat mode) resolve to the root.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn step_dir(&self, step: u8) -> Result<PathBuf> {
        if !self.sharded {
            return Ok(self.root.clone());
        }
        let Some(name) = step_dir_name(step) else {
            return Ok(self.root.clone());
        };
        let dir = self.root.join(name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating stage directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Directory for final result files.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn results_dir(&self) -> Result<PathBuf> {
        if !self.sharded {
            return Ok(self.root.clone());
        }
        let dir = self.root.join("results");
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating results directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Directory for batch-mode shared resources.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn batch_dir(&self) -> Result<PathBuf> {
        if !self.sharded {
            return Ok(self.root.clone());
        }
        let dir = self.root.join("_batch");
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating batch directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Per-protein checkpoint file (always at the root).
    #[must_use]
    pub fn state_file(&self, prefix: &str) -> PathBuf {
        self.root.join(format!(".{prefix}.dpam_state.json"))
    }

    /// Batch checkpoint file (always at the root).
    #[must_use]
    pub fn batch_state_file(&self) -> PathBuf {
        self.root.join("_batch_state.json")
    }

    /// Detect whether a working directory already uses the sharded layout
    /// (`step01_prepare/` exists as a directory).
    #[must_use]
    pub fn detect_layout(root: &Path) -> bool {
        root.join("step01_prepare").is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_resolves_to_root() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path(), false);
        assert_eq!(resolver.step_dir(3).unwrap(), tmp.path());
        assert_eq!(resolver.results_dir().unwrap(), tmp.path());
    }

    #[test]
    fn sharded_creates_step_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = PathResolver::new(tmp.path(), true);
        let dir = resolver.step_dir(13).unwrap();
        assert!(dir.ends_with("step13_parse"));
        assert!(dir.is_dir());
    }

    #[test]
    fn layout_detection() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!PathResolver::detect_layout(tmp.path()));
        std::fs::create_dir(tmp.path().join("step01_prepare")).unwrap();
        assert!(PathResolver::detect_layout(tmp.path()));
    }

    #[test]
    fn state_files_stay_in_root() {
        let resolver = PathResolver::new("/work", true);
        assert_eq!(
            resolver.state_file("AF-P1"),
            PathBuf::from("/work/.AF-P1.dpam_state.json")
        );
        assert_eq!(
            resolver.batch_state_file(),
            PathBuf::from("/work/_batch_state.json")
        );
    }
}
