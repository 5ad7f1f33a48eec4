// crates/dpam-pipeline/src/clean.rs

//! Intermediate-file cleanup.
//!
//! Files are classified by glob-ish pattern into *preserve* (inputs,
//! per-stage primary outputs, final domains, checkpoints) and
//! *intermediate* (MSAs, profiles, tool logs, leftover iterative-DALI
//! scratch). Preserve always wins on conflict; checkpoints are preserved
//! unless explicitly released. Dry-run lists without deleting.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Regenerable intermediates, matched against file names (directories are
/// matched on the trailing pattern `*/`).
const INTERMEDIATE_PATTERNS: &[&str] = &[
    "*.a3m",
    "*.a3m.ss",
    "*.hmm",
    "*.hhm",
    "*.hhr",
    "*.hhsearch.log",
    "*.hhblits.log",
    "*.hhmake.log",
    "*.dssp",
    "*.foldseek.tmp",
    "iterativeDali_*/",
];

/// Always preserved.
const PRESERVE_PATTERNS: &[&str] = &[
    "*.cif",
    "*.pdb",
    "*.json",
    "*.fa",
    "*.fasta",
    "*.hhsearch",
    "*.foldseek",
    "*.foldseek.flt.result",
    "*.map2ecod.result",
    "*_hits4Dali",
    "*_iterativdDali_hits",
    "*_good_hits",
    "*_sequence.result",
    "*_structure.result",
    "*.goodDomains",
    "*.sse",
    "*.diso",
    "*.step13_domains",
    "*.step15_features",
    "*.step16_predictions",
    "*.step17_confident_predictions",
    "*.step18_mappings",
    "*.step19_merge_candidates",
    "*.step19_merge_info",
    "*.step21_comparisons",
    "*.step22_merged_domains",
    "*.step23_predictions",
    "*.finalDPAM.domains",
    "*_domains",
];

/// Cleanup counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct CleanCounts {
    pub removed: usize,
    pub bytes: u64,
}

/// Simple `*`-only glob against a file name.
#[must_use]
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    let pattern = pattern.strip_suffix('/').unwrap_or(pattern);
    match pattern.split_once('*') {
        None => name == pattern,
        Some((head, tail)) => {
            // One star is all these patterns use.
            name.len() >= head.len() + tail.len()
                && name.starts_with(head)
                && name.ends_with(tail)
        }
    }
}

/// Whether a directory entry is removable under the preserve-wins policy.
#[must_use]
pub fn is_removable(name: &str, is_dir: bool, keep_checkpoints: bool) -> bool {
    if keep_checkpoints && name.ends_with(".dpam_state.json") {
        return false;
    }
    if PRESERVE_PATTERNS
        .iter()
        .any(|pattern| matches_pattern(name, pattern))
    {
        return false;
    }
    INTERMEDIATE_PATTERNS.iter().any(|pattern| {
        let wants_dir = pattern.ends_with('/');
        wants_dir == is_dir && matches_pattern(name, pattern)
    })
}

/// Remove intermediates from a working directory (recursing one level into
/// stage subdirectories).
///
/// # Errors
/// Returns an error when the directory cannot be listed.
pub fn clean_working_dir(
    working_dir: &Path,
    dry_run: bool,
    keep_checkpoints: bool,
) -> Result<CleanCounts> {
    let mut counts = CleanCounts::default();
    let mut targets: Vec<PathBuf> = vec![working_dir.to_owned()];
    if let Ok(entries) = fs::read_dir(working_dir) {
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if path.is_dir()
                && path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with("step"))
            {
                targets.push(path);
            }
        }
    }

    for dir in targets {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = path.is_dir();
            if !is_removable(&name, is_dir, keep_checkpoints) {
                continue;
            }
            let size = if is_dir {
                0
            } else {
                path.metadata().map(|m| m.len()).unwrap_or(0)
            };
            if dry_run {
                info!(file = %path.display(), size, "would remove");
                counts.removed += 1;
                counts.bytes += size;
                continue;
            }
            let outcome = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match outcome {
                Ok(()) => {
                    info!(file = %path.display(), size, "removed");
                    counts.removed += 1;
                    counts.bytes += size;
                }
                Err(err) => warn!(file = %path.display(), error = %err, "removal failed"),
            }
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserve_wins_over_intermediate() {
        // .hhsearch is a primary output even though .hhr is intermediate.
        assert!(!is_removable("AF-P1.hhsearch", false, true));
        assert!(is_removable("AF-P1.hhr", false, true));
        assert!(is_removable("AF-P1.a3m", false, true));
    }

    #[test]
    fn inputs_and_finals_are_preserved() {
        for name in [
            "AF-P1.cif",
            "AF-P1.json",
            "AF-P1.pdb",
            "AF-P1.finalDPAM.domains",
            "AF-P1_domains",
        ] {
            assert!(!is_removable(name, false, true), "{name}");
        }
    }

    #[test]
    fn dali_scratch_directories_are_removable() {
        assert!(is_removable("iterativeDali_AF-P1", true, true));
        assert!(!is_removable("iterativeDali_AF-P1", false, true));
    }

    #[test]
    fn checkpoints_need_explicit_release() {
        assert!(!is_removable(".AF-P1.dpam_state.json", false, true));
        // Even released, no intermediate pattern matches a checkpoint.
        assert!(!is_removable(".AF-P1.dpam_state.json", false, false));
    }

    #[test]
    fn dry_run_removes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("AF-P1.a3m"), "msa").unwrap();
        let counts = clean_working_dir(tmp.path(), true, true).unwrap();
        assert_eq!(counts.removed, 1);
        assert!(tmp.path().join("AF-P1.a3m").exists());
        let counts = clean_working_dir(tmp.path(), false, true).unwrap();
        assert_eq!(counts.removed, 1);
        assert!(!tmp.path().join("AF-P1.a3m").exists());
    }
}
