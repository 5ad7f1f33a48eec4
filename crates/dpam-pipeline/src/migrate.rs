// crates/dpam-pipeline/src/migrate.rs

//! Flat → sharded working-directory migration.
//!
//! Files move according to a fixed suffix → stage table, matched
//! longest-suffix-first so `.foldseek.flt.result` lands in stage 4 before
//! `.foldseek` can claim it for stage 3. Inputs (`.cif`, `.json`) and
//! checkpoints stay at the root; `{prefix}.pdb` is copied (not moved) into
//! `step01_prepare/`; `{prefix}.finalDPAM.domains` is dual-copied into the
//! stage-13 directory and `results/` and removed from the root. Running
//! the migration on an already-sharded directory is a no-op.

use anyhow::{bail, Result};
use dpam_core::paths::{step_dir_name, PathResolver};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Suffix → stage, ordered longest-suffix-first within each ambiguity
/// class.
pub const SUFFIX_TO_STEP: &[(&str, u8)] = &[
    // Stage 4 must match before the shorter .foldseek.
    (".foldseek.flt.result", 4),
    (".foldseek.log", 3),
    (".foldseek", 3),
    (".map2ecod.result", 5),
    // Stage 2 profile artefacts.
    (".a3m.ss", 2),
    (".a3m", 2),
    (".hmm", 2),
    (".hhm", 2),
    (".hhsearch", 2),
    (".hhr", 2),
    ("_hits4Dali", 6),
    ("_iterativdDali_hits", 7),
    (".iterativeDali.done", 7),
    ("_good_hits", 8),
    ("_sequence.result", 9),
    ("_structure.result", 9),
    (".goodDomains", 10),
    (".dssp", 11),
    (".sse", 11),
    (".diso", 12),
    (".step13_domains", 13),
    (".step15_features", 15),
    (".step16_predictions", 16),
    (".step17_confident_predictions", 17),
    (".step18_mappings", 18),
    (".step19_merge_candidates", 19),
    (".step19_merge_info", 19),
    (".step21_comparisons", 21),
    (".step22_merged_domains", 22),
    (".step23_predictions", 23),
];

/// Suffixes that always stay at the root.
const ROOT_SUFFIXES: &[&str] = &[".cif", ".json"];

/// Migration outcome counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationCounts {
    pub moved: usize,
    pub copied: usize,
    pub renamed: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// What to do with one file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileAction {
    /// Move into the stage directory.
    Move(u8),
    /// Copy into the stage directory, keep the original at the root.
    Copy(u8),
    /// Copy into stage 13 and `results/`, then remove the original.
    DualCopy,
    /// Leave at the root.
    Keep,
}

/// Classify a root file by suffix against the known prefixes.
#[must_use]
pub fn classify_file(filename: &str, prefixes: &BTreeSet<String>) -> FileAction {
    let matches_prefix = |suffix: &str| -> bool {
        prefixes
            .iter()
            .any(|prefix| filename == format!("{prefix}{suffix}"))
    };
    if matches_prefix(".finalDPAM.domains") {
        return FileAction::DualCopy;
    }
    if matches_prefix(".fa") {
        return FileAction::Move(1);
    }
    if matches_prefix(".pdb") {
        return FileAction::Copy(1);
    }
    if ROOT_SUFFIXES.iter().any(|suffix| matches_prefix(suffix)) {
        return FileAction::Keep;
    }
    if filename.ends_with(".dpam_state.json") || filename == "_batch_state.json" {
        return FileAction::Keep;
    }
    for &(suffix, step) in SUFFIX_TO_STEP {
        if matches_prefix(suffix) {
            return FileAction::Move(step);
        }
    }
    FileAction::Keep
}

/// Discover protein prefixes from checkpoint and FASTA files at the root.
#[must_use]
pub fn discover_proteins(working_dir: &Path) -> BTreeSet<String> {
    let mut prefixes = BTreeSet::new();
    let Ok(entries) = fs::read_dir(working_dir) else {
        return prefixes;
    };
    for entry in entries.filter_map(std::result::Result::ok) {
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(stripped) = name
            .strip_prefix('.')
            .and_then(|n| n.strip_suffix(".dpam_state.json"))
        {
            prefixes.insert(stripped.to_owned());
        } else if let Some(stripped) = name.strip_suffix(".fa") {
            prefixes.insert(stripped.to_owned());
        }
    }
    prefixes
}

/// Migrate a flat working directory to the sharded layout.
///
/// # Errors
/// Returns an error when the working directory does not exist.
pub fn migrate_flat_to_sharded(working_dir: &Path, dry_run: bool) -> Result<MigrationCounts> {
    if !working_dir.is_dir() {
        bail!("working directory not found: {}", working_dir.display());
    }
    let mut counts = MigrationCounts::default();
    if PathResolver::detect_layout(working_dir) {
        info!("directory already uses the sharded layout; nothing to do");
        return Ok(counts);
    }
    let prefixes = discover_proteins(working_dir);
    if prefixes.is_empty() {
        info!("no proteins found (expected checkpoint or .fa files); nothing to do");
        return Ok(counts);
    }
    info!(proteins = prefixes.len(), "migrating flat working directory");
    let resolver = PathResolver::new(working_dir, true);

    // Phase 1: rename bare step directories from older runs.
    for (old, step) in [("step20", 20u8), ("step24", 24u8)] {
        let old_dir = working_dir.join(old);
        let Some(new_name) = step_dir_name(step) else {
            continue;
        };
        let new_dir = working_dir.join(new_name);
        if old_dir.is_dir() && !new_dir.exists() {
            if dry_run {
                info!("RENAME {old}/ -> {new_name}/");
            } else {
                fs::rename(&old_dir, &new_dir)?;
            }
            counts.renamed += 1;
        }
    }

    // Phase 2: batch-shared directories move under _batch/.
    for dirname in ["_foldseek_batch", "_dali_template_cache"] {
        let src = working_dir.join(dirname);
        if src.is_dir() {
            if dry_run {
                info!("MOVE {dirname}/ -> _batch/{dirname}/");
            } else {
                let dst = resolver.batch_dir()?.join(dirname);
                if !dst.exists() {
                    fs::rename(&src, &dst)?;
                }
            }
            counts.moved += 1;
        }
    }

    // Phase 3: classify and relocate root files.
    let mut files: Vec<_> = fs::read_dir(working_dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && !path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with('.'))
        })
        .collect();
    files.sort();
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let action = classify_file(&name, &prefixes);
        let outcome = apply_action(&resolver, &path, &name, action, dry_run, &mut counts);
        if let Err(err) = outcome {
            error!(file = %name, error = %err, "migration error");
            counts.errors += 1;
        }
    }

    info!(
        moved = counts.moved,
        copied = counts.copied,
        renamed = counts.renamed,
        skipped = counts.skipped,
        errors = counts.errors,
        "migration finished"
    );
    Ok(counts)
}

fn apply_action(
    resolver: &PathResolver,
    path: &Path,
    name: &str,
    action: FileAction,
    dry_run: bool,
    counts: &mut MigrationCounts,
) -> Result<()> {
    match action {
        FileAction::Keep => {}
        FileAction::Move(step) => {
            if dry_run {
                info!("MOVE {name} -> {}/", step_dir_name(step).unwrap_or("?"));
                counts.moved += 1;
                return Ok(());
            }
            let dest = resolver.step_dir(step)?.join(name);
            if dest.exists() {
                counts.skipped += 1;
            } else {
                fs::rename(path, &dest)?;
                counts.moved += 1;
            }
        }
        FileAction::Copy(step) => {
            if dry_run {
                info!("COPY {name} -> {}/", step_dir_name(step).unwrap_or("?"));
                counts.copied += 1;
                return Ok(());
            }
            let dest = resolver.step_dir(step)?.join(name);
            if dest.exists() {
                counts.skipped += 1;
            } else {
                fs::copy(path, &dest)?;
                counts.copied += 1;
            }
        }
        FileAction::DualCopy => {
            if dry_run {
                info!("COPY {name} -> step13_parse/ and results/, then remove");
                counts.moved += 1;
                return Ok(());
            }
            let step13 = resolver.step_dir(13)?.join(name);
            let results = resolver.results_dir()?.join(name);
            for dest in [&step13, &results] {
                if !dest.exists() {
                    fs::copy(path, dest)?;
                }
            }
            if step13.exists() && results.exists() {
                fs::remove_file(path)?;
                counts.moved += 1;
            } else {
                counts.errors += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> BTreeSet<String> {
        ["AF-P1".to_owned()].into()
    }

    #[test]
    fn longest_suffix_wins() {
        assert_eq!(
            classify_file("AF-P1.foldseek.flt.result", &prefixes()),
            FileAction::Move(4)
        );
        assert_eq!(
            classify_file("AF-P1.foldseek", &prefixes()),
            FileAction::Move(3)
        );
    }

    #[test]
    fn inputs_and_checkpoints_stay_put() {
        assert_eq!(classify_file("AF-P1.cif", &prefixes()), FileAction::Keep);
        assert_eq!(classify_file("AF-P1.json", &prefixes()), FileAction::Keep);
        assert_eq!(
            classify_file("_batch_state.json", &prefixes()),
            FileAction::Keep
        );
    }

    #[test]
    fn pdb_is_copied_and_final_domains_dual_copied() {
        assert_eq!(classify_file("AF-P1.pdb", &prefixes()), FileAction::Copy(1));
        assert_eq!(
            classify_file("AF-P1.finalDPAM.domains", &prefixes()),
            FileAction::DualCopy
        );
    }

    #[test]
    fn unknown_prefixes_are_untouched() {
        assert_eq!(
            classify_file("OTHER.foldseek", &prefixes()),
            FileAction::Keep
        );
    }

    #[test]
    fn migration_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("AF-P1.fa"), ">AF-P1\nMKV\n").unwrap();
        fs::write(tmp.path().join("AF-P1.foldseek"), "hits\n").unwrap();
        fs::write(tmp.path().join("AF-P1.cif"), "cif\n").unwrap();

        let first = migrate_flat_to_sharded(tmp.path(), false).unwrap();
        assert_eq!(first.moved, 2); // .fa and .foldseek
        assert!(tmp.path().join("step01_prepare/AF-P1.fa").exists());
        assert!(tmp.path().join("step03_foldseek/AF-P1.foldseek").exists());
        assert!(tmp.path().join("AF-P1.cif").exists());

        // Second run: already sharded, nothing moves.
        let second = migrate_flat_to_sharded(tmp.path(), false).unwrap();
        assert_eq!(second, MigrationCounts::default());
    }

    #[test]
    fn discovery_finds_state_and_fasta_prefixes() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".AF-P2.dpam_state.json"), "{}").unwrap();
        fs::write(tmp.path().join("AF-P3.fa"), ">x\nM\n").unwrap();
        let found = discover_proteins(tmp.path());
        assert!(found.contains("AF-P2"));
        assert!(found.contains("AF-P3"));
    }
}
