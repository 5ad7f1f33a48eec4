// crates/dpam-pipeline/src/state.rs

//! Durable pipeline checkpoints.
//!
//! Both state files are JSON rewritten after every transition via
//! write-temp + atomic rename, so a crash never leaves a torn file. The
//! batch state mirrors every transition into the per-protein state files
//! to stay compatible with single-protein `run --resume`.

use anyhow::{Context, Result};
use dpam_core::Stage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Per-protein checkpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineState {
    pub prefix: String,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub completed_steps: BTreeSet<Stage>,
    #[serde(default)]
    pub failed_steps: BTreeMap<Stage, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl PipelineState {
    /// Fresh state for a protein.
    #[must_use]
    pub fn new(prefix: &str, working_dir: &Path) -> Self {
        Self {
            prefix: prefix.to_owned(),
            working_dir: working_dir.to_owned(),
            completed_steps: BTreeSet::new(),
            failed_steps: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Record a stage success (clearing any earlier failure).
    pub fn mark_complete(&mut self, stage: Stage) {
        self.completed_steps.insert(stage);
        self.failed_steps.remove(&stage);
    }

    /// Record a stage failure.
    pub fn mark_failed(&mut self, stage: Stage, error: impl Into<String>) {
        self.failed_steps.insert(stage, error.into());
    }

    /// Whether a stage already completed.
    #[must_use]
    pub fn is_complete(&self, stage: Stage) -> bool {
        self.completed_steps.contains(&stage)
    }

    /// Load a checkpoint file.
    ///
    /// # Errors
    /// Returns an error when the file is missing or malformed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading state {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing state {}", path.display()))
    }

    /// Persist atomically (write-temp + rename).
    ///
    /// # Errors
    /// Returns an error on I/O failure.
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self).context("serialising state")?;
        write_atomic(path, &body)
    }
}

/// Batch-level checkpoint: `stage name -> prefix -> status`.
#[derive(Debug)]
pub struct BatchState {
    working_dir: PathBuf,
    state_file: PathBuf,
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl BatchState {
    /// Load the batch state, seeding it from existing per-protein state
    /// files on first use (completed sets only; failures stay behind so
    /// re-attempts happen).
    #[must_use]
    pub fn open(working_dir: &Path, seed_from: Option<&[String]>) -> Self {
        let state_file = working_dir.join("_batch_state.json");
        let entries = match fs::read_to_string(&state_file) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                warn!(error = %err, "batch state unreadable, starting fresh");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        let mut state = Self {
            working_dir: working_dir.to_owned(),
            state_file,
            entries,
        };
        if state.entries.is_empty() {
            if let Some(prefixes) = seed_from {
                state.seed_from_protein_states(prefixes);
            }
        }
        state
    }

    fn seed_from_protein_states(&mut self, prefixes: &[String]) {
        let mut seeded = 0usize;
        for prefix in prefixes {
            let path = self.working_dir.join(format!(".{prefix}.dpam_state.json"));
            if !path.exists() {
                continue;
            }
            match PipelineState::load(&path) {
                Ok(pstate) => {
                    for stage in &pstate.completed_steps {
                        self.set(*stage, prefix, "complete");
                    }
                    seeded += 1;
                }
                Err(err) => warn!(prefix = %prefix, error = %err, "unreadable protein state"),
            }
        }
        if seeded > 0 {
            info!(seeded, "seeded batch state from protein state files");
            if let Err(err) = self.save() {
                warn!(error = %err, "failed to persist seeded batch state");
            }
        }
    }

    /// Proteins that still need `stage`: neither complete there nor failed
    /// an earlier critical stage.
    #[must_use]
    pub fn pending(&self, stage: Stage, prefixes: &[String]) -> Vec<String> {
        let stage_entries = self.entries.get(stage.name());
        prefixes
            .iter()
            .filter(|prefix| {
                let done = stage_entries
                    .and_then(|m| m.get(*prefix))
                    .is_some_and(|status| status == "complete");
                !done && !self.has_critical_failure(stage, prefix)
            })
            .cloned()
            .collect()
    }

    fn has_critical_failure(&self, stage: Stage, prefix: &str) -> bool {
        Stage::ALL
            .iter()
            .filter(|earlier| earlier.is_critical() && earlier.number() < stage.number())
            .any(|earlier| {
                self.entries
                    .get(earlier.name())
                    .and_then(|m| m.get(prefix))
                    .is_some_and(|status| status.starts_with("failed"))
            })
    }

    /// Record a success and mirror it into the protein's own state file.
    pub fn mark_complete(&mut self, stage: Stage, prefix: &str) {
        self.set(stage, prefix, "complete");
        if let Err(err) = self.save() {
            warn!(error = %err, "failed to persist batch state");
        }
        self.mirror(stage, prefix, None);
    }

    /// Record a failure and mirror it into the protein's own state file.
    pub fn mark_failed(&mut self, stage: Stage, prefix: &str, error: &str) {
        self.set(stage, prefix, &format!("failed: {error}"));
        if let Err(err) = self.save() {
            warn!(error = %err, "failed to persist batch state");
        }
        self.mirror(stage, prefix, Some(error));
    }

    /// Per-stage `(complete, failed)` counts.
    #[must_use]
    pub fn summary(&self) -> BTreeMap<String, (usize, usize)> {
        self.entries
            .iter()
            .map(|(stage, proteins)| {
                let complete = proteins.values().filter(|s| *s == "complete").count();
                let failed = proteins
                    .values()
                    .filter(|s| s.starts_with("failed"))
                    .count();
                (stage.clone(), (complete, failed))
            })
            .collect()
    }

    /// Raw entries (batch-status reporting).
    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, BTreeMap<String, String>> {
        &self.entries
    }

    fn set(&mut self, stage: Stage, prefix: &str, status: &str) {
        self.entries
            .entry(stage.name().to_owned())
            .or_default()
            .insert(prefix.to_owned(), status.to_owned());
    }

    fn save(&self) -> Result<()> {
        let body = serde_json::to_string_pretty(&self.entries).context("serialising batch state")?;
        write_atomic(&self.state_file, &body)
    }

    fn mirror(&self, stage: Stage, prefix: &str, error: Option<&str>) {
        let path = self.working_dir.join(format!(".{prefix}.dpam_state.json"));
        let mut pstate = if path.exists() {
            match PipelineState::load(&path) {
                Ok(state) => state,
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "unreadable protein state, recreating");
                    PipelineState::new(prefix, &self.working_dir)
                }
            }
        } else {
            PipelineState::new(prefix, &self.working_dir)
        };
        match error {
            None => pstate.mark_complete(stage),
            Some(error) => pstate.mark_failed(stage, error),
        }
        if let Err(err) = pstate.save(&path) {
            warn!(prefix = %prefix, error = %err, "failed to mirror protein state");
        }
    }
}

fn write_atomic(path: &Path, body: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} over {}", tmp.display(), path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protein_state_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".p1.dpam_state.json");
        let mut state = PipelineState::new("p1", tmp.path());
        state.mark_complete(Stage::Prepare);
        state.mark_failed(Stage::Foldseek, "boom");
        state.save(&path).unwrap();

        let loaded = PipelineState::load(&path).unwrap();
        assert!(loaded.is_complete(Stage::Prepare));
        assert_eq!(loaded.failed_steps[&Stage::Foldseek], "boom");
        // Completing clears the failure.
        let mut loaded = loaded;
        loaded.mark_complete(Stage::Foldseek);
        assert!(loaded.failed_steps.is_empty());
    }

    #[test]
    fn batch_state_seeds_completed_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mut pstate = PipelineState::new("p1", tmp.path());
        pstate.mark_complete(Stage::Prepare);
        pstate.mark_failed(Stage::Hhsearch, "crash");
        pstate.save(&tmp.path().join(".p1.dpam_state.json")).unwrap();

        let prefixes = vec!["p1".to_owned()];
        let batch = BatchState::open(tmp.path(), Some(&prefixes));
        assert!(batch.pending(Stage::Prepare, &prefixes).is_empty());
        // The failure was not seeded: HHSEARCH is retried.
        assert_eq!(batch.pending(Stage::Hhsearch, &prefixes), prefixes);
    }

    #[test]
    fn critical_failures_gate_downstream_stages() {
        let tmp = tempfile::tempdir().unwrap();
        let prefixes = vec!["p1".to_owned()];
        let mut batch = BatchState::open(tmp.path(), None);
        batch.mark_failed(Stage::Foldseek, "p1", "crashed");
        assert!(batch.pending(Stage::FilterFoldseek, &prefixes).is_empty());
        // A non-critical failure does not gate.
        batch.mark_failed(Stage::FilterFoldseek, "p2", "x");
        let two = vec!["p2".to_owned()];
        assert_eq!(batch.pending(Stage::MapEcod, &two), two);
    }

    #[test]
    fn batch_transitions_mirror_to_protein_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mut batch = BatchState::open(tmp.path(), None);
        batch.mark_complete(Stage::Prepare, "p1");
        let pstate =
            PipelineState::load(&tmp.path().join(".p1.dpam_state.json")).unwrap();
        assert!(pstate.is_complete(Stage::Prepare));
    }

    #[test]
    fn atomic_writes_leave_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut batch = BatchState::open(tmp.path(), None);
        batch.mark_complete(Stage::Prepare, "p1");
        assert!(tmp.path().join("_batch_state.json").exists());
        assert!(!tmp.path().join("_batch_state.tmp").exists());
    }
}
