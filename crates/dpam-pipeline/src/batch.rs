// crates/dpam-pipeline/src/batch.rs

//! Step-first batch orchestrator.
//!
//! Stages run in the outer loop, proteins in the inner one, so expensive
//! resources load once per stage instead of once per protein:
//! - stage 3: one batch Foldseek `createdb → search → convertalis`;
//! - stage 7: the union of needed ECOD70 templates is copied once into a
//!   shared cache that every worker reads from local storage;
//! - stage 16: the classifier checkpoint loads once and is reused.
//!
//! Every other stage uses the plain per-protein kernel. Progress is
//! reported at a fixed modulus; a per-stage summary closes the run.

use crate::runner::{Pipeline, PipelineOptions};
use crate::state::BatchState;
use anyhow::{Context, Result};
use dpam_core::Stage;
use dpam_domass::DomassModel;
use dpam_steps::{foldseek, iterative_dali};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};

const DALI_PROGRESS_MODULUS: usize = 10;
const DEFAULT_PROGRESS_MODULUS: usize = 100;

/// Step-first batch runner over a protein list.
pub struct BatchRunner {
    prefixes: Vec<String>,
    pipeline: Pipeline,
    state: BatchState,
}

impl BatchRunner {
    /// Create a batch runner; `resume` seeds batch state from existing
    /// per-protein checkpoints.
    ///
    /// # Errors
    /// Returns an error when the pipeline cannot be constructed.
    pub fn new(
        prefixes: Vec<String>,
        working_dir: &Path,
        data_dir: &Path,
        options: PipelineOptions,
        resume: bool,
        sharded: Option<bool>,
    ) -> Result<Self> {
        let pipeline = Pipeline::new(working_dir, data_dir, options, sharded)?;
        let state = BatchState::open(working_dir, resume.then_some(prefixes.as_slice()));
        Ok(Self {
            prefixes,
            pipeline,
            state,
        })
    }

    /// Batch state (status reporting).
    #[must_use]
    pub fn state(&self) -> &BatchState {
        &self.state
    }

    /// Run the batch across all (or the given) stages.
    ///
    /// # Errors
    /// Returns an error only on orchestration-level failure; per-protein
    /// failures live in the batch state.
    pub fn run(&mut self, stages: Option<&[Stage]>) -> Result<()> {
        let all: Vec<Stage> = stages.map_or_else(|| Stage::ALL.to_vec(), <[Stage]>::to_vec);
        let started = Instant::now();
        info!(
            proteins = self.prefixes.len(),
            stages = all.len(),
            "starting step-first batch run"
        );

        for stage in all {
            let pending = self.state.pending(stage, &self.prefixes);
            if pending.is_empty() {
                info!(stage = %stage, "all proteins complete, skipping");
                continue;
            }
            info!(stage = %stage, pending = pending.len(), "processing stage");
            let stage_started = Instant::now();

            match stage {
                Stage::Foldseek => self.run_foldseek_batch(&pending)?,
                Stage::IterativeDali => self.run_dali_batch(&pending)?,
                Stage::RunDomass => self.run_domass_batch(&pending),
                _ => self.run_default(stage, &pending),
            }

            let still_pending = self.state.pending(stage, &pending);
            info!(
                stage = %stage,
                succeeded = pending.len() - still_pending.len(),
                of = pending.len(),
                seconds = stage_started.elapsed().as_secs_f64(),
                "stage finished"
            );
        }

        info!(seconds = started.elapsed().as_secs_f64(), "batch run complete");
        for (stage, (complete, failed)) in self.state.summary() {
            if complete > 0 || failed > 0 {
                info!(stage = %stage, complete, failed, "stage summary");
            }
        }
        Ok(())
    }

    fn run_foldseek_batch(&mut self, pending: &[String]) -> Result<()> {
        info!(
            proteins = pending.len(),
            "running batch Foldseek (single target-index load)"
        );
        let outcomes = foldseek::run_batch(
            pending,
            self.pipeline.resolver(),
            self.pipeline.refdata().data_dir(),
            self.batch_cpus(),
        )?;
        for (prefix, outcome) in outcomes {
            match outcome {
                Ok(()) => self.state.mark_complete(Stage::Foldseek, &prefix),
                Err(err) => {
                    self.state
                        .mark_failed(Stage::Foldseek, &prefix, &format!("{err:#}"));
                }
            }
        }
        Ok(())
    }

    fn run_dali_batch(&mut self, pending: &[String]) -> Result<()> {
        let candidates_dir = self.pipeline.resolver().step_dir(6)?;
        let templates = iterative_dali::collect_batch_templates(pending, &candidates_dir)?;
        if templates.is_empty() {
            info!("no DALI candidates across the batch");
            for prefix in pending {
                if !candidates_dir.join(format!("{prefix}_hits4Dali")).exists() {
                    self.state
                        .mark_failed(Stage::IterativeDali, prefix, "no candidate list");
                } else {
                    // Empty candidate list: the per-protein kernel emits an
                    // empty combined file and succeeds.
                    self.run_one(Stage::IterativeDali, prefix);
                }
            }
            return Ok(());
        }

        let cache = self
            .pipeline
            .resolver()
            .batch_dir()?
            .join("_dali_template_cache");
        fs::create_dir_all(&cache)
            .with_context(|| format!("creating template cache {}", cache.display()))?;
        info!(
            templates = templates.len(),
            proteins = pending.len(),
            "priming shared DALI template cache"
        );
        let ecod70 = self.pipeline.refdata().data_dir().join("ECOD70");
        let cache_started = Instant::now();
        let mut copied = 0usize;
        let mut missing = 0usize;
        for uid in &templates {
            let src = ecod70.join(format!("{uid}.pdb"));
            let dst = cache.join(format!("{uid}.pdb"));
            if dst.exists() {
                continue;
            }
            if src.exists() {
                fs::copy(&src, &dst)
                    .with_context(|| format!("caching template {}", src.display()))?;
                copied += 1;
            } else {
                missing += 1;
            }
        }
        info!(
            copied,
            missing,
            seconds = cache_started.elapsed().as_secs_f64(),
            "template cache ready"
        );

        for (index, prefix) in pending.iter().enumerate() {
            match self.pipeline.dispatch_dali_with_cache(prefix, &cache) {
                Ok(()) => self.state.mark_complete(Stage::IterativeDali, prefix),
                Err(err) => {
                    error!(prefix = %prefix, error = %err, "iterative DALI failed");
                    self.state
                        .mark_failed(Stage::IterativeDali, prefix, &format!("{err:#}"));
                }
            }
            if (index + 1) % DALI_PROGRESS_MODULUS == 0 {
                info!(done = index + 1, of = pending.len(), "DALI progress");
            }
        }

        let _ = fs::remove_dir_all(&cache);
        Ok(())
    }

    fn run_domass_batch(&mut self, pending: &[String]) {
        let checkpoint = self.pipeline.refdata().data_dir().join("domass_epo29");
        info!("loading DOMASS classifier once for the batch");
        let load_started = Instant::now();
        let model = match DomassModel::load(&checkpoint) {
            Ok(model) => model,
            Err(err) => {
                error!(error = %err, "classifier load failed");
                for prefix in pending {
                    self.state
                        .mark_failed(Stage::RunDomass, prefix, &format!("{err:#}"));
                }
                return;
            }
        };
        info!(seconds = load_started.elapsed().as_secs_f64(), "classifier loaded");

        for (index, prefix) in pending.iter().enumerate() {
            match self.pipeline.dispatch(Stage::RunDomass, prefix, Some(&model)) {
                Ok(()) => self.state.mark_complete(Stage::RunDomass, prefix),
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "classifier stage failed");
                    self.state
                        .mark_failed(Stage::RunDomass, prefix, &format!("{err:#}"));
                }
            }
            if (index + 1) % DEFAULT_PROGRESS_MODULUS == 0 {
                info!(done = index + 1, of = pending.len(), "classifier progress");
            }
        }
    }

    fn run_default(&mut self, stage: Stage, pending: &[String]) {
        for (index, prefix) in pending.iter().enumerate() {
            self.run_one(stage, prefix);
            if (index + 1) % DEFAULT_PROGRESS_MODULUS == 0 {
                info!(stage = %stage, done = index + 1, of = pending.len(), "progress");
            }
        }
    }

    fn run_one(&mut self, stage: Stage, prefix: &str) {
        match self.pipeline.run_stage(stage, prefix) {
            Ok(()) => self.state.mark_complete(stage, prefix),
            Err(err) => self.state.mark_failed(stage, prefix, &format!("{err:#}")),
        }
    }

    fn batch_cpus(&self) -> usize {
        // Batch Foldseek gets the full CPU budget of the run.
        self.pipeline.cpus()
    }
}

/// Protein-first batch: independent per-protein runners over a prefix
/// list. Complements the step-first [`BatchRunner`].
///
/// Returns `(prefix, success)` per protein.
///
/// # Errors
/// Returns an error when the pipeline cannot be constructed.
pub fn run_protein_batch(
    prefixes: &[String],
    working_dir: &Path,
    data_dir: &Path,
    options: PipelineOptions,
) -> Result<Vec<(String, bool)>> {
    let pipeline = Pipeline::new(working_dir, data_dir, options, None)?;
    let mut results = Vec::with_capacity(prefixes.len());
    for prefix in prefixes {
        let outcome = pipeline.run(prefix, None);
        let success = match outcome {
            Ok(state) => state.failed_steps.is_empty(),
            Err(err) => {
                error!(prefix = %prefix, error = %err, "pipeline error");
                false
            }
        };
        results.push((prefix.clone(), success));
    }
    Ok(results)
}
