// crates/dpam-pipeline/src/runner.rs

//! Per-protein pipeline runner.
//!
//! Dispatches the ordered stage list against the kernels, persisting the
//! checkpoint after every transition. A failed critical stage (HHSEARCH,
//! FOLDSEEK, ITERATIVE_DALI) halts the protein; there is no fallback for
//! missing homology evidence; any other failure logs a warning and the
//! pipeline continues.

use crate::state::PipelineState;
use anyhow::{Context, Result};
use dpam_core::{PathResolver, Stage};
use dpam_domass::DomassModel;
use dpam_refdata::ReferenceData;
use dpam_steps::StepContext;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// Runner configuration shared by every protein.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub cpus: usize,
    pub resume: bool,
    pub skip_addss: bool,
    pub scratch_dir: Option<PathBuf>,
    pub dali_workers: Option<usize>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cpus: 1,
            resume: true,
            skip_addss: false,
            scratch_dir: None,
            dali_workers: None,
        }
    }
}

/// The per-protein pipeline. Reference data loads once at construction and
/// is reused for every protein this runner processes.
pub struct Pipeline {
    resolver: PathResolver,
    data_dir: PathBuf,
    refdata: ReferenceData,
    options: PipelineOptions,
}

impl Pipeline {
    /// Create a runner over a working directory.
    ///
    /// The layout is detected from the directory (sharded iff
    /// `step01_prepare/` exists) unless `sharded` forces one.
    ///
    /// # Errors
    /// Returns an error when the working directory cannot be created or
    /// the reference data is unreadable.
    pub fn new(
        working_dir: &Path,
        data_dir: &Path,
        options: PipelineOptions,
        sharded: Option<bool>,
    ) -> Result<Self> {
        std::fs::create_dir_all(working_dir)
            .with_context(|| format!("creating working dir {}", working_dir.display()))?;
        // Fresh directories default to sharded; existing flat runs are
        // respected until migrated.
        let sharded = sharded.unwrap_or_else(|| {
            PathResolver::detect_layout(working_dir) || !has_flat_outputs(working_dir)
        });
        info!("loading ECOD reference data...");
        let refdata = ReferenceData::load(data_dir)?;
        Ok(Self {
            resolver: PathResolver::new(working_dir, sharded),
            data_dir: data_dir.to_owned(),
            refdata,
            options,
        })
    }

    /// The resolver this runner uses.
    #[must_use]
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Loaded reference data.
    #[must_use]
    pub fn refdata(&self) -> &ReferenceData {
        &self.refdata
    }

    /// Configured CPU budget.
    #[must_use]
    pub fn cpus(&self) -> usize {
        self.options.cpus
    }

    /// Run the pipeline for one protein, resuming from its checkpoint.
    ///
    /// # Errors
    /// Returns an error only on checkpoint I/O failure; stage failures are
    /// recorded in the returned state.
    pub fn run(&self, prefix: &str, stages: Option<&[Stage]>) -> Result<PipelineState> {
        info!(prefix, "starting pipeline");
        let state_file = self.resolver.state_file(prefix);
        let mut state = if self.options.resume && state_file.exists() {
            info!(prefix, state = %state_file.display(), "resuming from checkpoint");
            PipelineState::load(&state_file)?
        } else {
            PipelineState::new(prefix, self.resolver.root())
        };

        let all: Vec<Stage> = stages.map_or_else(|| Stage::ALL.to_vec(), <[Stage]>::to_vec);
        let pending: Vec<Stage> = all
            .iter()
            .copied()
            .filter(|stage| !state.is_complete(*stage))
            .collect();
        info!(
            prefix,
            pending = pending.len(),
            completed = state.completed_steps.len(),
            "stages to run"
        );

        for stage in pending {
            let success = self.run_stage(stage, prefix);
            match success {
                Ok(()) => state.mark_complete(stage),
                Err(ref err) => state.mark_failed(stage, format!("{err:#}")),
            }
            state.save(&state_file)?;
            if let Err(err) = success {
                if stage.is_critical() {
                    error!(
                        prefix,
                        stage = %stage,
                        error = %err,
                        "CRITICAL STEP {} FAILED - halting pipeline",
                        stage
                    );
                    break;
                }
                warn!(prefix, stage = %stage, error = %err, "non-critical stage failed, continuing");
            }
        }

        info!(
            prefix,
            completed = state.completed_steps.len(),
            failed = state.failed_steps.len(),
            "pipeline finished"
        );
        Ok(state)
    }

    /// Run one stage, logging start / complete / failed with duration.
    ///
    /// # Errors
    /// Returns the kernel's error on failure.
    pub fn run_stage(&self, stage: Stage, prefix: &str) -> Result<()> {
        info!(prefix, stage = %stage, "stage start");
        let started = Instant::now();
        let result = self.dispatch(stage, prefix, None);
        let seconds = started.elapsed().as_secs_f64();
        match &result {
            Ok(()) => info!(prefix, stage = %stage, seconds, "stage complete"),
            Err(err) => warn!(prefix, stage = %stage, seconds, error = %err, "stage failed"),
        }
        result
    }

    /// Kernel dispatch; the batch orchestrator passes a pre-loaded
    /// classifier for stage 16.
    pub(crate) fn dispatch(
        &self,
        stage: Stage,
        prefix: &str,
        model: Option<&DomassModel>,
    ) -> Result<()> {
        let ctx = StepContext {
            prefix,
            resolver: &self.resolver,
            data_dir: &self.data_dir,
            refdata: &self.refdata,
            cpus: self.options.cpus,
            skip_addss: self.options.skip_addss,
            scratch_dir: self.options.scratch_dir.as_deref(),
            dali_workers: self.options.dali_workers,
        };
        use dpam_steps as steps;
        match stage {
            Stage::Prepare => steps::prepare::run(&ctx),
            Stage::Hhsearch => steps::hhsearch::run(&ctx),
            Stage::Foldseek => steps::foldseek::run(&ctx),
            Stage::FilterFoldseek => steps::foldseek_filter::run(&ctx),
            Stage::MapEcod => steps::map_ecod::run(&ctx),
            Stage::DaliCandidates => steps::dali_candidates::run(&ctx),
            Stage::IterativeDali => steps::iterative_dali::run(&ctx, None),
            Stage::AnalyzeDali => steps::analyze_dali::run(&ctx),
            Stage::GetSupport => steps::support::run(&ctx),
            Stage::FilterDomains => steps::filter_domains::run(&ctx),
            Stage::Sse => steps::sse::run(&ctx),
            Stage::Disorder => steps::disorder::run(&ctx),
            Stage::ParseDomains => steps::parse_domains::run(&ctx),
            Stage::PrepareDomass => steps::domass_features::run(&ctx),
            Stage::RunDomass => steps::domass_predict::run(&ctx, model),
            Stage::GetConfident => steps::confident::run(&ctx),
            Stage::GetMapping => steps::mapping::run(&ctx),
            Stage::GetMergeCandidates => steps::merge_candidates::run(&ctx),
            Stage::ExtractDomains => steps::extract_domains::run(&ctx),
            Stage::CompareDomains => steps::compare_domains::run(&ctx),
            Stage::MergeDomains => steps::merge_domains::run(&ctx),
            Stage::GetPredictions => steps::predictions::run(&ctx),
            Stage::IntegrateResults => steps::integrate::run(&ctx),
            // Explicit no-op: final PDB emission is visualisation territory.
            Stage::GeneratePdbs => Ok(()),
        }
    }

    /// Stage-7 dispatch with a shared template cache (batch mode).
    pub(crate) fn dispatch_dali_with_cache(
        &self,
        prefix: &str,
        template_cache: &Path,
    ) -> Result<()> {
        let ctx = StepContext {
            prefix,
            resolver: &self.resolver,
            data_dir: &self.data_dir,
            refdata: &self.refdata,
            cpus: self.options.cpus,
            skip_addss: self.options.skip_addss,
            scratch_dir: self.options.scratch_dir.as_deref(),
            dali_workers: self.options.dali_workers,
        };
        dpam_steps::iterative_dali::run(&ctx, Some(template_cache))
    }
}

fn has_flat_outputs(working_dir: &Path) -> bool {
    std::fs::read_dir(working_dir).is_ok_and(|entries| {
        entries.filter_map(std::result::Result::ok).any(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .ends_with(".dpam_state.json")
        })
    })
}
