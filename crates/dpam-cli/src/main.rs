// crates/dpam-cli/src/main.rs

//! `dpam`; domain parsing and ECOD classification for AlphaFold models.
//!
//! Subcommands cover the single-protein pipeline (`run`, `run-step`), the
//! two batch modes (`batch` protein-first, `batch-run` step-first with
//! shared resources), SLURM submission, batch status, the flat→sharded
//! migration, and intermediate cleanup. Exit code is 0 iff no protein
//! ended with a failed stage.

#![forbid(unsafe_code)]
#![deny(
    rust_2018_idioms,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo
)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dpam_core::Stage;
use dpam_pipeline::batch::{self, BatchRunner};
use dpam_pipeline::{clean, migrate, slurm, Pipeline, PipelineOptions};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "dpam",
    about = "DPAM - domain parser for AlphaFold models",
    long_about = "DPAM parses AlphaFold-predicted structures into evolutionary domains and\n\
                  classifies them against the ECOD reference hierarchy.",
    version = env!("CARGO_PKG_VERSION"),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the full pipeline for one structure.
    Run {
        /// Structure prefix (e.g. AF-P12345); `{prefix}.cif`/`.pdb` and
        /// `{prefix}.json` must exist in the working directory.
        prefix: String,
        #[arg(long)]
        working_dir: PathBuf,
        /// Reference data directory (ECOD tables and databases).
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        cpus: usize,
        /// Resume from the last checkpoint.
        #[arg(long, default_value_t = false)]
        resume: bool,
        /// Specific stages to run (default: all), by name.
        #[arg(long, num_args = 1..)]
        steps: Option<Vec<Stage>>,
        /// Skip addss.pl (PSIPRED unavailable).
        #[arg(long, default_value_t = false)]
        skip_addss: bool,
        /// Local scratch directory for DALI temp I/O.
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        /// DALI worker count (default: --cpus; DALI is I/O-bound, try 4x
        /// with local scratch).
        #[arg(long)]
        dali_workers: Option<usize>,
    },

    /// Run a single pipeline stage for one structure.
    RunStep {
        prefix: String,
        /// Stage name (e.g. FOLDSEEK, PARSE_DOMAINS).
        #[arg(long)]
        step: Stage,
        #[arg(long)]
        working_dir: PathBuf,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        cpus: usize,
        #[arg(long, default_value_t = false)]
        skip_addss: bool,
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        #[arg(long)]
        dali_workers: Option<usize>,
    },

    /// Protein-first batch: independent runners over a prefix list.
    Batch {
        /// File with structure prefixes, one per line.
        prefix_file: PathBuf,
        #[arg(long)]
        working_dir: PathBuf,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        cpus: usize,
        #[arg(long, default_value_t = false)]
        resume: bool,
        #[arg(long, default_value_t = false)]
        skip_addss: bool,
    },

    /// Step-first batch with shared resources (recommended for large
    /// batches).
    BatchRun {
        prefix_file: PathBuf,
        #[arg(long)]
        working_dir: PathBuf,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 4)]
        cpus: usize,
        #[arg(long, default_value_t = false)]
        resume: bool,
        #[arg(long, num_args = 1..)]
        steps: Option<Vec<Stage>>,
        #[arg(long, default_value_t = false)]
        skip_addss: bool,
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        #[arg(long)]
        dali_workers: Option<usize>,
    },

    /// Emit and submit a SLURM array job (one task per protein).
    SlurmSubmit {
        prefix_file: PathBuf,
        #[arg(long)]
        working_dir: PathBuf,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 1)]
        cpus_per_task: usize,
        #[arg(long, default_value = "4G")]
        mem_per_cpu: String,
        #[arg(long, default_value = "4:00:00")]
        time: String,
        #[arg(long)]
        partition: Option<String>,
        /// Maximum concurrent array tasks.
        #[arg(long, default_value_t = 100)]
        array_size: usize,
    },

    /// Emit (and optionally submit) a single-node step-first SLURM job.
    SlurmBatch {
        prefix_file: PathBuf,
        #[arg(long)]
        working_dir: PathBuf,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 16)]
        cpus: usize,
        #[arg(long, default_value = "64G")]
        mem: String,
        #[arg(long, default_value = "24:00:00")]
        time: String,
        #[arg(long)]
        partition: Option<String>,
        #[arg(long, default_value_t = false)]
        skip_addss: bool,
        /// Write the script without submitting it.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long)]
        scratch_dir: Option<PathBuf>,
        #[arg(long)]
        dali_workers: Option<usize>,
    },

    /// Summarise `_batch_state.json`.
    BatchStatus {
        #[arg(long)]
        working_dir: PathBuf,
    },

    /// Migrate a flat working directory to the sharded layout.
    Migrate {
        working_dir: PathBuf,
        /// List actions without moving anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Remove regenerable intermediate files.
    Clean {
        working_dir: PathBuf,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Also remove checkpoint files (forces a full re-run).
        #[arg(long, default_value_t = false)]
        remove_checkpoints: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match dispatch(cli.cmd) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cmd: Cmd) -> Result<ExitCode> {
    match cmd {
        Cmd::Run {
            prefix,
            working_dir,
            data_dir,
            cpus,
            resume,
            steps,
            skip_addss,
            scratch_dir,
            dali_workers,
        } => {
            let options = PipelineOptions {
                cpus,
                resume,
                skip_addss,
                scratch_dir,
                dali_workers,
            };
            let pipeline = Pipeline::new(&working_dir, &data_dir, options, None)?;
            let state = pipeline.run(&prefix, steps.as_deref())?;
            if state.failed_steps.is_empty() {
                info!(prefix, "pipeline completed successfully");
                Ok(ExitCode::SUCCESS)
            } else {
                error!(prefix, failed = state.failed_steps.len(), "pipeline completed with failures");
                Ok(ExitCode::FAILURE)
            }
        }

        Cmd::RunStep {
            prefix,
            step,
            working_dir,
            data_dir,
            cpus,
            skip_addss,
            scratch_dir,
            dali_workers,
        } => {
            let options = PipelineOptions {
                cpus,
                resume: false,
                skip_addss,
                scratch_dir,
                dali_workers,
            };
            let pipeline = Pipeline::new(&working_dir, &data_dir, options, None)?;
            match pipeline.run_stage(step, &prefix) {
                Ok(()) => Ok(ExitCode::SUCCESS),
                Err(err) => {
                    error!(prefix, stage = %step, "{err:#}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Cmd::Batch {
            prefix_file,
            working_dir,
            data_dir,
            cpus,
            resume,
            skip_addss,
        } => {
            let prefixes = read_prefixes(&prefix_file)?;
            info!(proteins = prefixes.len(), "protein-first batch");
            let options = PipelineOptions {
                cpus,
                resume,
                skip_addss,
                scratch_dir: None,
                dali_workers: None,
            };
            let results = batch::run_protein_batch(&prefixes, &working_dir, &data_dir, options)?;
            let failed = results.iter().filter(|(_, ok)| !ok).count();
            let summary: String = results
                .iter()
                .map(|(prefix, ok)| {
                    format!("{prefix}\t{}\n", if *ok { "SUCCESS" } else { "FAILED" })
                })
                .collect();
            fs::write(working_dir.join("batch_summary.txt"), summary)?;
            info!(succeeded = results.len() - failed, failed, "batch complete");
            Ok(exit_for_failures(failed))
        }

        Cmd::BatchRun {
            prefix_file,
            working_dir,
            data_dir,
            cpus,
            resume,
            steps,
            skip_addss,
            scratch_dir,
            dali_workers,
        } => {
            let prefixes = read_prefixes(&prefix_file)?;
            info!(proteins = prefixes.len(), "step-first batch");
            let options = PipelineOptions {
                cpus,
                resume,
                skip_addss,
                scratch_dir,
                dali_workers,
            };
            let mut runner =
                BatchRunner::new(prefixes, &working_dir, &data_dir, options, resume, None)?;
            runner.run(steps.as_deref())?;
            let failed: usize = runner
                .state()
                .summary()
                .values()
                .map(|&(_, failed)| failed)
                .sum();
            if failed > 0 {
                warn!(failed, "batch completed with stage failures");
            }
            Ok(exit_for_failures(failed))
        }

        Cmd::SlurmSubmit {
            prefix_file,
            working_dir,
            data_dir,
            cpus_per_task,
            mem_per_cpu,
            time,
            partition,
            array_size,
        } => {
            let prefixes = read_prefixes(&prefix_file)?;
            info!(proteins = prefixes.len(), "submitting SLURM array");
            let script = slurm::generate_array_script(
                &prefixes,
                &working_dir,
                &data_dir,
                &slurm::ArrayJobConfig {
                    cpus_per_task,
                    mem_per_cpu,
                    time_limit: time,
                    partition,
                    array_size,
                },
            )?;
            let job_id = slurm::submit(&script, &working_dir.join("dpam_array.sh"))?;
            println!("Job ID: {job_id}");
            Ok(ExitCode::SUCCESS)
        }

        Cmd::SlurmBatch {
            prefix_file,
            working_dir,
            data_dir,
            cpus,
            mem,
            time,
            partition,
            skip_addss,
            dry_run,
            scratch_dir,
            dali_workers,
        } => {
            let prefixes = read_prefixes(&prefix_file)?;
            let script = slurm::generate_batch_script(
                &prefixes,
                &working_dir,
                &data_dir,
                &slurm::BatchJobConfig {
                    cpus,
                    mem,
                    time_limit: time,
                    partition,
                    skip_addss,
                    scratch_dir,
                    dali_workers,
                },
            )?;
            let script_file = working_dir.join("dpam_batch.sh");
            if dry_run {
                fs::write(&script_file, &script)?;
                println!("SLURM script written to {}", script_file.display());
                println!("Submit with: sbatch {}", script_file.display());
                return Ok(ExitCode::SUCCESS);
            }
            let job_id = slurm::submit(&script, &script_file)?;
            println!("Submitted batch job: {job_id}");
            println!("  Proteins: {}", prefixes.len());
            println!("  CPUs: {cpus}");
            println!(
                "  Monitor: dpam batch-status --working-dir {}",
                working_dir.display()
            );
            Ok(ExitCode::SUCCESS)
        }

        Cmd::BatchStatus { working_dir } => batch_status(&working_dir),

        Cmd::Migrate { working_dir, dry_run } => {
            let counts = migrate::migrate_flat_to_sharded(&working_dir, dry_run)?;
            println!(
                "Migration {}summary: {} moved, {} copied, {} renamed, {} skipped, {} errors",
                if dry_run { "(dry run) " } else { "" },
                counts.moved,
                counts.copied,
                counts.renamed,
                counts.skipped,
                counts.errors
            );
            Ok(exit_for_failures(counts.errors))
        }

        Cmd::Clean {
            working_dir,
            dry_run,
            remove_checkpoints,
        } => {
            let counts =
                clean::clean_working_dir(&working_dir, dry_run, !remove_checkpoints)?;
            println!(
                "{} {} files ({} bytes)",
                if dry_run { "Would remove" } else { "Removed" },
                counts.removed,
                counts.bytes
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Initialise tracing with an env-driven filter (default INFO).
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false).with_level(true).compact();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn read_prefixes(path: &std::path::Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading prefix list {}", path.display()))?;
    let prefixes: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();
    if prefixes.is_empty() {
        bail!("prefix list {} is empty", path.display());
    }
    Ok(prefixes)
}

fn exit_for_failures(failed: usize) -> ExitCode {
    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn batch_status(working_dir: &std::path::Path) -> Result<ExitCode> {
    let state_file = working_dir.join("_batch_state.json");
    if !state_file.exists() {
        println!("No batch state found in {}", working_dir.display());
        return Ok(ExitCode::FAILURE);
    }
    let text = fs::read_to_string(&state_file)?;
    let entries: std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>> =
        serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", state_file.display()))?;
    if entries.is_empty() {
        println!("Batch state is empty (no stages processed yet)");
        return Ok(ExitCode::SUCCESS);
    }

    let mut all_proteins: std::collections::BTreeSet<&String> = std::collections::BTreeSet::new();
    for stage_entries in entries.values() {
        all_proteins.extend(stage_entries.keys());
    }
    println!("Batch status: {} proteins", all_proteins.len());
    println!("{:<25} {:>8} {:>8} {:>8}", "Stage", "Complete", "Failed", "Pending");
    println!("{}", "-".repeat(51));
    for stage in Stage::ALL {
        let Some(stage_entries) = entries.get(stage.name()) else {
            continue;
        };
        let complete = stage_entries.values().filter(|s| *s == "complete").count();
        let failed = stage_entries
            .values()
            .filter(|s| s.starts_with("failed"))
            .count();
        let pending = all_proteins.len() - complete - failed;
        println!(
            "{:<25} {:>8} {:>8} {:>8}",
            stage.name(),
            complete,
            failed,
            pending
        );
    }

    let mut failures: Vec<(String, String, String)> = Vec::new();
    for (stage, stage_entries) in &entries {
        for (protein, status) in stage_entries {
            if status.starts_with("failed") {
                failures.push((stage.clone(), protein.clone(), status.clone()));
            }
        }
    }
    if !failures.is_empty() {
        println!("\nFailures ({}):", failures.len());
        for (stage, protein, status) in failures.iter().take(20) {
            println!("  {stage} / {protein}: {status}");
        }
        if failures.len() > 20 {
            println!("  ... and {} more", failures.len() - 20);
        }
    }
    Ok(ExitCode::SUCCESS)
}
