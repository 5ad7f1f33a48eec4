// crates/dpam-steps/src/hhsearch.rs

//! Stage 2: sequence profile construction and the ECOD profile search.
//!
//! `hhblits` builds an MSA from the stage-1 FASTA, `addss.pl` annotates it
//! with PSIPRED secondary structure (skipped with `--skip-addss` where
//! PSIPRED is unavailable), `hhmake` turns it into a profile, and
//! `hhsearch` runs it against the ECOD profile database. The final report
//! lands at `step02_hhsearch/{prefix}.hhsearch`.

use crate::StepContext;
use anyhow::{bail, Context, Result};
use dpam_tools::hhsuite;
use tracing::info;

/// Run stage 2.
///
/// # Errors
/// Returns an error when an input is missing or any tool invocation fails
/// (this stage is critical: the runner halts the protein on failure).
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let fa = ctx.stage_file(1, ".fa")?;
    if !fa.exists() {
        bail!("FASTA not found: {}", fa.display());
    }
    let sequence_db = ctx.data_dir.join("UniRef30");
    let profile_db = ctx.data_dir.join("ECOD_hhm_DB");

    let a3m = ctx.stage_file(2, ".a3m")?;
    hhsuite::hhblits(&fa, &sequence_db, &a3m, ctx.cpus)
        .context("building MSA")?;

    let profile_input = if ctx.skip_addss {
        info!(prefix = ctx.prefix, "skipping addss.pl secondary-structure annotation");
        a3m.clone()
    } else {
        let a3m_ss = ctx.stage_file(2, ".a3m.ss")?;
        hhsuite::addss(&a3m, &a3m_ss).context("annotating MSA with PSIPRED")?;
        a3m_ss
    };

    let hmm = ctx.stage_file(2, ".hhm")?;
    hhsuite::hhmake(&profile_input, &hmm)
        .context("building profile")?;

    let report = ctx.stage_file(2, ".hhsearch")?;
    hhsuite::hhsearch(&hmm, &profile_db, &report, ctx.cpus)
        .context("searching ECOD profiles")?;

    if !report.exists() {
        bail!("HHsearch produced no report at {}", report.display());
    }
    info!(prefix = ctx.prefix, report = %report.display(), "HHsearch complete");
    Ok(())
}
