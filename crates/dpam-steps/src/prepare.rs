// crates/dpam-steps/src/prepare.rs

//! Stage 1: standardise the input structure.
//!
//! Parses `{prefix}.cif` or `{prefix}.pdb` from the working-directory root,
//! extracts chain A, and emits a standardised single-chain PDB plus a FASTA
//! under `step01_prepare/`. Residue numbering is preserved verbatim.

use crate::StepContext;
use anyhow::{bail, Context, Result};
use dpam_core::{fasta, pdb};
use tracing::{info, warn};

/// Run stage 1.
///
/// # Errors
/// Returns an error when no structure input exists or it holds no atoms.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let cif = ctx.root_file(".cif");
    let pdb_in = ctx.root_file(".pdb");
    let input = if cif.exists() {
        cif
    } else if pdb_in.exists() {
        pdb_in
    } else {
        bail!(
            "no structure input for {}: expected {} or {}",
            ctx.prefix,
            ctx.root_file(".cif").display(),
            ctx.root_file(".pdb").display()
        );
    };

    let chains = pdb::parse_structure(&input)
        .with_context(|| format!("parsing structure {}", input.display()))?;
    let chain = match chains.iter().find(|c| c.chain_id == "A") {
        Some(chain) => chain,
        None => {
            let first = chains.first().context("structure has no chains")?;
            warn!(
                prefix = ctx.prefix,
                chain = %first.chain_id,
                "no chain A; using first chain"
            );
            first
        }
    };
    if chain.residues.is_empty() {
        bail!("chain {} of {} has no residues", chain.chain_id, input.display());
    }

    let pdb_out = ctx.stage_file(1, ".pdb")?;
    pdb::write_pdb(&pdb_out, chain)?;

    let sequence = chain.sequence();
    let fa_out = ctx.stage_file(1, ".fa")?;
    fasta::write_fasta(&fa_out, ctx.prefix, &sequence)?;

    info!(
        prefix = ctx.prefix,
        residues = chain.residues.len(),
        "standardised structure written"
    );
    Ok(())
}
