// crates/dpam-steps/src/extract_domains.rs

//! Stage 20: extract single-domain PDBs for every domain named by a
//! stage-19 merge candidate pair.

use crate::StepContext;
use anyhow::{bail, Result};
use dpam_core::{pdb, range::parse_range};
use std::collections::BTreeSet;
use std::fs;
use tracing::info;

/// Run stage 20.
///
/// # Errors
/// Returns an error when the structure is missing; no merge candidates
/// means nothing to do.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let merge_file = ctx.stage_file(19, ".step19_merge_candidates")?;
    if !merge_file.exists() {
        info!(prefix = ctx.prefix, "no merge candidates; no domain PDBs to extract");
        return Ok(());
    }
    let input_pdb = ctx.stage_file(1, ".pdb")?;
    if !input_pdb.exists() {
        bail!("structure not found: {}", input_pdb.display());
    }

    let step20_dir = ctx.resolver.step_dir(20)?;
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut extracted = 0usize;
    for line in fs::read_to_string(&merge_file)?.lines() {
        if line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 4 {
            continue;
        }
        for (domain, range) in [(parts[0], parts[1]), (parts[2], parts[3])] {
            if !seen.insert(domain.to_owned()) {
                continue;
            }
            let residues = parse_range(range)?;
            let output = step20_dir.join(format!("{}_{domain}.pdb", ctx.prefix));
            pdb::filter_atoms(&input_pdb, &output, &residues)?;
            extracted += 1;
        }
    }
    info!(prefix = ctx.prefix, extracted, "domain PDBs extracted");
    Ok(())
}
