// crates/dpam-steps/src/compare_domains.rs

//! Stage 21: connectivity judgement for merge candidate pairs.
//!
//! A pair is sequence-connected (1) when some structured residue of each
//! domain sits within 5 positions in the ordered list of all structured
//! residues; else structure-connected (2) when at least 9 residue pairs
//! touch at ≤ 8 Å minimum atom distance; else rejected (0).

use crate::{hits, StepContext};
use anyhow::{bail, Context, Result};
use dpam_core::{pdb, range::parse_range};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::{debug, info, warn};

const SEQUENCE_NEIGHBOURHOOD: i32 = 5;
const INTERFACE_DISTANCE: f64 = 8.0;
const MIN_INTERFACE_CONTACTS: usize = 9;

/// Sequence connectivity within the structured-residue ordering.
#[must_use]
pub fn sequence_connected(
    a: &BTreeSet<i32>,
    b: &BTreeSet<i32>,
    structured: &[i32],
) -> bool {
    let index_of: HashMap<i32, i32> = structured
        .iter()
        .enumerate()
        .map(|(index, &res)| (res, index as i32))
        .collect();
    let indices_a: Vec<i32> = a.iter().filter_map(|res| index_of.get(res).copied()).collect();
    let indices_b: Vec<i32> = b.iter().filter_map(|res| index_of.get(res).copied()).collect();
    indices_a
        .iter()
        .any(|&ia| indices_b.iter().any(|&ib| (ia - ib).abs() <= SEQUENCE_NEIGHBOURHOOD))
}

/// Count residue pairs across the interface at ≤ 8 Å.
#[must_use]
pub fn interface_contacts(
    coords: &BTreeMap<i32, Vec<[f64; 3]>>,
    a: &BTreeSet<i32>,
    b: &BTreeSet<i32>,
) -> usize {
    let mut contacts = 0usize;
    for res_a in a {
        let Some(coords_a) = coords.get(res_a) else {
            continue;
        };
        for res_b in b {
            let Some(coords_b) = coords.get(res_b) else {
                continue;
            };
            if pdb::min_distance(coords_a, coords_b) <= INTERFACE_DISTANCE {
                contacts += 1;
            }
        }
    }
    contacts
}

/// Run stage 21.
///
/// # Errors
/// Returns an error when the stage-13 domains file is missing; a missing
/// merge-candidate file means nothing to do.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let merge_file = ctx.stage_file(19, ".step19_merge_candidates")?;
    if !merge_file.exists() {
        info!(prefix = ctx.prefix, "no merge candidates; no comparisons");
        return Ok(());
    }
    let domains_file = ctx.stage_file(13, ".step13_domains")?;
    if !domains_file.exists() {
        bail!("parsed domains not found: {}", domains_file.display());
    }

    let mut structured: BTreeSet<i32> = BTreeSet::new();
    for (_, range) in hits::read_domains_file(&domains_file)? {
        structured.extend(parse_range(&range)?);
    }
    let structured: Vec<i32> = structured.into_iter().collect();

    let step20_dir = ctx.resolver.step_dir(20)?;
    let output = ctx.stage_file(21, ".step21_comparisons")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    writeln!(out, "# protein\tdomain1\tdomain2\tjudgment\trange1\trange2")?;

    let mut counts = [0usize; 3];
    for line in fs::read_to_string(&merge_file)?.lines() {
        if line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 4 {
            continue;
        }
        let (domain1, range1, domain2, range2) = (parts[0], parts[1], parts[2], parts[3]);
        let resids_a = parse_range(range1)?;
        let resids_b = parse_range(range2)?;

        let judgment = if sequence_connected(&resids_a, &resids_b, &structured) {
            debug!(domain1, domain2, "sequence-connected");
            1
        } else {
            let pdb1 = step20_dir.join(format!("{}_{domain1}.pdb", ctx.prefix));
            let pdb2 = step20_dir.join(format!("{}_{domain2}.pdb", ctx.prefix));
            if !pdb1.exists() || !pdb2.exists() {
                warn!(domain1, domain2, "domain PDBs missing, pair rejected");
                0
            } else {
                let mut coords = pdb::read_coords(&pdb1)?;
                coords.extend(pdb::read_coords(&pdb2)?);
                let contacts = interface_contacts(&coords, &resids_a, &resids_b);
                if contacts >= MIN_INTERFACE_CONTACTS {
                    debug!(domain1, domain2, contacts, "structure-connected");
                    2
                } else {
                    debug!(domain1, domain2, contacts, "not connected");
                    0
                }
            }
        };
        counts[judgment as usize] += 1;
        writeln!(
            out,
            "{}\t{domain1}\t{domain2}\t{judgment}\t{range1}\t{range2}",
            ctx.prefix
        )?;
    }
    out.flush()?;
    info!(
        prefix = ctx.prefix,
        sequence_connected = counts[1],
        structure_connected = counts[2],
        rejected = counts[0],
        "connectivity judged"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_gap_in_residue_space_can_still_connect() {
        // Structured residues 1..=20 and 100..=119: residue 20 and 100 are
        // adjacent in the ordered structured list.
        let structured: Vec<i32> = (1..=20).chain(100..=119).collect();
        let a: BTreeSet<i32> = (1..=20).collect();
        let b: BTreeSet<i32> = (100..=119).collect();
        assert!(sequence_connected(&a, &b, &structured));
    }

    #[test]
    fn distant_in_structured_order_is_not_connected() {
        let structured: Vec<i32> = (1..=60).collect();
        let a: BTreeSet<i32> = (1..=20).collect();
        let b: BTreeSet<i32> = (40..=60).collect();
        assert!(!sequence_connected(&a, &b, &structured));
    }

    #[test]
    fn interface_needs_nine_contacts() {
        let mut coords: BTreeMap<i32, Vec<[f64; 3]>> = BTreeMap::new();
        for res in 1..=9 {
            coords.insert(res, vec![[f64::from(res), 0.0, 0.0]]);
            coords.insert(res + 100, vec![[f64::from(res), 4.0, 0.0]]);
        }
        let a: BTreeSet<i32> = (1..=9).collect();
        let b: BTreeSet<i32> = (101..=109).collect();
        // Each residue of a touches several of b within 8 Å.
        assert!(interface_contacts(&coords, &a, &b) >= MIN_INTERFACE_CONTACTS);

        let far: BTreeSet<i32> = (201..=209).collect();
        assert_eq!(interface_contacts(&coords, &a, &far), 0);
    }
}
