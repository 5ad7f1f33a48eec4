// crates/dpam-steps/src/disorder.rs

//! Stage 12: disorder prediction.
//!
//! A residue pair `(r1, r2)` with `r2 ≥ r1 + 10` and PAE < 12, where at
//! least one residue sits in a kept SSE and the two are not in the same
//! SSE, records a contact on each in-SSE endpoint. A 10-residue window
//! marks all its residues disordered iff the window's contact total is
//! ≤ 30 and it holds at most 5 residues from stage-10 good domains.

use crate::hits::GoodDomains;
use crate::{hits, StepContext};
use anyhow::{bail, Context, Result};
use dpam_core::pae::PaeMatrix;
use dpam_core::range::parse_range;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;

/// Run stage 12.
///
/// # Errors
/// Returns an error when the SSE assignment or PAE matrix is missing.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let sse_file = ctx.stage_file(11, ".sse")?;
    if !sse_file.exists() {
        bail!("SSE assignment not found: {}", sse_file.display());
    }
    let sse_rows = hits::read_sse_file(&sse_file)?;
    let res_to_sse: BTreeMap<i32, u32> = sse_rows
        .iter()
        .filter_map(|row| row.sse_id.map(|id| (row.resid, id)))
        .collect();

    let json_file = ctx.root_file(".json");
    if !json_file.exists() {
        bail!("PAE matrix not found: {}", json_file.display());
    }
    let pae = PaeMatrix::load(&json_file)?;
    let length = pae.max_residue();

    let good = GoodDomains::read(&ctx.stage_file(10, ".goodDomains")?)?;
    let mut hit_resids: BTreeSet<i32> = BTreeSet::new();
    for hit in &good.sequence {
        hit_resids.extend(parse_range(&hit.query_range)?);
    }
    for hit in &good.structure {
        hit_resids.extend(parse_range(&hit.query_range)?);
    }

    let contacts = inter_sse_contacts(length, &pae, &res_to_sse);
    let disordered = disordered_residues(length, &contacts, &hit_resids);

    let output = ctx.stage_file(12, ".diso")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    for resid in &disordered {
        writeln!(out, "{resid}")?;
    }
    out.flush()?;
    info!(
        prefix = ctx.prefix,
        length,
        disordered = disordered.len(),
        "disorder prediction written"
    );
    Ok(())
}

/// Contact counts on in-SSE residues.
#[must_use]
pub fn inter_sse_contacts(
    length: i32,
    pae: &PaeMatrix,
    res_to_sse: &BTreeMap<i32, u32>,
) -> BTreeMap<i32, u32> {
    let mut contacts: BTreeMap<i32, u32> = BTreeMap::new();
    for res1 in 1..=length {
        for res2 in (res1 + 10)..=length {
            let Some(error) = pae.get(res1, res2) else {
                continue;
            };
            if error >= 12.0 {
                continue;
            }
            let sse1 = res_to_sse.get(&res1);
            let sse2 = res_to_sse.get(&res2);
            match (sse1, sse2) {
                (None, None) => {}
                (Some(a), Some(b)) if a == b => {}
                _ => {
                    if sse1.is_some() {
                        *contacts.entry(res1).or_insert(0) += 1;
                    }
                    if sse2.is_some() {
                        *contacts.entry(res2).or_insert(0) += 1;
                    }
                }
            }
        }
    }
    contacts
}

/// Sliding-window sweep over all full 10-residue windows.
#[must_use]
pub fn disordered_residues(
    length: i32,
    contacts: &BTreeMap<i32, u32>,
    hit_resids: &BTreeSet<i32>,
) -> BTreeSet<i32> {
    let mut disordered = BTreeSet::new();
    let mut start = 1;
    while start + 9 <= length {
        let window = start..=(start + 9);
        let total: u32 = window.clone().filter_map(|res| contacts.get(&res)).sum();
        let hits = window.clone().filter(|res| hit_resids.contains(res)).count();
        if total <= 30 && hits <= 5 {
            disordered.extend(window);
        }
        start += 1;
    }
    disordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_pae(tmp: &tempfile::TempDir, length: usize, value: f64) -> PaeMatrix {
        let row: Vec<String> = (0..length).map(|_| format!("{value}")).collect();
        let rows: Vec<String> = (0..length).map(|_| format!("[{}]", row.join(","))).collect();
        let body = format!("{{\"pae\": [{}]}}", rows.join(","));
        let path = tmp.path().join("pae.json");
        std::fs::write(&path, body).unwrap();
        PaeMatrix::load(&path).unwrap()
    }

    #[test]
    fn low_pae_everywhere_with_no_sses_means_fully_disordered() {
        let tmp = tempfile::tempdir().unwrap();
        let pae = uniform_pae(&tmp, 60, 10.0);
        let contacts = inter_sse_contacts(60, &pae, &BTreeMap::new());
        assert!(contacts.is_empty());
        let disordered = disordered_residues(60, &contacts, &BTreeSet::new());
        assert_eq!(disordered.len(), 60);
        assert!(disordered.contains(&1));
        assert!(disordered.contains(&60));
    }

    #[test]
    fn contacts_land_on_in_sse_endpoints() {
        let tmp = tempfile::tempdir().unwrap();
        let pae = uniform_pae(&tmp, 30, 5.0);
        // Residues 1-5 in SSE 1, 20-24 in SSE 2.
        let mut sse = BTreeMap::new();
        for res in 1..=5 {
            sse.insert(res, 1);
        }
        for res in 20..=24 {
            sse.insert(res, 2);
        }
        let contacts = inter_sse_contacts(30, &pae, &sse);
        // Residue 1 contacts SSE-2 residues 20..=24 plus every non-SSE
        // partner at distance >= 10 (11..=19, 25..=30).
        assert_eq!(contacts[&1], 5 + 9 + 6);
        // A non-SSE residue records nothing.
        assert!(!contacts.contains_key(&12));
    }

    #[test]
    fn same_sse_pairs_do_not_count() {
        let tmp = tempfile::tempdir().unwrap();
        let pae = uniform_pae(&tmp, 30, 5.0);
        let mut sse = BTreeMap::new();
        for res in 1..=15 {
            sse.insert(res, 1);
        }
        let contacts = inter_sse_contacts(30, &pae, &sse);
        // (1, 11..=15) are same-SSE pairs; only partners 16..=30 count.
        assert_eq!(contacts[&1], 15);
    }

    #[test]
    fn structured_windows_survive() {
        // 31 contacts on one residue push its windows over the limit.
        let mut contacts = BTreeMap::new();
        contacts.insert(15, 31);
        let disordered = disordered_residues(30, &contacts, &BTreeSet::new());
        // Every window containing residue 15 fails, and nothing else
        // covers it; its neighbours still have passing windows.
        assert!(!disordered.contains(&15));
        assert!(disordered.contains(&14));
        assert!(disordered.contains(&16));
        assert!(disordered.contains(&1));
        assert!(disordered.contains(&30));
    }

    #[test]
    fn good_domain_residues_protect_windows() {
        let contacts = BTreeMap::new();
        let hits: BTreeSet<i32> = (1..=16).collect();
        let disordered = disordered_residues(20, &contacts, &hits);
        // Windows 1..=7 hold >= 6 hit residues and fail; window 8-17 holds
        // 9 hits... every window overlaps hits heavily here.
        assert!(!disordered.contains(&3));
    }
}
