// crates/dpam-steps/src/mapping.rs

//! Stage 18: project confident predictions onto template residues.
//!
//! For each confident `(domain, template)` row, the overlapping HHsearch
//! hit (stage 5) and DALI hit (stage 8) are found under a stricter overlap
//! rule than stage 15: the hit must cover ≥33% of the domain *and* ≥50% of
//! the domain or ≥50% of itself. The alignment is restricted to columns
//! whose query residue lies in the domain; HH template residues translate
//! through `ECOD_maps/{uid}.map` to canonical ECOD numbering, DALI template
//! residues already carry it. Either side may come out `na`.

use crate::{hits, StepContext};
use anyhow::{Context, Result};
use dpam_core::range::{format_range, parse_range, parse_range_list};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

const HEADER: &str = "# domain\tdomain_range\tecod_id\ttgroup\tdpam_prob\tquality\t\
                      hh_template_range\tdali_template_range\n";

/// Stage-18 overlap rule: ≥33% of the domain, and ≥50% of the domain or
/// ≥50% of the hit.
#[must_use]
pub fn overlap_strict(domain: &BTreeSet<i32>, hit: &BTreeSet<i32>) -> bool {
    let overlap = domain.intersection(hit).count() as f64;
    overlap >= domain.len() as f64 * 0.33
        && (overlap >= domain.len() as f64 * 0.5 || overlap >= hit.len() as f64 * 0.5)
}

struct AlignedHit {
    key: String,
    query: Vec<i32>,
    template: Vec<i32>,
    query_set: BTreeSet<i32>,
}

/// Run stage 18.
///
/// # Errors
/// Returns an error on I/O failure; missing upstream tables read as empty.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let confident_file = ctx.stage_file(17, ".step17_confident_predictions")?;
    let output = ctx.stage_file(18, ".step18_mappings")?;
    if !confident_file.exists() {
        info!(prefix = ctx.prefix, "no confident predictions; writing empty mappings");
        fs::write(&output, HEADER)?;
        return Ok(());
    }

    let hh_hits = load_hh_alignments(&ctx.stage_file(5, ".map2ecod.result")?, ctx)?;
    let dali_hits = load_dali_alignments(&ctx.stage_file(8, "_good_hits")?)?;
    let maps_dir = ctx.data_dir.join("ECOD_maps");

    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    out.write_all(HEADER.as_bytes())?;
    let mut rows = 0usize;
    let mut hh_mapped = 0usize;
    let mut dali_mapped = 0usize;

    for line in fs::read_to_string(&confident_file)?.lines() {
        if line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 6 {
            continue;
        }
        let (domain, domain_range, tgroup, ecod_ref, prob, quality) =
            (parts[0], parts[1], parts[2], parts[3], parts[4], parts[5]);
        let domain_resids = parse_range(domain_range)?;

        let mut hh_range = "na".to_owned();
        for hit in hh_hits.iter().filter(|hit| hit.key == ecod_ref) {
            if !overlap_strict(&domain_resids, &hit.query_set) {
                continue;
            }
            let Some(uid) = ctx.refdata.key_to_uid.get(ecod_ref) else {
                warn!(key = ecod_ref, "no uid for ECOD key");
                continue;
            };
            let (known, translate) = load_ecod_map(&maps_dir.join(format!("{uid}.map")));
            let translated: Vec<i32> = hit
                .query
                .iter()
                .zip(&hit.template)
                .filter(|(q, t)| domain_resids.contains(q) && known.contains(t))
                .filter_map(|(_, t)| translate.get(t).copied())
                .collect();
            if !translated.is_empty() {
                hh_range = format_range(translated);
            }
            break;
        }
        if hh_range != "na" {
            hh_mapped += 1;
        }

        let mut dali_range = "na".to_owned();
        for hit in dali_hits.iter().filter(|hit| hit.key == ecod_ref) {
            if !overlap_strict(&domain_resids, &hit.query_set) {
                continue;
            }
            let filtered: Vec<i32> = hit
                .query
                .iter()
                .zip(&hit.template)
                .filter(|(q, _)| domain_resids.contains(q))
                .map(|(_, &t)| t)
                .collect();
            if !filtered.is_empty() {
                dali_range = format_range(filtered);
            }
            break;
        }
        if dali_range != "na" {
            dali_mapped += 1;
        }

        writeln!(
            out,
            "{domain}\t{domain_range}\t{ecod_ref}\t{tgroup}\t{prob}\t{quality}\t{hh_range}\t{dali_range}"
        )?;
        rows += 1;
    }
    out.flush()?;
    info!(prefix = ctx.prefix, rows, hh_mapped, dali_mapped, "template mappings written");
    Ok(())
}

fn load_hh_alignments(path: &Path, ctx: &StepContext<'_>) -> Result<Vec<AlignedHit>> {
    let mut hits = Vec::new();
    if !path.exists() {
        return Ok(hits);
    }
    for (lineno, line) in fs::read_to_string(path)?.lines().enumerate() {
        if lineno == 0 {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 13 {
            continue;
        }
        let query = parse_range_list(parts[11])?;
        let template = parse_range_list(parts[12])?;
        if query.len() != template.len() {
            warn!(
                prefix = ctx.prefix,
                key = parts[1],
                "HHsearch query/template length mismatch, hit skipped"
            );
            continue;
        }
        hits.push(AlignedHit {
            key: parts[1].to_owned(),
            query_set: query.iter().copied().collect(),
            query,
            template,
        });
    }
    Ok(hits)
}

fn load_dali_alignments(path: &Path) -> Result<Vec<AlignedHit>> {
    let mut hits = Vec::new();
    for raw in hits::read_good_hits(path)? {
        let query = parse_range_list(&raw.query_range)?;
        let template = parse_range_list(&raw.template_range)?;
        if query.len() != template.len() {
            warn!(key = %raw.key, "DALI query/template length mismatch, hit skipped");
            continue;
        }
        hits.push(AlignedHit {
            key: raw.key,
            query_set: query.iter().copied().collect(),
            query,
            template,
        });
    }
    Ok(hits)
}

/// `{uid}.map` gives the translation into canonical ECOD numbering: the
/// membership set is the second column, the translation maps it onto the
/// first.
fn load_ecod_map(path: &Path) -> (BTreeSet<i32>, HashMap<i32, i32>) {
    let mut known = BTreeSet::new();
    let mut translate = HashMap::new();
    let Ok(text) = fs::read_to_string(path) else {
        warn!(file = %path.display(), "ECOD map not found");
        return (known, translate);
    };
    for line in text.lines() {
        let mut words = line.split_whitespace();
        if let (Some(a), Some(b)) = (words.next(), words.next()) {
            if let (Ok(a), Ok(b)) = (a.parse::<i32>(), b.parse::<i32>()) {
                known.insert(b);
                translate.insert(b, a);
            }
        }
    }
    (known, translate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_overlap_needs_a_third_of_the_domain() {
        let domain: BTreeSet<i32> = (1..=100).collect();
        // 30% of the domain, 100% of the hit: fails the 33% gate.
        let hit: BTreeSet<i32> = (1..=30).collect();
        assert!(!overlap_strict(&domain, &hit));
        // 40% of the domain and 100% of the hit: passes via the hit side.
        let hit: BTreeSet<i32> = (1..=40).collect();
        assert!(overlap_strict(&domain, &hit));
    }

    #[test]
    fn middle_band_needs_half_of_either_side() {
        let domain: BTreeSet<i32> = (1..=100).collect();
        // 40 of the domain's residues but only 40% of the 100-residue hit.
        let hit: BTreeSet<i32> = (1..=40).chain(200..=259).collect();
        assert!(!overlap_strict(&domain, &hit));
        // Half the domain: passes regardless of the hit's size.
        let hit: BTreeSet<i32> = (1..=50).chain(200..=400).collect();
        assert!(overlap_strict(&domain, &hit));
    }
}
