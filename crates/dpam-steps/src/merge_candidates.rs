// crates/dpam-steps/src/merge_candidates.rs

//! Stage 19: merge candidates.
//!
//! Two domains hitting the same template are a merge candidate iff both
//! predictions sit within 0.1 of their domain's best probability, the two
//! template-residue sets overlap under 25% on either side, and the
//! supporting templates outnumber the opposing ones (high-probability,
//! weighted coverage above 0.5, not themselves supporting) for at least
//! one of the two domains.

use crate::StepContext;
use anyhow::{Context, Result};
use dpam_core::range::parse_range;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::info;

#[derive(Clone, Debug)]
struct MappedHit {
    domain: String,
    key: String,
    prob: f64,
    coverage: f64,
    template_resids: BTreeSet<i32>,
}

/// Run stage 19.
///
/// # Errors
/// Returns an error on I/O failure; a missing mappings table means nothing
/// to do.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let mappings_file = ctx.stage_file(18, ".step18_mappings")?;
    if !mappings_file.exists() {
        info!(prefix = ctx.prefix, "no mappings; no merge candidates");
        return Ok(());
    }

    let mut domain_range: BTreeMap<String, String> = BTreeMap::new();
    let mut domain_hits: BTreeMap<String, Vec<MappedHit>> = BTreeMap::new();
    let mut ecod_hits: BTreeMap<String, Vec<MappedHit>> = BTreeMap::new();
    let mut best_prob: BTreeMap<String, f64> = BTreeMap::new();

    for (lineno, line) in fs::read_to_string(&mappings_file)?.lines().enumerate() {
        if lineno == 0 || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 8 {
            continue;
        }
        let Ok(prob) = parts[4].parse::<f64>() else {
            continue;
        };
        let domain = parts[0].to_owned();
        let key = parts[2].to_owned();
        domain_range.insert(domain.clone(), parts[1].to_owned());
        let slot = best_prob.entry(domain.clone()).or_insert(prob);
        if prob > *slot {
            *slot = prob;
        }

        // Prefer the DALI projection; fall back to HHsearch.
        let template_range = if parts[7] != "na" {
            parts[7]
        } else if parts[6] != "na" {
            parts[6]
        } else {
            continue;
        };
        let template_resids = parse_range(template_range)?;

        let Some(uid) = ctx.refdata.key_to_uid.get(&key) else {
            continue;
        };
        let Some(&(_, length)) = ctx.refdata.lengths.get(uid) else {
            continue;
        };
        let (weights, total_weight) = ctx.refdata.weights_or_uniform(uid, length);
        let covered: f64 = template_resids
            .iter()
            .filter_map(|res| weights.get(res))
            .sum();
        let coverage = if total_weight > 0.0 { covered / total_weight } else { 0.0 };

        let hit = MappedHit {
            domain: domain.clone(),
            key: key.clone(),
            prob,
            coverage,
            template_resids,
        };
        domain_hits.entry(domain).or_default().push(hit.clone());
        ecod_hits.entry(key).or_default().push(hit);
    }

    if ecod_hits.is_empty() {
        info!(prefix = ctx.prefix, "no template-mapped hits; no merge candidates");
        return Ok(());
    }

    // Candidate pairs with their supporting templates.
    let mut candidates: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for (key, hits) in &ecod_hits {
        if hits.len() < 2 {
            continue;
        }
        for (index, hit1) in hits.iter().enumerate() {
            for hit2 in &hits[index + 1..] {
                if hit1.domain == hit2.domain {
                    continue;
                }
                if hit1.prob + 0.1 < best_prob[&hit1.domain]
                    || hit2.prob + 0.1 < best_prob[&hit2.domain]
                {
                    continue;
                }
                let common = hit1
                    .template_resids
                    .intersection(&hit2.template_resids)
                    .count() as f64;
                if common >= 0.25 * hit1.template_resids.len() as f64
                    || common >= 0.25 * hit2.template_resids.len() as f64
                {
                    continue;
                }
                let pair = if hit1.domain <= hit2.domain {
                    (hit1.domain.clone(), hit2.domain.clone())
                } else {
                    (hit2.domain.clone(), hit1.domain.clone())
                };
                candidates.entry(pair).or_default().push(key.clone());
            }
        }
    }
    info!(prefix = ctx.prefix, pairs = candidates.len(), "potential merge pairs");

    let opposing = |domain: &str, supporting: &[String]| -> usize {
        domain_hits.get(domain).map_or(0, |hits| {
            hits.iter()
                .filter(|hit| {
                    hit.prob + 0.1 >= best_prob[domain]
                        && hit.coverage > 0.5
                        && !supporting.contains(&hit.key)
                })
                .map(|hit| hit.key.clone())
                .collect::<BTreeSet<String>>()
                .len()
        })
    };

    let mut accepted: Vec<String> = Vec::new();
    let mut merge_info: Vec<String> = Vec::new();
    for ((domain1, domain2), supporting) in &candidates {
        let support = supporting.len();
        if support > opposing(domain1, supporting) || support > opposing(domain2, supporting) {
            let range1 = domain_range.get(domain1).cloned().unwrap_or_default();
            let range2 = domain_range.get(domain2).cloned().unwrap_or_default();
            accepted.push(format!("{domain1}\t{range1}\t{domain2}\t{range2}"));
            merge_info.push(format!("{domain1},{domain2}\t{}", supporting.join(",")));
        }
    }

    if accepted.is_empty() {
        info!(prefix = ctx.prefix, "no validated merge candidates");
        return Ok(());
    }
    let output = ctx.stage_file(19, ".step19_merge_candidates")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    writeln!(out, "# domain1\trange1\tdomain2\trange2")?;
    for row in &accepted {
        writeln!(out, "{row}")?;
    }
    out.flush()?;

    let info_file = ctx.stage_file(19, ".step19_merge_info")?;
    fs::write(
        &info_file,
        merge_info
            .iter()
            .map(|row| format!("{row}\n"))
            .collect::<String>(),
    )?;
    info!(prefix = ctx.prefix, accepted = accepted.len(), "merge candidates written");
    Ok(())
}
