// crates/dpam-steps/src/domass_features.rs

//! Stage 15: assemble classifier features.
//!
//! For every `(domain, ECOD template)` pair where an HHsearch hit and/or a
//! DALI hit overlaps the domain by at least 50% of either side, one row of
//! 13 numeric features is emitted (domain geometry, HH scores, DALI scores,
//! consensus agreement) plus metadata. A side with no overlapping hit is
//! filled with its sentinels. The rank features accumulate incrementally
//! in the order hits are read, mirroring the stage-8 rank pass.

use crate::hits::{self, GoodDomains};
use crate::StepContext;
use anyhow::{Context, Result};
use dpam_core::range::parse_range;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// ≥50% of either side.
#[must_use]
pub fn overlap_permissive(a: &BTreeSet<i32>, b: &BTreeSet<i32>) -> bool {
    let overlap = a.intersection(b).count() as f64;
    overlap >= a.len() as f64 * 0.5 || overlap >= b.len() as f64 * 0.5
}

/// Helices (≥6 residues in-domain) and strands (≥3) within a residue set.
#[must_use]
pub fn count_sses(
    domain: &BTreeSet<i32>,
    rows: &[hits::SseRow],
) -> (u32, u32) {
    let mut per_sse: BTreeMap<u32, (char, u32)> = BTreeMap::new();
    for row in rows {
        if let Some(id) = row.sse_id {
            if domain.contains(&row.resid) {
                let entry = per_sse.entry(id).or_insert((row.sse_type, 0));
                entry.1 += 1;
            }
        }
    }
    let helices = per_sse
        .values()
        .filter(|&&(kind, count)| kind == 'H' && count >= 6)
        .count() as u32;
    let strands = per_sse
        .values()
        .filter(|&&(kind, count)| kind == 'E' && count >= 3)
        .count() as u32;
    (helices, strands)
}

/// `ECOD_maps/{uid}.map` as `first column -> second column`.
fn load_ecod_map(path: &Path) -> HashMap<i32, i32> {
    let mut map = HashMap::new();
    let Ok(text) = fs::read_to_string(path) else {
        return map;
    };
    for line in text.lines() {
        let mut words = line.split_whitespace();
        if let (Some(a), Some(b)) = (words.next(), words.next()) {
            if let (Ok(a), Ok(b)) = (a.parse::<i32>(), b.parse::<i32>()) {
                map.insert(a, b);
            }
        }
    }
    map
}

struct HhFeature {
    key: String,
    hit_name: String,
    prob: f64,
    coverage: f64,
    rank: f64,
    query_resids: BTreeSet<i32>,
    template_resids: Vec<i32>,
    query_order: Vec<i32>,
}

struct DaliFeature {
    key: String,
    hit_name: String,
    zscore: f64,
    qscore: f64,
    ztile: f64,
    qtile: f64,
    rank: f64,
    query_resids: BTreeSet<i32>,
    template_resids: Vec<i32>,
    query_order: Vec<i32>,
}

/// Run stage 15.
///
/// # Errors
/// Returns an error when the SSE assignment or the ECOD hierarchy is
/// missing; an absent domains file means nothing to do.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let domains_file = ctx.stage_file(13, ".step13_domains")?;
    let output = ctx.stage_file(15, ".step15_features")?;
    let header = "domID\tdomRange\ttgroup\tecodid\tdomLen\tHelix_num\tStrand_num\t\
                  HHprob\tHHcov\tHHrank\tDzscore\tDqscore\tDztile\tDqtile\tDrank\t\
                  Cdiff\tCcov\tHHname\tDname\tDrot1\tDrot2\tDrot3\tDtrans\n";
    if !domains_file.exists() {
        info!(prefix = ctx.prefix, "no parsed domains; writing empty feature table");
        fs::write(&output, header)?;
        return Ok(());
    }

    let sse_rows = hits::read_sse_file(&ctx.stage_file(11, ".sse")?)?;
    let good = GoodDomains::read(&ctx.stage_file(10, ".goodDomains")?)?;
    let dali_hits_raw = hits::read_good_hits(&ctx.stage_file(8, "_good_hits")?)?;

    // key -> T-group / H-group from the hierarchy file.
    let hierarchy = ctx.data_dir.join("ecod.latest.domains");
    let mut key_to_tgroup: HashMap<String, String> = HashMap::new();
    let mut key_to_hgroup: HashMap<String, String> = HashMap::new();
    let text = fs::read_to_string(&hierarchy)
        .with_context(|| format!("reading ECOD hierarchy {}", hierarchy.display()))?;
    for line in text.lines() {
        if line.starts_with('#') {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 4 {
            continue;
        }
        let levels: Vec<&str> = words[3].split('.').collect();
        if levels.len() >= 3 {
            key_to_tgroup.insert(words[1].to_owned(), levels[..3].join("."));
            key_to_hgroup.insert(words[1].to_owned(), levels[..2].join("."));
        }
    }
    debug!(tgroups = key_to_tgroup.len(), "loaded ECOD hierarchy");

    // HHsearch features from the goodDomains sequence rows, ranks
    // accumulating in read order.
    let mut hh_features: Vec<HhFeature> = Vec::new();
    let mut qres_to_hgroups: HashMap<i32, BTreeSet<String>> = HashMap::new();
    for hit in &good.sequence {
        let Some(hgroup) = key_to_hgroup.get(&hit.key) else {
            continue;
        };
        let query_order: Vec<i32> = parse_range(&hit.filtered_range)?.into_iter().collect();
        let template_resids: Vec<i32> =
            parse_range(&hit.template_range)?.into_iter().collect();
        for &qres in &query_order {
            qres_to_hgroups.entry(qres).or_default().insert(hgroup.clone());
        }
        let rank = if query_order.is_empty() {
            0.0
        } else {
            let sum: usize = query_order
                .iter()
                .map(|qres| qres_to_hgroups.get(qres).map_or(0, BTreeSet::len))
                .sum();
            sum as f64 / query_order.len() as f64 / 10.0
        };
        hh_features.push(HhFeature {
            key: hit.key.clone(),
            hit_name: hit.hitname.clone(),
            prob: hit.probability / 100.0,
            coverage: hit.coverage,
            rank,
            query_resids: query_order.iter().copied().collect(),
            template_resids,
            query_order,
        });
    }
    let max_hh_rank = hh_features
        .iter()
        .map(|f| f.rank)
        .fold(10.0f64, f64::max);

    // DALI features from the stage-8 table (already descending z), with
    // template residues translated to canonical ECOD numbering.
    let maps_dir = ctx.data_dir.join("ECOD_maps");
    let mut dali_features: Vec<DaliFeature> = Vec::new();
    for hit in &dali_hits_raw {
        let ecod_map = load_ecod_map(&maps_dir.join(format!("{}.map", hit.uid)));
        let query_order: Vec<i32> = parse_range(&hit.query_range)?.into_iter().collect();
        let raw_template: Vec<i32> = parse_range(&hit.template_range)?.into_iter().collect();
        let template_resids: Vec<i32> = raw_template
            .iter()
            .filter_map(|t| ecod_map.get(t).copied())
            .collect();
        dali_features.push(DaliFeature {
            key: hit.key.clone(),
            hit_name: hit.hitname.clone(),
            zscore: hit.zscore / 10.0,
            qscore: hit.qscore,
            ztile: hit.ztile,
            qtile: hit.qtile,
            rank: hit.rank / 10.0,
            query_resids: query_order.iter().copied().collect(),
            template_resids,
            query_order,
        });
    }
    let max_dali_rank = dali_features
        .iter()
        .map(|f| f.rank)
        .fold(10.0f64, f64::max);

    let domains = hits::read_domains_file(&domains_file)?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    out.write_all(header.as_bytes())?;
    let mut rows = 0usize;

    for (domain_name, domain_range) in &domains {
        let domain_resids = parse_range(domain_range)?;
        let domain_len = domain_resids.len();
        let (helix_count, strand_count) = count_sses(&domain_resids, &sse_rows);

        // Best overlapping hit per ECOD key, per side.
        let mut hh_best: BTreeMap<&str, &HhFeature> = BTreeMap::new();
        for feature in &hh_features {
            if overlap_permissive(&domain_resids, &feature.query_resids) {
                let slot = hh_best.entry(feature.key.as_str()).or_insert(feature);
                if feature.prob > slot.prob {
                    *slot = feature;
                }
            }
        }
        let mut dali_best: BTreeMap<&str, &DaliFeature> = BTreeMap::new();
        for feature in &dali_features {
            if overlap_permissive(&domain_resids, &feature.query_resids) {
                let slot = dali_best.entry(feature.key.as_str()).or_insert(feature);
                if feature.zscore > slot.zscore {
                    *slot = feature;
                }
            }
        }

        for (&key, hh) in &hh_best {
            let Some(tgroup) = key_to_tgroup.get(key) else {
                continue;
            };
            if let Some(dali) = dali_best.get(key) {
                // Both methods found this template: consensus features.
                let common: BTreeSet<i32> = hh
                    .query_resids
                    .intersection(&dali.query_resids)
                    .copied()
                    .collect();
                let consensus_cov = if domain_len > 0 {
                    common.len() as f64 / domain_len as f64
                } else {
                    0.0
                };
                let hh_map: HashMap<i32, i32> = hh
                    .query_order
                    .iter()
                    .copied()
                    .zip(hh.template_resids.iter().copied())
                    .collect();
                let dali_map: HashMap<i32, i32> = dali
                    .query_order
                    .iter()
                    .copied()
                    .zip(dali.template_resids.iter().copied())
                    .collect();
                let diffs: Vec<f64> = common
                    .iter()
                    .filter_map(|qres| match (hh_map.get(qres), dali_map.get(qres)) {
                        (Some(&a), Some(&b)) => Some(f64::from((a - b).abs())),
                        _ => None,
                    })
                    .collect();
                let consensus_diff = if diffs.is_empty() {
                    -1.0
                } else {
                    diffs.iter().sum::<f64>() / diffs.len() as f64
                };
                writeln!(
                    out,
                    "{domain_name}\t{domain_range}\t{tgroup}\t{key}\t{domain_len}\t\
                     {helix_count}\t{strand_count}\t{:.3}\t{:.3}\t{:.2}\t{:.3}\t{:.3}\t\
                     {:.3}\t{:.3}\t{:.2}\t{:.2}\t{:.3}\t{}\t{}\tna\tna\tna\tna",
                    hh.prob,
                    hh.coverage,
                    hh.rank,
                    dali.zscore,
                    dali.qscore,
                    dali.ztile,
                    dali.qtile,
                    dali.rank,
                    consensus_diff,
                    consensus_cov,
                    hh.hit_name,
                    dali.hit_name
                )?;
            } else {
                // HH only: DALI side filled with sentinels.
                writeln!(
                    out,
                    "{domain_name}\t{domain_range}\t{tgroup}\t{key}\t{domain_len}\t\
                     {helix_count}\t{strand_count}\t{:.3}\t{:.3}\t{:.2}\t0.000\t0.000\t\
                     10.000\t10.000\t{max_dali_rank:.2}\t-1.00\t0.000\t{}\tna\tna\tna\tna\tna",
                    hh.prob, hh.coverage, hh.rank, hh.hit_name
                )?;
            }
            rows += 1;
        }
        for (&key, dali) in &dali_best {
            if hh_best.contains_key(key) {
                continue;
            }
            let Some(tgroup) = key_to_tgroup.get(key) else {
                continue;
            };
            writeln!(
                out,
                "{domain_name}\t{domain_range}\t{tgroup}\t{key}\t{domain_len}\t\
                 {helix_count}\t{strand_count}\t0.000\t0.000\t{max_hh_rank:.2}\t{:.3}\t\
                 {:.3}\t{:.3}\t{:.3}\t{:.2}\t-1.00\t0.000\tna\t{}\tna\tna\tna\tna",
                dali.zscore, dali.qscore, dali.ztile, dali.qtile, dali.rank, dali.hit_name
            )?;
            rows += 1;
        }
    }
    out.flush()?;
    info!(prefix = ctx.prefix, rows, "classifier features written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hits::SseRow;

    #[test]
    fn permissive_overlap_checks_either_side() {
        let a: BTreeSet<i32> = (1..=100).collect();
        let b: BTreeSet<i32> = (1..=10).collect();
        // 10 residues = 10% of a but 100% of b.
        assert!(overlap_permissive(&a, &b));
        let c: BTreeSet<i32> = (90..=120).collect();
        // 11 of 31 residues of c, 11% of a: no.
        assert!(!overlap_permissive(&a, &c));
    }

    #[test]
    fn sse_counts_respect_length_cutoffs() {
        let mut rows = Vec::new();
        for res in 1..=6 {
            rows.push(SseRow { resid: res, aa: 'A', sse_id: Some(1), sse_type: 'H' });
        }
        for res in 10..=12 {
            rows.push(SseRow { resid: res, aa: 'A', sse_id: Some(2), sse_type: 'E' });
        }
        for res in 20..=24 {
            rows.push(SseRow { resid: res, aa: 'A', sse_id: Some(3), sse_type: 'H' });
        }
        let domain: BTreeSet<i32> = (1..=30).collect();
        let (helices, strands) = count_sses(&domain, &rows);
        assert_eq!(helices, 1); // the 5-residue helix does not count
        assert_eq!(strands, 1);

        // Only residues inside the domain count toward an SSE's length.
        let partial: BTreeSet<i32> = (1..=5).collect();
        let (helices, _) = count_sses(&partial, &rows);
        assert_eq!(helices, 0);
    }
}
