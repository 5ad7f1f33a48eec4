// crates/dpam-steps/src/support.rs

//! Stage 9: sequence and structure support.
//!
//! Sequence side: stage-5 rows are grouped by uid, ordered by descending
//! probability, and kept only when the hit's template residues contribute
//! at least 50% previously-uncovered residues for that uid. No probability
//! or coverage threshold is applied here; the classifier judges evidence
//! strength later.
//!
//! Structure side: every stage-8 hit gets the best sequence support within
//! its H-group family; the maximum probability `p*` among family hits
//! intersecting the structure hit's (gap-10 merged) query residues, and
//! the best coverage among hits within 0.1 of `p*`.

use crate::StepContext;
use anyhow::{Context, Result};
use dpam_core::range::{format_range_dashed, parse_range_list};
use dpam_refdata::ReferenceData;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// One stage-5 row, reduced to what this stage needs.
#[derive(Clone, Debug)]
pub struct MappedSeqHit {
    pub uid: String,
    pub key: String,
    pub hgroup: String,
    pub template_len: u32,
    pub probability: f64,
    pub query_resids: Vec<i32>,
    pub template_resids: Vec<i32>,
}

/// Run stage 9.
///
/// # Errors
/// Returns an error when the stage-5 output is missing.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let map_file = ctx.stage_file(5, ".map2ecod.result")?;
    let seq_hits = parse_map2ecod(&map_file, ctx.refdata)?;
    info!(prefix = ctx.prefix, hits = seq_hits.len(), "parsed mapped sequence hits");

    let (kept, fam_hits) = filter_sequence_hits(&seq_hits);

    let seq_output = ctx.stage_file(9, "_sequence.result")?;
    let mut out = BufWriter::new(
        File::create(&seq_output)
            .with_context(|| format!("creating {}", seq_output.display()))?,
    );
    for hit in &kept {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{:.2}\t{}\t{}\t{}",
            hit.hitname,
            hit.key,
            hit.hgroup,
            hit.probability,
            hit.coverage,
            hit.template_len,
            hit.query_range,
            hit.template_range
        )?;
    }
    out.flush()?;
    info!(prefix = ctx.prefix, kept = kept.len(), "sequence support written");

    let good_hits_file = ctx.stage_file(8, "_good_hits")?;
    if good_hits_file.exists() {
        let rows = attach_structure_support(&good_hits_file, &fam_hits)?;
        let struct_output = ctx.stage_file(9, "_structure.result")?;
        let mut out = BufWriter::new(
            File::create(&struct_output)
                .with_context(|| format!("creating {}", struct_output.display()))?,
        );
        for row in &rows {
            writeln!(out, "{row}")?;
        }
        out.flush()?;
        info!(prefix = ctx.prefix, hits = rows.len(), "structure support written");
    } else {
        warn!(prefix = ctx.prefix, "no DALI analysis output; skipping structure support");
    }
    Ok(())
}

/// A kept (non-redundant) sequence hit.
#[derive(Clone, Debug)]
pub struct KeptSeqHit {
    pub hitname: String,
    pub key: String,
    pub hgroup: String,
    pub probability: f64,
    pub coverage: f64,
    pub template_len: u32,
    pub query_range: String,
    pub template_range: String,
}

/// Family index: H-group -> (probability, template length, query residues,
/// template residues) per mapped hit.
pub type FamilyHits = BTreeMap<String, Vec<(f64, u32, Vec<i32>, Vec<i32>)>>;

fn parse_map2ecod(path: &Path, refdata: &ReferenceData) -> Result<Vec<MappedSeqHit>> {
    let mut hits = Vec::new();
    if !path.exists() {
        anyhow::bail!("mapped hits not found: {}", path.display());
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if lineno == 0 {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 13 {
            continue;
        }
        let uid = words[0];
        let Ok(probability) = words[2].parse::<f64>() else {
            warn!(line = lineno + 1, "bad probability in mapped hits, row skipped");
            continue;
        };
        let Some(&(ref key, template_len)) = refdata.lengths.get(uid) else {
            warn!(uid, "uid missing from ECOD lengths, row skipped");
            continue;
        };
        let Some((_, hgroup)) = refdata.metadata.get(uid) else {
            warn!(uid, "uid missing from ECOD metadata, row skipped");
            continue;
        };
        let query_resids = parse_range_list(words[11])?;
        let template_resids = parse_range_list(words[12])?;
        hits.push(MappedSeqHit {
            uid: uid.to_owned(),
            key: key.clone(),
            hgroup: hgroup.clone(),
            template_len,
            probability,
            query_resids,
            template_resids,
        });
    }
    Ok(hits)
}

/// Greedy per-uid redundancy removal plus the family index for the
/// structure side.
#[must_use]
pub fn filter_sequence_hits(hits: &[MappedSeqHit]) -> (Vec<KeptSeqHit>, FamilyHits) {
    let mut fam_hits: FamilyHits = BTreeMap::new();
    for hit in hits {
        fam_hits.entry(hit.hgroup.clone()).or_default().push((
            hit.probability,
            hit.template_len,
            hit.query_resids.clone(),
            hit.template_resids.clone(),
        ));
    }

    let mut by_uid: BTreeMap<String, Vec<&MappedSeqHit>> = BTreeMap::new();
    for hit in hits {
        by_uid.entry(hit.uid.clone()).or_default().push(hit);
    }

    let mut kept = Vec::new();
    for (uid, mut uid_hits) in by_uid {
        uid_hits.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut covered: BTreeSet<i32> = BTreeSet::new();
        let mut count = 0usize;
        for hit in uid_hits {
            let template_set: BTreeSet<i32> = hit.template_resids.iter().copied().collect();
            let coverage = template_set.len() as f64 / f64::from(hit.template_len);
            let new: usize = template_set.difference(&covered).count();
            if (new as f64) < template_set.len() as f64 * 0.5 {
                continue;
            }
            count += 1;
            covered.extend(template_set);
            kept.push(KeptSeqHit {
                hitname: format!("{uid}_{count}"),
                key: hit.key.clone(),
                hgroup: hit.hgroup.clone(),
                probability: hit.probability,
                coverage,
                template_len: hit.template_len,
                query_range: format_range_dashed(hit.query_resids.iter().copied()),
                template_range: format_range_dashed(hit.template_resids.iter().copied()),
            });
        }
    }
    (kept, fam_hits)
}

/// Merge a structure hit's query range with gap tolerance 10, expanding
/// each merged segment to its hull.
#[must_use]
pub fn merge_query_range(range: &str) -> BTreeSet<i32> {
    let residues = parse_range_list(range).unwrap_or_default();
    let mut merged = BTreeSet::new();
    let mut run_start: Option<i32> = None;
    let mut run_end = 0i32;
    for res in residues {
        match run_start {
            Some(_) if res <= run_end + 10 => run_end = res,
            Some(start) => {
                merged.extend(start..=run_end);
                run_start = Some(res);
                run_end = res;
            }
            None => {
                run_start = Some(res);
                run_end = res;
            }
        }
    }
    if let Some(start) = run_start {
        merged.extend(start..=run_end);
    }
    merged
}

/// Best family sequence support for a merged structure-hit residue set.
#[must_use]
pub fn sequence_support(
    hgroup: &str,
    merged: &BTreeSet<i32>,
    fam_hits: &FamilyHits,
) -> (f64, f64) {
    let Some(hits) = fam_hits.get(hgroup) else {
        return (0.0, 0.0);
    };
    let mut scored: Vec<(f64, f64)> = Vec::with_capacity(hits.len());
    for (prob, template_len, query_resids, template_resids) in hits {
        let aligned: BTreeSet<i32> = query_resids
            .iter()
            .zip(template_resids)
            .filter(|(q, _)| merged.contains(q))
            .map(|(_, &t)| t)
            .collect();
        let coverage = aligned.len() as f64 / f64::from(*template_len);
        scored.push((*prob, coverage));
    }
    if scored.is_empty() {
        return (0.0, 0.0);
    }
    let best_prob = scored.iter().map(|&(p, _)| p).fold(f64::MIN, f64::max);
    let best_cov = scored
        .iter()
        .filter(|&&(p, _)| p >= best_prob - 0.1)
        .map(|&(_, c)| c)
        .fold(0.0f64, f64::max);
    (best_prob, (best_cov * 100.0).round() / 100.0)
}

fn attach_structure_support(good_hits: &Path, fam_hits: &FamilyHits) -> Result<Vec<String>> {
    let file =
        File::open(good_hits).with_context(|| format!("opening {}", good_hits.display()))?;
    let mut rows = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if lineno == 0 {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 11 {
            continue;
        }
        let hgroup = words[3];
        let query_range = words[9];
        let merged = merge_query_range(query_range);
        let (best_prob, best_cov) = sequence_support(hgroup, &merged, fam_hits);
        // Scores pass through verbatim; only support columns are new.
        rows.push(format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            words[0],
            words[2],
            words[3],
            words[4],
            words[5],
            words[6],
            words[7],
            words[8],
            best_prob,
            best_cov,
            words[9],
            words[10]
        ));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(uid: &str, prob: f64, template: &[i32]) -> MappedSeqHit {
        MappedSeqHit {
            uid: uid.to_owned(),
            key: format!("e{uid}"),
            hgroup: "1.1".to_owned(),
            template_len: 20,
            probability: prob,
            query_resids: (1..=template.len() as i32).collect(),
            template_resids: template.to_vec(),
        }
    }

    #[test]
    fn redundant_hits_are_dropped() {
        let a = hit("1", 99.0, &(1..=10).collect::<Vec<_>>());
        // Second hit re-covers 8 of its 10 template residues: < 50% new.
        let b = hit("1", 90.0, &(3..=12).collect::<Vec<_>>());
        // Third hit brings 11..=20: all new.
        let c = hit("1", 80.0, &(11..=20).collect::<Vec<_>>());
        let (kept, _) = filter_sequence_hits(&[a, b, c]);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].hitname, "1_1");
        assert_eq!(kept[1].hitname, "1_2");
        assert!((kept[1].probability - 80.0).abs() < 1e-9);
    }

    #[test]
    fn merge_bridges_small_gaps_only() {
        let merged = merge_query_range("1-5,10-12,40-42");
        // 5 -> 10 bridges (gap within 10); 12 -> 40 does not.
        assert!(merged.contains(&7));
        assert!(!merged.contains(&20));
        assert!(merged.contains(&41));
    }

    #[test]
    fn support_takes_best_probability_then_best_coverage() {
        let mut fams: FamilyHits = BTreeMap::new();
        fams.insert(
            "1.1".to_owned(),
            vec![
                (99.0, 10, (1..=4).collect(), (1..=4).collect()),
                (98.95, 10, (1..=8).collect(), (1..=8).collect()),
                (50.0, 10, (1..=10).collect(), (1..=10).collect()),
            ],
        );
        let merged: BTreeSet<i32> = (1..=10).collect();
        let (prob, cov) = sequence_support("1.1", &merged, &fams);
        assert!((prob - 99.0).abs() < 1e-9);
        // Coverage comes from hits within 0.1 of p*: 0.4 and 0.8, not the
        // 1.0 of the weak hit.
        assert!((cov - 0.8).abs() < 1e-9);
        assert_eq!(sequence_support("9.9", &merged, &fams), (0.0, 0.0));
    }
}
