// crates/dpam-steps/src/analyze_dali.rs

//! Stage 8: analyse iterative DALI output.
//!
//! Per recorded iteration: a weighted q-score against the template's
//! position weights, z/q percentiles against the template's historical
//! score distributions (fraction strictly greater; -1 when no data), and,
//! after re-sorting by descending z, a rank equal to the mean number of
//! distinct H-groups seen so far across the hit's aligned query residues.
//! The rank pass is order-sensitive and runs single-threaded.

use crate::StepContext;
use anyhow::{bail, Context, Result};
use dpam_core::range::format_range_dashed;
use dpam_refdata::ReferenceData;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

/// One raw iteration from the stage-7 combined file.
#[derive(Clone, Debug)]
pub struct RawDaliHit {
    pub hitname: String,
    pub zscore: f64,
    pub pairs: Vec<(i32, i32)>,
}

/// Run stage 8.
///
/// # Errors
/// Returns an error when the stage-7 output is missing.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let hits_file = ctx.stage_file(7, "_iterativdDali_hits")?;
    if !hits_file.exists() {
        bail!("iterative DALI output not found: {}", hits_file.display());
    }
    let raw = parse_raw_hits(&hits_file)?;
    info!(prefix = ctx.prefix, hits = raw.len(), "parsed iterative DALI hits");

    let rows = analyze(&raw, ctx.refdata);

    let output = ctx.stage_file(8, "_good_hits")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    writeln!(
        out,
        "hitname\tecodnum\tecodkey\thgroup\tzscore\tqscore\tztile\tqtile\trank\tqrange\terange"
    )?;
    for row in &rows {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{}\t{}",
            row.hitname,
            row.uid,
            row.key,
            row.hgroup,
            row.zscore,
            row.qscore,
            row.ztile,
            row.qtile,
            row.rank,
            row.query_range,
            row.template_range
        )?;
    }
    out.flush()?;
    info!(prefix = ctx.prefix, analysed = rows.len(), "DALI hits analysed");
    Ok(())
}

/// Parse the stage-7 combined hits file.
///
/// # Errors
/// Returns an error when the file cannot be read; malformed header lines
/// are skipped with a warning.
pub fn parse_raw_hits(path: &Path) -> Result<Vec<RawDaliHit>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hits: Vec<RawDaliHit> = Vec::new();
    let mut current: Option<RawDaliHit> = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(header) = line.strip_prefix('>') {
            if let Some(hit) = current.take() {
                if !hit.pairs.is_empty() {
                    hits.push(hit);
                }
            }
            let mut words = header.split_whitespace();
            let (Some(hitname), Some(z)) = (words.next(), words.next()) else {
                warn!(file = %path.display(), "malformed DALI hit header skipped");
                continue;
            };
            let Ok(zscore) = z.parse::<f64>() else {
                warn!(file = %path.display(), "non-numeric z-score skipped");
                continue;
            };
            current = Some(RawDaliHit {
                hitname: hitname.to_owned(),
                zscore,
                pairs: Vec::new(),
            });
        } else if let Some(hit) = current.as_mut() {
            let mut words = line.split_whitespace();
            if let (Some(q), Some(t)) = (words.next(), words.next()) {
                if let (Ok(q), Ok(t)) = (q.parse::<i32>(), t.parse::<i32>()) {
                    hit.pairs.push((q, t));
                }
            }
        }
    }
    if let Some(hit) = current.take() {
        if !hit.pairs.is_empty() {
            hits.push(hit);
        }
    }
    Ok(hits)
}

/// Fully analysed hit row.
#[derive(Clone, Debug)]
pub struct AnalyzedHit {
    pub hitname: String,
    pub uid: String,
    pub key: String,
    pub hgroup: String,
    pub zscore: f64,
    pub qscore: f64,
    pub ztile: f64,
    pub qtile: f64,
    pub rank: f64,
    pub query_range: String,
    pub template_range: String,
}

/// Score, percentile, and rank every raw hit.
#[must_use]
pub fn analyze(raw: &[RawDaliHit], refdata: &ReferenceData) -> Vec<AnalyzedHit> {
    struct Scored<'a> {
        hit: &'a RawDaliHit,
        uid: String,
        key: String,
        hgroup: String,
        qscore: f64,
        ztile: f64,
        qtile: f64,
    }

    let mut scored: Vec<Scored<'_>> = Vec::new();
    for hit in raw {
        let uid = hit.hitname.split('_').next().unwrap_or("").to_owned();
        let Some((key, hgroup)) = refdata.metadata.get(&uid).cloned() else {
            warn!(uid = %uid, "uid missing from ECOD metadata, hit dropped");
            continue;
        };
        let weights = refdata.position_weights(&uid);
        let historical = refdata.historical_scores(&uid);
        let (qscore, ztile, qtile) = match (weights, historical) {
            (Some(weights), Some(historical)) if !weights.is_empty() => {
                let total: f64 = weights.values().sum();
                let covered: f64 = hit
                    .pairs
                    .iter()
                    .filter_map(|(_, t)| weights.get(t))
                    .sum();
                let qscore = if total > 0.0 { covered / total } else { 0.0 };
                (
                    qscore,
                    percentile(hit.zscore, &historical.zscores),
                    percentile(qscore, &historical.qscores),
                )
            }
            _ => (-1.0, -1.0, -1.0),
        };
        scored.push(Scored {
            hit,
            uid,
            key,
            hgroup,
            qscore,
            ztile,
            qtile,
        });
    }

    // Descending z; stable so equal scores keep file order.
    scored.sort_by(|a, b| {
        b.hit
            .zscore
            .partial_cmp(&a.hit.zscore)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut hgroups_at: BTreeMap<i32, BTreeSet<String>> = BTreeMap::new();
    let mut rows = Vec::with_capacity(scored.len());
    for entry in &scored {
        let mut query_positions = Vec::with_capacity(entry.hit.pairs.len());
        let mut template_positions = Vec::with_capacity(entry.hit.pairs.len());
        let mut rank_sum = 0usize;
        for &(q, t) in &entry.hit.pairs {
            query_positions.push(q);
            template_positions.push(t);
            let seen = hgroups_at.entry(q).or_default();
            seen.insert(entry.hgroup.clone());
            rank_sum += seen.len();
        }
        let rank = if entry.hit.pairs.is_empty() {
            0.0
        } else {
            rank_sum as f64 / entry.hit.pairs.len() as f64
        };
        rows.push(AnalyzedHit {
            hitname: entry.hit.hitname.clone(),
            uid: entry.uid.clone(),
            key: entry.key.clone(),
            hgroup: entry.hgroup.clone(),
            zscore: entry.hit.zscore,
            qscore: entry.qscore,
            ztile: entry.ztile,
            qtile: entry.qtile,
            rank,
            query_range: format_range_dashed(query_positions),
            template_range: format_range_dashed(template_positions),
        });
    }
    rows
}

/// Fraction of the historical distribution strictly greater than `value`;
/// -1 with no data.
#[must_use]
pub fn percentile(value: f64, historical: &[f64]) -> f64 {
    if historical.is_empty() {
        return -1.0;
    }
    let better = historical.iter().filter(|&&other| other > value).count();
    better as f64 / historical.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_counts_strictly_greater() {
        let hist = vec![10.0, 20.0, 30.0, 30.0];
        assert!((percentile(30.0, &hist) - 0.0).abs() < 1e-12);
        assert!((percentile(25.0, &hist) - 0.5).abs() < 1e-12);
        assert!((percentile(5.0, &hist) - 1.0).abs() < 1e-12);
        assert_eq!(percentile(5.0, &[]), -1.0);
    }
}
