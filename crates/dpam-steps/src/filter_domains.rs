// crates/dpam-steps/src/filter_domains.rs

//! Stage 10: filter good domains.
//!
//! Each hit's query range is merged with gap tolerance 10; segments under
//! 5 residues are dropped and at least 25 residues must remain. Structure
//! hits additionally need a positive judge score: one point per satisfied
//! quality criterion (rank, q-score, both percentiles, normalised z) plus
//! one per cumulative sequence-support threshold met.
//!
//! Both classes are emitted into one file with a leading discriminator
//! column; when nothing passes, no file is written.

use crate::StepContext;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use tracing::{info, warn};

/// Merge, trim, and re-emit a range: gap tolerance 10, segment length ≥5,
/// total ≥25. Returns `None` when the filters reject the range.
#[must_use]
pub fn filter_segments(range: &str) -> Option<(String, u32)> {
    let mut segments: Vec<(i32, i32)> = Vec::new();
    for part in range.split(',') {
        let Some((lo, hi)) = part.split_once('-') else {
            continue;
        };
        let (Ok(lo), Ok(hi)) = (lo.parse::<i32>(), hi.parse::<i32>()) else {
            continue;
        };
        for res in lo..=hi {
            match segments.last_mut() {
                Some(seg) if res <= seg.1 + 10 => seg.1 = res,
                _ => segments.push((res, res)),
            }
        }
    }

    let mut kept: Vec<String> = Vec::new();
    let mut total = 0u32;
    for &(start, end) in &segments {
        let span = (end - start + 1) as u32;
        if span >= 5 {
            total += span;
            kept.push(format!("{start}-{end}"));
        }
    }
    if total >= 25 {
        Some((kept.join(","), total))
    } else {
        None
    }
}

/// Cumulative sequence-support level plus its judge contribution.
#[must_use]
pub fn sequence_support_points(best_prob: f64, best_cov: f64) -> (u32, &'static str) {
    let mut points = 0;
    let mut level = "no";
    if best_prob >= 20.0 && best_cov >= 0.2 {
        points += 1;
        level = "low";
    }
    if best_prob >= 50.0 && best_cov >= 0.3 {
        points += 1;
        level = "medium";
    }
    if best_prob >= 80.0 && best_cov >= 0.4 {
        points += 1;
        level = "high";
    }
    if best_prob >= 95.0 && best_cov >= 0.6 {
        points += 1;
        level = "superb";
    }
    (points, level)
}

/// Structure-hit judge score.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn judge_score(
    rank: f64,
    qscore: f64,
    ztile: f64,
    qtile: f64,
    znorm: f64,
    best_prob: f64,
    best_cov: f64,
) -> (u32, &'static str) {
    let mut judge = 0;
    if rank < 1.5 {
        judge += 1;
    }
    if qscore > 0.5 {
        judge += 1;
    }
    if (0.0..0.75).contains(&ztile) {
        judge += 1;
    }
    if (0.0..0.75).contains(&qtile) {
        judge += 1;
    }
    if znorm > 0.225 {
        judge += 1;
    }
    let (points, level) = sequence_support_points(best_prob, best_cov);
    (judge + points, level)
}

/// Run stage 10.
///
/// # Errors
/// Returns an error on I/O failure; missing inputs read as empty.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let mut lines: Vec<String> = Vec::new();

    let sequence_file = ctx.stage_file(9, "_sequence.result")?;
    if sequence_file.exists() {
        let file = File::open(&sequence_file)
            .with_context(|| format!("opening {}", sequence_file.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() < 8 {
                continue;
            }
            if let Some((filtered, _)) = filter_segments(words[6]) {
                lines.push(format!(
                    "sequence\t{}\t{}\t{filtered}",
                    ctx.prefix,
                    words[..8].join("\t")
                ));
            }
        }
    } else {
        warn!(prefix = ctx.prefix, "no sequence support file");
    }
    let sequence_count = lines.len();

    let structure_file = ctx.stage_file(9, "_structure.result")?;
    if structure_file.exists() {
        let file = File::open(&structure_file)
            .with_context(|| format!("opening {}", structure_file.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() < 12 {
                continue;
            }
            let uid = words[0].split('_').next().unwrap_or("");
            let parsed = (|| -> Option<(f64, f64, f64, f64, f64, f64, f64)> {
                Some((
                    words[3].parse().ok()?,
                    words[4].parse().ok()?,
                    words[5].parse().ok()?,
                    words[6].parse().ok()?,
                    words[7].parse().ok()?,
                    words[8].parse().ok()?,
                    words[9].parse().ok()?,
                ))
            })();
            let Some((zscore, qscore, ztile, qtile, rank, best_prob, best_cov)) = parsed else {
                warn!(prefix = ctx.prefix, "malformed structure support row skipped");
                continue;
            };
            let znorm = ctx
                .refdata
                .norms
                .get(uid)
                .map_or(0.0, |norm| (zscore / norm * 100.0).round() / 100.0);
            let (judge, level) =
                judge_score(rank, qscore, ztile, qtile, znorm, best_prob, best_cov);
            if judge == 0 {
                continue;
            }
            if let Some((filtered, _)) = filter_segments(words[10]) {
                lines.push(format!(
                    "structure\t{level}\t{}\t{znorm}\t{}\t{}\t{filtered}",
                    ctx.prefix,
                    words[..10].join("\t"),
                    words[10]
                ));
            }
        }
    } else {
        warn!(prefix = ctx.prefix, "no structure support file");
    }

    if lines.is_empty() {
        info!(prefix = ctx.prefix, "no hits passed the good-domain filters");
        return Ok(());
    }
    let output = ctx.stage_file(10, ".goodDomains")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    for line in &lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    info!(
        prefix = ctx.prefix,
        sequence = sequence_count,
        structure = lines.len() - sequence_count,
        "good domains written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twenty_five_total_residues_pass_and_twenty_four_fail() {
        assert!(filter_segments("1-25").is_some());
        assert!(filter_segments("1-24").is_none());
    }

    #[test]
    fn five_residue_segments_pass_and_four_fail() {
        // The 5-long segment counts toward the total; the 4-long does not.
        let (filtered, total) = filter_segments("1-21,40-44").unwrap();
        assert_eq!(filtered, "1-21,40-44");
        assert_eq!(total, 26);
        assert!(filter_segments("1-21,40-43").is_none());
    }

    #[test]
    fn gap_merge_happens_before_length_checks() {
        // 1-12 and 20-24 merge across the 7-gap into 1-24, then 40-43 is
        // dropped as a 4-long segment.
        assert!(filter_segments("1-12,20-25,40-43").is_some());
    }

    #[test]
    fn judge_is_cumulative_over_support_levels() {
        // superb support satisfies all four thresholds.
        let (judge, level) = judge_score(2.0, 0.0, 0.9, 0.9, 0.0, 99.0, 0.9);
        assert_eq!(judge, 4);
        assert_eq!(level, "superb");
        // Negative percentiles (no historical data) score nothing.
        let (judge, level) = judge_score(1.0, 0.6, -1.0, -1.0, 0.3, 0.0, 0.0);
        assert_eq!(judge, 3);
        assert_eq!(level, "no");
    }
}
