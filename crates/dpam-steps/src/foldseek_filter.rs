// crates/dpam-steps/src/foldseek_filter.rs

//! Stage 4: coverage-based Foldseek hit filter.
//!
//! Hits are visited in ascending e-value order. A hit is admitted iff its
//! query interval brings at least five previously uncovered residues; the
//! first admitted hit per ECOD uid is kept as that uid's representative.

use crate::StepContext;
use anyhow::{Context, Result};
use dpam_core::fasta;
use dpam_tools::foldseek::{self, FoldseekHit};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;

const MIN_NEW_RESIDUES: usize = 5;

/// Run stage 4.
///
/// # Errors
/// Returns an error when the stage-3 output or stage-1 FASTA is missing.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let hits_file = ctx.stage_file(3, ".foldseek")?;
    let fa = ctx.stage_file(1, ".fa")?;
    let (_, sequence) = fasta::read_fasta(&fa)?;
    let length = sequence.len() as i32;

    let mut hits = foldseek::parse_hits(&hits_file)
        .with_context(|| format!("parsing Foldseek hits {}", hits_file.display()))?;
    hits.sort_by(|a, b| a.evalue.partial_cmp(&b.evalue).unwrap_or(std::cmp::Ordering::Equal));

    let kept = filter_by_coverage(&hits, length);

    let output = ctx.stage_file(4, ".foldseek.flt.result")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    writeln!(out, "uid\tevalue\tqstart\tqend")?;
    for hit in &kept {
        writeln!(out, "{}\t{}\t{}\t{}", hit.uid, hit.evalue, hit.query_start, hit.query_end)?;
    }
    out.flush()?;

    info!(prefix = ctx.prefix, kept = kept.len(), total = hits.len(), "Foldseek hits filtered");
    Ok(())
}

/// Coverage filter over e-value-sorted hits.
#[must_use]
pub fn filter_by_coverage(hits: &[FoldseekHit], length: i32) -> Vec<FoldseekHit> {
    let mut covered = vec![false; (length.max(0) as usize) + 1];
    let mut seen_uids: BTreeSet<String> = BTreeSet::new();
    let mut kept = Vec::new();
    for hit in hits {
        let start = hit.query_start.max(1);
        let end = hit.query_end.min(length);
        if start > end {
            continue;
        }
        let new_residues = (start..=end)
            .filter(|&res| !covered[res as usize])
            .count();
        if new_residues < MIN_NEW_RESIDUES {
            continue;
        }
        for res in start..=end {
            covered[res as usize] = true;
        }
        if seen_uids.insert(hit.uid.clone()) {
            kept.push(hit.clone());
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(uid: &str, evalue: f64, start: i32, end: i32) -> FoldseekHit {
        FoldseekHit {
            uid: uid.to_owned(),
            evalue,
            query_start: start,
            query_end: end,
        }
    }

    #[test]
    fn exactly_five_new_residues_is_kept() {
        let hits = vec![hit("a", 1e-10, 1, 20), hit("b", 1e-9, 16, 25)];
        // Second hit brings residues 21..=25: exactly five new.
        let kept = filter_by_coverage(&hits, 30);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn four_new_residues_is_rejected() {
        let hits = vec![hit("a", 1e-10, 1, 20), hit("b", 1e-9, 17, 24)];
        // Second hit brings residues 21..=24: only four new.
        let kept = filter_by_coverage(&hits, 30);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].uid, "a");
    }

    #[test]
    fn first_admitted_hit_per_uid_wins() {
        let hits = vec![hit("a", 1e-10, 1, 20), hit("a", 1e-9, 40, 60)];
        let kept = filter_by_coverage(&hits, 100);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].query_start, 1);
    }

    #[test]
    fn intervals_clamp_to_sequence() {
        let hits = vec![hit("a", 1e-10, -5, 200)];
        let kept = filter_by_coverage(&hits, 50);
        assert_eq!(kept.len(), 1);
    }
}
