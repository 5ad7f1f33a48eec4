// crates/dpam-steps/src/sse.rs

//! Stage 11: secondary-structure assignment.
//!
//! DSSP runs over the stage-1 PDB; the collapsed per-residue string is
//! segmented on the literal `--` delimiter, and a segment is a significant
//! SSE iff it holds at least 3 strand or 6 helix residues. Kept SSEs get
//! dense 1-based ids. Every residue either belongs to exactly one kept SSE
//! or is emitted as `(na, C)`.

use crate::StepContext;
use anyhow::{bail, Context, Result};
use dpam_core::fasta;
use dpam_tools::dssp;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::info;

/// Run stage 11.
///
/// # Errors
/// Returns an error when inputs are missing or the DSSP invocation fails.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let pdb = ctx.stage_file(1, ".pdb")?;
    if !pdb.exists() {
        bail!("PDB not found: {}", pdb.display());
    }
    let (_, sequence) = fasta::read_fasta(&ctx.stage_file(1, ".fa")?)?;

    let dssp_file = ctx.stage_file(11, ".dssp")?;
    dssp::run(&pdb, &dssp_file)?;
    let collapsed = dssp::parse(&dssp_file)?;

    let rows = assign_sses(&collapsed, &sequence);

    let output = ctx.stage_file(11, ".sse")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    for (resid, aa, sse_id, sse_type) in &rows {
        match sse_id {
            Some(id) => writeln!(out, "{resid}\t{aa}\t{id}\t{sse_type}")?,
            None => writeln!(out, "{resid}\t{aa}\tna\t{sse_type}")?,
        }
    }
    out.flush()?;

    let kept = rows.iter().filter_map(|(_, _, id, _)| *id).max().unwrap_or(0);
    info!(prefix = ctx.prefix, residues = rows.len(), sses = kept, "SSE assignment written");
    Ok(())
}

/// Segment the collapsed DSSP string and assign dense SSE ids.
///
/// Input is `(residue, collapsed char)` in file order; `sequence` supplies
/// the amino acid by position.
#[must_use]
pub fn assign_sses(
    collapsed: &[(i32, char)],
    sequence: &str,
) -> Vec<(i32, char, Option<u32>, char)> {
    let string: String = collapsed.iter().map(|&(_, c)| c).collect();
    let seq: Vec<char> = sequence.chars().collect();

    let mut rows = Vec::with_capacity(collapsed.len());
    let mut position = 0usize;
    let mut sse_id = 0u32;
    for segment in string.split("--") {
        let strand = segment.chars().filter(|&c| c == 'E').count();
        let helix = segment.chars().filter(|&c| c == 'H').count();
        let significant = strand >= 3 || helix >= 6;
        if significant {
            sse_id += 1;
        }
        for c in segment.chars() {
            let Some(&(resid, _)) = collapsed.get(position) else {
                break;
            };
            let aa = seq.get(position).copied().unwrap_or('X');
            if significant && c != '-' {
                rows.push((resid, aa, Some(sse_id), c));
            } else {
                rows.push((resid, aa, None, 'C'));
            }
            position += 1;
        }
        // Emit the two delimiter residues as coil.
        for _ in 0..2 {
            if let Some(&(resid, _)) = collapsed.get(position) {
                let aa = seq.get(position).copied().unwrap_or('X');
                rows.push((resid, aa, None, 'C'));
                position += 1;
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collapse(pattern: &str) -> Vec<(i32, char)> {
        pattern
            .chars()
            .enumerate()
            .map(|(i, c)| (i as i32 + 1, c))
            .collect()
    }

    #[test]
    fn short_segments_are_not_significant() {
        // EE (2 strands) < 3: whole protein is coil.
        let rows = assign_sses(&collapse("EE--EEE"), "AAAAAAA");
        assert_eq!(rows[0].2, None);
        assert_eq!(rows[0].3, 'C');
        // The second segment has 3 strands: kept as SSE 1.
        assert_eq!(rows[4].2, Some(1));
        assert_eq!(rows[4].3, 'E');
    }

    #[test]
    fn helix_needs_six_residues() {
        let rows = assign_sses(&collapse("HHHHH--HHHHHH"), "AAAAAAAAAAAAA");
        assert_eq!(rows[0].2, None);
        assert_eq!(rows[7].2, Some(1));
        assert_eq!(rows[7].3, 'H');
    }

    #[test]
    fn isolated_coil_inside_a_kept_sse_stays_coil() {
        // Single '-' does not split the segment but the residue is coil.
        let rows = assign_sses(&collapse("EEE-EE"), "AAAAAA");
        assert_eq!(rows[2].2, Some(1));
        assert_eq!(rows[3], (4, 'A', None, 'C'));
        assert_eq!(rows[4].2, Some(1));
    }

    #[test]
    fn ids_are_dense_over_kept_sses_only() {
        let rows = assign_sses(&collapse("EEE--HH--EEEE"), "AAAAAAAAAAAAA");
        let ids: Vec<Option<u32>> = rows.iter().map(|r| r.2).collect();
        assert_eq!(ids[0], Some(1));
        assert_eq!(ids[5], None); // 2-helix segment dropped
        assert_eq!(ids[9], Some(2)); // next kept SSE gets the next id
    }
}
