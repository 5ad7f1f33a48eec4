// crates/dpam-tools/src/dali.rs

//! DaliLite adapter.
//!
//! One call aligns a query PDB against a template PDB inside a private
//! working directory (DaliLite writes its DAT imports and report files to
//! the cwd, and chokes on paths longer than 80 characters, so callers copy
//! both structures into a short-named scratch directory first).
//!
//! The parser reads the native report: the summary row below the
//! `No:  Chain   Z  …` header yields the z-score, and the
//! `# Structural equivalences` section yields aligned index ranges
//! (`q1 - q2 <=> t1 - t2`) which are expanded into per-residue pairs.
//! Indices are sequential positions in the imported structures, 1-based;
//! callers map them back onto their own residue numbering.

use crate::process::run_tool;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// One DALI alignment: z-score plus `(query_index, template_index)` pairs.
#[derive(Clone, Debug)]
pub struct DaliAlignment {
    pub z_score: f64,
    pub pairs: Vec<(i32, i32)>,
}

/// Align `query_pdb` against `template_pdb`, working inside `work_dir`.
///
/// Returns `Ok(None)` when DALI produced no alignment (no report, or a
/// report without a z-score); that is a data-absent case, not a failure.
///
/// # Errors
/// Returns an error if the `dali.pl` invocation itself fails.
pub fn align(
    query_pdb: &Path,
    template_pdb: &Path,
    work_dir: &Path,
) -> Result<Option<DaliAlignment>> {
    let mut cmd = Command::new("dali.pl");
    cmd.arg("--pdbfile1")
        .arg(query_pdb)
        .arg("--pdbfile2")
        .arg(template_pdb)
        .arg("--dat1")
        .arg("./")
        .arg("--dat2")
        .arg("./")
        .arg("--outfmt")
        .arg("summary,equivalences")
        .arg("--clean")
        .current_dir(work_dir);
    run_tool("dali.pl", &mut cmd).map_err(anyhow::Error::new)?;

    // DaliLite writes one report per comparison into the cwd.
    let mut reports: Vec<_> = fs::read_dir(work_dir)
        .with_context(|| format!("listing DALI work dir {}", work_dir.display()))?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
        .collect();
    reports.sort();
    let Some(report) = reports.first() else {
        debug!(dir = %work_dir.display(), "no DALI report produced");
        return Ok(None);
    };
    let text = fs::read_to_string(report)
        .with_context(|| format!("reading DALI report {}", report.display()))?;
    Ok(parse_report(&text))
}

/// Parse a DALI report into a z-score and expanded alignment pairs.
#[must_use]
pub fn parse_report(text: &str) -> Option<DaliAlignment> {
    let mut z_score: Option<f64> = None;
    let mut pairs: Vec<(i32, i32)> = Vec::new();
    let mut in_summary = false;
    let mut in_equivalences = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("No:") && trimmed.contains('Z') {
            in_summary = true;
            continue;
        }
        if trimmed.starts_with('#') {
            in_summary = false;
            in_equivalences = trimmed.contains("equivalences");
            continue;
        }
        if in_summary && z_score.is_none() {
            // "  1:  8ims-A 45.3  2.1  150 ..."; z is the third field.
            let words: Vec<&str> = trimmed.split_whitespace().collect();
            if words.len() >= 3 && words[0].ends_with(':') {
                if let Ok(z) = words[2].parse::<f64>() {
                    z_score = Some(z);
                }
            }
            continue;
        }
        if in_equivalences && trimmed.contains("<=>") {
            match parse_equivalence_line(trimmed) {
                Some(expanded) => pairs.extend(expanded),
                None => warn!(line = trimmed, "unparseable DALI equivalence line"),
            }
        }
    }

    z_score.map(|z| DaliAlignment { z_score: z, pairs })
}

/// `"  1: 8ims-A 2fmp-A     1 -    24 <=>    3 -   26   ( … )"`.
fn parse_equivalence_line(line: &str) -> Option<Vec<(i32, i32)>> {
    let numeric = line.split('(').next()?;
    let (left, right) = numeric.split_once("<=>")?;
    let (q1, q2) = parse_bound_pair(left)?;
    let (t1, t2) = parse_bound_pair(right)?;
    if q2 - q1 != t2 - t1 || q2 < q1 {
        return None;
    }
    Some((0..=(q2 - q1)).map(|k| (q1 + k, t1 + k)).collect())
}

/// Last `a - b` pair in a token stream.
fn parse_bound_pair(text: &str) -> Option<(i32, i32)> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < 3 {
        return None;
    }
    let b: i32 = words[words.len() - 1].parse().ok()?;
    if words[words.len() - 2] != "-" {
        return None;
    }
    let a: i32 = words[words.len() - 3].parse().ok()?;
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
# Job: test
# Query: mol1A
# No:  Chain   Z    rmsd lali nres  %id PDB  Description
No:  Chain   Z    rmsd lali nres  %id
  1:  2fmp-A 45.3  2.1  150  200   35

# Structural equivalences
   1: mol1-A 2fmp-A     1 -    24 <=>    3 -   26   (MET    1  - GLY   24  <=> SER    3  - ALA   26 )
   1: mol1-A 2fmp-A    30 -    31 <=>   40 -   41   (VAL   30  - LEU   31  <=> ILE   40  - PRO   41 )

# Translation-rotation matrices
";

    #[test]
    fn parses_z_and_expanded_pairs() {
        let alignment = parse_report(REPORT).unwrap();
        assert!((alignment.z_score - 45.3).abs() < 1e-9);
        assert_eq!(alignment.pairs.len(), 26);
        assert_eq!(alignment.pairs[0], (1, 3));
        assert_eq!(alignment.pairs[23], (24, 26));
        assert_eq!(alignment.pairs[24], (30, 40));
        assert_eq!(alignment.pairs[25], (31, 41));
    }

    #[test]
    fn missing_z_means_no_alignment() {
        assert!(parse_report("# empty report\n").is_none());
    }

    #[test]
    fn mismatched_ranges_are_rejected() {
        assert!(parse_equivalence_line("1 - 5 <=> 3 - 6").is_none());
        assert!(parse_equivalence_line("1 - 5 <=> 3 - 7").is_some());
    }
}
