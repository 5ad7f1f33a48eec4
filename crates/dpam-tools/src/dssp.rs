// crates/dpam-tools/src/dssp.rs

//! DSSP adapter.
//!
//! Runs `mkdssp` on a PDB file and collapses the DSSP alphabet to
//! {H, E, -}: E/B → E (strand), G/H/I → H (helix), everything else a coil
//! marker. Segmentation into significant SSEs is the stage-11 kernel's job;
//! the parser only yields the per-residue collapsed string.

use crate::process::run_tool;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Run `mkdssp` producing a classic DSSP report.
///
/// # Errors
/// Returns an error if the invocation fails.
pub fn run(pdb: &Path, dssp_out: &Path) -> Result<()> {
    let mut cmd = Command::new("mkdssp");
    cmd.arg(pdb).arg(dssp_out);
    run_tool("mkdssp", &mut cmd).map_err(anyhow::Error::new)?;
    Ok(())
}

/// Per-residue collapsed secondary structure from a DSSP report.
///
/// Returns `(residue_id, collapsed_char)` in file order, where the char is
/// `'H'`, `'E'`, or `'-'`.
///
/// # Errors
/// Returns an error if the report cannot be read; unparsable residue rows
/// (chain breaks) are skipped.
pub fn parse(path: &Path) -> Result<Vec<(i32, char)>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading DSSP report {}", path.display()))?;
    let mut rows = Vec::new();
    let mut in_records = false;
    for line in text.lines() {
        if !in_records {
            let mut words = line.split_whitespace();
            if words.next() == Some("#") && words.next() == Some("RESIDUE") {
                in_records = true;
            }
            continue;
        }
        if line.len() < 17 {
            continue;
        }
        let Ok(resid) = line[5..10].trim().parse::<i32>() else {
            // Chain break rows carry '!' instead of a residue number.
            continue;
        };
        let code = line.as_bytes()[16] as char;
        let collapsed = match code {
            'E' | 'B' => 'E',
            'G' | 'H' | 'I' => 'H',
            _ => '-',
        };
        rows.push((resid, collapsed));
    }
    debug!(residues = rows.len(), file = %path.display(), "parsed DSSP report");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSSP: &str = "\
==== Secondary Structure Definition by the program DSSP ====
  #  RESIDUE AA STRUCTURE BP1 BP2  ACC
    1    1 A M  H  X S+     0   0  105
    2    2 A K  G  X S+     0   0   80
    3    3 A V  B  X S+     0   0   33
    4    4 A L  T  X S+     0   0   20
    5        !              0   0    0
    6    7 A A  I  X S+     0   0   11
";

    #[test]
    fn collapses_alphabet_and_skips_breaks() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("q.dssp");
        std::fs::write(&path, DSSP).unwrap();
        let rows = parse(&path).unwrap();
        assert_eq!(
            rows,
            vec![(1, 'H'), (2, 'H'), (3, 'E'), (4, '-'), (7, 'H')]
        );
    }
}
