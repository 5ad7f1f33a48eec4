// crates/dpam-tools/src/hhsuite.rs

//! HH-suite adapter: profile construction and the ECOD profile search.
//!
//! Invocation chain for one query:
//! `hhblits` (MSA) → `addss.pl` (PSIPRED annotation, skippable) →
//! `hhmake` (profile) → `hhsearch` (vs the ECOD profile database).
//!
//! The parser works on the native HHsearch report: `Probab=…` header lines
//! plus `Q`/`T` alignment blocks, skipping `ss_pred`/`ss_dssp`/`Consensus`
//! rows. The first `T` row of a hit names it.

use crate::process::{run_tool, ToolFailure};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// One parsed HHsearch hit with its gapped alignment.
#[derive(Clone, Debug)]
pub struct HhAlignment {
    pub hit_id: String,
    pub probability: f64,
    pub evalue: String,
    pub score: String,
    pub aligned_cols: String,
    pub identities: String,
    pub similarity: String,
    pub sum_probs: String,
    pub query_start: i32,
    pub query_seq: String,
    pub template_start: i32,
    pub template_seq: String,
}

/// Build an MSA with hhblits.
///
/// # Errors
/// Returns a [`ToolFailure`] on non-zero exit.
pub fn hhblits(
    query_fa: &Path,
    sequence_db: &Path,
    a3m_out: &Path,
    cpus: usize,
) -> Result<(), ToolFailure> {
    let mut cmd = Command::new("hhblits");
    cmd.arg("-i")
        .arg(query_fa)
        .arg("-d")
        .arg(sequence_db)
        .arg("-oa3m")
        .arg(a3m_out)
        .arg("-cpu")
        .arg(cpus.to_string())
        .arg("-n")
        .arg("3");
    run_tool("hhblits", &mut cmd).map(|_| ())
}

/// Annotate an MSA with predicted secondary structure (requires PSIPRED).
///
/// # Errors
/// Returns a [`ToolFailure`] on non-zero exit.
pub fn addss(a3m: &Path, a3m_ss_out: &Path) -> Result<(), ToolFailure> {
    let mut cmd = Command::new("addss.pl");
    cmd.arg(a3m).arg(a3m_ss_out).arg("-a3m");
    run_tool("addss.pl", &mut cmd).map(|_| ())
}

/// Turn an MSA into an HMM profile.
///
/// # Errors
/// Returns a [`ToolFailure`] on non-zero exit.
pub fn hhmake(a3m: &Path, hmm_out: &Path) -> Result<(), ToolFailure> {
    let mut cmd = Command::new("hhmake");
    cmd.arg("-i").arg(a3m).arg("-o").arg(hmm_out);
    run_tool("hhmake", &mut cmd).map(|_| ())
}

/// Search a profile against the ECOD profile database.
///
/// # Errors
/// Returns a [`ToolFailure`] on non-zero exit.
pub fn hhsearch(
    hmm: &Path,
    profile_db: &Path,
    report_out: &Path,
    cpus: usize,
) -> Result<(), ToolFailure> {
    let mut cmd = Command::new("hhsearch");
    cmd.arg("-i")
        .arg(hmm)
        .arg("-d")
        .arg(profile_db)
        .arg("-o")
        .arg(report_out)
        .arg("-cpu")
        .arg(cpus.to_string());
    run_tool("hhsearch", &mut cmd).map(|_| ())
}

/// Parse an HHsearch report into alignments.
///
/// # Errors
/// Returns an error only if the file cannot be read; malformed hits are
/// skipped with a warning.
pub fn parse_report(path: &Path) -> Result<Vec<HhAlignment>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading HHsearch report {}", path.display()))?;
    let mut alignments = Vec::new();

    // Hits start at lines beginning with '>'; the preamble before the first
    // one is the summary table.
    for block in content.split("\n>").skip(1) {
        match parse_hit_block(block) {
            Some(alignment) => alignments.push(alignment),
            None => warn!(file = %path.display(), "skipping malformed HHsearch hit block"),
        }
    }
    debug!(hits = alignments.len(), "parsed HHsearch report");
    Ok(alignments)
}

fn parse_hit_block(block: &str) -> Option<HhAlignment> {
    let mut hit_id = String::new();
    let mut probability = 0.0f64;
    let mut evalue = String::from("0");
    let mut score = String::from("0");
    let mut aligned_cols = String::from("0");
    let mut identities = String::from("0");
    let mut similarity = String::from("0");
    let mut sum_probs = String::from("0");
    let mut query_start = 0i32;
    let mut query_seq = String::new();
    let mut template_start = 0i32;
    let mut template_seq = String::new();

    for line in block.lines() {
        if line.starts_with("Probab") {
            for word in line.split_whitespace() {
                let Some((key, value)) = word.split_once('=') else {
                    continue;
                };
                match key {
                    "Probab" => probability = value.parse().ok()?,
                    "E-value" => evalue = value.to_owned(),
                    "Score" => score = value.to_owned(),
                    "Aligned_cols" => aligned_cols = value.to_owned(),
                    "Identities" => identities = value.to_owned(),
                    "Similarity" => similarity = value.to_owned(),
                    "Sum_probs" => sum_probs = value.to_owned(),
                    _ => {}
                }
            }
        } else if let Some(rest) = line.strip_prefix("Q ") {
            let words: Vec<&str> = rest.split_whitespace().collect();
            if words.len() >= 4 && words[0] != "ss_pred" && words[0] != "Consensus" {
                if query_start == 0 {
                    query_start = words[1].parse().ok()?;
                }
                query_seq.push_str(words[2]);
            }
        } else if let Some(rest) = line.strip_prefix("T ") {
            let words: Vec<&str> = rest.split_whitespace().collect();
            if words.len() >= 4
                && words[0] != "Consensus"
                && words[0] != "ss_dssp"
                && words[0] != "ss_pred"
            {
                if hit_id.is_empty() {
                    hit_id = words[0].to_owned();
                }
                if template_start == 0 {
                    template_start = words[1].parse().ok()?;
                }
                template_seq.push_str(words[2]);
            }
        }
    }

    if hit_id.is_empty() || query_seq.is_empty() {
        return None;
    }
    Some(HhAlignment {
        hit_id,
        probability,
        evalue,
        score,
        aligned_cols,
        identities,
        similarity,
        sum_probs,
        query_start,
        query_seq,
        template_start,
        template_seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
Query         AF-P1
Match_columns 60

 No Hit                             Prob E-value
  1 2RSP_A description              99.1 1.2E-30

No 1
>2RSP_A description of the hit
Probab=99.10  E-value=1.2e-30  Score=210.53  Aligned_cols=55  Identities=40%  Similarity=0.71  Sum_probs=51.2

Q ss_pred             CCHHHHH
Q AF-P1             3 MKVLAA-    9 (60)
Q Consensus         3 mkvlaa-    9 (60)
T Consensus         5 mk-laag   11 (85)
T 2RSP_A            5 MK-LAAG   11 (85)
T ss_dssp             CHHHHHH
";

    #[test]
    fn parses_header_and_alignment_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("q.hhsearch");
        std::fs::write(&path, REPORT).unwrap();
        let hits = parse_report(&path).unwrap();
        assert_eq!(hits.len(), 1);
        let hit = &hits[0];
        assert_eq!(hit.hit_id, "2RSP_A");
        assert!((hit.probability - 99.10).abs() < 1e-9);
        assert_eq!(hit.query_start, 3);
        assert_eq!(hit.query_seq, "MKVLAA-");
        assert_eq!(hit.template_start, 5);
        assert_eq!(hit.template_seq, "MK-LAAG");
        assert_eq!(hit.aligned_cols, "55");
    }

    #[test]
    fn ss_rows_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("q.hhsearch");
        std::fs::write(&path, REPORT).unwrap();
        let hits = parse_report(&path).unwrap();
        // ss_pred/Consensus/ss_dssp rows must not leak into the sequences.
        assert!(!hits[0].query_seq.contains('C'));
    }
}
