// crates/dpam-tools/src/foldseek.rs

//! Foldseek adapter: single-query `easy-search` plus the batch
//! `createdb → search → convertalis` workflow.
//!
//! Search parameters are deliberately permissive (huge e-value, huge
//! `--max-seqs`): significance is decided downstream by the coverage
//! filter, not by Foldseek.

use crate::process::{run_tool, ToolFailure};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// One raw Foldseek hit (BLAST-tab convertalis format).
#[derive(Clone, Debug)]
pub struct FoldseekHit {
    /// ECOD uid: the target name up to the first `.` (targets are
    /// `uid.pdb`).
    pub uid: String,
    pub evalue: f64,
    pub query_start: i32,
    pub query_end: i32,
}

/// Run `foldseek easy-search` for a single query.
///
/// # Errors
/// Returns a [`ToolFailure`] on non-zero exit.
pub fn easy_search(
    query_pdb: &Path,
    database: &Path,
    output: &Path,
    tmp_dir: &Path,
    threads: usize,
    evalue: f64,
    max_seqs: u32,
) -> Result<(), ToolFailure> {
    let mut cmd = Command::new("foldseek");
    cmd.arg("easy-search")
        .arg(query_pdb)
        .arg(database)
        .arg(output)
        .arg(tmp_dir)
        .arg("--threads")
        .arg(threads.to_string())
        .arg("-e")
        .arg(format!("{evalue}"))
        .arg("--max-seqs")
        .arg(max_seqs.to_string());
    run_tool("foldseek", &mut cmd).map(|_| ())
}

/// Build a query database from a directory of PDB files.
///
/// # Errors
/// Returns a [`ToolFailure`] on non-zero exit.
pub fn createdb(pdb_dir: &Path, db: &Path, threads: usize) -> Result<(), ToolFailure> {
    let mut cmd = Command::new("foldseek");
    cmd.arg("createdb")
        .arg(pdb_dir)
        .arg(db)
        .arg("--threads")
        .arg(threads.to_string());
    run_tool("foldseek", &mut cmd).map(|_| ())
}

/// Search a prebuilt query DB against the target DB.
///
/// # Errors
/// Returns a [`ToolFailure`] on non-zero exit.
pub fn search(
    query_db: &Path,
    target_db: &Path,
    result_db: &Path,
    tmp_dir: &Path,
    threads: usize,
    evalue: f64,
    max_seqs: u32,
) -> Result<(), ToolFailure> {
    let mut cmd = Command::new("foldseek");
    cmd.arg("search")
        .arg(query_db)
        .arg(target_db)
        .arg(result_db)
        .arg(tmp_dir)
        .arg("--threads")
        .arg(threads.to_string())
        .arg("-e")
        .arg(format!("{evalue}"))
        .arg("--max-seqs")
        .arg(max_seqs.to_string())
        .arg("-a");
    run_tool("foldseek", &mut cmd).map(|_| ())
}

/// Convert a result DB to the BLAST-tab text format.
///
/// # Errors
/// Returns a [`ToolFailure`] on non-zero exit.
pub fn convertalis(
    query_db: &Path,
    target_db: &Path,
    result_db: &Path,
    output: &Path,
) -> Result<(), ToolFailure> {
    let mut cmd = Command::new("foldseek");
    cmd.arg("convertalis")
        .arg(query_db)
        .arg(target_db)
        .arg(result_db)
        .arg(output);
    run_tool("foldseek", &mut cmd).map(|_| ())
}

/// Parse a BLAST-tab hits file (12 columns: query, target, fident, alnlen,
/// mismatch, gapopen, qstart, qend, tstart, tend, evalue, bits).
///
/// # Errors
/// Returns an error only if the file cannot be read; malformed lines are
/// skipped with a warning.
pub fn parse_hits(path: &Path) -> Result<Vec<FoldseekHit>> {
    let file = File::open(path)
        .with_context(|| format!("opening Foldseek hits {}", path.display()))?;
    let mut hits = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 11 {
            if !line.trim().is_empty() {
                warn!(file = %path.display(), line = lineno + 1, "short Foldseek line skipped");
            }
            continue;
        }
        let uid = words[1].split('.').next().unwrap_or(words[1]).to_owned();
        let (Ok(query_start), Ok(query_end), Ok(evalue)) = (
            words[6].parse::<i32>(),
            words[7].parse::<i32>(),
            words[10].parse::<f64>(),
        ) else {
            warn!(file = %path.display(), line = lineno + 1, "malformed Foldseek line skipped");
            continue;
        };
        hits.push(FoldseekHit {
            uid,
            evalue,
            query_start,
            query_end,
        });
    }
    debug!(hits = hits.len(), file = %path.display(), "parsed Foldseek hits");
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_blast_tab_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("q.foldseek");
        std::fs::write(
            &path,
            "AF-P1\t000000003.pdb\t0.5\t100\t10\t2\t5\t104\t1\t100\t1.5e-20\t300\n\
             AF-P1\t000000007.pdb\t0.4\t80\t20\t3\t10\t89\t2\t81\t2.0e-10\t200\n\
             broken line\n",
        )
        .unwrap();
        let hits = parse_hits(&path).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].uid, "000000003");
        assert_eq!(hits[0].query_start, 5);
        assert_eq!(hits[0].query_end, 104);
        assert!((hits[1].evalue - 2.0e-10).abs() < 1e-24);
    }
}
