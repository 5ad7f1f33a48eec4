// crates/dpam-core/src/fasta.rs

//! Single-record FASTA I/O.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Read the first record of a FASTA file as `(id, sequence)`.
///
/// # Errors
/// Returns an error if the file cannot be read or holds no record.
pub fn read_fasta(path: &Path) -> Result<(String, String)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading FASTA {}", path.display()))?;
    let mut id = None;
    let mut sequence = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('>') {
            if id.is_some() {
                break;
            }
            id = Some(
                header
                    .split_whitespace()
                    .next()
                    .unwrap_or(header)
                    .to_owned(),
            );
        } else if id.is_some() {
            sequence.push_str(line);
        }
    }
    match id {
        Some(id) if !sequence.is_empty() => Ok((id, sequence)),
        _ => bail!("no FASTA record in {}", path.display()),
    }
}

/// Write a single FASTA record.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_fasta(path: &Path, id: &str, sequence: &str) -> Result<()> {
    let body = format!(">{id}\n{sequence}\n");
    fs::write(path, body).with_context(|| format!("writing FASTA {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("q.fa");
        write_fasta(&path, "AF-P1", "MKVL").unwrap();
        let (id, seq) = read_fasta(&path).unwrap();
        assert_eq!(id, "AF-P1");
        assert_eq!(seq, "MKVL");
    }

    #[test]
    fn multi_line_sequences_concatenate() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("q.fa");
        std::fs::write(&path, ">x desc\nMKV\nLAA\n").unwrap();
        let (id, seq) = read_fasta(&path).unwrap();
        assert_eq!(id, "x");
        assert_eq!(seq, "MKVLAA");
    }
}
