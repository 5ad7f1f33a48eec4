// crates/dpam-steps/src/hits.rs

//! Row types for the intermediate files several stages share.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// `sequence` row of a `.goodDomains` file.
///
/// Columns: marker, prefix, hitname, key, H-group, probability, coverage,
/// template length, query range, template range, filtered query range.
#[derive(Clone, Debug)]
pub struct GoodSequenceHit {
    pub hitname: String,
    pub key: String,
    pub hgroup: String,
    pub probability: f64,
    pub coverage: f64,
    pub template_len: u32,
    pub query_range: String,
    pub template_range: String,
    pub filtered_range: String,
}

/// `structure` row of a `.goodDomains` file.
///
/// Columns: marker, sequence-support level, prefix, z-norm, then the ten
/// stage-9 structure columns, query range, filtered query range.
#[derive(Clone, Debug)]
pub struct GoodStructureHit {
    pub seq_support: String,
    pub znorm: f64,
    pub hitname: String,
    pub key: String,
    pub hgroup: String,
    pub zscore: f64,
    pub qscore: f64,
    pub ztile: f64,
    pub qtile: f64,
    pub rank: f64,
    pub best_prob: f64,
    pub best_cov: f64,
    pub query_range: String,
    pub filtered_range: String,
}

/// Parsed `.goodDomains` file. A missing file reads as empty (stage 10
/// emits nothing when no hit passes its filters).
#[derive(Clone, Debug, Default)]
pub struct GoodDomains {
    pub sequence: Vec<GoodSequenceHit>,
    pub structure: Vec<GoodStructureHit>,
}

impl GoodDomains {
    /// Read a `.goodDomains` file, skipping malformed rows with a warning.
    ///
    /// # Errors
    /// Returns an error only when an existing file cannot be read.
    pub fn read(path: &Path) -> Result<Self> {
        let mut out = Self::default();
        if !path.exists() {
            return Ok(out);
        }
        let file = File::open(path)
            .with_context(|| format!("opening good domains {}", path.display()))?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.first().copied() {
                Some("sequence") if words.len() >= 11 => {
                    let parsed = (|| -> Option<GoodSequenceHit> {
                        Some(GoodSequenceHit {
                            hitname: words[2].to_owned(),
                            key: words[3].to_owned(),
                            hgroup: words[4].to_owned(),
                            probability: words[5].parse().ok()?,
                            coverage: words[6].parse().ok()?,
                            template_len: words[7].parse().ok()?,
                            query_range: words[8].to_owned(),
                            template_range: words[9].to_owned(),
                            filtered_range: words[10].to_owned(),
                        })
                    })();
                    match parsed {
                        Some(hit) => out.sequence.push(hit),
                        None => warn!(file = %path.display(), "malformed sequence row skipped"),
                    }
                }
                Some("structure") if words.len() >= 16 => {
                    let parsed = (|| -> Option<GoodStructureHit> {
                        Some(GoodStructureHit {
                            seq_support: words[1].to_owned(),
                            znorm: words[3].parse().ok()?,
                            hitname: words[4].to_owned(),
                            key: words[5].to_owned(),
                            hgroup: words[6].to_owned(),
                            zscore: words[7].parse().ok()?,
                            qscore: words[8].parse().ok()?,
                            ztile: words[9].parse().ok()?,
                            qtile: words[10].parse().ok()?,
                            rank: words[11].parse().ok()?,
                            best_prob: words[12].parse().ok()?,
                            best_cov: words[13].parse().ok()?,
                            query_range: words[14].to_owned(),
                            filtered_range: words[15].to_owned(),
                        })
                    })();
                    match parsed {
                        Some(hit) => out.structure.push(hit),
                        None => warn!(file = %path.display(), "malformed structure row skipped"),
                    }
                }
                Some(_) => warn!(file = %path.display(), "unrecognised good-domains row skipped"),
                None => {}
            }
        }
        Ok(out)
    }
}

/// Analysed DALI hit from a `_good_hits` file (stage-8 output).
#[derive(Clone, Debug)]
pub struct AnalyzedDaliHit {
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

/// Read a `_good_hits` file. Missing file reads as empty.
///
/// # Errors
/// Returns an error only when an existing file cannot be read.
pub fn read_good_hits(path: &Path) -> Result<Vec<AnalyzedDaliHit>> {
    let mut hits = Vec::new();
    if !path.exists() {
        return Ok(hits);
    }
    let file =
        File::open(path).with_context(|| format!("opening DALI hits {}", path.display()))?;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if lineno == 0 || line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 11 {
            warn!(file = %path.display(), line = lineno + 1, "short DALI hit row skipped");
            continue;
        }
        let parsed = (|| -> Option<AnalyzedDaliHit> {
            Some(AnalyzedDaliHit {
                hitname: words[0].to_owned(),
                uid: words[1].to_owned(),
                key: words[2].to_owned(),
                hgroup: words[3].to_owned(),
                zscore: words[4].parse().ok()?,
                qscore: words[5].parse().ok()?,
                ztile: words[6].parse().ok()?,
                qtile: words[7].parse().ok()?,
                rank: words[8].parse().ok()?,
                query_range: words[9].to_owned(),
                template_range: words[10].to_owned(),
            })
        })();
        match parsed {
            Some(hit) => hits.push(hit),
            None => warn!(file = %path.display(), line = lineno + 1, "malformed DALI hit row skipped"),
        }
    }
    Ok(hits)
}

/// Read a domains file (`D1<TAB>range` rows, `#` comments). Missing file
/// reads as empty.
///
/// # Errors
/// Returns an error only when an existing file cannot be read.
pub fn read_domains_file(path: &Path) -> Result<Vec<(String, String)>> {
    let mut domains = Vec::new();
    if !path.exists() {
        return Ok(domains);
    }
    let file =
        File::open(path).with_context(|| format!("opening domains {}", path.display()))?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.starts_with('#') {
            continue;
        }
        let mut words = line.trim_end().split('\t');
        if let (Some(id), Some(range)) = (words.next(), words.next()) {
            domains.push((id.to_owned(), range.to_owned()));
        }
    }
    Ok(domains)
}

/// One row of a `.sse` file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseRow {
    pub resid: i32,
    pub aa: char,
    pub sse_id: Option<u32>,
    pub sse_type: char,
}

/// Read a `.sse` file.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub fn read_sse_file(path: &Path) -> Result<Vec<SseRow>> {
    let file =
        File::open(path).with_context(|| format!("opening SSE file {}", path.display()))?;
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 4 {
            continue;
        }
        let Ok(resid) = words[0].parse::<i32>() else {
            continue;
        };
        let sse_id = if words[2] == "na" {
            None
        } else {
            words[2].parse::<u32>().ok()
        };
        rows.push(SseRow {
            resid,
            aa: words[1].chars().next().unwrap_or('X'),
            sse_id,
            sse_type: words[3].chars().next().unwrap_or('C'),
        });
    }
    Ok(rows)
}
