// crates/dpam-refdata/src/lib.rs

//! Read-only ECOD reference store.
//!
//! Four dense tables are loaded eagerly at construction:
//! - `ECOD_length`; `uid  key  length` (the key is column 1, not 0);
//! - `ECOD_norms`; `uid  norm` (DALI z-score normaliser);
//! - `ECOD_pdbmap`; `uid  pdb_id  chain:range[,chain:range…]`, keeping only
//!   entries whose segments all share one chain;
//! - `ecod.latest.domains`; uid, key, and the hierarchical address whose
//!   first two dot levels form the H-group.
//!
//! Two sparse per-uid tables load lazily and are cached by uid:
//! `posi_weights/{uid}.weight` (position weights) and
//! `ecod_internal/{uid}.info` (historical z/q score distributions). A uid
//! absent from either is remembered as absent; callers fall back to uniform
//! weights and "no data" percentiles.
//!
//! The store is immutable for the lifetime of a run and safe to share.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Single-chain ECOD template entry from `ECOD_pdbmap`.
#[derive(Clone, Debug)]
pub struct PdbChainEntry {
    pub uid: String,
    pub chain_id: String,
    /// Template PDB residues in file order; position `i` (0-based) is ECOD
    /// position `i + 1`.
    pub residues: Vec<i32>,
}

/// In-memory ECOD reference tables.
#[derive(Debug)]
pub struct ReferenceData {
    data_dir: PathBuf,
    /// uid -> (key, template length)
    pub lengths: HashMap<String, (String, u32)>,
    /// uid -> DALI z-score normaliser
    pub norms: HashMap<String, f64>,
    /// `PDBID_CHAIN` -> template entry
    pub pdbmap: HashMap<String, PdbChainEntry>,
    /// uid -> (key, H-group)
    pub metadata: HashMap<String, (String, String)>,
    /// key -> uid (reverse of `lengths`)
    pub key_to_uid: HashMap<String, String>,
    weights: Mutex<HashMap<String, Option<Arc<HashMap<i32, f64>>>>>,
    historical: Mutex<HashMap<String, Option<Arc<HistoricalScores>>>>,
}

/// Historical DALI score distributions for one template.
#[derive(Clone, Debug, Default)]
pub struct HistoricalScores {
    pub zscores: Vec<f64>,
    pub qscores: Vec<f64>,
}

impl ReferenceData {
    /// Load the four dense tables from `data_dir`.
    ///
    /// # Errors
    /// Returns an error if any dense table is missing or unreadable.
    pub fn load(data_dir: &Path) -> Result<Self> {
        info!(dir = %data_dir.display(), "loading ECOD reference data");
        let lengths = load_lengths(&data_dir.join("ECOD_length"))?;
        let norms = load_norms(&data_dir.join("ECOD_norms"))?;
        let pdbmap = load_pdbmap(&data_dir.join("ECOD_pdbmap"))?;
        let metadata = load_metadata(&data_dir.join("ecod.latest.domains"))?;
        let key_to_uid = lengths
            .iter()
            .map(|(uid, (key, _))| (key.clone(), uid.clone()))
            .collect();
        info!(
            lengths = lengths.len(),
            norms = norms.len(),
            pdb_chains = pdbmap.len(),
            metadata = metadata.len(),
            "reference data loaded"
        );
        Ok(Self {
            data_dir: data_dir.to_owned(),
            lengths,
            norms,
            pdbmap,
            metadata,
            key_to_uid,
            weights: Mutex::new(HashMap::new()),
            historical: Mutex::new(HashMap::new()),
        })
    }

    /// Reference data directory this store reads from.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Position weights for a template, cached by uid. `None` when the uid
    /// has no weight file; callers then use uniform weights of 1.0.
    #[must_use]
    pub fn position_weights(&self, uid: &str) -> Option<Arc<HashMap<i32, f64>>> {
        if let Ok(mut cache) = self.weights.lock() {
            if let Some(entry) = cache.get(uid) {
                return entry.clone();
            }
            let loaded = load_weights(&self.data_dir.join("posi_weights").join(format!("{uid}.weight")));
            cache.insert(uid.to_owned(), loaded.clone());
            loaded
        } else {
            None
        }
    }

    /// Weighted-coverage helper: weights plus total weight for a template,
    /// falling back to uniform weights over `1..=length` when no file
    /// exists.
    #[must_use]
    pub fn weights_or_uniform(&self, uid: &str, length: u32) -> (Arc<HashMap<i32, f64>>, f64) {
        if let Some(weights) = self.position_weights(uid) {
            let total: f64 = weights.values().sum();
            (weights, total)
        } else {
            let uniform: HashMap<i32, f64> =
                (1..=length as i32).map(|resid| (resid, 1.0)).collect();
            (Arc::new(uniform), f64::from(length))
        }
    }

    /// Historical z/q distributions for a template, cached by uid. `None`
    /// when absent; callers then report the -1.0 "no data" sentinel.
    #[must_use]
    pub fn historical_scores(&self, uid: &str) -> Option<Arc<HistoricalScores>> {
        if let Ok(mut cache) = self.historical.lock() {
            if let Some(entry) = cache.get(uid) {
                return entry.clone();
            }
            let loaded =
                load_historical(&self.data_dir.join("ecod_internal").join(format!("{uid}.info")));
            cache.insert(uid.to_owned(), loaded.clone());
            loaded
        } else {
            None
        }
    }
}

fn load_lengths(path: &Path) -> Result<HashMap<String, (String, u32)>> {
    debug!(file = %path.display(), "loading ECOD lengths");
    let mut lengths = HashMap::new();
    for line in read_lines(path)? {
        let line = line?;
        let mut words = line.split_whitespace();
        let (Some(uid), Some(key), Some(len)) = (words.next(), words.next(), words.next()) else {
            continue;
        };
        let Ok(length) = len.parse::<u32>() else {
            continue;
        };
        lengths.insert(uid.to_owned(), (key.to_owned(), length));
    }
    Ok(lengths)
}

fn load_norms(path: &Path) -> Result<HashMap<String, f64>> {
    debug!(file = %path.display(), "loading ECOD norms");
    let mut norms = HashMap::new();
    for line in read_lines(path)? {
        let line = line?;
        let mut words = line.split_whitespace();
        let (Some(uid), Some(norm)) = (words.next(), words.next()) else {
            continue;
        };
        let Ok(value) = norm.parse::<f64>() else {
            continue;
        };
        norms.insert(uid.to_owned(), value);
    }
    Ok(norms)
}

fn load_pdbmap(path: &Path) -> Result<HashMap<String, PdbChainEntry>> {
    debug!(file = %path.display(), "loading ECOD pdbmap");
    let mut map = HashMap::new();
    for line in read_lines(path)? {
        let line = line?;
        let mut words = line.split_whitespace();
        let (Some(uid), Some(pdb_id), Some(segments)) = (words.next(), words.next(), words.next())
        else {
            continue;
        };
        let mut chain_ids: BTreeSet<&str> = BTreeSet::new();
        let mut residues: Vec<i32> = Vec::new();
        let mut malformed = false;
        for segment in segments.split(',') {
            let Some((chain, range)) = segment.split_once(':') else {
                malformed = true;
                break;
            };
            chain_ids.insert(chain);
            let parsed = if let Some((lo, hi)) = range.split_once('-') {
                match (lo.parse::<i32>(), hi.parse::<i32>()) {
                    (Ok(lo), Ok(hi)) if lo <= hi => {
                        residues.extend(lo..=hi);
                        true
                    }
                    _ => false,
                }
            } else {
                match range.parse::<i32>() {
                    Ok(res) => {
                        residues.push(res);
                        true
                    }
                    Err(_) => false,
                }
            };
            if !parsed {
                malformed = true;
                break;
            }
        }
        if malformed || chain_ids.len() != 1 {
            continue;
        }
        let chain_id = chain_ids
            .iter()
            .next()
            .map(|&c| c.to_owned())
            .unwrap_or_default();
        let pdb_chain = format!("{}_{}", pdb_id.to_ascii_uppercase(), chain_id);
        map.insert(
            pdb_chain,
            PdbChainEntry {
                uid: uid.to_owned(),
                chain_id,
                residues,
            },
        );
    }
    Ok(map)
}

fn load_metadata(path: &Path) -> Result<HashMap<String, (String, String)>> {
    debug!(file = %path.display(), "loading ECOD hierarchy");
    let mut metadata = HashMap::new();
    for line in read_lines(path)? {
        let line = line?;
        if line.starts_with('#') {
            continue;
        }
        let words: Vec<&str> = line.trim_end_matches('\n').split('\t').collect();
        if words.len() < 4 {
            continue;
        }
        let hgroup = words[3].split('.').take(2).collect::<Vec<_>>().join(".");
        metadata.insert(words[0].to_owned(), (words[1].to_owned(), hgroup));
    }
    Ok(metadata)
}

fn load_weights(path: &Path) -> Option<Arc<HashMap<i32, f64>>> {
    let lines = read_lines(path).ok()?;
    let mut weights = HashMap::new();
    for line in lines {
        let Ok(line) = line else { continue };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 4 {
            continue;
        }
        let (Ok(resid), Ok(weight)) = (words[0].parse::<i32>(), words[3].parse::<f64>()) else {
            continue;
        };
        weights.insert(resid, weight);
    }
    Some(Arc::new(weights))
}

fn load_historical(path: &Path) -> Option<Arc<HistoricalScores>> {
    let lines = read_lines(path).ok()?;
    let mut scores = HistoricalScores::default();
    for line in lines {
        let Ok(line) = line else { continue };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() < 3 {
            continue;
        }
        let (Ok(z), Ok(q)) = (words[1].parse::<f64>(), words[2].parse::<f64>()) else {
            continue;
        };
        scores.zscores.push(z);
        scores.qscores.push(q);
    }
    Some(Arc::new(scores))
}

fn read_lines(path: &Path) -> Result<std::io::Lines<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(BufReader::new(file).lines())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn seed(dir: &Path) {
        fs::write(dir.join("ECOD_length"), "000000003 e2rspA1 124\n000000007 e1abcA1 85\n")
            .unwrap();
        fs::write(dir.join("ECOD_norms"), "000000003 27.3\n").unwrap();
        fs::write(
            dir.join("ECOD_pdbmap"),
            "000000003 2rsp A:1-3,A:10\n000000007 1abc A:1-2,B:3-4\n",
        )
        .unwrap();
        fs::write(
            dir.join("ecod.latest.domains"),
            "#header\n000000003\te2rspA1\tF\t1.1.2.3\textra\n",
        )
        .unwrap();
    }

    #[test]
    fn dense_tables_load() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path());
        let data = ReferenceData::load(tmp.path()).unwrap();
        assert_eq!(data.lengths["000000003"], ("e2rspA1".to_owned(), 124));
        assert_eq!(data.norms["000000003"], 27.3);
        assert_eq!(data.key_to_uid["e2rspA1"], "000000003");
        // H-group is the first two dot levels.
        assert_eq!(data.metadata["000000003"].1, "1.1");
    }

    #[test]
    fn multi_chain_pdbmap_entries_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path());
        let data = ReferenceData::load(tmp.path()).unwrap();
        let entry = &data.pdbmap["2RSP_A"];
        assert_eq!(entry.uid, "000000003");
        assert_eq!(entry.residues, vec![1, 2, 3, 10]);
        assert!(!data.pdbmap.contains_key("1ABC_A"));
    }

    #[test]
    fn lazy_tables_cache_absence() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path());
        let data = ReferenceData::load(tmp.path()).unwrap();
        assert!(data.position_weights("000000003").is_none());
        assert!(data.historical_scores("000000003").is_none());
        let (weights, total) = data.weights_or_uniform("000000003", 4);
        assert_eq!(weights.len(), 4);
        assert_eq!(total, 4.0);
    }

    #[test]
    fn lazy_tables_load_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path());
        fs::create_dir(tmp.path().join("posi_weights")).unwrap();
        fs::write(
            tmp.path().join("posi_weights/000000003.weight"),
            "1 x y 0.5\n2 x y 1.5\n",
        )
        .unwrap();
        fs::create_dir(tmp.path().join("ecod_internal")).unwrap();
        fs::write(
            tmp.path().join("ecod_internal/000000003.info"),
            "a 30.0 0.8\nb 10.0 0.4\n",
        )
        .unwrap();
        let data = ReferenceData::load(tmp.path()).unwrap();
        let (weights, total) = data.weights_or_uniform("000000003", 124);
        assert_eq!(weights.len(), 2);
        assert!((total - 2.0).abs() < 1e-12);
        let hist = data.historical_scores("000000003").unwrap();
        assert_eq!(hist.zscores, vec![30.0, 10.0]);
        assert_eq!(hist.qscores, vec![0.8, 0.4]);
    }
}
