// crates/dpam-core/src/pae.rs

//! Predicted-aligned-error matrix ingestion.
//!
//! Three JSON shapes are accepted, optionally wrapped in one outer
//! `[ ... ]` array:
//! - `{"predicted_aligned_error": [[f; N]; N]}`
//! - `{"pae": [[f; N]; N]}`
//! - `{"residue1": [i], "residue2": [i], "distance": [f]}` (sparse)
//!
//! A missing pair stays absent; it is never substituted with a default.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Square (possibly sparse) PAE lookup keyed by 1-based residue pairs.
#[derive(Clone, Debug, Default)]
pub struct PaeMatrix {
    entries: BTreeMap<i32, BTreeMap<i32, f64>>,
}

impl PaeMatrix {
    /// Load a PAE matrix from an AlphaFold JSON file.
    ///
    /// # Errors
    /// Returns an error for unreadable files or unrecognised shapes.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading PAE {}", path.display()))?;
        let trimmed = text.trim();
        let object: Value = match serde_json::from_str(trimmed)
            .with_context(|| format!("parsing PAE JSON {}", path.display()))?
        {
            Value::Array(mut items) if items.len() == 1 => items.remove(0),
            value => value,
        };

        let mut entries: BTreeMap<i32, BTreeMap<i32, f64>> = BTreeMap::new();
        if let Some(rows) = object
            .get("predicted_aligned_error")
            .or_else(|| object.get("pae"))
            .and_then(Value::as_array)
        {
            for (i, row) in rows.iter().enumerate() {
                let row = row
                    .as_array()
                    .with_context(|| format!("PAE row {i} is not an array"))?;
                let res1 = i as i32 + 1;
                let inner = entries.entry(res1).or_default();
                for (j, cell) in row.iter().enumerate() {
                    let value = cell
                        .as_f64()
                        .with_context(|| format!("PAE cell ({i},{j}) is not a number"))?;
                    inner.insert(j as i32 + 1, value);
                }
            }
        } else if object.get("distance").is_some() {
            let res1s = int_column(&object, "residue1")?;
            let res2s = int_column(&object, "residue2")?;
            let dists = float_column(&object, "distance")?;
            if res1s.len() != dists.len() || res2s.len() != dists.len() {
                bail!("sparse PAE columns have mismatched lengths");
            }
            for ((&r1, &r2), &d) in res1s.iter().zip(&res2s).zip(&dists) {
                entries.entry(r1).or_default().insert(r2, d);
            }
        } else {
            bail!("unrecognised PAE format in {}", path.display());
        }

        Ok(Self { entries })
    }

    /// PAE for an ordered residue pair, if present.
    #[must_use]
    pub fn get(&self, res1: i32, res2: i32) -> Option<f64> {
        self.entries.get(&res1).and_then(|row| row.get(&res2)).copied()
    }

    /// Largest residue index with any entry (sequence length for the dense
    /// shapes).
    #[must_use]
    pub fn max_residue(&self) -> i32 {
        let row_max = self.entries.keys().next_back().copied().unwrap_or(0);
        let col_max = self
            .entries
            .values()
            .filter_map(|row| row.keys().next_back())
            .copied()
            .max()
            .unwrap_or(0);
        row_max.max(col_max)
    }
}

fn int_column(object: &Value, key: &str) -> Result<Vec<i32>> {
    object
        .get(key)
        .and_then(Value::as_array)
        .with_context(|| format!("missing sparse PAE column {key:?}"))?
        .iter()
        .map(|v| {
            v.as_i64()
                .map(|n| n as i32)
                .with_context(|| format!("non-integer entry in {key:?}"))
        })
        .collect()
}

fn float_column(object: &Value, key: &str) -> Result<Vec<f64>> {
    object
        .get(key)
        .and_then(Value::as_array)
        .with_context(|| format!("missing sparse PAE column {key:?}"))?
        .iter()
        .map(|v| v.as_f64().with_context(|| format!("non-numeric entry in {key:?}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(tmp: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = tmp.path().join("pae.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn dense_v2_format() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(&tmp, r#"{"predicted_aligned_error": [[0.5, 3.0], [2.5, 0.5]]}"#);
        let pae = PaeMatrix::load(&path).unwrap();
        assert_eq!(pae.get(1, 2), Some(3.0));
        assert_eq!(pae.get(2, 1), Some(2.5));
        assert_eq!(pae.max_residue(), 2);
    }

    #[test]
    fn dense_v3_format_with_outer_array() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(&tmp, r#"[{"pae": [[0.5, 1.0], [1.0, 0.5]]}]"#);
        let pae = PaeMatrix::load(&path).unwrap();
        assert_eq!(pae.get(1, 2), Some(1.0));
    }

    #[test]
    fn sparse_format() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(
            &tmp,
            r#"{"residue1": [1, 4], "residue2": [4, 1], "distance": [7.5, 8.25]}"#,
        );
        let pae = PaeMatrix::load(&path).unwrap();
        assert_eq!(pae.get(1, 4), Some(7.5));
        assert_eq!(pae.get(4, 1), Some(8.25));
        assert_eq!(pae.get(1, 2), None);
        assert_eq!(pae.max_residue(), 4);
    }

    #[test]
    fn unknown_shape_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(&tmp, r#"{"plddt": [1.0]}"#);
        assert!(PaeMatrix::load(&path).is_err());
    }
}
