// crates/dpam-domass/src/lib.rs

//! The DOMASS classifier: a frozen two-layer network scoring
//! `(domain, ECOD template)` feature rows.
//!
//! Architecture: 13 inputs → dense(64, ReLU) → dense(2) → softmax; the
//! reported value is the class-1 probability. Inference runs in batches of
//! 100 rows; an input shorter than one batch is tiled up to the batch size
//! and the result sliced back; preserved because the frozen graph has a
//! fixed batch dimension and downstream fixtures were produced this way.
//!
//! The checkpoint ships as `domass_epo29.{meta,index,data-00000-of-00001}`.
//! Only the data shard is decoded: the bundle writes its variables in
//! lexicographic key order (`dense/bias`, `dense/kernel`, `dense_1/bias`,
//! `dense_1/kernel`) as row-major little-endian f32, which pins the shard
//! to exactly 1026 floats. The `.meta`/`.index` files must exist but are
//! not parsed.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Number of input features per row.
pub const FEATURE_COUNT: usize = 13;
/// Hidden layer width.
pub const HIDDEN: usize = 64;
/// Output classes.
pub const CLASSES: usize = 2;
/// Fixed inference batch size.
pub const BATCH_SIZE: usize = 100;

const TOTAL_FLOATS: usize = HIDDEN + FEATURE_COUNT * HIDDEN + CLASSES + HIDDEN * CLASSES;

/// Loaded DOMASS weights. Loading opens no native session; the model is a
/// plain matrix-vector computation; but the batch orchestrator still keeps
/// one instance alive across proteins to avoid re-reading the checkpoint.
#[derive(Clone, Debug)]
pub struct DomassModel {
    /// dense/kernel, row-major `[FEATURE_COUNT][HIDDEN]`.
    w1: Vec<f32>,
    /// dense/bias, `[HIDDEN]`.
    b1: Vec<f32>,
    /// dense_1/kernel, row-major `[HIDDEN][CLASSES]`.
    w2: Vec<f32>,
    /// dense_1/bias, `[CLASSES]`.
    b2: Vec<f32>,
}

impl DomassModel {
    /// Load the checkpoint given its stem (e.g. `…/domass_epo29`).
    ///
    /// # Errors
    /// Returns an error if any checkpoint file is missing or the data shard
    /// does not hold exactly the expected variables.
    pub fn load(stem: &Path) -> Result<Self> {
        let meta = sibling(stem, "meta");
        let index = sibling(stem, "index");
        if !meta.exists() || !index.exists() {
            bail!(
                "DOMASS checkpoint not found: expected {} and {}",
                meta.display(),
                index.display()
            );
        }
        let data = sibling(stem, "data-00000-of-00001");
        let bytes = fs::read(&data)
            .with_context(|| format!("reading checkpoint shard {}", data.display()))?;
        if bytes.len() != TOTAL_FLOATS * 4 {
            bail!(
                "checkpoint shard {} holds {} bytes, expected {}",
                data.display(),
                bytes.len(),
                TOTAL_FLOATS * 4
            );
        }
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        // Variables in lexicographic key order.
        let mut cursor = 0usize;
        let mut take = |n: usize| {
            let slice = floats[cursor..cursor + n].to_vec();
            cursor += n;
            slice
        };
        let b1 = take(HIDDEN);
        let w1 = take(FEATURE_COUNT * HIDDEN);
        let b2 = take(CLASSES);
        let w2 = take(HIDDEN * CLASSES);

        info!(checkpoint = %stem.display(), "loaded DOMASS model");
        Ok(Self { w1, b1, w2, b2 })
    }

    /// Build a model from raw weight slices (test and fixture support).
    ///
    /// # Errors
    /// Returns an error on shape mismatch.
    pub fn from_weights(w1: Vec<f32>, b1: Vec<f32>, w2: Vec<f32>, b2: Vec<f32>) -> Result<Self> {
        if w1.len() != FEATURE_COUNT * HIDDEN
            || b1.len() != HIDDEN
            || w2.len() != HIDDEN * CLASSES
            || b2.len() != CLASSES
        {
            bail!("DOMASS weight shapes do not match the frozen architecture");
        }
        Ok(Self { w1, b1, w2, b2 })
    }

    /// Class-1 probability for each feature row.
    ///
    /// Inputs shorter than one batch are tiled to [`BATCH_SIZE`], run, and
    /// sliced back; longer inputs run in full batches with the remainder
    /// padded from the front of the input.
    #[must_use]
    pub fn predict(&self, rows: &[[f32; FEATURE_COUNT]]) -> Vec<f32> {
        let n = rows.len();
        if n == 0 {
            return Vec::new();
        }
        let mut predictions = Vec::with_capacity(n);
        if n >= BATCH_SIZE {
            let full_batches = n / BATCH_SIZE;
            for batch in 0..full_batches {
                let window = &rows[batch * BATCH_SIZE..(batch + 1) * BATCH_SIZE];
                predictions.extend(self.forward_batch(window));
            }
            let remaining = n - full_batches * BATCH_SIZE;
            if remaining > 0 {
                let mut padded: Vec<[f32; FEATURE_COUNT]> =
                    rows[full_batches * BATCH_SIZE..].to_vec();
                padded.extend_from_slice(&rows[..BATCH_SIZE - remaining]);
                let scores = self.forward_batch(&padded);
                predictions.extend_from_slice(&scores[..remaining]);
            }
        } else {
            let mut tiled: Vec<[f32; FEATURE_COUNT]> = Vec::with_capacity(BATCH_SIZE);
            while tiled.len() < BATCH_SIZE {
                tiled.extend_from_slice(rows);
            }
            tiled.truncate(BATCH_SIZE);
            let scores = self.forward_batch(&tiled);
            predictions.extend_from_slice(&scores[..n]);
        }
        predictions
    }

    fn forward_batch(&self, batch: &[[f32; FEATURE_COUNT]]) -> Vec<f32> {
        batch.iter().map(|row| self.forward(row)).collect()
    }

    fn forward(&self, row: &[f32; FEATURE_COUNT]) -> f32 {
        let mut hidden = [0.0f32; HIDDEN];
        for (j, h) in hidden.iter_mut().enumerate() {
            let mut acc = self.b1[j];
            for (i, &x) in row.iter().enumerate() {
                acc += x * self.w1[i * HIDDEN + j];
            }
            *h = acc.max(0.0);
        }
        let mut logits = [0.0f32; CLASSES];
        for (k, logit) in logits.iter_mut().enumerate() {
            let mut acc = self.b2[k];
            for (j, &h) in hidden.iter().enumerate() {
                acc += h * self.w2[j * CLASSES + k];
            }
            *logit = acc;
        }
        softmax2(logits)[1]
    }
}

fn softmax2(logits: [f32; CLASSES]) -> [f32; CLASSES] {
    let max = logits[0].max(logits[1]);
    let e0 = (logits[0] - max).exp();
    let e1 = (logits[1] - max).exp();
    let sum = e0 + e1;
    [e0 / sum, e1 / sum]
}

/// `stem` + `.{ext}` keeping the full stem name (stems contain no dots a
/// plain `set_extension` would respect).
fn sibling(stem: &Path, ext: &str) -> std::path::PathBuf {
    let mut name = stem
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(ext);
    stem.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_ish_model() -> DomassModel {
        // First hidden unit copies feature 0, all logits from it.
        let mut w1 = vec![0.0f32; FEATURE_COUNT * HIDDEN];
        w1[0] = 1.0; // feature 0 → hidden 0
        let b1 = vec![0.0; HIDDEN];
        let mut w2 = vec![0.0f32; HIDDEN * CLASSES];
        w2[1] = 1.0; // hidden 0 → class 1 logit
        let b2 = vec![0.0; CLASSES];
        DomassModel::from_weights(w1, b1, w2, b2).unwrap()
    }

    #[test]
    fn forward_is_monotone_in_the_driving_feature() {
        let model = identity_ish_model();
        let low = model.predict(&[[0.0; FEATURE_COUNT]]);
        let mut strong = [0.0; FEATURE_COUNT];
        strong[0] = 5.0;
        let high = model.predict(&[strong]);
        assert!((low[0] - 0.5).abs() < 1e-6);
        assert!(high[0] > 0.99);
    }

    #[test]
    fn short_inputs_tile_and_slice_back() {
        let model = identity_ish_model();
        let mut a = [0.0; FEATURE_COUNT];
        a[0] = 1.0;
        let b = [0.0; FEATURE_COUNT];
        let preds = model.predict(&[a, b, a]);
        assert_eq!(preds.len(), 3);
        assert!((preds[0] - preds[2]).abs() < 1e-9);
        assert!(preds[0] > preds[1]);
    }

    #[test]
    fn long_inputs_cover_every_row() {
        let model = identity_ish_model();
        let rows: Vec<[f32; FEATURE_COUNT]> = (0..253)
            .map(|i| {
                let mut row = [0.0f32; FEATURE_COUNT];
                row[0] = (i % 7) as f32;
                row
            })
            .collect();
        let preds = model.predict(&rows);
        assert_eq!(preds.len(), 253);
        // Same feature value ⇒ same probability, batch boundaries or not.
        assert!((preds[0] - preds[7]).abs() < 1e-9);
        assert!((preds[99] - preds[8]).abs() < 1e-9); // 99 % 7 == 8 % 7
        assert!((preds[250] - preds[5]).abs() < 1e-9); // remainder batch
    }

    #[test]
    fn checkpoint_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let stem = tmp.path().join("domass_epo29");
        std::fs::write(sibling(&stem, "meta"), b"").unwrap();
        std::fs::write(sibling(&stem, "index"), b"").unwrap();

        let mut floats = Vec::with_capacity(TOTAL_FLOATS);
        floats.extend(std::iter::repeat(0.0f32).take(HIDDEN)); // dense/bias
        let mut w1 = vec![0.0f32; FEATURE_COUNT * HIDDEN];
        w1[0] = 1.0;
        floats.extend(&w1); // dense/kernel
        floats.extend([0.0f32, 0.0]); // dense_1/bias
        let mut w2 = vec![0.0f32; HIDDEN * CLASSES];
        w2[1] = 1.0;
        floats.extend(&w2); // dense_1/kernel
        let bytes: Vec<u8> = floats.iter().flat_map(|f| f.to_le_bytes()).collect();
        std::fs::write(sibling(&stem, "data-00000-of-00001"), bytes).unwrap();

        let model = DomassModel::load(&stem).unwrap();
        let mut strong = [0.0; FEATURE_COUNT];
        strong[0] = 5.0;
        assert!(model.predict(&[strong])[0] > 0.99);
    }

    #[test]
    fn missing_checkpoint_files_fail() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(DomassModel::load(&tmp.path().join("domass_epo29")).is_err());
    }
}
