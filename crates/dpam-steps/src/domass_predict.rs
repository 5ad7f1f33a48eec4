// crates/dpam-steps/src/domass_predict.rs

//! Stage 16: run the DOMASS classifier.
//!
//! Feeds the 13 numeric feature columns of every stage-15 row through the
//! frozen network and writes the class-1 probability next to the features.
//! The batch orchestrator passes a pre-loaded model so the checkpoint is
//! read once per batch; single-protein runs load it here. A missing
//! checkpoint is fatal; the pipeline cannot reach stages 17–24 without
//! predictions.

use crate::StepContext;
use anyhow::{Context, Result};
use dpam_domass::{DomassModel, FEATURE_COUNT};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::{info, warn};

const HEADER: &str = "Domain\tRange\tTgroup\tECOD_ref\tDPAM_prob\t\
                      HH_prob\tHH_cov\tHH_rank\t\
                      DALI_zscore\tDALI_qscore\tDALI_ztile\tDALI_qtile\tDALI_rank\t\
                      Consensus_diff\tConsensus_cov\t\
                      HH_hit\tDALI_hit\tDALI_rot1\tDALI_rot2\tDALI_rot3\tDALI_trans\n";

/// Run stage 16 with an optionally pre-loaded model.
///
/// # Errors
/// Returns an error when the checkpoint is missing (and no model was
/// passed) or the feature table is unreadable.
pub fn run(ctx: &StepContext<'_>, model: Option<&DomassModel>) -> Result<()> {
    let features_file = ctx.stage_file(15, ".step15_features")?;
    let output = ctx.stage_file(16, ".step16_predictions")?;
    if !features_file.exists() {
        info!(prefix = ctx.prefix, "no feature table; writing empty predictions");
        fs::write(&output, HEADER)?;
        return Ok(());
    }

    let mut metadata: Vec<Vec<String>> = Vec::new();
    let mut features: Vec<[f32; FEATURE_COUNT]> = Vec::new();
    let text = fs::read_to_string(&features_file)
        .with_context(|| format!("reading features {}", features_file.display()))?;
    for (lineno, line) in text.lines().enumerate() {
        if lineno == 0 {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 23 {
            if !line.trim().is_empty() {
                warn!(prefix = ctx.prefix, line = lineno + 1, "short feature row skipped");
            }
            continue;
        }
        let mut row = [0.0f32; FEATURE_COUNT];
        let mut ok = true;
        for (slot, part) in row.iter_mut().zip(&parts[4..17]) {
            match part.parse::<f32>() {
                Ok(value) => *slot = value,
                Err(_) => {
                    ok = false;
                    break;
                }
            }
        }
        if !ok {
            warn!(prefix = ctx.prefix, line = lineno + 1, "malformed feature row skipped");
            continue;
        }
        metadata.push(
            [0, 1, 2, 3, 17, 18, 19, 20, 21, 22]
                .iter()
                .map(|&index| parts[index].to_owned())
                .collect(),
        );
        features.push(row);
    }

    if features.is_empty() {
        info!(prefix = ctx.prefix, "no feature rows; writing empty predictions");
        fs::write(&output, HEADER)?;
        return Ok(());
    }

    let loaded;
    let model = match model {
        Some(model) => model,
        None => {
            loaded = DomassModel::load(&ctx.data_dir.join("domass_epo29"))?;
            &loaded
        }
    };
    let predictions = model.predict(&features);
    info!(prefix = ctx.prefix, rows = predictions.len(), "classifier predictions computed");

    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    out.write_all(HEADER.as_bytes())?;
    for ((meta, row), prob) in metadata.iter().zip(&features).zip(&predictions) {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{prob:.4}\t{:.3}\t{:.3}\t{:.2}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t\
             {:.2}\t{:.2}\t{:.3}\t{}\t{}\t{}\t{}\t{}\t{}",
            meta[0],
            meta[1],
            meta[2],
            meta[3],
            row[3],
            row[4],
            row[5],
            row[6],
            row[7],
            row[8],
            row[9],
            row[10],
            row[11],
            row[12],
            meta[4],
            meta[5],
            meta[6],
            meta[7],
            meta[8],
            meta[9]
        )?;
    }
    out.flush()?;
    Ok(())
}
