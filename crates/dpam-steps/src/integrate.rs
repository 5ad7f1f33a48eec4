// crates/dpam-steps/src/integrate.rs

//! Stage 24: SSE refinement and final integration.
//!
//! Kept helices (≥6 residues) and strands (≥3) are counted per final
//! entity from the stage-11 assignment; the full/part/miss classification
//! refines into the final quality label, entities are sorted by ascending
//! mean residue and renumbered `nD1…nDn`, and `finalDPAM.domains` is
//! rewritten at the root and under `results/`.

use crate::hits::{self, SseRow};
use crate::{domass_features, StepContext};
use anyhow::{bail, Context, Result};
use dpam_core::range::{mean_residue, parse_range};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::{info, warn};

const TABLE_HEADER: &str = "Domain\tRange\tECOD_num\tECOD_key\tT-group\tDPAM_prob\t\
                            HH_prob\tDALI_zscore\tHit_cov\tTgroup_cov\tJudge\tHcount\tScount\n";

/// Refine a classification with the entity's SSE count and hit quality.
#[must_use]
pub fn refine_label(
    classification: &str,
    sse_count: u32,
    hh_prob: f64,
    weighted_ratio: f64,
    length_ratio: f64,
) -> &'static str {
    let high_quality = hh_prob >= 0.95 && weighted_ratio >= 0.8 && length_ratio >= 0.8;
    match classification {
        "miss" => {
            if sse_count < 3 {
                "simple_topology"
            } else {
                "low_confidence"
            }
        }
        "part" => {
            if sse_count >= 3 || high_quality {
                "partial_domain"
            } else {
                "simple_topology"
            }
        }
        "full" => {
            if sse_count >= 3 || high_quality {
                "good_domain"
            } else {
                "simple_topology"
            }
        }
        other => {
            warn!(classification = other, "unknown classification");
            "low_confidence"
        }
    }
}

struct FinalEntity {
    mean: f64,
    range: String,
    uid: String,
    key: String,
    tgroup: String,
    dpam_prob: f64,
    hh_prob: f64,
    dali_zscore: f64,
    weighted_ratio: f64,
    length_ratio: f64,
    label: &'static str,
    helix_count: u32,
    strand_count: u32,
}

/// Run stage 24.
///
/// # Errors
/// Returns an error when the SSE assignment is missing; an absent
/// prediction table yields empty final outputs.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let predictions_file = ctx.stage_file(23, ".step23_predictions")?;
    let sse_file = ctx.stage_file(11, ".sse")?;
    if !sse_file.exists() {
        bail!("SSE assignment not found: {}", sse_file.display());
    }
    let sse_rows: Vec<SseRow> = hits::read_sse_file(&sse_file)?;

    let mut entities: Vec<FinalEntity> = Vec::new();
    if predictions_file.exists() {
        for line in fs::read_to_string(&predictions_file)?.lines() {
            if line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 11 {
                continue;
            }
            let classification = parts[0];
            let range = parts[2];
            let key = parts[3];
            let tgroup = parts[4];
            let dpam_prob = parts[5].parse::<f64>().unwrap_or(0.0);
            let hh_prob = parse_or_zero(parts[6]);
            let dali_zscore = parse_or_zero(parts[7]);
            let weighted_ratio = parse_or_zero(parts[8]);
            let length_ratio = parse_or_zero(parts[9]);

            let residues = parse_range(range)?;
            if residues.is_empty() {
                continue;
            }
            let (helix_count, strand_count) = domass_features::count_sses(&residues, &sse_rows);
            let label = refine_label(
                classification,
                helix_count + strand_count,
                hh_prob,
                weighted_ratio,
                length_ratio,
            );
            let uid = ctx
                .refdata
                .key_to_uid
                .get(key)
                .cloned()
                .unwrap_or_else(|| "na".to_owned());
            entities.push(FinalEntity {
                mean: mean_residue(&residues),
                range: range.to_owned(),
                uid,
                key: key.to_owned(),
                tgroup: tgroup.to_owned(),
                dpam_prob,
                hh_prob,
                dali_zscore,
                weighted_ratio,
                length_ratio,
                label,
                helix_count,
                strand_count,
            });
        }
    } else {
        info!(prefix = ctx.prefix, "no classifications; final outputs will be empty");
    }

    entities.sort_by(|a, b| a.mean.partial_cmp(&b.mean).unwrap_or(std::cmp::Ordering::Equal));

    // Per-protein table.
    let table = ctx
        .resolver
        .step_dir(24)?
        .join(format!("{}_domains", ctx.prefix));
    let mut out = BufWriter::new(
        File::create(&table).with_context(|| format!("creating {}", table.display()))?,
    );
    out.write_all(TABLE_HEADER.as_bytes())?;
    for (index, entity) in entities.iter().enumerate() {
        writeln!(
            out,
            "nD{}\t{}\t{}\t{}\t{}\t{:.3}\t{:.1}\t{:.1}\t{:.3}\t{:.3}\t{}\t{}\t{}",
            index + 1,
            entity.range,
            entity.uid,
            entity.key,
            entity.tgroup,
            entity.dpam_prob,
            entity.hh_prob,
            entity.dali_zscore,
            entity.weighted_ratio,
            entity.length_ratio,
            entity.label,
            entity.helix_count,
            entity.strand_count
        )?;
    }
    out.flush()?;

    // Final domain list, at the root and under results/.
    let mut body = String::new();
    for (index, entity) in entities.iter().enumerate() {
        body.push_str(&format!("nD{}\t{}\n", index + 1, entity.range));
    }
    let root_file = ctx.root_file(".finalDPAM.domains");
    let results_file = ctx
        .resolver
        .results_dir()?
        .join(format!("{}.finalDPAM.domains", ctx.prefix));
    fs::write(&root_file, &body)
        .with_context(|| format!("writing {}", root_file.display()))?;
    fs::write(&results_file, &body)
        .with_context(|| format!("writing {}", results_file.display()))?;

    info!(prefix = ctx.prefix, entities = entities.len(), "final domains integrated");
    Ok(())
}

fn parse_or_zero(field: &str) -> f64 {
    if field == "na" {
        0.0
    } else {
        field.parse().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refinement_table() {
        assert_eq!(refine_label("full", 3, 0.0, 0.0, 0.0), "good_domain");
        assert_eq!(refine_label("full", 2, 0.99, 0.9, 0.9), "good_domain");
        assert_eq!(refine_label("full", 2, 0.5, 0.9, 0.9), "simple_topology");
        assert_eq!(refine_label("part", 4, 0.0, 0.0, 0.0), "partial_domain");
        assert_eq!(refine_label("part", 1, 0.99, 0.9, 0.9), "partial_domain");
        assert_eq!(refine_label("part", 1, 0.5, 0.2, 0.2), "simple_topology");
        assert_eq!(refine_label("miss", 5, 0.0, 0.0, 0.0), "low_confidence");
        assert_eq!(refine_label("miss", 2, 0.99, 0.9, 0.9), "simple_topology");
    }
}
