// crates/dpam-steps/src/confident.rs

//! Stage 17: filter confident predictions and label their quality.
//!
//! Per domain: rows at probability ≥ 0.60 survive. A surviving row's
//! quality follows from the T-groups whose best probability lies within
//! 0.05 of the domain's maximum; one such T-group is `good`, one H-group
//! across them is `ok`, anything else `bad`.

use crate::StepContext;
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::info;

const MIN_PROBABILITY: f64 = 0.60;
const SIMILARITY_WINDOW: f64 = 0.05;

const HEADER: &str = "# domain\tdomain_range\ttgroup\tecod_ref\tprob\tquality\n";

/// Quality label from the T-groups in the similarity window.
#[must_use]
pub fn quality_label(similar_tgroups: &BTreeSet<String>) -> &'static str {
    if similar_tgroups.len() == 1 {
        return "good";
    }
    let hgroups: BTreeSet<String> = similar_tgroups
        .iter()
        .map(|tgroup| tgroup.split('.').take(2).collect::<Vec<_>>().join("."))
        .collect();
    if hgroups.len() == 1 {
        "ok"
    } else {
        "bad"
    }
}

#[derive(Clone, Debug)]
struct Prediction {
    tgroup: String,
    ecod_ref: String,
    prob: f64,
}

/// Run stage 17.
///
/// # Errors
/// Returns an error on I/O failure; a missing prediction table yields an
/// empty (header-only) output.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let predictions_file = ctx.stage_file(16, ".step16_predictions")?;
    let output = ctx.stage_file(17, ".step17_confident_predictions")?;
    if !predictions_file.exists() {
        info!(prefix = ctx.prefix, "no predictions; writing empty confident table");
        fs::write(&output, HEADER)?;
        return Ok(());
    }

    let mut domain_range: BTreeMap<String, String> = BTreeMap::new();
    let mut per_domain: BTreeMap<String, Vec<Prediction>> = BTreeMap::new();
    let text = fs::read_to_string(&predictions_file)
        .with_context(|| format!("reading predictions {}", predictions_file.display()))?;
    for (lineno, line) in text.lines().enumerate() {
        if lineno == 0 || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 5 {
            continue;
        }
        let Ok(prob) = parts[4].parse::<f64>() else {
            continue;
        };
        domain_range.insert(parts[0].to_owned(), parts[1].to_owned());
        per_domain.entry(parts[0].to_owned()).or_default().push(Prediction {
            tgroup: parts[2].to_owned(),
            ecod_ref: parts[3].to_owned(),
            prob,
        });
    }

    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    out.write_all(HEADER.as_bytes())?;
    let mut kept = 0usize;

    for (domain, mut predictions) in per_domain {
        let range = domain_range.get(&domain).cloned().unwrap_or_default();
        let mut best_per_tgroup: BTreeMap<String, f64> = BTreeMap::new();
        for pred in &predictions {
            let slot = best_per_tgroup.entry(pred.tgroup.clone()).or_insert(pred.prob);
            if pred.prob > *slot {
                *slot = pred.prob;
            }
        }
        let best = best_per_tgroup.values().copied().fold(f64::MIN, f64::max);
        let similar: BTreeSet<String> = best_per_tgroup
            .iter()
            .filter(|&(_, &prob)| prob >= best - SIMILARITY_WINDOW)
            .map(|(tgroup, _)| tgroup.clone())
            .collect();
        let quality = quality_label(&similar);

        predictions.sort_by(|a, b| b.prob.partial_cmp(&a.prob).unwrap_or(std::cmp::Ordering::Equal));
        for pred in &predictions {
            if pred.prob < MIN_PROBABILITY {
                continue;
            }
            writeln!(
                out,
                "{domain}\t{range}\t{}\t{}\t{:.4}\t{quality}",
                pred.tgroup, pred.ecod_ref, pred.prob
            )?;
            kept += 1;
        }
    }
    out.flush()?;
    info!(prefix = ctx.prefix, kept, "confident predictions written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_tgroup_is_good_even_with_others_below_threshold() {
        // Only the winning T-group sits in the similarity window.
        let similar: BTreeSet<String> = ["1.1.1".to_owned()].into();
        assert_eq!(quality_label(&similar), "good");
    }

    #[test]
    fn same_hgroup_is_ok() {
        let similar: BTreeSet<String> = ["1.1.1".to_owned(), "1.1.2".to_owned()].into();
        assert_eq!(quality_label(&similar), "ok");
    }

    #[test]
    fn conflicting_hgroups_are_bad() {
        let similar: BTreeSet<String> = ["1.1.1".to_owned(), "2.3.4".to_owned()].into();
        assert_eq!(quality_label(&similar), "bad");
    }
}
