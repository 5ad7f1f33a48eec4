// crates/dpam-steps/src/predictions.rs

//! Stage 23: classify final entities as full / part / miss.
//!
//! A final entity is either a stage-22 merged component or a stage-13
//! domain not swallowed by any merge. Per entity, the best classifier
//! prediction per template is gathered; template coverage is rebuilt from
//! the stage-18 projections (DALI when it covers more than half of the HH
//! projection, HH otherwise) and weighed against per-template position
//! weights and the T-group average length. One row per entity survives,
//! preferring full over part over miss.

use crate::{hits, StepContext};
use anyhow::{Context, Result};
use dpam_core::range::parse_range;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::info;

const HEADER: &str = "# classification\tdomain\trange\tecod\ttgroup\t\
                      dpam_prob\thh_prob\tdali_zscore\tweighted_ratio\tlength_ratio\tquality\n";

/// Classification from probability and the two coverage ratios.
#[must_use]
pub fn classify(prob: f64, weighted_ratio: f64, length_ratio: f64) -> &'static str {
    if prob < 0.85 {
        return "miss";
    }
    if weighted_ratio >= 0.66 || length_ratio >= 0.66 {
        if weighted_ratio >= 0.33 && length_ratio >= 0.33 {
            "full"
        } else {
            "part"
        }
    } else if weighted_ratio >= 0.33 || length_ratio >= 0.33 {
        "part"
    } else {
        "miss"
    }
}

#[derive(Clone, Debug)]
struct Prediction {
    key: String,
    tgroup: String,
    dpam_prob: f64,
    hh_prob: f64,
    dali_zscore: f64,
}

#[derive(Clone, Debug)]
struct Mapping {
    hh_range: String,
    dali_range: String,
    quality: String,
}

struct Candidate {
    classification: &'static str,
    key: String,
    tgroup: String,
    dpam_prob: f64,
    hh_prob: f64,
    dali_zscore: f64,
    weighted_ratio: f64,
    length_ratio: f64,
    quality: String,
}

/// Run stage 23.
///
/// # Errors
/// Returns an error on I/O failure or a missing `tgroup_length` table;
/// missing upstream tables read as empty.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let merged_file = ctx.stage_file(22, ".step22_merged_domains")?;
    let domains_file = ctx.stage_file(13, ".step13_domains")?;
    let predictions_file = ctx.stage_file(16, ".step16_predictions")?;
    let mappings_file = ctx.stage_file(18, ".step18_mappings")?;

    // T-group average lengths.
    let tgroup_file = ctx.data_dir.join("tgroup_length");
    let mut tgroup_lengths: HashMap<String, f64> = HashMap::new();
    let text = fs::read_to_string(&tgroup_file)
        .with_context(|| format!("reading T-group lengths {}", tgroup_file.display()))?;
    for line in text.lines() {
        let mut words = line.split_whitespace();
        if let (Some(tgroup), Some(length)) = (words.next(), words.next()) {
            if let Ok(length) = length.parse::<f64>() {
                tgroup_lengths.insert(tgroup.to_owned(), length);
            }
        }
    }

    // Merged entities and the domains they absorb.
    let mut merged_entities: Vec<(String, String)> = Vec::new();
    let mut merged_names: BTreeSet<String> = BTreeSet::new();
    if merged_file.exists() {
        for line in fs::read_to_string(&merged_file)?.lines() {
            if line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 3 {
                continue;
            }
            merged_entities.push((parts[1].to_owned(), parts[2].to_owned()));
            for domain in parts[1].split(',') {
                merged_names.insert(domain.to_owned());
            }
        }
    }
    let singles: Vec<(String, String)> = hits::read_domains_file(&domains_file)?
        .into_iter()
        .filter(|(name, _)| !merged_names.contains(name))
        .collect();

    // Classifier predictions per domain.
    let mut per_domain: BTreeMap<String, Vec<Prediction>> = BTreeMap::new();
    if predictions_file.exists() {
        for (lineno, line) in fs::read_to_string(&predictions_file)?.lines().enumerate() {
            if lineno == 0 || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 16 {
                continue;
            }
            let parsed = (|| -> Option<Prediction> {
                Some(Prediction {
                    key: parts[3].to_owned(),
                    tgroup: parts[2].to_owned(),
                    dpam_prob: parts[4].parse().ok()?,
                    hh_prob: parts[5].parse().ok()?,
                    dali_zscore: parts[8].parse().ok()?,
                })
            })();
            if let Some(prediction) = parsed {
                per_domain
                    .entry(parts[0].to_owned())
                    .or_default()
                    .push(prediction);
            }
        }
    }

    // Template projections per (domain, template).
    let mut projections: HashMap<(String, String), Mapping> = HashMap::new();
    if mappings_file.exists() {
        for (lineno, line) in fs::read_to_string(&mappings_file)?.lines().enumerate() {
            if lineno == 0 || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 8 {
                continue;
            }
            projections.insert(
                (parts[0].to_owned(), parts[2].to_owned()),
                Mapping {
                    hh_range: parts[6].to_owned(),
                    dali_range: parts[7].to_owned(),
                    quality: parts[5].to_owned(),
                },
            );
        }
    }

    let output = ctx.stage_file(23, ".step23_predictions")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    out.write_all(HEADER.as_bytes())?;
    let mut rows = 0usize;

    for (domain_list, merged_range) in &merged_entities {
        let members: Vec<&str> = domain_list.split(',').collect();
        let entity_len = parse_range(merged_range)?.len();

        let mut best_per_key: BTreeMap<String, Prediction> = BTreeMap::new();
        for member in &members {
            for prediction in per_domain.get(*member).map(Vec::as_slice).unwrap_or(&[]) {
                let slot = best_per_key
                    .entry(prediction.key.clone())
                    .or_insert_with(|| prediction.clone());
                if prediction.dpam_prob > slot.dpam_prob {
                    *slot = prediction.clone();
                }
            }
        }
        // Length-weighted ordering for merged entities.
        let mut ordered: Vec<&Prediction> = best_per_key.values().collect();
        ordered.sort_by(|a, b| {
            (b.dpam_prob * entity_len as f64)
                .partial_cmp(&(a.dpam_prob * entity_len as f64))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let gather = |prediction: &Prediction| -> (BTreeSet<i32>, String) {
            let mut template_resids = BTreeSet::new();
            let mut qualities: Vec<String> = Vec::new();
            for member in &members {
                if let Some(mapping) =
                    projections.get(&((*member).to_owned(), prediction.key.clone()))
                {
                    qualities.push(mapping.quality.clone());
                    template_resids.extend(pick_projection(mapping));
                }
            }
            let quality = if qualities.iter().any(|q| q == "good") {
                "good".to_owned()
            } else if qualities.iter().any(|q| q == "ok") {
                "ok".to_owned()
            } else if qualities.is_empty() {
                "na".to_owned()
            } else {
                "bad".to_owned()
            };
            (template_resids, quality)
        };

        if let Some(candidate) = best_candidate(
            &ordered,
            entity_len,
            &tgroup_lengths,
            ctx,
            gather,
        ) {
            write_row(&mut out, &candidate, domain_list, merged_range)?;
            rows += 1;
        }
    }

    for (domain, range) in &singles {
        let entity_len = parse_range(range)?.len();
        let Some(predictions) = per_domain.get(domain) else {
            writeln!(
                out,
                "miss\t{domain}\t{range}\tna\tna\tna\tna\tna\tna\tna\tna"
            )?;
            rows += 1;
            continue;
        };
        let mut best_per_key: BTreeMap<String, Prediction> = BTreeMap::new();
        for prediction in predictions {
            let slot = best_per_key
                .entry(prediction.key.clone())
                .or_insert_with(|| prediction.clone());
            if prediction.dpam_prob > slot.dpam_prob {
                *slot = prediction.clone();
            }
        }
        let mut ordered: Vec<&Prediction> = best_per_key.values().collect();
        ordered.sort_by(|a, b| {
            b.dpam_prob
                .partial_cmp(&a.dpam_prob)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let gather = |prediction: &Prediction| -> (BTreeSet<i32>, String) {
            projections
                .get(&(domain.clone(), prediction.key.clone()))
                .map_or_else(
                    || (BTreeSet::new(), "na".to_owned()),
                    |mapping| (pick_projection(mapping), mapping.quality.clone()),
                )
        };
        if let Some(candidate) = best_candidate(
            &ordered,
            entity_len,
            &tgroup_lengths,
            ctx,
            gather,
        ) {
            write_row(&mut out, &candidate, domain, range)?;
            rows += 1;
        }
    }
    out.flush()?;
    info!(prefix = ctx.prefix, rows, "final-entity classifications written");
    Ok(())
}

/// DALI projection when it covers more than half of the HH projection.
fn pick_projection(mapping: &Mapping) -> BTreeSet<i32> {
    let hh = parse_range(&mapping.hh_range).unwrap_or_default();
    let dali = parse_range(&mapping.dali_range).unwrap_or_default();
    if dali.len() as f64 > hh.len() as f64 * 0.5 {
        dali
    } else {
        hh
    }
}

fn best_candidate<F>(
    ordered: &[&Prediction],
    entity_len: usize,
    tgroup_lengths: &HashMap<String, f64>,
    ctx: &StepContext<'_>,
    gather: F,
) -> Option<Candidate>
where
    F: Fn(&Prediction) -> (BTreeSet<i32>, String),
{
    let mut best_full: Option<Candidate> = None;
    let mut best_part: Option<Candidate> = None;
    let mut best_miss: Option<Candidate> = None;

    for prediction in ordered {
        let Some(uid) = ctx.refdata.key_to_uid.get(&prediction.key) else {
            continue;
        };
        let Some(&(_, template_len)) = ctx.refdata.lengths.get(uid) else {
            continue;
        };
        let (template_resids, quality) = gather(prediction);
        if template_resids.is_empty() {
            continue;
        }

        let (weights, total_weight) = ctx.refdata.weights_or_uniform(uid, template_len);
        let covered: f64 = template_resids
            .iter()
            .filter_map(|res| weights.get(res))
            .sum();
        let weighted_ratio = if total_weight > 0.0 { covered / total_weight } else { 0.0 };
        let length_ratio = tgroup_lengths.get(&prediction.tgroup).map_or_else(
            || template_resids.len() as f64 / f64::from(template_len),
            |avg| entity_len as f64 / avg,
        );

        let classification = classify(prediction.dpam_prob, weighted_ratio, length_ratio);
        let candidate = Candidate {
            classification,
            key: prediction.key.clone(),
            tgroup: prediction.tgroup.clone(),
            dpam_prob: prediction.dpam_prob,
            hh_prob: prediction.hh_prob,
            dali_zscore: prediction.dali_zscore,
            weighted_ratio,
            length_ratio,
            quality,
        };
        match classification {
            "full" if best_full.is_none() => best_full = Some(candidate),
            "part" if best_part.is_none() => best_part = Some(candidate),
            "miss" if best_miss.is_none() => best_miss = Some(candidate),
            _ => {}
        }
    }
    best_full.or(best_part).or(best_miss)
}

fn write_row(
    out: &mut BufWriter<File>,
    candidate: &Candidate,
    entity: &str,
    range: &str,
) -> Result<()> {
    writeln!(
        out,
        "{}\t{entity}\t{range}\t{}\t{}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{}",
        candidate.classification,
        candidate.key,
        candidate.tgroup,
        candidate.dpam_prob,
        candidate.hh_prob,
        candidate.dali_zscore,
        candidate.weighted_ratio,
        candidate.length_ratio,
        candidate.quality
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(classify(0.9, 0.7, 0.5), "full");
        assert_eq!(classify(0.9, 0.7, 0.2), "part"); // one ratio under 0.33
        assert_eq!(classify(0.9, 0.4, 0.4), "part"); // neither reaches 0.66
        assert_eq!(classify(0.9, 0.2, 0.2), "miss");
        assert_eq!(classify(0.8, 0.9, 0.9), "miss"); // probability gate
        assert_eq!(classify(0.85, 0.66, 0.33), "full"); // boundary values
    }
}
