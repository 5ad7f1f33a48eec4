// crates/dpam-steps/src/iterative_dali.rs

//! Stage 7: iterative DALI alignment against every candidate template.
//!
//! Per candidate uid, a private copy of the query PDB is aligned repeatedly
//! against the template; after each accepted alignment (z present and at
//! least 20 aligned pairs) the aligned region is expanded to segment hulls
//! (gap cutoff `max(5, 0.05 × |residues|)`) and removed, until fewer than
//! 20 residues remain. Iterations are recorded as `{uid}_{n}`.
//!
//! Candidates run in parallel on a dedicated worker pool. A worker's
//! failure is isolated: logged, counted as "no hits for this uid", never
//! fatal to the stage. Per-worker scratch directories are private,
//! short-named (DALI's 80-character path limit), and removed on both
//! success and failure paths.
//!
//! In batch mode the orchestrator passes a shared template cache directory
//! so workers read templates from local storage instead of NFS.

use crate::StepContext;
use anyhow::{bail, Context, Result};
use dpam_core::pdb;
use dpam_tools::dali;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MIN_ALIGNED_PAIRS: usize = 20;
const MIN_REMAINING: usize = 20;

/// Run stage 7.
///
/// `template_cache` (batch mode) overrides `{data_dir}/ECOD70` as the
/// template source.
///
/// # Errors
/// Returns an error when the candidate list is missing or output writing
/// fails (individual worker failures are not errors).
pub fn run(ctx: &StepContext<'_>, template_cache: Option<&Path>) -> Result<()> {
    let step7_dir = ctx.resolver.step_dir(7)?;
    let done_marker = step7_dir.join(format!("{}.iterativeDali.done", ctx.prefix));
    if done_marker.exists() {
        info!(prefix = ctx.prefix, "iterative DALI already complete");
        return Ok(());
    }

    let hits_file = ctx.stage_file(6, "_hits4Dali")?;
    if !hits_file.exists() {
        bail!("DALI candidate list not found: {}", hits_file.display());
    }
    let candidates: Vec<String> = fs::read_to_string(&hits_file)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    let query_pdb = ctx.stage_file(1, ".pdb")?;
    if !query_pdb.exists() {
        bail!("query PDB not found: {}", query_pdb.display());
    }
    let template_dir = template_cache
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.data_dir.join("ECOD70"));

    let scratch_root = ctx
        .scratch_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| step7_dir.clone());
    let iterative_dir = scratch_root.join(format!("iterativeDali_{}", ctx.prefix));
    fs::create_dir_all(&iterative_dir)
        .with_context(|| format!("creating {}", iterative_dir.display()))?;

    let workers = ctx.dali_worker_count();
    info!(
        prefix = ctx.prefix,
        candidates = candidates.len(),
        workers,
        "running iterative DALI"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("building DALI worker pool")?;
    let successes: usize = pool.install(|| {
        candidates
            .par_iter()
            .map(|uid| {
                run_template(ctx.prefix, uid, &query_pdb, &template_dir, &iterative_dir)
            })
            .filter(|&hit| hit)
            .count()
    });
    info!(
        prefix = ctx.prefix,
        successes,
        candidates = candidates.len(),
        "iterative DALI workers finished"
    );

    // Concatenate per-template hit files in sorted filename order.
    let combined = step7_dir.join(format!("{}_iterativdDali_hits", ctx.prefix));
    let mut out = BufWriter::new(
        File::create(&combined).with_context(|| format!("creating {}", combined.display()))?,
    );
    let mut hit_files: Vec<PathBuf> = fs::read_dir(&iterative_dir)?
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&format!("{}_", ctx.prefix)) && n.ends_with("_hits"))
        })
        .collect();
    hit_files.sort();
    for path in &hit_files {
        let body = fs::read_to_string(path)?;
        out.write_all(body.as_bytes())?;
    }
    out.flush()?;

    let _ = fs::remove_dir_all(&iterative_dir);
    fs::write(&done_marker, "done\n")?;
    Ok(())
}

/// One worker: the iterative alignment loop for a single template.
/// Returns whether any iteration was recorded; failures are logged and
/// swallowed.
fn run_template(
    prefix: &str,
    uid: &str,
    query_pdb: &Path,
    template_dir: &Path,
    iterative_dir: &Path,
) -> bool {
    let template_source = template_dir.join(format!("{uid}.pdb"));
    if !template_source.exists() {
        warn!(uid, "template not found: {}", template_source.display());
        return false;
    }
    let tmp_dir = iterative_dir.join(format!("tmp_{prefix}_{uid}"));
    let result = iterate_template(prefix, uid, query_pdb, &template_source, &tmp_dir, iterative_dir);
    let _ = fs::remove_dir_all(&tmp_dir);
    match result {
        Ok(iterations) => iterations > 0,
        Err(err) => {
            warn!(uid, error = %err, "iterative DALI worker failed; treating as no hits");
            false
        }
    }
}

fn iterate_template(
    prefix: &str,
    uid: &str,
    query_pdb: &Path,
    template_source: &Path,
    tmp_dir: &Path,
    iterative_dir: &Path,
) -> Result<usize> {
    let output_tmp = tmp_dir.join("output_tmp");
    fs::create_dir_all(&output_tmp)
        .with_context(|| format!("creating {}", output_tmp.display()))?;

    let work_pdb = tmp_dir.join(format!("{prefix}_{uid}.pdb"));
    fs::copy(query_pdb, &work_pdb)
        .with_context(|| format!("copying query to {}", work_pdb.display()))?;
    // Local short-named template copy keeps DALI under its path limit.
    let template_local = tmp_dir.join(format!("{uid}.pdb"));
    fs::copy(template_source, &template_local)
        .with_context(|| format!("copying template to {}", template_local.display()))?;

    let hits_path = iterative_dir.join(format!("{prefix}_{uid}_hits"));
    let mut iteration = 0usize;

    loop {
        let alignment = dali::align(&work_pdb, &template_local, &output_tmp)?;
        let Some(alignment) = alignment else {
            debug!(uid, "no DALI alignment");
            break;
        };
        if alignment.pairs.len() < MIN_ALIGNED_PAIRS {
            debug!(uid, pairs = alignment.pairs.len(), "alignment below pair cutoff");
            break;
        }

        let current: Vec<i32> = pdb::read_residues(&work_pdb)?.into_iter().collect();
        let current_set: BTreeSet<i32> = current.iter().copied().collect();

        iteration += 1;
        let mut out = BufWriter::new(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&hits_path)
                .with_context(|| format!("opening {}", hits_path.display()))?,
        );
        writeln!(
            out,
            ">{uid}_{iteration}\t{z}\t{pairs}\t{qlen}\t0",
            z = alignment.z_score,
            pairs = alignment.pairs.len(),
            qlen = current.len()
        )?;
        // DALI indices are sequential positions in the imported structure;
        // translate back onto the surviving residue numbering.
        let mut aligned: Vec<i32> = Vec::with_capacity(alignment.pairs.len());
        for &(q_index, t_index) in &alignment.pairs {
            let slot = usize::try_from(q_index - 1).ok().and_then(|i| current.get(i));
            let Some(&resid) = slot else {
                bail!("DALI query index {q_index} out of range ({} residues)", current.len());
            };
            writeln!(out, "{resid}\t{t_index}")?;
            aligned.push(resid);
        }
        out.flush()?;
        debug!(uid, iteration, z = alignment.z_score, pairs = alignment.pairs.len(), "iteration recorded");

        let removal = removal_set(&aligned);
        let remaining: BTreeSet<i32> = current_set.difference(&removal).copied().collect();
        if remaining.len() < MIN_REMAINING {
            debug!(uid, remaining = remaining.len(), "insufficient residues remaining");
            clear_dir(&output_tmp)?;
            break;
        }

        let rewritten = tmp_dir.join(format!("{prefix}_{uid}.pdbnew"));
        pdb::filter_atoms(&work_pdb, &rewritten, &remaining)?;
        fs::rename(&rewritten, &work_pdb)?;
        clear_dir(&output_tmp)?;
    }

    Ok(iteration)
}

/// Aligned residues expanded to segment hulls under the removal cutoff
/// `max(5, 0.05 × |aligned|)`.
#[must_use]
pub fn removal_set(aligned: &[i32]) -> BTreeSet<i32> {
    let cutoff = (aligned.len() as f64 * 0.05).max(5.0);
    let sorted: BTreeSet<i32> = aligned.iter().copied().collect();

    let mut removal = BTreeSet::new();
    let mut run_start: Option<i32> = None;
    let mut run_end = 0i32;
    for &resid in &sorted {
        match run_start {
            Some(_) if f64::from(resid) <= f64::from(run_end) + cutoff => run_end = resid,
            Some(start) => {
                removal.extend(start..=run_end);
                run_start = Some(resid);
                run_end = resid;
            }
            None => {
                run_start = Some(resid);
                run_end = resid;
            }
        }
    }
    if let Some(start) = run_start {
        removal.extend(start..=run_end);
    }
    removal
}

fn clear_dir(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            let _ = fs::remove_file(path);
        }
    }
    Ok(())
}

/// Collect the union of template uids referenced by the given proteins'
/// stage-6 outputs (batch-mode cache priming).
///
/// # Errors
/// Returns an error on unreadable candidate files.
pub fn collect_batch_templates(
    prefixes: &[String],
    candidates_dir: &Path,
) -> Result<BTreeSet<String>> {
    let mut templates = BTreeSet::new();
    for prefix in prefixes {
        let hits_file = candidates_dir.join(format!("{prefix}_hits4Dali"));
        if !hits_file.exists() {
            continue;
        }
        for line in fs::read_to_string(&hits_file)?.lines() {
            let uid = line.trim();
            if !uid.is_empty() {
                templates.insert(uid.to_owned());
            }
        }
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removal_expands_to_hulls() {
        // Six aligned residues: cutoff = max(5, 0.3) = 5.
        let aligned = vec![1, 2, 3, 10, 30, 32];
        let removal = removal_set(&aligned);
        // 3 -> 10 is a gap of 7 > 5: separate runs; hull fills 30..=32.
        assert!(removal.contains(&1));
        assert!(removal.contains(&3));
        assert!(!removal.contains(&6));
        assert!(removal.contains(&10));
        assert!(removal.contains(&31));
    }

    #[test]
    fn cutoff_scales_with_alignment_size() {
        // 200 aligned residues: cutoff = 10, so a 7-gap bridges.
        let mut aligned: Vec<i32> = (1..=197).collect();
        aligned.extend([205, 206, 207]);
        let removal = removal_set(&aligned);
        assert!(removal.contains(&200));
        assert_eq!(removal.len(), 207);
    }

    #[test]
    fn nineteen_pairs_would_not_be_recorded() {
        // The loop cutoff is strictly fewer-than-20 pairs; this pins the
        // constant the worker checks against.
        assert_eq!(MIN_ALIGNED_PAIRS, 20);
    }
}
