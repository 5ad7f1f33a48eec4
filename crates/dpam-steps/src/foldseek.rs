// crates/dpam-steps/src/foldseek.rs

//! Stage 3: Foldseek structure search.
//!
//! The e-value (1e6) and `--max-seqs` are deliberately permissive: the
//! stage-4 coverage filter, not Foldseek, decides significance.
//!
//! Single-protein mode runs one `easy-search`. Batch mode symlinks every
//! pending query into one directory and runs
//! `createdb → search → convertalis` once, amortising the target-DB index
//! load, then splits the combined BLAST-tab output by query name.

use crate::StepContext;
use anyhow::{bail, Context, Result};
use dpam_core::PathResolver;
use dpam_tools::foldseek;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

const EVALUE: f64 = 1_000_000.0;
const MAX_SEQS: u32 = 1_000_000;

/// Run stage 3 for one protein.
///
/// # Errors
/// Returns an error when inputs or the target database are missing, or the
/// Foldseek invocation fails (critical stage).
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let pdb = ctx.stage_file(1, ".pdb")?;
    if !pdb.exists() {
        bail!("PDB not found: {}", pdb.display());
    }
    let database = ctx.data_dir.join("ECOD_foldseek_DB");
    if !database.exists() {
        bail!("Foldseek database not found: {}", database.display());
    }

    let output = ctx.stage_file(3, ".foldseek")?;
    // Unique per protein so concurrent proteins cannot race.
    let tmp_dir = ctx
        .resolver
        .step_dir(3)?
        .join(format!("foldseek_tmp_{}", ctx.prefix));

    let result = foldseek::easy_search(
        &pdb,
        &database,
        &output,
        &tmp_dir,
        ctx.cpus,
        EVALUE,
        MAX_SEQS,
    );
    if tmp_dir.exists() {
        let _ = fs::remove_dir_all(&tmp_dir);
    }
    result.map_err(anyhow::Error::new)?;

    if !output.exists() {
        bail!("Foldseek output not created: {}", output.display());
    }
    let hit_count = BufReader::new(File::open(&output)?).lines().count();
    info!(prefix = ctx.prefix, hits = hit_count, "Foldseek search complete");
    Ok(())
}

/// Run stage 3 for a batch of proteins with one Foldseek invocation.
///
/// Returns per-protein outcomes; the whole-batch failure mode maps every
/// pending protein to the same error.
///
/// # Errors
/// Infrastructure errors (unwritable batch directory) surface directly;
/// per-protein problems live in the returned map.
pub fn run_batch(
    prefixes: &[String],
    resolver: &PathResolver,
    data_dir: &Path,
    threads: usize,
) -> Result<BTreeMap<String, Result<()>>> {
    let mut outcomes: BTreeMap<String, Result<()>> = BTreeMap::new();
    let database = data_dir.join("ECOD_foldseek_DB");
    if !database.exists() {
        for prefix in prefixes {
            outcomes.insert(
                prefix.clone(),
                Err(anyhow::anyhow!(
                    "Foldseek database not found: {}",
                    database.display()
                )),
            );
        }
        return Ok(outcomes);
    }

    let step1_dir = resolver.step_dir(1)?;
    let mut valid: Vec<String> = Vec::new();
    for prefix in prefixes {
        if step1_dir.join(format!("{prefix}.pdb")).exists() {
            valid.push(prefix.clone());
        } else {
            warn!(prefix = %prefix, "PDB not found, skipping in batch Foldseek");
            outcomes.insert(
                prefix.clone(),
                Err(anyhow::anyhow!("PDB not found for {prefix}")),
            );
        }
    }
    if valid.is_empty() {
        warn!("no valid PDB files for batch Foldseek");
        return Ok(outcomes);
    }

    let batch_dir = resolver.batch_dir()?.join("_foldseek_batch");
    let query_dir = batch_dir.join("query_pdbs");
    fs::create_dir_all(&query_dir)
        .with_context(|| format!("creating {}", query_dir.display()))?;

    let step3_dir = resolver.step_dir(3)?;
    let batch_result = (|| -> Result<BTreeMap<String, usize>> {
        for prefix in &valid {
            let src = step1_dir.join(format!("{prefix}.pdb"));
            let dst = query_dir.join(format!("{prefix}.pdb"));
            if dst.exists() {
                fs::remove_file(&dst)?;
            }
            link_or_copy(&src, &dst)?;
        }

        let query_db = batch_dir.join("queryDB");
        info!(queries = valid.len(), "creating batch Foldseek query database");
        foldseek::createdb(&query_dir, &query_db, threads).map_err(anyhow::Error::new)?;

        let result_db = batch_dir.join("resultDB");
        let tmp_dir = batch_dir.join("tmp");
        info!(queries = valid.len(), "searching batch queries against ECOD database");
        foldseek::search(
            &query_db, &database, &result_db, &tmp_dir, threads, EVALUE, MAX_SEQS,
        )
        .map_err(anyhow::Error::new)?;

        let combined = batch_dir.join("all_results.tsv");
        foldseek::convertalis(&query_db, &database, &result_db, &combined)
            .map_err(anyhow::Error::new)?;

        split_results(&combined, &step3_dir, &valid)
    })();

    match batch_result {
        Ok(hit_counts) => {
            for prefix in &valid {
                let output = step3_dir.join(format!("{prefix}.foldseek"));
                if output.exists() {
                    info!(prefix = %prefix, hits = hit_counts.get(prefix).copied().unwrap_or(0), "batch Foldseek hits");
                    outcomes.insert(prefix.clone(), Ok(()));
                } else {
                    outcomes.insert(
                        prefix.clone(),
                        Err(anyhow::anyhow!("per-protein Foldseek output not created")),
                    );
                }
            }
        }
        Err(err) => {
            warn!(error = %err, "batch Foldseek failed");
            for prefix in &valid {
                outcomes.insert(prefix.clone(), Err(anyhow::anyhow!("batch Foldseek failed: {err}")));
            }
        }
    }

    if batch_dir.exists() {
        let _ = fs::remove_dir_all(&batch_dir);
    }
    Ok(outcomes)
}

/// Split combined BLAST-tab output into per-protein `.foldseek` files,
/// keyed by the first column.
fn split_results(
    combined: &Path,
    output_dir: &Path,
    prefixes: &[String],
) -> Result<BTreeMap<String, usize>> {
    let mut writers: BTreeMap<String, BufWriter<File>> = BTreeMap::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for prefix in prefixes {
        let path = output_dir.join(format!("{prefix}.foldseek"));
        writers.insert(
            prefix.clone(),
            BufWriter::new(
                File::create(&path).with_context(|| format!("creating {}", path.display()))?,
            ),
        );
        counts.insert(prefix.clone(), 0);
    }
    let file = File::open(combined)
        .with_context(|| format!("opening combined results {}", combined.display()))?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        let Some(query) = line.split('\t').next() else {
            continue;
        };
        if let Some(writer) = writers.get_mut(query) {
            writeln!(writer, "{line}")?;
            if let Some(count) = counts.get_mut(query) {
                *count += 1;
            }
        }
    }
    for writer in writers.values_mut() {
        writer.flush()?;
    }
    Ok(counts)
}

#[cfg(unix)]
fn link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dst)
        .with_context(|| format!("linking {} -> {}", dst.display(), src.display()))
}

#[cfg(not(unix))]
fn link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .map(|_| ())
        .with_context(|| format!("copying {} -> {}", src.display(), dst.display()))
}
