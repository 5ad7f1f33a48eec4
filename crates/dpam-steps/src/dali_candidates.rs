// crates/dpam-steps/src/dali_candidates.rs

//! Stage 6: union of DALI candidate uids.
//!
//! Merges the ECOD uids seen by stage 5 (HHsearch mapping) and stage 4
//! (filtered Foldseek hits), deduplicated and sorted. An empty union still
//! produces the (empty) `_hits4Dali` file so downstream stages see a
//! consistent world.

use crate::StepContext;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

/// Run stage 6.
///
/// # Errors
/// Returns an error only on I/O failure while writing the output.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let map_file = ctx.stage_file(5, ".map2ecod.result")?;
    let foldseek_file = ctx.stage_file(4, ".foldseek.flt.result")?;

    let from_hhsearch = read_first_column(&map_file)?;
    let from_foldseek = read_first_column(&foldseek_file)?;

    let mut union = from_hhsearch.clone();
    union.extend(from_foldseek.iter().cloned());

    let output = ctx.stage_file(6, "_hits4Dali")?;
    let body: String = union.iter().map(|uid| format!("{uid}\n")).collect();
    fs::write(&output, body).with_context(|| format!("writing {}", output.display()))?;

    info!(
        prefix = ctx.prefix,
        hhsearch = from_hhsearch.len(),
        foldseek = from_foldseek.len(),
        union = union.len(),
        "DALI candidates collected"
    );
    Ok(())
}

/// First whitespace column of each non-header line; missing file reads as
/// empty.
fn read_first_column(path: &Path) -> Result<BTreeSet<String>> {
    let mut uids = BTreeSet::new();
    if !path.exists() {
        warn!(file = %path.display(), "candidate source missing, treating as empty");
        return Ok(uids);
    }
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if lineno == 0 {
            continue; // header
        }
        if let Some(uid) = line.split_whitespace().next() {
            uids.insert(uid.to_owned());
        }
    }
    Ok(uids)
}
