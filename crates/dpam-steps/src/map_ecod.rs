// crates/dpam-steps/src/map_ecod.rs

//! Stage 5: map HHsearch hits onto ECOD domains.
//!
//! For each HHsearch alignment whose template chain appears in the ECOD
//! pdbmap, the gapped alignment is walked column by column; columns with a
//! residue on both sides whose template PDB residue has an ECOD position
//! are recorded. Hits keeping at least ten aligned positions are emitted
//! with coverage figures against the ECOD template length.

use crate::StepContext;
use anyhow::{bail, Context, Result};
use dpam_core::range::format_range;
use dpam_refdata::ReferenceData;
use dpam_tools::hhsuite::{self, HhAlignment};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use tracing::{info, warn};

const MIN_ALIGNED: usize = 10;

/// One mapped hit, ready for emission.
#[derive(Clone, Debug)]
pub struct EcodMapping {
    pub uid: String,
    pub key: String,
    pub hh_prob: f64,
    pub hh_eval: String,
    pub hh_score: String,
    pub aligned_cols: String,
    pub identities: String,
    pub similarity: String,
    pub sum_probs: String,
    pub coverage: f64,
    pub ungapped_coverage: f64,
    pub query_range: String,
    pub template_range: String,
    pub template_seqid_range: String,
}

/// Run stage 5.
///
/// # Errors
/// Returns an error when the HHsearch report is missing or unreadable.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let report = ctx.stage_file(2, ".hhsearch")?;
    if !report.exists() {
        bail!("HHsearch report not found: {}", report.display());
    }
    let alignments = hhsuite::parse_report(&report)?;
    info!(prefix = ctx.prefix, hits = alignments.len(), "parsed HHsearch report");

    let mut mappings = Vec::new();
    for alignment in &alignments {
        if let Some(mapping) = map_alignment(alignment, ctx.refdata) {
            mappings.push(mapping);
        }
    }
    info!(prefix = ctx.prefix, mapped = mappings.len(), "mapped hits to ECOD");

    let output = ctx.stage_file(5, ".map2ecod.result")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    writeln!(
        out,
        "uid\tecod_domain_id\thh_prob\thh_eval\thh_score\taligned_cols\tidents\t\
         similarities\tsum_probs\tcoverage\tungapped_coverage\tquery_range\t\
         template_range\ttemplate_seqid_range"
    )?;
    for m in &mappings {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:.3}\t{:.3}\t{}\t{}\t{}",
            m.uid,
            m.key,
            m.hh_prob,
            m.hh_eval,
            m.hh_score,
            m.aligned_cols,
            m.identities,
            m.similarity,
            m.sum_probs,
            m.coverage,
            m.ungapped_coverage,
            m.query_range,
            m.template_range,
            m.template_seqid_range
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Map one alignment; `None` when the chain is unknown or the aligned
/// region is too short.
#[must_use]
pub fn map_alignment(alignment: &HhAlignment, refdata: &ReferenceData) -> Option<EcodMapping> {
    let entry = refdata.pdbmap.get(&alignment.hit_id)?;
    if alignment.query_seq.len() != alignment.template_seq.len() {
        warn!(hit = %alignment.hit_id, "alignment length mismatch");
        return None;
    }

    // Template PDB residue -> 1-based ECOD position.
    let pdb_to_ecod: HashMap<i32, i32> = entry
        .residues
        .iter()
        .enumerate()
        .map(|(i, &res)| (res, i as i32 + 1))
        .collect();

    let mut query_pos = alignment.query_start - 1;
    let mut template_pos = alignment.template_start - 1;
    let mut aligned_query = Vec::new();
    let mut aligned_template_pdb = Vec::new();
    let mut aligned_template_ecod = Vec::new();

    for (q, t) in alignment
        .query_seq
        .chars()
        .zip(alignment.template_seq.chars())
    {
        if q != '-' {
            query_pos += 1;
        }
        if t != '-' {
            template_pos += 1;
        }
        if q != '-' && t != '-' {
            if let Some(&ecod_pos) = pdb_to_ecod.get(&template_pos) {
                aligned_query.push(query_pos);
                aligned_template_pdb.push(template_pos);
                aligned_template_ecod.push(ecod_pos);
            }
        }
    }

    if aligned_query.len() < MIN_ALIGNED {
        return None;
    }
    let Some(&(ref key, ecod_length)) = refdata.lengths.get(&entry.uid) else {
        warn!(uid = %entry.uid, "uid missing from ECOD lengths");
        return None;
    };

    let coverage = aligned_template_ecod.len() as f64 / f64::from(ecod_length);
    let min_pos = aligned_template_ecod.iter().min().copied().unwrap_or(0);
    let max_pos = aligned_template_ecod.iter().max().copied().unwrap_or(0);
    let ungapped_coverage = f64::from(max_pos - min_pos + 1) / f64::from(ecod_length);

    Some(EcodMapping {
        uid: entry.uid.clone(),
        key: key.clone(),
        hh_prob: alignment.probability,
        hh_eval: alignment.evalue.clone(),
        hh_score: alignment.score.clone(),
        aligned_cols: alignment.aligned_cols.clone(),
        identities: alignment.identities.clone(),
        similarity: alignment.similarity.clone(),
        sum_probs: alignment.sum_probs.clone(),
        coverage,
        ungapped_coverage,
        query_range: format_range(aligned_query),
        template_range: format_range(aligned_template_ecod),
        template_seqid_range: format!(
            "{}:{}",
            entry.chain_id,
            format_range(aligned_template_pdb)
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpam_refdata::ReferenceData;
    use std::fs;

    fn refdata(tmp: &tempfile::TempDir) -> ReferenceData {
        fs::write(tmp.path().join("ECOD_length"), "000000003 e2rspA1 20\n").unwrap();
        fs::write(tmp.path().join("ECOD_norms"), "000000003 27.3\n").unwrap();
        fs::write(tmp.path().join("ECOD_pdbmap"), "000000003 2rsp A:5-24\n").unwrap();
        fs::write(
            tmp.path().join("ecod.latest.domains"),
            "000000003\te2rspA1\tF\t1.1.2.3\n",
        )
        .unwrap();
        ReferenceData::load(tmp.path()).unwrap()
    }

    fn alignment(query_seq: &str, template_seq: &str) -> HhAlignment {
        HhAlignment {
            hit_id: "2RSP_A".to_owned(),
            probability: 99.0,
            evalue: "1e-30".to_owned(),
            score: "210.5".to_owned(),
            aligned_cols: "12".to_owned(),
            identities: "40%".to_owned(),
            similarity: "0.7".to_owned(),
            sum_probs: "11.0".to_owned(),
            query_start: 3,
            query_seq: query_seq.to_owned(),
            template_start: 5,
            template_seq: template_seq.to_owned(),
        }
    }

    #[test]
    fn gapped_columns_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let data = refdata(&tmp);
        // 12 columns, one query gap and one template gap.
        let mapping = map_alignment(
            &alignment("ABCD-FGHIJKL", "ABCDEF-HIJKL"),
            &data,
        )
        .unwrap();
        // Columns 0..=3 pair q3..q6 with t5..t8; column 4 is a query gap,
        // column 6 a template gap; columns 5,7..=11 realign.
        assert_eq!(mapping.uid, "000000003");
        assert_eq!(mapping.query_range, "3-7,9-13");
        // Template positions are 1-based ECOD positions (pdb residue - 4).
        assert_eq!(mapping.template_range, "1-4,6-11");
        assert!((mapping.coverage - 10.0 / 20.0).abs() < 1e-9);
        assert!((mapping.ungapped_coverage - 11.0 / 20.0).abs() < 1e-9);
        assert!(mapping.template_seqid_range.starts_with("A:"));
    }

    #[test]
    fn short_alignments_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let data = refdata(&tmp);
        assert!(map_alignment(&alignment("ABC", "ABC"), &data).is_none());
    }

    #[test]
    fn unknown_chains_are_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let data = refdata(&tmp);
        let mut a = alignment("ABCDEFGHIJKL", "ABCDEFGHIJKL");
        a.hit_id = "9XYZ_B".to_owned();
        assert!(map_alignment(&a, &data).is_none());
    }
}
