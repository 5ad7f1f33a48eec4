// crates/dpam-core/src/range.rs

//! Residue-range codec.
//!
//! Ranges are serialised as sorted unions of closed intervals,
//! `"a1-b1,a2-b2,…"`; a single residue may appear as `"n"` or `"n-n"` (the
//! parser accepts both, the emitter writes `"n"`). Segments may carry a
//! `chain:` prefix on input, which is ignored. Emission is deterministic so
//! identical residue sets always produce byte-identical strings.

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;

/// Parse a range string into a residue set.
///
/// Empty strings parse to the empty set. A `chain:` prefix on a segment is
/// stripped.
///
/// # Errors
/// Returns an error for non-numeric segment bounds.
pub fn parse_range(range: &str) -> Result<BTreeSet<i32>> {
    let mut residues = BTreeSet::new();
    if range.is_empty() {
        return Ok(residues);
    }
    for raw in range.split(',') {
        let segment = raw.trim();
        if segment.is_empty() {
            continue;
        }
        let segment = segment.rsplit(':').next().unwrap_or(segment);
        if let Some((lo, hi)) = split_interval(segment) {
            let start: i32 = lo.parse().with_context(|| format!("bad segment {segment:?}"))?;
            let end: i32 = hi.parse().with_context(|| format!("bad segment {segment:?}"))?;
            if start > end {
                bail!("inverted segment {segment:?}");
            }
            residues.extend(start..=end);
        } else {
            let res: i32 = segment.parse().with_context(|| format!("bad segment {segment:?}"))?;
            residues.insert(res);
        }
    }
    Ok(residues)
}

/// Parse a range string into an ordered residue list.
///
/// Unlike [`parse_range`], order of appearance is preserved; this is the
/// form that carries positional correspondence between query and template
/// ranges. `"na"` and empty strings parse to an empty list.
///
/// # Errors
/// Returns an error for non-numeric segment bounds.
pub fn parse_range_list(range: &str) -> Result<Vec<i32>> {
    let mut residues = Vec::new();
    if range.is_empty() || range == "na" {
        return Ok(residues);
    }
    for raw in range.split(',') {
        let segment = raw.trim();
        if segment.is_empty() {
            continue;
        }
        let segment = segment.rsplit(':').next().unwrap_or(segment);
        if let Some((lo, hi)) = split_interval(segment) {
            let start: i32 = lo.parse().with_context(|| format!("bad segment {segment:?}"))?;
            let end: i32 = hi.parse().with_context(|| format!("bad segment {segment:?}"))?;
            if start > end {
                bail!("inverted segment {segment:?}");
            }
            residues.extend(start..=end);
        } else {
            let res: i32 = segment.parse().with_context(|| format!("bad segment {segment:?}"))?;
            residues.push(res);
        }
    }
    Ok(residues)
}

/// Split `"a-b"` into bounds, tolerating a leading minus on the first bound.
fn split_interval(segment: &str) -> Option<(&str, &str)> {
    let dash = segment.char_indices().skip(1).find(|&(_, c)| c == '-')?.0;
    Some((&segment[..dash], &segment[dash + 1..]))
}

/// Format a residue collection as a range string (no gap bridging).
#[must_use]
pub fn format_range<I>(residues: I) -> String
where
    I: IntoIterator<Item = i32>,
{
    format_range_with_gap(residues, 0)
}

/// Format a residue collection, bridging gaps of at most `gap_tolerance`.
///
/// Residues are sorted and deduplicated first; a single-residue segment is
/// emitted as `"n"`.
#[must_use]
pub fn format_range_with_gap<I>(residues: I, gap_tolerance: i32) -> String
where
    I: IntoIterator<Item = i32>,
{
    let sorted: BTreeSet<i32> = residues.into_iter().collect();
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<(i32, i32)> = None;
    for res in sorted {
        match current {
            Some((start, end)) if res <= end + 1 + gap_tolerance => {
                current = Some((start, res));
            }
            Some((start, end)) => {
                parts.push(emit_segment(start, end));
                current = Some((res, res));
            }
            None => current = Some((res, res)),
        }
    }
    if let Some((start, end)) = current {
        parts.push(emit_segment(start, end));
    }
    parts.join(",")
}

/// Format every segment as `"a-b"` even when a == b (hit-file convention).
#[must_use]
pub fn format_range_dashed<I>(residues: I) -> String
where
    I: IntoIterator<Item = i32>,
{
    let sorted: BTreeSet<i32> = residues.into_iter().collect();
    segment_runs(&sorted, 1)
        .iter()
        .map(|&(start, end)| format!("{start}-{end}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn emit_segment(start: i32, end: i32) -> String {
    if start == end {
        format!("{start}")
    } else {
        format!("{start}-{end}")
    }
}

/// Split a sorted residue set into maximal runs, where a gap strictly larger
/// than `max_step` starts a new run. `max_step == 1` yields consecutive runs.
#[must_use]
pub fn segment_runs(residues: &BTreeSet<i32>, max_step: i32) -> Vec<(i32, i32)> {
    let mut runs = Vec::new();
    let mut current: Option<(i32, i32)> = None;
    for &res in residues {
        match current {
            Some((start, end)) if res <= end + max_step => current = Some((start, res)),
            Some(run) => {
                runs.push(run);
                current = Some((res, res));
            }
            None => current = Some((res, res)),
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}

/// Mean residue index of a non-empty set (0.0 for an empty one).
#[must_use]
pub fn mean_residue(residues: &BTreeSet<i32>) -> f64 {
    if residues.is_empty() {
        return 0.0;
    }
    let sum: i64 = residues.iter().map(|&r| i64::from(r)).sum();
    sum as f64 / residues.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_accepts_singletons_and_pairs() {
        assert_eq!(parse_range("7").unwrap(), BTreeSet::from([7]));
        assert_eq!(parse_range("7-7").unwrap(), BTreeSet::from([7]));
        assert_eq!(
            parse_range("1-3,5-7").unwrap(),
            BTreeSet::from([1, 2, 3, 5, 6, 7])
        );
    }

    #[test]
    fn parse_strips_chain_prefix() {
        assert_eq!(
            parse_range("A:10-12,A:20").unwrap(),
            BTreeSet::from([10, 11, 12, 20])
        );
    }

    #[test]
    fn parse_list_preserves_order() {
        assert_eq!(
            parse_range_list("10-12,5-6").unwrap(),
            vec![10, 11, 12, 5, 6]
        );
        assert!(parse_range_list("na").unwrap().is_empty());
    }

    #[test]
    fn format_bridges_gaps() {
        assert_eq!(format_range([1, 2, 3, 5, 6, 7]), "1-3,5-7");
        assert_eq!(format_range_with_gap([1, 2, 3, 5, 6, 7], 1), "1-7");
        assert_eq!(format_range([4]), "4");
        assert_eq!(format_range_dashed([4]), "4-4");
    }

    #[test]
    fn format_empty_is_empty() {
        assert_eq!(format_range(std::iter::empty::<i32>()), "");
    }

    #[test]
    fn malformed_segments_error() {
        assert!(parse_range("1-x").is_err());
        assert!(parse_range("9-3").is_err());
    }

    proptest! {
        #[test]
        fn round_trip(residues in proptest::collection::btree_set(1i32..2000, 0..200)) {
            let emitted = format_range(residues.iter().copied());
            let parsed = parse_range(&emitted).unwrap();
            prop_assert_eq!(parsed, residues);
        }

        #[test]
        fn emission_is_deterministic(residues in proptest::collection::vec(1i32..500, 0..100)) {
            let a = format_range(residues.iter().copied());
            let mut shuffled = residues.clone();
            shuffled.reverse();
            let b = format_range(shuffled);
            prop_assert_eq!(a, b);
        }
    }
}
