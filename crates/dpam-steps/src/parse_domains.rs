// crates/dpam-steps/src/parse_domains.rs

//! Stage 13: parse domains.
//!
//! Four evidence channels are folded into one per-residue-pair probability:
//! minimum inter-atom distance, PAE, aggregated HHsearch probability, and
//! aggregated DALI z (each via a fixed bin table, combined as the geometric
//! mean of the four). The sequence is swept into 5-residue chunks (minus
//! disorder), chunk pairs above 0.64 mean probability are processed in
//! descending order, and clusters grow under a comparator that biases
//! towards keeping clusters apart unless the candidate clearly belongs
//! (`μ_inter * 1.1 ≥ μ_intra`). Gap filling and overlap removal then turn
//! clusters into final domains.
//!
//! Bin lookups and the `* 1.1` comparator are computed in f64 with plain
//! left-to-right accumulation; the clustering is order-sensitive and the
//! edge sort must stay stable.

use crate::hits::GoodDomains;
use crate::StepContext;
use anyhow::{bail, Context, Result};
use dpam_core::pae::PaeMatrix;
use dpam_core::range::{format_range, mean_residue, parse_range};
use dpam_core::{fasta, pdb};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use tracing::info;

const CHUNK: i32 = 5;
const EDGE_THRESHOLD: f64 = 0.64;
const MERGE_BIAS: f64 = 1.1;
const MIN_CLUSTER_RESIDUES: usize = 20;
const MIN_DOMAIN_RESIDUES: usize = 25;

/// Distance-channel probability (22 buckets).
#[must_use]
pub fn pdb_distance_prob(dist: f64) -> f64 {
    const THRESHOLDS: [(f64, f64); 21] = [
        (3.0, 0.95),
        (6.0, 0.94),
        (9.0, 0.93),
        (12.0, 0.91),
        (15.0, 0.89),
        (18.0, 0.85),
        (21.0, 0.81),
        (24.0, 0.77),
        (27.0, 0.71),
        (30.0, 0.66),
        (35.0, 0.58),
        (40.0, 0.48),
        (45.0, 0.40),
        (50.0, 0.33),
        (55.0, 0.28),
        (60.0, 0.24),
        (70.0, 0.22),
        (80.0, 0.20),
        (120.0, 0.19),
        (160.0, 0.15),
        (200.0, 0.10),
    ];
    for (threshold, prob) in THRESHOLDS {
        if dist <= threshold {
            return prob;
        }
    }
    0.06
}

/// PAE-channel probability (21 buckets).
#[must_use]
pub fn pae_prob(error: f64) -> f64 {
    const THRESHOLDS: [(f64, f64); 20] = [
        (1.0, 0.97),
        (2.0, 0.89),
        (3.0, 0.77),
        (4.0, 0.67),
        (5.0, 0.61),
        (6.0, 0.57),
        (7.0, 0.54),
        (8.0, 0.52),
        (9.0, 0.50),
        (10.0, 0.48),
        (11.0, 0.47),
        (12.0, 0.45),
        (14.0, 0.44),
        (16.0, 0.42),
        (18.0, 0.41),
        (20.0, 0.39),
        (22.0, 0.37),
        (24.0, 0.32),
        (26.0, 0.25),
        (28.0, 0.16),
    ];
    for (threshold, prob) in THRESHOLDS {
        if error <= threshold {
            return prob;
        }
    }
    0.11
}

/// HHsearch-channel probability from the aggregated score.
#[must_use]
pub fn hhsearch_prob(score: f64) -> f64 {
    if score >= 180.0 {
        0.98
    } else if score >= 160.0 {
        0.94
    } else if score >= 140.0 {
        0.92
    } else if score >= 120.0 {
        0.88
    } else if score >= 110.0 {
        0.87
    } else if score >= 100.0 {
        0.81
    } else if score >= 50.0 {
        0.76
    } else {
        0.50
    }
}

/// DALI-channel probability from the aggregated z.
#[must_use]
pub fn dali_prob(z: f64) -> f64 {
    const THRESHOLDS: [(f64, f64); 17] = [
        (35.0, 0.95),
        (25.0, 0.94),
        (20.0, 0.93),
        (18.0, 0.90),
        (16.0, 0.87),
        (14.0, 0.85),
        (12.0, 0.80),
        (11.0, 0.77),
        (10.0, 0.74),
        (9.0, 0.71),
        (8.0, 0.68),
        (7.0, 0.63),
        (6.0, 0.60),
        (5.0, 0.57),
        (4.0, 0.54),
        (3.0, 0.53),
        (2.0, 0.52),
    ];
    for (threshold, prob) in THRESHOLDS {
        if z >= threshold {
            return prob;
        }
    }
    0.50
}

/// Collapse a pair's HHsearch score list: `max + 10*count - 10` up to ten
/// observations, `max + 100` beyond. No evidence defaults to 20.
#[must_use]
pub fn aggregate_hh_scores(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 20.0;
    }
    let max = scores.iter().copied().fold(f64::MIN, f64::max);
    if scores.len() > 10 {
        max + 100.0
    } else {
        max + scores.len() as f64 * 10.0 - 10.0
    }
}

/// Collapse a pair's DALI z list: `max + count - 1` up to five
/// observations, `max + 5` beyond. No evidence defaults to 1.
#[must_use]
pub fn aggregate_dali_scores(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 1.0;
    }
    let max = scores.iter().copied().fold(f64::MIN, f64::max);
    if scores.len() > 5 {
        max + 5.0
    } else {
        max + scores.len() as f64 - 1.0
    }
}

/// Pairwise probability lookup; `p = 0` for pairs with no entry.
#[derive(Debug, Default)]
pub struct ProbabilityMatrix {
    entries: HashMap<(i32, i32), f64>,
}

impl ProbabilityMatrix {
    /// Combined probability for a pair (orientation-free).
    #[must_use]
    pub fn get(&self, res1: i32, res2: i32) -> f64 {
        if res1 == res2 {
            return 1.0;
        }
        let key = (res1.min(res2), res1.max(res2));
        self.entries.get(&key).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build the combined probability matrix. Only pairs with both coordinates
/// and a PAE entry are present; HHsearch and DALI evidence always
/// contributes, via its default when a pair has none.
#[must_use]
pub fn probability_matrix(
    length: i32,
    coords: &BTreeMap<i32, Vec<[f64; 3]>>,
    pae: &PaeMatrix,
    hh_scores: &HashMap<(i32, i32), Vec<f64>>,
    dali_scores: &HashMap<(i32, i32), Vec<f64>>,
) -> ProbabilityMatrix {
    let hh_agg: HashMap<(i32, i32), f64> = hh_scores
        .iter()
        .map(|(&key, scores)| (key, aggregate_hh_scores(scores)))
        .collect();
    let dali_agg: HashMap<(i32, i32), f64> = dali_scores
        .iter()
        .map(|(&key, scores)| (key, aggregate_dali_scores(scores)))
        .collect();

    let mut entries = HashMap::new();
    for res1 in 1..=length {
        let Some(coords1) = coords.get(&res1) else {
            continue;
        };
        for res2 in (res1 + 1)..=length {
            let Some(coords2) = coords.get(&res2) else {
                continue;
            };
            let Some(error) = pae.get(res1, res2) else {
                continue;
            };
            let key = (res1, res2);
            let p_dist = pdb_distance_prob(pdb::min_distance(coords1, coords2));
            let p_pae = pae_prob(error);
            let p_hh = hhsearch_prob(hh_agg.get(&key).copied().unwrap_or(20.0));
            let p_dali = dali_prob(dali_agg.get(&key).copied().unwrap_or(1.0));
            entries.insert(key, (p_dist * p_pae * p_hh * p_dali).powf(0.25));
        }
    }
    ProbabilityMatrix { entries }
}

/// Per-pair evidence lists from the stage-10 good domains.
#[must_use]
pub fn evidence_scores(
    good: &GoodDomains,
) -> (HashMap<(i32, i32), Vec<f64>>, HashMap<(i32, i32), Vec<f64>>) {
    let mut hh: HashMap<(i32, i32), Vec<f64>> = HashMap::new();
    for hit in &good.sequence {
        let residues: Vec<i32> = parse_range(&hit.query_range)
            .unwrap_or_default()
            .into_iter()
            .collect();
        for (i, &res1) in residues.iter().enumerate() {
            for &res2 in &residues[i + 1..] {
                hh.entry((res1, res2)).or_default().push(hit.probability);
            }
        }
    }
    let mut dali: HashMap<(i32, i32), Vec<f64>> = HashMap::new();
    for hit in &good.structure {
        let residues: Vec<i32> = parse_range(&hit.query_range)
            .unwrap_or_default()
            .into_iter()
            .collect();
        for (i, &res1) in residues.iter().enumerate() {
            for &res2 in &residues[i + 1..] {
                dali.entry((res1, res2)).or_default().push(hit.zscore);
            }
        }
    }
    (hh, dali)
}

/// Sweep the sequence in 5-residue chunks, dropping disordered residues;
/// chunks keeping at least 3 residues survive.
#[must_use]
pub fn initial_segmentation(length: i32, disorder: &BTreeSet<i32>) -> Vec<Vec<i32>> {
    let mut chunks = Vec::new();
    let mut start = 1;
    while start <= length {
        let chunk: Vec<i32> = (start..=(start + CHUNK - 1).min(length))
            .filter(|res| !disorder.contains(res))
            .collect();
        if chunk.len() >= 3 {
            chunks.push(chunk);
        }
        start += CHUNK;
    }
    chunks
}

/// Cluster chunks by between-chunk mean probability.
///
/// Returns residue lists ordered by ascending mean residue; clusters under
/// 20 residues are dropped.
#[must_use]
pub fn cluster_segments(chunks: &[Vec<i32>], probs: &ProbabilityMatrix) -> Vec<Vec<i32>> {
    let n = chunks.len();
    // Between-chunk pair statistics, restricted to pairs more than five
    // residues apart in sequence.
    let mut pair_count: HashMap<(usize, usize), f64> = HashMap::new();
    let mut pair_total: HashMap<(usize, usize), f64> = HashMap::new();
    let mut edges: Vec<(usize, usize, f64)> = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let mut count = 0.0f64;
            let mut total = 0.0f64;
            for &ri in &chunks[i] {
                for &rj in &chunks[j] {
                    if ri + 5 < rj {
                        count += 1.0;
                        total += probs.get(ri, rj);
                    }
                }
            }
            pair_count.insert((i, j), count);
            pair_total.insert((i, j), total);
            if count > 0.0 {
                let mean = total / count;
                if mean > EDGE_THRESHOLD {
                    edges.push((i, j, mean));
                }
            }
        }
    }
    // Descending mean; the sort is stable so ties keep (i, j) order.
    edges.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let count_of = |a: usize, b: usize| -> f64 {
        let key = (a.min(b), a.max(b));
        pair_count.get(&key).copied().unwrap_or(0.0)
    };
    let total_of = |a: usize, b: usize| -> f64 {
        let key = (a.min(b), a.max(b));
        pair_total.get(&key).copied().unwrap_or(0.0)
    };
    let intra = |cluster: &BTreeSet<usize>| -> (f64, f64) {
        let mut count = 0.0;
        let mut total = 0.0;
        for &a in cluster {
            for &b in cluster {
                if a < b {
                    count += count_of(a, b);
                    total += total_of(a, b);
                }
            }
        }
        (count, total)
    };

    let mut clusters: Vec<BTreeSet<usize>> = Vec::new();
    for &(seg_i, seg_j, _) in &edges {
        if clusters.is_empty() {
            clusters.push(BTreeSet::from([seg_i, seg_j]));
            continue;
        }
        let mut done = false;
        let mut candidates: Vec<usize> = Vec::new();
        for (index, cluster) in clusters.iter().enumerate() {
            let has_i = cluster.contains(&seg_i);
            let has_j = cluster.contains(&seg_j);
            if has_i && has_j {
                done = true;
            } else if has_i || has_j {
                candidates.push(index);
            }
        }
        if done {
            continue;
        }
        match candidates.len() {
            2 => {
                let (count1, total1) = intra(&clusters[candidates[0]]);
                let (count2, total2) = intra(&clusters[candidates[1]]);
                let mut inter_count = 0.0;
                let mut inter_total = 0.0;
                for &a in &clusters[candidates[0]] {
                    for &b in &clusters[candidates[1]] {
                        inter_count += count_of(a, b);
                        inter_total += total_of(a, b);
                    }
                }
                let merge = if count1 <= 20.0 || count2 <= 20.0 {
                    true
                } else {
                    let intra1 = if count1 > 0.0 { total1 / count1 } else { 0.0 };
                    let intra2 = if count2 > 0.0 { total2 / count2 } else { 0.0 };
                    let inter = if inter_count > 0.0 {
                        inter_total / inter_count
                    } else {
                        0.0
                    };
                    inter * MERGE_BIAS >= intra1 || inter * MERGE_BIAS >= intra2
                };
                if merge {
                    let mut merged = BTreeSet::new();
                    let mut rest = Vec::new();
                    for (index, cluster) in clusters.into_iter().enumerate() {
                        if candidates.contains(&index) {
                            merged.extend(cluster);
                        } else {
                            rest.push(cluster);
                        }
                    }
                    rest.push(merged);
                    clusters = rest;
                }
            }
            1 => {
                let home = candidates[0];
                let (intra_count, intra_total) = intra(&clusters[home]);
                let newcomer = if clusters[home].contains(&seg_i) {
                    seg_j
                } else {
                    seg_i
                };
                let mut inter_count = 0.0;
                let mut inter_total = 0.0;
                for &member in &clusters[home] {
                    if member != newcomer {
                        inter_count += count_of(member, newcomer);
                        inter_total += total_of(member, newcomer);
                    }
                }
                // The attach test keys on the intra probability *sum*, the
                // two-cluster test on pair counts.
                let merge = if intra_total <= 20.0 {
                    true
                } else {
                    let intra_mean = if intra_count > 0.0 {
                        intra_total / intra_count
                    } else {
                        0.0
                    };
                    let inter_mean = if inter_count > 0.0 {
                        inter_total / inter_count
                    } else {
                        0.0
                    };
                    inter_mean * MERGE_BIAS >= intra_mean
                };
                if merge {
                    clusters[home].insert(seg_i);
                    clusters[home].insert(seg_j);
                }
            }
            _ => clusters.push(BTreeSet::from([seg_i, seg_j])),
        }
    }

    let mut with_means: Vec<(Vec<i32>, f64)> = clusters
        .iter()
        .map(|cluster| {
            let residues: BTreeSet<i32> = cluster
                .iter()
                .flat_map(|&index| chunks[index].iter().copied())
                .collect();
            let mean = mean_residue(&residues);
            (residues.into_iter().collect(), mean)
        })
        .filter(|(residues, _): &(Vec<i32>, f64)| !residues.is_empty())
        .collect();
    with_means.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    with_means
        .into_iter()
        .map(|(residues, _)| residues)
        .filter(|residues| residues.len() >= MIN_CLUSTER_RESIDUES)
        .collect()
}

/// Gap filling (v0 → v1): between consecutive runs of one domain, a gap is
/// filled iff it spans at most 10 residues, or at most 20 of which at most
/// 10 belong to any domain.
#[must_use]
pub fn fill_gaps(domains: &[Vec<i32>], all_domain_resids: &BTreeSet<i32>) -> Vec<Vec<i32>> {
    domains
        .iter()
        .map(|domain| {
            let set: BTreeSet<i32> = domain.iter().copied().collect();
            let runs = dpam_core::range::segment_runs(&set, 1);
            let mut filled: Vec<i32> = Vec::new();
            for (index, &(start, end)) in runs.iter().enumerate() {
                if index > 0 {
                    let gap_start = runs[index - 1].1 + 1;
                    let gap: Vec<i32> = (gap_start..start).collect();
                    let in_domains =
                        gap.iter().filter(|res| all_domain_resids.contains(res)).count();
                    let fill = gap.len() <= 10 || (gap.len() <= 20 && in_domains <= 10);
                    if fill {
                        filled.extend(gap);
                    }
                }
                filled.extend(start..=end);
            }
            filled
        })
        .collect()
}

/// Overlap removal (v1 → v2): a run survives iff it holds at least 10
/// residues unique to its domain; and then survives whole; domains under
/// 25 residues are discarded.
#[must_use]
pub fn remove_overlaps(domains: &[Vec<i32>]) -> Vec<Vec<i32>> {
    let mut cleaned = Vec::new();
    for (index, domain) in domains.iter().enumerate() {
        let mut others: BTreeSet<i32> = BTreeSet::new();
        for (other_index, other) in domains.iter().enumerate() {
            if other_index != index {
                others.extend(other.iter().copied());
            }
        }
        let set: BTreeSet<i32> = domain.iter().copied().collect();
        let mut survivor: Vec<i32> = Vec::new();
        for (start, end) in dpam_core::range::segment_runs(&set, 1) {
            let unique = (start..=end).filter(|res| !others.contains(res)).count();
            if unique >= 10 {
                survivor.extend(start..=end);
            }
        }
        if survivor.len() >= MIN_DOMAIN_RESIDUES {
            cleaned.push(survivor);
        }
    }
    cleaned
}

/// Run stage 13.
///
/// # Errors
/// Returns an error when the sequence, structure, or PAE input is missing.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let fa = ctx.stage_file(1, ".fa")?;
    let pdb_file = ctx.stage_file(1, ".pdb")?;
    let json_file = ctx.root_file(".json");
    for required in [&fa, &pdb_file, &json_file] {
        if !required.exists() {
            bail!("required input not found: {}", required.display());
        }
    }
    let (_, sequence) = fasta::read_fasta(&fa)?;
    let length = sequence.len() as i32;

    let disorder = load_disorder(ctx)?;
    let coords = pdb::read_coords(&pdb_file)?;
    let pae = PaeMatrix::load(&json_file)?;
    let good = GoodDomains::read(&ctx.stage_file(10, ".goodDomains")?)?;
    let (hh_scores, dali_scores) = evidence_scores(&good);

    info!(
        prefix = ctx.prefix,
        length,
        disordered = disorder.len(),
        hh_pairs = hh_scores.len(),
        dali_pairs = dali_scores.len(),
        "computing probability matrix"
    );
    let probs = probability_matrix(length, &coords, &pae, &hh_scores, &dali_scores);
    info!(prefix = ctx.prefix, pairs = probs.len(), "probability matrix ready");

    let chunks = initial_segmentation(length, &disorder);
    let clusters = cluster_segments(&chunks, &probs);
    info!(
        prefix = ctx.prefix,
        chunks = chunks.len(),
        clusters = clusters.len(),
        "segments clustered"
    );

    let all_resids: BTreeSet<i32> = clusters.iter().flatten().copied().collect();
    let filled = fill_gaps(&clusters, &all_resids);
    let final_domains = remove_overlaps(&filled);
    info!(prefix = ctx.prefix, domains = final_domains.len(), "domains parsed");

    let mut body = String::new();
    for (index, domain) in final_domains.iter().enumerate() {
        body.push_str(&format!(
            "D{}\t{}\n",
            index + 1,
            format_range(domain.iter().copied())
        ));
    }
    let step13_dir = ctx.resolver.step_dir(13)?;
    let results_dir = ctx.resolver.results_dir()?;
    for path in [
        step13_dir.join(format!("{}.finalDPAM.domains", ctx.prefix)),
        step13_dir.join(format!("{}.step13_domains", ctx.prefix)),
        results_dir.join(format!("{}.finalDPAM.domains", ctx.prefix)),
    ] {
        fs::write(&path, &body).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn load_disorder(ctx: &StepContext<'_>) -> Result<BTreeSet<i32>> {
    let path = ctx.stage_file(12, ".diso")?;
    let mut disorder = BTreeSet::new();
    if !path.exists() {
        return Ok(disorder);
    }
    for line in fs::read_to_string(&path)?.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let resid: i32 = line
            .parse()
            .with_context(|| format!("bad disorder residue {line:?}"))?;
        disorder.insert(resid);
    }
    Ok(disorder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_bucket_boundaries() {
        assert_eq!(pdb_distance_prob(3.0), 0.95);
        assert_eq!(pdb_distance_prob(3.0001), 0.94);
        assert_eq!(pdb_distance_prob(250.0), 0.06);
    }

    #[test]
    fn pae_bucket_boundaries() {
        assert_eq!(pae_prob(1.0), 0.97);
        assert_eq!(pae_prob(1.0001), 0.89);
        assert_eq!(pae_prob(40.0), 0.11);
    }

    #[test]
    fn score_channel_boundaries() {
        assert_eq!(hhsearch_prob(180.0), 0.98);
        assert_eq!(hhsearch_prob(49.9), 0.50);
        assert_eq!(dali_prob(35.0), 0.95);
        assert_eq!(dali_prob(1.9), 0.50);
    }

    #[test]
    fn aggregation_rules() {
        assert_eq!(aggregate_hh_scores(&[]), 20.0);
        assert_eq!(aggregate_hh_scores(&[90.0]), 90.0);
        assert_eq!(aggregate_hh_scores(&[90.0, 80.0]), 100.0);
        assert_eq!(aggregate_hh_scores(&[50.0; 11]), 150.0);
        assert_eq!(aggregate_dali_scores(&[]), 1.0);
        assert_eq!(aggregate_dali_scores(&[8.0, 6.0]), 9.0);
        assert_eq!(aggregate_dali_scores(&[8.0; 6]), 13.0);
    }

    #[test]
    fn segmentation_produces_ceil_length_over_five_chunks() {
        let chunks = initial_segmentation(60, &BTreeSet::new());
        assert_eq!(chunks.len(), 12);
        assert_eq!(chunks[0], vec![1, 2, 3, 4, 5]);
        assert_eq!(chunks[11], vec![56, 57, 58, 59, 60]);
        // A 62-residue protein leaves a 2-residue tail that is dropped.
        let chunks = initial_segmentation(62, &BTreeSet::new());
        assert_eq!(chunks.len(), 12);
        // 63 keeps the 3-residue tail.
        let chunks = initial_segmentation(63, &BTreeSet::new());
        assert_eq!(chunks.len(), 13);
    }

    #[test]
    fn disorder_is_excluded_from_chunks() {
        let disorder: BTreeSet<i32> = [1, 2, 3].into_iter().collect();
        let chunks = initial_segmentation(10, &disorder);
        // First chunk keeps only 4-5: dropped; second chunk survives.
        assert_eq!(chunks, vec![vec![6, 7, 8, 9, 10]]);
    }

    /// Synthetic two-block probability matrix: residues within a block
    /// cohere (p = 0.85), across blocks they do not (p = 0.2).
    fn two_block_matrix(length: i32, split: i32) -> ProbabilityMatrix {
        let mut entries = HashMap::new();
        for res1 in 1..=length {
            for res2 in (res1 + 1)..=length {
                let same = (res1 <= split) == (res2 <= split);
                entries.insert((res1, res2), if same { 0.85 } else { 0.2 });
            }
        }
        ProbabilityMatrix { entries }
    }

    #[test]
    fn single_block_clusters_into_one_domain() {
        let probs = two_block_matrix(100, 100);
        let chunks = initial_segmentation(100, &BTreeSet::new());
        let clusters = cluster_segments(&chunks, &probs);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 100);
    }

    #[test]
    fn two_blocks_stay_apart() {
        let probs = two_block_matrix(200, 100);
        let chunks = initial_segmentation(200, &BTreeSet::new());
        let clusters = cluster_segments(&chunks, &probs);
        assert_eq!(clusters.len(), 2);
        assert!(clusters[0].iter().all(|&res| res <= 100));
        assert!(clusters[1].iter().all(|&res| res > 100));
    }

    #[test]
    fn clusters_sort_by_mean_residue() {
        let probs = two_block_matrix(200, 100);
        let chunks = initial_segmentation(200, &BTreeSet::new());
        let clusters = cluster_segments(&chunks, &probs);
        let mean0: f64 = clusters[0].iter().map(|&r| f64::from(r)).sum::<f64>()
            / clusters[0].len() as f64;
        let mean1: f64 = clusters[1].iter().map(|&r| f64::from(r)).sum::<f64>()
            / clusters[1].len() as f64;
        assert!(mean0 < mean1);
    }

    #[test]
    fn small_gaps_fill_and_large_gaps_respect_other_domains() {
        let domain: Vec<i32> = (1..=30).chain(41..=60).collect();
        let all: BTreeSet<i32> = domain.iter().copied().collect();
        let filled = fill_gaps(&[domain.clone()], &all);
        // Gap 31..=40 spans 10: always filled.
        assert!(filled[0].contains(&35));

        let wide: Vec<i32> = (1..=30).chain(46..=70).collect();
        let mut all: BTreeSet<i32> = wide.iter().copied().collect();
        // 15-residue gap with 11 residues claimed by another domain.
        all.extend(31..=41);
        let filled = fill_gaps(&[wide.clone()], &all);
        assert!(!filled[0].contains(&35));
        // Same gap with 10 claimed residues fills.
        let mut all: BTreeSet<i32> = wide.iter().copied().collect();
        all.extend(31..=40);
        let filled = fill_gaps(&[wide], &all);
        assert!(filled[0].contains(&35));
    }

    #[test]
    fn overlap_removal_keeps_whole_runs_and_drops_small_domains() {
        let a: Vec<i32> = (1..=50).collect();
        // b is swallowed by a: neither of its runs has 10 unique residues.
        let b: Vec<i32> = (1..=25).chain(41..=46).collect();
        let cleaned = remove_overlaps(&[a.clone(), b]);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0], a);
    }

    #[test]
    fn kept_runs_keep_their_shared_residues() {
        // a: 1..=40. b: 30..=70; b's run has 30 unique residues (41..=70)
        // so the whole run survives, shared residues included.
        let a: Vec<i32> = (1..=40).collect();
        let b: Vec<i32> = (30..=70).collect();
        let cleaned = remove_overlaps(&[a, b]);
        assert_eq!(cleaned.len(), 2);
        assert!(cleaned[1].contains(&30));
    }

    #[test]
    fn twenty_five_residue_domain_survives_and_twenty_four_does_not() {
        let a: Vec<i32> = (1..=25).collect();
        assert_eq!(remove_overlaps(&[a]).len(), 1);
        let b: Vec<i32> = (1..=24).collect();
        assert!(remove_overlaps(&[b]).is_empty());
    }
}
