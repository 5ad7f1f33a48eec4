// crates/dpam-steps/src/merge_domains.rs

//! Stage 22: merge connected domains via transitive closure.
//!
//! Pairs with a positive connectivity judgement form an undirected graph;
//! connected components are computed with a union-find over domain ids and
//! each component's residue sets are unioned into one merged range.

use crate::StepContext;
use anyhow::{Context, Result};
use dpam_core::range::{format_range, parse_range};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use tracing::info;

/// Flat union-find over `0..n`.
#[derive(Clone, Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cursor = x;
        while self.parent[cursor] != root {
            let next = self.parent[cursor];
            self.parent[cursor] = root;
            cursor = next;
        }
        root
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Group connected pairs into components of domain names.
#[must_use]
pub fn connected_components(pairs: &[(String, String)]) -> Vec<BTreeSet<String>> {
    let mut names: Vec<String> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for (a, b) in pairs {
        for name in [a, b] {
            if !index.contains_key(name) {
                index.insert(name.clone(), names.len());
                names.push(name.clone());
            }
        }
    }
    let mut dsu = UnionFind::new(names.len());
    for (a, b) in pairs {
        dsu.union(index[a], index[b]);
    }
    let mut components: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for (name, &i) in &index {
        components.entry(dsu.find(i)).or_default().insert(name.clone());
    }
    components.into_values().collect()
}

/// Run stage 22.
///
/// # Errors
/// Returns an error on I/O failure; a missing comparisons file means
/// nothing to merge.
pub fn run(ctx: &StepContext<'_>) -> Result<()> {
    let comparisons = ctx.stage_file(21, ".step21_comparisons")?;
    if !comparisons.exists() {
        info!(prefix = ctx.prefix, "no comparisons; nothing to merge");
        return Ok(());
    }

    let mut domain_resids: BTreeMap<String, BTreeSet<i32>> = BTreeMap::new();
    let mut pairs: Vec<(String, String)> = Vec::new();
    for line in fs::read_to_string(&comparisons)?.lines() {
        if line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 6 {
            continue;
        }
        let Ok(judgment) = parts[3].parse::<i32>() else {
            continue;
        };
        if judgment <= 0 {
            continue;
        }
        let (domain1, domain2) = (parts[1].to_owned(), parts[2].to_owned());
        domain_resids
            .entry(domain1.clone())
            .or_insert(parse_range(parts[4])?);
        domain_resids
            .entry(domain2.clone())
            .or_insert(parse_range(parts[5])?);
        pairs.push((domain1, domain2));
    }

    if pairs.is_empty() {
        info!(prefix = ctx.prefix, "no validated pairs; nothing to merge");
        return Ok(());
    }

    let components = connected_components(&pairs);
    let output = ctx.stage_file(22, ".step22_merged_domains")?;
    let mut out = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    writeln!(out, "# protein\tmerged_domains\tmerged_range")?;
    for component in &components {
        let mut merged: BTreeSet<i32> = BTreeSet::new();
        for domain in component {
            if let Some(residues) = domain_resids.get(domain) {
                merged.extend(residues.iter().copied());
            }
        }
        let names: Vec<&str> = component.iter().map(String::as_str).collect();
        writeln!(
            out,
            "{}\t{}\t{}",
            ctx.prefix,
            names.join(","),
            format_range(merged)
        )?;
    }
    out.flush()?;
    info!(prefix = ctx.prefix, components = components.len(), "domains merged");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: &str, b: &str) -> (String, String) {
        (a.to_owned(), b.to_owned())
    }

    #[test]
    fn transitive_chains_collapse() {
        let components =
            connected_components(&[pair("D1", "D2"), pair("D2", "D3"), pair("D4", "D5")]);
        assert_eq!(components.len(), 2);
        let first: BTreeSet<String> =
            ["D1", "D2", "D3"].iter().map(|s| (*s).to_owned()).collect();
        assert!(components.contains(&first));
    }

    #[test]
    fn union_find_path_compression() {
        let mut dsu = UnionFind::new(5);
        dsu.union(0, 1);
        dsu.union(1, 2);
        dsu.union(3, 4);
        assert_eq!(dsu.find(2), dsu.find(0));
        assert_ne!(dsu.find(2), dsu.find(4));
    }
}
