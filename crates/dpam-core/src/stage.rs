// crates/dpam-core/src/stage.rs

//! Pipeline stage enumeration.
//!
//! Stages carry their historical numbers (1..=25). Number 14 is a reserved
//! slot with no kernel: the v1 lineage had a duplicate of stage 13 there and
//! the on-disk numbering must stay stable. Stage 25 (PDB emission) exists as
//! an explicit no-op.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One pipeline stage, in execution order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Prepare,
    Hhsearch,
    Foldseek,
    FilterFoldseek,
    MapEcod,
    DaliCandidates,
    IterativeDali,
    AnalyzeDali,
    GetSupport,
    FilterDomains,
    Sse,
    Disorder,
    ParseDomains,
    // Stage 14 is a reserved slot (historical duplicate of 13).
    PrepareDomass,
    RunDomass,
    GetConfident,
    GetMapping,
    GetMergeCandidates,
    ExtractDomains,
    CompareDomains,
    MergeDomains,
    GetPredictions,
    IntegrateResults,
    GeneratePdbs,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Self; 24] = [
        Self::Prepare,
        Self::Hhsearch,
        Self::Foldseek,
        Self::FilterFoldseek,
        Self::MapEcod,
        Self::DaliCandidates,
        Self::IterativeDali,
        Self::AnalyzeDali,
        Self::GetSupport,
        Self::FilterDomains,
        Self::Sse,
        Self::Disorder,
        Self::ParseDomains,
        Self::PrepareDomass,
        Self::RunDomass,
        Self::GetConfident,
        Self::GetMapping,
        Self::GetMergeCandidates,
        Self::ExtractDomains,
        Self::CompareDomains,
        Self::MergeDomains,
        Self::GetPredictions,
        Self::IntegrateResults,
        Self::GeneratePdbs,
    ];

    /// Historical stage number (14 is skipped).
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Prepare => 1,
            Self::Hhsearch => 2,
            Self::Foldseek => 3,
            Self::FilterFoldseek => 4,
            Self::MapEcod => 5,
            Self::DaliCandidates => 6,
            Self::IterativeDali => 7,
            Self::AnalyzeDali => 8,
            Self::GetSupport => 9,
            Self::FilterDomains => 10,
            Self::Sse => 11,
            Self::Disorder => 12,
            Self::ParseDomains => 13,
            Self::PrepareDomass => 15,
            Self::RunDomass => 16,
            Self::GetConfident => 17,
            Self::GetMapping => 18,
            Self::GetMergeCandidates => 19,
            Self::ExtractDomains => 20,
            Self::CompareDomains => 21,
            Self::MergeDomains => 22,
            Self::GetPredictions => 23,
            Self::IntegrateResults => 24,
            Self::GeneratePdbs => 25,
        }
    }

    /// Stable on-disk name, as recorded in checkpoint files.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Prepare => "PREPARE",
            Self::Hhsearch => "HHSEARCH",
            Self::Foldseek => "FOLDSEEK",
            Self::FilterFoldseek => "FILTER_FOLDSEEK",
            Self::MapEcod => "MAP_ECOD",
            Self::DaliCandidates => "DALI_CANDIDATES",
            Self::IterativeDali => "ITERATIVE_DALI",
            Self::AnalyzeDali => "ANALYZE_DALI",
            Self::GetSupport => "GET_SUPPORT",
            Self::FilterDomains => "FILTER_DOMAINS",
            Self::Sse => "SSE",
            Self::Disorder => "DISORDER",
            Self::ParseDomains => "PARSE_DOMAINS",
            Self::PrepareDomass => "PREPARE_DOMASS",
            Self::RunDomass => "RUN_DOMASS",
            Self::GetConfident => "GET_CONFIDENT",
            Self::GetMapping => "GET_MAPPING",
            Self::GetMergeCandidates => "GET_MERGE_CANDIDATES",
            Self::ExtractDomains => "EXTRACT_DOMAINS",
            Self::CompareDomains => "COMPARE_DOMAINS",
            Self::MergeDomains => "MERGE_DOMAINS",
            Self::GetPredictions => "GET_PREDICTIONS",
            Self::IntegrateResults => "INTEGRATE_RESULTS",
            Self::GeneratePdbs => "GENERATE_PDBS",
        }
    }

    /// Critical stages halt the per-protein pipeline on failure: there is no
    /// fallback for a missing homology search, so downstream stages cannot
    /// produce meaningful results.
    #[must_use]
    pub const fn is_critical(self) -> bool {
        matches!(self, Self::Hhsearch | Self::Foldseek | Self::IterativeDali)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage name: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_skip_fourteen() {
        let numbers: Vec<u8> = Stage::ALL.iter().map(|s| s.number()).collect();
        assert!(!numbers.contains(&14));
        assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(numbers.first(), Some(&1));
        assert_eq!(numbers.last(), Some(&25));
    }

    #[test]
    fn names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.name().parse::<Stage>(), Ok(stage));
        }
    }

    #[test]
    fn critical_set() {
        let critical: Vec<Stage> = Stage::ALL.iter().copied().filter(|s| s.is_critical()).collect();
        assert_eq!(
            critical,
            vec![Stage::Hhsearch, Stage::Foldseek, Stage::IterativeDali]
        );
    }

    #[test]
    fn serde_uses_on_disk_names() {
        let json = serde_json::to_string(&Stage::IterativeDali).unwrap();
        assert_eq!(json, "\"ITERATIVE_DALI\"");
        let back: Stage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Stage::IterativeDali);
    }
}
