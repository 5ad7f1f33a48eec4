//! Scenario-level checks over real files in temp working directories.
//!
//! Cases:
//! 1) Trivial disordered protein: uniform PAE 10, no surviving hits:
//!    every residue disordered, zero domains out of stage 13.
//! 2) Foldseek filter → candidate union plumbing.
//! 3) Merge reasoning 19 → 22 on a two-domain protein sharing a template.

use dpam_core::PathResolver;
use dpam_refdata::ReferenceData;
use dpam_steps::StepContext;
use std::fs;
use std::path::Path;

fn seed_refdata(data_dir: &Path) {
    fs::create_dir_all(data_dir).unwrap();
    fs::write(
        data_dir.join("ECOD_length"),
        "000000003 e2rspA1 200\n000000007 e1abcA1 85\n",
    )
    .unwrap();
    fs::write(data_dir.join("ECOD_norms"), "000000003 27.3\n000000007 20.0\n").unwrap();
    fs::write(
        data_dir.join("ECOD_pdbmap"),
        "000000003 2rsp A:1-200\n000000007 1abc A:1-85\n",
    )
    .unwrap();
    fs::write(
        data_dir.join("ecod.latest.domains"),
        "000000003\te2rspA1\tF\t1.1.2\tx\n000000007\te1abcA1\tF\t2.3.4\tx\n",
    )
    .unwrap();
    fs::write(data_dir.join("tgroup_length"), "1.1.2 200\n2.3.4 85\n").unwrap();
}

struct Fixture {
    _tmp: tempfile::TempDir,
    resolver: PathResolver,
    refdata: ReferenceData,
    data_dir: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        seed_refdata(&data_dir);
        let refdata = ReferenceData::load(&data_dir).unwrap();
        let resolver = PathResolver::new(tmp.path().join("work"), true);
        fs::create_dir_all(resolver.root()).unwrap();
        Self {
            _tmp: tmp,
            resolver,
            refdata,
            data_dir,
        }
    }

    fn ctx<'a>(&'a self, prefix: &'a str) -> StepContext<'a> {
        StepContext {
            prefix,
            resolver: &self.resolver,
            data_dir: &self.data_dir,
            refdata: &self.refdata,
            cpus: 1,
            skip_addss: true,
            scratch_dir: None,
            dali_workers: None,
        }
    }

    fn stage_path(&self, step: u8, name: &str) -> std::path::PathBuf {
        self.resolver.step_dir(step).unwrap().join(name)
    }
}

/// A synthetic single-atom-per-residue PDB with residues on a line, 3 Å
/// apart.
fn write_linear_pdb(path: &Path, residues: std::ops::RangeInclusive<i32>) {
    let mut body = String::new();
    for (serial, resid) in residues.enumerate() {
        body.push_str(&format!(
            "ATOM  {:>5}  CA  ALA A{:>4}    {:>8.3}{:>8.3}{:>8.3}  1.00  0.00           C\n",
            serial + 1,
            resid,
            f64::from(resid) * 3.0,
            0.0,
            0.0
        ));
    }
    body.push_str("TER\nEND\n");
    fs::write(path, body).unwrap();
}

fn write_uniform_pae(path: &Path, length: usize, value: f64) {
    let row: Vec<String> = (0..length).map(|_| format!("{value}")).collect();
    let rows: Vec<String> = (0..length)
        .map(|_| format!("[{}]", row.join(",")))
        .collect();
    fs::write(
        path,
        format!("{{\"predicted_aligned_error\": [{}]}}", rows.join(",")),
    )
    .unwrap();
}

#[test]
fn trivial_disordered_protein_yields_zero_domains() {
    let fx = Fixture::new();
    let prefix = "AF-T1";
    let length = 60usize;

    // Stage-1 style inputs.
    fs::write(
        fx.stage_path(1, "AF-T1.fa"),
        format!(">{prefix}\n{}\n", "A".repeat(length)),
    )
    .unwrap();
    write_linear_pdb(&fx.stage_path(1, "AF-T1.pdb"), 1..=60);
    write_uniform_pae(&fx.resolver.root().join("AF-T1.json"), length, 10.0);
    // No SSEs at all.
    let sse_body: String = (1..=60).map(|r| format!("{r}\tA\tna\tC\n")).collect();
    fs::write(fx.stage_path(11, "AF-T1.sse"), sse_body).unwrap();
    // No goodDomains file: stage 10 found nothing.

    dpam_steps::disorder::run(&fx.ctx(prefix)).unwrap();
    let diso = fs::read_to_string(fx.stage_path(12, "AF-T1.diso")).unwrap();
    assert_eq!(diso.lines().count(), 60, "all residues disordered");

    dpam_steps::parse_domains::run(&fx.ctx(prefix)).unwrap();
    let domains = fs::read_to_string(fx.stage_path(13, "AF-T1.finalDPAM.domains")).unwrap();
    assert!(domains.is_empty(), "no domains expected, got {domains:?}");
}

#[test]
fn compact_protein_with_low_pae_keeps_one_domain() {
    let fx = Fixture::new();
    let prefix = "AF-T2";
    let length = 100usize;

    fs::write(
        fx.stage_path(1, "AF-T2.fa"),
        format!(">{prefix}\n{}\n", "A".repeat(length)),
    )
    .unwrap();
    write_linear_pdb(&fx.stage_path(1, "AF-T2.pdb"), 1..=100);
    write_uniform_pae(&fx.resolver.root().join("AF-T2.json"), length, 1.0);
    // No disorder file: nothing disordered.

    dpam_steps::parse_domains::run(&fx.ctx(prefix)).unwrap();
    let domains = fs::read_to_string(fx.stage_path(13, "AF-T2.step13_domains")).unwrap();
    let rows: Vec<&str> = domains.lines().collect();
    assert_eq!(rows.len(), 1, "one compact domain, got {rows:?}");
    assert!(rows[0].starts_with("D1\t"));
    // Also copied into results/.
    assert!(fx
        .resolver
        .root()
        .join("results/AF-T2.finalDPAM.domains")
        .exists());
}

#[test]
fn foldseek_filter_feeds_candidate_union() {
    let fx = Fixture::new();
    let prefix = "AF-T3";

    fs::write(
        fx.stage_path(1, "AF-T3.fa"),
        format!(">{prefix}\n{}\n", "A".repeat(120)),
    )
    .unwrap();
    // Three hits: the second re-covers the first's interval (rejected),
    // the third brings a fresh region for a second uid.
    fs::write(
        fx.stage_path(3, "AF-T3.foldseek"),
        "AF-T3\t000000003.pdb\t0.9\t50\t1\t0\t1\t50\t1\t50\t1e-30\t500\n\
         AF-T3\t000000009.pdb\t0.9\t48\t1\t0\t2\t49\t1\t48\t1e-20\t400\n\
         AF-T3\t000000007.pdb\t0.9\t40\t1\t0\t61\t100\t1\t40\t1e-10\t300\n",
    )
    .unwrap();
    dpam_steps::foldseek_filter::run(&fx.ctx(prefix)).unwrap();
    let filtered =
        fs::read_to_string(fx.stage_path(4, "AF-T3.foldseek.flt.result")).unwrap();
    let rows: Vec<&str> = filtered.lines().skip(1).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("000000003\t"));
    assert!(rows[1].starts_with("000000007\t"));

    // Stage-5 output contributes one more uid to the union.
    fs::write(
        fx.stage_path(5, "AF-T3.map2ecod.result"),
        "uid\tecod_domain_id\thh_prob\n000000042\te0042A1\t99.0\n",
    )
    .unwrap();
    dpam_steps::dali_candidates::run(&fx.ctx(prefix)).unwrap();
    let union = fs::read_to_string(fx.stage_path(6, "AF-T3_hits4Dali")).unwrap();
    let uids: Vec<&str> = union.lines().collect();
    assert_eq!(uids, vec!["000000003", "000000007", "000000042"]);
}

#[test]
fn merge_chain_unifies_two_domains_sharing_a_template() {
    let fx = Fixture::new();
    let prefix = "AF-T4";

    // Two stage-13 domains.
    fs::write(
        fx.stage_path(13, "AF-T4.step13_domains"),
        "D1\t10-100\nD2\t120-200\n",
    )
    .unwrap();
    // Both domains confidently hit the same 200-residue template with
    // disjoint template regions.
    fs::write(
        fx.stage_path(18, "AF-T4.step18_mappings"),
        "# domain\tdomain_range\tecod_id\ttgroup\tdpam_prob\tquality\thh\tdali\n\
         D1\t10-100\te2rspA1\t1.1.2\t0.9500\tgood\t1-90\tna\n\
         D2\t120-200\te2rspA1\t1.1.2\t0.9300\tgood\t110-200\tna\n",
    )
    .unwrap();
    dpam_steps::merge_candidates::run(&fx.ctx(prefix)).unwrap();
    let candidates =
        fs::read_to_string(fx.stage_path(19, "AF-T4.step19_merge_candidates")).unwrap();
    assert!(candidates.contains("D1\t10-100\tD2\t120-200"));
    let info = fs::read_to_string(fx.stage_path(19, "AF-T4.step19_merge_info")).unwrap();
    assert!(info.contains("D1,D2\te2rspA1"));

    write_linear_pdb(&fx.stage_path(1, "AF-T4.pdb"), 10..=200);

    dpam_steps::extract_domains::run(&fx.ctx(prefix)).unwrap();
    assert!(fx.stage_path(20, "AF-T4_D1.pdb").exists());
    assert!(fx.stage_path(20, "AF-T4_D2.pdb").exists());

    dpam_steps::compare_domains::run(&fx.ctx(prefix)).unwrap();
    let comparisons =
        fs::read_to_string(fx.stage_path(21, "AF-T4.step21_comparisons")).unwrap();
    let row = comparisons
        .lines()
        .find(|line| line.contains("D1\tD2"))
        .unwrap();
    let judgment: i32 = row.split('\t').nth(3).unwrap().parse().unwrap();
    // The gap between the domains is unstructured, so the last residue of
    // D1 and the first of D2 are adjacent in structured order.
    assert_eq!(judgment, 1, "expected sequence connectivity: {row}");

    dpam_steps::merge_domains::run(&fx.ctx(prefix)).unwrap();
    let merged =
        fs::read_to_string(fx.stage_path(22, "AF-T4.step22_merged_domains")).unwrap();
    assert!(merged.contains("D1,D2\t10-100,120-200"), "{merged}");
}

#[test]
fn confident_filter_labels_single_tgroup_good() {
    let fx = Fixture::new();
    let prefix = "AF-T5";
    fs::write(
        fx.stage_path(16, "AF-T5.step16_predictions"),
        "Domain\tRange\tTgroup\tECOD_ref\tDPAM_prob\n\
         D1\t1-80\t1.1.2\te2rspA1\t0.9100\n\
         D1\t1-80\t2.3.4\te1abcA1\t0.4000\n",
    )
    .unwrap();
    dpam_steps::confident::run(&fx.ctx(prefix)).unwrap();
    let confident =
        fs::read_to_string(fx.stage_path(17, "AF-T5.step17_confident_predictions")).unwrap();
    let rows: Vec<&str> = confident.lines().filter(|l| !l.starts_with('#')).collect();
    // The 0.40 row is below threshold; the survivor is unambiguous.
    assert_eq!(rows.len(), 1);
    assert!(rows[0].ends_with("good"), "{}", rows[0]);
}
