//! Runner-level behaviour: resume semantics and the critical-step halt.

use dpam_core::Stage;
use dpam_pipeline::{Pipeline, PipelineOptions, PipelineState};
use std::fs;
use std::path::Path;

fn seed_refdata(data_dir: &Path) {
    fs::create_dir_all(data_dir).unwrap();
    fs::write(data_dir.join("ECOD_length"), "000000003 e2rspA1 124\n").unwrap();
    fs::write(data_dir.join("ECOD_norms"), "000000003 27.3\n").unwrap();
    fs::write(data_dir.join("ECOD_pdbmap"), "000000003 2rsp A:1-124\n").unwrap();
    fs::write(
        data_dir.join("ecod.latest.domains"),
        "000000003\te2rspA1\tF\t1.1.2.3\n",
    )
    .unwrap();
}

#[test]
fn fully_completed_protein_resumes_with_zero_dispatches() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    seed_refdata(&data_dir);
    let work = tmp.path().join("work");
    fs::create_dir_all(&work).unwrap();

    // A state claiming everything is done; with no inputs on disk, any
    // dispatched stage would fail, so an unchanged state proves none ran.
    let mut state = PipelineState::new("AF-R1", &work);
    for stage in Stage::ALL {
        state.mark_complete(stage);
    }
    let state_file = work.join(".AF-R1.dpam_state.json");
    state.save(&state_file).unwrap();

    let pipeline = Pipeline::new(
        &work,
        &data_dir,
        PipelineOptions {
            resume: true,
            ..PipelineOptions::default()
        },
        Some(true),
    )
    .unwrap();
    let after = pipeline.run("AF-R1", None).unwrap();
    assert!(after.failed_steps.is_empty());
    assert_eq!(after.completed_steps.len(), Stage::ALL.len());
}

#[test]
fn critical_failure_halts_before_downstream_stages() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    seed_refdata(&data_dir);
    let work = tmp.path().join("work");
    fs::create_dir_all(&work).unwrap();

    // A valid structure lets stage 1 succeed; stage 2 then fails because
    // no HH-suite binaries exist in the test environment.
    fs::write(
        work.join("AF-R2.pdb"),
        "ATOM      1  CA  ALA A   1       1.000   0.000   0.000  1.00  0.00           C\n\
         ATOM      2  CA  ALA A   2       4.000   0.000   0.000  1.00  0.00           C\n\
         TER\nEND\n",
    )
    .unwrap();

    let pipeline = Pipeline::new(
        &work,
        &data_dir,
        PipelineOptions::default(),
        Some(true),
    )
    .unwrap();
    let state = pipeline.run("AF-R2", None).unwrap();

    assert!(state.is_complete(Stage::Prepare));
    assert!(state.failed_steps.contains_key(&Stage::Hhsearch));
    // The halt means nothing downstream was attempted.
    assert_eq!(state.failed_steps.len(), 1);
    assert!(!state.is_complete(Stage::Foldseek));
    assert!(!state.failed_steps.contains_key(&Stage::Foldseek));

    // The checkpoint on disk agrees.
    let on_disk = PipelineState::load(&work.join(".AF-R2.dpam_state.json")).unwrap();
    assert!(on_disk.failed_steps.contains_key(&Stage::Hhsearch));
}

#[test]
fn subset_runs_touch_only_requested_stages() {
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    seed_refdata(&data_dir);
    let work = tmp.path().join("work");
    fs::create_dir_all(&work).unwrap();
    fs::write(
        work.join("AF-R3.pdb"),
        "ATOM      1  CA  ALA A   1       1.000   0.000   0.000  1.00  0.00           C\n\
         TER\nEND\n",
    )
    .unwrap();

    let pipeline = Pipeline::new(
        &work,
        &data_dir,
        PipelineOptions::default(),
        Some(true),
    )
    .unwrap();
    let state = pipeline.run("AF-R3", Some(&[Stage::Prepare])).unwrap();
    assert!(state.is_complete(Stage::Prepare));
    assert_eq!(state.completed_steps.len(), 1);
    assert!(work.join("step01_prepare/AF-R3.pdb").exists());
    assert!(work.join("step01_prepare/AF-R3.fa").exists());
}
