//! Experiment store integration tests
//!
//! Exercise the on-disk layout through the public API only: slugs, lookup
//! across studies, status lifecycle and config snapshots.

mod common;

use std::fs;

use common::{store, FixedSha, SHA};
use ox_lab::experiment::RunStart;
use ox_lab::{Config, Error, ExperimentStore, Status};
use serde_json::json;

// =============================================================================
// Studies
// =============================================================================

#[test]
fn test_create_study_writes_readme() {
    let (tmp, store) = store();
    let study = store.create_study("Sparse Attention").unwrap();

    assert_eq!(study.slug(), "sparse-attention");
    assert_eq!(study.name(), "Sparse Attention");
    let readme = fs::read_to_string(tmp.path().join("studies/sparse-attention/README.md")).unwrap();
    assert!(readme.starts_with("# Sparse Attention"));
}

#[test]
fn test_duplicate_study_conflicts() {
    let (_tmp, store) = store();
    store.create_study("Sparse Attention").unwrap();
    let err = store.create_study("sparse attention").unwrap_err();
    assert!(matches!(err, Error::Conflict { kind: "Study", ref slug } if slug == "sparse-attention"));
}

#[test]
fn test_studies_sorted_and_named_from_readme() {
    let (_tmp, store) = store();
    store.create_study("Zeta").unwrap();
    store.create_study("Alpha Beta").unwrap();

    let studies = store.studies().unwrap();
    let slugs: Vec<_> = studies.iter().map(|s| s.slug()).collect();
    assert_eq!(slugs, ["alpha-beta", "zeta"]);
    assert_eq!(store.study("alpha-beta").unwrap().name(), "Alpha Beta");
}

#[test]
fn test_study_readme_missing_or_unreadable() {
    let (tmp, store) = store();
    store.create_study("Sparse Attention").unwrap();
    let readme = tmp.path().join("studies/sparse-attention/README.md");

    fs::remove_file(&readme).unwrap();
    assert_eq!(store.study("sparse-attention").unwrap().name(), "sparse-attention");

    fs::create_dir(&readme).unwrap();
    assert!(matches!(store.study("sparse-attention"), Err(Error::Io(_))));
    assert!(store.studies().is_err());
}

#[test]
fn test_unknown_study_not_found() {
    let (_tmp, store) = store();
    assert!(matches!(
        store.study("missing"),
        Err(Error::NotFound { kind: "Study", .. })
    ));
    assert!(matches!(
        store.create_experiment("missing", "baseline", &[] as &[&str]),
        Err(Error::NotFound { kind: "Study", .. })
    ));
}

// =============================================================================
// Experiments
// =============================================================================

#[test]
fn test_create_experiment_records_metadata() {
    let (tmp, store) = store();
    store.create_study("sparse").unwrap();
    let exp = store
        .create_experiment("sparse", "Baseline Run", &["ablation", "gpu"])
        .unwrap();

    assert_eq!(exp.slug(), "baseline-run");
    assert_eq!(exp.study(), "sparse");
    assert_eq!(exp.status(), Status::Created);
    assert_eq!(exp.git_sha(), Some(SHA));
    assert_eq!(exp.tags(), ["ablation", "gpu"]);
    assert_eq!(exp.created_at(), exp.updated_at());

    let dir = tmp.path().join("studies/sparse/experiments/baseline-run");
    assert!(dir.join("experiment.json").is_file());
    assert!(dir.join("config.yaml").is_file());
    assert!(fs::read_to_string(dir.join("NOTES.md"))
        .unwrap()
        .starts_with("# Baseline Run"));

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("experiment.json")).unwrap()).unwrap();
    assert_eq!(raw["status"], json!("created"));
    assert_eq!(raw["study"], json!("sparse"));
}

#[test]
fn test_slugs_unique_across_studies() {
    let (_tmp, store) = store();
    store.create_study("a").unwrap();
    store.create_study("b").unwrap();

    let first = store.create_experiment("a", "baseline", &[] as &[&str]).unwrap();
    let second = store.create_experiment("b", "baseline", &[] as &[&str]).unwrap();
    let third = store.create_experiment("a", "Baseline", &[] as &[&str]).unwrap();

    assert_eq!(first.slug(), "baseline");
    assert_eq!(second.slug(), "baseline-2");
    assert_eq!(third.slug(), "baseline-3");
    assert_eq!(store.load("baseline-2").unwrap().study(), "b");
}

#[test]
fn test_no_git_sha_outside_commits() {
    let (tmp, _) = store();
    let store = ExperimentStore::with_vcs(tmp.path(), FixedSha(None));
    store.create_study("s").unwrap();
    let exp = store.create_experiment("s", "e", &[] as &[&str]).unwrap();
    assert_eq!(exp.git_sha(), None);
}

#[test]
fn test_ambiguous_slug_reported() {
    let (tmp, store) = store();
    store.create_study("a").unwrap();
    store.create_study("b").unwrap();
    store.create_experiment("a", "dup", &[] as &[&str]).unwrap();

    // Hand-copied directory: the store itself never produces this.
    let src = tmp.path().join("studies/a/experiments/dup");
    let dst = tmp.path().join("studies/b/experiments/dup");
    fs::create_dir_all(&dst).unwrap();
    for file in ["experiment.json", "config.yaml"] {
        fs::copy(src.join(file), dst.join(file)).unwrap();
    }

    match store.load("dup").unwrap_err() {
        Error::Ambiguity { slug, studies } => {
            assert_eq!(slug, "dup");
            assert_eq!(studies, ["a", "b"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_list_skips_malformed_records() {
    let (tmp, store) = store();
    store.create_study("s").unwrap();
    store.create_experiment("s", "good", &[] as &[&str]).unwrap();
    store.create_experiment("s", "bad", &[] as &[&str]).unwrap();
    fs::write(
        tmp.path().join("studies/s/experiments/bad/experiment.json"),
        "{ not json",
    )
    .unwrap();

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].slug(), "good");
}

#[test]
fn test_list_ignores_stray_files() {
    let (tmp, store) = store();
    store.create_study("s").unwrap();
    store.create_experiment("s", "e", &[] as &[&str]).unwrap();
    fs::write(tmp.path().join("studies/s/experiments/.DS_Store"), "").unwrap();
    fs::create_dir_all(tmp.path().join("studies/s/experiments/empty")).unwrap();

    assert_eq!(store.list().unwrap().len(), 1);
}

// =============================================================================
// Status lifecycle
// =============================================================================

fn start<'a>(retry: bool) -> RunStart<'a> {
    RunStart {
        retry,
        command: "ox run train --experiment e",
        run_id: "e",
    }
}

#[test]
fn test_happy_path_lifecycle() {
    let (_tmp, store) = store();
    store.create_study("s").unwrap();
    let created = store.create_experiment("s", "e", &[] as &[&str]).unwrap();

    let running = store.begin_run("e", &start(false)).unwrap();
    assert_eq!(running.status(), Status::Running);
    assert_eq!(running.command(), Some("ox run train --experiment e"));
    assert_eq!(running.tracker_run_id(), Some("e"));
    assert!(running.updated_at() >= created.updated_at());

    let done = store.update_status("e", Status::Completed, false).unwrap();
    assert_eq!(done.status(), Status::Completed);
    assert_eq!(store.load("e").unwrap().status(), Status::Completed);
}

#[test]
fn test_rerun_requires_retry() {
    let (_tmp, store) = store();
    store.create_study("s").unwrap();
    store.create_experiment("s", "e", &[] as &[&str]).unwrap();
    store.begin_run("e", &start(false)).unwrap();
    store.update_status("e", Status::Failed, false).unwrap();

    match store.begin_run("e", &start(false)).unwrap_err() {
        Error::InvalidTransition { slug, from, to } => {
            assert_eq!((slug.as_str(), from.as_str(), to.as_str()), ("e", "failed", "running"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.load("e").unwrap().status(), Status::Failed);

    let retried = store.begin_run("e", &start(true)).unwrap();
    assert_eq!(retried.status(), Status::Running);
}

#[test]
fn test_concurrent_running_rejected_without_retry() {
    let (_tmp, store) = store();
    store.create_study("s").unwrap();
    store.create_experiment("s", "e", &[] as &[&str]).unwrap();
    store.begin_run("e", &start(false)).unwrap();

    assert!(matches!(
        store.begin_run("e", &start(false)),
        Err(Error::InvalidTransition { .. })
    ));
}

#[test]
fn test_out_of_order_moves_are_accepted() {
    let (_tmp, store) = store();
    store.create_study("s").unwrap();
    store.create_experiment("s", "e", &[] as &[&str]).unwrap();

    store.update_status("e", Status::Completed, false).unwrap();
    store.update_status("e", Status::Cancelled, false).unwrap();
    assert_eq!(store.load("e").unwrap().status(), Status::Cancelled);
}

// =============================================================================
// Config snapshots
// =============================================================================

#[test]
fn test_config_snapshot_idempotent() {
    let (_tmp, store) = store();
    store.create_study("s").unwrap();
    store.create_experiment("s", "e", &[] as &[&str]).unwrap();

    let config = Config::from_map(
        json!({"lr": 0.01, "batch_size": 32})
            .as_object()
            .unwrap()
            .clone(),
    );
    assert!(store.save_config_snapshot("e", &config).unwrap());
    let path = store.config_path("e").unwrap();
    let first = fs::read(&path).unwrap();

    assert!(!store.save_config_snapshot("e", &config).unwrap());
    assert_eq!(fs::read(&path).unwrap(), first);

    let loaded = store.load("e").unwrap();
    assert_eq!(loaded.config(), &config);
}

#[test]
fn test_placeholder_config_is_empty() {
    let (_tmp, store) = store();
    store.create_study("s").unwrap();
    store.create_experiment("s", "e", &[] as &[&str]).unwrap();
    assert!(store.load("e").unwrap().config().is_empty());
}

#[test]
fn test_no_temp_files_left_behind() {
    let (tmp, store) = store();
    store.create_study("s").unwrap();
    store.create_experiment("s", "e", &[] as &[&str]).unwrap();
    store.begin_run("e", &start(false)).unwrap();
    store.update_status("e", Status::Completed, false).unwrap();

    let leftovers: Vec<_> = fs::read_dir(tmp.path().join("studies/s/experiments/e"))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
        .collect();
    assert!(leftovers.is_empty());
}
