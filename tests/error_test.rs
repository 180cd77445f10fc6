//! Tests for error types

use ox_lab::Error;

#[test]
fn test_validation_error() {
    let error = Error::Validation("`lr`: field required".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Validation error"));
    assert!(error_str.contains("`lr`: field required"));
}

#[test]
fn test_conflict_error() {
    let error = Error::Conflict {
        kind: "Study",
        slug: "sparse-attention".to_string(),
    };
    assert_eq!(error.to_string(), "Study already exists: sparse-attention");
}

#[test]
fn test_not_found_error() {
    let error = Error::NotFound {
        kind: "Experiment",
        id: "ghost".to_string(),
    };
    assert_eq!(error.to_string(), "Experiment not found: ghost");
}

#[test]
fn test_ambiguity_lists_studies() {
    let error = Error::Ambiguity {
        slug: "baseline".to_string(),
        studies: vec!["a".to_string(), "b".to_string()],
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("`baseline` is ambiguous"));
    assert!(error_str.contains("a, b"));
}

#[test]
fn test_invalid_transition_suggests_retry() {
    let error = Error::InvalidTransition {
        slug: "e".to_string(),
        from: "completed".to_string(),
        to: "running".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("completed -> running"));
    assert!(error_str.contains("--retry"));
}

#[test]
fn test_entry_failed_error() {
    let error = Error::EntryFailed {
        entry: "train".to_string(),
        message: "diverged: loss is NaN".to_string(),
    };
    assert_eq!(
        error.to_string(),
        "Entry point `train` failed: diverged: loss is NaN"
    );
}

#[test]
fn test_simple_variants() {
    for (error, prefix) in [
        (Error::Schema("x".into()), "Schema error"),
        (Error::Query("x".into()), "Query error"),
        (Error::GitState("x".into()), "Git state error"),
        (Error::Tracker("x".into()), "Tracker error"),
        (Error::Serialization("x".into()), "Serialization error"),
    ] {
        assert!(error.to_string().starts_with(prefix), "{error}");
    }
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_serde_error_conversion() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    assert!(matches!(Error::from(json_err), Error::Serialization(_)));

    let yaml_err = serde_yaml::from_str::<serde_json::Value>("a: [").unwrap_err();
    assert!(matches!(Error::from(yaml_err), Error::Serialization(_)));
}
