//! Job configuration files against real workflow options

use super::common::*;
use speedwagon::cli::build_job_arguments;
use speedwagon::config::{export_job_config, import_job_config, load_settings};
use speedwagon_sdk::{ConfigurationError, JobRuntime};

#[test]
fn test_export_then_import_reproduces_arguments() {
    let dir = scratch_tree(&[]);
    let runtime = builtin_runtime();
    let options = runtime.get_workflow_metadata("checksum_manifest").unwrap().options;
    let args = arguments(
        &runtime,
        "checksum_manifest",
        &[("Input", &path_str(dir.path())), ("Recursive", "yes")],
    );

    let file = dir.path().join("job.json");
    export_job_config(&file, &options, &args).unwrap();

    let raw = std::fs::read_to_string(&file).unwrap();
    assert!(raw.contains("\"Input\""));
    assert!(raw.contains("\"Recursive\": true"));

    let imported = import_job_config(&file, &options).unwrap();
    assert_eq!(imported, args);
    runtime.validate_job_arguments("checksum_manifest", &imported).unwrap();
}

#[test]
fn test_import_then_override_from_command_line() {
    let dir = scratch_tree(&[]);
    let runtime = builtin_runtime();
    let options = runtime.get_workflow_metadata("checksum_manifest").unwrap().options;

    let file = dir.path().join("job.json");
    std::fs::write(&file, format!(r#"{{"Input": "{}"}}"#, path_str(dir.path()).replace('\\', "\\\\"))).unwrap();

    let base = import_job_config(&file, &options).unwrap();
    assert_eq!(base.get_bool("recursive"), Some(false));

    let args = build_job_arguments(&options, Some(&base), &[("Recursive".into(), "true".into())]).unwrap();
    assert_eq!(args.get_bool("recursive"), Some(true));
    assert_eq!(args.get_str("input"), base.get_str("input"));
}

#[test]
fn test_import_rejects_label_of_other_workflow() {
    let dir = scratch_tree(&[("job.json", r#"{"Input": "/data", "Recursive": false}"#)]);
    let runtime = builtin_runtime();
    let options = runtime.get_workflow_metadata("file_inventory").unwrap().options;

    let err = import_job_config(&dir.path().join("job.json"), &options).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ConfigurationError>(),
        Some(&ConfigurationError::unknown("Recursive"))
    );
}

#[test]
fn test_malformed_settings_file_is_an_error() {
    let dir = scratch_tree(&[("settings.json", "{ not json")]);
    let err = load_settings(&dir.path().join("settings.json")).unwrap_err();
    assert!(err.to_string().contains("Malformed settings file"));
}
