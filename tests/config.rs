use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use lab_importer::config::ConfigLoader;
use lab_importer::domain::InstrumentFamily;
use lab_importer::error::ImporterError;

fn write_config(contents: &str) -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("importer.json")).unwrap();
    std::fs::write(path.as_std_path(), contents).unwrap();
    (temp, path)
}

#[test]
fn resolve_reads_explicit_file() {
    let (_temp, path) = write_config(
        r#"{
            "schema_version": 1,
            "data_root": "/data/facility/users",
            "instrument": "microscopy",
            "project": "/BIOL/IMAGING",
            "parallel": true,
            "expected_hardware": "BD LSR Fortessa"
        }"#,
    );

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(
        resolved.data_root.as_deref(),
        Some(Utf8Path::new("/data/facility/users"))
    );
    assert_eq!(resolved.instrument, InstrumentFamily::Microscopy);
    let project = resolved.project.unwrap();
    assert_eq!(project.code, "IMAGING");
    assert_eq!(project.identifier, "/BIOL/IMAGING");
    assert!(resolved.parallel);
    assert_eq!(
        resolved.expected_hardware.as_deref(),
        Some("BD LSR Fortessa")
    );
}

#[test]
fn empty_file_falls_back_to_defaults() {
    let (_temp, path) = write_config("{}");

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(resolved.schema_version, 1);
    assert_eq!(resolved.data_root, None);
    assert_eq!(resolved.instrument, InstrumentFamily::Flow);
    assert_eq!(resolved.project, None);
    assert!(!resolved.parallel);
    assert_eq!(resolved.expected_hardware, None);
}

#[test]
fn detailed_project_entry_keeps_its_code() {
    let (_temp, path) = write_config(
        r#"{"project": {"code": "CUSTOM", "identifier": "/BIOL/FLOW"}}"#,
    );

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    let project = resolved.project.unwrap();
    assert_eq!(project.code, "CUSTOM");
    assert_eq!(project.identifier, "/BIOL/FLOW");
}

#[test]
fn invalid_project_identifier_is_rejected() {
    let (_temp, path) = write_config(r#"{"project": "BIOL/FLOW"}"#);

    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, ImporterError::InvalidProject(value) if value == "BIOL/FLOW");
}

#[test]
fn missing_explicit_path_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("nope.json")).unwrap();

    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, ImporterError::ConfigRead(reported) if reported == path);
}

#[test]
fn malformed_json_is_a_parse_error() {
    let (_temp, path) = write_config("{ this is not json");

    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, ImporterError::ConfigParse(_));
}

#[test]
fn unknown_schema_version_is_rejected() {
    let (_temp, path) = write_config(r#"{"schema_version": 99}"#);

    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, ImporterError::UnsupportedSchema(99));
}
