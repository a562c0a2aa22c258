use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use lab_importer::app::App;
use lab_importer::domain::{InstrumentFamily, ProjectRef};
use lab_importer::error::ImporterError;
use lab_importer::export::ExportOptions;
use lab_importer::output::JsonOutput;
use lab_importer::readers::ReaderSet;
use lab_importer::scan::ScanOptions;

const HEADER_LEN: usize = 58;

fn build_fcs(pairs: &[(&str, &str)], data: &[u8]) -> Vec<u8> {
    let delimiter = b'/';
    let mut text = vec![delimiter];
    for (key, value) in pairs {
        text.extend_from_slice(key.as_bytes());
        text.push(delimiter);
        text.extend_from_slice(value.as_bytes());
        text.push(delimiter);
    }
    let text_begin = HEADER_LEN;
    let text_end = text_begin + text.len() - 1;
    let (data_begin, data_end) = if data.is_empty() {
        (0, 0)
    } else {
        (text_end + 1, text_end + data.len())
    };

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"FCS3.1    ");
    for offset in [text_begin, text_end, data_begin, data_end, 0, 0] {
        bytes.extend_from_slice(format!("{offset:>8}").as_bytes());
    }
    bytes.extend_from_slice(&text);
    bytes.extend_from_slice(data);
    bytes
}

fn fcs_file(extra: &[(&str, &str)]) -> Vec<u8> {
    let mut pairs = vec![
        ("$PAR", "2"),
        ("$TOT", "3"),
        ("$DATATYPE", "I"),
        ("$BYTEORD", "1,2,3,4"),
        ("$MODE", "L"),
        ("$P1B", "16"),
        ("$P2B", "16"),
        ("$P1N", "FSC-A"),
        ("$P2N", "SSC-A"),
    ];
    pairs.extend_from_slice(extra);
    let data: Vec<u8> = [10u16, 100, 20, 200, 30, 300]
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect();
    build_fcs(&pairs, &data)
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

fn write(path: &Utf8Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    fs::write(path.as_std_path(), bytes).unwrap();
}

#[test]
fn scan_report_counts_and_serializes() {
    let (_temp, root) = temp_root();
    write(
        &root.join("Eva Spore Counting 190612/Specimen_001/T1.fcs"),
        &fcs_file(&[
            ("EXPERIMENT NAME", "Eva Spore Counting 190612"),
            ("$SRC", "Specimen_001"),
            ("TUBE NAME", "T1"),
        ]),
    );
    write(
        &root.join("Eva Spore Counting 190612/protocol.pdf"),
        b"%PDF-1.4",
    );

    let app = App::new(ReaderSet::standard());
    let report = app
        .scan(&root, &ScanOptions::new(InstrumentFamily::Flow), &JsonOutput)
        .unwrap();

    assert_eq!(report.experiments, 1);
    assert_eq!(report.datasets, 1);
    assert_eq!(report.attachments, 1);
    assert_eq!(report.instrument, InstrumentFamily::Flow);
    assert!(!report.scanned_at.is_empty());

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(
        value["tree"]["experiments"][0]["code"],
        "Eva_Spore_Counting_190612"
    );
    assert_eq!(value["verdict"]["valid"], true);
}

#[test]
fn info_reads_one_file() {
    let (_temp, root) = temp_root();
    let path = root.join("tube.fcs");
    write(
        &path,
        &fcs_file(&[("TUBE NAME", "T1"), ("$CYT", "BD LSR Fortessa")]),
    );

    let app = App::new(ReaderSet::standard());
    let result = app.info(&path).unwrap();

    assert_eq!(result.version, "FCS3.1");
    assert_eq!(result.events, 3);
    assert_eq!(result.parameters.len(), 2);
    assert_eq!(result.parameters[0].name, "FSC-A");
    assert_eq!(
        result.attributes.get("$CYT").map(String::as_str),
        Some("BD LSR Fortessa")
    );
    assert!(result.series.is_empty());
}

#[test]
fn info_rejects_unknown_extensions() {
    let (_temp, root) = temp_root();
    let path = root.join("notes.txt");
    write(&path, b"not a dataset");

    let app = App::new(ReaderSet::standard());
    let err = app.info(&path).unwrap_err();
    assert_matches!(err, ImporterError::UnknownFormat(extension) if extension == "txt");

    let bare = root.join("README");
    write(&bare, b"no extension");
    let err = app.info(&bare).unwrap_err();
    assert_matches!(err, ImporterError::UnexpectedEntry(_));
}

#[test]
fn export_writes_selected_columns() {
    let (_temp, root) = temp_root();
    let source = root.join("tube.fcs");
    let destination = root.join("tube.csv");
    write(&source, &fcs_file(&[]));

    let app = App::new(ReaderSet::standard());
    let options = ExportOptions {
        columns: vec!["SSC-A".to_string()],
        sample: 1,
    };
    let summary = app.export(&source, &destination, &options).unwrap();

    assert_eq!(summary.events_written, 3);
    assert_eq!(summary.events_total, 3);
    let content = fs::read_to_string(destination.as_std_path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, ["SSC-A", "100", "200", "300"]);
}

#[test]
fn map_produces_registration_identifiers() {
    let (_temp, root) = temp_root();
    for name in ["Eva Spore Counting 190612", "Other Exp"] {
        write(
            &root.join(format!("{name}/T1.fcs")),
            &fcs_file(&[("EXPERIMENT NAME", name), ("TUBE NAME", "T1")]),
        );
    }

    let app = App::new(ReaderSet::standard());
    let options = ScanOptions::new(InstrumentFamily::Flow);
    let project: ProjectRef = "/BIOL/FLOW".parse().unwrap();

    let result = app.map(&root, &options, &project, None, &JsonOutput).unwrap();
    assert_eq!(result.mappings.len(), 2);
    let eva = result
        .mappings
        .iter()
        .find(|mapping| mapping.experiment == "Eva Spore Counting 190612")
        .unwrap();
    assert_eq!(
        eva.identifiers.experiment,
        "/BIOL/FLOW/EVA_SPORE_COUNTING_190612"
    );
    assert_eq!(eva.identifiers.space, "/BIOL");

    let one = app
        .map(&root, &options, &project, Some("Other Exp"), &JsonOutput)
        .unwrap();
    assert_eq!(one.mappings.len(), 1);
    assert_eq!(one.mappings[0].code, "Other_Exp");
}

#[test]
fn map_rejects_unknown_experiment_names() {
    let (_temp, root) = temp_root();
    write(
        &root.join("Exp 1/T1.fcs"),
        &fcs_file(&[("EXPERIMENT NAME", "Exp 1"), ("TUBE NAME", "T1")]),
    );

    let app = App::new(ReaderSet::standard());
    let err = app
        .map(
            &root,
            &ScanOptions::new(InstrumentFamily::Flow),
            &"/BIOL/FLOW".parse().unwrap(),
            Some("Nope"),
            &JsonOutput,
        )
        .unwrap_err();
    assert_matches!(err, ImporterError::StructuralMismatch(_));
}
