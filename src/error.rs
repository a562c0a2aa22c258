use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ImporterError {
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(String),

    #[error("truncated input: {needed} bytes at offset {offset}, only {available} available")]
    TruncatedInput {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("segment offsets do not match file contents: {0}")]
    OffsetMismatch(String),

    #[error("malformed text segment: {0}")]
    MalformedTextSegment(String),

    #[error("unexpected file: {0}")]
    UnexpectedEntry(String),

    #[error("unsupported geometry")]
    UnsupportedGeometry,

    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),

    #[error("numeric decode not supported for datatype {0}")]
    UndecodableData(String),

    #[error("parameter index {0} out of range")]
    InvalidParameterIndex(usize),

    #[error("no reader registered for file type: {0}")]
    UnknownFormat(String),

    #[error("invalid well coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("unknown tray geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid project identifier: {0}")]
    InvalidProject(String),

    #[error("cannot read scan root: {0}")]
    InaccessibleRoot(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("missing config file (searched --config, LAB_IMPORTER_CONFIG, user config dir)")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unsupported config schema_version: {0}")]
    UnsupportedSchema(u32),

    #[error("csv export failed: {0}")]
    ExportFailed(String),
}
