pub mod fcs;
pub mod lif;

use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Serialize;

use crate::domain::FormatType;
use crate::error::ImporterError;

pub use fcs::FcsReader;
pub use lif::LifReader;

/// Insertion-ordered string attributes attached to a parsed entity.
pub type AttributeMap = IndexMap<String, String>;

/// One image or measurement series inside a container format.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesInfo {
    pub name: String,
    pub attributes: AttributeMap,
}

/// Format-independent parse result the scanners consume.
///
/// Attributes preserve file order, so parsing the same bytes twice yields
/// an identical map.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedDataset {
    pub format: FormatType,
    pub version: String,
    pub attributes: AttributeMap,
    pub series: Vec<SeriesInfo>,
}

/// Capability every instrument file parser exposes to the scanners.
pub trait FormatReader: Send + Sync {
    fn format(&self) -> FormatType;

    /// Decode metadata only; numeric payloads stay on disk.
    fn parse(&self, path: &Utf8Path) -> Result<ParsedDataset, ImporterError>;
}

/// The set of readers available to a scan, keyed by file extension.
pub struct ReaderSet {
    readers: Vec<Box<dyn FormatReader>>,
}

impl ReaderSet {
    pub fn standard() -> Self {
        Self {
            readers: vec![Box::new(FcsReader::new()), Box::new(LifReader::new())],
        }
    }

    pub fn reader_for(&self, format: FormatType) -> Option<&dyn FormatReader> {
        self.readers
            .iter()
            .find(|reader| reader.format() == format)
            .map(|reader| reader.as_ref())
    }

    pub fn parse(&self, path: &Utf8Path) -> Result<ParsedDataset, ImporterError> {
        let extension = path.extension().unwrap_or_default();
        let format = FormatType::from_extension(extension)
            .ok_or_else(|| ImporterError::UnknownFormat(extension.to_string()))?;
        let reader = self
            .reader_for(format)
            .ok_or_else(|| ImporterError::UnknownFormat(extension.to_string()))?;
        reader.parse(path)
    }
}

impl Default for ReaderSet {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn reader_set_routes_by_format() {
        let set = ReaderSet::standard();
        assert_eq!(
            set.reader_for(FormatType::Fcs).map(|reader| reader.format()),
            Some(FormatType::Fcs)
        );
        assert_eq!(
            set.reader_for(FormatType::Lif).map(|reader| reader.format()),
            Some(FormatType::Lif)
        );
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let set = ReaderSet::standard();
        let err = set.parse(Utf8Path::new("export.czi")).unwrap_err();
        assert_matches!(err, ImporterError::UnknownFormat(ext) if ext == "czi");
    }
}
