use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ImporterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentFamily {
    Flow,
    Microscopy,
}

impl fmt::Display for InstrumentFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentFamily::Flow => write!(f, "flow"),
            InstrumentFamily::Microscopy => write!(f, "microscopy"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormatType {
    Fcs,
    Lif,
}

impl FormatType {
    pub fn from_extension(ext: &str) -> Option<FormatType> {
        match ext.to_ascii_lowercase().as_str() {
            "fcs" => Some(FormatType::Fcs),
            "lif" => Some(FormatType::Lif),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatType::Fcs => "FCS",
            FormatType::Lif => "LIF",
        }
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Zero-based plate position parsed from labels like `A01` or `p24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WellCoordinate {
    row: u8,
    column: u16,
}

impl WellCoordinate {
    pub fn row(&self) -> u8 {
        self.row
    }

    pub fn column(&self) -> u16 {
        self.column
    }
}

impl fmt::Display for WellCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = (b'A' + self.row) as char;
        write!(f, "{}{:02}", letter, self.column + 1)
    }
}

impl FromStr for WellCoordinate {
    type Err = ImporterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let mut chars = trimmed.chars();
        let letter = chars
            .next()
            .ok_or_else(|| ImporterError::InvalidCoordinate(value.to_string()))?
            .to_ascii_uppercase();
        let digits = chars.as_str();
        let is_valid = letter.is_ascii_uppercase()
            && !digits.is_empty()
            && digits.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(ImporterError::InvalidCoordinate(value.to_string()));
        }
        let column: u16 = digits
            .parse()
            .map_err(|_| ImporterError::InvalidCoordinate(value.to_string()))?;
        if column == 0 {
            return Err(ImporterError::InvalidCoordinate(value.to_string()));
        }
        Ok(Self {
            row: letter as u8 - b'A',
            column: column - 1,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrayGeometry {
    Wells96,
    Wells384,
}

impl Serialize for TrayGeometry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl TrayGeometry {
    /// Supported geometries, smallest first; inference picks the first fit.
    pub const CATALOG: [TrayGeometry; 2] = [TrayGeometry::Wells96, TrayGeometry::Wells384];

    pub fn rows(&self) -> u8 {
        match self {
            TrayGeometry::Wells96 => 8,
            TrayGeometry::Wells384 => 16,
        }
    }

    pub fn columns(&self) -> u16 {
        match self {
            TrayGeometry::Wells96 => 12,
            TrayGeometry::Wells384 => 24,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrayGeometry::Wells96 => "96_WELLS_8X12",
            TrayGeometry::Wells384 => "384_WELLS_16x24",
        }
    }

    pub fn contains(&self, coordinate: &WellCoordinate) -> bool {
        coordinate.row() < self.rows() && coordinate.column() < self.columns()
    }

    /// Smallest catalogued geometry containing every coordinate, if any.
    pub fn fitting<'a, I>(coordinates: I) -> Option<TrayGeometry>
    where
        I: IntoIterator<Item = &'a WellCoordinate>,
    {
        let mut max_row = 0u8;
        let mut max_column = 0u16;
        let mut seen = false;
        for coordinate in coordinates {
            seen = true;
            max_row = max_row.max(coordinate.row());
            max_column = max_column.max(coordinate.column());
        }
        if !seen {
            return None;
        }
        Self::CATALOG
            .into_iter()
            .find(|geometry| max_row < geometry.rows() && max_column < geometry.columns())
    }
}

impl fmt::Display for TrayGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TrayGeometry {
    type Err = ImporterError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "96_WELLS_8X12" => Ok(TrayGeometry::Wells96),
            "384_WELLS_16x24" => Ok(TrayGeometry::Wells384),
            _ => Err(ImporterError::InvalidGeometry(value.to_string())),
        }
    }
}

/// Destination for registration, supplied by config and consumed opaquely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub code: String,
    pub identifier: String,
}

impl FromStr for ProjectRef {
    type Err = ImporterError;

    /// Parses an absolute identifier like `/SPACE/PROJECT`; the code is the
    /// last path segment.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let identifier = value.trim();
        let code = identifier
            .rsplit_once('/')
            .map(|(_, tail)| tail.to_string())
            .unwrap_or_default();
        if code.is_empty() || !identifier.starts_with('/') {
            return Err(ImporterError::InvalidProject(identifier.to_string()));
        }
        Ok(ProjectRef {
            code,
            identifier: identifier.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_well_coordinate_valid() {
        let coordinate: WellCoordinate = "A01".parse().unwrap();
        assert_eq!(coordinate.row(), 0);
        assert_eq!(coordinate.column(), 0);
        assert_eq!(coordinate.to_string(), "A01");
    }

    #[test]
    fn parse_well_coordinate_lowercase() {
        let coordinate: WellCoordinate = "p24".parse().unwrap();
        assert_eq!(coordinate.row(), 15);
        assert_eq!(coordinate.column(), 23);
        assert_eq!(coordinate.to_string(), "P24");
    }

    #[test]
    fn parse_well_coordinate_invalid() {
        let err = "11A".parse::<WellCoordinate>().unwrap_err();
        assert_matches!(err, ImporterError::InvalidCoordinate(_));

        let err = "A00".parse::<WellCoordinate>().unwrap_err();
        assert_matches!(err, ImporterError::InvalidCoordinate(_));

        let err = "".parse::<WellCoordinate>().unwrap_err();
        assert_matches!(err, ImporterError::InvalidCoordinate(_));
    }

    #[test]
    fn geometry_fitting_prefers_smallest() {
        let wells = vec!["A01".parse().unwrap(), "H12".parse::<WellCoordinate>().unwrap()];
        assert_eq!(TrayGeometry::fitting(&wells), Some(TrayGeometry::Wells96));

        let wells = vec!["A13".parse::<WellCoordinate>().unwrap()];
        assert_eq!(TrayGeometry::fitting(&wells), Some(TrayGeometry::Wells384));

        let wells = vec!["Q01".parse::<WellCoordinate>().unwrap()];
        assert_eq!(TrayGeometry::fitting(&wells), None);
    }

    #[test]
    fn geometry_strings_round_trip() {
        for geometry in TrayGeometry::CATALOG {
            let parsed: TrayGeometry = geometry.as_str().parse().unwrap();
            assert_eq!(parsed, geometry);
        }
        let err = "WELLS_9X9".parse::<TrayGeometry>().unwrap_err();
        assert_matches!(err, ImporterError::InvalidGeometry(_));
    }

    #[test]
    fn project_ref_parses_identifier() {
        let project: ProjectRef = "/BIOL/FLOW".parse().unwrap();
        assert_eq!(project.code, "FLOW");
        assert_eq!(project.identifier, "/BIOL/FLOW");

        let err = "BIOL/FLOW".parse::<ProjectRef>().unwrap_err();
        assert_matches!(err, ImporterError::InvalidProject(_));

        let err = "/BIOL/".parse::<ProjectRef>().unwrap_err();
        assert_matches!(err, ImporterError::InvalidProject(_));
    }

    #[test]
    fn format_type_from_extension() {
        assert_eq!(FormatType::from_extension("FCS"), Some(FormatType::Fcs));
        assert_eq!(FormatType::from_extension("lif"), Some(FormatType::Lif));
        assert_eq!(FormatType::from_extension("czi"), None);
    }
}
