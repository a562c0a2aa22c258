use std::fs;

use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::domain::FormatType;
use crate::error::ImporterError;
use crate::segment::{ByteOrder, SegmentReader};

use super::{AttributeMap, FormatReader, ParsedDataset};

pub const VERSION_3_0: &str = "FCS3.0";
pub const VERSION_3_1: &str = "FCS3.1";

/// Header length up to the optional OTHER segment offsets.
const HEADER_LEN: usize = 58;
const OFFSET_FIELD_LEN: usize = 8;

/// Numeric representation declared by `$DATATYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    Integer,
    Float,
    Double,
    Ascii,
}

impl DataType {
    fn from_keyword(value: &str) -> Result<Self, ImporterError> {
        match value {
            "I" => Ok(DataType::Integer),
            "F" => Ok(DataType::Float),
            "D" => Ok(DataType::Double),
            "A" => Ok(DataType::Ascii),
            other => Err(ImporterError::MalformedTextSegment(format!(
                "unknown $DATATYPE value: {other}"
            ))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DataType::Integer => "I",
            DataType::Float => "F",
            DataType::Double => "D",
            DataType::Ascii => "A",
        }
    }
}

/// Location and shape of the packed event matrix (row-major by event).
#[derive(Debug, Clone, Serialize)]
pub struct DataLayout {
    /// Absolute offset of the first data byte.
    pub begin: usize,
    /// Absolute offset of the last data byte, inclusive.
    pub end: usize,
    pub datatype: DataType,
    #[serde(skip)]
    pub byte_order: ByteOrder,
    pub parameters: usize,
    pub events: usize,
    pub bytes_per_value: usize,
}

impl DataLayout {
    pub fn len(&self) -> usize {
        self.end - self.begin + 1
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }
}

/// Acquisition attributes of one measured parameter, from the TEXT segment.
///
/// Fallbacks mirror what instruments leave out in practice: a missing name
/// becomes `<not set>`, a missing display hint defaults to linear.
#[derive(Debug, Clone, Serialize)]
pub struct Parameter {
    pub name: String,
    pub label: String,
    pub bits: u32,
    pub range: Option<String>,
    pub log_amplification: bool,
    pub log_zero: f64,
    pub gain: Option<String>,
    pub voltage: Option<String>,
    pub display: String,
}

/// Fully parsed FCS metadata; the event matrix stays on disk until
/// [`EventTable::read`] is called with the embedded layout.
#[derive(Debug, Clone)]
pub struct FcsFile {
    pub version: String,
    /// All TEXT keywords, standard (`$`-prefixed) and custom, in file order.
    pub text: AttributeMap,
    pub parameters: Vec<Parameter>,
    pub data: Option<DataLayout>,
    pub analysis: Option<AttributeMap>,
}

impl FcsFile {
    pub fn open(path: &Utf8Path) -> Result<FcsFile, ImporterError> {
        let bytes = fs::read(path.as_std_path())
            .map_err(|err| ImporterError::Filesystem(format!("{path}: {err}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<FcsFile, ImporterError> {
        let reader = SegmentReader::new(bytes);
        let header = parse_header(&reader)?;
        debug!(
            version = header.version.as_str(),
            text_begin = header.text_begin,
            data_begin = header.data_begin,
            "parsed header"
        );

        let text = parse_keyword_segment(&reader, header.text_begin, header.text_end)?;
        let parameters = parse_parameters(&text)?;
        let data = resolve_data_layout(&reader, &header, &text, parameters.len())?;
        let analysis = if header.analysis_begin > 0 && header.analysis_end > 0 {
            Some(parse_keyword_segment(
                &reader,
                header.analysis_begin,
                header.analysis_end,
            )?)
        } else {
            None
        };

        Ok(FcsFile {
            version: header.version,
            text,
            parameters,
            data,
            analysis,
        })
    }

    /// Look up any TEXT keyword, standard or custom, as written in the file.
    pub fn keyword(&self, key: &str) -> Option<&str> {
        self.text.get(key).map(String::as_str)
    }

    pub fn events(&self) -> usize {
        self.data.as_ref().map_or(0, |layout| layout.events)
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .map(|parameter| parameter.name.as_str())
            .collect()
    }

    pub fn into_parsed(self) -> ParsedDataset {
        ParsedDataset {
            format: FormatType::Fcs,
            version: self.version,
            attributes: self.text,
            series: Vec::new(),
        }
    }
}

/// FCS 3.0/3.1 reader; parses metadata eagerly, event data on demand.
#[derive(Debug, Default)]
pub struct FcsReader;

impl FcsReader {
    pub fn new() -> Self {
        Self
    }
}

impl FormatReader for FcsReader {
    fn format(&self) -> FormatType {
        FormatType::Fcs
    }

    fn parse(&self, path: &Utf8Path) -> Result<ParsedDataset, ImporterError> {
        Ok(FcsFile::open(path)?.into_parsed())
    }
}

struct Header {
    version: String,
    text_begin: usize,
    text_end: usize,
    data_begin: usize,
    data_end: usize,
    analysis_begin: usize,
    analysis_end: usize,
}

fn parse_header(reader: &SegmentReader<'_>) -> Result<Header, ImporterError> {
    let mut header = reader.sub_reader(0, HEADER_LEN)?;
    let version = header.read_ascii_trimmed(6)?.to_string();
    if version != VERSION_3_0 && version != VERSION_3_1 {
        return Err(ImporterError::UnsupportedVersion(version));
    }

    header.seek(10)?;
    let text_begin = read_offset_field(&mut header, "TEXT begin", true)?;
    let text_end = read_offset_field(&mut header, "TEXT end", true)?;
    let mut data_begin = read_offset_field(&mut header, "DATA begin", true)?;
    let mut data_end = read_offset_field(&mut header, "DATA end", true)?;
    // The ANALYSIS pair may be blank when the segment is absent.
    let analysis_begin = read_offset_field(&mut header, "ANALYSIS begin", false)?;
    let analysis_end = read_offset_field(&mut header, "ANALYSIS end", false)?;

    // Some acquisition software writes the TEXT and DATA pairs into each
    // other's header slots. A zero DATA offset means the segment is larger
    // than the header field can express, so only swap for nonzero offsets.
    let mut text_begin = text_begin;
    let mut text_end = text_end;
    if data_begin != 0 && text_begin > data_begin {
        std::mem::swap(&mut text_begin, &mut data_begin);
        std::mem::swap(&mut text_end, &mut data_end);
    }

    Ok(Header {
        version,
        text_begin,
        text_end,
        data_begin,
        data_end,
        analysis_begin,
        analysis_end,
    })
}

fn read_offset_field(
    header: &mut SegmentReader<'_>,
    field: &str,
    required: bool,
) -> Result<usize, ImporterError> {
    let text = header.read_ascii_trimmed(OFFSET_FIELD_LEN)?;
    if text.is_empty() {
        if required {
            return Err(ImporterError::OffsetMismatch(format!(
                "header field {field} is blank"
            )));
        }
        return Ok(0);
    }
    text.parse().map_err(|_| {
        ImporterError::OffsetMismatch(format!("header field {field} is not numeric: {text}"))
    })
}

/// Parse a delimiter-separated keyword segment (TEXT or ANALYSIS grammar).
///
/// The segment starts with the delimiter byte and alternates keys and
/// values. A doubled delimiter is the standard's escape for a literal
/// delimiter; it produces an empty chunk here and cannot be told apart from
/// a truncated pair, so it is rejected outright.
fn parse_keyword_segment(
    reader: &SegmentReader<'_>,
    begin: usize,
    end: usize,
) -> Result<AttributeMap, ImporterError> {
    if end < begin {
        return Err(ImporterError::OffsetMismatch(format!(
            "segment end {end} before begin {begin}"
        )));
    }
    let segment = reader.sub_reader(begin, end - begin + 1).map_err(|_| {
        ImporterError::OffsetMismatch(format!(
            "declared segment {begin}-{end} exceeds file length {}",
            reader.len()
        ))
    })?;
    let bytes = segment.as_slice();
    let delimiter = bytes[0];

    let mut content = &bytes[1..];
    if content.last() == Some(&delimiter) {
        content = &content[..content.len() - 1];
    }
    if content.is_empty() {
        return Ok(IndexMap::new());
    }

    let mut chunks = Vec::new();
    for chunk in content.split(|byte| *byte == delimiter) {
        if chunk.is_empty() {
            return Err(ImporterError::MalformedTextSegment(
                "doubled delimiter (escaped delimiters are not supported)".to_string(),
            ));
        }
        let text = std::str::from_utf8(chunk).map_err(|_| {
            ImporterError::MalformedTextSegment("invalid UTF-8 in keyword segment".to_string())
        })?;
        chunks.push(text.trim());
    }
    if chunks.len() % 2 != 0 {
        return Err(ImporterError::MalformedTextSegment(format!(
            "odd number of keyword chunks: {}",
            chunks.len()
        )));
    }

    let mut map = IndexMap::with_capacity(chunks.len() / 2);
    for pair in chunks.chunks_exact(2) {
        map.insert(pair[0].to_string(), pair[1].to_string());
    }
    Ok(map)
}

fn required_count(text: &AttributeMap, key: &str) -> Result<usize, ImporterError> {
    let value = text
        .get(key)
        .ok_or_else(|| ImporterError::MalformedTextSegment(format!("missing keyword {key}")))?;
    value.trim().parse().map_err(|_| {
        ImporterError::MalformedTextSegment(format!("keyword {key} is not numeric: {value}"))
    })
}

fn parse_parameters(text: &AttributeMap) -> Result<Vec<Parameter>, ImporterError> {
    let count = required_count(text, "$PAR")?;
    let mut parameters = Vec::with_capacity(count);
    for index in 1..=count {
        let lookup = |suffix: &str| text.get(&format!("$P{index}{suffix}")).cloned();

        let bits_raw = lookup("B").ok_or_else(|| {
            ImporterError::MalformedTextSegment(format!("missing keyword $P{index}B"))
        })?;
        let bits: u32 = bits_raw.trim().parse().map_err(|_| {
            ImporterError::MalformedTextSegment(format!(
                "keyword $P{index}B is not numeric: {bits_raw}"
            ))
        })?;

        // $PnE is "decades,offset"; zero decades means linear amplification.
        let mut log_amplification = false;
        let mut log_zero = 0.0f64;
        if let Some(amplification) = lookup("E") {
            let (decades, offset) = amplification.split_once(',').ok_or_else(|| {
                ImporterError::MalformedTextSegment(format!(
                    "keyword $P{index}E is not decades,offset: {amplification}"
                ))
            })?;
            let decades: f64 = decades.trim().parse().map_err(|_| {
                ImporterError::MalformedTextSegment(format!(
                    "keyword $P{index}E has non-numeric decades: {amplification}"
                ))
            })?;
            let offset: f64 = offset.trim().parse().map_err(|_| {
                ImporterError::MalformedTextSegment(format!(
                    "keyword $P{index}E has non-numeric offset: {amplification}"
                ))
            })?;
            if decades != 0.0 {
                log_amplification = true;
                log_zero = if offset == 0.0 { 1.0 } else { offset };
            }
        }

        parameters.push(Parameter {
            name: lookup("N").unwrap_or_else(|| "<not set>".to_string()),
            label: lookup("S").unwrap_or_default(),
            bits,
            range: lookup("R"),
            log_amplification,
            log_zero,
            gain: lookup("G"),
            voltage: lookup("V"),
            display: text
                .get(&format!("P{index}DISPLAY"))
                .cloned()
                .unwrap_or_else(|| "LIN".to_string()),
        });
    }
    Ok(parameters)
}

fn resolve_data_layout(
    reader: &SegmentReader<'_>,
    header: &Header,
    text: &AttributeMap,
    parameters: usize,
) -> Result<Option<DataLayout>, ImporterError> {
    let events = required_count(text, "$TOT")?;

    // Header offsets of zero defer to $BEGINDATA/$ENDDATA (the segment did
    // not fit the eight-character header fields).
    let begin = if header.data_begin != 0 {
        header.data_begin
    } else {
        text.get("$BEGINDATA")
            .map(|value| value.trim().parse::<usize>())
            .transpose()
            .map_err(|_| {
                ImporterError::OffsetMismatch("keyword $BEGINDATA is not numeric".to_string())
            })?
            .unwrap_or(0)
    };
    let end = if header.data_end != 0 {
        header.data_end
    } else {
        text.get("$ENDDATA")
            .map(|value| value.trim().parse::<usize>())
            .transpose()
            .map_err(|_| {
                ImporterError::OffsetMismatch("keyword $ENDDATA is not numeric".to_string())
            })?
            .unwrap_or(0)
    };

    if begin == 0 {
        return Ok(None);
    }
    if end < begin {
        return Err(ImporterError::OffsetMismatch(format!(
            "data segment end {end} before begin {begin}"
        )));
    }
    if end >= reader.len() {
        return Err(ImporterError::OffsetMismatch(format!(
            "declared data end {end} exceeds file length {}",
            reader.len()
        )));
    }

    let datatype_raw = text.get("$DATATYPE").ok_or_else(|| {
        ImporterError::MalformedTextSegment("missing keyword $DATATYPE".to_string())
    })?;
    let datatype = DataType::from_keyword(datatype_raw.trim())?;

    let byte_order = match text
        .get("$BYTEORD")
        .map(|value| value.trim())
        .unwrap_or_default()
    {
        "1,2,3,4" => ByteOrder::Little,
        "4,3,2,1" => ByteOrder::Big,
        other => {
            return Err(ImporterError::MalformedTextSegment(format!(
                "unsupported $BYTEORD value: {other}"
            )));
        }
    };

    if let Some(mode) = text.get("$MODE")
        && mode.trim() != "L"
    {
        return Err(ImporterError::MalformedTextSegment(format!(
            "unsupported acquisition mode: {mode}"
        )));
    }

    let bits = uniform_bits(text, parameters)?;
    let bytes_per_value = match (datatype, bits) {
        (DataType::Integer, 16) => 2,
        (DataType::Integer, 32) => 4,
        (DataType::Integer, other) => {
            return Err(ImporterError::MalformedTextSegment(format!(
                "unsupported integer width: {other} bits"
            )));
        }
        (DataType::Float, 32) => 4,
        (DataType::Float, other) => {
            return Err(ImporterError::MalformedTextSegment(format!(
                "datatype F requires 32-bit values, found {other}"
            )));
        }
        (DataType::Double, 64) => 8,
        (DataType::Double, other) => {
            return Err(ImporterError::MalformedTextSegment(format!(
                "datatype D requires 64-bit values, found {other}"
            )));
        }
        (DataType::Ascii, other) if other % 8 == 0 && other > 0 => (other / 8) as usize,
        (DataType::Ascii, other) => {
            return Err(ImporterError::MalformedTextSegment(format!(
                "unsupported ASCII width: {other} bits"
            )));
        }
    };

    let layout = DataLayout {
        begin,
        end,
        datatype,
        byte_order,
        parameters,
        events,
        bytes_per_value,
    };
    let expected = events * parameters * layout.bytes_per_value;
    if layout.len() != expected {
        return Err(ImporterError::OffsetMismatch(format!(
            "data segment is {} bytes, expected {expected} for {events} events x {parameters} parameters x {} bytes",
            layout.len(),
            layout.bytes_per_value
        )));
    }
    Ok(Some(layout))
}

fn uniform_bits(text: &AttributeMap, parameters: usize) -> Result<u32, ImporterError> {
    let mut bits = None;
    for index in 1..=parameters {
        let key = format!("$P{index}B");
        let raw = text
            .get(&key)
            .ok_or_else(|| ImporterError::MalformedTextSegment(format!("missing keyword {key}")))?;
        let value: u32 = raw.trim().parse().map_err(|_| {
            ImporterError::MalformedTextSegment(format!("keyword {key} is not numeric: {raw}"))
        })?;
        match bits {
            None => bits = Some(value),
            Some(previous) if previous != value => {
                return Err(ImporterError::MalformedTextSegment(format!(
                    "mixed parameter widths: {previous} and {value} bits"
                )));
            }
            Some(_) => {}
        }
    }
    bits.ok_or_else(|| {
        ImporterError::MalformedTextSegment("no parameters declared for data segment".to_string())
    })
}

/// The decoded-on-demand event matrix of one FCS file.
///
/// Holds the raw data segment; individual values are decoded as they are
/// requested, so repeated column reads never re-touch the file.
#[derive(Debug)]
pub struct EventTable {
    layout: DataLayout,
    bytes: Vec<u8>,
}

impl EventTable {
    /// Load the data segment for a previously parsed layout.
    pub fn read(path: &Utf8Path, layout: &DataLayout) -> Result<EventTable, ImporterError> {
        if layout.datatype == DataType::Ascii {
            return Err(ImporterError::UndecodableData(
                layout.datatype.code().to_string(),
            ));
        }
        let file = fs::read(path.as_std_path())
            .map_err(|err| ImporterError::Filesystem(format!("{path}: {err}")))?;
        let bytes = file
            .get(layout.begin..=layout.end)
            .ok_or(ImporterError::TruncatedInput {
                offset: layout.begin,
                needed: layout.len(),
                available: file.len().saturating_sub(layout.begin),
            })?
            .to_vec();
        Ok(EventTable {
            layout: layout.clone(),
            bytes,
        })
    }

    pub fn events(&self) -> usize {
        self.layout.events
    }

    pub fn parameters(&self) -> usize {
        self.layout.parameters
    }

    fn value_at(&self, event: usize, parameter: usize) -> f64 {
        let width = self.layout.bytes_per_value;
        let offset = (event * self.layout.parameters + parameter) * width;
        let slice = &self.bytes[offset..offset + width];
        let mut reader = SegmentReader::new(slice);
        let order = self.layout.byte_order;
        // Layout length was validated against the declared shape, so these
        // reads cannot run out of bytes.
        let value = match (self.layout.datatype, width) {
            (DataType::Integer, 2) => reader.read_u16(order).map(f64::from),
            (DataType::Integer, _) => reader.read_u32(order).map(f64::from),
            (DataType::Float, _) => reader.read_f32(order).map(f64::from),
            (DataType::Double, _) | (DataType::Ascii, _) => reader.read_f64(order),
        };
        value.unwrap_or(f64::NAN)
    }

    /// Values of one parameter across events. `max_values == 0` reads all;
    /// `sampled` spreads the requested count evenly over the table instead
    /// of taking the leading rows.
    pub fn column(
        &self,
        parameter: usize,
        max_values: usize,
        sampled: bool,
    ) -> Result<Vec<f64>, ImporterError> {
        if parameter >= self.layout.parameters {
            return Err(ImporterError::InvalidParameterIndex(parameter));
        }
        let events = self.layout.events;
        let count = if max_values == 0 || max_values > events {
            events
        } else {
            max_values
        };
        let step = if sampled && count > 0 {
            (events / count).max(1)
        } else {
            1
        };
        let mut values = Vec::with_capacity(count);
        let mut event = 0;
        while event < events && values.len() < count {
            values.push(self.value_at(event, parameter));
            event += step;
        }
        Ok(values)
    }

    /// Restartable row sequence; each call starts a fresh pass.
    pub fn rows(&self) -> EventRows<'_> {
        EventRows {
            table: self,
            next: 0,
        }
    }
}

/// Lazy iterator over decoded event rows.
pub struct EventRows<'a> {
    table: &'a EventTable,
    next: usize,
}

impl Iterator for EventRows<'_> {
    type Item = Vec<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.table.layout.events {
            return None;
        }
        let event = self.next;
        self.next += 1;
        let row = (0..self.table.layout.parameters)
            .map(|parameter| self.table.value_at(event, parameter))
            .collect();
        Some(row)
    }
}
