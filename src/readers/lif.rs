use std::fs;

use camino::Utf8Path;
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::domain::FormatType;
use crate::error::ImporterError;
use crate::segment::{ByteOrder, SegmentReader};

use super::{AttributeMap, FormatReader, ParsedDataset, SeriesInfo};

const BLOCK_MAGIC: u32 = 0x70;
const TEST_BYTE: u8 = 0x2A;

/// One image series described by the container's XML descriptor.
#[derive(Debug, Clone, Serialize)]
pub struct LifSeries {
    pub name: String,
    pub size_x: u64,
    pub size_y: u64,
    pub size_z: u64,
    pub size_t: u64,
    pub channels: Vec<LifChannel>,
    pub voxel_x: Option<f64>,
    pub voxel_y: Option<f64>,
    pub voxel_z: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifChannel {
    pub name: String,
    /// Bits per pixel for this channel.
    pub resolution: u32,
}

/// Identity and length of one binary payload block; payload bytes are never
/// loaded, only walked over to validate the framing.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryBlock {
    pub id: String,
    pub len: u64,
}

/// Parsed Leica LIF container: XML descriptor plus memory-block directory.
#[derive(Debug, Clone)]
pub struct LifFile {
    pub version: u32,
    pub series: Vec<LifSeries>,
    pub memory_blocks: Vec<MemoryBlock>,
}

impl LifFile {
    pub fn open(path: &Utf8Path) -> Result<LifFile, ImporterError> {
        let bytes = fs::read(path.as_std_path())
            .map_err(|err| ImporterError::Filesystem(format!("{path}: {err}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<LifFile, ImporterError> {
        let mut reader = SegmentReader::new(bytes);

        let xml = read_descriptor_block(&mut reader)?;
        let version = container_version(&xml)?;
        let series = parse_series(&xml);
        debug!(version, series = series.len(), "parsed container descriptor");

        let mut memory_blocks = Vec::new();
        while reader.remaining() > 0 {
            memory_blocks.push(read_memory_block(&mut reader, version)?);
        }

        Ok(LifFile {
            version,
            series,
            memory_blocks,
        })
    }

    pub fn into_parsed(self) -> ParsedDataset {
        let mut attributes = IndexMap::new();
        attributes.insert("numSeries".to_string(), self.series.len().to_string());
        attributes.insert(
            "numMemoryBlocks".to_string(),
            self.memory_blocks.len().to_string(),
        );
        let series = self.series.iter().map(series_info).collect();
        ParsedDataset {
            format: FormatType::Lif,
            version: self.version.to_string(),
            attributes,
            series,
        }
    }
}

fn series_info(series: &LifSeries) -> SeriesInfo {
    let mut attributes: AttributeMap = IndexMap::new();
    attributes.insert("sizeX".to_string(), series.size_x.to_string());
    attributes.insert("sizeY".to_string(), series.size_y.to_string());
    attributes.insert("sizeZ".to_string(), series.size_z.to_string());
    attributes.insert("sizeC".to_string(), series.channels.len().to_string());
    attributes.insert("sizeT".to_string(), series.size_t.to_string());
    if let Some(pixel_type) = pixel_type(&series.channels) {
        attributes.insert("pixelType".to_string(), pixel_type.to_string());
    }
    for (axis, voxel) in [
        ("voxelX", series.voxel_x),
        ("voxelY", series.voxel_y),
        ("voxelZ", series.voxel_z),
    ] {
        if let Some(value) = voxel {
            attributes.insert(axis.to_string(), value.to_string());
        }
    }
    for (index, channel) in series.channels.iter().enumerate() {
        attributes.insert(format!("channelName{index}"), channel.name.clone());
    }
    SeriesInfo {
        name: series.name.clone(),
        attributes,
    }
}

fn pixel_type(channels: &[LifChannel]) -> Option<&'static str> {
    let bits = channels.iter().map(|channel| channel.resolution).max()?;
    Some(match bits {
        0..=8 => "uint8",
        9..=16 => "uint16",
        _ => "uint32",
    })
}

/// Reader for Leica LIF image containers.
///
/// Only the XML descriptor and the block framing are decoded; image payloads
/// are skipped. Series metadata is extracted from the descriptor text.
#[derive(Debug, Default)]
pub struct LifReader;

impl LifReader {
    pub fn new() -> Self {
        Self
    }
}

impl FormatReader for LifReader {
    fn format(&self) -> FormatType {
        FormatType::Lif
    }

    fn parse(&self, path: &Utf8Path) -> Result<ParsedDataset, ImporterError> {
        Ok(LifFile::open(path)?.into_parsed())
    }
}

fn read_block_prelude(reader: &mut SegmentReader<'_>) -> Result<u32, ImporterError> {
    let offset = reader.position();
    let magic = reader.read_u32(ByteOrder::Little)?;
    if magic != BLOCK_MAGIC {
        return Err(ImporterError::OffsetMismatch(format!(
            "bad container magic 0x{magic:08X} at offset {offset}"
        )));
    }
    let block_len = reader.read_u32(ByteOrder::Little)?;
    expect_test_byte(reader)?;
    Ok(block_len)
}

fn expect_test_byte(reader: &mut SegmentReader<'_>) -> Result<(), ImporterError> {
    let offset = reader.position();
    let byte = reader.read_u8()?;
    if byte != TEST_BYTE {
        return Err(ImporterError::OffsetMismatch(format!(
            "bad block test byte 0x{byte:02X} at offset {offset}"
        )));
    }
    Ok(())
}

fn read_descriptor_block(reader: &mut SegmentReader<'_>) -> Result<String, ImporterError> {
    let block_len = read_block_prelude(reader)?;
    let text_units = reader.read_u32(ByteOrder::Little)? as usize;
    let expected = 5 + 2 * text_units as u64;
    if u64::from(block_len) != expected {
        return Err(ImporterError::OffsetMismatch(format!(
            "descriptor block length {block_len} disagrees with text length {text_units}"
        )));
    }
    reader.read_utf16le(text_units)
}

fn read_memory_block(
    reader: &mut SegmentReader<'_>,
    version: u32,
) -> Result<MemoryBlock, ImporterError> {
    let block_len = read_block_prelude(reader)?;
    let memory_len = match version {
        1 => u64::from(reader.read_u32(ByteOrder::Little)?),
        _ => reader.read_u64(ByteOrder::Little)?,
    };
    expect_test_byte(reader)?;
    let id_units = reader.read_u32(ByteOrder::Little)? as usize;

    let memory_field = if version == 1 { 4u64 } else { 8 };
    let expected = 1 + memory_field + 1 + 4 + 2 * id_units as u64;
    if u64::from(block_len) != expected {
        return Err(ImporterError::OffsetMismatch(format!(
            "memory block length {block_len} disagrees with id length {id_units}"
        )));
    }

    let id = reader.read_utf16le(id_units)?;
    let payload = usize::try_from(memory_len).map_err(|_| {
        ImporterError::OffsetMismatch(format!("memory block of {memory_len} bytes is not addressable"))
    })?;
    reader.take(payload)?;
    Ok(MemoryBlock {
        id,
        len: memory_len,
    })
}

fn container_version(xml: &str) -> Result<u32, ImporterError> {
    if !xml.contains("<LMSDataContainerHeader") {
        return Err(ImporterError::MalformedTextSegment(
            "descriptor has no LMSDataContainerHeader element".to_string(),
        ));
    }
    let version_re = Regex::new(r#"<LMSDataContainerHeader[^>]*\bVersion="(\d+)""#).unwrap();
    let version: u32 = version_re
        .captures(xml)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| ImporterError::UnsupportedVersion("unspecified".to_string()))?;
    if version != 1 && version != 2 {
        return Err(ImporterError::UnsupportedVersion(version.to_string()));
    }
    Ok(version)
}

/// Pull every `<Element>` that carries an `<ImageDescription>` out of the
/// descriptor text. Attribute order inside tags is not fixed, so each tag is
/// matched first and its attributes extracted separately.
fn parse_series(xml: &str) -> Vec<LifSeries> {
    let name_re = Regex::new(r#"\bName="([^"]*)""#).unwrap();
    let dimension_re = Regex::new(r"<Dimension\b[^>]*>").unwrap();
    let channel_re = Regex::new(r"<ChannelDescription\b[^>]*>").unwrap();
    let dim_id_re = Regex::new(r#"\bDimID="(\d+)""#).unwrap();
    let count_re = Regex::new(r#"\bNumberOfElements="(\d+)""#).unwrap();
    let length_re = Regex::new(r#"\bLength="([^"]+)""#).unwrap();
    let resolution_re = Regex::new(r#"\bResolution="(\d+)""#).unwrap();

    let mut series = Vec::new();
    let starts: Vec<usize> = xml.match_indices("<Element ").map(|(i, _)| i).collect();
    for (index, start) in starts.iter().enumerate() {
        let end = starts.get(index + 1).copied().unwrap_or(xml.len());
        let span = &xml[*start..end];
        if !span.contains("<ImageDescription") {
            continue;
        }

        let open_tag_end = span.find('>').unwrap_or(span.len());
        let name = name_re
            .captures(&span[..open_tag_end])
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| format!("series_{index}"));

        // Leica numbers dimensions 1=X, 2=Y, 3=Z, 4=T.
        let mut sizes = [1u64; 4];
        let mut voxels = [None; 4];
        for tag in dimension_re.find_iter(span) {
            let tag = tag.as_str();
            let Some(dim_id) = capture_u64(&dim_id_re, tag) else {
                continue;
            };
            let Some(count) = capture_u64(&count_re, tag) else {
                continue;
            };
            let axis = match dim_id {
                1..=4 => (dim_id - 1) as usize,
                _ => continue,
            };
            sizes[axis] = count;
            if count > 0
                && let Some(length) = length_re
                    .captures(tag)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<f64>().ok())
            {
                voxels[axis] = Some(length / count as f64);
            }
        }

        let channels = channel_re
            .find_iter(span)
            .map(|tag| {
                let tag = tag.as_str();
                LifChannel {
                    name: name_re
                        .captures(tag)
                        .and_then(|caps| caps.get(1))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                    resolution: capture_u64(&resolution_re, tag).unwrap_or(8) as u32,
                }
            })
            .collect();

        series.push(LifSeries {
            name,
            size_x: sizes[0],
            size_y: sizes[1],
            size_z: sizes[2],
            size_t: sizes[3],
            channels,
            voxel_x: voxels[0],
            voxel_y: voxels[1],
            voxel_z: voxels[2],
        });
    }
    series
}

fn capture_u64(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn utf16_bytes(text: &str) -> Vec<u8> {
        text.encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect()
    }

    /// Assemble a synthetic version 2 container.
    fn build_lif(xml: &str, blocks: &[(&str, &[u8])]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let text = utf16_bytes(xml);
        let units = xml.encode_utf16().count() as u32;
        bytes.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&(5 + 2 * units).to_le_bytes());
        bytes.push(TEST_BYTE);
        bytes.extend_from_slice(&units.to_le_bytes());
        bytes.extend_from_slice(&text);

        for (id, payload) in blocks {
            let id_units = id.encode_utf16().count() as u32;
            bytes.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
            bytes.extend_from_slice(&(1 + 8 + 1 + 4 + 2 * id_units).to_le_bytes());
            bytes.push(TEST_BYTE);
            bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            bytes.push(TEST_BYTE);
            bytes.extend_from_slice(&id_units.to_le_bytes());
            bytes.extend_from_slice(&utf16_bytes(id));
            bytes.extend_from_slice(payload);
        }
        bytes
    }

    const DESCRIPTOR: &str = r#"<LMSDataContainerHeader Version="2">
      <Element Name="Project.lif">
        <Children>
          <Element Name="Series_1">
            <Data>
              <Image>
                <ImageDescription>
                  <Dimension DimID="1" NumberOfElements="512" Length="4.6e-4"/>
                  <Dimension DimID="2" NumberOfElements="256" Length="2.3e-4"/>
                  <Dimension DimID="3" NumberOfElements="10"/>
                  <ChannelDescription Name="GFP" Resolution="16"/>
                  <ChannelDescription Name="DAPI" Resolution="16"/>
                </ImageDescription>
              </Image>
            </Data>
          </Element>
          <Element Name="Series_2">
            <Data>
              <Image>
                <ImageDescription>
                  <Dimension DimID="1" NumberOfElements="64"/>
                  <Dimension DimID="2" NumberOfElements="64"/>
                  <Dimension DimID="4" NumberOfElements="30"/>
                  <ChannelDescription Name="BF" Resolution="8"/>
                </ImageDescription>
              </Image>
            </Data>
          </Element>
        </Children>
      </Element>
    </LMSDataContainerHeader>"#;

    #[test]
    fn parses_descriptor_and_memory_blocks() {
        let bytes = build_lif(
            DESCRIPTOR,
            &[
                ("MemBlock_1", &[0xAB; 128]),
                ("MemBlock_2", &[0xCD; 64]),
            ],
        );
        let file = LifFile::from_bytes(&bytes).unwrap();
        assert_eq!(file.version, 2);
        assert_eq!(file.series.len(), 2);
        assert_eq!(file.memory_blocks.len(), 2);
        assert_eq!(file.memory_blocks[0].id, "MemBlock_1");
        assert_eq!(file.memory_blocks[0].len, 128);

        let first = &file.series[0];
        assert_eq!(first.name, "Series_1");
        assert_eq!(first.size_x, 512);
        assert_eq!(first.size_y, 256);
        assert_eq!(first.size_z, 10);
        assert_eq!(first.size_t, 1);
        assert_eq!(first.channels.len(), 2);
        let voxel_x = first.voxel_x.unwrap();
        assert!((voxel_x - 4.6e-4 / 512.0).abs() < 1e-12);
        assert_eq!(first.voxel_z, None);

        let second = &file.series[1];
        assert_eq!(second.name, "Series_2");
        assert_eq!(second.size_t, 30);
        assert_eq!(second.channels.len(), 1);
    }

    #[test]
    fn parsed_dataset_exposes_series_attributes() {
        let bytes = build_lif(DESCRIPTOR, &[]);
        let parsed = LifFile::from_bytes(&bytes).unwrap().into_parsed();
        assert_eq!(parsed.format, FormatType::Lif);
        assert_eq!(parsed.version, "2");
        assert_eq!(
            parsed.attributes.get("numSeries").map(String::as_str),
            Some("2")
        );
        let series = &parsed.series[0];
        assert_eq!(series.attributes.get("sizeX").map(String::as_str), Some("512"));
        assert_eq!(series.attributes.get("sizeC").map(String::as_str), Some("2"));
        assert_eq!(
            series.attributes.get("pixelType").map(String::as_str),
            Some("uint16")
        );
        assert_eq!(
            series.attributes.get("channelName0").map(String::as_str),
            Some("GFP")
        );
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_lif(DESCRIPTOR, &[]);
        bytes[0] = 0x71;
        let err = LifFile::from_bytes(&bytes).unwrap_err();
        assert_matches!(err, ImporterError::OffsetMismatch(_));
    }

    #[test]
    fn rejects_bad_test_byte() {
        let mut bytes = build_lif(DESCRIPTOR, &[]);
        bytes[8] = 0x00;
        let err = LifFile::from_bytes(&bytes).unwrap_err();
        assert_matches!(err, ImporterError::OffsetMismatch(_));
    }

    #[test]
    fn truncated_payload_is_detected() {
        let payload = [0u8; 256];
        let mut bytes = build_lif(DESCRIPTOR, &[("MemBlock_1", &payload)]);
        bytes.truncate(bytes.len() - 100);
        let err = LifFile::from_bytes(&bytes).unwrap_err();
        assert_matches!(err, ImporterError::TruncatedInput { .. });
    }

    #[test]
    fn rejects_unsupported_version() {
        let xml = r#"<LMSDataContainerHeader Version="3"/>"#;
        let bytes = build_lif(xml, &[]);
        let err = LifFile::from_bytes(&bytes).unwrap_err();
        assert_matches!(err, ImporterError::UnsupportedVersion(version) if version == "3");
    }

    #[test]
    fn rejects_foreign_xml() {
        let xml = r#"<Workbook><Sheet/></Workbook>"#;
        let bytes = build_lif(xml, &[]);
        let err = LifFile::from_bytes(&bytes).unwrap_err();
        assert_matches!(err, ImporterError::MalformedTextSegment(_));
    }

    #[test]
    fn descriptor_length_mismatch_is_detected() {
        let mut bytes = build_lif(DESCRIPTOR, &[]);
        // Shrink the declared block length without touching the text.
        let declared = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        bytes[4..8].copy_from_slice(&(declared - 2).to_le_bytes());
        let err = LifFile::from_bytes(&bytes).unwrap_err();
        assert_matches!(err, ImporterError::OffsetMismatch(_));
    }

    #[test]
    fn nameless_channel_defaults() {
        let xml = r#"<LMSDataContainerHeader Version="1">
          <Element Name="S">
            <ImageDescription>
              <Dimension DimID="1" NumberOfElements="4"/>
              <ChannelDescription Resolution="12"/>
            </ImageDescription>
          </Element>
        </LMSDataContainerHeader>"#;
        let bytes = {
            // Version 1 uses a 4-byte memory length field.
            let mut bytes = Vec::new();
            let text = utf16_bytes(xml);
            let units = xml.encode_utf16().count() as u32;
            bytes.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
            bytes.extend_from_slice(&(5 + 2 * units).to_le_bytes());
            bytes.push(TEST_BYTE);
            bytes.extend_from_slice(&units.to_le_bytes());
            bytes.extend_from_slice(&text);

            let id = "Block";
            let id_units = id.encode_utf16().count() as u32;
            bytes.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
            bytes.extend_from_slice(&(1 + 4 + 1 + 4 + 2 * id_units).to_le_bytes());
            bytes.push(TEST_BYTE);
            bytes.extend_from_slice(&8u32.to_le_bytes());
            bytes.push(TEST_BYTE);
            bytes.extend_from_slice(&id_units.to_le_bytes());
            bytes.extend_from_slice(&utf16_bytes(id));
            bytes.extend_from_slice(&[0u8; 8]);
            bytes
        };

        let file = LifFile::from_bytes(&bytes).unwrap();
        assert_eq!(file.version, 1);
        assert_eq!(file.series.len(), 1);
        assert_eq!(file.series[0].channels[0].name, "");
        assert_eq!(file.series[0].channels[0].resolution, 12);
        assert_eq!(file.memory_blocks[0].len, 8);
    }
}
