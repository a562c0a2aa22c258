use crate::error::ImporterError;

/// Byte order declared by the instrument file, resolved before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Bounded cursor over one contiguous region of an acquisition file.
///
/// Every read is range-checked against the view; requests past the end fail
/// with `TruncatedInput` carrying the absolute file offset. Sub-readers
/// borrow the same buffer, so segment parsing never copies payload bytes.
#[derive(Debug, Clone)]
pub struct SegmentReader<'a> {
    bytes: &'a [u8],
    base: usize,
    cursor: usize,
}

impl<'a> SegmentReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::with_base(bytes, 0)
    }

    /// `base` is the absolute offset of `bytes[0]` in the underlying file,
    /// used only for error reporting.
    pub fn with_base(bytes: &'a [u8], base: usize) -> Self {
        Self {
            bytes,
            base,
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Absolute offset of the cursor in the underlying file.
    pub fn position(&self) -> usize {
        self.base + self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.cursor
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn seek(&mut self, offset: usize) -> Result<(), ImporterError> {
        if offset > self.bytes.len() {
            return Err(self.truncated(offset, 0));
        }
        self.cursor = offset;
        Ok(())
    }

    fn truncated(&self, offset: usize, needed: usize) -> ImporterError {
        ImporterError::TruncatedInput {
            offset: self.base + offset,
            needed,
            available: self.bytes.len().saturating_sub(offset.min(self.bytes.len())),
        }
    }

    fn range(&self, start: usize, len: usize) -> Result<&'a [u8], ImporterError> {
        let end = start
            .checked_add(len)
            .ok_or_else(|| self.truncated(start, len))?;
        self.bytes
            .get(start..end)
            .ok_or_else(|| self.truncated(start, len))
    }

    /// Consume `len` bytes from the cursor.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], ImporterError> {
        let slice = self.range(self.cursor, len)?;
        self.cursor += len;
        Ok(slice)
    }

    /// Bounded view over `[start, start + len)` of this reader, cursor at 0.
    pub fn sub_reader(&self, start: usize, len: usize) -> Result<SegmentReader<'a>, ImporterError> {
        let slice = self.range(start, len)?;
        Ok(SegmentReader::with_base(slice, self.base + start))
    }

    pub fn read_u8(&mut self) -> Result<u8, ImporterError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self, order: ByteOrder) -> Result<u16, ImporterError> {
        let bytes: [u8; 2] = self
            .take(2)?
            .try_into()
            .map_err(|_| self.truncated(self.cursor, 2))?;
        Ok(match order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        })
    }

    pub fn read_u32(&mut self, order: ByteOrder) -> Result<u32, ImporterError> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| self.truncated(self.cursor, 4))?;
        Ok(match order {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        })
    }

    pub fn read_u64(&mut self, order: ByteOrder) -> Result<u64, ImporterError> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| self.truncated(self.cursor, 8))?;
        Ok(match order {
            ByteOrder::Little => u64::from_le_bytes(bytes),
            ByteOrder::Big => u64::from_be_bytes(bytes),
        })
    }

    pub fn read_f32(&mut self, order: ByteOrder) -> Result<f32, ImporterError> {
        Ok(f32::from_bits(self.read_u32(order)?))
    }

    pub fn read_f64(&mut self, order: ByteOrder) -> Result<f64, ImporterError> {
        Ok(f64::from_bits(self.read_u64(order)?))
    }

    /// Fixed-width ASCII field, returned with surrounding spaces removed.
    pub fn read_ascii_trimmed(&mut self, len: usize) -> Result<&'a str, ImporterError> {
        let offset = self.position();
        let slice = self.take(len)?;
        match std::str::from_utf8(slice) {
            Ok(text) if slice.is_ascii() => Ok(text.trim_matches(' ')),
            _ => Err(ImporterError::MalformedTextSegment(format!(
                "non-ASCII bytes in fixed field at offset {offset}"
            ))),
        }
    }

    /// UTF-16LE string of `units` code units (not bytes).
    pub fn read_utf16le(&mut self, units: usize) -> Result<String, ImporterError> {
        let offset = self.position();
        let byte_len = units
            .checked_mul(2)
            .ok_or_else(|| self.truncated(self.cursor, units))?;
        let slice = self.take(byte_len)?;
        let code_units = slice
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
        char::decode_utf16(code_units)
            .collect::<Result<String, _>>()
            .map_err(|_| {
                ImporterError::MalformedTextSegment(format!(
                    "invalid UTF-16 text at offset {offset}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn take_past_end_reports_absolute_offset() {
        let bytes = [1u8, 2, 3];
        let mut reader = SegmentReader::with_base(&bytes, 100);
        reader.take(2).unwrap();
        let err = reader.take(2).unwrap_err();
        assert_matches!(
            err,
            ImporterError::TruncatedInput {
                offset: 102,
                needed: 2,
                available: 1,
            }
        );
    }

    #[test]
    fn integer_reads_honor_byte_order() {
        let bytes = [0x01u8, 0x02, 0x03, 0x04];
        let mut reader = SegmentReader::new(&bytes);
        assert_eq!(reader.read_u16(ByteOrder::Little).unwrap(), 0x0201);
        reader.seek(0).unwrap();
        assert_eq!(reader.read_u16(ByteOrder::Big).unwrap(), 0x0102);
        reader.seek(0).unwrap();
        assert_eq!(reader.read_u32(ByteOrder::Little).unwrap(), 0x0403_0201);
    }

    #[test]
    fn float_reads_round_trip_bits() {
        let value = 1234.5f32;
        let bytes = value.to_le_bytes();
        let mut reader = SegmentReader::new(&bytes);
        assert_eq!(reader.read_f32(ByteOrder::Little).unwrap(), value);
    }

    #[test]
    fn sub_reader_is_bounded_and_offset() {
        let bytes = [0u8, 1, 2, 3, 4, 5];
        let reader = SegmentReader::new(&bytes);
        let mut sub = reader.sub_reader(2, 3).unwrap();
        assert_eq!(sub.position(), 2);
        assert_eq!(sub.take(3).unwrap(), &[2, 3, 4]);
        assert_matches!(sub.take(1), Err(ImporterError::TruncatedInput { .. }));

        assert_matches!(
            reader.sub_reader(4, 10),
            Err(ImporterError::TruncatedInput { .. })
        );
        assert_matches!(
            reader.sub_reader(usize::MAX, 2),
            Err(ImporterError::TruncatedInput { .. })
        );
    }

    #[test]
    fn ascii_trimmed_strips_padding() {
        let bytes = b"   FCS3.0  ";
        let mut reader = SegmentReader::new(bytes);
        assert_eq!(reader.read_ascii_trimmed(bytes.len()).unwrap(), "FCS3.0");
    }

    #[test]
    fn ascii_rejects_high_bytes() {
        let bytes = [0x46, 0x43, 0xFF, 0x33];
        let mut reader = SegmentReader::new(&bytes);
        let err = reader.read_ascii_trimmed(4).unwrap_err();
        assert_matches!(err, ImporterError::MalformedTextSegment(_));
    }

    #[test]
    fn utf16_reads_code_units() {
        let text = "Series 1";
        let mut encoded = Vec::new();
        for unit in text.encode_utf16() {
            encoded.extend_from_slice(&unit.to_le_bytes());
        }
        encoded.extend_from_slice(&[0xAA, 0xBB]);
        let mut reader = SegmentReader::new(&encoded);
        assert_eq!(reader.read_utf16le(text.len()).unwrap(), text);
    }

    #[test]
    fn unpaired_surrogate_is_malformed() {
        let encoded = 0xD800u16.to_le_bytes();
        let mut reader = SegmentReader::new(&encoded);
        let err = reader.read_utf16le(1).unwrap_err();
        assert_matches!(err, ImporterError::MalformedTextSegment(_));
    }
}
