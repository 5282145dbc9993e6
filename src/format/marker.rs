use crate::error::{CodecError, CodecResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// Marker codes of the FBI WSQ interchange format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsqMarker {
    StartOfImage,
    EndOfImage,
    StartOfFrame,
    StartOfBlock,
    TransformTable,
    QuantizationTable,
    HuffmanTable,
    RestartInterval,
    Comment,
    Restart(u8),
    Other(u16),
}

impl WsqMarker {
    pub fn from_code(code: u16) -> Self {
        match code {
            0xFFA0 => Self::StartOfImage,
            0xFFA1 => Self::EndOfImage,
            0xFFA2 => Self::StartOfFrame,
            0xFFA3 => Self::StartOfBlock,
            0xFFA4 => Self::TransformTable,
            0xFFA5 => Self::QuantizationTable,
            0xFFA6 => Self::HuffmanTable,
            0xFFA7 => Self::RestartInterval,
            0xFFA8 => Self::Comment,
            0xFFB0..=0xFFB7 => Self::Restart((code & 0x07) as u8),
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::StartOfImage => 0xFFA0,
            Self::EndOfImage => 0xFFA1,
            Self::StartOfFrame => 0xFFA2,
            Self::StartOfBlock => 0xFFA3,
            Self::TransformTable => 0xFFA4,
            Self::QuantizationTable => 0xFFA5,
            Self::HuffmanTable => 0xFFA6,
            Self::RestartInterval => 0xFFA7,
            Self::Comment => 0xFFA8,
            Self::Restart(m) => 0xFFB0 | (*m as u16 & 0x07),
            Self::Other(code) => *code,
        }
    }
}

/// Marker codes of ITU T.81 used by the lossless (process 14) codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegMarker {
    StartOfImage,
    EndOfImage,
    /// SOFn; only n == 3 (lossless, Huffman) is decodable here.
    StartOfFrame(u8),
    HuffmanTable,
    StartOfScan,
    RestartInterval,
    Comment,
    App(u8),
    Restart(u8),
    Other(u16),
}

impl JpegMarker {
    pub fn from_code(code: u16) -> Self {
        match code {
            0xFFD8 => Self::StartOfImage,
            0xFFD9 => Self::EndOfImage,
            0xFFC4 => Self::HuffmanTable,
            0xFFDA => Self::StartOfScan,
            0xFFDD => Self::RestartInterval,
            0xFFFE => Self::Comment,
            // C4, C8 and CC sit inside the SOF range but are not frames.
            0xFFC0..=0xFFCF if code != 0xFFC8 && code != 0xFFCC => {
                Self::StartOfFrame((code & 0x0F) as u8)
            }
            0xFFD0..=0xFFD7 => Self::Restart((code & 0x07) as u8),
            0xFFE0..=0xFFEF => Self::App((code & 0x0F) as u8),
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::StartOfImage => 0xFFD8,
            Self::EndOfImage => 0xFFD9,
            Self::StartOfFrame(n) => 0xFFC0 | (*n as u16 & 0x0F),
            Self::HuffmanTable => 0xFFC4,
            Self::StartOfScan => 0xFFDA,
            Self::RestartInterval => 0xFFDD,
            Self::Comment => 0xFFFE,
            Self::App(n) => 0xFFE0 | (*n as u16 & 0x0F),
            Self::Restart(m) => 0xFFD0 | (*m as u16 & 0x07),
            Self::Other(code) => *code,
        }
    }
}

pub struct SegmentReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SegmentReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Reads the next two-byte marker code, skipping 0xFF fill bytes.
    pub fn read_marker(&mut self) -> CodecResult<u16> {
        let lead = self.next_byte()?;
        if lead != 0xFF {
            return Err(CodecError::CorruptStream(format!(
                "expected marker at offset {}, found {:#04x}",
                self.pos - 1,
                lead
            )));
        }

        let mut code = self.next_byte()?;
        while code == 0xFF {
            code = self.next_byte()?;
        }
        if code == 0x00 {
            return Err(CodecError::CorruptStream(format!(
                "stuffed byte where a marker was expected at offset {}",
                self.pos - 2
            )));
        }

        Ok(0xFF00 | code as u16)
    }

    /// Returns the payload of a length-prefixed segment (length bytes excluded).
    pub fn read_segment(&mut self) -> CodecResult<&'a [u8]> {
        let mut rest = &self.data[self.pos.min(self.data.len())..];
        let length = rest.read_u16::<BigEndian>()? as usize;
        if length < 2 {
            return Err(CodecError::CorruptStream(format!(
                "segment length {} at offset {} is too small",
                length, self.pos
            )));
        }

        let start = self.pos + 2;
        let end = self.pos + length;
        if end > self.data.len() {
            return Err(CodecError::CorruptStream(format!(
                "segment at offset {} needs {} bytes, {} available",
                self.pos,
                length,
                self.data.len() - self.pos
            )));
        }

        self.pos = end;
        Ok(&self.data[start..end])
    }

    /// Collects entropy-coded bytes up to the next marker, removing the
    /// stuffed zero that follows every 0xFF data byte.
    pub fn read_entropy_segment(&mut self) -> CodecResult<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let byte = self.next_byte().map_err(|_| {
                CodecError::CorruptStream("entropy-coded data is not terminated by a marker".into())
            })?;
            if byte != 0xFF {
                out.push(byte);
                continue;
            }

            match self.data.get(self.pos) {
                Some(0x00) => {
                    out.push(0xFF);
                    self.pos += 1;
                }
                Some(_) => {
                    self.pos -= 1;
                    return Ok(out);
                }
                None => {
                    return Err(CodecError::CorruptStream(
                        "stream ends inside a marker".into(),
                    ))
                }
            }
        }
    }

    fn next_byte(&mut self) -> CodecResult<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| CodecError::CorruptStream("unexpected end of stream".into()))?;
        self.pos += 1;
        Ok(byte)
    }
}

pub struct SegmentWriter {
    buffer: Vec<u8>,
}

impl SegmentWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn write_marker(&mut self, code: u16) -> CodecResult<()> {
        self.buffer.write_u16::<BigEndian>(code)?;
        Ok(())
    }

    pub fn write_segment(&mut self, code: u16, payload: &[u8]) -> CodecResult<()> {
        let length = payload.len() + 2;
        if length > u16::MAX as usize {
            return Err(CodecError::EncodingFailure(format!(
                "segment {:#06x} payload of {} bytes does not fit a 16-bit length",
                code,
                payload.len()
            )));
        }
        self.write_marker(code)?;
        self.buffer.write_u16::<BigEndian>(length as u16)?;
        self.buffer.extend_from_slice(payload);
        Ok(())
    }

    /// Appends already byte-stuffed entropy-coded data.
    pub fn write_entropy_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

impl Default for SegmentWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_codes() {
        assert_eq!(WsqMarker::from_code(0xFFA3), WsqMarker::StartOfBlock);
        assert_eq!(WsqMarker::from_code(0xFFB5), WsqMarker::Restart(5));
        assert_eq!(WsqMarker::Restart(5).code(), 0xFFB5);
        assert_eq!(JpegMarker::from_code(0xFFC3), JpegMarker::StartOfFrame(3));
        assert_eq!(JpegMarker::from_code(0xFFC4), JpegMarker::HuffmanTable);
        assert_eq!(JpegMarker::from_code(0xFFE0), JpegMarker::App(0));
        assert_eq!(JpegMarker::StartOfFrame(3).code(), 0xFFC3);
    }

    #[test]
    fn test_segment_layout() {
        let mut writer = SegmentWriter::new();
        writer.write_marker(0xFFD8).unwrap();
        writer.write_segment(0xFFFE, b"hi").unwrap();
        let bytes = writer.finish();
        assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF, 0xFE, 0x00, 0x04, b'h', b'i']);

        let mut reader = SegmentReader::new(&bytes);
        assert_eq!(reader.read_marker().unwrap(), 0xFFD8);
        assert_eq!(reader.read_marker().unwrap(), 0xFFFE);
        assert_eq!(reader.read_segment().unwrap(), b"hi");
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_truncated_segment_is_corrupt() {
        let bytes = [0xFF, 0xFE, 0x00, 0x08, b'a'];
        let mut reader = SegmentReader::new(&bytes);
        reader.read_marker().unwrap();
        assert!(reader.read_segment().unwrap_err().is_corrupt());
    }

    #[test]
    fn test_entropy_segment_unstuffing() {
        let bytes = [0x12, 0xFF, 0x00, 0x34, 0xFF, 0xD9];
        let mut reader = SegmentReader::new(&bytes);
        let data = reader.read_entropy_segment().unwrap();
        assert_eq!(data, vec![0x12, 0xFF, 0x34]);
        assert_eq!(reader.read_marker().unwrap(), 0xFFD9);

        let dangling = [0x12, 0xFF];
        let mut reader = SegmentReader::new(&dangling);
        assert!(reader.read_entropy_segment().unwrap_err().is_corrupt());
    }
}
