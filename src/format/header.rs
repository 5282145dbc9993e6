use crate::error::{CodecError, CodecResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// A non-negative real carried on the wire as `raw / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scaled {
    pub scale: u8,
    pub raw: u32,
}

impl Scaled {
    /// Picks the largest scale that keeps `raw` at or below `max`.
    pub fn from_f64(value: f64, max: u32) -> Self {
        let limit = max as f64;
        if !value.is_finite() || value <= 0.0 {
            return Self::default();
        }
        if value >= limit {
            return Self {
                scale: 0,
                raw: value.round().min(limit) as u32,
            };
        }

        let mut scaled = value;
        let mut scale = 0u8;
        while scaled < limit && scale < u8::MAX {
            scale += 1;
            scaled *= 10.0;
        }
        scale -= 1;

        Self {
            scale,
            raw: (scaled / 10.0).round().min(limit) as u32,
        }
    }

    pub fn to_f64(self) -> f64 {
        self.raw as f64 / 10f64.powi(self.scale as i32)
    }

    /// The value the decoder will see after a trip through a 16-bit field.
    pub fn quantize_u16(value: f64) -> f64 {
        Self::from_f64(value, u16::MAX as u32).to_f64()
    }

    pub fn write_u16(self, buf: &mut Vec<u8>) -> CodecResult<()> {
        buf.write_u8(self.scale)?;
        buf.write_u16::<BigEndian>(self.raw.min(u16::MAX as u32) as u16)?;
        Ok(())
    }

    pub fn read_u16(cursor: &mut Cursor<&[u8]>) -> CodecResult<Self> {
        let scale = cursor.read_u8()?;
        let raw = cursor.read_u16::<BigEndian>()? as u32;
        Ok(Self { scale, raw })
    }
}

/// Identifies this crate in the SOF encoder field.
pub const WSQ_ENCODER_ID: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct WsqFrameHeader {
    pub black: u8,
    pub white: u8,
    pub height: u16,
    pub width: u16,
    pub m_shift: f64,
    pub r_scale: f64,
    pub encoder: u8,
    pub software: u16,
}

impl WsqFrameHeader {
    pub fn new(width: u16, height: u16, m_shift: f64, r_scale: f64) -> Self {
        Self {
            black: 0,
            white: 255,
            height,
            width,
            m_shift,
            r_scale,
            encoder: WSQ_ENCODER_ID,
            software: 0,
        }
    }

    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(15);
        buf.write_u8(self.black)?;
        buf.write_u8(self.white)?;
        buf.write_u16::<BigEndian>(self.height)?;
        buf.write_u16::<BigEndian>(self.width)?;
        Scaled::from_f64(self.m_shift, u16::MAX as u32).write_u16(&mut buf)?;
        Scaled::from_f64(self.r_scale, u16::MAX as u32).write_u16(&mut buf)?;
        buf.write_u8(self.encoder)?;
        buf.write_u16::<BigEndian>(self.software)?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> CodecResult<Self> {
        let mut cursor = Cursor::new(payload);
        let black = cursor.read_u8()?;
        let white = cursor.read_u8()?;
        let height = cursor.read_u16::<BigEndian>()?;
        let width = cursor.read_u16::<BigEndian>()?;
        let m_shift = Scaled::read_u16(&mut cursor)?.to_f64();
        let r_scale = Scaled::read_u16(&mut cursor)?.to_f64();
        let encoder = cursor.read_u8()?;
        let software = cursor.read_u16::<BigEndian>()?;

        if width == 0 || height == 0 {
            return Err(CodecError::CorruptStream(format!(
                "frame declares empty image {}x{}",
                width, height
            )));
        }
        if r_scale <= 0.0 {
            return Err(CodecError::CorruptStream(
                "frame rescale factor must be positive".into(),
            ));
        }

        Ok(Self {
            black,
            white,
            height,
            width,
            m_shift,
            r_scale,
            encoder,
            software,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameComponent {
    pub id: u8,
    pub h_factor: u8,
    pub v_factor: u8,
    pub quant_table: u8,
}

/// SOF3 frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub precision: u8,
    pub height: u16,
    pub width: u16,
    pub components: Vec<FrameComponent>,
}

impl FrameHeader {
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(6 + 3 * self.components.len());
        buf.write_u8(self.precision)?;
        buf.write_u16::<BigEndian>(self.height)?;
        buf.write_u16::<BigEndian>(self.width)?;
        buf.write_u8(self.components.len() as u8)?;
        for c in &self.components {
            buf.write_u8(c.id)?;
            buf.write_u8((c.h_factor << 4) | (c.v_factor & 0x0F))?;
            buf.write_u8(c.quant_table)?;
        }
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> CodecResult<Self> {
        let mut cursor = Cursor::new(payload);
        let precision = cursor.read_u8()?;
        let height = cursor.read_u16::<BigEndian>()?;
        let width = cursor.read_u16::<BigEndian>()?;
        let count = cursor.read_u8()?;

        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = cursor.read_u8()?;
            let factors = cursor.read_u8()?;
            let quant_table = cursor.read_u8()?;
            components.push(FrameComponent {
                id,
                h_factor: factors >> 4,
                v_factor: factors & 0x0F,
                quant_table,
            });
        }

        if cursor.position() as usize != payload.len() {
            return Err(CodecError::CorruptStream(
                "frame header length disagrees with its component count".into(),
            ));
        }
        if !(2..=16).contains(&precision) {
            return Err(CodecError::CorruptStream(format!(
                "sample precision {} outside 2..=16",
                precision
            )));
        }
        if width == 0 || height == 0 || components.is_empty() {
            return Err(CodecError::CorruptStream(format!(
                "frame declares empty image {}x{} with {} component(s)",
                width,
                height,
                components.len()
            )));
        }

        Ok(Self {
            precision,
            height,
            width,
            components,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanComponent {
    pub id: u8,
    pub table: u8,
}

/// SOS header. For lossless frames `start` carries the predictor and
/// `approx_low` the point transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHeader {
    pub components: Vec<ScanComponent>,
    pub start: u8,
    pub end: u8,
    pub approx_high: u8,
    pub approx_low: u8,
}

impl ScanHeader {
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + 2 * self.components.len());
        buf.write_u8(self.components.len() as u8)?;
        for c in &self.components {
            buf.write_u8(c.id)?;
            buf.write_u8(c.table << 4)?;
        }
        buf.write_u8(self.start)?;
        buf.write_u8(self.end)?;
        buf.write_u8((self.approx_high << 4) | (self.approx_low & 0x0F))?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> CodecResult<Self> {
        let mut cursor = Cursor::new(payload);
        let count = cursor.read_u8()?;
        if count == 0 || count > 4 {
            return Err(CodecError::CorruptStream(format!(
                "scan component count {} outside 1..=4",
                count
            )));
        }

        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = cursor.read_u8()?;
            let tables = cursor.read_u8()?;
            components.push(ScanComponent {
                id,
                table: tables >> 4,
            });
        }
        let start = cursor.read_u8()?;
        let end = cursor.read_u8()?;
        let approx = cursor.read_u8()?;

        if cursor.position() as usize != payload.len() {
            return Err(CodecError::CorruptStream(
                "scan header length disagrees with its component count".into(),
            ));
        }

        Ok(Self {
            components,
            start,
            end,
            approx_high: approx >> 4,
            approx_low: approx & 0x0F,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_picks_widest_precision() {
        let s = Scaled::from_f64(127.5, u16::MAX as u32);
        assert_eq!(s, Scaled { scale: 2, raw: 12750 });
        assert!((s.to_f64() - 127.5).abs() < 1e-9);

        let tiny = Scaled::from_f64(0.000123456, u16::MAX as u32);
        assert!((tiny.to_f64() - 0.000123456).abs() < 1e-8);
        assert!(tiny.raw <= u16::MAX as u32);

        assert_eq!(Scaled::from_f64(0.0, u16::MAX as u32), Scaled::default());
        assert_eq!(Scaled::from_f64(70000.0, u16::MAX as u32).raw, 65535);
    }

    #[test]
    fn test_wsq_frame_header_layout() {
        let header = WsqFrameHeader::new(500, 400, 127.5, 1.0);
        let bytes = header.encode().unwrap();
        assert_eq!(bytes.len(), 15);
        assert_eq!(&bytes[2..6], &[0x01, 0x90, 0x01, 0xF4]);

        let back = WsqFrameHeader::decode(&bytes).unwrap();
        assert_eq!(back.width, 500);
        assert_eq!(back.height, 400);
        assert!((back.m_shift - 127.5).abs() < 1e-9);
        assert_eq!(back.encoder, WSQ_ENCODER_ID);
    }

    #[test]
    fn test_frame_header_rejects_bad_precision() {
        let header = FrameHeader {
            precision: 17,
            height: 2,
            width: 2,
            components: vec![FrameComponent {
                id: 1,
                h_factor: 1,
                v_factor: 1,
                quant_table: 0,
            }],
        };
        let bytes = header.encode().unwrap();
        assert!(FrameHeader::decode(&bytes).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_scan_header_fields() {
        let scan = ScanHeader {
            components: vec![ScanComponent { id: 1, table: 0 }],
            start: 6,
            end: 0,
            approx_high: 0,
            approx_low: 2,
        };
        let bytes = scan.encode().unwrap();
        assert_eq!(bytes, vec![1, 1, 0x00, 6, 0, 0x02]);
        assert_eq!(ScanHeader::decode(&bytes).unwrap(), scan);
    }
}
