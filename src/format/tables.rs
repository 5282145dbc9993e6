use super::header::Scaled;
use crate::error::{CodecError, CodecResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const MAX_SUBBANDS: usize = 64;
pub const MAX_FILTER_LEN: usize = 31;

/// DTT segment: the analysis filter pair, stored as the right half of each
/// symmetric filter.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformTable {
    pub lowpass: Vec<f64>,
    pub highpass: Vec<f64>,
}

impl TransformTable {
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.write_u8(self.highpass.len() as u8)?;
        buf.write_u8(self.lowpass.len() as u8)?;
        for filter in [&self.lowpass, &self.highpass] {
            for &tap in &filter[filter.len() / 2..] {
                buf.write_u8(if tap < 0.0 { 1 } else { 0 })?;
                let scaled = Scaled::from_f64(tap.abs(), u32::MAX);
                buf.write_u8(scaled.scale)?;
                buf.write_u32::<BigEndian>(scaled.raw)?;
            }
        }
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> CodecResult<Self> {
        let mut cursor = Cursor::new(payload);
        let high_len = cursor.read_u8()? as usize;
        let low_len = cursor.read_u8()? as usize;

        for len in [high_len, low_len] {
            if len == 0 || len > MAX_FILTER_LEN {
                return Err(CodecError::CorruptStream(format!(
                    "filter length {} outside 1..={}",
                    len, MAX_FILTER_LEN
                )));
            }
            if len % 2 == 0 {
                return Err(CodecError::Unsupported(format!(
                    "even-length ({}) wavelet filters",
                    len
                )));
            }
        }

        let lowpass = Self::read_symmetric(&mut cursor, low_len)?;
        let highpass = Self::read_symmetric(&mut cursor, high_len)?;

        Ok(Self { lowpass, highpass })
    }

    fn read_symmetric(cursor: &mut Cursor<&[u8]>, len: usize) -> CodecResult<Vec<f64>> {
        let half = len / 2;
        let mut taps = vec![0.0; len];
        for offset in 0..=half {
            let negative = cursor.read_u8()? != 0;
            let scale = cursor.read_u8()?;
            let raw = cursor.read_u32::<BigEndian>()?;
            let magnitude = Scaled { scale, raw }.to_f64();
            let tap = if negative { -magnitude } else { magnitude };
            taps[half + offset] = tap;
            taps[half - offset] = tap;
        }
        Ok(taps)
    }
}

/// DQT segment: bin centre plus per-subband bin and zero-bin widths.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantTable {
    pub bin_center: f64,
    pub bin_widths: [f64; MAX_SUBBANDS],
    pub zero_bins: [f64; MAX_SUBBANDS],
}

impl QuantTable {
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(3 + 6 * MAX_SUBBANDS);
        Scaled::from_f64(self.bin_center, u16::MAX as u32).write_u16(&mut buf)?;
        for band in 0..MAX_SUBBANDS {
            Scaled::from_f64(self.bin_widths[band], u16::MAX as u32).write_u16(&mut buf)?;
            Scaled::from_f64(self.zero_bins[band], u16::MAX as u32).write_u16(&mut buf)?;
        }
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> CodecResult<Self> {
        let mut cursor = Cursor::new(payload);
        let bin_center = Scaled::read_u16(&mut cursor)?.to_f64();
        let mut bin_widths = [0.0; MAX_SUBBANDS];
        let mut zero_bins = [0.0; MAX_SUBBANDS];
        for band in 0..MAX_SUBBANDS {
            bin_widths[band] = Scaled::read_u16(&mut cursor)?.to_f64();
            zero_bins[band] = Scaled::read_u16(&mut cursor)?.to_f64();
        }

        Ok(Self {
            bin_center,
            bin_widths,
            zero_bins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_table_is_58_byte_segment() {
        let table = TransformTable {
            lowpass: vec![0.1, -0.2, 0.8, -0.2, 0.1],
            highpass: vec![-0.5, 1.0, -0.5],
        };
        let bytes = table.encode().unwrap();
        assert_eq!(bytes.len(), 2 + 6 * (3 + 2));

        let back = TransformTable::decode(&bytes).unwrap();
        for (a, b) in back.lowpass.iter().zip(&table.lowpass) {
            assert!((a - b).abs() < 1e-9);
        }
        assert_eq!(back.highpass.len(), 3);
        assert!(back.highpass[0] < 0.0);
    }

    #[test]
    fn test_even_filters_are_unsupported() {
        let bytes = [4u8, 5u8];
        assert!(matches!(
            TransformTable::decode(&bytes),
            Err(CodecError::Unsupported(_))
        ));
    }

    #[test]
    fn test_quant_table_layout() {
        let mut table = QuantTable {
            bin_center: 0.44,
            bin_widths: [0.0; MAX_SUBBANDS],
            zero_bins: [0.0; MAX_SUBBANDS],
        };
        table.bin_widths[7] = 3.25;
        table.zero_bins[7] = 3.9;
        let bytes = table.encode().unwrap();
        assert_eq!(bytes.len(), 387);
        assert_eq!(&bytes[3..9], &[0, 0, 0, 0, 0, 0]);

        let back = QuantTable::decode(&bytes).unwrap();
        assert!((back.bin_center - 0.44).abs() < 1e-9);
        assert!((back.bin_widths[7] - 3.25).abs() < 1e-9);
        assert_eq!(back.bin_widths[8], 0.0);
    }
}
