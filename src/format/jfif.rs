use crate::error::{CodecError, CodecResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

const JFIF_ID: &[u8; 5] = b"JFIF\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DensityUnits {
    AspectOnly = 0,
    PerInch = 1,
    PerCentimeter = 2,
}

impl DensityUnits {
    pub fn from_u8(v: u8) -> CodecResult<Self> {
        match v {
            0 => Ok(Self::AspectOnly),
            1 => Ok(Self::PerInch),
            2 => Ok(Self::PerCentimeter),
            _ => Err(CodecError::CorruptStream(format!(
                "unknown JFIF density unit {}",
                v
            ))),
        }
    }
}

/// APP0 JFIF segment, used only for its pixel density.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JfifHeader {
    pub version: (u8, u8),
    pub units: DensityUnits,
    pub x_density: u16,
    pub y_density: u16,
}

impl JfifHeader {
    pub fn with_ppi(ppi: Option<u32>) -> Self {
        match ppi {
            Some(ppi) if ppi > 0 && ppi <= u16::MAX as u32 => Self {
                version: (1, 2),
                units: DensityUnits::PerInch,
                x_density: ppi as u16,
                y_density: ppi as u16,
            },
            _ => Self {
                version: (1, 2),
                units: DensityUnits::AspectOnly,
                x_density: 1,
                y_density: 1,
            },
        }
    }

    pub fn ppi(&self) -> Option<u32> {
        match self.units {
            DensityUnits::AspectOnly => None,
            DensityUnits::PerInch => Some(self.x_density as u32),
            DensityUnits::PerCentimeter => Some((self.x_density as f64 * 2.54).round() as u32),
        }
    }

    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(14);
        buf.extend_from_slice(JFIF_ID);
        buf.write_u8(self.version.0)?;
        buf.write_u8(self.version.1)?;
        buf.write_u8(self.units as u8)?;
        buf.write_u16::<BigEndian>(self.x_density)?;
        buf.write_u16::<BigEndian>(self.y_density)?;
        // No thumbnail.
        buf.write_u8(0)?;
        buf.write_u8(0)?;
        Ok(buf)
    }

    /// Returns `None` for APP0 segments that are not JFIF (e.g. JFXX).
    pub fn decode(payload: &[u8]) -> CodecResult<Option<Self>> {
        if payload.len() < JFIF_ID.len() || &payload[..JFIF_ID.len()] != JFIF_ID {
            return Ok(None);
        }

        let mut cursor = Cursor::new(payload);
        let mut id = [0u8; 5];
        cursor.read_exact(&mut id)?;
        let major = cursor.read_u8()?;
        let minor = cursor.read_u8()?;
        let units = DensityUnits::from_u8(cursor.read_u8()?)?;
        let x_density = cursor.read_u16::<BigEndian>()?;
        let y_density = cursor.read_u16::<BigEndian>()?;

        Ok(Some(Self {
            version: (major, minor),
            units,
            x_density,
            y_density,
        }))
    }
}
