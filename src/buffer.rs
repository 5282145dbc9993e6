use crate::error::{CodecError, CodecResult};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};

pub const MAX_DEPTH: u8 = 16;
pub const MAX_CHANNELS: u8 = 4;

/// A rectangular, row-major, channel-interleaved sample buffer.
///
/// Samples are stored widened to `u16` regardless of `depth`, so one type
/// serves 8-bit fingerprint scans and 16-bit lossless captures alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub channels: u8,
    /// Scanning resolution in pixels per inch, when known.
    pub ppi: Option<u32>,
    pub samples: Vec<u16>,
}

impl RawImage {
    pub fn new(
        width: u32,
        height: u32,
        depth: u8,
        channels: u8,
        samples: Vec<u16>,
    ) -> CodecResult<Self> {
        let image = Self {
            width,
            height,
            depth,
            channels,
            ppi: None,
            samples,
        };
        image.validate()?;
        Ok(image)
    }

    /// Checks the public fields against each other. Encoders call this
    /// first, since the fields may have been edited after construction.
    pub fn validate(&self) -> CodecResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::InvalidInput(format!(
                "image dimensions must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(CodecError::InvalidInput(format!(
                "bit depth {} outside 1..={}",
                self.depth, MAX_DEPTH
            )));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(CodecError::InvalidInput(format!(
                "channel count {} outside 1..={}",
                self.channels, MAX_CHANNELS
            )));
        }

        let expected = (self.width as u64)
            .checked_mul(self.height as u64)
            .and_then(|n| n.checked_mul(self.channels as u64));
        if expected != Some(self.samples.len() as u64) {
            return Err(CodecError::InvalidInput(format!(
                "sample count mismatch: {}x{}x{} image holds {} samples",
                self.width,
                self.height,
                self.channels,
                self.samples.len()
            )));
        }

        let max = max_sample(self.depth);
        if let Some(pos) = self.samples.iter().position(|&s| s > max) {
            return Err(CodecError::InvalidInput(format!(
                "sample {} at index {} exceeds {}-bit range",
                self.samples[pos], pos, self.depth
            )));
        }
        Ok(())
    }

    pub fn gray8(width: u32, height: u32, pixels: Vec<u8>) -> CodecResult<Self> {
        let samples = pixels.into_iter().map(u16::from).collect();
        Self::new(width, height, 8, 1, samples)
    }

    pub fn with_ppi(mut self, ppi: u32) -> Self {
        self.ppi = Some(ppi);
        self
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn get(&self, x: u32, y: u32, channel: u8) -> Option<u16> {
        if x >= self.width || y >= self.height || channel >= self.channels {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * self.channels as usize
            + channel as usize;
        self.samples.get(idx).copied()
    }

    pub fn is_gray8(&self) -> bool {
        self.depth == 8 && self.channels == 1
    }

    pub fn to_gray8(&self) -> CodecResult<Vec<u8>> {
        if !self.is_gray8() {
            return Err(CodecError::InvalidInput(format!(
                "expected 8-bit grayscale, got {}-bit with {} channel(s)",
                self.depth, self.channels
            )));
        }
        self.samples
            .iter()
            .map(|&s| {
                u8::try_from(s).map_err(|_| {
                    CodecError::InvalidInput(format!("sample {} exceeds the 8-bit range", s))
                })
            })
            .collect()
    }
}

pub fn max_sample(depth: u8) -> u16 {
    if depth >= 16 {
        u16::MAX
    } else {
        (1u16 << depth) - 1
    }
}

impl TryFrom<&GrayImage> for RawImage {
    type Error = CodecError;

    fn try_from(img: &GrayImage) -> CodecResult<Self> {
        Self::gray8(img.width(), img.height(), img.as_raw().clone())
    }
}

impl TryFrom<&ImageBuffer<Luma<u16>, Vec<u16>>> for RawImage {
    type Error = CodecError;

    fn try_from(img: &ImageBuffer<Luma<u16>, Vec<u16>>) -> CodecResult<Self> {
        Self::new(img.width(), img.height(), 16, 1, img.as_raw().clone())
    }
}

impl TryFrom<&RawImage> for DynamicImage {
    type Error = CodecError;

    fn try_from(raw: &RawImage) -> CodecResult<Self> {
        raw.validate()?;
        let narrow = || -> Vec<u8> {
            let shift = raw.depth.saturating_sub(8);
            raw.samples.iter().map(|&s| (s >> shift) as u8).collect()
        };
        let wide = || -> Vec<u16> {
            let shift = 16 - raw.depth;
            raw.samples.iter().map(|&s| s << shift).collect()
        };
        let fail = || CodecError::InvalidInput("buffer does not match its dimensions".into());

        let image = match (raw.channels, raw.depth <= 8) {
            (1, true) => DynamicImage::ImageLuma8(
                ImageBuffer::<Luma<u8>, _>::from_raw(raw.width, raw.height, narrow())
                    .ok_or_else(fail)?,
            ),
            (1, false) => DynamicImage::ImageLuma16(
                ImageBuffer::<Luma<u16>, _>::from_raw(raw.width, raw.height, wide())
                    .ok_or_else(fail)?,
            ),
            (2, _) => DynamicImage::ImageLumaA8(
                ImageBuffer::<LumaA<u8>, _>::from_raw(raw.width, raw.height, narrow())
                    .ok_or_else(fail)?,
            ),
            (3, _) => DynamicImage::ImageRgb8(
                ImageBuffer::<Rgb<u8>, _>::from_raw(raw.width, raw.height, narrow())
                    .ok_or_else(fail)?,
            ),
            (4, _) => DynamicImage::ImageRgba8(
                ImageBuffer::<Rgba<u8>, _>::from_raw(raw.width, raw.height, narrow())
                    .ok_or_else(fail)?,
            ),
            (n, _) => {
                return Err(CodecError::InvalidInput(format!(
                    "unsupported channel count {}",
                    n
                )))
            }
        };
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_out_of_range_samples() {
        let err = RawImage::new(2, 1, 4, 1, vec![3, 16]).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_rejects_length_mismatch() {
        assert!(RawImage::new(3, 3, 8, 1, vec![0; 8]).is_err());
        assert!(RawImage::new(0, 3, 8, 1, vec![]).is_err());
    }

    #[test]
    fn test_gray_image_conversion() {
        let gray = GrayImage::from_fn(4, 3, |x, y| Luma([(x * 10 + y) as u8]));
        let raw = RawImage::try_from(&gray).unwrap();
        assert_eq!(raw.get(3, 2, 0), Some(32));
        assert_eq!(raw.get(4, 0, 0), None);

        let back = DynamicImage::try_from(&raw).unwrap();
        assert_eq!(back.to_luma8().as_raw(), gray.as_raw());
    }

    #[test]
    fn test_empty_buffers_are_rejected() {
        assert!(RawImage::try_from(&GrayImage::new(0, 4)).unwrap_err().is_invalid_input());
        let wide: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::new(5, 0);
        assert!(RawImage::try_from(&wide).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_validate_catches_edited_fields() {
        let mut raw = RawImage::gray8(2, 2, vec![1, 2, 3, 4]).unwrap();
        assert!(raw.validate().is_ok());

        raw.samples[3] = 300;
        assert!(raw.validate().unwrap_err().is_invalid_input());
        assert!(raw.to_gray8().unwrap_err().is_invalid_input());

        raw.samples[3] = 4;
        raw.width = 0;
        assert!(raw.validate().unwrap_err().is_invalid_input());

        raw.width = 3;
        assert!(raw.validate().unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_to_gray8_requires_eight_bits() {
        let raw = RawImage::new(1, 1, 12, 1, vec![4095]).unwrap();
        assert!(raw.to_gray8().is_err());
        assert_eq!(max_sample(12), 4095);
        assert_eq!(max_sample(16), u16::MAX);
    }
}
