use super::{initial_prediction, JpeglConfig, MIN_PRECISION};
use crate::buffer::RawImage;
use crate::compression::entropy::{BitWriter, HuffmanEncoder, HuffmanSpec};
use crate::compression::predictor::{encode_difference, residuals};
use crate::error::{CodecError, CodecResult};
use crate::format::header::{FrameComponent, FrameHeader, ScanComponent, ScanHeader};
use crate::format::jfif::JfifHeader;
use crate::format::marker::{JpegMarker, SegmentWriter};
use crate::format::nistcom::NistComment;

/// SOF3: lossless, Huffman coded.
pub const LOSSLESS_FRAME: u8 = 3;

pub struct JpeglEncoder {
    config: JpeglConfig,
}

impl JpeglEncoder {
    pub fn new(config: JpeglConfig) -> Self {
        Self { config }
    }

    pub fn predictor(mut self, predictor: u8) -> Self {
        self.config.predictor = predictor;
        self
    }

    pub fn point_transform(mut self, point_transform: u8) -> Self {
        self.config.point_transform = point_transform;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.config.comment = Some(comment.into());
        self
    }

    pub fn config(&self) -> &JpeglConfig {
        &self.config
    }

    pub fn encode(&self, image: &RawImage) -> CodecResult<Vec<u8>> {
        image.validate()?;
        let precision = image.depth;
        if precision < MIN_PRECISION {
            return Err(CodecError::InvalidInput(format!(
                "lossless JPEG needs at least {}-bit samples, got {}",
                MIN_PRECISION, precision
            )));
        }
        if image.width > u16::MAX as u32 || image.height > u16::MAX as u32 {
            return Err(CodecError::InvalidInput(format!(
                "{}x{} exceeds the 16-bit frame dimensions",
                image.width, image.height
            )));
        }
        let predictor = self.config.validate(precision)?;
        let pt = self.config.point_transform;
        let initial = initial_prediction(precision, pt);

        let width = image.width as usize;
        let channels = image.channels as usize;

        let planes: Vec<Vec<i32>> = (0..channels)
            .map(|c| {
                let plane: Vec<u16> = image
                    .samples
                    .iter()
                    .skip(c)
                    .step_by(channels)
                    .map(|&s| s >> pt)
                    .collect();
                residuals(&plane, width, predictor, initial)
            })
            .collect();

        let specs: Vec<HuffmanSpec> = planes
            .iter()
            .enumerate()
            .map(|(c, diffs)| {
                let mut freq = [0u32; 256];
                for &d in diffs {
                    freq[encode_difference(d).0 as usize] += 1;
                }
                HuffmanSpec::from_frequencies(c as u8, &freq)
            })
            .collect();
        let encoders = specs
            .iter()
            .map(HuffmanEncoder::new)
            .collect::<CodecResult<Vec<_>>>()?;

        let mut bits = BitWriter::new();
        for i in 0..image.pixel_count() {
            for (plane, encoder) in planes.iter().zip(&encoders) {
                let (ssss, extra) = encode_difference(plane[i]);
                encoder.write(&mut bits, ssss)?;
                if ssss > 0 && ssss < 16 {
                    bits.write_bits(extra, ssss);
                }
            }
        }
        let data = bits.finish();

        let mut out = SegmentWriter::new();
        out.write_marker(JpegMarker::StartOfImage.code())?;
        out.write_segment(
            JpegMarker::App(0).code(),
            &JfifHeader::with_ppi(image.ppi).encode()?,
        )?;
        out.write_segment(
            JpegMarker::Comment.code(),
            self.nist_comment(image).to_text().as_bytes(),
        )?;
        if let Some(comment) = &self.config.comment {
            out.write_segment(JpegMarker::Comment.code(), comment.as_bytes())?;
        }

        let frame = FrameHeader {
            precision,
            height: image.height as u16,
            width: image.width as u16,
            components: (0..channels)
                .map(|c| FrameComponent {
                    id: c as u8 + 1,
                    h_factor: 1,
                    v_factor: 1,
                    quant_table: 0,
                })
                .collect(),
        };
        out.write_segment(JpegMarker::StartOfFrame(LOSSLESS_FRAME).code(), &frame.encode()?)?;

        for spec in &specs {
            let mut payload = Vec::new();
            spec.encode(&mut payload)?;
            out.write_segment(JpegMarker::HuffmanTable.code(), &payload)?;
        }

        let scan = ScanHeader {
            components: (0..channels)
                .map(|c| ScanComponent {
                    id: c as u8 + 1,
                    table: c as u8,
                })
                .collect(),
            start: predictor as u8,
            end: 0,
            approx_high: 0,
            approx_low: pt,
        };
        out.write_segment(JpegMarker::StartOfScan.code(), &scan.encode()?)?;
        out.write_entropy_data(&data);
        out.write_marker(JpegMarker::EndOfImage.code())?;

        let bytes = out.finish();
        log::debug!(
            "encoded {}x{}x{} {}-bit JPEGL with predictor {} pt {}: {} bytes",
            image.width,
            image.height,
            channels,
            precision,
            self.config.predictor,
            pt,
            bytes.len()
        );
        Ok(bytes)
    }

    fn nist_comment(&self, image: &RawImage) -> NistComment {
        let colorspace = match image.channels {
            1 => "GRAY",
            3 => "RGB",
            _ => "UNKNOWN",
        };
        let factors = vec!["1,1"; image.channels as usize].join(":");
        NistComment::new()
            .with("PIX_WIDTH", image.width)
            .with("PIX_HEIGHT", image.height)
            .with("PIX_DEPTH", image.depth as u32 * image.channels as u32)
            .with("PPI", image.ppi.map(|p| p as i64).unwrap_or(-1))
            .with("LOSSY", 0)
            .with("COLORSPACE", colorspace)
            .with("NUM_COMPONENTS", image.channels)
            .with("HV_FACTORS", factors)
            .with("INTERLEAVE", 1)
            .with("COMPRESSION", "JPEGL")
            .with("JPEGL_PREDICT", self.config.predictor)
    }
}

impl Default for JpeglEncoder {
    fn default() -> Self {
        Self::new(JpeglConfig::default())
    }
}
