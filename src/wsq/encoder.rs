use super::{tokenize, Token, WsqConfig, BLOCKS, TABLE_COUNT};
use crate::buffer::RawImage;
use crate::compression::entropy::{BitWriter, HuffmanEncoder, HuffmanSpec};
use crate::compression::quantizer::{subband_peaks, subband_variances, Normalization, Quantizer};
use crate::compression::wavelet::{
    decompose, FilterBank, SubbandLayout, CODED_SUBBANDS, WSQ_HIGHPASS, WSQ_LOWPASS,
};
use crate::error::{CodecError, CodecResult};
use crate::format::header::WsqFrameHeader;
use crate::format::marker::{SegmentWriter, WsqMarker};
use crate::format::nistcom::NistComment;
use crate::format::tables::TransformTable;

/// Accepted relative gap between spent and requested payload bits.
pub const RATE_TOLERANCE: f64 = 0.05;
const MAX_RATE_PASSES: usize = 6;

/// Huffman tables plus the entropy-coded bytes of each block.
struct CodedBlocks {
    specs: Vec<HuffmanSpec>,
    data: Vec<Vec<u8>>,
}

impl CodedBlocks {
    fn payload_len(&self) -> usize {
        self.data.iter().map(Vec::len).sum()
    }
}

fn entropy_code(
    quantizer: &Quantizer,
    plane: &[f32],
    width: usize,
    layout: &SubbandLayout,
) -> CodecResult<CodedBlocks> {
    let bands = quantizer.quantize(plane, width, layout);

    // First pass: tokens per block and symbol statistics per table.
    let mut blocks: Vec<Vec<Token>> = Vec::with_capacity(BLOCKS.len());
    let mut frequencies = [[0u32; 256]; TABLE_COUNT];
    for (range, table) in BLOCKS.iter() {
        let mut tokens = Vec::new();
        tokenize(bands[range.clone()].iter().map(|b| b.as_slice()), &mut tokens)?;
        for token in &tokens {
            frequencies[*table as usize][token.symbol as usize] += 1;
        }
        blocks.push(tokens);
    }
    let specs: Vec<HuffmanSpec> = frequencies
        .iter()
        .enumerate()
        .map(|(id, freq)| HuffmanSpec::from_frequencies(id as u8, freq))
        .collect();

    let mut data = Vec::with_capacity(BLOCKS.len());
    for ((_, table), tokens) in BLOCKS.iter().zip(&blocks) {
        let encoder = HuffmanEncoder::new(&specs[*table as usize])?;
        let mut bits = BitWriter::new();
        for token in tokens {
            encoder.write(&mut bits, token.symbol)?;
            bits.write_bits(token.extra as u32, token.extra_len);
        }
        let bytes = bits.finish();
        log::trace!(
            "block with table {}: {} symbols, {} bytes",
            table,
            tokens.len(),
            bytes.len()
        );
        data.push(bytes);
    }
    Ok(CodedBlocks { specs, data })
}

pub struct WsqEncoder {
    config: WsqConfig,
}

impl WsqEncoder {
    pub fn new(config: WsqConfig) -> Self {
        Self { config }
    }

    pub fn bitrate(mut self, bitrate: f32) -> Self {
        self.config.bitrate = bitrate;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.config.comment = Some(comment.into());
        self
    }

    pub fn config(&self) -> &WsqConfig {
        &self.config
    }

    pub fn encode(&self, image: &RawImage) -> CodecResult<Vec<u8>> {
        image.validate()?;
        self.config.validate()?;
        let pixels = image.to_gray8()?;
        if image.width > u16::MAX as u32 || image.height > u16::MAX as u32 {
            return Err(CodecError::InvalidInput(format!(
                "{}x{} exceeds the 16-bit frame dimensions",
                image.width, image.height
            )));
        }
        let width = image.width as usize;
        let height = image.height as usize;
        let layout = SubbandLayout::new(width, height)?;

        let norm = Normalization::from_pixels(&pixels);
        let mut plane = norm.normalize(&pixels);
        let bank = FilterBank::<f32>::new(&WSQ_LOWPASS, &WSQ_HIGHPASS)?;
        decompose(&mut plane, width, &layout, &bank);

        let variances = subband_variances(&plane, width, &layout);
        let peaks = subband_peaks(&plane, width, &layout);
        let (quantizer, coded) =
            self.fit_rate(&variances, &peaks, &plane, width, &layout)?;

        let mut out = SegmentWriter::new();
        out.write_marker(WsqMarker::StartOfImage.code())?;
        out.write_segment(
            WsqMarker::Comment.code(),
            self.nist_comment(image).to_text().as_bytes(),
        )?;
        if let Some(comment) = &self.config.comment {
            out.write_segment(WsqMarker::Comment.code(), comment.as_bytes())?;
        }

        let transform = TransformTable {
            lowpass: WSQ_LOWPASS.to_vec(),
            highpass: WSQ_HIGHPASS.to_vec(),
        };
        out.write_segment(WsqMarker::TransformTable.code(), &transform.encode()?)?;
        out.write_segment(WsqMarker::QuantizationTable.code(), &quantizer.table().encode()?)?;

        let frame = WsqFrameHeader::new(
            image.width as u16,
            image.height as u16,
            norm.m_shift,
            norm.r_scale,
        );
        out.write_segment(WsqMarker::StartOfFrame.code(), &frame.encode()?)?;

        let mut table_written = [false; TABLE_COUNT];
        for ((_, table), data) in BLOCKS.iter().zip(&coded.data) {
            if !table_written[*table as usize] {
                let mut payload = Vec::new();
                coded.specs[*table as usize].encode(&mut payload)?;
                out.write_segment(WsqMarker::HuffmanTable.code(), &payload)?;
                table_written[*table as usize] = true;
            }
            out.write_segment(WsqMarker::StartOfBlock.code(), &[*table])?;
            out.write_entropy_data(data);
        }

        out.write_marker(WsqMarker::EndOfImage.code())?;
        let bytes = out.finish();
        log::debug!(
            "encoded {}x{} WSQ at {} bpp target: {} bytes ({:.3} bpp)",
            width,
            height,
            self.config.bitrate,
            bytes.len(),
            bytes.len() as f64 * 8.0 / (width * height) as f64
        );
        Ok(bytes)
    }

    /// Re-runs allocation until the entropy-coded payload lands within
    /// `RATE_TOLERANCE` of the requested bitrate, keeping the closest pass
    /// when the image cannot spend that many bits.
    fn fit_rate(
        &self,
        variances: &[f64; CODED_SUBBANDS],
        peaks: &[f64; CODED_SUBBANDS],
        plane: &[f32],
        width: usize,
        layout: &SubbandLayout,
    ) -> CodecResult<(Quantizer, CodedBlocks)> {
        let target = self.config.bitrate as f64;
        let pixels = plane.len() as f64;

        let mut rate = target;
        let mut previous = None;
        let mut best: Option<(f64, Quantizer, CodedBlocks)> = None;
        for pass in 0..MAX_RATE_PASSES {
            let quantizer = Quantizer::allocate(variances, peaks, rate)?;
            let coded = entropy_code(&quantizer, plane, width, layout)?;
            let payload = coded.payload_len();
            let achieved = payload as f64 * 8.0 / pixels;
            let error = (achieved - target).abs() / target;
            log::trace!(
                "rate pass {}: allocated for {:.4} bpp, spent {:.4} bpp",
                pass,
                rate,
                achieved
            );

            let stalled = payload == 0 || previous == Some(payload);
            if best.as_ref().map_or(true, |(closest, _, _)| error < *closest) {
                best = Some((error, quantizer, coded));
            }
            if error <= RATE_TOLERANCE || stalled {
                break;
            }
            previous = Some(payload);
            rate *= target / achieved;
        }

        best.map(|(_, quantizer, coded)| (quantizer, coded))
            .ok_or_else(|| CodecError::EncodingFailure("rate allocation never ran".into()))
    }

    fn nist_comment(&self, image: &RawImage) -> NistComment {
        NistComment::new()
            .with("PIX_WIDTH", image.width)
            .with("PIX_HEIGHT", image.height)
            .with("PIX_DEPTH", 8)
            .with("PPI", image.ppi.map(|p| p as i64).unwrap_or(-1))
            .with("LOSSY", 1)
            .with("COLORSPACE", "GRAY")
            .with("COMPRESSION", "WSQ")
            .with("WSQ_BITRATE", format!("{:.6}", self.config.bitrate))
    }
}

impl Default for WsqEncoder {
    fn default() -> Self {
        Self::new(WsqConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::marker::SegmentReader;

    fn ridges(width: u32, height: u32) -> RawImage {
        let pixels = (0..height)
            .flat_map(|y| {
                (0..width).map(move |x| {
                    let phase = (x as f64 * 0.9 + y as f64 * 0.4).sin() * (y as f64 * 0.15).cos();
                    (127.5 + 100.0 * phase) as u8
                })
            })
            .collect();
        RawImage::gray8(width, height, pixels).unwrap()
    }

    fn gradient(width: u32, height: u32) -> RawImage {
        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| ((x + y) as u8) / 2))
            .collect();
        RawImage::gray8(width, height, pixels).unwrap()
    }

    #[test]
    fn test_smooth_gradients_encode() {
        for (w, h) in [(40, 33), (41, 37), (64, 64)] {
            let image = gradient(w, h);
            let bytes = WsqEncoder::default()
                .encode(&image)
                .unwrap_or_else(|e| panic!("{}x{} gradient: {}", w, h, e));
            let decoded = crate::wsq::decode(&bytes).unwrap();
            let mse = image
                .samples
                .iter()
                .zip(&decoded.samples)
                .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
                .sum::<f64>()
                / image.samples.len() as f64;
            assert!(mse < 6.5, "{}x{} gradient came back with MSE {:.3}", w, h, mse);
        }
    }

    #[test]
    fn test_payload_tracks_bitrate() {
        let image = ridges(128, 128);
        let size_at = |bitrate: f32| WsqEncoder::default().bitrate(bitrate).encode(&image).unwrap().len();
        let coarse = size_at(0.5);
        let fine = size_at(2.0);
        assert!(fine > 2 * coarse, "{} vs {} bytes", fine, coarse);
    }

    #[test]
    fn test_segment_order() {
        let bytes = WsqEncoder::default()
            .with_comment("left index")
            .encode(&ridges(64, 48))
            .unwrap();

        let mut reader = SegmentReader::new(&bytes);
        let mut order = vec![reader.read_marker().unwrap()];
        loop {
            let marker = reader.read_marker().unwrap();
            order.push(marker);
            match WsqMarker::from_code(marker) {
                WsqMarker::EndOfImage => break,
                WsqMarker::StartOfBlock => {
                    reader.read_segment().unwrap();
                    reader.read_entropy_segment().unwrap();
                }
                _ => {
                    reader.read_segment().unwrap();
                }
            }
        }
        assert_eq!(
            order,
            vec![0xFFA0, 0xFFA8, 0xFFA8, 0xFFA4, 0xFFA5, 0xFFA2, 0xFFA6, 0xFFA3, 0xFFA6, 0xFFA3, 0xFFA3, 0xFFA1]
        );
    }

    #[test]
    fn test_rejects_non_gray8() {
        let image = RawImage::new(32, 32, 12, 1, vec![0; 32 * 32]).unwrap();
        assert!(WsqEncoder::default().encode(&image).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_rejects_inconsistent_image() {
        let mut image = ridges(32, 32);
        image.samples.truncate(100);
        assert!(WsqEncoder::default().encode(&image).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_rejects_bad_bitrate() {
        let encoder = WsqEncoder::default().bitrate(-1.0);
        assert!(encoder.encode(&ridges(32, 32)).unwrap_err().is_invalid_input());
    }

    #[test]
    fn test_nist_comment_fields() {
        let image = ridges(40, 30).with_ppi(500);
        let comment = WsqEncoder::default().nist_comment(&image);
        assert_eq!(comment.get("PPI"), Some("500"));
        assert_eq!(comment.get("WSQ_BITRATE"), Some("0.750000"));
        assert_eq!(comment.get("COMPRESSION"), Some("WSQ"));
    }
}
