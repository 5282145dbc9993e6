use super::encoder::LOSSLESS_FRAME;
use super::{initial_prediction, MIN_PRECISION};
use crate::buffer::{RawImage, MAX_CHANNELS};
use crate::compression::entropy::{BitReader, HuffmanDecoder, HuffmanSpec};
use crate::compression::predictor::{decode_difference, predict_at, PredictorType};
use crate::error::{CodecError, CodecResult};
use crate::format::header::{FrameHeader, ScanHeader};
use crate::format::jfif::JfifHeader;
use crate::format::marker::{JpegMarker, SegmentReader};
use crate::format::nistcom::NistComment;
use crate::format::StreamInfo;
use byteorder::{BigEndian, ReadBytesExt};

const MAX_TABLES: usize = 4;

#[derive(Default)]
struct StreamState {
    frame: Option<FrameHeader>,
    jfif: Option<JfifHeader>,
    huffman: [Option<HuffmanSpec>; MAX_TABLES],
    comments: Vec<String>,
}

impl StreamState {
    fn ppi(&self) -> Option<u32> {
        self.jfif.as_ref().and_then(|j| j.ppi()).or_else(|| {
            self.comments
                .iter()
                .filter_map(|c| NistComment::parse(c))
                .find_map(|c| c.ppi())
        })
    }

    /// Consumes header segments until SOS, whose header is returned.
    fn read_headers(&mut self, reader: &mut SegmentReader, stop_at_frame: bool) -> CodecResult<Option<ScanHeader>> {
        loop {
            let code = reader.read_marker()?;
            match JpegMarker::from_code(code) {
                JpegMarker::App(0) => {
                    if let Some(jfif) = JfifHeader::decode(reader.read_segment()?)? {
                        self.jfif = Some(jfif);
                    }
                }
                JpegMarker::App(_) => {
                    reader.read_segment()?;
                }
                JpegMarker::Comment => {
                    let text = String::from_utf8_lossy(reader.read_segment()?);
                    self.comments.push(text.trim_end_matches('\0').to_string());
                }
                JpegMarker::HuffmanTable => {
                    for spec in HuffmanSpec::parse_all(reader.read_segment()?)? {
                        if spec.class != 0 || spec.id as usize >= MAX_TABLES {
                            return Err(CodecError::CorruptStream(format!(
                                "Huffman table class {} id {} is not valid for lossless coding",
                                spec.class, spec.id
                            )));
                        }
                        let id = spec.id as usize;
                        self.huffman[id] = Some(spec);
                    }
                }
                JpegMarker::RestartInterval => {
                    let mut payload = reader.read_segment()?;
                    let interval = payload.read_u16::<BigEndian>()?;
                    if interval != 0 {
                        return Err(CodecError::Unsupported(format!(
                            "restart interval of {} MCUs",
                            interval
                        )));
                    }
                }
                JpegMarker::StartOfFrame(LOSSLESS_FRAME) => {
                    if self.frame.is_some() {
                        return Err(CodecError::CorruptStream("second frame header".into()));
                    }
                    let frame = FrameHeader::decode(reader.read_segment()?)?;
                    validate_frame(&frame)?;
                    self.frame = Some(frame);
                    if stop_at_frame {
                        return Ok(None);
                    }
                }
                JpegMarker::StartOfFrame(n) => {
                    return Err(CodecError::Unsupported(format!(
                        "SOF{} frames; only lossless SOF3 is decoded",
                        n
                    )));
                }
                JpegMarker::StartOfScan => {
                    if self.frame.is_none() {
                        return Err(CodecError::CorruptStream("scan before frame header".into()));
                    }
                    return Ok(Some(ScanHeader::decode(reader.read_segment()?)?));
                }
                _ => {
                    return Err(CodecError::CorruptStream(format!(
                        "unexpected marker {:#06x} in stream header",
                        code
                    )))
                }
            }
        }
    }
}

fn validate_frame(frame: &FrameHeader) -> CodecResult<()> {
    if frame.precision < MIN_PRECISION {
        return Err(CodecError::CorruptStream(format!(
            "precision {} below {}",
            frame.precision, MIN_PRECISION
        )));
    }
    if frame.components.len() > MAX_CHANNELS as usize {
        return Err(CodecError::Unsupported(format!(
            "{} components",
            frame.components.len()
        )));
    }
    if let Some(c) = frame
        .components
        .iter()
        .find(|c| c.h_factor != 1 || c.v_factor != 1)
    {
        return Err(CodecError::Unsupported(format!(
            "component {} sampled {}x{}",
            c.id, c.h_factor, c.v_factor
        )));
    }
    Ok(())
}

fn expect_start(reader: &mut SegmentReader) -> CodecResult<()> {
    let marker = reader.read_marker()?;
    if JpegMarker::from_code(marker) != JpegMarker::StartOfImage {
        return Err(CodecError::CorruptStream(format!(
            "stream starts with {:#06x}, not a JPEG SOI",
            marker
        )));
    }
    Ok(())
}

/// Header-only inspection of a lossless JPEG stream.
pub fn probe(data: &[u8]) -> CodecResult<StreamInfo> {
    let mut reader = SegmentReader::new(data);
    expect_start(&mut reader)?;
    let mut state = StreamState::default();
    state.read_headers(&mut reader, true)?;
    let frame = state
        .frame
        .as_ref()
        .ok_or_else(|| CodecError::CorruptStream("no frame header".into()))?;

    Ok(StreamInfo {
        width: frame.width as u32,
        height: frame.height as u32,
        depth: frame.precision,
        channels: frame.components.len() as u8,
        ppi: state.ppi(),
        lossy: false,
        comments: state.comments.clone(),
    })
}

pub struct JpeglDecoder;

impl JpeglDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, data: &[u8]) -> CodecResult<RawImage> {
        let mut reader = SegmentReader::new(data);
        expect_start(&mut reader)?;
        let mut state = StreamState::default();
        let scan = state
            .read_headers(&mut reader, false)?
            .ok_or_else(|| CodecError::CorruptStream("no scan".into()))?;
        let frame = state
            .frame
            .as_ref()
            .ok_or_else(|| CodecError::CorruptStream("no frame header".into()))?;

        if scan.components.len() != frame.components.len()
            || scan
                .components
                .iter()
                .zip(&frame.components)
                .any(|(s, f)| s.id != f.id)
        {
            return Err(CodecError::Unsupported(
                "scans that do not interleave every frame component".into(),
            ));
        }
        let predictor = PredictorType::from_u8(scan.start).map_err(|_| {
            CodecError::CorruptStream(format!("predictor selection {} outside 1..=7", scan.start))
        })?;
        let pt = scan.approx_low;
        if pt >= frame.precision {
            return Err(CodecError::CorruptStream(format!(
                "point transform {} not below precision {}",
                pt, frame.precision
            )));
        }

        let decoders = scan
            .components
            .iter()
            .map(|c| {
                let spec = state
                    .huffman
                    .get(c.table as usize)
                    .and_then(|s| s.as_ref())
                    .ok_or_else(|| {
                        CodecError::CorruptStream(format!(
                            "component {} uses undefined Huffman table {}",
                            c.id, c.table
                        ))
                    })?;
                HuffmanDecoder::new(spec)
            })
            .collect::<CodecResult<Vec<_>>>()?;

        let entropy = reader.read_entropy_segment()?;
        let width = frame.width as usize;
        let height = frame.height as usize;
        // Every sample costs at least one code bit.
        let sample_count = width as u64 * height as u64 * decoders.len() as u64;
        if sample_count > entropy.len() as u64 * 8 {
            return Err(CodecError::CorruptStream(format!(
                "{} samples declared but only {} bytes of entropy-coded data",
                sample_count,
                entropy.len()
            )));
        }
        let planes = decode_scan(
            &entropy,
            &decoders,
            width,
            height,
            predictor,
            initial_prediction(frame.precision, pt),
            1u32 << (frame.precision - pt),
        )?;

        let code = reader.read_marker()?;
        match JpegMarker::from_code(code) {
            JpegMarker::EndOfImage => {}
            JpegMarker::StartOfScan => {
                return Err(CodecError::Unsupported("multiple scans".into()));
            }
            JpegMarker::Restart(_) => {
                return Err(CodecError::Unsupported("restart markers".into()));
            }
            _ => {
                return Err(CodecError::CorruptStream(format!(
                    "expected end of image, found {:#06x}",
                    code
                )))
            }
        }

        let channels = planes.len();
        let mut samples = vec![0u16; width * height * channels];
        for (c, plane) in planes.iter().enumerate() {
            for (i, &s) in plane.iter().enumerate() {
                samples[i * channels + c] = s << pt;
            }
        }

        let mut image = RawImage::new(
            frame.width as u32,
            frame.height as u32,
            frame.precision,
            channels as u8,
            samples,
        )
        .map_err(|e| CodecError::CorruptStream(e.to_string()))?;
        image.ppi = state.ppi();
        Ok(image)
    }
}

impl Default for JpeglDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential reconstruction: every sample depends on its decoded neighbours.
fn decode_scan(
    data: &[u8],
    decoders: &[HuffmanDecoder],
    width: usize,
    height: usize,
    predictor: PredictorType,
    initial: i32,
    limit: u32,
) -> CodecResult<Vec<Vec<u16>>> {
    let mut planes = vec![vec![0u16; width * height]; decoders.len()];
    let mut reader = BitReader::new(data);

    for y in 0..height {
        for x in 0..width {
            for (plane, decoder) in planes.iter_mut().zip(decoders) {
                let ssss = decoder.decode(&mut reader)?;
                if ssss > 16 {
                    return Err(CodecError::CorruptStream(format!(
                        "difference category {} above 16",
                        ssss
                    )));
                }
                let extra = if ssss > 0 && ssss < 16 {
                    reader.read_bits(ssss)?
                } else {
                    0
                };
                let prediction = predict_at(plane, width, x, y, predictor, initial);
                let sample = ((prediction + decode_difference(ssss, extra)) & 0xFFFF) as u32;
                if sample >= limit {
                    return Err(CodecError::CorruptStream(format!(
                        "decoded sample {} at ({}, {}) exceeds the frame precision",
                        sample, x, y
                    )));
                }
                plane[y * width + x] = sample as u16;
            }
        }
    }

    if !reader.at_padding() {
        return Err(CodecError::CorruptStream(format!(
            "{} bits of entropy-coded data left after the last sample",
            reader.bits_remaining()
        )));
    }
    Ok(planes)
}
