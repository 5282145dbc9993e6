use super::{expand, extra_bits, Expansion, BLOCKS};
use crate::buffer::RawImage;
use crate::compression::entropy::{BitReader, HuffmanDecoder, HuffmanSpec};
use crate::compression::quantizer::{Normalization, Quantizer};
use crate::compression::wavelet::{reconstruct, FilterBank, SubbandLayout};
use crate::error::{CodecError, CodecResult};
use crate::format::header::WsqFrameHeader;
use crate::format::marker::{SegmentReader, WsqMarker};
use crate::format::nistcom::NistComment;
use crate::format::tables::{QuantTable, TransformTable};
use crate::format::StreamInfo;
use byteorder::{BigEndian, ReadBytesExt};

const MAX_TABLES: usize = 8;

/// Segment state accumulated while walking a WSQ stream.
#[derive(Default)]
struct StreamTables {
    transform: Option<TransformTable>,
    quant: Option<QuantTable>,
    huffman: [Option<HuffmanSpec>; MAX_TABLES],
    comments: Vec<String>,
}

impl StreamTables {
    /// Handles a table-or-comment segment. Returns false for any other marker.
    fn absorb(&mut self, marker: WsqMarker, reader: &mut SegmentReader) -> CodecResult<bool> {
        match marker {
            WsqMarker::TransformTable => {
                self.transform = Some(TransformTable::decode(reader.read_segment()?)?);
            }
            WsqMarker::QuantizationTable => {
                self.quant = Some(QuantTable::decode(reader.read_segment()?)?);
            }
            WsqMarker::HuffmanTable => {
                for spec in HuffmanSpec::parse_all(reader.read_segment()?)? {
                    let id = spec.id as usize;
                    if id >= MAX_TABLES {
                        return Err(CodecError::CorruptStream(format!(
                            "Huffman table id {} out of range",
                            id
                        )));
                    }
                    self.huffman[id] = Some(spec);
                }
            }
            WsqMarker::Comment => {
                let text = String::from_utf8_lossy(reader.read_segment()?);
                self.comments.push(text.trim_end_matches('\0').to_string());
            }
            WsqMarker::RestartInterval => {
                let mut payload = reader.read_segment()?;
                let interval = payload.read_u16::<BigEndian>()?;
                if interval != 0 {
                    return Err(CodecError::Unsupported(format!(
                        "restart interval of {} blocks",
                        interval
                    )));
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn ppi(&self) -> Option<u32> {
        self.comments
            .iter()
            .filter_map(|c| NistComment::parse(c))
            .find_map(|c| c.ppi())
    }
}

fn expect_start(reader: &mut SegmentReader) -> CodecResult<()> {
    let marker = reader.read_marker()?;
    if WsqMarker::from_code(marker) != WsqMarker::StartOfImage {
        return Err(CodecError::CorruptStream(format!(
            "stream starts with {:#06x}, not a WSQ SOI",
            marker
        )));
    }
    Ok(())
}

/// Reads segments up to and including the frame header.
fn read_frame(reader: &mut SegmentReader, tables: &mut StreamTables) -> CodecResult<WsqFrameHeader> {
    expect_start(reader)?;
    loop {
        let code = reader.read_marker()?;
        let marker = WsqMarker::from_code(code);
        if tables.absorb(marker, reader)? {
            continue;
        }
        match marker {
            WsqMarker::StartOfFrame => return WsqFrameHeader::decode(reader.read_segment()?),
            _ => {
                return Err(CodecError::CorruptStream(format!(
                    "unexpected marker {:#06x} before the frame header",
                    code
                )))
            }
        }
    }
}

/// Header-only inspection of a WSQ stream.
pub fn probe(data: &[u8]) -> CodecResult<StreamInfo> {
    let mut reader = SegmentReader::new(data);
    let mut tables = StreamTables::default();
    let frame = read_frame(&mut reader, &mut tables)?;
    Ok(StreamInfo {
        width: frame.width as u32,
        height: frame.height as u32,
        depth: 8,
        channels: 1,
        ppi: tables.ppi(),
        lossy: true,
        comments: tables.comments,
    })
}

pub struct WsqDecoder;

impl WsqDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, data: &[u8]) -> CodecResult<RawImage> {
        let mut reader = SegmentReader::new(data);
        let mut tables = StreamTables::default();
        let frame = read_frame(&mut reader, &mut tables)?;

        let width = frame.width as usize;
        let height = frame.height as usize;
        let layout = SubbandLayout::new(width, height).map_err(|_| {
            CodecError::CorruptStream(format!(
                "frame size {}x{} is too small for the wavelet decomposition",
                width, height
            ))
        })?;

        let mut bands: Vec<Vec<i64>> = vec![Vec::new(); BLOCKS[BLOCKS.len() - 1].0.end];
        let mut block = 0usize;
        let mut quantizer: Option<Quantizer> = None;

        loop {
            let code = reader.read_marker()?;
            let marker = WsqMarker::from_code(code);
            if block > 0 && marker == WsqMarker::QuantizationTable {
                return Err(CodecError::Unsupported(
                    "quantization table between blocks".into(),
                ));
            }
            if tables.absorb(marker, &mut reader)? {
                continue;
            }
            match marker {
                WsqMarker::StartOfBlock => {
                    let payload = reader.read_segment()?;
                    let table = *payload.first().ok_or_else(|| {
                        CodecError::CorruptStream("empty block header".into())
                    })? as usize;
                    let (range, _) = BLOCKS.get(block).ok_or_else(|| {
                        CodecError::CorruptStream(format!("stream carries more than {} blocks", BLOCKS.len()))
                    })?;

                    if quantizer.is_none() {
                        let table = tables.quant.clone().ok_or_else(|| {
                            CodecError::CorruptStream("block before any quantization table".into())
                        })?;
                        quantizer = Some(Quantizer::new(table));
                    }
                    let quant = quantizer.as_ref().ok_or_else(|| {
                        CodecError::CorruptStream("missing quantization table".into())
                    })?;
                    let spec = tables.huffman.get(table).and_then(|s| s.as_ref()).ok_or_else(|| {
                        CodecError::CorruptStream(format!("block uses undefined Huffman table {}", table))
                    })?;

                    let data = reader.read_entropy_segment()?;
                    let coefficients = decode_block(&data, spec, quant, &layout, range.clone())?;
                    for (band, values) in coefficients {
                        bands[band] = values;
                    }
                    block += 1;
                }
                WsqMarker::EndOfImage => break,
                WsqMarker::Restart(_) => {
                    return Err(CodecError::Unsupported("restart markers".into()));
                }
                _ => {
                    return Err(CodecError::CorruptStream(format!(
                        "unexpected marker {:#06x} in block data",
                        code
                    )))
                }
            }
        }

        if block != BLOCKS.len() {
            return Err(CodecError::CorruptStream(format!(
                "stream ends after {} of {} blocks",
                block,
                BLOCKS.len()
            )));
        }
        if !reader.is_at_end() {
            log::debug!(
                "ignoring {} bytes after the end-of-image marker",
                data.len() - reader.position()
            );
        }

        let quantizer = quantizer.ok_or_else(|| {
            CodecError::CorruptStream("stream carries no quantization table".into())
        })?;
        let transform = tables.transform.as_ref().ok_or_else(|| {
            CodecError::CorruptStream("stream carries no transform table".into())
        })?;
        let bank = FilterBank::<f32>::new(&transform.lowpass, &transform.highpass)?;

        let mut plane = Vec::new();
        plane.try_reserve_exact(width * height).map_err(|_| {
            CodecError::CorruptStream(format!("cannot allocate a {}x{} frame", width, height))
        })?;
        plane.resize(width * height, 0.0f32);
        quantizer.dequantize(&bands, &mut plane, width, &layout)?;
        reconstruct(&mut plane, width, &layout, &bank);

        let norm = Normalization {
            m_shift: frame.m_shift,
            r_scale: frame.r_scale,
        };
        let pixels = norm.denormalize(&plane);

        let mut image = RawImage::gray8(frame.width as u32, frame.height as u32, pixels)?;
        image.ppi = tables.ppi();
        Ok(image)
    }
}

impl Default for WsqDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Expands one block's symbols into per-subband coefficient vectors.
fn decode_block(
    data: &[u8],
    spec: &HuffmanSpec,
    quantizer: &Quantizer,
    layout: &SubbandLayout,
    range: std::ops::Range<usize>,
) -> CodecResult<Vec<(usize, Vec<i64>)>> {
    let coded: Vec<usize> = range.filter(|&b| quantizer.is_coded(b)).collect();
    let expected: usize = coded.iter().map(|&b| layout.subbands[b].area()).sum();

    let decoder = HuffmanDecoder::new(spec)?;
    let mut reader = BitReader::new(data);
    // Runs may expand past the payload size, so start from what the bits can hold.
    let mut values = Vec::with_capacity(expected.min(data.len() * 8));

    while !reader.at_padding() {
        let symbol = decoder.decode(&mut reader)?;
        let bits = extra_bits(symbol).ok_or_else(|| {
            CodecError::CorruptStream(format!("symbol {} is not in the WSQ alphabet", symbol))
        })?;
        let extra = reader.read_bits(bits)?;
        match expand(symbol, extra) {
            Expansion::Zeros { count } => {
                values.resize(values.len() + count as usize, 0);
            }
            Expansion::Coefficient { value } => values.push(value),
        }
        if values.len() > expected {
            return Err(CodecError::CorruptStream(format!(
                "block decodes to more than {} coefficients",
                expected
            )));
        }
    }

    if values.len() != expected {
        return Err(CodecError::CorruptStream(format!(
            "block decodes to {} coefficients, expected {}",
            values.len(),
            expected
        )));
    }

    let mut out = Vec::with_capacity(coded.len());
    let mut rest = values.as_slice();
    for band in coded {
        let (head, tail) = rest.split_at(layout.subbands[band].area());
        out.push((band, head.to_vec()));
        rest = tail;
    }
    Ok(out)
}
