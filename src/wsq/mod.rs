//! FBI Wavelet Scalar Quantization for 8-bit grayscale fingerprint images.

pub mod decoder;
pub mod encoder;

pub use decoder::{probe, WsqDecoder};
pub use encoder::WsqEncoder;

use crate::buffer::RawImage;
use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Roughly 15:1 on typical 500 ppi captures.
pub const DEFAULT_BITRATE: f32 = 0.75;
/// Roughly 5:1.
pub const HIGH_QUALITY_BITRATE: f32 = 2.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsqConfig {
    /// Target bits per pixel.
    pub bitrate: f32,
    /// Free-text COM segment written after the NISTCOM block.
    pub comment: Option<String>,
}

impl WsqConfig {
    pub fn new(bitrate: f32) -> Self {
        Self {
            bitrate,
            comment: None,
        }
    }

    pub fn high_quality() -> Self {
        Self::new(HIGH_QUALITY_BITRATE)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn validate(&self) -> CodecResult<()> {
        if !self.bitrate.is_finite() || self.bitrate <= 0.0 {
            return Err(CodecError::InvalidInput(format!(
                "bitrate must be a positive number of bits per pixel, got {}",
                self.bitrate
            )));
        }
        Ok(())
    }
}

impl Default for WsqConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BITRATE)
    }
}

pub fn encode(image: &RawImage, config: &WsqConfig) -> CodecResult<Vec<u8>> {
    WsqEncoder::new(config.clone()).encode(image)
}

pub fn decode(data: &[u8]) -> CodecResult<RawImage> {
    WsqDecoder::new().decode(data)
}

/// Subbands entropy coded together, and the Huffman table each group uses.
pub(crate) const BLOCKS: [(Range<usize>, u8); 3] = [(0..19, 0), (19..52, 1), (52..60, 1)];
pub(crate) const TABLE_COUNT: usize = 2;

const MAX_RUN_SYMBOL: u8 = 100;
const POS_ESCAPE_8: u8 = 101;
const NEG_ESCAPE_8: u8 = 102;
const POS_ESCAPE_16: u8 = 103;
const NEG_ESCAPE_16: u8 = 104;
const RUN_ESCAPE_8: u8 = 105;
const RUN_ESCAPE_16: u8 = 106;
const COEFF_BIAS: i64 = 180;
const MIN_DIRECT: i64 = -73;
const MAX_DIRECT: i64 = 74;
const MAX_RUN: u32 = 0xFFFF;

/// One Huffman symbol plus the raw bits that follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Token {
    pub symbol: u8,
    pub extra: u16,
    pub extra_len: u8,
}

impl Token {
    fn plain(symbol: u8) -> Self {
        Self {
            symbol,
            extra: 0,
            extra_len: 0,
        }
    }

    fn escaped(symbol: u8, extra: u16, extra_len: u8) -> Self {
        Self {
            symbol,
            extra,
            extra_len,
        }
    }

    fn run(length: u32) -> Self {
        if length <= MAX_RUN_SYMBOL as u32 {
            Self::plain(length as u8)
        } else if length <= 0xFF {
            Self::escaped(RUN_ESCAPE_8, length as u16, 8)
        } else {
            Self::escaped(RUN_ESCAPE_16, length as u16, 16)
        }
    }

    fn coefficient(value: i64) -> CodecResult<Self> {
        if (MIN_DIRECT..=MAX_DIRECT).contains(&value) {
            return Ok(Self::plain((COEFF_BIAS + value) as u8));
        }
        let magnitude = value.unsigned_abs();
        let token = match (value > 0, magnitude) {
            (true, 0..=0xFF) => Self::escaped(POS_ESCAPE_8, magnitude as u16, 8),
            (false, 0..=0xFF) => Self::escaped(NEG_ESCAPE_8, magnitude as u16, 8),
            (true, 0x100..=0xFFFF) => Self::escaped(POS_ESCAPE_16, magnitude as u16, 16),
            (false, 0x100..=0xFFFF) => Self::escaped(NEG_ESCAPE_16, magnitude as u16, 16),
            _ => {
                return Err(CodecError::EncodingFailure(format!(
                    "quantized coefficient {} exceeds the 16-bit escape range",
                    value
                )))
            }
        };
        Ok(token)
    }
}

/// Run-length tokenization of one block's coefficients.
pub(crate) fn tokenize<'a>(
    bands: impl Iterator<Item = &'a [i64]>,
    out: &mut Vec<Token>,
) -> CodecResult<()> {
    let mut run = 0u32;
    for &value in bands.flatten() {
        if value == 0 {
            run += 1;
            if run == MAX_RUN {
                out.push(Token::run(run));
                run = 0;
            }
            continue;
        }
        if run > 0 {
            out.push(Token::run(run));
            run = 0;
        }
        out.push(Token::coefficient(value)?);
    }
    if run > 0 {
        out.push(Token::run(run));
    }
    Ok(())
}

/// What a decoded symbol expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expansion {
    Zeros { count: u32 },
    Coefficient { value: i64 },
}

/// Bits that follow `symbol`, or `None` for symbols outside the alphabet.
pub(crate) fn extra_bits(symbol: u8) -> Option<u8> {
    match symbol {
        1..=MAX_RUN_SYMBOL => Some(0),
        POS_ESCAPE_8 | NEG_ESCAPE_8 | RUN_ESCAPE_8 => Some(8),
        POS_ESCAPE_16 | NEG_ESCAPE_16 | RUN_ESCAPE_16 => Some(16),
        107..=254 => Some(0),
        _ => None,
    }
}

pub(crate) fn expand(symbol: u8, extra: u32) -> Expansion {
    match symbol {
        1..=MAX_RUN_SYMBOL => Expansion::Zeros {
            count: symbol as u32,
        },
        RUN_ESCAPE_8 | RUN_ESCAPE_16 => Expansion::Zeros { count: extra },
        POS_ESCAPE_8 | POS_ESCAPE_16 => Expansion::Coefficient {
            value: extra as i64,
        },
        NEG_ESCAPE_8 | NEG_ESCAPE_16 => Expansion::Coefficient {
            value: -(extra as i64),
        },
        _ => Expansion::Coefficient {
            value: symbol as i64 - COEFF_BIAS,
        },
    }
}
