use crate::error::{CodecError, CodecResult};
use rayon::prelude::*;

/// Lossless-JPEG selection values (T.81 Table H.1). `Ra` is the left
/// neighbour, `Rb` the one above and `Rc` the one above-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PredictorType {
    Left = 1,
    Up = 2,
    UpLeft = 3,
    Planar = 4,
    LeftGradient = 5,
    UpGradient = 6,
    Average = 7,
}

impl PredictorType {
    pub fn from_u8(v: u8) -> CodecResult<Self> {
        match v {
            1 => Ok(Self::Left),
            2 => Ok(Self::Up),
            3 => Ok(Self::UpLeft),
            4 => Ok(Self::Planar),
            5 => Ok(Self::LeftGradient),
            6 => Ok(Self::UpGradient),
            7 => Ok(Self::Average),
            _ => Err(CodecError::InvalidInput(format!(
                "predictor {} outside 1..=7",
                v
            ))),
        }
    }

    pub fn all() -> [Self; 7] {
        [
            Self::Left,
            Self::Up,
            Self::UpLeft,
            Self::Planar,
            Self::LeftGradient,
            Self::UpGradient,
            Self::Average,
        ]
    }

    #[inline]
    pub fn predict(self, ra: i32, rb: i32, rc: i32) -> i32 {
        match self {
            Self::Left => ra,
            Self::Up => rb,
            Self::UpLeft => rc,
            Self::Planar => ra + rb - rc,
            Self::LeftGradient => ra + ((rb - rc) >> 1),
            Self::UpGradient => rb + ((ra - rc) >> 1),
            Self::Average => (ra + rb) >> 1,
        }
    }
}

/// Prediction for the sample at `(x, y)` of a single-component plane.
///
/// The first sample uses `initial`; the rest of the first row predicts
/// from the left and the first column from above.
#[inline]
pub fn predict_at(
    plane: &[u16],
    width: usize,
    x: usize,
    y: usize,
    predictor: PredictorType,
    initial: i32,
) -> i32 {
    let idx = y * width + x;
    match (x, y) {
        (0, 0) => initial,
        (_, 0) => plane[idx - 1] as i32,
        (0, _) => plane[idx - width] as i32,
        _ => predictor.predict(
            plane[idx - 1] as i32,
            plane[idx - width] as i32,
            plane[idx - width - 1] as i32,
        ),
    }
}

/// Difference modulo 2^16, mapped into `-32767..=32768`.
#[inline]
pub fn wrap_difference(sample: i32, prediction: i32) -> i32 {
    let d = (sample - prediction) & 0xFFFF;
    if d > 0x8000 {
        d - 0x10000
    } else {
        d
    }
}

/// Magnitude category SSSS of a wrapped difference.
#[inline]
pub fn category(diff: i32) -> u8 {
    (32 - diff.unsigned_abs().leading_zeros()) as u8
}

/// Category and the additional bits that follow its Huffman code.
#[inline]
pub fn encode_difference(diff: i32) -> (u8, u32) {
    let ssss = category(diff);
    if ssss == 0 || ssss == 16 {
        return (ssss, 0);
    }
    let mask = (1u32 << ssss) - 1;
    let bits = if diff < 0 {
        (diff - 1) as u32 & mask
    } else {
        diff as u32
    };
    (ssss, bits)
}

/// Inverse of [`encode_difference`].
#[inline]
pub fn decode_difference(ssss: u8, bits: u32) -> i32 {
    match ssss {
        0 => 0,
        16 => 32768,
        _ => {
            let bits = bits as i32;
            if bits < 1 << (ssss - 1) {
                bits - (1 << ssss) + 1
            } else {
                bits
            }
        }
    }
}

/// Wrapped prediction residuals of one component plane, computed row by row
/// in parallel.
pub fn residuals(
    plane: &[u16],
    width: usize,
    predictor: PredictorType,
    initial: i32,
) -> Vec<i32> {
    let mut out = vec![0i32; plane.len()];
    out.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, slot) in row.iter_mut().enumerate() {
                let prediction = predict_at(plane, width, x, y, predictor, initial);
                *slot = wrap_difference(plane[y * width + x] as i32, prediction);
            }
        });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predictor_formulas() {
        let (ra, rb, rc) = (100, 60, 90);
        assert_eq!(PredictorType::Left.predict(ra, rb, rc), 100);
        assert_eq!(PredictorType::Up.predict(ra, rb, rc), 60);
        assert_eq!(PredictorType::UpLeft.predict(ra, rb, rc), 90);
        assert_eq!(PredictorType::Planar.predict(ra, rb, rc), 70);
        assert_eq!(PredictorType::LeftGradient.predict(ra, rb, rc), 85);
        assert_eq!(PredictorType::UpGradient.predict(ra, rb, rc), 65);
        assert_eq!(PredictorType::Average.predict(ra, rb, rc), 80);
    }

    #[test]
    fn test_selection_value_range() {
        assert!(PredictorType::from_u8(0).unwrap_err().is_invalid_input());
        assert!(PredictorType::from_u8(8).is_err());
        for p in PredictorType::all() {
            assert_eq!(PredictorType::from_u8(p as u8).unwrap(), p);
        }
    }

    #[test]
    fn test_categories() {
        assert_eq!(category(0), 0);
        assert_eq!(category(1), 1);
        assert_eq!(category(-1), 1);
        assert_eq!(category(255), 8);
        assert_eq!(category(-256), 9);
        assert_eq!(category(32768), 16);
    }

    #[test]
    fn test_difference_bits() {
        assert_eq!(encode_difference(-1), (1, 0));
        assert_eq!(encode_difference(5), (3, 5));
        assert_eq!(encode_difference(-5), (3, 2));
        assert_eq!(encode_difference(32768), (16, 0));
        for diff in [-32767, -300, -2, 0, 3, 1000, 32767, 32768] {
            let (ssss, bits) = encode_difference(diff);
            assert_eq!(decode_difference(ssss, bits), diff);
        }
    }

    #[test]
    fn test_wrapped_differences() {
        assert_eq!(wrap_difference(65535, 0), -1);
        assert_eq!(wrap_difference(0, 32768), 32768);
        assert_eq!(wrap_difference(10, 4), 6);
    }

    #[test]
    fn test_residuals_use_edge_rules() {
        let plane = [10u16, 12, 15, 11, 13, 20];
        let res = residuals(&plane, 3, PredictorType::Average, 128);
        // First sample against the initial prediction, first row from the
        // left, first column from above.
        assert_eq!(res[0], 10 - 128);
        assert_eq!(res[1], 2);
        assert_eq!(res[2], 3);
        assert_eq!(res[3], 1);
        assert_eq!(res[4], 13 - ((11 + 12) >> 1));
        assert_eq!(res[5], 20 - ((13 + 15) >> 1));
    }
}
