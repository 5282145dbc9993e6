//! Lossless JPEG (ITU T.81 process 14, Huffman coded, predictive).

pub mod decoder;
pub mod encoder;

pub use decoder::{probe, JpeglDecoder};
pub use encoder::JpeglEncoder;

use crate::buffer::RawImage;
use crate::compression::predictor::PredictorType;
use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PREDICTOR: u8 = 4;
pub const MIN_PRECISION: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JpeglConfig {
    /// Selection value 1..=7.
    pub predictor: u8,
    /// Low-order bits dropped before coding.
    pub point_transform: u8,
    pub comment: Option<String>,
}

impl JpeglConfig {
    pub fn new(predictor: u8) -> Self {
        Self {
            predictor,
            point_transform: 0,
            comment: None,
        }
    }

    pub fn with_point_transform(mut self, point_transform: u8) -> Self {
        self.point_transform = point_transform;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Checks the settings against an image of the given precision.
    pub fn validate(&self, precision: u8) -> CodecResult<PredictorType> {
        let predictor = PredictorType::from_u8(self.predictor)?;
        if self.point_transform >= precision {
            return Err(CodecError::InvalidInput(format!(
                "point transform {} must be below the {}-bit precision",
                self.point_transform, precision
            )));
        }
        Ok(predictor)
    }
}

impl Default for JpeglConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PREDICTOR)
    }
}

pub fn encode(image: &RawImage, config: &JpeglConfig) -> CodecResult<Vec<u8>> {
    JpeglEncoder::new(config.clone()).encode(image)
}

pub fn decode(data: &[u8]) -> CodecResult<RawImage> {
    JpeglDecoder::new().decode(data)
}

/// Prediction for the first sample of a scan.
pub(crate) fn initial_prediction(precision: u8, point_transform: u8) -> i32 {
    1 << (precision - point_transform - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        assert_eq!(JpeglConfig::default().validate(8).unwrap(), PredictorType::Planar);
        assert!(JpeglConfig::new(0).validate(8).unwrap_err().is_invalid_input());
        assert!(JpeglConfig::new(8).validate(8).unwrap_err().is_invalid_input());
        assert!(JpeglConfig::new(1)
            .with_point_transform(8)
            .validate(8)
            .unwrap_err()
            .is_invalid_input());
        assert!(JpeglConfig::new(1).with_point_transform(7).validate(8).is_ok());
    }

    #[test]
    fn test_initial_prediction() {
        assert_eq!(initial_prediction(8, 0), 128);
        assert_eq!(initial_prediction(16, 0), 32768);
        assert_eq!(initial_prediction(12, 3), 256);
        assert_eq!(initial_prediction(2, 1), 1);
    }
}
