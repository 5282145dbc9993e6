pub mod entropy;
pub mod predictor;
pub mod quantizer;
pub mod wavelet;

pub use entropy::{BitReader, BitWriter, HuffmanDecoder, HuffmanEncoder, HuffmanSpec};
pub use predictor::{decode_difference, encode_difference, predict_at, residuals, PredictorType};
pub use quantizer::{subband_peaks, subband_variances, Normalization, Quantizer};
pub use wavelet::{decompose, reconstruct, FilterBank, Region, SubbandLayout};
