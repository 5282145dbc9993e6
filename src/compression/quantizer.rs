use super::wavelet::{Region, SubbandLayout, CODED_SUBBANDS};
use crate::error::{CodecError, CodecResult};
use crate::format::header::Scaled;
use crate::format::tables::{QuantTable, MAX_SUBBANDS};
use rayon::prelude::*;

/// Fraction of a bin width by which reconstruction pulls toward zero.
pub const BIN_CENTER: f64 = 0.44;
/// Subbands at or below this variance carry no information and are dropped.
pub const MIN_VARIANCE: f64 = 1.01;
/// Below this total, central-window variances are replaced by full-band ones.
pub const VARIANCE_FLOOR: f64 = 20000.0;
/// Largest quantized magnitude the allocator will let a subband reach.
pub const MAX_QUANTIZED: f64 = 32767.0;

/// Mean shift and rescale that map pixels to roughly [-128, 128].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub m_shift: f64,
    pub r_scale: f64,
}

impl Normalization {
    /// Both factors are rounded through their 16-bit wire form.
    pub fn from_pixels(pixels: &[u8]) -> Self {
        let count = pixels.len().max(1) as f64;
        let sum: u64 = pixels.iter().map(|&p| p as u64).sum();
        let mean = sum as f64 / count;
        let lo = pixels.iter().copied().min().unwrap_or(0) as f64;
        let hi = pixels.iter().copied().max().unwrap_or(0) as f64;

        let m_shift = Scaled::quantize_u16(mean);
        let spread = (hi - m_shift).max(m_shift - lo);
        let r_scale = if spread > 0.0 {
            Scaled::quantize_u16(spread / 128.0)
        } else {
            1.0
        };
        // A spread too small to survive rounding.
        let r_scale = if r_scale > 0.0 { r_scale } else { 1.0 };

        Self { m_shift, r_scale }
    }

    pub fn normalize(&self, pixels: &[u8]) -> Vec<f32> {
        pixels
            .iter()
            .map(|&p| ((p as f64 - self.m_shift) / self.r_scale) as f32)
            .collect()
    }

    pub fn denormalize(&self, plane: &[f32]) -> Vec<u8> {
        plane
            .iter()
            .map(|&v| (v as f64 * self.r_scale + self.m_shift).round().clamp(0.0, 255.0) as u8)
            .collect()
    }
}

/// Second moment about zero. A lone coefficient still reports its energy.
fn window_energy(plane: &[f32], width: usize, window: Region) -> f64 {
    let n = window.area();
    if n == 0 {
        return 0.0;
    }

    let mut sum_sq = 0.0f64;
    for y in window.y..window.y + window.height {
        let row = &plane[y * width + window.x..y * width + window.x + window.width];
        sum_sq += row.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>();
    }
    sum_sq / n as f64
}

/// Per-subband activity over the central window of each coded subband,
/// falling back to whole subbands when the image carries little energy.
/// Measured about zero, so a subband holding a constant offset still counts.
pub fn subband_variances(plane: &[f32], width: usize, layout: &SubbandLayout) -> [f64; CODED_SUBBANDS] {
    let central = |band: &Region| {
        let window = Region::new(
            band.x + band.width / 8,
            band.y + 9 * band.height / 32,
            3 * band.width / 4,
            7 * band.height / 16,
        );
        // Small subbands have no usable interior.
        if window.area() < 2 {
            *band
        } else {
            window
        }
    };

    let mut variances = [0.0; CODED_SUBBANDS];
    for (v, band) in variances.iter_mut().zip(layout.coded()) {
        *v = window_energy(plane, width, central(band));
    }

    if variances.iter().sum::<f64>() < VARIANCE_FLOOR {
        for (v, band) in variances.iter_mut().zip(layout.coded()) {
            *v = window_energy(plane, width, *band);
        }
    }
    variances
}

/// Largest coefficient magnitude in each coded subband.
pub fn subband_peaks(plane: &[f32], width: usize, layout: &SubbandLayout) -> [f64; CODED_SUBBANDS] {
    let mut peaks = [0.0; CODED_SUBBANDS];
    for (peak, band) in peaks.iter_mut().zip(layout.coded()) {
        for y in band.y..band.y + band.height {
            let row = &plane[y * width + band.x..y * width + band.x + band.width];
            for &v in row {
                *peak = f64::max(*peak, (v as f64).abs());
            }
        }
    }
    peaks
}

fn band_weight(band: usize) -> f64 {
    match band {
        52 | 56 => 1.32,
        53 | 55 | 58 | 59 => 1.08,
        54 | 57 => 1.42,
        _ => 1.0,
    }
}

fn band_share(band: usize) -> f64 {
    match band {
        0..=3 => 1.0 / 1024.0,
        4..=50 => 1.0 / 256.0,
        _ => 1.0 / 16.0,
    }
}

#[derive(Debug, Clone)]
pub struct Quantizer {
    table: QuantTable,
}

impl Quantizer {
    pub fn new(table: QuantTable) -> Self {
        Self { table }
    }

    /// Chooses bin widths that spend roughly `bitrate` bits per pixel.
    ///
    /// No width is finer than `peak / MAX_QUANTIZED`, which keeps every
    /// quantized value inside the 16-bit escape however few subbands share
    /// the rate. Every width is rounded through its wire form, so the
    /// encoder quantizes with exactly the table the decoder will read.
    pub fn allocate(
        variances: &[f64; CODED_SUBBANDS],
        peaks: &[f64; CODED_SUBBANDS],
        bitrate: f64,
    ) -> CodecResult<Self> {
        if !bitrate.is_finite() || bitrate <= 0.0 {
            return Err(CodecError::EncodingFailure(format!(
                "cannot allocate {} bits per pixel",
                bitrate
            )));
        }

        let mut active: Vec<usize> = (0..CODED_SUBBANDS)
            .filter(|&b| variances[b] >= MIN_VARIANCE)
            .collect();

        let mut initial = [0.0f64; CODED_SUBBANDS];
        let mut sigma = [0.0f64; CODED_SUBBANDS];
        for &b in &active {
            initial[b] = if b < 4 {
                1.0
            } else {
                10.0 / (band_weight(b) * variances[b].ln())
            };
            sigma[b] = variances[b].sqrt();
        }

        // log2 of the rate parameter q; the linear form overflows once only
        // a handful of subbands remain active.
        let mut log_q = 0.0f64;
        while !active.is_empty() {
            let share: f64 = active.iter().map(|&b| band_share(b)).sum();
            let spread: f64 = active
                .iter()
                .map(|&b| band_share(b) * (sigma[b] / initial[b]).log2())
                .sum();
            log_q = bitrate / share - 1.0 - 2.5f64.log2() - spread / share;
            if !log_q.is_finite() {
                return Err(CodecError::EncodingFailure(format!(
                    "bit allocation diverged at {} bpp",
                    bitrate
                )));
            }

            let before = active.len();
            active.retain(|&b| initial[b].log2() - log_q < (5.0 * sigma[b]).log2());
            if active.len() == before {
                break;
            }
        }

        let mut table = QuantTable {
            bin_center: Scaled::quantize_u16(BIN_CENTER),
            bin_widths: [0.0; MAX_SUBBANDS],
            zero_bins: [0.0; MAX_SUBBANDS],
        };
        for &b in &active {
            let floor = peaks[b] / MAX_QUANTIZED;
            let width = (initial[b] * (-log_q).exp2()).max(floor);
            if !width.is_finite() {
                return Err(CodecError::EncodingFailure(format!(
                    "subband {} received a non-finite bin width",
                    b
                )));
            }
            let width = Scaled::quantize_u16(width);
            if width > 0.0 {
                table.bin_widths[b] = width;
                table.zero_bins[b] = Scaled::quantize_u16(1.2 * width);
            }
        }

        log::debug!(
            "allocated {} of {} subbands at {:.4} bpp (log2 q = {:.3})",
            table.bin_widths.iter().filter(|&&w| w > 0.0).count(),
            CODED_SUBBANDS,
            bitrate,
            log_q
        );

        Ok(Self { table })
    }

    pub fn table(&self) -> &QuantTable {
        &self.table
    }

    pub fn into_table(self) -> QuantTable {
        self.table
    }

    pub fn is_coded(&self, band: usize) -> bool {
        band < CODED_SUBBANDS && self.table.bin_widths[band] > 0.0
    }

    pub fn quantize_value(&self, band: usize, value: f32) -> i64 {
        let q = self.table.bin_widths[band];
        let half_zero = self.table.zero_bins[band] / 2.0;
        let v = value as f64;
        if v.abs() <= half_zero {
            0
        } else if v > 0.0 {
            ((v - half_zero) / q + 1.0).floor() as i64
        } else {
            ((v + half_zero) / q - 1.0).trunc() as i64
        }
    }

    pub fn dequantize_value(&self, band: usize, k: i64) -> f32 {
        let q = self.table.bin_widths[band];
        let half_zero = self.table.zero_bins[band] / 2.0;
        let c = self.table.bin_center;
        let k_f = k as f64;
        let v = match k.signum() {
            1 => q * (k_f - c) + half_zero,
            -1 => q * (k_f + c) - half_zero,
            _ => 0.0,
        };
        v as f32
    }

    /// Quantized coefficients of every subband in raster order; uncoded
    /// subbands yield empty vectors.
    pub fn quantize(&self, plane: &[f32], width: usize, layout: &SubbandLayout) -> Vec<Vec<i64>> {
        layout
            .coded()
            .par_iter()
            .enumerate()
            .map(|(band, region)| {
                if !self.is_coded(band) {
                    return Vec::new();
                }
                let mut out = Vec::with_capacity(region.area());
                for y in region.y..region.y + region.height {
                    let start = y * width + region.x;
                    for &v in &plane[start..start + region.width] {
                        out.push(self.quantize_value(band, v));
                    }
                }
                out
            })
            .collect()
    }

    /// Writes reconstructed coefficients into `plane`; uncoded subbands
    /// stay zero.
    pub fn dequantize(
        &self,
        bands: &[Vec<i64>],
        plane: &mut [f32],
        width: usize,
        layout: &SubbandLayout,
    ) -> CodecResult<()> {
        for (band, region) in layout.coded().iter().enumerate() {
            if !self.is_coded(band) {
                continue;
            }
            let values = bands.get(band).ok_or_else(|| {
                CodecError::CorruptStream(format!("coefficients for subband {} are missing", band))
            })?;
            if values.len() != region.area() {
                return Err(CodecError::CorruptStream(format!(
                    "subband {} holds {} coefficients, expected {}",
                    band,
                    values.len(),
                    region.area()
                )));
            }
            for (row, chunk) in values.chunks(region.width).enumerate() {
                let start = (region.y + row) * width + region.x;
                for (dst, &k) in plane[start..start + region.width].iter_mut().zip(chunk) {
                    *dst = self.dequantize_value(band, k);
                }
            }
        }
        Ok(())
    }
}
