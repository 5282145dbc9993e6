pub mod buffer;
pub mod compression;
pub mod error;
pub mod format;
pub mod jpegl;
pub mod registry;
pub mod wsq;

pub use buffer::RawImage;
pub use compression::PredictorType;
pub use error::{CodecError, CodecResult};
pub use format::{NistComment, StreamInfo};
pub use jpegl::{JpeglConfig, JpeglDecoder, JpeglEncoder};
pub use registry::{CodecRegistry, ImageCodec, JpeglCodec, WsqCodec};
pub use wsq::{WsqConfig, WsqDecoder, WsqEncoder};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn ridges(width: u32, height: u32) -> RawImage {
        let pixels = (0..height)
            .flat_map(|y| {
                (0..width).map(move |x| {
                    let phase = (x as f64 * 0.9 + y as f64 * 0.4).sin() * (y as f64 * 0.15).cos();
                    let grain = ((x * 31 + y * 17) % 7) as f64;
                    (127.5 + 100.0 * phase + grain) as u8
                })
            })
            .collect();
        RawImage::gray8(width, height, pixels).unwrap()
    }

    fn psnr(a: &RawImage, b: &RawImage) -> f64 {
        let mse = a
            .samples
            .iter()
            .zip(&b.samples)
            .map(|(&x, &y)| (x as f64 - y as f64).powi(2))
            .sum::<f64>()
            / a.samples.len() as f64;
        if mse == 0.0 {
            f64::INFINITY
        } else {
            10.0 * (255.0f64 * 255.0 / mse).log10()
        }
    }

    #[test]
    fn test_single_bright_pixel_all_predictors() {
        init();
        let mut pixels = vec![0u8; 16 * 16];
        pixels[5 * 16 + 9] = 255;
        let image = RawImage::gray8(16, 16, pixels).unwrap();

        for predictor in 1..=7 {
            let bytes = jpegl::encode(&image, &JpeglConfig::new(predictor)).unwrap();
            let decoded = jpegl::decode(&bytes).unwrap();
            assert_eq!(decoded, image, "predictor {} is not lossless", predictor);
        }
    }

    #[test]
    fn test_blank_wsq_is_mostly_header() {
        init();
        let image = RawImage::gray8(256, 256, vec![0; 256 * 256]).unwrap();
        let bytes = wsq::encode(&image, &WsqConfig::default()).unwrap();
        assert!(bytes.len() < 1024, "blank image took {} bytes", bytes.len());

        let decoded = wsq::decode(&bytes).unwrap();
        assert_eq!((decoded.width, decoded.height), (256, 256));
        assert!(decoded.samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_flat_gray_wsq_is_exact() {
        let image = RawImage::gray8(64, 64, vec![200; 64 * 64]).unwrap();
        let bytes = wsq::encode(&image, &WsqConfig::default()).unwrap();
        assert_eq!(wsq::decode(&bytes).unwrap(), image);
    }

    #[test]
    fn test_wsq_distortion_and_size() {
        init();
        let image = ridges(128, 128);
        let bytes = wsq::encode(&image, &WsqConfig::default()).unwrap();
        let decoded = wsq::decode(&bytes).unwrap();
        let quality = psnr(&image, &decoded);
        assert!(quality > 25.0, "PSNR {:.2} dB at 0.75 bpp", quality);
        assert!(bytes.len() < 4096, "{} bytes at 0.75 bpp", bytes.len());

        let fine = wsq::encode(&image, &WsqConfig::high_quality()).unwrap();
        assert!(fine.len() > bytes.len());
        let fine_quality = psnr(&image, &wsq::decode(&fine).unwrap());
        assert!(fine_quality > quality);
    }

    #[test]
    fn test_wsq_file_rate_follows_bitrate() {
        init();
        let image = ridges(256, 256);
        let pixels = (256 * 256) as f64;
        // Whole-file bits per pixel, headers included, within 20% of the request.
        for bitrate in [0.75f32, 2.25] {
            let bytes = wsq::encode(&image, &WsqConfig::new(bitrate)).unwrap();
            let achieved = bytes.len() as f64 * 8.0 / pixels;
            let target = bitrate as f64;
            assert!(
                (achieved - target).abs() <= 0.2 * target,
                "{:.3} bpp for a {} bpp request",
                achieved,
                bitrate
            );
        }
    }

    #[test]
    fn test_smooth_wsq_round_trip() {
        let pixels = (0..64u32 * 64).map(|i| ((i % 64 + i / 64) * 2) as u8).collect();
        let image = RawImage::gray8(64, 64, pixels).unwrap();
        let decoded = wsq::decode(&wsq::encode(&image, &WsqConfig::default()).unwrap()).unwrap();
        assert!(psnr(&image, &decoded) > 30.0);
    }

    #[test]
    fn test_edited_images_are_invalid_input() {
        let mut wide = ridges(32, 32);
        wide.width = 64;
        let mut short = ridges(32, 32);
        short.samples.truncate(1000);
        let mut empty = ridges(32, 32);
        empty.height = 0;
        empty.samples.clear();

        for image in [&wide, &short, &empty] {
            let err = wsq::encode(image, &WsqConfig::default()).unwrap_err();
            assert!(err.is_invalid_input(), "wsq: {:?}", err);
            let err = jpegl::encode(image, &JpeglConfig::default()).unwrap_err();
            assert!(err.is_invalid_input(), "jpegl: {:?}", err);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let image = ridges(67, 45);
        let config = WsqConfig::default();
        assert_eq!(
            wsq::encode(&image, &config).unwrap(),
            wsq::encode(&image, &config).unwrap()
        );

        let config = JpeglConfig::new(6);
        assert_eq!(
            jpegl::encode(&image, &config).unwrap(),
            jpegl::encode(&image, &config).unwrap()
        );
    }

    #[test]
    fn test_truncated_streams_are_corrupt() {
        let image = ridges(48, 40);

        let lossy = wsq::encode(&image, &WsqConfig::default()).unwrap();
        let err = wsq::decode(&lossy[..lossy.len() - 1]).unwrap_err();
        assert!(err.is_corrupt(), "unexpected {:?}", err);

        let lossless = jpegl::encode(&image, &JpeglConfig::default()).unwrap();
        let err = jpegl::decode(&lossless[..lossless.len() - 1]).unwrap_err();
        assert!(err.is_corrupt(), "unexpected {:?}", err);
    }

    #[test]
    fn test_single_pixel_images() {
        let image = RawImage::gray8(1, 1, vec![77]).unwrap();
        let bytes = jpegl::encode(&image, &JpeglConfig::default()).unwrap();
        assert_eq!(jpegl::decode(&bytes).unwrap(), image);

        let err = wsq::encode(&image, &WsqConfig::default()).unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_odd_dimensions() {
        for (w, h) in [(17, 17), (31, 29), (45, 18)] {
            let image = ridges(w, h);
            let decoded = wsq::decode(&wsq::encode(&image, &WsqConfig::high_quality()).unwrap()).unwrap();
            assert_eq!((decoded.width, decoded.height), (w, h));
            assert!(psnr(&image, &decoded) > 20.0, "{}x{}", w, h);

            let lossless = jpegl::encode(&image, &JpeglConfig::default()).unwrap();
            assert_eq!(jpegl::decode(&lossless).unwrap(), image);
        }
    }

    #[test]
    fn test_sixteen_bit_lossless() {
        let samples: Vec<u16> = (0..23u32 * 11)
            .map(|i| match i % 5 {
                0 => u16::MAX,
                1 => 0,
                _ => (i.wrapping_mul(2654435761u32) >> 16) as u16,
            })
            .collect();
        let image = RawImage::new(23, 11, 16, 1, samples).unwrap();
        for predictor in 1..=7 {
            let bytes = jpegl::encode(&image, &JpeglConfig::new(predictor)).unwrap();
            assert_eq!(jpegl::decode(&bytes).unwrap(), image, "predictor {}", predictor);
        }
    }

    #[test]
    fn test_invalid_predictors() {
        let image = ridges(8, 8);
        for predictor in [0u8, 8] {
            let err = jpegl::encode(&image, &JpeglConfig::new(predictor)).unwrap_err();
            assert!(err.is_invalid_input());
        }
    }

    #[test]
    fn test_gray_image_interop() {
        let gray = image::GrayImage::from_fn(20, 20, |x, y| image::Luma([(x * 12 + y) as u8]));
        let raw = RawImage::try_from(&gray).unwrap();
        let decoded = jpegl::decode(&jpegl::encode(&raw, &JpeglConfig::default()).unwrap()).unwrap();
        let back = image::DynamicImage::try_from(&decoded).unwrap();
        assert_eq!(back.to_luma8(), gray);
    }
}
