use crate::buffer::RawImage;
use crate::error::{CodecError, CodecResult};
use crate::format::StreamInfo;
use crate::jpegl::{self, JpeglConfig};
use crate::wsq::{self, WsqConfig};

/// A codec provider that can be selected at runtime.
///
/// Additional formats (baseline JPEG, ANSI/NIST records) plug in by
/// implementing this trait and registering with a [`CodecRegistry`].
pub trait ImageCodec: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap check of the leading bytes.
    fn sniff(&self, data: &[u8]) -> bool;

    fn encode(&self, image: &RawImage) -> CodecResult<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> CodecResult<RawImage>;

    fn probe(&self, data: &[u8]) -> CodecResult<StreamInfo>;
}

#[derive(Debug, Clone, Default)]
pub struct WsqCodec {
    pub config: WsqConfig,
}

impl WsqCodec {
    pub fn new(config: WsqConfig) -> Self {
        Self { config }
    }
}

impl ImageCodec for WsqCodec {
    fn name(&self) -> &str {
        "wsq"
    }

    fn sniff(&self, data: &[u8]) -> bool {
        data.starts_with(&[0xFF, 0xA0])
    }

    fn encode(&self, image: &RawImage) -> CodecResult<Vec<u8>> {
        wsq::encode(image, &self.config)
    }

    fn decode(&self, data: &[u8]) -> CodecResult<RawImage> {
        wsq::decode(data)
    }

    fn probe(&self, data: &[u8]) -> CodecResult<StreamInfo> {
        wsq::probe(data)
    }
}

#[derive(Debug, Clone, Default)]
pub struct JpeglCodec {
    pub config: JpeglConfig,
}

impl JpeglCodec {
    pub fn new(config: JpeglConfig) -> Self {
        Self { config }
    }
}

impl ImageCodec for JpeglCodec {
    fn name(&self) -> &str {
        "jpegl"
    }

    fn sniff(&self, data: &[u8]) -> bool {
        data.starts_with(&[0xFF, 0xD8])
    }

    fn encode(&self, image: &RawImage) -> CodecResult<Vec<u8>> {
        jpegl::encode(image, &self.config)
    }

    fn decode(&self, data: &[u8]) -> CodecResult<RawImage> {
        jpegl::decode(data)
    }

    fn probe(&self, data: &[u8]) -> CodecResult<StreamInfo> {
        jpegl::probe(data)
    }
}

pub struct CodecRegistry {
    codecs: Vec<Box<dyn ImageCodec>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self { codecs: Vec::new() }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(WsqCodec::default()));
        registry.register(Box::new(JpeglCodec::default()));
        registry
    }

    /// Adds a provider, replacing any existing one with the same name.
    pub fn register(&mut self, codec: Box<dyn ImageCodec>) {
        self.codecs.retain(|c| c.name() != codec.name());
        self.codecs.push(codec);
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageCodec> {
        self.codecs
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .map(|c| c.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.codecs.iter().map(|c| c.name()).collect()
    }

    pub fn detect(&self, data: &[u8]) -> Option<&dyn ImageCodec> {
        self.codecs
            .iter()
            .find(|c| c.sniff(data))
            .map(|c| c.as_ref())
    }

    pub fn encode(&self, name: &str, image: &RawImage) -> CodecResult<Vec<u8>> {
        self.get(name)
            .ok_or_else(|| CodecError::Unsupported(format!("no codec named {:?}", name)))?
            .encode(image)
    }

    /// Decodes with whichever provider recognizes the stream.
    pub fn decode(&self, data: &[u8]) -> CodecResult<RawImage> {
        self.detect(data)
            .ok_or_else(|| {
                CodecError::Unsupported("no registered codec recognizes the stream".into())
            })?
            .decode(data)
    }

    pub fn probe(&self, data: &[u8]) -> CodecResult<StreamInfo> {
        self.detect(data)
            .ok_or_else(|| {
                CodecError::Unsupported("no registered codec recognizes the stream".into())
            })?
            .probe(data)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RawDump;

    impl ImageCodec for RawDump {
        fn name(&self) -> &str {
            "raw"
        }

        fn sniff(&self, data: &[u8]) -> bool {
            data.starts_with(b"RAW8")
        }

        fn encode(&self, image: &RawImage) -> CodecResult<Vec<u8>> {
            let mut out = b"RAW8".to_vec();
            out.push(image.width as u8);
            out.push(image.height as u8);
            out.extend(image.to_gray8()?);
            Ok(out)
        }

        fn decode(&self, data: &[u8]) -> CodecResult<RawImage> {
            if data.len() < 6 {
                return Err(CodecError::CorruptStream("short raw dump".into()));
            }
            RawImage::gray8(data[4] as u32, data[5] as u32, data[6..].to_vec())
        }

        fn probe(&self, data: &[u8]) -> CodecResult<StreamInfo> {
            let image = self.decode(data)?;
            Ok(StreamInfo {
                width: image.width,
                height: image.height,
                depth: 8,
                channels: 1,
                ppi: None,
                lossy: false,
                comments: Vec::new(),
            })
        }
    }

    fn fingerprint() -> RawImage {
        let pixels = (0..32u32 * 32)
            .map(|i| (((i % 32) * 7 + (i / 32) * 3) % 256) as u8)
            .collect();
        RawImage::gray8(32, 32, pixels).unwrap()
    }

    #[test]
    fn test_dispatch_by_sniffing() {
        let registry = CodecRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["wsq", "jpegl"]);

        let image = fingerprint();
        let lossless = registry.encode("JPEGL", &image).unwrap();
        assert_eq!(registry.detect(&lossless).unwrap().name(), "jpegl");
        assert_eq!(registry.decode(&lossless).unwrap(), image);

        let lossy = registry.encode("wsq", &image).unwrap();
        assert_eq!(registry.detect(&lossy).unwrap().name(), "wsq");
        assert_eq!(registry.probe(&lossy).unwrap().width, 32);
    }

    #[test]
    fn test_unknown_streams_and_names() {
        let registry = CodecRegistry::with_defaults();
        assert!(registry.get("jpeg").is_none());
        assert!(matches!(
            registry.decode(b"GIF89a"),
            Err(CodecError::Unsupported(_))
        ));
        assert!(registry.encode("png", &fingerprint()).is_err());
    }

    #[test]
    fn test_external_provider_plugs_in() {
        let mut registry = CodecRegistry::with_defaults();
        registry.register(Box::new(RawDump));
        let image = fingerprint();
        let bytes = registry.encode("raw", &image).unwrap();
        assert_eq!(registry.decode(&bytes).unwrap(), image);

        registry.register(Box::new(WsqCodec::new(WsqConfig::high_quality())));
        assert_eq!(registry.names(), vec!["jpegl", "raw", "wsq"]);
    }
}
