pub mod header;
pub mod jfif;
pub mod marker;
pub mod nistcom;
pub mod tables;

pub use header::{FrameComponent, FrameHeader, ScanComponent, ScanHeader, Scaled, WsqFrameHeader};
pub use jfif::JfifHeader;
pub use marker::{JpegMarker, SegmentReader, SegmentWriter, WsqMarker};
pub use nistcom::NistComment;
pub use tables::{QuantTable, TransformTable};

/// Header-level facts about a stream, read without entropy decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub channels: u8,
    pub ppi: Option<u32>,
    pub lossy: bool,
    /// Text of every COM segment, NISTCOM blocks included.
    pub comments: Vec<String>,
}
