use std::fmt::{Display, Formatter};

use bytes::Bytes;
use serde::Serialize;

/// Channel element: real data or the end-of-stream sentinel.
#[derive(Clone, Debug)]
pub enum Cmd<T> {
    Data(T),
    Eof,
}

/// Basic properties of the video stream picked from the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    // (numerator, denominator)
    pub time_base: (i32, i32),
    pub frame_rate: (i32, i32),
}

impl StreamDescriptor {
    pub fn fps(&self) -> f32 {
        if self.frame_rate.1 == 0 {
            return 0.0;
        }
        self.frame_rate.0 as f32 / self.frame_rate.1 as f32
    }
}

/// Compressed video packet read from the input.
#[derive(Clone, Debug)]
pub struct Packet {
    pub data: Bytes,
    pub pts: Option<i64>,
    pub is_key: bool,
}

impl Packet {
    pub fn new(data: impl Into<Bytes>, pts: Option<i64>, is_key: bool) -> Self {
        Self {
            data: data.into(),
            pts,
            is_key,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Tightly packed I420 picture handed from the H.264 decoder to the SVC encoder.
#[derive(Clone, Debug)]
pub struct Picture {
    pub y: Bytes,
    pub u: Bytes,
    pub v: Bytes,
    pub width: u32,
    pub height: u32,
    /// milliseconds
    pub timestamp: i64,
}

/// OpenH264 `EVideoFrameType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FrameType {
    Invalid,
    Idr,
    I,
    P,
    Skip,
    IpMixed,
}

impl FrameType {
    /// Invalid and skipped frames carry nothing a decoder can use.
    pub fn is_dispatchable(&self) -> bool {
        !matches!(self, FrameType::Invalid | FrameType::Skip)
    }
}

/// One scalability layer's contribution to one access unit.
#[derive(Clone, Debug)]
pub struct EncodedLayer {
    pub spatial_id: u8,
    pub temporal_id: u8,
    pub nal_lengths: Vec<usize>,
    pub payload: Bytes,
}

impl EncodedLayer {
    pub fn new(spatial_id: u8, temporal_id: u8, nal_lengths: Vec<usize>, payload: Bytes) -> Self {
        Self {
            spatial_id,
            temporal_id,
            nal_lengths,
            payload,
        }
    }

    /// Bytes covered by the NAL units of this layer.
    pub fn len(&self) -> usize {
        self.nal_lengths.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Complete encoder output for one input picture.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    /// milliseconds
    pub timestamp: i64,
    pub frame_type: FrameType,
    pub layers: Vec<EncodedLayer>,
}

impl EncodedFrame {
    pub fn temporal_id(&self) -> Option<u8> {
        self.layers.first().map(|l| l.temporal_id)
    }

    pub fn size(&self) -> usize {
        self.layers.iter().map(EncodedLayer::len).sum()
    }
}

/// Address of one decoder in the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GridSlot {
    pub temporal: usize,
    pub spatial: usize,
}

impl GridSlot {
    pub fn new(temporal: usize, spatial: usize) -> Self {
        Self { temporal, spatial }
    }
}

impl Display for GridSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "T{}S{}", self.temporal, self.spatial)
    }
}

/// Dispatcher output: the bytes one grid decoder needs for one access unit.
/// The buffer is owned by this segment alone.
#[derive(Clone, Debug)]
pub struct RoutedSegment {
    pub slot: GridSlot,
    pub payload: Bytes,
    pub timestamp: i64,
}

impl RoutedSegment {
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Picture reconstructed by one grid decoder.
#[derive(Clone, Debug)]
pub struct DecodedPicture {
    pub slot: GridSlot,
    pub width: u32,
    pub height: u32,
    pub timestamp: i64,
    pub y: Bytes,
    pub u: Bytes,
    pub v: Bytes,
}

impl Display for DecodedPicture {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "DecodedPicture slot: {}, width: {}, height: {}, timestamp: {}",
            self.slot, self.width, self.height, self.timestamp
        )
    }
}
