//! Deterministic codecs used by the unit tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;

use crate::{
    codec::{Codec, CodecBackend, PacketSource, SlotContext},
    config::{LayerConfig, temporal_pattern},
    stage::{Downstream, StageOutput},
    types::{
        DecodedPicture, EncodedFrame, EncodedLayer, FrameType, GridSlot, Packet, Picture,
        RoutedSegment, StreamDescriptor,
    },
};

/// What a recording downstream saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<O> {
    Item(Vec<O>),
    Error(String),
    Eof,
}

#[derive(Clone)]
pub struct Recorder<O> {
    pub events: Arc<Mutex<Vec<Event<O>>>>,
}

impl<O> Recorder<O> {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn eof_count(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Eof))
            .count()
    }
}

impl<O: Send + 'static> Downstream<O> for Recorder<O> {
    fn deliver(&mut self, output: StageOutput<O>) {
        let event = match output {
            StageOutput::Item(Ok(items)) => Event::Item(items),
            StageOutput::Item(Err(e)) => Event::Error(e.to_string()),
            StageOutput::Eof => Event::Eof,
        };
        self.events.lock().unwrap().push(event);
    }
}

/// Doubles its input; fails on negative values; holds `pending` back until flush.
/// Panics when it sees `panic_on`.
pub struct Doubler {
    pub pending: Option<i32>,
    pub closed: Arc<AtomicUsize>,
    pub delay: Option<Duration>,
    pub panic_on: Option<i32>,
}

impl Doubler {
    pub fn new(closed: Arc<AtomicUsize>) -> Self {
        Self {
            pending: None,
            closed,
            delay: None,
            panic_on: None,
        }
    }
}

impl Codec for Doubler {
    type Input = i32;
    type Output = i32;

    fn process(&mut self, input: i32) -> anyhow::Result<Vec<i32>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.panic_on == Some(input) {
            panic!("doubler cannot take {}", input);
        }
        if input < 0 {
            anyhow::bail!("negative input {}", input);
        }
        Ok(vec![input * 2])
    }

    fn flush(&mut self) -> anyhow::Result<Vec<i32>> {
        Ok(self.pending.take().into_iter().collect())
    }

    fn close(self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn layer(spatial_id: u8, temporal_id: u8, size: usize) -> EncodedLayer {
    // two NAL units per layer, bytes tagged with the spatial id
    let first = size / 2;
    EncodedLayer::new(
        spatial_id,
        temporal_id,
        vec![first, size - first],
        Bytes::from(vec![spatial_id; size]),
    )
}

pub fn frame(temporal_id: u8, sizes: &[usize]) -> EncodedFrame {
    EncodedFrame {
        timestamp: 40,
        frame_type: FrameType::P,
        layers: sizes
            .iter()
            .enumerate()
            .map(|(s, &size)| layer(s as u8, temporal_id, size))
            .collect(),
    }
}

pub struct MockSource {
    descriptor: StreamDescriptor,
    packets: VecDeque<Packet>,
    endless: bool,
    next_pts: i64,
}

impl PacketSource for MockSource {
    fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    fn read_packet(&mut self) -> anyhow::Result<Option<Packet>> {
        if self.endless {
            std::thread::sleep(Duration::from_millis(1));
            self.next_pts += 1;
            return Ok(Some(Packet::new(vec![1u8; 8], Some(self.next_pts), false)));
        }
        Ok(self.packets.pop_front())
    }
}

/// Turns every packet into a tiny picture. An empty packet is a decode error.
pub struct MockDecoder {
    width: u32,
    height: u32,
}

impl Codec for MockDecoder {
    type Input = Packet;
    type Output = Picture;

    fn process(&mut self, input: Packet) -> anyhow::Result<Vec<Picture>> {
        if input.data.is_empty() {
            anyhow::bail!("corrupt packet");
        }
        let y = Bytes::from(vec![16u8; (self.width * self.height) as usize]);
        let uv = Bytes::from(vec![128u8; (self.width * self.height / 4) as usize]);
        Ok(vec![Picture {
            y,
            u: uv.clone(),
            v: uv,
            width: self.width,
            height: self.height,
            timestamp: input.pts.unwrap_or(0) * 40,
        }])
    }
}

/// Emits one access unit per picture, layer `s` being `10 * (s + 1)` bytes,
/// temporal ids following the GOP pattern.
pub struct MockEncoder {
    layers: LayerConfig,
    index: usize,
}

impl Codec for MockEncoder {
    type Input = Picture;
    type Output = EncodedFrame;

    fn process(&mut self, input: Picture) -> anyhow::Result<Vec<EncodedFrame>> {
        let pattern = temporal_pattern(self.layers.temporal_layers);
        let temporal_id = pattern[self.index % pattern.len()];
        let frame_type = if self.index == 0 {
            FrameType::Idr
        } else {
            FrameType::P
        };
        self.index += 1;
        Ok(vec![EncodedFrame {
            timestamp: input.timestamp,
            frame_type,
            layers: (0..self.layers.spatial_layers.len())
                .map(|s| layer(s as u8, temporal_id, 10 * (s + 1)))
                .collect(),
        }])
    }
}

/// Records every segment it receives, keyed by stage tag.
pub struct MockSvcDecoder {
    ctx: SlotContext,
    received: Arc<Mutex<HashMap<String, Vec<usize>>>>,
    closed: Arc<AtomicUsize>,
}

impl Codec for MockSvcDecoder {
    type Input = RoutedSegment;
    type Output = DecodedPicture;

    fn process(&mut self, input: RoutedSegment) -> anyhow::Result<Vec<DecodedPicture>> {
        self.received
            .lock()
            .unwrap()
            .entry(self.ctx.tag.clone())
            .or_default()
            .push(input.len());
        Ok(vec![DecodedPicture {
            slot: input.slot,
            width: self.ctx.width,
            height: self.ctx.height,
            timestamp: input.timestamp,
            y: Bytes::new(),
            u: Bytes::new(),
            v: Bytes::new(),
        }])
    }

    fn close(self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockBackend {
    pub packets: usize,
    pub endless: bool,
    pub corrupt_packets: HashSet<usize>,
    pub fail_encoder: bool,
    pub fail_slots: HashSet<GridSlot>,
    pub encoders_opened: AtomicUsize,
    pub svc_closed: Arc<AtomicUsize>,
    pub received: Arc<Mutex<HashMap<String, Vec<usize>>>>,
}

impl MockBackend {
    pub fn with_packets(packets: usize) -> Self {
        Self {
            packets,
            ..Default::default()
        }
    }

    pub fn received_by(&self, tag: &str) -> Vec<usize> {
        self.received
            .lock()
            .unwrap()
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }
}

impl CodecBackend for MockBackend {
    type Source = MockSource;
    type Decoder = MockDecoder;
    type Encoder = MockEncoder;
    type SvcDecoder = MockSvcDecoder;

    fn open_source(&self, locator: &str) -> anyhow::Result<MockSource> {
        if locator.is_empty() {
            anyhow::bail!("empty locator");
        }
        let packets = (0..self.packets)
            .map(|i| {
                let data = if self.corrupt_packets.contains(&i) {
                    Vec::new()
                } else {
                    vec![1u8; 8]
                };
                Packet::new(data, Some(i as i64), i == 0)
            })
            .collect();
        Ok(MockSource {
            descriptor: StreamDescriptor {
                index: 0,
                width: 64,
                height: 32,
                time_base: (1, 25),
                frame_rate: (25, 1),
            },
            packets,
            endless: self.endless,
            next_pts: 0,
        })
    }

    fn open_decoder(&self, source: &MockSource) -> anyhow::Result<MockDecoder> {
        Ok(MockDecoder {
            width: source.descriptor.width,
            height: source.descriptor.height,
        })
    }

    fn open_encoder(
        &self,
        _width: u32,
        _height: u32,
        layers: &LayerConfig,
    ) -> anyhow::Result<MockEncoder> {
        if self.fail_encoder {
            anyhow::bail!("encoder unavailable");
        }
        self.encoders_opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockEncoder {
            layers: layers.clone(),
            index: 0,
        })
    }

    fn open_svc_decoder(&self, ctx: &SlotContext) -> anyhow::Result<MockSvcDecoder> {
        if self.fail_slots.contains(&ctx.slot) {
            anyhow::bail!("decoder for {} unavailable", ctx.slot);
        }
        Ok(MockSvcDecoder {
            ctx: ctx.clone(),
            received: self.received.clone(),
            closed: self.svc_closed.clone(),
        })
    }
}
