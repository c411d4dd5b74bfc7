//! Contracts the pipeline needs from the codec library and the demuxer.
//!
//! The bus never touches a bitstream itself: every decode or encode call
//! goes through one of these traits, so the real FFmpeg/OpenH264 adapters
//! and the deterministic test codecs plug in the same way.

use std::path::PathBuf;

use crate::{
    config::LayerConfig,
    types::{DecodedPicture, EncodedFrame, GridSlot, Packet, Picture, RoutedSegment, StreamDescriptor},
};

/// One decode or encode operation per call, driven by a single stage thread.
pub trait Codec: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Feeds one item. Zero outputs is a valid answer while the codec buffers.
    fn process(&mut self, input: Self::Input) -> anyhow::Result<Vec<Self::Output>>;

    /// Drains whatever the codec still holds at end of stream.
    fn flush(&mut self) -> anyhow::Result<Vec<Self::Output>> {
        Ok(Vec::new())
    }

    /// Releases the codec. Consumes it, so it runs at most once.
    fn close(self)
    where
        Self: Sized,
    {
    }
}

/// Demuxed video packets of the selected input stream.
pub trait PacketSource: Send + 'static {
    fn descriptor(&self) -> &StreamDescriptor;

    /// Next video packet, `Ok(None)` at end of input.
    fn read_packet(&mut self) -> anyhow::Result<Option<Packet>>;
}

/// Identity of one grid decoder, handed to the backend when it is opened.
#[derive(Clone, Debug)]
pub struct SlotContext {
    pub slot: GridSlot,
    pub tag: String,
    pub width: u32,
    pub height: u32,
    pub work_dir: PathBuf,
}

/// Factory for every codec the orchestrator wires together.
pub trait CodecBackend: Send + Sync + 'static {
    type Source: PacketSource;
    type Decoder: Codec<Input = Packet, Output = Picture>;
    type Encoder: Codec<Input = Picture, Output = EncodedFrame>;
    type SvcDecoder: Codec<Input = RoutedSegment, Output = DecodedPicture>;

    fn open_source(&self, locator: &str) -> anyhow::Result<Self::Source>;

    fn open_decoder(&self, source: &Self::Source) -> anyhow::Result<Self::Decoder>;

    fn open_encoder(
        &self,
        width: u32,
        height: u32,
        layers: &LayerConfig,
    ) -> anyhow::Result<Self::Encoder>;

    fn open_svc_decoder(&self, ctx: &SlotContext) -> anyhow::Result<Self::SvcDecoder>;
}
