//! Threaded SVC relay pipeline: H.264 decode → SVC encode → layer dispatch
//! → grid of SVC decoders, each stage on its own thread behind a bounded
//! blocking channel.

pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod grid;
pub mod orchestrator;
pub mod report;
pub mod stage;
pub mod types;
pub mod wiring;

#[cfg(test)]
mod testing;

pub use channel::BoundedChannel;
pub use codec::{Codec, CodecBackend, PacketSource, SlotContext};
pub use config::{LayerConfig, SpatialLayer, SvcConfig, Topology};
pub use dispatch::LayerDispatcher;
pub use grid::DecoderGrid;
pub use orchestrator::{Orchestrator, StartOptions};
pub use report::RunReport;
pub use stage::{Downstream, Lifecycle, PipelineStage, StageOutput};
