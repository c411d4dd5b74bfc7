//! Downstreams the orchestrator installs behind each stage.
//!
//! Every one of them forwards the end-of-stream marker to all the channels
//! it feeds, which is how a single sentinel injected at the H.264 decoder
//! reaches every grid decoder.

use std::sync::Arc;

use crate::{
    dispatch::LayerDispatcher,
    grid::DecoderGrid,
    report::{PipelineCounters, SlotStats},
    stage::{Downstream, PipelineStage, StageOutput},
    types::{DecodedPicture, EncodedFrame, Picture},
};

/// H.264 decoder output → SVC encoder(s).
pub struct EncoderFeed {
    encoders: Vec<Arc<PipelineStage<Picture>>>,
    counters: Arc<PipelineCounters>,
}

impl EncoderFeed {
    pub fn new(encoders: Vec<Arc<PipelineStage<Picture>>>, counters: Arc<PipelineCounters>) -> Self {
        Self { encoders, counters }
    }
}

impl Downstream<Picture> for EncoderFeed {
    fn deliver(&mut self, output: StageOutput<Picture>) {
        match output {
            StageOutput::Item(Ok(pictures)) => {
                PipelineCounters::incr(&self.counters.pictures_decoded, pictures.len());
                for picture in pictures {
                    let Some((last, rest)) = self.encoders.split_last() else {
                        break;
                    };
                    for encoder in rest {
                        encoder.put(picture.clone());
                    }
                    last.put(picture);
                }
            }
            StageOutput::Item(Err(e)) => {
                PipelineCounters::incr(&self.counters.decode_errors, 1);
                log::warn!("H264 decoder: frame is not available: {:#}", e);
            }
            StageOutput::Eof => {
                log::debug!(
                    "H264 decoder: sending end of stream to {} SVC encoder(s)",
                    self.encoders.len()
                );
                for encoder in &self.encoders {
                    encoder.send_eof();
                }
            }
        }
    }
}

/// SVC encoder output → layer dispatcher → decoder grid.
pub struct GridDispatch {
    dispatcher: LayerDispatcher,
    grid: Arc<DecoderGrid>,
    counters: Arc<PipelineCounters>,
}

impl GridDispatch {
    pub fn new(grid: Arc<DecoderGrid>, counters: Arc<PipelineCounters>) -> Self {
        Self {
            dispatcher: LayerDispatcher::new(grid.temporal_num(), grid.spatial_num()),
            grid,
            counters,
        }
    }

    fn route(&self, frame: EncodedFrame) {
        if !frame.frame_type.is_dispatchable() {
            PipelineCounters::incr(&self.counters.frames_skipped, 1);
            log::warn!(
                "SVC encoder[{}]: frame type {:?} is not dispatched, timestamp: {}",
                self.grid.label(),
                frame.frame_type,
                frame.timestamp
            );
            return;
        }
        PipelineCounters::incr(&self.counters.frames_encoded, 1);
        log::trace!(
            "SVC encoder[{}]: timestamp: {}, temporal_id: {:?}, layers: {}, size: {}",
            self.grid.label(),
            frame.timestamp,
            frame.temporal_id(),
            frame.layers.len(),
            frame.size()
        );

        let segments = match self.dispatcher.dispatch(&frame) {
            Ok(segments) => segments,
            Err(e) => {
                PipelineCounters::incr(&self.counters.routing_faults, 1);
                log::error!("SVC encoder[{}]: access unit not routed: {:#}", self.grid.label(), e);
                return;
            }
        };
        for segment in segments {
            if let Err(e) = self.grid.deliver(segment) {
                PipelineCounters::incr(&self.counters.routing_faults, 1);
                log::error!("SVC encoder[{}]: internal consistency fault: {:#}", self.grid.label(), e);
            }
        }
    }
}

impl Downstream<EncodedFrame> for GridDispatch {
    fn deliver(&mut self, output: StageOutput<EncodedFrame>) {
        match output {
            StageOutput::Item(Ok(frames)) => {
                for frame in frames {
                    self.route(frame);
                }
            }
            StageOutput::Item(Err(e)) => {
                PipelineCounters::incr(&self.counters.encode_errors, 1);
                log::error!("SVC encoder[{}]: encode failed: {:#}", self.grid.label(), e);
            }
            StageOutput::Eof => self.grid.broadcast_eof(),
        }
    }
}

/// Terminal downstream of one grid decoder.
pub struct SlotSink {
    tag: String,
    stats: Arc<SlotStats>,
}

impl SlotSink {
    pub fn new(tag: String, stats: Arc<SlotStats>) -> Self {
        Self { tag, stats }
    }
}

impl Downstream<DecodedPicture> for SlotSink {
    fn deliver(&mut self, output: StageOutput<DecodedPicture>) {
        match output {
            StageOutput::Item(Ok(pictures)) => {
                self.stats.record_decoded(pictures.len());
                for picture in &pictures {
                    log::trace!("SVC decoder[{}]: {}", self.tag, picture);
                }
            }
            StageOutput::Item(Err(e)) => {
                self.stats.record_error();
                log::debug!("SVC decoder[{}]: decoded data is unavailable: {:#}", self.tag, e);
            }
            StageOutput::Eof => {
                self.stats.mark_finished();
                log::info!("SVC decoder[{}]: end of stream", self.tag);
            }
        }
    }
}
