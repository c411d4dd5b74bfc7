//! OpenH264 SVC encoder and decoder.
//!
//! The encoder is driven through the raw API because the safe wrapper only
//! knows single-layer streams.

use std::{
    collections::VecDeque,
    fs::File,
    io::{BufWriter, Write},
    os::raw::c_int,
};

use anyhow::Context;
use bytes::BytesMut;
use openh264::{
    OpenH264API,
    decoder::Decoder,
    encoder::{Encoder, EncoderConfig},
    formats::YUVSource,
};
use openh264_sys2::{
    CAMERA_VIDEO_REAL_TIME, CONSTANT_ID, RC_QUALITY_MODE, SEncParamExt, SFrameBSInfo,
    SSourcePicture, VIDEO_CODING_LAYER, videoFormatI420, videoFrameTypeI, videoFrameTypeIDR,
    videoFrameTypeIPMixed, videoFrameTypeP, videoFrameTypeSkip,
};
use svc_bus::{
    codec::{Codec, SlotContext},
    config::LayerConfig,
    types::{DecodedPicture, EncodedFrame, EncodedLayer, FrameType, GridSlot, Picture, RoutedSegment},
};

use super::pack_plane;

fn check(ret: c_int, what: &str) -> anyhow::Result<()> {
    if ret != 0 {
        anyhow::bail!("openh264 {} failed: {}", what, ret);
    }
    Ok(())
}

pub(crate) fn frame_type(raw: c_int) -> FrameType {
    match raw {
        x if x == videoFrameTypeIDR as c_int => FrameType::Idr,
        x if x == videoFrameTypeI as c_int => FrameType::I,
        x if x == videoFrameTypeP as c_int => FrameType::P,
        x if x == videoFrameTypeSkip as c_int => FrameType::Skip,
        x if x == videoFrameTypeIPMixed as c_int => FrameType::IpMixed,
        _ => FrameType::Invalid,
    }
}

/// Multi-layer encoder: one access unit per picture, one `EncodedLayer`
/// per spatial layer.
pub struct SvcEncoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    encoded: u64,
}

unsafe impl Send for SvcEncoder {}

impl SvcEncoder {
    pub fn new(width: u32, height: u32, layers: &LayerConfig) -> anyhow::Result<Self> {
        if layers.spatial_layers.is_empty() {
            anyhow::bail!("no spatial layer to encode");
        }
        let mut encoder = Encoder::with_api_config(OpenH264API::from_source(), EncoderConfig::new())
            .map_err(|e| anyhow::anyhow!("openh264 encoder: {}", e))?;

        // plain C struct, every field is filled by get_default_params
        let mut params: SEncParamExt = unsafe { std::mem::zeroed() };
        unsafe {
            let raw = encoder.raw_api();
            let _ = raw.uninitialize();
            check(raw.get_default_params(&mut params), "get default params")?;
        }

        apply_layer_config(&mut params, width, height, layers);

        unsafe {
            check(encoder.raw_api().initialize_ext(&params), "initialize")?;
        }
        log::info!(
            "SVC encoder: {}x{}, temporal layers: {}, spatial layers: {:?}",
            width,
            height,
            layers.temporal_layers,
            layers
                .spatial_layers
                .iter()
                .map(|l| format!("{}x{}@{}", l.width, l.height, l.bitrate))
                .collect::<Vec<_>>()
        );

        Ok(Self {
            encoder,
            width,
            height,
            encoded: 0,
        })
    }
}

/// Fills the encoder parameters that depend on the picture size and layer layout.
pub(crate) fn apply_layer_config(
    params: &mut SEncParamExt,
    width: u32,
    height: u32,
    layers: &LayerConfig,
) {
    params.iUsageType = CAMERA_VIDEO_REAL_TIME;
    params.iPicWidth = width as c_int;
    params.iPicHeight = height as c_int;
    params.iTargetBitrate = layers.total_bitrate().min(c_int::MAX as u64) as c_int;
    params.iRCMode = RC_QUALITY_MODE;
    params.fMaxFrameRate = layers.frame_rate;
    params.iTemporalLayerNum = layers.temporal_layers as c_int;
    params.iSpatialLayerNum = layers.spatial_layers.len() as c_int;
    params.uiIntraPeriod = layers.intra_period;
    params.eSpsPpsIdStrategy = CONSTANT_ID;
    params.bEnableDenoise = false;
    params.bEnableBackgroundDetection = true;
    params.bEnableAdaptiveQuant = false;
    params.bEnableFrameSkip = false;
    params.bEnableLongTermReference = false;
    params.bPrefixNalAddingCtrl = false;
    params.iMultipleThreadIdc = 1;
    for (cfg, layer) in params.sSpatialLayers.iter_mut().zip(&layers.spatial_layers) {
        cfg.iVideoWidth = layer.width as c_int;
        cfg.iVideoHeight = layer.height as c_int;
        cfg.fFrameRate = layers.frame_rate;
        cfg.iSpatialBitrate = layer.bitrate.min(c_int::MAX as u32) as c_int;
        // 1.5x headroom over the layer target
        cfg.iMaxSpatialBitrate = cfg.iSpatialBitrate.saturating_mul(3) >> 1;
    }
}

/// Splits one encoder output into per-spatial-layer units. Non-VCL layers
/// (parameter sets) are folded into the next video layer, or into the last one
/// when they trail the access unit.
pub(crate) fn collect_layers(info: &SFrameBSInfo) -> Vec<EncodedLayer> {
    let mut layers: Vec<EncodedLayer> = Vec::new();
    let mut pending = BytesMut::new();
    let mut pending_nals = Vec::new();

    let count = (info.iLayerNum.max(0) as usize).min(info.sLayerInfo.len());
    for layer in &info.sLayerInfo[..count] {
        let nal_count = layer.iNalCount.max(0) as usize;
        if nal_count == 0 || layer.pNalLengthInByte.is_null() || layer.pBsBuf.is_null() {
            continue;
        }
        let lengths = unsafe { std::slice::from_raw_parts(layer.pNalLengthInByte, nal_count) };
        let lengths: Vec<usize> = lengths.iter().map(|&l| l.max(0) as usize).collect();
        let size: usize = lengths.iter().sum();
        let data = unsafe { std::slice::from_raw_parts(layer.pBsBuf, size) };

        pending.extend_from_slice(data);
        pending_nals.extend(lengths);
        if layer.uiLayerType as u32 == VIDEO_CODING_LAYER as u32 {
            layers.push(EncodedLayer::new(
                layer.uiSpatialId,
                layer.uiTemporalId,
                std::mem::take(&mut pending_nals),
                pending.split().freeze(),
            ));
        }
    }

    if !pending.is_empty() {
        match layers.last_mut() {
            Some(last) => {
                let mut joined = BytesMut::with_capacity(last.payload.len() + pending.len());
                joined.extend_from_slice(&last.payload);
                joined.extend_from_slice(&pending);
                last.payload = joined.freeze();
                last.nal_lengths.extend(pending_nals);
            }
            None => log::warn!(
                "SVC encoder: {} bytes of non-VCL data without a video layer dropped",
                pending.len()
            ),
        }
    }
    layers
}

impl Codec for SvcEncoder {
    type Input = Picture;
    type Output = EncodedFrame;

    fn process(&mut self, input: Picture) -> anyhow::Result<Vec<EncodedFrame>> {
        if input.width != self.width || input.height != self.height {
            anyhow::bail!(
                "picture {}x{} does not match encoder {}x{}",
                input.width,
                input.height,
                self.width,
                self.height
            );
        }
        let chroma_width = input.width.div_ceil(2) as c_int;

        let mut source: SSourcePicture = unsafe { std::mem::zeroed() };
        source.iColorFormat = videoFormatI420 as c_int;
        source.iPicWidth = input.width as c_int;
        source.iPicHeight = input.height as c_int;
        source.iStride[0] = input.width as c_int;
        source.iStride[1] = chroma_width;
        source.iStride[2] = chroma_width;
        // read only on the encoder side
        source.pData[0] = input.y.as_ptr() as *mut u8;
        source.pData[1] = input.u.as_ptr() as *mut u8;
        source.pData[2] = input.v.as_ptr() as *mut u8;
        source.uiTimeStamp = input.timestamp;

        let mut info: SFrameBSInfo = unsafe { std::mem::zeroed() };
        unsafe {
            check(self.encoder.raw_api().encode_frame(&source, &mut info), "encode frame")?;
        }
        self.encoded += 1;

        let frame_type = frame_type(info.eFrameType as c_int);
        let layers = if frame_type.is_dispatchable() {
            collect_layers(&info)
        } else {
            Vec::new()
        };
        Ok(vec![EncodedFrame {
            timestamp: input.timestamp,
            frame_type,
            layers,
        }])
    }

    fn close(self) {
        log::debug!("SVC encoder: {} pictures encoded", self.encoded);
    }
}

/// Input timestamps of segments the decoder has accepted but not yet
/// turned into a picture, oldest first.
#[derive(Debug, Default)]
pub(crate) struct PendingTimestamps {
    queue: VecDeque<i64>,
}

impl PendingTimestamps {
    const LIMIT: usize = 32;

    pub(crate) fn push(&mut self, timestamp: i64) {
        if self.queue.len() == Self::LIMIT {
            self.queue.pop_front();
        }
        self.queue.push_back(timestamp);
    }

    /// Timestamp of the picture the decoder just produced.
    pub(crate) fn pop_output(&mut self) -> Option<i64> {
        self.queue.pop_front()
    }

    /// Forgets the newest segment, which produced no picture and never will.
    pub(crate) fn discard_newest(&mut self) {
        self.queue.pop_back();
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Single-tier decoder of one grid slot, optionally dumping its output as raw I420.
pub struct SvcDecoder {
    decoder: Decoder,
    tag: String,
    slot: GridSlot,
    pending: PendingTimestamps,
    dump: Option<BufWriter<File>>,
}

unsafe impl Send for SvcDecoder {}

impl SvcDecoder {
    pub fn new(ctx: &SlotContext, dump: bool) -> anyhow::Result<Self> {
        let decoder = Decoder::new().map_err(|e| anyhow::anyhow!("openh264 decoder: {}", e))?;
        let dump = if dump {
            std::fs::create_dir_all(&ctx.work_dir)
                .with_context(|| format!("create work dir {}", ctx.work_dir.display()))?;
            let path = ctx.work_dir.join(format!("{}.yuv", ctx.tag));
            let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            decoder,
            tag: ctx.tag.clone(),
            slot: ctx.slot,
            pending: PendingTimestamps::default(),
            dump,
        })
    }
}

impl Codec for SvcDecoder {
    type Input = RoutedSegment;
    type Output = DecodedPicture;

    fn process(&mut self, input: RoutedSegment) -> anyhow::Result<Vec<DecodedPicture>> {
        self.pending.push(input.timestamp);
        let yuv = match self.decoder.decode(&input.payload) {
            Ok(Some(yuv)) => yuv,
            Ok(None) => return Ok(Vec::new()),
            Err(e) => {
                self.pending.discard_newest();
                anyhow::bail!("openh264 decode: {}", e)
            }
        };
        let timestamp = self.pending.pop_output().unwrap_or(input.timestamp);
        log::trace!(
            "SVC decoder[{}]: in: {}, out: {}, buffered: {}",
            self.tag,
            input.timestamp,
            timestamp,
            self.pending.len()
        );

        let (width, height) = yuv.dimensions();
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let (chroma_width, chroma_height) = (width.div_ceil(2), height.div_ceil(2));
        let picture = DecodedPicture {
            slot: self.slot,
            width: width as u32,
            height: height as u32,
            timestamp,
            y: pack_plane(yuv.y(), y_stride, width, height),
            u: pack_plane(yuv.u(), u_stride, chroma_width, chroma_height),
            v: pack_plane(yuv.v(), v_stride, chroma_width, chroma_height),
        };

        if let Some(dump) = self.dump.as_mut() {
            for plane in [&picture.y, &picture.u, &picture.v] {
                dump.write_all(plane)
                    .with_context(|| format!("dump {}", self.tag))?;
            }
        }
        Ok(vec![picture])
    }

    fn close(mut self) {
        if let Some(mut dump) = self.dump.take() {
            if let Err(e) = dump.flush() {
                log::warn!("SVC decoder[{}]: dump not flushed: {}", self.tag, e);
            }
        }
    }
}

#[cfg(test)]
#[path = "svc_test.rs"]
mod svc_test;
