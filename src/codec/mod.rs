//! FFmpeg demux/decode and OpenH264 SVC encode/decode behind the bus traits.

use bytes::{Bytes, BytesMut};
use svc_bus::{
    codec::{CodecBackend, SlotContext},
    config::LayerConfig,
};

pub mod decoder;
pub mod input;
pub mod scaler;
pub mod stream;
pub mod svc;

use decoder::H264Decoder;
use input::AvInput;
use svc::{SvcDecoder, SvcEncoder};

/// Registers FFmpeg components and aligns FFmpeg's own log level with ours.
pub fn init(level: log::LevelFilter) -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    ffmpeg_next::util::log::set_level(ffmpeg_level(level));
    Ok(())
}

fn ffmpeg_level(level: log::LevelFilter) -> ffmpeg_next::util::log::Level {
    use ffmpeg_next::util::log::Level;
    match level {
        log::LevelFilter::Off => Level::Quiet,
        log::LevelFilter::Error => Level::Error,
        log::LevelFilter::Warn => Level::Warning,
        log::LevelFilter::Info => Level::Info,
        log::LevelFilter::Debug => Level::Verbose,
        log::LevelFilter::Trace => Level::Debug,
    }
}

/// Copies `height` rows of `width` bytes out of a plane laid out with `stride`.
pub(crate) fn pack_plane(data: &[u8], stride: usize, width: usize, height: usize) -> Bytes {
    if stride == width && data.len() >= width * height {
        return Bytes::copy_from_slice(&data[..width * height]);
    }
    let mut out = BytesMut::with_capacity(width * height);
    for row in 0..height {
        let start = row * stride;
        match data.get(start..start + width) {
            Some(line) => out.extend_from_slice(line),
            None => break,
        }
    }
    out.freeze()
}

pub struct FfmpegOpenH264Backend {
    dump_decoded: bool,
}

impl FfmpegOpenH264Backend {
    pub fn new(dump_decoded: bool) -> Self {
        Self { dump_decoded }
    }
}

impl CodecBackend for FfmpegOpenH264Backend {
    type Source = AvInput;
    type Decoder = H264Decoder;
    type Encoder = SvcEncoder;
    type SvcDecoder = SvcDecoder;

    fn open_source(&self, locator: &str) -> anyhow::Result<AvInput> {
        AvInput::new(locator)
    }

    fn open_decoder(&self, source: &AvInput) -> anyhow::Result<H264Decoder> {
        H264Decoder::new(source.stream())
    }

    fn open_encoder(&self, width: u32, height: u32, layers: &LayerConfig) -> anyhow::Result<SvcEncoder> {
        SvcEncoder::new(width, height, layers)
    }

    fn open_svc_decoder(&self, ctx: &SlotContext) -> anyhow::Result<SvcDecoder> {
        SvcDecoder::new(ctx, self.dump_decoded)
    }
}
