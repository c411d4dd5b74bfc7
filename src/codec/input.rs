use std::path::Path;

use anyhow::Context;
use svc_bus::{
    codec::PacketSource,
    types::{Packet, StreamDescriptor},
};

use super::stream::VideoStream;

/// Demuxer restricted to the best video stream of the input.
pub struct AvInput {
    inner: ffmpeg_next::format::context::Input,
    stream: VideoStream,
}

impl AvInput {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let input = ffmpeg_next::format::input(&Path::new(url))
            .with_context(|| format!("open input {}", url))?;

        let stream = VideoStream::select(&input)
            .ok_or_else(|| anyhow::anyhow!("no video stream in {}", url))?;
        if stream.codec_id() != ffmpeg_next::codec::Id::H264 {
            log::warn!(
                "input {}: video stream {} is {:?}, not H.264",
                url,
                stream.index(),
                stream.codec_id()
            );
        }
        let descriptor = stream.descriptor();
        if descriptor.width == 0 || descriptor.height == 0 {
            anyhow::bail!("input {}: missing video dimensions", url);
        }

        for s in input.streams() {
            log::debug!(
                "stream index: {}, medium: {:?}, time_base: {}",
                s.index(),
                s.parameters().medium(),
                s.time_base()
            );
        }

        Ok(Self {
            inner: input,
            stream,
        })
    }

    pub fn stream(&self) -> &VideoStream {
        &self.stream
    }
}

impl PacketSource for AvInput {
    fn descriptor(&self) -> &StreamDescriptor {
        self.stream.descriptor()
    }

    fn read_packet(&mut self) -> anyhow::Result<Option<Packet>> {
        let mut packet = ffmpeg_next::Packet::empty();
        loop {
            match packet.read(&mut self.inner) {
                Ok(()) => {
                    if packet.stream() != self.stream.index() {
                        continue;
                    }
                    let data = packet.data().map(<[u8]>::to_vec).unwrap_or_default();
                    return Ok(Some(Packet::new(
                        data,
                        packet.pts().or(packet.dts()),
                        packet.is_key(),
                    )));
                }
                Err(ffmpeg_next::Error::Eof) => return Ok(None),
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                    continue;
                }
                Err(e) => return Err(e).context("read packet"),
            }
        }
    }
}
