use anyhow::Context;
use bytes::Bytes;
use ffmpeg_next::{Rational, Rescale, format::Pixel};
use svc_bus::{
    codec::Codec,
    types::{Packet, Picture},
};

use super::{pack_plane, scaler::Scaler, stream::VideoStream};

const MILLISECONDS: Rational = Rational(1, 1000);

/// FFmpeg video decoder producing tightly packed I420 pictures.
pub struct H264Decoder {
    inner: ffmpeg_next::codec::decoder::Video,
    time_base: Rational,
    scaler: Option<Scaler>,
    received: u64,
}

unsafe impl Send for H264Decoder {}

impl H264Decoder {
    pub fn new(stream: &VideoStream) -> anyhow::Result<Self> {
        let decoder = stream.open_decoder()?;
        if decoder.format() == Pixel::None || decoder.width() == 0 || decoder.height() == 0 {
            anyhow::bail!("missing codec parameters");
        }
        let time_base = stream.packet_time_base();
        log::debug!(
            "H264 decoder: {:?} {}x{}, time_base: {}",
            decoder.format(),
            decoder.width(),
            decoder.height(),
            time_base
        );

        Ok(Self {
            inner: decoder,
            time_base,
            scaler: None,
            received: 0,
        })
    }

    fn receive_pictures(&mut self) -> anyhow::Result<Vec<Picture>> {
        let mut pictures = Vec::new();
        loop {
            let mut frame = ffmpeg_next::frame::Video::empty();
            match self.inner.receive_frame(&mut frame) {
                Ok(()) => {
                    self.received += 1;
                    pictures.push(self.to_picture(frame)?);
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                    break;
                }
                Err(e) => return Err(e).context("receive frame"),
            }
        }
        Ok(pictures)
    }

    fn to_picture(&mut self, frame: ffmpeg_next::frame::Video) -> anyhow::Result<Picture> {
        let timestamp = frame
            .timestamp()
            .or(frame.pts())
            .map(|ts| ts.rescale(self.time_base, MILLISECONDS))
            .unwrap_or(0);

        let frame = if frame.format() == Pixel::YUV420P {
            frame
        } else {
            if !self.scaler.as_ref().is_some_and(|s| s.matches(&frame)) {
                self.scaler = Some(Scaler::to_i420(frame.format(), frame.width(), frame.height())?);
            }
            match self.scaler.as_mut() {
                Some(scaler) => scaler.run(&frame)?,
                None => anyhow::bail!("no scaler for {:?}", frame.format()),
            }
        };

        let plane = |i: usize| -> Bytes {
            pack_plane(
                frame.data(i),
                frame.stride(i),
                frame.plane_width(i) as usize,
                frame.plane_height(i) as usize,
            )
        };
        Ok(Picture {
            y: plane(0),
            u: plane(1),
            v: plane(2),
            width: frame.width(),
            height: frame.height(),
            timestamp,
        })
    }
}

impl Codec for H264Decoder {
    type Input = Packet;
    type Output = Picture;

    fn process(&mut self, input: Packet) -> anyhow::Result<Vec<Picture>> {
        log::trace!("H264 decoder: packet pts: {:?}, size: {}", input.pts, input.size());
        let mut packet = ffmpeg_next::Packet::copy(&input.data);
        packet.set_pts(input.pts);
        if input.is_key {
            packet.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        self.inner.send_packet(&packet).context("send packet")?;
        self.receive_pictures()
    }

    fn flush(&mut self) -> anyhow::Result<Vec<Picture>> {
        self.inner.send_eof().context("send eof")?;
        let rest = self.receive_pictures()?;
        log::debug!(
            "H264 decoder: {} pictures, {} drained at end of stream",
            self.received,
            rest.len()
        );
        Ok(rest)
    }
}
