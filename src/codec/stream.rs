use anyhow::Context;
use ffmpeg_next::{
    Rational,
    codec::{Id, Parameters, decoder},
    format::{context::Input, stream::Stream},
    media::Type,
};
use svc_bus::types::StreamDescriptor;

unsafe impl Send for VideoStream {}
unsafe impl Sync for VideoStream {}

/// The video stream a relay run reads, captured when the input is opened.
pub struct VideoStream {
    parameters: Parameters,
    descriptor: StreamDescriptor,
}

impl VideoStream {
    /// Best video stream of `input`, if it has one.
    pub fn select(input: &Input) -> Option<Self> {
        input.streams().best(Type::Video).map(|s| Self::capture(&s))
    }

    fn capture(stream: &Stream<'_>) -> Self {
        let parameters = stream.parameters();
        let (width, height) = unsafe {
            let raw = parameters.as_ptr();
            ((*raw).width.max(0) as u32, (*raw).height.max(0) as u32)
        };
        let time_base = stream.time_base();
        let rate = stream.avg_frame_rate();
        Self {
            descriptor: StreamDescriptor {
                index: stream.index(),
                width,
                height,
                time_base: (time_base.numerator(), time_base.denominator()),
                frame_rate: (rate.numerator(), rate.denominator()),
            },
            parameters,
        }
    }

    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    pub fn codec_id(&self) -> Id {
        self.parameters.id()
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Stream time base, the unit of packet timestamps.
    pub fn packet_time_base(&self) -> Rational {
        let (num, den) = self.descriptor.time_base;
        Rational::new(num, den)
    }

    /// Opens an FFmpeg decoder configured from this stream's parameters.
    pub fn open_decoder(&self) -> anyhow::Result<decoder::Video> {
        if self.parameters.medium() != Type::Video {
            anyhow::bail!("stream {} is not a video stream", self.index());
        }
        let mut ctx = ffmpeg_next::codec::Context::new();
        unsafe {
            (*ctx.as_mut_ptr()).time_base = self.packet_time_base().into();
        }
        ctx.set_parameters(self.parameters.clone())
            .with_context(|| format!("stream {} parameters", self.index()))?;
        ctx.decoder().video().context("open video decoder")
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;
