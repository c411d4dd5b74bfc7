use ffmpeg_next::{
    format::Pixel,
    software::scaling::{Context, Flags},
};

/// Converts decoded frames of any pixel format to YUV420P at the same size.
pub struct Scaler {
    context: Context,
    format: Pixel,
    width: u32,
    height: u32,
}

impl Scaler {
    pub fn to_i420(format: Pixel, width: u32, height: u32) -> anyhow::Result<Self> {
        let context = Context::get(
            format,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )?;
        log::debug!("scaler: {:?} {}x{} -> yuv420p", format, width, height);
        Ok(Self {
            context,
            format,
            width,
            height,
        })
    }

    pub fn matches(&self, frame: &ffmpeg_next::frame::Video) -> bool {
        frame.format() == self.format && frame.width() == self.width && frame.height() == self.height
    }

    pub fn run(&mut self, frame: &ffmpeg_next::frame::Video) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let mut dst = ffmpeg_next::frame::Video::empty();
        self.context.run(frame, &mut dst)?;
        dst.set_pts(frame.pts());
        Ok(dst)
    }
}

unsafe impl Send for Scaler {}
