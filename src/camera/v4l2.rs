//! V4L2 capture device.
//!
//! Requests MJPG from the driver and decodes each buffer with `image`. Drivers
//! that refuse MJPG but accept RGB3 are read as raw RGB.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::device::{CaptureDevice, DeviceSettings, NegotiatedFormat};
use crate::frame::{Frame, PixelFormat};

const MJPG: [u8; 4] = *b"MJPG";
const RGB3: [u8; 4] = *b"RGB3";

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Device {
    path: String,
    state: V4l2State,
    format: NegotiatedFormat,
    fourcc: [u8; 4],
}

impl V4l2Device {
    pub fn open(settings: &DeviceSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&settings.device)
            .with_context(|| format!("open v4l2 device {}", settings.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(&MJPG);

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Device: failed to set MJPG format on {}: {}",
                    settings.device,
                    err
                );
                format.fourcc = v4l::FourCC::new(&RGB3);
                device
                    .set_format(&format)
                    .context("set v4l2 RGB3 format after MJPG refusal")?
            }
        };
        if format.fourcc.repr != MJPG && format.fourcc.repr != RGB3 {
            return Err(anyhow!(
                "v4l2 device {} negotiated unsupported pixel format {}",
                settings.device,
                format.fourcc
            ));
        }

        let mut fps = settings.fps;
        let params = v4l::video::capture::Parameters::with_fps(settings.fps);
        match device.set_params(&params) {
            Ok(applied) => {
                if applied.interval.numerator > 0 {
                    fps = applied.interval.denominator / applied.interval.numerator;
                }
            }
            Err(err) => {
                log::warn!(
                    "V4l2Device: failed to set fps on {}: {}",
                    settings.device,
                    err
                );
            }
        }

        let negotiated = NegotiatedFormat {
            width: format.width,
            height: format.height,
            fps,
        };
        let fourcc = format.fourcc.repr;

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Device: opened {} ({}x{} @ {} fps, {})",
            settings.device,
            negotiated.width,
            negotiated.height,
            negotiated.fps,
            String::from_utf8_lossy(&fourcc)
        );
        Ok(Self {
            path: settings.device.clone(),
            state,
            format: negotiated,
            fourcc,
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn negotiated(&self) -> NegotiatedFormat {
        self.format
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let fourcc = self.fourcc;
        let format = self.format;
        let path = &self.path;
        self.state.with_stream_mut(|stream| {
            let (buf, _meta) = stream
                .next()
                .with_context(|| format!("capture v4l2 frame from {}", path))?;
            if fourcc == MJPG {
                let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                    .context("decode MJPG frame")?;
                Ok(Frame::from_rgb_image(decoded.to_rgb8()))
            } else {
                let expected = (format.width * format.height * 3) as usize;
                let pixels = buf
                    .get(..expected)
                    .ok_or_else(|| anyhow!("short RGB3 buffer: {} bytes", buf.len()))?;
                Frame::new(
                    pixels.to_vec(),
                    format.width,
                    format.height,
                    PixelFormat::Rgb24,
                )
            }
        })
    }
}
