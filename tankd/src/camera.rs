//! Camera frame production for the `/ws/camera` stream.
//!
//! Every source yields one encoded JPEG per call; the WebSocket loop in
//! lib.rs paces the calls at the configured fps.

use std::fmt;

#[derive(Debug)]
pub struct FrameError {
    message: String,
}

impl FrameError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame source error: {}", self.message)
    }
}

impl std::error::Error for FrameError {}

pub trait FrameSource: Send {
    /// Produce the next encoded JPEG frame.
    fn next_frame(&mut self) -> Result<Vec<u8>, FrameError>;
}

/// Synthetic moving test pattern for development without a camera.
pub struct StubFrameSource {
    width: u32,
    height: u32,
    tick: u32,
}

impl StubFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl Default for StubFrameSource {
    fn default() -> Self {
        Self::new(320, 240)
    }
}

impl FrameSource for StubFrameSource {
    fn next_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        self.tick = self.tick.wrapping_add(1);
        let tick = self.tick;
        let img = image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let shift = x.wrapping_add(tick.wrapping_mul(4)) % 256;
            image::Rgb([shift as u8, (y % 256) as u8, 64])
        });
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 75)
            .encode_image(&img)
            .map_err(|e| FrameError::new(format!("jpeg encode failed: {e}")))?;
        Ok(out)
    }
}

#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2FrameSource;

#[cfg(feature = "camera-v4l2")]
mod v4l2 {
    use super::{FrameError, FrameSource};
    use std::sync::mpsc;
    use v4l::buffer::Type;
    use v4l::io::mmap::Stream;
    use v4l::io::traits::CaptureStream;
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    /// MJPG capture from a V4L2 device. The mmap stream borrows the device,
    /// so both live on a dedicated capture thread and frames cross a
    /// channel.
    pub struct V4l2FrameSource {
        frames: mpsc::Receiver<Vec<u8>>,
    }

    impl V4l2FrameSource {
        pub fn open(path: &str, width: u32, height: u32) -> Result<Self, FrameError> {
            let device = Device::with_path(path)
                .map_err(|e| FrameError::new(format!("open {path}: {e}")))?;
            let mut format = device
                .format()
                .map_err(|e| FrameError::new(format!("query format: {e}")))?;
            format.width = width;
            format.height = height;
            format.fourcc = FourCC::new(b"MJPG");
            device
                .set_format(&format)
                .map_err(|e| FrameError::new(format!("set format: {e}")))?;

            let (tx, rx) = mpsc::sync_channel(2);
            std::thread::spawn(move || {
                let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, 4) {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!("v4l2 stream setup failed: {e}");
                        return;
                    }
                };
                loop {
                    match stream.next() {
                        Ok((buf, _meta)) => {
                            // A full channel means the consumer lags; drop the frame.
                            if let Err(mpsc::TrySendError::Disconnected(_)) =
                                tx.try_send(buf.to_vec())
                            {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::error!("v4l2 capture failed: {e}");
                            return;
                        }
                    }
                }
            });

            Ok(Self { frames: rx })
        }
    }

    impl FrameSource for V4l2FrameSource {
        fn next_frame(&mut self) -> Result<Vec<u8>, FrameError> {
            self.frames
                .recv()
                .map_err(|_| FrameError::new("capture thread exited"))
        }
    }
}
