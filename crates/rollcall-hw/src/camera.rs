//! Webcam capture through V4L2.
//!
//! Frames come out as RGB. YUYV is converted in place of the driver,
//! MJPEG is decoded with `image`, and GREY sensors pass through as a
//! single channel.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Driver-side buffers kept queued while streaming.
const STREAM_BUFFERS: u32 = 4;

/// Formats asked for, in order of preference.
const PREFERRED: [&[u8; 4]; 3] = [b"YUYV", b"MJPG", b"GREY"];

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    StreamingNotSupported,
    #[error("end of stream")]
    EndOfStream,
}

/// A source of frames for the kiosk loop.
///
/// `Err(CameraError::EndOfStream)` means the source is exhausted; any other
/// error is an acquisition failure. A zero-sized frame is still a valid
/// frame and is returned as `Ok`.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

/// A capture-capable V4L2 node found by [`Camera::list_devices`].
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Wire format delivered by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2, two bytes per pixel.
    Yuyv,
    /// One JPEG image per buffer.
    Mjpeg,
    /// 8-bit luminance.
    Grey,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Turn one driver buffer into frame pixels, returning the data and its
/// channel count.
pub fn decode(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<(Vec<u8>, u8), CameraError> {
    match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map(|rgb| (rgb, 3))
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV buffer: {e}"))),
        PixelFormat::Mjpeg => {
            let img = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .map_err(|e| CameraError::CaptureFailed(format!("MJPEG decode: {e}")))?
                .into_rgb8();
            if img.dimensions() != (width, height) {
                return Err(CameraError::CaptureFailed(format!(
                    "MJPEG frame is {}x{}, expected {width}x{height}",
                    img.width(),
                    img.height()
                )));
            }
            Ok((img.into_raw(), 3))
        }
        PixelFormat::Grey => {
            let pixels = width as usize * height as usize;
            match buf.get(..pixels) {
                Some(gray) => Ok((gray.to_vec(), 1)),
                None => Err(CameraError::CaptureFailed(format!(
                    "GREY buffer holds {} bytes, need {pixels}",
                    buf.len()
                ))),
            }
        }
    }
}

/// An open webcam.
///
/// Streaming starts with the first `next_frame` call and stops when the
/// camera is dropped.
pub struct Camera {
    // Must drop before `device`.
    stream: Option<MmapStream<'static>>,
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open `device_path` and ask for `width` x `height`. The driver has the
    /// last word on resolution; the negotiated size is in `width`/`height`.
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            let msg = e.to_string();
            if msg.contains("busy") || msg.contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {msg}"))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }
        tracing::info!(device = device_path, card = %caps.card, driver = %caps.driver, "camera opened");

        let (negotiated, pixel_format) = negotiate(&device, width, height)?;
        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = %negotiated.fourcc,
            "capture format"
        );

        Ok(Self {
            stream: None,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc: negotiated.fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Probe `/dev/video0` through `/dev/video15` for capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

/// Try each preferred format at the requested size and keep the first
/// one the driver accepts as-is.
fn negotiate(
    device: &Device,
    width: u32,
    height: u32,
) -> Result<(v4l::Format, PixelFormat), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("read format: {e}")))?;

    for wanted in PREFERRED {
        fmt.fourcc = FourCC::new(wanted);
        fmt.width = width;
        fmt.height = height;
        let applied = device
            .set_format(&fmt)
            .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
        if let Some(pixel_format) = PixelFormat::from_fourcc(applied.fourcc) {
            return Ok((applied, pixel_format));
        }
        tracing::debug!(wanted = %FourCC::new(wanted), got = %applied.fourcc, "format refused");
    }

    Err(CameraError::FormatNegotiationFailed(
        "driver offers none of YUYV, MJPG, GREY".into(),
    ))
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("start streaming: {e}")))?;
            tracing::debug!(device = %self.device_path, "streaming started");
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream not running".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("dequeue buffer: {e}")))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let (data, channels) = decode(self.pixel_format, &buf[..used], self.width, self.height)?;

        Frame::new(data, self.width, self.height, channels, meta.sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stream.take();
        tracing::info!(device = %self.device_path, "camera released");
    }
}
