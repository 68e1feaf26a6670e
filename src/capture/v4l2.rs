//! V4L2 memory-mapped capture

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::frame::{Frame, FrameMetadata, PixelFormat},
    capture::source::FrameSource,
    error::{CaptureError, Error},
    CaptureConfig,
};

/// V4L2 camera opened with mmap streaming
pub struct V4l2Capture {
    // Declared before `device` so the stream is torn down first
    stream: MmapStream<'static>,
    _device: Box<Device>,
    path: String,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
    sequence: u64,
}

impl V4l2Capture {
    /// Open the device, negotiate the format and start streaming
    #[instrument(skip(config), fields(device = %config.device.path))]
    pub fn open(config: &CaptureConfig) -> Result<Self, Error> {
        let path = config.device.path.clone();
        let unavailable = |reason: String| Error::DeviceUnavailable {
            device: path.clone(),
            reason,
        };

        let device = Device::with_path(&path).map_err(|e| unavailable(e.to_string()))?;

        // Query capabilities
        let caps = device.query_caps().map_err(|e| unavailable(e.to_string()))?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(unavailable("device doesn't support video capture".into()));
        }

        // Set format, then read back what the driver actually granted
        let mut fmt = device.format().map_err(|e| unavailable(e.to_string()))?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = FourCC::new(&config.format.fourcc());
        let fmt = device
            .set_format(&fmt)
            .map_err(|e| unavailable(e.to_string()))?;

        let format = PixelFormat::from_fourcc(&fmt.fourcc.repr)
            .ok_or_else(|| unavailable(format!("driver selected unsupported format {}", fmt.fourcc)))?;
        if format != config.format {
            info!("Driver substituted {:?} for requested {:?}", format, config.format);
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            debug!("Frame rate not applied: {}", e);
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(|e| unavailable(e.to_string()))?;

        info!(
            "Capture stream started: {}x{} {:?} with {} buffers",
            fmt.width, fmt.height, format, config.buffer_count
        );

        Ok(Self {
            stream,
            _device: Box::new(device),
            path,
            width: fmt.width,
            height: fmt.height,
            stride: fmt.stride,
            format,
            sequence: 0,
        })
    }
}

impl FrameSource for V4l2Capture {
    /// Blocking dequeue of the next buffer
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let timestamp = Instant::now();

        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CaptureError::Read(e.to_string()))?;

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(CaptureError::EmptyFrame);
        }
        let data = Bytes::copy_from_slice(&buf[..used]);

        self.sequence += 1;

        let frame_meta = FrameMetadata {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            stride: self.stride,
            format: self.format,
            device_timestamp: Some(
                Duration::from_secs(meta.timestamp.sec as u64)
                    + Duration::from_micros(meta.timestamp.usec as u64),
            ),
        };

        Ok(Frame {
            data,
            meta: frame_meta.into(),
            timestamp,
        })
    }

    fn describe(&self) -> String {
        format!("v4l2 {} {}x{} {:?}", self.path, self.width, self.height, self.format)
    }
}
