use crate::capture::frame::PixelFormat;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

// Detected capture device info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundDevice {
    pub path: String,
    pub format: PixelFormat,
}

impl FoundDevice {
    pub fn new(path: String, format: PixelFormat) -> Self {
        Self { path, format }
    }
}

/// How the operator named the camera on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdentifier {
    Auto,
    Index(u32),
    Path(String),
}

impl DeviceIdentifier {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("auto") {
            DeviceIdentifier::Auto
        } else if let Ok(index) = raw.parse::<u32>() {
            DeviceIdentifier::Index(index)
        } else {
            DeviceIdentifier::Path(raw.to_string())
        }
    }

    /// Resolve to a device, probing V4L2 when asked to auto-detect
    pub fn resolve(&self, format: PixelFormat) -> Result<FoundDevice, Error> {
        match self {
            DeviceIdentifier::Auto => auto_detect_device(),
            DeviceIdentifier::Index(index) => {
                Ok(FoundDevice::new(format!("/dev/video{}", index), format))
            }
            DeviceIdentifier::Path(path) => Ok(FoundDevice::new(path.clone(), format)),
        }
    }
}

/// Pick the capture format from what a device advertises: MJPEG whenever
/// it is offered, YUYV otherwise, regardless of listing order
pub fn preferred_format(fourccs: impl IntoIterator<Item = FourCC>) -> Option<PixelFormat> {
    let mut fallback = None;
    for fourcc in fourccs {
        if fourcc == FourCC::new(b"MJPG") {
            return Some(PixelFormat::Mjpeg);
        }
        if fourcc == FourCC::new(b"YUYV") {
            fallback = Some(PixelFormat::Yuyv4);
        }
    }
    fallback
}

/// Auto-detect best capture device
///
/// The first MJPEG-capable node wins; failing that, the first YUYV node.
pub fn auto_detect_device() -> Result<FoundDevice, Error> {
    use std::path::Path;

    info!("Auto-detecting capture devices...");

    let mut yuyv_fallback = None;
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            continue;
        }
        let Ok(formats) = dev.enum_formats() else {
            continue;
        };

        match preferred_format(formats.iter().map(|fmt| fmt.fourcc)) {
            Some(PixelFormat::Mjpeg) => {
                info!("Found MJPEG device: {} - {}", path, caps.card);
                return Ok(FoundDevice::new(path, PixelFormat::Mjpeg));
            }
            Some(format) if yuyv_fallback.is_none() => {
                debug!("Found {:?} device: {} - {}", format, path, caps.card);
                yuyv_fallback = Some(FoundDevice::new(path, format));
            }
            _ => {}
        }
    }

    match yuyv_fallback {
        Some(found) => {
            info!("Found YUYV device: {}", found.path);
            Ok(found)
        }
        None => Err(Error::DeviceUnavailable {
            device: "auto".into(),
            reason: "no suitable capture device found".into(),
        }),
    }
}
