//! GStreamer capture source with hardware decode when available

use std::time::Instant;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::source::FrameSource;
use crate::error::{CaptureError, Error};
use crate::CaptureConfig;

/// Camera pipeline ending in an RGB appsink
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    device: String,
    sequence: u64,
}

impl GstCapture {
    /// Build and start the pipeline
    pub fn open(config: &CaptureConfig) -> Result<Self, Error> {
        let device = config.device.path.clone();
        let unavailable = |reason: String| Error::DeviceUnavailable {
            device: device.clone(),
            reason,
        };

        gst::init().map_err(|e| unavailable(format!("gstreamer init: {e}")))?;

        let pipeline_str = Self::build_pipeline_string(config).map_err(unavailable)?;
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| unavailable(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| unavailable("not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| unavailable("missing appsink element".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| unavailable("appsink has wrong type".into()))?;

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true); // Drop old buffers if we can't keep up
        appsink.set_property("sync", false);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| unavailable(format!("failed to start pipeline: {e:?}")))?;

        Ok(Self {
            pipeline,
            appsink,
            device,
            sequence: 0,
        })
    }

    fn build_pipeline_string(config: &CaptureConfig) -> Result<String, String> {
        let device = &config.device.path;
        let (width, height, fps) = (config.width, config.height, config.fps);

        let caps = match config.format {
            PixelFormat::Mjpeg => format!(
                "image/jpeg,width={width},height={height},framerate={fps}/1 ! {}",
                Self::detect_jpeg_decoder()
            ),
            PixelFormat::Yuyv4 => {
                format!("video/x-raw,format=YUY2,width={width},height={height},framerate={fps}/1")
            }
            PixelFormat::Rgb24 => {
                format!("video/x-raw,format=RGB,width={width},height={height},framerate={fps}/1")
            }
            other => return Err(format!("unsupported pixel format: {other:?}")),
        };

        Ok(format!(
            "v4l2src device={device} name=source ! {caps} ! \
             queue max-size-buffers=2 max-size-time=0 max-size-bytes=0 leaky=downstream ! \
             videoconvert ! video/x-raw,format=RGB ! appsink name=appsink"
        ))
    }

    /// Detect best available JPEG decoder (hardware > software)
    fn detect_jpeg_decoder() -> &'static str {
        let decoders = ["nvjpegdec", "vaapijpegdec", "v4l2jpegdec", "jpegdec"];

        for decoder in &decoders {
            if gst::ElementFactory::find(decoder).is_some() {
                debug!("Found decoder: {}", decoder);
                return decoder;
            }
        }

        warn!("No hardware JPEG decoder found, using software decoder");
        "jpegdec"
    }
}

impl FrameSource for GstCapture {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        let timestamp = Instant::now();

        let sample = self
            .appsink
            .pull_sample()
            .map_err(|_| CaptureError::Read("pipeline reached end of stream".into()))?;

        let buffer = sample.buffer().ok_or(CaptureError::EmptyFrame)?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::Read("failed to map buffer".into()))?;
        if map.is_empty() {
            return Err(CaptureError::EmptyFrame);
        }
        let data = Bytes::copy_from_slice(map.as_slice());

        let caps = sample
            .caps()
            .ok_or_else(|| CaptureError::Read("sample has no caps".into()))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| CaptureError::Read("unparseable caps".into()))?;

        self.sequence += 1;

        let meta = FrameMetadata {
            sequence: self.sequence,
            width: video_info.width(),
            height: video_info.height(),
            stride: video_info.stride()[0] as u32,
            format: PixelFormat::Rgb24, // Output is always RGB after conversion
            device_timestamp: buffer.pts().map(|pts| pts.into()),
        };

        Ok(Frame {
            data,
            meta: meta.into(),
            timestamp,
        })
    }

    fn close(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
    }

    fn describe(&self) -> String {
        format!("gstreamer {}", self.device)
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn test_raw_pipeline_ends_in_rgb_appsink() {
        let mut config = Config::default().capture;
        config.format = PixelFormat::Yuyv4;
        let launch = GstCapture::build_pipeline_string(&config).unwrap();

        assert!(launch.starts_with("v4l2src device=/dev/video0"));
        assert!(launch.contains("format=YUY2,width=640,height=480,framerate=30/1"));
        assert!(launch.ends_with("video/x-raw,format=RGB ! appsink name=appsink"));
    }

    #[test]
    fn test_nv12_rejected() {
        let mut config = Config::default().capture;
        config.format = PixelFormat::Nv12;
        assert!(GstCapture::build_pipeline_string(&config).is_err());
    }
}
