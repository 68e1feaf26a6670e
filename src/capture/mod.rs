pub mod decoder;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod source;
pub mod v4l2;

pub use frame::{DecodedFrame, Frame, FrameMetadata, PixelFormat};
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstCapture;
pub use source::{FrameSource, ReplaySource};
pub use v4l2::V4l2Capture;
