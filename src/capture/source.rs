//! The frame source seam between camera plumbing and the processing pipeline

use std::collections::VecDeque;

use crate::capture::frame::Frame;
use crate::error::CaptureError;

/// A live video input, opened by its constructor and read on demand.
///
/// `read` blocks for at most one frame interval of the underlying device.
/// `CaptureError::EmptyFrame` is recoverable; any other error ends the stream.
pub trait FrameSource: Send {
    fn read(&mut self) -> Result<Frame, CaptureError>;

    fn close(&mut self) {}

    /// Human readable identity for logs
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        (**self).read()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Replays an in-memory sequence of frames, then reports end of stream
pub struct ReplaySource {
    frames: VecDeque<Frame>,
}

impl ReplaySource {
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        match self.frames.pop_front() {
            Some(frame) if frame.is_empty() => Err(CaptureError::EmptyFrame),
            Some(frame) => Ok(frame),
            None => Err(CaptureError::Read("end of stream".into())),
        }
    }

    fn close(&mut self) {
        self.frames.clear();
    }

    fn describe(&self) -> String {
        format!("replay ({} frames queued)", self.frames.len())
    }
}
