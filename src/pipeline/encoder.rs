use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use super::broadcast::EncodedFrame;
use crate::capture::DecodedFrame;
use crate::error::EncodeError;

/// JPEG compression of annotated frames
pub struct Encoder {
    quality: u8,
    /// Grows to the largest frame seen so far
    capacity_hint: usize,
}

impl Encoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            capacity_hint: 64 * 1024,
        }
    }

    pub fn encode(&mut self, frame: &DecodedFrame) -> Result<EncodedFrame, EncodeError> {
        let (width, height) = frame.image.dimensions();
        if width == 0 || height == 0 {
            return Err(EncodeError::Empty { width, height });
        }

        let start = Instant::now();
        let mut buf = Vec::with_capacity(self.capacity_hint);
        JpegEncoder::new_with_quality(&mut buf, self.quality).encode(
            frame.image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgb8,
        )?;
        self.capacity_hint = self.capacity_hint.max(buf.len());
        metrics::histogram!("encode_time_us").record(start.elapsed().as_micros() as f64);

        Ok(EncodedFrame {
            sequence: frame.sequence(),
            data: Bytes::from(buf),
        })
    }
}
