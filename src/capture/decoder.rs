use image::RgbImage;

use super::frame::{DecodedFrame, Frame, PixelFormat};
use crate::error::DecodeError;

/// Convert a raw captured frame into packed RGB
pub fn decode_frame(frame: &Frame) -> Result<DecodedFrame, DecodeError> {
    let meta = &frame.meta;
    let data = &frame.data[..];

    let image = match meta.format {
        PixelFormat::Mjpeg => decode_jpeg(data)?,
        PixelFormat::Rgb24 => packed_rgb(data, meta.width, meta.height, meta.stride, false)?,
        PixelFormat::Bgr24 => packed_rgb(data, meta.width, meta.height, meta.stride, true)?,
        PixelFormat::Yuyv4 => yuyv_to_rgb(data, meta.width, meta.height, meta.stride)?,
        PixelFormat::Nv12 => nv12_to_rgb(data, meta.width, meta.height, meta.stride)?,
    };

    Ok(DecodedFrame {
        meta: meta.clone(),
        image,
    })
}

fn check_len(
    format: PixelFormat,
    data: &[u8],
    expected: usize,
) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::ShortBuffer {
            format,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn packed_rgb(
    data: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    swap: bool,
) -> Result<RgbImage, DecodeError> {
    let format = if swap { PixelFormat::Bgr24 } else { PixelFormat::Rgb24 };
    let row = (width * 3) as usize;
    let stride = (stride as usize).max(row);
    check_len(format, data, stride * (height as usize).saturating_sub(1) + row)?;

    let mut out = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let line = &data[y * stride..y * stride + row];
        if swap {
            for px in line.chunks_exact(3) {
                out.extend_from_slice(&[px[2], px[1], px[0]]);
            }
        } else {
            out.extend_from_slice(line);
        }
    }

    into_rgb(width, height, out)
}

#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    // BT.601 limited range, fixed point
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32, stride: u32) -> Result<RgbImage, DecodeError> {
    let row = (width * 2) as usize;
    let stride = (stride as usize).max(row);
    check_len(PixelFormat::Yuyv4, data, stride * (height as usize).saturating_sub(1) + row)?;

    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height as usize {
        let line = &data[y * stride..y * stride + row];
        for quad in line.chunks_exact(4) {
            let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
            out.extend_from_slice(&yuv_to_rgb(y0, u, v));
            out.extend_from_slice(&yuv_to_rgb(y1, u, v));
        }
        // Odd widths leave a trailing half macropixel
        if width % 2 == 1 {
            let tail = &line[row - 2..];
            out.extend_from_slice(&yuv_to_rgb(tail[0], tail[1], 128));
        }
    }
    out.truncate((width * height * 3) as usize);

    into_rgb(width, height, out)
}

fn nv12_to_rgb(data: &[u8], width: u32, height: u32, stride: u32) -> Result<RgbImage, DecodeError> {
    let (w, h) = (width as usize, height as usize);
    let stride = (stride as usize).max(w.div_ceil(2) * 2);
    let chroma_rows = h.div_ceil(2);
    let luma_len = stride * h;
    check_len(PixelFormat::Nv12, data, luma_len + stride * chroma_rows)?;

    let (luma, chroma) = data.split_at(luma_len);
    let mut out = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        let uv_row = &chroma[(y / 2) * stride..];
        for x in 0..w {
            let uv = (x / 2) * 2;
            out.extend_from_slice(&yuv_to_rgb(luma[y * stride + x], uv_row[uv], uv_row[uv + 1]));
        }
    }

    into_rgb(width, height, out)
}

#[cfg(feature = "fast-jpeg")]
fn decode_jpeg(data: &[u8]) -> Result<RgbImage, DecodeError> {
    let mut decoder = zune_jpeg::JpegDecoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Jpeg(format!("{e:?}")))?;
    let (width, height) = decoder
        .dimensions()
        .ok_or_else(|| DecodeError::Jpeg("missing dimensions".into()))?;

    let (width, height) = (width as u32, height as u32);
    let expected = (width * height) as usize;
    match pixels.len() / expected.max(1) {
        3 => into_rgb(width, height, pixels),
        1 => into_rgb(width, height, gray_to_rgb(&pixels)),
        n => Err(DecodeError::JpegLayout(format!("{n} components"))),
    }
}

#[cfg(all(feature = "baseline-jpeg", not(feature = "fast-jpeg")))]
fn decode_jpeg(data: &[u8]) -> Result<RgbImage, DecodeError> {
    use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode().map_err(|e| DecodeError::Jpeg(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| DecodeError::Jpeg("missing header".into()))?;
    let (width, height) = (info.width as u32, info.height as u32);

    match info.pixel_format {
        JpegPixelFormat::RGB24 => into_rgb(width, height, pixels),
        JpegPixelFormat::L8 => into_rgb(width, height, gray_to_rgb(&pixels)),
        other => Err(DecodeError::JpegLayout(format!("{other:?}"))),
    }
}

fn gray_to_rgb(luma: &[u8]) -> Vec<u8> {
    luma.iter().flat_map(|&l| [l, l, l]).collect()
}

fn into_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<RgbImage, DecodeError> {
    let actual = pixels.len();
    RgbImage::from_raw(width, height, pixels).ok_or(DecodeError::ShortBuffer {
        format: PixelFormat::Rgb24,
        expected: (width * height * 3) as usize,
        actual,
    })
}
