// SPDX-License-Identifier: GPL-3.0-only
//! Pixel format conversion into decoder buffers
//!
//! Decoders only look at luminance, so every supported camera format is
//! reduced to an 8-bit greyscale image at the frame's native resolution.
//! Row stride padding is dropped along the way.

use super::types::{BackendError, BackendResult, CameraFrame, PixelFormat};
use image::{GrayImage, ImageFormat};

/// Convert a camera frame into a tightly packed greyscale image
pub fn frame_to_luma(frame: &CameraFrame) -> BackendResult<GrayImage> {
    let luma = match frame.format {
        PixelFormat::Gray8 => copy_rows(frame, 1, |px| px[0]),
        // YUYV: Y0 U Y1 V - every even byte is a luma sample
        PixelFormat::YUYV => copy_rows(frame, 2, |px| px[0]),
        PixelFormat::RGB24 => copy_rows(frame, 3, |px| rgb_to_luma(px[0], px[1], px[2])),
        PixelFormat::RGBA => copy_rows(frame, 4, |px| rgb_to_luma(px[0], px[1], px[2])),
        PixelFormat::MJPEG => {
            let decoded = image::load_from_memory_with_format(&frame.data, ImageFormat::Jpeg)
                .map_err(|e| BackendError::Other(format!("MJPEG decode failed: {}", e)))?;
            return Ok(decoded.to_luma8());
        }
    }?;

    GrayImage::from_raw(frame.width, frame.height, luma).ok_or_else(|| {
        BackendError::Other(format!(
            "Luma buffer does not match {}x{}",
            frame.width, frame.height
        ))
    })
}

/// Crop a centred square of `size` pixels (clamped to the image bounds)
pub fn crop_center(image: &GrayImage, size: u32) -> GrayImage {
    let side = size.min(image.width()).min(image.height());
    let x = (image.width() - side) / 2;
    let y = (image.height() - side) / 2;
    image::imageops::crop_imm(image, x, y, side, side).to_image()
}

/// BT.601 luma with integer weights
fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

/// Walk every pixel row by row, honouring stride, and map it to a luma sample
fn copy_rows<F>(frame: &CameraFrame, bytes_per_pixel: usize, luma: F) -> BackendResult<Vec<u8>>
where
    F: Fn(&[u8]) -> u8,
{
    let width = frame.width as usize;
    let height = frame.height as usize;
    let stride = frame.stride as usize;
    let row_bytes = width * bytes_per_pixel;

    if stride < row_bytes {
        return Err(BackendError::Other(format!(
            "Stride {} shorter than row of {} bytes",
            stride, row_bytes
        )));
    }

    let mut result = Vec::with_capacity(width * height);
    for y in 0..height {
        let row_start = y * stride;
        let row = frame
            .data
            .get(row_start..row_start + row_bytes)
            .ok_or_else(|| BackendError::Other(format!("Frame truncated at row {}", y)))?;
        result.extend(row.chunks_exact(bytes_per_pixel).map(&luma));
    }

    Ok(result)
}
