//! Turn grayscale images into the MSB-first rows [`DeviceSession::print_bitmap`] takes.
//!
//! [`DeviceSession::print_bitmap`]: crate::printer::DeviceSession::print_bitmap

use std::path::Path;

use image::imageops::{self, FilterType};
use image::GrayImage;
use tracing::debug;

use crate::error::{Error, RasterError};

/// Print head width in dots.
pub const PRINTER_WIDTH: u32 = 384;

/// Longest image accepted from a file, in rows.
pub const MAX_HEIGHT: u32 = 800;

/// Luma values below this print black.
const BLACK_THRESHOLD: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dithering {
    #[default]
    Threshold,
    FloydSteinberg,
}

/// Pack a row-major grayscale buffer into rows of bytes.
///
/// Bit 7 of each byte is the leftmost of its 8 pixels, 1 = black. The last
/// byte of a row is zero-padded when `width` is not a multiple of 8.
pub fn pack_rows(pixels: &[u8], width: usize, height: usize) -> Result<Vec<Vec<u8>>, RasterError> {
    if width == 0 || height == 0 {
        return Err(RasterError::EmptyImage);
    }
    let expected = width.saturating_mul(height);
    if pixels.len() < expected {
        return Err(RasterError::NotEnoughPixels {
            expected,
            actual: pixels.len(),
        });
    }

    let rows: Vec<Vec<u8>> = pixels
        .chunks_exact(width)
        .take(height)
        .map(|line| {
            line.chunks(8)
                .map(|group| {
                    group
                        .iter()
                        .enumerate()
                        .filter(|&(_, &px)| px < BLACK_THRESHOLD)
                        .fold(0u8, |b, (bit, _)| b | (0x80u8 >> bit))
                })
                .collect::<Vec<u8>>()
        })
        .collect();
    Ok(rows)
}

/// Quantize `img` and pack it.
pub fn rows_from_image(img: &GrayImage, dithering: Dithering) -> Result<Vec<Vec<u8>>, RasterError> {
    let mut gray = img.clone();
    match dithering {
        Dithering::FloydSteinberg => imageops::dither(&mut gray, &imageops::BiLevel),
        Dithering::Threshold => {
            for px in gray.pixels_mut() {
                px[0] = if px[0] < BLACK_THRESHOLD { 0 } else { 255 };
            }
        }
    }
    let (w, h) = gray.dimensions();
    pack_rows(gray.as_raw(), w as usize, h as usize)
}

/// Load an image file, scale it to the print head width and pack it.
pub fn rows_from_path(path: impl AsRef<Path>, dithering: Dithering) -> Result<Vec<Vec<u8>>, Error> {
    let gray = image::open(path.as_ref())?.to_luma8();
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 {
        return Err(RasterError::EmptyImage.into());
    }

    let scale = PRINTER_WIDTH as f32 / w as f32;
    let target_h = ((h as f32 * scale) as u32).clamp(1, MAX_HEIGHT);
    let resized = imageops::resize(&gray, PRINTER_WIDTH, target_h, FilterType::Lanczos3);
    debug!(path = %path.as_ref().display(), width = PRINTER_WIDTH, height = target_h, "image scaled");

    Ok(rows_from_image(&resized, dithering)?)
}
