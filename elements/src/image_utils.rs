// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io::Cursor;

use canonical_error::{CanonicalError, internal_error, invalid_argument_error};
use image::{DynamicImage, ExtendedColorType, RgbImage};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};

// 75: 40x compression, bad artifacts.
// 90: 20x compression, mild artifacts.
// 95: 13x compression, almost no artifacts.
pub const JPEG_QUALITY: u8 = 90;

// Grayscale images are encoded as single channel JPEG; everything else is
// flattened to RGB.
pub fn jpeg_encode(img: &DynamicImage) -> Result<Vec<u8>, CanonicalError> {
    let (width, height) = (img.width(), img.height());
    let mut jpg_buf = Vec::<u8>::with_capacity((width * height) as usize);
    let mut buffer = Cursor::new(&mut jpg_buf);
    let mut jpeg_encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
    let result = match img {
        DynamicImage::ImageLuma8(gray) => jpeg_encoder.encode(
            gray.as_raw(), width, height, ExtendedColorType::L8),
        _ => {
            let rgb = img.to_rgb8();
            jpeg_encoder.encode(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        }
    };
    if let Err(e) = result {
        return Err(internal_error(
            format!("Error encoding JPEG: {:?}", e).as_str()));
    }
    Ok(jpg_buf)
}

// Decodes an encoded image (any format the `image` crate recognizes).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, CanonicalError> {
    if bytes.is_empty() {
        return Err(invalid_argument_error("Empty image buffer"));
    }
    image::load_from_memory(bytes).map_err(|e| {
        invalid_argument_error(format!("Error decoding image: {:?}", e).as_str())
    })
}

// Combines `overlay` onto `base` keeping, per channel, the brighter of the two
// pixels. `overlay` is resized to `base`'s dimensions if they differ.
pub fn max_combine(base: &RgbImage, overlay: &RgbImage) -> RgbImage {
    let (width, height) = base.dimensions();
    let resized;
    let overlay = if overlay.dimensions() != (width, height) {
        resized = imageops::resize(overlay, width, height, FilterType::Triangle);
        &resized
    } else {
        overlay
    };
    let mut combined = base.clone();
    for (out, over) in combined.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            out[c] = out[c].max(over[c]);
        }
    }
    combined
}

// Returns the largest (width, height) with the aspect ratio of
// `width`x`height` that fits within `max_width`x`max_height`. Never enlarges.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(max_width as f64 / width as f64,
                         max_height as f64 / height as f64);
    (((width as f64 * scale).round() as u32).max(1),
     ((height as f64 * scale).round() as u32).max(1))
}

// mod tests.
