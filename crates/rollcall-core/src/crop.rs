//! Square model-input crops from grayscale frames.

use image::imageops::{self, FilterType};
use image::GrayImage;

/// Take the largest centered square of a grayscale frame and resize it to
/// `size x size`. Returns `None` if the buffer does not match the given
/// dimensions or the frame is empty.
pub fn center_square(gray: &[u8], width: u32, height: u32, size: u32) -> Option<Vec<u8>> {
    if width == 0 || height == 0 || size == 0 {
        return None;
    }
    let img = GrayImage::from_raw(width, height, gray.to_vec())?;
    let side = width.min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    let square = imageops::crop_imm(&img, x, y, side, side).to_image();
    let resized = if side == size {
        square
    } else {
        imageops::resize(&square, size, size, FilterType::Triangle)
    };
    Some(resized.into_raw())
}
