//! Frame type and pixel conversions: YUYV to RGB, luma, box downsampling.

use std::time::Instant;

/// A captured camera frame.
///
/// Frames are handed from stage to stage by value and never drawn on in
/// place; overlay rendering works on a converted copy.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Interleaved pixel data (width * height * channels bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel: 1 for grayscale, 3 for RGB.
    pub channels: u8,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap a grayscale buffer, validating its length.
    pub fn gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        Self::new(data, width, height, 1, sequence)
    }

    /// Wrap an interleaved buffer with `channels` bytes per pixel.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        if channels != 1 && channels != 3 {
            return Err(FrameError::UnsupportedChannels(channels));
        }
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            channels,
            timestamp: Instant::now(),
            sequence,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Luma plane of this frame. Grayscale frames are copied as-is.
    pub fn luma(&self) -> Vec<u8> {
        match self.channels {
            1 => self.data.clone(),
            _ => self
                .data
                .chunks_exact(self.channels as usize)
                .map(|px| rgb_to_luma(px[0], px[1], px[2]))
                .collect(),
        }
    }

    /// Box-filtered copy no wider than `max_width`, keeping the aspect ratio.
    ///
    /// The scale factor is an integer so each output pixel averages an
    /// exact `factor x factor` block. Frames already narrow enough are
    /// cloned unchanged, as are empty frames. Timestamp and sequence carry
    /// over.
    pub fn downsample(&self, max_width: u32) -> Frame {
        if max_width == 0 || self.width <= max_width || self.is_empty() {
            return self.clone();
        }
        let factor = self.width.div_ceil(max_width) as usize;
        let ch = self.channels as usize;
        let src_w = self.width as usize;
        let out_w = self.width as usize / factor;
        let out_h = (self.height as usize / factor).max(1);
        let block = (factor * factor) as u32;

        let mut data = Vec::with_capacity(out_w * out_h * ch);
        for oy in 0..out_h {
            for ox in 0..out_w {
                for c in 0..ch {
                    let mut sum = 0u32;
                    for dy in 0..factor {
                        let y = (oy * factor + dy).min(self.height as usize - 1);
                        let row = y * src_w;
                        for dx in 0..factor {
                            let x = ox * factor + dx;
                            sum += self.data[(row + x) * ch + c] as u32;
                        }
                    }
                    data.push(((sum + block / 2) / block) as u8);
                }
            }
        }

        Frame {
            data,
            width: out_w as u32,
            height: out_h as u32,
            channels: self.channels,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }
}

/// ITU-R BT.601 luma.
pub fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Convert packed YUYV (4:2:2) to interleaved RGB.
///
/// Each 4-byte group `[Y0, U, Y1, V]` holds two pixels sharing chroma.
/// Uses the BT.601 studio-swing integer transform.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for px in yuyv[..expected].chunks_exact(4) {
        let (u, v) = (px[1], px[3]);
        rgb.extend_from_slice(&yuv_to_rgb(px[0], u, v));
        rgb.extend_from_slice(&yuv_to_rgb(px[2], u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let scale = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        scale(298 * c + 409 * e),
        scale(298 * c - 100 * d - 208 * e),
        scale(298 * c + 516 * d),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("unsupported channel count: {0}")]
    UnsupportedChannels(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma() {
        // 2x1 image: black and white with no chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_dominant() {
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        assert!(rgb[0] > 200, "red {}", rgb[0]);
        assert!(rgb[1] < 60 && rgb[2] < 60);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_frame_rejects_wrong_length() {
        let err = Frame::gray(vec![0; 10], 4, 4, 0).unwrap_err();
        assert!(matches!(
            err,
            FrameError::InvalidLength {
                expected: 16,
                actual: 10
            }
        ));
    }

    #[test]
    fn test_frame_rejects_two_channels() {
        assert!(matches!(
            Frame::new(vec![0; 8], 2, 2, 2, 0),
            Err(FrameError::UnsupportedChannels(2))
        ));
    }

    #[test]
    fn test_downsample_noop_when_narrow() {
        let frame = Frame::gray(vec![7; 16], 4, 4, 3).unwrap();
        let small = frame.downsample(8);
        assert_eq!(small.width, 4);
        assert_eq!(small.data, frame.data);
        assert_eq!(small.sequence, 3);
    }

    #[test]
    fn test_downsample_zero_height_frame() {
        let frame = Frame::gray(Vec::new(), 640, 0, 9).unwrap();
        let small = frame.downsample(320);
        assert_eq!((small.width, small.height), (640, 0));
        assert!(small.data.is_empty());
        assert_eq!(small.sequence, 9);

        let rgb = Frame::new(Vec::new(), 1280, 0, 3, 0).unwrap();
        assert!(rgb.downsample(320).is_empty());
    }

    #[test]
    fn test_downsample_averages_blocks() {
        // 4x2 gray: left 2x2 block = 0/100, right block = 200s
        let data = vec![0, 100, 200, 200, 100, 0, 200, 200];
        let frame = Frame::gray(data, 4, 2, 0).unwrap();
        let small = frame.downsample(2);
        assert_eq!((small.width, small.height), (2, 1));
        assert_eq!(small.data, vec![50, 200]);
    }

    #[test]
    fn test_downsample_keeps_channels() {
        let data: Vec<u8> = [10u8, 20, 30].repeat(16);
        let frame = Frame::new(data, 4, 4, 3, 0).unwrap();
        let small = frame.downsample(2);
        assert_eq!(small.channels, 3);
        assert_eq!(small.data.len(), 2 * 2 * 3);
        assert_eq!(&small.data[..3], &[10, 20, 30]);
    }

    #[test]
    fn test_luma_from_rgb() {
        let frame = Frame::new(vec![255, 255, 255, 0, 0, 0], 2, 1, 3, 0).unwrap();
        assert_eq!(frame.luma(), vec![255, 0]);
    }
}
