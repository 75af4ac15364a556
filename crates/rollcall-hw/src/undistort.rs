//! Lens undistortion from a precomputed calibration.
//!
//! Calibration files are TOML, with pinhole intrinsics and Brown-Conrady
//! distortion coefficients as produced by a standard chessboard
//! calibration:
//!
//! ```toml
//! [camera]
//! width = 640
//! height = 480
//! fx = 612.3
//! fy = 611.8
//! cx = 319.5
//! cy = 239.5
//!
//! [distortion]
//! k1 = -0.21
//! k2 = 0.05
//! ```

use crate::frame::Frame;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("calibration file not found: {0}")]
    NotFound(String),
    #[error("failed to read calibration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid calibration file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid intrinsics: {0}")]
    InvalidIntrinsics(String),
}

/// Pinhole camera intrinsics at the resolution they were calibrated for.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

/// Brown-Conrady radial (k1, k2, k3) and tangential (p1, p2) coefficients.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Distortion {
    pub k1: f32,
    pub k2: f32,
    pub p1: f32,
    pub p2: f32,
    pub k3: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct CalibrationFile {
    camera: Intrinsics,
    #[serde(default)]
    distortion: Distortion,
}

/// Source coordinates for every destination pixel at one frame size.
struct RemapTable {
    width: u32,
    height: u32,
    coords: Vec<(f32, f32)>,
}

/// Removes lens distortion from frames.
///
/// The remap table is built lazily for the first frame size seen and rebuilt
/// only if the size changes. Intrinsics are rescaled when frames arrive at a
/// different resolution than the calibration was done at.
pub struct Undistorter {
    intrinsics: Intrinsics,
    distortion: Distortion,
    table: Option<RemapTable>,
}

impl Undistorter {
    pub fn new(intrinsics: Intrinsics, distortion: Distortion) -> Result<Self, CalibrationError> {
        if intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(CalibrationError::InvalidIntrinsics(format!(
                "focal lengths must be positive (fx={}, fy={})",
                intrinsics.fx, intrinsics.fy
            )));
        }
        if intrinsics.width == 0 || intrinsics.height == 0 {
            return Err(CalibrationError::InvalidIntrinsics(
                "calibrated resolution must be non-zero".into(),
            ));
        }
        Ok(Self {
            intrinsics,
            distortion,
            table: None,
        })
    }

    /// Load a calibration TOML file.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        if !path.exists() {
            return Err(CalibrationError::NotFound(path.display().to_string()));
        }
        let src = std::fs::read_to_string(path)?;
        let file: CalibrationFile = toml::from_str(&src)?;
        tracing::debug!(
            path = %path.display(),
            fx = file.camera.fx,
            fy = file.camera.fy,
            k1 = file.distortion.k1,
            "calibration loaded"
        );
        Self::new(file.camera, file.distortion)
    }

    /// Return an undistorted copy of `frame`.
    pub fn apply(&mut self, frame: &Frame) -> Frame {
        if frame.is_empty() {
            return frame.clone();
        }
        let rebuild = match &self.table {
            Some(t) => t.width != frame.width || t.height != frame.height,
            None => true,
        };
        if rebuild {
            self.table = Some(self.build_table(frame.width, frame.height));
        }
        let Some(table) = self.table.as_ref() else {
            return frame.clone();
        };

        let ch = frame.channels as usize;
        let mut data = Vec::with_capacity(frame.data.len());
        for &(sx, sy) in &table.coords {
            for c in 0..ch {
                data.push(sample_bilinear(frame, sx, sy, c));
            }
        }

        Frame {
            data,
            width: frame.width,
            height: frame.height,
            channels: frame.channels,
            timestamp: frame.timestamp,
            sequence: frame.sequence,
        }
    }

    fn build_table(&self, width: u32, height: u32) -> RemapTable {
        let sx = width as f32 / self.intrinsics.width as f32;
        let sy = height as f32 / self.intrinsics.height as f32;
        let fx = self.intrinsics.fx * sx;
        let fy = self.intrinsics.fy * sy;
        let cx = self.intrinsics.cx * sx;
        let cy = self.intrinsics.cy * sy;
        let Distortion { k1, k2, p1, p2, k3 } = self.distortion;

        let mut coords = Vec::with_capacity(width as usize * height as usize);
        for v in 0..height {
            for u in 0..width {
                let x = (u as f32 - cx) / fx;
                let y = (v as f32 - cy) / fy;
                let r2 = x * x + y * y;
                let radial = 1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2;
                let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                coords.push((fx * xd + cx, fy * yd + cy));
            }
        }

        tracing::debug!(width, height, "built undistortion remap table");
        RemapTable {
            width,
            height,
            coords,
        }
    }
}

/// Bilinear sample of channel `c` at (x, y). Outside the frame reads as black.
fn sample_bilinear(frame: &Frame, x: f32, y: f32, c: usize) -> u8 {
    let w = frame.width as usize;
    let h = frame.height as usize;
    if x < -0.5 || y < -0.5 || x > w as f32 - 0.5 || y > h as f32 - 0.5 {
        return 0;
    }
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let ch = frame.channels as usize;
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let dx = x - x0 as f32;
    let dy = y - y0 as f32;

    let px = |xx: usize, yy: usize| frame.data[(yy * w + xx) * ch + c] as f32;
    let top = px(x0, y0) * (1.0 - dx) + px(x1, y0) * dx;
    let bot = px(x0, y1) * (1.0 - dx) + px(x1, y1) * dx;
    (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn intrinsics(width: u32, height: u32) -> Intrinsics {
        Intrinsics {
            width,
            height,
            fx: 100.0,
            fy: 100.0,
            cx: (width as f32 - 1.0) / 2.0,
            cy: (height as f32 - 1.0) / 2.0,
        }
    }

    fn gradient(width: u32, height: u32) -> Frame {
        let data = (0..width * height).map(|i| (i % 251) as u8).collect();
        Frame::gray(data, width, height, 0).unwrap()
    }

    #[test]
    fn test_zero_distortion_is_identity() {
        let mut u = Undistorter::new(intrinsics(8, 6), Distortion::default()).unwrap();
        let frame = gradient(8, 6);
        let out = u.apply(&frame);
        assert_eq!(out.data, frame.data);
        assert_eq!((out.width, out.height), (8, 6));
    }

    #[test]
    fn test_barrel_correction_changes_corners_not_center() {
        let d = Distortion {
            k1: 0.5,
            ..Default::default()
        };
        let mut i = intrinsics(9, 9);
        i.fx = 4.0;
        i.fy = 4.0;
        let mut u = Undistorter::new(i, d).unwrap();
        let frame = gradient(9, 9);
        let out = u.apply(&frame);
        // Principal point maps onto itself.
        assert_eq!(out.data[4 * 9 + 4], frame.data[4 * 9 + 4]);
        assert_ne!(out.data, frame.data);
    }

    #[test]
    fn test_table_rebuilt_on_resize() {
        let mut u = Undistorter::new(intrinsics(8, 6), Distortion::default()).unwrap();
        u.apply(&gradient(8, 6));
        let out = u.apply(&gradient(16, 12));
        assert_eq!(out.data.len(), 16 * 12);
    }

    #[test]
    fn test_rejects_bad_focal_length() {
        let mut i = intrinsics(8, 6);
        i.fx = 0.0;
        assert!(matches!(
            Undistorter::new(i, Distortion::default()),
            Err(CalibrationError::InvalidIntrinsics(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Undistorter::load(Path::new("/nonexistent/calibration.toml"))
            .err()
            .unwrap();
        assert!(matches!(err, CalibrationError::NotFound(_)));
    }

    #[test]
    fn test_load_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[camera]\nwidth = 640\nheight = 480\nfx = 600.0\nfy = 600.0\ncx = 320.0\ncy = 240.0\n\n[distortion]\nk1 = -0.2"
        )
        .unwrap();
        let u = Undistorter::load(file.path()).unwrap();
        assert_eq!(u.distortion.k1, -0.2);
        assert_eq!(u.distortion.k2, 0.0);
        assert_eq!(u.intrinsics.width, 640);
    }
}
