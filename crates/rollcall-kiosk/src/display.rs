//! Overlay rendering and display sinks.
//!
//! Rendering never touches the captured frame; it draws on an RGB copy.
//! There is no on-screen font: the overlay text goes to the log each time
//! it changes, and the image carries a status banner plus the volume bar.

use crate::gesture::{GestureReading, Pinch, BAR_BOTTOM, BAR_TOP};
use image::{ImageFormat, Rgb, RgbImage};
use rollcall_core::InferenceResult;
use rollcall_hw::Frame;
use std::path::PathBuf;
use thiserror::Error;

const MARKED: Rgb<u8> = Rgb([0, 200, 0]);
const UNMARKED: Rgb<u8> = Rgb([220, 0, 0]);
const BAR_BG: Rgb<u8> = Rgb([220, 220, 220]);
const BAR_FILL: Rgb<u8> = Rgb([255, 122, 0]);
const FINGERTIP: Rgb<u8> = Rgb([255, 0, 255]);
const PINCH_LINE: Rgb<u8> = Rgb([0, 255, 0]);

const BANNER_HEIGHT: u32 = 8;
const BAR_X: u32 = 50;
const BAR_WIDTH: u32 = 40;
const FINGERTIP_RADIUS: i32 = 15;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("failed to write preview: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeBar {
    pub percent: f32,
    pub top: f32,
    pub pinch: Option<Pinch>,
}

/// Everything drawn over one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Overlay {
    pub text: String,
    pub marked: bool,
    pub volume: Option<VolumeBar>,
}

impl Overlay {
    /// Status line for attendance mode, e.g.
    /// `Name: alice  Emotion: happy  ✓ Marked Present`.
    pub fn attendance(result: Option<&InferenceResult>, marked: bool) -> Self {
        let mut text = String::new();
        if let Some(r) = result {
            if let Some(name) = r.identity() {
                text.push_str(&format!("Name: {name}  "));
            }
            if !r.emotion.is_empty() {
                text.push_str(&format!("Emotion: {}  ", r.emotion));
            }
        }
        if marked {
            text.push_str("✓ Marked Present");
        }
        Self {
            text: text.trim_end().to_string(),
            marked,
            volume: None,
        }
    }

    pub fn gesture(reading: &GestureReading) -> Self {
        let mut text = format!("Volume: {}%", reading.volume_percent as u32);
        if reading.simulated {
            text.push_str("  Volume Control: Simulation");
        }
        Self {
            text,
            marked: false,
            volume: Some(VolumeBar {
                percent: reading.volume_percent,
                top: reading.bar_top,
                pinch: reading.pinch,
            }),
        }
    }
}

/// Draw `overlay` onto an RGB copy of `frame`.
pub fn render(frame: &Frame, overlay: &Overlay) -> RgbImage {
    let mut img = to_rgb(frame);

    if !overlay.text.is_empty() {
        let color = if overlay.marked { MARKED } else { UNMARKED };
        fill_rect(&mut img, 0, 0, img.width(), BANNER_HEIGHT, color);
    }

    if let Some(bar) = &overlay.volume {
        let top = bar.top.clamp(BAR_TOP, BAR_BOTTOM) as u32;
        fill_rect(&mut img, BAR_X, BAR_TOP as u32, BAR_WIDTH, BAR_BOTTOM as u32 - BAR_TOP as u32, BAR_BG);
        fill_rect(&mut img, BAR_X, top, BAR_WIDTH, BAR_BOTTOM as u32 - top, BAR_FILL);

        if let Some(p) = bar.pinch {
            draw_line(&mut img, p.thumb, p.index, PINCH_LINE);
            fill_circle(&mut img, p.thumb, FINGERTIP_RADIUS, FINGERTIP);
            fill_circle(&mut img, p.index, FINGERTIP_RADIUS, FINGERTIP);
        }
    }

    img
}

fn to_rgb(frame: &Frame) -> RgbImage {
    let data = match frame.channels {
        1 => frame.data.iter().flat_map(|&v| [v, v, v]).collect(),
        _ => frame.data.clone(),
    };
    RgbImage::from_raw(frame.width, frame.height, data)
        .unwrap_or_else(|| RgbImage::new(frame.width, frame.height))
}

fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

fn put_clipped(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_circle(img: &mut RgbImage, center: (f32, f32), radius: i32, color: Rgb<u8>) {
    let (cx, cy) = (center.0.round() as i32, center.1.round() as i32);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_clipped(img, cx + dx, cy + dy, color);
            }
        }
    }
}

fn draw_line(img: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: Rgb<u8>) {
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil().max(1.0) as i32;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let x = from.0 + t * (to.0 - from.0);
        let y = from.1 + t * (to.1 - from.1);
        put_clipped(img, x.round() as i32, y.round() as i32, color);
    }
}

/// Where rendered frames go.
pub trait DisplaySink {
    fn present(&mut self, frame: &Frame, overlay: &Overlay) -> Result<(), DisplayError>;
}

/// Logs the overlay text whenever it changes.
#[derive(Default)]
struct TextLog {
    last: Option<String>,
}

impl TextLog {
    fn update(&mut self, overlay: &Overlay) {
        if self.last.as_deref() != Some(overlay.text.as_str()) {
            if !overlay.text.is_empty() {
                tracing::info!(marked = overlay.marked, "{}", overlay.text);
            }
            self.last = Some(overlay.text.clone());
        }
    }
}

/// Writes the rendered frame to a JPEG every `every` frames, overwriting
/// the previous preview.
pub struct SnapshotSink {
    path: PathBuf,
    every: u64,
    presented: u64,
    text: TextLog,
}

impl SnapshotSink {
    pub fn new(path: PathBuf, every: u64) -> Self {
        Self {
            path,
            every: every.max(1),
            presented: 0,
            text: TextLog::default(),
        }
    }
}

impl DisplaySink for SnapshotSink {
    fn present(&mut self, frame: &Frame, overlay: &Overlay) -> Result<(), DisplayError> {
        self.text.update(overlay);
        let index = self.presented;
        self.presented += 1;
        if index % self.every != 0 {
            return Ok(());
        }
        render(frame, overlay).save_with_format(&self.path, ImageFormat::Jpeg)?;
        tracing::trace!(path = %self.path.display(), sequence = frame.sequence, "preview written");
        Ok(())
    }
}

/// Headless sink: only the log line.
#[derive(Default)]
pub struct NullSink {
    text: TextLog,
}

impl DisplaySink for NullSink {
    fn present(&mut self, _frame: &Frame, overlay: &Overlay) -> Result<(), DisplayError> {
        self.text.update(overlay);
        Ok(())
    }
}
