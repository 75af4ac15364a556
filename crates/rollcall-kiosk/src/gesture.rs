//! Gesture mode: pinch distance between thumb and index fingertip drives
//! the output volume.

use rollcall_hw::Frame;
use thiserror::Error;

/// Pinch distance (px) treated as fully closed / fully open.
pub const PINCH_RANGE: (f32, f32) = (50.0, 220.0);
/// Vertical extent of the on-screen volume bar; the top moves up as volume rises.
pub const BAR_BOTTOM: f32 = 400.0;
pub const BAR_TOP: f32 = 150.0;

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("volume backend rejected {percent}%: {reason}")]
    Rejected { percent: f32, reason: String },
}

/// Fingertip positions in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pinch {
    pub thumb: (f32, f32),
    pub index: (f32, f32),
}

impl Pinch {
    pub fn distance(&self) -> f32 {
        let dx = self.index.0 - self.thumb.0;
        let dy = self.index.1 - self.thumb.1;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Locates a hand in a frame.
pub trait HandTracker: Send {
    fn locate(&mut self, frame: &Frame) -> Option<Pinch>;
}

/// Tracker for hosts without a hand model. Never sees a hand.
pub struct NoHandTracker;

impl HandTracker for NoHandTracker {
    fn locate(&mut self, _frame: &Frame) -> Option<Pinch> {
        None
    }
}

pub trait VolumeControl: Send {
    fn set_volume(&mut self, percent: f32) -> Result<(), VolumeError>;

    /// True when no real mixer is being driven.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Logs volume changes instead of touching a mixer.
#[derive(Default)]
pub struct SimulatedVolume {
    last: Option<u32>,
}

impl VolumeControl for SimulatedVolume {
    fn set_volume(&mut self, percent: f32) -> Result<(), VolumeError> {
        let rounded = percent.round() as u32;
        if self.last != Some(rounded) {
            tracing::debug!(percent = rounded, "simulated volume");
            self.last = Some(rounded);
        }
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// What gesture mode shows for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureReading {
    pub volume_percent: f32,
    pub bar_top: f32,
    pub pinch: Option<Pinch>,
    pub simulated: bool,
}

pub struct GestureController {
    tracker: Box<dyn HandTracker>,
    volume: Box<dyn VolumeControl>,
    volume_percent: f32,
    bar_top: f32,
}

impl GestureController {
    pub fn new(tracker: Box<dyn HandTracker>, volume: Box<dyn VolumeControl>) -> Self {
        Self {
            tracker,
            volume,
            volume_percent: 0.0,
            bar_top: BAR_BOTTOM,
        }
    }

    /// Update volume from the pinch in `frame`. Without a visible hand the
    /// previous level holds.
    pub fn process(&mut self, frame: &Frame) -> GestureReading {
        let pinch = self.tracker.locate(frame);
        if let Some(p) = pinch {
            let d = p.distance();
            self.volume_percent = interp(d, PINCH_RANGE, (0.0, 100.0));
            self.bar_top = interp(d, PINCH_RANGE, (BAR_BOTTOM, BAR_TOP));
            if let Err(e) = self.volume.set_volume(self.volume_percent) {
                tracing::warn!(error = %e, "failed to set volume");
            }
        }
        GestureReading {
            volume_percent: self.volume_percent,
            bar_top: self.bar_top,
            pinch,
            simulated: self.volume.is_simulated(),
        }
    }
}

/// Linear map of `x` from `from` onto `to`, clamped at both ends.
pub fn interp(x: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    let t = ((x - from.0) / (from.1 - from.0)).clamp(0.0, 1.0);
    to.0 + t * (to.1 - to.0)
}
