//! rollcall-hw — Camera capture and frame handling for the kiosk.
//!
//! Provides V4L2 webcam capture (RGB frames), the `Frame` type passed through the
//! pipeline, and lens undistortion from a stored calibration.

pub mod camera;
pub mod frame;
pub mod undistort;

pub use camera::{Camera, CameraError, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
pub use undistort::{CalibrationError, Undistorter};
