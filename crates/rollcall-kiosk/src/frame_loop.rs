//! The kiosk's main loop: acquire, undistort, schedule recognition, log
//! attendance, render.
//!
//! Everything here runs on one thread. Recognition is the only work that
//! leaves it, through the [`InferenceScheduler`].

use crate::dedup::SessionDedup;
use crate::display::{DisplaySink, Overlay};
use crate::gesture::{GestureController, NoHandTracker, SimulatedVolume};
use crate::input::{Key, KeySource};
use crate::scheduler::InferenceScheduler;
use rollcall_core::InferenceResult;
use rollcall_hw::{CameraError, FrameSource, Undistorter};
use rollcall_ledger::{AttendanceLedger, LedgerEntry, RecordOutcome, SessionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Attendance,
    Gesture,
}

impl Mode {
    fn toggled(self) -> Self {
        match self {
            Mode::Attendance => Mode::Gesture,
            Mode::Gesture => Mode::Attendance,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoopPolicy {
    /// Results must be strictly more confident than this to be logged.
    pub log_threshold: f32,
    /// How long shutdown waits for an in-flight recognition.
    pub shutdown_grace: Duration,
}

impl Default for LoopPolicy {
    fn default() -> Self {
        Self {
            log_threshold: 0.5,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    ExitKey,
    Cancelled,
    EndOfStream,
    CameraFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit(ExitReason),
}

#[derive(Debug, Clone, Default)]
pub struct LoopSummary {
    pub frames: u64,
    pub inferences: u64,
    /// Identities newly written to the ledger, in order.
    pub logged: Vec<String>,
    pub exit: Option<ExitReason>,
}

pub struct FrameLoop {
    camera: Box<dyn FrameSource>,
    undistorter: Option<Undistorter>,
    scheduler: InferenceScheduler,
    dedup: SessionDedup,
    ledger: Box<dyn AttendanceLedger>,
    session: SessionId,
    gesture: GestureController,
    display: Box<dyn DisplaySink>,
    keys: Box<dyn KeySource>,
    policy: LoopPolicy,
    cancel: Arc<AtomicBool>,
    mode: Mode,
    frame_index: u64,
    summary: LoopSummary,
}

impl FrameLoop {
    pub fn new(
        camera: Box<dyn FrameSource>,
        scheduler: InferenceScheduler,
        ledger: Box<dyn AttendanceLedger>,
        session: SessionId,
        display: Box<dyn DisplaySink>,
        keys: Box<dyn KeySource>,
        policy: LoopPolicy,
    ) -> Self {
        Self {
            camera,
            undistorter: None,
            scheduler,
            dedup: SessionDedup::new(),
            ledger,
            session,
            gesture: GestureController::new(Box::new(NoHandTracker), Box::<SimulatedVolume>::default()),
            display,
            keys,
            policy,
            cancel: Arc::new(AtomicBool::new(false)),
            mode: Mode::Attendance,
            frame_index: 0,
            summary: LoopSummary::default(),
        }
    }

    pub fn with_undistorter(mut self, undistorter: Undistorter) -> Self {
        self.undistorter = Some(undistorter);
        self
    }

    /// Replace the default controller, which sees no hands and only
    /// simulates volume changes.
    pub fn with_gesture(mut self, gesture: GestureController) -> Self {
        self.gesture = gesture;
        self
    }

    /// Stop at the next iteration once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// One iteration. Only acquisition failure, operator exit or
    /// cancellation end the loop; every other error stays inside the step.
    pub fn step(&mut self) -> Flow {
        if self.cancel.load(Ordering::SeqCst) {
            return Flow::Exit(ExitReason::Cancelled);
        }

        let frame = match self.camera.next_frame() {
            Ok(frame) => frame,
            Err(CameraError::EndOfStream) => {
                tracing::info!("camera stream ended");
                return Flow::Exit(ExitReason::EndOfStream);
            }
            Err(e) => {
                tracing::error!(error = %e, "frame acquisition failed");
                return Flow::Exit(ExitReason::CameraFailed(e.to_string()));
            }
        };
        let frame = match self.undistorter.as_mut() {
            Some(u) => u.apply(&frame),
            None => frame,
        };
        self.summary.frames += 1;

        let overlay = match self.mode {
            Mode::Attendance => self.attendance_step(&frame),
            Mode::Gesture => Overlay::gesture(&self.gesture.process(&frame)),
        };

        if let Err(e) = self.display.present(&frame, &overlay) {
            tracing::warn!(error = %e, "display failed");
        }

        match self.keys.poll_key() {
            Some(Key::Exit) => {
                tracing::info!("exit requested");
                Flow::Exit(ExitReason::ExitKey)
            }
            Some(Key::ToggleMode) => {
                self.mode = self.mode.toggled();
                tracing::info!(mode = ?self.mode, "mode switched");
                Flow::Continue
            }
            None => Flow::Continue,
        }
    }

    fn attendance_step(&mut self, frame: &rollcall_hw::Frame) -> Overlay {
        self.frame_index += 1;
        self.scheduler.maybe_submit(frame, self.frame_index);

        let mut marked = false;
        if let Some(result) = self.scheduler.poll() {
            self.summary.inferences += 1;
            marked = self.try_log(&result);
        }
        Overlay::attendance(self.scheduler.current(), marked)
    }

    /// Write `result` to the ledger if it is confident, names someone and
    /// that someone has not been logged this run. Returns true on a fresh
    /// ledger entry.
    pub fn try_log(&mut self, result: &InferenceResult) -> bool {
        if result.confidence <= self.policy.log_threshold {
            return false;
        }
        let Some(identity) = result.identity() else {
            return false;
        };

        let entry = LedgerEntry::new(identity, result.emotion.as_str(), self.session.clone());
        let ledger = &mut self.ledger;
        match self.dedup.log_once(identity, || ledger.record(&entry)) {
            Ok(Some(RecordOutcome::Recorded)) => {
                tracing::info!(
                    identity,
                    emotion = %entry.emotion,
                    confidence = result.confidence,
                    session = %self.session,
                    "attendance logged"
                );
                self.summary.logged.push(identity.to_string());
                true
            }
            Ok(Some(RecordOutcome::AlreadyRecorded)) => {
                tracing::info!(identity, session = %self.session, "already in ledger for this session");
                false
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(identity, error = %e, "attendance write failed; will retry on next sighting");
                false
            }
        }
    }

    /// Run until exit, then stop the worker and release the camera.
    pub fn run(mut self) -> LoopSummary {
        tracing::info!(session = %self.session, "frame loop started");
        let exit = loop {
            if let Flow::Exit(reason) = self.step() {
                break reason;
            }
        };

        tracing::debug!(mode = ?self.mode(), identities = self.dedup.len(), "leaving frame loop");
        let FrameLoop {
            camera,
            mut scheduler,
            mut summary,
            policy,
            ..
        } = self;
        scheduler.shutdown(policy.shutdown_grace);
        drop(camera);

        tracing::info!(
            frames = summary.frames,
            inferences = summary.inferences,
            logged = summary.logged.len(),
            exit = ?exit,
            "frame loop stopped"
        );
        summary.exit = Some(exit);
        summary
    }
}
