//! Fakes for the kiosk's collaborators.

use crate::display::{DisplayError, DisplaySink, Overlay};
use crate::gateway::{GatewayError, RecognitionGateway};
use crate::input::{Key, KeySource};
use rollcall_core::InferenceResult;
use rollcall_hw::{CameraError, Frame, FrameSource};
use rollcall_ledger::{AttendanceLedger, LedgerEntry, LedgerError, RecordOutcome};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

pub fn gray_frame(width: u32, height: u32, sequence: u32) -> Frame {
    Frame::gray(vec![128; (width * height) as usize], width, height, sequence).unwrap()
}

pub fn seen(identity: &str, confidence: f32) -> InferenceResult {
    InferenceResult::new(Some(identity.to_string()), "happy", confidence)
}

/// Gateway driven by a closure, with an optional gate that holds each call
/// until the test sends a release.
pub struct FnGateway<F> {
    answer: F,
    gate: Option<mpsc::Receiver<()>>,
    pub calls: Arc<AtomicUsize>,
    pub widths: Arc<Mutex<Vec<u32>>>,
}

impl<F> FnGateway<F>
where
    F: FnMut(usize) -> Result<InferenceResult, GatewayError> + Send + 'static,
{
    pub fn new(answer: F) -> Self {
        Self {
            answer,
            gate: None,
            calls: Arc::new(AtomicUsize::new(0)),
            widths: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Block every call until a `()` arrives on the returned sender.
    pub fn gated(answer: F) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let mut gateway = Self::new(answer);
        gateway.gate = Some(rx);
        (gateway, tx)
    }
}

impl<F> RecognitionGateway for FnGateway<F>
where
    F: FnMut(usize) -> Result<InferenceResult, GatewayError> + Send + 'static,
{
    fn infer(&mut self, image: &Frame) -> Result<InferenceResult, GatewayError> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.widths.lock().unwrap().push(image.width);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.answer)(call)
    }
}

/// Source yielding `frames` identical frames, then `end`.
pub struct FakeCamera {
    remaining: usize,
    size: (u32, u32),
    sequence: u32,
    delay: Duration,
    end: Option<CameraError>,
    pub released: Arc<AtomicBool>,
}

impl FakeCamera {
    pub fn new(frames: usize) -> Self {
        Self {
            remaining: frames,
            size: (64, 48),
            sequence: 0,
            delay: Duration::ZERO,
            end: Some(CameraError::EndOfStream),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pace frames like a real camera so background inference can land
    /// between sampling ticks.
    pub fn paced(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Yield `width` x `height` frames instead of 64x48. Either side may be 0.
    pub fn sized(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    pub fn failing_with(mut self, err: CameraError) -> Self {
        self.end = Some(err);
        self
    }
}

impl FrameSource for FakeCamera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        if self.remaining == 0 {
            return Err(self.end.take().unwrap_or(CameraError::EndOfStream));
        }
        self.remaining -= 1;
        self.sequence += 1;
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(gray_frame(self.size.0, self.size.1, self.sequence))
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Ledger whose first `failures` writes fail; successes are shared with
/// the test through `entries`.
pub struct SharedLedger {
    pub entries: Arc<Mutex<Vec<LedgerEntry>>>,
    pub attempts: Arc<AtomicUsize>,
    failures: usize,
}

impl SharedLedger {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
            failures,
        }
    }
}

impl AttendanceLedger for SharedLedger {
    fn record(&mut self, entry: &LedgerEntry) -> Result<RecordOutcome, LedgerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures > 0 {
            self.failures -= 1;
            return Err(LedgerError::Unavailable("disk full".into()));
        }
        let mut entries = self.entries.lock().unwrap();
        if entries
            .iter()
            .any(|e| e.identity == entry.identity && e.session == entry.session)
        {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        entries.push(entry.clone());
        Ok(RecordOutcome::Recorded)
    }
}

/// Keeps every overlay it is shown.
#[derive(Default)]
pub struct RecordingSink {
    pub overlays: Arc<Mutex<Vec<Overlay>>>,
}

impl DisplaySink for RecordingSink {
    fn present(&mut self, _frame: &Frame, overlay: &Overlay) -> Result<(), DisplayError> {
        self.overlays.lock().unwrap().push(overlay.clone());
        Ok(())
    }
}

/// Keys pushed by the test between loop iterations.
#[derive(Clone, Default)]
pub struct ScriptedKeys {
    queue: Arc<Mutex<VecDeque<Key>>>,
}

impl ScriptedKeys {
    pub fn push(&self, key: Key) {
        self.queue.lock().unwrap().push_back(key);
    }
}

impl KeySource for ScriptedKeys {
    fn poll_key(&mut self) -> Option<Key> {
        self.queue.lock().unwrap().pop_front()
    }
}

/// Poll until `check` holds or five seconds pass.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}
