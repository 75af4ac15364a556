//! Background recognition with at most one request in flight.
//!
//! The scheduler owns a dedicated worker thread and a capacity-1 request
//! channel. Each request carries its own oneshot reply; the receiving half
//! lives in `pending` until `poll()` consumes it. `maybe_submit` refuses to
//! send while `pending` is occupied, so frames arriving during a slow
//! inference are dropped, never queued.

use crate::gateway::{GatewayError, RecognitionGateway};
use rollcall_core::{InferenceResult, EMOTION_UNKNOWN};
use rollcall_hw::Frame;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("sampling interval must be at least 1")]
    ZeroInterval,
    #[error("failed to spawn inference worker: {0}")]
    Spawn(#[from] std::io::Error),
}

type Reply = Result<InferenceResult, GatewayError>;

/// Sent from the frame loop to the worker thread.
struct InferenceRequest {
    id: u64,
    image: Frame,
    reply: oneshot::Sender<Reply>,
}

/// The one outstanding request, as seen from the main thread.
struct PendingInference {
    id: u64,
    submitted_at: Instant,
    reply: oneshot::Receiver<Reply>,
}

pub struct InferenceScheduler {
    sampling_interval: u64,
    inference_width: u32,
    tx: Option<mpsc::Sender<InferenceRequest>>,
    worker: Option<JoinHandle<()>>,
    pending: Option<PendingInference>,
    last: Option<InferenceResult>,
    next_id: u64,
}

impl InferenceScheduler {
    /// Spawn the worker thread that will own `gateway`.
    ///
    /// Frames are submitted every `sampling_interval` frames, downsampled to
    /// at most `inference_width` pixels wide.
    pub fn spawn<G: RecognitionGateway>(
        mut gateway: G,
        sampling_interval: u64,
        inference_width: u32,
    ) -> Result<Self, SchedulerError> {
        if sampling_interval == 0 {
            return Err(SchedulerError::ZeroInterval);
        }

        let (tx, mut rx) = mpsc::channel::<InferenceRequest>(1);

        let worker = std::thread::Builder::new()
            .name("rollcall-inference".into())
            .spawn(move || {
                tracing::info!("inference worker started");
                while let Some(req) = rx.blocking_recv() {
                    let started = Instant::now();
                    let result = panic::catch_unwind(AssertUnwindSafe(|| gateway.infer(&req.image)))
                        .unwrap_or_else(|payload| Err(GatewayError::Panicked(panic_message(&payload))));
                    tracing::debug!(
                        request = req.id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        ok = result.is_ok(),
                        "inference finished"
                    );
                    // The scheduler may have shut down meanwhile; nothing to deliver to.
                    let _ = req.reply.send(result);
                }
                tracing::info!("inference worker exiting");
            })?;

        tracing::info!(sampling_interval, inference_width, "inference scheduler ready");

        Ok(Self {
            sampling_interval,
            inference_width,
            tx: Some(tx),
            worker: Some(worker),
            pending: None,
            last: None,
            next_id: 0,
        })
    }

    /// Submit `frame` for recognition if `frame_index` is a sampling tick and
    /// nothing is outstanding. Returns whether a request was sent.
    pub fn maybe_submit(&mut self, frame: &Frame, frame_index: u64) -> bool {
        if frame_index % self.sampling_interval != 0 || self.pending.is_some() {
            return false;
        }
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };

        let id = self.next_id;
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = InferenceRequest {
            id,
            image: frame.downsample(self.inference_width),
            reply: reply_tx,
        };

        match tx.try_send(request) {
            Ok(()) => {
                self.next_id += 1;
                self.pending = Some(PendingInference {
                    id,
                    submitted_at: Instant::now(),
                    reply: reply_rx,
                });
                tracing::trace!(request = id, frame_index, "inference submitted");
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(frame_index, "inference worker still busy; frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("inference worker is gone; recognition disabled");
                self.tx = None;
                false
            }
        }
    }

    /// Collect the outstanding result if it has arrived. Never blocks.
    ///
    /// Failed recognitions come back as "nobody recognized" with the
    /// previous emotion label, so callers see a result either way.
    pub fn poll(&mut self) -> Option<InferenceResult> {
        let reply = match self.pending.as_mut()?.reply.try_recv() {
            Ok(reply) => reply,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Closed) => Err(GatewayError::WorkerGone),
        };
        let pending = self.pending.take()?;

        let result = match reply {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(request = pending.id, error = %e, "recognition failed");
                InferenceResult::unrecognized(self.previous_emotion())
            }
        };

        tracing::debug!(
            request = pending.id,
            latency_ms = pending.submitted_at.elapsed().as_millis() as u64,
            identity = ?result.identity,
            emotion = %result.emotion,
            confidence = result.confidence,
            "inference result applied"
        );
        self.last = Some(result.clone());
        Some(result)
    }

    /// Most recent completed result, or `None` before the first one.
    pub fn current(&self) -> Option<&InferenceResult> {
        self.last.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn previous_emotion(&self) -> String {
        self.last
            .as_ref()
            .map(|r| r.emotion.clone())
            .unwrap_or_else(|| EMOTION_UNKNOWN.to_string())
    }

    /// Stop accepting work and wait up to `grace` for the worker to exit.
    ///
    /// An in-flight inference is not cancelled. If it outlives `grace` the
    /// worker thread is detached and left to finish on its own.
    pub fn shutdown(&mut self, grace: Duration) {
        self.tx.take();
        if let Some(pending) = self.pending.take() {
            tracing::debug!(request = pending.id, "abandoning in-flight inference");
        }
        let Some(worker) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + grace;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "inference worker still busy; abandoning it"
                );
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        if worker.join().is_err() {
            tracing::warn!("inference worker panicked");
        }
        tracing::info!("inference worker stopped");
    }
}

impl Drop for InferenceScheduler {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, gray_frame, seen, FnGateway};
    use rollcall_core::AnalyzerError;
    use rollcall_core::EmbedderError;
    use std::sync::atomic::Ordering;

    fn wait_for_result(scheduler: &mut InferenceScheduler) -> InferenceResult {
        let mut out = None;
        assert!(
            eventually(|| {
                out = scheduler.poll();
                out.is_some()
            }),
            "no inference result arrived"
        );
        out.unwrap()
    }

    fn analyzer_failure() -> GatewayError {
        GatewayError::Analyzer(AnalyzerError::Embedder(EmbedderError::InferenceFailed(
            "no face".into(),
        )))
    }

    #[test]
    fn test_zero_interval_rejected() {
        let gateway = FnGateway::new(|_| Ok(seen("alice", 0.9)));
        assert!(matches!(
            InferenceScheduler::spawn(gateway, 0, 320),
            Err(SchedulerError::ZeroInterval)
        ));
    }

    #[test]
    fn test_submits_only_on_sampling_ticks() {
        let gateway = FnGateway::new(|_| Ok(seen("alice", 0.9)));
        let mut s = InferenceScheduler::spawn(gateway, 5, 320).unwrap();
        let frame = gray_frame(32, 24, 0);

        for i in 1..5 {
            assert!(!s.maybe_submit(&frame, i), "submitted at frame {i}");
        }
        assert!(s.maybe_submit(&frame, 5));
        assert!(s.is_pending());
    }

    #[test]
    fn test_never_submits_while_outstanding() {
        let (gateway, release) = FnGateway::gated(|_| Ok(seen("alice", 0.9)));
        let calls = gateway.calls.clone();
        let mut s = InferenceScheduler::spawn(gateway, 5, 320).unwrap();
        let frame = gray_frame(32, 24, 0);

        assert!(s.maybe_submit(&frame, 5));
        for tick in [10, 15, 20, 25] {
            assert!(!s.maybe_submit(&frame, tick));
            assert!(s.poll().is_none());
        }

        release.send(()).unwrap();
        wait_for_result(&mut s);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(s.maybe_submit(&frame, 30));
        release.send(()).unwrap();
        wait_for_result(&mut s);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_cache_untouched_until_completion() {
        let (gateway, release) = FnGateway::gated(|call| {
            Ok(seen(if call == 0 { "alice" } else { "bob" }, 0.8))
        });
        let mut s = InferenceScheduler::spawn(gateway, 1, 320).unwrap();
        let frame = gray_frame(32, 24, 0);

        assert!(s.current().is_none());
        s.maybe_submit(&frame, 1);
        assert!(s.poll().is_none());
        assert!(s.current().is_none());

        release.send(()).unwrap();
        let first = wait_for_result(&mut s);
        assert_eq!(first.identity(), Some("alice"));
        assert_eq!(s.current(), Some(&first));

        // Stale result stays visible while the next request is in flight.
        s.maybe_submit(&frame, 2);
        assert!(s.poll().is_none());
        assert_eq!(s.current().and_then(|r| r.identity()), Some("alice"));

        release.send(()).unwrap();
        wait_for_result(&mut s);
        assert_eq!(s.current().and_then(|r| r.identity()), Some("bob"));
    }

    #[test]
    fn test_failure_degrades_keeping_previous_emotion() {
        let gateway = FnGateway::new(|call| {
            if call == 0 {
                Ok(InferenceResult::new(Some("alice".into()), "surprise", 0.9))
            } else {
                Err(analyzer_failure())
            }
        });
        let mut s = InferenceScheduler::spawn(gateway, 1, 320).unwrap();
        let frame = gray_frame(32, 24, 0);

        s.maybe_submit(&frame, 1);
        wait_for_result(&mut s);

        s.maybe_submit(&frame, 2);
        let degraded = wait_for_result(&mut s);
        assert_eq!(degraded.identity(), None);
        assert_eq!(degraded.emotion, "surprise");
        assert_eq!(degraded.confidence, 0.0);
        assert_eq!(s.current(), Some(&degraded));
    }

    #[test]
    fn test_first_failure_uses_unknown_emotion() {
        let gateway = FnGateway::new(|_| Err(analyzer_failure()));
        let mut s = InferenceScheduler::spawn(gateway, 1, 320).unwrap();
        s.maybe_submit(&gray_frame(32, 24, 0), 1);
        let r = wait_for_result(&mut s);
        assert_eq!(r.emotion, EMOTION_UNKNOWN);
        assert_eq!(r.identity(), None);
    }

    #[test]
    fn test_panicking_gateway_is_contained() {
        let gateway = FnGateway::new(|call| {
            if call == 0 {
                panic!("model exploded");
            }
            Ok(seen("carol", 0.7))
        });
        let mut s = InferenceScheduler::spawn(gateway, 1, 320).unwrap();
        let frame = gray_frame(32, 24, 0);

        s.maybe_submit(&frame, 1);
        let r = wait_for_result(&mut s);
        assert_eq!(r.identity(), None);

        // Worker survives and serves the next tick.
        assert!(s.maybe_submit(&frame, 2));
        assert_eq!(wait_for_result(&mut s).identity(), Some("carol"));
    }

    #[test]
    fn test_submitted_image_is_downsampled() {
        let gateway = FnGateway::new(|_| Ok(seen("alice", 0.9)));
        let widths = gateway.widths.clone();
        let mut s = InferenceScheduler::spawn(gateway, 1, 160).unwrap();

        s.maybe_submit(&gray_frame(640, 480, 0), 1);
        wait_for_result(&mut s);
        assert_eq!(widths.lock().unwrap().as_slice(), &[160]);
    }

    #[test]
    fn test_shutdown_does_not_hang_on_stuck_inference() {
        let (gateway, _release) = FnGateway::gated(|_| Ok(seen("alice", 0.9)));
        let mut s = InferenceScheduler::spawn(gateway, 1, 320).unwrap();
        s.maybe_submit(&gray_frame(32, 24, 0), 1);

        let started = Instant::now();
        s.shutdown(Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!s.is_pending());
        assert!(!s.maybe_submit(&gray_frame(32, 24, 0), 2));
    }

    #[test]
    fn test_shutdown_joins_idle_worker() {
        let gateway = FnGateway::new(|_| Ok(seen("alice", 0.9)));
        let mut s = InferenceScheduler::spawn(gateway, 1, 320).unwrap();
        s.shutdown(Duration::from_secs(2));
        assert!(s.worker.is_none());
    }
}
