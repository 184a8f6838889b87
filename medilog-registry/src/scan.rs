//! Cancellable QR scan session
//!
//! Continuous capture/decode loop over a live frame source. The loop stops
//! permanently on the first successful decode (at most one decode per
//! session) and on explicit close, and the capture device is released on
//! every exit path — success, cancellation, and drop — exactly once.

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

/// Default capture rate, matching typical handheld scanning
pub const DEFAULT_FRAMES_PER_SECOND: u32 = 10;

/// One captured camera frame (luminance plane)
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
}

/// A live camera/video capture device.
///
/// `next_frame` returns `None` when no frame is ready this tick (device
/// warming up, duplicate frame); the loop simply tries again at the next
/// tick. `release` is invoked exactly once by the session when the loop
/// exits, whatever the exit path.
pub trait FrameSource: Send + 'static {
    fn next_frame(&mut self) -> Option<Frame>;
    fn release(&mut self);
}

/// Decodes a QR token out of a frame, if one is visible
pub trait TokenDetector: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> Option<String>;
}

/// Releases the capture device when the scan task ends for any reason,
/// including the task being dropped mid-flight.
struct DeviceGuard<S: FrameSource>(S);

impl<S: FrameSource> Drop for DeviceGuard<S> {
    fn drop(&mut self) {
        self.0.release();
        debug!("Capture device released");
    }
}

/// A running scan session
pub struct ScanSession {
    cancel: watch::Sender<bool>,
    outcome: oneshot::Receiver<Option<String>>,
    task: Option<JoinHandle<()>>,
}

impl ScanSession {
    /// Start the capture/decode loop at the default frame rate
    pub fn start<S, D>(source: S, detector: D) -> Self
    where
        S: FrameSource,
        D: TokenDetector,
    {
        Self::start_at(source, detector, DEFAULT_FRAMES_PER_SECOND)
    }

    /// Start the capture/decode loop at `frames_per_second`
    pub fn start_at<S, D>(source: S, mut detector: D, frames_per_second: u32) -> Self
    where
        S: FrameSource,
        D: TokenDetector,
    {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let period = Duration::from_millis(1000 / u64::from(frames_per_second.max(1)));

        let task = tokio::spawn(async move {
            let mut device = DeviceGuard(source);
            let mut outcome_tx = Some(outcome_tx);
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => {
                        // Explicit close (or the session handle vanished)
                        if let Some(tx) = outcome_tx.take() {
                            let _ = tx.send(None);
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(frame) = device.0.next_frame() else {
                            continue;
                        };
                        if let Some(token) = detector.detect(&frame) {
                            info!("Scan session decoded a token");
                            if let Some(tx) = outcome_tx.take() {
                                let _ = tx.send(Some(token));
                            }
                            // At most one decode per session: the loop ends here
                            break;
                        }
                    }
                }
            }
            // DeviceGuard drops here, releasing the device on every exit path
        });

        Self {
            cancel: cancel_tx,
            outcome: outcome_rx,
            task: Some(task),
        }
    }

    /// Wait for the session to finish.
    ///
    /// Resolves with the decoded token, or `None` if the session was closed
    /// before a token was seen. The device has been released by the time this
    /// returns.
    pub async fn wait(mut self) -> Option<String> {
        let result = (&mut self.outcome).await.unwrap_or(None);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        result
    }

    /// Cancel the session. Returns only after the loop has stopped and the
    /// device has been released.
    pub async fn close(mut self) {
        let _ = self.cancel.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Scan session closed");
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        // Dropping without close/wait still tears the loop down; aborting the
        // task drops the DeviceGuard, which releases the device.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Frame source backed by a script of frames; counts release calls
    struct ScriptedSource {
        frames: Vec<Option<Frame>>,
        cursor: usize,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Option<Frame>>, releases: Arc<AtomicUsize>) -> Self {
            Self {
                frames,
                cursor: 0,
                releases,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Option<Frame> {
            let frame = self.frames.get(self.cursor).cloned().flatten();
            self.cursor += 1;
            frame
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Detector that fires once a marker byte shows up in the frame
    struct MarkerDetector {
        token: String,
    }

    impl TokenDetector for MarkerDetector {
        fn detect(&mut self, frame: &Frame) -> Option<String> {
            if frame.luma.first() == Some(&0xFF) {
                Some(self.token.clone())
            } else {
                None
            }
        }
    }

    fn blank_frame() -> Frame {
        Frame {
            width: 2,
            height: 2,
            luma: vec![0x00; 4],
        }
    }

    fn marked_frame() -> Frame {
        Frame {
            width: 2,
            height: 2,
            luma: vec![0xFF, 0x00, 0x00, 0x00],
        }
    }

    #[tokio::test]
    async fn test_decode_stops_loop_and_releases_device() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(
            vec![Some(blank_frame()), None, Some(marked_frame())],
            Arc::clone(&releases),
        );
        let detector = MarkerDetector {
            token: "medilog://clinic/c1/asset/a1".to_string(),
        };

        let session = ScanSession::start_at(source, detector, 200);
        let token = session.wait().await;

        assert_eq!(token.as_deref(), Some("medilog://clinic/c1/asset/a1"));
        assert_eq!(releases.load(Ordering::SeqCst), 1, "released exactly once");
    }

    #[tokio::test]
    async fn test_close_cancels_and_releases_device() {
        let releases = Arc::new(AtomicUsize::new(0));
        // Endless blank frames: the loop would run forever without close
        let source = ScriptedSource::new(vec![Some(blank_frame()); 10_000], Arc::clone(&releases));
        let detector = MarkerDetector {
            token: "unused".to_string(),
        };

        let session = ScanSession::start_at(source, detector, 200);
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close().await;

        // close() returns only after the device is back
        assert_eq!(releases.load(Ordering::SeqCst), 1, "released exactly once");
    }

    #[tokio::test]
    async fn test_drop_releases_device() {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = ScriptedSource::new(vec![Some(blank_frame()); 10_000], Arc::clone(&releases));
        let detector = MarkerDetector {
            token: "unused".to_string(),
        };

        let session = ScanSession::start_at(source, detector, 200);
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(session);

        // Drop aborts the loop; give the runtime a beat to unwind it
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(releases.load(Ordering::SeqCst), 1, "released exactly once");
    }

    #[tokio::test]
    async fn test_at_most_one_decode_per_session() {
        let releases = Arc::new(AtomicUsize::new(0));
        // Every frame after the first would also decode; the loop must have
        // stopped after the first match
        let source = ScriptedSource::new(vec![Some(marked_frame()); 50], Arc::clone(&releases));
        let detector = MarkerDetector {
            token: "token".to_string(),
        };

        let session = ScanSession::start_at(source, detector, 200);
        let token = session.wait().await;

        assert_eq!(token.as_deref(), Some("token"));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
