// src/pipeline/stream.rs
//
// Push-style driver: the session runs as a tokio task and publishes
// snapshots into a bounded channel. A consumer that stops pulling stalls
// the task on `send`, which stalls frame reading; nothing piles up.
//
// Frame reads and detector calls run on the blocking pool, so a source
// that blocks (stdin, a live feed) never holds a runtime worker. Detector
// calls may be bounded by a timeout; a stalled detector ends the session
// (no retry). Closing or dropping the stream cancels the session, even
// while a read is pending, and releases the frame source. A source stuck
// inside a read is released once that read returns.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::collaborator::{Detector, FrameSource};
use super::metrics::SessionMetrics;
use super::session::{EndReason, SessionCore, SessionSummary};
use super::snapshot::CountingState;
use crate::error::SessionError;
use crate::types::{SessionConfig, StreamConfig};

/// Consumer end of a running session.
pub struct SnapshotStream {
    rx: mpsc::Receiver<CountingState>,
    task: JoinHandle<SessionSummary>,
    metrics: SessionMetrics,
}

impl SnapshotStream {
    /// Next snapshot, `None` after the terminal one (or after cancellation).
    pub async fn next(&mut self) -> Option<CountingState> {
        self.rx.recv().await
    }

    /// Stop the session. Snapshots already buffered can still be drained.
    pub fn cancel(&mut self) {
        self.rx.close();
    }

    pub fn metrics(&self) -> SessionMetrics {
        self.metrics.clone()
    }

    /// Drain whatever is left and wait for the session task.
    pub async fn finish(mut self) -> Result<SessionSummary> {
        while self.rx.recv().await.is_some() {}
        self.task
            .await
            .map_err(|e| anyhow!("counting session task failed: {}", e))
    }
}

/// Validate configuration, then start counting on the current tokio runtime.
pub fn spawn_session<Src, Det>(
    config: &SessionConfig,
    stream: &StreamConfig,
    source: Src,
    detector: Det,
) -> Result<SnapshotStream, SessionError>
where
    Src: FrameSource + Send + 'static,
    Src::Frame: Send + 'static,
    Det: Detector<Src::Frame> + Send + 'static,
{
    config.validate()?;
    stream.validate()?;

    let core = SessionCore::new(config, source.total_frames());
    let metrics = core.metrics();
    let (tx, rx) = mpsc::channel(stream.channel_capacity);
    let timeout = stream.detector_timeout();

    debug!(
        "Spawning session (channel capacity {}, detector timeout {:?})",
        stream.channel_capacity, timeout
    );
    let task = tokio::spawn(run_session(core, source, detector, tx, timeout));

    Ok(SnapshotStream { rx, task, metrics })
}

async fn run_session<Src, Det>(
    mut core: SessionCore,
    source: Src,
    mut detector: Det,
    tx: mpsc::Sender<CountingState>,
    timeout: Option<Duration>,
) -> SessionSummary
where
    Src: FrameSource + Send + 'static,
    Src::Frame: Send + 'static,
    Det: Detector<Src::Frame> + Send + 'static,
{
    let mut source = Some(source);

    let reason = loop {
        if tx.is_closed() {
            break EndReason::Cancelled;
        }
        let Some(mut reader) = source.take() else {
            break EndReason::SourceFailed;
        };

        let read = tokio::task::spawn_blocking(move || {
            let result = reader.read_frame();
            (reader, result)
        });
        let (reader, result) = tokio::select! {
            joined = read => match joined {
                Ok(pair) => pair,
                Err(e) => {
                    error!("Frame reader aborted: {}", e);
                    break EndReason::SourceFailed;
                }
            },
            _ = tx.closed() => {
                debug!("Consumer closed while a frame read was pending");
                break EndReason::Cancelled;
            }
        };
        source = Some(reader);

        let frame = match result {
            Ok(Some(frame)) => frame,
            Ok(None) => break EndReason::Exhausted,
            Err(e) => {
                error!("Frame source failed: {:#}", e);
                break EndReason::SourceFailed;
            }
        };

        let decision = core.on_frame_read();
        if !decision.forward {
            continue;
        }

        let confidence = core.confidence_threshold();
        let started = Instant::now();
        let job = tokio::task::spawn_blocking(move || {
            let result = detector.detect(&frame, confidence);
            (detector, result)
        });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, job).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        "Detector stalled on frame {} (> {:?}), ending session",
                        decision.index, limit
                    );
                    break EndReason::DetectorTimeout;
                }
            },
            None => job.await,
        };

        let (returned, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                error!("Detector worker aborted on frame {}: {}", decision.index, e);
                break EndReason::DetectorAborted;
            }
        };
        detector = returned;
        core.record_detector_time(started.elapsed());

        let snapshot = core.apply(result);
        if tx.send(snapshot).await.is_err() {
            break EndReason::Cancelled;
        }
    };

    // Release decoder/file handles before the consumer sees the end
    drop(source);

    let final_state = core.final_snapshot(reason);
    if reason == EndReason::Cancelled {
        info!("Consumer went away; last emitted snapshot stands");
    } else if tx.send(final_state).await.is_err() {
        debug!("Consumer closed before the final snapshot");
    }

    core.summary(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Line, Point};
    use crate::pipeline::collaborator::{FnDetector, VecSource};
    use crate::types::{BoundingBox, DetectedObject};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    type Batch = Vec<DetectedObject>;

    fn config(stride: u32) -> SessionConfig {
        let mut cfg = SessionConfig::new(
            Line::new(Point::new(5, 218), Point::new(856, 204)),
            vec!["car".to_string()],
        );
        cfg.frame_stride = stride;
        cfg
    }

    fn car(track_id: i64, cx: i32, cy: i32) -> DetectedObject {
        DetectedObject::new(
            Some(track_id),
            "car",
            BoundingBox::new(cx - 8, cy - 8, cx + 8, cy + 8),
        )
    }

    fn passthrough() -> FnDetector<impl FnMut(&Batch, Option<f32>) -> Result<Batch> + Send + 'static> {
        FnDetector(|frame: &Batch, _conf: Option<f32>| -> Result<Batch> { Ok(frame.clone()) })
    }

    struct DropFlagSource {
        inner: VecSource<Batch>,
        dropped: Arc<AtomicBool>,
    }

    impl FrameSource for DropFlagSource {
        type Frame = Batch;

        fn total_frames(&self) -> Option<u64> {
            self.inner.total_frames()
        }

        fn read_frame(&mut self) -> Result<Option<Batch>> {
            self.inner.read_frame()
        }
    }

    impl Drop for DropFlagSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    async fn collect(mut stream: SnapshotStream) -> (Vec<CountingState>, SessionSummary) {
        let mut snapshots = Vec::new();
        while let Some(s) = stream.next().await {
            snapshots.push(s);
        }
        let summary = stream.finish().await.unwrap();
        (snapshots, summary)
    }

    #[tokio::test]
    async fn test_stream_runs_to_completion() {
        let frames = vec![
            vec![car(7, 100, 250)],
            Vec::new(),
            Vec::new(),
            vec![car(7, 100, 150)],
            Vec::new(),
            Vec::new(),
            vec![car(7, 100, 140)],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        ];
        let stream = spawn_session(
            &config(3),
            &StreamConfig::default(),
            VecSource::new(frames),
            passthrough(),
        )
        .unwrap();

        let (snapshots, summary) = collect(stream).await;
        let frames: Vec<u64> = snapshots.iter().map(|s| s.current_frame).collect();
        assert_eq!(frames, vec![0, 3, 6, 9, 9]);
        assert_eq!(snapshots.iter().filter(|s| s.ended).count(), 1);

        let last = snapshots.last().unwrap();
        assert!(last.ended);
        assert_eq!((last.in_count, last.out_count), (0, 1));
        assert!(last.ran_to_completion());
        assert_eq!(summary.end_reason, EndReason::Exhausted);
        assert_eq!(summary.final_state, *last);
    }

    #[tokio::test]
    async fn test_slow_consumer_applies_backpressure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let detector = FnDetector(move |_frame: &Batch, _conf: Option<f32>| -> Result<Batch> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        });

        let mut stream = spawn_session(
            &config(1),
            &StreamConfig::default(),
            VecSource::new(vec![Vec::new(); 50]),
            detector,
        )
        .unwrap();

        // Nobody pulls: the session must park once the channel is full
        tokio::time::sleep(Duration::from_millis(100)).await;
        let parked_at = calls.load(Ordering::SeqCst);
        assert!(parked_at <= 3, "detector ran {} times without a consumer", parked_at);

        let mut received = 0;
        while let Some(s) = stream.next().await {
            received += 1;
            if s.ended {
                break;
            }
        }
        assert_eq!(received, 51);
        assert_eq!(calls.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_cancel_stops_reading_and_releases_source() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = DropFlagSource {
            inner: VecSource::new(vec![Vec::new(); 500]),
            dropped: dropped.clone(),
        };
        let mut stream =
            spawn_session(&config(1), &StreamConfig::default(), source, passthrough()).unwrap();

        let first = stream.next().await.unwrap();
        assert!(!first.ended);
        stream.cancel();

        let summary = stream.finish().await.unwrap();
        assert_eq!(summary.end_reason, EndReason::Cancelled);
        assert!(summary.metrics.frames_read < 500);
        assert!(wait_for(&dropped).await);
    }

    /// The flag may be set from a blocking-pool thread that finishes a read
    /// after the session task has already returned.
    async fn wait_for(flag: &AtomicBool) -> bool {
        for _ in 0..100 {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Live feed whose reads block until the next frame is pushed.
    struct BlockingSource {
        frames: std::sync::mpsc::Receiver<Batch>,
        dropped: Arc<AtomicBool>,
    }

    impl FrameSource for BlockingSource {
        type Frame = Batch;

        fn total_frames(&self) -> Option<u64> {
            None
        }

        fn read_frame(&mut self) -> Result<Option<Batch>> {
            Ok(self.frames.recv().ok())
        }
    }

    impl Drop for BlockingSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_cancel_while_source_blocks() {
        let (feed, frames) = std::sync::mpsc::channel();
        let dropped = Arc::new(AtomicBool::new(false));
        let source = BlockingSource {
            frames,
            dropped: dropped.clone(),
        };
        feed.send(vec![car(1, 100, 250)]).unwrap();

        let mut stream =
            spawn_session(&config(1), &StreamConfig::default(), source, passthrough()).unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.current_frame, 0);

        // Nothing else arrives on the feed; cancellation must not wait for it
        stream.cancel();
        let summary = tokio::time::timeout(Duration::from_secs(2), stream.finish())
            .await
            .expect("session stayed parked on a blocked read")
            .unwrap();
        assert_eq!(summary.end_reason, EndReason::Cancelled);
        assert_eq!(summary.metrics.frames_read, 1);

        // Closing the feed unblocks the pending read, which releases the source
        drop(feed);
        assert!(wait_for(&dropped).await);
    }

    #[tokio::test]
    async fn test_blocked_source_does_not_starve_runtime() {
        let (feed, frames) = std::sync::mpsc::channel::<Batch>();
        let source = BlockingSource {
            frames,
            dropped: Arc::new(AtomicBool::new(false)),
        };
        let mut stream =
            spawn_session(&config(1), &StreamConfig::default(), source, passthrough()).unwrap();

        // Single-threaded test runtime: this timer only fires if the session
        // task is not holding the only worker inside read_frame
        let waited = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(waited.is_err());

        feed.send(Vec::new()).unwrap();
        drop(feed);
        let (rest, summary) = collect(stream).await;
        assert_eq!(rest.len(), 2);
        assert_eq!(summary.end_reason, EndReason::Exhausted);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_session() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = DropFlagSource {
            inner: VecSource::new(vec![Vec::new(); 500]),
            dropped: dropped.clone(),
        };
        let mut stream =
            spawn_session(&config(1), &StreamConfig::default(), source, passthrough()).unwrap();
        let metrics = stream.metrics();
        stream.next().await.unwrap();
        drop(stream);

        assert!(wait_for(&dropped).await);
        assert!(metrics.summary().frames_read < 500);
    }

    #[tokio::test]
    async fn test_detector_timeout_ends_session() {
        let mut calls = 0;
        let detector = FnDetector(move |frame: &Batch, _conf: Option<f32>| -> Result<Batch> {
            calls += 1;
            if calls == 3 {
                std::thread::sleep(Duration::from_millis(300));
            }
            Ok(frame.clone())
        });
        let stream_cfg = StreamConfig {
            channel_capacity: 4,
            detector_timeout_ms: Some(50),
        };
        let frames = vec![
            vec![car(1, 100, 250)],
            vec![car(1, 100, 150)],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        ];
        let stream =
            spawn_session(&config(1), &stream_cfg, VecSource::new(frames), detector).unwrap();

        let (snapshots, summary) = collect(stream).await;
        assert_eq!(summary.end_reason, EndReason::DetectorTimeout);
        assert_eq!(snapshots.len(), 3);

        let last = snapshots.last().unwrap();
        assert!(last.ended);
        assert_eq!(last.out_count, 1);
        assert_eq!(last.current_frame, 2);
        assert!(!last.ran_to_completion());
    }

    #[tokio::test]
    async fn test_detector_errors_do_not_interrupt_stream() {
        let mut calls = 0;
        let detector = FnDetector(move |_frame: &Batch, _conf: Option<f32>| -> Result<Batch> {
            calls += 1;
            if calls % 2 == 0 {
                Err(anyhow!("malformed tracker output"))
            } else {
                Ok(Vec::new())
            }
        });
        let stream = spawn_session(
            &config(1),
            &StreamConfig::default(),
            VecSource::new(vec![Vec::new(); 6]),
            detector,
        )
        .unwrap();

        let (snapshots, summary) = collect(stream).await;
        assert_eq!(snapshots.len(), 7);
        assert_eq!(summary.metrics.detector_failures, 3);
        assert_eq!(summary.end_reason, EndReason::Exhausted);
    }

    #[tokio::test]
    async fn test_invalid_stream_config_rejected() {
        let stream_cfg = StreamConfig {
            channel_capacity: 0,
            detector_timeout_ms: None,
        };
        let result = spawn_session(
            &config(1),
            &stream_cfg,
            VecSource::new(vec![Vec::<DetectedObject>::new(); 2]),
            passthrough(),
        );
        assert!(matches!(result, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn test_parallel_sessions_do_not_share_counts() {
        let crossing = vec![vec![car(7, 100, 250)], vec![car(7, 100, 150)]];
        let idle = vec![vec![car(7, 100, 250)], vec![car(7, 100, 240)]];

        let a = spawn_session(&config(1), &StreamConfig::default(), VecSource::new(crossing), passthrough())
            .unwrap();
        let b = spawn_session(&config(1), &StreamConfig::default(), VecSource::new(idle), passthrough())
            .unwrap();

        let ((_, sa), (_, sb)) = tokio::join!(collect(a), collect(b));
        assert_eq!(sa.final_state.out_count, 1);
        assert_eq!(sb.final_state.total(), 0);
    }
}
