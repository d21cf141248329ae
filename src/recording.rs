//! # Recording
//!
//! Raw frames are handed from capture to a bounded queue and written by a
//! dedicated worker. Capture never waits on disk: when the queue is full the
//! oldest frame is dropped.
//!
//! The default sink stores frames as `u32` little-endian length prefixes
//! followed by the frame bytes. Encoding to a video container is left to
//! downstream tools.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConsoleError, Result};

/// Default queue capacity in frames
pub const DEFAULT_QUEUE_CAPACITY: usize = 30;

#[derive(Debug)]
struct QueueState {
    frames: VecDeque<Bytes>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
struct QueueShared {
    state: Mutex<QueueState>,
    ready: Notify,
    capacity: usize,
}

/// Bounded drop-oldest frame queue
///
/// Cloning hands out another handle to the same queue.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    shared: Arc<QueueShared>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    frames: VecDeque::with_capacity(capacity),
                    closed: false,
                    dropped: 0,
                }),
                ready: Notify::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.shared.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Enqueue a frame without waiting
    ///
    /// # Returns
    ///
    /// `false` if the queue is closed and the frame was discarded
    pub fn push(&self, frame: Bytes) -> bool {
        {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            if state.frames.len() >= self.shared.capacity {
                state.frames.pop_front();
                state.dropped += 1;
            }
            state.frames.push_back(frame);
        }
        self.shared.ready.notify_one();
        true
    }

    /// Wait for the next frame
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            {
                let mut state = self.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }
            self.shared.ready.notified().await;
        }
    }

    /// Stop accepting frames; queued frames can still be drained
    pub fn close(&self) {
        self.lock().closed = true;
        self.shared.ready.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames discarded because the queue was full
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

/// Destination for recorded frames
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Flush and release the destination
    async fn finish(&mut self) -> Result<()>;
}

/// Length-prefixed raw frame file
pub struct RawFileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    frames: u64,
}

impl RawFileSink {
    /// Create `record_YYYYmmdd_HHMMSS.raw` in `dir`, creating `dir` if needed
    pub async fn create_in(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            ConsoleError::Recording(format!("create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(recording_file_name(chrono::Local::now()));
        Self::create(path).await
    }

    pub async fn create(path: PathBuf) -> Result<Self> {
        let file = File::create(&path).await.map_err(|e| {
            ConsoleError::Recording(format!("create {}: {}", path.display(), e))
        })?;
        info!("Recording to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            frames: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[async_trait]
impl FrameSink for RawFileSink {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let len = u32::try_from(frame.len())
            .map_err(|_| ConsoleError::Recording(format!("frame of {} bytes too large", frame.len())))?;
        self.writer.write_all(&len.to_le_bytes()).await?;
        self.writer.write_all(frame).await?;
        self.frames += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await?;
        info!("Recording {} closed after {} frames", self.path.display(), self.frames);
        Ok(())
    }
}

/// File name for a recording started at `started`
pub fn recording_file_name<Tz: chrono::TimeZone>(started: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("record_{}.raw", started.format("%Y%m%d_%H%M%S"))
}

/// On-screen elapsed time label, e.g. `REC 01:05`
pub fn elapsed_label(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("REC {:02}:{:02}", secs / 60, secs % 60)
}

/// Cut `source` into frames of `frame_bytes` and push them onto `queue`
///
/// Stops at end of stream (a trailing partial frame is discarded), when the
/// queue is closed, or on cancel.
///
/// # Returns
///
/// The number of frames handed to the queue
pub async fn capture<R: AsyncRead + Unpin>(
    mut source: R,
    frame_bytes: usize,
    queue: FrameQueue,
    cancel: CancellationToken,
) -> Result<u64> {
    let mut captured = 0u64;
    loop {
        let mut frame = vec![0u8; frame_bytes];
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = source.read_exact(&mut frame) => read,
        };

        match read {
            Ok(_) => {
                if !queue.push(Bytes::from(frame)) {
                    break;
                }
                captured += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Capture source ended");
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(captured)
}

/// Drain `queue` into `sink` until the queue is closed and empty
///
/// A failed write is logged and the frame skipped.
///
/// # Returns
///
/// The sink, already finished
pub async fn run_recorder<S: FrameSink>(queue: FrameQueue, mut sink: S) -> Result<S> {
    let mut failures = 0u64;
    while let Some(frame) = queue.pop().await {
        if let Err(e) = sink.write_frame(&frame).await {
            failures += 1;
            warn!("Recording write failed: {}", e);
        }
    }
    if failures > 0 {
        warn!("{} frames failed to record", failures);
    }
    debug!("Recorder drained; {} frames dropped on overflow", queue.dropped());
    sink.finish().await?;
    Ok(sink)
}

/// A running recording
pub struct RecordingSession<S: FrameSink + 'static> {
    queue: FrameQueue,
    worker: JoinHandle<Result<S>>,
    started: tokio::time::Instant,
}

impl<S: FrameSink + 'static> RecordingSession<S> {
    /// Start the worker over `sink`
    pub fn start(sink: S, capacity: usize) -> Self {
        let queue = FrameQueue::new(capacity);
        let worker = tokio::spawn(run_recorder(queue.clone(), sink));
        Self {
            queue,
            worker,
            started: tokio::time::Instant::now(),
        }
    }

    /// Handle for the capture side
    pub fn frames(&self) -> FrameQueue {
        self.queue.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Stop recording
    ///
    /// Frame delivery is detached first, then the worker drains what is
    /// already queued and finishes the sink.
    pub async fn stop(self) -> Result<S> {
        self.queue.close();
        self.worker
            .await
            .map_err(|e| ConsoleError::Recording(format!("recorder task failed: {}", e)))?
    }
}

impl RecordingSession<RawFileSink> {
    /// Start recording to a new raw file in `dir`
    pub async fn start_in(dir: &Path, capacity: usize) -> Result<Self> {
        let sink = RawFileSink::create_in(dir).await?;
        Ok(Self::start(sink, capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Default)]
    struct MemorySink {
        frames: Vec<Vec<u8>>,
        finished: bool,
        fail_on: Option<u8>,
    }

    #[async_trait]
    impl FrameSink for MemorySink {
        async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
            if self.fail_on == frame.first().copied() {
                return Err(ConsoleError::Recording("disk full".into()));
            }
            self.frames.push(frame.to_vec());
            Ok(())
        }

        async fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let queue = FrameQueue::new(DEFAULT_QUEUE_CAPACITY);
        for i in 0..35u8 {
            assert!(queue.push(Bytes::from(vec![i])));
        }
        assert_eq!(queue.len(), 30);
        assert_eq!(queue.dropped(), 5);
    }

    #[tokio::test]
    async fn test_queue_keeps_newest_frames() {
        let queue = FrameQueue::new(2);
        queue.push(Bytes::from_static(&[1]));
        queue.push(Bytes::from_static(&[2]));
        queue.push(Bytes::from_static(&[3]));
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(&[2]));
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(&[3]));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_drains() {
        let queue = FrameQueue::new(4);
        queue.push(Bytes::from_static(&[9]));
        queue.close();
        assert!(!queue.push(Bytes::from_static(&[10])));
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(&[9]));
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_session_stop_drains_then_finishes() {
        let session = RecordingSession::start(MemorySink::default(), 8);
        let frames = session.frames();
        for i in 0..5u8 {
            frames.push(Bytes::from(vec![i, i]));
        }

        let sink = session.stop().await.unwrap();
        assert!(sink.finished);
        assert_eq!(sink.frames.len(), 5);
        assert!(!frames.push(Bytes::from_static(&[0xFF])));
    }

    #[tokio::test]
    async fn test_write_failure_skips_frame() {
        let sink = MemorySink {
            fail_on: Some(2),
            ..MemorySink::default()
        };
        let session = RecordingSession::start(sink, 8);
        let frames = session.frames();
        for i in 1..=3u8 {
            frames.push(Bytes::from(vec![i]));
        }

        let sink = session.stop().await.unwrap();
        assert_eq!(sink.frames, vec![vec![1], vec![3]]);
    }

    #[tokio::test]
    async fn test_raw_file_layout() {
        let dir = tempfile::TempDir::new().unwrap();
        let session = RecordingSession::start_in(&dir.path().join("recordings"), 4)
            .await
            .unwrap();
        session.frames().push(Bytes::from_static(b"abc"));

        let sink = session.stop().await.unwrap();
        assert_eq!(sink.frames(), 1);
        let name = sink.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("record_") && name.ends_with(".raw"));

        let bytes = std::fs::read(sink.path()).unwrap();
        assert_eq!(bytes, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_recording_file_name() {
        let started = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(recording_file_name(started), "record_20240309_140507.raw");
    }

    #[test]
    fn test_elapsed_label() {
        assert_eq!(elapsed_label(Duration::from_secs(0)), "REC 00:00");
        assert_eq!(elapsed_label(Duration::from_secs(65)), "REC 01:05");
    }

    #[tokio::test]
    async fn test_capture_cuts_fixed_frames() {
        let queue = FrameQueue::new(8);
        let source: &[u8] = b"aaaabbbbcc";

        let captured = capture(source, 4, queue.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(captured, 2);
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(b"aaaa"));
        assert_eq!(queue.pop().await.unwrap(), Bytes::from_static(b"bbbb"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_capture_stops_on_cancel() {
        let (source, _feed) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(capture(source, 16, FrameQueue::new(4), cancel.clone()));

        cancel.cancel();
        assert_eq!(task.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_capture_into_session_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let session = RecordingSession::start_in(dir.path(), 4).await.unwrap();
        let source: &[u8] = b"0123456789ab";

        capture(source, 6, session.frames(), CancellationToken::new())
            .await
            .unwrap();
        let sink = session.stop().await.unwrap();

        assert_eq!(sink.frames(), 2);
        let bytes = std::fs::read(sink.path()).unwrap();
        assert_eq!(&bytes[..4], &[6, 0, 0, 0]);
        assert_eq!(&bytes[4..10], b"012345");
    }
}
