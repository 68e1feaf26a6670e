//! The producer side: one explicit context that turns captured frames into
//! published, annotated JPEGs.
//!
//! Every stage returns a fresh value (mask, result, annotated frame, encoded
//! frame), so each can be driven on its own in tests. `Pipeline` only wires
//! them together and owns the state that must persist between frames: the
//! background model and the last reported status.

pub mod annotate;
pub mod background;
pub mod broadcast;
pub mod detector;
pub mod encoder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, error, info, warn};

pub use background::ForegroundMask;

use crate::actuator::{Indicator, NoopIndicator};
use crate::capture::decoder::decode_frame;
use crate::capture::{Frame, FrameSource};
use crate::error::{CaptureError, Error, Result};
use crate::Config;
use annotate::Annotator;
use background::BackgroundModel;
use broadcast::Broadcaster;
use detector::{MotionDetector, MotionResult, MotionStatus};
use encoder::Encoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Built, source not yet being read
    Idle,
    Capturing,
    /// Terminal, after a capture failure or a stop request
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub processed: u64,
    pub skipped_empty: u64,
    pub dropped_decode: u64,
    pub dropped_encode: u64,
    pub published: u64,
    pub motion_frames: u64,
}

pub struct Pipeline {
    background: BackgroundModel,
    detector: MotionDetector,
    annotator: Annotator,
    encoder: Encoder,
    indicator: Box<dyn Indicator>,
    broadcaster: Arc<Broadcaster>,
    state: PipelineState,
    last_status: MotionStatus,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(config: &Config, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            background: BackgroundModel::new(config.background.clone()),
            detector: MotionDetector::new(config.detection.clone()),
            annotator: Annotator::new(config.annotate.clone()),
            encoder: Encoder::new(config.encoder.quality),
            indicator: Box::new(NoopIndicator),
            broadcaster,
            state: PipelineState::Idle,
            last_status: MotionStatus::Ready,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_indicator(mut self, indicator: Box<dyn Indicator>) -> Self {
        self.indicator = indicator;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// One pass over one captured frame.
    ///
    /// Returns the detection result, or `None` when the frame was empty or
    /// could not be decoded. Encode failures drop the frame but still return
    /// the result, since the model has already learned from it.
    pub fn process(&mut self, frame: &Frame) -> Option<MotionResult> {
        if frame.is_empty() {
            self.stats.skipped_empty += 1;
            metrics::counter!("frames_skipped_empty").increment(1);
            return None;
        }

        let start = Instant::now();
        let decoded = match decode_frame(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping frame {}: {}", frame.sequence(), e);
                self.stats.dropped_decode += 1;
                metrics::counter!("frames_dropped_decode").increment(1);
                return None;
            }
        };

        let mask = self.background.apply(&decoded);
        let result = self.detector.detect(&mask);

        if result.status != self.last_status {
            info!(
                "Frame {}: {} ({} regions)",
                frame.sequence(),
                result.status.label(),
                result.regions.len()
            );
            self.indicator.signal(result.status);
            self.last_status = result.status;
        }
        if result.is_motion() {
            self.stats.motion_frames += 1;
            metrics::counter!("motion_frames").increment(1);
        }

        let annotated = self.annotator.annotate(&decoded, &result);
        match self.encoder.encode(&annotated) {
            Ok(encoded) => {
                if self.broadcaster.publish(encoded) {
                    self.stats.published += 1;
                    metrics::counter!("frames_published").increment(1);
                }
            }
            Err(e) => {
                warn!("Dropping frame {}: encode failed: {}", frame.sequence(), e);
                self.stats.dropped_encode += 1;
                metrics::counter!("frames_dropped_encode").increment(1);
            }
        }

        self.stats.processed += 1;
        let elapsed = start.elapsed();
        metrics::histogram!("process_time_us").record(elapsed.as_micros() as f64);
        debug!(
            "Frame {} processed in {:?}, {} foreground px",
            frame.sequence(),
            elapsed,
            mask.foreground_pixels()
        );

        Some(result)
    }

    /// Read and process frames until the source fails or `stop` is raised.
    ///
    /// The source must already be open. A read failure is returned as
    /// `Error::CaptureRead`; a stop request returns `Ok`. Either way the
    /// pipeline ends in `Stopped` and the source is closed.
    pub fn run<S: FrameSource + ?Sized>(&mut self, source: &mut S, stop: &AtomicBool) -> Result<()> {
        if self.state == PipelineState::Stopped {
            return Err(Error::CaptureRead("pipeline already stopped".into()));
        }
        self.state = PipelineState::Capturing;
        info!("Capturing from {}", source.describe());

        let outcome = loop {
            if stop.load(Ordering::Acquire) {
                info!("Stop requested");
                break Ok(());
            }

            match source.read() {
                Ok(frame) => {
                    metrics::counter!("frames_captured").increment(1);
                    self.process(&frame);
                }
                Err(CaptureError::EmptyFrame) => {
                    self.stats.skipped_empty += 1;
                    metrics::counter!("frames_skipped_empty").increment(1);
                }
                Err(e) => {
                    error!("Capture from {} failed: {}", source.describe(), e);
                    break Err(Error::from(e));
                }
            }
        };

        source.close();
        if self.last_status == MotionStatus::MotionDetected {
            self.indicator.signal(MotionStatus::Ready);
            self.last_status = MotionStatus::Ready;
        }
        self.state = PipelineState::Stopped;
        info!("Pipeline stopped: {:?}", self.stats);

        outcome
    }
}

/// Run the pipeline on its own OS thread, pinned to `pin_core` when given
pub fn spawn_producer<S>(
    mut pipeline: Pipeline,
    mut source: S,
    stop: Arc<AtomicBool>,
    pin_core: Option<usize>,
) -> std::io::Result<JoinHandle<Result<PipelineStats>>>
where
    S: FrameSource + 'static,
{
    std::thread::Builder::new()
        .name("producer".into())
        .spawn(move || {
            if let Some(core) = pin_core {
                pin_current_thread(core);
            }
            let outcome = pipeline.run(&mut source, &stop);
            outcome.map(|()| pipeline.stats())
        })
}

fn pin_current_thread(core: usize) {
    let target = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|id| id.id == core));
    match target {
        Some(id) if core_affinity::set_for_current(id) => info!("Producer pinned to core {}", core),
        _ => warn!("Cannot pin producer to core {}", core),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat, ReplaySource};
    use std::sync::Mutex;

    const W: u32 = 160;
    const H: u32 = 120;

    fn gray_frame(sequence: u64, block: bool) -> Frame {
        let mut data = Vec::with_capacity((W * H * 3) as usize);
        for y in 0..H {
            for x in 0..W {
                let inside = block && (30..100).contains(&x) && (20..90).contains(&y);
                let v = if inside { 240 } else { ((x + y) % 80 + 40) as u8 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Frame::new(data, FrameMetadata::packed(sequence, W, H, PixelFormat::Rgb24))
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<MotionStatus>>>);

    impl Indicator for Recorder {
        fn signal(&mut self, status: MotionStatus) {
            self.0.lock().unwrap().push(status);
        }
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(&Config::default(), Arc::new(Broadcaster::new()))
    }

    #[test]
    fn test_process_publishes_annotated_jpeg() {
        let mut pipeline = pipeline();
        let result = pipeline.process(&gray_frame(1, false)).unwrap();
        assert_eq!(result.status, MotionStatus::Ready);

        let latest = pipeline.broadcaster().latest().unwrap();
        assert_eq!(latest.sequence, 1);
        assert_eq!(&latest.data[..2], &[0xFF, 0xD8]);
        assert_eq!(pipeline.stats().published, 1);
    }

    #[test]
    fn test_indicator_only_on_transitions() {
        let recorder = Recorder::default();
        let mut pipeline = pipeline().with_indicator(Box::new(recorder.clone()));

        let mut seq = 0;
        let mut feed = |pipeline: &mut Pipeline, block: bool, n: usize| {
            for _ in 0..n {
                seq += 1;
                pipeline.process(&gray_frame(seq, block));
            }
        };
        feed(&mut pipeline, false, 10);
        feed(&mut pipeline, true, 4);
        feed(&mut pipeline, false, 5);

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![MotionStatus::MotionDetected, MotionStatus::Ready]
        );
        assert_eq!(pipeline.stats().motion_frames, 4);
    }

    #[test]
    fn test_corrupt_frame_is_dropped() {
        let mut pipeline = pipeline();
        let corrupt = Frame::new(
            vec![0xFF, 0xD8, 0x00, 0x01, 0x02],
            FrameMetadata::packed(1, W, H, PixelFormat::Mjpeg),
        );
        assert!(pipeline.process(&corrupt).is_none());
        assert!(pipeline.process(&gray_frame(2, false)).is_some());

        let stats = pipeline.stats();
        assert_eq!((stats.dropped_decode, stats.processed), (1, 1));
        assert_eq!(pipeline.broadcaster().latest().unwrap().sequence, 2);
    }

    #[test]
    fn test_run_skips_empty_and_stops_on_read_failure() {
        let empty = Frame::new(Vec::new(), FrameMetadata::packed(2, W, H, PixelFormat::Rgb24));
        let mut source = ReplaySource::new(vec![gray_frame(1, false), empty, gray_frame(3, false)]);
        let mut pipeline = pipeline();
        assert_eq!(pipeline.state(), PipelineState::Idle);

        let outcome = pipeline.run(&mut source, &AtomicBool::new(false));
        assert!(matches!(outcome, Err(Error::CaptureRead(_))));
        assert_eq!(pipeline.state(), PipelineState::Stopped);

        let stats = pipeline.stats();
        assert_eq!((stats.processed, stats.skipped_empty, stats.published), (2, 1, 2));
    }

    #[test]
    fn test_stop_flag_ends_run_cleanly() {
        let mut source = ReplaySource::new((1..=5).map(|seq| gray_frame(seq, false)));
        let mut pipeline = pipeline();
        assert!(pipeline.run(&mut source, &AtomicBool::new(true)).is_ok());
        assert_eq!(pipeline.state(), PipelineState::Stopped);
        assert_eq!(pipeline.stats().processed, 0);
        // Closing the replay source discards what was queued
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_indicator_cleared_when_stopping_mid_motion() {
        let recorder = Recorder::default();
        let mut pipeline = pipeline().with_indicator(Box::new(recorder.clone()));
        let frames = (1..=5).map(|seq| gray_frame(seq, seq == 5));
        let _ = pipeline.run(&mut ReplaySource::new(frames), &AtomicBool::new(false));

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![MotionStatus::MotionDetected, MotionStatus::Ready]
        );
    }

    #[test]
    fn test_producer_thread_reports_failure() {
        let source = ReplaySource::new((1..=3).map(|seq| gray_frame(seq, false)));
        let broadcaster = Arc::new(Broadcaster::new());
        let pipeline = Pipeline::new(&Config::default(), broadcaster.clone());

        let handle = spawn_producer(pipeline, source, Arc::new(AtomicBool::new(false)), None).unwrap();
        assert_eq!(handle.thread().name(), Some("producer"));
        assert!(handle.join().unwrap().is_err());
        assert_eq!(broadcaster.latest().unwrap().sequence, 3);
    }
}
