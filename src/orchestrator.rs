// src/orchestrator.rs
//
// Per-video analysis driver: Initialized → Processing → Finalized.
//
// Owns the frame counter, the track registry and the frame history for
// exactly one video. Frames are consumed strictly in order (the matcher is
// not commutative). Per-frame failures are absorbed and logged; only a
// decode failure or cancellation aborts the run, and an aborted run
// produces no report.
//
// Concurrent videos are separate orchestrator instances — nothing here is
// shared, so no locking. The cancellation flag is the single cross-thread
// surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::analysis::aggregator::{build_report, RoadReport};
use crate::analysis::track_matcher::{MatcherConfig, TrackMatcher};
use crate::error::{AnalysisError, Result};
use crate::frame_quality;
use crate::severity;
use crate::types::{AnalysisConfig, AnnotatedDetection, Detection, Frame, FrameRecord, VideoInfo};

/// Decoded-frame supplier. `next_frame` may block on decode; an error from
/// it is fatal for the video.
pub trait FrameSource {
    fn video_path(&self) -> &str;
    fn fps(&self) -> f64;
    fn total_frames(&self) -> u64;
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>>;
}

/// The external detector collaborator. Treated as a black box that may be
/// slow or fail per frame; a failure costs one frame's detections, never
/// the video.
pub trait DefectDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Optional consumer of annotated frames (e.g. an overlay video writer).
pub trait AnnotatedFrameSink {
    fn write_frame(
        &mut self,
        frame: &Frame,
        annotations: &[(u64, AnnotatedDetection)],
        live_tracks: usize,
    ) -> anyhow::Result<()>;
}

/// Clonable handle to cancel a running analysis between frames.
#[derive(Debug, Clone)]
pub struct CancellationHandle(Arc<AtomicBool>);

impl CancellationHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initialized,
    Processing,
    Finalized,
}

pub struct VideoAnalysisOrchestrator {
    config: AnalysisConfig,
    matcher: TrackMatcher,
    frames: Vec<FrameRecord>,
    /// Index of the last successfully processed frame; -1 before any.
    frame_index: i64,
    phase: Phase,
    cancel: Arc<AtomicBool>,
}

impl VideoAnalysisOrchestrator {
    pub fn new(config: AnalysisConfig) -> Self {
        let matcher = TrackMatcher::new(MatcherConfig {
            tracking_threshold: config.tracking_threshold,
            min_track_length: config.min_track_length,
            patience: config.patience(),
            max_tracks: config.max_tracks,
        });
        Self {
            config,
            matcher,
            frames: Vec::new(),
            frame_index: -1,
            phase: Phase::Initialized,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle(Arc::clone(&self.cancel))
    }

    /// Run the full analysis. Consumes the orchestrator — the registry and
    /// frame history belong to exactly one video.
    pub fn analyze<S, D>(
        mut self,
        source: &mut S,
        detector: &mut D,
        mut sink: Option<&mut dyn AnnotatedFrameSink>,
    ) -> Result<RoadReport>
    where
        S: FrameSource,
        D: DefectDetector,
    {
        assert_eq!(self.phase, Phase::Initialized, "orchestrator is single-use");
        self.phase = Phase::Processing;
        info!(
            "Analyzing '{}' (frame_skip={}, min_track_length={}, tracking_threshold={:.2})",
            source.video_path(),
            self.config.frame_skip,
            self.config.min_track_length,
            self.config.tracking_threshold
        );

        let mut decoded: u64 = 0;
        loop {
            // Cancellation is cooperative, checked once per iteration.
            if self.cancel.load(Ordering::Relaxed) {
                info!(
                    "Analysis of '{}' cancelled after frame {}",
                    source.video_path(),
                    self.frame_index
                );
                return Err(AnalysisError::Cancelled {
                    last_frame: self.frame_index,
                });
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    return Err(AnalysisError::DecodeError {
                        video: source.video_path().to_string(),
                        last_frame: self.frame_index,
                        message: e.to_string(),
                    })
                }
            };

            let frame_index = decoded;
            decoded += 1;

            if frame_index % self.config.frame_skip as u64 != 0 {
                continue;
            }
            if let Some(max) = self.config.max_frames {
                if self.frames.len() as u64 >= max {
                    warn!(
                        "Frame cap of {} reached for '{}', stopping early",
                        max,
                        source.video_path()
                    );
                    break;
                }
            }

            if let Err(e) = self.process_frame(
                frame,
                frame_index,
                detector,
                match sink {
                    Some(ref mut s) => Some(&mut **s),
                    None => None,
                },
            ) {
                // Per-frame problems never abort the video.
                warn!("Frame {} dropped: {}", frame_index, e);
            }
        }

        self.finalize(source)
    }

    fn process_frame<D: DefectDetector>(
        &mut self,
        frame: Frame,
        frame_index: u64,
        detector: &mut D,
        sink: Option<&mut dyn AnnotatedFrameSink>,
    ) -> Result<()> {
        if frame.is_degenerate() {
            return Err(AnalysisError::InvalidFrame(format!(
                "{}x{} frame at index {}",
                frame.width, frame.height, frame_index
            )));
        }

        let quality = if self.config.enable_frame_quality_assessment {
            frame_quality::score_frame(&frame)?
        } else {
            // Neutral: risk scores are not discounted.
            1.0
        };

        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                // One corrupt frame must not discard the whole video.
                warn!(
                    "Detector failed on frame {} ({}); treating as empty",
                    frame_index, e
                );
                Vec::new()
            }
        };

        let mut annotated: Vec<AnnotatedDetection> = Vec::with_capacity(detections.len());
        for result in severity::annotate_frame(&detections, &frame, quality) {
            match result {
                Ok(detection) => annotated.push(detection),
                Err(e) => debug!("Dropping detection on frame {}: {}", frame_index, e),
            }
        }

        let assignments = self.matcher.observe_frame(annotated.clone(), frame_index);
        let matched_track_ids: Vec<u64> = assignments.iter().map(|&(_, id)| id).collect();

        self.frames.push(FrameRecord {
            frame_index,
            quality,
            detection_count: assignments.len(),
            matched_track_ids,
        });
        self.frame_index = frame_index as i64;

        if let Some(sink) = sink {
            let overlay: Vec<(u64, AnnotatedDetection)> = assignments
                .iter()
                .map(|&(di, id)| (id, annotated[di].clone()))
                .collect();
            if let Err(e) = sink.write_frame(&frame, &overlay, self.matcher.live_count()) {
                warn!("Annotated output failed on frame {}: {}", frame_index, e);
            }
        }

        Ok(())
    }

    fn finalize<S: FrameSource>(mut self, source: &S) -> Result<RoadReport> {
        self.phase = Phase::Finalized;

        let fps = source.fps();
        let total_frames = source.total_frames();
        let duration_seconds = if fps > 0.0 {
            total_frames as f64 / fps
        } else {
            0.0
        };

        let video_info = VideoInfo {
            path: source.video_path().to_string(),
            fps,
            total_frames,
            duration_seconds,
            processed_frames: self.frames.len() as u64,
        };

        info!(
            "Finalized '{}': {} frames processed, {} tracks ({} stable)",
            video_info.path,
            video_info.processed_frames,
            self.matcher.tracks().len(),
            self.matcher.stable_count()
        );

        Ok(build_report(
            &self.matcher,
            &self.frames,
            video_info,
            self.config.min_track_length,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::track_matcher::TrackStatus;
    use crate::types::DefectClass;
    use std::collections::{BTreeMap, BTreeSet};

    struct ScriptedSource {
        path: String,
        fps: f64,
        frames: Vec<Option<Frame>>, // None injects a decode error
        cursor: usize,
    }

    impl ScriptedSource {
        fn with_flat_frames(count: usize) -> Self {
            let frames = (0..count)
                .map(|i| {
                    Some(Frame {
                        data: vec![128u8; 64 * 64 * 3],
                        width: 64,
                        height: 64,
                        timestamp_ms: i as f64 * 33.3,
                    })
                })
                .collect();
            Self {
                path: "scripted.mp4".to_string(),
                fps: 30.0,
                frames,
                cursor: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn video_path(&self) -> &str {
            &self.path
        }
        fn fps(&self) -> f64 {
            self.fps
        }
        fn total_frames(&self) -> u64 {
            self.frames.len() as u64
        }
        fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
            if self.cursor >= self.frames.len() {
                return Ok(None);
            }
            let slot = self.frames[self.cursor].take();
            self.cursor += 1;
            match slot {
                Some(frame) => Ok(Some(frame)),
                None => anyhow::bail!("simulated read failure"),
            }
        }
    }

    struct ScriptedDetector {
        script: BTreeMap<u64, Vec<Detection>>,
        fail_on: BTreeSet<u64>,
        calls: u64,
    }

    impl ScriptedDetector {
        fn new(script: BTreeMap<u64, Vec<Detection>>) -> Self {
            Self {
                script,
                fail_on: BTreeSet::new(),
                calls: 0,
            }
        }
    }

    impl DefectDetector for ScriptedDetector {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
            let index = self.calls;
            self.calls += 1;
            if self.fail_on.contains(&index) {
                return Err(AnalysisError::DetectorFailure(anyhow::anyhow!(
                    "simulated model failure"
                )));
            }
            Ok(self.script.get(&index).cloned().unwrap_or_default())
        }
    }

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            bbox: [x1, y1, x2, y2],
            confidence: 0.8,
            class: DefectClass::MediumPothole,
        }
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            // Scenario fixtures assert tracking semantics, not pixel stats.
            enable_frame_quality_assessment: false,
            ..AnalysisConfig::default()
        }
    }

    fn run(
        config: AnalysisConfig,
        source: &mut ScriptedSource,
        detector: &mut ScriptedDetector,
    ) -> Result<RoadReport> {
        VideoAnalysisOrchestrator::new(config).analyze(source, detector, None)
    }

    #[test]
    fn test_scenario_constant_defect_yields_one_stable_track() {
        // One synthetic defect present in frames 0-9 with a constant box.
        let script: BTreeMap<u64, Vec<Detection>> =
            (0..10).map(|f| (f, vec![det(10.0, 10.0, 40.0, 40.0)])).collect();
        let mut source = ScriptedSource::with_flat_frames(10);
        let mut detector = ScriptedDetector::new(script);

        let report = run(config(), &mut source, &mut detector).unwrap();

        assert_eq!(report.tracking_summary.total_tracks, 1);
        assert_eq!(report.tracking_summary.stable_tracks, 1);
        assert_eq!(report.detection_summary.total_detections, 10);
        assert_eq!(report.detection_summary.frames_with_detections, 10);
        let track = &report.tracking_summary.tracks[0];
        assert_eq!(track.status, TrackStatus::Stable);
        assert_eq!(track.observations, 10);
    }

    #[test]
    fn test_scenario_one_shot_detection_retires_as_noise() {
        // A detection appears once (frame 3) and never again.
        let script: BTreeMap<u64, Vec<Detection>> =
            BTreeMap::from([(3, vec![det(10.0, 10.0, 40.0, 40.0)])]);
        let mut source = ScriptedSource::with_flat_frames(10);
        let mut detector = ScriptedDetector::new(script);

        let report = run(config(), &mut source, &mut detector).unwrap();

        assert_eq!(report.tracking_summary.total_tracks, 1);
        assert_eq!(report.tracking_summary.stable_tracks, 0);
        assert_eq!(report.tracking_summary.tracks[0].status, TrackStatus::Retired);
        // Excluded from stable aggregates, still in raw totals.
        assert_eq!(report.detection_summary.total_detections, 1);
        assert_eq!(report.condition_summary.overall.as_str(), "excellent");
    }

    #[test]
    fn test_scenario_detector_failure_is_absorbed() {
        let script: BTreeMap<u64, Vec<Detection>> =
            (0..6).map(|f| (f, vec![det(10.0, 10.0, 40.0, 40.0)])).collect();
        let mut detector = ScriptedDetector::new(script);
        detector.fail_on.insert(2);
        let mut source = ScriptedSource::with_flat_frames(6);

        let report = run(config(), &mut source, &mut detector).unwrap();

        // The failing frame still has a record, with zero detections.
        assert_eq!(report.video_info.processed_frames, 6);
        assert_eq!(report.detection_summary.total_detections, 5);
        assert_eq!(report.detection_summary.frames_with_detections, 5);
        // The single missed frame is within patience; track survives.
        assert_eq!(report.tracking_summary.stable_tracks, 1);
    }

    #[test]
    fn test_decode_error_is_fatal_with_last_good_frame() {
        let mut source = ScriptedSource::with_flat_frames(5);
        source.frames[2] = None;
        let mut detector = ScriptedDetector::new(BTreeMap::new());

        let err = run(config(), &mut source, &mut detector).unwrap_err();
        match err {
            AnalysisError::DecodeError {
                video, last_frame, ..
            } => {
                assert_eq!(video, "scripted.mp4");
                assert_eq!(last_frame, 1);
            }
            other => panic!("expected DecodeError, got {other:?}"),
        }
    }

    #[test]
    fn test_cancellation_discards_the_run() {
        let mut source = ScriptedSource::with_flat_frames(5);
        let mut detector = ScriptedDetector::new(BTreeMap::new());
        let orchestrator = VideoAnalysisOrchestrator::new(config());
        orchestrator.cancellation_handle().cancel();

        let err = orchestrator
            .analyze(&mut source, &mut detector, None)
            .unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Cancelled { last_frame: -1 }
        ));
    }

    #[test]
    fn test_frame_skip_processes_every_nth_frame() {
        let mut cfg = config();
        cfg.frame_skip = 2;
        let script: BTreeMap<u64, Vec<Detection>> =
            (0..10).map(|f| (f, vec![det(10.0, 10.0, 40.0, 40.0)])).collect();
        let mut source = ScriptedSource::with_flat_frames(10);
        // Detector is only invoked for processed frames.
        let mut detector = ScriptedDetector::new(script);

        let report = run(cfg, &mut source, &mut detector).unwrap();
        assert_eq!(report.video_info.processed_frames, 5);
        assert_eq!(report.video_info.total_frames, 10);
    }

    #[test]
    fn test_max_frames_caps_processing() {
        let mut cfg = config();
        cfg.max_frames = Some(3);
        let mut source = ScriptedSource::with_flat_frames(10);
        let mut detector = ScriptedDetector::new(BTreeMap::new());

        let report = run(cfg, &mut source, &mut detector).unwrap();
        assert_eq!(report.video_info.processed_frames, 3);
    }

    #[test]
    fn test_invalid_frame_is_dropped_and_stream_continues() {
        let mut source = ScriptedSource::with_flat_frames(5);
        source.frames[1] = Some(Frame {
            data: vec![],
            width: 0,
            height: 0,
            timestamp_ms: 33.3,
        });
        let mut detector = ScriptedDetector::new(BTreeMap::new());

        let report = run(config(), &mut source, &mut detector).unwrap();
        assert_eq!(report.video_info.processed_frames, 4);
    }

    #[test]
    fn test_degenerate_detection_is_dropped_before_tracking() {
        let script: BTreeMap<u64, Vec<Detection>> = BTreeMap::from([(
            0,
            vec![det(10.0, 10.0, 40.0, 40.0), det(50.0, 50.0, 50.0, 50.0)],
        )]);
        let mut source = ScriptedSource::with_flat_frames(1);
        let mut detector = ScriptedDetector::new(script);

        let report = run(config(), &mut source, &mut detector).unwrap();
        assert_eq!(report.detection_summary.total_detections, 1);
        assert_eq!(report.tracking_summary.total_tracks, 1);
    }

    #[test]
    fn test_detection_counts_are_conserved() {
        let script: BTreeMap<u64, Vec<Detection>> = (0..8)
            .map(|f| {
                let mut dets = vec![det(10.0, 10.0, 40.0, 40.0)];
                if f % 2 == 0 {
                    dets.push(det(5.0, 45.0, 30.0, 62.0));
                }
                (f, dets)
            })
            .collect();
        let mut source = ScriptedSource::with_flat_frames(8);
        let mut detector = ScriptedDetector::new(script);

        let report = run(config(), &mut source, &mut detector).unwrap();
        let from_tracks: usize = report
            .tracking_summary
            .tracks
            .iter()
            .map(|t| t.observations)
            .sum();
        assert_eq!(report.detection_summary.total_detections, from_tracks);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let build = || {
            let script: BTreeMap<u64, Vec<Detection>> = (0..10)
                .map(|f| {
                    let jitter = (f % 2) as f32;
                    (f, vec![det(10.0 + jitter, 10.0, 40.0 + jitter, 40.0)])
                })
                .collect();
            let mut source = ScriptedSource::with_flat_frames(10);
            let mut detector = ScriptedDetector::new(script);
            let report = run(config(), &mut source, &mut detector).unwrap();
            serde_json::to_string(&report).unwrap()
        };
        assert_eq!(build(), build());
    }
}
