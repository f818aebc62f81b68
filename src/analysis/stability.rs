// src/analysis/stability.rs
//
// Track stability scoring and the active→stable transition.
//
// A stable track is a defect the detector has confirmed repeatedly at a
// consistent position — the signal that separates a real pothole from a
// single-frame artifact. Everything here is frame-index based; wall-clock
// time never enters the computation.

use tracing::debug;

use crate::analysis::track_matcher::{Track, TrackStatus};

const LENGTH_WEIGHT: f32 = 0.4;
const IOU_WEIGHT: f32 = 0.4;
const JITTER_WEIGHT: f32 = 0.2;

/// Recompute the stability score and re-evaluate the status transition.
/// Called on every append. The transition is monotonic: Stable never
/// reverts to Active, Retired never changes at all.
pub fn recompute(track: &mut Track, min_track_length: u32, tracking_threshold: f32) {
    let n = track.len() as u32;

    // Saturates at twice the stabilization length — beyond that, a longer
    // history says nothing new.
    let length_score = (n as f32 / (2 * min_track_length.max(1)) as f32).min(1.0);
    let mean_iou = track.mean_consecutive_iou();
    let jitter_score = 1.0 / (1.0 + track.center_jitter());

    track.stability_score = if n < 2 {
        // Single observation: no overlap or jitter evidence yet.
        LENGTH_WEIGHT * length_score
    } else {
        (LENGTH_WEIGHT * length_score + IOU_WEIGHT * mean_iou + JITTER_WEIGHT * jitter_score)
            .clamp(0.0, 1.0)
    };

    if track.status == TrackStatus::Active && n >= min_track_length {
        // With min_track_length == 1 a single observation has no
        // consecutive-IoU evidence; the length criterion alone decides.
        let overlap_ok = n < 2 || mean_iou >= tracking_threshold;
        if overlap_ok {
            track.status = TrackStatus::Stable;
            debug!(
                "Track {} stable at {} observations (mean IoU {:.2}, stability {:.2})",
                track.id, n, mean_iou, track.stability_score
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::track_matcher::{MatcherConfig, TrackMatcher};
    use crate::types::{AnnotatedDetection, DefectClass, Severity};

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> AnnotatedDetection {
        AnnotatedDetection {
            bbox: [x1, y1, x2, y2],
            confidence: 0.8,
            class: DefectClass::Crack,
            depth_proxy: 0.1,
            area: (x2 - x1) * (y2 - y1),
            severity: Severity::Medium,
            risk_score: 0.4,
        }
    }

    fn track_after(boxes: &[[f32; 4]], config: MatcherConfig) -> TrackMatcher {
        let mut matcher = TrackMatcher::new(config);
        for (frame, b) in boxes.iter().enumerate() {
            matcher.observe_frame(vec![det(b[0], b[1], b[2], b[3])], frame as u64);
        }
        matcher
    }

    #[test]
    fn test_constant_box_scores_high() {
        let boxes = [[10.0, 10.0, 60.0, 60.0]; 6];
        let matcher = track_after(&boxes, MatcherConfig::default());
        let track = matcher.track(0).unwrap();
        assert_eq!(track.status, TrackStatus::Stable);
        assert!(
            track.stability_score > 0.9,
            "constant box: {}",
            track.stability_score
        );
    }

    #[test]
    fn test_single_observation_scores_low() {
        let matcher = track_after(&[[10.0, 10.0, 60.0, 60.0]], MatcherConfig::default());
        let track = matcher.track(0).unwrap();
        assert_eq!(track.status, TrackStatus::Active);
        assert!(track.stability_score < 0.2);
    }

    #[test]
    fn test_stability_grows_with_matches() {
        let mut matcher = TrackMatcher::new(MatcherConfig::default());
        let mut previous = 0.0f32;
        for frame in 0..6 {
            matcher.observe_frame(vec![det(10.0, 10.0, 60.0, 60.0)], frame);
            let score = matcher.track(0).unwrap().stability_score;
            assert!(score >= previous, "score dropped at frame {frame}");
            previous = score;
        }
    }

    #[test]
    fn test_jittery_track_scores_below_steady_track() {
        let steady = track_after(&[[10.0, 10.0, 60.0, 60.0]; 5], MatcherConfig::default());
        // Same size box drifting a few pixels each frame.
        let jittery_boxes: Vec<[f32; 4]> = (0..5)
            .map(|i| {
                let o = i as f32 * 4.0;
                [10.0 + o, 10.0 + o, 60.0 + o, 60.0 + o]
            })
            .collect();
        let jittery = track_after(&jittery_boxes, MatcherConfig::default());

        assert!(
            steady.track(0).unwrap().stability_score > jittery.track(0).unwrap().stability_score
        );
    }

    #[test]
    fn test_low_overlap_track_never_stabilizes() {
        // Boxes drift so far each frame that consecutive IoU < threshold,
        // so the matcher spawns a fresh track each time instead.
        let config = MatcherConfig::default();
        let boxes: Vec<[f32; 4]> = (0..5)
            .map(|i| {
                let o = i as f32 * 45.0;
                [10.0 + o, 10.0, 60.0 + o, 60.0]
            })
            .collect();
        let matcher = track_after(&boxes, config);
        assert!(matcher.tracks().values().all(|t| !t.is_stable()));
    }

    #[test]
    fn test_min_track_length_one_stabilizes_immediately() {
        let config = MatcherConfig {
            min_track_length: 1,
            ..MatcherConfig::default()
        };
        let matcher = track_after(&[[10.0, 10.0, 60.0, 60.0]], config);
        assert_eq!(matcher.track(0).unwrap().status, TrackStatus::Stable);
    }
}
