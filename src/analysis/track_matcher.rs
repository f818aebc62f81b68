// src/analysis/track_matcher.rs
//
// IoU-based multi-defect tracker. Each physical road defect gets one
// persistent track; per-frame detections are reconciled against the live
// tracks so a pothole seen across forty frames counts once, not forty
// times.
//
// Design:
//   - Greedy IoU matching, sorted best-overlap first (road defects are
//     static in the scene, so plain IoU against the last matched box is
//     enough — no motion model)
//   - Deterministic tie-breaks: equal IoU goes to the older (lower-id)
//     track, then to the earlier detection
//   - Tracks retire after `patience` consecutive missed frames and stay in
//     the registry read-only for final aggregation

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::stability;
use crate::types::{AnnotatedDetection, Severity};

#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Minimum IoU to match a detection to an existing track.
    pub tracking_threshold: f32,
    /// Matched detections required before a track can become stable.
    pub min_track_length: u32,
    /// Consecutive missed frames tolerated before retirement.
    pub patience: u32,
    /// Cap on concurrently live (non-retired) tracks.
    pub max_tracks: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            tracking_threshold: 0.7,
            min_track_length: 3,
            patience: 3,
            max_tracks: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Active,
    Stable,
    Retired,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stable => "stable",
            Self::Retired => "retired",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackObservation {
    pub frame_index: u64,
    pub detection: AnnotatedDetection,
}

/// One tracked defect across frames.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub observations: Vec<TrackObservation>,
    pub last_matched_frame: u64,
    pub misses: u32,
    pub stability_score: f32,
    pub status: TrackStatus,
}

impl Track {
    fn new(id: u64, detection: AnnotatedDetection, frame_index: u64) -> Self {
        Self {
            id,
            observations: vec![TrackObservation {
                frame_index,
                detection,
            }],
            last_matched_frame: frame_index,
            misses: 0,
            stability_score: 0.0,
            status: TrackStatus::Active,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn first_frame(&self) -> u64 {
        self.observations[0].frame_index
    }

    pub fn last_box(&self) -> [f32; 4] {
        self.observations[self.observations.len() - 1].detection.bbox
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, TrackStatus::Active | TrackStatus::Stable)
    }

    pub fn is_stable(&self) -> bool {
        self.status == TrackStatus::Stable
    }

    /// Mean IoU between consecutive matched boxes. 0.0 for single-entry
    /// tracks.
    pub fn mean_consecutive_iou(&self) -> f32 {
        if self.observations.len() < 2 {
            return 0.0;
        }
        let sum: f32 = self
            .observations
            .windows(2)
            .map(|pair| iou(&pair[0].detection.bbox, &pair[1].detection.bbox))
            .sum();
        sum / (self.observations.len() - 1) as f32
    }

    /// Standard deviation of the box center, normalized by the mean box
    /// diagonal. Low values = a persistent, non-jittery defect.
    pub fn center_jitter(&self) -> f32 {
        let n = self.observations.len();
        if n < 2 {
            return 0.0;
        }

        let centers: Vec<(f32, f32)> = self
            .observations
            .iter()
            .map(|o| o.detection.center())
            .collect();
        let mean_x = centers.iter().map(|c| c.0).sum::<f32>() / n as f32;
        let mean_y = centers.iter().map(|c| c.1).sum::<f32>() / n as f32;
        let variance = centers
            .iter()
            .map(|c| (c.0 - mean_x).powi(2) + (c.1 - mean_y).powi(2))
            .sum::<f32>()
            / n as f32;

        let mean_diagonal = self
            .observations
            .iter()
            .map(|o| {
                let b = o.detection.bbox;
                ((b[2] - b[0]).powi(2) + (b[3] - b[1]).powi(2)).sqrt()
            })
            .sum::<f32>()
            / n as f32;

        if mean_diagonal <= f32::EPSILON {
            return 0.0;
        }
        variance.sqrt() / mean_diagonal
    }

    pub fn mean_confidence(&self) -> f32 {
        let sum: f32 = self
            .observations
            .iter()
            .map(|o| o.detection.confidence)
            .sum();
        sum / self.observations.len() as f32
    }

    pub fn mean_risk_score(&self) -> f32 {
        let sum: f32 = self
            .observations
            .iter()
            .map(|o| o.detection.risk_score)
            .sum();
        sum / self.observations.len() as f32
    }

    /// Track-level severity from the mean bucket rank across observations.
    pub fn severity(&self) -> Severity {
        let sum: u32 = self
            .observations
            .iter()
            .map(|o| o.detection.severity.rank())
            .sum();
        let avg = sum as f32 / self.observations.len() as f32;
        if avg >= 3.5 {
            Severity::Critical
        } else if avg >= 2.5 {
            Severity::High
        } else if avg >= 1.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn append(&mut self, detection: AnnotatedDetection, frame_index: u64) {
        debug_assert!(
            frame_index > self.last_matched_frame,
            "frames must be observed in strictly increasing order"
        );
        self.observations.push(TrackObservation {
            frame_index,
            detection,
        });
        self.last_matched_frame = frame_index;
        self.misses = 0;
    }
}

/// Assigns each frame's annotated detections to the track registry.
/// Exclusively owned by one orchestrator; the registry maps monotonic ids
/// to tracks and never shrinks mid-stream.
pub struct TrackMatcher {
    config: MatcherConfig,
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
}

impl TrackMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Reconcile one frame's detections. Frames MUST arrive in strictly
    /// increasing index order — match quality depends on each track's most
    /// recent box.
    ///
    /// Returns (detection index, track id) assignments covering every
    /// detection that joined or spawned a track, in detection order.
    pub fn observe_frame(
        &mut self,
        detections: Vec<AnnotatedDetection>,
        frame_index: u64,
    ) -> Vec<(usize, u64)> {
        // Candidate (track, detection) pairs above the match threshold,
        // plus each detection's best overlap for the spawn-cap ordering.
        let mut pairs: Vec<(u64, usize, f32)> = Vec::new();
        let mut best_iou: Vec<f32> = vec![0.0; detections.len()];

        for (&track_id, track) in &self.tracks {
            if !track.is_live() {
                continue;
            }
            let last_box = track.last_box();
            for (di, det) in detections.iter().enumerate() {
                let overlap = iou(&last_box, &det.bbox);
                if overlap > best_iou[di] {
                    best_iou[di] = overlap;
                }
                if overlap >= self.config.tracking_threshold {
                    pairs.push((track_id, di, overlap));
                }
            }
        }

        // Best overlap first; ties go to the older track, then the earlier
        // detection. Fully deterministic.
        pairs.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
                .then(a.1.cmp(&b.1))
        });

        let mut assignments: Vec<(usize, u64)> = Vec::new();
        let mut matched_tracks: Vec<u64> = Vec::new();
        let mut det_consumed: Vec<bool> = vec![false; detections.len()];
        let mut detections: Vec<Option<AnnotatedDetection>> =
            detections.into_iter().map(Some).collect();

        for (track_id, di, overlap) in &pairs {
            if det_consumed[*di] || matched_tracks.contains(track_id) {
                continue;
            }
            det_consumed[*di] = true;
            matched_tracks.push(*track_id);

            let detection = detections[*di].take().expect("detection consumed twice");
            let track = self.tracks.get_mut(track_id).expect("matched track exists");
            track.append(detection, frame_index);
            stability::recompute(
                track,
                self.config.min_track_length,
                self.config.tracking_threshold,
            );
            debug!(
                "Track {} matched at frame {} (IoU {:.2}, len {})",
                track_id,
                frame_index,
                overlap,
                track.len()
            );
            assignments.push((*di, *track_id));
        }

        // Unmatched detections spawn new tracks, capped at max_tracks live
        // tracks. When the cap binds, near-miss detections (highest best
        // IoU) win the remaining slots.
        let mut spawn_order: Vec<usize> = (0..detections.len())
            .filter(|&di| !det_consumed[di])
            .collect();
        spawn_order.sort_by(|&a, &b| {
            best_iou[b]
                .partial_cmp(&best_iou[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let mut live_count = self.tracks.values().filter(|t| t.is_live()).count() as u32;
        let mut dropped = 0usize;
        for di in spawn_order {
            if live_count >= self.config.max_tracks {
                dropped += 1;
                continue;
            }
            let detection = detections[di].take().expect("spawn candidate consumed");
            let id = self.next_id;
            self.next_id += 1;
            info!(
                "New track {} spawned at frame {} ({})",
                id,
                frame_index,
                detection.class.as_str()
            );
            let mut track = Track::new(id, detection, frame_index);
            stability::recompute(
                &mut track,
                self.config.min_track_length,
                self.config.tracking_threshold,
            );
            self.tracks.insert(id, track);
            live_count += 1;
            assignments.push((di, id));
        }
        if dropped > 0 {
            warn!(
                "Frame {}: dropped {} new detections (track cap {})",
                frame_index, dropped, self.config.max_tracks
            );
        }

        // Every live track that saw nothing this frame coasts; past the
        // patience window it retires for good.
        let spawned_or_matched: Vec<u64> = assignments.iter().map(|&(_, id)| id).collect();
        for (&track_id, track) in self.tracks.iter_mut() {
            if !track.is_live() || spawned_or_matched.contains(&track_id) {
                continue;
            }
            track.misses += 1;
            if track.misses > self.config.patience {
                track.status = TrackStatus::Retired;
                info!(
                    "Track {} retired at frame {} ({} misses, {} observations)",
                    track_id, frame_index, track.misses, track.observations.len()
                );
            }
        }

        assignments.sort_by_key(|&(di, _)| di);
        assignments
    }

    pub fn tracks(&self) -> &BTreeMap<u64, Track> {
        &self.tracks
    }

    pub fn track(&self, id: u64) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn live_count(&self) -> usize {
        self.tracks.values().filter(|t| t.is_live()).count()
    }

    pub fn stable_count(&self) -> usize {
        self.tracks.values().filter(|t| t.is_stable()).count()
    }
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
