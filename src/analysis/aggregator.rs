// src/analysis/aggregator.rs
//
// Final aggregation: folds the full track registry and the per-frame
// history into one RoadReport. Runs exactly once per video, after the last
// frame; pure function of its inputs, so calling it twice on the same
// finalized state yields byte-identical output.
//
// Policy: only stable tracks feed the condition and priority
// distributions. An active-but-never-stabilized or retired-short track is
// detector noise — it still counts in the raw detection totals, never in
// the maintenance verdict.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analysis::track_matcher::{Track, TrackMatcher, TrackStatus};
use crate::types::{
    FrameRecord, MaintenancePriority, RoadCondition, Severity, VideoInfo,
};

/// Minimum share of stable tracks a severity bucket needs before it can
/// set the overall label. Checked worst-first, so ties resolve toward the
/// worse condition.
const MIN_BUCKET_SHARE: f64 = 0.10;

#[derive(Debug, Clone, Serialize)]
pub struct RoadReport {
    pub video_info: VideoInfo,
    pub detection_summary: DetectionSummary,
    pub quality_summary: QualitySummary,
    pub condition_summary: ConditionSummary,
    pub maintenance_summary: MaintenanceSummary,
    pub tracking_summary: TrackingSummary,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
    pub total_detections: usize,
    pub frames_with_detections: usize,
    pub detection_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualitySummary {
    pub average_frame_quality: f64,
    pub distribution: QualityDistribution,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityDistribution {
    pub excellent: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConditionSummary {
    pub distribution: BTreeMap<&'static str, usize>,
    pub overall: RoadCondition,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceSummary {
    pub distribution: BTreeMap<&'static str, usize>,
    pub overall: MaintenancePriority,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingSummary {
    pub total_tracks: usize,
    pub stable_tracks: usize,
    pub mean_stable_track_length: f64,
    pub length_distribution: TrackLengthDistribution,
    pub tracks: Vec<TrackDetail>,
}

/// Track-length histogram: short (below stabilization length), stable,
/// long (more than twice the stabilization length).
#[derive(Debug, Clone, Serialize)]
pub struct TrackLengthDistribution {
    pub short: usize,
    pub stable: usize,
    pub long: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackDetail {
    pub id: u64,
    pub status: TrackStatus,
    pub first_frame: u64,
    pub last_frame: u64,
    pub observations: usize,
    pub average_confidence: f32,
    pub average_risk_score: f32,
    pub severity: Severity,
    pub stability_score: f32,
}

/// Build the final report from a finalized registry and frame history.
pub fn build_report(
    matcher: &TrackMatcher,
    frames: &[FrameRecord],
    video_info: VideoInfo,
    min_track_length: u32,
) -> RoadReport {
    let detection_summary = summarize_detections(frames);
    let quality_summary = summarize_quality(frames);

    let stable: Vec<&Track> = matcher
        .tracks()
        .values()
        .filter(|t| t.is_stable())
        .collect();

    let condition_summary = summarize_condition(&stable);
    let maintenance_summary = summarize_maintenance(&stable);
    let tracking_summary = summarize_tracking(matcher, &stable, min_track_length);

    let recommendations = recommend(
        &condition_summary,
        &maintenance_summary,
        &stable,
        detection_summary.total_detections,
        quality_summary.average_frame_quality,
    );

    RoadReport {
        video_info,
        detection_summary,
        quality_summary,
        condition_summary,
        maintenance_summary,
        tracking_summary,
        recommendations,
    }
}

fn summarize_detections(frames: &[FrameRecord]) -> DetectionSummary {
    let total_detections = frames.iter().map(|f| f.detection_count).sum();
    let frames_with_detections = frames.iter().filter(|f| f.detection_count > 0).count();
    let detection_rate = if frames.is_empty() {
        0.0
    } else {
        frames_with_detections as f64 / frames.len() as f64
    };
    DetectionSummary {
        total_detections,
        frames_with_detections,
        detection_rate,
    }
}

fn summarize_quality(frames: &[FrameRecord]) -> QualitySummary {
    let average = if frames.is_empty() {
        0.0
    } else {
        frames.iter().map(|f| f.quality as f64).sum::<f64>() / frames.len() as f64
    };

    let mut distribution = QualityDistribution {
        excellent: 0,
        good: 0,
        fair: 0,
        poor: 0,
    };
    for frame in frames {
        match frame.quality {
            q if q >= 0.8 => distribution.excellent += 1,
            q if q >= 0.6 => distribution.good += 1,
            q if q >= 0.4 => distribution.fair += 1,
            _ => distribution.poor += 1,
        }
    }

    QualitySummary {
        average_frame_quality: average,
        distribution,
    }
}

fn condition_for_track(track: &Track) -> RoadCondition {
    match track.severity() {
        Severity::Low => RoadCondition::Good,
        Severity::Medium => RoadCondition::Fair,
        Severity::High => RoadCondition::Poor,
        Severity::Critical => RoadCondition::Critical,
    }
}

fn priority_for_track(track: &Track) -> MaintenancePriority {
    let risk = track.mean_risk_score();
    if risk >= 0.8 {
        MaintenancePriority::Immediate
    } else if risk >= 0.6 {
        MaintenancePriority::High
    } else if risk >= 0.3 {
        MaintenancePriority::Medium
    } else {
        MaintenancePriority::Low
    }
}

fn summarize_condition(stable: &[&Track]) -> ConditionSummary {
    let mut counts: BTreeMap<RoadCondition, usize> = BTreeMap::new();
    for track in stable {
        *counts.entry(condition_for_track(track)).or_default() += 1;
    }

    let overall = if stable.is_empty() {
        RoadCondition::Excellent
    } else {
        let total = stable.len() as f64;
        RoadCondition::WORST_FIRST
            .into_iter()
            .find(|c| {
                counts
                    .get(c)
                    .is_some_and(|&n| n as f64 / total >= MIN_BUCKET_SHARE)
            })
            .unwrap_or(RoadCondition::Good)
    };

    ConditionSummary {
        distribution: counts
            .into_iter()
            .map(|(c, n)| (c.as_str(), n))
            .collect(),
        overall,
    }
}

fn summarize_maintenance(stable: &[&Track]) -> MaintenanceSummary {
    let mut counts: BTreeMap<MaintenancePriority, usize> = BTreeMap::new();
    for track in stable {
        *counts.entry(priority_for_track(track)).or_default() += 1;
    }

    let overall = if stable.is_empty() {
        MaintenancePriority::Low
    } else {
        let total = stable.len() as f64;
        MaintenancePriority::WORST_FIRST
            .into_iter()
            .find(|p| {
                counts
                    .get(p)
                    .is_some_and(|&n| n as f64 / total >= MIN_BUCKET_SHARE)
            })
            .unwrap_or(MaintenancePriority::Low)
    };

    MaintenanceSummary {
        distribution: counts
            .into_iter()
            .map(|(p, n)| (p.as_str(), n))
            .collect(),
        overall,
    }
}

fn summarize_tracking(
    matcher: &TrackMatcher,
    stable: &[&Track],
    min_track_length: u32,
) -> TrackingSummary {
    let min_len = min_track_length as usize;
    let mut distribution = TrackLengthDistribution {
        short: 0,
        stable: 0,
        long: 0,
    };
    for track in matcher.tracks().values() {
        if track.len() < min_len {
            distribution.short += 1;
        } else if track.len() > min_len * 2 {
            distribution.long += 1;
        } else {
            distribution.stable += 1;
        }
    }

    let mean_stable_track_length = if stable.is_empty() {
        0.0
    } else {
        stable.iter().map(|t| t.len() as f64).sum::<f64>() / stable.len() as f64
    };

    let tracks = matcher
        .tracks()
        .values()
        .map(|t| TrackDetail {
            id: t.id,
            status: t.status,
            first_frame: t.first_frame(),
            last_frame: t.last_matched_frame,
            observations: t.len(),
            average_confidence: t.mean_confidence(),
            average_risk_score: t.mean_risk_score(),
            severity: t.severity(),
            stability_score: t.stability_score,
        })
        .collect();

    TrackingSummary {
        total_tracks: matcher.tracks().len(),
        stable_tracks: stable.len(),
        mean_stable_track_length,
        length_distribution: distribution,
        tracks,
    }
}

fn recommend(
    condition: &ConditionSummary,
    maintenance: &MaintenanceSummary,
    stable: &[&Track],
    total_detections: usize,
    average_quality: f64,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    // A persisting critical defect overrides every aggregate view.
    if stable.iter().any(|t| t.severity() == Severity::Critical) {
        recommendations.push(
            "Critical defect confirmed across multiple frames - dispatch an inspection crew immediately"
                .to_string(),
        );
    }

    recommendations.push(match total_detections {
        n if n > 100 => "High defect volume detected - urgent intervention required",
        n if n > 50 => "Multiple defects detected - schedule corrective maintenance",
        n if n > 10 => "Some defects detected - preventive maintenance recommended",
        _ => "Few defects detected - road condition acceptable",
    }
    .to_string());

    if matches!(
        condition.overall,
        RoadCondition::Poor | RoadCondition::Critical
    ) {
        recommendations.push(
            "Overall road condition is degraded - evaluate comprehensive resurfacing".to_string(),
        );
    }

    if matches!(
        maintenance.overall,
        MaintenancePriority::High | MaintenancePriority::Immediate
    ) {
        recommendations
            .push("High maintenance priority - schedule repair work urgently".to_string());
    }

    if average_quality < 0.4 {
        recommendations.push(
            "Low average frame quality - improve lighting or capture resolution".to_string(),
        );
    } else if average_quality < 0.6 {
        recommendations
            .push("Moderate frame quality - consider optimizing capture conditions".to_string());
    }

    recommendations
}
