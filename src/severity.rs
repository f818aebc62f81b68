// src/severity.rs
//
// Severity classification for raw detections.
//
// The depth proxy is a pixel-intensity heuristic: a defect region darker
// than the surrounding road surface reads as deeper, and intra-box intensity
// spread adds to it. It stands in for physical depth because the pipeline
// has no depth sensing — treat it as an approximation, never as ground
// truth.

use crate::error::{AnalysisError, Result};
use crate::frame_quality::to_luma;
use crate::types::{AnnotatedDetection, Detection, Frame, Severity};

/// (bucket, depth-proxy range, risk sub-range). Buckets are checked in
/// order; the depth proxy is clamped to [0.01, 1.0] so every value lands in
/// exactly one row.
const SEVERITY_TABLE: [(Severity, (f32, f32), (f32, f32)); 4] = [
    (Severity::Low, (0.01, 0.05), (0.1, 0.3)),
    (Severity::Medium, (0.05, 0.15), (0.3, 0.6)),
    (Severity::High, (0.15, 0.30), (0.6, 0.8)),
    (Severity::Critical, (0.30, 1.0), (0.8, 1.0)),
];

/// Boxes at or above this pixel area escalate one severity bucket — a large
/// shallow defect still damages vehicles.
const AREA_ESCALATION_PX: f32 = 50_000.0;

const DEPTH_CONTRAST_WEIGHT: f32 = 0.5;
const DEPTH_SPREAD_WEIGHT: f32 = 0.3;

/// Annotate every detection of one frame. Individual results are returned
/// so the caller can drop degenerate detections without losing the rest.
pub fn annotate_frame(
    detections: &[Detection],
    frame: &Frame,
    frame_quality: f32,
) -> Vec<Result<AnnotatedDetection>> {
    let gray = to_luma(frame);
    let frame_mean = mean(&gray);

    detections
        .iter()
        .map(|det| annotate_detection(det, &gray, frame.width, frame.height, frame_mean, frame_quality))
        .collect()
}

pub fn annotate_detection(
    detection: &Detection,
    gray: &[u8],
    frame_width: usize,
    frame_height: usize,
    frame_mean: f64,
    frame_quality: f32,
) -> Result<AnnotatedDetection> {
    let [x1, y1, x2, y2] = detection.bbox;
    let x1 = (x1.max(0.0) as usize).min(frame_width);
    let y1 = (y1.max(0.0) as usize).min(frame_height);
    let x2 = (x2.max(0.0) as usize).min(frame_width);
    let y2 = (y2.max(0.0) as usize).min(frame_height);

    if x2 <= x1 || y2 <= y1 {
        return Err(AnalysisError::DegenerateDetection(format!(
            "zero-area box {:?} in {}x{} frame",
            detection.bbox, frame_width, frame_height
        )));
    }

    let area = ((x2 - x1) * (y2 - y1)) as f32;

    let (roi_mean, roi_std) = region_stats(gray, frame_width, x1, y1, x2, y2);

    // Darker than the surrounding frame = deeper. Clamped to the table's
    // lower bound so even a bright flat region stays a valid Low.
    let contrast = ((frame_mean - roi_mean) / 255.0).max(0.0) as f32;
    let spread = (roi_std / 255.0) as f32;
    let depth_proxy =
        (DEPTH_CONTRAST_WEIGHT * contrast + DEPTH_SPREAD_WEIGHT * spread).clamp(0.01, 1.0);

    let mut severity = severity_for_depth(depth_proxy);
    if area >= AREA_ESCALATION_PX {
        severity = severity.escalate();
    }

    let (risk_lo, risk_hi) = risk_range(severity);
    let scale = (detection.confidence * frame_quality).clamp(0.0, 1.0);
    let risk_score = risk_lo + (risk_hi - risk_lo) * scale;

    Ok(AnnotatedDetection {
        bbox: detection.bbox,
        confidence: detection.confidence,
        class: detection.class,
        depth_proxy,
        area,
        severity,
        risk_score,
    })
}

fn severity_for_depth(depth: f32) -> Severity {
    for (severity, (lo, hi), _) in SEVERITY_TABLE {
        if depth >= lo && depth < hi {
            return severity;
        }
    }
    // depth == 1.0 falls off the half-open ranges
    Severity::Critical
}

fn risk_range(severity: Severity) -> (f32, f32) {
    SEVERITY_TABLE
        .iter()
        .find(|(s, _, _)| *s == severity)
        .map(|(_, _, risk)| *risk)
        .unwrap_or((0.1, 0.3))
}

fn mean(gray: &[u8]) -> f64 {
    if gray.is_empty() {
        return 0.0;
    }
    gray.iter().map(|&p| p as f64).sum::<f64>() / gray.len() as f64
}

fn region_stats(
    gray: &[u8],
    width: usize,
    x1: usize,
    y1: usize,
    x2: usize,
    y2: usize,
) -> (f64, f64) {
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let n = ((x2 - x1) * (y2 - y1)) as f64;

    for y in y1..y2 {
        for x in x1..x2 {
            let p = gray[y * width + x] as f64;
            sum += p;
            sum_sq += p * p;
        }
    }

    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DefectClass;

    fn frame_with_dark_patch(value: u8, x1: usize, y1: usize, x2: usize, y2: usize) -> Frame {
        let (w, h) = (100usize, 100usize);
        let mut data = vec![220u8; w * h * 3];
        for y in y1..y2 {
            for x in x1..x2 {
                let i = (y * w + x) * 3;
                data[i] = value;
                data[i + 1] = value;
                data[i + 2] = value;
            }
        }
        Frame {
            data,
            width: w,
            height: h,
            timestamp_ms: 0.0,
        }
    }

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection {
            bbox: [x1, y1, x2, y2],
            confidence: 0.9,
            class: DefectClass::MediumPothole,
        }
    }

    #[test]
    fn test_zero_area_box_is_degenerate() {
        let frame = frame_with_dark_patch(0, 10, 10, 30, 30);
        let results = annotate_frame(&[det(50.0, 50.0, 50.0, 50.0)], &frame, 1.0);
        assert!(matches!(
            results[0],
            Err(AnalysisError::DegenerateDetection(_))
        ));
    }

    #[test]
    fn test_box_outside_frame_is_degenerate() {
        let frame = frame_with_dark_patch(0, 10, 10, 30, 30);
        let results = annotate_frame(&[det(200.0, 200.0, 250.0, 250.0)], &frame, 1.0);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_darker_region_has_higher_depth_proxy() {
        let dark = frame_with_dark_patch(10, 10, 10, 30, 30);
        let light = frame_with_dark_patch(180, 10, 10, 30, 30);
        let d = annotate_frame(&[det(10.0, 10.0, 30.0, 30.0)], &dark, 1.0)
            .remove(0)
            .unwrap();
        let l = annotate_frame(&[det(10.0, 10.0, 30.0, 30.0)], &light, 1.0)
            .remove(0)
            .unwrap();
        assert!(d.depth_proxy > l.depth_proxy);
    }

    #[test]
    fn test_near_black_patch_is_critical() {
        let frame = frame_with_dark_patch(0, 10, 10, 30, 30);
        let annotated = annotate_frame(&[det(10.0, 10.0, 30.0, 30.0)], &frame, 1.0)
            .remove(0)
            .unwrap();
        assert_eq!(annotated.severity, Severity::Critical);
        assert!(annotated.risk_score >= 0.8);
    }

    #[test]
    fn test_flat_bright_patch_is_low() {
        let frame = frame_with_dark_patch(220, 10, 10, 30, 30);
        let annotated = annotate_frame(&[det(10.0, 10.0, 30.0, 30.0)], &frame, 1.0)
            .remove(0)
            .unwrap();
        assert_eq!(annotated.severity, Severity::Low);
        assert!((annotated.depth_proxy - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_risk_scales_with_confidence_and_quality() {
        let frame = frame_with_dark_patch(0, 10, 10, 30, 30);
        let mut low_conf = det(10.0, 10.0, 30.0, 30.0);
        low_conf.confidence = 0.2;
        let high = annotate_frame(&[det(10.0, 10.0, 30.0, 30.0)], &frame, 1.0)
            .remove(0)
            .unwrap();
        let low = annotate_frame(&[low_conf], &frame, 1.0).remove(0).unwrap();
        assert!(high.risk_score > low.risk_score);

        let poor_quality = annotate_frame(&[det(10.0, 10.0, 30.0, 30.0)], &frame, 0.3)
            .remove(0)
            .unwrap();
        assert!(high.risk_score > poor_quality.risk_score);
        // quality never moves risk out of the bucket's sub-range
        assert!(poor_quality.risk_score >= 0.8);
    }

    #[test]
    fn test_area_escalates_one_bucket() {
        // Mild contrast patch covering well past the escalation area.
        let (w, h) = (400usize, 400usize);
        let mut data = vec![220u8; w * h * 3];
        for y in 0..300 {
            for x in 0..300 {
                let i = (y * w + x) * 3;
                data[i] = 190;
                data[i + 1] = 190;
                data[i + 2] = 190;
            }
        }
        let frame = Frame {
            data,
            width: w,
            height: h,
            timestamp_ms: 0.0,
        };
        let annotated = annotate_frame(&[det(0.0, 0.0, 300.0, 300.0)], &frame, 1.0)
            .remove(0)
            .unwrap();
        let base = severity_for_depth(annotated.depth_proxy);
        assert_eq!(annotated.severity, base.escalate());
    }

    #[test]
    fn test_bucket_boundaries() {
        assert_eq!(severity_for_depth(0.01), Severity::Low);
        assert_eq!(severity_for_depth(0.05), Severity::Medium);
        assert_eq!(severity_for_depth(0.15), Severity::High);
        assert_eq!(severity_for_depth(0.30), Severity::Critical);
        assert_eq!(severity_for_depth(1.0), Severity::Critical);
    }
}
