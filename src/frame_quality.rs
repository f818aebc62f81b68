// src/frame_quality.rs
//
// Per-frame quality scoring. Low-quality frames (blur, dust, low light)
// produce unreliable detections, so the score feeds into each detection's
// risk score downstream.
//
// Score = 0.6 * texture (intensity variance) + 0.4 * sharpness (mean Sobel
// gradient magnitude), both normalized, clipped to [0, 1].

use crate::error::{AnalysisError, Result};
use crate::types::Frame;

/// Variance above this maps to a full texture score.
const VARIANCE_SCALE: f64 = 1000.0;
/// Mean gradient magnitude above this maps to a full sharpness score.
const GRADIENT_SCALE: f64 = 50.0;

const VARIANCE_WEIGHT: f64 = 0.6;
const GRADIENT_WEIGHT: f64 = 0.4;

/// Score one frame's quality in [0, 1]. Pure function of the pixel data.
pub fn score_frame(frame: &Frame) -> Result<f32> {
    if frame.is_degenerate() {
        return Err(AnalysisError::InvalidFrame(format!(
            "{}x{} frame with {} bytes",
            frame.width,
            frame.height,
            frame.data.len()
        )));
    }

    let gray = to_luma(frame);

    let variance = intensity_variance(&gray);
    let gradient = mean_gradient_magnitude(&gray, frame.width, frame.height);

    let variance_score = (variance / VARIANCE_SCALE).min(1.0);
    let gradient_score = (gradient / GRADIENT_SCALE).min(1.0);

    let quality = VARIANCE_WEIGHT * variance_score + GRADIENT_WEIGHT * gradient_score;
    Ok(quality.clamp(0.0, 1.0) as f32)
}

/// RGB -> luma (BT.601 integer approximation).
pub fn to_luma(frame: &Frame) -> Vec<u8> {
    let pixels = frame.width * frame.height;
    let mut gray = Vec::with_capacity(pixels);
    for i in 0..pixels {
        let r = frame.data[i * 3] as u32;
        let g = frame.data[i * 3 + 1] as u32;
        let b = frame.data[i * 3 + 2] as u32;
        gray.push(((r * 77 + g * 150 + b * 29) >> 8) as u8);
    }
    gray
}

fn intensity_variance(gray: &[u8]) -> f64 {
    let n = gray.len() as f64;
    let mean = gray.iter().map(|&p| p as f64).sum::<f64>() / n;
    gray.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / n
}

/// Mean Sobel gradient magnitude over interior pixels. Border pixels are
/// skipped rather than padded.
fn mean_gradient_magnitude(gray: &[u8], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 {
        return 0.0;
    }

    let at = |x: usize, y: usize| gray[y * width + x] as f64;
    let mut sum = 0.0;
    let mut count = 0u64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            sum += (gx * gx + gy * gy).sqrt();
            count += 1;
        }
    }

    sum / count as f64
}
