// src/pothole_detection.rs

use anyhow::Result;
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

use crate::error::AnalysisError;
use crate::orchestrator::DefectDetector;
use crate::types::{DefectClass, Detection, Frame, ModelConfig};

const YOLO_INPUT_SIZE: usize = 640;
const DEFECT_CLASSES: usize = 8;
const YOLO_PREDICTIONS: usize = 8400;

pub struct YoloDefectDetector {
    session: Session,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloDefectDetector {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        info!("Loading defect model: {}", config.path);

        let session = Session::builder()?
            .with_execution_providers([CUDAExecutionProvider::default().with_device_id(0).build()])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&config.path)?;

        info!("✓ Defect detector initialized");
        Ok(Self {
            session,
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
        })
    }

    fn run(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        // 1. Preprocess (letterbox + normalize)
        let (input, scale, pad_x, pad_y) = preprocess(&frame.data, frame.width, frame.height);

        // 2. Run inference
        let output = self.infer(&input)?;

        // 3. Postprocess (parse detections + NMS)
        let detections = postprocess(
            &output,
            scale,
            pad_x,
            pad_y,
            self.confidence_threshold,
            self.iou_threshold,
        );

        debug!("Detected {} defects", detections.len());
        Ok(detections)
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let shape = [1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.to_vec().into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }
}

impl DefectDetector for YoloDefectDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, AnalysisError> {
        self.run(frame).map_err(AnalysisError::DetectorFailure)
    }
}

fn preprocess(src: &[u8], src_w: usize, src_h: usize) -> (Vec<f32>, f32, f32, f32) {
    let target_size = YOLO_INPUT_SIZE;

    // Scale to fit inside 640x640 while maintaining aspect ratio
    let scale = (target_size as f32 / src_w as f32).min(target_size as f32 / src_h as f32);
    let scaled_w = (src_w as f32 * scale) as usize;
    let scaled_h = (src_h as f32 * scale) as usize;

    // Padding to center the image
    let pad_x = (target_size - scaled_w) as f32 / 2.0;
    let pad_y = (target_size - scaled_h) as f32 / 2.0;

    let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

    // Padded 640x640 canvas (gray background)
    let mut canvas = vec![114u8; target_size * target_size * 3];
    for y in 0..scaled_h {
        for x in 0..scaled_w {
            let src_idx = (y * scaled_w + x) * 3;
            let dst_x = x + pad_x as usize;
            let dst_y = y + pad_y as usize;
            let dst_idx = (dst_y * target_size + dst_x) * 3;
            canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
        }
    }

    // Normalize [0, 255] -> [0, 1] and convert HWC -> CHW
    let mut input = vec![0.0f32; 3 * target_size * target_size];
    for c in 0..3 {
        for h in 0..target_size {
            for w in 0..target_size {
                let hwc_idx = (h * target_size + w) * 3 + c;
                let chw_idx = c * target_size * target_size + h * target_size + w;
                input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
            }
        }
    }

    (input, scale, pad_x, pad_y)
}

/// Parse the raw [1, 4 + classes, 8400] output into corner-format
/// detections in original image coordinates.
fn postprocess(
    output: &[f32],
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    conf_thresh: f32,
    iou_thresh: f32,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    // Each prediction column: [cx, cy, w, h, class0_conf, ..., class7_conf]
    for i in 0..YOLO_PREDICTIONS {
        let cx = output[i];
        let cy = output[YOLO_PREDICTIONS + i];
        let w = output[YOLO_PREDICTIONS * 2 + i];
        let h = output[YOLO_PREDICTIONS * 3 + i];

        let mut max_conf = 0.0f32;
        let mut best_class = 0;
        for c in 0..DEFECT_CLASSES {
            let conf = output[YOLO_PREDICTIONS * (4 + c) + i];
            if conf > max_conf {
                max_conf = conf;
                best_class = c;
            }
        }

        if max_conf < conf_thresh {
            continue;
        }
        let Some(class) = DefectClass::from_class_id(best_class) else {
            continue;
        };

        // Center format -> corner format, then reverse the letterbox
        let x1 = (cx - w / 2.0 - pad_x) / scale;
        let y1 = (cy - h / 2.0 - pad_y) / scale;
        let x2 = (cx + w / 2.0 - pad_x) / scale;
        let y2 = (cy + h / 2.0 - pad_y) / scale;

        detections.push(Detection {
            bbox: [x1, y1, x2, y2],
            confidence: max_conf,
            class,
        });
    }

    nms(detections, iou_thresh)
}

fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();

    while !detections.is_empty() {
        let current = detections.remove(0);
        keep.push(current.clone());

        detections.retain(|det| calculate_iou(&current.bbox, &det.bbox) < iou_threshold);
    }

    keep
}

fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], confidence: f32) -> Detection {
        Detection {
            bbox,
            confidence,
            class: DefectClass::SmallPothole,
        }
    }

    #[test]
    fn test_nms_suppresses_overlapping_boxes() {
        let detections = vec![
            det([10.0, 10.0, 50.0, 50.0], 0.9),
            det([12.0, 12.0, 52.0, 52.0], 0.7), // overlaps the first
            det([200.0, 200.0, 240.0, 240.0], 0.8),
        ];
        let kept = nms(detections, 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
        assert!((kept[1].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_disjoint_boxes() {
        let detections = vec![
            det([0.0, 0.0, 10.0, 10.0], 0.5),
            det([100.0, 100.0, 110.0, 110.0], 0.6),
        ];
        assert_eq!(nms(detections, 0.45).len(), 2);
    }

    #[test]
    fn test_postprocess_reverses_letterbox() {
        // 1280x720 source letterboxed into 640x640: scale 0.5, pad_y 140.
        let scale = 0.5;
        let pad_x = 0.0;
        let pad_y = 140.0;

        let mut output = vec![0.0f32; YOLO_PREDICTIONS * (4 + DEFECT_CLASSES)];
        // One confident prediction in column 0: center (320, 320), 100x60,
        // class 2 (large_pothole).
        output[0] = 320.0;
        output[YOLO_PREDICTIONS] = 320.0;
        output[YOLO_PREDICTIONS * 2] = 100.0;
        output[YOLO_PREDICTIONS * 3] = 60.0;
        output[YOLO_PREDICTIONS * (4 + 2)] = 0.9;

        let detections = postprocess(&output, scale, pad_x, pad_y, 0.5, 0.45);
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!(d.class, DefectClass::LargePothole);
        assert!((d.bbox[0] - 540.0).abs() < 1e-3);
        assert!((d.bbox[1] - 300.0).abs() < 1e-3);
        assert!((d.bbox[2] - 740.0).abs() < 1e-3);
        assert!((d.bbox[3] - 420.0).abs() < 1e-3);
    }

    #[test]
    fn test_postprocess_filters_low_confidence() {
        let mut output = vec![0.0f32; YOLO_PREDICTIONS * (4 + DEFECT_CLASSES)];
        output[0] = 320.0;
        output[YOLO_PREDICTIONS] = 320.0;
        output[YOLO_PREDICTIONS * 2] = 50.0;
        output[YOLO_PREDICTIONS * 3] = 50.0;
        output[YOLO_PREDICTIONS * 4] = 0.2;

        assert!(postprocess(&output, 1.0, 0.0, 0.0, 0.5, 0.45).is_empty());
    }

    #[test]
    fn test_preprocess_shapes_and_letterbox_params() {
        let src = vec![0u8; 1280 * 720 * 3];
        let (input, scale, pad_x, pad_y) = preprocess(&src, 1280, 720);
        assert_eq!(input.len(), 3 * YOLO_INPUT_SIZE * YOLO_INPUT_SIZE);
        assert!((scale - 0.5).abs() < 1e-6);
        assert!((pad_x - 0.0).abs() < 1e-6);
        assert!((pad_y - 140.0).abs() < 1e-6);
    }
}
