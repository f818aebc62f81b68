// src/types.rs

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub analysis: AnalysisConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Process every Nth decoded frame (>= 1).
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,
    /// Matched detections required before a track can become stable.
    #[serde(default = "default_min_track_length")]
    pub min_track_length: u32,
    /// Minimum IoU to match a detection to an existing track, and the mean
    /// consecutive IoU a track needs to stabilize. In (0, 1].
    #[serde(default = "default_tracking_threshold")]
    pub tracking_threshold: f32,
    /// Cap on concurrently live (non-retired) tracks. Excess spawns in a
    /// frame are dropped, lowest best-IoU first.
    #[serde(default = "default_max_tracks")]
    pub max_tracks: u32,
    /// Consecutive missed frames tolerated before a track retires.
    /// Defaults to min_track_length when absent.
    #[serde(default)]
    pub patience: Option<u32>,
    #[serde(default = "default_true")]
    pub enable_frame_quality_assessment: bool,
    /// Hard cap on processed frames per video. None = whole video.
    #[serde(default)]
    pub max_frames: Option<u64>,
}

impl AnalysisConfig {
    pub fn patience(&self) -> u32 {
        self.patience.unwrap_or(self.min_track_length)
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_skip: default_frame_skip(),
            min_track_length: default_min_track_length(),
            tracking_threshold: default_tracking_threshold(),
            max_tracks: default_max_tracks(),
            patience: None,
            enable_frame_quality_assessment: true,
            max_frames: None,
        }
    }
}

fn default_frame_skip() -> u32 {
    1
}
fn default_min_track_length() -> u32 {
    3
}
fn default_tracking_threshold() -> f32 {
    0.7
}
fn default_max_tracks() -> u32 {
    50
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_dir: String,
    pub output_dir: String,
    #[serde(default)]
    pub output_annotated_video: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

// ============================================================================
// FRAMES & DETECTIONS
// ============================================================================

/// One decoded RGB frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.len() < self.width * self.height * 3
    }
}

/// Road-surface defect classes emitted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectClass {
    SmallPothole,
    MediumPothole,
    LargePothole,
    Crack,
    Sinkhole,
    RoadDamage,
    SurfaceDeterioration,
    EdgeDrop,
}

impl DefectClass {
    pub fn from_class_id(id: usize) -> Option<Self> {
        match id {
            0 => Some(Self::SmallPothole),
            1 => Some(Self::MediumPothole),
            2 => Some(Self::LargePothole),
            3 => Some(Self::Crack),
            4 => Some(Self::Sinkhole),
            5 => Some(Self::RoadDamage),
            6 => Some(Self::SurfaceDeterioration),
            7 => Some(Self::EdgeDrop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmallPothole => "small_pothole",
            Self::MediumPothole => "medium_pothole",
            Self::LargePothole => "large_pothole",
            Self::Crack => "crack",
            Self::Sinkhole => "sinkhole",
            Self::RoadDamage => "road_damage",
            Self::SurfaceDeterioration => "surface_deterioration",
            Self::EdgeDrop => "edge_drop",
        }
    }
}

/// Raw per-frame detection from the detector collaborator. Ephemeral —
/// either annotated and handed to the tracker, or dropped.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] pixels
    pub confidence: f32,
    pub class: DefectClass,
}

/// Severity bucket from joint depth-proxy / area thresholding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn rank(&self) -> u32 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// Detection enriched by the severity classifier.
///
/// `depth_proxy` is a heuristic derived from pixel intensity — darker box
/// regions relative to the rest of the frame read as deeper. It is NOT a
/// calibrated physical depth measurement.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedDetection {
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class: DefectClass,
    pub depth_proxy: f32,
    pub area: f32,
    pub severity: Severity,
    pub risk_score: f32,
}

impl AnnotatedDetection {
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        )
    }
}

// ============================================================================
// PER-FRAME & PER-VIDEO RECORDS
// ============================================================================

/// Append-only record of one processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub quality: f32,
    pub detection_count: usize,
    pub matched_track_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub path: String,
    pub fps: f64,
    pub total_frames: u64,
    pub duration_seconds: f64,
    pub processed_frames: u64,
}

// ============================================================================
// REPORT LABELS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoadCondition {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl RoadCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Critical => "critical",
        }
    }

    /// Worst-first iteration order for the conservative overall-label rule.
    pub const WORST_FIRST: [RoadCondition; 5] = [
        Self::Critical,
        Self::Poor,
        Self::Fair,
        Self::Good,
        Self::Excellent,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenancePriority {
    Low,
    Medium,
    High,
    Immediate,
}

impl MaintenancePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Immediate => "immediate",
        }
    }

    pub const WORST_FIRST: [MaintenancePriority; 4] =
        [Self::Immediate, Self::High, Self::Medium, Self::Low];
}
