// src/analysis/mod.rs
//
// Temporal defect-tracking pipeline modules.
//
// Signal flow:
//   Annotated detections → track_matcher (greedy IoU assignment)
//                            │ on every successful match
//                            ▼
//                          stability (score + active→stable transition)
//   Track registry + frame history → aggregator → RoadReport
//
// Driven frame-by-frame by orchestrator::VideoAnalysisOrchestrator.

pub mod aggregator;
pub mod stability;
pub mod track_matcher;

pub use aggregator::{build_report, RoadReport};
pub use track_matcher::{Track, TrackMatcher, TrackStatus};
