// src/main.rs

mod analysis;
mod config;
mod error;
mod frame_quality;
mod orchestrator;
mod pothole_detection;
mod severity;
mod types;
mod video_processor;

use analysis::RoadReport;
use anyhow::{Context, Result};
use orchestrator::{AnnotatedFrameSink, FrameSource, VideoAnalysisOrchestrator};
use pothole_detection::YoloDefectDetector;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use types::Config;
use video_processor::VideoProcessor;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "pothole_analysis={},ort=warn",
            config.logging.level
        ))
        .init();

    info!("🛣️  Road Condition Analysis System Starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Analysis parameters: frame_skip={}, min_track_length={}, tracking_threshold={:.2}, max_tracks={}",
        config.analysis.frame_skip,
        config.analysis.min_track_length,
        config.analysis.tracking_threshold,
        config.analysis.max_tracks
    );

    let mut detector = YoloDefectDetector::new(&config.model)?;
    info!("✓ Detector ready");

    let video_processor = VideoProcessor::new(config.clone());
    let video_files = video_processor.find_video_files()?;

    if video_files.is_empty() {
        error!("No video files found in {}", config.video.input_dir);
        return Ok(());
    }

    info!("Found {} video file(s) to process", video_files.len());

    let mut failures = 0usize;
    for (idx, video_path) in video_files.iter().enumerate() {
        info!("\n========================================");
        info!(
            "Processing video {}/{}: {}",
            idx + 1,
            video_files.len(),
            video_path.display()
        );
        info!("========================================\n");

        match process_video(video_path, &mut detector, &video_processor, &config) {
            Ok(report) => {
                info!("\n✓ Video analyzed successfully!");
                info!(
                    "  Frames processed: {}/{}",
                    report.video_info.processed_frames, report.video_info.total_frames
                );
                info!(
                    "  Detections: {} across {} frames",
                    report.detection_summary.total_detections,
                    report.detection_summary.frames_with_detections
                );
                info!(
                    "  Tracks: {} total, {} stable",
                    report.tracking_summary.total_tracks, report.tracking_summary.stable_tracks
                );
                info!(
                    "  Road condition: {} | Maintenance priority: {}",
                    report.condition_summary.overall.as_str(),
                    report.maintenance_summary.overall.as_str()
                );
                for recommendation in &report.recommendations {
                    info!("  → {}", recommendation);
                }
            }
            Err(e) => {
                failures += 1;
                error!("✗ Failed to analyze {}: {:#}", video_path.display(), e);
            }
        }
    }

    if failures > 0 {
        warn!(
            "{}/{} videos failed to analyze",
            failures,
            video_files.len()
        );
    }
    info!("All videos processed");
    Ok(())
}

fn process_video(
    video_path: &Path,
    detector: &mut YoloDefectDetector,
    video_processor: &VideoProcessor,
    config: &Config,
) -> Result<RoadReport> {
    let mut reader = video_processor.open_video(video_path)?;

    let fps = reader.fps();
    let mut writer = video_processor.create_writer(video_path, reader.width, reader.height, fps)?;

    let orchestrator = VideoAnalysisOrchestrator::new(config.analysis.clone());
    let report = orchestrator.analyze(
        &mut reader,
        detector,
        writer.as_mut().map(|w| w as &mut dyn AnnotatedFrameSink),
    )?;

    if let Some(writer) = writer.as_mut() {
        writer.release()?;
    }

    save_report(&report, video_path, &config.video.output_dir)?;
    Ok(report)
}

fn save_report(report: &RoadReport, video_path: &Path, output_dir: &str) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;

    let stem = video_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video");
    let report_path = PathBuf::from(output_dir).join(format!("{}_report.json", stem));

    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&report_path, json)
        .with_context(|| format!("failed to write {}", report_path.display()))?;

    info!("Report saved: {}", report_path.display());
    Ok(())
}
