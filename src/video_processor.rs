// src/video_processor.rs

use crate::orchestrator::{AnnotatedFrameSink, FrameSource};
use crate::types::{AnnotatedDetection, Config, Frame, Severity};
use anyhow::Result;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter, VideoWriterTrait},
};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub struct VideoProcessor {
    config: Config,
}

impl VideoProcessor {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn find_video_files(&self) -> Result<Vec<PathBuf>> {
        let mut videos = Vec::new();

        let video_extensions = vec!["mp4", "avi", "mov", "mkv", "MP4", "AVI", "MOV", "MKV"];

        for entry in WalkDir::new(&self.config.video.input_dir)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if let Some(ext) = path.extension() {
                if video_extensions.contains(&ext.to_str().unwrap_or("")) {
                    videos.push(path.to_path_buf());
                }
            }
        }

        videos.sort();
        info!("Found {} video files", videos.len());
        Ok(videos)
    }

    pub fn open_video(&self, path: &Path) -> Result<VideoReader> {
        info!("Opening video: {}", path.display());

        let cap = VideoCapture::from_file(path.to_str().unwrap_or_default(), videoio::CAP_ANY)?;

        if !cap.is_opened()? {
            anyhow::bail!("Failed to open video file: {}", path.display());
        }

        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i64;
        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            width, height, fps, total_frames
        );

        Ok(VideoReader {
            cap,
            path: path.display().to_string(),
            fps,
            total_frames: total_frames.max(0) as u64,
            current_frame: 0,
            width,
            height,
        })
    }

    pub fn create_writer(
        &self,
        input_path: &Path,
        width: i32,
        height: i32,
        fps: f64,
    ) -> Result<Option<AnnotatedVideoWriter>> {
        if !self.config.video.output_annotated_video {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.config.video.output_dir)?;

        let input_name = input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video");
        let output_path = PathBuf::from(&self.config.video.output_dir)
            .join(format!("{}_annotated.mp4", input_name));

        info!("Output video: {}", output_path.display());

        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(
            output_path.to_str().unwrap_or_default(),
            fourcc,
            fps,
            core::Size::new(width, height),
            true,
        )?;

        Ok(Some(AnnotatedVideoWriter { writer, height }))
    }
}

pub struct VideoReader {
    cap: VideoCapture,
    path: String,
    fps: f64,
    total_frames: u64,
    current_frame: u64,
    pub width: i32,
    pub height: i32,
}

impl VideoReader {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();

        // read() returning false covers both stream end and a terminal
        // decoder error; opencv does not distinguish, so end-of-stream is
        // what we report.
        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        let timestamp_ms = if self.fps > 0.0 {
            (self.current_frame as f64 / self.fps) * 1000.0
        } else {
            0.0
        };
        self.current_frame += 1;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        let data = rgb_mat.data_bytes()?.to_vec();

        Ok(Some(Frame {
            data,
            width: self.width as usize,
            height: self.height as usize,
            timestamp_ms,
        }))
    }
}

impl FrameSource for VideoReader {
    fn video_path(&self) -> &str {
        &self.path
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.read_frame()
    }
}

// ============================================================================
// ANNOTATED OUTPUT
// ============================================================================

pub struct AnnotatedVideoWriter {
    writer: VideoWriter,
    height: i32,
}

impl AnnotatedVideoWriter {
    pub fn release(&mut self) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}

impl AnnotatedFrameSink for AnnotatedVideoWriter {
    fn write_frame(
        &mut self,
        frame: &Frame,
        annotations: &[(u64, AnnotatedDetection)],
        live_tracks: usize,
    ) -> Result<()> {
        let mat = draw_detections(&frame.data, self.height, annotations, live_tracks)?;
        self.writer.write(&mat)?;
        Ok(())
    }
}

fn severity_color(severity: Severity) -> core::Scalar {
    // BGR
    match severity {
        Severity::Low => core::Scalar::new(0.0, 255.0, 0.0, 0.0),      // Green
        Severity::Medium => core::Scalar::new(0.0, 255.0, 255.0, 0.0), // Yellow
        Severity::High => core::Scalar::new(0.0, 165.0, 255.0, 0.0),   // Orange
        Severity::Critical => core::Scalar::new(0.0, 0.0, 255.0, 0.0), // Red
    }
}

/// Draw tracked detections with severity-coded boxes plus an info header.
pub fn draw_detections(
    frame: &[u8],
    height: i32,
    annotations: &[(u64, AnnotatedDetection)],
    live_tracks: usize,
) -> Result<Mat> {
    let mat = Mat::from_slice(frame)?;
    let mat = mat.reshape(3, height)?;

    let mut bgr_mat = Mat::default();
    imgproc::cvt_color(&mat, &mut bgr_mat, imgproc::COLOR_RGB2BGR, 0)?;
    let mut output = bgr_mat.try_clone()?;

    for (track_id, detection) in annotations {
        let color = severity_color(detection.severity);
        let [x1, y1, x2, y2] = detection.bbox;
        let rect = core::Rect::new(
            x1 as i32,
            y1 as i32,
            (x2 - x1).max(1.0) as i32,
            (y2 - y1).max(1.0) as i32,
        );

        imgproc::rectangle(&mut output, rect, color, 2, imgproc::LINE_8, 0)?;

        let label = format!(
            "#{} {} {:.0}%",
            track_id,
            detection.severity.as_str(),
            detection.confidence * 100.0
        );
        let label_y = (y1 as i32 - 6).max(14);
        imgproc::put_text(
            &mut output,
            &label,
            core::Point::new(x1 as i32, label_y),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            color,
            1,
            imgproc::LINE_8,
            false,
        )?;
    }

    // Info overlay background
    imgproc::rectangle(
        &mut output,
        core::Rect::new(5, 5, 360, 34),
        core::Scalar::new(40.0, 40.0, 40.0, 0.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;

    let header = format!(
        "Defects: {} | Live tracks: {}",
        annotations.len(),
        live_tracks
    );
    imgproc::put_text(
        &mut output,
        &header,
        core::Point::new(15, 28),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.6,
        core::Scalar::new(255.0, 255.0, 255.0, 0.0),
        1,
        imgproc::LINE_8,
        false,
    )?;

    Ok(output)
}
