// Face extraction
//
// Per video: probe -> stride sampling -> grayscale detection -> pad/crop/resize
// -> write under the label folder. Every per-video failure becomes a
// `VideoStatus`; only setup problems (bad config, no detector) are errors.

pub mod crop;
pub mod detector;
pub mod frames;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::constants::{CROP_PADDING, EXTRACTION_REPORT, PIPELINE_VERSION};
use crate::dataset::inventory::{scan_inventory, video_id};
use crate::dataset::{read_manifest, Label};
use crate::error::{PrepError, Result};
use crate::progress::{emit_progress, JobProgress};

use crop::{crop_face, padded_region, save_crop, source_tag, CropName};
use detector::{DetectorFactory, FaceDetector};
use frames::{sample_stride, VideoBackend};

/// How a single video's extraction ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum VideoStatus {
    /// At least one crop written
    Extracted,
    /// Frames sampled but no face detected
    NoFaces,
    Unreadable(String),
    /// Zero frames reported
    Empty,
    TimedOut,
    Failed(String),
}

impl VideoStatus {
    fn from_error(err: &PrepError) -> Self {
        match err {
            PrepError::VideoTimeout { .. } => VideoStatus::TimedOut,
            PrepError::UnreadableVideo { reason, .. } => VideoStatus::Unreadable(reason.clone()),
            PrepError::EmptyVideo(_) => VideoStatus::Empty,
            PrepError::FFprobe(msg) => VideoStatus::Unreadable(msg.clone()),
            other => VideoStatus::Failed(other.to_string()),
        }
    }
}

/// Result of extracting one video. `faces_written` counts files on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoOutcome {
    pub video_id: String,
    pub path: PathBuf,
    pub faces_written: usize,
    pub frames_sampled: usize,
    pub detections: usize,
    pub write_failures: usize,
    pub status: VideoStatus,
}

impl VideoOutcome {
    fn new(path: &Path, video_id: String) -> Self {
        Self {
            video_id,
            path: path.to_path_buf(),
            faces_written: 0,
            frames_sampled: 0,
            detections: 0,
            write_failures: 0,
            status: VideoStatus::NoFaces,
        }
    }

    fn failed(path: &Path, reason: String) -> Self {
        let id = video_id(path).unwrap_or_default();
        let mut outcome = Self::new(path, id);
        outcome.status = VideoStatus::Failed(reason);
        outcome
    }
}

/// Extracts face crops from videos with one owned detector.
pub struct FaceExtractor {
    backend: Arc<dyn VideoBackend>,
    detector: Box<dyn FaceDetector>,
    timeout: Option<Duration>,
}

impl FaceExtractor {
    pub fn new(backend: Arc<dyn VideoBackend>, detector: Box<dyn FaceDetector>, timeout: Option<Duration>) -> Self {
        Self { backend, detector, timeout }
    }

    /// Extract at most `n` faces from `path` into `out_dir`.
    ///
    /// Never fails: unreadable, empty, timed-out and face-less videos all
    /// yield an outcome with zero or partial counts.
    pub fn extract_video(&mut self, path: &Path, out_dir: &Path, n: usize, source: Option<&str>) -> VideoOutcome {
        let id = video_id(path).unwrap_or_else(|| "video".to_string());
        let mut outcome = VideoOutcome::new(path, id);

        if let Err(e) = std::fs::create_dir_all(out_dir) {
            log::warn!("Cannot create {}: {}", out_dir.display(), e);
            outcome.status = VideoStatus::Failed(e.to_string());
            return outcome;
        }

        let info = match self.backend.probe(path) {
            Ok(info) => info,
            Err(e) => {
                log::warn!("Error: Could not open video {}: {}", path.display(), e);
                outcome.status = VideoStatus::from_error(&e);
                return outcome;
            }
        };
        if !info.has_frames() {
            log::warn!("Error: Video has 0 frames: {}", path.display());
            outcome.status = VideoStatus::Empty;
            return outcome;
        }

        let stride = sample_stride(info.frame_count, n);
        let mut stream = match self.backend.open_stream(path, &info, stride, self.timeout) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Error: Could not decode video {}: {}", path.display(), e);
                outcome.status = VideoStatus::from_error(&e);
                return outcome;
            }
        };

        let mut stream_error = None;
        while outcome.faces_written < n {
            let frame = match stream.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    stream_error = Some(e);
                    break;
                }
            };
            outcome.frames_sampled += 1;

            let gray = image::imageops::grayscale(&frame.image);
            let faces = match self.detector.detect(&gray) {
                Ok(faces) => faces,
                Err(e) => {
                    log::warn!("Detection failed on {} frame {}: {}", path.display(), frame.index, e);
                    continue;
                }
            };
            outcome.detections += faces.len();

            let (width, height) = frame.image.dimensions();
            for (face_idx, face) in faces.iter().enumerate() {
                if outcome.faces_written >= n {
                    break;
                }
                let region = match padded_region(face, width, height, CROP_PADDING) {
                    Some(r) => r,
                    None => continue,
                };
                let crop = crop_face(&frame.image, &region);
                let name = CropName::new(outcome.video_id.clone(), source, frame.index, face_idx);
                let target = out_dir.join(name.file_name());
                match save_crop(&crop, &target) {
                    Ok(()) => outcome.faces_written += 1,
                    Err(e) => {
                        outcome.write_failures += 1;
                        log::warn!("Failed to write {}: {}", target.display(), e);
                    }
                }
            }
        }

        outcome.status = match stream_error {
            Some(e) => {
                log::warn!("Error processing {}: {}", path.display(), e);
                VideoStatus::from_error(&e)
            }
            None if outcome.faces_written > 0 => VideoStatus::Extracted,
            None => {
                log::debug!("No faces detected in {}", path.display());
                VideoStatus::NoFaces
            }
        };
        outcome
    }
}

/// One video to extract and where its crops go.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionJob {
    pub path: PathBuf,
    pub label: Label,
    pub category: String,
    pub out_dir: PathBuf,
    /// Crop-name source tag (fake videos only)
    pub source: Option<String>,
}

impl ExtractionJob {
    pub fn new(path: PathBuf, label: Label, category: &str, faces_root: &Path) -> Self {
        let source = match label {
            Label::Fake => Some(source_tag(category)),
            Label::Real => None,
        };
        Self {
            path,
            label,
            category: category.to_string(),
            out_dir: faces_root.join(label.faces_folder()),
            source,
        }
    }
}

/// Run jobs sequentially (`workers == 1`) or on a rayon pool with one
/// detector per worker thread. Outcomes come back in job order.
pub fn run_jobs(
    jobs: &[ExtractionJob],
    faces_per_video: usize,
    workers: usize,
    timeout: Option<Duration>,
    backend: Arc<dyn VideoBackend>,
    factory: &DetectorFactory,
) -> Result<Vec<VideoOutcome>> {
    let total = jobs.len() as u64;
    let done = AtomicU64::new(0);
    let report_progress = |job: &ExtractionJob, outcome: &VideoOutcome| {
        let current = done.fetch_add(1, Ordering::Relaxed) + 1;
        let msg = format!("{} -> {} faces", job.path.display(), outcome.faces_written);
        let progress = JobProgress::new("extract", current, total).with_message(msg);
        let progress = match &outcome.status {
            VideoStatus::Unreadable(reason) | VideoStatus::Failed(reason) => progress.error(reason.clone()),
            VideoStatus::TimedOut => progress.error("timed out"),
            _ => progress,
        };
        emit_progress(&progress);
    };

    // Fail fast when the detector cannot be built at all
    let first = (**factory)()?;

    if workers <= 1 || jobs.len() <= 1 {
        let mut extractor = FaceExtractor::new(backend, first, timeout);
        let outcomes = jobs
            .iter()
            .map(|job| {
                let outcome = extractor.extract_video(&job.path, &job.out_dir, faces_per_video, job.source.as_deref());
                report_progress(job, &outcome);
                outcome
            })
            .collect();
        return Ok(outcomes);
    }
    drop(first);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| PrepError::Other(format!("Failed to build worker pool: {}", e)))?;

    log::info!("Extracting {} videos with {} workers", jobs.len(), workers);
    let outcomes = pool.install(|| {
        jobs.par_iter()
            .map_init(
                || (**factory)().map(|d| FaceExtractor::new(Arc::clone(&backend), d, timeout)),
                |state, job| {
                    let outcome = match state {
                        Ok(extractor) => {
                            extractor.extract_video(&job.path, &job.out_dir, faces_per_video, job.source.as_deref())
                        }
                        Err(e) => VideoOutcome::failed(&job.path, format!("detector unavailable: {}", e)),
                    };
                    report_progress(job, &outcome);
                    outcome
                },
            )
            .collect::<Vec<_>>()
    });
    Ok(outcomes)
}

/// Counts for one category (or the total). Merging is associative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStats {
    pub videos: usize,
    pub videos_with_faces: usize,
    pub faces_written: usize,
    pub frames_sampled: usize,
    pub write_failures: usize,
    pub no_faces: usize,
    pub unreadable: usize,
    pub empty: usize,
    pub timed_out: usize,
    pub failed: usize,
}

impl CategoryStats {
    pub fn record(&mut self, outcome: &VideoOutcome) {
        self.videos += 1;
        self.faces_written += outcome.faces_written;
        self.frames_sampled += outcome.frames_sampled;
        self.write_failures += outcome.write_failures;
        if outcome.faces_written > 0 {
            self.videos_with_faces += 1;
        }
        match outcome.status {
            VideoStatus::Extracted => {}
            VideoStatus::NoFaces => self.no_faces += 1,
            VideoStatus::Unreadable(_) => self.unreadable += 1,
            VideoStatus::Empty => self.empty += 1,
            VideoStatus::TimedOut => self.timed_out += 1,
            VideoStatus::Failed(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &CategoryStats) {
        self.videos += other.videos;
        self.videos_with_faces += other.videos_with_faces;
        self.faces_written += other.faces_written;
        self.frames_sampled += other.frames_sampled;
        self.write_failures += other.write_failures;
        self.no_faces += other.no_faces;
        self.unreadable += other.unreadable;
        self.empty += other.empty;
        self.timed_out += other.timed_out;
        self.failed += other.failed;
    }
}

/// Summary of one extraction run, written as `extraction_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionReport {
    pub pipeline_version: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub faces_per_video: usize,
    pub categories: BTreeMap<String, CategoryStats>,
    /// Category directories that were absent and skipped
    pub skipped_categories: Vec<String>,
    pub totals: CategoryStats,
}

impl ExtractionReport {
    pub fn new(faces_per_video: usize) -> Self {
        Self {
            pipeline_version: PIPELINE_VERSION,
            started_at: Utc::now(),
            finished_at: None,
            faces_per_video,
            categories: BTreeMap::new(),
            skipped_categories: Vec::new(),
            totals: CategoryStats::default(),
        }
    }

    pub fn record(&mut self, category: &str, outcome: &VideoOutcome) {
        self.categories.entry(category.to_string()).or_default().record(outcome);
        self.totals.record(outcome);
    }

    pub fn merge(&mut self, other: &ExtractionReport) {
        for (name, stats) in &other.categories {
            self.categories.entry(name.clone()).or_default().merge(stats);
        }
        for name in &other.skipped_categories {
            if !self.skipped_categories.contains(name) {
                self.skipped_categories.push(name.clone());
            }
        }
        self.totals.merge(&other.totals);
        self.started_at = self.started_at.min(other.started_at);
        self.finished_at = match (self.finished_at, other.finished_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn total_faces(&self) -> usize {
        self.totals.faces_written
    }

    /// Write the report into `dir` via temp file and rename.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(EXTRACTION_REPORT);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&temp_path, json)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(path)
    }

    fn log_summary(&self) {
        for (name, stats) in &self.categories {
            log::info!(
                "Extracted {} faces from {} {} videos ({} without faces, {} unreadable, {} empty, {} timed out)",
                stats.faces_written,
                stats.videos,
                name,
                stats.no_faces,
                stats.unreadable,
                stats.empty,
                stats.timed_out
            );
        }
        for name in &self.skipped_categories {
            log::warn!("Skipped missing category: {}", name);
        }
        log::info!("Total faces extracted: {}", self.totals.faces_written);
    }
}

/// Detector factory for the configured model. A `.xml` model selects the
/// Haar cascade backend.
#[cfg(feature = "opencv")]
pub fn detector_factory(config: &PipelineConfig) -> DetectorFactory {
    let model = crate::tools::face_model_path(config.model_path.as_ref());
    let is_cascade = model
        .extension()
        .map_or(false, |e| e.eq_ignore_ascii_case("xml"));
    if is_cascade {
        detector::haar_factory(&model, &config.detector)
    } else {
        detector::rustface_factory(&model, &config.detector)
    }
}

/// Detector factory for the configured rustface model.
#[cfg(not(feature = "opencv"))]
pub fn detector_factory(config: &PipelineConfig) -> DetectorFactory {
    let model = crate::tools::face_model_path(config.model_path.as_ref());
    detector::rustface_factory(&model, &config.detector)
}

/// Extract every configured category into `<facesDir>/{real,fake}`.
///
/// Missing category directories are logged and skipped. With
/// `videosPerCategory` set only the first K videos (sorted) of each
/// category are processed.
pub fn extract_categories(
    config: &PipelineConfig,
    backend: Arc<dyn VideoBackend>,
    factory: &DetectorFactory,
) -> Result<ExtractionReport> {
    config.validate()?;
    let mut report = ExtractionReport::new(config.faces_per_video);

    let inventory = scan_inventory(&config.data_dir, &config.categories())?;
    for category in &inventory.missing {
        log::warn!(
            "Category directory not found: {}",
            config.data_dir.join(&category.name).display()
        );
        report.skipped_categories.push(category.name.clone());
    }

    let mut jobs = Vec::new();
    for listing in &inventory.listings {
        let limit = config.videos_per_category.unwrap_or(usize::MAX);
        let selected = listing.videos.iter().take(limit);
        log::info!(
            "Processing {} videos from {}",
            listing.videos.len().min(limit),
            listing.category.name
        );
        jobs.extend(selected.map(|v| {
            ExtractionJob::new(v.path.clone(), v.label, &listing.category.name, &config.faces_dir)
        }));
    }

    run_and_report(config, jobs, backend, factory, report)
}

/// Extract only the videos named in a manifest, grouped by label.
/// The category of each entry is its parent directory name.
pub fn extract_from_manifest(
    config: &PipelineConfig,
    manifest: &Path,
    backend: Arc<dyn VideoBackend>,
    factory: &DetectorFactory,
) -> Result<ExtractionReport> {
    config.validate()?;
    let entries = read_manifest(manifest)?;
    log::info!("Extracting {} videos from {}", entries.len(), manifest.display());

    let mut jobs: Vec<ExtractionJob> = entries
        .into_iter()
        .map(|entry| {
            let category = entry
                .video_path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            ExtractionJob::new(entry.video_path, entry.label, &category, &config.faces_dir)
        })
        .collect();
    // Stable sort keeps manifest order within a label
    jobs.sort_by_key(|j| j.label);

    run_and_report(config, jobs, backend, factory, ExtractionReport::new(config.faces_per_video))
}

fn run_and_report(
    config: &PipelineConfig,
    jobs: Vec<ExtractionJob>,
    backend: Arc<dyn VideoBackend>,
    factory: &DetectorFactory,
    mut report: ExtractionReport,
) -> Result<ExtractionReport> {
    let outcomes = run_jobs(
        &jobs,
        config.faces_per_video,
        config.workers,
        config.video_timeout(),
        backend,
        factory,
    )?;
    for (job, outcome) in jobs.iter().zip(&outcomes) {
        report.record(&job.category, outcome);
    }
    report.finish();
    report.log_summary();

    let path = report.write(&config.faces_dir)?;
    log::info!("Wrote extraction report to {}", path.display());
    Ok(report)
}
