// Extraction scenarios with an in-memory video backend and scripted detector

use std::collections::HashMap;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use super::detector::FaceBox;
use super::frames::{FrameStream, SampledFrame};
use super::*;
use crate::constants::CROP_SIZE;
use crate::metadata::VideoInfo;

#[derive(Clone)]
struct FakeVideo {
    frames: u64,
    /// Stream fails with a timeout after this many frames
    timeout_after: Option<u64>,
    unreadable: bool,
}

impl FakeVideo {
    fn frames(frames: u64) -> Self {
        Self { frames, timeout_after: None, unreadable: false }
    }
}

#[derive(Default)]
struct MemoryBackend {
    videos: HashMap<PathBuf, FakeVideo>,
}

impl MemoryBackend {
    fn with(mut self, path: &Path, video: FakeVideo) -> Self {
        self.videos.insert(path.to_path_buf(), video);
        self
    }
}

struct MemoryStream {
    next: u64,
    stride: u64,
    total: u64,
    emitted: u64,
    timeout_after: Option<u64>,
}

impl FrameStream for MemoryStream {
    fn next_frame(&mut self) -> Result<Option<SampledFrame>> {
        if Some(self.emitted) == self.timeout_after {
            return Err(PrepError::VideoTimeout { path: "mem".to_string(), secs: 1 });
        }
        if self.next >= self.total {
            return Ok(None);
        }
        let frame = SampledFrame {
            index: self.next,
            image: RgbImage::from_pixel(320, 240, Rgb([(self.next % 255) as u8, 80, 160])),
        };
        self.next += self.stride;
        self.emitted += 1;
        Ok(Some(frame))
    }
}

impl VideoBackend for MemoryBackend {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        match self.videos.get(path) {
            Some(v) if v.unreadable => Err(PrepError::UnreadableVideo {
                path: path.display().to_string(),
                reason: "moov atom not found".to_string(),
            }),
            Some(v) => Ok(VideoInfo { width: 320, height: 240, frame_count: v.frames, fps: Some(30.0), duration_ms: None }),
            None => Err(PrepError::UnreadableVideo {
                path: path.display().to_string(),
                reason: "No such file".to_string(),
            }),
        }
    }

    fn open_stream(
        &self,
        path: &Path,
        info: &VideoInfo,
        stride: u64,
        _timeout: Option<Duration>,
    ) -> Result<Box<dyn FrameStream>> {
        let video = self.videos.get(path).cloned().unwrap_or_else(|| FakeVideo::frames(0));
        Ok(Box::new(MemoryStream {
            next: 0,
            stride,
            total: info.frame_count,
            emitted: 0,
            timeout_after: video.timeout_after,
        }))
    }
}

/// Returns the same boxes for every frame.
struct ScriptedDetector {
    boxes: Vec<FaceBox>,
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, frame: &image::GrayImage) -> Result<Vec<FaceBox>> {
        assert_eq!(frame.dimensions(), (320, 240));
        Ok(self.boxes.clone())
    }
}

fn faces(count: usize) -> Vec<FaceBox> {
    (0..count).map(|i| FaceBox::new(20 + 100 * i as i64, 40, 60, 80)).collect()
}

fn scripted_factory(count: usize) -> DetectorFactory {
    Arc::new(move || -> Result<Box<dyn FaceDetector>> { Ok(Box::new(ScriptedDetector { boxes: faces(count) })) })
}

fn extractor(backend: MemoryBackend, faces_per_frame: usize) -> FaceExtractor {
    FaceExtractor::new(
        Arc::new(backend),
        Box::new(ScriptedDetector { boxes: faces(faces_per_frame) }),
        None,
    )
}

fn sorted_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_extraction_is_bounded_and_named() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("original/000.mp4");
    let out = tmp.path().join("faces/real");
    let mut ex = extractor(MemoryBackend::default().with(&video, FakeVideo::frames(300)), 2);

    let outcome = ex.extract_video(&video, &out, 5, None);

    assert_eq!(outcome.status, VideoStatus::Extracted);
    assert_eq!(outcome.faces_written, 5);
    assert_eq!(outcome.frames_sampled, 3);
    assert_eq!(
        sorted_names(&out),
        vec![
            "000_frame0000_face0.jpg",
            "000_frame0000_face1.jpg",
            "000_frame0060_face0.jpg",
            "000_frame0060_face1.jpg",
            "000_frame0120_face0.jpg",
        ]
    );
    for name in sorted_names(&out) {
        assert!(name.contains("000"));
        let img = image::open(out.join(&name)).unwrap();
        assert_eq!((img.width(), img.height()), (CROP_SIZE, CROP_SIZE));
    }
}

#[test]
fn test_single_frame_never_exceeds_target() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("v.mp4");
    let out = tmp.path().join("out");
    let mut ex = extractor(MemoryBackend::default().with(&video, FakeVideo::frames(100)), 4);

    let outcome = ex.extract_video(&video, &out, 3, None);

    assert_eq!(outcome.faces_written, 3);
    assert_eq!(outcome.frames_sampled, 1);
    assert_eq!(sorted_names(&out).len(), 3);
}

#[test]
fn test_short_video_visits_every_frame() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("short.mp4");
    let out = tmp.path().join("out");
    let mut ex = extractor(MemoryBackend::default().with(&video, FakeVideo::frames(3)), 1);

    let outcome = ex.extract_video(&video, &out, 5, None);

    assert_eq!(outcome.frames_sampled, 3);
    assert_eq!(outcome.faces_written, 3);
}

#[test]
fn test_empty_video_yields_zero() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("empty.mp4");
    let out = tmp.path().join("out");
    let mut ex = extractor(MemoryBackend::default().with(&video, FakeVideo::frames(0)), 1);

    let outcome = ex.extract_video(&video, &out, 5, None);

    assert_eq!(outcome.faces_written, 0);
    assert_eq!(outcome.status, VideoStatus::Empty);
    assert!(out.is_dir());
}

#[test]
fn test_unreadable_video_yields_zero() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("broken.mp4");
    let backend = MemoryBackend::default().with(
        &video,
        FakeVideo { frames: 10, timeout_after: None, unreadable: true },
    );
    let mut ex = extractor(backend, 1);

    let outcome = ex.extract_video(&video, &tmp.path().join("out"), 5, None);

    assert_eq!(outcome.faces_written, 0);
    assert!(matches!(outcome.status, VideoStatus::Unreadable(_)));
}

#[test]
fn test_no_detections_is_not_an_error() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("noface.mp4");
    let out = tmp.path().join("out");
    let mut ex = extractor(MemoryBackend::default().with(&video, FakeVideo::frames(50)), 0);

    let outcome = ex.extract_video(&video, &out, 5, None);

    assert_eq!(outcome.status, VideoStatus::NoFaces);
    assert_eq!(outcome.faces_written, 0);
    assert_eq!(outcome.frames_sampled, 5);
    assert!(sorted_names(&out).is_empty());
}

#[test]
fn test_timeout_keeps_partial_count() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("slow.mp4");
    let out = tmp.path().join("out");
    let backend = MemoryBackend::default().with(
        &video,
        FakeVideo { frames: 100, timeout_after: Some(2), unreadable: false },
    );
    let mut ex = extractor(backend, 1);

    let outcome = ex.extract_video(&video, &out, 5, None);

    assert_eq!(outcome.status, VideoStatus::TimedOut);
    assert_eq!(outcome.faces_written, 2);
    assert_eq!(sorted_names(&out).len(), 2);
}

#[test]
fn test_write_failure_is_counted_and_skipped() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("w.mp4");
    let out = tmp.path().join("out");
    // A directory squatting on the first crop's name makes that rename fail
    std::fs::create_dir_all(out.join("w_frame0000_face0.jpg")).unwrap();
    let mut ex = extractor(MemoryBackend::default().with(&video, FakeVideo::frames(100)), 1);

    let outcome = ex.extract_video(&video, &out, 3, None);

    assert_eq!(outcome.write_failures, 1);
    assert_eq!(outcome.faces_written, 3);
    assert_eq!(outcome.frames_sampled, 4);
}

#[test]
fn test_fake_crops_carry_source_tag() {
    let tmp = TempDir::new().unwrap();
    let video = tmp.path().join("Deepfakes/000_003.mp4");
    let out = tmp.path().join("fake");
    let mut ex = extractor(MemoryBackend::default().with(&video, FakeVideo::frames(10)), 1);

    ex.extract_video(&video, &out, 1, Some("Deepfakes"));

    assert_eq!(sorted_names(&out), vec!["000_003__Deepfakes_frame0000_face0.jpg"]);
}

#[test]
fn test_parallel_run_matches_sequential() {
    let tmp = TempDir::new().unwrap();
    let mut backend = MemoryBackend::default();
    let mut jobs = Vec::new();
    for i in 0..6 {
        let path = tmp.path().join(format!("original/{:03}.mp4", i));
        backend = backend.with(&path, FakeVideo::frames(10 * i));
        jobs.push(ExtractionJob::new(path, Label::Real, "original", &tmp.path().join(format!("faces{}", i % 2))));
    }
    let backend: Arc<dyn VideoBackend> = Arc::new(backend);
    let factory = scripted_factory(1);

    let seq = run_jobs(&jobs, 2, 1, None, Arc::clone(&backend), &factory).unwrap();
    for i in 0..2 {
        std::fs::remove_dir_all(tmp.path().join(format!("faces{}", i))).unwrap();
    }
    let par = run_jobs(&jobs, 2, 3, None, backend, &factory).unwrap();

    assert_eq!(seq, par);
    assert_eq!(seq[0].status, VideoStatus::Empty);
    assert!(seq[1..].iter().all(|o| o.faces_written == 2));
}

#[test]
fn test_detector_setup_failure_is_fatal() {
    let backend: Arc<dyn VideoBackend> = Arc::new(MemoryBackend::default());
    let factory: DetectorFactory = Arc::new(|| -> Result<Box<dyn FaceDetector>> { Err(PrepError::Detector("no model".to_string())) });
    let job = ExtractionJob::new(PathBuf::from("a.mp4"), Label::Real, "original", Path::new("faces"));

    assert!(matches!(
        run_jobs(&[job], 5, 1, None, backend, &factory),
        Err(PrepError::Detector(_))
    ));
}

#[test]
fn test_extract_categories_skips_missing_and_caps() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let mut backend = MemoryBackend::default();
    for name in ["original/a.mp4", "original/b.mp4", "original/c.mp4", "Deepfakes/a.mp4"] {
        let path = data.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"").unwrap();
        backend = backend.with(&path, FakeVideo::frames(20));
    }

    let config = PipelineConfig {
        data_dir: data.clone(),
        faces_dir: tmp.path().join("faces"),
        fake_categories: vec!["Deepfakes".to_string(), "FaceSwap".to_string()],
        videos_per_category: Some(2),
        faces_per_video: 2,
        ..PipelineConfig::default()
    };

    let report = extract_categories(&config, Arc::new(backend), &scripted_factory(1)).unwrap();

    assert_eq!(report.skipped_categories, vec!["FaceSwap".to_string()]);
    assert_eq!(report.categories["original"].videos, 2);
    assert_eq!(report.categories["Deepfakes"].videos, 1);
    assert_eq!(report.total_faces(), 6);
    assert!(report.finished_at.is_some());

    assert_eq!(
        sorted_names(&config.faces_dir.join("real")),
        vec![
            "a_frame0000_face0.jpg",
            "a_frame0010_face0.jpg",
            "b_frame0000_face0.jpg",
            "b_frame0010_face0.jpg",
        ]
    );
    assert_eq!(sorted_names(&config.faces_dir.join("fake")).len(), 2);

    let written: ExtractionReport = serde_json::from_str(
        &std::fs::read_to_string(config.faces_dir.join(EXTRACTION_REPORT)).unwrap(),
    )
    .unwrap();
    assert_eq!(written, report);
}

#[test]
fn test_extract_from_manifest_groups_by_label() {
    let tmp = TempDir::new().unwrap();
    let real = tmp.path().join("original/r.mp4");
    let fake = tmp.path().join("NeuralTextures/r.mp4");
    let manifest = tmp.path().join("train_manifest.csv");
    crate::dataset::write_manifest(
        &manifest,
        &[
            crate::dataset::ManifestEntry::new(fake.clone(), Label::Fake),
            crate::dataset::ManifestEntry::new(real.clone(), Label::Real),
        ],
    )
    .unwrap();
    let backend = MemoryBackend::default()
        .with(&real, FakeVideo::frames(5))
        .with(&fake, FakeVideo::frames(5));
    let config = PipelineConfig {
        faces_dir: tmp.path().join("faces"),
        faces_per_video: 1,
        ..PipelineConfig::default()
    };

    let report = extract_from_manifest(&config, &manifest, Arc::new(backend), &scripted_factory(1)).unwrap();

    assert_eq!(report.total_faces(), 2);
    assert_eq!(sorted_names(&config.faces_dir.join("real")), vec!["r_frame0000_face0.jpg"]);
    assert_eq!(
        sorted_names(&config.faces_dir.join("fake")),
        vec!["r__NeuralTextures_frame0000_face0.jpg"]
    );
}

#[test]
fn test_report_merge_is_order_independent() {
    let outcome = |faces: usize, status: VideoStatus| VideoOutcome {
        video_id: "x".to_string(),
        path: PathBuf::from("x.mp4"),
        faces_written: faces,
        frames_sampled: 5,
        detections: faces,
        write_failures: 0,
        status,
    };
    let mut a = ExtractionReport::new(5);
    a.record("original", &outcome(5, VideoStatus::Extracted));
    let mut b = ExtractionReport::new(5);
    b.record("Deepfakes", &outcome(0, VideoStatus::NoFaces));
    b.record("original", &outcome(0, VideoStatus::Empty));

    let mut ab = a.clone();
    ab.merge(&b);
    let mut ba = b.clone();
    ba.merge(&a);

    assert_eq!(ab.categories, ba.categories);
    assert_eq!(ab.totals, ba.totals);
    assert_eq!(ab.totals.videos, 3);
    assert_eq!(ab.totals.faces_written, 5);
    assert_eq!(ab.categories["original"].empty, 1);
}
