// Deepfake Prep Constants
// These values define the on-disk contract between manifest creation, face
// extraction and the face-backed loader. Changing a name here changes the layout.

pub const PIPELINE_VERSION: u32 = 1;

// Dataset layout
pub const DEFAULT_DATA_DIR: &str = "data/FaceForensics++_C23";
pub const REAL_CATEGORY: &str = "original";
pub const FAKE_CATEGORIES: [&str; 6] = [
    "Deepfakes",
    "Face2Face",
    "FaceShifter",
    "FaceSwap",
    "NeuralTextures",
    "DeepFakeDetection",
];

// Manifests
pub const MANIFESTS_FOLDER: &str = "manifests";
pub const TRAIN_MANIFEST: &str = "train_manifest.csv";
pub const TEST_MANIFEST: &str = "test_manifest.csv";
pub const MANIFEST_DELIMITER: char = ',';
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.8;
pub const DEFAULT_SPLIT_SEED: u64 = 42;

// Face crops
pub const FACES_FOLDER: &str = "extracted_faces";
pub const REAL_FACES_FOLDER: &str = "real";
pub const FAKE_FACES_FOLDER: &str = "fake";
pub const CROP_SIZE: u32 = 224;
pub const CROP_PADDING: i64 = 20;
pub const CROP_FORMAT: &str = "jpg";
pub const CROP_FRAME_DIGITS: usize = 4;
pub const CROP_SOURCE_SEPARATOR: &str = "__";
pub const EXTRACTION_REPORT: &str = "extraction_report.json";

// Extraction defaults
pub const DEFAULT_FACES_PER_VIDEO: usize = 5;
pub const DEFAULT_EXTRACT_WORKERS: usize = 1;
pub const DEFAULT_VIDEO_TIMEOUT_SECS: u64 = 120;

// Haar-style detection parameters (scale step, neighbour votes, min box side)
pub const DETECT_SCALE_FACTOR: f64 = 1.1;
pub const DETECT_MIN_NEIGHBORS: u32 = 5;
pub const DETECT_MIN_SIZE: u32 = 30;
// rustface classifier score threshold and window step
pub const DETECT_SCORE_THRESHOLD: f64 = 2.0;
pub const DETECT_WINDOW_STEP: u32 = 4;
pub const FACE_MODEL_FILENAME: &str = "seeta_fd_frontal_v1.0.bin";

// Loader
pub const PLACEHOLDER_RGB: [u8; 3] = [128, 128, 128];
pub const NORMALIZE_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const NORMALIZE_STD: [f32; 3] = [0.229, 0.224, 0.225];
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const TRAIN_LOG_EVERY: usize = 10;

// Tool overrides
pub const ENV_FFMPEG_PATH: &str = "DFPREP_FFMPEG_PATH";
pub const ENV_FFPROBE_PATH: &str = "DFPREP_FFPROBE_PATH";
pub const ENV_FACE_MODEL: &str = "DFPREP_FACE_MODEL";

// Video extensions found in deepfake benchmark releases
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

// Image extensions
pub const IMAGE_EXTENSIONS: [&str; 6] = [
    "jpg", "jpeg", "png", "gif", "bmp", "tiff"
];
