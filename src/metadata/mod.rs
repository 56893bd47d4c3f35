// Video metadata used to plan frame sampling

pub mod ffprobe;

use serde::{Deserialize, Serialize};

/// Stream properties of the first video stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Total frames as reported by the container, or estimated from duration * fps
    pub frame_count: u64,
    pub fps: Option<f64>,
    pub duration_ms: Option<i64>,
}

impl VideoInfo {
    /// Bytes of one rgb24 frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn has_frames(&self) -> bool {
        self.frame_count > 0 && self.width > 0 && self.height > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes_and_has_frames() {
        let info = VideoInfo { width: 4, height: 2, frame_count: 10, ..Default::default() };
        assert_eq!(info.frame_bytes(), 24);
        assert!(info.has_frames());
        assert!(!VideoInfo { frame_count: 0, ..info.clone() }.has_frames());
        assert!(!VideoInfo { width: 0, ..info }.has_frames());
    }
}
