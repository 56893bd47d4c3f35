// FFprobe wrapper for video stream properties

use std::path::Path;
use std::process::Command;
use serde::Deserialize;
use crate::error::{PrepError, Result};
use crate::metadata::VideoInfo;

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    streams: Option<Vec<FFprobeStream>>,
    format: Option<FFprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
}

/// Run ffprobe on a video and read the first video stream's properties.
///
/// Frame count comes from the container's `nb_frames`; when absent it is
/// estimated from duration and frame rate, and as a last resort packets
/// are counted (slow, decodes the demuxer only).
pub fn probe(path: &Path) -> Result<VideoInfo> {
    let output = run_ffprobe(path, false)?;
    let mut info = parse_probe_output(&output)?;

    if info.frame_count == 0 && info.width > 0 {
        if let Ok(counted) = run_ffprobe(path, true).and_then(|o| parse_probe_output(&o)) {
            info.frame_count = counted.frame_count;
        }
    }

    Ok(info)
}

fn run_ffprobe(path: &Path, count_packets: bool) -> Result<Vec<u8>> {
    let mut cmd = Command::new(crate::tools::ffprobe_path());
    cmd.args(["-v", "error", "-select_streams", "v:0"]);
    if count_packets {
        cmd.arg("-count_packets");
    }
    cmd.args([
        "-show_entries",
        "stream=width,height,nb_frames,nb_read_packets,r_frame_rate,avg_frame_rate,duration:format=duration",
        "-print_format",
        "json",
    ]);
    cmd.arg(path);

    let output = cmd
        .output()
        .map_err(|e| PrepError::FFprobe(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PrepError::UnreadableVideo {
            path: path.display().to_string(),
            reason: stderr.trim().to_string(),
        });
    }

    Ok(output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> Result<VideoInfo> {
    let probe_output: FFprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| PrepError::FFprobe(format!("Failed to parse ffprobe output: {}", e)))?;

    let stream = probe_output
        .streams
        .and_then(|s| s.into_iter().next())
        .ok_or_else(|| PrepError::FFprobe("no video stream".to_string()))?;

    let fps = parse_frame_rate(stream.avg_frame_rate.as_deref())
        .or_else(|| parse_frame_rate(stream.r_frame_rate.as_deref()));

    let duration_ms = parse_duration_ms(stream.duration.as_deref()).or_else(|| {
        probe_output
            .format
            .as_ref()
            .and_then(|f| parse_duration_ms(f.duration.as_deref()))
    });

    let frame_count = parse_count(stream.nb_read_packets.as_deref())
        .or_else(|| parse_count(stream.nb_frames.as_deref()))
        .or_else(|| estimate_frames(duration_ms, fps))
        .unwrap_or(0);

    Ok(VideoInfo {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        frame_count,
        fps,
        duration_ms,
    })
}

/// Parse frame rate string like "30000/1001" to f64
fn parse_frame_rate(rate_str: Option<&str>) -> Option<f64> {
    let rate_str = rate_str?;
    if let Some((num, den)) = rate_str.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate_str.parse().ok().filter(|r: &f64| *r > 0.0)
}

/// Parse duration string to milliseconds
fn parse_duration_ms(duration_str: Option<&str>) -> Option<i64> {
    let seconds: f64 = duration_str?.parse().ok()?;
    Some((seconds * 1000.0) as i64)
}

fn parse_count(count_str: Option<&str>) -> Option<u64> {
    count_str?.parse::<u64>().ok().filter(|n| *n > 0)
}

fn estimate_frames(duration_ms: Option<i64>, fps: Option<f64>) -> Option<u64> {
    let frames = (duration_ms? as f64 / 1000.0 * fps?).round();
    if frames >= 1.0 {
        Some(frames as u64)
    } else {
        None
    }
}

/// Check if ffprobe is available
pub fn is_available() -> bool {
    crate::tools::is_tool_available("ffprobe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        let r = parse_frame_rate(Some("30000/1001")).unwrap();
        assert!((r - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate(Some("25")), Some(25.0));
        assert_eq!(parse_frame_rate(Some("0/0")), None);
        assert_eq!(parse_frame_rate(None), None);
    }

    #[test]
    fn test_parse_output_with_nb_frames() {
        let json = br#"{"streams":[{"width":640,"height":480,"nb_frames":"300","r_frame_rate":"30/1","avg_frame_rate":"30/1","duration":"10.0"}],"format":{"duration":"10.0"}}"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 480);
        assert_eq!(info.frame_count, 300);
        assert_eq!(info.duration_ms, Some(10_000));
    }

    #[test]
    fn test_parse_output_estimates_missing_count() {
        let json = br#"{"streams":[{"width":320,"height":240,"avg_frame_rate":"25/1"}],"format":{"duration":"4.0"}}"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_count, 100);
    }

    #[test]
    fn test_parse_output_zero_frames() {
        let json = br#"{"streams":[{"width":320,"height":240,"nb_frames":"0"}],"format":{}}"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_count, 0);
        assert!(!info.has_frames());
    }

    #[test]
    fn test_parse_output_without_video_stream() {
        let json = br#"{"streams":[],"format":{"duration":"3.0"}}"#;
        assert!(parse_probe_output(json).is_err());
    }
}
