// External tool resolver for ffmpeg/ffprobe and the face detection model
//
// Resolution order:
// 1) Environment variable override (DFPREP_FFMPEG_PATH, etc.)
// 2) File next to the executable
// 3) bin/ (tools) or models/ (model) next to the executable
// 4) PATH fallback for tools, working directory for the model

use std::env;
use std::path::PathBuf;

use crate::constants::{ENV_FACE_MODEL, ENV_FFMPEG_PATH, ENV_FFPROBE_PATH, FACE_MODEL_FILENAME};

/// Get the directory containing the current executable
fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

/// Resolve a file that may be overridden by env var or shipped next to the binary.
fn resolve_file(env_key: &str, filename: &str, subdir: &str) -> Option<PathBuf> {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = exe_dir()?;
    let candidate = dir.join(filename);
    if candidate.exists() {
        return Some(candidate);
    }

    let nested = dir.join(subdir).join(filename);
    if nested.exists() {
        return Some(nested);
    }

    None
}

/// Resolve an external binary, falling back to a bare name for PATH lookup.
fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    resolve_file(env_key, &filename, "bin").unwrap_or_else(|| PathBuf::from(default_name))
}

/// Get path to ffprobe binary
pub fn ffprobe_path() -> PathBuf {
    resolve_tool(ENV_FFPROBE_PATH, "ffprobe")
}

/// Get path to ffmpeg binary
pub fn ffmpeg_path() -> PathBuf {
    resolve_tool(ENV_FFMPEG_PATH, "ffmpeg")
}

/// Get path to the rustface model. An explicit configured path wins.
pub fn face_model_path(configured: Option<&PathBuf>) -> PathBuf {
    if let Some(p) = configured {
        return p.clone();
    }
    resolve_file(ENV_FACE_MODEL, FACE_MODEL_FILENAME, "models")
        .unwrap_or_else(|| PathBuf::from(FACE_MODEL_FILENAME))
}

/// Check if a tool is available at the resolved path
pub fn is_tool_available(tool: &str) -> bool {
    let path = match tool {
        "ffprobe" => ffprobe_path(),
        "ffmpeg" => ffmpeg_path(),
        _ => return false,
    };

    if path.exists() {
        return true;
    }

    std::process::Command::new(&path)
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_tool_fallback() {
        let path = resolve_tool("DFPREP_TEST_NONEXISTENT", "testcmd");
        assert_eq!(path, PathBuf::from("testcmd"));
    }

    #[test]
    fn test_env_override() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let temp_file = temp_dir.path().join("dfprep_test_tool");
        std::fs::write(&temp_file, "test").unwrap();

        std::env::set_var("DFPREP_TEST_TOOL", temp_file.to_str().unwrap());
        let path = resolve_tool("DFPREP_TEST_TOOL", "default");
        assert_eq!(path, temp_file);

        std::env::remove_var("DFPREP_TEST_TOOL");
    }

    #[test]
    fn test_configured_model_wins() {
        let configured = PathBuf::from("/models/custom.bin");
        assert_eq!(face_model_path(Some(&configured)), configured);
    }

    #[test]
    fn test_unknown_tool_unavailable() {
        assert!(!is_tool_available("not-a-tool"));
    }
}
