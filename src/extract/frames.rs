// Frame sampling
// FFmpeg decodes the video and keeps every `stride`-th frame via the select
// filter; raw rgb24 frames are read from its stdout one at a time.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use image::RgbImage;

use crate::error::{PrepError, Result};
use crate::metadata::{ffprobe, VideoInfo};

/// One decoded frame and its 0-based index in the source video.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub index: u64,
    pub image: RgbImage,
}

/// Sequential access to the sampled frames of one video.
pub trait FrameStream {
    /// `Ok(None)` once the video is exhausted.
    fn next_frame(&mut self) -> Result<Option<SampledFrame>>;
}

/// Opens videos for sampling. Shared across extraction workers.
pub trait VideoBackend: Send + Sync {
    fn probe(&self, path: &Path) -> Result<VideoInfo>;

    /// Stream frames `0, stride, 2*stride, ...` below `info.frame_count`.
    fn open_stream(
        &self,
        path: &Path,
        info: &VideoInfo,
        stride: u64,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn FrameStream>>;
}

/// Sampling stride: `max(1, total / n)`.
pub fn sample_stride(total_frames: u64, n: usize) -> u64 {
    (total_frames / n.max(1) as u64).max(1)
}

/// Indices visited for a video of `total_frames` frames.
pub fn sample_indices(total_frames: u64, stride: u64) -> impl Iterator<Item = u64> {
    (0..total_frames).step_by(stride.max(1) as usize)
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl VideoBackend for FfmpegBackend {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        ffprobe::probe(path)
    }

    fn open_stream(
        &self,
        path: &Path,
        info: &VideoInfo,
        stride: u64,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn FrameStream>> {
        let stream = FfmpegFrameStream::spawn(path, info, stride, timeout)?;
        Ok(Box::new(stream))
    }
}

pub struct FfmpegFrameStream {
    path: PathBuf,
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    frame_bytes: usize,
    stride: u64,
    next_index: u64,
    remaining: u64,
    emitted: u64,
    stderr: Option<JoinHandle<Vec<String>>>,
    timed_out: Arc<AtomicBool>,
    timeout: Option<Duration>,
    // Dropping the sender releases the watchdog
    watchdog: Option<mpsc::Sender<()>>,
    finished: bool,
}

impl FfmpegFrameStream {
    fn spawn(path: &Path, info: &VideoInfo, stride: u64, timeout: Option<Duration>) -> Result<Self> {
        let stride = stride.max(1);
        let expected = sample_indices(info.frame_count, stride).count() as u64;

        let mut cmd = Command::new(crate::tools::ffmpeg_path());
        cmd.args(["-hide_banner", "-loglevel", "error", "-noautorotate", "-i"])
            .arg(path)
            .args(["-vf", &format!("select='not(mod(n\\,{}))'", stride)])
            .args(["-vsync", "0"])
            .args(["-frames:v", &expected.to_string()])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| PrepError::FFmpeg(format!("Failed to spawn ffmpeg: {}", e)))?;

        let stderr = child.stderr.take().map(spawn_stderr_collector);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PrepError::FFmpeg("ffmpeg stdout missing".to_string()))?;

        let child = Arc::new(Mutex::new(child));
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = timeout.map(|limit| spawn_watchdog(Arc::clone(&child), Arc::clone(&timed_out), limit));

        log::debug!(
            "Sampling {} (stride {}, {} frames expected)",
            path.display(),
            stride,
            expected
        );

        Ok(Self {
            path: path.to_path_buf(),
            child,
            stdout,
            width: info.width,
            height: info.height,
            frame_bytes: info.frame_bytes(),
            stride,
            next_index: 0,
            remaining: expected,
            emitted: 0,
            stderr,
            timed_out,
            timeout,
            watchdog,
            finished: false,
        })
    }

    fn timeout_error(&self) -> PrepError {
        PrepError::VideoTimeout {
            path: self.path.display().to_string(),
            secs: self.timeout.map(|d| d.as_secs()).unwrap_or(0),
        }
    }

    /// Reap the child and report a failure when nothing was decoded.
    fn finish(&mut self) -> Result<Option<SampledFrame>> {
        self.finished = true;

        // Poll so the watchdog can still take the lock and kill a hung process
        let status = loop {
            let polled = match self.child.lock() {
                Ok(mut child) => child.try_wait()?,
                Err(_) => return Err(PrepError::FFmpeg("ffmpeg process lock poisoned".to_string())),
            };
            if let Some(status) = polled {
                break status;
            }
            std::thread::sleep(Duration::from_millis(10));
        };
        self.watchdog.take();
        let stderr_lines = self
            .stderr
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        // A kill after the last expected frame does not lose any samples
        if self.remaining > 0 && self.timed_out.load(Ordering::SeqCst) {
            return Err(self.timeout_error());
        }

        if !status.success() {
            let tail = if stderr_lines.is_empty() {
                "<no ffmpeg stderr>".to_string()
            } else {
                stderr_lines.join(" | ")
            };
            if self.emitted == 0 {
                return Err(PrepError::UnreadableVideo {
                    path: self.path.display().to_string(),
                    reason: tail,
                });
            }
            log::warn!(
                "ffmpeg stopped early on {} after {} frames: {}",
                self.path.display(),
                self.emitted,
                tail
            );
        }
        Ok(None)
    }
}

impl FrameStream for FfmpegFrameStream {
    fn next_frame(&mut self) -> Result<Option<SampledFrame>> {
        if self.finished {
            return Ok(None);
        }
        if self.remaining == 0 {
            return self.finish();
        }

        let mut buf = vec![0u8; self.frame_bytes];
        let n = read_exact_or_eof(&mut self.stdout, &mut buf)?;
        if n < self.frame_bytes {
            // Short read: end of stream, a truncated file or a killed process
            return self.finish();
        }

        let image = RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| PrepError::FFmpeg("frame buffer size mismatch".to_string()))?;
        let frame = SampledFrame { index: self.next_index, image };

        self.next_index += self.stride;
        self.remaining -= 1;
        self.emitted += 1;
        Ok(Some(frame))
    }
}

impl Drop for FfmpegFrameStream {
    fn drop(&mut self) {
        self.watchdog.take();
        if !self.finished {
            if let Ok(mut child) = self.child.lock() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

fn spawn_watchdog(child: Arc<Mutex<Child>>, timed_out: Arc<AtomicBool>, limit: Duration) -> mpsc::Sender<()> {
    let (tx, rx) = mpsc::channel::<()>();
    std::thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(limit) {
            timed_out.store(true, Ordering::SeqCst);
            if let Ok(mut child) = child.lock() {
                let _ = child.kill();
            }
        }
    });
    tx
}

fn read_exact_or_eof(r: &mut dyn Read, buf: &mut [u8]) -> Result<usize> {
    let mut got = 0usize;
    while got < buf.len() {
        let n = r.read(&mut buf[got..])?;
        if n == 0 {
            return Ok(got);
        }
        got += n;
    }
    Ok(got)
}

fn spawn_stderr_collector(stderr: impl Read + Send + 'static) -> JoinHandle<Vec<String>> {
    std::thread::spawn(move || {
        let mut lines = VecDeque::new();
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line).unwrap_or(0);
            if read == 0 {
                break;
            }
            let cleaned = line.trim().to_string();
            if cleaned.is_empty() {
                continue;
            }
            lines.push_back(cleaned);
            if lines.len() > 20 {
                lines.pop_front();
            }
        }

        lines.into_iter().collect::<Vec<_>>()
    })
}
