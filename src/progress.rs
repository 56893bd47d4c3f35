// Stage progress records and helpers
//
// Long batch stages (manifest scan, extraction) report through this one shape.
// Records render as log lines; nothing here affects counts.

use std::fmt;

/// Progress record emitted during long-running stages.
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub phase: String,
    pub current: u64,
    pub total: u64,
    pub percent: f64,
    pub message: String,
    pub is_error: bool,
    pub error_message: Option<String>,
}

impl JobProgress {
    pub fn new(phase: impl Into<String>, current: u64, total: u64) -> Self {
        let total_safe = total.max(1);
        let percent = (current as f64 / total_safe as f64) * 100.0;
        Self {
            phase: phase.into(),
            current,
            total,
            percent: percent.min(100.0),
            message: String::new(),
            is_error: false,
            error_message: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = msg.into();
        self
    }

    pub fn error(mut self, msg: impl Into<String>) -> Self {
        self.is_error = true;
        self.error_message = Some(msg.into());
        self
    }
}

impl fmt::Display for JobProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{} ({:.1}%)",
            self.phase, self.current, self.total, self.percent
        )?;
        if !self.message.is_empty() {
            write!(f, " {}", self.message)?;
        }
        if let Some(ref err) = self.error_message {
            write!(f, " error: {}", err)?;
        }
        Ok(())
    }
}

/// Emit a progress record through the logger.
pub fn emit_progress(progress: &JobProgress) {
    if progress.is_error {
        log::warn!("{}", progress);
    } else {
        log::info!("{}", progress);
    }
}
