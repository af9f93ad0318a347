//! Session recording lifecycle.
//!
//! Every attempt records into its own temporary directory so rapid
//! successive sessions can never clobber each other's files. Once the
//! session has closed (which flushes the recording), the produced file is
//! moved into the flat run-level videos directory under a discoverable
//! name. Nothing in here is allowed to fail an attempt.

use crate::logging::append_run_log;
use crate::runtime::{unix_millis, Clock, FileSystem};
use crate::types::VideoArtifact;
use crate::variant::sanitize_filename;
use serde_json::json;
use std::path::PathBuf;

pub const VIDEO_EXTENSIONS: &[&str] = &["webm", "mp4", "mkv"];

/// The per-attempt temporary recording directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecording {
    pub dir: PathBuf,
    pub dir_name: String,
}

pub struct RecordingManager<'a> {
    fs: &'a dyn FileSystem,
    clock: &'a dyn Clock,
    videos_dir: PathBuf,
}

impl<'a> RecordingManager<'a> {
    pub fn new(fs: &'a dyn FileSystem, clock: &'a dyn Clock, videos_dir: PathBuf) -> Self {
        Self {
            fs,
            clock,
            videos_dir,
        }
    }

    /// Create the isolated recording directory for one attempt. The name
    /// embeds the global index and a creation timestamp so directories
    /// stay unique even across rapid attempts. Creation failure is
    /// logged, not raised; the session open will surface any real
    /// problem.
    pub fn provision(&self, global_index: u64) -> AttemptRecording {
        let dir_name = format!("attempt-{global_index}-{}", unix_millis(self.clock));
        let dir = self.videos_dir.join(&dir_name);
        if let Err(error) = self.fs.create_dir_all(&dir) {
            append_run_log(
                "warn",
                "recording.provision_failed",
                json!({ "dir": dir.display().to_string(), "error": error.to_string() }),
            );
        }
        AttemptRecording { dir, dir_name }
    }

    /// Locate the recording flushed into `recording.dir`, move it to the
    /// flat videos directory and return the registered artifact. A
    /// missing file or failed move degrades gracefully: the attempt is
    /// unaffected either way.
    pub fn collect(
        &self,
        recording: &AttemptRecording,
        global_index: u64,
        email: &str,
        synthetic: bool,
    ) -> Option<VideoArtifact> {
        let entries = match self.fs.read_dir(&recording.dir) {
            Ok(entries) => entries,
            Err(error) => {
                append_run_log(
                    "warn",
                    "recording.scan_failed",
                    json!({
                        "dir": recording.dir.display().to_string(),
                        "error": error.to_string(),
                    }),
                );
                return None;
            }
        };

        let produced = entries.iter().find(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| VIDEO_EXTENSIONS.contains(&ext))
                .unwrap_or(false)
        });
        let Some(produced) = produced else {
            append_run_log(
                "warn",
                "recording.missing",
                json!({ "dir": recording.dir.display().to_string() }),
            );
            return None;
        };

        let prefix = if synthetic { "synthetic" } else { "attempt" };
        let dest = self.videos_dir.join(format!(
            "{prefix}-{global_index}-{}.webm",
            sanitize_filename(email)
        ));

        let file = match self.fs.rename(produced, &dest) {
            Ok(()) => {
                self.sweep_leftovers(recording);
                dest
            }
            Err(error) => {
                append_run_log(
                    "warn",
                    "recording.move_failed",
                    json!({
                        "from": produced.display().to_string(),
                        "to": dest.display().to_string(),
                        "error": error.to_string(),
                    }),
                );
                produced.clone()
            }
        };

        if !self.fs.exists(&file) {
            append_run_log(
                "warn",
                "recording.vanished",
                json!({ "file": file.display().to_string() }),
            );
            return None;
        }

        let mtime_ms = self
            .fs
            .modified_ms(&file)
            .unwrap_or_else(|| unix_millis(self.clock));
        append_run_log(
            "info",
            "recording.saved",
            json!({ "file": file.display().to_string(), "attempt": global_index }),
        );
        Some(VideoArtifact {
            attempt: global_index,
            file,
            email: email.to_string(),
            mtime_ms,
        })
    }

    /// Move any stray files up into the flat directory (prefixed with the
    /// attempt dir name) and drop the now-empty temp dir.
    fn sweep_leftovers(&self, recording: &AttemptRecording) {
        if let Ok(remaining) = self.fs.read_dir(&recording.dir) {
            for path in remaining {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    let dest = self
                        .videos_dir
                        .join(format!("{}_{name}", recording.dir_name));
                    let _ = self.fs.rename(&path, &dest);
                }
            }
        }
        let _ = self.fs.remove_dir(&recording.dir);
    }
}
