//! Error artifact capture.
//!
//! When an attempt blows up we grab a full-page screenshot and the page
//! markup for the post-mortem. Capture runs while the original failure
//! is being handled, so every step here is best-effort and the whole
//! operation never raises.

use crate::browser::RecordedSession;
use crate::logging::append_run_log;
use crate::runtime::{unix_millis, Clock, FileSystem};
use serde_json::json;
use std::path::PathBuf;

/// Paths actually written for one capture. Either side may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedArtifacts {
    pub screenshot: Option<PathBuf>,
    pub markup: Option<PathBuf>,
}

pub struct ErrorArtifacts<'a> {
    fs: &'a dyn FileSystem,
    clock: &'a dyn Clock,
    errors_dir: PathBuf,
}

impl<'a> ErrorArtifacts<'a> {
    pub fn new(fs: &'a dyn FileSystem, clock: &'a dyn Clock, errors_dir: PathBuf) -> Self {
        Self {
            fs,
            clock,
            errors_dir,
        }
    }

    /// Capture `<tag>-<timestampMs>.png` and `.html` into the errors
    /// directory. Screenshot failure does not block the markup snapshot;
    /// a markup read failure degrades to a placeholder document.
    pub fn capture(&self, session: &mut dyn RecordedSession, tag: &str) -> CapturedArtifacts {
        let ts = unix_millis(self.clock);
        let png = self.errors_dir.join(format!("{tag}-{ts}.png"));
        let html = self.errors_dir.join(format!("{tag}-{ts}.html"));
        let mut captured = CapturedArtifacts::default();

        match session.screenshot_to(&png) {
            Ok(()) => captured.screenshot = Some(png),
            Err(error) => append_run_log(
                "warn",
                "artifacts.screenshot_failed",
                json!({ "tag": tag, "error": error.to_string() }),
            ),
        }

        let markup = session
            .page_html()
            .unwrap_or_else(|_| "<no html>".to_string());
        match self.fs.write_string(&html, &markup) {
            Ok(()) => captured.markup = Some(html),
            Err(error) => append_run_log(
                "warn",
                "artifacts.markup_failed",
                json!({ "tag": tag, "error": error.to_string() }),
            ),
        }

        append_run_log(
            "info",
            "artifacts.captured",
            json!({
                "tag": tag,
                "screenshot": captured.screenshot.as_ref().map(|p| p.display().to_string()),
                "markup": captured.markup.as_ref().map(|p| p.display().to_string()),
            }),
        );
        captured
    }
}
