//! Run report rendering.
//!
//! Writes the machine-readable result list plus two small static HTML
//! pages: the per-attempt result table and the recording index.

use crate::controller::RunState;
use crate::errors::EnrollerError;
use crate::logging::append_run_log;
use crate::runtime::{rfc3339_millis, Clock, FileSystem};
use crate::types::VideoArtifact;
use serde_json::json;
use std::path::Path;

pub fn write_reports(
    fs: &dyn FileSystem,
    clock: &dyn Clock,
    reports_dir: &Path,
    state: &RunState,
) -> Result<(), EnrollerError> {
    let json_path = reports_dir.join("signup_results.json");
    let rendered = serde_json::to_string_pretty(&state.results)
        .map_err(|e| EnrollerError::Io(e.to_string()))?;
    fs.write_string(&json_path, &rendered)?;

    let html_path = reports_dir.join("signup_results.html");
    fs.write_string(&html_path, &render_results_html(state, &rfc3339_millis(clock)))?;

    if state.videos.is_empty() {
        append_run_log("info", "report.no_videos", json!({}));
    } else {
        let mut videos = state.videos.clone();
        videos.sort_by_key(|artifact| artifact.attempt);
        let index_path = reports_dir.join("videos").join("index.html");
        fs.write_string(&index_path, &render_videos_index(&videos))?;
    }

    append_run_log(
        "info",
        "report.written",
        json!({
            "results": state.results.len(),
            "videos": state.videos.len(),
            "dir": reports_dir.display().to_string(),
        }),
    );
    Ok(())
}

fn render_results_html(state: &RunState, run_timestamp: &str) -> String {
    let mut rows = String::new();
    for result in &state.results {
        rows.push_str(&format!(
            "<tr class=\"{status}\"><td>{index}</td><td>{name}</td><td>{base}</td>\
             <td>{used}</td><td>{status}</td><td>{message}</td><td>{attempts}</td></tr>\n",
            status = result.status.as_str(),
            index = result.global_index,
            name = escape_html(&result.name),
            base = escape_html(&result.base_email),
            used = escape_html(&result.used_email),
            message = escape_html(&result.message),
            attempts = result.attempts,
        ));
    }
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Signup Results</title>\n\
         <style>table{{border-collapse:collapse;width:100%}}th,td{{border:1px solid #ccc;padding:6px}}</style>\n\
         </head>\n<body>\n<h1>Signup Results</h1>\n<p>Run: {run_timestamp}</p>\n<table>\n\
         <thead><tr><th>#</th><th>Name</th><th>Base Email</th><th>Used Email</th>\
         <th>Status</th><th>Message</th><th>Attempts</th></tr></thead>\n\
         <tbody>\n{rows}</tbody>\n</table>\n</body>\n</html>\n"
    )
}

fn render_videos_index(videos: &[VideoArtifact]) -> String {
    let mut rows = String::new();
    for artifact in videos {
        let file_name = artifact
            .file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("recording.webm");
        rows.push_str(&format!(
            "<tr><td>{attempt}</td>\
             <td><a href=\"./{file}\" target=\"_blank\">{file}</a></td>\
             <td>{email}</td><td>{recorded}</td></tr>\n",
            attempt = artifact.attempt,
            file = escape_html(file_name),
            email = escape_html(&artifact.email),
            recorded = format_mtime(artifact.mtime_ms),
        ));
    }
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Attempt Videos</title>\n\
         <style>table{{border-collapse:collapse;width:100%}}th,td{{border:1px solid #ccc;padding:6px}}</style>\n\
         </head>\n<body>\n<h1>Attempt Videos</h1>\n<table>\n\
         <thead><tr><th>Attempt</th><th>Video</th><th>Email</th><th>Recorded</th></tr></thead>\n\
         <tbody>\n{rows}</tbody>\n</table>\n</body>\n</html>\n"
    )
}

fn format_mtime(mtime_ms: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(mtime_ms as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| mtime_ms.to_string())
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FakeClock, FakeFileSystem};
    use crate::types::{AttemptResult, AttemptStatus};
    use std::path::PathBuf;

    fn state_with_result() -> RunState {
        let mut state = RunState::new(7);
        let index = state.next_index();
        state.record(AttemptResult {
            global_index: index,
            name: "Dana <Reyes>".to_string(),
            base_email: "dana@x.io".to_string(),
            used_email: "dana+r0a1@x.io".to_string(),
            status: AttemptStatus::Success,
            message: "Account Created Successfully".to_string(),
            attempts: 2,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        });
        state
    }

    #[test]
    fn writes_json_and_html_reports() {
        let fs = FakeFileSystem::default();
        let clock = FakeClock::default();
        let state = state_with_result();

        write_reports(&fs, &clock, Path::new("/reports"), &state).expect("write");

        let json = fs
            .file_contents(Path::new("/reports/signup_results.json"))
            .expect("json");
        assert!(json.contains("\"usedEmail\": \"dana+r0a1@x.io\""));

        let html = fs
            .file_contents(Path::new("/reports/signup_results.html"))
            .expect("html");
        assert!(html.contains("<td>Dana &lt;Reyes&gt;</td>"));
        assert!(html.contains("class=\"SUCCESS\""));
        assert!(html.contains("<td>2</td>"));
    }

    #[test]
    fn no_videos_means_no_index() {
        let fs = FakeFileSystem::default();
        let clock = FakeClock::default();
        let state = state_with_result();

        write_reports(&fs, &clock, Path::new("/reports"), &state).expect("write");
        assert!(!fs.exists(Path::new("/reports/videos/index.html")));
    }

    #[test]
    fn videos_index_is_sorted_by_attempt() {
        let fs = FakeFileSystem::default();
        let clock = FakeClock::default();
        let mut state = state_with_result();
        state.register_video(VideoArtifact {
            attempt: 2,
            file: PathBuf::from("/reports/videos/attempt-2-b@x.io.webm"),
            email: "b@x.io".to_string(),
            mtime_ms: 1_000,
        });
        state.register_video(VideoArtifact {
            attempt: 1,
            file: PathBuf::from("/reports/videos/attempt-1-a@x.io.webm"),
            email: "a@x.io".to_string(),
            mtime_ms: 500,
        });

        write_reports(&fs, &clock, Path::new("/reports"), &state).expect("write");
        let index = fs
            .file_contents(Path::new("/reports/videos/index.html"))
            .expect("index");
        let first = index.find("attempt-1-a@x.io.webm").expect("first");
        let second = index.find("attempt-2-b@x.io.webm").expect("second");
        assert!(first < second);
    }

    #[test]
    fn escape_html_covers_special_characters() {
        assert_eq!(
            escape_html("<b>\"x\" & 'y'</b>"),
            "&lt;b&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/b&gt;"
        );
    }
}
