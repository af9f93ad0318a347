//! The attempt controller.
//!
//! Expands each input record into up to `per_row_attempts` email-variant
//! attempts, executes every attempt inside a fresh recorded session, and
//! classifies outcomes into the run's result list. When the record list
//! runs dry before the success target is met, a bounded synthetic phase
//! keeps manufacturing attempts from a fallback identity.
//!
//! Execution is strictly sequential. Overlapping sessions against the
//! same target risk interleaved browser state and corrupted recordings;
//! throughput scales by running independent processes, not by
//! parallelizing inside one controller.

use crate::artifacts::ErrorArtifacts;
use crate::browser::{AttemptOutcome, SessionFactory, SessionSpec};
use crate::config::AppConfig;
use crate::logging::{append_run_log, best_effort};
use crate::recording::RecordingManager;
use crate::runtime::{rfc3339_millis, unix_millis, Clock, FileSystem, Terminal};
use crate::types::{AttemptResult, AttemptStatus, ExecutorOptions, SignupRecord, VideoArtifact};
use crate::variant::{email_variant, retry_token, synthetic_token};
use serde_json::json;
use std::time::Duration;

/// Mutable state of one run, owned by the controller and mutated by no
/// one else. The success count is always derived from the result list.
#[derive(Debug)]
pub struct RunState {
    pub run_id: u64,
    pub results: Vec<AttemptResult>,
    pub videos: Vec<VideoArtifact>,
    global_index: u64,
}

impl RunState {
    pub fn new(run_id: u64) -> Self {
        Self {
            run_id,
            results: Vec::new(),
            videos: Vec::new(),
            global_index: 0,
        }
    }

    /// Next attempt number. Strictly increasing, first attempt is 1.
    pub fn next_index(&mut self) -> u64 {
        self.global_index += 1;
        self.global_index
    }

    pub fn record(&mut self, result: AttemptResult) {
        append_run_log(
            "info",
            "attempt.resolved",
            json!({
                "globalIndex": result.global_index,
                "status": result.status.as_str(),
                "usedEmail": result.used_email,
                "message": result.message,
            }),
        );
        self.results.push(result);
    }

    pub fn register_video(&mut self, artifact: VideoArtifact) {
        self.videos.push(artifact);
    }

    pub fn success_count(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.status == AttemptStatus::Success)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptKind {
    Primary,
    Synthetic,
}

pub struct AttemptController<'a> {
    cfg: &'a AppConfig,
    factory: &'a dyn SessionFactory,
    fs: &'a dyn FileSystem,
    clock: &'a dyn Clock,
    terminal: &'a dyn Terminal,
}

impl<'a> AttemptController<'a> {
    pub fn new(
        cfg: &'a AppConfig,
        factory: &'a dyn SessionFactory,
        fs: &'a dyn FileSystem,
        clock: &'a dyn Clock,
        terminal: &'a dyn Terminal,
    ) -> Self {
        Self {
            cfg,
            factory,
            fs,
            clock,
            terminal,
        }
    }

    /// Run the primary phase over `records`, then the synthetic phase if
    /// the target is still unmet. Returns the completed run state for
    /// report generation.
    pub fn run(&self, records: &[SignupRecord]) -> RunState {
        let run_id = unix_millis(self.clock);
        let mut state = RunState::new(run_id);
        append_run_log(
            "info",
            "run.started",
            json!({
                "runId": run_id,
                "records": records.len(),
                "targetSuccess": self.cfg.run.target_success,
            }),
        );

        self.run_primary(records, &mut state);
        if state.success_count() < self.target() {
            self.run_synthetic(records.first(), &mut state);
        }

        append_run_log(
            "info",
            "run.finished",
            json!({
                "runId": run_id,
                "attempts": state.results.len(),
                "successes": state.success_count(),
            }),
        );
        state
    }

    fn target(&self) -> usize {
        self.cfg.run.target_success as usize
    }

    fn run_primary(&self, records: &[SignupRecord], state: &mut RunState) {
        for (record_index, raw) in records.iter().enumerate() {
            if state.success_count() >= self.target() {
                break;
            }
            let record = raw.clone().with_defaults();
            let base_email = record.email.clone();

            for attempt_index in 0..self.cfg.run.per_row_attempts {
                if state.success_count() >= self.target() {
                    break;
                }
                let global_index = state.next_index();
                let used_email = if attempt_index == 0 {
                    base_email.clone()
                } else {
                    email_variant(&base_email, &retry_token(record_index, attempt_index))
                };
                let mut attempt_record = record.clone();
                attempt_record.email = used_email;
                self.say(&format!(
                    "attempt #{global_index} (record {record_index} variant {attempt_index}) -> {}",
                    attempt_record.email
                ));

                let result = self.execute_attempt(
                    state,
                    &attempt_record,
                    &base_email,
                    global_index,
                    AttemptKind::Primary,
                );
                let status = result.status;
                let used = result.used_email.clone();
                let message = result.message.clone();
                state.record(result);

                match status {
                    AttemptStatus::Success => {
                        self.say(&format!(
                            "created account {used} ({}/{})",
                            state.success_count(),
                            self.target()
                        ));
                        break;
                    }
                    AttemptStatus::EmailExists => {
                        self.say(&format!("email exists for {used}, trying next variant"));
                        self.pause_between_variants();
                    }
                    AttemptStatus::Exception => {
                        // Backoff already happened inside the attempt.
                    }
                    AttemptStatus::Failed | AttemptStatus::UnknownError => {
                        self.say(&format!("attempt result: {} - {message}", status.as_str()));
                        self.pause_between_variants();
                    }
                }
            }
        }
    }

    fn run_synthetic(&self, first_record: Option<&SignupRecord>, state: &mut RunState) {
        let fallback = first_record
            .cloned()
            .map(SignupRecord::with_defaults)
            .unwrap_or_else(|| self.placeholder_identity(state.run_id));
        let base_email = fallback.email.clone();
        let mut synthetic_index: u64 = 0;

        while state.success_count() < self.target() {
            synthetic_index += 1;
            if synthetic_index > self.cfg.run.max_synthetic_attempts {
                let shortfall = self.target() - state.success_count();
                append_run_log(
                    "error",
                    "synthetic.budget_exhausted",
                    json!({
                        "budget": self.cfg.run.max_synthetic_attempts,
                        "shortfall": shortfall,
                    }),
                );
                self.say(&format!(
                    "synthetic budget of {} exhausted, {shortfall} short of target",
                    self.cfg.run.max_synthetic_attempts
                ));
                break;
            }

            let global_index = state.next_index();
            let mut record = fallback.clone();
            record.email = email_variant(&base_email, &synthetic_token(synthetic_index));
            self.say(&format!(
                "synthetic attempt #{synthetic_index} -> {}",
                record.email
            ));

            let result = self.execute_attempt(
                state,
                &record,
                &base_email,
                global_index,
                AttemptKind::Synthetic,
            );
            let status = result.status;
            state.record(result);
            if status == AttemptStatus::Success {
                self.say(&format!(
                    "synthetic success ({}/{})",
                    state.success_count(),
                    self.target()
                ));
            }
        }
    }

    /// One attempt, end to end: provision recording, open the session,
    /// run the executor (with same-variant retries for primary attempts),
    /// clean up on success, close the session and collect the recording.
    /// Always returns exactly one result; nothing here ever raises.
    fn execute_attempt(
        &self,
        state: &mut RunState,
        record: &SignupRecord,
        base_email: &str,
        global_index: u64,
        kind: AttemptKind,
    ) -> AttemptResult {
        let recordings =
            RecordingManager::new(self.fs, self.clock, self.cfg.reports.dir.join("videos"));
        let capturer =
            ErrorArtifacts::new(self.fs, self.clock, self.cfg.reports.dir.join("errors"));
        let recording = recordings.provision(global_index);
        let spec = SessionSpec {
            label: format!("attempt-{global_index}"),
            recording_dir: recording.dir.clone(),
            width: self.cfg.recording.width,
            height: self.cfg.recording.height,
        };
        let options = ExecutorOptions {
            run_id: state.run_id,
            index: global_index,
            max_attempts: self.cfg.run.executor_max_attempts,
        };

        let mut session = match self.factory.open(&spec) {
            Ok(session) => session,
            Err(error) => {
                append_run_log(
                    "error",
                    "attempt.session_open_failed",
                    json!({ "globalIndex": global_index, "error": error.to_string() }),
                );
                return self.exception_result(
                    record,
                    base_email,
                    global_index,
                    "session could not be opened",
                );
            }
        };

        let retry_budget = match kind {
            AttemptKind::Primary => self.cfg.run.attempt_retries_on_exception,
            AttemptKind::Synthetic => 0,
        };
        let mut outcome: Option<AttemptOutcome> = None;
        for retry in 0..=retry_budget {
            match session.register(record, &options) {
                Ok(value) => {
                    outcome = Some(value);
                    break;
                }
                Err(error) => {
                    append_run_log(
                        "warn",
                        "attempt.executor_raised",
                        json!({
                            "globalIndex": global_index,
                            "retry": retry,
                            "error": error.to_string(),
                        }),
                    );
                    let tag = match kind {
                        AttemptKind::Primary => format!("signup-ex-g{global_index}-r{retry}"),
                        AttemptKind::Synthetic => format!("synth-ex-g{global_index}"),
                    };
                    capturer.capture(session.as_mut(), &tag);
                    if retry == retry_budget {
                        break;
                    }
                    best_effort("session repair", session.goto_entry());
                    self.backoff(retry);
                }
            }
        }

        if outcome.as_ref().map(|o| o.status) == Some(AttemptStatus::Success) {
            best_effort("confirmation ack", session.acknowledge_continue());
            best_effort("logout", session.logout());
            best_effort("session state clear", session.clear_session_state());
        }
        best_effort("session close", session.close());

        let video_email = outcome
            .as_ref()
            .filter(|o| !o.used_email.is_empty())
            .map(|o| o.used_email.as_str())
            .unwrap_or(&record.email);
        if let Some(artifact) = recordings.collect(
            &recording,
            global_index,
            video_email,
            kind == AttemptKind::Synthetic,
        ) {
            state.register_video(artifact);
        }

        match outcome {
            Some(outcome) => AttemptResult {
                global_index,
                name: record.name.clone(),
                base_email: base_email.to_string(),
                used_email: if outcome.used_email.is_empty() {
                    record.email.clone()
                } else {
                    outcome.used_email
                },
                status: outcome.status,
                message: outcome.message,
                attempts: outcome.attempts,
                timestamp: rfc3339_millis(self.clock),
            },
            None => self.exception_result(
                record,
                base_email,
                global_index,
                "signup executor raised; see reports/errors",
            ),
        }
    }

    fn exception_result(
        &self,
        record: &SignupRecord,
        base_email: &str,
        global_index: u64,
        message: &str,
    ) -> AttemptResult {
        AttemptResult {
            global_index,
            name: record.name.clone(),
            base_email: base_email.to_string(),
            used_email: record.email.clone(),
            status: AttemptStatus::Exception,
            message: message.to_string(),
            attempts: 0,
            timestamp: rfc3339_millis(self.clock),
        }
    }

    fn placeholder_identity(&self, run_id: u64) -> SignupRecord {
        SignupRecord {
            name: "Auto User".to_string(),
            email: format!("autouser{run_id}@example.com"),
            password: "Test@1234".to_string(),
            ..SignupRecord::default()
        }
        .with_defaults()
    }

    fn backoff(&self, retry: u32) {
        let delay_ms = self
            .cfg
            .run
            .base_delay_ms
            .saturating_mul(1u64 << retry.min(16));
        self.sleep_ms(delay_ms);
    }

    fn pause_between_variants(&self) {
        self.sleep_ms(self.cfg.run.pause_between_variants_ms);
    }

    fn sleep_ms(&self, delay_ms: u64) {
        if delay_ms == 0 {
            return;
        }
        let deadline = self.clock.now() + Duration::from_millis(delay_ms);
        best_effort("sleep", self.clock.sleep_until(deadline));
    }

    fn say(&self, line: &str) {
        best_effort("terminal", self.terminal.write_line(line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::scripted::{ScriptedFactory, ScriptedStep};
    use crate::runtime::{FakeClock, FakeFileSystem, FakeTerminal};
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.reports.dir = PathBuf::from("/reports");
        cfg
    }

    fn record(name: &str, email: &str) -> SignupRecord {
        SignupRecord {
            name: name.to_string(),
            email: email.to_string(),
            password: "pw".to_string(),
            ..SignupRecord::default()
        }
    }

    fn run_with(
        cfg: &AppConfig,
        factory: &ScriptedFactory,
        records: &[SignupRecord],
    ) -> RunState {
        let fs = FakeFileSystem::default();
        let clock = FakeClock::default();
        let terminal = FakeTerminal::default();
        AttemptController::new(cfg, factory, &fs, &clock, &terminal).run(records)
    }

    fn success() -> ScriptedStep {
        ScriptedStep::outcome(AttemptStatus::Success, "Account Created Successfully")
    }

    #[test]
    fn two_records_succeed_on_first_variant() {
        let mut cfg = config();
        cfg.run.target_success = 2;
        let factory = ScriptedFactory::new(vec![success(), success()]);
        let records = [record("A", "a@x.io"), record("B", "b@x.io")];

        let state = run_with(&cfg, &factory, &records);

        assert_eq!(state.results.len(), 2);
        assert!(state
            .results
            .iter()
            .all(|r| r.status == AttemptStatus::Success));
        assert_eq!(state.results[0].used_email, "a@x.io");
        assert_eq!(state.results[1].used_email, "b@x.io");
        // No further variants and no synthetic attempts were generated.
        assert_eq!(factory.calls().registered_emails.len(), 2);
    }

    #[test]
    fn email_exists_moves_to_next_variant() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        let factory = ScriptedFactory::new(vec![
            ScriptedStep::outcome(AttemptStatus::EmailExists, "Email already exists"),
            success(),
        ]);
        let records = [record("A", "a@x.io")];

        let state = run_with(&cfg, &factory, &records);

        assert_eq!(state.results.len(), 2);
        assert_eq!(state.results[0].status, AttemptStatus::EmailExists);
        assert_eq!(state.results[1].status, AttemptStatus::Success);
        assert_eq!(state.results[0].used_email, "a@x.io");
        assert_eq!(state.results[1].used_email, "a+r0a1@x.io");
    }

    #[test]
    fn exception_retries_same_variant_with_backoff_and_artifacts() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        cfg.run.attempt_retries_on_exception = 2;
        cfg.run.base_delay_ms = 300;
        let factory = ScriptedFactory::new(vec![
            ScriptedStep::Raise("navigation timeout".to_string()),
            ScriptedStep::Raise("navigation timeout".to_string()),
            ScriptedStep::Outcome(crate::browser::AttemptOutcome {
                status: AttemptStatus::Success,
                message: "Account Created Successfully".to_string(),
                used_email: String::new(),
                attempts: 3,
            }),
        ]);
        let records = [record("A", "a@x.io")];

        let fs = FakeFileSystem::default();
        let clock = FakeClock::default();
        let terminal = FakeTerminal::default();
        let state =
            AttemptController::new(&cfg, &factory, &fs, &clock, &terminal).run(&records);

        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results[0].status, AttemptStatus::Success);
        assert_eq!(state.results[0].attempts, 3);

        let calls = factory.calls();
        assert_eq!(calls.registered_emails, vec!["a@x.io"; 3]);
        assert_eq!(calls.screenshots.len(), 2);
        assert_eq!(calls.goto_entries, 2);

        // Exponential backoff: 300ms then 600ms.
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        assert_eq!(
            sleeps[0],
            SystemTime::UNIX_EPOCH + Duration::from_millis(300)
        );
        assert_eq!(
            sleeps[1],
            SystemTime::UNIX_EPOCH + Duration::from_millis(900)
        );
    }

    #[test]
    fn exhausted_exception_budget_yields_terminal_exception() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        cfg.run.per_row_attempts = 1;
        cfg.run.attempt_retries_on_exception = 1;
        cfg.run.max_synthetic_attempts = 0;
        let factory = ScriptedFactory::new(vec![
            ScriptedStep::Raise("boom".to_string()),
            ScriptedStep::Raise("boom".to_string()),
        ]);
        let records = [record("A", "a@x.io")];

        let state = run_with(&cfg, &factory, &records);

        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results[0].status, AttemptStatus::Exception);
        assert_eq!(state.results[0].attempts, 0);
        // Artifacts were captured for both raises, including the last.
        assert_eq!(factory.calls().screenshots.len(), 2);
        // Session still closed on the exception path.
        assert_eq!(factory.calls().closes, 1);
    }

    #[test]
    fn synthetic_phase_fills_the_shortfall() {
        let mut cfg = config();
        cfg.run.target_success = 2;
        cfg.run.per_row_attempts = 1;
        let factory = ScriptedFactory::new(vec![
            ScriptedStep::outcome(AttemptStatus::Failed, "error on page"),
            success(),
            success(),
        ]);
        let records = [record("A", "base@x.io")];

        let state = run_with(&cfg, &factory, &records);

        assert_eq!(state.results.len(), 3);
        assert_eq!(state.success_count(), 2);
        let emails = factory.calls().registered_emails;
        assert_eq!(emails, vec!["base@x.io", "base+s1@x.io", "base+s2@x.io"]);
    }

    #[test]
    fn synthetic_exception_advances_without_retry() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        cfg.run.per_row_attempts = 1;
        cfg.run.attempt_retries_on_exception = 2;
        let factory = ScriptedFactory::new(vec![
            ScriptedStep::outcome(AttemptStatus::Failed, "error on page"),
            ScriptedStep::Raise("boom".to_string()),
            success(),
        ]);
        let records = [record("A", "base@x.io")];

        let state = run_with(&cfg, &factory, &records);

        // Primary FAILED, synthetic s1 EXCEPTION (no same-variant retry),
        // synthetic s2 SUCCESS.
        assert_eq!(state.results.len(), 3);
        assert_eq!(state.results[1].status, AttemptStatus::Exception);
        assert_eq!(state.results[2].status, AttemptStatus::Success);
        let emails = factory.calls().registered_emails;
        assert_eq!(emails, vec!["base@x.io", "base+s1@x.io", "base+s2@x.io"]);
    }

    #[test]
    fn synthetic_budget_bounds_the_run() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        cfg.run.max_synthetic_attempts = 3;
        let factory =
            ScriptedFactory::unlimited(ScriptedStep::outcome(AttemptStatus::Failed, "rejected"));

        let state = run_with(&cfg, &factory, &[]);

        assert_eq!(state.results.len(), 3);
        assert_eq!(state.success_count(), 0);
        assert!(state.results[0].used_email.starts_with("autouser"));
        assert!(state.results[0].used_email.contains("+s1@"));
    }

    #[test]
    fn global_indices_are_strictly_increasing_and_emails_distinct() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        cfg.run.per_row_attempts = 4;
        cfg.run.max_synthetic_attempts = 2;
        let factory =
            ScriptedFactory::unlimited(ScriptedStep::outcome(AttemptStatus::EmailExists, "dup"));
        let records = [record("A", "a@x.io")];

        let state = run_with(&cfg, &factory, &records);

        let indices = state
            .results
            .iter()
            .map(|r| r.global_index)
            .collect::<Vec<_>>();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
        let distinct = state
            .results
            .iter()
            .map(|r| r.used_email.clone())
            .collect::<HashSet<_>>();
        assert_eq!(distinct.len(), state.results.len());
    }

    #[test]
    fn success_count_matches_result_list_at_all_times() {
        let mut cfg = config();
        cfg.run.target_success = 2;
        cfg.run.per_row_attempts = 2;
        let factory = ScriptedFactory::new(vec![
            ScriptedStep::outcome(AttemptStatus::UnknownError, "no marker"),
            success(),
            success(),
        ]);
        let records = [record("A", "a@x.io"), record("B", "b@x.io")];

        let state = run_with(&cfg, &factory, &records);

        let derived = state
            .results
            .iter()
            .filter(|r| r.status == AttemptStatus::Success)
            .count();
        assert_eq!(state.success_count(), derived);
        assert_eq!(derived, 2);
    }

    #[test]
    fn success_runs_cleanup_and_registers_video() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        let fs = Arc::new(FakeFileSystem::default());
        let factory =
            ScriptedFactory::new(vec![success()]).with_artifact_fs(fs.clone());
        let records = [record("A", "a@x.io")];

        let clock = FakeClock::default();
        let terminal = FakeTerminal::default();
        let state = AttemptController::new(&cfg, &factory, fs.as_ref(), &clock, &terminal)
            .run(&records);

        let calls = factory.calls();
        assert_eq!(calls.continues, 1);
        assert_eq!(calls.logouts, 1);
        assert_eq!(calls.clears, 1);
        assert_eq!(calls.closes, 1);

        assert_eq!(state.videos.len(), 1);
        assert_eq!(state.videos[0].attempt, 1);
        assert_eq!(
            state.videos[0].file,
            PathBuf::from("/reports/videos/attempt-1-a@x.io.webm")
        );
    }

    #[test]
    fn missing_recording_is_not_fatal() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        // No artifact fs attached: the session writes no recording file.
        let factory = ScriptedFactory::new(vec![success()]);
        let records = [record("A", "a@x.io")];

        let state = run_with(&cfg, &factory, &records);

        assert_eq!(state.results.len(), 1);
        assert_eq!(state.results[0].status, AttemptStatus::Success);
        assert!(state.videos.is_empty());
    }

    #[test]
    fn record_defaults_are_applied_before_execution() {
        let mut cfg = config();
        cfg.run.target_success = 1;
        let factory = ScriptedFactory::new(vec![success()]);
        let records = [SignupRecord::default()];

        let state = run_with(&cfg, &factory, &records);

        assert_eq!(state.results[0].name, "Auto User");
        assert_eq!(state.results[0].base_email, "autouser@example.com");
    }
}
