//! Scripted session doubles.
//!
//! Tests script a queue of per-attempt behaviors; `--dry-run` reuses the
//! same factory with an unlimited default outcome so the whole pipeline
//! can be exercised without a browser.

use crate::browser::{AttemptOutcome, RecordedSession, SessionFactory, SessionSpec};
use crate::errors::EnrollerError;
use crate::runtime::FileSystem;
use crate::types::{AttemptStatus, ExecutorOptions, SignupRecord};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One scripted reaction to a `register` call.
#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Outcome(AttemptOutcome),
    Raise(String),
}

impl ScriptedStep {
    pub fn outcome(status: AttemptStatus, message: &str) -> Self {
        Self::Outcome(AttemptOutcome {
            status,
            message: message.to_string(),
            used_email: String::new(),
            attempts: 1,
        })
    }
}

/// Everything the scripted sessions were asked to do, for assertions.
#[derive(Debug, Default, Clone)]
pub struct SessionCalls {
    pub opened: Vec<SessionSpec>,
    pub registered_emails: Vec<String>,
    pub goto_entries: usize,
    pub continues: usize,
    pub logouts: usize,
    pub clears: usize,
    pub screenshots: Vec<PathBuf>,
    pub closes: usize,
}

#[derive(Clone)]
pub struct ScriptedFactory {
    steps: Arc<Mutex<VecDeque<ScriptedStep>>>,
    default_step: Option<ScriptedStep>,
    calls: Arc<Mutex<SessionCalls>>,
    artifact_fs: Option<Arc<dyn FileSystem>>,
    page_html: String,
}

impl ScriptedFactory {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            default_step: None,
            calls: Arc::new(Mutex::new(SessionCalls::default())),
            artifact_fs: None,
            page_html: "<html><body>scripted</body></html>".to_string(),
        }
    }

    /// Repeat `step` forever once the scripted queue is exhausted.
    pub fn unlimited(step: ScriptedStep) -> Self {
        let mut factory = Self::new(Vec::new());
        factory.default_step = Some(step);
        factory
    }

    /// Write a recording file on close, and screenshot files on demand,
    /// through `fs`, so the recording and artifact paths become real.
    pub fn with_artifact_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.artifact_fs = Some(fs);
        self
    }

    pub fn calls(&self) -> SessionCalls {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl SessionFactory for ScriptedFactory {
    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn RecordedSession>, EnrollerError> {
        self.calls
            .lock()
            .expect("calls lock")
            .opened
            .push(spec.clone());
        Ok(Box::new(ScriptedSession {
            steps: Arc::clone(&self.steps),
            default_step: self.default_step.clone(),
            calls: Arc::clone(&self.calls),
            artifact_fs: self.artifact_fs.clone(),
            page_html: self.page_html.clone(),
            recording_dir: spec.recording_dir.clone(),
        }))
    }
}

struct ScriptedSession {
    steps: Arc<Mutex<VecDeque<ScriptedStep>>>,
    default_step: Option<ScriptedStep>,
    calls: Arc<Mutex<SessionCalls>>,
    artifact_fs: Option<Arc<dyn FileSystem>>,
    page_html: String,
    recording_dir: PathBuf,
}

impl RecordedSession for ScriptedSession {
    fn register(
        &mut self,
        record: &SignupRecord,
        _options: &ExecutorOptions,
    ) -> Result<AttemptOutcome, EnrollerError> {
        self.calls
            .lock()
            .expect("calls lock")
            .registered_emails
            .push(record.email.clone());
        let step = self
            .steps
            .lock()
            .expect("steps lock")
            .pop_front()
            .or_else(|| self.default_step.clone());
        match step {
            Some(ScriptedStep::Outcome(mut outcome)) => {
                if outcome.used_email.is_empty() {
                    outcome.used_email = record.email.clone();
                }
                Ok(outcome)
            }
            Some(ScriptedStep::Raise(message)) => Err(EnrollerError::Driver(message)),
            None => Err(EnrollerError::Driver("script exhausted".to_string())),
        }
    }

    fn goto_entry(&mut self) -> Result<(), EnrollerError> {
        self.calls.lock().expect("calls lock").goto_entries += 1;
        Ok(())
    }

    fn acknowledge_continue(&mut self) -> Result<bool, EnrollerError> {
        self.calls.lock().expect("calls lock").continues += 1;
        Ok(true)
    }

    fn logout(&mut self) -> Result<bool, EnrollerError> {
        self.calls.lock().expect("calls lock").logouts += 1;
        Ok(true)
    }

    fn clear_session_state(&mut self) -> Result<(), EnrollerError> {
        self.calls.lock().expect("calls lock").clears += 1;
        Ok(())
    }

    fn screenshot_to(&mut self, path: &Path) -> Result<(), EnrollerError> {
        self.calls
            .lock()
            .expect("calls lock")
            .screenshots
            .push(path.to_path_buf());
        if let Some(fs) = &self.artifact_fs {
            fs.write_string(path, "png")?;
        }
        Ok(())
    }

    fn page_html(&mut self) -> Result<String, EnrollerError> {
        Ok(self.page_html.clone())
    }

    fn close(&mut self) -> Result<(), EnrollerError> {
        self.calls.lock().expect("calls lock").closes += 1;
        if let Some(fs) = &self.artifact_fs {
            fs.write_string(&self.recording_dir.join("trace.webm"), "webm")?;
        }
        Ok(())
    }
}
