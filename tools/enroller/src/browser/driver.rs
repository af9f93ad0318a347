//! Production session factory backed by an external driver process.
//!
//! One driver process is spawned per session and spoken to over stdio:
//! each request is a single JSON line, each reply a single JSON line of
//! the form `{"ok":true,"data":…}` or `{"ok":false,"error":"…"}`. The
//! driver binary itself (a Playwright shim) lives outside this
//! repository; this module owns the protocol.

use crate::browser::{AttemptOutcome, RecordedSession, SessionFactory, SessionSpec};
use crate::errors::EnrollerError;
use crate::runtime::{ProcessRequest, ProcessRunner};
use crate::types::{ExecutorOptions, SignupRecord};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    pub program: String,
    pub args: Vec<String>,
    pub entry_url: String,
}

pub struct DriverSessionFactory {
    runner: Arc<dyn ProcessRunner>,
    settings: DriverSettings,
}

impl DriverSessionFactory {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: DriverSettings) -> Self {
        Self { runner, settings }
    }
}

impl SessionFactory for DriverSessionFactory {
    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn RecordedSession>, EnrollerError> {
        let handle = self.runner.spawn(ProcessRequest {
            program: self.settings.program.clone(),
            args: self.settings.args.clone(),
            cwd: None,
        })?;
        let mut session = DriverSession {
            runner: Arc::clone(&self.runner),
            handle,
            closed: false,
        };
        session.request(json!({
            "op": "open",
            "spec": spec,
            "entryUrl": self.settings.entry_url,
        }))?;
        Ok(Box::new(session))
    }
}

struct DriverSession {
    runner: Arc<dyn ProcessRunner>,
    handle: u64,
    closed: bool,
}

impl DriverSession {
    fn request(&mut self, payload: Value) -> Result<Value, EnrollerError> {
        let line = serde_json::to_string(&payload)
            .map_err(|e| EnrollerError::Driver(e.to_string()))?;
        self.runner.send_line(self.handle, &line)?;
        let reply = self.runner.recv_line(self.handle)?;
        let value: Value = serde_json::from_str(reply.trim())
            .map_err(|e| EnrollerError::Driver(format!("invalid driver reply: {e}")))?;
        if value.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(value.get("data").cloned().unwrap_or(Value::Null));
        }
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("driver reported failure");
        Err(EnrollerError::Driver(message.to_string()))
    }
}

impl RecordedSession for DriverSession {
    fn register(
        &mut self,
        record: &SignupRecord,
        options: &ExecutorOptions,
    ) -> Result<AttemptOutcome, EnrollerError> {
        let data = self.request(json!({
            "op": "register",
            "record": record,
            "options": options,
        }))?;
        serde_json::from_value(data)
            .map_err(|e| EnrollerError::Driver(format!("malformed outcome: {e}")))
    }

    fn goto_entry(&mut self) -> Result<(), EnrollerError> {
        self.request(json!({"op": "goto"})).map(|_| ())
    }

    fn acknowledge_continue(&mut self) -> Result<bool, EnrollerError> {
        let data = self.request(json!({"op": "continue"}))?;
        Ok(data.as_bool().unwrap_or(false))
    }

    fn logout(&mut self) -> Result<bool, EnrollerError> {
        let data = self.request(json!({"op": "logout"}))?;
        Ok(data.as_bool().unwrap_or(false))
    }

    fn clear_session_state(&mut self) -> Result<(), EnrollerError> {
        self.request(json!({"op": "clear"})).map(|_| ())
    }

    fn screenshot_to(&mut self, path: &Path) -> Result<(), EnrollerError> {
        self.request(json!({
            "op": "screenshot",
            "path": path.display().to_string(),
        }))
        .map(|_| ())
    }

    fn page_html(&mut self) -> Result<String, EnrollerError> {
        let data = self.request(json!({"op": "html"}))?;
        data.as_str()
            .map(str::to_string)
            .ok_or_else(|| EnrollerError::Driver("html reply was not a string".to_string()))
    }

    fn close(&mut self) -> Result<(), EnrollerError> {
        if self.closed {
            return Ok(());
        }
        let closing = self.request(json!({"op": "close"}));
        self.closed = true;
        let waited = self.runner.wait(self.handle);
        closing?;
        waited.map(|_| ())
    }
}

impl Drop for DriverSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.runner.kill(self.handle);
        }
    }
}
