//! Boundary to the browser automation capability.
//!
//! The core never touches a browser directly. It opens one recorded
//! session per attempt through [`SessionFactory`] and drives it through
//! the [`RecordedSession`] operations; everything behind the trait is an
//! external concern.

use crate::errors::EnrollerError;
use crate::types::{AttemptStatus, ExecutorOptions, SignupRecord};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod driver;
pub mod scripted;

/// How one attempt's isolated session must be provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    pub label: String,
    pub recording_dir: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// What the executor reports for one attempt. `used_email` is the
/// address that actually reached the form, which may be an internal
/// variant of the one the controller supplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub status: AttemptStatus,
    pub message: String,
    pub used_email: String,
    pub attempts: u32,
}

/// One isolated, recorded browser session. Owned by exactly one attempt;
/// `close` flushes the recording and must be called on every exit path.
pub trait RecordedSession: Send {
    /// Run the full registration flow once. An `Err` means the executor
    /// itself raised and the caller must classify the attempt as
    /// `EXCEPTION`; application-level failures come back as an outcome.
    fn register(
        &mut self,
        record: &SignupRecord,
        options: &ExecutorOptions,
    ) -> Result<AttemptOutcome, EnrollerError>;

    /// Navigate back to the signup entry point (session repair).
    fn goto_entry(&mut self) -> Result<(), EnrollerError>;

    /// Dismiss a post-signup confirmation step if one is present.
    fn acknowledge_continue(&mut self) -> Result<bool, EnrollerError>;

    /// Log the created account out if the page shows a session.
    fn logout(&mut self) -> Result<bool, EnrollerError>;

    /// Drop cookies and storage so the next attempt starts clean.
    fn clear_session_state(&mut self) -> Result<(), EnrollerError>;

    /// Full-page screenshot written to `path`.
    fn screenshot_to(&mut self, path: &Path) -> Result<(), EnrollerError>;

    /// Current page markup.
    fn page_html(&mut self) -> Result<String, EnrollerError>;

    /// Close page and session, flushing the recording to disk.
    fn close(&mut self) -> Result<(), EnrollerError>;
}

pub trait SessionFactory: Send + Sync {
    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn RecordedSession>, EnrollerError>;
}
