use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One row of candidate identity data. Produced by the ingestion layer,
/// immutable once read; empty fields are defaulted at the controller
/// boundary via [`SignupRecord::with_defaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRecord {
    pub name: String,
    pub email: String,
    pub password: String,
    pub company: String,
    pub address: String,
    pub address2: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub zipcode: String,
    pub mobile: String,
    pub day: String,
    pub month: String,
    pub year: String,
}

impl SignupRecord {
    /// Fill empty identity fields with the fixed fallbacks the target
    /// form accepts. The fallback email is derived from the name so a
    /// record without an email still yields a routable address.
    pub fn with_defaults(mut self) -> Self {
        if self.name.trim().is_empty() {
            self.name = "Auto User".to_string();
        }
        if self.email.trim().is_empty() {
            let local = self
                .name
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_lowercase();
            self.email = format!("{local}@example.com");
        }
        if self.password.trim().is_empty() {
            self.password = "Test@1234".to_string();
        }
        if self.country.trim().is_empty() {
            self.country = "United States".to_string();
        }
        if self.day.trim().is_empty() {
            self.day = "1".to_string();
        }
        if self.month.trim().is_empty() {
            self.month = "January".to_string();
        }
        if self.year.trim().is_empty() {
            self.year = "1990".to_string();
        }
        self
    }
}

/// Terminal classification of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Success,
    EmailExists,
    Failed,
    UnknownError,
    Exception,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::EmailExists => "EMAIL_EXISTS",
            Self::Failed => "FAILED",
            Self::UnknownError => "UNKNOWN_ERROR",
            Self::Exception => "EXCEPTION",
        }
    }
}

/// Outcome of one attempt, appended to the run's result list in creation
/// order and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub global_index: u64,
    pub name: String,
    pub base_email: String,
    pub used_email: String,
    pub status: AttemptStatus,
    pub message: String,
    pub attempts: u32,
    pub timestamp: String,
}

/// A recording file produced for exactly one attempt's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoArtifact {
    pub attempt: u64,
    pub file: PathBuf,
    pub email: String,
    pub mtime_ms: u64,
}

/// Options threaded through to the signup executor for one attempt.
/// `run_id` keys the executor's internal email variants so they stay
/// collision-resistant across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorOptions {
    pub run_id: u64,
    pub index: u64,
    pub max_attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_only_empty_fields() {
        let record = SignupRecord {
            name: "Priya Sharma".to_string(),
            email: String::new(),
            password: "s3cret".to_string(),
            ..SignupRecord::default()
        }
        .with_defaults();

        assert_eq!(record.name, "Priya Sharma");
        assert_eq!(record.email, "priyasharma@example.com");
        assert_eq!(record.password, "s3cret");
        assert_eq!(record.country, "United States");
        assert_eq!(record.month, "January");
    }

    #[test]
    fn defaults_for_fully_empty_record() {
        let record = SignupRecord::default().with_defaults();
        assert_eq!(record.name, "Auto User");
        assert_eq!(record.email, "autouser@example.com");
        assert_eq!(record.password, "Test@1234");
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let rendered = serde_json::to_string(&AttemptStatus::EmailExists).expect("serialize");
        assert_eq!(rendered, "\"EMAIL_EXISTS\"");
        let parsed: AttemptStatus =
            serde_json::from_str("\"UNKNOWN_ERROR\"").expect("deserialize");
        assert_eq!(parsed, AttemptStatus::UnknownError);
    }

    #[test]
    fn attempt_result_uses_camel_case_keys() {
        let result = AttemptResult {
            global_index: 3,
            name: "A".to_string(),
            base_email: "a@b.c".to_string(),
            used_email: "a+r0a1@b.c".to_string(),
            status: AttemptStatus::Success,
            message: "Account Created Successfully".to_string(),
            attempts: 1,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
        };
        let value = serde_json::to_value(&result).expect("to_value");
        assert_eq!(value["globalIndex"], 3);
        assert_eq!(value["usedEmail"], "a+r0a1@b.c");
        assert_eq!(value["status"], "SUCCESS");
    }
}
