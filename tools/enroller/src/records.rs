//! Candidate-record ingestion.
//!
//! Spreadsheets exported by different teams disagree on header spelling,
//! so headers are canonicalized before mapping. The rest of the crate
//! only ever sees fully-typed [`SignupRecord`]s.

use crate::errors::EnrollerError;
use crate::logging::append_run_log;
use crate::runtime::FileSystem;
use crate::types::SignupRecord;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

/// Lowercase, trim, and collapse `_`/`-`/whitespace runs to single
/// spaces, so "Mobile_Number", "mobile-number" and "Mobile  Number" all
/// compare equal.
fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut prev_space = false;
    for c in header.trim().chars() {
        let mapped = if c == '_' || c == '-' || c.is_whitespace() {
            ' '
        } else {
            c.to_ascii_lowercase()
        };
        if mapped == ' ' {
            if prev_space {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        out.push(mapped);
    }
    out.trim().to_string()
}

fn pick(row: &HashMap<String, String>, aliases: &[&str]) -> String {
    for alias in aliases {
        if let Some(value) = row.get(*alias) {
            if !value.is_empty() {
                return value.clone();
            }
        }
    }
    String::new()
}

fn canonicalize_row(row: &HashMap<String, String>) -> SignupRecord {
    SignupRecord {
        name: pick(row, &["name", "full name", "firstname", "first name", "first"]),
        email: pick(row, &["email", "e mail", "email address"]),
        password: pick(row, &["password", "pass", "pwd"]),
        company: pick(row, &["company"]),
        address: pick(row, &["address", "address 1", "street address"]),
        address2: pick(row, &["address 2", "address2"]),
        country: pick(row, &["country"]),
        state: pick(row, &["state"]),
        city: pick(row, &["city"]),
        zipcode: pick(row, &["zipcode", "zip", "postal code"]),
        mobile: pick(row, &["mobile", "mobile number", "phone"]),
        day: pick(row, &["day"]),
        month: pick(row, &["month"]),
        year: pick(row, &["year"]),
    }
}

/// Read the candidate list from a CSV file. Fully empty rows are dropped
/// and every value is trimmed. An empty result is not an error; the
/// controller falls back to synthetic attempts.
pub fn load_records(path: &Path, fs: &dyn FileSystem) -> Result<Vec<SignupRecord>, EnrollerError> {
    let contents = fs
        .read_to_string(path)
        .map_err(|e| EnrollerError::Ingest(format!("{}: {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(contents.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| EnrollerError::Ingest(e.to_string()))?
        .iter()
        .map(normalize_header)
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| EnrollerError::Ingest(e.to_string()))?;
        let mut map = HashMap::new();
        for (header, value) in headers.iter().zip(row.iter()) {
            map.insert(header.clone(), value.trim().to_string());
        }
        if map.values().all(|value| value.is_empty()) {
            continue;
        }
        records.push(canonicalize_row(&map));
    }

    append_run_log(
        "info",
        "records.loaded",
        json!({ "path": path.display().to_string(), "rows": records.len() }),
    );
    if records.is_empty() {
        append_run_log(
            "warn",
            "records.empty",
            json!({ "path": path.display().to_string() }),
        );
    }
    Ok(records)
}
