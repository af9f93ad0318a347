use crate::errors::EnrollerError;
use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stderr: String,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), EnrollerError>;
}

/// Milliseconds since the Unix epoch, per the supplied clock.
pub fn unix_millis(clock: &dyn Clock) -> u64 {
    clock
        .now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// RFC 3339 timestamp with millisecond precision, per the supplied clock.
pub fn rfc3339_millis(clock: &dyn Clock) -> String {
    chrono::DateTime::<chrono::Utc>::from(clock.now())
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Line-protocol child processes. A handle stays valid from `spawn` until
/// `wait` or `kill` consumes it.
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, EnrollerError>;
    fn send_line(&self, handle: u64, line: &str) -> Result<(), EnrollerError>;
    fn recv_line(&self, handle: u64) -> Result<String, EnrollerError>;
    fn wait(&self, handle: u64) -> Result<ProcessOutput, EnrollerError>;
    fn kill(&self, handle: u64) -> Result<(), EnrollerError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, EnrollerError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), EnrollerError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), EnrollerError>;
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, EnrollerError>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), EnrollerError>;
    fn remove_file(&self, path: &Path) -> Result<(), EnrollerError>;
    fn remove_dir(&self, path: &Path) -> Result<(), EnrollerError>;
    fn exists(&self, path: &Path) -> bool;
    fn modified_ms(&self, path: &Path) -> Option<u64>;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), EnrollerError>;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), EnrollerError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, EnrollerError> {
        std::fs::read_to_string(path).map_err(|e| EnrollerError::Io(e.to_string()))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), EnrollerError> {
        std::fs::write(path, contents).map_err(|e| EnrollerError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), EnrollerError> {
        std::fs::create_dir_all(path).map_err(|e| EnrollerError::Io(e.to_string()))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, EnrollerError> {
        let mut entries = std::fs::read_dir(path)
            .map_err(|e| EnrollerError::Io(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), EnrollerError> {
        std::fs::rename(from, to).map_err(|e| EnrollerError::Io(e.to_string()))
    }

    fn remove_file(&self, path: &Path) -> Result<(), EnrollerError> {
        std::fs::remove_file(path).map_err(|e| EnrollerError::Io(e.to_string()))
    }

    fn remove_dir(&self, path: &Path) -> Result<(), EnrollerError> {
        std::fs::remove_dir(path).map_err(|e| EnrollerError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn modified_ms(&self, path: &Path) -> Option<u64> {
        std::fs::metadata(path)
            .ok()
            .and_then(|meta| meta.modified().ok())
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
    }
}

struct ChildSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

#[derive(Default)]
struct ProcessState {
    next_handle: u64,
    sessions: HashMap<u64, ChildSession>,
}

pub struct ProductionProcessRunner {
    state: Mutex<ProcessState>,
}

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::default()),
        }
    }
}

impl Default for ProductionProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for ProductionProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, EnrollerError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| EnrollerError::Driver(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EnrollerError::Driver("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EnrollerError::Driver("child stdout unavailable".to_string()))?;

        let mut state = self.state.lock().expect("process lock poisoned");
        let handle = state.next_handle;
        state.next_handle += 1;
        state.sessions.insert(
            handle,
            ChildSession {
                child,
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            },
        );
        Ok(handle)
    }

    fn send_line(&self, handle: u64, line: &str) -> Result<(), EnrollerError> {
        let mut state = self.state.lock().expect("process lock poisoned");
        let session = state
            .sessions
            .get_mut(&handle)
            .ok_or_else(|| EnrollerError::Driver(format!("unknown handle {handle}")))?;
        let stdin = session
            .stdin
            .as_mut()
            .ok_or_else(|| EnrollerError::Driver("child stdin closed".to_string()))?;
        writeln!(stdin, "{line}").map_err(|e| EnrollerError::Driver(e.to_string()))?;
        stdin
            .flush()
            .map_err(|e| EnrollerError::Driver(e.to_string()))
    }

    fn recv_line(&self, handle: u64) -> Result<String, EnrollerError> {
        let mut state = self.state.lock().expect("process lock poisoned");
        let session = state
            .sessions
            .get_mut(&handle)
            .ok_or_else(|| EnrollerError::Driver(format!("unknown handle {handle}")))?;
        let mut line = String::new();
        let read = session
            .stdout
            .read_line(&mut line)
            .map_err(|e| EnrollerError::Driver(e.to_string()))?;
        if read == 0 {
            return Err(EnrollerError::Driver(
                "child closed its output stream".to_string(),
            ));
        }
        Ok(line.trim_end().to_string())
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, EnrollerError> {
        let session = {
            let mut state = self.state.lock().expect("process lock poisoned");
            state.sessions.remove(&handle)
        };
        let mut session =
            session.ok_or_else(|| EnrollerError::Driver(format!("unknown handle {handle}")))?;
        // Closing stdin signals the child to exit.
        drop(session.stdin.take());
        let output = session
            .child
            .wait_with_output()
            .map_err(|e| EnrollerError::Driver(e.to_string()))?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn kill(&self, handle: u64) -> Result<(), EnrollerError> {
        let session = {
            let mut state = self.state.lock().expect("process lock poisoned");
            state.sessions.remove(&handle)
        };
        let mut session =
            session.ok_or_else(|| EnrollerError::Driver(format!("unknown handle {handle}")))?;
        session
            .child
            .kill()
            .map_err(|e| EnrollerError::Driver(e.to_string()))
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), EnrollerError> {
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| EnrollerError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner::new()),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }

    pub fn advance_ms(&self, ms: u64) {
        let mut now = self.now.lock().expect("clock lock");
        *now += std::time::Duration::from_millis(ms);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), EnrollerError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        *self.now.lock().expect("clock lock") = deadline;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    mtimes: Arc<Mutex<HashMap<PathBuf, u64>>>,
    fail_next: Arc<Mutex<Option<EnrollerError>>>,
    fail_rename: Arc<Mutex<bool>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }

    pub fn insert_file(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
    }

    pub fn set_fail_next(&self, error: EnrollerError) {
        *self.fail_next.lock().expect("fail lock") = Some(error);
    }

    /// Make every subsequent rename fail, for exercising the degraded
    /// keep-in-place path of video relocation.
    pub fn set_fail_renames(&self, fail: bool) {
        *self.fail_rename.lock().expect("fail lock") = fail;
    }

    pub fn set_modified_ms(&self, path: impl Into<PathBuf>, ms: u64) {
        self.mtimes.lock().expect("mtimes lock").insert(path.into(), ms);
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().expect("dirs lock").clone()
    }

    pub fn file_contents(&self, path: &Path) -> Option<String> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

    fn maybe_fail(&self) -> Result<(), EnrollerError> {
        if let Some(err) = self.fail_next.lock().expect("fail lock").take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, EnrollerError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| EnrollerError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), EnrollerError> {
        self.maybe_fail()?;
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), EnrollerError> {
        self.maybe_fail()?;
        self.dirs.lock().expect("dirs lock").push(path.to_path_buf());
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, EnrollerError> {
        self.maybe_fail()?;
        let mut entries = self
            .files
            .lock()
            .expect("files lock")
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .cloned()
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), EnrollerError> {
        self.maybe_fail()?;
        if *self.fail_rename.lock().expect("fail lock") {
            return Err(EnrollerError::Io(format!(
                "rename refused: {}",
                from.display()
            )));
        }
        let mut files = self.files.lock().expect("files lock");
        let contents = files
            .remove(from)
            .ok_or_else(|| EnrollerError::Io(format!("missing file {}", from.display())))?;
        files.insert(to.to_path_buf(), contents);
        drop(files);
        let mut mtimes = self.mtimes.lock().expect("mtimes lock");
        if let Some(ms) = mtimes.remove(from) {
            mtimes.insert(to.to_path_buf(), ms);
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<(), EnrollerError> {
        self.maybe_fail()?;
        self.files.lock().expect("files lock").remove(path);
        Ok(())
    }

    fn remove_dir(&self, path: &Path) -> Result<(), EnrollerError> {
        self.maybe_fail()?;
        let occupied = self
            .files
            .lock()
            .expect("files lock")
            .keys()
            .any(|candidate| candidate.parent() == Some(path));
        if occupied {
            return Err(EnrollerError::Io(format!(
                "directory not empty: {}",
                path.display()
            )));
        }
        self.dirs
            .lock()
            .expect("dirs lock")
            .retain(|candidate| candidate != path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
            || self.dirs.lock().expect("dirs lock").contains(&path.to_path_buf())
    }

    fn modified_ms(&self, path: &Path) -> Option<u64> {
        self.mtimes.lock().expect("mtimes lock").get(path).copied()
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), EnrollerError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    sent: Arc<Mutex<Vec<(u64, String)>>>,
    replies: Arc<Mutex<VecDeque<Result<String, EnrollerError>>>>,
    waits: Arc<Mutex<Vec<u64>>>,
    kills: Arc<Mutex<Vec<u64>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl FakeProcessRunner {
    pub fn push_reply(&self, reply: Result<String, EnrollerError>) {
        self.replies.lock().expect("replies lock").push_back(reply);
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn sent_lines(&self) -> Vec<(u64, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn waits(&self) -> Vec<u64> {
        self.waits.lock().expect("waits lock").clone()
    }

    pub fn kills(&self) -> Vec<u64> {
        self.kills.lock().expect("kills lock").clone()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, EnrollerError> {
        self.spawned.lock().expect("spawned lock").push(request);
        let mut next = self.next_handle.lock().expect("next lock");
        let handle = *next;
        *next += 1;
        Ok(handle)
    }

    fn send_line(&self, handle: u64, line: &str) -> Result<(), EnrollerError> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((handle, line.to_string()));
        Ok(())
    }

    fn recv_line(&self, handle: u64) -> Result<String, EnrollerError> {
        let _ = handle;
        let mut replies = self.replies.lock().expect("replies lock");
        replies.pop_front().unwrap_or_else(|| {
            Err(EnrollerError::Driver("no fake reply queued".to_string()))
        })
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, EnrollerError> {
        self.waits.lock().expect("waits lock").push(handle);
        Ok(ProcessOutput {
            exit_code: 0,
            stderr: String::new(),
        })
    }

    fn kill(&self, handle: u64) -> Result<(), EnrollerError> {
        self.kills.lock().expect("kills lock").push(handle);
        Ok(())
    }
}
