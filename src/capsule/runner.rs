// src/capsule/runner.rs

//! Payload execution
//!
//! Only a [`VerifiedCapsule`] can be staged, so a rejected capsule never
//! reaches this module. Key properties:
//!
//! - The payload is written to a fresh temp directory with mode 0700
//! - `out_dir` is the sole positional argument
//! - stdin is null; the working directory is the temp directory
//! - An optional timeout kills the payload and counts as an execution failure
//! - The temp directory is removed on every exit path

use crate::capsule::verify::{Keyring, LocatedCapsule, VerifiedCapsule};
use crate::error::{Error, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// File name of the staged payload inside its temp directory
const PAYLOAD_FILE: &str = "payload";

/// Options for running a payload
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Kill the payload after this long (`None` waits indefinitely)
    pub timeout: Option<Duration>,
    /// Parent directory for the staging temp dir (system temp dir if unset)
    pub work_root: Option<PathBuf>,
    /// Capture stdout/stderr instead of inheriting them
    pub capture_output: bool,
}

impl RunOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_work_root(mut self, root: &Path) -> Self {
        self.work_root = Some(root.to_path_buf());
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture_output = true;
        self
    }
}

/// Outcome of a payload that ran to completion with exit code 0
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub capsule_id: String,
    pub exit_code: i32,
    pub duration: Duration,
    /// Empty unless output was captured
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// A decoded payload written to disk, ready to execute
///
/// Dropping it removes the temp directory.
pub struct StagedPayload {
    dir: TempDir,
    path: PathBuf,
    capsule_id: String,
    session_id: String,
    entry_kind: String,
    exec: bool,
}

impl StagedPayload {
    /// Write a verified capsule's payload into a fresh temp directory
    pub fn stage(capsule: &VerifiedCapsule, work_root: Option<&Path>) -> Result<Self> {
        let dir = match work_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                TempDir::new_in(root)?
            }
            None => TempDir::new()?,
        };
        let path = dir.path().join(PAYLOAD_FILE);

        let mut file = File::create(&path)?;
        file.write_all(capsule.payload())?;
        file.sync_all()?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o700))?;
        }

        let meta = capsule.metadata();
        debug!("Staged payload of {} at {}", meta.capsule_id, path.display());

        Ok(Self {
            dir,
            path,
            capsule_id: meta.capsule_id.clone(),
            session_id: meta.session_id.clone(),
            entry_kind: meta.payload_descriptor.entry_kind.clone(),
            exec: meta.payload_descriptor.is_exec(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the payload with `out_dir` as its argument
    pub fn execute(self, out_dir: &Path, opts: &RunOptions) -> Result<ExecutionResult> {
        fs::create_dir_all(out_dir)?;
        let out_dir = out_dir.canonicalize()?;

        let mut command = if self.exec {
            Command::new(&self.path)
        } else {
            let interpreter = which::which(&self.entry_kind)
                .map_err(|e| self.failure(format!("interpreter {} not found: {}", self.entry_kind, e), None))?;
            let mut command = Command::new(interpreter);
            command.arg(&self.path);
            command
        };
        command
            .arg(&out_dir)
            .current_dir(self.dir.path())
            .env("CAPSULE_ID", &self.capsule_id)
            .env("CAPSULE_SESSION", &self.session_id)
            .stdin(Stdio::null());
        if opts.capture_output {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        info!(
            "Executing payload of {} ({}) -> {}",
            self.capsule_id,
            self.entry_kind,
            out_dir.display()
        );
        let started = Instant::now();
        let mut child = spawn(&mut command)
            .map_err(|e| self.failure(format!("failed to spawn payload: {}", e), None))?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = wait(&mut child, opts.timeout)?;
        let duration = started.elapsed();

        // On timeout the readers are left detached: grandchildren may still
        // hold the pipes open
        let Some(status) = status else {
            warn!("Payload of {} timed out", self.capsule_id);
            return Err(self.failure(
                format!(
                    "timed out after {} seconds",
                    opts.timeout.map(|t| t.as_secs()).unwrap_or_default()
                ),
                None,
            ));
        };

        let stdout = collect(stdout);
        let stderr = collect(stderr);
        if status.success() {
            info!("Payload of {} completed in {:?}", self.capsule_id, duration);
            Ok(ExecutionResult {
                capsule_id: self.capsule_id.clone(),
                exit_code: 0,
                duration,
                stdout,
                stderr,
            })
        } else {
            for line in String::from_utf8_lossy(&stderr).lines() {
                warn!("[{}] {}", self.capsule_id, line);
            }
            Err(self.failure(describe(status), status.code()))
        }
    }

    fn failure(&self, reason: String, exit_code: Option<i32>) -> Error {
        Error::ExecutionFailure {
            capsule_id: self.capsule_id.clone(),
            reason,
            exit_code,
        }
    }
}

/// Spawn, retrying briefly while the freshly written payload is still
/// held open for writing by a concurrent fork (ETXTBSY)
fn spawn(command: &mut Command) -> std::io::Result<Child> {
    const ETXTBSY: i32 = 26;
    let mut attempts = 0;
    loop {
        match command.spawn() {
            Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempts < 5 => {
                attempts += 1;
                thread::sleep(Duration::from_millis(10 * attempts));
            }
            other => return other,
        }
    }
}

fn wait(child: &mut Child, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
    match timeout {
        None => Ok(Some(child.wait()?)),
        Some(limit) => match child.wait_timeout(limit)? {
            Some(status) => Ok(Some(status)),
            None => {
                // Timeout - kill and reap the process
                let _ = child.kill();
                let _ = child.wait();
                Ok(None)
            }
        },
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn describe(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }
    "terminated abnormally".to_string()
}

/// Verify a capsule file, then stage and execute its payload
///
/// Verification failures are returned before anything is decoded to disk.
pub fn run(path: &Path, out_dir: &Path, keyring: &Keyring, opts: &RunOptions) -> Result<ExecutionResult> {
    let verified = LocatedCapsule::open(path)?.verify(keyring)?;
    run_verified(&verified, out_dir, opts)
}

/// Stage and execute an already verified capsule
pub fn run_verified(
    capsule: &VerifiedCapsule,
    out_dir: &Path,
    opts: &RunOptions,
) -> Result<ExecutionResult> {
    let staged = StagedPayload::stage(capsule, opts.work_root.as_deref())?;
    staged.execute(out_dir, opts)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::capsule::packager::{MintRequest, mint};
    use crate::capsule::signing::SigningKeyPair;
    use crate::ledger::MemoryLedger;

    fn verified(payload: &[u8], kind: &str) -> VerifiedCapsule {
        let ledger = MemoryLedger::new();
        let key = SigningKeyPair::generate();
        let request = MintRequest::new("t", "p").with_entry_kind(kind);
        let capsule = mint(payload, &request, &ledger, &key, 76).unwrap();
        let mut keyring = Keyring::new();
        keyring.add_base64(&key.public_key_base64(), None).unwrap();
        LocatedCapsule::from_bytes(capsule.into_bytes())
            .unwrap()
            .verify(&keyring)
            .unwrap()
    }

    #[test]
    fn test_stage_permissions_and_cleanup() {
        use std::os::unix::fs::PermissionsExt;

        let work = TempDir::new().unwrap();
        let capsule = verified(b"echo hi", "sh");
        let staged = StagedPayload::stage(&capsule, Some(work.path())).unwrap();
        let path = staged.path().to_path_buf();

        assert_eq!(fs::read(&path).unwrap(), b"echo hi");
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        drop(staged);
        assert!(!path.exists());
        assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_out_dir_is_argument() {
        let out = TempDir::new().unwrap();
        let capsule = verified(b"echo made > \"$1/result.txt\"\n", "sh");
        let result = run_verified(&capsule, out.path(), &RunOptions::default().capture()).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(fs::read_to_string(out.path().join("result.txt")).unwrap(), "made\n");
    }

    #[test]
    fn test_exec_entry_kind() {
        let out = TempDir::new().unwrap();
        let capsule = verified(b"#!/bin/sh\necho direct\n", "exec");
        let result = run_verified(&capsule, out.path(), &RunOptions::default().capture()).unwrap();
        assert_eq!(result.stdout, b"direct\n");
    }

    #[test]
    fn test_nonzero_exit_is_execution_failure() {
        let work = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let capsule = verified(b"exit 7\n", "sh");
        let opts = RunOptions::default().capture().with_work_root(work.path());
        let err = run_verified(&capsule, out.path(), &opts).unwrap_err();
        assert!(matches!(err, Error::ExecutionFailure { exit_code: Some(7), .. }));
        assert!(!err.is_untrusted());
        // Temp dir removed on the failure path too
        assert_eq!(fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_timeout_kills_payload() {
        let out = TempDir::new().unwrap();
        let capsule = verified(b"sleep 30\n", "sh");
        let opts = RunOptions::default()
            .capture()
            .with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = run_verified(&capsule, out.path(), &opts).unwrap_err();
        assert!(matches!(err, Error::ExecutionFailure { exit_code: None, .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_interpreter() {
        let out = TempDir::new().unwrap();
        let capsule = verified(b"x", "no-such-interpreter-xyz");
        assert!(matches!(
            run_verified(&capsule, out.path(), &RunOptions::default()),
            Err(Error::ExecutionFailure { .. })
        ));
    }
}
