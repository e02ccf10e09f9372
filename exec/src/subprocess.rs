//! Secure subprocess invocation: argv-only spawn, an explicit basename
//! allowlist, byte-capped streaming output, and exit-code decoding into a
//! typed `errorKind`. Grounded in the same
//! `read_capped`/`consume_truncated_output` streaming-with-caps pattern —
//! generalized here from a single shell-tool timeout default to the
//! descriptor's own `timeout`.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use masterclaw_core::safe::IdentifierOptions;
use masterclaw_core::safe::PathValidationOptions;
use masterclaw_core::safe::validate_env_assignment;
use masterclaw_core::safe::validate_identifier;
use masterclaw_core::safe::validate_path;
use masterclaw_protocol::McError;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Command;

const MAX_STREAM_BYTES: usize = 64 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const GRACE_PERIOD: Duration = Duration::from_secs(5);

pub const DEFAULT_PROGRAM_ALLOWLIST: &[&str] = &["docker", "git", "tar", "curl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessErrorKind {
    ResourceLimit,
    Terminated,
    CpuLimit,
    FileSizeLimit,
    BlockedSyscall,
    Oom,
    Generic(i32),
}

#[derive(Debug)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub error_kind: Option<ProcessErrorKind>,
    pub duration: Duration,
}

pub struct ProcessDescriptor {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub allowlist: &'static [&'static str],
}

impl ProcessDescriptor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            working_dir: None,
            timeout: DEFAULT_TIMEOUT,
            max_output_bytes: MAX_STREAM_BYTES,
            allowlist: DEFAULT_PROGRAM_ALLOWLIST,
        }
    }
}

pub struct SecureProcess;

impl SecureProcess {
    pub async fn run(descriptor: ProcessDescriptor) -> Result<ProcessResult, McError> {
        validate_identifier(
            &descriptor.program,
            &IdentifierOptions { max_len: 64, pattern: None },
        )
        .map_err(|_| McError::shell_escape("PROGRAM_NOT_ALLOWLISTED"))?;

        if !descriptor.allowlist.contains(&descriptor.program.as_str()) {
            return Err(McError::shell_escape("PROGRAM_NOT_ALLOWLISTED")
                .with_details(serde_json::json!({
                    "program": descriptor.program,
                    "allowlist": descriptor.allowlist,
                })));
        }

        let mut env_map: HashMap<String, String> = HashMap::new();
        for assignment in &descriptor.env {
            validate_env_assignment(assignment).map_err(|_| McError::shell_escape("ENV_INVALID"))?;
            if let Some((key, value)) = assignment.split_once('=') {
                env_map.insert(key.to_string(), value.to_string());
            }
        }

        let cwd = match &descriptor.working_dir {
            Some(dir) => {
                validate_path(dir, &PathValidationOptions { allow_absolute: true })
                    .map_err(|_| McError::shell_escape("WORKING_DIR_INVALID"))?;
                PathBuf::from(dir)
            }
            None => std::env::current_dir()
                .map_err(|e| McError::generic(format!("failed to resolve cwd: {e}")))?,
        };

        let start = std::time::Instant::now();
        let mut command = Command::new(&descriptor.program);
        command
            .args(&descriptor.args)
            .current_dir(&cwd)
            .env_clear()
            .envs(&env_map)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| McError::generic(format!("failed to spawn process: {e}")))?;

        let stdout_pipe = child.stdout.take().expect("configured with Stdio::piped");
        let stderr_pipe = child.stderr.take().expect("configured with Stdio::piped");

        let stdout_task = tokio::spawn(read_capped(BufReader::new(stdout_pipe), descriptor.max_output_bytes));
        let stderr_task = tokio::spawn(read_capped(BufReader::new(stderr_pipe), descriptor.max_output_bytes));

        let exit_code = match tokio::time::timeout(descriptor.timeout, child.wait()).await {
            Ok(Ok(status)) => exit_code_of(status),
            Ok(Err(e)) => return Err(McError::generic(format!("failed to wait for process: {e}"))),
            Err(_) => {
                terminate_with_grace(&mut child).await;
                143
            }
        };

        let (stdout, stdout_truncated) = stdout_task
            .await
            .map_err(|e| McError::generic(format!("stdout reader task failed: {e}")))?
            .map_err(|e| McError::generic(format!("failed to read stdout: {e}")))?;
        let (stderr, stderr_truncated) = stderr_task
            .await
            .map_err(|e| McError::generic(format!("stderr reader task failed: {e}")))?
            .map_err(|e| McError::generic(format!("failed to read stderr: {e}")))?;

        let error_kind = decode_exit_code(exit_code, &stderr);

        Ok(ProcessResult {
            exit_code,
            stdout,
            stderr,
            stdout_truncated,
            stderr_truncated,
            error_kind,
            duration: start.elapsed(),
        })
    }
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.code().unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

async fn terminate_with_grace(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is the child's own pid, obtained from `Child::id`.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(GRACE_PERIOD, child.wait()).await.is_err() {
                let _ = child.start_kill();
            }
        } else {
            let _ = child.start_kill();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }
}

/// Per §4.6's exit-code decoding table; stderr substrings upgrade a generic
/// resource-limit code to `OOM` when the kernel's OOM killer is implicated.
fn decode_exit_code(code: i32, stderr: &[u8]) -> Option<ProcessErrorKind> {
    let kind = match code {
        0 => return None,
        137 => ProcessErrorKind::ResourceLimit,
        143 => ProcessErrorKind::Terminated,
        152 => ProcessErrorKind::CpuLimit,
        153 => ProcessErrorKind::FileSizeLimit,
        159 => ProcessErrorKind::BlockedSyscall,
        other => ProcessErrorKind::Generic(other),
    };
    if matches!(kind, ProcessErrorKind::ResourceLimit | ProcessErrorKind::Generic(_)) && looks_like_oom(stderr) {
        return Some(ProcessErrorKind::Oom);
    }
    Some(kind)
}

const OOM_MARKERS: &[&str] = &[
    "killed process",
    "out of memory",
    "oom-kill",
    "cannot allocate memory",
    "memory cgroup out of memory",
];

fn looks_like_oom(stderr: &[u8]) -> bool {
    let text = String::from_utf8_lossy(stderr).to_ascii_lowercase();
    OOM_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Reads to EOF (so the child never blocks on a full pipe) but only retains
/// the first `max_bytes`, reporting whether anything was discarded.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, max_bytes: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::with_capacity(max_bytes.min(8192));
    let mut tmp = [0u8; 8192];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        if buf.len() < max_bytes {
            let take = (max_bytes - buf.len()).min(n);
            buf.extend_from_slice(&tmp[..take]);
            if take < n {
                truncated = true;
            }
        } else {
            truncated = true;
        }
    }
    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_programs_outside_the_allowlist() {
        let descriptor = ProcessDescriptor::new("rm", vec!["-rf".to_string(), "/".to_string()]);
        let result = SecureProcess::run(descriptor).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn runs_an_allowlisted_program_and_captures_output() {
        let mut descriptor = ProcessDescriptor::new("git", vec!["--version".to_string()]);
        descriptor.allowlist = &["git"];
        let result = SecureProcess::run(descriptor).await.unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.len() > 0 || result.stderr.len() > 0);
    }

    #[test]
    fn decode_exit_code_maps_signal_style_codes() {
        assert_eq!(decode_exit_code(137, b""), Some(ProcessErrorKind::ResourceLimit));
        assert_eq!(decode_exit_code(143, b""), Some(ProcessErrorKind::Terminated));
        assert_eq!(decode_exit_code(152, b""), Some(ProcessErrorKind::CpuLimit));
        assert_eq!(decode_exit_code(153, b""), Some(ProcessErrorKind::FileSizeLimit));
        assert_eq!(decode_exit_code(159, b""), Some(ProcessErrorKind::BlockedSyscall));
        assert_eq!(decode_exit_code(0, b""), None);
        assert_eq!(decode_exit_code(1, b""), Some(ProcessErrorKind::Generic(1)));
    }

    #[test]
    fn oom_stderr_substring_upgrades_generic_to_oom() {
        assert_eq!(
            decode_exit_code(137, b"Killed process 123 (node) total-vm..."),
            Some(ProcessErrorKind::Oom)
        );
        assert_eq!(
            decode_exit_code(1, b"cannot allocate memory"),
            Some(ProcessErrorKind::Oom)
        );
    }

    #[tokio::test]
    async fn read_capped_truncates_and_reports_overflow() {
        let data = vec![b'a'; 100];
        let (buf, truncated) = read_capped(std::io::Cursor::new(data), 10).await.unwrap();
        assert_eq!(buf.len(), 10);
        assert!(truncated);
    }
}
