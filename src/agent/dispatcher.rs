//! Command execution on the agent
//!
//! One handler per [`CommandKind`]. Every outcome, including faults, becomes
//! an [`ExecutionResult`]; nothing here returns an error to the caller.

use super::sandbox::PathSandbox;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::protocol::{CommandKind, CommandPayload, CommandStatus, ExecuteFrame, ExecutionResult};
use async_trait::async_trait;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

pub const OUTPUT_TRUNCATED: &str = "\n... (output truncated)";
pub const ERROR_TRUNCATED: &str = "\n... (error truncated)";
pub const CONTENT_TRUNCATED: &str = "\n... (content truncated)";

/// Extra bytes kept past the ceiling so a cut never splits a character
const UTF8_SLACK: usize = 4;

/// Something that can run an execute frame to completion
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, frame: ExecuteFrame) -> ExecutionResult;
}

/// Executes commands against the local machine inside the path sandbox
pub struct Dispatcher {
    sandbox: PathSandbox,
    shell: String,
    max_output: usize,
}

impl Dispatcher {
    pub fn new(sandbox: PathSandbox, shell: impl Into<String>, max_output: usize) -> Self {
        Self {
            sandbox,
            shell: shell.into(),
            max_output,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            PathSandbox::new(config.allowed_roots.clone()),
            config.shell(),
            config.max_output_bytes,
        )
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    async fn run(&self, kind: CommandKind, payload: CommandPayload, timeout: u64) -> Result<ExecutionResult> {
        if let Some(field) = payload.missing_field(kind) {
            return Err(Error::InvalidCommand(format!("{} requires '{}'", kind, field)));
        }
        let path = payload.path.unwrap_or_default();

        match kind {
            CommandKind::Shell => {
                let command = payload.command.unwrap_or_default();
                self.shell(&command, payload.working_dir.as_deref(), timeout).await
            }
            CommandKind::ReadFile => self.read_file(&path).await,
            CommandKind::WriteFile => {
                let content = payload.content.unwrap_or_default();
                self.write_file(&path, &content).await
            }
            CommandKind::ListDir => self.list_dir(&path).await,
        }
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    async fn shell(&self, command: &str, working_dir: Option<&str>, timeout: u64) -> Result<ExecutionResult> {
        let cwd = match working_dir.filter(|dir| !dir.is_empty()) {
            Some(dir) => self.sandbox.check(dir).map_err(|_| Error::PathNotAllowed {
                role: "Working directory",
                path: dir.to_string(),
            })?,
            None => self.sandbox.home().to_path_buf(),
        };

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout can take down the whole tree
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            Error::InternalExecutionFault(format!("Failed to start {}: {}", self.shell, e))
        })?;
        let pid = child.id();
        let cap = self.max_output;
        let stdout = child.stdout.take().map(|out| tokio::spawn(read_capped(out, cap)));
        let stderr = child.stderr.take().map(|err| tokio::spawn(read_capped(err, cap)));

        let finished = tokio::time::timeout(Duration::from_secs(timeout), async {
            let status = child.wait().await?;
            let output = join_capture(stdout).await;
            let error = join_capture(stderr).await;
            Ok::<_, Error>((status, output, error))
        })
        .await;

        let (status, output, error) = match finished {
            Ok(outcome) => outcome?,
            Err(_) => {
                tracing::warn!(pid = ?pid, timeout, "Command timed out, killing process group");
                kill_process_group(pid);
                let _ = child.kill().await;
                return Err(Error::CommandTimedOut(timeout));
            }
        };

        let output = finish_capture(output, cap, OUTPUT_TRUNCATED);
        let error = finish_capture(error, cap, ERROR_TRUNCATED);
        let exit_code = exit_code(status);

        Ok(ExecutionResult {
            status: if exit_code == 0 {
                CommandStatus::Completed
            } else {
                CommandStatus::Failed
            },
            output: Some(output),
            error: if error.is_empty() { None } else { Some(error) },
            exit_code: Some(exit_code),
        })
    }

    async fn read_file(&self, input: &str) -> Result<ExecutionResult> {
        let path = self.sandbox.check(input)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("File not found: {}", input)));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(Error::NotAFile(input.to_string()));
        }

        let file = tokio::fs::File::open(&path).await?;
        let mut bytes = Vec::new();
        file.take((self.max_output + UTF8_SLACK) as u64)
            .read_to_end(&mut bytes)
            .await?;

        Ok(ExecutionResult::completed(finish_capture(
            bytes,
            self.max_output,
            CONTENT_TRUNCATED,
        )))
    }

    async fn write_file(&self, input: &str, content: &str) -> Result<ExecutionResult> {
        let path = self.sandbox.check(input)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        Ok(ExecutionResult::completed(format!(
            "Written {} bytes to {}",
            content.len(),
            path.display()
        )))
    }

    async fn list_dir(&self, input: &str) -> Result<ExecutionResult> {
        let path = self.sandbox.check(input)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Directory not found: {}", input)));
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_dir() {
            return Err(Error::NotADirectory(input.to_string()));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(describe_entry(&entry.path(), entry.file_name().to_string_lossy().into_owned()).await);
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let lines: Vec<String> = entries.into_iter().map(|(_, line)| line).collect();
        Ok(ExecutionResult::completed(lines.join("\n")))
    }
}

#[async_trait]
impl Executor for Dispatcher {
    async fn execute(&self, frame: ExecuteFrame) -> ExecutionResult {
        let kind = frame.command_type;
        tracing::info!(command_id = %frame.id, kind = %kind, "Executing command");

        let payload = CommandPayload {
            command: frame.command,
            path: frame.path,
            content: frame.content,
            working_dir: frame.working_dir,
        };

        match self.run(kind, payload, frame.timeout).await {
            Ok(result) => result,
            Err(e @ Error::CommandTimedOut(_)) => ExecutionResult::timed_out(e.to_string()),
            Err(e) => {
                tracing::warn!(command_id = %frame.id, kind = %kind, "Command failed: {}", e);
                ExecutionResult::failed(e.to_string())
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// `(name, "type\tsize\tname")`; follows symlinks like `stat`
async fn describe_entry(path: &Path, name: String) -> (String, String) {
    let meta = tokio::fs::metadata(path).await.ok();
    let is_dir = meta.as_ref().map(|m| m.is_dir()).unwrap_or(false);
    let size = meta
        .as_ref()
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .unwrap_or(0);
    let kind = if is_dir { "dir" } else { "file" };
    let line = format!("{}\t{}\t{}", kind, size, name);
    (name, line)
}

/// Drain a stream, keeping at most `cap + UTF8_SLACK` bytes
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> std::io::Result<Vec<u8>> {
    let limit = cap + UTF8_SLACK;
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok(kept)
}

async fn join_capture(task: Option<tokio::task::JoinHandle<std::io::Result<Vec<u8>>>>) -> Vec<u8> {
    match task {
        Some(handle) => match handle.await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::warn!("Failed reading command output: {}", e);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Output reader task failed: {}", e);
                Vec::new()
            }
        },
        None => Vec::new(),
    }
}

/// Lossy-decode captured bytes, cutting at `cap` on a character boundary
pub fn finish_capture(bytes: Vec<u8>, cap: usize, marker: &str) -> String {
    if bytes.len() <= cap {
        return String::from_utf8_lossy(&bytes).into_owned();
    }

    let mut end = cap;
    while end > 0 && cap - end < 3 && (bytes[end] & 0xC0) == 0x80 {
        end -= 1;
    }
    let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
    text.push_str(marker);
    text
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        // The child leads its own group, so its pid is the group id
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
