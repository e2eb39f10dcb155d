// src/core/external_cmd.rs

//! A safe fork/exec wrapper used to run monitor event-hook scripts.
//!
//! Tokenizes a command line, executes it with a soft/hard timeout (SIGTERM
//! then SIGKILL), captures stdout and stderr, and classifies each output line
//! by severity based on a `prefix:` convention.

use crate::core::errors::ProxyError;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// The maximum number of tokens accepted from a command line, mirroring the
/// `MAX_ARGS` bound in the original tokenizer.
const MAX_ARGS: usize = 256;

/// The exit status of an external command, distinguishing a normal exit code
/// from termination by signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process exited normally with this status code.
    Exited(i32),
    /// The process was terminated by this signal number.
    Signaled(i32),
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }
}

/// The severity a line of script output was classified at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSeverity {
    Alert,
    Error,
    Warning,
    Notice,
    Info,
}

/// Classifies a single line of external-command output by its `prefix:`
/// convention (case-insensitive), emitting it to the log at the matching
/// level. Returns the severity that was used.
fn log_output(cmd_name: &str, line: &str) -> OutputSeverity {
    let trimmed = line.trim_start();
    let lower = trimmed.to_ascii_lowercase();

    let (severity, rest) = if let Some(rest) = lower.strip_prefix("alert:") {
        (OutputSeverity::Alert, rest)
    } else if let Some(rest) = lower.strip_prefix("error:") {
        (OutputSeverity::Error, rest)
    } else if let Some(rest) = lower.strip_prefix("warning:") {
        (OutputSeverity::Warning, rest)
    } else if let Some(rest) = lower.strip_prefix("notice:") {
        (OutputSeverity::Notice, rest)
    } else if let Some(rest) = lower.strip_prefix("info:") {
        (OutputSeverity::Info, rest)
    } else if let Some(rest) = lower.strip_prefix("debug:") {
        (OutputSeverity::Info, rest)
    } else {
        (OutputSeverity::Notice, lower.as_str())
    };

    // Re-slice the original (non-lowercased) line so casing of the message is preserved.
    let offset = trimmed.len() - rest.trim_start().len();
    let message = trimmed[offset..].trim_start();

    match severity {
        OutputSeverity::Alert | OutputSeverity::Error => error!(command = cmd_name, "{}", message),
        OutputSeverity::Warning => warn!(command = cmd_name, "{}", message),
        OutputSeverity::Notice => info!(command = cmd_name, "{}", message),
        OutputSeverity::Info => debug!(command = cmd_name, "{}", message),
    }
    severity
}

/// Tokenizes a command line honouring single/double-quoted and
/// backslash-escaped arguments, exactly as the original `tokenize_args` does.
fn tokenize(command_line: &str) -> Result<Vec<String>, ProxyError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut reading = false;
    let mut quoted = false;
    let mut escaped = false;
    let mut quote_char = '\0';

    for ch in command_line.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            reading = true;
            continue;
        }
        if quoted {
            if ch == quote_char {
                quoted = false;
            } else {
                current.push(ch);
            }
            continue;
        }
        if ch == '"' || ch == '\'' {
            quoted = true;
            quote_char = ch;
            reading = true;
        } else if ch.is_whitespace() {
            if reading {
                tokens.push(std::mem::take(&mut current));
                reading = false;
            }
        } else {
            current.push(ch);
            reading = true;
        }
        if tokens.len() > MAX_ARGS {
            return Err(ProxyError::CommandParse(format!(
                "command line '{command_line}' exceeds the maximum of {MAX_ARGS} arguments"
            )));
        }
    }

    if quoted {
        return Err(ProxyError::CommandParse(format!(
            "unterminated quote in command line '{command_line}'"
        )));
    }
    if reading {
        tokens.push(current);
    }
    Ok(tokens)
}

/// A command template plus a separately-tracked substituted copy, so
/// substitutions (e.g. `$INITIATOR`) may be reset between invocations.
#[derive(Debug, Clone)]
pub struct ExternalCmd {
    template: String,
    substituted: String,
    timeout: Duration,
}

impl ExternalCmd {
    /// Tokenizes `command_line`, verifying that the first token resolves to
    /// an existing, executable file. Returns `None` (mirroring the original's
    /// null-handle-on-failure behaviour) if it does not.
    pub fn create(command_line: &str, timeout: Duration) -> Option<Self> {
        match Self::try_create(command_line, timeout) {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                error!("{e}");
                None
            }
        }
    }

    /// Same as [`Self::create`] but surfaces the failure reason instead of
    /// discarding it.
    pub fn try_create(command_line: &str, timeout: Duration) -> Result<Self, ProxyError> {
        let tokens = tokenize(command_line)?;
        let cmd_name = tokens.first().ok_or_else(|| {
            ProxyError::CommandParse(format!("empty command line '{command_line}'"))
        })?;

        let path = Path::new(cmd_name);
        if !path.exists() {
            return Err(ProxyError::CommandNotFound(format!(
                "cannot find file '{cmd_name}'"
            )));
        }
        if !is_executable(path) {
            return Err(ProxyError::CommandNotFound(format!(
                "cannot execute file '{cmd_name}': missing execute permission"
            )));
        }

        Ok(Self {
            template: command_line.to_string(),
            substituted: command_line.to_string(),
            timeout,
        })
    }

    /// Whether the template contains `substring` (used to decide whether a
    /// substitution is needed before calling [`Self::substitute_arg`]).
    pub fn matches(&self, substring: &str) -> bool {
        self.template.contains(substring)
    }

    /// Replaces every occurrence of `match_str` in the substituted command
    /// with `replace`.
    pub fn substitute_arg(&mut self, match_str: &str, replace: &str) {
        if match_str.is_empty() {
            return;
        }
        self.substituted = self.substituted.replace(match_str, replace);
    }

    /// Restores the substituted string to the original template.
    pub fn reset_substituted(&mut self) {
        self.substituted.clone_from(&self.template);
    }

    pub fn substituted(&self) -> &str {
        &self.substituted
    }

    /// Forks and execs the (substituted) command line, enforcing the
    /// soft-SIGTERM/hard-SIGKILL timeout escalation and classifying every
    /// line of combined stdout/stderr output.
    pub async fn execute(&self) -> Result<ExitStatus, ProxyError> {
        let tokens = tokenize(&self.substituted)?;
        let cmd_name = tokens
            .first()
            .cloned()
            .ok_or_else(|| ProxyError::CommandParse("empty substituted command".into()))?;

        let mut command = Command::new(&cmd_name);
        command
            .args(&tokens[1..])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| ProxyError::CommandExec(format!("failed to spawn '{cmd_name}': {e}")))?;
        info!("Executing command '{}' in process {:?}", cmd_name, child.id());

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut sent_sigterm = false;
        let mut exit_status: Option<ExitStatus> = None;

        let mut ticker = tokio::time::interval(Duration::from_millis(1));
        let mut elapsed = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                line = stdout_lines.next_line(), if !stdout_done => {
                    match line {
                        Ok(Some(l)) => { log_output(&cmd_name, &l); }
                        Ok(None) => stdout_done = true,
                        Err(_) => stdout_done = true,
                    }
                }
                line = stderr_lines.next_line(), if !stderr_done => {
                    match line {
                        Ok(Some(l)) => { log_output(&cmd_name, &l); }
                        Ok(None) => stderr_done = true,
                        Err(_) => stderr_done = true,
                    }
                }
                status = child.wait(), if exit_status.is_none() => {
                    exit_status = Some(match status {
                        Ok(st) => status_from_std(st),
                        Err(e) => return Err(ProxyError::CommandExec(format!("waitpid failed for '{cmd_name}': {e}"))),
                    });
                }
                _ = ticker.tick() => {
                    elapsed += Duration::from_millis(1);
                    if exit_status.is_none() {
                        if !sent_sigterm && elapsed >= self.timeout {
                            warn!("Soft timeout for command '{}', sending SIGTERM", cmd_name);
                            send_signal(&child, libc::SIGTERM);
                            sent_sigterm = true;
                            elapsed = Duration::ZERO;
                        } else if sent_sigterm && elapsed >= self.timeout {
                            error!("Hard timeout for command '{}', sending SIGKILL", cmd_name);
                            let _ = child.start_kill();
                        }
                    }
                }
            }

            if exit_status.is_some() && stdout_done && stderr_done {
                break;
            }
        }

        Ok(exit_status.expect("loop only exits once a status is recorded"))
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

#[cfg(unix)]
fn send_signal(child: &tokio::process::Child, signal: i32) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, signal);
        }
    }
}

#[cfg(not(unix))]
fn send_signal(_child: &tokio::process::Child, _signal: i32) {}

#[cfg(unix)]
fn status_from_std(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    if let Some(code) = status.code() {
        ExitStatus::Exited(code)
    } else if let Some(sig) = status.signal() {
        ExitStatus::Signaled(sig)
    } else {
        ExitStatus::Exited(-1)
    }
}

#[cfg(not(unix))]
fn status_from_std(status: std::process::ExitStatus) -> ExitStatus {
    ExitStatus::Exited(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_quoted_and_escaped_args() {
        let tokens = tokenize(r#"/bin/sh -c "echo hello\ world""#).unwrap();
        assert_eq!(tokens, vec!["/bin/sh", "-c", "echo hello world"]);
    }

    #[test]
    fn tokenizes_single_quotes() {
        let tokens = tokenize("/bin/echo 'a b' c").unwrap();
        assert_eq!(tokens, vec!["/bin/echo", "a b", "c"]);
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(tokenize("/bin/echo \"unterminated").is_err());
    }

    #[test]
    fn create_fails_for_missing_binary() {
        assert!(ExternalCmd::create("/no/such/binary --flag", Duration::from_secs(1)).is_none());
    }

    #[test]
    fn substitute_and_reset_round_trip() {
        let mut cmd =
            ExternalCmd::try_create("/bin/true $EVENT $INITIATOR", Duration::from_secs(1)).unwrap();
        assert!(cmd.matches("$EVENT"));
        cmd.substitute_arg("$EVENT", "master_down");
        cmd.substitute_arg("$INITIATOR", "10.0.0.1:3306");
        assert_eq!(cmd.substituted(), "/bin/true master_down 10.0.0.1:3306");
        cmd.reset_substituted();
        assert_eq!(cmd.substituted(), "/bin/true $EVENT $INITIATOR");
    }

    #[tokio::test]
    async fn execute_reports_normal_exit_code() {
        let cmd = ExternalCmd::try_create("/bin/sh -c \"exit 3\"", Duration::from_secs(5)).unwrap();
        let status = cmd.execute().await.unwrap();
        assert_eq!(status, ExitStatus::Exited(3));
    }

    #[tokio::test]
    async fn execute_classifies_prefixed_output_lines() {
        let cmd = ExternalCmd::try_create(
            "/bin/sh -c \"echo 'warning: disk low'; echo 'error: oh no'\"",
            Duration::from_secs(5),
        )
        .unwrap();
        let status = cmd.execute().await.unwrap();
        assert!(status.is_success());
    }

    #[tokio::test]
    async fn execute_escalates_to_sigkill_on_timeout() {
        let cmd = ExternalCmd::try_create("/bin/sleep 60", Duration::from_millis(200)).unwrap();
        let start = std::time::Instant::now();
        let status = cmd.execute().await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(matches!(status, ExitStatus::Signaled(_)));
    }
}
