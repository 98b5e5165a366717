use super::{io_error, CollaboratorError};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `binary args..`, feeding `stdin` if given, and kills it once
/// `timeout` elapses. Non-zero exits are reported as `Failed`.
pub fn run_command(
    tool: &str,
    binary: &str,
    args: &[String],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<CommandOutput, CollaboratorError> {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(CollaboratorError::Unavailable {
                tool: tool.to_string(),
                reason: format!("binary `{binary}` was not found"),
            })
        }
        Err(err) => return Err(io_error(Path::new(binary), err)),
    };

    let stdin_writer = match (stdin, child.stdin.take()) {
        (Some(input), Some(mut pipe)) => {
            let input = input.to_string();
            Some(thread::spawn(move || {
                let _ = pipe.write_all(input.as_bytes());
            }))
        }
        _ => None,
    };

    let stdout = child.stdout.take().ok_or_else(|| {
        io_error(Path::new(binary), std::io::Error::other("missing stdout pipe"))
    })?;
    let stderr = child.stderr.take().ok_or_else(|| {
        io_error(Path::new(binary), std::io::Error::other("missing stderr pipe"))
    })?;

    let stdout_reader = thread::spawn(move || {
        let mut buf = String::new();
        let _ = BufReader::new(stdout).read_to_string(&mut buf);
        buf
    });
    let stderr_reader = thread::spawn(move || {
        let mut buf = String::new();
        let _ = BufReader::new(stderr).read_to_string(&mut buf);
        buf
    });

    let start = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return Err(CollaboratorError::Timeout {
                        tool: tool.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return Err(io_error(Path::new(binary), err)),
        }
    };

    if let Some(writer) = stdin_writer {
        let _ = writer.join();
    }
    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(CollaboratorError::Failed {
            tool: tool.to_string(),
            exit_code: status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(CommandOutput { stdout, stderr })
}
