use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("{0} binary not found")]
    BinaryMissing(String),
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug)]
pub struct SubprocessOutput {
    pub status_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl SubprocessOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Runs the command to completion with a hard deadline. On timeout the child
/// is killed and reaped so no orphan process or temp handle leaks.
pub fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> Result<SubprocessOutput, SubprocessError> {
    let program = command.get_program().to_string_lossy().to_string();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            SubprocessError::BinaryMissing(program.clone())
        } else {
            SubprocessError::Failed(format!("failed to spawn {program}: {err}"))
        }
    })?;

    // Drain pipes from separate threads; a child that fills the pipe buffer
    // would otherwise block and never exit.
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(SubprocessOutput {
                    status_code: status.code(),
                    stdout: join_reader(stdout_reader),
                    stderr: join_reader(stderr_reader),
                });
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    join_reader(stdout_reader);
                    join_reader(stderr_reader);
                    return Err(SubprocessError::Timeout { program, timeout });
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                join_reader(stdout_reader);
                join_reader(stderr_reader);
                return Err(SubprocessError::Failed(format!(
                    "failed to wait for {program}: {err}"
                )));
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_reader(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
