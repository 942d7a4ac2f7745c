//! External filter commands that rewrite a fetched document before decoding.
//!
//! A subscription line may name a shell command (e.g. a JSON-to-RSS bridge).
//! The fetched bytes go to its stdin and its stdout replaces them.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Longest stderr excerpt kept in an error message.
const MAX_STDERR_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("could not start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("filter I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Transforms raw feed bytes with a named command.
///
/// Object-safe so the decoder can hold `Arc<dyn FeedFilter>` and tests can
/// substitute an in-process filter.
pub trait FeedFilter: Send + Sync {
    fn apply<'a>(
        &'a self,
        command: &'a str,
        input: Vec<u8>,
    ) -> BoxFuture<'a, Result<Vec<u8>, FilterError>>;
}

/// Runs filter commands through the platform shell.
#[derive(Debug, Clone)]
pub struct CommandFilter {
    timeout: Duration,
}

impl CommandFilter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, command: &str, input: Vec<u8>) -> Result<Vec<u8>, FilterError> {
        let mut child = shell(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FilterError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let mut stdin = child.stdin.take();
        let feed_stdin = async move {
            if let Some(stdin) = stdin.as_mut() {
                match stdin.write_all(&input).await {
                    // Filters that ignore their input may close stdin early
                    Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
            }
            // Dropping stdin sends EOF
            drop(stdin);
            Ok(())
        };

        let (written, output) = tokio::join!(feed_stdin, child.wait_with_output());
        let output = output?;
        written?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FilterError::Exit {
                command: command.to_string(),
                status: output.status,
                stderr: stderr.trim().chars().take(MAX_STDERR_CHARS).collect(),
            });
        }

        Ok(output.stdout)
    }
}

impl FeedFilter for CommandFilter {
    fn apply<'a>(
        &'a self,
        command: &'a str,
        input: Vec<u8>,
    ) -> BoxFuture<'a, Result<Vec<u8>, FilterError>> {
        async move {
            // On timeout the child is dropped, and kill_on_drop reaps it
            match tokio::time::timeout(self.timeout, self.run(command, input)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(command = %command, timeout = ?self.timeout, "Filter command timed out");
                    Err(FilterError::Timeout {
                        command: command.to_string(),
                        timeout: self.timeout,
                    })
                }
            }
        }
        .boxed()
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
