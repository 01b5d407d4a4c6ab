// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Default cap on captured stdout.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("git I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("git {command} exited with {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("git output exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },
}

/// Captured result of one git invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GitOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into an error.
    pub fn into_checked(self, args: &[&str]) -> Result<GitOutput, GitError> {
        if self.success() {
            Ok(self)
        } else {
            Err(GitError::NonZeroExit {
                command: args.join(" "),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs git subcommands in a working directory.
///
/// A non-zero exit is not an error at this level; callers decide what an
/// exit code means.
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(
        &self,
        args: &[&str],
        dir: &Path,
        timeout: Duration,
    ) -> Result<GitOutput, GitError>;
}

/// [`GitRunner`] backed by the `git` binary on `PATH`.
#[derive(Debug, Clone)]
pub struct CommandGitRunner {
    program: PathBuf,
    max_output_bytes: usize,
}

impl CommandGitRunner {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for CommandGitRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitRunner for CommandGitRunner {
    async fn run(
        &self,
        args: &[&str],
        dir: &Path,
        timeout: Duration,
    ) -> Result<GitOutput, GitError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(GitError::Spawn)?;

        let limit = self.max_output_bytes;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let work = async move {
            let mut out = Vec::new();
            let mut err = Vec::new();

            let read_out = async {
                match stdout.as_mut() {
                    // One byte past the cap is enough to detect overflow.
                    Some(pipe) => pipe.take(limit as u64 + 1).read_to_end(&mut out).await,
                    None => Ok(0),
                }
            };
            let read_err = async {
                match stderr.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut err).await,
                    None => Ok(0),
                }
            };
            let (out_res, err_res) = tokio::join!(read_out, read_err);
            out_res?;
            err_res?;

            if out.len() > limit {
                return Err(GitError::OutputTooLarge { limit });
            }

            let status = child.wait().await?;
            Ok(GitOutput {
                code: status.code(),
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
            })
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(GitError::Timeout {
                command: args.join(" "),
                timeout,
            }),
        }
    }
}
