use std::process::Stdio;

use tempfile::NamedTempFile;
use tokio::process::Command;

/// Combined stdout/stderr of one finished job.
///
/// The bytes live in a transient artifact that is deleted when this value
/// is dropped, on every exit path.
#[derive(Debug)]
pub struct CapturedOutput {
    artifact: NamedTempFile,
    pub exit_code: Option<i32>,
}

impl CapturedOutput {
    /// Path of the artifact, for streaming its bytes out.
    pub fn path(&self) -> &std::path::Path {
        self.artifact.path()
    }

    /// Read the full captured output. Mostly useful in tests; delivery
    /// streams the artifact in chunks instead.
    pub async fn bytes(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.artifact.path()).await
    }
}

/// Executes one job as a child process with stdout and stderr interleaved
/// into a single capture stream.
#[derive(Debug, Clone, Default)]
pub struct JobExecutor;

impl JobExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `command` through `sh -c`, blocking until the child exits.
    ///
    /// Both output streams share one file description, so interleaving
    /// matches what a terminal would show. A shell-level failure is not an
    /// error here; it surfaces as captured output plus a non-zero exit
    /// code. An `Err` means the process could not be spawned at all.
    pub async fn execute(&self, job_id: &str, command: &str) -> std::io::Result<CapturedOutput> {
        let artifact = NamedTempFile::new()?;
        let stdout = artifact.reopen()?;
        let stderr = stdout.try_clone()?;

        tracing::info!(job_id, command, "executing job");

        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()?
            .wait()
            .await?;

        tracing::info!(job_id, exit_code = ?status.code(), "job finished");

        Ok(CapturedOutput {
            artifact,
            exit_code: status.code(),
        })
    }
}
