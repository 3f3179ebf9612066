//! Version query against a toolchain executable.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::version::ToolchainVersion;

/// How to ask an executable for its version.
#[derive(Debug, Clone)]
pub struct VersionProbe {
    args: Vec<String>,
    timeout: Duration,
}

impl VersionProbe {
    #[must_use]
    pub fn new(args: Vec<String>, timeout: Duration) -> Self {
        Self { args, timeout }
    }

    /// Runs the executable and parses the version it prints.
    ///
    /// The first whitespace-separated token of stdout must be a version.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure: the executable could not be
    /// spawned, timed out, exited non-zero, or printed something else.
    pub async fn query(&self, executable: &Path) -> Result<ToolchainVersion, String> {
        let mut command = Command::new(executable);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("failed to run {}: {e}", executable.display())),
            Err(_) => {
                return Err(format!(
                    "{} did not answer within {}s",
                    executable.display(),
                    self.timeout.as_secs()
                ));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                executable.display(),
                output.status,
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout.split_whitespace().next().unwrap_or_default();
        ToolchainVersion::parse(token)
            .map_err(|e| format!("unrecognized version output {:?}: {e}", stdout.trim()))
    }
}
