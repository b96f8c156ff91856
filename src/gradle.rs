//! Gradle wrapper invocation against an extracted project directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{CheckerError, Result};

/// Captured outcome of one gradle task invocation.
#[derive(Debug, Clone)]
pub struct GradleTaskResult {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GradleTaskResult {
    pub fn is_successful(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout and stderr combined, the payload of a compilation-error verdict.
    pub fn combined_output(&self) -> String {
        format!("{}\n\n{}", self.stdout, self.stderr).trim().to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GradleRunner {
    android_sdk_root: Option<PathBuf>,
}

impl GradleRunner {
    pub fn new(android_sdk_root: Option<PathBuf>) -> Self {
        Self { android_sdk_root }
    }

    /// The extracted project must carry its own wrapper script; projects
    /// without one are structurally invalid.
    pub fn is_wrapper_installed(&self, project_dir: &Path) -> bool {
        project_dir.join("gradlew").is_file()
    }

    /// Run `./gradlew <task>` in `project_dir`, capturing stdout, stderr and
    /// exit status. Cancellation kills the child and surfaces as
    /// [`CheckerError::Cancelled`].
    pub async fn execute_task(
        &self,
        project_dir: &Path,
        task: &str,
        cancel: &CancellationToken,
    ) -> Result<GradleTaskResult> {
        let wrapper = project_dir.join("gradlew");
        ensure_executable(&wrapper);

        tracing::info!(task, dir = %project_dir.display(), "starting gradle task");

        let mut command = Command::new(&wrapper);
        command
            .arg(task)
            .current_dir(project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(sdk_root) = &self.android_sdk_root {
            command.env("ANDROID_SDK_ROOT", sdk_root);
        }

        let child = command.spawn()?;

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping the wait future drops the child, which kills it.
                return Err(CheckerError::Cancelled);
            }
            output = child.wait_with_output() => output?,
        };

        tracing::info!(task, code = ?output.status.code(), "completed gradle task");

        Ok(GradleTaskResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Zip extraction does not preserve the execute bit, so it is restored here.
/// Failure is logged and ignored; the spawn itself will report anything fatal.
fn ensure_executable(wrapper: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let result = std::fs::metadata(wrapper).and_then(|meta| {
            let mut perms = meta.permissions();
            perms.set_mode(perms.mode() | 0o755);
            std::fs::set_permissions(wrapper, perms)
        });
        if let Err(e) = result {
            tracing::error!(wrapper = %wrapper.display(), error = %e, "could not mark gradlew executable");
        }
    }
    #[cfg(not(unix))]
    let _ = wrapper;
}
