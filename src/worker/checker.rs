use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::adb::{ApkReader, DeviceBridge};
use crate::archive;
use crate::cache::FileCache;
use crate::devices::DevicePool;
use crate::error::{CheckerError, Result};
use crate::events::CheckRequestEvent;
use crate::gradle::GradleRunner;
use crate::instrumentation::parse_instrumentation_output;
use crate::verdict::{ProcessingStatus, Verdict};
use crate::worker::StatusSink;

const APP_APK: &str = "app/build/outputs/apk/debug/app-debug.apk";
const TEST_APK: &str = "app/build/outputs/apk/androidTest/debug/app-debug-androidTest.apk";

/// The worker-side execution pipeline for one Android submission check.
pub struct SubmissionChecker {
    gradle: GradleRunner,
    devices: DevicePool,
    bridge: Arc<dyn DeviceBridge>,
    apk_reader: Arc<dyn ApkReader>,
    cache: FileCache,
    simultaneous_tests: usize,
}

impl SubmissionChecker {
    /// Fails when the device pool cannot hold the full test fan-out, which
    /// would otherwise serialize the attempts silently.
    pub fn new(
        gradle: GradleRunner,
        devices: DevicePool,
        bridge: Arc<dyn DeviceBridge>,
        apk_reader: Arc<dyn ApkReader>,
        cache: FileCache,
        simultaneous_tests: usize,
    ) -> Result<Self> {
        if simultaneous_tests == 0 {
            return Err(CheckerError::Config(
                "simultaneous_tests must be at least 1".to_string(),
            ));
        }
        if devices.capacity() < simultaneous_tests {
            return Err(CheckerError::Config(format!(
                "device pool capacity {} cannot hold the test fan-out of {}",
                devices.capacity(),
                simultaneous_tests
            )));
        }
        Ok(Self {
            gradle,
            devices,
            bridge,
            apk_reader,
            cache,
            simultaneous_tests,
        })
    }

    /// Run the full pipeline for one check request.
    ///
    /// Validation and compilation failures are verdicts, not errors; `Err`
    /// is reserved for infrastructure faults and cancellation.
    pub async fn check(
        &self,
        request: &CheckRequestEvent,
        status: &dyn StatusSink,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        status.set_status(ProcessingStatus::CheckingStarted).await?;

        let workdir = tempfile::tempdir()?;
        let project_dir = workdir.path();
        tracing::info!(dir = %project_dir.display(), "created scratch directory");

        status.set_status(ProcessingStatus::UnzipFiles).await?;

        match self.extract_file(request, "submission", project_dir) {
            Ok(()) => {}
            Err(CheckerError::Archive(e)) => {
                tracing::warn!(error = %e, "submission archive rejected");
                return Ok(Verdict::validation("Cannot extract submitted file."));
            }
            Err(CheckerError::UnsafeArchivePath(path)) => {
                tracing::warn!(path, "submission archive rejected");
                return Ok(Verdict::validation("Cannot extract submitted file."));
            }
            Err(CheckerError::CacheMiss(hash)) => {
                // Infrastructure problem, but not one the student should see
                // verbatim.
                tracing::error!(hash, "submission file missing from content cache");
                return Ok(Verdict::validation(
                    "Internal check error: can't find files for submission.",
                ));
            }
            Err(e) => return Err(e),
        }

        // Template extracted second so it wins on conflicting paths.
        self.extract_file(request, "template", project_dir)?;

        if !self.gradle.is_wrapper_installed(project_dir) {
            return Ok(Verdict::validation(
                "Can't find Gradlew launcher. Please, check template and submission files.",
            ));
        }

        status.set_status(ProcessingStatus::ValidateSubmission).await?;

        let projects = self
            .gradle
            .execute_task(project_dir, "projects", cancel)
            .await?;
        if !projects.is_successful() {
            return Ok(Verdict::validation(format!(
                "Can't get project list of submission:\n\nStdErr:\n{}\n\nStdOut:\n{}",
                projects.stderr, projects.stdout
            )));
        }
        let project_count = projects
            .stdout
            .lines()
            .filter(|line| line.contains("Project"))
            .count();
        if project_count > 1 {
            return Ok(Verdict::validation("Submission must have only one project."));
        }
        if !projects.stdout.contains("Project ':app'") {
            return Ok(Verdict::validation(
                "Submission must have project with the name 'app'.",
            ));
        }

        status.set_status(ProcessingStatus::GradleBuild).await?;

        let assemble = self
            .gradle
            .execute_task(project_dir, "assembleDebug", cancel)
            .await?;
        if !assemble.is_successful() {
            return Ok(Verdict::CompilationError {
                output: assemble.combined_output(),
            });
        }

        let assemble_tests = self
            .gradle
            .execute_task(project_dir, "assembleDebugAndroidTest", cancel)
            .await?;
        if !assemble_tests.is_successful() {
            return Ok(Verdict::CompilationError {
                output: assemble_tests.combined_output(),
            });
        }

        status.set_status(ProcessingStatus::InstallApplication).await?;

        // Instrumentation runs on real or emulated devices are flaky; the
        // best of K independent attempts is the job's verdict.
        let attempts = (0..self.simultaneous_tests)
            .map(|_| self.run_test_attempt(project_dir, status, cancel));
        let outcomes = futures::future::try_join_all(attempts).await?;

        let best = outcomes
            .into_iter()
            .reduce(|best, next| if next.grade() > best.grade() { next } else { best })
            .expect("at least one test attempt");
        Ok(best)
    }

    fn extract_file(&self, request: &CheckRequestEvent, name: &str, dest: &Path) -> Result<()> {
        let hash = request
            .files
            .get(name)
            .ok_or_else(|| CheckerError::CacheMiss(name.to_string()))?;
        let bytes = self.cache.read(hash)?;
        archive::extract_normalized(&bytes, dest)?;
        tracing::info!(file = name, dir = %dest.display(), "extracted archive");
        Ok(())
    }

    /// One test attempt: reserve a device, install both APKs onto a clean
    /// slot, run the instrumentation and parse its console output. The
    /// lease is released on every exit path.
    async fn run_test_attempt(
        &self,
        project_dir: &Path,
        status: &dyn StatusSink,
        cancel: &CancellationToken,
    ) -> Result<Verdict> {
        let Some(lease) = self.devices.reserve(cancel).await else {
            return Err(CheckerError::Cancelled);
        };
        let serial = lease.serial();

        let app_apk = project_dir.join(APP_APK);
        let test_apk = project_dir.join(TEST_APK);
        let app_package = self.apk_reader.package_name(&app_apk).await?;
        let test_package = self.apk_reader.package_name(&test_apk).await?;

        // Stale installs from an earlier run are removed best-effort; the
        // install itself will fail loudly if the slot is still taken.
        if let Err(e) = self.bridge.uninstall(serial, &app_package).await {
            tracing::warn!(serial, package = %app_package, error = %e, "uninstall failed");
        }
        self.bridge.install(serial, &app_apk).await?;
        tracing::info!(serial, package = %app_package, "installed debug application");

        if let Err(e) = self.bridge.uninstall(serial, &test_package).await {
            tracing::warn!(serial, package = %test_package, error = %e, "uninstall failed");
        }
        self.bridge.install(serial, &test_apk).await?;
        tracing::info!(serial, package = %test_package, "installed androidTest application");

        status.set_status(ProcessingStatus::Test).await?;

        tracing::info!(serial, "started testing of Android application");
        let console_output = self
            .bridge
            .run_instrumentation(serial, &test_package, cancel)
            .await?;
        tracing::info!(serial, "completed testing of Android application");

        Ok(parse_instrumentation_output(&console_output))
    }
}
