//! Device bridge: install/uninstall packages and run instrumentation
//! commands on a reserved device, shelling out to the platform tools.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{CheckerError, Result};

#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Install an APK onto a clean slot (no reinstall-over semantics).
    async fn install(&self, serial: &str, apk: &Path) -> Result<()>;

    async fn uninstall(&self, serial: &str, package: &str) -> Result<()>;

    /// Run the instrumentation test runner of `test_package` and return the
    /// raw console output.
    async fn run_instrumentation(
        &self,
        serial: &str,
        test_package: &str,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Reads metadata out of a built APK.
#[async_trait]
pub trait ApkReader: Send + Sync {
    async fn package_name(&self, apk: &Path) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct AdbBridge {
    adb_path: PathBuf,
}

impl AdbBridge {
    pub fn new(adb_path: impl Into<PathBuf>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    async fn run_adb(&self, serial: &str, args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new(&self.adb_path)
            .arg("-s")
            .arg(serial)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn install(&self, serial: &str, apk: &Path) -> Result<()> {
        let apk = apk.to_string_lossy().into_owned();
        let output = self.run_adb(serial, &["install", &apk]).await?;
        if !output.status.success() {
            return Err(CheckerError::Device(format!(
                "install of {} failed: {}",
                apk,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn uninstall(&self, serial: &str, package: &str) -> Result<()> {
        let output = self.run_adb(serial, &["uninstall", package]).await?;
        if !output.status.success() {
            return Err(CheckerError::Device(format!(
                "uninstall of {} failed: {}",
                package,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn run_instrumentation(
        &self,
        serial: &str,
        test_package: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let command = format!("am instrument -r -w {}", test_package);
        tracing::info!(serial, %command, "running instrumentation");

        let child = Command::new(&self.adb_path)
            .arg("-s")
            .arg(serial)
            .arg("shell")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(CheckerError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        if !output.status.success() {
            return Err(CheckerError::Device(format!(
                "instrumentation command failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Package-name extraction via `aapt dump badging`.
#[derive(Debug, Clone)]
pub struct AaptApkReader {
    aapt_path: PathBuf,
}

impl AaptApkReader {
    pub fn new(aapt_path: impl Into<PathBuf>) -> Self {
        Self {
            aapt_path: aapt_path.into(),
        }
    }
}

#[async_trait]
impl ApkReader for AaptApkReader {
    async fn package_name(&self, apk: &Path) -> Result<String> {
        let output = Command::new(&self.aapt_path)
            .arg("dump")
            .arg("badging")
            .arg(apk)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(CheckerError::Device(format!(
                "aapt dump badging failed for {}: {}",
                apk.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_badging_package(&stdout).ok_or_else(|| {
            CheckerError::Device(format!("no package name in badging of {}", apk.display()))
        })
    }
}

fn parse_badging_package(badging: &str) -> Option<String> {
    for line in badging.lines() {
        if let Some(rest) = line.strip_prefix("package:") {
            if let Some(start) = rest.find("name='") {
                let rest = &rest[start + "name='".len()..];
                if let Some(end) = rest.find('\'') {
                    return Some(rest[..end].to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_package_name_from_badging() {
        let badging = "package: name='com.example.app' versionCode='1' versionName='1.0'\n\
                       sdkVersion:'24'\n";
        assert_eq!(
            parse_badging_package(badging).as_deref(),
            Some("com.example.app")
        );
    }

    #[test]
    fn badging_without_package_line_is_none() {
        assert!(parse_badging_package("sdkVersion:'24'\n").is_none());
    }
}
