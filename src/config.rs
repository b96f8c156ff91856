use std::path::PathBuf;

use crate::error::{CheckerError, Result};

/// Configuration for the coordinator's polling and reconciliation loops.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Sleep between polling cycles when the backend reports no work,
    /// and between cycles generally.
    pub poll_interval_ms: u64,
    /// Sleep after every processed step (back-pressure against the backend).
    pub step_delay_ms: u64,
    /// Delay before a failed result event is republished.
    pub result_retry_delay_ms: u64,
    /// Redelivery ceiling for a single result event. Past this the event is
    /// logged at error level and dropped.
    pub max_result_redeliveries: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            step_delay_ms: 1_000,
            result_retry_delay_ms: 60_000,
            max_result_redeliveries: 60,
        }
    }
}

/// Configuration for the worker's execution pipeline.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Bus topic this worker consumes; matches the backend's checker system
    /// name for Android submissions.
    pub checker_topic: String,
    /// Parallel test attempts per job. The best grade of the K attempts is
    /// the job's verdict.
    pub simultaneous_tests: usize,
    /// Serial numbers of the devices available to this worker.
    pub device_serials: Vec<String>,
    /// Exported as ANDROID_SDK_ROOT for gradle invocations.
    pub android_sdk_root: Option<PathBuf>,
    pub adb_path: PathBuf,
    pub aapt_path: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            checker_topic: "android".to_string(),
            simultaneous_tests: 3,
            device_serials: Vec::new(),
            android_sdk_root: None,
            adb_path: PathBuf::from("adb"),
            aapt_path: PathBuf::from("aapt"),
        }
    }
}

impl WorkerConfig {
    /// A device pool smaller than the test fan-out silently serializes the
    /// parallel attempts, so it is rejected at startup instead.
    pub fn validate(&self) -> Result<()> {
        if self.simultaneous_tests == 0 {
            return Err(CheckerError::Config(
                "simultaneous_tests must be at least 1".to_string(),
            ));
        }
        if self.device_serials.len() < self.simultaneous_tests {
            return Err(CheckerError::Config(format!(
                "device pool ({} devices) is smaller than the test fan-out ({})",
                self.device_serials.len(),
                self.simultaneous_tests
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_config_default() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.poll_interval_ms, 1_000);
        assert_eq!(cfg.step_delay_ms, 1_000);
        assert_eq!(cfg.result_retry_delay_ms, 60_000);
        assert_eq!(cfg.max_result_redeliveries, 60);
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.checker_topic, "android");
        assert_eq!(cfg.simultaneous_tests, 3);
        assert!(cfg.device_serials.is_empty());
    }

    #[test]
    fn validate_rejects_pool_smaller_than_fanout() {
        let cfg = WorkerConfig {
            device_serials: vec!["emulator-5554".to_string(), "emulator-5556".to_string()],
            simultaneous_tests: 3,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_fanout() {
        let cfg = WorkerConfig {
            simultaneous_tests: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_pool_matching_fanout() {
        let cfg = WorkerConfig {
            device_serials: vec![
                "emulator-5554".to_string(),
                "emulator-5556".to_string(),
                "emulator-5558".to_string(),
            ],
            simultaneous_tests: 3,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }
}
