use serde::{Deserialize, Serialize};

/// Outcome of one submission check.
///
/// Serialized with an explicit `type` tag so that downstream consumers can
/// dispatch on the discriminant without reflection:
///
/// - `validation_error`: the submission is structurally invalid. Terminal,
///   never retried, carries a human-readable message for the student.
/// - `compilation_error`: the build failed. Terminal, carries the combined
///   build output.
/// - `check_result`: the app built and the instrumentation tests ran; the
///   grade is the basis for comparing parallel test attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Verdict {
    ValidationError { message: String },
    CompilationError { output: String },
    CheckResult { grade: f64, details: CheckDetails },
}

impl Verdict {
    pub fn validation(message: impl Into<String>) -> Self {
        Verdict::ValidationError {
            message: message.into(),
        }
    }

    pub fn grade(&self) -> Option<f64> {
        match self {
            Verdict::CheckResult { grade, .. } => Some(*grade),
            _ => None,
        }
    }
}

/// Structured breakdown of an instrumentation test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDetails {
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub failures: Vec<TestFailure>,
    /// Final result stream reported by the test runner. On unparseable
    /// output this holds the raw console text for diagnostics.
    pub result_stream: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    pub test: String,
    pub class: String,
    pub stack: String,
}

/// Lifecycle tag emitted by the worker pipeline at each stage transition.
///
/// Purely observational: the pipeline never reads statuses back, and
/// duplicates are acceptable on the wire. The sequential issuer guarantees
/// the monotonic stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    CheckingStarted,
    UnzipFiles,
    ValidateSubmission,
    GradleBuild,
    InstallApplication,
    Test,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            ProcessingStatus::CheckingStarted => "checking_started",
            ProcessingStatus::UnzipFiles => "unzip_files",
            ProcessingStatus::ValidateSubmission => "validate_submission",
            ProcessingStatus::GradleBuild => "gradle_build",
            ProcessingStatus::InstallApplication => "install_application",
            ProcessingStatus::Test => "test",
        };
        write!(f, "{}", tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_serializes_with_type_tag() {
        let verdict = Verdict::validation("Cannot extract submitted file.");
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("\"type\":\"validation_error\""));
        assert!(json.contains("Cannot extract submitted file."));
    }

    #[test]
    fn verdict_round_trips_check_result() {
        let verdict = Verdict::CheckResult {
            grade: 0.75,
            details: CheckDetails {
                total_tests: 4,
                passed_tests: 3,
                failed_tests: 1,
                failures: vec![TestFailure {
                    test: "testAdd".to_string(),
                    class: "com.example.CalcTest".to_string(),
                    stack: "junit.framework.AssertionFailedError".to_string(),
                }],
                result_stream: String::new(),
            },
        };
        let json = serde_json::to_string(&verdict).unwrap();
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, verdict);
    }

    #[test]
    fn status_display_matches_wire_tags() {
        assert_eq!(ProcessingStatus::CheckingStarted.to_string(), "checking_started");
        assert_eq!(ProcessingStatus::GradleBuild.to_string(), "gradle_build");
        assert_eq!(ProcessingStatus::Test.to_string(), "test");
    }

    #[test]
    fn status_serde_uses_snake_case() {
        let json = serde_json::to_string(&ProcessingStatus::UnzipFiles).unwrap();
        assert_eq!(json, "\"unzip_files\"");
    }
}
