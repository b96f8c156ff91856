//! Parser for the raw protocol emitted by `am instrument -r -w`.
//!
//! The runner prints status blocks of `INSTRUMENTATION_STATUS: key=value`
//! lines terminated by `INSTRUMENTATION_STATUS_CODE: <n>`, followed by a
//! session trailer of `INSTRUMENTATION_RESULT:` fields and a final
//! `INSTRUMENTATION_CODE: <n>`. Values may span multiple lines (stack
//! traces) until the next `INSTRUMENTATION_` line.
//!
//! Test terminal codes: 0 passed, -1 error, -2 assertion failure,
//! -3 skipped, -4 assumption failure; 1 marks a test start. A session code
//! other than -1 means the process crashed or the runner aborted.

use std::collections::HashMap;

use crate::verdict::{CheckDetails, TestFailure, Verdict};

const STATUS_PREFIX: &str = "INSTRUMENTATION_STATUS: ";
const STATUS_CODE_PREFIX: &str = "INSTRUMENTATION_STATUS_CODE: ";
const RESULT_PREFIX: &str = "INSTRUMENTATION_RESULT: ";
const SESSION_CODE_PREFIX: &str = "INSTRUMENTATION_CODE: ";

const SESSION_OK: i32 = -1;

/// Interpret raw instrumentation console output as a graded check result.
///
/// Grade is the pass ratio over the runner-reported test count. Output with
/// no recognizable protocol yields grade 0 with the raw text preserved in
/// the details for diagnostics; it is never a validation error.
pub fn parse_instrumentation_output(output: &str) -> Verdict {
    let mut current: HashMap<String, String> = HashMap::new();
    let mut current_key: Option<String> = None;
    let mut session: HashMap<String, String> = HashMap::new();
    let mut session_code: Option<i32> = None;
    let mut saw_protocol = false;

    let mut total: u32 = 0;
    let mut passed: u32 = 0;
    let mut failures: Vec<TestFailure> = Vec::new();

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix(STATUS_PREFIX) {
            saw_protocol = true;
            current_key = push_field(&mut current, rest);
        } else if let Some(rest) = line.strip_prefix(STATUS_CODE_PREFIX) {
            saw_protocol = true;
            current_key = None;
            let code: i32 = rest.trim().parse().unwrap_or(0);
            if let Some(numtests) = current.get("numtests").and_then(|v| v.parse().ok()) {
                total = total.max(numtests);
            }
            match code {
                1 => {} // test started
                0 => passed += 1,
                -1 | -2 => failures.push(TestFailure {
                    test: current.get("test").cloned().unwrap_or_default(),
                    class: current.get("class").cloned().unwrap_or_default(),
                    stack: current.get("stack").cloned().unwrap_or_default(),
                }),
                _ => {} // skipped / assumption failure
            }
            if code != 1 {
                current.clear();
            }
        } else if let Some(rest) = line.strip_prefix(RESULT_PREFIX) {
            saw_protocol = true;
            current_key = push_field(&mut session, rest);
        } else if let Some(rest) = line.strip_prefix(SESSION_CODE_PREFIX) {
            saw_protocol = true;
            current_key = None;
            session_code = rest.trim().parse().ok();
        } else if let Some(key) = &current_key {
            // Continuation of a multi-line value (stack trace or stream).
            let target = if session.contains_key(key) && !current.contains_key(key) {
                &mut session
            } else {
                &mut current
            };
            if let Some(value) = target.get_mut(key) {
                value.push('\n');
                value.push_str(line);
            }
        }
    }

    if !saw_protocol {
        return Verdict::CheckResult {
            grade: 0.0,
            details: CheckDetails {
                total_tests: 0,
                passed_tests: 0,
                failed_tests: 0,
                failures: Vec::new(),
                result_stream: output.to_string(),
            },
        };
    }

    let mut result_stream = session.get("stream").cloned().unwrap_or_default();
    if let Some(code) = session_code {
        if code != SESSION_OK {
            let short_msg = session
                .get("shortMsg")
                .cloned()
                .unwrap_or_else(|| format!("instrumentation aborted with code {}", code));
            failures.push(TestFailure {
                test: String::new(),
                class: String::new(),
                stack: short_msg.clone(),
            });
            if result_stream.is_empty() {
                result_stream = short_msg;
            }
        }
    }

    let failed = failures.len() as u32;
    let total = total.max(passed + failed);
    let grade = if total > 0 {
        f64::from(passed) / f64::from(total)
    } else {
        0.0
    };

    Verdict::CheckResult {
        grade,
        details: CheckDetails {
            total_tests: total,
            passed_tests: passed,
            failed_tests: failed,
            failures,
            result_stream,
        },
    }
}

/// Parse a `key=value` field start; returns the key for continuation lines.
fn push_field(fields: &mut HashMap<String, String>, rest: &str) -> Option<String> {
    let (key, value) = rest.split_once('=')?;
    fields.insert(key.to_string(), value.to_string());
    Some(key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_block(class: &str, test: &str, numtests: u32, current: u32, code: i32) -> String {
        let mut s = String::new();
        s.push_str(&format!("INSTRUMENTATION_STATUS: class={}\n", class));
        s.push_str(&format!("INSTRUMENTATION_STATUS: current={}\n", current));
        s.push_str("INSTRUMENTATION_STATUS: id=AndroidJUnitRunner\n");
        s.push_str(&format!("INSTRUMENTATION_STATUS: numtests={}\n", numtests));
        s.push_str(&format!("INSTRUMENTATION_STATUS: test={}\n", test));
        s.push_str("INSTRUMENTATION_STATUS_CODE: 1\n");
        s.push_str(&format!("INSTRUMENTATION_STATUS: class={}\n", class));
        s.push_str(&format!("INSTRUMENTATION_STATUS: current={}\n", current));
        s.push_str(&format!("INSTRUMENTATION_STATUS: numtests={}\n", numtests));
        s.push_str(&format!("INSTRUMENTATION_STATUS: test={}\n", test));
        if code == -2 {
            s.push_str(
                "INSTRUMENTATION_STATUS: stack=junit.framework.AssertionFailedError\n\
                 \tat com.example.Test.check(Test.kt:10)\n",
            );
        }
        s.push_str(&format!("INSTRUMENTATION_STATUS_CODE: {}\n", code));
        s
    }

    #[test]
    fn all_passing_tests_grade_one() {
        let mut output = String::new();
        output.push_str(&status_block("com.example.CalcTest", "testAdd", 2, 1, 0));
        output.push_str(&status_block("com.example.CalcTest", "testSub", 2, 2, 0));
        output.push_str("INSTRUMENTATION_RESULT: stream=\nOK (2 tests)\n");
        output.push_str("INSTRUMENTATION_CODE: -1\n");

        let verdict = parse_instrumentation_output(&output);
        let Verdict::CheckResult { grade, details } = verdict else {
            panic!("expected check result");
        };
        assert_eq!(grade, 1.0);
        assert_eq!(details.total_tests, 2);
        assert_eq!(details.passed_tests, 2);
        assert!(details.failures.is_empty());
    }

    #[test]
    fn failures_reduce_the_grade_and_carry_stacks() {
        let mut output = String::new();
        output.push_str(&status_block("com.example.CalcTest", "testAdd", 2, 1, 0));
        output.push_str(&status_block("com.example.CalcTest", "testSub", 2, 2, -2));
        output.push_str("INSTRUMENTATION_CODE: -1\n");

        let Verdict::CheckResult { grade, details } = parse_instrumentation_output(&output) else {
            panic!("expected check result");
        };
        assert_eq!(grade, 0.5);
        assert_eq!(details.failed_tests, 1);
        assert_eq!(details.failures[0].test, "testSub");
        assert!(details.failures[0].stack.contains("AssertionFailedError"));
        assert!(details.failures[0].stack.contains("Test.kt:10"));
    }

    #[test]
    fn process_crash_is_a_failure_marker() {
        let mut output = String::new();
        output.push_str(&status_block("com.example.CalcTest", "testAdd", 3, 1, 0));
        output.push_str("INSTRUMENTATION_RESULT: shortMsg=Process crashed.\n");
        output.push_str("INSTRUMENTATION_CODE: 0\n");

        let Verdict::CheckResult { grade, details } = parse_instrumentation_output(&output) else {
            panic!("expected check result");
        };
        assert!(grade < 1.0);
        assert_eq!(details.total_tests, 3);
        assert!(details
            .failures
            .iter()
            .any(|f| f.stack.contains("Process crashed")));
    }

    #[test]
    fn unparseable_output_grades_zero_and_keeps_raw_text() {
        let raw = "adb: device offline\nsome stray noise";
        let Verdict::CheckResult { grade, details } = parse_instrumentation_output(raw) else {
            panic!("expected check result");
        };
        assert_eq!(grade, 0.0);
        assert_eq!(details.total_tests, 0);
        assert_eq!(details.result_stream, raw);
    }

    #[test]
    fn skipped_tests_do_not_count_as_failures() {
        let mut output = String::new();
        output.push_str(&status_block("com.example.CalcTest", "testAdd", 2, 1, 0));
        output.push_str(&status_block("com.example.CalcTest", "testSkip", 2, 2, -3));
        output.push_str("INSTRUMENTATION_CODE: -1\n");

        let Verdict::CheckResult { grade, details } = parse_instrumentation_output(&output) else {
            panic!("expected check result");
        };
        assert_eq!(details.failed_tests, 0);
        assert_eq!(grade, 0.5);
    }
}
