//! Backend (learning-management system) RPC seam.
//!
//! The backend's remote surface reduces to four logical calls: fetch
//! pending work, fetch a submission (optionally with inline file content
//! for named hashes), push a status, push a result. [`MoodleBackend`] is
//! the REST implementation against a Moodle-style webservice endpoint.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{CheckerError, Result};

/// A student submission as fetched from the backend. Immutable once fetched.
///
/// `files` maps `<name>_hash` keys to content digests; when the submission
/// is refetched with `included_file_hashes`, the matching `<name>` keys
/// additionally carry base64 file content.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub id: i64,
    #[serde(default)]
    pub checker_system_name: String,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub files: HashMap<String, String>,
}

pub const FILE_HASH_SUFFIX: &str = "_hash";

impl Submission {
    /// Logical file name -> content hash pairs.
    pub fn file_hashes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().filter_map(|(key, value)| {
            key.strip_suffix(FILE_HASH_SUFFIX)
                .map(|name| (name, value.as_str()))
        })
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Attempt ID -> step IDs needing attention.
    async fn pending_work(&self) -> Result<HashMap<i64, Vec<i64>>>;

    /// Fetch a submission; hashes listed in `included_file_hashes` come back
    /// with inline base64 content.
    async fn submission(&self, attempt_id: i64, included_file_hashes: &[String])
        -> Result<Submission>;

    async fn set_status(&self, step_id: i64, status: &str) -> Result<()>;

    async fn set_result(&self, step_id: i64, result: &str) -> Result<()>;
}

/// REST client for a Moodle-style webservice endpoint.
#[derive(Debug, Clone)]
pub struct MoodleBackend {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl MoodleBackend {
    pub fn new(base_url: &str, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/webservice/rest/server.php", base_url.trim_end_matches('/')),
            token: token.into(),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        function: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let mut query: Vec<(&str, String)> = vec![
            ("wstoken", self.token.clone()),
            ("wsfunction", function.to_string()),
            ("moodlewsrestformat", "json".to_string()),
        ];
        query.extend(params.iter().cloned());

        let response = self
            .client
            .post(&self.endpoint)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Backend for MoodleBackend {
    async fn pending_work(&self) -> Result<HashMap<i64, Vec<i64>>> {
        let result: Option<HashMap<i64, Vec<i64>>> = self
            .call("local_qtype_get_submissions_to_check", &[])
            .await?;
        Ok(result.unwrap_or_default())
    }

    async fn submission(
        &self,
        attempt_id: i64,
        included_file_hashes: &[String],
    ) -> Result<Submission> {
        let mut params = vec![("id", attempt_id.to_string())];
        if !included_file_hashes.is_empty() {
            params.push(("included_file_hashes", included_file_hashes.join(",")));
        }
        let submission: Submission = self.call("local_qtype_get_submission", &params).await?;
        if submission.checker_system_name.is_empty() {
            return Err(CheckerError::Backend(format!(
                "submission {} has no checker system name",
                attempt_id
            )));
        }
        Ok(submission)
    }

    async fn set_status(&self, step_id: i64, status: &str) -> Result<()> {
        let _: Value = self
            .call(
                "local_qtype_set_submission_status",
                &[("id", step_id.to_string()), ("status", status.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn set_result(&self, step_id: i64, result: &str) -> Result<()> {
        let _: Value = self
            .call(
                "local_qtype_set_submission_results",
                &[("id", step_id.to_string()), ("result", result.to_string())],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_hashes_strips_suffix_and_skips_content_keys() {
        let submission = Submission {
            id: 7,
            checker_system_name: "android".to_string(),
            parameters: HashMap::new(),
            files: HashMap::from([
                ("submission_hash".to_string(), "abc".to_string()),
                ("template_hash".to_string(), "def".to_string()),
                ("submission".to_string(), "aGVsbG8=".to_string()),
            ]),
        };

        let mut hashes: Vec<_> = submission.file_hashes().collect();
        hashes.sort();
        assert_eq!(hashes, vec![("submission", "abc"), ("template", "def")]);
    }
}
