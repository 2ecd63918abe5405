//! Result callback to the grading service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Serialize, Serializer};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::SubmissionConfig;
use crate::error::{Error, Result};
use crate::util::SecretString;

#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    pub created: DateTime<Utc>,
    pub task_id: String,
    #[serde(serialize_with = "expose_secret")]
    pub user_token: SecretString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<SubmissionInfo>,
}

impl CallbackPayload {
    pub fn new(task_id: &str, user_token: SecretString, extra: Option<SubmissionInfo>) -> Self {
        Self {
            created: Utc::now(),
            task_id: task_id.to_string(),
            user_token,
            extra,
        }
    }
}

/// Repository and ref of the graded submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionInfo {
    pub student_repo: String,
    pub student_ref: String,
}

impl SubmissionInfo {
    /// Read both values from the environment; `None` unless both are set.
    pub fn from_env(config: &SubmissionConfig) -> Option<Self> {
        let student_repo = non_empty_env(&config.repo_env)?;
        let student_ref = non_empty_env(&config.ref_env)?;
        Some(Self {
            student_repo,
            student_ref,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn expose_secret<S: Serializer>(secret: &SecretString, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose())
}

#[async_trait]
pub trait ResultReporter: Send + Sync {
    /// Deliver one payload. Anything but HTTP 200 is an error.
    async fn submit(&self, payload: &CallbackPayload) -> Result<()>;
}

pub struct HttpReporter {
    base_url: String,
    auth_token: SecretString,
    client: Client,
}

impl HttpReporter {
    pub fn new(base_url: String, auth_token: SecretString, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Report(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url,
            auth_token,
            client,
        })
    }
}

#[async_trait]
impl ResultReporter for HttpReporter {
    async fn submit(&self, payload: &CallbackPayload) -> Result<()> {
        debug!("POST {} for task {}", self.base_url, payload.task_id);

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(self.auth_token.expose())
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Report(e.to_string()))?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(Error::Report(format!(
                "Response status code {} instead of 200",
                status.as_u16()
            )));
        }
        info!("✓ Result submitted for task {}", payload.task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use serial_test::serial;

    fn payload(extra: Option<SubmissionInfo>) -> CallbackPayload {
        CallbackPayload::new("42", SecretString::new("user-abc".into()), extra)
    }

    #[test]
    fn test_payload_serialization() {
        let value = serde_json::to_value(payload(None)).unwrap();
        assert_eq!(value["task_id"], "42");
        assert_eq!(value["user_token"], "user-abc");
        assert!(value.get("extra").is_none());
        let created = value["created"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(created).is_ok());
    }

    #[test]
    fn test_payload_with_extra() {
        let extra = SubmissionInfo {
            student_repo: "student/hw1".into(),
            student_ref: "refs/heads/main".into(),
        };
        let value = serde_json::to_value(payload(Some(extra))).unwrap();
        assert_eq!(value["extra"]["student_repo"], "student/hw1");
        assert_eq!(value["extra"]["student_ref"], "refs/heads/main");
    }

    #[test]
    fn test_payload_debug_hides_token() {
        assert!(!format!("{:?}", payload(None)).contains("user-abc"));
    }

    #[test]
    #[serial]
    fn test_submission_info_from_env() {
        let config = SubmissionConfig {
            repo_env: "VALIDATOR_TEST_REPO".into(),
            ref_env: "VALIDATOR_TEST_REF".into(),
        };
        std::env::remove_var("VALIDATOR_TEST_REPO");
        std::env::remove_var("VALIDATOR_TEST_REF");
        assert!(SubmissionInfo::from_env(&config).is_none());

        std::env::set_var("VALIDATOR_TEST_REPO", "student/hw1");
        assert!(SubmissionInfo::from_env(&config).is_none());

        std::env::set_var("VALIDATOR_TEST_REF", "main");
        let info = SubmissionInfo::from_env(&config).unwrap();
        assert_eq!(info.student_repo, "student/hw1");
        assert_eq!(info.student_ref, "main");

        std::env::remove_var("VALIDATOR_TEST_REPO");
        std::env::remove_var("VALIDATOR_TEST_REF");
    }

    #[tokio::test]
    async fn test_submit_sends_bearer_and_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/callback")
            .match_header("authorization", "Bearer company-token")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "task_id": "42",
                "user_token": "user-abc"
            })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let reporter = HttpReporter::new(
            format!("{}/callback", server.url()),
            SecretString::new("company-token".into()),
            Some(Duration::from_secs(5)),
        )
        .unwrap();
        reporter.submit(&payload(None)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_non_200_is_report_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/callback")
            .with_status(201)
            .create_async()
            .await;

        let reporter = HttpReporter::new(
            format!("{}/callback", server.url()),
            SecretString::new("t".into()),
            None,
        )
        .unwrap();
        let err = reporter.submit(&payload(None)).await.unwrap_err();
        assert_eq!(err.stage(), "report");
        assert!(err.to_string().contains("Response status code 201 instead of 200"));
    }

    #[tokio::test]
    async fn test_submit_transport_error() {
        // Port 9 (discard) is closed on test hosts
        let reporter = HttpReporter::new(
            "http://127.0.0.1:9/callback".to_string(),
            SecretString::new("t".into()),
            Some(Duration::from_secs(2)),
        )
        .unwrap();
        let err = reporter.submit(&payload(None)).await.unwrap_err();
        assert!(matches!(err, Error::Report(_)));
    }
}
