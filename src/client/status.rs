//! Request/response status query.

use reqwest::StatusCode;

use super::error::ClientError;
use crate::domain::{AssignmentId, Session};

#[derive(Debug, Clone)]
pub struct StatusClient {
    http: reqwest::Client,
    base_url: String,
}

impl StatusClient {
    /// No timeout beyond the transport default; callers bound the call
    /// themselves when they need to.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn url(&self, assignment_id: &AssignmentId) -> String {
        format!(
            "{}/api/v1/collaboration/{}/status",
            self.base_url.trim_end_matches('/'),
            assignment_id
        )
    }

    /// Fetch the room snapshot. `Ok(None)` when no room exists.
    pub async fn fetch(
        &self,
        assignment_id: &AssignmentId,
        token: &str,
    ) -> Result<Option<Session>, ClientError> {
        let url = self.url(assignment_id);
        let response = self.http.get(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&body)?))
    }
}
