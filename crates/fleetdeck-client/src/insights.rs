//! Thin typed client for the AI insight endpoints. Both calls go through
//! the session so scope and re-auth behave like every other fetch.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::error::RefreshError;
use crate::session::SessionContext;
use crate::transport::ApiRequest;

const INSIGHTS_PATH: &str = "/ai/insights";
const SUMMARIZE_PATH: &str = "/ai/summarize";

#[derive(Debug, Clone, Deserialize)]
pub struct InsightAnswer {
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotesSummary {
    pub summary: String,
    #[serde(default)]
    pub notes_count: u64,
}

pub struct InsightsClient {
    session: Arc<SessionContext>,
}

impl InsightsClient {
    pub fn new(session: Arc<SessionContext>) -> Self {
        InsightsClient { session }
    }

    /// Ask a free-form question about the caller's visible fleet slice.
    pub async fn ask(&self, question: &str) -> Result<InsightAnswer, RefreshError> {
        let request = ApiRequest::post(INSIGHTS_PATH).with_body(json!({ "question": question }));
        let response = self.session.authorized_request(request).await?;
        if !response.is_success() {
            return Err(RefreshError::Api {
                status: response.status,
            });
        }
        Ok(serde_json::from_value(response.body)?)
    }

    /// Summarize the driver notes the current identity can see.
    pub async fn summarize_notes(&self) -> Result<NotesSummary, RefreshError> {
        let response = self
            .session
            .authorized_request(ApiRequest::post(SUMMARIZE_PATH))
            .await?;
        if !response.is_success() {
            return Err(RefreshError::Api {
                status: response.status,
            });
        }
        Ok(serde_json::from_value(response.body)?)
    }
}
