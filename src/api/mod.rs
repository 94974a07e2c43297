//! Query submission over REST
//!
//! Chat queries leave through a plain HTTP call; the answer streams back over
//! the notification socket. The gateway acknowledges a query with
//! `202 Accepted`, anything else is a rejection.

use crate::chat::transcript::ContextTurn;
use crate::core::auth::AuthSession;
use crate::core::error::ApiError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Body of a query submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub request_id: String,
    pub query: String,
    pub context: Vec<ContextTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// Status line of the gateway's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    pub status: u16,
    pub reason: String,
}

impl SubmitResponse {
    pub const ACCEPTED: u16 = 202;

    pub fn accepted() -> Self {
        Self {
            status: Self::ACCEPTED,
            reason: "Accepted".to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == Self::ACCEPTED
    }
}

/// Submits chat queries to the gateway
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Send one query; only transport failures are errors, any HTTP status
    /// is returned as a [`SubmitResponse`]
    async fn submit_query(&self, request: &QueryRequest) -> Result<SubmitResponse, ApiError>;
}

/// [`QueryApi`] over `reqwest`
#[derive(Debug, Clone)]
pub struct RestQueryApi {
    client: Client,
    endpoint: String,
    session: AuthSession,
}

impl RestQueryApi {
    pub fn new(endpoint: impl Into<String>, session: AuthSession) -> Self {
        Self::with_client(Client::new(), endpoint, session)
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>, session: AuthSession) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            session,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl QueryApi for RestQueryApi {
    async fn submit_query(&self, request: &QueryRequest) -> Result<SubmitResponse, ApiError> {
        let token = self.session.token().ok_or(ApiError::Unauthenticated)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                url: self.endpoint.clone(),
                source,
            })?;

        let status = response.status();
        tracing::debug!(
            request_id = %request.request_id,
            status = status.as_u16(),
            "Query submitted"
        );

        Ok(SubmitResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }
}
