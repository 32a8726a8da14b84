//! GitLab API client.
//!
//! Three calls are needed for a scan:
//! - `POST /api/graphql` to enumerate projects or groups one page at a time
//! - `GET /api/v4/{projects|groups}/:id/access_tokens` per resource
//! - `GET /api/v4/personal_access_tokens/self` for the credential itself
//!
//! Every call is a single attempt with a fixed timeout. Retrying is left to
//! the next scheduled cycle.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::{
    AccessTokenRecord, GraphQlRequest, GraphQlResponse, PageVariables, ResourceKind, ResourcePage,
};
use crate::errors::{excerpt, ApiError, ScanError};

const AUTH_HEADER: &str = "PRIVATE-TOKEN";

/// The subset of the GitLab API a scan depends on.
#[async_trait]
pub trait GitlabApi: Send + Sync {
    /// Instance root, without trailing slash.
    fn base_url(&self) -> &str;

    /// Fetch one page of `kind`. An empty `after` requests the first page.
    async fn fetch_page(
        &self,
        kind: ResourceKind,
        first: u32,
        after: &str,
    ) -> Result<ResourcePage, ScanError>;

    /// List the access tokens of one project or group.
    async fn list_access_tokens(
        &self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Vec<AccessTokenRecord>, ScanError>;

    /// Describe the credential the client authenticates with.
    async fn self_check(&self) -> Result<AccessTokenRecord, ScanError>;
}

pub struct GitlabClient {
    base_url: String,
    token: String,
    http: Client,
}

impl GitlabClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ScanError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(concat!("tokenpatrol/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http,
        })
    }

    /// Attach credentials, send, and decode a 200 response as `T`.
    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ScanError> {
        let resp = req
            .header(AUTH_HEADER, &self.token)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = resp.text().await?;

        if let Some(err) = classify_status(status, retry_after, &body) {
            return Err(err.into());
        }

        serde_json::from_str(&body)
            .map_err(|e| ScanError::Decode(format!("{} (body: {})", e, excerpt(&body))))
    }
}

#[async_trait]
impl GitlabApi for GitlabClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_page(
        &self,
        kind: ResourceKind,
        first: u32,
        after: &str,
    ) -> Result<ResourcePage, ScanError> {
        let body = GraphQlRequest {
            query: kind.page_query(),
            variables: PageVariables { first, after },
        };
        let req = self
            .http
            .post(format!("{}/api/graphql", self.base_url))
            .json(&body);

        let resp: GraphQlResponse = self.send(req).await?;

        let page = resp.data.and_then(|data| data.take(kind));
        match page {
            Some(page) => Ok(page),
            None if !resp.errors.is_empty() => {
                let messages: Vec<String> = resp.errors.into_iter().map(|e| e.message).collect();
                Err(ApiError::GraphQl(messages.join("; ")).into())
            }
            None => Err(ScanError::Decode(format!(
                "graphql response has no '{}' connection",
                kind.rest_segment()
            ))),
        }
    }

    async fn list_access_tokens(
        &self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Vec<AccessTokenRecord>, ScanError> {
        let url = format!(
            "{}/api/v4/{}/{}/access_tokens",
            self.base_url,
            kind.rest_segment(),
            resource_id
        );
        let mut tokens: Vec<AccessTokenRecord> = self.send(self.http.get(url)).await?;
        for token in &mut tokens {
            token.owner_id = resource_id.to_string();
        }
        Ok(tokens)
    }

    async fn self_check(&self) -> Result<AccessTokenRecord, ScanError> {
        let url = format!("{}/api/v4/personal_access_tokens/self", self.base_url);
        self.send(self.http.get(url)).await
    }
}

/// Map a response status to an [`ApiError`], or `None` for 200.
pub fn classify_status(
    status: StatusCode,
    retry_after: Option<String>,
    body: &str,
) -> Option<ApiError> {
    let err = match status {
        StatusCode::OK => return None,
        StatusCode::BAD_REQUEST => ApiError::BadRequest,
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::FORBIDDEN => ApiError::Forbidden,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        StatusCode::METHOD_NOT_ALLOWED => ApiError::MethodNotAllowed,
        StatusCode::TOO_MANY_REQUESTS => ApiError::TooManyRequests { retry_after },
        s if s.is_server_error() => ApiError::Server {
            status: s.as_u16(),
            body: excerpt(body),
        },
        s => ApiError::UnexpectedStatus {
            status: s.as_u16(),
            body: excerpt(body),
        },
    };
    Some(err)
}

// ── Tests ─────────────────────────────────────────────────────
