//! Scriptable in-process [`GitlabApi`] for pipeline tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::client::GitlabApi;
use super::types::{AccessTokenRecord, PageInfo, ResourceKind, ResourceNode, ResourcePage};
use crate::errors::{ApiError, ScanError};

/// One request made against the fake. Token listings are logged when they
/// answer, after any scripted delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SelfCheck,
    Page(ResourceKind, String),
    Tokens(ResourceKind, String),
}

enum Scripted<T> {
    Ok(T),
    Fail(String),
}

pub struct FakeGitlab {
    base_url: String,
    pages: HashMap<ResourceKind, Vec<Scripted<ResourcePage>>>,
    tokens: HashMap<(ResourceKind, String), Scripted<Vec<AccessTokenRecord>>>,
    master: Scripted<AccessTokenRecord>,
    token_delay: Option<Duration>,
    calls: Mutex<Vec<Call>>,
}

impl FakeGitlab {
    pub fn new() -> Self {
        Self {
            base_url: "https://git.example.com".to_string(),
            pages: HashMap::new(),
            tokens: HashMap::new(),
            master: Scripted::Fail("no master token scripted".to_string()),
            token_delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Append a page; pages are served in the order they were added.
    pub fn with_page(
        mut self,
        kind: ResourceKind,
        ids: &[&str],
        has_next_page: bool,
        end_cursor: Option<&str>,
    ) -> Self {
        let nodes = ids.iter().map(|id| node(kind, id)).collect();
        let page = ResourcePage {
            nodes,
            page_info: PageInfo {
                has_next_page,
                end_cursor: end_cursor.map(String::from),
            },
        };
        self.pages.entry(kind).or_default().push(Scripted::Ok(page));
        self
    }

    pub fn with_page_failure(mut self, kind: ResourceKind, message: &str) -> Self {
        self.pages
            .entry(kind)
            .or_default()
            .push(Scripted::Fail(message.to_string()));
        self
    }

    pub fn with_tokens(mut self, kind: ResourceKind, id: &str, tokens: Vec<AccessTokenRecord>) -> Self {
        self.tokens.insert((kind, id.to_string()), Scripted::Ok(tokens));
        self
    }

    pub fn with_token_failure(mut self, kind: ResourceKind, id: &str) -> Self {
        self.tokens.insert(
            (kind, id.to_string()),
            Scripted::Fail(format!("{kind} {id} is gone")),
        );
        self
    }

    pub fn with_master(mut self, token: AccessTokenRecord) -> Self {
        self.master = Scripted::Ok(token);
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// Every request so far, across all endpoints.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn page_requests(&self) -> Vec<(ResourceKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Page(kind, after) => Some((kind, after)),
                _ => None,
            })
            .collect()
    }

    pub fn token_requests(&self) -> Vec<(ResourceKind, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Tokens(kind, id) => Some((kind, id)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl GitlabApi for FakeGitlab {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_page(
        &self,
        kind: ResourceKind,
        _first: u32,
        after: &str,
    ) -> Result<ResourcePage, ScanError> {
        self.record(Call::Page(kind, after.to_string()));
        let served = self
            .page_requests()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
            - 1;
        match self.pages.get(&kind).and_then(|pages| pages.get(served)) {
            Some(Scripted::Ok(page)) => Ok(page.clone()),
            Some(Scripted::Fail(msg)) => Err(ScanError::Transport(msg.clone())),
            None => Err(ApiError::UnexpectedStatus {
                status: 418,
                body: format!("no page {served} scripted for {kind}"),
            }
            .into()),
        }
    }

    async fn list_access_tokens(
        &self,
        kind: ResourceKind,
        resource_id: &str,
    ) -> Result<Vec<AccessTokenRecord>, ScanError> {
        if let Some(delay) = self.token_delay {
            tokio::time::sleep(delay).await;
        }
        self.record(Call::Tokens(kind, resource_id.to_string()));
        match self.tokens.get(&(kind, resource_id.to_string())) {
            Some(Scripted::Ok(tokens)) => Ok(tokens
                .iter()
                .cloned()
                .map(|mut t| {
                    t.owner_id = resource_id.to_string();
                    t
                })
                .collect()),
            Some(Scripted::Fail(_)) => Err(ApiError::NotFound.into()),
            None => Ok(Vec::new()),
        }
    }

    async fn self_check(&self) -> Result<AccessTokenRecord, ScanError> {
        self.record(Call::SelfCheck);
        match &self.master {
            Scripted::Ok(token) => Ok(token.clone()),
            Scripted::Fail(msg) => Err(ScanError::Transport(msg.clone())),
        }
    }
}

pub fn node(kind: ResourceKind, id: &str) -> ResourceNode {
    let (gid, name) = match kind {
        ResourceKind::Project => (format!("gid://gitlab/Project/{id}"), format!("project-{id}")),
        ResourceKind::Group => (format!("gid://gitlab/Group/{id}"), format!("group-{id}")),
    };
    ResourceNode {
        id: gid,
        http_url_to_repo: Some(format!("https://git.example.com/{name}.git")),
        web_url: Some(format!("https://git.example.com/{name}")),
        name,
    }
}

pub fn token(name: &str, id: i64, expires_at: Option<&str>) -> AccessTokenRecord {
    AccessTokenRecord {
        name: name.to_string(),
        id,
        last_used_at: None,
        expires_at: expires_at.map(String::from),
        owner_id: String::new(),
    }
}
