use serde::{Deserialize, Serialize};

/// The two kinds of GitLab resources that own access tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Project,
    Group,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Project => "project",
            ResourceKind::Group => "group",
        }
    }

    /// Path segment of the REST API (`/api/v4/{segment}/{id}/...`).
    pub fn rest_segment(self) -> &'static str {
        match self {
            ResourceKind::Project => "projects",
            ResourceKind::Group => "groups",
        }
    }

    /// GraphQL query enumerating one page of this kind.
    pub fn page_query(self) -> &'static str {
        match self {
            ResourceKind::Project => PROJECTS_QUERY,
            ResourceKind::Group => GROUPS_QUERY,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const PROJECTS_QUERY: &str = r#"
query ($first: Int!, $after: String!) {
  projects(first: $first, after: $after) {
    nodes {
      id
      name
      httpUrlToRepo
    }
    pageInfo {
      hasNextPage
      endCursor
    }
  }
}
"#;

const GROUPS_QUERY: &str = r#"
query ($first: Int!, $after: String!) {
  groups(first: $first, after: $after) {
    nodes {
      id
      name
      webUrl
    }
    pageInfo {
      hasNextPage
      endCursor
    }
  }
}
"#;

// ── GraphQL enumeration ───────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct GraphQlRequest<'a> {
    pub query: &'a str,
    pub variables: PageVariables<'a>,
}

#[derive(Debug, Serialize)]
pub struct PageVariables<'a> {
    pub first: u32,
    pub after: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlResponse {
    pub data: Option<GraphQlData>,
    #[serde(default)]
    pub errors: Vec<GraphQlMessage>,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlMessage {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct GraphQlData {
    pub projects: Option<ResourcePage>,
    pub groups: Option<ResourcePage>,
}

impl GraphQlData {
    pub fn take(self, kind: ResourceKind) -> Option<ResourcePage> {
        match kind {
            ResourceKind::Project => self.projects,
            ResourceKind::Group => self.groups,
        }
    }
}

/// One page of an enumeration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcePage {
    #[serde(default)]
    pub nodes: Vec<ResourceNode>,
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PageInfo {
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
    #[serde(rename = "endCursor", default)]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceNode {
    /// Global ID, e.g. `gid://gitlab/Project/42`.
    pub id: String,
    pub name: String,
    #[serde(rename = "httpUrlToRepo", default)]
    pub http_url_to_repo: Option<String>,
    #[serde(rename = "webUrl", default)]
    pub web_url: Option<String>,
}

impl ResourceNode {
    pub fn numeric_id(&self) -> &str {
        numeric_id(&self.id)
    }
}

/// Strip a GraphQL global ID down to its trailing numeric part.
pub fn numeric_id(global_id: &str) -> &str {
    global_id.rsplit('/').next().unwrap_or(global_id)
}

// ── REST ──────────────────────────────────────────────────────

/// An access token as returned by the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
    pub name: String,
    pub id: i64,
    #[serde(default)]
    pub last_used_at: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Numeric ID of the project or group the token was listed under.
    #[serde(skip)]
    pub owner_id: String,
}

impl AccessTokenRecord {
    /// `last_used_at`, or `"never"` for tokens that were never used.
    pub fn last_used_label(&self) -> &str {
        match self.last_used_at.as_deref() {
            Some(s) if !s.is_empty() => s,
            _ => "never",
        }
    }
}
