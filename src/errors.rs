use thiserror::Error;

/// Longest response-body excerpt kept in an error message.
const BODY_EXCERPT: usize = 200;

/// Non-success answer from the GitLab API, categorized by status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("bad request: check your request signature")]
    BadRequest,

    #[error("unauthorized: check your credentials")]
    Unauthorized,

    #[error("forbidden: access denied to requested resource")]
    Forbidden,

    #[error("not found: requested resource isn't found")]
    NotFound,

    #[error("method not allowed: http method isn't allowed for this type of request")]
    MethodNotAllowed,

    #[error("too many requests: retry after {}", retry_after.as_deref().unwrap_or("unknown"))]
    TooManyRequests { retry_after: Option<String> },

    #[error("server error: status code {status}, {body}")]
    Server { status: u16, body: String },

    #[error("unexpected status code ({status}): {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("graphql error: {0}")]
    GraphQl(String),
}

/// The date string handed to the expiry calculator is not `YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid expiration date '{input}', expected YYYY-MM-DD")]
pub struct ParseError {
    pub input: String,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] ApiError),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("invalid token name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("scan cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ScanError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ScanError::Decode(e.to_string())
        } else {
            ScanError::Transport(e.to_string())
        }
    }
}

/// Cut a response body down to something that fits in a log line.
pub fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
