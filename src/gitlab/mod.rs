pub mod client;
pub mod types;

pub use client::{GitlabApi, GitlabClient};
pub use types::{AccessTokenRecord, PageInfo, ResourceKind, ResourceNode, ResourcePage};

#[cfg(test)]
pub mod fake;
