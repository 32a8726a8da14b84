//! The resource-scanning pipeline.
//!
//! A cycle enumerates projects, then groups, one page at a time
//! ([`paginator`]). Each page is drained by a bounded worker pool
//! ([`pool`], [`scanner`]) before the next page is requested. The
//! [`cycle`] orchestrator sequences the phases and reports the outcome.

pub mod cycle;
pub mod paginator;
pub mod pool;
pub mod scanner;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub use crate::gitlab::ResourceKind;
use crate::gitlab::{AccessTokenRecord, PageInfo, ResourceNode};
use crate::metrics::ObservabilityRecord;

pub use cycle::{CycleOrchestrator, CycleReport, KindReport, ScanSettings};
pub use paginator::Paginator;
pub use pool::{PoolOutput, WorkerErrorPolicy, WorkerPool};
pub use scanner::{PageOutcome, TokenScanner};

/// A project or group, reduced to what a metric label needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: String,
    pub name: String,
    /// Repository URL for projects, web URL for groups.
    pub url: String,
    pub kind: ResourceKind,
}

impl ResourceRef {
    pub fn from_node(kind: ResourceKind, node: ResourceNode) -> Self {
        let id = node.numeric_id().to_string();
        let url = match kind {
            ResourceKind::Project => node.http_url_to_repo,
            ResourceKind::Group => node.web_url,
        };
        Self {
            id,
            name: node.name,
            url: url.unwrap_or_default(),
            kind,
        }
    }
}

/// Resources keyed by numeric ID. A later insert with the same ID wins.
#[derive(Debug, Clone, Default)]
pub struct ResourceIndex {
    entries: HashMap<String, ResourceRef>,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: ResourceRef) {
        self.entries.insert(resource.id.clone(), resource);
    }

    pub fn extend(&mut self, other: &ResourceIndex) {
        for resource in other.entries.values() {
            self.insert(resource.clone());
        }
    }

    pub fn get(&self, id: &str) -> Option<&ResourceRef> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ResourceRef> for ResourceIndex {
    fn from_iter<T: IntoIterator<Item = ResourceRef>>(iter: T) -> Self {
        let mut index = ResourceIndex::new();
        for resource in iter {
            index.insert(resource);
        }
        index
    }
}

/// Position in a paginated enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub has_next_page: bool,
    pub end_cursor: String,
}

impl PageCursor {
    pub fn start() -> Self {
        Self {
            has_next_page: true,
            end_cursor: String::new(),
        }
    }

    pub fn advance(&mut self, info: &PageInfo) {
        self.has_next_page = info.has_next_page;
        self.end_cursor = info.end_cursor.clone().unwrap_or_default();
    }
}

/// A token whose name matched the pattern and which has not expired yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MatchedToken {
    pub name: String,
    pub id: i64,
    pub last_used_at: String,
    pub expires_at: String,
    pub owner_id: String,
    pub owner_name: String,
    pub owner_url: String,
    pub days_until_expire: i64,
    pub is_root: bool,
}

impl MatchedToken {
    pub fn new(
        token: AccessTokenRecord,
        owner_name: &str,
        owner_url: &str,
        days_until_expire: i64,
        is_root: bool,
    ) -> Self {
        Self {
            last_used_at: token.last_used_label().to_string(),
            name: token.name,
            id: token.id,
            expires_at: token.expires_at.unwrap_or_default(),
            owner_id: token.owner_id,
            owner_name: owner_name.to_string(),
            owner_url: owner_url.to_string(),
            days_until_expire,
            is_root,
        }
    }

    pub fn to_record(&self) -> ObservabilityRecord {
        ObservabilityRecord {
            token_name: self.name.clone(),
            owner_name: self.owner_name.clone(),
            owner_url: self.owner_url.clone(),
            token_id: self.id.to_string(),
            last_used: self.last_used_at.clone(),
            is_root: self.is_root,
            days_until_expire: self.days_until_expire,
        }
    }
}

/// Resources processed successfully during one kind's scan.
#[derive(Debug, Default)]
pub struct ScanTally(AtomicUsize);

impl ScanTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}
