use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MatchedToken, ResourceIndex, ResourceKind, WorkerPool};
use crate::errors::ScanError;
use crate::expiry::{days_until_expire_at, Clock};
use crate::gitlab::{AccessTokenRecord, GitlabApi};
use crate::metrics::ObservabilitySink;
use crate::pattern::TokenPattern;

/// Result of draining one page.
#[derive(Debug, Default)]
pub struct PageOutcome {
    pub matches: Vec<MatchedToken>,
    /// One entry per resource whose token listing failed.
    pub errors: Vec<ScanError>,
    pub cancelled: bool,
}

/// Fans token inspection for a page of resources out over a [`WorkerPool`].
///
/// Every match is written to the sink as soon as it is found, then returned
/// in the page outcome.
pub struct TokenScanner {
    api: Arc<dyn GitlabApi>,
    pattern: Arc<TokenPattern>,
    sink: Arc<dyn ObservabilitySink>,
    clock: Arc<dyn Clock>,
    pool: WorkerPool,
}

impl TokenScanner {
    pub fn new(
        api: Arc<dyn GitlabApi>,
        pattern: Arc<TokenPattern>,
        sink: Arc<dyn ObservabilitySink>,
        clock: Arc<dyn Clock>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            api,
            pattern,
            sink,
            clock,
            pool,
        }
    }

    /// Resources processed successfully by this scanner so far.
    pub fn scanned(&self) -> usize {
        self.pool.tally().get()
    }

    pub async fn scan_page(
        &self,
        kind: ResourceKind,
        page: &ResourceIndex,
        cancel: &CancellationToken,
    ) -> PageOutcome {
        let inspector = Arc::new(Inspector {
            api: Arc::clone(&self.api),
            pattern: Arc::clone(&self.pattern),
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
            kind,
            page: page.clone(),
        });

        let out = self
            .pool
            .run(page.ids(), cancel, move |id: String| {
                let inspector = Arc::clone(&inspector);
                async move { inspector.inspect(&id).await }
            })
            .await;

        PageOutcome {
            matches: out.results,
            errors: out.errors,
            cancelled: out.cancelled,
        }
    }
}

struct Inspector {
    api: Arc<dyn GitlabApi>,
    pattern: Arc<TokenPattern>,
    sink: Arc<dyn ObservabilitySink>,
    clock: Arc<dyn Clock>,
    kind: ResourceKind,
    page: ResourceIndex,
}

impl Inspector {
    async fn inspect(&self, id: &str) -> Result<Vec<MatchedToken>, ScanError> {
        let tokens = self.api.list_access_tokens(self.kind, id).await?;

        let (owner_name, owner_url) = self
            .page
            .get(id)
            .map(|r| (r.name.as_str(), r.url.as_str()))
            .unwrap_or_default();
        let now = self.clock.now();

        let mut matches = Vec::new();
        for token in tokens {
            if !self.pattern.is_match(&token.name) {
                continue;
            }
            match evaluate(token, owner_name, owner_url, now, false) {
                Ok(Some(matched)) => {
                    self.sink.upsert(&matched.to_record());
                    matches.push(matched);
                }
                Ok(None) => {}
                Err(e) => warn!(kind = %self.kind, resource_id = id, error = %e, "skipping token"),
            }
        }

        if !matches.is_empty() {
            info!(
                kind = %self.kind,
                resource_id = id,
                owner = owner_name,
                matched = matches.len(),
                "found tokens matching pattern"
            );
        }
        Ok(matches)
    }
}

/// Turn a token into a match, or `Ok(None)` if it has already expired.
pub(crate) fn evaluate(
    token: AccessTokenRecord,
    owner_name: &str,
    owner_url: &str,
    now: DateTime<Utc>,
    is_root: bool,
) -> Result<Option<MatchedToken>, ScanError> {
    let days = days_until_expire_at(token.expires_at.as_deref().unwrap_or_default(), now)?;
    if days < 0 {
        debug!(token = %token.name, token_id = token.id, days, "token already expired");
        return Ok(None);
    }
    Ok(Some(MatchedToken::new(token, owner_name, owner_url, days, is_root)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::FixedClock;
    use crate::gitlab::fake::{node, token, FakeGitlab};
    use crate::metrics::MemorySink;
    use crate::scan::{ResourceRef, ScanTally, WorkerErrorPolicy};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap()
    }

    fn page(kind: ResourceKind, ids: &[&str]) -> ResourceIndex {
        ids.iter()
            .map(|id| ResourceRef::from_node(kind, node(kind, id)))
            .collect()
    }

    fn scanner(api: FakeGitlab, pattern: &str, sink: Arc<MemorySink>, workers: usize) -> TokenScanner {
        TokenScanner::new(
            Arc::new(api),
            Arc::new(TokenPattern::compile(pattern).unwrap()),
            sink,
            Arc::new(FixedClock(now())),
            WorkerPool::new(workers, WorkerErrorPolicy::HaltWorker, Arc::new(ScanTally::new())),
        )
    }

    #[tokio::test]
    async fn test_pattern_and_expiry_filtering() {
        let api = FakeGitlab::new().with_tokens(
            ResourceKind::Project,
            "1",
            vec![
                token("svc-ci", 10, Some("2026-01-21")),
                token("deploy-key", 11, Some("2026-01-06")),
            ],
        );
        let sink = Arc::new(MemorySink::new());
        let scanner = scanner(api, "^svc-.*", sink.clone(), 4);

        let outcome = scanner
            .scan_page(ResourceKind::Project, &page(ResourceKind::Project, &["1"]), &CancellationToken::new())
            .await;

        assert_eq!(outcome.matches.len(), 1);
        let m = &outcome.matches[0];
        assert_eq!(m.name, "svc-ci");
        assert_eq!(m.days_until_expire, 20);
        assert_eq!(m.owner_name, "project-1");
        assert_eq!(m.owner_url, "https://git.example.com/project-1.git");
        assert_eq!(m.owner_id, "1");
        assert!(!m.is_root);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token_name, "svc-ci");
        assert_eq!(records[0].days_until_expire, 20);
        assert_eq!(scanner.scanned(), 1);
    }

    #[tokio::test]
    async fn test_expired_and_unparseable_tokens_are_dropped_silently() {
        let api = FakeGitlab::new().with_tokens(
            ResourceKind::Group,
            "5",
            vec![
                token("svc-old", 1, Some("2025-12-01")),
                token("svc-forever", 2, None),
                token("svc-garbled", 3, Some("01/02/2026")),
                token("svc-today", 4, Some("2026-01-01")),
            ],
        );
        let sink = Arc::new(MemorySink::new());
        let scanner = scanner(api, "^svc-", sink.clone(), 2);

        let outcome = scanner
            .scan_page(ResourceKind::Group, &page(ResourceKind::Group, &["5"]), &CancellationToken::new())
            .await;

        assert!(outcome.errors.is_empty());
        let names: Vec<_> = outcome.matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["svc-today"]);
        assert_eq!(outcome.matches[0].owner_url, "https://git.example.com/group-5");
        assert_eq!(sink.records().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_resource_is_reported_and_peers_continue() {
        let api = FakeGitlab::new()
            .with_tokens(ResourceKind::Project, "1", vec![token("svc-a", 1, Some("2026-02-01"))])
            .with_token_failure(ResourceKind::Project, "2")
            .with_tokens(ResourceKind::Project, "3", vec![token("svc-b", 3, Some("2026-03-01"))]);
        let sink = Arc::new(MemorySink::new());
        let scanner = scanner(api, "svc", sink.clone(), 2);

        let outcome = scanner
            .scan_page(
                ResourceKind::Project,
                &page(ResourceKind::Project, &["1", "2", "3"]),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.matches.len(), 2);
        assert_eq!(scanner.scanned(), 2);
    }

    #[tokio::test]
    async fn test_rescan_yields_same_matches() {
        let api = FakeGitlab::new()
            .with_tokens(ResourceKind::Project, "1", vec![token("svc-a", 1, Some("2026-02-01"))])
            .with_tokens(
                ResourceKind::Project,
                "2",
                vec![token("svc-b", 2, Some("2026-03-01")), token("svc-c", 3, Some("2026-04-01"))],
            )
            .with_tokens(ResourceKind::Project, "3", vec![token("other", 4, Some("2026-04-01"))]);
        let sink = Arc::new(MemorySink::new());
        let scanner = scanner(api, "^svc-", sink, 3);
        let resources = page(ResourceKind::Project, &["1", "2", "3"]);
        let cancel = CancellationToken::new();

        let first: HashSet<_> = scanner
            .scan_page(ResourceKind::Project, &resources, &cancel)
            .await
            .matches
            .into_iter()
            .collect();
        let second: HashSet<_> = scanner
            .scan_page(ResourceKind::Project, &resources, &cancel)
            .await
            .matches
            .into_iter()
            .collect();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_evaluate_distinguishes_expired_from_unparseable() {
        let expired = evaluate(token("a", 1, Some("2025-06-01")), "", "", now(), false);
        assert!(matches!(expired, Ok(None)));

        let broken = evaluate(token("a", 1, Some("soon")), "", "", now(), false);
        match broken {
            Err(ScanError::Parse(e)) => assert_eq!(e.input, "soon"),
            other => panic!("expected a parse error, got {other:?}"),
        }

        let root = evaluate(token("root", 9, Some("2026-01-11")), "root", "x/admin", now(), true)
            .unwrap()
            .unwrap();
        assert!(root.is_root);
        assert_eq!(root.days_until_expire, 10);
    }
}
