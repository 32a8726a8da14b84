//! One scan cycle, end to end.
//!
//! Phases run strictly in order: reset the sink, self-check the master
//! token, scan projects, scan groups. Only the page scans fan out; the
//! orchestrator waits for each phase before starting the next one.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::scanner::evaluate;
use super::{
    MatchedToken, Paginator, ResourceKind, ScanTally, TokenScanner, WorkerErrorPolicy, WorkerPool,
};
use crate::errors::ScanError;
use crate::expiry::{Clock, SystemClock};
use crate::gitlab::GitlabApi;
use crate::metrics::ObservabilitySink;
use crate::pattern::TokenPattern;

const MASTER_OWNER: &str = "root";

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub pattern: String,
    pub page_size: u32,
    pub pool_size: usize,
    pub error_policy: WorkerErrorPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct KindReport {
    pub kind: ResourceKind,
    pub pages: usize,
    pub scanned: usize,
    pub matches: Vec<MatchedToken>,
    pub failed_resources: usize,
    /// Why enumeration stopped early, if it did.
    pub aborted: Option<String>,
}

impl KindReport {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            pages: 0,
            scanned: 0,
            matches: Vec::new(),
            failed_resources: 0,
            aborted: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub master: Option<MatchedToken>,
    pub projects: KindReport,
    pub groups: KindReport,
    pub duration_ms: u64,
}

impl CycleReport {
    /// Matched tokens across both kinds, excluding the master token.
    pub fn matched(&self) -> usize {
        self.projects.matches.len() + self.groups.matches.len()
    }
}

pub struct CycleOrchestrator {
    api: Arc<dyn GitlabApi>,
    sink: Arc<dyn ObservabilitySink>,
    clock: Arc<dyn Clock>,
    settings: ScanSettings,
}

impl CycleOrchestrator {
    pub fn new(
        api: Arc<dyn GitlabApi>,
        sink: Arc<dyn ObservabilitySink>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            api,
            sink,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one cycle. Only an invalid pattern or cancellation make it fail;
    /// API errors are logged and reflected in the report.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, ScanError> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("scan_cycle", cycle_id = %cycle_id);
        self.run_phases(cycle_id, cancel).instrument(span).await
    }

    async fn run_phases(
        &self,
        cycle_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, ScanError> {
        let started = Instant::now();
        info!("scan cycle started");

        let pattern = Arc::new(TokenPattern::compile(&self.settings.pattern)?);

        self.sink.reset();

        let master = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
            master = self.check_master_token() => master,
        };

        let projects = self.scan_kind(ResourceKind::Project, &pattern, cancel).await?;
        let groups = self.scan_kind(ResourceKind::Group, &pattern, cancel).await?;

        let elapsed = started.elapsed();
        self.sink.record_cycle_duration(elapsed);

        let report = CycleReport {
            cycle_id: cycle_id.to_string(),
            master,
            projects,
            groups,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            matched = report.matched(),
            projects = report.projects.scanned,
            groups = report.groups.scanned,
            duration_ms = report.duration_ms,
            "scan cycle finished, metrics updated"
        );
        Ok(report)
    }

    /// Self-check the credential used for every call. Failures are logged
    /// and never stop the cycle.
    async fn check_master_token(&self) -> Option<MatchedToken> {
        let token = match self.api.self_check().await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "failed to check master token");
                return None;
            }
        };

        let admin_url = format!("{}/admin", self.api.base_url());
        match evaluate(token, MASTER_OWNER, &admin_url, self.clock.now(), true) {
            Ok(Some(master)) => {
                self.sink.upsert(&master.to_record());
                info!(
                    token = %master.name,
                    days_until_expire = master.days_until_expire,
                    "checked master token"
                );
                Some(master)
            }
            Ok(None) => {
                error!("master token is expired");
                None
            }
            Err(e) => {
                error!(error = %e, "master token has an invalid expiration date");
                None
            }
        }
    }

    /// Enumerate and scan every resource of `kind`, page by page.
    async fn scan_kind(
        &self,
        kind: ResourceKind,
        pattern: &Arc<TokenPattern>,
        cancel: &CancellationToken,
    ) -> Result<KindReport, ScanError> {
        let tally = Arc::new(ScanTally::new());
        let scanner = TokenScanner::new(
            Arc::clone(&self.api),
            Arc::clone(pattern),
            Arc::clone(&self.sink),
            Arc::clone(&self.clock),
            WorkerPool::new(
                self.settings.pool_size,
                self.settings.error_policy,
                Arc::clone(&tally),
            ),
        );
        let mut paginator = Paginator::new(Arc::clone(&self.api), kind, self.settings.page_size);
        let mut report = KindReport::new(kind);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                next = paginator.next_page() => next,
            };

            let page = match next {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    error!(
                        kind = %kind,
                        page = paginator.pages() + 1,
                        error = %e,
                        "error fetching {}, skipping remaining pages",
                        kind.rest_segment()
                    );
                    report.aborted = Some(e.to_string());
                    break;
                }
            };

            let outcome = scanner.scan_page(kind, &page, cancel).await;
            if outcome.cancelled {
                return Err(ScanError::Cancelled);
            }
            report.failed_resources += outcome.errors.len();
            report.matches.extend(outcome.matches);
        }

        report.pages = paginator.pages();
        report.scanned = tally.get();
        self.sink.record_scanned(kind, report.scanned);

        info!(
            kind = %kind,
            pages = report.pages,
            scanned = report.scanned,
            matched = report.matches.len(),
            failed = report.failed_resources,
            "total scanned {}: {}",
            kind.rest_segment(),
            report.scanned
        );
        Ok(report)
    }
}
