use std::sync::Arc;
use tracing::{debug, warn};

use super::{PageCursor, ResourceIndex, ResourceKind, ResourceRef};
use crate::errors::ScanError;
use crate::gitlab::GitlabApi;

/// Cursor-driven enumeration of one resource kind.
///
/// The caller owns the loop: call [`Paginator::next_page`], fully process the
/// page it returns, then call it again. A page is never requested before the
/// previous page's cursor is known. The first failed fetch ends the
/// enumeration; pages returned before it stay valid.
pub struct Paginator {
    api: Arc<dyn GitlabApi>,
    kind: ResourceKind,
    page_size: u32,
    cursor: PageCursor,
    index: ResourceIndex,
    pages: usize,
}

impl Paginator {
    pub fn new(api: Arc<dyn GitlabApi>, kind: ResourceKind, page_size: u32) -> Self {
        Self {
            api,
            kind,
            page_size,
            cursor: PageCursor::start(),
            index: ResourceIndex::new(),
            pages: 0,
        }
    }

    /// Fetch the next page and return its resources.
    ///
    /// `Ok(None)` once the last page has been returned. After an `Err` the
    /// paginator is terminal and keeps returning `Ok(None)`.
    pub async fn next_page(&mut self) -> Result<Option<ResourceIndex>, ScanError> {
        if !self.cursor.has_next_page {
            return Ok(None);
        }

        let requested = self.cursor.end_cursor.clone();
        let page = match self
            .api
            .fetch_page(self.kind, self.page_size, &requested)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.cursor.has_next_page = false;
                return Err(e);
            }
        };

        self.pages += 1;
        self.cursor.advance(&page.page_info);

        // A server that keeps answering "more pages" with the same cursor
        // would pin us in this loop forever.
        if self.cursor.has_next_page && self.cursor.end_cursor == requested {
            warn!(
                kind = %self.kind,
                cursor = %requested,
                "enumeration cursor did not advance, stopping"
            );
            self.cursor.has_next_page = false;
        }

        let page_index: ResourceIndex = page
            .nodes
            .into_iter()
            .map(|node| ResourceRef::from_node(self.kind, node))
            .collect();
        self.index.extend(&page_index);

        debug!(
            kind = %self.kind,
            page = self.pages,
            resources = page_index.len(),
            has_next_page = self.cursor.has_next_page,
            "fetched page"
        );

        Ok(Some(page_index))
    }

    /// Number of pages fetched successfully so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Every resource discovered so far in this enumeration.
    pub fn index(&self) -> &ResourceIndex {
        &self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::fake::FakeGitlab;

    #[tokio::test]
    async fn test_follows_cursor_until_last_page() {
        let api = Arc::new(
            FakeGitlab::new()
                .with_page(ResourceKind::Project, &["1", "2"], true, Some("c1"))
                .with_page(ResourceKind::Project, &["3"], true, Some("c2"))
                .with_page(ResourceKind::Project, &["4"], false, Some("c3")),
        );
        let mut paginator = Paginator::new(api.clone(), ResourceKind::Project, 2);

        let mut sizes = Vec::new();
        while let Some(page) = paginator.next_page().await.unwrap() {
            sizes.push(page.len());
        }

        assert_eq!(sizes, vec![2, 1, 1]);
        assert_eq!(paginator.pages(), 3);
        assert_eq!(paginator.index().len(), 4);
        assert_eq!(
            api.page_requests(),
            vec![
                (ResourceKind::Project, "".to_string()),
                (ResourceKind::Project, "c1".to_string()),
                (ResourceKind::Project, "c2".to_string()),
            ]
        );

        // exhausted: no further fetches
        assert!(paginator.next_page().await.unwrap().is_none());
        assert_eq!(api.page_requests().len(), 3);
    }

    #[tokio::test]
    async fn test_failure_is_terminal_and_keeps_earlier_pages() {
        let api = Arc::new(
            FakeGitlab::new()
                .with_page(ResourceKind::Group, &["10", "11"], true, Some("g1"))
                .with_page_failure(ResourceKind::Group, "connection reset")
                .with_page(ResourceKind::Group, &["12"], false, None),
        );
        let mut paginator = Paginator::new(api.clone(), ResourceKind::Group, 2);

        let first = paginator.next_page().await.unwrap().unwrap();
        assert_eq!(first.len(), 2);

        let err = paginator.next_page().await.unwrap_err();
        assert!(matches!(err, ScanError::Transport(_)));

        assert!(paginator.next_page().await.unwrap().is_none());
        assert_eq!(api.page_requests().len(), 2);
        assert_eq!(paginator.index().len(), 2);
        assert!(!paginator.cursor().has_next_page);
    }

    #[tokio::test]
    async fn test_stuck_cursor_stops_enumeration() {
        let api = Arc::new(
            FakeGitlab::new()
                .with_page(ResourceKind::Project, &["1"], true, Some("same"))
                .with_page(ResourceKind::Project, &["2"], true, Some("same")),
        );
        let mut paginator = Paginator::new(api.clone(), ResourceKind::Project, 1);

        assert!(paginator.next_page().await.unwrap().is_some());
        assert!(paginator.next_page().await.unwrap().is_some());
        assert!(paginator.next_page().await.unwrap().is_none());
        assert_eq!(api.page_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_enumeration() {
        let api = Arc::new(FakeGitlab::new().with_page(ResourceKind::Group, &[], false, None));
        let mut paginator = Paginator::new(api, ResourceKind::Group, 100);

        let page = paginator.next_page().await.unwrap().unwrap();
        assert!(page.is_empty());
        assert!(paginator.next_page().await.unwrap().is_none());
    }
}
