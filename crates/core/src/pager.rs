//! Drives offset, cursor and link-header pagination to exhaustion.

use std::future::Future;

use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    /// Offset/limit paging (Ed-Fi, OneRoster).
    Offset(u64),
    /// Opaque cursor such as Clever's `starting_after`.
    Cursor(String),
    /// Absolute or relative URL from a `Link: rel="next"` header.
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u64,
    pub cursor: Option<PageToken>,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageToken>,
    /// Total count reported by the provider, for progress logs only.
    pub total_hint: Option<u64>,
}

impl<T> Page<T> {
    /// Page for offset-style APIs: `next` is set only when the page is full.
    pub fn offset(items: Vec<T>, request: &PageRequest, total_hint: Option<u64>) -> Self {
        let next = if items.len() as u64 >= request.limit && !items.is_empty() {
            Some(PageToken::Offset(request.offset + items.len() as u64))
        } else {
            None
        };
        Self {
            items,
            next,
            total_hint,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pager {
    page_size: u64,
    max_pages: u64,
    retry: RetryPolicy,
}

pub const DEFAULT_MAX_PAGES: u64 = 100_000;

impl Pager {
    pub fn new(page_size: u64, retry: RetryPolicy) -> Self {
        Self {
            page_size: page_size.max(1),
            max_pages: DEFAULT_MAX_PAGES,
            retry,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Fetch pages until the provider signals the end and return every item.
    ///
    /// Stops on a missing next token, an empty page, or an offset page shorter
    /// than the requested size. A link or cursor token is followed even after
    /// a short page, since servers may cap `limit`. Failures retry the
    /// current page only.
    pub async fn collect<T, F, Fut>(&self, label: &str, mut fetch: F) -> Result<Vec<T>>
    where
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = Result<Page<T>>>,
    {
        let mut items = Vec::new();
        let mut request = PageRequest {
            offset: 0,
            limit: self.page_size,
            cursor: None,
        };
        let mut pages = 0u64;

        loop {
            if pages >= self.max_pages {
                return Err(SyncError::Provider(format!(
                    "{label}: pagination exceeded {} pages",
                    self.max_pages
                )));
            }

            let page = self
                .retry
                .run(label, || fetch(request.clone()))
                .await?;
            pages += 1;

            let count = page.items.len() as u64;
            items.extend(page.items);
            debug!(
                label,
                page = pages,
                count,
                fetched = items.len(),
                total_hint = ?page.total_hint,
                "Fetched page"
            );

            if count == 0 {
                break;
            }
            let Some(next) = page.next else {
                break;
            };
            if matches!(next, PageToken::Offset(_)) && count < request.limit {
                break;
            }

            request = PageRequest {
                offset: match next {
                    PageToken::Offset(offset) => offset,
                    _ => request.offset + count,
                },
                limit: self.page_size,
                cursor: Some(next),
            };
        }

        info!(label, pages, count = items.len(), "Pagination complete");
        Ok(items)
    }
}
