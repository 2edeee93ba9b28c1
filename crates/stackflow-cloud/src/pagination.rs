//! Marker-based pagination for list-style provider queries
//!
//! Providers return one page at a time with an `is_truncated` flag and a
//! continuation marker. A provider that never clears the flag would loop
//! forever, so every walk is bounded by a page ceiling.

use crate::error::{CloudError, Result};
use std::future::Future;

pub const DEFAULT_MAX_PAGES: usize = 100;

/// One page of a list response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub is_truncated: bool,
    pub marker: Option<String>,
}

impl<T> Page<T> {
    /// The final page
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            is_truncated: false,
            marker: None,
        }
    }

    /// A page followed by more
    pub fn truncated(items: Vec<T>, marker: impl Into<String>) -> Self {
        Self {
            items,
            is_truncated: true,
            marker: Some(marker.into()),
        }
    }

    fn next_marker(&self) -> Result<Option<String>> {
        if !self.is_truncated {
            return Ok(None);
        }
        match &self.marker {
            Some(marker) => Ok(Some(marker.clone())),
            None => Err(CloudError::MissingMarker),
        }
    }
}

/// Fetch every page and merge the items
pub async fn collect_pages<T, F, Fut>(max_pages: usize, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut marker = None;

    for _ in 0..max_pages {
        let page = fetch(marker.take()).await?;
        let next = page.next_marker()?;
        items.extend(page.items);
        match next {
            Some(m) => marker = Some(m),
            None => return Ok(items),
        }
    }

    tracing::warn!("Listing still truncated after {} pages", max_pages);
    Err(CloudError::PageLimitExceeded { max_pages })
}

/// Fetch pages until an item matches, stopping early on a hit
pub async fn find_in_pages<T, F, Fut, P>(
    max_pages: usize,
    mut fetch: F,
    mut predicate: P,
) -> Result<Option<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
    P: FnMut(&T) -> bool,
{
    let mut marker = None;

    for _ in 0..max_pages {
        let page = fetch(marker.take()).await?;
        let next = page.next_marker()?;
        if let Some(found) = page.items.into_iter().find(|item| predicate(item)) {
            return Ok(Some(found));
        }
        match next {
            Some(m) => marker = Some(m),
            None => return Ok(None),
        }
    }

    tracing::warn!("Listing still truncated after {} pages", max_pages);
    Err(CloudError::PageLimitExceeded { max_pages })
}
