//! Remote pagination: page envelopes and a lazy, restartable page cursor.

use std::sync::Arc;

use futures::Stream;
use serde::Serialize;
use serde_json::Value;

use super::RecordSource;
use crate::core::models::Resource;
use crate::core::range::SyncRange;
use crate::error::{HubError, Result};

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Hard cap on pages walked by one cursor.
pub const MAX_PAGES: u32 = 10_000;

/// Parameters for one remote page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
    /// Date window, for range-scoped resources.
    pub range: Option<SyncRange>,
}

impl PageRequest {
    #[must_use]
    pub const fn first(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size,
            range: None,
        }
    }

    #[must_use]
    pub const fn with_range(mut self, range: SyncRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// One page of raw remote records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub number: u32,
    pub page_size: u32,
    pub items: Vec<Value>,
    pub total_count: Option<u64>,
    pub has_more: bool,
}

impl Page {
    /// Parse a listing body.
    ///
    /// Items come from `data`, `items` or `sales` (or the body itself when it
    /// is an array). `has_more` is derived from `total_pages`, then from the
    /// total count, then from whether the page came back full.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ParseResponse`] when the body is not a JSON object
    /// or array, or when the item list is not an array.
    pub fn from_body(number: u32, page_size: u32, body: &Value) -> Result<Self> {
        let items = match body {
            Value::Array(items) => items.clone(),
            Value::Object(obj) => match ["data", "items", "sales", "balances", "withdrawals"]
                .iter()
                .find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
            {
                Some(Value::Array(items)) => items.clone(),
                Some(other) => {
                    return Err(HubError::ParseResponse(format!(
                        "page {number}: expected an item array, got {other}"
                    )));
                }
                None => Vec::new(),
            },
            Value::Null => Vec::new(),
            other => {
                return Err(HubError::ParseResponse(format!(
                    "page {number}: unexpected listing body {other}"
                )));
            }
        };

        let pagination = body.get("pagination").or_else(|| body.get("meta"));
        let lookup = |keys: &[&str]| -> Option<u64> {
            keys.iter().find_map(|key| {
                pagination
                    .and_then(|p| p.get(*key))
                    .or_else(|| body.get(*key))
                    .and_then(as_count)
            })
        };

        let total_pages = lookup(&["total_pages", "totalPages", "last_page"]);
        let total_count = lookup(&["total", "count", "total_count", "totalCount"]);
        let has_more = if items.is_empty() {
            false
        } else if let Some(total_pages) = total_pages {
            u64::from(number) < total_pages
        } else if let Some(total) = total_count {
            u64::from(number) * u64::from(page_size) < total
        } else {
            items.len() >= page_size as usize
        };

        Ok(Self {
            number,
            page_size,
            items,
            total_count,
            has_more,
        })
    }

    /// A single, final page holding every item.
    #[must_use]
    pub fn single(items: Vec<Value>) -> Self {
        let page_size = u32::try_from(items.len()).unwrap_or(u32::MAX);
        Self {
            number: 1,
            page_size,
            total_count: Some(items.len() as u64),
            items,
            has_more: false,
        }
    }
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Walks the pages of one listing in ascending order.
///
/// The cursor is lazy (a page is fetched only when asked for), finite (it ends
/// on an empty page, on `has_more == false`, or at [`MAX_PAGES`]) and
/// restartable from any page via [`PageCursor::starting_at`].
pub struct PageCursor {
    source: Arc<dyn RecordSource>,
    resource: Resource,
    page_size: u32,
    range: Option<SyncRange>,
    next: Option<u32>,
    walked: u32,
}

impl PageCursor {
    #[must_use]
    pub fn new(
        source: Arc<dyn RecordSource>,
        resource: Resource,
        page_size: u32,
        range: Option<SyncRange>,
    ) -> Self {
        Self {
            source,
            resource,
            page_size: page_size.max(1),
            range,
            next: Some(1),
            walked: 0,
        }
    }

    /// Resume at `page` instead of page 1.
    #[must_use]
    pub fn starting_at(mut self, page: u32) -> Self {
        self.next = Some(page.max(1));
        self
    }

    /// The next page number this cursor would fetch, `None` once exhausted.
    #[must_use]
    pub const fn position(&self) -> Option<u32> {
        self.next
    }

    /// Fetch the next page, or `None` when the listing is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates fetch errors from the source. The cursor stays at the
    /// failed page, so calling again retries it.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        let Some(number) = self.next else {
            return Ok(None);
        };
        if self.walked >= MAX_PAGES {
            return Err(HubError::ParseResponse(format!(
                "{} listing did not terminate after {MAX_PAGES} pages",
                self.resource
            )));
        }

        let request = PageRequest {
            page: number,
            page_size: self.page_size,
            range: self.range,
        };
        let page = self.source.fetch_page(self.resource, &request).await?;
        self.walked += 1;
        self.next = (page.has_more && !page.items.is_empty()).then(|| number + 1);
        tracing::debug!(
            resource = %self.resource,
            page = number,
            items = page.items.len(),
            has_more = page.has_more,
            "Fetched page"
        );
        Ok(Some(page))
    }

    /// Adapt the cursor into a fallible stream of pages.
    pub fn into_stream(self) -> impl Stream<Item = Result<Page>> {
        futures::stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next_page().await?.map(|page| (page, cursor)))
        })
    }
}
