//! Per-endpoint orchestration: resolve the cursor for the requested page,
//! call upstream, normalize, remember the cursor for the next page.

use std::{collections::HashMap, sync::Arc};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    config::DEFAULT_PAGE_SIZE,
    cursor_cache::{CursorCache, QueryShape},
    normalize::{self, Item},
    upstream::{QueryParams, UpstreamError, VideoApi},
};

pub const SUGGESTION_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub next_page: Option<u32>,
}

impl<T> Paged<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_page: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Suggestions {
    pub suggestions: Vec<String>,
}

fn items_of(body: &Value) -> &[Value] {
    body.get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn next_cursor(body: &Value) -> Option<&str> {
    body.get("nextPageToken")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
}

fn non_blank(q: Option<&str>) -> Option<&str> {
    q.map(str::trim).filter(|q| !q.is_empty())
}

#[derive(Clone)]
pub struct Aggregator {
    api: Arc<dyn VideoApi>,
    cursors: Arc<CursorCache>,
    page_size: u32,
}

impl Aggregator {
    pub fn new(api: Arc<dyn VideoApi>, cursors: Arc<CursorCache>) -> Self {
        Self {
            api,
            cursors,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn cursors(&self) -> &CursorCache {
        &self.cursors
    }

    fn resolve_cursor(&self, shape: &QueryShape, page: u32) -> Option<String> {
        let cursor = self.cursors.lookup(shape, page);
        if cursor.is_none() && page > 1 {
            // Unknown page: upstream is asked without a cursor and serves
            // the start of the result set.
            warn!(%shape, page, "no cursor cached for page, falling back to first page");
        }
        cursor
    }

    /// Records the continuation cursor and turns it into the next page number.
    fn finish(
        &self,
        shape: &QueryShape,
        page: u32,
        body: &Value,
        items: Vec<Item>,
    ) -> Paged<Item> {
        let cursor = next_cursor(body);
        self.cursors.store(shape, page, cursor);
        let next_page = cursor.and_then(|_| page.checked_add(1));
        debug!(%shape, page, items = items.len(), ?next_page, "page served");
        Paged { items, next_page }
    }

    /// Mixed video and channel search. Video results get their statistics
    /// from one batched videos call.
    pub async fn search(&self, q: Option<&str>, page: u32) -> Result<Paged<Item>, UpstreamError> {
        let Some(q) = non_blank(q) else {
            return Ok(Paged::empty());
        };
        let page = page.max(1);
        let shape = QueryShape::search(q);
        let cursor = self.resolve_cursor(&shape, page);

        let body = self
            .api
            .search(
                QueryParams::new()
                    .set("part", "snippet")
                    .set("type", "video,channel")
                    .set("maxResults", self.page_size)
                    .set("q", q)
                    .set_opt("pageToken", cursor),
            )
            .await?;
        let records = items_of(&body);

        let video_ids: Vec<String> = records
            .iter()
            .filter(|record| normalize::is_video_result(record))
            .filter_map(normalize::video_id)
            .collect();

        let stats_body = if video_ids.is_empty() {
            Value::Null
        } else {
            self.api
                .videos(
                    QueryParams::new()
                        .set("part", "statistics,snippet")
                        .set("id", video_ids.join(",")),
                )
                .await?
        };
        let stats_by_id: HashMap<String, &Value> = items_of(&stats_body)
            .iter()
            .filter_map(|record| normalize::video_id(record).map(|id| (id, record)))
            .collect();

        let now = Utc::now();
        let items = records
            .iter()
            .map(|record| {
                if normalize::is_channel_result(record) {
                    return Item::Channel(normalize::to_channel_item(record));
                }
                let stats =
                    normalize::video_id(record).and_then(|id| stats_by_id.get(&id).copied());
                Item::Video(normalize::to_video_item(record, stats, now))
            })
            .collect();

        Ok(self.finish(&shape, page, &body, items))
    }

    /// Most-popular chart for a region. Records already carry statistics.
    pub async fn trending(&self, region: &str, page: u32) -> Result<Paged<Item>, UpstreamError> {
        let page = page.max(1);
        let shape = QueryShape::trending(region);
        let cursor = self.resolve_cursor(&shape, page);

        let body = self
            .api
            .videos(
                QueryParams::new()
                    .set("part", "snippet,statistics,contentDetails")
                    .set("chart", "mostPopular")
                    .set("regionCode", region)
                    .set("maxResults", self.page_size)
                    .set_opt("pageToken", cursor),
            )
            .await?;

        let now = Utc::now();
        let items = items_of(&body)
            .iter()
            .map(|record| {
                let stats = record.get("statistics").map(|_| record);
                Item::Video(normalize::to_video_item(record, stats, now))
            })
            .collect();

        Ok(self.finish(&shape, page, &body, items))
    }

    pub async fn channels(&self, q: Option<&str>, page: u32) -> Result<Paged<Item>, UpstreamError> {
        let Some(q) = non_blank(q) else {
            return Ok(Paged::empty());
        };
        let page = page.max(1);
        let shape = QueryShape::channels(q);
        let cursor = self.resolve_cursor(&shape, page);

        let body = self
            .api
            .search(
                QueryParams::new()
                    .set("part", "snippet")
                    .set("type", "channel")
                    .set("maxResults", self.page_size)
                    .set("q", q)
                    .set_opt("pageToken", cursor),
            )
            .await?;

        let items = items_of(&body)
            .iter()
            .map(|record| Item::Channel(normalize::to_channel_item(record)))
            .collect();

        Ok(self.finish(&shape, page, &body, items))
    }

    /// Titles of the top video results, deduplicated in order. Best effort:
    /// an upstream failure yields no suggestions.
    pub async fn suggest(&self, q: Option<&str>) -> Suggestions {
        let Some(q) = non_blank(q) else {
            return Suggestions::default();
        };

        let body = match self
            .api
            .search(
                QueryParams::new()
                    .set("part", "snippet")
                    .set("type", "video")
                    .set("maxResults", SUGGESTION_LIMIT as u32)
                    .set("q", q),
            )
            .await
        {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, q, "suggest lookup failed");
                return Suggestions::default();
            }
        };

        let mut suggestions: Vec<String> = Vec::new();
        for title in items_of(&body)
            .iter()
            .filter_map(|record| record.pointer("/snippet/title").and_then(Value::as_str))
        {
            if !suggestions.iter().any(|seen| seen == title) {
                suggestions.push(title.to_string());
            }
            if suggestions.len() >= SUGGESTION_LIMIT {
                break;
            }
        }
        Suggestions { suggestions }
    }
}
