//! Mapping of raw upstream records into the uniform item model.
//!
//! Upstream JSON is loosely structured and any field may be missing, so every
//! access goes through `Value::pointer` and each output field documents its
//! fallback.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

const VIDEO_KIND: &str = "youtube#video";
const CHANNEL_KIND: &str = "youtube#channel";

/// Thumbnail variants tried for a channel avatar, best first.
const AVATAR_VARIANTS: &[&str] = &["high", "medium", "default"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Item {
    Video(VideoItem),
    Channel(ChannelItem),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "avatar", skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

fn text_at(raw: &Value, pointer: &str) -> Option<String> {
    raw.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Record id, either a plain string (videos/channels resources) or the
/// `id.<field>` of a search result.
fn record_id(raw: &Value, search_field: &str) -> Option<String> {
    match raw.get("id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(id @ Value::Object(_)) => id
            .get(search_field)
            .and_then(Value::as_str)
            .map(str::to_owned),
        _ => None,
    }
}

pub fn search_kind(raw: &Value) -> Option<&str> {
    raw.pointer("/id/kind").and_then(Value::as_str)
}

pub fn is_channel_result(raw: &Value) -> bool {
    search_kind(raw) == Some(CHANNEL_KIND)
}

pub fn is_video_result(raw: &Value) -> bool {
    search_kind(raw) == Some(VIDEO_KIND)
}

/// Video id of a search result or videos-resource record.
pub fn video_id(raw: &Value) -> Option<String> {
    record_id(raw, "videoId")
}

/// Upstream reports counts as decimal strings; plain numbers are accepted too.
fn view_count(stats: &Value) -> u64 {
    match stats.pointer("/statistics/viewCount") {
        Some(Value::String(count)) => count.trim().parse().unwrap_or(0),
        Some(Value::Number(count)) => count.as_u64().unwrap_or(0),
        _ => 0,
    }
}

/// Builds a video item.
///
/// `stats` is the videos-resource record holding this video's `statistics`,
/// or `None` when no statistics were looked up for it. A record without a
/// view count yields 0; `None` leaves the count unset.
pub fn to_video_item(raw: &Value, stats: Option<&Value>, now: DateTime<Utc>) -> VideoItem {
    let published_at = raw.pointer("/snippet/publishedAt").and_then(Value::as_str);
    VideoItem {
        id: video_id(raw).unwrap_or_default(),
        title: text_at(raw, "/snippet/title").unwrap_or_default(),
        channel_id: text_at(raw, "/snippet/channelId"),
        channel_name: text_at(raw, "/snippet/channelTitle"),
        view_count: stats.map(view_count),
        published_text: relative_age(published_at, now),
    }
}

pub fn to_channel_item(raw: &Value) -> ChannelItem {
    let avatar_url = AVATAR_VARIANTS
        .iter()
        .find_map(|variant| text_at(raw, &format!("/snippet/thumbnails/{variant}/url")));
    ChannelItem {
        id: record_id(raw, "channelId").unwrap_or_default(),
        title: text_at(raw, "/snippet/title"),
        avatar_url,
    }
}

/// Unit ladder: a value at or above `base` rolls over into the next unit.
const AGE_UNITS: &[(f64, &str)] = &[
    (60.0, "second"),
    (60.0, "minute"),
    (24.0, "hour"),
    (7.0, "day"),
    (4.345, "week"),
    (12.0, "month"),
    (f64::INFINITY, "year"),
];

/// Humanized age of an RFC 3339 timestamp, e.g. `"3 weeks ago"`.
///
/// Returns `None` for a missing or unparseable timestamp. Timestamps in the
/// future count as one second old.
pub fn relative_age(timestamp: Option<&str>, now: DateTime<Utc>) -> Option<String> {
    let then = DateTime::parse_from_rfc3339(timestamp?.trim()).ok()?;
    let elapsed = now
        .signed_duration_since(then.with_timezone(&Utc))
        .num_seconds()
        .max(1);
    Some(format_age(elapsed as u64))
}

fn format_age(seconds: u64) -> String {
    let mut value = seconds;
    let mut unit = "year";
    for &(base, name) in AGE_UNITS {
        if (value as f64) < base {
            unit = name;
            break;
        }
        value = (value as f64 / base).floor() as u64;
    }
    let plural = if value > 1 { "s" } else { "" };
    format!("{value} {unit}{plural} ago")
}
