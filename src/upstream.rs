//! Thin client for the YouTube Data API.
//!
//! Responses are handed back as raw JSON; shaping them is the normalizer's
//! job. The HTTP work is blocking (ureq) and runs on tokio's blocking pool.

use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::task;
use tracing::debug;

use crate::config::Settings;

/// Upstream collection a request is made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Search,
    Videos,
    Channels,
}

impl Resource {
    pub fn path(self) -> &'static str {
        match self {
            Resource::Search => "search",
            Resource::Videos => "videos",
            Resource::Channels => "channels",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("YouTube {resource} failed: {status}")]
    Status { resource: Resource, status: u16 },
    #[error("YouTube {resource} request failed: {message}")]
    Transport { resource: Resource, message: String },
    #[error("YouTube {resource} returned an unreadable body: {message}")]
    Decode { resource: Resource, message: String },
    #[error("upstream task join error: {0}")]
    Join(String),
}

impl UpstreamError {
    /// HTTP status returned by upstream, when the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    Number(i64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(text) => f.write_str(text),
            ParamValue::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::Text(value.clone())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Number(i64::from(value))
    }
}

/// Named query parameters for one upstream call. Absent values never make it
/// into the map, so they never reach the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(BTreeMap<&'static str, ParamValue>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &'static str, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name, value.into());
        self
    }

    pub fn set_opt<V: Into<ParamValue>>(self, name: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.set(name, value),
            None => self,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ParamValue)> + '_ {
        self.0.iter().map(|(name, value)| (*name, value))
    }
}

/// Read-only operations against the video platform.
#[async_trait]
pub trait VideoApi: Send + Sync {
    async fn fetch(&self, resource: Resource, params: QueryParams) -> Result<Value, UpstreamError>;

    async fn search(&self, params: QueryParams) -> Result<Value, UpstreamError> {
        self.fetch(Resource::Search, params).await
    }

    async fn videos(&self, params: QueryParams) -> Result<Value, UpstreamError> {
        self.fetch(Resource::Videos, params).await
    }

    async fn channels(&self, params: QueryParams) -> Result<Value, UpstreamError> {
        self.fetch(Resource::Channels, params).await
    }
}

#[derive(Clone)]
pub struct YouTubeClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl fmt::Debug for YouTubeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YouTubeClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl YouTubeClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(concat!("newtube-proxy/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build();
        Self {
            agent,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.api_base.clone(),
            settings.api_key.clone(),
            settings.upstream_timeout,
        )
    }

    pub fn endpoint(&self, resource: Resource) -> String {
        format!("{}/{}", self.base_url, resource.path())
    }

    fn fetch_blocking(
        &self,
        resource: Resource,
        params: &QueryParams,
    ) -> Result<Value, UpstreamError> {
        let mut request = self
            .agent
            .get(&self.endpoint(resource))
            .query("key", &self.api_key);
        for (name, value) in params.iter() {
            request = request.query(name, &value.to_string());
        }

        match request.call() {
            Ok(response) => response
                .into_json::<Value>()
                .map_err(|err| UpstreamError::Decode {
                    resource,
                    message: err.to_string(),
                }),
            Err(ureq::Error::Status(status, _)) => Err(UpstreamError::Status { resource, status }),
            Err(ureq::Error::Transport(err)) => Err(UpstreamError::Transport {
                resource,
                message: err.to_string(),
            }),
        }
    }
}

#[async_trait]
impl VideoApi for YouTubeClient {
    async fn fetch(&self, resource: Resource, params: QueryParams) -> Result<Value, UpstreamError> {
        debug!(%resource, ?params, "calling upstream");
        let client = self.clone();
        task::spawn_blocking(move || client.fetch_blocking(resource, &params))
            .await
            .map_err(|err| UpstreamError::Join(err.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_params_are_dropped() {
        let params = QueryParams::new()
            .set("part", "snippet")
            .set("maxResults", 20u32)
            .set_opt::<String>("pageToken", None)
            .set_opt("regionCode", Some("US"));
        assert!(!params.contains("pageToken"));
        assert_eq!(params.get("maxResults"), Some(&ParamValue::Number(20)));
        let names: Vec<_> = params.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["maxResults", "part", "regionCode"]);
    }

    #[test]
    fn param_values_render_as_query_text() {
        assert_eq!(ParamValue::from(10u32).to_string(), "10");
        assert_eq!(ParamValue::from("video,channel").to_string(), "video,channel");
    }

    #[test]
    fn status_error_carries_code() {
        let err = UpstreamError::Status {
            resource: Resource::Search,
            status: 403,
        };
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.to_string(), "YouTube search failed: 403");

        let err = UpstreamError::Transport {
            resource: Resource::Videos,
            message: "dns".into(),
        };
        assert_eq!(err.status(), None);
    }

    #[derive(Default)]
    struct SeenResources(parking_lot::Mutex<Vec<Resource>>);

    #[async_trait]
    impl VideoApi for SeenResources {
        async fn fetch(&self, resource: Resource, _: QueryParams) -> Result<Value, UpstreamError> {
            self.0.lock().push(resource);
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn provided_methods_dispatch_to_their_resource() {
        let api = SeenResources::default();
        api.search(QueryParams::new()).await.unwrap();
        api.videos(QueryParams::new()).await.unwrap();
        api.channels(QueryParams::new().set("id", "UC1")).await.unwrap();
        assert_eq!(
            *api.0.lock(),
            vec![Resource::Search, Resource::Videos, Resource::Channels]
        );
    }

    #[test]
    fn endpoint_joins_resource_path() {
        let client =
            YouTubeClient::new("http://localhost:1/v3", "secret-key", Duration::from_secs(1));
        assert_eq!(client.endpoint(Resource::Channels), "http://localhost:1/v3/channels");
        assert!(!format!("{client:?}").contains("secret-key"));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client = YouTubeClient::new("http://127.0.0.1:9", "k", Duration::from_secs(2));
        let err = client
            .search(QueryParams::new().set("q", "cats"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Transport {
                resource: Resource::Search,
                ..
            }
        ));
    }
}
