//! HTTP implementation of [`Provider`] for the Linode API v4.

mod filter;
mod wire;

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::provider::{
    EntityKind, EventId, LifecycleEvent, Node, NodeId, Provider, ProviderError, ProviderFuture,
    Volume, VolumeFilter, VolumeId, VolumeSpec,
};
use wire::{
    AttachRequest, CreateVolumeRequest, EventRecord, InstanceAddresses, InstanceRecord, Page,
    VolumeRecord,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 100;
/// Only recent events matter to the busy heuristics.
const EVENT_PAGE_SIZE: u32 = 25;
const USER_AGENT: &str = concat!("linvol/", env!("CARGO_PKG_VERSION"));

/// Linode API client authenticated with a personal access token.
#[derive(Clone)]
pub struct LinodeProvider {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl fmt::Debug for LinodeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinodeProvider")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl LinodeProvider {
    /// Creates a client for `base_url` (for example
    /// `https://api.linode.com/v4`).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, token: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ProviderError::new("build_client", err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
    }

    /// Sends `request` and returns the body of a successful response.
    async fn execute(&self, operation: &str, request: RequestBuilder) -> Result<String, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|err| ProviderError::new(operation, err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::new(operation, err.to_string()))?;
        debug!(operation, status = status.as_u16(), "provider responded");

        if status.is_success() {
            return Ok(body);
        }
        Err(ProviderError::with_status(
            operation,
            status.as_u16(),
            wire::error_message(&body),
        ))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let body = self.execute(operation, request).await?;
        serde_json::from_str(&body).map_err(|err| {
            ProviderError::new(operation, format!("unexpected response body: {err}"))
        })
    }

    async fn list_all<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        filter: Option<&str>,
    ) -> Result<Vec<T>, ProviderError> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            let mut request = self
                .request(Method::GET, path)
                .query(&[("page", page), ("page_size", PAGE_SIZE)]);
            if let Some(filter) = filter {
                request = request.header("X-Filter", filter);
            }
            let listing: Page<T> = self.fetch(operation, request).await?;
            items.extend(listing.data);
            if listing.page >= listing.pages {
                return Ok(items);
            }
            page = listing.page + 1;
        }
    }
}

fn numeric_id(operation: &str, kind: &str, id: &str) -> Result<u64, ProviderError> {
    id.parse()
        .map_err(|_| ProviderError::new(operation, format!("{kind} id {id:?} is not numeric")))
}

impl Provider for LinodeProvider {
    fn find_volumes<'a>(&'a self, filter: &'a VolumeFilter) -> ProviderFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            let header = filter::volumes(filter);
            let records: Vec<VolumeRecord> = self
                .list_all("find_volumes", "/volumes", header.as_deref())
                .await?;
            Ok(records.into_iter().map(Volume::from).collect())
        })
    }

    fn create_volume<'a>(&'a self, spec: &'a VolumeSpec) -> ProviderFuture<'a, Volume> {
        Box::pin(async move {
            let body = CreateVolumeRequest {
                label: &spec.label,
                region: &spec.region,
                size: spec.size_bytes.map(wire::bytes_to_gib),
                tags: &spec.tags,
            };
            let request = self.request(Method::POST, "/volumes").json(&body);
            let record: VolumeRecord = self.fetch("create_volume", request).await?;
            Ok(Volume::from(record))
        })
    }

    fn delete_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let request = self.request(Method::DELETE, &format!("/volumes/{id}"));
            self.execute("delete_volume", request).await.map(|_| ())
        })
    }

    fn attach_volume<'a>(&'a self, id: &'a VolumeId, node: &'a NodeId) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let body = AttachRequest {
                linode_id: numeric_id("attach_volume", "node", node)?,
                persist_across_boots: false,
            };
            let request = self
                .request(Method::POST, &format!("/volumes/{id}/attach"))
                .json(&body);
            self.execute("attach_volume", request).await.map(|_| ())
        })
    }

    fn detach_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .request(Method::POST, &format!("/volumes/{id}/detach"))
                .json(&serde_json::json!({}));
            self.execute("detach_volume", request).await.map(|_| ())
        })
    }

    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> ProviderFuture<'a, Volume> {
        Box::pin(async move {
            let request = self.request(Method::GET, &format!("/volumes/{id}"));
            let record: VolumeRecord = self.fetch("get_volume", request).await?;
            Ok(Volume::from(record))
        })
    }

    fn list_instances<'a>(&'a self, label: Option<&'a str>) -> ProviderFuture<'a, Vec<Node>> {
        Box::pin(async move {
            let header = filter::instances(label);
            let records: Vec<InstanceRecord> = self
                .list_all("list_instances", "/linode/instances", header.as_deref())
                .await?;
            Ok(records.into_iter().map(Node::from).collect())
        })
    }

    fn instance_addresses<'a>(&'a self, node: &'a NodeId) -> ProviderFuture<'a, Vec<IpAddr>> {
        Box::pin(async move {
            let request = self.request(Method::GET, &format!("/linode/instances/{node}/ips"));
            let addresses: InstanceAddresses = self.fetch("instance_addresses", request).await?;
            Ok(addresses.into_addresses())
        })
    }

    fn list_events<'a>(
        &'a self,
        kind: EntityKind,
        entity_id: &'a str,
    ) -> ProviderFuture<'a, Vec<LifecycleEvent>> {
        Box::pin(async move {
            let request = self
                .request(Method::GET, "/account/events")
                .query(&[("page", 1), ("page_size", EVENT_PAGE_SIZE)])
                .header("X-Filter", filter::events(kind, entity_id));
            let listing: Page<EventRecord> = self.fetch("list_events", request).await?;
            Ok(listing.data.into_iter().map(LifecycleEvent::from).collect())
        })
    }

    fn get_event<'a>(&'a self, id: &'a EventId) -> ProviderFuture<'a, LifecycleEvent> {
        Box::pin(async move {
            let request = self.request(Method::GET, &format!("/account/events/{id}"));
            let record: EventRecord = self.fetch("get_event", request).await?;
            Ok(LifecycleEvent::from(record))
        })
    }
}

#[cfg(test)]
mod tests {
    use mockito::{Matcher, Server};

    use super::*;
    use crate::provider::EventAction;

    const TOKEN: &str = "test-token";

    fn provider(server: &Server) -> LinodeProvider {
        LinodeProvider::new(&server.url(), TOKEN).expect("client builds")
    }

    #[tokio::test]
    async fn find_volumes_follows_pagination_and_sends_filter() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/volumes")
            .match_query(Matcher::UrlEncoded(String::from("page"), String::from("1")))
            .match_header("authorization", "Bearer test-token")
            .match_header("x-filter", Matcher::Regex(String::from(r#""label":"db-data""#)))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [{"id": 1, "label": "db-data", "region": "us-east", "size": 20, "linode_id": null}],
                    "page": 1, "pages": 2, "results": 2}"#,
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/volumes")
            .match_query(Matcher::UrlEncoded(String::from("page"), String::from("2")))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [{"id": 2, "label": "db-data", "region": "us-east", "size": 20, "linode_id": 77}],
                    "page": 2, "pages": 2, "results": 2}"#,
            )
            .create_async()
            .await;

        let volumes = provider(&server)
            .find_volumes(&VolumeFilter::labelled("db-data", Some("us-east")))
            .await
            .expect("listing succeeds");

        first.assert_async().await;
        second.assert_async().await;
        let ids: Vec<&str> = volumes.iter().map(|volume| volume.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(
            volumes.get(1).and_then(|volume| volume.owner.as_ref()).map(NodeId::as_str),
            Some("77")
        );
    }

    #[tokio::test]
    async fn attach_posts_numeric_linode_id() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/volumes/12345/attach")
            .match_body(Matcher::Json(serde_json::json!({
                "linode_id": 678,
                "persist_across_boots": false
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        provider(&server)
            .attach_volume(&VolumeId::from("12345"), &NodeId::from("678"))
            .await
            .expect("attach accepted");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_reasons_are_preserved_with_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/volumes/12345/detach")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"errors": [{"reason": "Volume is not attached"}]}"#)
            .create_async()
            .await;

        let err = provider(&server)
            .detach_volume(&VolumeId::from("12345"))
            .await
            .expect_err("detach rejected");

        assert_eq!(err.operation, "detach_volume");
        assert_eq!(err.status, Some(400));
        assert_eq!(err.message, "Volume is not attached");
    }

    #[tokio::test]
    async fn list_events_maps_newest_first_page() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/account/events")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": [
                    {"id": 31, "action": "volume_detach", "status": "started",
                     "entity": {"id": 12345, "type": "volume", "label": "db-data"}, "created": "2026-03-01T10:05:00"},
                    {"id": 30, "action": "volume_attach", "status": "finished",
                     "entity": {"id": 12345, "type": "volume", "label": "db-data"}, "created": "2026-03-01T10:00:00"}
                ], "page": 1, "pages": 1, "results": 2}"#,
            )
            .create_async()
            .await;

        let events = provider(&server)
            .list_events(EntityKind::Volume, "12345")
            .await
            .expect("events listed");

        let actions: Vec<&EventAction> = events.iter().map(|event| &event.action).collect();
        assert_eq!(actions, vec![&EventAction::Detach, &EventAction::Attach]);
    }

    #[tokio::test]
    async fn non_numeric_node_id_is_rejected_locally() {
        let server = Server::new_async().await;

        let err = provider(&server)
            .attach_volume(&VolumeId::from("12345"), &NodeId::from("node-a"))
            .await
            .expect_err("rejected before sending");

        assert_eq!(err.status, None);
        assert!(err.message.contains("not numeric"));
    }

    #[test]
    fn debug_output_redacts_token() {
        let provider =
            LinodeProvider::new("https://api.linode.com/v4/", TOKEN).expect("client builds");
        let rendered = format!("{provider:?}");
        assert!(!rendered.contains(TOKEN));
        assert!(rendered.contains("https://api.linode.com/v4\""));
    }
}
