//! Linode API v4 payloads and their mapping onto provider types.

use std::collections::BTreeSet;
use std::net::IpAddr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::provider::{
    EventAction, EventId, EventStatus, LifecycleEvent, Node, NodeId, Volume, VolumeId,
};

pub(super) const GIB: u64 = 1024 * 1024 * 1024;

/// One page of a paginated listing.
#[derive(Debug, Deserialize)]
pub(super) struct Page<T> {
    pub data: Vec<T>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default = "first_page")]
    pub pages: u32,
}

const fn first_page() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub(super) struct VolumeRecord {
    pub id: u64,
    pub label: String,
    pub region: String,
    /// Size in GiB.
    pub size: u64,
    pub linode_id: Option<u64>,
    #[serde(default)]
    pub filesystem_path: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created: Option<String>,
}

impl From<VolumeRecord> for Volume {
    fn from(record: VolumeRecord) -> Self {
        Self {
            id: VolumeId::new(record.id.to_string()),
            label: record.label,
            region: record.region,
            size_bytes: record.size.saturating_mul(GIB),
            owner: record.linode_id.map(|id| NodeId::new(id.to_string())),
            device_path: record
                .filesystem_path
                .filter(|path| !path.is_empty())
                .map(Utf8PathBuf::from),
            tags: record.tags.into_iter().collect(),
            created: record.created,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct InstanceRecord {
    pub id: u64,
    pub label: String,
    pub region: String,
}

impl From<InstanceRecord> for Node {
    fn from(record: InstanceRecord) -> Self {
        Self {
            id: NodeId::new(record.id.to_string()),
            label: record.label,
            region: record.region,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct AddressRecord {
    pub address: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct Ipv4Addresses {
    #[serde(default)]
    pub public: Vec<AddressRecord>,
    #[serde(default)]
    pub private: Vec<AddressRecord>,
    #[serde(default)]
    pub shared: Vec<AddressRecord>,
    #[serde(default)]
    pub reserved: Vec<AddressRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct Ipv6Addresses {
    #[serde(default)]
    pub slaac: Option<AddressRecord>,
    #[serde(default)]
    pub link_local: Option<AddressRecord>,
}

/// Body of `GET /linode/instances/{id}/ips`.
#[derive(Debug, Default, Deserialize)]
pub(super) struct InstanceAddresses {
    #[serde(default)]
    pub ipv4: Ipv4Addresses,
    #[serde(default)]
    pub ipv6: Option<Ipv6Addresses>,
}

impl InstanceAddresses {
    /// Flattens every parseable address.
    pub fn into_addresses(self) -> Vec<IpAddr> {
        let v4 = self
            .ipv4
            .public
            .into_iter()
            .chain(self.ipv4.private)
            .chain(self.ipv4.shared)
            .chain(self.ipv4.reserved);
        let v6 = self
            .ipv6
            .into_iter()
            .flat_map(|ipv6| ipv6.slaac.into_iter().chain(ipv6.link_local));
        v4.chain(v6)
            .filter_map(|record| {
                // SLAAC and link-local entries may carry a prefix length.
                let bare = record.address.split('/').next().unwrap_or_default();
                bare.parse().ok()
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct EntityRecord {
    pub id: serde_json::Value,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct EventRecord {
    pub id: u64,
    pub action: String,
    pub status: String,
    pub entity: Option<EntityRecord>,
    #[serde(default)]
    pub created: String,
}

impl From<EventRecord> for LifecycleEvent {
    fn from(record: EventRecord) -> Self {
        let (entity_type, entity_id) = record.entity.map_or_else(
            || (String::new(), String::new()),
            |entity| {
                let id = match entity.id {
                    serde_json::Value::String(text) => text,
                    other => other.to_string(),
                };
                (entity.kind, id)
            },
        );
        Self {
            id: EventId::new(record.id.to_string()),
            action: parse_action(&record.action),
            status: parse_status(&record.status),
            entity_type,
            entity_id,
            created: record.created,
        }
    }
}

fn parse_action(action: &str) -> EventAction {
    match action {
        "volume_attach" => EventAction::Attach,
        "volume_detach" => EventAction::Detach,
        other => EventAction::Other(other.to_owned()),
    }
}

fn parse_status(status: &str) -> EventStatus {
    match status {
        "scheduled" => EventStatus::Scheduled,
        "started" => EventStatus::Started,
        "finished" => EventStatus::Finished,
        "failed" => EventStatus::Failed,
        _ => EventStatus::Other,
    }
}

/// Body of `POST /volumes`.
#[derive(Debug, Serialize)]
pub(super) struct CreateVolumeRequest<'a> {
    pub label: &'a str,
    pub region: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "no_tags")]
    pub tags: &'a BTreeSet<String>,
}

fn no_tags(tags: &&BTreeSet<String>) -> bool {
    tags.is_empty()
}

/// Body of `POST /volumes/{id}/attach`.
#[derive(Debug, Serialize)]
pub(super) struct AttachRequest {
    pub linode_id: u64,
    pub persist_across_boots: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorDetail {
    pub reason: String,
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorBody {
    pub errors: Vec<ErrorDetail>,
}

/// Extracts `errors[].reason` from an error body, keeping the raw text when
/// it is not in the documented shape.
pub(super) fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed
            .errors
            .into_iter()
            .map(|detail| match detail.field {
                Some(field) => format!("{field}: {}", detail.reason),
                None => detail.reason,
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.trim().to_owned(),
    }
}

/// Converts a byte count to whole GiB, rounding up.
pub(super) const fn bytes_to_gib(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn volume_record_maps_owner_device_and_size() {
        let body = r#"{
            "id": 12345,
            "label": "db-data",
            "region": "us-east",
            "size": 20,
            "linode_id": 678,
            "filesystem_path": "/dev/disk/by-id/scsi-0Linode_Volume_db-data",
            "tags": ["filesystem-xfs"],
            "created": "2026-03-01T10:00:00",
            "status": "active"
        }"#;
        let record: VolumeRecord = serde_json::from_str(body).expect("parse");
        let volume = Volume::from(record);

        assert_eq!(volume.id.as_str(), "12345");
        assert_eq!(volume.size_bytes, 20 * GIB);
        assert_eq!(volume.owner.as_ref().map(NodeId::as_str), Some("678"));
        assert_eq!(
            volume.device_path.as_deref().map(camino::Utf8Path::as_str),
            Some("/dev/disk/by-id/scsi-0Linode_Volume_db-data")
        );
        assert!(volume.has_tag("filesystem-xfs"));
    }

    #[test]
    fn detached_volume_has_no_owner() {
        let body = r#"{"id": 1, "label": "cache", "region": "us-east", "size": 10, "linode_id": null}"#;
        let record: VolumeRecord = serde_json::from_str(body).expect("parse");
        let volume = Volume::from(record);

        assert_eq!(volume.owner, None);
        assert!(volume.tags.is_empty());
    }

    #[rstest]
    #[case("volume_attach", "started", EventAction::Attach, EventStatus::Started)]
    #[case("volume_detach", "scheduled", EventAction::Detach, EventStatus::Scheduled)]
    #[case("volume_create", "finished", EventAction::Other(String::from("volume_create")), EventStatus::Finished)]
    #[case("volume_detach", "notification", EventAction::Detach, EventStatus::Other)]
    fn event_record_maps_action_and_status(
        #[case] action: &str,
        #[case] status: &str,
        #[case] expected_action: EventAction,
        #[case] expected_status: EventStatus,
    ) {
        let body = format!(
            r#"{{"id": 9, "action": "{action}", "status": "{status}",
                "entity": {{"id": 12345, "type": "volume", "label": "db-data"}},
                "created": "2026-03-01T10:00:00"}}"#
        );
        let record: EventRecord = serde_json::from_str(&body).expect("parse");
        let event = LifecycleEvent::from(record);

        assert_eq!(event.action, expected_action);
        assert_eq!(event.status, expected_status);
        assert_eq!(event.entity_type, "volume");
        assert_eq!(event.entity_id, "12345");
    }

    #[test]
    fn instance_addresses_include_link_local() {
        let body = r#"{
            "ipv4": {"public": [{"address": "192.0.2.10"}], "private": [], "shared": [], "reserved": []},
            "ipv6": {
                "slaac": {"address": "2600:3c03::f03c:91ff:fe24:3a2f", "prefix": 64},
                "link_local": {"address": "fe80::f03c:91ff:fe24:3a2f", "prefix": 64},
                "global": []
            }
        }"#;
        let parsed: InstanceAddresses = serde_json::from_str(body).expect("parse");
        let addresses = parsed.into_addresses();

        let expected: Vec<IpAddr> = ["192.0.2.10", "2600:3c03::f03c:91ff:fe24:3a2f", "fe80::f03c:91ff:fe24:3a2f"]
            .iter()
            .map(|text| text.parse().unwrap_or_else(|err| panic!("bad address {text}: {err}")))
            .collect();
        assert_eq!(addresses, expected);
    }

    #[rstest]
    #[case(r#"{"errors": [{"reason": "Volume is busy"}]}"#, "Volume is busy")]
    #[case(r#"{"errors": [{"field": "size", "reason": "Must be at least 10"}]}"#, "size: Must be at least 10")]
    #[case("upstream timeout", "upstream timeout")]
    fn error_message_prefers_reasons(#[case] body: &str, #[case] expected: &str) {
        assert_eq!(error_message(body), expected);
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(10 * GIB, 10)]
    #[case(10 * GIB + 1, 11)]
    fn bytes_round_up_to_gib(#[case] bytes: u64, #[case] expected: u64) {
        assert_eq!(bytes_to_gib(bytes), expected);
    }

    #[test]
    fn create_request_omits_empty_fields() {
        let tags = BTreeSet::new();
        let request = CreateVolumeRequest {
            label: "db-data",
            region: "us-east",
            size: None,
            tags: &tags,
        };
        let json = serde_json::to_value(&request).expect("serialise");
        assert_eq!(json, serde_json::json!({"label": "db-data", "region": "us-east"}));
    }
}
