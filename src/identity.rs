//! Resolution of "this node" against the provider's instance list.
//!
//! Identity is resolved once at startup and then passed around as an
//! immutable [`NodeIdentity`]. The node is looked up by label first (the
//! configured label, else the hostname); when no instance carries that label
//! the local IPv6 link-local addresses are matched against each instance's
//! address list, which survives hostname changes.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv6Addr};

use tracing::{debug, info};

use crate::config::ConfigError;
use crate::error::VolumeError;
use crate::provider::{Node, NodeId, Provider};

/// Immutable identity of the node this process manages volumes for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeIdentity {
    /// Provider identifier of this node.
    pub node_id: NodeId,
    /// Label the provider knows this node by.
    pub label: String,
    /// Region used to scope volume lookups and creation.
    pub region: String,
}

impl NodeIdentity {
    /// Builds an identity from a node record, optionally overriding its
    /// region.
    #[must_use]
    pub fn from_node(node: Node, region_override: Option<&str>) -> Self {
        Self {
            node_id: node.id,
            label: node.label,
            region: region_override.map_or(node.region, str::to_owned),
        }
    }

    /// Resolves this node by `label`, falling back to `local_addresses`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Config`] when no single instance matches and
    /// [`VolumeError::Provider`] when the instance list cannot be read.
    pub async fn resolve<P: Provider + ?Sized>(
        provider: &P,
        label: &str,
        local_addresses: &[IpAddr],
        region_override: Option<&str>,
    ) -> Result<Self, VolumeError> {
        let mut labelled: Vec<Node> = provider
            .list_instances(Some(label))
            .await?
            .into_iter()
            .filter(|node| node.label == label)
            .collect();

        let node = match labelled.len() {
            1 => labelled.remove(0),
            0 => match_by_address(provider, label, local_addresses).await?,
            count => {
                return Err(ConfigError::Invalid(format!(
                    "{count} instances are labelled {label}; set LINVOL_NODE_LABEL or node_label in linvol.toml to a unique label"
                ))
                .into());
            }
        };

        let identity = Self::from_node(node, region_override);
        info!(
            node_id = %identity.node_id,
            label = %identity.label,
            region = %identity.region,
            "resolved node identity"
        );
        Ok(identity)
    }
}

async fn match_by_address<P: Provider + ?Sized>(
    provider: &P,
    label: &str,
    local_addresses: &[IpAddr],
) -> Result<Node, VolumeError> {
    let not_found = || {
        VolumeError::from(ConfigError::Invalid(format!(
            "no instance is labelled {label} and none owns a local link-local address; \
             set LINVOL_NODE_LABEL or node_label in linvol.toml"
        )))
    };
    if local_addresses.is_empty() {
        return Err(not_found());
    }

    let local: BTreeSet<IpAddr> = local_addresses.iter().copied().collect();
    debug!(label, addresses = ?local, "matching node by link-local address");
    for node in provider.list_instances(None).await? {
        let addresses = provider.instance_addresses(&node.id).await?;
        if addresses.iter().any(|address| local.contains(address)) {
            return Ok(node);
        }
    }
    Err(not_found())
}

/// Returns the configured label, else the hostname.
///
/// # Errors
///
/// Returns [`ConfigError::MissingField`] when neither is available.
pub fn local_label(configured: Option<&str>) -> Result<String, ConfigError> {
    if let Some(label) = configured.map(str::trim).filter(|label| !label.is_empty()) {
        return Ok(label.to_owned());
    }
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            ConfigError::MissingField(String::from(
                "missing node label: hostname is unavailable; set LINVOL_NODE_LABEL or add node_label to linvol.toml",
            ))
        })
}

/// Returns `true` for addresses in `fe80::/10`.
#[must_use]
pub const fn is_link_local(address: &Ipv6Addr) -> bool {
    (address.segments()[0] & 0xffc0) == 0xfe80
}

/// Lists IPv6 link-local addresses assigned to local interfaces.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when interfaces cannot be enumerated.
pub fn link_local_addresses() -> Result<Vec<IpAddr>, ConfigError> {
    let interfaces = nix::ifaddrs::getifaddrs()
        .map_err(|err| ConfigError::Invalid(format!("failed to enumerate interfaces: {err}")))?;
    let mut addresses: Vec<IpAddr> = interfaces
        .filter_map(|interface| {
            interface
                .address
                .as_ref()
                .and_then(|storage| storage.as_sockaddr_in6())
                .map(|sockaddr| sockaddr.ip())
        })
        .filter(is_link_local)
        .map(IpAddr::V6)
        .collect();
    addresses.sort();
    addresses.dedup();
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::test_support::FakeProvider;

    fn node(id: &str, label: &str) -> Node {
        Node {
            id: NodeId::from(id),
            label: label.to_owned(),
            region: String::from("us-east"),
        }
    }

    fn addr(value: &str) -> IpAddr {
        value
            .parse()
            .unwrap_or_else(|err| panic!("bad address {value}: {err}"))
    }

    #[tokio::test]
    async fn resolves_by_label() {
        let provider = FakeProvider::new();
        provider.insert_node(node("101", "web-1"), vec![]);
        provider.insert_node(node("102", "web-10"), vec![]);

        let identity = NodeIdentity::resolve(&provider, "web-1", &[], None)
            .await
            .expect("resolved");

        assert_eq!(identity.node_id.as_str(), "101");
        assert_eq!(identity.region, "us-east");
    }

    #[tokio::test]
    async fn falls_back_to_link_local_address() {
        let provider = FakeProvider::new();
        provider.insert_node(node("101", "web-1"), vec![addr("fe80::1")]);
        provider.insert_node(
            node("102", "web-2"),
            vec![addr("192.0.2.10"), addr("fe80::f03c:91ff:fe24:3a2f")],
        );

        let identity = NodeIdentity::resolve(
            &provider,
            "renamed-host",
            &[addr("fe80::f03c:91ff:fe24:3a2f")],
            Some("eu-west"),
        )
        .await
        .expect("resolved by address");

        assert_eq!(identity.node_id.as_str(), "102");
        assert_eq!(identity.label, "web-2");
        assert_eq!(identity.region, "eu-west");
    }

    #[tokio::test]
    async fn unknown_node_is_a_config_error() {
        let provider = FakeProvider::new();
        provider.insert_node(node("101", "web-1"), vec![addr("fe80::1")]);

        let err = NodeIdentity::resolve(&provider, "ghost", &[addr("fe80::2")], None)
            .await
            .expect_err("unresolved");

        let VolumeError::Config(ConfigError::Invalid(message)) = &err else {
            panic!("expected config error, got {err:?}");
        };
        assert!(message.contains("LINVOL_NODE_LABEL"), "message: {message}");
    }

    #[tokio::test]
    async fn duplicate_labels_are_rejected() {
        let provider = FakeProvider::new();
        provider.insert_node(node("101", "web"), vec![]);
        provider.insert_node(node("102", "web"), vec![]);

        let err = NodeIdentity::resolve(&provider, "web", &[], None)
            .await
            .expect_err("ambiguous");

        assert!(matches!(err, VolumeError::Config(ConfigError::Invalid(_))));
    }

    #[rstest]
    #[case("fe80::1", true)]
    #[case("febf::1", true)]
    #[case("fec0::1", false)]
    #[case("2600:3c03::f03c:91ff:fe24:3a2f", false)]
    fn link_local_range(#[case] value: &str, #[case] expected: bool) {
        let address: Ipv6Addr = value
            .parse()
            .unwrap_or_else(|err| panic!("bad address {value}: {err}"));
        assert_eq!(is_link_local(&address), expected);
    }

    #[test]
    fn configured_label_wins_over_hostname() {
        assert_eq!(
            local_label(Some("  db-host ")).expect("label"),
            "db-host"
        );
    }
}
