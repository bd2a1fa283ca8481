//! Relay process contract.
//!
//! The relay is an external black box: it speaks the obfuscated protocol to
//! the remote server and exposes a local proxy port. This module owns the two
//! halves of its contract — the JSON configuration blob assembled from a
//! profile, and the [`RelayProcess`] interface through which the session
//! drives it. The relay receives no session information beyond the blob.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sudotun_proto::{HttpMaskMode, HttpMaskMultiplex, NodeProfile, ProxyMode};

use crate::resolve::{ResolveError, Resolver};

/// Everything the relay process is told.
///
/// Field names are the wire contract; do not rename without a relay-side
/// migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub mode: String,
    pub transport: String,
    pub local_port: u16,
    pub server_address: String,
    pub key: String,
    pub aead: String,
    pub suspicious_action: String,
    pub padding_min: u16,
    pub padding_max: u16,
    pub rule_urls: Vec<String>,
    pub ascii: String,
    pub custom_table: String,
    pub custom_tables: Vec<String>,
    pub enable_pure_downlink: bool,
    pub disable_http_mask: bool,
    pub http_mask_mode: String,
    pub http_mask_tls: bool,
    pub http_mask_host: String,
    pub http_mask_multiplex: String,
    pub proxy_mode: String,
}

impl RelayConfig {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Assemble the relay configuration for one profile.
///
/// Resolves the server address first, then normalizes the profile fields into
/// their canonical wire form: trimmed strings, rule URLs only under
/// rule-based routing, the custom-table list backfilled from the single
/// legacy field, and mask fields collapsed when masking is disabled.
pub async fn build_config(
    node: &NodeProfile,
    resolver: &Resolver,
) -> Result<RelayConfig, ResolveError> {
    let resolved = resolver.resolve(&node.host, node.port, node.ip_mode).await?;

    let rule_urls = if node.proxy_mode == ProxyMode::Pac {
        node.rule_urls
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect()
    } else {
        Vec::new()
    };

    let normalized_tables: Vec<String> = node
        .custom_tables
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let primary_table = normalized_tables.first().cloned().or_else(|| {
        let t = node.custom_table.trim();
        (!t.is_empty()).then(|| t.to_string())
    });
    let custom_tables = if !normalized_tables.is_empty() {
        normalized_tables
    } else {
        primary_table.clone().map(|t| vec![t]).unwrap_or_default()
    };

    let http_mask_host = {
        let explicit = node.http_mask_host.trim();
        if !explicit.is_empty() {
            explicit.to_string()
        } else if !node.disable_http_mask {
            resolved.sni_host.clone().unwrap_or_default()
        } else {
            String::new()
        }
    };
    let http_mask_multiplex =
        if node.disable_http_mask || node.http_mask_mode == HttpMaskMode::Legacy {
            HttpMaskMultiplex::Off
        } else {
            node.http_mask_multiplex
        };

    Ok(RelayConfig {
        mode: "client".to_string(),
        transport: "tcp".to_string(),
        local_port: node.local_port,
        server_address: resolved.server_address,
        key: node.key.trim().to_string(),
        aead: node.aead.wire_name().to_string(),
        suspicious_action: "fallback".to_string(),
        padding_min: node.padding_min,
        padding_max: node.padding_max,
        rule_urls,
        ascii: node.ascii_mode.wire_value().to_string(),
        custom_table: primary_table.unwrap_or_default(),
        custom_tables,
        enable_pure_downlink: node.enable_pure_downlink,
        disable_http_mask: node.disable_http_mask,
        http_mask_mode: node.http_mask_mode.wire_value().to_string(),
        http_mask_tls: node.http_mask_tls,
        http_mask_host,
        http_mask_multiplex: http_mask_multiplex.wire_value().to_string(),
        proxy_mode: node.proxy_mode.wire_value().to_string(),
    })
}

/// Relay traffic counters.
///
/// Monotonically non-decreasing within one relay instance; a restart resets
/// them to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    #[serde(default)]
    pub direct_tx: u64,
    #[serde(default)]
    pub direct_rx: u64,
    #[serde(default)]
    pub proxy_tx: u64,
    #[serde(default)]
    pub proxy_rx: u64,
}

/// Relay process errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Opaque start failure (malformed config, bind failure, ...).
    #[error("relay failed to start: {0}")]
    Start(String),
}

/// Handle to the external relay process.
///
/// Production implementations link the vendor library through FFI; the
/// session layer must stay ignorant of that mechanism. `stop` is always safe
/// to call, including when nothing is running, and implementations log their
/// own teardown failures instead of surfacing them.
#[async_trait]
pub trait RelayProcess: Send + Sync {
    async fn start(&self, config_json: &str) -> Result<(), RelayError>;

    async fn stop(&self);

    /// Current counters, or `None` when unavailable.
    async fn traffic_stats(&self) -> Option<TrafficSnapshot>;

    async fn reset_traffic_stats(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::sync::Arc;

    use crate::resolve::HostLookup;
    use sudotun_proto::{AeadMode, AsciiMode, IpMode};

    struct StaticLookup(HashMap<String, Vec<IpAddr>>);

    #[async_trait]
    impl HostLookup for StaticLookup {
        async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
            self.0
                .get(host)
                .cloned()
                .ok_or_else(|| ResolveError::Lookup {
                    host: host.to_string(),
                    message: "unknown host".to_string(),
                })
        }
    }

    fn resolver_with(host: &str, addrs: &[&str]) -> Resolver {
        let table = HashMap::from([(
            host.to_string(),
            addrs.iter().map(|a| a.parse().unwrap()).collect(),
        )]);
        Resolver::new(Arc::new(StaticLookup(table)))
    }

    fn base_node() -> NodeProfile {
        NodeProfile {
            host: "relay.example.net".to_string(),
            port: 8443,
            key: "  secret  ".to_string(),
            local_port: 7890,
            ..NodeProfile::default()
        }
    }

    #[tokio::test]
    async fn test_fixed_fields_and_resolved_address() {
        let resolver = resolver_with("relay.example.net", &["203.0.113.7"]);
        let config = build_config(&base_node(), &resolver).await.unwrap();

        assert_eq!(config.mode, "client");
        assert_eq!(config.transport, "tcp");
        assert_eq!(config.suspicious_action, "fallback");
        assert_eq!(config.server_address, "203.0.113.7:8443");
        assert_eq!(config.local_port, 7890);
        assert_eq!(config.key, "secret");
        assert_eq!(config.aead, AeadMode::Chacha20Poly1305.wire_name());
        assert_eq!(config.ascii, AsciiMode::PreferEntropy.wire_value());
    }

    #[tokio::test]
    async fn test_rule_urls_only_under_rule_mode() {
        let resolver = resolver_with("relay.example.net", &["203.0.113.7"]);

        let mut node = base_node();
        node.proxy_mode = ProxyMode::Pac;
        node.rule_urls = vec![
            "  https://rules.example.net/cn.list ".to_string(),
            "   ".to_string(),
        ];
        let config = build_config(&node, &resolver).await.unwrap();
        assert_eq!(config.rule_urls, vec!["https://rules.example.net/cn.list"]);
        assert_eq!(config.proxy_mode, "pac");

        node.proxy_mode = ProxyMode::Global;
        let config = build_config(&node, &resolver).await.unwrap();
        assert!(config.rule_urls.is_empty());
    }

    #[tokio::test]
    async fn test_single_table_backfills_list() {
        let resolver = resolver_with("relay.example.net", &["203.0.113.7"]);
        let mut node = base_node();
        node.custom_table = " tbl ".to_string();
        let config = build_config(&node, &resolver).await.unwrap();
        assert_eq!(config.custom_table, "tbl");
        assert_eq!(config.custom_tables, vec!["tbl"]);
    }

    #[tokio::test]
    async fn test_table_list_wins_over_single_field() {
        let resolver = resolver_with("relay.example.net", &["203.0.113.7"]);
        let mut node = base_node();
        node.custom_table = "old".to_string();
        node.custom_tables = vec![" a ".to_string(), "b".to_string(), "".to_string()];
        let config = build_config(&node, &resolver).await.unwrap();
        assert_eq!(config.custom_table, "a");
        assert_eq!(config.custom_tables, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_mask_host_falls_back_to_sni_hint() {
        let resolver = resolver_with("relay.example.net", &["203.0.113.7"]);
        let node = base_node();
        let config = build_config(&node, &resolver).await.unwrap();
        // Masking enabled, no override: the resolved hostname fills in.
        assert_eq!(config.http_mask_host, "relay.example.net");
    }

    #[tokio::test]
    async fn test_mask_host_override_and_disabled() {
        let resolver = resolver_with("relay.example.net", &["203.0.113.7"]);

        let mut node = base_node();
        node.http_mask_host = " cdn.example.com ".to_string();
        let config = build_config(&node, &resolver).await.unwrap();
        assert_eq!(config.http_mask_host, "cdn.example.com");

        let mut node = base_node();
        node.disable_http_mask = true;
        let config = build_config(&node, &resolver).await.unwrap();
        assert_eq!(config.http_mask_host, "");
    }

    #[tokio::test]
    async fn test_mask_host_empty_for_literal_host() {
        let mut node = base_node();
        node.host = "203.0.113.7".to_string();
        let resolver = resolver_with("unused", &[]);
        let config = build_config(&node, &resolver).await.unwrap();
        // No lookup happened, so there is no hostname to present.
        assert_eq!(config.http_mask_host, "");
    }

    #[tokio::test]
    async fn test_multiplex_collapses_under_legacy_mask() {
        let resolver = resolver_with("relay.example.net", &["203.0.113.7"]);
        let mut node = base_node();
        node.http_mask_mode = HttpMaskMode::Legacy;
        node.http_mask_multiplex = HttpMaskMultiplex::High;
        let config = build_config(&node, &resolver).await.unwrap();
        assert_eq!(config.http_mask_multiplex, "off");

        node.http_mask_mode = HttpMaskMode::Stream;
        let config = build_config(&node, &resolver).await.unwrap();
        assert_eq!(config.http_mask_multiplex, "high");
    }

    #[tokio::test]
    async fn test_resolution_failure_propagates() {
        let resolver = resolver_with("other.example.net", &["203.0.113.7"]);
        let err = build_config(&base_node(), &resolver).await.unwrap_err();
        assert!(matches!(err, ResolveError::Lookup { .. }));
    }

    #[tokio::test]
    async fn test_json_wire_names() {
        let resolver = resolver_with("relay.example.net", &["203.0.113.7"]);
        let config = build_config(&base_node(), &resolver).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&config.to_json()).unwrap();

        assert_eq!(value["mode"], "client");
        assert_eq!(value["server_address"], "203.0.113.7:8443");
        assert_eq!(value["local_port"], 7890);
        assert!(value["enable_pure_downlink"].as_bool().unwrap());
        assert!(value.get("padding_min").is_some());
        assert!(value.get("http_mask_multiplex").is_some());
    }

    #[test]
    fn test_traffic_snapshot_tolerates_partial_json() {
        let snapshot: TrafficSnapshot =
            serde_json::from_str(r#"{"proxy_tx":42}"#).unwrap();
        assert_eq!(snapshot.proxy_tx, 42);
        assert_eq!(snapshot.direct_rx, 0);
    }
}
