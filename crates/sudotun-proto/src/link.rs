//! Portable short-link codec.
//!
//! A profile is shared as `sudoku://` followed by an unpadded URL-safe base64
//! encoding of a compact JSON object with one/two character keys. Decoding is
//! deliberately forgiving: unknown keys are ignored so newer links still load,
//! and the standard base64 alphabet is accepted as a fallback for links
//! produced by other tools.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::node::{
    AeadMode, AsciiMode, HttpMaskMode, HttpMaskMultiplex, NodeProfile, ProxyMode, strip_brackets,
};

/// URI scheme prefix of a short link.
pub const SCHEME: &str = "sudoku://";

/// Rule lists applied to every imported profile.
///
/// Importing always forces rule-based routing with this set; the link itself
/// never carries routing configuration.
pub const DEFAULT_RULE_URLS: [&str; 2] = [
    "https://gh-proxy.org/https://raw.githubusercontent.com/blackmatrix7/ios_rule_script/master/rule/Clash/China/China.list",
    "https://gh-proxy.org/https://raw.githubusercontent.com/fernvenue/chn-cidr-list/master/ipv4.yaml",
];

/// Short-link decode errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("short link is not valid base64")]
    Encoding,

    #[error("short link payload is not valid JSON: {0}")]
    Payload(String),

    #[error("short link missing required fields")]
    MissingField,

    #[error("short link port {0} out of range")]
    PortRange(u32),
}

/// Wire payload. Field order matters only for link stability, not semantics.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Payload {
    #[serde(rename = "h", default)]
    host: String,
    #[serde(rename = "p", default)]
    port: u32,
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    ascii: Option<String>,
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    aead: Option<String>,
    #[serde(rename = "m", default, skip_serializing_if = "Option::is_none")]
    mix_port: Option<u16>,
    #[serde(rename = "x", default, skip_serializing_if = "Option::is_none")]
    packed_downlink: Option<bool>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    custom_table: Option<String>,
    #[serde(rename = "ts", default, skip_serializing_if = "Vec::is_empty")]
    custom_tables: Vec<String>,
    #[serde(rename = "hd", default, skip_serializing_if = "is_false")]
    disable_http_mask: bool,
    #[serde(rename = "hm", default, skip_serializing_if = "Option::is_none")]
    http_mask_mode: Option<String>,
    #[serde(rename = "ht", default, skip_serializing_if = "is_false")]
    http_mask_tls: bool,
    #[serde(rename = "hh", default, skip_serializing_if = "Option::is_none")]
    http_mask_host: Option<String>,
    #[serde(rename = "hx", default, skip_serializing_if = "Option::is_none")]
    http_mask_mux: Option<String>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Decode a short link into a freshly created profile.
///
/// The scheme prefix is optional so raw payloads paste cleanly. Routing mode
/// is always forced to rule-based with [`DEFAULT_RULE_URLS`]; the resulting
/// profile gets a new id and creation timestamp.
pub fn decode(link: &str) -> Result<NodeProfile, LinkError> {
    let encoded = link.trim().strip_prefix(SCHEME).unwrap_or(link.trim()).trim();
    let raw = decode_base64_flexible(encoded)?;
    let payload: Payload =
        serde_json::from_slice(&raw).map_err(|e| LinkError::Payload(e.to_string()))?;

    let key = payload.key.as_deref().unwrap_or("");
    if payload.host.trim().is_empty() || payload.port == 0 || key.trim().is_empty() {
        return Err(LinkError::MissingField);
    }
    let port = u16::try_from(payload.port).map_err(|_| LinkError::PortRange(payload.port))?;

    let ascii = match payload
        .ascii
        .as_deref()
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("ascii") | Some("prefer_ascii") => AsciiMode::PreferAscii,
        _ => AsciiMode::PreferEntropy,
    };
    let aead = match payload.aead.as_deref() {
        None | Some("") => AeadMode::None,
        Some(raw) => AeadMode::from_wire(raw),
    };
    let local_port = match payload.mix_port {
        None | Some(0) => 1080,
        Some(p) => p,
    };
    let enable_pure_downlink = payload.packed_downlink.map(|packed| !packed).unwrap_or(true);

    let primary_table = payload
        .custom_table
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .to_string();
    let listed_tables: Vec<String> = payload
        .custom_tables
        .iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let custom_tables = if !listed_tables.is_empty() {
        listed_tables
    } else if !primary_table.is_empty() {
        vec![primary_table.clone()]
    } else {
        Vec::new()
    };
    let effective_primary = if primary_table.is_empty() {
        custom_tables.first().cloned().unwrap_or_default()
    } else {
        primary_table
    };

    let http_mask_mode = payload
        .http_mask_mode
        .as_deref()
        .map(HttpMaskMode::from_wire)
        .unwrap_or_default();
    let http_mask_multiplex = if payload.disable_http_mask || http_mask_mode == HttpMaskMode::Legacy
    {
        HttpMaskMultiplex::Off
    } else {
        payload
            .http_mask_mux
            .as_deref()
            .map(HttpMaskMultiplex::from_wire)
            .unwrap_or_default()
    };

    let host = strip_brackets(&payload.host).to_string();

    Ok(NodeProfile {
        name: host.clone(),
        host,
        port,
        key: key.to_string(),
        ascii_mode: ascii,
        aead,
        enable_pure_downlink,
        local_port,
        proxy_mode: ProxyMode::Pac,
        rule_urls: DEFAULT_RULE_URLS.iter().map(|u| u.to_string()).collect(),
        custom_table: effective_primary,
        custom_tables,
        disable_http_mask: payload.disable_http_mask,
        http_mask_mode,
        http_mask_tls: payload.http_mask_tls,
        http_mask_host: payload
            .http_mask_host
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .to_string(),
        http_mask_multiplex,
        ..NodeProfile::default()
    })
}

/// Encode a profile as a short link.
///
/// Fields sitting at their default or disabled value are omitted to keep
/// links short. `advertise_host` substitutes the embedded host, e.g. to hand
/// out a fronting domain instead of the configured literal.
pub fn encode(node: &NodeProfile, advertise_host: Option<&str>) -> String {
    let host = strip_brackets(advertise_host.unwrap_or(&node.host)).to_string();

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

    let payload = Payload {
        host,
        port: u32::from(node.port),
        key: Some(node.key.clone()),
        ascii: (node.ascii_mode == AsciiMode::PreferAscii).then(|| "ascii".to_string()),
        aead: (node.aead != AeadMode::None).then(|| node.aead.wire_name().to_string()),
        mix_port: (node.local_port != 1080).then_some(node.local_port),
        packed_downlink: (!node.enable_pure_downlink).then_some(true),
        custom_table: primary_table,
        custom_tables: normalized_tables,
        disable_http_mask: node.disable_http_mask,
        http_mask_mode: (node.http_mask_mode != HttpMaskMode::Legacy)
            .then(|| node.http_mask_mode.wire_value().to_string()),
        http_mask_tls: node.http_mask_tls,
        http_mask_host: {
            let h = node.http_mask_host.trim();
            (!h.is_empty()).then(|| h.to_string())
        },
        http_mask_mux: (!node.disable_http_mask
            && node.http_mask_multiplex != HttpMaskMultiplex::Off)
            .then(|| node.http_mask_multiplex.wire_value().to_string()),
    };

    let data = serde_json::to_vec(&payload).unwrap_or_default();
    format!("{SCHEME}{}", URL_SAFE_NO_PAD.encode(data))
}

fn decode_base64_flexible(encoded: &str) -> Result<Vec<u8>, LinkError> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .or_else(|_| STANDARD.decode(encoded))
        .map_err(|_| LinkError::Encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_profile() -> NodeProfile {
        NodeProfile {
            name: "tokyo".to_string(),
            host: "relay.example.net".to_string(),
            port: 8443,
            key: "super-secret".to_string(),
            ascii_mode: AsciiMode::PreferAscii,
            aead: AeadMode::Aes128Gcm,
            enable_pure_downlink: false,
            local_port: 7890,
            custom_table: "v1-table".to_string(),
            custom_tables: vec!["v1-table".to_string(), "v2-table".to_string()],
            disable_http_mask: false,
            http_mask_mode: HttpMaskMode::Stream,
            http_mask_tls: true,
            http_mask_host: "cdn.example.com".to_string(),
            http_mask_multiplex: HttpMaskMultiplex::High,
            ..NodeProfile::default()
        }
    }

    fn raw_payload(json: &str) -> String {
        format!("{SCHEME}{}", URL_SAFE_NO_PAD.encode(json))
    }

    #[test]
    fn test_roundtrip_preserves_link_fields() {
        let node = full_profile();
        let decoded = decode(&encode(&node, None)).unwrap();

        assert_eq!(decoded.host, node.host);
        assert_eq!(decoded.port, node.port);
        assert_eq!(decoded.key, node.key);
        assert_eq!(decoded.ascii_mode, node.ascii_mode);
        assert_eq!(decoded.aead, node.aead);
        assert_eq!(decoded.enable_pure_downlink, node.enable_pure_downlink);
        assert_eq!(decoded.local_port, node.local_port);
        assert_eq!(decoded.custom_table, node.custom_table);
        assert_eq!(decoded.custom_tables, node.custom_tables);
        assert_eq!(decoded.disable_http_mask, node.disable_http_mask);
        assert_eq!(decoded.http_mask_mode, node.http_mask_mode);
        assert_eq!(decoded.http_mask_tls, node.http_mask_tls);
        assert_eq!(decoded.http_mask_host, node.http_mask_host);
        assert_eq!(decoded.http_mask_multiplex, node.http_mask_multiplex);
    }

    #[test]
    fn test_import_forces_rule_routing() {
        let mut node = full_profile();
        node.proxy_mode = ProxyMode::Global;
        node.rule_urls.clear();

        let decoded = decode(&encode(&node, None)).unwrap();
        assert_eq!(decoded.proxy_mode, ProxyMode::Pac);
        assert_eq!(decoded.rule_urls.len(), DEFAULT_RULE_URLS.len());
        assert_eq!(decoded.rule_urls[0], DEFAULT_RULE_URLS[0]);
    }

    #[test]
    fn test_decode_assigns_fresh_identity() {
        let link = encode(&full_profile(), None);
        let a = decode(&link).unwrap();
        let b = decode(&link).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "relay.example.net");
    }

    #[test]
    fn test_minimal_payload_defaults() {
        let node =
            decode(&raw_payload(r#"{"h":"relay.example.net","p":8443,"k":"s"}"#)).unwrap();
        assert_eq!(node.ascii_mode, AsciiMode::PreferEntropy);
        assert_eq!(node.aead, AeadMode::None);
        assert_eq!(node.local_port, 1080);
        assert!(node.enable_pure_downlink);
        assert!(node.custom_tables.is_empty());
        assert_eq!(node.http_mask_mode, HttpMaskMode::Legacy);
        assert_eq!(node.http_mask_multiplex, HttpMaskMultiplex::Off);
    }

    #[test]
    fn test_zero_mix_port_falls_back() {
        let node =
            decode(&raw_payload(r#"{"h":"h.example","p":443,"k":"s","m":0}"#)).unwrap();
        assert_eq!(node.local_port, 1080);
    }

    #[test]
    fn test_packed_downlink_flag() {
        let node =
            decode(&raw_payload(r#"{"h":"h.example","p":443,"k":"s","x":true}"#)).unwrap();
        assert!(!node.enable_pure_downlink);
    }

    #[test]
    fn test_single_table_backfills_list() {
        let node =
            decode(&raw_payload(r#"{"h":"h.example","p":443,"k":"s","t":" tbl "}"#)).unwrap();
        assert_eq!(node.custom_table, "tbl");
        assert_eq!(node.custom_tables, vec!["tbl".to_string()]);
    }

    #[test]
    fn test_multiplex_forced_off_when_mask_disabled() {
        let node = decode(&raw_payload(
            r#"{"h":"h.example","p":443,"k":"s","hd":true,"hm":"stream","hx":"high"}"#,
        ))
        .unwrap();
        assert_eq!(node.http_mask_multiplex, HttpMaskMultiplex::Off);
    }

    #[test]
    fn test_missing_required_fields() {
        let cases = [
            r#"{"p":443,"k":"s"}"#,
            r#"{"h":"h.example","k":"s"}"#,
            r#"{"h":"h.example","p":0,"k":"s"}"#,
            r#"{"h":"h.example","p":443}"#,
            r#"{"h":"h.example","p":443,"k":"  "}"#,
        ];
        for json in cases {
            assert_eq!(decode(&raw_payload(json)).unwrap_err(), LinkError::MissingField);
        }
    }

    #[test]
    fn test_port_out_of_range() {
        assert_eq!(
            decode(&raw_payload(r#"{"h":"h.example","p":70000,"k":"s"}"#)).unwrap_err(),
            LinkError::PortRange(70000)
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(decode("sudoku://!!!not-base64!!!").unwrap_err(), LinkError::Encoding);
        let not_json = format!("{SCHEME}{}", URL_SAFE_NO_PAD.encode(b"hello"));
        assert!(matches!(decode(&not_json).unwrap_err(), LinkError::Payload(_)));
    }

    #[test]
    fn test_accepts_standard_base64_fallback() {
        let json = r#"{"h":"relay.example.net","p":8443,"k":"s"}"#;
        let urlsafe = format!("{SCHEME}{}", URL_SAFE_NO_PAD.encode(json));
        let standard = format!("{SCHEME}{}", STANDARD.encode(json));

        let a = decode(&urlsafe).unwrap();
        let b = decode(&standard).unwrap();
        assert_eq!(a.host, b.host);
        assert_eq!(a.port, b.port);
        assert_eq!(a.key, b.key);
    }

    #[test]
    fn test_scheme_prefix_is_optional() {
        let json = r#"{"h":"relay.example.net","p":8443,"k":"s"}"#;
        let bare = URL_SAFE_NO_PAD.encode(json);
        assert!(decode(&bare).is_ok());
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let node = decode(&raw_payload(
            r#"{"h":"h.example","p":443,"k":"s","zz":"future","q":[1,2]}"#,
        ))
        .unwrap();
        assert_eq!(node.host, "h.example");
    }

    #[test]
    fn test_encode_strips_ipv6_brackets() {
        let mut node = full_profile();
        node.host = "[2001:db8::1]".to_string();
        let decoded = decode(&encode(&node, None)).unwrap();
        assert_eq!(decoded.host, "2001:db8::1");
    }

    #[test]
    fn test_advertise_host_override() {
        let node = full_profile();
        let decoded = decode(&encode(&node, Some("front.example.org"))).unwrap();
        assert_eq!(decoded.host, "front.example.org");
    }

    #[test]
    fn test_encode_omits_defaults() {
        let node = NodeProfile {
            host: "h.example".to_string(),
            port: 443,
            key: "s".to_string(),
            aead: AeadMode::None,
            ..NodeProfile::default()
        };
        let link = encode(&node, None);
        let raw = URL_SAFE_NO_PAD
            .decode(link.strip_prefix(SCHEME).unwrap())
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(
            obj.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["h", "p", "k"]
        );
    }
}
