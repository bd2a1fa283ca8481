//! Server profile data model.
//!
//! A [`NodeProfile`] captures everything needed to reach one relay server:
//! endpoint, secret key, cipher and obfuscation options, routing mode and the
//! local proxy port the tunnel binds to. Profiles are persisted by the store
//! and shared between devices as short links.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// AEAD cipher applied to the relay stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AeadMode {
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    #[serde(rename = "chacha20-poly1305")]
    #[default]
    Chacha20Poly1305,
    #[serde(rename = "none")]
    None,
}

impl AeadMode {
    /// Name used on the wire (links and the relay config).
    pub fn wire_name(&self) -> &'static str {
        match self {
            AeadMode::Aes128Gcm => "aes-128-gcm",
            AeadMode::Chacha20Poly1305 => "chacha20-poly1305",
            AeadMode::None => "none",
        }
    }

    /// Parse a wire name; anything unrecognized (or empty) means no AEAD.
    pub fn from_wire(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "aes-128-gcm" => AeadMode::Aes128Gcm,
            "chacha20-poly1305" => AeadMode::Chacha20Poly1305,
            _ => AeadMode::None,
        }
    }
}

/// Obfuscation preference for the relay's outer byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AsciiMode {
    #[serde(rename = "prefer_ascii")]
    PreferAscii,
    #[serde(rename = "prefer_entropy")]
    #[default]
    PreferEntropy,
}

impl AsciiMode {
    pub fn wire_value(&self) -> &'static str {
        match self {
            AsciiMode::PreferAscii => "prefer_ascii",
            AsciiMode::PreferEntropy => "prefer_entropy",
        }
    }
}

/// Traffic routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProxyMode {
    /// Everything through the relay.
    #[serde(rename = "global")]
    #[default]
    Global,
    /// Nothing through the relay.
    #[serde(rename = "direct")]
    Direct,
    /// Rule-based split routing driven by remote rule lists.
    #[serde(rename = "pac")]
    Pac,
}

impl ProxyMode {
    pub fn wire_value(&self) -> &'static str {
        match self {
            ProxyMode::Global => "global",
            ProxyMode::Direct => "direct",
            ProxyMode::Pac => "pac",
        }
    }
}

/// IP family preference when resolving the server host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IpMode {
    /// IPv4 first, IPv6 as fallback.
    #[serde(rename = "default")]
    #[default]
    Default,
    #[serde(rename = "ipv4_only")]
    Ipv4Only,
    #[serde(rename = "ipv6_preferred")]
    Ipv6Preferred,
}

/// HTTP-like camouflage applied to the relay's wire traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HttpMaskMode {
    #[serde(rename = "legacy")]
    #[default]
    Legacy,
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "stream")]
    Stream,
    #[serde(rename = "poll")]
    Poll,
}

impl HttpMaskMode {
    pub fn wire_value(&self) -> &'static str {
        match self {
            HttpMaskMode::Legacy => "legacy",
            HttpMaskMode::Auto => "auto",
            HttpMaskMode::Stream => "stream",
            HttpMaskMode::Poll => "poll",
        }
    }

    /// Parse a wire name, accepting the historical aliases.
    pub fn from_wire(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "auto" => HttpMaskMode::Auto,
            "stream" | "xhttp" => HttpMaskMode::Stream,
            "poll" | "pht" => HttpMaskMode::Poll,
            _ => HttpMaskMode::Legacy,
        }
    }
}

/// Stream multiplexing level under the HTTP mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HttpMaskMultiplex {
    #[serde(rename = "off")]
    #[default]
    Off,
    #[serde(rename = "low")]
    Low,
    #[serde(rename = "middle")]
    Middle,
    #[serde(rename = "high")]
    High,
}

impl HttpMaskMultiplex {
    pub fn wire_value(&self) -> &'static str {
        match self {
            HttpMaskMultiplex::Off => "off",
            HttpMaskMultiplex::Low => "low",
            HttpMaskMultiplex::Middle => "middle",
            HttpMaskMultiplex::High => "high",
        }
    }

    pub fn from_wire(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "low" => HttpMaskMultiplex::Low,
            "middle" => HttpMaskMultiplex::Middle,
            "high" => HttpMaskMultiplex::High,
            _ => HttpMaskMultiplex::Off,
        }
    }
}

/// One saved relay server.
///
/// The id is assigned once at creation and never reused; everything else can
/// be edited. Serde defaults keep store files from older versions loadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key: String,
    #[serde(rename = "ascii", default)]
    pub ascii_mode: AsciiMode,
    #[serde(rename = "custom_table", default)]
    pub custom_table: String,
    #[serde(rename = "custom_tables", default)]
    pub custom_tables: Vec<String>,
    #[serde(default)]
    pub aead: AeadMode,
    #[serde(default = "default_true")]
    pub enable_pure_downlink: bool,
    #[serde(default = "default_padding_min")]
    pub padding_min: u16,
    #[serde(default = "default_padding_max")]
    pub padding_max: u16,
    #[serde(default = "default_port")]
    pub local_port: u16,
    #[serde(default)]
    pub proxy_mode: ProxyMode,
    #[serde(default)]
    pub rule_urls: Vec<String>,
    #[serde(rename = "ip_mode", default)]
    pub ip_mode: IpMode,
    #[serde(rename = "disable_http_mask", default)]
    pub disable_http_mask: bool,
    #[serde(rename = "http_mask_mode", default)]
    pub http_mask_mode: HttpMaskMode,
    #[serde(rename = "http_mask_tls", default)]
    pub http_mask_tls: bool,
    #[serde(rename = "http_mask_host", default)]
    pub http_mask_host: String,
    #[serde(rename = "http_mask_multiplex", default)]
    pub http_mask_multiplex: HttpMaskMultiplex,
    #[serde(default = "now_millis")]
    pub created_at: u64,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_port() -> u16 {
    1080
}

fn default_true() -> bool {
    true
}

fn default_padding_min() -> u16 {
    5
}

fn default_padding_max() -> u16 {
    15
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Default for NodeProfile {
    fn default() -> Self {
        Self {
            id: new_id(),
            name: String::new(),
            host: String::new(),
            port: default_port(),
            key: String::new(),
            ascii_mode: AsciiMode::default(),
            custom_table: String::new(),
            custom_tables: Vec::new(),
            aead: AeadMode::default(),
            enable_pure_downlink: true,
            padding_min: default_padding_min(),
            padding_max: default_padding_max(),
            local_port: default_port(),
            proxy_mode: ProxyMode::default(),
            rule_urls: Vec::new(),
            ip_mode: IpMode::default(),
            disable_http_mask: false,
            http_mask_mode: HttpMaskMode::default(),
            http_mask_tls: false,
            http_mask_host: String::new(),
            http_mask_multiplex: HttpMaskMultiplex::default(),
            created_at: now_millis(),
        }
    }
}

impl NodeProfile {
    /// Create a profile for a plain endpoint, everything else at defaults.
    pub fn new(host: impl Into<String>, port: u16, key: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            port,
            key: key.into(),
            ..Self::default()
        }
    }

    /// Name shown in lists; falls back to the host when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.host
        } else {
            &self.name
        }
    }

    /// Enforce the profile invariants, repairing what is repairable.
    ///
    /// A reversed padding range is swapped rather than rejected; everything
    /// else that is out of range fails with a [`ProfileError`].
    pub fn validate(mut self) -> Result<Self, ProfileError> {
        if self.host.trim().is_empty() {
            return Err(ProfileError::BlankHost);
        }
        if self.port == 0 {
            return Err(ProfileError::InvalidPort(self.port));
        }
        if self.local_port == 0 {
            return Err(ProfileError::InvalidLocalPort(self.local_port));
        }
        if self.key.trim().is_empty() {
            return Err(ProfileError::BlankKey);
        }
        if self.padding_min > self.padding_max {
            std::mem::swap(&mut self.padding_min, &mut self.padding_max);
        }
        if self.proxy_mode != ProxyMode::Pac && !self.rule_urls.is_empty() {
            return Err(ProfileError::RuleUrlsWithoutRuleMode);
        }
        Ok(self)
    }
}

/// Profile validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("host must not be blank")]
    BlankHost,

    #[error("server port {0} out of range")]
    InvalidPort(u16),

    #[error("local proxy port {0} out of range")]
    InvalidLocalPort(u16),

    #[error("key must not be blank")]
    BlankKey,

    #[error("rule URLs are only valid under rule-based routing")]
    RuleUrlsWithoutRuleMode,
}

/// Strip one layer of square brackets from an IPv6 literal, plus whitespace.
pub fn strip_brackets(host: &str) -> &str {
    let trimmed = host.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(trimmed)
}
