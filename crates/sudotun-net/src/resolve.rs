//! Server address resolution.
//!
//! Turns a configured host/port into the concrete address handed to the
//! relay, honoring the profile's IP family preference. Literal IPs are used
//! verbatim with no lookup; hostnames go through a pluggable [`HostLookup`]
//! backend (the system resolver in production, a static map in tests).
//!
//! When a lookup happened, the original hostname is kept as an SNI hint so
//! the HTTP mask can still present the name even though the wire address now
//! carries a literal.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tracing::debug;

use sudotun_proto::{IpMode, strip_brackets};

/// Resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no IPv4 address found for {0}")]
    NoIpv4(String),

    #[error("no IPv4/IPv6 address found for {0}")]
    NoAddress(String),

    #[error("lookup failed for {host}: {message}")]
    Lookup { host: String, message: String },

    #[error("resolver backend unavailable: {0}")]
    Backend(String),
}

/// Concrete connectable address for one start/switch attempt.
///
/// Ephemeral: recomputed on every session start and node switch, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// Literal IP, or the input verbatim when it already was a literal.
    pub host: String,
    pub port: u16,
    /// `host:port` wire form, IPv6 bracketed.
    pub server_address: String,
    /// Original hostname, present only when a lookup replaced it.
    pub sni_host: Option<String>,
}

/// Name lookup backend.
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// All addresses for `host`, in the backend's preference order.
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// System resolver backend.
pub struct SystemLookup {
    resolver: TokioAsyncResolver,
}

impl SystemLookup {
    pub fn from_system_conf() -> Result<Self, ResolveError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| ResolveError::Backend(e.to_string()))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl HostLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| ResolveError::Lookup {
                host: host.to_string(),
                message: e.to_string(),
            })?;
        Ok(lookup.iter().collect())
    }
}

/// Server address resolver with a pluggable lookup backend.
#[derive(Clone)]
pub struct Resolver {
    lookup: Arc<dyn HostLookup>,
}

impl Resolver {
    pub fn new(lookup: Arc<dyn HostLookup>) -> Self {
        Self { lookup }
    }

    /// Resolver backed by the system configuration.
    pub fn system() -> Result<Self, ResolveError> {
        Ok(Self::new(Arc::new(SystemLookup::from_system_conf()?)))
    }

    /// Resolve `host:port` under the given family preference.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        mode: IpMode,
    ) -> Result<ResolvedAddress, ResolveError> {
        let host = strip_brackets(host);

        if is_ipv4_literal(host) || is_ipv6_literal(host) {
            return Ok(ResolvedAddress {
                host: host.to_string(),
                port,
                server_address: join_host_port(host, port),
                sni_host: None,
            });
        }

        let addresses = self.lookup.lookup(host).await?;
        debug!(host, candidates = addresses.len(), "resolved server host");

        let ipv4 = addresses.iter().find(|a| a.is_ipv4());
        let ipv6 = addresses.iter().find(|a| a.is_ipv6());

        let picked = match mode {
            // "Default" stays aligned with what most users expect from other
            // clients: IPv4 when available, IPv6 as fallback.
            IpMode::Default => ipv4.or(ipv6),
            IpMode::Ipv4Only => ipv4,
            IpMode::Ipv6Preferred => ipv6.or(ipv4),
        };

        let selected = picked.ok_or_else(|| match mode {
            IpMode::Ipv4Only => ResolveError::NoIpv4(host.to_string()),
            _ => ResolveError::NoAddress(host.to_string()),
        })?;

        let resolved = selected.to_string();
        Ok(ResolvedAddress {
            server_address: join_host_port(&resolved, port),
            host: resolved,
            port,
            sni_host: Some(host.to_string()),
        })
    }
}

/// Strict dotted-quad check: four decimal octets in canonical form.
fn is_ipv4_literal(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|part| match part.parse::<u16>() {
        Ok(value) => value <= 255 && *part == value.to_string(),
        Err(_) => false,
    })
}

/// Any colon marks an IPv6 literal; hostnames cannot contain one.
fn is_ipv6_literal(host: &str) -> bool {
    host.contains(':')
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
