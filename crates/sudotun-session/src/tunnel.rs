//! Packet forwarder contract.
//!
//! The forwarder moves IP packets between the virtual interface and the
//! relay's local proxy port. It is consumed as a black box bound to a file
//! descriptor plus a config file; its forwarding algorithm is none of our
//! business.

use std::os::fd::RawFd;
use std::path::Path;

use async_trait::async_trait;

use crate::tun::InterfaceSpec;

/// Handle to the external packet forwarder.
///
/// `start` returns the forwarder's exit code; anything non-zero is a start
/// failure. `stop` is always safe to call, including when nothing was
/// started, and implementations log their own failures.
#[async_trait]
pub trait TunnelProcess: Send + Sync {
    async fn start(&self, config_path: &Path, fd: RawFd) -> i32;

    async fn stop(&self);
}

/// Render the forwarder configuration.
///
/// `tunnel.*` must match the interface the descriptor belongs to, and
/// `socks5.*` points at the relay's local proxy port. The mapdns block
/// rewrites DNS answers into a virtual range so hostnames can be recovered
/// when opening outbound connections through the relay.
pub fn render_config(spec: &InterfaceSpec, socks_port: u16) -> String {
    format!(
        "\
tunnel:
  mtu: {mtu}
  ipv4: {ipv4}
  ipv6: '{ipv6}'
socks5:
  port: {port}
  address: '127.0.0.1'
  udp: 'tcp'
mapdns:
  address: {dns}
  port: 53
  network: 240.0.0.0
  netmask: 240.0.0.0
  cache-size: 10000
misc:
  task-stack-size: 81920
  log-level: debug
",
        mtu = spec.mtu,
        ipv4 = spec.ipv4,
        ipv6 = spec.ipv6,
        port = socks_port,
        dns = spec.dns,
    )
}
