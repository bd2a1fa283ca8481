//! Virtual network interface resource.
//!
//! The session owns exactly one TUN-style interface while running. It is
//! acquired through a [`TunProvider`] (the OS integration lives behind that
//! seam) and released by dropping the [`TunDevice`], which closes the
//! underlying descriptor.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use async_trait::async_trait;
use thiserror::Error;

/// Interface MTU. Mirrors the packet forwarder's defaults.
pub const TUN_MTU: u32 = 8500;

/// Private address the interface binds on the IPv4 side.
pub const TUN_IPV4: Ipv4Addr = Ipv4Addr::new(198, 18, 0, 1);

/// Private address the interface binds on the IPv6 side.
pub const TUN_IPV6: Ipv6Addr = Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 1);

/// Virtual resolver address; the forwarder rewrites DNS answers through it so
/// real resolution stays inside the tunnel.
pub const VIRTUAL_DNS: Ipv4Addr = Ipv4Addr::new(198, 18, 0, 2);

/// Parameters the interface is acquired with.
///
/// These are fixed for the life of a session; a node switch deliberately does
/// not touch the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    /// Session label shown by the OS.
    pub session_name: String,
    pub mtu: u32,
    pub ipv4: Ipv4Addr,
    pub ipv4_prefix: u8,
    pub ipv6: Ipv6Addr,
    pub ipv6_prefix: u8,
    /// Install the IPv4 default route.
    pub route_all_ipv4: bool,
    /// Install the IPv6 default route.
    pub route_all_ipv6: bool,
    pub dns: Ipv4Addr,
    /// Keep this process's own traffic out of the tunnel.
    pub exclude_self: bool,
}

impl Default for InterfaceSpec {
    fn default() -> Self {
        Self {
            session_name: "sudotun".to_string(),
            mtu: TUN_MTU,
            ipv4: TUN_IPV4,
            ipv4_prefix: 32,
            ipv6: TUN_IPV6,
            ipv6_prefix: 128,
            route_all_ipv4: true,
            route_all_ipv6: true,
            dns: VIRTUAL_DNS,
            exclude_self: true,
        }
    }
}

/// Interface acquisition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterfaceError {
    #[error("failed to establish the virtual interface: {0}")]
    Establish(String),

    #[error("tunneling permission not granted")]
    PermissionDenied,
}

/// An acquired interface. Dropping it closes the descriptor.
pub trait TunDevice: Send + Sync {
    /// Descriptor the packet forwarder binds to. The device keeps ownership;
    /// the forwarder must not close it.
    fn raw_fd(&self) -> RawFd;
}

/// Plain file-descriptor-backed device.
pub struct FdTunDevice {
    fd: OwnedFd,
}

impl FdTunDevice {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }
}

impl TunDevice for FdTunDevice {
    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Acquires the virtual interface from the OS.
#[async_trait]
pub trait TunProvider: Send + Sync {
    async fn open(&self, spec: &InterfaceSpec) -> Result<Box<dyn TunDevice>, InterfaceError>;
}
