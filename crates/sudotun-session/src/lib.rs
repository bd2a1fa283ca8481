//! sudotun-session - Session Lifecycle Controller
//!
//! Owns the one tunnel session a process may hold: the relay process, the
//! virtual network interface, and the packet forwarder bound to it.
//!
//! # Architecture
//!
//! ```text
//!  intents (start / stop / switch)
//!          │
//!          ▼
//!  ┌───────────────────┐   config JSON   ┌───────────────┐
//!  │ SessionController │ ──────────────▶ │ RelayProcess  │──▶ remote relay
//!  │  (command actor)  │                 └───────┬───────┘
//!  └───────┬───────────┘                         │ local proxy port
//!          │ owns fd                             ▼
//!  ┌───────▼───────┐     bound to fd    ┌───────────────┐
//!  │  TunDevice    │ ◀───────────────── │ TunnelProcess │
//!  │ (virtual if.) │                    └───────────────┘
//!  └───────────────┘
//! ```
//!
//! The controller publishes a running-state observable and, while running,
//! one traffic reading per second. Everything long-running happens on the
//! actor task; callers are never blocked beyond awaiting their own intent.

mod controller;
mod monitor;
mod store;
mod tun;
mod tunnel;

pub use controller::{
    SessionConfig, SessionController, SessionDeps, SessionError, SessionPhase, SessionStatus,
};
pub use monitor::{TrafficReading, format_bytes, format_summary};
pub use store::{FileStore, MemoryStore, NodeStore, StoreError};
pub use tun::{
    FdTunDevice, InterfaceError, InterfaceSpec, TUN_IPV4, TUN_IPV6, TUN_MTU, TunDevice,
    TunProvider, VIRTUAL_DNS,
};
pub use tunnel::{TunnelProcess, render_config};
