//! `proxyprovider` — subscription-backed proxy provider and local dialer-forwarder.
//!
//! This crate implements the subsystem described in `SPEC_FULL.md`: downloading a
//! remote proxy subscription, translating it into outbound configurations, grouping
//! the result into selector/url-test policy groups, and caching it locally so the
//! owning router can cold-start without network. It also implements a standalone
//! loopback TCP/UDP forwarder used to bridge side-loaded proxy helper processes.
//!
//! The crate does not implement any proxy protocol client (HTTP-proxy, SOCKS5,
//! Shadowsocks, VMess, VLESS, Trojan, ShadowsocksR, ...). It only emits configuration
//! for them.

pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod fetch;
pub mod group;
pub mod net;
pub mod outbound;
pub mod provider;
pub mod proxy_model;
pub mod sideload;
pub mod telemetry;

pub use error::Error;
