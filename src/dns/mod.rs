//! C1 — DNS resolver used to bootstrap the subscription host.
//!
//! Grounded on `examples/original_source/proxyprovider/dns.go` (scheme dispatch,
//! default ports, literal-IP-only host requirement) and on the teacher's
//! `crates/agentgateway/src/client/dns.rs` (wrapping `hickory_resolver::TokioResolver`
//! behind a small async-friendly type). Unlike the teacher's resolver, which resolves
//! generic outbound traffic and caches results, this one exists only to resolve the
//! subscription host itself: it is a single one-shot `query`, never recurses through a
//! domain-name descriptor (see `DnsError::InvalidDnsAddress`), and does no caching.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use hickory_resolver::TokioResolver;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;

const DEFAULT_DNS: &str = "223.5.5.5:53";
const QUERY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(thiserror::Error, Debug)]
pub enum DnsError {
	#[error("invalid dns address: {0}")]
	InvalidDnsAddress(String),
	#[error("no address found for {0}")]
	NoAddress(String),
	#[error("dns query timed out after {0:?}")]
	Timeout(Duration),
}

/// A one-shot resolver bound to a single upstream transport, built from a descriptor
/// string of the shape documented in `spec.md` §4.1.
#[derive(Debug, Clone)]
pub struct Resolver {
	inner: std::sync::Arc<TokioResolver>,
}

impl Resolver {
	/// Parses a descriptor string and builds the resolver. Does not perform any I/O.
	pub fn new(descriptor: &str) -> Result<Self, DnsError> {
		let (proto, rest) = split_scheme(descriptor);
		let (host_port, default_port) = match proto {
			Proto::Udp => (rest, 53),
			Proto::Tcp => (rest, 53),
			Proto::Tls => (rest, 853),
			Proto::Https => (rest, 443),
			Proto::H3 => (rest, 443),
			Proto::Quic => (rest, 784),
		};

		let (host, port) = split_host_port(host_port, default_port, descriptor)?;
		let ip: IpAddr = host
			.parse()
			.map_err(|_| DnsError::InvalidDnsAddress(descriptor.to_string()))?;
		let sock = SocketAddr::new(ip, port);

		let mut cfg = ResolverConfig::new();
		let mut ns = NameServerConfig::new(sock, xfer_protocol(proto));
		match proto {
			Proto::Tls => {
				ns.tls_dns_name = Some(host.to_string());
			},
			Proto::Https | Proto::H3 => {
				ns.tls_dns_name = Some(host.to_string());
				ns.http_endpoint = Some(
					rest
						.split_once('/')
						.map(|(_, path)| format!("/{path}"))
						.unwrap_or_else(|| "/dns-query".to_string()),
				);
			},
			_ => {},
		}
		cfg.add_name_server(ns);

		let mut opts = ResolverOpts::default();
		opts.timeout = QUERY_TIMEOUT;
		opts.attempts = 1;

		let mut builder =
			hickory_resolver::Resolver::builder_with_config(cfg, TokioConnectionProvider::default());
		*builder.options_mut() = opts;
		Ok(Self {
			inner: std::sync::Arc::new(builder.build()),
		})
	}

	/// Default resolver: plain UDP to `223.5.5.5:53`.
	pub fn default_resolver() -> Self {
		Self::new(DEFAULT_DNS).expect("default descriptor is always valid")
	}

	/// Fires A and AAAA lookups in parallel (`spec.md` §4.1/§5: "two sibling tasks,
	/// joined by a rendezvous channel; either can fail independently"), returning the
	/// union of positive answers. Fails with `NoAddress` only if both sub-queries fail
	/// or return empty.
	pub async fn query(&self, name: &str) -> Result<Vec<IpAddr>, DnsError> {
		// A literal IP needs no query at all.
		if let Ok(ip) = IpAddr::from_str(name) {
			return Ok(vec![ip]);
		}

		let resolver_v4 = self.inner.clone();
		let resolver_v6 = self.inner.clone();
		let name_v4 = name.to_string();
		let name_v6 = name.to_string();

		let (v4, v6) = tokio::join!(
			tokio::time::timeout(QUERY_TIMEOUT, async move {
				resolver_v4
					.ipv4_lookup(name_v4)
					.await
					.map(|r| r.iter().map(|a| IpAddr::V4(a.0)).collect::<Vec<_>>())
			}),
			tokio::time::timeout(QUERY_TIMEOUT, async move {
				resolver_v6
					.ipv6_lookup(name_v6)
					.await
					.map(|r| r.iter().map(|a| IpAddr::V6(a.0)).collect::<Vec<_>>())
			})
		);

		let v4_timed_out = v4.is_err();
		let v6_timed_out = v6.is_err();

		let mut addrs = Vec::new();
		if let Ok(Ok(a)) = v4 {
			addrs.extend(a);
		}
		if let Ok(Ok(a)) = v6 {
			addrs.extend(a);
		}
		if addrs.is_empty() {
			if v4_timed_out && v6_timed_out {
				return Err(DnsError::Timeout(QUERY_TIMEOUT));
			}
			return Err(DnsError::NoAddress(name.to_string()));
		}
		Ok(addrs)
	}
}

#[derive(Debug, Clone, Copy)]
enum Proto {
	Udp,
	Tcp,
	Tls,
	Https,
	H3,
	Quic,
}

fn xfer_protocol(p: Proto) -> Protocol {
	match p {
		Proto::Udp => Protocol::Udp,
		Proto::Tcp => Protocol::Tcp,
		Proto::Tls => Protocol::Tls,
		Proto::Https => Protocol::Https,
		Proto::H3 => Protocol::H3,
		Proto::Quic => Protocol::Quic,
	}
}

fn split_scheme(descriptor: &str) -> (Proto, &str) {
	for (prefix, proto) in [
		("udp://", Proto::Udp),
		("tcp://", Proto::Tcp),
		("tls://", Proto::Tls),
		("https://", Proto::Https),
		("h3://", Proto::H3),
		("quic://", Proto::Quic),
	] {
		if let Some(rest) = descriptor.strip_prefix(prefix) {
			return (proto, rest);
		}
	}
	if descriptor.is_empty() {
		return (Proto::Udp, DEFAULT_DNS);
	}
	// Bare `host` or `host:port` defaults to UDP.
	(Proto::Udp, descriptor)
}

fn split_host_port<'a>(
	host_port: &'a str,
	default_port: u16,
	original: &str,
) -> Result<(&'a str, u16), DnsError> {
	let trimmed = host_port.split('/').next().unwrap_or(host_port);
	if let Some(bracket_end) = trimmed.strip_prefix('[').and_then(|s| s.find(']')) {
		let host = &trimmed[1..=bracket_end];
		let rest = &trimmed[bracket_end + 2..];
		let port = if let Some(p) = rest.strip_prefix(':') {
			p
				.parse()
				.map_err(|_| DnsError::InvalidDnsAddress(original.to_string()))?
		} else {
			default_port
		};
		return Ok((host, port));
	}
	match trimmed.rsplit_once(':') {
		Some((host, port_str)) if !host.is_empty() && port_str.parse::<u16>().is_ok() => {
			Ok((host, port_str.parse().unwrap()))
		},
		_ => {
			if trimmed.is_empty() {
				return Err(DnsError::InvalidDnsAddress(original.to_string()));
			}
			Ok((trimmed, default_port))
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_descriptor() {
		let (proto, rest) = split_scheme("");
		assert!(matches!(proto, Proto::Udp));
		assert_eq!(rest, DEFAULT_DNS);
	}

	#[test]
	fn scheme_dispatch_and_default_ports() {
		assert_eq!(split_scheme("udp://1.1.1.1").1, "1.1.1.1");
		let (p, _) = split_scheme("tls://1.1.1.1");
		assert!(matches!(p, Proto::Tls));
		let (h, port) = split_host_port("1.1.1.1", 853, "tls://1.1.1.1").unwrap();
		assert_eq!(h, "1.1.1.1");
		assert_eq!(port, 853);
	}

	#[test]
	fn explicit_port_overrides_default() {
		let (h, port) = split_host_port("9.9.9.9:5353", 53, "udp://9.9.9.9:5353").unwrap();
		assert_eq!(h, "9.9.9.9");
		assert_eq!(port, 5353);
	}

	#[test]
	fn bracketed_ipv6() {
		let (h, port) = split_host_port("[2001:4860:4860::8888]:53", 53, "").unwrap();
		assert_eq!(h, "2001:4860:4860::8888");
		assert_eq!(port, 53);
	}

	#[test]
	fn hostname_is_rejected() {
		let err = Resolver::new("udp://dns.google").unwrap_err();
		assert!(matches!(err, DnsError::InvalidDnsAddress(_)));
	}

	#[test]
	fn literal_ip_descriptor_builds() {
		Resolver::new("udp://1.1.1.1:53").expect("literal ip should build");
		Resolver::new("1.1.1.1").expect("bare literal ip should build");
		Resolver::default_resolver();
	}

	#[tokio::test]
	async fn query_literal_ip_short_circuits() {
		let r = Resolver::default_resolver();
		let addrs = r.query("127.0.0.1").await.unwrap();
		assert_eq!(addrs, vec![IpAddr::from_str("127.0.0.1").unwrap()]);
	}
}
