//! C6 — outbound-config translator.
//!
//! Grounded on `examples/original_source/proxyprovider/proxy/{shadowsocks,shadowsocksr,
//! shadowsocksr_builtin,http,socks,trojan,vless}.go`'s `GenerateOptions` methods. The
//! upstream `Outbound` schema (sing-box's `option.Outbound`) is an external collaborator
//! this crate never depends on (§9: "the provider emits configuration, the registry
//! builds the actual outbound") — the structs below are this crate's own serializable
//! stand-in for "the subset of fields the translator writes" (§3).

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::RequestDialerOptions;
use crate::proxy_model::{
	ClashProxy, GrpcOptions as ClashGrpcOptions, Http2TransportOptions, HttpTransportOptions,
	RealityOptions as ClashRealityOptions, WsOptions,
};

#[derive(thiserror::Error, Debug)]
pub enum TranslateError {
	#[error("shadowsocks cipher {0:?} is not supported in this build")]
	UnsupportedCipher(String),
	#[error("shadowsocks plugin {0:?} is not supported")]
	UnsupportedPlugin(String),
	#[error("socks5 over tls is not supported")]
	UnsupportedSocksTls,
	#[error("{0} is not included in this build")]
	FeatureDisabled(&'static str),
	#[error("trojan flow is not supported")]
	UnsupportedTrojanFlow,
	#[error(transparent)]
	InvalidPort(#[from] crate::proxy_model::DecodeError),
}

/// Dialer options applied to every outbound this provider emits, per the provider's
/// `dialer` configuration block (distinct from C2's `request_dialer`, which only
/// applies to the subscription fetch itself). Also doubles as that block's JSON
/// deserialization target; `domain_strategy` is never user-configured here, it's filled
/// in per-proxy from the clash `ip-version` field (§4.6), so it's excluded from input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialerOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bind_interface: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub inet4_bind_address: Option<Ipv4Addr>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub inet6_bind_address: Option<Ipv6Addr>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub routing_mark: Option<u32>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub reuse_addr: bool,
	#[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "duration_serde::deserialize")]
	pub connect_timeout: Option<Duration>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub tcp_fast_open: bool,
	#[serde(skip, default)]
	pub domain_strategy: Option<DomainStrategy>,
}

/// Human-readable duration strings (`"20s"`, `"2h"`) in provider config, via the same
/// crate the teacher uses for duration parsing.
pub(crate) mod duration_serde {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer};

	pub fn deserialize<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw: Option<String> = Option::deserialize(d)?;
		match raw {
			None => Ok(None),
			Some(s) if s.is_empty() => Ok(None),
			Some(s) => duration_str::parse(&s).map(Some).map_err(serde::de::Error::custom),
		}
	}
}

impl From<&RequestDialerOptions> for DialerOptions {
	fn from(o: &RequestDialerOptions) -> Self {
		Self {
			bind_interface: o.bind_interface.clone(),
			inet4_bind_address: o.inet4_bind_address,
			inet6_bind_address: o.inet6_bind_address,
			routing_mark: o.routing_mark,
			reuse_addr: o.reuse_addr,
			connect_timeout: o.connect_timeout,
			tcp_fast_open: o.tcp_fast_open,
			domain_strategy: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainStrategy {
	UseIpv4,
	UseIpv6,
	PreferIpv4,
	PreferIpv6,
}

/// `""`/`dual` → `None`; everything else maps straight across (§4.6).
fn domain_strategy(ip_version: Option<&str>) -> Option<DomainStrategy> {
	match ip_version.unwrap_or("") {
		"" | "dual" => None,
		"ipv4" => Some(DomainStrategy::UseIpv4),
		"ipv6" => Some(DomainStrategy::UseIpv6),
		"ipv4-prefer" => Some(DomainStrategy::PreferIpv4),
		"ipv6-prefer" => Some(DomainStrategy::PreferIpv6),
		_ => None,
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	Tcp,
	Udp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOptions {
	pub server: String,
	pub server_port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct UtlsOptions {
	pub enabled: bool,
	pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RealityOptions {
	pub enabled: bool,
	pub public_key: String,
	pub short_id: String,
}

impl From<&ClashRealityOptions> for RealityOptions {
	fn from(o: &ClashRealityOptions) -> Self {
		Self { enabled: o.enabled, public_key: o.public_key.clone(), short_id: o.short_id.clone() }
	}
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TlsOptions {
	pub enabled: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub server_name: Option<String>,
	#[serde(skip_serializing_if = "std::ops::Not::not")]
	pub insecure: bool,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub alpn: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub utls: Option<UtlsOptions>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reality: Option<RealityOptions>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportOptions {
	Websocket {
		path: String,
		headers: BTreeMap<String, String>,
		max_early_data: u32,
		early_data_header_name: String,
	},
	Http {
		method: String,
		path: Vec<String>,
		headers: BTreeMap<String, Vec<String>>,
	},
	#[serde(rename = "http")]
	Http2 {
		host: Vec<String>,
		path: String,
	},
	Grpc {
		service_name: String,
	},
}

fn ws_transport(opts: Option<&WsOptions>, default_host: &str) -> TransportOptions {
	let opts = opts.cloned().unwrap_or_default();
	let mut headers: BTreeMap<String, String> =
		opts.headers.into_iter().map(|(k, v)| (k.to_ascii_lowercase(), v)).collect();
	headers.entry("host".to_string()).or_insert_with(|| default_host.to_string());
	TransportOptions::Websocket {
		path: opts.path,
		headers,
		max_early_data: opts.max_early_data,
		early_data_header_name: opts.early_data_header_name,
	}
}

fn http_transport(opts: Option<&HttpTransportOptions>) -> TransportOptions {
	let opts = opts.cloned().unwrap_or_default();
	TransportOptions::Http { method: opts.method, path: opts.path, headers: opts.headers.into_iter().collect() }
}

fn http2_transport(opts: Option<&Http2TransportOptions>) -> TransportOptions {
	let opts = opts.cloned().unwrap_or_default();
	TransportOptions::Http2 { host: opts.host, path: opts.path }
}

fn grpc_transport(opts: Option<&ClashGrpcOptions>) -> TransportOptions {
	TransportOptions::Grpc { service_name: opts.map(|o| o.service_name.clone()).unwrap_or_default() }
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpOutbound {
	pub tag: String,
	#[serde(flatten)]
	pub server: ServerOptions,
	pub username: String,
	pub password: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tls: Option<TlsOptions>,
	pub dialer: DialerOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct SocksOutbound {
	pub tag: String,
	#[serde(flatten)]
	pub server: ServerOptions,
	pub username: String,
	pub password: String,
	pub version: &'static str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub network: Option<Network>,
	pub dialer: DialerOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct UdpOverTcpOptions {
	pub enabled: bool,
	pub version: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShadowsocksOutbound {
	pub tag: String,
	#[serde(flatten)]
	pub server: ServerOptions,
	pub method: String,
	pub password: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub network: Option<Network>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub plugin: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub plugin_opts: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub udp_over_tcp: Option<UdpOverTcpOptions>,
	pub dialer: DialerOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShadowsocksROutbound {
	pub tag: String,
	#[serde(flatten)]
	pub server: ServerOptions,
	pub method: String,
	pub password: String,
	pub obfs: String,
	pub obfs_param: String,
	pub protocol: String,
	pub protocol_param: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub network: Option<Network>,
	pub dialer: DialerOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct VMessOutbound {
	pub tag: String,
	#[serde(flatten)]
	pub server: ServerOptions,
	pub uuid: String,
	pub alter_id: u32,
	pub security: String,
	pub global_padding: bool,
	pub authenticated_length: bool,
	pub packet_encoding: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub network: Option<Network>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tls: Option<TlsOptions>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transport: Option<TransportOptions>,
	pub dialer: DialerOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct VlessOutbound {
	pub tag: String,
	#[serde(flatten)]
	pub server: ServerOptions,
	pub uuid: String,
	pub flow: String,
	pub packet_encoding: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub network: Option<Network>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tls: Option<TlsOptions>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transport: Option<TransportOptions>,
	pub dialer: DialerOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrojanOutbound {
	pub tag: String,
	#[serde(flatten)]
	pub server: ServerOptions,
	pub password: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub network: Option<Network>,
	pub tls: TlsOptions,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub transport: Option<TransportOptions>,
	pub dialer: DialerOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
	Http(HttpOutbound),
	Socks(SocksOutbound),
	Shadowsocks(ShadowsocksOutbound),
	Shadowsocksr(ShadowsocksROutbound),
	Vmess(VMessOutbound),
	Vless(VlessOutbound),
	Trojan(TrojanOutbound),
	Selector(crate::group::SelectorOutbound),
	Urltest(crate::group::UrlTestOutbound),
}

impl Outbound {
	pub fn tag(&self) -> &str {
		match self {
			Outbound::Http(o) => &o.tag,
			Outbound::Socks(o) => &o.tag,
			Outbound::Shadowsocks(o) => &o.tag,
			Outbound::Shadowsocksr(o) => &o.tag,
			Outbound::Vmess(o) => &o.tag,
			Outbound::Vless(o) => &o.tag,
			Outbound::Trojan(o) => &o.tag,
			Outbound::Selector(o) => &o.tag,
			Outbound::Urltest(o) => &o.tag,
		}
	}

	pub fn set_tag(&mut self, tag: String) {
		match self {
			Outbound::Http(o) => o.tag = tag,
			Outbound::Socks(o) => o.tag = tag,
			Outbound::Shadowsocks(o) => o.tag = tag,
			Outbound::Shadowsocksr(o) => o.tag = tag,
			Outbound::Vmess(o) => o.tag = tag,
			Outbound::Vless(o) => o.tag = tag,
			Outbound::Trojan(o) => o.tag = tag,
			Outbound::Selector(o) => o.tag = tag,
			Outbound::Urltest(o) => o.tag = tag,
		}
	}
}

const SHADOWSOCKS_CIPHERS: &[&str] = &[
	"aes-128-gcm",
	"aes-192-gcm",
	"aes-256-gcm",
	"aes-128-cfb",
	"aes-192-cfb",
	"aes-256-cfb",
	"aes-128-ctr",
	"aes-192-ctr",
	"aes-256-ctr",
	"rc4-md5",
	"chacha20-ietf",
	"xchacha20",
	"chacha20-ietf-poly1305",
	"xchacha20-ietf-poly1305",
	"2022-blake3-aes-128-gcm",
	"2022-blake3-aes-256-gcm",
	"2022-blake3-chacha20-poly1305",
];

/// Canonical plugin-argument string for `obfs-local`: `k=v;k=v`, keys sorted, `;`/`=`
/// backslash-escaped (§4.6).
fn encode_plugin_opts(pairs: &[(&str, &str)]) -> String {
	let mut sorted = pairs.to_vec();
	sorted.sort_by_key(|(k, _)| *k);
	sorted
		.into_iter()
		.map(|(k, v)| format!("{}={}", escape_plugin_value(k), escape_plugin_value(v)))
		.collect::<Vec<_>>()
		.join(";")
}

fn escape_plugin_value(v: &str) -> String {
	v.replace('\\', "\\\\").replace(';', "\\;").replace('=', "\\=")
}

/// Capability flags a build chooses to compile in; mirrors `GetTag("with_utls")` /
/// `with_shadowsocksr` build tags (§7 `FeatureDisabled`).
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
	pub utls: bool,
	pub shadowsocksr: bool,
}

impl Default for Capabilities {
	fn default() -> Self {
		Self {
			utls: cfg!(feature = "utls"),
			shadowsocksr: cfg!(feature = "shadowsocksr"),
		}
	}
}

/// Translates one parsed proxy into exactly one outbound configuration (§4.6). `tag` is
/// the already-resolved tag (name, host:port, or provider-index fallback — computed by
/// the caller, since that fallback needs the provider's own tag).
pub fn translate(
	proxy: &ClashProxy,
	tag: String,
	dialer: &DialerOptions,
	caps: Capabilities,
) -> Result<Outbound, TranslateError> {
	match proxy {
		ClashProxy::Http(o) => {
			let server = ServerOptions { server: o.default.server.clone(), server_port: o.default.server_port.as_u16()? };
			let mut dialer = dialer.clone();
			dialer.domain_strategy = domain_strategy(o.default.ip_version.as_deref());

			let tls = if o.tls {
				let mut utls = None;
				if !o.fingerprint.is_empty() {
					if !caps.utls {
						return Err(TranslateError::FeatureDisabled("uTLS"));
					}
					utls = Some(UtlsOptions { enabled: true, fingerprint: o.fingerprint.clone() });
				}
				Some(TlsOptions {
					enabled: true,
					server_name: if !o.server_name.is_empty() { Some(o.server_name.clone()) } else { None },
					insecure: o.skip_cert_verify,
					alpn: Vec::new(),
					utls,
					reality: None,
				})
			} else {
				None
			};

			Ok(Outbound::Http(HttpOutbound {
				tag,
				server,
				username: o.username.clone(),
				password: o.password.clone(),
				tls,
				dialer,
			}))
		},

		ClashProxy::Socks(o) => {
			if o.tls {
				return Err(TranslateError::UnsupportedSocksTls);
			}
			let server = ServerOptions { server: o.default.server.clone(), server_port: o.default.server_port.as_u16()? };
			let mut dialer = dialer.clone();
			dialer.domain_strategy = domain_strategy(o.default.ip_version.as_deref());
			Ok(Outbound::Socks(SocksOutbound {
				tag,
				server,
				username: o.username.clone(),
				password: o.password.clone(),
				version: "5",
				network: if !o.udp { Some(Network::Tcp) } else { None },
				dialer,
			}))
		},

		ClashProxy::Shadowsocks(o) => {
			if !SHADOWSOCKS_CIPHERS.contains(&o.cipher.as_str()) {
				return Err(TranslateError::UnsupportedCipher(o.cipher.clone()));
			}
			let server = ServerOptions { server: o.default.server.clone(), server_port: o.default.server_port.as_u16()? };
			let mut dialer = dialer.clone();
			dialer.domain_strategy = domain_strategy(o.default.ip_version.as_deref());

			let (plugin, plugin_opts) = match o.plugin.as_str() {
				"" => (None, None),
				"obfs" => {
					let opts = o.plugin_opts.clone().unwrap_or_default();
					let encoded =
						encode_plugin_opts(&[("mode", opts.mode.as_str()), ("host", opts.host.as_str())]);
					(Some("obfs-local".to_string()), Some(encoded))
				},
				"v2ray-plugin" => return Err(TranslateError::UnsupportedPlugin(o.plugin.clone())),
				other => return Err(TranslateError::UnsupportedPlugin(other.to_string())),
			};

			Ok(Outbound::Shadowsocks(ShadowsocksOutbound {
				tag,
				server,
				method: o.cipher.clone(),
				password: o.password.clone(),
				network: if !o.udp { Some(Network::Tcp) } else { None },
				plugin,
				plugin_opts,
				udp_over_tcp: if o.udp_over_tcp { Some(UdpOverTcpOptions { enabled: true, version: 1 }) } else { None },
				dialer,
			}))
		},

		ClashProxy::ShadowsocksR(o) => {
			if !caps.shadowsocksr {
				return Err(TranslateError::FeatureDisabled("ShadowsocksR"));
			}
			let server = ServerOptions { server: o.default.server.clone(), server_port: o.default.server_port.as_u16()? };
			let mut dialer = dialer.clone();
			dialer.domain_strategy = domain_strategy(o.default.ip_version.as_deref());

			let obfs_param = if !o.obfs_param.is_empty() { o.obfs_param.clone() } else { o.obfs_param_old.clone() };
			let protocol_param =
				if !o.protocol_param.is_empty() { o.protocol_param.clone() } else { o.protocol_param_old.clone() };

			Ok(Outbound::Shadowsocksr(ShadowsocksROutbound {
				tag,
				server,
				method: o.cipher.clone(),
				password: o.password.clone(),
				obfs: o.obfs.clone(),
				obfs_param,
				protocol: o.protocol.clone(),
				protocol_param,
				network: if o.udp == Some(false) { Some(Network::Tcp) } else { None },
				dialer,
			}))
		},

		ClashProxy::Trojan(o) => {
			if !o.flow.is_empty() || o.flow_show {
				return Err(TranslateError::UnsupportedTrojanFlow);
			}
			let server = ServerOptions { server: o.default.server.clone(), server_port: o.default.server_port.as_u16()? };
			let mut dialer = dialer.clone();
			dialer.domain_strategy = domain_strategy(o.default.ip_version.as_deref());

			let mut tls = TlsOptions {
				enabled: true,
				server_name: Some(o.default.server.clone()),
				insecure: o.skip_cert_verify,
				alpn: o.alpn.clone(),
				utls: None,
				reality: o.reality_options.as_ref().map(RealityOptions::from),
			};
			if !o.server_name.is_empty() {
				tls.server_name = Some(o.server_name.clone());
			}
			if !o.client_fingerprint.is_empty() {
				if !caps.utls {
					return Err(TranslateError::FeatureDisabled("uTLS"));
				}
				tls.utls = Some(UtlsOptions { enabled: true, fingerprint: o.client_fingerprint.clone() });
			}

			let transport = match o.network.as_str() {
				"ws" => Some(ws_transport(o.ws_options.as_ref(), tls.server_name.as_deref().unwrap_or(""))),
				"grpc" => Some(grpc_transport(o.grpc_options.as_ref())),
				_ => None,
			};

			Ok(Outbound::Trojan(TrojanOutbound {
				tag,
				server,
				password: o.password.clone(),
				network: if o.udp == Some(false) { Some(Network::Tcp) } else { None },
				tls,
				transport,
				dialer,
			}))
		},

		ClashProxy::Vless(o) => {
			let server = ServerOptions { server: o.default.server.clone(), server_port: o.default.server_port.as_u16()? };
			let mut dialer = dialer.clone();
			dialer.domain_strategy = domain_strategy(o.default.ip_version.as_deref());

			let is_h2 = o.network == "h2";
			let tls = if o.tls || is_h2 {
				let mut utls = None;
				if !o.client_fingerprint.is_empty() {
					if !caps.utls {
						return Err(TranslateError::FeatureDisabled("uTLS"));
					}
					utls = Some(UtlsOptions { enabled: true, fingerprint: o.client_fingerprint.clone() });
				}
				let server_name = if !o.server_name.is_empty() { o.server_name.clone() } else { o.default.server.clone() };
				Some(TlsOptions {
					enabled: true,
					server_name: Some(server_name),
					insecure: o.skip_cert_verify,
					alpn: if is_h2 { vec!["h2".to_string()] } else { Vec::new() },
					utls,
					reality: o.reality_options.as_ref().map(RealityOptions::from),
				})
			} else {
				None
			};

			let transport = match o.network.as_str() {
				"ws" => Some(ws_transport(o.ws_options.as_ref(), o.default.server.as_str())),
				"http" => Some(http_transport(o.http_options.as_ref())),
				"h2" => {
					if o.http2_options.is_none() {
						return Err(TranslateError::FeatureDisabled("h2-opts"));
					}
					Some(http2_transport(o.http2_options.as_ref()))
				},
				"grpc" => Some(grpc_transport(o.grpc_options.as_ref())),
				_ => None,
			};

			Ok(Outbound::Vless(VlessOutbound {
				tag,
				server,
				uuid: o.uuid.clone(),
				flow: o.flow.clone(),
				packet_encoding: o.packet_encoding.clone(),
				network: if !o.udp { Some(Network::Tcp) } else { None },
				tls,
				transport,
				dialer,
			}))
		},

		ClashProxy::VMess(o) => {
			let server = ServerOptions { server: o.default.server.clone(), server_port: o.default.server_port.as_u16()? };
			let mut dialer = dialer.clone();
			dialer.domain_strategy = domain_strategy(o.default.ip_version.as_deref());

			let is_h2 = o.network == "h2";
			let tls = if o.tls || is_h2 {
				let mut utls = None;
				if !o.client_fingerprint.is_empty() {
					if !caps.utls {
						return Err(TranslateError::FeatureDisabled("uTLS"));
					}
					utls = Some(UtlsOptions { enabled: true, fingerprint: o.client_fingerprint.clone() });
				}
				let server_name = if !o.server_name.is_empty() { o.server_name.clone() } else { o.default.server.clone() };
				Some(TlsOptions {
					enabled: true,
					server_name: Some(server_name),
					insecure: o.skip_cert_verify,
					alpn: if is_h2 { vec!["h2".to_string()] } else { Vec::new() },
					utls,
					reality: o.reality_options.as_ref().map(RealityOptions::from),
				})
			} else {
				None
			};

			let transport = match o.network.as_str() {
				"ws" => Some(ws_transport(o.ws_options.as_ref(), o.default.server.as_str())),
				"http" => Some(http_transport(o.http_options.as_ref())),
				"h2" => {
					if o.http2_options.is_none() {
						return Err(TranslateError::FeatureDisabled("h2-opts"));
					}
					Some(http2_transport(o.http2_options.as_ref()))
				},
				"grpc" => Some(grpc_transport(o.grpc_options.as_ref())),
				_ => None,
			};

			Ok(Outbound::Vmess(VMessOutbound {
				tag,
				server,
				uuid: o.uuid.clone(),
				alter_id: o.alter_id,
				security: o.cipher.clone(),
				global_padding: o.global_padding,
				authenticated_length: o.authenticated_length,
				packet_encoding: o.packet_encoding.clone(),
				network: if !o.udp { Some(Network::Tcp) } else { None },
				tls,
				transport,
				dialer,
			}))
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::proxy_model::decode_clash_config;

	fn first_proxy(yaml: &str) -> ClashProxy {
		decode_clash_config(yaml.as_bytes()).unwrap().into_iter().next().unwrap()
	}

	#[test]
	fn shadowsocks_rejects_unsupported_cipher() {
		let proxy = first_proxy(
			"proxies:\n  - {name: A, type: ss, server: 1.2.3.4, port: 8388, cipher: rc4, password: p}\n",
		);
		let err = translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap_err();
		assert!(matches!(err, TranslateError::UnsupportedCipher(_)));
	}

	#[test]
	fn shadowsocks_tcp_only_when_udp_false() {
		let proxy = first_proxy(
			"proxies:\n  - {name: A, type: ss, server: 1.2.3.4, port: 8388, cipher: aes-256-gcm, password: p}\n",
		);
		let outbound =
			translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap();
		match outbound {
			Outbound::Shadowsocks(o) => assert_eq!(o.network, Some(Network::Tcp)),
			other => panic!("expected shadowsocks, got {other:?}"),
		}
	}

	#[test]
	fn shadowsocks_obfs_plugin_encodes_sorted_escaped_args() {
		let yaml = "proxies:\n  - {name: A, type: ss, server: 1.2.3.4, port: 8388, cipher: aes-256-gcm, password: p, plugin: obfs, plugin-opts: {mode: http, host: 'a;b=c'}}\n";
		let proxy = first_proxy(yaml);
		let outbound =
			translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap();
		match outbound {
			Outbound::Shadowsocks(o) => {
				assert_eq!(o.plugin.as_deref(), Some("obfs-local"));
				assert_eq!(o.plugin_opts.as_deref(), Some("host=a\\;b\\=c;mode=http"));
			},
			other => panic!("expected shadowsocks, got {other:?}"),
		}
	}

	#[test]
	fn shadowsocks_v2ray_plugin_is_unsupported() {
		let yaml = "proxies:\n  - {name: A, type: ss, server: 1.2.3.4, port: 8388, cipher: aes-256-gcm, password: p, plugin: v2ray-plugin}\n";
		let proxy = first_proxy(yaml);
		let err = translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap_err();
		assert!(matches!(err, TranslateError::UnsupportedPlugin(_)));
	}

	#[test]
	fn socks_over_tls_is_rejected() {
		let proxy =
			first_proxy("proxies:\n  - {name: A, type: socks5, server: 1.2.3.4, port: 1080, tls: true}\n");
		let err = translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap_err();
		assert!(matches!(err, TranslateError::UnsupportedSocksTls));
	}

	#[test]
	fn shadowsocksr_disabled_without_capability() {
		let proxy = first_proxy(
			"proxies:\n  - {name: A, type: ssr, server: 1.2.3.4, port: 8388, cipher: aes-256-cfb, password: p, obfs: plain, protocol: origin}\n",
		);
		let caps = Capabilities { shadowsocksr: false, utls: true };
		let err = translate(&proxy, "A".into(), &DialerOptions::default(), caps).unwrap_err();
		assert!(matches!(err, TranslateError::FeatureDisabled("ShadowsocksR")));
	}

	#[test]
	fn shadowsocksr_old_field_aliases_are_used_as_fallback() {
		let yaml = "proxies:\n  - {name: A, type: ssr, server: 1.2.3.4, port: 8388, cipher: aes-256-cfb, password: p, obfs: plain, protocol: origin, obfsparam: oldobfs, protocolparam: oldproto}\n";
		let proxy = first_proxy(yaml);
		let outbound =
			translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap();
		match outbound {
			Outbound::Shadowsocksr(o) => {
				assert_eq!(o.obfs_param, "oldobfs");
				assert_eq!(o.protocol_param, "oldproto");
			},
			other => panic!("expected shadowsocksr, got {other:?}"),
		}
	}

	#[test]
	fn trojan_ws_defaults_host_header_to_server_name() {
		let yaml = "proxies:\n  - {name: A, type: trojan, server: example.com, port: 443, password: p, network: ws}\n";
		let proxy = first_proxy(yaml);
		let outbound =
			translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap();
		match outbound {
			Outbound::Trojan(o) => match o.transport {
				Some(TransportOptions::Websocket { headers, .. }) => {
					assert_eq!(headers.get("host").map(String::as_str), Some("example.com"));
				},
				other => panic!("expected websocket transport, got {other:?}"),
			},
			other => panic!("expected trojan, got {other:?}"),
		}
	}

	#[test]
	fn trojan_flow_is_unsupported() {
		let yaml =
			"proxies:\n  - {name: A, type: trojan, server: example.com, port: 443, password: p, flow: xtls-rprx-vision}\n";
		let proxy = first_proxy(yaml);
		let err = translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap_err();
		assert!(matches!(err, TranslateError::UnsupportedTrojanFlow));
	}

	#[test]
	fn vless_h2_requires_h2_opts() {
		let yaml = "proxies:\n  - {name: A, type: vless, server: example.com, port: 443, uuid: u, network: h2}\n";
		let proxy = first_proxy(yaml);
		let err = translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap_err();
		assert!(matches!(err, TranslateError::FeatureDisabled("h2-opts")));
	}

	#[test]
	fn vless_h2_always_emits_tls_with_h2_alpn() {
		let yaml = "proxies:\n  - {name: A, type: vless, server: example.com, port: 443, uuid: u, network: h2, tls: false, h2-opts: {host: [example.com]}}\n";
		let proxy = first_proxy(yaml);
		let outbound =
			translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap();
		match outbound {
			Outbound::Vless(o) => {
				let tls = o.tls.expect("h2 must force tls on");
				assert!(tls.enabled);
				assert_eq!(tls.alpn, vec!["h2".to_string()]);
			},
			other => panic!("expected vless, got {other:?}"),
		}
	}

	#[test]
	fn vmess_h2_always_emits_tls_with_h2_alpn() {
		let yaml = "proxies:\n  - {name: A, type: vmess, server: example.com, port: 443, uuid: u, alterId: 0, cipher: auto, network: h2, tls: false, h2-opts: {host: [example.com]}}\n";
		let proxy = first_proxy(yaml);
		let outbound =
			translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap();
		match outbound {
			Outbound::Vmess(o) => {
				let tls = o.tls.expect("h2 must force tls on");
				assert!(tls.enabled);
				assert_eq!(tls.alpn, vec!["h2".to_string()]);
			},
			other => panic!("expected vmess, got {other:?}"),
		}
	}

	#[test]
	fn client_fingerprint_requires_utls_capability() {
		let yaml = "proxies:\n  - {name: A, type: trojan, server: example.com, port: 443, password: p, client-fingerprint: chrome}\n";
		let proxy = first_proxy(yaml);
		let caps = Capabilities { utls: false, shadowsocksr: true };
		let err = translate(&proxy, "A".into(), &DialerOptions::default(), caps).unwrap_err();
		assert!(matches!(err, TranslateError::FeatureDisabled("uTLS")));
	}

	#[test]
	fn ip_version_dispatch_maps_to_domain_strategy() {
		let yaml =
			"proxies:\n  - {name: A, type: ss, server: 1.2.3.4, port: 8388, cipher: aes-256-gcm, password: p, ip-version: ipv6-prefer}\n";
		let proxy = first_proxy(yaml);
		let outbound =
			translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap();
		match outbound {
			Outbound::Shadowsocks(o) => {
				assert_eq!(o.dialer.domain_strategy, Some(DomainStrategy::PreferIpv6));
			},
			other => panic!("expected shadowsocks, got {other:?}"),
		}
	}

	#[test]
	fn ip_version_dual_is_unset() {
		let yaml =
			"proxies:\n  - {name: A, type: ss, server: 1.2.3.4, port: 8388, cipher: aes-256-gcm, password: p, ip-version: dual}\n";
		let proxy = first_proxy(yaml);
		let outbound =
			translate(&proxy, "A".into(), &DialerOptions::default(), Capabilities::default()).unwrap();
		match outbound {
			Outbound::Shadowsocks(o) => assert_eq!(o.dialer.domain_strategy, None),
			other => panic!("expected shadowsocks, got {other:?}"),
		}
	}
}
