//! C5 — YAML decoder & proxy model.
//!
//! Grounded on `examples/original_source/proxyprovider/proxy/clash.go`'s
//! `ProxyClashOptions.UnmarshalYAML`: decode a discriminator `{type}` first, then decode
//! the full node a second time into the variant-specific struct. `serde_yaml::Value`
//! plays the role of the original's closure-based two-pass `unmarshal` callback: the raw
//! node is kept around as a `Value` and handed to `serde_yaml::from_value` twice.

pub mod options;

use serde::{Deserialize, Deserializer};
use serde::de::Visitor;

pub use options::{
	ClashDefault, GrpcOptions, Http2TransportOptions, HttpOptions, HttpTransportOptions,
	PluginOpts, RealityOptions, ShadowsocksOptions, ShadowsocksROptions, SocksOptions,
	TrojanOptions, VMessOptions, VlessOptions, WsOptions,
};

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
	#[error("failed to parse subscription yaml: {0}")]
	Yaml(#[from] serde_yaml::Error),
	#[error("invalid port {0:?}")]
	InvalidPort(String),
}

/// A proxy's port, as written in YAML: either a bare integer or a quoted string. Stored
/// canonically as a string (§4.5) and parsed to `u16` only at translation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Port(pub String);

impl Port {
	pub fn as_u16(&self) -> Result<u16, DecodeError> {
		self.0.parse().map_err(|_| DecodeError::InvalidPort(self.0.clone()))
	}
}

impl std::fmt::Display for Port {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for Port {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		struct PortVisitor;

		impl<'de> Visitor<'de> for PortVisitor {
			type Value = Port;

			fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				f.write_str("a port number or a numeric string")
			}

			fn visit_u64<E>(self, v: u64) -> Result<Port, E> {
				Ok(Port(v.to_string()))
			}

			fn visit_i64<E>(self, v: i64) -> Result<Port, E> {
				Ok(Port(v.to_string()))
			}

			fn visit_str<E>(self, v: &str) -> Result<Port, E> {
				Ok(Port(v.to_string()))
			}

			fn visit_string<E>(self, v: String) -> Result<Port, E> {
				Ok(Port(v))
			}
		}

		deserializer.deserialize_any(PortVisitor)
	}
}

/// A `(pattern, kind-constraint)` rule: matches a proxy's tag and, if `kind` is set,
/// only proxies of that clash `type`.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterRule {
	#[serde(with = "serde_regex")]
	pub pattern: regex::Regex,
	#[serde(default)]
	pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Filter {
	#[serde(default)]
	pub rule: Vec<FilterRule>,
	#[serde(default)]
	pub white_mode: bool,
}

impl Filter {
	fn matches(&self, tag: &str, kind: &str) -> bool {
		self.rule
			.iter()
			.any(|r| (r.kind.is_none() || r.kind.as_deref() == Some(kind)) && r.pattern.is_match(tag))
	}

	/// `keep(p) := match(p.tag, p.type) == whitelist`; an absent/empty filter accepts
	/// everything (§4.5).
	pub fn keep(&self, tag: &str, kind: &str) -> bool {
		if self.rule.is_empty() {
			return true;
		}
		self.matches(tag, kind) == self.white_mode
	}
}

/// A single parsed proxy node, polymorphic over the supported variant set.
#[derive(Debug, Clone)]
pub enum ClashProxy {
	Http(HttpOptions),
	Socks(SocksOptions),
	Shadowsocks(ShadowsocksOptions),
	ShadowsocksR(ShadowsocksROptions),
	VMess(VMessOptions),
	Vless(VlessOptions),
	Trojan(TrojanOptions),
}

impl ClashProxy {
	pub fn common(&self) -> &ClashDefault {
		match self {
			ClashProxy::Http(o) => &o.default,
			ClashProxy::Socks(o) => &o.default,
			ClashProxy::Shadowsocks(o) => &o.default,
			ClashProxy::ShadowsocksR(o) => &o.default,
			ClashProxy::VMess(o) => &o.default,
			ClashProxy::Vless(o) => &o.default,
			ClashProxy::Trojan(o) => &o.default,
		}
	}

	pub fn kind(&self) -> &'static str {
		match self {
			ClashProxy::Http(_) => "http",
			ClashProxy::Socks(_) => "socks5",
			ClashProxy::Shadowsocks(_) => "ss",
			ClashProxy::ShadowsocksR(_) => "ssr",
			ClashProxy::VMess(_) => "vmess",
			ClashProxy::Vless(_) => "vless",
			ClashProxy::Trojan(_) => "trojan",
		}
	}

	/// `name`, falling back to `"{host}:{port}"` (§4.6 tag rule, minus the final
	/// `"{providerTag}-{index}"` fallback, which needs the provider's tag and is applied
	/// by the translator).
	pub fn tag_seed(&self) -> Option<String> {
		let c = self.common();
		if !c.name.is_empty() {
			return Some(c.name.clone());
		}
		if !c.server.is_empty() {
			return Some(format!("{}:{}", c.server, c.server_port));
		}
		None
	}
}

#[derive(Debug, Deserialize)]
struct TypeProbe {
	#[serde(rename = "type")]
	kind: String,
}

#[derive(Debug, Deserialize)]
struct RawClashConfig {
	#[serde(default)]
	proxies: Vec<serde_yaml::Value>,
}

fn decode_proxy(value: serde_yaml::Value) -> Result<Option<ClashProxy>, DecodeError> {
	let probe: TypeProbe = serde_yaml::from_value(value.clone())?;
	let proxy = match probe.kind.as_str() {
		"http" => ClashProxy::Http(serde_yaml::from_value(value)?),
		"socks5" => ClashProxy::Socks(serde_yaml::from_value(value)?),
		"ss" => ClashProxy::Shadowsocks(serde_yaml::from_value(value)?),
		"ssr" => ClashProxy::ShadowsocksR(serde_yaml::from_value(value)?),
		"vmess" => ClashProxy::VMess(serde_yaml::from_value(value)?),
		"vless" => ClashProxy::Vless(serde_yaml::from_value(value)?),
		"trojan" => ClashProxy::Trojan(serde_yaml::from_value(value)?),
		// Unknown type: dropped silently, no error (§4.5).
		_ => return Ok(None),
	};
	Ok(Some(proxy))
}

/// Parses `{proxies: [...]}` into the decoded proxy list, dropping unrecognized `type`
/// entries.
pub fn decode_clash_config(yaml: &[u8]) -> Result<Vec<ClashProxy>, DecodeError> {
	let config: RawClashConfig = serde_yaml::from_slice(yaml)?;
	let mut proxies = Vec::with_capacity(config.proxies.len());
	for value in config.proxies {
		if let Some(proxy) = decode_proxy(value)? {
			proxies.push(proxy);
		}
	}
	Ok(proxies)
}
