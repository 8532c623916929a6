//! Provider configuration (§6), grounded on
//! `examples/original_source/option/proxyprovider.go`'s `ProxyProviderOptions` /
//! `ProxyProviderCustomGroupOptions` / `ProxyProviderRequestDialerOptions`. The original
//! is JSON with a couple of hand-rolled `UnmarshalJSON` methods for the custom-group
//! subtype dispatch (selector vs url_test); here that dispatch is a plain
//! `#[serde(tag = "type")]` enum, since `serde_json` supports internally-tagged enums
//! natively and the original's manual dispatch exists only because Go doesn't.

use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::group::{CustomGroup, GroupType, SelectorGroupOptions, UrlTestGroupOptions};
use crate::net::RequestDialerOptions as DialerRequestOptions;
use crate::outbound::{duration_serde, DialerOptions};
use crate::proxy_model::Filter;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
	#[error("config: missing tag")]
	MissingTag,
	#[error("config: missing url")]
	MissingUrl,
	#[error("config: unknown custom_group type {0:?}")]
	UnknownGroupType(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestDialerConfig {
	#[serde(default)]
	pub bind_interface: Option<String>,
	#[serde(default)]
	pub inet4_bind_address: Option<std::net::Ipv4Addr>,
	#[serde(default)]
	pub inet6_bind_address: Option<std::net::Ipv6Addr>,
	#[serde(default)]
	pub routing_mark: Option<u32>,
	#[serde(default)]
	pub reuse_addr: bool,
	#[serde(default, deserialize_with = "duration_serde::deserialize")]
	pub connect_timeout: Option<Duration>,
	#[serde(default)]
	pub tcp_fast_open: bool,
	#[serde(default)]
	pub udp_fragment: Option<bool>,
}

impl From<&RequestDialerConfig> for DialerRequestOptions {
	fn from(c: &RequestDialerConfig) -> Self {
		Self {
			bind_interface: c.bind_interface.clone(),
			inet4_bind_address: c.inet4_bind_address,
			inet6_bind_address: c.inet6_bind_address,
			routing_mark: c.routing_mark,
			reuse_addr: c.reuse_addr,
			connect_timeout: c.connect_timeout,
			tcp_fast_open: c.tcp_fast_open,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomGroupConfig {
	Selector {
		tag: String,
		#[serde(default)]
		rule: Vec<crate::proxy_model::FilterRule>,
		#[serde(default)]
		white_mode: bool,
		#[serde(default)]
		default: Option<String>,
	},
	UrlTest {
		tag: String,
		#[serde(default)]
		rule: Vec<crate::proxy_model::FilterRule>,
		#[serde(default)]
		white_mode: bool,
		#[serde(default)]
		url: Option<String>,
		#[serde(default, deserialize_with = "duration_serde::deserialize")]
		interval: Option<Duration>,
		#[serde(default)]
		tolerance: Option<u32>,
	},
}

impl CustomGroupConfig {
	pub fn into_group(self) -> CustomGroup {
		match self {
			CustomGroupConfig::Selector { tag, rule, white_mode, default } => CustomGroup {
				tag,
				kind: GroupType::Selector,
				filter: Filter { rule, white_mode },
				selector: SelectorGroupOptions { default },
				url_test: UrlTestGroupOptions::default(),
			},
			CustomGroupConfig::UrlTest { tag, rule, white_mode, url, interval, tolerance } => CustomGroup {
				tag,
				kind: GroupType::UrlTest,
				filter: Filter { rule, white_mode },
				selector: SelectorGroupOptions::default(),
				url_test: UrlTestGroupOptions { url, interval, tolerance },
			},
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
	#[serde(default)]
	pub rule: Vec<crate::proxy_model::FilterRule>,
	#[serde(default)]
	pub white_mode: bool,
}

impl From<FilterConfig> for Filter {
	fn from(c: FilterConfig) -> Self {
		Filter { rule: c.rule, white_mode: c.white_mode }
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
	pub tag: String,
	pub url: String,
	#[serde(default)]
	pub cache_file: Option<String>,
	#[serde(default, deserialize_with = "duration_serde::deserialize")]
	pub force_update: Option<Duration>,
	#[serde(default)]
	pub http3: bool,
	#[serde(default, deserialize_with = "duration_serde::deserialize")]
	pub request_timeout: Option<Duration>,
	#[serde(default, rename = "ip")]
	pub request_ip: Option<IpAddr>,
	#[serde(default)]
	pub dns: Option<String>,
	#[serde(default)]
	pub tag_format: Option<String>,
	#[serde(default)]
	pub filter: FilterConfig,
	#[serde(default)]
	pub default_outbound: Option<String>,
	#[serde(default)]
	pub request_dialer: RequestDialerConfig,
	#[serde(default)]
	pub dialer: DialerOptions,
	#[serde(default)]
	pub custom_group: Vec<CustomGroupConfig>,
}

impl ProviderConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.tag.is_empty() {
			return Err(ConfigError::MissingTag);
		}
		if self.url.is_empty() {
			return Err(ConfigError::MissingUrl);
		}
		Ok(())
	}

	pub fn force_update(&self) -> Duration {
		self.force_update.unwrap_or(Duration::ZERO)
	}

	pub fn request_timeout(&self) -> Duration {
		self.request_timeout.unwrap_or(crate::fetch::DEFAULT_TIMEOUT)
	}

	pub fn dns_descriptor(&self) -> &str {
		self.dns.as_deref().unwrap_or("")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_missing_tag() {
		let json = r#"{"tag": "", "url": "https://example.com/sub"}"#;
		let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
		assert!(matches!(cfg.validate(), Err(ConfigError::MissingTag)));
	}

	#[test]
	fn rejects_missing_url() {
		let json = r#"{"tag": "p1", "url": ""}"#;
		let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
		assert!(matches!(cfg.validate(), Err(ConfigError::MissingUrl)));
	}

	#[test]
	fn parses_minimal_config() {
		let json = r#"{"tag": "p1", "url": "https://example.com/sub"}"#;
		let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
		cfg.validate().unwrap();
		assert_eq!(cfg.force_update(), Duration::ZERO);
		assert_eq!(cfg.request_timeout(), Duration::from_secs(20));
	}

	#[test]
	fn parses_duration_strings() {
		let json = r#"{"tag": "p1", "url": "https://example.com/sub", "force_update": "2h", "request_timeout": "30s"}"#;
		let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
		assert_eq!(cfg.force_update(), Duration::from_secs(2 * 3600));
		assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
	}

	#[test]
	fn parses_custom_group_dispatch() {
		let json = r#"{
			"tag": "p1", "url": "https://example.com/sub",
			"custom_group": [
				{"type": "selector", "tag": "G1", "default": "A"},
				{"type": "url_test", "tag": "G2", "url": "https://cp.cloudflare.com", "interval": "5m"}
			]
		}"#;
		let cfg: ProviderConfig = serde_json::from_str(json).unwrap();
		assert_eq!(cfg.custom_group.len(), 2);
		match &cfg.custom_group[0] {
			CustomGroupConfig::Selector { tag, default, .. } => {
				assert_eq!(tag, "G1");
				assert_eq!(default.as_deref(), Some("A"));
			},
			other => panic!("expected selector, got {other:?}"),
		}
	}

	#[test]
	fn unknown_custom_group_type_fails_to_parse() {
		let json = r#"{
			"tag": "p1", "url": "https://example.com/sub",
			"custom_group": [{"type": "bogus", "tag": "G1"}]
		}"#;
		assert!(serde_json::from_str::<ProviderConfig>(json).is_err());
	}
}
