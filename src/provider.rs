//! C8 — provider lifecycle.
//!
//! Grounded on the update/publish discipline described in §4.8/§5 and on
//! `examples/original_source/proxyprovider/types.go`'s cache struct; no single upstream
//! file implements the orchestration (it's spread across the provider's methods in the
//! original package), so the shape here follows the spec's own pseudocode directly.
//! `arc_swap::ArcSwapOption` stands in for the original's `sync.RWMutex`-guarded field:
//! readers take a lock-free snapshot instead of a read lock, which is the idiomatic Rust
//! analogue of "atomic publish of parsed state" (§9).

use std::sync::Arc;
use std::time::SystemTime;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;

use crate::cache::{self, CachedSubscription};
use crate::config::ProviderConfig;
use crate::dns::Resolver;
use crate::fetch::{self, SubscribeInfo};
use crate::group::{self, CustomGroup};
use crate::net::Dialer;
use crate::outbound::{self, Capabilities, Outbound};
use crate::proxy_model::{decode_clash_config, Filter};
use crate::Error;

struct PublishedState {
	subscription: CachedSubscription,
	update_time: SystemTime,
	outbounds: Vec<Outbound>,
}

/// Applies a `tag_format` printf-style pattern (only `%s` is recognized, per §4.6/§8's
/// single-substitution examples) to one tag.
fn format_tag(fmt: Option<&str>, tag: &str) -> String {
	match fmt {
		Some(f) if !f.is_empty() => f.replacen("%s", tag, 1),
		_ => tag.to_string(),
	}
}

fn rewrite_group_references(ob: &mut Outbound, fmt: &str) {
	match ob {
		Outbound::Selector(s) => {
			s.outbounds = s.outbounds.iter().map(|t| format_tag(Some(fmt), t)).collect();
			s.default = s.default.as_ref().map(|d| format_tag(Some(fmt), d));
		},
		Outbound::Urltest(u) => {
			u.outbounds = u.outbounds.iter().map(|t| format_tag(Some(fmt), t)).collect();
		},
		_ => {},
	}
}

pub struct Provider {
	config: ProviderConfig,
	capabilities: Capabilities,
	resolver: Resolver,
	groups: Vec<CustomGroup>,
	filter: Filter,
	// The subscription fetch's own restricted dialer (C2); never chains through an
	// emitted outbound (§4.2). Currently used only for its timeout/bind knobs — see
	// DESIGN.md for the reqwest connector limitation.
	#[allow(dead_code)]
	request_dialer: Dialer,
	update_lock: tokio::sync::Mutex<()>,
	state: ArcSwapOption<PublishedState>,
}

impl Provider {
	pub fn new(config: ProviderConfig) -> Result<Self, Error> {
		config.validate().map_err(|e| match e {
			crate::config::ConfigError::MissingTag => Error::MissingTag,
			crate::config::ConfigError::MissingUrl => Error::MissingUrl,
			crate::config::ConfigError::UnknownGroupType(t) => {
				Error::Group(crate::group::GroupError::UnknownGroupType(t))
			},
		})?;

		let resolver = if config.dns_descriptor().is_empty() {
			Resolver::default_resolver()
		} else {
			Resolver::new(config.dns_descriptor())?
		};

		let request_dialer = Dialer::new((&config.request_dialer).into());
		let groups = config.custom_group.iter().cloned().map(CustomGroupConfigExt::into_group).collect();
		let filter = Filter::from(config.filter.clone());

		Ok(Self {
			config,
			capabilities: Capabilities::default(),
			resolver,
			groups,
			filter,
			request_dialer,
			update_lock: tokio::sync::Mutex::new(()),
			state: ArcSwapOption::empty(),
		})
	}

	pub fn tag(&self) -> &str {
		&self.config.tag
	}

	/// §4.8: try-lock discipline, a fresh-cache short-circuit unless `force`, and a
	/// cache fallback on fetch failure unless `force`.
	async fn run_cycle(&self, force: bool) -> Result<(), Error> {
		let Ok(_guard) = self.update_lock.try_lock() else {
			// Contended: another update is already in flight, this one is a no-op
			// success (§7 `UpdateInProgress`, not user-visible).
			return Ok(());
		};

		let cache_file = self.config.cache_file.as_deref().unwrap_or("");
		let cached = cache::read(cache_file).await.ok();

		let fresh_enough = !force
			&& cached.as_ref().is_some_and(|(_, mtime)| {
				let force_update = self.config.force_update();
				force_update.is_zero()
					|| SystemTime::now().duration_since(*mtime).unwrap_or_default() < force_update
			});

		let (raw, update_time) = if fresh_enough {
			let (entry, mtime) = cached.clone().expect("fresh_enough implies cached.is_some()");
			(entry, mtime)
		} else {
			match self.fetch_fresh().await {
				Ok(fetched) => fetched,
				Err(e) if !force => match cached {
					Some((entry, mtime)) => {
						tracing::warn!(error = %e, tag = %self.config.tag, "subscription fetch failed, falling back to cache");
						(entry, mtime)
					},
					None => return Err(e),
				},
				Err(e) => return Err(e),
			}
		};

		let outbounds = self.parse_and_translate(&raw.peer_info)?;
		if !cache_file.is_empty() {
			if let Err(e) = cache::write(cache_file, &raw).await {
				tracing::warn!(error = %e, tag = %self.config.tag, "failed to write subscription cache");
			}
		}

		self.state.store(Some(Arc::new(PublishedState { subscription: raw, update_time, outbounds })));
		Ok(())
	}

	async fn fetch_fresh(&self) -> Result<(CachedSubscription, SystemTime), Error> {
		let result = fetch::fetch(
			&self.config.url,
			self.config.request_ip,
			&self.resolver,
			self.config.http3,
			self.config.request_timeout(),
		)
		.await?;
		Ok((CachedSubscription::new(result.body, result.subscribe_info), SystemTime::now()))
	}

	fn parse_and_translate(&self, raw: &[u8]) -> Result<Vec<Outbound>, Error> {
		let proxies = decode_clash_config(raw)?;

		let mut outbounds: Vec<Outbound> = Vec::new();
		let mut kept: Vec<(String, String)> = Vec::new();

		for (i, proxy) in proxies.iter().enumerate() {
			let seed = proxy.tag_seed().unwrap_or_else(|| format!("{}-{}", self.config.tag, i));
			if !self.filter.keep(&seed, proxy.kind()) {
				continue;
			}
			match outbound::translate(proxy, seed.clone(), &self.config.dialer, self.capabilities) {
				Ok(ob) => {
					kept.push((seed, proxy.kind().to_string()));
					outbounds.push(ob);
				},
				Err(e) => {
					tracing::debug!(error = %e, tag = %seed, "dropping proxy: translation failed");
				},
			}
		}

		if outbounds.is_empty() {
			return Err(Error::NoProxiesFound);
		}

		for group_cfg in &self.groups {
			if let Some(built) = group::build(group_cfg, &kept) {
				match built {
					group::BuiltGroup::Selector(s) => {
						kept.push((s.tag.clone(), "group".to_string()));
						outbounds.push(Outbound::Selector(s));
					},
					group::BuiltGroup::UrlTest(u) => {
						kept.push((u.tag.clone(), "group".to_string()));
						outbounds.push(Outbound::Urltest(u));
					},
				}
			}
		}

		if let Some(fmt) = self.config.tag_format.as_deref().filter(|f| !f.is_empty()) {
			for ob in outbounds.iter_mut() {
				rewrite_group_references(ob, fmt);
				let new_tag = format_tag(Some(fmt), ob.tag());
				ob.set_tag(new_tag);
			}
			for (tag, _) in kept.iter_mut() {
				*tag = format_tag(Some(fmt), tag);
			}
		}

		let all_tags: Vec<String> = kept.iter().map(|(t, _)| t.clone()).collect();

		let default_outbound = match self.config.default_outbound.as_deref() {
			Some(d) if !d.is_empty() => {
				let formatted = match self.config.tag_format.as_deref().filter(|f| !f.is_empty()) {
					Some(fmt) => format_tag(Some(fmt), d),
					None => d.to_string(),
				};
				if !all_tags.contains(&formatted) {
					return Err(Error::DefaultOutboundNotFound(formatted));
				}
				Some(formatted)
			},
			_ => None,
		};

		outbounds.push(Outbound::Selector(crate::group::SelectorOutbound {
			tag: self.config.tag.clone(),
			outbounds: all_tags,
			default: default_outbound,
		}));

		Ok(outbounds)
	}

	pub fn get_update_time(&self) -> Option<SystemTime> {
		self.state.load().as_ref().map(|s| s.update_time)
	}

	pub fn get_subscribe_info(&self) -> SubscribeInfo {
		self.state.load().as_ref().map(|s| s.subscription.subscribe_info()).unwrap_or_default()
	}

	pub fn get_outbound_options(&self) -> Vec<Outbound> {
		self.state.load().as_ref().map(|s| s.outbounds.clone()).unwrap_or_default()
	}
}

/// The router contract exposed to the Clash-API and URL-test glue (§6). Kept separate
/// from `Provider`'s inherent methods so callers that only need this surface (rather
/// than construction details like `Capabilities`) can depend on the trait alone.
#[async_trait]
pub trait ProxyProvider: Send + Sync {
	fn tag(&self) -> &str;
	async fn update(&self) -> Result<(), Error>;
	async fn force_update(&self) -> Result<(), Error>;
	fn get_outbound_options(&self) -> Vec<Outbound>;
	fn get_update_time(&self) -> Option<SystemTime>;
	fn get_subscribe_info(&self) -> SubscribeInfo;
}

#[async_trait]
impl ProxyProvider for Provider {
	fn tag(&self) -> &str {
		Provider::tag(self)
	}

	async fn update(&self) -> Result<(), Error> {
		self.run_cycle(false).await
	}

	async fn force_update(&self) -> Result<(), Error> {
		self.run_cycle(true).await
	}

	fn get_outbound_options(&self) -> Vec<Outbound> {
		Provider::get_outbound_options(self)
	}

	fn get_update_time(&self) -> Option<SystemTime> {
		Provider::get_update_time(self)
	}

	fn get_subscribe_info(&self) -> SubscribeInfo {
		Provider::get_subscribe_info(self)
	}
}

/// Mirrors `cmd_parse_proxyprovider.go` (§6 `parse-proxyprovider`): fetch, parse,
/// translate, and return the generated outbounds without touching a cache or
/// publishing any state — a pure, one-shot function so the CLI collaborator can print
/// the result as JSON and exit.
pub async fn parse_only(config: &ProviderConfig) -> Result<Vec<Outbound>, Error> {
	config.validate().map_err(|e| match e {
		crate::config::ConfigError::MissingTag => Error::MissingTag,
		crate::config::ConfigError::MissingUrl => Error::MissingUrl,
		crate::config::ConfigError::UnknownGroupType(t) => Error::Group(crate::group::GroupError::UnknownGroupType(t)),
	})?;

	let resolver =
		if config.dns_descriptor().is_empty() { Resolver::default_resolver() } else { Resolver::new(config.dns_descriptor())? };

	let result =
		fetch::fetch(&config.url, config.request_ip, &resolver, config.http3, config.request_timeout()).await?;
	let proxies = decode_clash_config(&result.body)?;

	let groups: Vec<CustomGroup> = config.custom_group.iter().cloned().map(CustomGroupConfigExt::into_group).collect();
	let filter = Filter::from(config.filter.clone());
	let capabilities = Capabilities::default();

	let mut outbounds = Vec::new();
	let mut kept: Vec<(String, String)> = Vec::new();
	for (i, proxy) in proxies.iter().enumerate() {
		let seed = proxy.tag_seed().unwrap_or_else(|| format!("{}-{}", config.tag, i));
		if !filter.keep(&seed, proxy.kind()) {
			continue;
		}
		if let Ok(ob) = outbound::translate(proxy, seed.clone(), &config.dialer, capabilities) {
			kept.push((seed, proxy.kind().to_string()));
			outbounds.push(ob);
		}
	}
	if outbounds.is_empty() {
		return Err(Error::NoProxiesFound);
	}
	for group_cfg in &groups {
		if let Some(built) = group::build(group_cfg, &kept) {
			match built {
				group::BuiltGroup::Selector(s) => outbounds.push(Outbound::Selector(s)),
				group::BuiltGroup::UrlTest(u) => outbounds.push(Outbound::Urltest(u)),
			}
		}
	}
	Ok(outbounds)
}

trait CustomGroupConfigExt {
	fn into_group(self) -> CustomGroup;
}

impl CustomGroupConfigExt for crate::config::CustomGroupConfig {
	fn into_group(self) -> CustomGroup {
		crate::config::CustomGroupConfig::into_group(self)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config(tag_format: Option<&str>, default_outbound: Option<&str>) -> ProviderConfig {
		ProviderConfig {
			tag: "myprovider".to_string(),
			url: "https://example.com/sub".to_string(),
			cache_file: None,
			force_update: None,
			http3: false,
			request_timeout: None,
			request_ip: None,
			dns: None,
			tag_format: tag_format.map(str::to_string),
			filter: Default::default(),
			default_outbound: default_outbound.map(str::to_string),
			request_dialer: Default::default(),
			dialer: Default::default(),
			custom_group: Vec::new(),
		}
	}

	fn basic_ss_yaml(name: &str) -> Vec<u8> {
		format!(
			"proxies:\n  - {{name: {name}, type: ss, server: 1.2.3.4, port: 8388, cipher: aes-256-gcm, password: p}}\n"
		)
		.into_bytes()
	}

	#[test]
	fn basic_shadowsocks_yields_root_selector_over_one_tag() {
		let provider = Provider::new(config(None, None)).unwrap();
		let outbounds = provider.parse_and_translate(&basic_ss_yaml("A")).unwrap();
		assert_eq!(outbounds.len(), 2);
		assert_eq!(outbounds[0].tag(), "A");
		match &outbounds[1] {
			Outbound::Selector(s) => {
				assert_eq!(s.tag, "myprovider");
				assert_eq!(s.outbounds, vec!["A".to_string()]);
			},
			other => panic!("expected selector, got {other:?}"),
		}
	}

	#[test]
	fn tag_format_rewrites_every_tag_except_root() {
		let provider = Provider::new(config(Some("X/%s"), Some("A"))).unwrap();
		let outbounds = provider.parse_and_translate(&basic_ss_yaml("A")).unwrap();
		assert_eq!(outbounds[0].tag(), "X/A");
		match &outbounds[1] {
			Outbound::Selector(s) => {
				assert_eq!(s.tag, "myprovider");
				assert_eq!(s.outbounds, vec!["X/A".to_string()]);
				assert_eq!(s.default.as_deref(), Some("X/A"));
			},
			other => panic!("expected selector, got {other:?}"),
		}
	}

	#[test]
	fn default_outbound_not_matching_any_tag_errors() {
		let provider = Provider::new(config(None, Some("nonexistent"))).unwrap();
		let err = provider.parse_and_translate(&basic_ss_yaml("A")).unwrap_err();
		assert!(matches!(err, Error::DefaultOutboundNotFound(_)));
	}

	#[test]
	fn zero_usable_proxies_is_an_error() {
		let provider = Provider::new(config(None, None)).unwrap();
		let err = provider.parse_and_translate(b"proxies: []\n").unwrap_err();
		assert!(matches!(err, Error::NoProxiesFound));
	}

	#[test]
	fn top_level_filter_keeps_matching_tag() {
		let mut cfg = config(None, None);
		cfg.filter = crate::config::FilterConfig {
			rule: vec![crate::proxy_model::FilterRule { pattern: regex::Regex::new("^A$").unwrap(), kind: None }],
			white_mode: true,
		};
		let provider = Provider::new(cfg).unwrap();
		let outbounds = provider.parse_and_translate(&basic_ss_yaml("A")).unwrap();
		assert_eq!(outbounds.len(), 2);
		assert_eq!(outbounds[0].tag(), "A");
	}

	#[test]
	fn top_level_filter_rejecting_every_proxy_is_no_proxies_found() {
		let mut cfg = config(None, None);
		cfg.filter = crate::config::FilterConfig {
			rule: vec![crate::proxy_model::FilterRule { pattern: regex::Regex::new("^A$").unwrap(), kind: None }],
			white_mode: true,
		};
		let provider = Provider::new(cfg).unwrap();
		let err = provider.parse_and_translate(&basic_ss_yaml("B")).unwrap_err();
		assert!(matches!(err, Error::NoProxiesFound));
	}

	#[test]
	fn custom_group_url_test_over_filtered_members() {
		let mut cfg = config(None, None);
		cfg.custom_group = vec![crate::config::CustomGroupConfig::UrlTest {
			tag: "G".to_string(),
			rule: vec![crate::proxy_model::FilterRule { pattern: regex::Regex::new("^A$").unwrap(), kind: None }],
			white_mode: true,
			url: None,
			interval: None,
			tolerance: None,
		}];
		let provider = Provider::new(cfg).unwrap();
		let yaml = b"proxies:\n  - {name: A, type: ss, server: 1.2.3.4, port: 8388, cipher: aes-256-gcm, password: p}\n  - {name: B, type: ss, server: 5.6.7.8, port: 8388, cipher: aes-256-gcm, password: p}\n";
		let outbounds = provider.parse_and_translate(yaml).unwrap();
		let tags: Vec<&str> = outbounds.iter().map(|o| o.tag()).collect();
		assert_eq!(tags, vec!["A", "B", "G", "myprovider"]);
		match &outbounds[2] {
			Outbound::Urltest(u) => assert_eq!(u.outbounds, vec!["A".to_string()]),
			other => panic!("expected url_test group, got {other:?}"),
		}
	}
}
