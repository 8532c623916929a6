//! Crate-wide error taxonomy.
//!
//! Each component owns its own `thiserror` enum (see `dns::DnsError`,
//! `fetch::FetchError`, `cache::CacheError`, `proxy_model::DecodeError`,
//! `outbound::TranslateError`, `group::GroupError`, `sideload::SideloadError`); this
//! type composes them for callers that want a single error type at the provider
//! boundary.

use crate::{cache, dns, fetch, group, outbound, proxy_model, sideload};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("config: missing tag")]
	MissingTag,
	#[error("config: missing url")]
	MissingUrl,
	#[error("config: default_outbound {0:?} does not match any emitted outbound")]
	DefaultOutboundNotFound(String),

	#[error(transparent)]
	Dns(#[from] dns::DnsError),
	#[error(transparent)]
	Fetch(#[from] fetch::FetchError),
	#[error(transparent)]
	Cache(#[from] cache::CacheError),
	#[error(transparent)]
	Decode(#[from] proxy_model::DecodeError),
	#[error(transparent)]
	Translate(#[from] outbound::TranslateError),
	#[error(transparent)]
	Group(#[from] group::GroupError),
	#[error(transparent)]
	Sideload(#[from] sideload::SideloadError),

	#[error("subscription produced no usable proxies")]
	NoProxiesFound,
}
