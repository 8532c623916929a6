//! C7 — group builder.
//!
//! No single source file in the retrieval pack implements this (it lives inline in the
//! provider's update path upstream); grounded on §4.7/§4.9's description and on the
//! selector/url-test outbound shapes referenced throughout
//! `examples/original_source/proxyprovider/proxy/*.go`'s `option.Outbound` literals.

use serde::Serialize;

use crate::proxy_model::Filter;

#[derive(thiserror::Error, Debug)]
pub enum GroupError {
	#[error("unknown group type {0:?}")]
	UnknownGroupType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupType {
	Selector,
	UrlTest,
}

impl GroupType {
	pub fn parse(s: &str) -> Result<Self, GroupError> {
		match s {
			"selector" => Ok(GroupType::Selector),
			"url_test" => Ok(GroupType::UrlTest),
			other => Err(GroupError::UnknownGroupType(other.to_string())),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct SelectorGroupOptions {
	pub default: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UrlTestGroupOptions {
	pub url: Option<String>,
	pub interval: Option<std::time::Duration>,
	pub tolerance: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CustomGroup {
	pub tag: String,
	pub kind: GroupType,
	pub filter: Filter,
	pub selector: SelectorGroupOptions,
	pub url_test: UrlTestGroupOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorOutbound {
	pub tag: String,
	pub outbounds: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlTestOutbound {
	pub tag: String,
	pub outbounds: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub interval: Option<std::time::Duration>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tolerance: Option<u32>,
}

pub enum BuiltGroup {
	Selector(SelectorOutbound),
	UrlTest(UrlTestOutbound),
}

/// Filters `emitted` (tag, clash type) pairs by the group's filter rules and builds the
/// group outbound. Returns `None` if the filtered list is empty (§4.7: skip silently).
pub fn build(group: &CustomGroup, emitted: &[(String, String)]) -> Option<BuiltGroup> {
	let outbounds: Vec<String> = emitted
		.iter()
		.filter(|(tag, kind)| group.filter.keep(tag, kind))
		.map(|(tag, _)| tag.clone())
		.collect();

	if outbounds.is_empty() {
		return None;
	}

	Some(match group.kind {
		GroupType::Selector => BuiltGroup::Selector(SelectorOutbound {
			tag: group.tag.clone(),
			outbounds,
			default: group.selector.default.clone(),
		}),
		GroupType::UrlTest => BuiltGroup::UrlTest(UrlTestOutbound {
			tag: group.tag.clone(),
			outbounds,
			url: group.url_test.url.clone(),
			interval: group.url_test.interval,
			tolerance: group.url_test.tolerance,
		}),
	})
}

/// The Clash-API healthcheck's URL-test concurrency cap (§6): `len`, halved once `len`
/// exceeds 16.
pub fn url_test_concurrency(len: usize) -> usize {
	if len > 16 { (len / 2).max(1) } else { len.max(1) }
}
