//! C3 — subscription fetcher.
//!
//! Grounded on `examples/original_source/proxyprovider/request.go`'s `request()`: pin
//! the connection to a resolved IP (via `request_ip`, a literal host, or a C1 query),
//! set `User-Agent: clash`, and run the whole exchange under a fixed overall deadline.
//! `reqwest` stands in for the original's bespoke `http.Transport` with a
//! `DialContext` override; its `.resolve()` builder hook gives the same IP-pinning
//! behavior without reimplementing an HTTP client.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use url::Url;

use crate::dns::{DnsError, Resolver};

/// Used when a provider config leaves `request_timeout` unset; matches
/// `ProviderConfig::request_timeout`'s own default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const USER_AGENT: &str = "clash";

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
	#[error("failed to parse subscription url: {0}")]
	InvalidUrl(#[from] url::ParseError),
	#[error("subscription url has no host")]
	MissingHost,
	#[error("failed to resolve subscription host: {0}")]
	Resolve(#[from] DnsError),
	#[error("failed to build http client: {0}")]
	ClientBuild(reqwest::Error),
	#[error("request failed: {0}")]
	Request(reqwest::Error),
	#[error("request timed out after {0:?}")]
	Timeout(Duration),
}

/// `upload=N; download=N; total=N` plus an optional `expire=N`, parsed from the
/// `subscription-userinfo` response header. Missing or malformed fields default to
/// zero, matching the original's silent `strconv.ParseUint` failure handling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeInfo {
	pub upload: u64,
	pub download: u64,
	pub total: u64,
	pub expire: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
	pub body: Vec<u8>,
	pub subscribe_info: SubscribeInfo,
}

/// Resolves the subscription host per §4.3 step 1: an explicit `request_ip` override
/// wins, then a literal-IP host, then a C1 query (first answer).
pub async fn resolve_host(
	host: &str,
	request_ip: Option<IpAddr>,
	resolver: &Resolver,
) -> Result<IpAddr, FetchError> {
	if let Some(ip) = request_ip {
		return Ok(ip);
	}
	if let Ok(ip) = host.parse::<IpAddr>() {
		return Ok(ip);
	}
	let addrs = resolver.query(host).await?;
	Ok(addrs[0])
}

pub async fn fetch(
	url: &str,
	request_ip: Option<IpAddr>,
	resolver: &Resolver,
	#[allow(unused_variables)] http3: bool,
	timeout: Duration,
) -> Result<FetchResult, FetchError> {
	let parsed = Url::parse(url)?;
	let host = parsed.host_str().ok_or(FetchError::MissingHost)?.to_string();
	let port = parsed.port_or_known_default().unwrap_or(if parsed.scheme() == "https" { 443 } else { 80 });

	let resolved_ip = resolve_host(&host, request_ip, resolver).await?;
	let resolved_addr = SocketAddr::new(resolved_ip, port);

	#[cfg(feature = "http3")]
	if http3 {
		match fetch_once(url, &host, resolved_addr, true, timeout).await {
			Ok(result) => return Ok(result),
			Err(e) => {
				tracing::warn!(error = %e, "http3 fetch failed, falling back to http/1.1+h2");
			},
		}
	}

	fetch_once(url, &host, resolved_addr, false, timeout).await
}

async fn fetch_once(
	url: &str,
	host: &str,
	resolved_addr: SocketAddr,
	#[allow(unused_variables)] http3_prior_knowledge: bool,
	timeout: Duration,
) -> Result<FetchResult, FetchError> {
	let mut builder = reqwest::Client::builder()
		.resolve(host, resolved_addr)
		.user_agent(USER_AGENT)
		.timeout(timeout);

	#[cfg(feature = "http3")]
	if http3_prior_knowledge {
		builder = builder.http3_prior_knowledge();
	}

	let client = builder.build().map_err(FetchError::ClientBuild)?;

	let response = tokio::time::timeout(timeout, client.get(url).send())
		.await
		.map_err(|_| FetchError::Timeout(timeout))?
		.map_err(FetchError::Request)?;

	let subscribe_info = response
		.headers()
		.get("subscription-userinfo")
		.and_then(|v| v.to_str().ok())
		.map(parse_subscribe_info)
		.unwrap_or_default();

	let body = response.bytes().await.map_err(FetchError::Request)?.to_vec();

	Ok(FetchResult { body, subscribe_info })
}

fn parse_subscribe_info(header: &str) -> SubscribeInfo {
	let lower = header.to_lowercase();
	let mut info = SubscribeInfo::default();

	let traffic_re =
		regex::Regex::new(r"upload=(\d+); download=(\d+); total=(\d+)").expect("static regex");
	if let Some(caps) = traffic_re.captures(&lower) {
		info.upload = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
		info.download = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
		info.total = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
	}

	let expire_re = regex::Regex::new(r"expire=(\d+)").expect("static regex");
	if let Some(caps) = expire_re.captures(&lower) {
		info.expire = caps.get(1).and_then(|m| m.as_str().parse().ok());
	}

	info
}
