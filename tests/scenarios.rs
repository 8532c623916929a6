//! End-to-end scenarios against a real HTTP server, exercising the full
//! fetch -> cache -> parse -> translate -> group -> publish pipeline (§8).
//!
//! `wiremock` stands in for a real subscription host; the provider resolves
//! `127.0.0.1` as a literal IP (no DNS involved), so these run without network
//! access.

use proxyprovider::config::{FilterConfig, ProviderConfig};
use proxyprovider::provider::{Provider, ProxyProvider};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ss_yaml(name: &str) -> String {
	format!("proxies:\n  - {{name: {name}, type: ss, server: 1.2.3.4, port: 8388, cipher: aes-256-gcm, password: p}}\n")
}

fn config(url: String) -> ProviderConfig {
	ProviderConfig {
		tag: "myprovider".to_string(),
		url,
		cache_file: None,
		force_update: None,
		http3: false,
		request_timeout: None,
		request_ip: None,
		dns: None,
		tag_format: None,
		filter: FilterConfig::default(),
		default_outbound: None,
		request_dialer: Default::default(),
		dialer: Default::default(),
		custom_group: Vec::new(),
	}
}

#[tokio::test]
async fn update_over_the_wire_publishes_outbounds_and_root_selector() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(200).set_body_string(ss_yaml("A")))
		.mount(&server)
		.await;

	let provider = Provider::new(config(format!("{}/sub", server.uri()))).unwrap();
	ProxyProvider::update(&provider).await.unwrap();

	let outbounds = provider.get_outbound_options();
	assert_eq!(outbounds.len(), 2);
	assert_eq!(outbounds[0].tag(), "A");
	assert!(provider.get_update_time().is_some());
}

#[tokio::test]
async fn empty_subscription_body_is_no_proxies_found() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(200).set_body_string("proxies: []\n"))
		.mount(&server)
		.await;

	let provider = Provider::new(config(format!("{}/sub", server.uri()))).unwrap();
	let err = ProxyProvider::update(&provider).await.unwrap_err();
	assert!(matches!(err, proxyprovider::Error::NoProxiesFound));
	// Nothing was ever published.
	assert!(provider.get_outbound_options().is_empty());
}

#[tokio::test]
async fn whitelist_filter_over_the_wire_matches_scenario_2() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(200).set_body_string(ss_yaml("B")))
		.mount(&server)
		.await;

	let mut cfg = config(format!("{}/sub", server.uri()));
	cfg.filter = FilterConfig {
		rule: vec![proxyprovider::proxy_model::FilterRule { pattern: regex::Regex::new("^A$").unwrap(), kind: None }],
		white_mode: true,
	};
	let provider = Provider::new(cfg).unwrap();
	let err = ProxyProvider::update(&provider).await.unwrap_err();
	assert!(matches!(err, proxyprovider::Error::NoProxiesFound));
}

#[tokio::test]
async fn fetch_failure_falls_back_to_cache_when_not_forced() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(200).set_body_string(ss_yaml("A")))
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&server)
		.await;

	let dir = tempfile::tempdir().unwrap();
	let cache_file = dir.path().join("cache.bin").to_str().unwrap().to_string();

	let mut cfg = config(format!("{}/sub", server.uri()));
	cfg.cache_file = Some(cache_file);
	// A short force_update so the second call's fresh_enough check fails and it
	// actually attempts the network (force_update == 0 would prefer the cache and
	// never hit the 500 mock at all).
	cfg.force_update = Some(std::time::Duration::from_millis(1));
	let provider = Provider::new(cfg).unwrap();

	// First update populates the cache from the 200 response.
	ProxyProvider::update(&provider).await.unwrap();
	let first_update_time = provider.get_update_time().unwrap();
	tokio::time::sleep(std::time::Duration::from_millis(20)).await;

	// Second update hits the 500 mock; since the fetch fails, it must silently fall
	// back to the cache rather than erroring or wiping the published state.
	ProxyProvider::update(&provider).await.unwrap();
	let outbounds = provider.get_outbound_options();
	assert_eq!(outbounds[0].tag(), "A");
	assert!(provider.get_update_time().unwrap() >= first_update_time);
}

#[tokio::test]
async fn force_update_propagates_fetch_errors_even_with_a_cache() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(200).set_body_string(ss_yaml("A")))
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(500))
		.mount(&server)
		.await;

	let dir = tempfile::tempdir().unwrap();
	let cache_file = dir.path().join("cache.bin").to_str().unwrap().to_string();

	let mut cfg = config(format!("{}/sub", server.uri()));
	cfg.cache_file = Some(cache_file);
	let provider = Provider::new(cfg).unwrap();

	ProxyProvider::update(&provider).await.unwrap();
	let err = provider.force_update().await.unwrap_err();
	assert!(matches!(err, proxyprovider::Error::Fetch(_)));
}

#[tokio::test]
async fn update_is_a_noop_success_when_cache_is_fresh_enough() {
	let server = MockServer::start().await;
	// Only ever answers once; a second hit means the freshness short-circuit failed
	// and the provider refetched when it shouldn't have.
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(200).set_body_string(ss_yaml("A")))
		.up_to_n_times(1)
		.expect(1)
		.mount(&server)
		.await;

	let dir = tempfile::tempdir().unwrap();
	let cache_file = dir.path().join("cache.bin").to_str().unwrap().to_string();

	let mut cfg = config(format!("{}/sub", server.uri()));
	cfg.cache_file = Some(cache_file);
	cfg.force_update = Some(std::time::Duration::from_secs(3600));
	let provider = Provider::new(cfg).unwrap();

	ProxyProvider::update(&provider).await.unwrap();
	ProxyProvider::update(&provider).await.unwrap();
	let outbounds = provider.get_outbound_options();
	assert_eq!(outbounds[0].tag(), "A");
}

#[tokio::test]
async fn tag_format_and_default_outbound_over_the_wire() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/sub"))
		.respond_with(ResponseTemplate::new(200).set_body_string(ss_yaml("A")))
		.mount(&server)
		.await;

	let mut cfg = config(format!("{}/sub", server.uri()));
	cfg.tag_format = Some("X/%s".to_string());
	cfg.default_outbound = Some("A".to_string());
	let provider = Provider::new(cfg).unwrap();
	ProxyProvider::update(&provider).await.unwrap();

	let outbounds = provider.get_outbound_options();
	assert_eq!(outbounds[0].tag(), "X/A");
	match &outbounds[1] {
		proxyprovider::outbound::Outbound::Selector(s) => {
			assert_eq!(s.tag, "myprovider");
			assert_eq!(s.default.as_deref(), Some("X/A"));
		},
		other => panic!("expected selector, got {other:?}"),
	}
}
