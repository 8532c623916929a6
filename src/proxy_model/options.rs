//! Per-variant clash proxy option structs, grounded on
//! `examples/original_source/proxyprovider/proxy/{http,socks,shadowsocks,shadowsocksr,
//! trojan,vless,v2raytransport}.go`. VMess has no surviving source file in the retrieval
//! pack (only `clash.go`'s dispatch references it); its shape here is inferred from the
//! VLESS/Trojan siblings, which share the same transport and TLS vocabulary.

use std::collections::HashMap;

use serde::Deserialize;

use super::Port;

/// Fields every clash proxy node carries, `#[serde(flatten)]`-ed into each variant.
#[derive(Debug, Clone, Deserialize)]
pub struct ClashDefault {
	#[serde(default)]
	pub name: String,
	#[serde(rename = "type")]
	pub kind: String,
	pub server: String,
	#[serde(rename = "port")]
	pub server_port: Port,
	#[serde(rename = "ip-version", default)]
	pub ip_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WsOptions {
	#[serde(default)]
	pub path: String,
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(rename = "max-early-data", default)]
	pub max_early_data: u32,
	#[serde(rename = "early-data-header-name", default)]
	pub early_data_header_name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpTransportOptions {
	#[serde(default)]
	pub method: String,
	#[serde(default)]
	pub path: Vec<String>,
	#[serde(default)]
	pub headers: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Http2TransportOptions {
	#[serde(default)]
	pub host: Vec<String>,
	#[serde(default)]
	pub path: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GrpcOptions {
	#[serde(rename = "grpc-service-name", default)]
	pub service_name: String,
}

/// Not present in the retrieved source; filled in with the public-key/short-id pair
/// sing-box's own Reality outbound options use, since no other part of the pack defines
/// the shape.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RealityOptions {
	#[serde(default)]
	pub enabled: bool,
	#[serde(rename = "public-key", default)]
	pub public_key: String,
	#[serde(rename = "short-id", default)]
	pub short_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpOptions {
	#[serde(flatten)]
	pub default: ClashDefault,
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub password: String,
	#[serde(default)]
	pub tls: bool,
	#[serde(rename = "skip-cert-verify", default)]
	pub skip_cert_verify: bool,
	#[serde(rename = "sni", default)]
	pub server_name: String,
	#[serde(rename = "fingerprint", default)]
	pub fingerprint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocksOptions {
	#[serde(flatten)]
	pub default: ClashDefault,
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub password: String,
	#[serde(default)]
	pub tls: bool,
	#[serde(rename = "skip-cert-verify", default)]
	pub skip_cert_verify: bool,
	#[serde(default)]
	pub fingerprint: String,
	#[serde(default)]
	pub udp: bool,
}

/// `mode`/`host` for the `obfs` plugin, e.g. `plugin-opts: {mode: http, host: example.com}`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PluginOpts {
	#[serde(default)]
	pub mode: String,
	#[serde(default)]
	pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShadowsocksOptions {
	#[serde(flatten)]
	pub default: ClashDefault,
	#[serde(default)]
	pub cipher: String,
	#[serde(default)]
	pub password: String,
	#[serde(default)]
	pub udp: bool,
	#[serde(rename = "udp-over-tcp", default)]
	pub udp_over_tcp: bool,
	#[serde(default)]
	pub plugin: String,
	#[serde(rename = "plugin-opts", default)]
	pub plugin_opts: Option<PluginOpts>,
}

/// Old-form `obfsparam`/`protocolparam` aliases (per §4.6) are not in the struct that
/// survived in `shadowsocksr.go`, but `shadowsocksr_builtin.go`'s `GenerateOptions`
/// reads them, so they're restored here.
#[derive(Debug, Clone, Deserialize)]
pub struct ShadowsocksROptions {
	#[serde(flatten)]
	pub default: ClashDefault,
	#[serde(default)]
	pub cipher: String,
	#[serde(default)]
	pub password: String,
	#[serde(default)]
	pub obfs: String,
	#[serde(rename = "obfs-param", default)]
	pub obfs_param: String,
	#[serde(rename = "obfsparam", default)]
	pub obfs_param_old: String,
	#[serde(default)]
	pub protocol: String,
	#[serde(rename = "protocol-param", default)]
	pub protocol_param: String,
	#[serde(rename = "protocolparam", default)]
	pub protocol_param_old: String,
	#[serde(default)]
	pub udp: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrojanOptions {
	#[serde(flatten)]
	pub default: ClashDefault,
	pub password: String,
	#[serde(default)]
	pub alpn: Vec<String>,
	#[serde(rename = "sni", default)]
	pub server_name: String,
	#[serde(rename = "skip-cert-verify", default)]
	pub skip_cert_verify: bool,
	#[serde(rename = "fingerprint", default)]
	pub fingerprint: String,
	#[serde(rename = "client-fingerprint", default)]
	pub client_fingerprint: String,
	#[serde(default)]
	pub udp: Option<bool>,
	#[serde(default)]
	pub network: String,
	#[serde(default)]
	pub flow: String,
	#[serde(rename = "flow-show", default)]
	pub flow_show: bool,
	#[serde(rename = "grpc-opts", default)]
	pub grpc_options: Option<GrpcOptions>,
	#[serde(rename = "ws-opts", default)]
	pub ws_options: Option<WsOptions>,
	#[serde(rename = "reality-opts", default)]
	pub reality_options: Option<RealityOptions>,
}

/// The source's VLESS translator is a `(nil, nil)` stub (see §9 open questions); this
/// crate treats VLESS as fully supported, mirroring the Trojan/VMess transport handling.
#[derive(Debug, Clone, Deserialize)]
pub struct VlessOptions {
	#[serde(flatten)]
	pub default: ClashDefault,
	pub uuid: String,
	#[serde(default)]
	pub flow: String,
	#[serde(default)]
	pub udp: bool,
	#[serde(default)]
	pub tls: bool,
	#[serde(rename = "skip-cert-verify", default)]
	pub skip_cert_verify: bool,
	#[serde(default)]
	pub fingerprint: String,
	#[serde(rename = "client-fingerprint", default)]
	pub client_fingerprint: String,
	#[serde(rename = "servername", default)]
	pub server_name: String,
	#[serde(rename = "packet-encoding", default)]
	pub packet_encoding: String,
	#[serde(default)]
	pub network: String,
	#[serde(rename = "ws-opts", default)]
	pub ws_options: Option<WsOptions>,
	#[serde(rename = "http-opts", default)]
	pub http_options: Option<HttpTransportOptions>,
	#[serde(rename = "h2-opts", default)]
	pub http2_options: Option<Http2TransportOptions>,
	#[serde(rename = "grpc-opts", default)]
	pub grpc_options: Option<GrpcOptions>,
	#[serde(rename = "reality-opts", default)]
	pub reality_options: Option<RealityOptions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VMessOptions {
	#[serde(flatten)]
	pub default: ClashDefault,
	pub uuid: String,
	#[serde(rename = "alterId", default)]
	pub alter_id: u32,
	#[serde(default)]
	pub cipher: String,
	#[serde(default)]
	pub udp: bool,
	#[serde(default)]
	pub tls: bool,
	#[serde(rename = "skip-cert-verify", default)]
	pub skip_cert_verify: bool,
	#[serde(default)]
	pub fingerprint: String,
	#[serde(rename = "client-fingerprint", default)]
	pub client_fingerprint: String,
	#[serde(rename = "servername", default)]
	pub server_name: String,
	#[serde(rename = "packet-encoding", default)]
	pub packet_encoding: String,
	#[serde(rename = "global-padding", default)]
	pub global_padding: bool,
	#[serde(rename = "authenticated-length", default)]
	pub authenticated_length: bool,
	#[serde(default)]
	pub network: String,
	#[serde(rename = "ws-opts", default)]
	pub ws_options: Option<WsOptions>,
	#[serde(rename = "http-opts", default)]
	pub http_options: Option<HttpTransportOptions>,
	#[serde(rename = "h2-opts", default)]
	pub http2_options: Option<Http2TransportOptions>,
	#[serde(rename = "grpc-opts", default)]
	pub grpc_options: Option<GrpcOptions>,
	#[serde(rename = "reality-opts", default)]
	pub reality_options: Option<RealityOptions>,
}
