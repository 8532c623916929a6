//! Demonstration binary exposing the CLI surface described in §6, grounded on
//! `examples/original_source/cmd/sing-box/cmd_{parse,show,update}_proxyprovider.go`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proxyprovider::config::ProviderConfig;
use proxyprovider::provider::{parse_only, Provider, ProxyProvider};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Fetch a bare subscription link and print its translated outbounds, without a
	/// config file or cache.
	ParseProxyprovider {
		#[arg(short, long)]
		link: String,
	},
	/// Force-update the providers in a config file and print their tags.
	UpdateProxyprovider {
		#[arg(short, long)]
		file: PathBuf,
		#[arg(short, long, value_delimiter = ',')]
		tags: Option<Vec<String>>,
	},
	/// Update the providers in a config file and print their combined outbounds.
	ShowProxyprovider {
		#[arg(short, long)]
		file: PathBuf,
		#[arg(short, long, value_delimiter = ',')]
		tags: Option<Vec<String>>,
	},
}

#[derive(Debug, Deserialize)]
struct FileConfig {
	#[serde(default)]
	proxy_providers: Vec<ProviderConfig>,
}

async fn load_providers(file: &PathBuf, tags: &Option<Vec<String>>) -> Result<Vec<Provider>> {
	let raw = tokio::fs::read_to_string(file).await.with_context(|| format!("read {}", file.display()))?;
	let parsed: FileConfig = serde_json::from_str(&raw).context("parse config file")?;

	let selected = parsed
		.proxy_providers
		.into_iter()
		.filter(|c| tags.as_ref().is_none_or(|t| t.iter().any(|wanted| wanted == &c.tag)))
		.map(Provider::new)
		.collect::<Result<Vec<_>, _>>()
		.context("construct proxy provider")?;
	Ok(selected)
}

#[tokio::main]
async fn main() -> Result<()> {
	proxyprovider::telemetry::init();

	let args = Args::parse();

	match args.command {
		Command::ParseProxyprovider { link } => {
			let config = ProviderConfig {
				tag: "proxy-provider".to_string(),
				url: link,
				cache_file: None,
				force_update: None,
				http3: false,
				request_timeout: None,
				request_ip: None,
				dns: None,
				tag_format: None,
				filter: Default::default(),
				default_outbound: None,
				request_dialer: Default::default(),
				dialer: Default::default(),
				custom_group: Vec::new(),
			};
			let outbounds = parse_only(&config).await.context("parse proxy provider")?;
			// The root selector (last entry) is dropped, mirroring the original CLI's
			// `outs[:len(outs)-1]` slice.
			let without_root = &outbounds[..outbounds.len().saturating_sub(1)];
			let json = serde_json::json!({ "outbounds": without_root });
			println!("{}", serde_json::to_string_pretty(&json)?);
		},

		Command::UpdateProxyprovider { file, tags } => {
			let providers = load_providers(&file, &tags).await?;
			for provider in &providers {
				match provider.force_update().await {
					Ok(()) => tracing::info!(tag = provider.tag(), "proxy provider updated"),
					Err(e) => tracing::error!(tag = provider.tag(), error = %e, "failed to update proxy provider"),
				}
			}
		},

		Command::ShowProxyprovider { file, tags } => {
			let providers = load_providers(&file, &tags).await?;
			let mut all_outbounds = Vec::new();
			for provider in &providers {
				match provider.update().await {
					Ok(()) => all_outbounds.extend(provider.get_outbound_options()),
					Err(e) => tracing::error!(tag = provider.tag(), error = %e, "failed to update proxy provider"),
				}
			}
			let json = serde_json::json!({ "outbounds": all_outbounds });
			println!("{}", serde_json::to_string_pretty(&json)?);
		},
	}

	Ok(())
}
