//! C10 — side-load process supervisor.
//!
//! Grounded on `examples/original_source/outbound/sideload.go`'s `SideLoad` outbound:
//! spawn a helper process, forward its stdout/stderr into the logger one line at a
//! time, and optionally run a dialer-forwarder (C9) so the helper can reach a fixed
//! upstream server through the router's outbound chain without knowing about proxy
//! protocols itself. The helper is expected to expose a SOCKS5 endpoint on
//! `socks5_proxy_port`; dialing through that endpoint is the embedding router's job
//! (same `OutboundDialer` external-collaborator boundary as C9), so this module only
//! supervises the child process and the optional forwarder.

use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::net::forward::{ForwardError, Forwarder, Network as ListenNetwork, OutboundDialer};
use crate::outbound::{Network as ServedNetwork, ServerOptions};

/// §4.10/§5: a dead helper process is restarted after this backoff, indefinitely,
/// until `close()` is called.
const RESTART_BACKOFF: Duration = Duration::from_secs(3);

#[derive(thiserror::Error, Debug)]
pub enum SideloadError {
	#[error("command not found")]
	EmptyCommand,
	#[error("socks5 proxy port not found")]
	MissingSocksPort,
	#[error(transparent)]
	Forward(#[from] ForwardError),
	#[error("failed to spawn side-load process: {0}")]
	Spawn(io::Error),
	#[error("side-load process is already running")]
	AlreadyStarted,
}

#[derive(Debug, Clone, Default)]
pub struct SideloadOptions {
	pub command: Vec<String>,
	/// `"KEY=VALUE"` entries appended to the child's environment, matching
	/// `exec.Cmd.Env`'s convention.
	pub env: Vec<String>,
	pub socks5_proxy_port: u16,
	/// `0` disables the dialer-forwarder entirely (§9: needs `listen_port`, `server`,
	/// and `server_port` all set, mirroring the original's three-way guard).
	pub listen_port: u16,
	pub listen_network: Vec<ListenNetwork>,
	pub server: Option<ServerOptions>,
	pub network: Vec<ServedNetwork>,
	pub tcp_fast_open: bool,
	pub udp_fragment: bool,
	pub udp_timeout: Option<Duration>,
}

impl SideloadOptions {
	fn wants_forwarder(&self) -> bool {
		self.listen_port != 0 && self.server.is_some()
	}
}

/// Supervises one side-loaded helper process plus its optional dialer-forwarder.
pub struct Sideload<D: OutboundDialer> {
	options: SideloadOptions,
	forwarder: Option<Forwarder<D>>,
	watchdog: Mutex<Option<JoinHandle<()>>>,
	started: AtomicBool,
	token: CancellationToken,
}

impl<D: OutboundDialer> Sideload<D> {
	pub fn new(dialer: Arc<D>, options: SideloadOptions, parent: &CancellationToken) -> Result<Self, SideloadError> {
		if options.command.is_empty() {
			return Err(SideloadError::EmptyCommand);
		}
		if options.socks5_proxy_port == 0 {
			return Err(SideloadError::MissingSocksPort);
		}

		let token = parent.child_token();
		let forwarder = if options.wants_forwarder() {
			let server = options.server.as_ref().expect("wants_forwarder checked server.is_some()");
			// A hostname would need C1's resolver, which this module has no access to;
			// the embedding router is expected to pass an already-resolved literal IP.
			let ip = server.server.parse().unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
			let destination = std::net::SocketAddr::new(ip, server.server_port);
			Some(Forwarder::new(
				dialer,
				options.listen_port,
				destination,
				options.listen_network.clone(),
				options.udp_timeout,
				&token,
			))
		} else {
			None
		};

		Ok(Self { options, forwarder, watchdog: Mutex::new(None), started: AtomicBool::new(false), token })
	}

	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.token
	}

	/// Starts the forwarder (if configured), spawns the helper process, and hands it to
	/// a watchdog task that restarts it on exit (§4.10/§5) until `close()` is called.
	pub async fn start(&self) -> Result<(), SideloadError> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(SideloadError::AlreadyStarted);
		}

		if let Some(forwarder) = &self.forwarder {
			forwarder.start().await?;
		}

		let child = spawn_child(&self.options.command, &self.options.env).map_err(SideloadError::Spawn)?;

		let command = self.options.command.clone();
		let env = self.options.env.clone();
		let token = self.token.clone();
		let handle = tokio::spawn(watchdog(command, env, child, token));
		*self.watchdog.lock().await = Some(handle);

		Ok(())
	}

	/// Stops the watchdog (killing whichever helper process is currently running) and
	/// tears down the forwarder. Idempotent: calling this twice, or before `start`, is
	/// not an error.
	pub async fn close(&self) {
		self.token.cancel();
		if let Some(handle) = self.watchdog.lock().await.take() {
			let _ = handle.await;
		}
		if let Some(forwarder) = &self.forwarder {
			forwarder.close();
		}
	}
}

fn spawn_child(command: &[String], env: &[String]) -> io::Result<Child> {
	let mut cmd = Command::new(&command[0]);
	cmd.args(&command[1..]).envs(parse_env(env)).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
	cmd.spawn()
}

/// One watchdog task per child (§4.10/§5): wait for it to exit, and unless `close()`
/// has cancelled `token`, log the exit, back off 3s, and respawn — retrying
/// indefinitely, including across repeated spawn failures.
async fn watchdog(command: Vec<String>, env: Vec<String>, mut child: Child, token: CancellationToken) {
	loop {
		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(pump_lines(stdout, "stdout"));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(pump_lines(stderr, "stderr"));
		}

		tokio::select! {
			_ = token.cancelled() => {
				let _ = child.start_kill();
				let _ = child.wait().await;
				return;
			}
			status = child.wait() => {
				match status {
					Ok(status) => tracing::warn!(%status, "side-load process exited"),
					Err(e) => tracing::warn!(error = %e, "side-load process wait failed"),
				}
			}
		}

		if token.is_cancelled() {
			return;
		}

		tracing::info!(backoff_secs = RESTART_BACKOFF.as_secs(), "restarting side-load process");

		child = loop {
			tokio::select! {
				_ = token.cancelled() => return,
				_ = tokio::time::sleep(RESTART_BACKOFF) => {},
			}
			match spawn_child(&command, &env) {
				Ok(c) => break c,
				Err(e) => tracing::warn!(error = %e, "failed to restart side-load process, retrying"),
			}
		};
	}
}

async fn pump_lines(reader: impl tokio::io::AsyncRead + Unpin, stream_name: &'static str) {
	let mut lines = BufReader::new(reader).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) if !line.is_empty() => info!(stream = stream_name, "{line}"),
			Ok(Some(_)) => continue,
			Ok(None) => return,
			Err(e) => {
				tracing::warn!(stream = stream_name, error = %e, "side-load output stream closed with error");
				return;
			},
		}
	}
}

fn parse_env(entries: &[String]) -> Vec<(String, String)> {
	entries
		.iter()
		.filter_map(|e| e.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
		.collect()
}

#[cfg(test)]
mod tests {
	use std::net::SocketAddr;

	use async_trait::async_trait;
	use tokio::net::{TcpStream, UdpSocket};

	use super::*;

	struct NullDialer;

	#[async_trait]
	impl OutboundDialer for NullDialer {
		async fn dial_tcp(&self, destination: SocketAddr) -> io::Result<TcpStream> {
			TcpStream::connect(destination).await
		}
		async fn dial_udp(&self, destination: SocketAddr) -> io::Result<UdpSocket> {
			let socket = UdpSocket::bind(("127.0.0.1", 0)).await?;
			socket.connect(destination).await?;
			Ok(socket)
		}
	}

	#[test]
	fn rejects_empty_command() {
		let token = CancellationToken::new();
		let opts = SideloadOptions { socks5_proxy_port: 1080, ..Default::default() };
		let err = Sideload::new(Arc::new(NullDialer), opts, &token).unwrap_err();
		assert!(matches!(err, SideloadError::EmptyCommand));
	}

	#[test]
	fn rejects_missing_socks_port() {
		let token = CancellationToken::new();
		let opts = SideloadOptions { command: vec!["true".to_string()], ..Default::default() };
		let err = Sideload::new(Arc::new(NullDialer), opts, &token).unwrap_err();
		assert!(matches!(err, SideloadError::MissingSocksPort));
	}

	#[test]
	fn forwarder_is_optional_without_listen_port() {
		let token = CancellationToken::new();
		let opts = SideloadOptions {
			command: vec!["true".to_string()],
			socks5_proxy_port: 1080,
			..Default::default()
		};
		let sideload = Sideload::new(Arc::new(NullDialer), opts, &token).unwrap();
		assert!(sideload.forwarder.is_none());
	}

	#[tokio::test]
	async fn start_and_close_child_process() {
		let token = CancellationToken::new();
		let opts = SideloadOptions {
			command: vec!["sh".to_string(), "-c".to_string(), "echo hello; sleep 5".to_string()],
			socks5_proxy_port: 1080,
			..Default::default()
		};
		let sideload = Sideload::new(Arc::new(NullDialer), opts, &token).unwrap();
		sideload.start().await.unwrap();
		sideload.close().await;
	}

	#[tokio::test]
	async fn second_start_is_already_started() {
		let token = CancellationToken::new();
		let opts = SideloadOptions {
			command: vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
			socks5_proxy_port: 1080,
			..Default::default()
		};
		let sideload = Sideload::new(Arc::new(NullDialer), opts, &token).unwrap();
		sideload.start().await.unwrap();
		let err = sideload.start().await.unwrap_err();
		assert!(matches!(err, SideloadError::AlreadyStarted));
		sideload.close().await;
	}

	#[tokio::test]
	async fn watchdog_restarts_process_on_exit() {
		let token = CancellationToken::new();
		let dir = tempfile::tempdir().unwrap();
		let marker = dir.path().join("runs");
		let opts = SideloadOptions {
			command: vec![
				"sh".to_string(),
				"-c".to_string(),
				format!("echo x >> {}", marker.display()),
			],
			socks5_proxy_port: 1080,
			..Default::default()
		};
		let sideload = Sideload::new(Arc::new(NullDialer), opts, &token).unwrap();
		sideload.start().await.unwrap();

		// The process exits immediately every time; give the watchdog a few backoff
		// cycles to respawn it more than once.
		tokio::time::sleep(RESTART_BACKOFF * 2 + Duration::from_millis(500)).await;
		sideload.close().await;

		let runs = std::fs::read_to_string(&marker).unwrap();
		assert!(runs.lines().count() >= 2, "expected at least 2 runs, got {runs:?}");
	}
}
