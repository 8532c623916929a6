//! C9 — dialer-forwarder.
//!
//! A loopback TCP listener and UDP NAT that forward everything received to a single
//! fixed destination, dialed through a caller-supplied [`OutboundDialer`]. Used by the
//! side-load supervisor (C10) to bridge a helper process's plaintext listening socket
//! onto whatever outbound the router has configured, without the helper needing to
//! know anything about proxy protocols.
//!
//! Grounded on `examples/original_source/common/dialerforwarder/dialerforwarder.go`:
//! one accept-loop per TCP listener, and a UDP side built from a read-loop (demuxing
//! inbound datagrams by source into NAT entries), a write-loop (the only task allowed
//! to call `send_to` on the shared socket), and a timeout-based eviction pass. Each NAT
//! entry additionally owns a short-lived reader task that pumps its dialed outbound
//! socket back into the write-loop's channel; the three "long-lived" tasks are the
//! fixed scaffolding, while per-flow reader tasks come and go with traffic.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::net::copy::{ConnectionResult, TcpStreamSplitter, copy_bidirectional};

/// Time a loopback TCP peer is given to produce early data before the forwarder gives
/// up waiting and starts the plain bidirectional copy anyway.
pub const READ_PAYLOAD_TIMEOUT: Duration = Duration::from_millis(300);
/// Idle timeout for a UDP NAT entry when the provider configuration does not set one.
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
	Tcp,
	Udp,
}

/// The outbound the forwarder dials into. Implemented by the embedding router; this
/// crate never implements a proxy protocol client itself.
#[async_trait]
pub trait OutboundDialer: Send + Sync + 'static {
	async fn dial_tcp(&self, destination: SocketAddr) -> io::Result<TcpStream>;
	/// Returns a socket already `connect`-ed to `destination`, so the reader task can
	/// use `recv`/`send` without re-specifying the peer on every datagram.
	async fn dial_udp(&self, destination: SocketAddr) -> io::Result<UdpSocket>;
}

#[derive(thiserror::Error, Debug)]
pub enum ForwardError {
	#[error("failed to bind tcp listener on 127.0.0.1:{0}: {1}")]
	TcpBind(u16, io::Error),
	#[error("failed to bind udp socket on 127.0.0.1:{0}: {1}")]
	UdpBind(u16, io::Error),
}

struct NatEntry {
	outbound: Arc<UdpSocket>,
	last_active: Mutex<Instant>,
	reader: tokio_util::sync::CancellationToken,
}

/// Loopback TCP/UDP forwarder to a single fixed destination.
pub struct Forwarder<D: OutboundDialer> {
	dialer: Arc<D>,
	port: u16,
	destination: SocketAddr,
	networks: Vec<Network>,
	udp_timeout: Duration,
	token: CancellationToken,
	nat: Arc<Mutex<HashMap<SocketAddr, Arc<NatEntry>>>>,
	tcp_addr: Mutex<Option<SocketAddr>>,
	udp_addr: Mutex<Option<SocketAddr>>,
}

impl<D: OutboundDialer> Forwarder<D> {
	pub fn new(
		dialer: Arc<D>,
		port: u16,
		destination: SocketAddr,
		networks: Vec<Network>,
		udp_timeout: Option<Duration>,
		parent: &CancellationToken,
	) -> Self {
		Self {
			dialer,
			port,
			destination,
			networks,
			udp_timeout: udp_timeout.unwrap_or(DEFAULT_UDP_TIMEOUT),
			token: parent.child_token(),
			nat: Arc::new(Mutex::new(HashMap::new())),
			tcp_addr: Mutex::new(None),
			udp_addr: Mutex::new(None),
		}
	}

	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.token
	}

	pub fn close(&self) {
		self.token.cancel();
	}

	/// The bound TCP listener address, once `start` has run; useful when `port` was 0.
	pub async fn tcp_local_addr(&self) -> Option<SocketAddr> {
		*self.tcp_addr.lock().await
	}

	pub async fn udp_local_addr(&self) -> Option<SocketAddr> {
		*self.udp_addr.lock().await
	}

	pub async fn start(&self) -> Result<(), ForwardError> {
		let bind_addr: SocketAddr = ([127, 0, 0, 1], self.port).into();

		if self.networks.contains(&Network::Tcp) {
			let listener = TcpListener::bind(bind_addr)
				.await
				.map_err(|e| ForwardError::TcpBind(self.port, e))?;
			let local_addr = listener.local_addr().unwrap();
			info!(addr = %local_addr, "tcp server started");
			*self.tcp_addr.lock().await = Some(local_addr);
			let dialer = self.dialer.clone();
			let destination = self.destination;
			let token = self.token.clone();
			tokio::spawn(async move { accept_loop(listener, dialer, destination, token).await });
		}

		if self.networks.contains(&Network::Udp) {
			let socket = Arc::new(
				UdpSocket::bind(bind_addr)
					.await
					.map_err(|e| ForwardError::UdpBind(self.port, e))?,
			);
			let local_addr = socket.local_addr().unwrap();
			info!(addr = %local_addr, "udp server started");
			*self.udp_addr.lock().await = Some(local_addr);

			let (tx, rx) = mpsc::channel::<(Bytes, SocketAddr)>(1024);
			// write-loop: the only task that calls send_to on the shared socket.
			tokio::spawn(write_loop(socket.clone(), rx, self.token.clone()));
			// read-loop: demuxes inbound datagrams into NAT entries.
			tokio::spawn(read_loop(
				socket,
				self.nat.clone(),
				self.dialer.clone(),
				self.destination,
				tx,
				self.token.clone(),
			));
			// eviction tick: the NAT's internal timeout sweep.
			tokio::spawn(eviction_loop(self.nat.clone(), self.udp_timeout, self.token.clone()));
		}

		Ok(())
	}
}

async fn accept_loop<D: OutboundDialer>(
	listener: TcpListener,
	dialer: Arc<D>,
	destination: SocketAddr,
	token: CancellationToken,
) {
	loop {
		tokio::select! {
			_ = token.cancelled() => {
				debug!("tcp accept loop shut down");
				return;
			}
			accepted = listener.accept() => {
				match accepted {
					Ok((conn, _)) => {
						let dialer = dialer.clone();
						tokio::spawn(async move {
							if let Err(e) = handle_tcp(conn, dialer, destination).await {
								warn!(error = %e, "dialer-forwarder tcp session failed");
							}
						});
					}
					Err(e) if is_temporary(&e) => {
						warn!(error = %e, "temporary accept error, continuing");
						continue;
					}
					Err(e) => {
						error!(error = %e, "tcp accept loop terminated");
						return;
					}
				}
			}
		}
	}
}

fn is_temporary(e: &io::Error) -> bool {
	matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
}

async fn handle_tcp<D: OutboundDialer>(
	inbound: TcpStream,
	dialer: Arc<D>,
	destination: SocketAddr,
) -> io::Result<()> {
	let outbound = dialer.dial_tcp(destination).await?;
	copy_early(inbound, outbound).await
}

/// Reproduces the original's `copyEarlyConn`: give the inbound peer a short window to
/// produce its first payload, forward that payload first, then run the ordinary
/// bidirectional copy. Plain loopback `TcpStream`s have no cached-read buffer to drain,
/// so this always takes the read-once-with-deadline path.
async fn copy_early(inbound: TcpStream, mut outbound: TcpStream) -> io::Result<()> {
	use tokio::io::AsyncWriteExt;

	let mut probe = [0u8; 4096];
	if let Ok(Ok(n)) = tokio::time::timeout(READ_PAYLOAD_TIMEOUT, inbound.peek(&mut probe)).await {
		if n > 0 {
			let mut consumed = vec![0u8; n];
			let read = inbound.try_read(&mut consumed).unwrap_or(0);
			if read > 0 {
				outbound.write_all(&consumed[..read]).await?;
			}
		}
	}

	let stats = ConnectionResult::default();
	copy_bidirectional(TcpStreamSplitter(inbound), TcpStreamSplitter(outbound), &stats)
		.await
		.map_err(|e| io::Error::other(e.to_string()))
}

async fn read_loop<D: OutboundDialer>(
	socket: Arc<UdpSocket>,
	nat: Arc<Mutex<HashMap<SocketAddr, Arc<NatEntry>>>>,
	dialer: Arc<D>,
	destination: SocketAddr,
	tx: mpsc::Sender<(Bytes, SocketAddr)>,
	token: CancellationToken,
) {
	let mut buf = vec![0u8; 65535];
	loop {
		let (n, source) = tokio::select! {
			_ = token.cancelled() => {
				debug!("udp read loop shut down");
				return;
			}
			res = socket.recv_from(&mut buf) => match res {
				Ok(v) => v,
				Err(e) => {
					warn!(error = %e, "udp read loop terminated");
					return;
				}
			}
		};

		let entry = {
			let mut guard = nat.lock().await;
			if let Some(entry) = guard.get(&source) {
				entry.clone()
			} else {
				match dialer.dial_udp(destination).await {
					Ok(outbound) => {
						let outbound = Arc::new(outbound);
						let reader_token = token.child_token();
						let entry = Arc::new(NatEntry {
							outbound: outbound.clone(),
							last_active: Mutex::new(Instant::now()),
							reader: reader_token.clone(),
						});
						guard.insert(source, entry.clone());
						tokio::spawn(nat_reader(outbound, source, tx.clone(), reader_token));
						entry
					},
					Err(e) => {
						warn!(error = %e, source = %source, "failed to dial udp outbound for new nat entry");
						continue;
					},
				}
			}
		};

		*entry.last_active.lock().await = Instant::now();
		if let Err(e) = entry.outbound.send(&buf[..n]).await {
			warn!(error = %e, source = %source, "udp send to outbound failed");
		}
	}
}

/// Per-NAT-entry task: pumps responses from the dialed outbound socket back through
/// the write-loop's channel, tagged with the original client address.
async fn nat_reader(
	outbound: Arc<UdpSocket>,
	source: SocketAddr,
	tx: mpsc::Sender<(Bytes, SocketAddr)>,
	token: CancellationToken,
) {
	let mut buf = vec![0u8; 65535];
	loop {
		tokio::select! {
			_ = token.cancelled() => return,
			res = outbound.recv(&mut buf) => match res {
				Ok(n) => {
					if tx.send((Bytes::copy_from_slice(&buf[..n]), source)).await.is_err() {
						return;
					}
				}
				Err(_) => return,
			}
		}
	}
}

async fn write_loop(
	socket: Arc<UdpSocket>,
	mut rx: mpsc::Receiver<(Bytes, SocketAddr)>,
	token: CancellationToken,
) {
	loop {
		tokio::select! {
			_ = token.cancelled() => {
				rx.close();
				while rx.recv().await.is_some() {}
				return;
			}
			msg = rx.recv() => match msg {
				Some((buf, dest)) => {
					if let Err(e) = socket.send_to(&buf, dest).await {
						warn!(error = %e, "write back udp failed");
					}
				}
				None => return,
			}
		}
	}
}

async fn eviction_loop(
	nat: Arc<Mutex<HashMap<SocketAddr, Arc<NatEntry>>>>,
	timeout: Duration,
	token: CancellationToken,
) {
	let mut tick = tokio::time::interval(Duration::from_secs(30).min(timeout));
	loop {
		tokio::select! {
			_ = token.cancelled() => return,
			_ = tick.tick() => {
				let mut guard = nat.lock().await;
				let mut expired = Vec::new();
				for (addr, entry) in guard.iter() {
					if entry.last_active.lock().await.elapsed() > timeout {
						expired.push(*addr);
					}
				}
				for addr in expired {
					if let Some(entry) = guard.remove(&addr) {
						entry.reader.cancel();
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::net::Ipv4Addr;

	use tokio::io::{AsyncReadExt, AsyncWriteExt};

	use super::*;

	struct EchoDialer;

	#[async_trait]
	impl OutboundDialer for EchoDialer {
		async fn dial_tcp(&self, destination: SocketAddr) -> io::Result<TcpStream> {
			TcpStream::connect(destination).await
		}
		async fn dial_udp(&self, destination: SocketAddr) -> io::Result<UdpSocket> {
			let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
			socket.connect(destination).await?;
			Ok(socket)
		}
	}

	async fn start_tcp_echo() -> SocketAddr {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			loop {
				let Ok((mut sock, _)) = listener.accept().await else { return };
				tokio::spawn(async move {
					let mut buf = [0u8; 1024];
					loop {
						match sock.read(&mut buf).await {
							Ok(0) | Err(_) => return,
							Ok(n) => {
								if sock.write_all(&buf[..n]).await.is_err() {
									return;
								}
							},
						}
					}
				});
			}
		});
		addr
	}

	#[tokio::test]
	async fn tcp_forward_round_trips() {
		let echo_addr = start_tcp_echo().await;
		let token = CancellationToken::new();
		let forwarder =
			Forwarder::new(Arc::new(EchoDialer), 0, echo_addr, vec![Network::Tcp], None, &token);
		forwarder.start().await.unwrap();
		let listen_addr = forwarder.tcp_local_addr().await.unwrap();

		let mut client = TcpStream::connect(listen_addr).await.unwrap();
		client.write_all(b"ping").await.unwrap();
		client.shutdown().await.unwrap();
		let mut out = Vec::new();
		client.read_to_end(&mut out).await.unwrap();
		assert_eq!(out, b"ping");

		forwarder.close();
	}

	#[tokio::test]
	async fn udp_forward_round_trips() {
		let echo_addr = {
			let socket = Arc::new(UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap());
			let addr = socket.local_addr().unwrap();
			tokio::spawn(async move {
				let mut buf = [0u8; 1024];
				loop {
					let Ok((n, peer)) = socket.recv_from(&mut buf).await else { return };
					let _ = socket.send_to(&buf[..n], peer).await;
				}
			});
			addr
		};

		let token = CancellationToken::new();
		let forwarder =
			Forwarder::new(Arc::new(EchoDialer), 0, echo_addr, vec![Network::Udp], None, &token);
		forwarder.start().await.unwrap();
		let listen_addr = forwarder.udp_local_addr().await.unwrap();

		let client = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		client.send_to(b"pong", listen_addr).await.unwrap();
		let mut buf = [0u8; 1024];
		let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
			.await
			.expect("udp reply within timeout")
			.unwrap();
		assert_eq!(&buf[..n], b"pong");

		forwarder.close();
	}
}
