//! C2 — request dialer.
//!
//! Produces outbound TCP connections configured only from a provider's
//! `request_dialer` options (bind interface/address, routing mark, reuse-addr, connect
//! timeout, TCP Fast Open). Used by the DNS resolver (C1) and the subscription fetcher
//! (C3). Deliberately does not consult any emitted outbound: chaining through a freshly
//! translated proxy to fetch the subscription that produced it would be circular.
//!
//! Grounded on the raw-fd `socket2` → `tokio::net::TcpSocket` handoff used by the
//! pack's HTTP connector implementations: build the socket with `socket2` to reach
//! options `TcpSocket` doesn't expose (bind-device, routing mark, TCP Fast Open), then
//! transfer ownership of the fd into a `TcpSocket` for the actual async `connect`.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::{FromRawFd, IntoRawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpSocket, TcpStream};

#[derive(Debug, Clone, Default)]
pub struct RequestDialerOptions {
	pub bind_interface: Option<String>,
	pub inet4_bind_address: Option<Ipv4Addr>,
	pub inet6_bind_address: Option<Ipv6Addr>,
	pub routing_mark: Option<u32>,
	pub reuse_addr: bool,
	pub connect_timeout: Option<Duration>,
	pub tcp_fast_open: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum DialError {
	#[error("failed to create socket for {0}: {1}")]
	Create(SocketAddr, io::Error),
	#[error("failed to bind local address for {0}: {1}")]
	Bind(SocketAddr, io::Error),
	#[error("connect to {0}: {1}")]
	Connect(SocketAddr, io::Error),
	#[error("connect to {0} timed out after {1:?}")]
	Timeout(SocketAddr, Duration),
}

/// A dialer carrying a fixed set of socket options, independent of any router-level
/// outbound configuration.
#[derive(Debug, Clone, Default)]
pub struct Dialer {
	opts: RequestDialerOptions,
}

impl Dialer {
	pub fn new(opts: RequestDialerOptions) -> Self {
		Self { opts }
	}

	pub async fn connect_tcp(&self, addr: SocketAddr) -> Result<TcpStream, DialError> {
		let domain = Domain::for_address(addr);
		let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
			.map_err(|e| DialError::Create(addr, e))?;
		// Ownership transfers to `TcpSocket` below; the caller is responsible for
		// O_NONBLOCK when constructing a Tokio socket from a raw fd.
		socket.set_nonblocking(true).map_err(|e| DialError::Create(addr, e))?;

		#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
		if let Some(iface) = &self.opts.bind_interface {
			socket
				.bind_device(Some(iface.as_bytes()))
				.map_err(|e| DialError::Bind(addr, e))?;
		}
		#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
		if let Some(mark) = self.opts.routing_mark {
			socket.set_mark(mark).map_err(|e| DialError::Bind(addr, e))?;
		}
		#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
		if self.opts.tcp_fast_open {
			// Best-effort: an older kernel without TFO support should not prevent a
			// plain connect() from proceeding.
			let _ = socket.set_tcp_fastopen_connect(true);
		}

		self.bind_local_address(&socket, &addr).map_err(|e| DialError::Bind(addr, e))?;

		#[cfg(unix)]
		let socket = unsafe { TcpSocket::from_raw_fd(socket.into_raw_fd()) };
		#[cfg(windows)]
		let socket = unsafe {
			use std::os::windows::io::{FromRawSocket, IntoRawSocket};
			TcpSocket::from_raw_socket(socket.into_raw_socket())
		};

		if self.opts.reuse_addr {
			let _ = socket.set_reuseaddr(true);
		}

		let connect = socket.connect(addr);
		match self.opts.connect_timeout {
			Some(d) => tokio::time::timeout(d, connect)
				.await
				.map_err(|_| DialError::Timeout(addr, d))?
				.map_err(|e| DialError::Connect(addr, e)),
			None => connect.await.map_err(|e| DialError::Connect(addr, e)),
		}
	}

	fn bind_local_address(&self, socket: &Socket, dst_addr: &SocketAddr) -> io::Result<()> {
		match (*dst_addr, self.opts.inet4_bind_address, self.opts.inet6_bind_address) {
			(SocketAddr::V4(_), Some(addr), _) => {
				socket.bind(&SocketAddr::new(IpAddr::V4(addr), 0).into())?;
			},
			(SocketAddr::V6(_), _, Some(addr)) => {
				socket.bind(&SocketAddr::new(IpAddr::V6(addr), 0).into())?;
			},
			_ => {
				if cfg!(windows) {
					let any: SocketAddr = match dst_addr {
						SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
						SocketAddr::V6(_) => ([0, 0, 0, 0, 0, 0, 0, 0], 0).into(),
					};
					socket.bind(&any.into())?;
				}
			},
		}
		Ok(())
	}
}
