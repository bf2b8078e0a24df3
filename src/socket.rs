// src/socket.rs - Socket factory
//
// Translates a session mode into a configured, non-blocking socket:
// - TCP servers: SO_REUSEADDR, bind, listen(4)
// - TCP clients: connect expected to return EINPROGRESS
// - UDP: 256 KiB send/recv buffers, bind, optional default peer
//
// Hostname resolution is blocking and takes the first IPv4 result.

use crate::error::{Error, Result};
use log::info;
use socket2::{Domain, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

pub const LISTEN_BACKLOG: i32 = 4;
pub const UDP_SOCKET_BUFFER_SIZE: usize = 256 * 1024;

/// What kind of endpoint the factory should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    RtspClient,
    RtspServer,
    TcpDatagramActive,
    TcpDatagramPassive,
    Udp,
}

impl SocketMode {
    fn is_server(self) -> bool {
        matches!(self, SocketMode::RtspServer | SocketMode::TcpDatagramPassive)
    }

    fn is_tcp_client(self) -> bool {
        matches!(self, SocketMode::RtspClient | SocketMode::TcpDatagramActive)
    }
}

/// Blocking resolution of `host:port` to the first IPv4 address returned.
pub fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddrV4> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::HostResolution(host.to_string()))?;

    for addr in addrs {
        if let SocketAddr::V4(v4) = addr {
            return Ok(v4);
        }
    }
    Err(Error::HostResolution(host.to_string()))
}

/// Create and configure the socket for one session.
///
/// Client modes connect to `remote` (non-blocking, so the connect is usually
/// still in progress on return); binding modes bind `local_addr:local_port`,
/// falling back to the wildcard address. A UDP socket with a `remote` is
/// connected to establish the default peer.
pub fn open_session_socket(
    mode: SocketMode,
    local_addr: Option<Ipv4Addr>,
    local_port: u16,
    remote: Option<(&str, u16)>,
) -> Result<Socket> {
    let ty = if mode == SocketMode::Udp {
        Type::DGRAM
    } else {
        Type::STREAM
    };
    let socket = Socket::new(Domain::IPV4, ty, None)?;

    if mode.is_server() {
        socket.set_reuse_address(true)?;
    }

    if mode == SocketMode::Udp {
        socket.set_recv_buffer_size(UDP_SOCKET_BUFFER_SIZE)?;
        socket.set_send_buffer_size(UDP_SOCKET_BUFFER_SIZE)?;
    }

    socket.set_nonblocking(true)?;

    if mode.is_tcp_client() {
        let (host, port) = remote.ok_or_else(|| Error::HostResolution(String::new()))?;
        let peer = resolve_ipv4(host, port)?;
        info!("connecting socket to {}", peer);
        connect_in_progress(&socket, &peer.into())?;
        return Ok(socket);
    }

    let bind_addr = SocketAddrV4::new(
        local_addr.unwrap_or(Ipv4Addr::UNSPECIFIED),
        local_port,
    );
    socket.bind(&SockAddr::from(bind_addr))?;

    match mode {
        SocketMode::RtspServer | SocketMode::TcpDatagramPassive => {
            socket.listen(LISTEN_BACKLOG)?;
        }
        SocketMode::Udp => {
            if let Some((host, port)) = remote {
                let peer = resolve_ipv4(host, port)?;
                socket.connect(&SockAddr::from(peer))?;
            }
        }
        _ => unreachable!(),
    }

    Ok(socket)
}

/// Non-blocking TCP connect: EINPROGRESS (or a spurious WouldBlock) means the
/// kernel took the request and completion arrives as write-readiness.
fn connect_in_progress(socket: &Socket, addr: &SockAddr) -> Result<()> {
    match socket.connect(addr) {
        Ok(()) => Ok(()),
        Err(e)
            if e.raw_os_error() == Some(libc::EINPROGRESS)
                || e.kind() == std::io::ErrorKind::WouldBlock =>
        {
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
