//! Listener construction and accepted-stream plumbing.
//!
//! Sockets are built with `socket2` so bind options (port reuse, backlog,
//! non-blocking mode) are applied before `bind`, then converted into their
//! `std::net` counterparts. The engine works with raw fds from there on.

use crate::addr::{self, Addr, BindOptions, ParsedAddr, Transport};
use crate::error::Error;
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::fs;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;

const BACKLOG: i32 = 1024;

/// An accepted byte-stream connection.
pub(crate) enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    pub fn fd(&self) -> RawFd {
        match self {
            Stream::Tcp(s) => s.as_raw_fd(),
            Stream::Unix(s) => s.as_raw_fd(),
        }
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Unix(s) => s.read(buf),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Unix(s) => s.write(buf),
        }
    }

    pub fn set_nonblocking(&self, on: bool) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_nonblocking(on),
            Stream::Unix(s) => s.set_nonblocking(on),
        }
    }

    pub fn local_addr(&self) -> io::Result<Addr> {
        match self {
            Stream::Tcp(s) => s.local_addr().map(Addr::Ip),
            Stream::Unix(s) => s
                .local_addr()
                .map(|a| Addr::Unix(a.as_pathname().map(PathBuf::from))),
        }
    }

    /// Arm TCP keep-alive with the given idle time. No-op for unix sockets.
    pub fn set_keepalive(&self, idle: Duration) -> io::Result<()> {
        match self {
            Stream::Tcp(_) => {
                let sock = SockRef::from(self);
                sock.set_keepalive(true)?;
                sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))
            }
            Stream::Unix(_) => Ok(()),
        }
    }

    pub fn into_owned_fd(self) -> OwnedFd {
        match self {
            Stream::Tcp(s) => s.into(),
            Stream::Unix(s) => s.into(),
        }
    }
}

impl AsFd for Stream {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Stream::Tcp(s) => s.as_fd(),
            Stream::Unix(s) => s.as_fd(),
        }
    }
}

enum ListenSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
    Unix(UnixListener),
}

/// The engine's single bound socket.
pub(crate) struct Listener {
    sock: ListenSocket,
    local: Addr,
    transport: Transport,
    unix_path: Option<PathBuf>,
}

impl Listener {
    pub fn bind(parsed: &ParsedAddr) -> Result<Self, Error> {
        match parsed.transport {
            Transport::Unix => {
                let path = PathBuf::from(&parsed.target);
                // A previous run may have left its socket file behind.
                let _ = fs::remove_file(&path);
                let listener = UnixListener::bind(&path)?;
                listener.set_nonblocking(true)?;
                Ok(Self {
                    sock: ListenSocket::Unix(listener),
                    local: Addr::Unix(Some(path.clone())),
                    transport: parsed.transport,
                    unix_path: Some(path),
                })
            }
            t if t.is_datagram() => {
                let target = addr::resolve(t, &parsed.target)?;
                let socket = new_socket(target, Type::DGRAM, Protocol::UDP, parsed.options)?;
                socket.bind(&target.into())?;
                let socket: UdpSocket = socket.into();
                let local = socket.local_addr()?;
                Ok(Self {
                    sock: ListenSocket::Udp(socket),
                    local: Addr::Ip(local),
                    transport: parsed.transport,
                    unix_path: None,
                })
            }
            t => {
                let target = addr::resolve(t, &parsed.target)?;
                let socket = new_socket(target, Type::STREAM, Protocol::TCP, parsed.options)?;
                socket.set_reuse_address(true)?;
                socket.bind(&target.into())?;
                socket.listen(BACKLOG)?;
                let listener: TcpListener = socket.into();
                let local = listener.local_addr()?;
                Ok(Self {
                    sock: ListenSocket::Tcp(listener),
                    local: Addr::Ip(local),
                    transport: parsed.transport,
                    unix_path: None,
                })
            }
        }
    }

    pub fn fd(&self) -> RawFd {
        match &self.sock {
            ListenSocket::Tcp(s) => s.as_raw_fd(),
            ListenSocket::Udp(s) => s.as_raw_fd(),
            ListenSocket::Unix(s) => s.as_raw_fd(),
        }
    }

    pub fn local_addr(&self) -> &Addr {
        &self.local
    }

    pub fn is_datagram(&self) -> bool {
        self.transport.is_datagram()
    }

    /// Accept one pending connection. `WouldBlock` means the backlog is
    /// drained.
    pub fn accept(&self) -> io::Result<(Stream, Addr)> {
        match &self.sock {
            ListenSocket::Tcp(listener) => {
                let (stream, peer) = listener.accept()?;
                Ok((Stream::Tcp(stream), Addr::Ip(peer)))
            }
            ListenSocket::Unix(listener) => {
                let (stream, peer) = listener.accept()?;
                Ok((
                    Stream::Unix(stream),
                    Addr::Unix(peer.as_pathname().map(PathBuf::from)),
                ))
            }
            ListenSocket::Udp(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "datagram listeners do not accept",
            )),
        }
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        match &self.sock {
            ListenSocket::Udp(socket) => socket.recv_from(buf),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stream listeners do not recv_from",
            )),
        }
    }

    pub fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        match &self.sock {
            ListenSocket::Udp(socket) => socket.send_to(buf, peer),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "stream listeners do not send_to",
            )),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(path) = &self.unix_path {
            let _ = fs::remove_file(path);
        }
    }
}

fn new_socket(
    addr: SocketAddr,
    ty: Type,
    proto: Protocol,
    options: BindOptions,
) -> io::Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, ty, Some(proto))?;
    if options.reuse_port {
        socket.set_reuse_port(true)?;
    }
    socket.set_nonblocking(true)?;
    Ok(socket)
}
