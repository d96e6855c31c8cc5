//! Engine address strings.
//!
//! Addresses take the form `"<proto>://<host:port>?opt=val"`, e.g.
//! `"tcp://127.0.0.1:6000"`, `"udp4://0.0.0.0:5353?reuseport=true"`, or
//! `"unix:///run/app.sock"`. A bare `host:port` defaults to `tcp`.

use crate::error::Error;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

/// A local or remote endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Ip(SocketAddr),
    /// A unix-domain endpoint; `None` for unnamed peers.
    Unix(Option<PathBuf>),
}

impl Addr {
    /// The IP socket address, if this is an IP endpoint.
    pub fn ip(&self) -> Option<SocketAddr> {
        match self {
            Addr::Ip(addr) => Some(*addr),
            Addr::Unix(_) => None,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::Ip(addr) => addr.fmt(f),
            Addr::Unix(Some(path)) => path.display().fmt(f),
            Addr::Unix(None) => f.write_str("<unnamed>"),
        }
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Addr::Ip(addr)
    }
}

/// Transport named by the address scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transport {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
    Unix,
}

impl Transport {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "tcp" => Some(Transport::Tcp),
            "tcp4" => Some(Transport::Tcp4),
            "tcp6" => Some(Transport::Tcp6),
            "udp" => Some(Transport::Udp),
            "udp4" => Some(Transport::Udp4),
            "udp6" => Some(Transport::Udp6),
            "unix" => Some(Transport::Unix),
            _ => None,
        }
    }

    pub(crate) fn is_datagram(&self) -> bool {
        matches!(self, Transport::Udp | Transport::Udp4 | Transport::Udp6)
    }
}

/// Socket options recognized in the address query string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct BindOptions {
    pub reuse_port: bool,
}

/// A parsed engine address: transport, bind target, and options.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct ParsedAddr {
    pub transport: Transport,
    pub target: String,
    pub options: BindOptions,
}

pub(crate) fn parse(addr: &str) -> Result<ParsedAddr, Error> {
    let (scheme, rest) = match addr.find("://") {
        Some(at) => (&addr[..at], &addr[at + 3..]),
        None => ("tcp", addr),
    };
    let transport = Transport::from_scheme(scheme)
        .ok_or_else(|| Error::Addr(format!("unknown scheme `{scheme}` in `{addr}`")))?;

    let (target, query) = match rest.find('?') {
        Some(at) => (&rest[..at], Some(&rest[at + 1..])),
        None => (rest, None),
    };
    if target.is_empty() {
        return Err(Error::Addr(format!("missing bind target in `{addr}`")));
    }

    let mut options = BindOptions::default();
    if let Some(query) = query {
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, "true"));
            match key {
                "reuseport" => {
                    options.reuse_port = value.parse().map_err(|_| {
                        Error::Addr(format!("invalid value `{value}` for reuseport"))
                    })?;
                }
                _ => return Err(Error::Addr(format!("unknown option `{key}` in `{addr}`"))),
            }
        }
    }

    Ok(ParsedAddr {
        transport,
        target: target.to_string(),
        options,
    })
}

/// Resolve the bind target to one socket address matching the transport's
/// address family.
pub(crate) fn resolve(transport: Transport, target: &str) -> Result<SocketAddr, Error> {
    let candidates = target
        .to_socket_addrs()
        .map_err(|e| Error::Addr(format!("cannot resolve `{target}`: {e}")))?;
    let wanted = |addr: &SocketAddr| match transport {
        Transport::Tcp4 | Transport::Udp4 => addr.is_ipv4(),
        Transport::Tcp6 | Transport::Udp6 => addr.is_ipv6(),
        _ => true,
    };
    candidates
        .into_iter()
        .find(wanted)
        .ok_or_else(|| Error::Addr(format!("no matching address family for `{target}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_defaults_to_tcp() {
        let parsed = parse("127.0.0.1:7000").unwrap();
        assert_eq!(parsed.transport, Transport::Tcp);
        assert_eq!(parsed.target, "127.0.0.1:7000");
        assert!(!parsed.options.reuse_port);
    }

    #[test]
    fn schemes_map_to_transports() {
        for (scheme, transport) in [
            ("tcp", Transport::Tcp),
            ("tcp4", Transport::Tcp4),
            ("tcp6", Transport::Tcp6),
            ("udp", Transport::Udp),
            ("udp4", Transport::Udp4),
            ("udp6", Transport::Udp6),
        ] {
            let parsed = parse(&format!("{scheme}://127.0.0.1:7000")).unwrap();
            assert_eq!(parsed.transport, transport);
        }
        let parsed = parse("unix:///tmp/engine.sock").unwrap();
        assert_eq!(parsed.transport, Transport::Unix);
        assert_eq!(parsed.target, "/tmp/engine.sock");
    }

    #[test]
    fn reuseport_option_parses() {
        let parsed = parse("tcp://0.0.0.0:80?reuseport=true").unwrap();
        assert!(parsed.options.reuse_port);
        let parsed = parse("tcp://0.0.0.0:80?reuseport=false").unwrap();
        assert!(!parsed.options.reuse_port);
        // Bare option means true.
        let parsed = parse("tcp://0.0.0.0:80?reuseport").unwrap();
        assert!(parsed.options.reuse_port);
    }

    #[test]
    fn bad_addresses_are_rejected() {
        assert!(parse("quic://127.0.0.1:7000").is_err());
        assert!(parse("tcp://").is_err());
        assert!(parse("tcp://127.0.0.1:7000?nodelay=true").is_err());
        assert!(parse("tcp://127.0.0.1:7000?reuseport=maybe").is_err());
    }

    #[test]
    fn resolve_honors_address_family() {
        let v4 = resolve(Transport::Tcp4, "127.0.0.1:80").unwrap();
        assert!(v4.is_ipv4());
        let any = resolve(Transport::Tcp, "127.0.0.1:80").unwrap();
        assert_eq!(any, "127.0.0.1:80".parse().unwrap());
        assert!(resolve(Transport::Tcp6, "127.0.0.1:80").is_err());
        let v6 = resolve(Transport::Udp6, "[::1]:53").unwrap();
        assert!(v6.is_ipv6());
    }

    #[test]
    fn addr_display() {
        let ip: Addr = "127.0.0.1:9000".parse::<SocketAddr>().unwrap().into();
        assert_eq!(ip.to_string(), "127.0.0.1:9000");
        assert!(ip.ip().is_some());
        let unix = Addr::Unix(Some(PathBuf::from("/tmp/engine.sock")));
        assert_eq!(unix.to_string(), "/tmp/engine.sock");
        assert_eq!(Addr::Unix(None).to_string(), "<unnamed>");
    }
}
